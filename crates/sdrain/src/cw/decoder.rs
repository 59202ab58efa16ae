//! Tick-driven Morse decoder with adaptive timing
//!
//! The decoder receives one boolean state per tick (tick duration =
//! `block_size / sample_rate`). On every transition it measures the
//! duration of the interval that just ended and classifies it against two
//! independently adapting thresholds, one for ON durations (dit vs. dah)
//! and one for OFF durations (symbol gap vs. character break vs. word
//! break). Decoded characters are written byte-wise to the injected
//! writer.
//!
//! This follows the Goertzel-based decoder lineage of OZ1JHM's Arduino
//! implementation, see
//! <http://www.oz1jhm.dk/sites/default/files/decoder11.ino>.

use std::io::Write;

use log::warn;

use super::table::{decode_table, CwChar, Symbol};

/// Initial speed assumption of a freshly reset decoder
pub const DEFAULT_WPM: f64 = 20.0;

const UNKNOWN_CHARACTER: char = '\u{A6}';

// ON/OFF intervals shorter than this are treated as noise.
const MIN_DIT_TIME: f64 = 2.0;

const DEFAULT_ABORT_AFTER_DITS: f64 = 10.0;

/// Tracks the short and long variant of a duration
///
/// Used twice by the decoder: once for ON durations (dit/dah) and once for
/// OFF durations (symbol gap / character break). `low` and `high` estimate
/// the current short and long duration; the classification threshold is
/// their geometric mean, which guards against extreme means from outliers.
#[derive(Clone, Debug)]
pub struct AdaptiveThreshold {
    preset: f64,
    upper_bound: f64,

    low: f64,
    high: f64,

    last: f64,
    threshold: f64,
}

impl AdaptiveThreshold {
    pub fn new(preset: f64) -> Self {
        let mut result = Self {
            preset,
            upper_bound: 10.0,
            low: 0.0,
            high: 0.0,
            last: 0.0,
            threshold: 0.0,
        };
        result.reset();
        result
    }

    /// Back to the preset, assuming the default 1:3 timing
    pub fn reset(&mut self) {
        self.low = self.preset;
        self.high = 3.0 * self.low;
        self.last = self.low;
        self.update_threshold();
    }

    pub fn set_preset(&mut self, preset: f64) {
        self.preset = preset;
        self.reset();
    }

    /// Feed an accepted duration
    ///
    /// Durations beyond `low · upper_bound` are discarded as outliers. The
    /// estimates only move when the duration and its predecessor differ by
    /// at least a factor of two, i.e. on a short/long alternation:
    /// `low ← 0.75·low + 0.25·new_low`, analogously for `high`.
    pub fn put(&mut self, duration: f64) {
        const HIGH_FACTOR: f64 = 2.0;
        const AVG_WEIGHT: f64 = 0.75;
        const CURRENT_WEIGHT: f64 = 1.0 - AVG_WEIGHT;

        if duration >= self.low * self.upper_bound {
            return;
        }

        if self.last >= duration * HIGH_FACTOR {
            // last high, now low
            self.low = AVG_WEIGHT * self.low + CURRENT_WEIGHT * duration;
            self.high = AVG_WEIGHT * self.high + CURRENT_WEIGHT * self.last;
        } else if duration >= self.last * HIGH_FACTOR {
            // last low, now high
            self.low = AVG_WEIGHT * self.low + CURRENT_WEIGHT * self.last;
            self.high = AVG_WEIGHT * self.high + CURRENT_WEIGHT * duration;
        }
        self.last = duration;
        self.update_threshold();
    }

    fn update_threshold(&mut self) {
        // geometric mean
        self.threshold = (self.low * self.high).sqrt();
    }

    pub fn get(&self) -> f64 {
        self.threshold
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn ratio(&self) -> f64 {
        self.high / self.low
    }
}

/// The tick-driven Morse decoder
///
/// Strictly single-threaded; [`tick`](Decoder::tick) is the hot path and
/// does not allocate.
pub struct Decoder<W: Write> {
    out: W,
    tick_seconds: f64,
    ticks: f64,

    last_state: bool,
    on_start: f64,
    off_start: f64,
    wpm: f64,
    decoding: bool,

    abort_decode_after_dits: f64,

    current_char: CwChar,
    current_char_invalid: bool,
    on_threshold: AdaptiveThreshold,
    off_threshold: AdaptiveThreshold,
}

impl<W: Write> Decoder<W> {
    pub fn new(out: W, sample_rate: usize, block_size: usize) -> Self {
        let tick_seconds = block_size as f64 / sample_rate as f64;
        let dit_time = wpm_to_dit(DEFAULT_WPM, tick_seconds);

        Self {
            out,
            tick_seconds,
            ticks: 0.0,

            last_state: false,
            on_start: 0.0,
            off_start: 0.0,
            wpm: DEFAULT_WPM,
            decoding: false,

            abort_decode_after_dits: DEFAULT_ABORT_AFTER_DITS,

            current_char: CwChar::new(),
            current_char_invalid: false,
            on_threshold: AdaptiveThreshold::new(dit_time),
            off_threshold: AdaptiveThreshold::new(dit_time),
        }
    }

    /// Forget everything, back to the default speed preset
    pub fn reset(&mut self) {
        self.preset_wpm(DEFAULT_WPM);
        self.clear();
    }

    /// Drop the current character and the tick clock, keep the adapted
    /// timing
    pub fn clear(&mut self) {
        self.decoding = false;
        self.current_char.clear();
        self.current_char_invalid = false;
        self.ticks = 0.0;
        self.on_start = 0.0;
        self.off_start = 0.0;
        self.last_state = false;
    }

    /// Preset both thresholds for the given speed
    pub fn preset_wpm(&mut self, wpm: f64) {
        self.wpm = wpm;
        let dit_time = wpm_to_dit(wpm, self.tick_seconds);
        self.on_threshold.set_preset(dit_time);
        self.off_threshold.set_preset(dit_time);
    }

    /// The current speed estimate
    pub fn wpm(&self) -> f64 {
        self.wpm
    }

    /// Advance the clock by one tick with the given signal state
    pub fn tick(&mut self, state: bool) {
        self.ticks += 1.0;
        let now = self.ticks;

        if state != self.last_state {
            if state {
                self.on_start = now;
                let off_duration = now - self.off_start;
                self.on_rising_edge(off_duration);
            } else {
                self.off_start = now;
                let on_duration = now - self.on_start;
                self.on_falling_edge(on_duration);
            }
            self.decoding = true;
        }
        self.last_state = state;

        let current_duration = if state {
            now - self.on_start
        } else {
            now - self.off_start
        };
        let upper_bound = self.off_threshold.get() * self.abort_decode_after_dits;

        if self.decoding && current_duration > upper_bound {
            self.decoding = false;
            self.decode_current_char();
        }
    }

    /// Decode whatever is still pending
    pub fn flush(&mut self) {
        self.decode_current_char();
    }

    fn on_rising_edge(&mut self, off_duration: f64) {
        if off_duration < MIN_DIT_TIME {
            return;
        }

        self.off_threshold.put(off_duration);

        let threshold = self.off_threshold.get();
        let upper_threshold = 4.5 * self.off_threshold.low();
        if off_duration >= upper_threshold {
            // we have a word break
            self.decode_current_char();
            self.write_to_output(' ');
        } else if off_duration >= threshold {
            // we have a new char
            self.decode_current_char();
        }
    }

    fn on_falling_edge(&mut self, on_duration: f64) {
        if on_duration < MIN_DIT_TIME {
            return;
        }

        self.on_threshold.put(on_duration);

        let threshold = self.on_threshold.get();
        let upper_threshold = 2.0 * self.on_threshold.high();
        if on_duration >= upper_threshold {
            self.current_char_invalid = true;
        } else if on_duration >= threshold {
            self.append_symbol(Symbol::Dah);
            self.wpm = (self.wpm + dit_to_wpm(self.on_threshold.low(), self.tick_seconds)) / 2.0;
        } else {
            self.append_symbol(Symbol::Dit);
        }
    }

    fn append_symbol(&mut self, symbol: Symbol) {
        if !self.current_char.push(symbol) {
            self.decode_current_char();
            self.current_char.push(symbol);
        }
    }

    fn decode_current_char(&mut self) {
        if self.current_char.is_empty() {
            return;
        }
        if self.current_char_invalid {
            self.current_char_invalid = false;
            self.current_char.clear();
            self.write_to_output(UNKNOWN_CHARACTER);
            return;
        }

        match decode_table().get(&self.current_char) {
            Some(&text) => self.write_to_output(text),
            None => self.write_to_output(UNKNOWN_CHARACTER),
        }
        self.current_char.clear();
    }

    fn write_to_output(&mut self, text: char) {
        let mut buf = [0u8; 4];
        if let Err(err) = self.out.write_all(text.encode_utf8(&mut buf).as_bytes()) {
            warn!("cannot write decoded char {:?} to output: {}", text, err);
        }
    }
}

/// Dit duration in ticks for the given speed
///
/// A word is 50 dit-lengths (reference word PARIS), so one dit takes
/// `60 / (50·wpm)` seconds.
fn wpm_to_dit(wpm: f64, tick_seconds: f64) -> f64 {
    let dit_seconds = 60.0 / (50.0 * wpm);
    (dit_seconds / tick_seconds).ceil()
}

/// Speed in WPM for the given dit duration in ticks
fn dit_to_wpm(dit_ticks: f64, tick_seconds: f64) -> f64 {
    let dit_seconds = dit_ticks * tick_seconds;
    60.0 / (50.0 * dit_seconds)
}
