//! CW demodulation from a spectral representation

use std::io::Write;

use log::debug;

use crate::dsp::{BoolDebouncer, Peak};
use crate::trace::{NoTracer, Tracer};

use super::decoder::Decoder;

const TRACE_DEMOD: &str = "demod";

// Ticks without signal before the demodulator reports a timeout.
const SILENCE_TIMEOUT: usize = 400;

const DEFAULT_SIGNAL_THRESHOLD: f32 = 15.0;
const DEFAULT_SIGNAL_DEBOUNCE: usize = 1;

/// Demodulates a CW signal detected in the frequency domain
///
/// One demodulator serves one [`Peak`]. Per tick it compares the magnitude
/// at the peak's signal bin against the noise floor plus a configurable
/// threshold, debounces the comparison, and drives the [`Decoder`] with the
/// result. A silence counter tracks how long the signal has been gone.
pub struct SpectralDemodulator<W: Write> {
    signal_threshold: f32,

    signal_debouncer: BoolDebouncer,
    decoder: Decoder<W>,
    tracer: Box<dyn Tracer>,

    peak: Option<Peak>,
    low_ticks: usize,
}

impl<W: Write> SpectralDemodulator<W> {
    pub fn new(out: W, sample_rate: usize, block_size: usize) -> Self {
        let mut result = Self {
            signal_threshold: DEFAULT_SIGNAL_THRESHOLD,
            signal_debouncer: BoolDebouncer::new(DEFAULT_SIGNAL_DEBOUNCE),
            decoder: Decoder::new(out, sample_rate, block_size),
            tracer: Box::new(NoTracer),
            peak: None,
            low_ticks: 0,
        };
        result.reset();
        result
    }

    pub fn reset(&mut self) {
        self.low_ticks = 0;
    }

    /// Threshold in dB above the noise floor for "signal present"
    pub fn set_signal_threshold(&mut self, threshold: f32) {
        self.signal_threshold = threshold;
    }

    pub fn set_signal_debounce(&mut self, debounce: usize) {
        self.signal_debouncer.set_threshold(debounce);
    }

    pub fn set_tracer(&mut self, tracer: Box<dyn Tracer>) {
        self.tracer = tracer;
    }

    /// Current speed estimate of the decoder
    pub fn wpm(&self) -> f64 {
        self.decoder.wpm()
    }

    pub fn attach(&mut self, peak: &Peak) {
        self.peak = Some(peak.clone());
        self.reset();
        debug!(
            "demodulating at {:.0}Hz ({} - {})",
            peak.center_frequency(),
            peak.from_bin,
            peak.to_bin
        );
    }

    pub fn attached(&self) -> bool {
        self.peak.is_some()
    }

    pub fn detach(&mut self) {
        self.peak = None;
        self.decoder.reset();
        debug!("demodulation stopped");
    }

    pub fn peak(&self) -> Option<&Peak> {
        self.peak.as_ref()
    }

    /// True once the signal has been silent for too long
    pub fn timeout_exceeded(&self) -> bool {
        self.low_ticks > SILENCE_TIMEOUT
    }

    /// Process one spectrum magnitude sample
    pub fn tick(&mut self, value: f32, noise_floor: f32) {
        if !self.attached() {
            return;
        }

        let threshold = self.signal_threshold + noise_floor;
        let state = value > threshold;
        let debounced = self.signal_debouncer.debounce(state);

        self.decoder.tick(debounced);

        self.tracer.trace(
            TRACE_DEMOD,
            format_args!(
                "{};{};{};{}\n",
                noise_floor,
                threshold,
                value,
                if debounced { 80 } else { -1 }
            ),
        );

        if debounced {
            self.low_ticks = 0;
        } else {
            self.low_ticks += 1;
        }
    }
}
