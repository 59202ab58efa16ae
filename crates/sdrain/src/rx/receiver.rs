//! The receiver loop: spectral analysis, peak scheduling, dispatch

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, tick, Receiver as ChannelReceiver, Sender, TrySendError};

#[cfg(not(test))]
use log::{info, warn};

#[cfg(test)]
use std::{println as info, println as warn};

use crate::call::Finders;
use crate::clock::Clock;
use crate::dsp::{
    find_noise_floor, find_peaks, magnitude_in_db, psd_value_in_db, BinLocation, Fft,
    FrequencyMapping, Peak, RollingMean,
};
use crate::trace::Tracer;

use super::listener::{Listener, DEFAULT_ATTACHMENT_TIMEOUT, DEFAULT_SILENCE_TIMEOUT};
use super::peaks::PeaksTable;
use super::pool::ListenerPool;
use super::writer::ChannelWriter;
use super::ReporterSet;

const IQ_BUFFER_SIZE: usize = 100;
const CUMULATION_SIZE: usize = 100;
const DBM_SHIFT: f32 = 120.0;
const PEAK_PADDING: usize = 0;
const NOISE_WINDOW: usize = 60;

const DEFAULT_PEAK_THRESHOLD: f32 = 15.0;
const DEFAULT_EDGE_WIDTH: usize = 70;
const DEFAULT_LISTENER_POOL_SIZE: usize = 30;

/// How a receiver finds its signals
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiverMode {
    /// A single listener, tuned manually through the VFO offset
    Decode,
    /// Discover peaks periodically and fill the listener pool
    Strain,
}

type Op = Box<dyn FnOnce(&mut ReceiverLoop) + Send>;

/// Creates per-listener tracers when tracing is enabled
pub type TracerFactory = Arc<dyn Fn() -> Box<dyn Tracer> + Send + Sync>;

#[derive(Clone)]
struct Config {
    peak_threshold: f32,
    edge_width: usize,
    silence_timeout: Duration,
    attachment_timeout: Duration,
    signal_debounce: usize,
    center_frequency: f64,
    vfo_offset: f64,
    false_positives: Option<Vec<String>>,
    tracer_factory: Option<TracerFactory>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            peak_threshold: DEFAULT_PEAK_THRESHOLD,
            edge_width: DEFAULT_EDGE_WIDTH,
            silence_timeout: DEFAULT_SILENCE_TIMEOUT,
            attachment_timeout: DEFAULT_ATTACHMENT_TIMEOUT,
            signal_debounce: 1,
            center_frequency: 0.0,
            vfo_offset: 0.0,
            false_positives: None,
            tracer_factory: None,
        }
    }
}

struct Running {
    sample_rate: usize,
    block_size: usize,
    in_tx: Sender<Vec<f32>>,
    op_tx: Sender<Op>,
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

struct State {
    config: Config,
    finders: Finders,
    running: Option<Running>,
}

/// Decodes CW signals from an I/Q sample stream
///
/// The receiver owns all DSP state derived from the stream and runs it on
/// a single loop thread. Transports deliver frames with
/// [`iq_data`](Receiver::iq_data) (or an [`IqInput`] handle);
/// configuration changes are queued onto the loop as closures, so no DSP
/// structure is ever shared between threads.
pub struct Receiver {
    id: String,
    mode: ReceiverMode,
    clock: Arc<dyn Clock>,
    reporters: Arc<ReporterSet>,
    out: ChannelWriter,
    state: Mutex<State>,
}

impl Receiver {
    pub fn new(id: &str, mode: ReceiverMode, clock: Arc<dyn Clock>) -> Self {
        Self::with_output(id, mode, clock, Box::new(std::io::stdout()))
    }

    /// A receiver writing the focused listener's text to `out`
    pub fn with_output(
        id: &str,
        mode: ReceiverMode,
        clock: Arc<dyn Clock>,
        out: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            id: id.to_string(),
            mode,
            clock,
            reporters: Arc::new(ReporterSet::default()),
            out: ChannelWriter::new(out),
            state: Mutex::new(State {
                config: Config::default(),
                finders: Finders::default(),
                running: None,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mode(&self) -> ReceiverMode {
        self.mode
    }

    pub fn add_reporter(&self, reporter: Box<dyn super::Reporter>) {
        self.reporters.add(reporter);
    }

    /// The reference databases handed to every listener
    pub fn set_finders(&self, finders: Finders) {
        self.state.lock().unwrap().finders = finders;
    }

    /// Start the processing loop
    ///
    /// Fixes the sample rate and FFT block size for this run; frames with
    /// other parameters are rejected. Starting a running receiver is a
    /// no-op.
    pub fn start(&self, sample_rate: usize, block_size: usize) {
        let mut state = self.state.lock().unwrap();
        if state.running.is_some() {
            return;
        }

        let (in_tx, in_rx) = bounded(IQ_BUFFER_SIZE);
        let (op_tx, op_rx) = bounded(0);
        let (stop_tx, stop_rx) = bounded(0);

        let params = LoopParams {
            id: self.id.clone(),
            mode: self.mode,
            clock: Arc::clone(&self.clock),
            reporters: Arc::clone(&self.reporters),
            out: self.out.clone(),
            config: state.config.clone(),
            finders: state.finders.clone(),
            sample_rate,
            block_size,
            pool_size: match self.mode {
                ReceiverMode::Decode => 1,
                ReceiverMode::Strain => DEFAULT_LISTENER_POOL_SIZE,
            },
        };
        let handle = std::thread::Builder::new()
            .name(format!("{}-loop", self.id))
            .spawn(move || ReceiverLoop::new(params).run(in_rx, op_rx, stop_rx))
            .expect("spawn receiver loop");

        state.running = Some(Running {
            sample_rate,
            block_size,
            in_tx,
            op_tx,
            stop_tx,
            handle,
        });
    }

    /// Stop the processing loop
    ///
    /// Detaches all listeners, waits for the loop to drain, and closes the
    /// queues. Idempotent; afterwards [`iq_data`](Receiver::iq_data) and
    /// configuration calls are no-ops.
    pub fn stop(&self) {
        let running = {
            let mut state = self.state.lock().unwrap();
            state.running.take()
        };
        let Some(running) = running else {
            return;
        };

        let _ = running.stop_tx.send(());
        let _ = running.handle.join();
    }

    /// Deliver one interleaved I/Q frame
    ///
    /// Never blocks: when the input queue is full the frame is dropped
    /// with a diagnostic.
    pub fn iq_data(&self, sample_rate: usize, data: Vec<f32>) {
        let state = self.state.lock().unwrap();
        let Some(running) = &state.running else {
            return;
        };
        deliver_frame(
            &self.id,
            running.sample_rate,
            running.block_size,
            &running.in_tx,
            sample_rate,
            data,
        );
    }

    /// A cloneable input handle for transport threads
    ///
    /// Only available while the receiver is running; the handle turns into
    /// a no-op after [`stop`](Receiver::stop).
    pub fn iq_input(&self) -> Option<IqInput> {
        let state = self.state.lock().unwrap();
        let running = state.running.as_ref()?;
        Some(IqInput {
            id: self.id.clone(),
            sample_rate: running.sample_rate,
            block_size: running.block_size,
            in_tx: running.in_tx.clone(),
        })
    }

    /// Threshold in dB above the noise floor for peak discovery and
    /// signal detection
    pub fn set_peak_threshold(&self, threshold: f32) {
        self.configure(
            |config| config.peak_threshold = threshold,
            move |l| {
                l.config.peak_threshold = threshold;
                l.pool
                    .for_each_all(|listener| listener.set_signal_threshold(threshold));
            },
        );
    }

    /// Bins to skip at the spectrum edges in the noise floor search
    pub fn set_edge_width(&self, edge_width: usize) {
        self.configure(
            |config| config.edge_width = edge_width,
            move |l| l.config.edge_width = edge_width,
        );
    }

    pub fn set_silence_timeout(&self, timeout: Duration) {
        self.configure(
            |config| config.silence_timeout = timeout,
            move |l| {
                l.config.silence_timeout = timeout;
                l.pool
                    .for_each_all(|listener| listener.set_silence_timeout(timeout));
            },
        );
    }

    pub fn set_attachment_timeout(&self, timeout: Duration) {
        self.configure(
            |config| config.attachment_timeout = timeout,
            move |l| {
                l.config.attachment_timeout = timeout;
                l.pool
                    .for_each_all(|listener| listener.set_attachment_timeout(timeout));
            },
        );
    }

    pub fn set_signal_debounce(&self, debounce: usize) {
        self.configure(
            |config| config.signal_debounce = debounce,
            move |l| {
                l.config.signal_debounce = debounce;
                l.pool
                    .for_each_all(|listener| listener.set_signal_debounce(debounce));
            },
        );
    }

    /// Candidate prefixes that are never reported as callsigns
    pub fn set_false_positives(&self, false_positives: Vec<String>) {
        let for_loop = false_positives.clone();
        self.configure(
            move |config| config.false_positives = Some(false_positives),
            move |l| {
                l.pool.for_each_all(|listener| {
                    listener.set_false_positives(for_loop.clone())
                });
            },
        );
    }

    /// Per-listener tracer instances, applied at the next start
    pub fn set_tracer_factory(&self, factory: TracerFactory) {
        self.state.lock().unwrap().config.tracer_factory = Some(factory);
    }

    pub fn set_center_frequency(&self, frequency: f64) {
        self.configure(
            |config| config.center_frequency = frequency,
            move |l| {
                l.config.center_frequency = frequency;
                l.mapping.set_center_frequency(frequency);
            },
        );
    }

    pub fn center_frequency(&self) -> f64 {
        self.state.lock().unwrap().config.center_frequency
    }

    /// Tune to an offset relative to the center frequency
    ///
    /// In decode mode this binds the single listener to the tuned
    /// frequency; in strain mode it focuses the text output on the
    /// listener covering it.
    pub fn set_vfo_offset(&self, offset: f64) {
        self.configure(
            |config| config.vfo_offset = offset,
            move |l| l.set_vfo_offset(offset),
        );
    }

    // Apply a change to the cached configuration and, when the loop runs,
    // queue the live part onto it. The queue send happens outside the
    // state lock.
    fn configure(
        &self,
        apply: impl FnOnce(&mut Config),
        live: impl FnOnce(&mut ReceiverLoop) + Send + 'static,
    ) {
        let op_tx = {
            let mut state = self.state.lock().unwrap();
            apply(&mut state.config);
            state.running.as_ref().map(|running| running.op_tx.clone())
        };

        if let Some(op_tx) = op_tx {
            let _ = op_tx.send(Box::new(live));
        }
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Input handle for pushing I/Q frames from a transport thread
#[derive(Clone)]
pub struct IqInput {
    id: String,
    sample_rate: usize,
    block_size: usize,
    in_tx: Sender<Vec<f32>>,
}

impl IqInput {
    pub fn send(&self, sample_rate: usize, data: Vec<f32>) {
        deliver_frame(
            &self.id,
            self.sample_rate,
            self.block_size,
            &self.in_tx,
            sample_rate,
            data,
        );
    }
}

fn deliver_frame(
    id: &str,
    expected_rate: usize,
    expected_block_size: usize,
    in_tx: &Sender<Vec<f32>>,
    sample_rate: usize,
    data: Vec<f32>,
) {
    if sample_rate != expected_rate {
        warn!(
            "wrong incoming sample rate on receiver {}: {} instead of {}",
            id, sample_rate, expected_rate
        );
        return;
    }
    if data.len() / 2 != expected_block_size {
        warn!(
            "wrong incoming block size on receiver {}: {} instead of {}",
            id,
            data.len() / 2,
            expected_block_size
        );
        return;
    }

    match in_tx.try_send(data) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => info!("IQ data skipped on receiver {}", id),
        Err(TrySendError::Disconnected(_)) => {}
    }
}

struct LoopParams {
    id: String,
    mode: ReceiverMode,
    clock: Arc<dyn Clock>,
    reporters: Arc<ReporterSet>,
    out: ChannelWriter,
    config: Config,
    finders: Finders,
    sample_rate: usize,
    block_size: usize,
    pool_size: usize,
}

// All DSP state of one receiver; lives on the loop thread.
struct ReceiverLoop {
    mode: ReceiverMode,
    out: ChannelWriter,
    config: Config,

    block_size: usize,
    fft: Fft,
    mapping: FrequencyMapping,
    peaks: PeaksTable,
    pool: ListenerPool,

    noise_floor_mean: RollingMean,
    noise_deviation_mean: RollingMean,

    spectrum: Vec<f32>,
    psd: Vec<f32>,
    cumulation: Vec<f32>,
    cumulation_count: usize,
    found_peaks: Vec<Peak>,
    detached: Vec<String>,
}

impl ReceiverLoop {
    fn new(params: LoopParams) -> Self {
        let LoopParams {
            id,
            mode,
            clock,
            reporters,
            out,
            config,
            finders,
            sample_rate,
            block_size,
            pool_size,
        } = params;

        let pool = ListenerPool::new(pool_size, &id, |listener_id| {
            let mut listener = Listener::new(
                listener_id,
                out.channel(listener_id),
                Arc::clone(&clock),
                Arc::clone(&reporters),
                finders.clone(),
                sample_rate,
                block_size,
            );
            listener.set_silence_timeout(config.silence_timeout);
            listener.set_attachment_timeout(config.attachment_timeout);
            listener.set_signal_debounce(config.signal_debounce);
            listener.set_signal_threshold(config.peak_threshold);
            if let Some(false_positives) = &config.false_positives {
                listener.set_false_positives(false_positives.clone());
            }
            if let Some(factory) = &config.tracer_factory {
                listener.set_tracer(factory());
            }
            listener
        });

        Self {
            mode,
            out,
            mapping: FrequencyMapping::new(sample_rate, block_size, config.center_frequency),
            peaks: PeaksTable::new(block_size, clock),
            pool,
            config,
            block_size,
            fft: Fft::new(),
            noise_floor_mean: RollingMean::new(NOISE_WINDOW),
            noise_deviation_mean: RollingMean::new(NOISE_WINDOW),
            spectrum: vec![0.0; block_size],
            psd: vec![0.0; block_size],
            cumulation: vec![0.0; block_size],
            cumulation_count: 0,
            found_peaks: Vec::with_capacity(block_size),
            detached: Vec::new(),
        }
    }

    fn run(
        mut self,
        in_rx: ChannelReceiver<Vec<f32>>,
        op_rx: ChannelReceiver<Op>,
        stop_rx: ChannelReceiver<()>,
    ) {
        let cleanup_tick = tick(Duration::from_secs(1));

        loop {
            // configuration submitted before a frame applies before it
            if let Ok(op) = op_rx.try_recv() {
                op(&mut self);
                continue;
            }

            crossbeam_channel::select! {
                recv(stop_rx) -> _ => break,
                recv(op_rx) -> op => match op {
                    Ok(op) => op(&mut self),
                    Err(_) => break,
                },
                recv(cleanup_tick) -> _ => self.cleanup(),
                recv(in_rx) -> frame => match frame {
                    Ok(frame) => self.process_frame(&frame),
                    Err(_) => break,
                },
            }
        }

        self.pool.reset();
    }

    fn cleanup(&mut self) {
        self.pool.for_each(|listener| listener.check_write_timeout());
        self.peaks.cleanup();
    }

    fn process_frame(&mut self, frame: &[f32]) {
        if frame.is_empty() {
            return;
        }
        if frame.len() / 2 != self.block_size {
            warn!(
                "dropping frame with wrong block size: {} instead of {}",
                frame.len() / 2,
                self.block_size
            );
            return;
        }

        self.fft.iq_to_spectrum_and_psd(
            &mut self.spectrum,
            &mut self.psd,
            frame,
            |value, block_size| magnitude_in_db(value, block_size) + DBM_SHIFT,
        );

        let (psd_floor, noise_variance) = find_noise_floor(&self.psd, self.config.edge_width);
        let noise_deviation = self.noise_deviation_mean.put(
            (psd_value_in_db(noise_variance.sqrt(), self.block_size) + DBM_SHIFT) * 0.25,
        );
        let noise_floor = self
            .noise_floor_mean
            .put(psd_value_in_db(psd_floor, self.block_size) + DBM_SHIFT);
        let peak_threshold = self.config.peak_threshold + noise_floor;

        self.listen_all(noise_floor + noise_deviation);

        for (cumulated, value) in self.cumulation.iter_mut().zip(self.spectrum.iter()) {
            *cumulated += value;
        }
        self.cumulation_count += 1;

        if self.cumulation_count == CUMULATION_SIZE {
            if self.mode == ReceiverMode::Strain && self.pool.available() {
                self.discover_peaks(peak_threshold);
                self.bind_next_peak();
            }

            self.cumulation.fill(0.0);
            self.cumulation_count = 0;
        }
    }

    // Feed every attached listener the magnitude at its signal bin; in
    // strain mode, expire listeners that have timed out.
    fn listen_all(&mut self, noise_floor: f32) {
        let mode = self.mode;
        let spectrum = &self.spectrum;
        let peaks = &mut self.peaks;
        let detached = &mut self.detached;
        detached.clear();

        self.pool.for_each(|listener| {
            let Some(peak) = listener.peak().cloned() else {
                return;
            };

            let signal_value = spectrum[peak.signal_bin];
            listener.listen(signal_value, noise_floor);

            if mode == ReceiverMode::Strain && listener.timeout_exceeded() {
                peaks.deactivate(&peak);
                listener.detach();
                detached.push(listener.id().to_string());
            }
        });

        let detached = std::mem::take(&mut self.detached);
        self.pool.release(&detached);
        self.detached = detached;
    }

    // Run the peak search over the averaged spectrum and register every
    // find as a centered peak.
    fn discover_peaks(&mut self, peak_threshold: f32) {
        find_peaks(
            &mut self.found_peaks,
            &self.cumulation,
            CUMULATION_SIZE,
            peak_threshold,
            &self.mapping,
        );

        for found in &self.found_peaks {
            let centered = peak_centered_on_signal(&self.mapping, self.block_size, found);
            self.peaks.put(&centered);
        }
    }

    fn bind_next_peak(&mut self) {
        let Some(selected) = self.peaks.find_next() else {
            return;
        };
        let Some(listener) = self.pool.bind_next() else {
            return;
        };
        self.peaks.activate(&selected);
        listener.attach(&selected);
    }

    fn set_vfo_offset(&mut self, offset: f64) {
        self.config.vfo_offset = offset;
        let frequency = self.config.vfo_offset + self.config.center_frequency;

        match self.mode {
            ReceiverMode::Decode => {
                if !self.pool.available() {
                    self.pool.reset();
                }
                let Some(listener) = self.pool.bind_next() else {
                    warn!("cannot bind listener to VFO");
                    return;
                };

                let mut peak =
                    peak_centered_on_frequency(&self.mapping, self.block_size, frequency);
                peak.signal_value = 80.0;
                self.peaks.force_put(&peak);
                self.peaks.activate(&peak);
                listener.attach(&peak);
                let id = listener.id().to_string();
                self.out.set_active(&id);
            }
            ReceiverMode::Strain => {
                let bin = self.mapping.frequency_to_bin(frequency);
                let out = &self.out;
                let mut found = false;
                out.set_active("");
                self.pool.for_each(|listener| {
                    if listener.peak().map_or(false, |p| p.contains_bin(bin)) {
                        out.set_active(listener.id());
                        found = true;
                    }
                });
                if found {
                    let mut direct = self.out.clone();
                    let _ = writeln!(direct);
                }
            }
        }
    }
}

fn peak_centered_on_bin(
    mapping: &FrequencyMapping,
    block_size: usize,
    center_bin: usize,
) -> Peak {
    let from_bin = center_bin.saturating_sub(PEAK_PADDING);
    let to_bin = usize::min(center_bin + PEAK_PADDING, block_size - 1);
    let mut peak = Peak {
        from_bin,
        to_bin,
        from_frequency: mapping.bin_to_frequency(from_bin, BinLocation::From),
        to_frequency: mapping.bin_to_frequency(to_bin, BinLocation::To),
        ..Peak::default()
    };
    peak.signal_frequency = peak.center_frequency();
    peak
}

fn peak_centered_on_signal(
    mapping: &FrequencyMapping,
    block_size: usize,
    found: &Peak,
) -> Peak {
    let mut peak = peak_centered_on_bin(mapping, block_size, found.signal_bin);
    peak.signal_bin = found.signal_bin;
    peak.signal_frequency = found.signal_frequency;
    peak.signal_value = found.signal_value;
    peak
}

fn peak_centered_on_frequency(
    mapping: &FrequencyMapping,
    block_size: usize,
    frequency: f64,
) -> Peak {
    let bin = mapping.frequency_to_bin(frequency);
    let mut peak = peak_centered_on_bin(mapping, block_size, bin);
    peak.signal_bin = bin;
    peak.signal_frequency = frequency;
    peak
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::time::Instant;

    use crate::clock::WallClock;
    use crate::cw::code_entries;
    use crate::rx::test_reporter::RecordingReporter;

    const SAMPLE_RATE: usize = 48_000;
    const BLOCK_SIZE: usize = 512;
    const SIGNAL_BIN: usize = 300;

    fn strain_params(reporter: &RecordingReporter) -> LoopParams {
        let reporters = Arc::new(ReporterSet::default());
        reporters.add(Box::new(reporter.clone()));
        LoopParams {
            id: "rx0".to_string(),
            mode: ReceiverMode::Strain,
            clock: Arc::new(WallClock),
            reporters,
            out: ChannelWriter::new(Box::new(std::io::sink())),
            config: Config::default(),
            finders: Finders::default(),
            sample_rate: SAMPLE_RATE,
            block_size: BLOCK_SIZE,
            pool_size: 3,
        }
    }

    // Morse tick stream for the given text, 1 tick = 1 frame.
    fn morse_states(text: &str, dit_ticks: usize) -> Vec<bool> {
        let codes: HashMap<char, &str> = code_entries().collect();
        let mut states = Vec::new();
        let mut pending_break = false;
        for c in text.chars() {
            if c == ' ' {
                states.extend(std::iter::repeat(false).take(7 * dit_ticks));
                pending_break = false;
                continue;
            }
            if pending_break {
                states.extend(std::iter::repeat(false).take(3 * dit_ticks));
            }
            for (i, symbol) in codes[&c].chars().enumerate() {
                if i > 0 {
                    states.extend(std::iter::repeat(false).take(dit_ticks));
                }
                let len = if symbol == '-' { 3 * dit_ticks } else { dit_ticks };
                states.extend(std::iter::repeat(true).take(len));
            }
            pending_break = true;
        }
        states
    }

    // One I/Q frame with low pseudo-noise and optionally a tone exactly on
    // SIGNAL_BIN.
    fn iq_frame(tone: bool, phase: &mut f64, noise_state: &mut u32) -> Vec<f32> {
        let cycles_per_block = SIGNAL_BIN as f64 - (BLOCK_SIZE / 2) as f64;
        let step = 2.0 * std::f64::consts::PI * cycles_per_block / BLOCK_SIZE as f64;

        let mut frame = Vec::with_capacity(2 * BLOCK_SIZE);
        for _ in 0..BLOCK_SIZE {
            // xorshift noise keeps the noise floor finite
            *noise_state ^= *noise_state << 13;
            *noise_state ^= *noise_state >> 17;
            *noise_state ^= *noise_state << 5;
            let noise = (*noise_state as f64 / u32::MAX as f64 - 0.5) * 2.0e-3;

            let (i, q) = if tone {
                (phase.cos(), phase.sin())
            } else {
                (0.0, 0.0)
            };
            *phase += step;
            frame.push((i + noise) as f32);
            frame.push((q + noise) as f32);
        }
        frame
    }

    fn wait_for_event(reporter: &RecordingReporter, needle: &str) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if reporter.events().iter().any(|e| e.contains(needle)) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_strain_discovers_and_spots() {
        let reporter = RecordingReporter::default();
        let mut rx_loop = ReceiverLoop::new(strain_params(&reporter));

        // carrier lead-in so the first cumulation discovers the peak, then
        // a CQ call with three repetitions of the callsign
        let mut states = vec![true; 150];
        states.extend(std::iter::repeat(false).take(40));
        states.extend(morse_states("cq cq de dl1abc dl1abc dl1abc k", 5));
        states.extend(std::iter::repeat(false).take(60));

        let mut phase = 0.0;
        let mut noise_state = 0x2545_f491;
        for tone in states {
            let frame = iq_frame(tone, &mut phase, &mut noise_state);
            rx_loop.process_frame(&frame);
        }

        assert!(
            wait_for_event(&reporter, "activated rx0-2"),
            "no listener bound: {:?}",
            reporter.events()
        );
        assert!(
            wait_for_event(&reporter, "spotted DL1ABC"),
            "no spot: {:?}",
            reporter.events()
        );
        rx_loop.pool.reset();
    }

    #[test]
    fn test_decode_mode_binds_on_vfo() {
        let reporter = RecordingReporter::default();
        let mut params = strain_params(&reporter);
        params.mode = ReceiverMode::Decode;
        params.pool_size = 1;
        params.config.center_frequency = 7_020_000.0;
        let mut rx_loop = ReceiverLoop::new(params);

        rx_loop.set_vfo_offset(500.0);

        assert!(wait_for_event(&reporter, "activated rx0-0"));
        let peak = rx_loop.pool.first().unwrap().peak().cloned().unwrap();
        assert_eq!(
            peak.signal_bin,
            rx_loop.mapping.frequency_to_bin(7_020_500.0)
        );
        assert_eq!(rx_loop.peaks.get(peak.signal_bin), Some(peak));

        // retuning rebinds the single listener
        rx_loop.set_vfo_offset(-500.0);
        assert!(wait_for_event(&reporter, "deactivated rx0-0"));
        rx_loop.pool.reset();
    }

    #[test]
    fn test_receiver_start_stop() {
        let receiver = Receiver::with_output(
            "rx0",
            ReceiverMode::Strain,
            Arc::new(WallClock),
            Box::new(std::io::sink()),
        );

        assert!(receiver.iq_input().is_none());

        receiver.start(SAMPLE_RATE, BLOCK_SIZE);
        receiver.start(SAMPLE_RATE, BLOCK_SIZE);

        let input = receiver.iq_input().unwrap();
        // wrong sample rate and wrong block size are rejected up front
        input.send(44_100, vec![0.0; 2 * BLOCK_SIZE]);
        input.send(SAMPLE_RATE, vec![0.0; 16]);
        input.send(SAMPLE_RATE, vec![0.0; 2 * BLOCK_SIZE]);

        receiver.set_peak_threshold(20.0);
        receiver.set_center_frequency(7_020_000.0);
        assert_eq!(receiver.center_frequency(), 7_020_000.0);

        receiver.stop();
        receiver.stop();

        // everything is a no-op after stop
        receiver.iq_data(SAMPLE_RATE, vec![0.0; 2 * BLOCK_SIZE]);
        input.send(SAMPLE_RATE, vec![0.0; 2 * BLOCK_SIZE]);
        assert!(receiver.iq_input().is_none());
    }
}
