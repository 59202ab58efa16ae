//! One listener: a demodulator bound to one peak, plus text processing

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::debug;

use crate::call::Finders;
use crate::clock::Clock;
use crate::cw::SpectralDemodulator;
use crate::dsp::Peak;
use crate::trace::Tracer;

use super::text::{CallsignReporter, TextProcessor, TextWriter};
use super::writer::ChannelWriterHandle;
use super::{Reporter, ReporterSet};

pub(crate) const DEFAULT_SILENCE_TIMEOUT: Duration = Duration::from_secs(20);
pub(crate) const DEFAULT_ATTACHMENT_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// A listener slot of the receiver
///
/// Combines a [`SpectralDemodulator`] with a [`TextProcessor`] and the
/// attach/detach lifecycle. Listeners live for the life of the receiver;
/// only their attached peak changes.
pub struct Listener {
    id: String,
    clock: Arc<dyn Clock>,
    reporters: Arc<ReporterSet>,
    bridge: Arc<CallsignBridge>,

    demodulator: SpectralDemodulator<TextWriter>,
    text_processor: TextProcessor,
    last_attach: Instant,

    silence_timeout: Duration,
    attachment_timeout: Duration,
}

impl Listener {
    pub(crate) fn new(
        id: &str,
        out: ChannelWriterHandle,
        clock: Arc<dyn Clock>,
        reporters: Arc<ReporterSet>,
        finders: Finders,
        sample_rate: usize,
        block_size: usize,
    ) -> Self {
        let bridge = Arc::new(CallsignBridge {
            id: id.to_string(),
            frequency: Mutex::new(0.0),
            reporters: Arc::clone(&reporters),
        });

        let mut text_processor = TextProcessor::new(
            Box::new(out),
            Arc::clone(&clock),
            Arc::clone(&bridge) as Arc<dyn CallsignReporter>,
        );
        text_processor.set_finders(finders);

        let demodulator =
            SpectralDemodulator::new(text_processor.writer(), sample_rate, block_size);

        let last_attach = clock.now();
        Self {
            id: id.to_string(),
            clock,
            reporters,
            bridge,
            demodulator,
            text_processor,
            last_attach,
            silence_timeout: DEFAULT_SILENCE_TIMEOUT,
            attachment_timeout: DEFAULT_ATTACHMENT_TIMEOUT,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Time of silence after which the listener gives its slot back
    pub fn set_silence_timeout(&mut self, timeout: Duration) {
        self.silence_timeout = timeout;
    }

    /// Maximum time a listener stays bound to the same peak
    pub fn set_attachment_timeout(&mut self, timeout: Duration) {
        self.attachment_timeout = timeout;
    }

    pub fn set_signal_threshold(&mut self, threshold: f32) {
        self.demodulator.set_signal_threshold(threshold);
    }

    pub fn set_signal_debounce(&mut self, debounce: usize) {
        self.demodulator.set_signal_debounce(debounce);
    }

    pub fn set_tracer(&mut self, tracer: Box<dyn Tracer>) {
        self.demodulator.set_tracer(tracer);
    }

    pub fn set_false_positives(&mut self, false_positives: Vec<String>) {
        self.text_processor.set_false_positives(false_positives);
    }

    /// Bind this listener to a peak and start decoding
    pub fn attach(&mut self, peak: &Peak) {
        self.demodulator.attach(peak);
        self.last_attach = self.clock.now();
        *self.bridge.frequency.lock().unwrap() = peak.signal_frequency;
        self.text_processor.restart();
        self.reporters
            .listener_activated(&self.id, peak.signal_frequency);
    }

    pub fn attached(&self) -> bool {
        self.demodulator.attached()
    }

    /// Release the peak and stop the text processor
    pub fn detach(&mut self) {
        let frequency = *self.bridge.frequency.lock().unwrap();
        self.demodulator.detach();
        self.text_processor.stop();
        self.reporters.listener_deactivated(&self.id, frequency);
    }

    pub fn peak(&self) -> Option<&Peak> {
        self.demodulator.peak()
    }

    /// Process the spectrum magnitude at this listener's signal bin
    pub fn listen(&mut self, value: f32, noise_floor: f32) {
        if !self.attached() {
            return;
        }
        self.demodulator.tick(value, noise_floor);
    }

    /// True when the listener should give up its peak
    ///
    /// Either the attachment has lasted longer than the attachment
    /// timeout (a busy frequency hogs the slot), or nothing has been
    /// decoded for longer than the silence timeout.
    pub fn timeout_exceeded(&self) -> bool {
        let now = self.clock.now();
        let attachment_exceeded =
            now.duration_since(self.last_attach) > self.attachment_timeout;
        let silence_exceeded =
            now.duration_since(self.text_processor.last_write()) > self.silence_timeout;
        if attachment_exceeded || silence_exceeded {
            debug!(
                "listener {} timeout, attachment: {} silence: {}",
                self.id, attachment_exceeded, silence_exceeded
            );
        }
        attachment_exceeded || silence_exceeded
    }

    pub fn check_write_timeout(&self) {
        self.text_processor.check_write_timeout();
    }
}

// Adds the listener's identity and frequency to the text processor's
// callsign events and forwards them to the receiver's reporters.
struct CallsignBridge {
    id: String,
    frequency: Mutex<f64>,
    reporters: Arc<ReporterSet>,
}

impl CallsignBridge {
    fn frequency(&self) -> f64 {
        *self.frequency.lock().unwrap()
    }
}

impl CallsignReporter for CallsignBridge {
    fn callsign_decoded(&self, callsign: &str, count: usize, weight: i64) {
        self.reporters
            .callsign_decoded(&self.id, callsign, self.frequency(), count, weight);
    }

    fn callsign_spotted(&self, callsign: &str) {
        self.reporters
            .callsign_spotted(&self.id, callsign, self.frequency());
    }

    fn spot_timeout(&self, callsign: &str) {
        self.reporters
            .spot_timeout(&self.id, callsign, self.frequency());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::clock::ManualClock;
    use crate::rx::test_reporter::RecordingReporter;
    use crate::rx::writer::ChannelWriter;

    fn test_peak() -> Peak {
        Peak {
            from_bin: 100,
            to_bin: 102,
            signal_bin: 101,
            signal_frequency: 7_012_000.0,
            ..Peak::default()
        }
    }

    fn listener(clock: Arc<ManualClock>) -> (Listener, RecordingReporter) {
        let reporter = RecordingReporter::default();
        let reporters = Arc::new(ReporterSet::default());
        reporters.add(Box::new(reporter.clone()));
        let out = ChannelWriter::new(Box::new(std::io::sink()));
        let listener = Listener::new(
            "rx-1",
            out.channel("rx-1"),
            clock,
            reporters,
            Finders::default(),
            48_000,
            512,
        );
        (listener, reporter)
    }

    #[test]
    fn test_attach_detach_reports() {
        let clock = Arc::new(ManualClock::new());
        let (mut listener, reporter) = listener(clock);

        assert!(!listener.attached());
        listener.attach(&test_peak());
        assert!(listener.attached());
        assert_eq!(listener.peak().unwrap().signal_bin, 101);

        listener.detach();
        assert!(!listener.attached());

        assert_eq!(
            reporter.events(),
            vec![
                "activated rx-1 7012000".to_string(),
                "deactivated rx-1 7012000".to_string(),
            ]
        );
    }

    #[test]
    fn test_silence_timeout() {
        let clock = Arc::new(ManualClock::new());
        let (mut listener, _reporter) = listener(clock.clone());

        listener.attach(&test_peak());
        assert!(!listener.timeout_exceeded());

        clock.add(DEFAULT_SILENCE_TIMEOUT + Duration::from_secs(1));
        assert!(listener.timeout_exceeded());
        listener.detach();
    }

    #[test]
    fn test_attachment_timeout() {
        let clock = Arc::new(ManualClock::new());
        let (mut listener, _reporter) = listener(clock.clone());
        listener.set_silence_timeout(Duration::from_secs(100 * 60));

        listener.attach(&test_peak());
        clock.add(Duration::from_secs(60));
        assert!(!listener.timeout_exceeded());

        clock.add(DEFAULT_ATTACHMENT_TIMEOUT);
        assert!(listener.timeout_exceeded());
        listener.detach();
    }

    #[test]
    fn test_listen_requires_attachment() {
        let clock = Arc::new(ManualClock::new());
        let (mut listener, _reporter) = listener(clock);

        // no peak attached, the sample is dropped
        listener.listen(100.0, 10.0);
        assert!(!listener.attached());
    }
}
