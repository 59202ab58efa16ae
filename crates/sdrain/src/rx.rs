//! The receiver: scheduling, listeners, and text post-processing
//!
//! A [`Receiver`] owns everything derived from the I/Q stream: the FFT
//! workspace, the frequency mapping, the [`PeaksTable`] of discovered
//! signals, and the [`ListenerPool`]. All DSP state lives on a single loop
//! thread; transports and configuration calls communicate with it through
//! bounded queues.
//!
//! Interesting events — listeners coming and going, callsigns heard and
//! spotted — are published through the [`Reporter`] trait.

mod listener;
mod peaks;
mod pool;
mod receiver;
mod text;
mod window;
mod writer;

use std::io::Write;
use std::sync::Mutex;

pub use self::listener::Listener;
pub use self::peaks::PeaksTable;
pub use self::pool::ListenerPool;
pub use self::receiver::{IqInput, Receiver, ReceiverMode, TracerFactory};
pub use self::text::{CallsignReporter, CollectedCallsign, TextProcessor, TextWriter};
pub use self::window::TextWindow;
pub use self::writer::{ChannelWriter, ChannelWriterHandle};

/// Receives the notable events of a receiver
///
/// Implementations must be callable from the receiver loop thread and from
/// the text-processor threads.
pub trait Reporter: Send + Sync {
    fn listener_activated(&self, listener: &str, frequency: f64);
    fn listener_deactivated(&self, listener: &str, frequency: f64);
    fn callsign_decoded(
        &self,
        listener: &str,
        callsign: &str,
        frequency: f64,
        count: usize,
        weight: i64,
    );
    fn callsign_spotted(&self, listener: &str, callsign: &str, frequency: f64);
    fn spot_timeout(&self, listener: &str, callsign: &str, frequency: f64);
}

/// Fans events out to any number of reporters
#[derive(Default)]
pub(crate) struct ReporterSet {
    reporters: Mutex<Vec<Box<dyn Reporter>>>,
}

impl ReporterSet {
    pub fn add(&self, reporter: Box<dyn Reporter>) {
        self.reporters.lock().unwrap().push(reporter);
    }

    fn each(&self, f: impl Fn(&dyn Reporter)) {
        for reporter in self.reporters.lock().unwrap().iter() {
            f(reporter.as_ref());
        }
    }
}

impl Reporter for ReporterSet {
    fn listener_activated(&self, listener: &str, frequency: f64) {
        self.each(|r| r.listener_activated(listener, frequency));
    }

    fn listener_deactivated(&self, listener: &str, frequency: f64) {
        self.each(|r| r.listener_deactivated(listener, frequency));
    }

    fn callsign_decoded(
        &self,
        listener: &str,
        callsign: &str,
        frequency: f64,
        count: usize,
        weight: i64,
    ) {
        self.each(|r| r.callsign_decoded(listener, callsign, frequency, count, weight));
    }

    fn callsign_spotted(&self, listener: &str, callsign: &str, frequency: f64) {
        self.each(|r| r.callsign_spotted(listener, callsign, frequency));
    }

    fn spot_timeout(&self, listener: &str, callsign: &str, frequency: f64) {
        self.each(|r| r.spot_timeout(listener, callsign, frequency));
    }
}

/// Writes one human-readable line per event
pub struct TextReporter {
    out: Mutex<Box<dyn Write + Send>>,
}

impl TextReporter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn stdout() -> Box<Self> {
        Box::new(Self::new(Box::new(std::io::stdout())))
    }

    fn report(&self, line: std::fmt::Arguments) {
        let mut out = self.out.lock().unwrap();
        let _ = out.write_fmt(line);
    }
}

impl Reporter for TextReporter {
    fn listener_activated(&self, listener: &str, frequency: f64) {
        self.report(format_args!(
            "listener {} activated on {:.2}kHz\n",
            listener,
            frequency / 1000.0
        ));
    }

    fn listener_deactivated(&self, listener: &str, frequency: f64) {
        self.report(format_args!(
            "listener {} deactivated on {:.2}kHz\n",
            listener,
            frequency / 1000.0
        ));
    }

    fn callsign_decoded(
        &self,
        _listener: &str,
        callsign: &str,
        frequency: f64,
        count: usize,
        weight: i64,
    ) {
        self.report(format_args!(
            "callsign {} heard {} times on {:.2}kHz, weight is {}\n",
            callsign,
            count,
            frequency / 1000.0,
            weight
        ));
    }

    fn callsign_spotted(&self, _listener: &str, callsign: &str, frequency: f64) {
        self.report(format_args!(
            "callsign {} spotted on {:.2}kHz\n",
            callsign,
            frequency / 1000.0
        ));
    }

    fn spot_timeout(&self, _listener: &str, callsign: &str, frequency: f64) {
        self.report(format_args!(
            "spot of {} on {:.2}kHz timed out\n",
            callsign,
            frequency / 1000.0
        ));
    }
}

#[cfg(test)]
pub(crate) mod test_reporter {
    use super::Reporter;
    use std::sync::{Arc, Mutex};

    /// Records every reporter event as a line, for assertions
    #[derive(Clone, Default)]
    pub struct RecordingReporter {
        pub events: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingReporter {
        pub fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn record(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl Reporter for RecordingReporter {
        fn listener_activated(&self, listener: &str, frequency: f64) {
            self.record(format!("activated {} {:.0}", listener, frequency));
        }

        fn listener_deactivated(&self, listener: &str, frequency: f64) {
            self.record(format!("deactivated {} {:.0}", listener, frequency));
        }

        fn callsign_decoded(
            &self,
            _listener: &str,
            callsign: &str,
            _frequency: f64,
            count: usize,
            weight: i64,
        ) {
            self.record(format!("decoded {} {} {}", callsign, count, weight));
        }

        fn callsign_spotted(&self, _listener: &str, callsign: &str, _frequency: f64) {
            self.record(format!("spotted {}", callsign));
        }

        fn spot_timeout(&self, _listener: &str, callsign: &str, _frequency: f64) {
            self.record(format!("timeout {}", callsign));
        }
    }
}
