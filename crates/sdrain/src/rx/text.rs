//! Text post-processing: callsign extraction and spotting
//!
//! Decoded text is noisy — the text processor scans a rolling window of the
//! most recent characters for things that look like callsigns, validates
//! them against the DXCC prefixes, counts repetitions, and fires a spot
//! once a candidate is convincing enough. Scanning runs on its own thread
//! so the demodulator's write path never waits on a regex.

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use lazy_static::lazy_static;
use regex::bytes::Regex;

use crate::call::{Callsign, Finders};
use crate::clock::Clock;

use super::window::TextWindow;

const DEFAULT_TEXT_WINDOW_SIZE: usize = 20;
const OP_QUEUE_SIZE: usize = 10;

// weighted count required before a candidate is spotted
const SPOTTING_THRESHOLD: i64 = 3;

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_FALSE_POSITIVES: &[&str] = &["tu5nn"];

lazy_static! {
    static ref CALLSIGN_EXP: Regex = Regex::new(
        r"\s(?:([a-z0-9]+)/)?(([a-z]|[a-z][a-z]|[0-9][a-z]|[0-9][a-z][a-z])[0-9][a-z0-9]*[a-z])(?:/([a-z0-9]+))?(?:/(p|a|m|mm|am))?"
    )
    .expect("valid callsign expression");
}

/// Receives the callsign events of one text processor
pub trait CallsignReporter: Send + Sync {
    fn callsign_decoded(&self, callsign: &str, count: usize, weight: i64);
    fn callsign_spotted(&self, callsign: &str);
    fn spot_timeout(&self, callsign: &str);
}

/// A callsign seen in the text, with its repetition count and weight
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectedCallsign {
    pub callsign: String,
    pub weight: i64,
    pub count: usize,
}

enum Msg {
    Bytes(Vec<u8>),
    WriteTimeout,
    Collected(Sender<Vec<CollectedCallsign>>),
    #[cfg(test)]
    Sync(Sender<()>),
}

/// Collects candidate callsigns from a stream of decoded text
///
/// Bytes written through [`writer`](TextProcessor::writer) are passed
/// through to the configured output and copied to the scanning thread via
/// a small bounded queue.
pub struct TextProcessor {
    clock: Arc<dyn Clock>,
    reporter: Arc<dyn CallsignReporter>,
    finders: Finders,
    false_positives: Arc<Vec<String>>,
    write_timeout: Duration,

    last_write: Arc<Mutex<Instant>>,
    op_tx: Arc<Mutex<Option<Sender<Msg>>>>,
    out: Arc<Mutex<Box<dyn Write + Send>>>,
    handle: Option<JoinHandle<()>>,
}

impl TextProcessor {
    pub fn new(
        out: Box<dyn Write + Send>,
        clock: Arc<dyn Clock>,
        reporter: Arc<dyn CallsignReporter>,
    ) -> Self {
        let last_write = clock.now();
        Self {
            clock,
            reporter,
            finders: Finders::default(),
            false_positives: Arc::new(
                DEFAULT_FALSE_POSITIVES.iter().map(|s| s.to_string()).collect(),
            ),
            write_timeout: DEFAULT_WRITE_TIMEOUT,

            last_write: Arc::new(Mutex::new(last_write)),
            op_tx: Arc::new(Mutex::new(None)),
            out: Arc::new(Mutex::new(out)),
            handle: None,
        }
    }

    /// The reference databases used for validation and weighting
    pub fn set_finders(&mut self, finders: Finders) {
        self.finders = finders;
    }

    /// Candidate prefixes that are always rejected (e.g. "tu5nn")
    pub fn set_false_positives(&mut self, false_positives: Vec<String>) {
        self.false_positives = Arc::new(false_positives);
    }

    /// The write end feeding this processor
    ///
    /// The writer stays valid across [`restart`](TextProcessor::restart);
    /// writes while the processor is stopped only pass through.
    pub fn writer(&self) -> TextWriter {
        TextWriter {
            clock: Arc::clone(&self.clock),
            last_write: Arc::clone(&self.last_write),
            op_tx: Arc::clone(&self.op_tx),
            out: Arc::clone(&self.out),
        }
    }

    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }

        let (tx, rx) = bounded(OP_QUEUE_SIZE);
        *self.op_tx.lock().unwrap() = Some(tx);

        let mut worker = Worker {
            window: TextWindow::new(DEFAULT_TEXT_WINDOW_SIZE),
            collected: HashMap::new(),
            last_best_match: None,
            reporter: Arc::clone(&self.reporter),
            finders: self.finders.clone(),
            false_positives: Arc::clone(&self.false_positives),
        };
        self.handle = Some(std::thread::spawn(move || worker.run(rx)));
    }

    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        // dropping the sender lets the worker drain its queue and exit
        *self.op_tx.lock().unwrap() = None;
        let _ = handle.join();
    }

    /// Stop and start over with cleared state
    pub fn restart(&mut self) {
        self.stop();
        *self.last_write.lock().unwrap() = self.clock.now();
        self.start();
    }

    pub fn last_write(&self) -> Instant {
        *self.last_write.lock().unwrap()
    }

    /// Trigger a tail-inclusive scan if no text arrived for a while
    ///
    /// Called periodically so a dangling candidate at the end of a
    /// transmission is not lost.
    pub fn check_write_timeout(&self) {
        let now = self.clock.now();
        if now.duration_since(self.last_write()) > self.write_timeout {
            self.send(Msg::WriteTimeout);
        }
    }

    /// Snapshot of the collected callsigns
    pub fn collected(&self) -> Vec<CollectedCallsign> {
        let (tx, rx) = bounded(1);
        self.send(Msg::Collected(tx));
        rx.recv().unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn sync(&self) {
        let (tx, rx) = bounded(1);
        self.send(Msg::Sync(tx));
        let _ = rx.recv();
    }

    fn send(&self, msg: Msg) {
        if let Some(tx) = self.op_tx.lock().unwrap().as_ref() {
            let _ = tx.send(msg);
        }
    }
}

impl Drop for TextProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Write end of a [`TextProcessor`]
#[derive(Clone)]
pub struct TextWriter {
    clock: Arc<dyn Clock>,
    last_write: Arc<Mutex<Instant>>,
    op_tx: Arc<Mutex<Option<Sender<Msg>>>>,
    out: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl Write for TextWriter {
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
        *self.last_write.lock().unwrap() = self.clock.now();

        if let Some(tx) = self.op_tx.lock().unwrap().as_ref() {
            let _ = tx.send(Msg::Bytes(bytes.to_vec()));
        }

        self.out.lock().unwrap().write_all(bytes)?;
        Ok(bytes.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.out.lock().unwrap().flush()
    }
}

struct Worker {
    window: TextWindow,
    collected: HashMap<String, CollectedCallsign>,
    last_best_match: Option<String>,
    reporter: Arc<dyn CallsignReporter>,
    finders: Finders,
    false_positives: Arc<Vec<String>>,
}

impl Worker {
    fn run(&mut self, rx: Receiver<Msg>) {
        while let Ok(msg) = rx.recv() {
            match msg {
                Msg::Bytes(bytes) => self.find_next_callsign(&bytes),
                Msg::WriteTimeout => self.write_timeout(),
                Msg::Collected(tx) => {
                    let _ = tx.send(self.collected.values().cloned().collect());
                }
                #[cfg(test)]
                Msg::Sync(tx) => {
                    let _ = tx.send(());
                }
            }
        }
    }

    fn find_next_callsign(&mut self, bytes: &[u8]) {
        let mut rest = bytes;
        while !rest.is_empty() {
            let n = self
                .window
                .write(rest)
                .expect("the window was shifted before writing");

            if let Some(candidate) = self.window.find_next(&CALLSIGN_EXP, false) {
                self.collect_callsign(&candidate);
            }

            rest = &rest[n..];
            if self.window.is_full() {
                self.window.shift();
            }
        }
    }

    fn write_timeout(&mut self) {
        if let Some(candidate) = self.window.find_next(&CALLSIGN_EXP, true) {
            self.collect_callsign(&candidate);
        }
    }

    fn collect_callsign(&mut self, candidate: &str) {
        let candidate = candidate.trim().to_lowercase();
        if self.is_false_positive(&candidate) {
            return;
        }

        let Ok(call) = Callsign::parse(&candidate) else {
            return;
        };
        if !self.is_valid_dxcc(&call) {
            return;
        }

        let key = call.to_string();
        if !self.collected.contains_key(&key) {
            let weight = self.callsign_weight(&key);
            self.collected.insert(
                key.clone(),
                CollectedCallsign {
                    callsign: key.clone(),
                    weight,
                    count: 0,
                },
            );
        }
        let collected = self.collected.get_mut(&key).expect("just inserted");
        collected.count += 1;
        let (count, weight) = (collected.count, collected.weight);
        self.reporter.callsign_decoded(&key, count, weight);

        let Some(best_match) = self.best_match() else {
            return;
        };

        if let Some(last) = &self.last_best_match {
            if last != &best_match {
                self.reporter.spot_timeout(last);
            }
        }
        self.reporter.callsign_spotted(&best_match);
        self.last_best_match = Some(best_match);
    }

    fn is_false_positive(&self, candidate: &str) -> bool {
        self.false_positives
            .iter()
            .any(|prefix| candidate.starts_with(prefix))
    }

    fn is_valid_dxcc(&self, call: &Callsign) -> bool {
        match &self.finders.dxcc {
            Some(dxcc) => dxcc.find(&call.to_string()),
            None => true,
        }
    }

    fn best_match(&self) -> Option<String> {
        let mut best = None;
        let mut max_count = SPOTTING_THRESHOLD - 1;

        for collected in self.collected.values() {
            let weighted_count = collected.count as i64 + collected.weight;
            if weighted_count > max_count {
                max_count = weighted_count;
                best = Some(collected.callsign.clone());
            }
        }

        best
    }

    fn callsign_weight(&self, callsign: &str) -> i64 {
        let Some(scp) = &self.finders.scp else {
            return 0;
        };
        let matches = scp.find_strings(callsign);
        match matches.first() {
            Some(first) if first == callsign => 1,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::call::{CallsignSet, PrefixList};
    use crate::clock::{ManualClock, WallClock};

    #[derive(Default)]
    struct RecordingCallsignReporter {
        events: Mutex<Vec<String>>,
    }

    impl RecordingCallsignReporter {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl CallsignReporter for RecordingCallsignReporter {
        fn callsign_decoded(&self, callsign: &str, count: usize, weight: i64) {
            self.events
                .lock()
                .unwrap()
                .push(format!("decoded {} {} {}", callsign, count, weight));
        }

        fn callsign_spotted(&self, callsign: &str) {
            self.events.lock().unwrap().push(format!("spotted {}", callsign));
        }

        fn spot_timeout(&self, callsign: &str) {
            self.events.lock().unwrap().push(format!("timeout {}", callsign));
        }
    }

    fn processor(
        clock: Arc<dyn Clock>,
        reporter: Arc<RecordingCallsignReporter>,
    ) -> TextProcessor {
        TextProcessor::new(Box::new(std::io::sink()), clock, reporter)
    }

    fn write_byte_by_byte(p: &TextProcessor, text: &str) {
        let mut writer = p.writer();
        for b in text.bytes() {
            writer.write_all(&[b]).unwrap();
        }
    }

    fn count_of(p: &TextProcessor, callsign: &str) -> usize {
        p.collected()
            .iter()
            .find(|c| c.callsign == callsign)
            .map(|c| c.count)
            .unwrap_or(0)
    }

    #[test]
    fn test_collect_callsign() {
        let reporter = Arc::new(RecordingCallsignReporter::default());
        let mut p = processor(Arc::new(WallClock), reporter);
        p.start();

        write_byte_by_byte(&p, "cq cq cq de dl1abc dl1abc dl1abc pse k");
        p.sync();

        assert_eq!(count_of(&p, "DL1ABC"), 3);
        p.stop();
    }

    #[test]
    fn test_write_timeout() {
        let clock = Arc::new(ManualClock::new());
        let reporter = Arc::new(RecordingCallsignReporter::default());
        let mut p = processor(clock.clone(), reporter);
        p.start();

        // without trailing whitespace the candidate might still be
        // incomplete and is not collected
        write_byte_by_byte(&p, "cq de dl1abc");
        p.sync();
        assert_eq!(count_of(&p, "DL1ABC"), 0);

        clock.add(Duration::from_secs(6));
        p.check_write_timeout();
        p.sync();
        assert_eq!(count_of(&p, "DL1ABC"), 1);
        p.stop();
    }

    #[test]
    fn test_spotting_and_timeout() {
        let reporter = Arc::new(RecordingCallsignReporter::default());
        let mut p = processor(Arc::new(WallClock), reporter.clone());
        p.start();

        write_byte_by_byte(&p, " dl1abc dl1abc dl1abc ");
        p.sync();
        assert!(reporter.events().contains(&"spotted DL1ABC".to_string()));

        // a stronger candidate takes over, the old spot times out
        write_byte_by_byte(&p, " dl2xyz dl2xyz dl2xyz dl2xyz ");
        p.sync();
        let events = reporter.events();
        assert!(events.contains(&"timeout DL1ABC".to_string()));
        assert!(events.contains(&"spotted DL2XYZ".to_string()));
        p.stop();
    }

    #[test]
    fn test_false_positives_are_rejected() {
        let reporter = Arc::new(RecordingCallsignReporter::default());
        let mut p = processor(Arc::new(WallClock), reporter);
        p.start();

        write_byte_by_byte(&p, " tu5nn tu5nn tu5nn ");
        p.sync();
        assert_eq!(count_of(&p, "TU5NN"), 0);
        p.stop();
    }

    #[test]
    fn test_dxcc_validation() {
        let reporter = Arc::new(RecordingCallsignReporter::default());
        let mut p = processor(Arc::new(WallClock), reporter);
        p.set_finders(Finders {
            dxcc: Some(Arc::new(PrefixList::new(["DL"]))),
            scp: None,
        });
        p.start();

        write_byte_by_byte(&p, " k3lr k3lr dl1abc ");
        p.sync();
        assert_eq!(count_of(&p, "K3LR"), 0);
        assert_eq!(count_of(&p, "DL1ABC"), 1);
        p.stop();
    }

    #[test]
    fn test_scp_weight_lowers_spotting_threshold() {
        let reporter = Arc::new(RecordingCallsignReporter::default());
        let mut p = processor(Arc::new(WallClock), reporter.clone());
        p.set_finders(Finders {
            dxcc: None,
            scp: Some(Arc::new(CallsignSet::new(["DL1ABC"]))),
        });
        p.start();

        // two repetitions plus the super-check bonus reach the threshold
        write_byte_by_byte(&p, " dl1abc dl1abc ");
        p.sync();
        assert!(reporter.events().contains(&"spotted DL1ABC".to_string()));
        p.stop();
    }

    #[test]
    fn test_restart_clears_state() {
        let reporter = Arc::new(RecordingCallsignReporter::default());
        let mut p = processor(Arc::new(WallClock), reporter);
        p.start();

        write_byte_by_byte(&p, " dl1abc dl1abc ");
        p.sync();
        assert_eq!(count_of(&p, "DL1ABC"), 2);

        p.restart();
        assert_eq!(count_of(&p, "DL1ABC"), 0);
        p.stop();
    }
}
