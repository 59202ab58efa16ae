//! CW demodulation from PCM audio
//!
//! The audio path decodes a single tone, e.g. from a sound card: a
//! [`Goertzel`] filter detects the pitch per filter block, a debouncer
//! cleans up the detection, and the shared [`Decoder`](super::Decoder)
//! turns the keying into text. The demodulator owns a worker thread;
//! samples go in through a bounded queue, configuration changes are
//! closures executed in worker context.

use std::io::Write;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::warn;

use crate::dsp::{BoolDebouncer, Goertzel};

use super::decoder::Decoder;

const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;
const DEFAULT_DEBOUNCE_THRESHOLD: usize = 3;
const DEFAULT_MAX_SCALE: f64 = 12.0;

type Op<W> = Box<dyn FnOnce(&mut Worker<W>) + Send>;

/// Audio-domain CW demodulator
///
/// Decoded text is written to the injected writer from the worker thread.
pub struct AudioDemodulator<W: Write + Send + 'static> {
    blocksize: usize,
    tick_seconds: f64,

    in_tx: Sender<f32>,
    op_tx: Sender<Op<W>>,
    close_tx: Sender<()>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<W: Write + Send + 'static> AudioDemodulator<W> {
    /// New demodulator for the given pitch
    ///
    /// `buffer_size` bounds the input sample queue; 0 selects the default.
    pub fn new(out: W, pitch: f64, sample_rate: usize, buffer_size: usize) -> Self {
        let buffer_size = if buffer_size == 0 {
            DEFAULT_BUFFER_SIZE
        } else {
            buffer_size
        };

        let filter = Goertzel::new(pitch, sample_rate);
        let blocksize = filter.blocksize();
        let tick_seconds = filter.tick_seconds();

        let (in_tx, in_rx) = bounded(buffer_size);
        let (op_tx, op_rx) = bounded::<Op<W>>(0);
        let (close_tx, close_rx) = bounded(0);

        let decoder = Decoder::new(out, sample_rate, blocksize);
        let mut worker = Worker {
            filter,
            debouncer: BoolDebouncer::new(DEFAULT_DEBOUNCE_THRESHOLD),
            decoder,
            scale: 1.0,
            max_scale: DEFAULT_MAX_SCALE,
            channel_count: 1,
            sample_index: 0,
            block: Vec::with_capacity(blocksize),
        };
        let handle = std::thread::spawn(move || worker.run(in_rx, op_rx, close_rx));

        Self {
            blocksize,
            tick_seconds,
            in_tx,
            op_tx,
            close_tx,
            handle: std::sync::Mutex::new(Some(handle)),
        }
    }

    /// Block size of the underlying Goertzel filter
    pub fn blocksize(&self) -> usize {
        self.blocksize
    }

    /// Duration of one decoder tick in seconds
    pub fn tick_seconds(&self) -> f64 {
        self.tick_seconds
    }

    /// Feed PCM samples
    ///
    /// Blocks while the input queue is full. With a channel count of n,
    /// only every n-th sample is used.
    pub fn write(&self, buf: &[f32]) {
        for &sample in buf {
            if self.in_tx.send(sample).is_err() {
                warn!("audio demodulator is closed, dropping samples");
                return;
            }
        }
    }

    /// Fixed scale factor for the input; 0 enables automatic scaling
    pub fn set_scale(&self, scale: f64) {
        self.exec(move |w| w.scale = scale as f32);
    }

    /// Limit for the automatic scale factor
    pub fn set_max_scale(&self, max_scale: f64) {
        self.exec(move |w| w.max_scale = max_scale);
    }

    pub fn max_scale(&self) -> f64 {
        self.query(|w| w.max_scale).unwrap_or(DEFAULT_MAX_SCALE)
    }

    /// Number of interleaved channels in the input; only the first is used
    pub fn set_channel_count(&self, channel_count: usize) {
        self.exec(move |w| w.channel_count = channel_count.max(1));
    }

    pub fn set_debounce_threshold(&self, threshold: usize) {
        self.exec(move |w| w.debouncer.set_threshold(threshold));
    }

    pub fn debounce_threshold(&self) -> usize {
        self.query(|w| w.debouncer.threshold())
            .unwrap_or(DEFAULT_DEBOUNCE_THRESHOLD)
    }

    pub fn preset_wpm(&self, wpm: f64) {
        self.exec(move |w| w.decoder.preset_wpm(wpm));
    }

    /// Current speed estimate of the decoder, rounded
    pub fn wpm(&self) -> u32 {
        self.query(|w| w.decoder.wpm().round() as u32).unwrap_or(0)
    }

    pub fn set_magnitude_threshold(&self, threshold: f64) {
        self.exec(move |w| w.filter.set_magnitude_threshold(threshold));
    }

    pub fn magnitude_threshold(&self) -> f64 {
        self.query(|w| w.filter.magnitude_threshold()).unwrap_or(0.0)
    }

    /// Stop the worker, flushing a pending character
    ///
    /// Idempotent; further samples are dropped.
    pub fn close(&self) {
        let Some(handle) = self.handle.lock().unwrap().take() else {
            return;
        };
        let _ = self.close_tx.send(());
        let _ = handle.join();
    }

    fn exec(&self, f: impl FnOnce(&mut Worker<W>) + Send + 'static) {
        let _ = self.op_tx.send(Box::new(f));
    }

    fn query<R: Send + 'static>(
        &self,
        f: impl FnOnce(&mut Worker<W>) -> R + Send + 'static,
    ) -> Option<R> {
        let (tx, rx) = bounded(1);
        self.exec(move |w| {
            let _ = tx.send(f(w));
        });
        rx.recv().ok()
    }
}

impl<W: Write + Send + 'static> Drop for AudioDemodulator<W> {
    fn drop(&mut self) {
        self.close();
    }
}

struct Worker<W: Write> {
    filter: Goertzel,
    debouncer: BoolDebouncer,
    decoder: Decoder<W>,

    scale: f32,
    max_scale: f64,
    channel_count: usize,
    sample_index: usize,
    block: Vec<f32>,
}

impl<W: Write> Worker<W> {
    fn run(&mut self, in_rx: Receiver<f32>, op_rx: Receiver<Op<W>>, close_rx: Receiver<()>) {
        loop {
            crossbeam_channel::select! {
                recv(op_rx) -> op => match op {
                    Ok(op) => op(self),
                    Err(_) => break,
                },
                recv(in_rx) -> sample => match sample {
                    Ok(sample) => self.process(sample),
                    Err(_) => break,
                },
                recv(close_rx) -> _ => {
                    self.decoder.flush();
                    break;
                }
            }
        }
    }

    fn process(&mut self, sample: f32) {
        let index = self.sample_index;
        self.sample_index = self.sample_index.wrapping_add(1);
        if index % self.channel_count != 0 {
            return;
        }

        self.block.push(sample);
        if self.block.len() < self.filter.blocksize() {
            return;
        }

        let mut scale = self.scale;
        if scale == 0.0 {
            let max = crate::dsp::peak_amplitude(&self.block);
            scale = f64::min(1.0 / max as f64, self.max_scale) as f32;
        }
        if scale != 1.0 {
            for value in self.block.iter_mut() {
                *value = (*value * scale).clamp(-1.0, 1.0);
            }
        }

        let (_, state, _) = self.filter.detect(&self.block);
        self.block.clear();

        let debounced = self.debouncer.debounce(state);
        self.decoder.tick(debounced);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct ConcurrentBuffer(Arc<Mutex<Vec<u8>>>);

    impl ConcurrentBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for ConcurrentBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn keyed_tone(
        pitch: f64,
        sample_rate: usize,
        blocksize: usize,
        pattern: &[(bool, usize)],
    ) -> Vec<f32> {
        let mut out = Vec::new();
        let mut t = 0.0f64;
        let tick = 1.0 / sample_rate as f64;
        for &(on, blocks) in pattern {
            for _ in 0..blocks * blocksize {
                let sample = if on {
                    (2.0 * std::f64::consts::PI * pitch * t).cos()
                } else {
                    0.0
                };
                out.push(sample as f32);
                t += tick;
            }
        }
        out
    }

    #[test]
    fn test_decodes_keyed_tone() {
        const SAMPLE_RATE: usize = 48_000;
        const PITCH: f64 = 700.0;

        let buffer = ConcurrentBuffer::default();
        let demodulator = AudioDemodulator::new(buffer.clone(), PITCH, SAMPLE_RATE, 0);

        // at 20 WPM a dit is 60ms worth of filter blocks
        let dit = (0.06 / demodulator.tick_seconds()).ceil() as usize;

        // "n": dah, gap, dit and enduring silence
        let samples = keyed_tone(
            PITCH,
            SAMPLE_RATE,
            demodulator.blocksize(),
            &[(true, 3 * dit), (false, dit), (true, dit), (false, 20 * dit)],
        );
        demodulator.write(&samples);
        demodulator.close();

        assert_eq!(buffer.contents(), "n");
    }

    #[test]
    fn test_configuration_roundtrip() {
        let demodulator =
            AudioDemodulator::new(ConcurrentBuffer::default(), 700.0, 48_000, 0);

        demodulator.set_debounce_threshold(5);
        assert_eq!(demodulator.debounce_threshold(), 5);

        demodulator.set_magnitude_threshold(0.5);
        assert!((demodulator.magnitude_threshold() - 0.5).abs() < f64::EPSILON);

        demodulator.preset_wpm(25.0);
        assert_eq!(demodulator.wpm(), 25);

        demodulator.set_max_scale(4.0);
        assert!((demodulator.max_scale() - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_close_is_idempotent() {
        let demodulator =
            AudioDemodulator::new(ConcurrentBuffer::default(), 700.0, 48_000, 0);
        demodulator.close();
        demodulator.close();
        demodulator.write(&[0.0; 16]);
    }
}
