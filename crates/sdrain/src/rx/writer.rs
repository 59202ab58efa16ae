//! Multiplexing many listener text streams into one output

use std::io::Write;
use std::sync::{Arc, Mutex};

/// Multiplexes named text channels into one active output
///
/// Every listener writes its decoded text to its own channel; only the
/// currently active channel reaches the underlying writer. This way the
/// operator sees exactly one "focused" listener without any output
/// coordination between the decoder threads.
#[derive(Clone)]
pub struct ChannelWriter {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    out: Box<dyn Write + Send>,
    active_channel: String,
}

impl ChannelWriter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                out,
                active_channel: String::new(),
            })),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    /// Select which channel reaches the output; "" mutes all
    pub fn set_active(&self, channel: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.active_channel = channel.to_string();
    }

    /// A writer bound to the named channel
    pub fn channel(&self, channel: &str) -> ChannelWriterHandle {
        ChannelWriterHandle {
            channel: channel.to_string(),
            writer: self.clone(),
        }
    }
}

impl Write for ChannelWriter {
    /// Write directly to the output, bypassing the channel selection
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        inner.out.write(bytes)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.out.flush()
    }
}

/// Write end of one named channel
#[derive(Clone)]
pub struct ChannelWriterHandle {
    channel: String,
    writer: ChannelWriter,
}

impl Write for ChannelWriterHandle {
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
        let mut inner = self.writer.inner.lock().unwrap();
        if inner.active_channel != self.channel {
            // everything except the active channel is ignored
            return Ok(bytes.len());
        }
        inner.out.write(bytes)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedOut(Arc<Mutex<Vec<u8>>>);

    impl SharedOut {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedOut {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_only_active_channel_reaches_output() {
        let out = SharedOut::default();
        let writer = ChannelWriter::new(Box::new(out.clone()));
        let mut a = writer.channel("a");
        let mut b = writer.channel("b");

        writer.set_active("a");
        a.write_all(b"from a ").unwrap();
        b.write_all(b"from b ").unwrap();

        writer.set_active("b");
        a.write_all(b"more a ").unwrap();
        b.write_all(b"more b").unwrap();

        assert_eq!(out.contents(), "from a more b");
    }

    #[test]
    fn test_inactive_writes_report_success() {
        let writer = ChannelWriter::new(Box::new(SharedOut::default()));
        let mut muted = writer.channel("muted");

        assert_eq!(muted.write(b"dropped").unwrap(), 7);
    }

    #[test]
    fn test_direct_write_bypasses_selection() {
        let out = SharedOut::default();
        let mut writer = ChannelWriter::new(Box::new(out.clone()));

        writer.write_all(b"direct").unwrap();
        assert_eq!(out.contents(), "direct");
    }
}
