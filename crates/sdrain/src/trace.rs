//! Out-of-band tracing of DSP internals
//!
//! A [`Tracer`] receives printf-style lines tagged with a context name and
//! forwards the lines of *its* context to a sink. Sinks exist for a local
//! file and for UDP; the default is a no-op. Tracing is a development
//! tool — the pipeline behaves identically with the no-op tracer.

use std::fs::File;
use std::io::Write;
use std::net::{ToSocketAddrs, UdpSocket};

use log::warn;

/// A sink for trace lines, filtered by context
pub trait Tracer: Send {
    fn context(&self) -> &str;
    fn start(&mut self);
    fn trace(&mut self, context: &str, line: std::fmt::Arguments);
    fn stop(&mut self);
}

/// The default tracer: discards everything
#[derive(Clone, Copy, Debug, Default)]
pub struct NoTracer;

impl Tracer for NoTracer {
    fn context(&self) -> &str {
        ""
    }
    fn start(&mut self) {}
    fn trace(&mut self, _: &str, _: std::fmt::Arguments) {}
    fn stop(&mut self) {}
}

/// Traces one context into a file
pub struct FileTracer {
    context: String,
    filename: String,
    out: Option<File>,
}

impl FileTracer {
    pub fn new(context: &str, filename: &str) -> Self {
        Self {
            context: context.to_string(),
            filename: filename.to_string(),
            out: None,
        }
    }
}

impl Tracer for FileTracer {
    fn context(&self) -> &str {
        &self.context
    }

    fn start(&mut self) {
        if self.out.is_some() {
            return;
        }
        match File::create(&self.filename) {
            Ok(file) => self.out = Some(file),
            Err(err) => warn!("cannot start trace: {}", err),
        }
    }

    fn trace(&mut self, context: &str, line: std::fmt::Arguments) {
        if context != self.context {
            return;
        }
        if let Some(out) = &mut self.out {
            if let Err(err) = out.write_fmt(line) {
                warn!("cannot trace line: {}", err);
            }
        }
    }

    fn stop(&mut self) {
        self.out = None;
    }
}

/// Traces one context to a UDP destination, line per datagram
pub struct UdpTracer {
    context: String,
    destination: String,
    socket: Option<UdpSocket>,
}

impl UdpTracer {
    pub fn new(context: &str, destination: &str) -> Self {
        Self {
            context: context.to_string(),
            destination: destination.to_string(),
            socket: None,
        }
    }
}

impl Tracer for UdpTracer {
    fn context(&self) -> &str {
        &self.context
    }

    fn start(&mut self) {
        if self.socket.is_some() {
            return;
        }
        if self.destination.to_socket_addrs().is_err() {
            warn!("cannot parse UDP destination: {}", self.destination);
            return;
        }
        let socket = UdpSocket::bind("0.0.0.0:0").and_then(|socket| {
            socket.connect(&*self.destination)?;
            Ok(socket)
        });
        match socket {
            Ok(socket) => self.socket = Some(socket),
            Err(err) => warn!("cannot start trace: {}", err),
        }
    }

    fn trace(&mut self, context: &str, line: std::fmt::Arguments) {
        if context != self.context {
            return;
        }
        if let Some(socket) = &self.socket {
            if let Err(err) = socket.send(line.to_string().as_bytes()) {
                warn!("cannot trace line: {}", err);
            }
        }
    }

    fn stop(&mut self) {
        self.socket = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_tracer_is_silent() {
        let mut tracer = NoTracer;
        tracer.start();
        tracer.trace("demod", format_args!("{};{}\n", 1, 2));
        tracer.stop();
    }

    #[test]
    fn test_file_tracer_filters_by_context() {
        let path = std::env::temp_dir().join("sdrain-trace-test.csv");
        let path = path.to_str().unwrap();

        let mut tracer = FileTracer::new("demod", path);
        tracer.start();
        tracer.trace("demod", format_args!("kept\n"));
        tracer.trace("other", format_args!("dropped\n"));
        tracer.stop();

        let contents = std::fs::read_to_string(path).unwrap();
        assert_eq!(contents, "kept\n");
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_trace_without_start_is_ignored() {
        let mut tracer = FileTracer::new("demod", "/nonexistent/trace.csv");
        tracer.trace("demod", format_args!("dropped\n"));
    }
}
