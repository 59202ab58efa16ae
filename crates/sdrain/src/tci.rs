//! TCI client
//!
//! Speaks the transceiver control interface of ExpertSDR-family radios
//! over a persistent WebSocket: text commands terminated with `;` for
//! control and events, binary frames for the IQ sample stream.

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};
use thiserror::Error;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

const DEFAULT_PORT: u16 = 40001;
const READ_TIMEOUT: Duration = Duration::from_millis(100);

// Binary data stream header: receiver, sample rate, format, codec, crc,
// length, type, and 9 reserved words, all little-endian u32.
const DATA_HEADER_WORDS: usize = 16;
const DATA_TYPE_IQ_STREAM: u32 = 0;
const DATA_FORMAT_FLOAT32: u32 = 4;

/// Spot color used for CW skimmer spots (opaque green)
pub const SPOT_COLOR: u32 = 0xFF00_FF00;

#[derive(Error, Debug)]
pub enum TciError {
    #[error("invalid TCI host: {0}")]
    InvalidHost(String),

    #[error("malformed TCI message: {0}")]
    MalformedMessage(String),

    #[error("binary frame too short: {0} bytes")]
    FrameTooShort(usize),

    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(u32),

    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tungstenite::Error>),
}

/// A decoded TCI text event
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// The server finished its initial parameter dump
    Ready,
    /// Center frequency of a trx changed
    Dds { trx: u32, frequency: f64 },
    /// IF offset of a VFO changed
    If { trx: u32, vfo: u32, offset: f64 },
    /// Tuned frequency of a VFO changed
    Vfo { trx: u32, vfo: u32, frequency: f64 },
    /// The negotiated IQ stream sample rate
    IqSampleRate(u32),
    /// Anything this client does not interpret
    Other(String),
}

/// Parse one `name:arg,arg;` text message
pub fn parse_event(message: &str) -> Result<Event, TciError> {
    let message = message.trim().trim_end_matches(';');
    let (name, args) = match message.split_once(':') {
        Some((name, args)) => (name, args),
        None => (message, ""),
    };
    let args: Vec<&str> = if args.is_empty() {
        Vec::new()
    } else {
        args.split(',').map(str::trim).collect()
    };

    let malformed = || TciError::MalformedMessage(message.to_string());
    let arg = |i: usize| -> Result<&str, TciError> { args.get(i).copied().ok_or_else(malformed) };

    match name {
        "ready" => Ok(Event::Ready),
        "dds" => Ok(Event::Dds {
            trx: arg(0)?.parse().map_err(|_| malformed())?,
            frequency: arg(1)?.parse().map_err(|_| malformed())?,
        }),
        "if" => Ok(Event::If {
            trx: arg(0)?.parse().map_err(|_| malformed())?,
            vfo: arg(1)?.parse().map_err(|_| malformed())?,
            offset: arg(2)?.parse().map_err(|_| malformed())?,
        }),
        "vfo" => Ok(Event::Vfo {
            trx: arg(0)?.parse().map_err(|_| malformed())?,
            vfo: arg(1)?.parse().map_err(|_| malformed())?,
            frequency: arg(2)?.parse().map_err(|_| malformed())?,
        }),
        "iq_samplerate" => Ok(Event::IqSampleRate(
            arg(0)?.parse().map_err(|_| malformed())?,
        )),
        _ => Ok(Event::Other(message.to_string())),
    }
}

/// One decoded binary IQ frame
#[derive(Clone, Debug, PartialEq)]
pub struct IqFrame {
    pub trx: u32,
    pub sample_rate: usize,
    pub data: Vec<f32>,
}

/// Decode a binary data-stream frame; non-IQ streams yield `None`
pub fn decode_iq_frame(frame: &[u8]) -> Result<Option<IqFrame>, TciError> {
    let header_len = DATA_HEADER_WORDS * 4;
    if frame.len() < header_len {
        return Err(TciError::FrameTooShort(frame.len()));
    }

    let trx = LittleEndian::read_u32(&frame[0..4]);
    let sample_rate = LittleEndian::read_u32(&frame[4..8]);
    let format = LittleEndian::read_u32(&frame[8..12]);
    let length = LittleEndian::read_u32(&frame[20..24]) as usize;
    let stream_type = LittleEndian::read_u32(&frame[24..28]);

    if stream_type != DATA_TYPE_IQ_STREAM {
        return Ok(None);
    }
    if format != DATA_FORMAT_FLOAT32 {
        return Err(TciError::UnsupportedFormat(format));
    }

    let payload = &frame[header_len..];
    if payload.len() < length * 4 {
        return Err(TciError::FrameTooShort(frame.len()));
    }

    let mut data = vec![0.0f32; length];
    LittleEndian::read_f32_into(&payload[..length * 4], &mut data);

    Ok(Some(IqFrame {
        trx,
        sample_rate: sample_rate as usize,
        data,
    }))
}

/// Receives the decoded output of a [`Client`]
pub trait TciHandler: Send {
    /// A decoded text event
    fn event(&mut self, event: &Event);

    /// One frame of interleaved I/Q samples
    fn iq_data(&mut self, trx: u32, sample_rate: usize, data: &[f32]);
}

/// A connected TCI client
pub struct Client {
    out_tx: Sender<String>,
    shutdown: Arc<AtomicBool>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Connect to a TCI server
    pub fn open(host: &str, handler: Box<dyn TciHandler>) -> Result<Self, TciError> {
        let host = normalize_host(host)?;
        let url = format!("ws://{}/", host);

        let (socket, _response) =
            tungstenite::connect(url.as_str()).map_err(|err| TciError::WebSocket(Box::new(err)))?;
        configure_read_timeout(&socket);
        info!("connected to TCI server {}", host);

        let (out_tx, out_rx) = unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            socket,
            out_rx,
            shutdown: Arc::clone(&shutdown),
            handler,
        };
        let handle = std::thread::spawn(move || worker.run());

        Ok(Self {
            out_tx,
            shutdown,
            handle: std::sync::Mutex::new(Some(handle)),
        })
    }

    /// Request the given IQ stream sample rate
    pub fn set_iq_sample_rate(&self, sample_rate: u32) {
        self.send(format!("iq_samplerate:{};", sample_rate));
    }

    /// Start the IQ stream of the given trx
    pub fn start_iq(&self, trx: u32) {
        self.send(format!("iq_start:{};", trx));
    }

    /// Stop the IQ stream of the given trx
    pub fn stop_iq(&self, trx: u32) {
        self.send(format!("iq_stop:{};", trx));
    }

    /// Announce a spot in the server's band map
    pub fn add_spot(&self, callsign: &str, mode: &str, frequency: f64, color: u32, source: &str) {
        self.send(format!(
            "spot:{},{},{:.0},{},{};",
            callsign, mode, frequency, color, source
        ));
    }

    /// Remove a spot from the server's band map
    pub fn delete_spot(&self, callsign: &str) {
        self.send(format!("spot_delete:{};", callsign));
    }

    /// Move the IF offset of a VFO
    pub fn set_if(&self, trx: u32, vfo: u32, offset: f64) {
        self.send(format!("if:{},{},{:.0};", trx, vfo, offset));
    }

    fn send(&self, message: String) {
        let _ = self.out_tx.send(message);
    }

    /// Shut the connection down; idempotent
    pub fn close(&self) {
        let Some(handle) = self.handle.lock().unwrap().take() else {
            return;
        };
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = handle.join();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

fn normalize_host(host: &str) -> Result<String, TciError> {
    if host.is_empty() {
        return Err(TciError::InvalidHost(host.to_string()));
    }
    if host.contains(':') {
        Ok(host.to_string())
    } else {
        Ok(format!("{}:{}", host, DEFAULT_PORT))
    }
}

fn configure_read_timeout(socket: &WebSocket<MaybeTlsStream<TcpStream>>) {
    if let MaybeTlsStream::Plain(stream) = socket.get_ref() {
        let _ = stream.set_read_timeout(Some(READ_TIMEOUT));
    }
}

struct Worker {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
    out_rx: Receiver<String>,
    shutdown: Arc<AtomicBool>,
    handler: Box<dyn TciHandler>,
}

impl Worker {
    fn run(mut self) {
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                let _ = self.socket.close(None);
                return;
            }

            match self.socket.read() {
                Ok(Message::Text(text)) => self.handle_text(&text),
                Ok(Message::Binary(frame)) => self.handle_binary(&frame),
                Ok(_) => {}
                Err(tungstenite::Error::Io(err))
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut =>
                {
                    if !self.write_pending() {
                        return;
                    }
                }
                Err(err) => {
                    warn!("cannot read next message from websocket: {}", err);
                    return;
                }
            }
        }
    }

    fn write_pending(&mut self) -> bool {
        while let Ok(command) = self.out_rx.try_recv() {
            debug!("> {}", command);
            if let Err(err) = self.socket.send(Message::Text(command)) {
                warn!("cannot write message to websocket: {}", err);
                return false;
            }
        }
        true
    }

    fn handle_text(&mut self, text: &str) {
        // a text message may carry several ;-terminated commands
        for part in text.split(';') {
            if part.trim().is_empty() {
                continue;
            }
            match parse_event(part) {
                Ok(event) => self.handler.event(&event),
                Err(err) => warn!("{}", err),
            }
        }
    }

    fn handle_binary(&mut self, frame: &[u8]) {
        match decode_iq_frame(frame) {
            Ok(Some(iq)) => self.handler.iq_data(iq.trx, iq.sample_rate, &iq.data),
            Ok(None) => {}
            Err(err) => warn!("{}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event() {
        assert_eq!(parse_event("ready;").unwrap(), Event::Ready);
        assert_eq!(
            parse_event("dds:0,7020000;").unwrap(),
            Event::Dds {
                trx: 0,
                frequency: 7_020_000.0
            }
        );
        assert_eq!(
            parse_event("if:0,1,-1200;").unwrap(),
            Event::If {
                trx: 0,
                vfo: 1,
                offset: -1200.0
            }
        );
        assert_eq!(
            parse_event("vfo:1,0,7021500;").unwrap(),
            Event::Vfo {
                trx: 1,
                vfo: 0,
                frequency: 7_021_500.0
            }
        );
        assert_eq!(
            parse_event("iq_samplerate:48000;").unwrap(),
            Event::IqSampleRate(48_000)
        );
        assert_eq!(
            parse_event("mute:false;").unwrap(),
            Event::Other("mute:false".to_string())
        );
        assert!(parse_event("dds:0;").is_err());
        assert!(parse_event("vfo:a,b,c;").is_err());
    }

    fn make_frame(stream_type: u32, format: u32, samples: &[f32]) -> Vec<u8> {
        let mut frame = vec![0u8; DATA_HEADER_WORDS * 4];
        LittleEndian::write_u32(&mut frame[0..4], 1); // trx
        LittleEndian::write_u32(&mut frame[4..8], 48_000);
        LittleEndian::write_u32(&mut frame[8..12], format);
        LittleEndian::write_u32(&mut frame[20..24], samples.len() as u32);
        LittleEndian::write_u32(&mut frame[24..28], stream_type);
        for &sample in samples {
            frame.extend_from_slice(&sample.to_le_bytes());
        }
        frame
    }

    #[test]
    fn test_decode_iq_frame() {
        let samples = [0.5f32, -0.5, 0.25, -0.25];
        let frame = make_frame(DATA_TYPE_IQ_STREAM, DATA_FORMAT_FLOAT32, &samples);

        let iq = decode_iq_frame(&frame).unwrap().unwrap();
        assert_eq!(iq.trx, 1);
        assert_eq!(iq.sample_rate, 48_000);
        assert_eq!(iq.data, samples);
    }

    #[test]
    fn test_decode_iq_frame_skips_other_streams() {
        let frame = make_frame(1, DATA_FORMAT_FLOAT32, &[0.0; 4]);
        assert_eq!(decode_iq_frame(&frame).unwrap(), None);
    }

    #[test]
    fn test_decode_iq_frame_rejects_bad_input() {
        assert!(matches!(
            decode_iq_frame(&[0u8; 16]),
            Err(TciError::FrameTooShort(16))
        ));

        let frame = make_frame(DATA_TYPE_IQ_STREAM, 2, &[0.0; 4]);
        assert!(matches!(
            decode_iq_frame(&frame),
            Err(TciError::UnsupportedFormat(2))
        ));

        let mut truncated = make_frame(DATA_TYPE_IQ_STREAM, DATA_FORMAT_FLOAT32, &[0.0; 4]);
        truncated.truncate(DATA_HEADER_WORDS * 4 + 8);
        assert!(matches!(
            decode_iq_frame(&truncated),
            Err(TciError::FrameTooShort(_))
        ));
    }
}
