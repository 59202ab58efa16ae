//! KiwiSDR client
//!
//! Connects to the `/SND` WebSocket endpoint of a KiwiSDR, authenticates,
//! tunes an IQ passband, and delivers the incoming sample stream to a
//! [`KiwiHandler`]. Based on the protocol as spoken by the stock KiwiSDR
//! server; see also
//! <https://github.com/hcab14/kiwiclient/blob/master/kiwi/client.py>.

use std::collections::HashMap;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use byteorder::{BigEndian, ByteOrder};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use thiserror::Error;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

const DEFAULT_PORT: u16 = 8073;
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_millis(100);

// Bytes of header in front of the IQ samples of an SND message: 1 flag
// byte, 4 bytes sequence number, 2 bytes s-meter, 10 bytes GPS.
const SND_HEADER_LEN: usize = 17;

#[derive(Error, Debug)]
pub enum KiwiError {
    #[error("kiwi too busy")]
    TooBusy,

    #[error("bad password")]
    BadPassword,

    #[error("kiwi down")]
    Down,

    #[error("message too short: {0} bytes")]
    MessageTooShort(usize),

    #[error("invalid Kiwi host: {0}")]
    InvalidHost(String),

    #[error("malformed configuration value for {key}: {value}")]
    MalformedConfiguration { key: String, value: String },

    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tungstenite::Error>),
}

/// Message tag, the first three bytes of every binary message
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tag {
    /// Configuration key=value pairs
    Msg,
    /// IQ sample data
    Snd,
    /// Waterfall data
    Waterfall,
    /// Extension data
    Ext,
    Unknown,
}

impl From<&[u8]> for Tag {
    fn from(bytes: &[u8]) -> Self {
        match bytes {
            b"MSG" => Tag::Msg,
            b"SND" => Tag::Snd,
            b"W/F" => Tag::Waterfall,
            b"EXT" => Tag::Ext,
            _ => Tag::Unknown,
        }
    }
}

/// Split a binary Kiwi message into its tag and payload
pub fn decode_message(bytes: &[u8]) -> Result<(Tag, &[u8]), KiwiError> {
    if bytes.len() < 3 {
        return Err(KiwiError::MessageTooShort(bytes.len()));
    }
    Ok((Tag::from(&bytes[0..3]), &bytes[3..]))
}

/// Decoded `MSG` configuration state
#[derive(Debug, Default)]
pub struct Configuration {
    values: HashMap<String, String>,
    audio_rate: usize,
    compression: bool,
}

impl Configuration {
    /// Merge a `MSG` payload of whitespace-separated key=value pairs
    ///
    /// Returns a fatal error for the `too_busy=1`, `badp=1`, and `down=1`
    /// markers. Values of `load_*` keys are url-unescaped.
    pub fn update(&mut self, payload: &[u8]) -> Result<(), KiwiError> {
        let text = String::from_utf8_lossy(payload);
        for part in text.split_whitespace() {
            let (key, value) = match part.split_once('=') {
                Some((key, value)) => (key.trim(), value.trim().to_string()),
                None => {
                    self.values.insert(part.to_string(), String::new());
                    continue;
                }
            };

            match key {
                "too_busy" if value == "1" => return Err(KiwiError::TooBusy),
                "badp" if value == "1" => return Err(KiwiError::BadPassword),
                "down" if value == "1" => return Err(KiwiError::Down),
                _ => {}
            }

            debug!("received configuration data: {}", key);

            let value = match key {
                "audio_rate" => {
                    self.audio_rate = value.parse().map_err(|_| {
                        KiwiError::MalformedConfiguration {
                            key: key.to_string(),
                            value: value.clone(),
                        }
                    })?;
                    value
                }
                "compression" => {
                    self.compression = value == "1";
                    value
                }
                _ if key.starts_with("load_") => percent_encoding::percent_decode_str(&value)
                    .decode_utf8_lossy()
                    .into_owned(),
                _ => value,
            };

            self.values.insert(key.to_string(), value);
        }
        Ok(())
    }

    pub fn audio_rate(&self) -> usize {
        self.audio_rate
    }

    pub fn compression(&self) -> bool {
        self.compression
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// Decode the IQ samples of an `SND` payload into `out`
///
/// The payload starts with a [`SND_HEADER_LEN`]-byte header which is
/// skipped; the rest are 16-bit signed big-endian samples, scaled to
/// `[-1.0, 1.0]`.
pub fn decode_iq_payload(payload: &[u8], out: &mut Vec<f32>) -> Result<(), KiwiError> {
    if payload.len() < SND_HEADER_LEN {
        return Err(KiwiError::MessageTooShort(payload.len()));
    }

    let iq_bytes = &payload[SND_HEADER_LEN..];
    out.clear();
    out.extend(
        iq_bytes
            .chunks_exact(2)
            .map(|bytes| BigEndian::read_i16(bytes) as f32 / i16::MAX as f32),
    );
    Ok(())
}

/// Receives the decoded output of a [`Client`]
pub trait KiwiHandler: Send {
    /// The connection is up and the audio rate is known
    fn connected(&mut self, sample_rate: usize);

    /// One frame of interleaved I/Q samples
    fn iq_data(&mut self, sample_rate: usize, data: &[f32]);
}

/// A connected KiwiSDR client
///
/// The socket is owned by a worker thread; [`Client::close`] shuts it
/// down. The client closes itself on fatal server messages (busy, bad
/// password, down).
pub struct Client {
    out_tx: Sender<String>,
    shutdown: Arc<AtomicBool>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Connect, authenticate, and tune the IQ passband
    ///
    /// `bandwidth` is centered on `center_frequency`; IQ data arrives at
    /// the Kiwi's audio rate (nominally 12 kHz).
    pub fn open(
        host: &str,
        username: &str,
        password: &str,
        center_frequency: f64,
        bandwidth: usize,
        handler: Box<dyn KiwiHandler>,
    ) -> Result<Self, KiwiError> {
        let host = normalize_host(host)?;
        let url = format!("ws://{}/{}/SND", host, next_client_number());

        let (socket, _response) =
            tungstenite::connect(url.as_str()).map_err(|err| KiwiError::WebSocket(Box::new(err)))?;
        configure_read_timeout(&socket);
        info!("connected to KiwiSDR {}", host);

        let (out_tx, out_rx) = unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            socket,
            out_rx,
            shutdown: Arc::clone(&shutdown),
            handler,
            configuration: Configuration::default(),
            connected: false,
            iq_buffer: Vec::new(),
            last_keepalive: Instant::now(),
        };
        let handle = std::thread::spawn(move || worker.run());

        let client = Self {
            out_tx,
            shutdown,
            handle: std::sync::Mutex::new(Some(handle)),
        };

        client.send(format!(
            "SET auth t=kiwi p={}",
            utf8_percent_encode(password, NON_ALPHANUMERIC)
        ));
        client.send(format!(
            "SET ident_user={}",
            utf8_percent_encode(username, NON_ALPHANUMERIC)
        ));
        for setup in [
            "SET AR OK in=12000 out=48000",
            "SET squelch=0 max=0",
            "SET lms_autonotch=0",
            "SET getattn=0",
            "SET gen=0 mix=-1",
            "SET agc=0 hang=0 thresh=-100 slope=6 decay=1000 manGain=50",
            "SET compression=0",
        ] {
            client.send(setup.to_string());
        }

        let low_cut = -(bandwidth as i64 / 2);
        let high_cut = bandwidth as i64 / 2;
        client.send(format!(
            "SET mod=iq low_cut={} high_cut={} freq={:.3}",
            low_cut,
            high_cut,
            center_frequency / 1000.0
        ));

        Ok(client)
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

fn normalize_host(host: &str) -> Result<String, KiwiError> {
    if host.is_empty() {
        return Err(KiwiError::InvalidHost(host.to_string()));
    }
    if host.contains(':') {
        Ok(host.to_string())
    } else {
        Ok(format!("{}:{}", host, DEFAULT_PORT))
    }
}

fn next_client_number() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn configure_read_timeout(socket: &WebSocket<MaybeTlsStream<TcpStream>>) {
    // a read timeout turns the blocking read loop into a poll loop that
    // can also write queued commands and keepalives
    if let MaybeTlsStream::Plain(stream) = socket.get_ref() {
        let _ = stream.set_read_timeout(Some(READ_TIMEOUT));
    }
}

struct Worker {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
    out_rx: Receiver<String>,
    shutdown: Arc<AtomicBool>,
    handler: Box<dyn KiwiHandler>,

    configuration: Configuration,
    connected: bool,
    iq_buffer: Vec<f32>,
    last_keepalive: Instant,
}

impl Worker {
    fn run(mut self) {
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                let _ = self.socket.close(None);
                return;
            }

            match self.socket.read() {
                Ok(Message::Binary(message)) => {
                    if let Err(err) = self.handle_message(&message) {
                        match err {
                            KiwiError::TooBusy | KiwiError::BadPassword | KiwiError::Down => {
                                warn!("fatal server message: {}", err);
                                let _ = self.socket.close(None);
                                return;
                            }
                            err => warn!("{}", err),
                        }
                    }
                }
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

    // Send queued commands and the periodic keepalive. Returns false on a
    // dead socket.
    fn write_pending(&mut self) -> bool {
        while let Ok(command) = self.out_rx.try_recv() {
            if let Err(err) = self.socket.send(Message::Text(command)) {
                warn!("cannot write message to websocket: {}", err);
                return false;
            }
        }

        if self.last_keepalive.elapsed() >= KEEPALIVE_INTERVAL {
            self.last_keepalive = Instant::now();
            if let Err(err) = self.socket.send(Message::Text("SET keepalive".to_string())) {
                warn!("cannot write keepalive to websocket: {}", err);
                return false;
            }
        }

        true
    }

    fn handle_message(&mut self, message: &[u8]) -> Result<(), KiwiError> {
        let (tag, payload) = decode_message(message)?;
        match tag {
            Tag::Msg => {
                self.configuration.update(payload)?;
                if !self.connected && self.configuration.audio_rate() != 0 {
                    self.connected = true;
                    self.handler.connected(self.configuration.audio_rate());
                }
            }
            Tag::Snd => {
                if self.configuration.audio_rate() == 0 {
                    warn!("received IQ data with unknown audio rate");
                    return Ok(());
                }
                decode_iq_payload(payload, &mut self.iq_buffer)?;
                self.handler
                    .iq_data(self.configuration.audio_rate(), &self.iq_buffer);
            }
            tag => {
                debug!(
                    "received message with unhandled tag: {:?} {} bytes",
                    tag,
                    payload.len()
                );
            }
        }
        Ok(())
    }
}
