//! Telnet spot fan-out
//!
//! A small line-based TCP server in the style of a DX cluster node. Every
//! connected operator receives the spots of this station, formatted as the
//! classic fixed-width `DX de ...` line. Outbound spots are de-duplicated
//! per (callsign, kHz) and silenced for a while after each announcement.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use log::{debug, info, warn};
use md5::{Digest, Md5};

use crate::rx::Reporter;

const ACCEPT_POLL_INTERVAL: StdDuration = StdDuration::from_millis(100);
const DEFAULT_SPOT_SILENCE_PERIOD: i64 = 4 * 60;

// Dedup key for a spot: callsign and frequency rounded to kHz.
fn spot_hash(callsign: &str, frequency: f64) -> String {
    let text = format!("{}-{:.0}", callsign, frequency / 1000.0);
    Md5::digest(text.as_bytes())
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect()
}

/// Silences repeated spots of the same station
///
/// A spot for a given (callsign, kHz) pair is announced at most once per
/// silence period.
pub struct SpotPolicy {
    last_spots: HashMap<String, DateTime<Utc>>,
    silence_period: Duration,
}

impl SpotPolicy {
    pub fn new() -> Self {
        Self {
            last_spots: HashMap::new(),
            silence_period: Duration::seconds(DEFAULT_SPOT_SILENCE_PERIOD),
        }
    }

    pub fn set_silence_period(&mut self, silence_period: StdDuration) {
        self.silence_period =
            Duration::from_std(silence_period).unwrap_or_else(|_| Duration::seconds(i64::MAX / 2));
    }

    /// True if this spot should go out; registers the announcement
    pub fn should_announce(
        &mut self,
        callsign: &str,
        frequency: f64,
        timestamp: DateTime<Utc>,
    ) -> bool {
        let hash = spot_hash(callsign, frequency);
        if let Some(last) = self.last_spots.get(&hash) {
            if timestamp.signed_duration_since(*last) <= self.silence_period {
                return false;
            }
        }
        self.last_spots.insert(hash, timestamp);
        true
    }
}

impl Default for SpotPolicy {
    fn default() -> Self {
        Self::new()
    }
}

// The fixed-width cluster spot line:
//
//   DX de local-#:   14035.0  dl0abc       20 db 18 wpm  cq               1651z
fn format_spot_message(
    mycall: &str,
    callsign: &str,
    frequency: f64,
    msg: &str,
    timestamp: DateTime<Utc>,
) -> String {
    let prefix = format!("DX de {}:", mycall);
    format!(
        "{:<16} {:>6.1}  {:<13}{:<31}{:<4}z\n",
        prefix,
        frequency / 1000.0,
        callsign,
        msg,
        timestamp.format("%H%M")
    )
}

/// Line-based TCP server publishing spots to connected operators
pub struct Server {
    msg_tx: Sender<Vec<u8>>,
    policy: Mutex<SpotPolicy>,
    mycall: String,
    local_addr: std::net::SocketAddr,
    shutdown: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    /// Bind `address` and start serving
    pub fn start(address: &str, mycall: &str, version: &str) -> std::io::Result<Self> {
        let address = address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "no address"))?;
        let listener = TcpListener::bind(address)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        info!("telnet spotter listening on {}", local_addr);

        let (msg_tx, msg_rx) = bounded::<Vec<u8>>(1);
        let shutdown = Arc::new(AtomicBool::new(false));

        let welcome = format!("SDRainer Version {}\n", version);
        let accept_shutdown = Arc::clone(&shutdown);
        let handle = std::thread::spawn(move || {
            let mut connections: Vec<Connection> = Vec::new();
            loop {
                if accept_shutdown.load(Ordering::Relaxed) {
                    for connection in &connections {
                        connection.close();
                    }
                    return;
                }

                match listener.accept() {
                    Ok((stream, remote)) => {
                        info!("new incoming connection: {}", remote);
                        match Connection::start(stream, &welcome) {
                            Ok(connection) => connections.push(connection),
                            Err(err) => warn!("cannot set up connection: {}", err),
                        }
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(err) => warn!("accept failed: {}", err),
                }

                match msg_rx.recv_timeout(ACCEPT_POLL_INTERVAL) {
                    Ok(bytes) => {
                        connections.retain_mut(|connection| match connection.write_all(&bytes) {
                            Ok(()) => true,
                            Err(_) => {
                                info!("dropping closed connection {}", connection.user());
                                false
                            }
                        });
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }
        });

        Ok(Self {
            msg_tx,
            policy: Mutex::new(SpotPolicy::new()),
            mycall: mycall.to_string(),
            local_addr,
            shutdown,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// The local address operators connect to
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    pub fn set_silence_period(&self, silence_period: StdDuration) {
        self.policy
            .lock()
            .unwrap()
            .set_silence_period(silence_period);
    }

    /// Publish a spot to all connected operators
    ///
    /// Repeated spots of the same (callsign, kHz) within the silence
    /// period are suppressed.
    pub fn spot(&self, callsign: &str, frequency: f64, msg: &str, timestamp: DateTime<Utc>) {
        let announce = self
            .policy
            .lock()
            .unwrap()
            .should_announce(callsign, frequency, timestamp);
        if !announce {
            debug!("spot of {} on {:.1} is silenced", callsign, frequency);
            return;
        }

        let line = format_spot_message(&self.mycall, callsign, frequency, msg, timestamp);
        let _ = self.msg_tx.send(line.into_bytes());
    }

    pub fn stop(&self) {
        let Some(handle) = self.handle.lock().unwrap().take() else {
            return;
        };
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = handle.join();
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

// One operator connection. A reader thread runs the callsign prompt; spot
// lines are written from the server thread.
struct Connection {
    stream: TcpStream,
    user: Arc<Mutex<String>>,
}

impl Connection {
    fn start(stream: TcpStream, welcome: &str) -> std::io::Result<Self> {
        stream.set_nonblocking(false)?;
        let mut write_half = stream.try_clone()?;
        write_half.write_all(welcome.as_bytes())?;
        write_half.write_all(b"Enter your callsign: ")?;

        let user = Arc::new(Mutex::new(String::new()));
        let reader_user = Arc::clone(&user);
        let read_half = stream.try_clone()?;
        std::thread::spawn(move || {
            let mut reader = BufReader::new(read_half);
            let mut write_half = write_half;
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line) {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {}
                }

                let answer = line.trim();
                let mut user = reader_user.lock().unwrap();
                let response = if user.is_empty() && !answer.is_empty() {
                    *user = answer.to_string();
                    format!("welcome {}\n", user)
                } else {
                    // operators only listen, further input is acknowledged
                    "\n".to_string()
                };
                drop(user);

                if write_half.write_all(response.as_bytes()).is_err() {
                    return;
                }
            }
        });

        Ok(Self { stream, user })
    }

    fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(bytes)
    }

    fn close(&self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }

    fn user(&self) -> String {
        self.user.lock().unwrap().clone()
    }
}

/// Forwards spotted callsigns to a telnet [`Server`]
///
/// Plug this reporter into a receiver to publish its spots.
pub struct SpotReporter {
    server: Arc<Server>,
    msg: String,
}

impl SpotReporter {
    pub fn new(server: Arc<Server>, msg: &str) -> Self {
        Self {
            server,
            msg: msg.to_string(),
        }
    }
}

impl Reporter for SpotReporter {
    fn listener_activated(&self, _listener: &str, _frequency: f64) {}

    fn listener_deactivated(&self, _listener: &str, _frequency: f64) {}

    fn callsign_decoded(
        &self,
        _listener: &str,
        _callsign: &str,
        _frequency: f64,
        _count: usize,
        _weight: i64,
    ) {
    }

    fn callsign_spotted(&self, _listener: &str, callsign: &str, frequency: f64) {
        self.server.spot(callsign, frequency, &self.msg, Utc::now());
    }

    fn spot_timeout(&self, _listener: &str, _callsign: &str, _frequency: f64) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;

    fn test_timestamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 10, 21, 16, 51, 0).unwrap()
    }

    #[test]
    fn test_spot_message_format() {
        let expected =
            "DX de local-#:   14035.0  dl0abc       20 db 18 wpm  cq               1651z\n";

        let actual = format_spot_message(
            "local-#",
            "dl0abc",
            14_035_000.0,
            "20 db 18 wpm  cq",
            test_timestamp(),
        );

        assert_eq!(actual, expected);
    }

    #[test]
    fn test_spot_hash_rounds_to_khz() {
        assert_eq!(
            spot_hash("DL1ABC", 7_012_400.0),
            spot_hash("DL1ABC", 7_012_600.0)
        );
        assert_ne!(
            spot_hash("DL1ABC", 7_012_000.0),
            spot_hash("DL1ABC", 7_014_000.0)
        );
        assert_ne!(
            spot_hash("DL1ABC", 7_012_000.0),
            spot_hash("DL2XYZ", 7_012_000.0)
        );
    }

    #[test]
    fn test_spot_policy_silences_repeats() {
        let mut policy = SpotPolicy::new();
        let t0 = test_timestamp();

        assert!(policy.should_announce("DL1ABC", 7_012_000.0, t0));
        assert!(!policy.should_announce("DL1ABC", 7_012_000.0, t0 + Duration::seconds(60)));

        // a different station or frequency is not silenced
        assert!(policy.should_announce("DL2XYZ", 7_012_000.0, t0));
        assert!(policy.should_announce("DL1ABC", 7_030_000.0, t0));

        // after the silence period the spot goes out again
        assert!(policy.should_announce(
            "DL1ABC",
            7_012_000.0,
            t0 + Duration::seconds(DEFAULT_SPOT_SILENCE_PERIOD + 1)
        ));
    }

    #[test]
    fn test_server_roundtrip() {
        let server = Server::start("127.0.0.1:0", "local-#", "1.0.0").unwrap();

        let stream = TcpStream::connect(server.local_addr()).unwrap();
        stream
            .set_read_timeout(Some(StdDuration::from_secs(5)))
            .unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());

        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "SDRainer Version 1.0.0\n");

        let mut stream_write = stream.try_clone().unwrap();
        stream_write.write_all(b"dl9zzz\n").unwrap();

        // prompt and welcome come back on the same stream
        let mut response = String::new();
        reader.read_line(&mut response).unwrap();
        assert!(response.contains("welcome dl9zzz"));

        server.spot("dl0abc", 14_035_000.0, "20 db 18 wpm  cq", test_timestamp());

        line.clear();
        reader.read_line(&mut line).unwrap();
        assert!(line.starts_with("DX de local-#:"));
        assert!(line.contains("dl0abc"));

        server.stop();
    }
}
