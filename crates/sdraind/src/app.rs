//! Wiring of transports, receiver, and spotters

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use log::{info, warn};

use sdrain::clock::WallClock;
use sdrain::cw::AudioDemodulator;
use sdrain::rx::{Receiver, ReceiverMode, Reporter, TextReporter};
use sdrain::tci::{self, Event};
use sdrain::telnet;
use sdrain::trace::UdpTracer;

use crate::cli::{Args, Command, DecodeTransport, StrainTransport};

const RECEIVER_ID: &str = "rx0";
const IQ_SAMPLE_RATE: u32 = 48_000;
const SPOT_MESSAGE: &str = "cw";

pub fn run(args: Args) -> anyhow::Result<()> {
    match &args.command {
        Command::Strain { strain, transport } => match transport {
            StrainTransport::Tci { host, trx } => run_strain_tci(&args, strain, host, *trx),
            StrainTransport::Kiwi {
                host,
                username,
                password,
                center,
                rx,
                bandwidth,
            } => run_strain_kiwi(&args, strain, host, username, password, *center, *rx, *bandwidth),
        },
        Command::Decode {
            debounce,
            transport,
        } => match transport {
            DecodeTransport::Tci { host, trx } => run_decode_tci(&args, *debounce, host, *trx),
            DecodeTransport::Pulse { pitch } => run_decode_pulse(*debounce, *pitch),
        },
    }
}

fn new_receiver(args: &Args, mode: ReceiverMode) -> Arc<Receiver> {
    let receiver = Arc::new(Receiver::new(RECEIVER_ID, mode, Arc::new(WallClock)));
    receiver.add_reporter(TextReporter::stdout());

    if args.scope {
        let destination = normalize_scope_address(&args.scope_address);
        receiver.set_tracer_factory(Arc::new(move || {
            let mut tracer = UdpTracer::new("demod", &destination);
            sdrain::trace::Tracer::start(&mut tracer);
            Box::new(tracer)
        }));
    }

    receiver
}

// ":35369" means "localhost, port 35369"
fn normalize_scope_address(address: &str) -> String {
    if address.starts_with(':') {
        format!("127.0.0.1{}", address)
    } else {
        address.to_string()
    }
}

fn start_spotter(
    strain: &crate::cli::StrainArgs,
    receiver: &Arc<Receiver>,
) -> anyhow::Result<Arc<telnet::Server>> {
    let spotter = Arc::new(
        telnet::Server::start(
            &format!("0.0.0.0:{}", strain.telnet_port),
            &strain.telnet_call,
            env!("CARGO_PKG_VERSION"),
        )
        .context("cannot start telnet spotter")?,
    );
    spotter.set_silence_period(strain.spot_every);
    receiver.add_reporter(Box::new(telnet::SpotReporter::new(
        Arc::clone(&spotter),
        SPOT_MESSAGE,
    )));
    Ok(spotter)
}

fn configure_strain(receiver: &Arc<Receiver>, strain: &crate::cli::StrainArgs) {
    receiver.set_peak_threshold(strain.threshold);
    receiver.set_signal_debounce(strain.debounce);
    receiver.set_silence_timeout(strain.silence);
    receiver.set_attachment_timeout(strain.busy);
}

// Feeds TCI events and IQ frames into the receiver. The receiver starts
// when the first frame reveals the stream's block size.
struct TciReceiverHandler {
    receiver: Arc<Receiver>,
    trx: u32,
    started: bool,
}

impl tci::TciHandler for TciReceiverHandler {
    fn event(&mut self, event: &Event) {
        match *event {
            Event::Dds { trx, frequency } if trx == self.trx => {
                self.receiver.set_center_frequency(frequency);
            }
            Event::If { trx, vfo, offset } if trx == self.trx && vfo == 0 => {
                self.receiver.set_vfo_offset(offset);
            }
            _ => {}
        }
    }

    fn iq_data(&mut self, trx: u32, sample_rate: usize, data: &[f32]) {
        if trx != self.trx {
            return;
        }
        if !self.started {
            self.receiver.start(sample_rate, data.len() / 2);
            self.started = true;
        }
        self.receiver.iq_data(sample_rate, data.to_vec());
    }
}

// Mirrors this station's spots into the TCI server's band map.
struct TciSpotReporter {
    client: Arc<tci::Client>,
}

impl Reporter for TciSpotReporter {
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
        self.client
            .add_spot(callsign, "CW", frequency, tci::SPOT_COLOR, "sdrainer");
    }

    fn spot_timeout(&self, _listener: &str, callsign: &str, _frequency: f64) {
        self.client.delete_spot(callsign);
    }
}

fn run_strain_tci(
    args: &Args,
    strain: &crate::cli::StrainArgs,
    host: &str,
    trx: u32,
) -> anyhow::Result<()> {
    let receiver = new_receiver(args, ReceiverMode::Strain);
    let spotter = start_spotter(strain, &receiver)?;
    configure_strain(&receiver, strain);

    let handler = TciReceiverHandler {
        receiver: Arc::clone(&receiver),
        trx,
        started: false,
    };
    let client = Arc::new(
        tci::Client::open(host, Box::new(handler))
            .with_context(|| format!("cannot connect to TCI host {}", host))?,
    );
    receiver.add_reporter(Box::new(TciSpotReporter {
        client: Arc::clone(&client),
    }));

    client.set_iq_sample_rate(IQ_SAMPLE_RATE);
    client.start_iq(trx);

    wait_for_shutdown()?;

    client.stop_iq(trx);
    client.close();
    receiver.stop();
    spotter.stop();
    Ok(())
}

// Feeds KiwiSDR IQ frames into the receiver.
struct KiwiReceiverHandler {
    receiver: Arc<Receiver>,
    started: bool,
}

impl sdrain::kiwi::KiwiHandler for KiwiReceiverHandler {
    fn connected(&mut self, sample_rate: usize) {
        info!("KiwiSDR is connected, audio rate {}", sample_rate);
    }

    fn iq_data(&mut self, sample_rate: usize, data: &[f32]) {
        if data.is_empty() {
            return;
        }
        if !self.started {
            self.receiver.start(sample_rate, data.len() / 2);
            self.started = true;
        }
        self.receiver.iq_data(sample_rate, data.to_vec());
    }
}

#[allow(clippy::too_many_arguments)]
fn run_strain_kiwi(
    args: &Args,
    strain: &crate::cli::StrainArgs,
    host: &str,
    username: &str,
    password: &str,
    center: f64,
    rx: f64,
    bandwidth: usize,
) -> anyhow::Result<()> {
    let receiver = new_receiver(args, ReceiverMode::Strain);
    let spotter = start_spotter(strain, &receiver)?;
    configure_strain(&receiver, strain);
    receiver.set_center_frequency(center);
    if rx != 0.0 {
        receiver.set_vfo_offset(rx - center);
    }

    let handler = KiwiReceiverHandler {
        receiver: Arc::clone(&receiver),
        started: false,
    };
    let client =
        sdrain::kiwi::Client::open(host, username, password, center, bandwidth, Box::new(handler))
            .with_context(|| format!("cannot connect to KiwiSDR {}", host))?;

    wait_for_shutdown()?;

    client.close();
    receiver.stop();
    spotter.stop();
    Ok(())
}

fn run_decode_tci(args: &Args, debounce: usize, host: &str, trx: u32) -> anyhow::Result<()> {
    let receiver = new_receiver(args, ReceiverMode::Decode);
    receiver.set_signal_debounce(debounce);

    let handler = TciReceiverHandler {
        receiver: Arc::clone(&receiver),
        trx,
        started: false,
    };
    let client = Arc::new(
        tci::Client::open(host, Box::new(handler))
            .with_context(|| format!("cannot connect to TCI host {}", host))?,
    );

    client.set_iq_sample_rate(IQ_SAMPLE_RATE);
    client.start_iq(trx);

    wait_for_shutdown()?;

    client.stop_iq(trx);
    client.close();
    receiver.stop();
    Ok(())
}

fn run_decode_pulse(debounce: usize, pitch: f64) -> anyhow::Result<()> {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("no default audio input device"))?;
    let config = device
        .default_input_config()
        .context("cannot query the default input configuration")?;
    let sample_rate = config.sample_rate().0 as usize;
    let channels = config.channels() as usize;
    info!(
        "decoding {:.0}Hz from {:?} at {} Hz, {} channels",
        pitch,
        device.name().unwrap_or_else(|_| "unknown".to_string()),
        sample_rate,
        channels
    );

    let demodulator = Arc::new(AudioDemodulator::new(
        std::io::stdout(),
        pitch,
        sample_rate,
        0,
    ));
    demodulator.set_channel_count(channels);
    demodulator.set_debounce_threshold(debounce);

    let stream_demodulator = Arc::clone(&demodulator);
    let err_fn = |err| warn!("audio input error: {}", err);
    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config.into(),
            move |data: &[f32], _| stream_demodulator.write(data),
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config.into(),
            move |data: &[i16], _| {
                let samples: Vec<f32> =
                    data.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
                stream_demodulator.write(&samples);
            },
            err_fn,
            None,
        ),
        cpal::SampleFormat::U16 => device.build_input_stream(
            &config.into(),
            move |data: &[u16], _| {
                let samples: Vec<f32> = data
                    .iter()
                    .map(|&s| (s as f32 - 32768.0) / 32768.0)
                    .collect();
                stream_demodulator.write(&samples);
            },
            err_fn,
            None,
        ),
        format => return Err(anyhow!("unsupported sample format: {:?}", format)),
    }
    .context("cannot open the audio input stream")?;
    stream.play().context("cannot start the audio input")?;

    wait_for_shutdown()?;

    drop(stream);
    demodulator.close();
    Ok(())
}

// Block until SIGINT/SIGTERM; a second signal forces an immediate exit.
fn wait_for_shutdown() -> anyhow::Result<()> {
    let (tx, rx) = std::sync::mpsc::channel();
    let count = AtomicUsize::new(0);
    ctrlc::set_handler(move || {
        if count.fetch_add(1, Ordering::SeqCst) == 0 {
            let _ = tx.send(());
        } else {
            warn!("hard shutdown");
            std::process::exit(1);
        }
    })
    .context("cannot install the signal handler")?;

    rx.recv().ok();
    info!("shutting down");
    Ok(())
}
