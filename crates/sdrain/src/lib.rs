//! # sdrain: CW skimming for SDR I/Q streams
//!
//! This crate turns a stream of complex baseband (I/Q) samples into callsign
//! spots. It watches the captured spectrum for narrow-band CW (Morse)
//! signals, demodulates every detected signal in parallel, decodes the
//! on/off keying into text, and reports candidate callsigns with a
//! confidence weighting.
//!
//! The pipeline, front to back:
//!
//! 1. FFT spectral analysis with noise-floor estimation
//!    ([`dsp`](mod@crate::dsp))
//! 2. peak discovery over a cumulated spectrum and a bin-indexed peak
//!    registry ([`rx::PeaksTable`])
//! 3. a bounded pool of listeners, each running a spectral demodulator and
//!    an adaptive-timing Morse decoder ([`rx::ListenerPool`], [`cw`])
//! 4. a text post-processor that extracts callsigns from the decoded
//!    character stream and fires spots ([`rx::TextProcessor`])
//!
//! The [`rx::Receiver`] owns all of this and runs it on a single loop
//! thread. Transports push I/Q frames in with [`rx::Receiver::iq_data`];
//! spots come back out through a [`rx::Reporter`].
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sdrain::clock::WallClock;
//! use sdrain::rx::{Receiver, ReceiverMode, TextReporter};
//!
//! let rx = Receiver::new("rx0", ReceiverMode::Strain, Arc::new(WallClock));
//! rx.add_reporter(TextReporter::stdout());
//! rx.set_center_frequency(7_020_000.0);
//! rx.start(48_000, 2048);
//!
//! // let frames be interleaved I/Q sample buffers from your SDR client
//! # let frames: Vec<Vec<f32>> = vec![];
//! for frame in frames {
//!     rx.iq_data(48_000, frame);
//! }
//!
//! rx.stop();
//! ```
//!
//! An equivalent audio-domain path exists for decoding a single tone from a
//! sound card: [`cw::AudioDemodulator`] runs a Goertzel detector and the
//! same decoder on PCM samples.
//!
//! Everything that deals with time consults an injected [`clock::Clock`],
//! so timeout behavior is deterministic under test.

pub mod call;
pub mod clock;
pub mod cw;
pub mod dsp;
pub mod kiwi;
pub mod rx;
pub mod tci;
pub mod telnet;
pub mod trace;
