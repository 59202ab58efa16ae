//! CW (Morse) decoding
//!
//! The heart of this module is the tick-driven [`Decoder`]: it receives a
//! boolean "signal present" state once per tick and turns edge timings into
//! characters, adapting to the sender's speed as it goes. Two demodulators
//! drive it:
//!
//! * [`SpectralDemodulator`] compares the magnitude of one FFT bin against
//!   the noise floor — this is the per-peak path used by the receiver.
//! * [`AudioDemodulator`] runs a Goertzel tone detector on PCM audio — the
//!   single-signal path for sound-card input.
//!
//! Both share the decoder and the boolean debouncer in front of it.

mod audio;
mod decoder;
mod spectral;
mod table;

pub use self::audio::AudioDemodulator;
pub use self::decoder::{AdaptiveThreshold, Decoder, DEFAULT_WPM};
pub use self::spectral::SpectralDemodulator;
pub use self::table::{code_entries, decode_table, CwChar, Symbol, MAX_SYMBOL_COUNT};
