//! Generic DSP primitives
//!
//! Everything in here is independent of the CW decoding logic: FFT spectral
//! analysis, a Goertzel single-tone filter, rolling statistics, noise-floor
//! and peak searches over a spectrum, frequency⇄bin mapping, and a boolean
//! debouncer.
//!
//! Magnitude and power values are `f32`, frequencies are `f64` Hz.

mod debounce;
mod fft;
mod goertzel;
mod rolling;
mod spectrum;

pub use self::debounce::BoolDebouncer;
pub use self::fft::{magnitude_in_db, psd_value_in_db, Fft};
pub use self::goertzel::{Goertzel, DEFAULT_BLOCKSIZE_RATIO, DEFAULT_MAGNITUDE_THRESHOLD};
pub use self::rolling::{RollingHistory, RollingMean, RollingVariance};
pub use self::spectrum::{
    find_noise_floor, find_peaks, BinLocation, FrequencyMapping, Peak,
};

/// Sum of `block[from..=to]`
pub fn range_sum(block: &[f32], from: usize, to: usize) -> f32 {
    block[from..=to].iter().sum()
}

/// Mean of `block[from..=to]`
pub fn range_mean(block: &[f32], from: usize, to: usize) -> f32 {
    range_sum(block, from, to) / (to - from + 1) as f32
}

/// Maximum value in `block[from..=to]` and its index
pub fn range_max(block: &[f32], from: usize, to: usize) -> (f32, usize) {
    let mut max_value = block[from];
    let mut max_i = from;
    for (i, &v) in block.iter().enumerate().take(to + 1).skip(from) {
        if v > max_value {
            max_value = v;
            max_i = i;
        }
    }
    (max_value, max_i)
}

/// Maximum absolute sample value in `block`
pub fn peak_amplitude(block: &[f32]) -> f32 {
    block.iter().fold(0.0f32, |max, &s| f32::max(max, s.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_range_ops() {
        let block = [1.0f32, 2.0, 3.0, -4.0, 5.0];

        assert_approx_eq!(range_sum(&block, 0, 4), 7.0);
        assert_approx_eq!(range_sum(&block, 1, 2), 5.0);
        assert_approx_eq!(range_mean(&block, 0, 3), 0.5);
        assert_eq!(range_max(&block, 0, 4), (5.0, 4));
        assert_eq!(range_max(&block, 0, 3), (3.0, 2));
        assert_approx_eq!(peak_amplitude(&block), 5.0);
    }
}
