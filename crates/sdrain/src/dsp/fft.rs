//! FFT spectral analysis for interleaved I/Q buffers

use std::sync::Arc;

use num_complex::Complex32;
use rustfft::FftPlanner;

/// FFT workspace
///
/// Converts an interleaved I/Q buffer of `2·N` floats into two length-`N`
/// blocks indexed by DC-centered bin (bin 0 is the lowest frequency of the
/// captured band): a spectrum produced by the caller's `projection` of each
/// FFT value, and the power spectral density `|X|²`.
///
/// The workspace reuses its FFT plan and buffers across calls as long as
/// the block size does not change.
pub struct Fft {
    planner: FftPlanner<f32>,
    plan: Option<Arc<dyn rustfft::Fft<f32>>>,
    samples: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl Fft {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
            plan: None,
            samples: Vec::new(),
            scratch: Vec::new(),
        }
    }

    /// Transform I/Q samples into a spectrum and a PSD block
    ///
    /// `iq_samples` contains interleaved I,Q pairs; the block size is
    /// `iq_samples.len() / 2`. Both output slices must have exactly the
    /// block size; a mismatch is a programming error and panics.
    pub fn iq_to_spectrum_and_psd(
        &mut self,
        spectrum: &mut [f32],
        psd: &mut [f32],
        iq_samples: &[f32],
        projection: impl Fn(Complex32, usize) -> f32,
    ) {
        let block_size = iq_samples.len() / 2;
        assert_eq!(
            spectrum.len(),
            block_size,
            "the spectrum block must have the same length as the FFT's result"
        );
        assert_eq!(
            psd.len(),
            block_size,
            "the PSD block must have the same length as the FFT's result"
        );

        self.set_samples_from_iq(iq_samples);

        let plan_fits = matches!(&self.plan, Some(plan) if plan.len() == block_size);
        if !plan_fits {
            let plan = self.planner.plan_fft_forward(block_size);
            self.scratch
                .resize(plan.get_inplace_scratch_len(), Complex32::default());
            self.plan = Some(plan);
        }
        let plan = Arc::clone(self.plan.as_ref().expect("plan was just created"));
        plan.process_with_scratch(&mut self.samples, &mut self.scratch);

        for (bin, value) in self.samples.iter().enumerate() {
            let k = bin_to_spectrum_index(bin, block_size);
            spectrum[k] = projection(*value, block_size);
            psd[k] = value.norm_sqr();
        }
    }

    fn set_samples_from_iq(&mut self, iq_samples: &[f32]) {
        let sample_count = iq_samples.len() / 2;
        self.samples.clear();
        self.samples.extend(
            iq_samples
                .chunks_exact(2)
                .take(sample_count)
                .map(|iq| Complex32::new(iq[0], iq[1])),
        );
    }
}

impl Default for Fft {
    fn default() -> Self {
        Self::new()
    }
}

// Swap the halves of the raw FFT output so that bin 0 of the emitted
// blocks is the lowest frequency.
fn bin_to_spectrum_index(bin: usize, block_size: usize) -> usize {
    (bin + block_size / 2) % block_size
}

/// Magnitude of one FFT value in dB
///
/// Computes `10·log10(20·|X|² / N²)`. Under normal SNR this is negative;
/// callers shift it by a constant (e.g. +120 dB) to keep spectra
/// non-negative.
pub fn magnitude_in_db(value: Complex32, block_size: usize) -> f32 {
    psd_value_in_db(value.norm_sqr(), block_size)
}

/// A raw PSD value in dB, using the same scaling as [`magnitude_in_db`]
pub fn psd_value_in_db(power: f32, block_size: usize) -> f32 {
    let n = block_size as f32;
    10.0 * (20.0 * power / (n * n)).log10()
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_bin_to_spectrum_index() {
        // lower half of the raw FFT is positive frequencies → upper half of
        // the spectrum, and vice versa
        assert_eq!(bin_to_spectrum_index(0, 8), 4);
        assert_eq!(bin_to_spectrum_index(3, 8), 7);
        assert_eq!(bin_to_spectrum_index(4, 8), 0);
        assert_eq!(bin_to_spectrum_index(7, 8), 3);
    }

    #[test]
    fn test_tone_lands_in_expected_bin() {
        const BLOCK_SIZE: usize = 512;
        const SAMPLE_RATE: f64 = 48_000.0;

        // a complex tone at +3 kHz: i = cos, q = sin
        let frequency = 3_000.0;
        let mut iq = Vec::with_capacity(2 * BLOCK_SIZE);
        for n in 0..BLOCK_SIZE {
            let phase = 2.0 * std::f64::consts::PI * frequency * n as f64 / SAMPLE_RATE;
            iq.push(phase.cos() as f32);
            iq.push(phase.sin() as f32);
        }

        let mut spectrum = vec![0.0f32; BLOCK_SIZE];
        let mut psd = vec![0.0f32; BLOCK_SIZE];
        let mut fft = Fft::new();
        fft.iq_to_spectrum_and_psd(&mut spectrum, &mut psd, &iq, magnitude_in_db);

        let expected_bin =
            BLOCK_SIZE / 2 + (frequency / (SAMPLE_RATE / BLOCK_SIZE as f64)).round() as usize;
        let (_, max_bin) = crate::dsp::range_max(&psd, 0, BLOCK_SIZE - 1);
        assert_eq!(max_bin, expected_bin);
    }

    #[test]
    fn test_psd_value_in_db() {
        // full-scale bin of a 512-point FFT: |X|² = N², power in dB is
        // 10·log10(20)
        assert_approx_eq!(psd_value_in_db(512.0 * 512.0, 512), 13.0103, 1.0e-3);
    }

    #[test]
    #[should_panic]
    fn test_length_mismatch_panics() {
        let mut fft = Fft::new();
        let mut spectrum = vec![0.0f32; 16];
        let mut psd = vec![0.0f32; 16];
        fft.iq_to_spectrum_and_psd(&mut spectrum, &mut psd, &[0.0; 64], magnitude_in_db);
    }
}
