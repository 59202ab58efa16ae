//! Goertzel single-tone filter
//!
//! A constant-coefficient recursive filter that measures the energy at one
//! pitch frequency; much cheaper than a full FFT when only a single bin is
//! of interest. Based on the classic embedded formulation, see
//! <https://www.embedded.com/the-goertzel-algorithm/> and
//! <https://www.embedded.com/single-tone-detection-with-the-goertzel-algorithm/>.

/// Default ratio of blocksize to sample rate
///
/// This is the duration in seconds covered by one filter block.
pub const DEFAULT_BLOCKSIZE_RATIO: f64 = 0.005;

/// Default threshold for the normalized magnitude to count as signal
pub const DEFAULT_MAGNITUDE_THRESHOLD: f64 = 0.75;

/// Goertzel filter to detect a specific pitch frequency
#[derive(Clone, Debug)]
pub struct Goertzel {
    blocksize: usize,
    sample_rate: usize,
    coeff: f64,

    magnitude_limit_low: f64,
    magnitude_limit: f64,
    magnitude_threshold: f64,
}

impl Goertzel {
    /// New filter with the [`DEFAULT_BLOCKSIZE_RATIO`]
    pub fn new(pitch: f64, sample_rate: usize) -> Self {
        Self::with_blocksize_ratio(pitch, sample_rate, DEFAULT_BLOCKSIZE_RATIO)
    }

    /// New filter to detect the given pitch frequency
    ///
    /// `blocksize_ratio` is `blocksize / sample_rate`, i.e. the duration in
    /// seconds that one filter block should cover. The actual block size is
    /// the best-fitting integer multiple of one pitch period.
    pub fn with_blocksize_ratio(pitch: f64, sample_rate: usize, blocksize_ratio: f64) -> Self {
        let blocksize = calculate_blocksize(pitch, sample_rate, blocksize_ratio);
        let bin_index = (0.5 + (blocksize as f64 * pitch / sample_rate as f64)) as u64;
        let omega = 2.0 * std::f64::consts::PI * bin_index as f64 / blocksize as f64;

        Self {
            blocksize,
            sample_rate,
            coeff: 2.0 * omega.cos(),

            // the magnitude values scale with the blocksize
            magnitude_limit_low: blocksize as f64 / 2.0,
            magnitude_limit: 0.0,
            magnitude_threshold: DEFAULT_MAGNITUDE_THRESHOLD,
        }
    }

    pub fn set_magnitude_threshold(&mut self, threshold: f64) {
        self.magnitude_threshold = threshold;
    }

    pub fn magnitude_threshold(&self) -> f64 {
        self.magnitude_threshold
    }

    /// Block size used for the given pitch and sample rate
    pub fn blocksize(&self) -> usize {
        self.blocksize
    }

    /// Duration of one filter block in seconds
    pub fn tick_seconds(&self) -> f64 {
        self.blocksize as f64 / self.sample_rate as f64
    }

    /// Magnitude of the pitch frequency in the given filter block
    pub fn magnitude(&self, block: &[f32]) -> f64 {
        let mut q1 = 0.0f64;
        let mut q2 = 0.0f64;
        for &sample in block {
            let q0 = self.coeff * q1 - q2 + sample as f64;
            q2 = q1;
            q1 = q0;
        }
        (q1 * q1 + q2 * q2 - q1 * q2 * self.coeff).sqrt()
    }

    /// Magnitude of the pitch frequency relative to the current limit
    ///
    /// The limit tracks the peak magnitude with a moving-average update and
    /// never drops below a floor of `blocksize / 2`. The normalized
    /// magnitude must exceed the magnitude threshold to detect the signal.
    pub fn normalized_magnitude(&mut self, block: &[f32]) -> f64 {
        let magnitude = self.magnitude(block);

        if magnitude > self.magnitude_limit_low {
            self.magnitude_limit += (magnitude - self.magnitude_limit) / 6.0;
        }
        if self.magnitude_limit < self.magnitude_limit_low {
            self.magnitude_limit = self.magnitude_limit_low;
        }

        magnitude / self.magnitude_limit
    }

    /// Detect the pitch in the given buffer
    ///
    /// Only the first `blocksize` samples of the buffer are used; the
    /// buffer must contain at least that many. Returns the normalized
    /// magnitude, the detected signal state, and the number of samples
    /// taken from the buffer.
    pub fn detect(&mut self, buf: &[f32]) -> (f64, bool, usize) {
        assert!(
            buf.len() >= self.blocksize,
            "buffer must contain at least {} samples",
            self.blocksize
        );

        let magnitude = self.normalized_magnitude(&buf[..self.blocksize]);
        let state = magnitude > self.magnitude_threshold;

        (magnitude, state, self.blocksize)
    }
}

fn calculate_blocksize(pitch: f64, sample_rate: usize, blocksize_ratio: f64) -> usize {
    let min_blocksize = (sample_rate as f64 / pitch).round();
    ((blocksize_ratio * sample_rate as f64) / min_blocksize).round() as usize
        * min_blocksize as usize
}
