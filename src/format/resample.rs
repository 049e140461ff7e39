//! Sample rate conversion.
//!
//! Linear interpolation, carried across calls so that a stream cut into
//! frames resamples the same as the stream in one piece.

/// Streaming linear-interpolation resampler for one channel.
///
/// Positions are kept as exact fractions of `1 / to_rate` input samples, so
/// long streams do not drift.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    from_rate: u32,
    to_rate: u32,
    /// Position of the next output sample in units of `1 / to_rate`.
    /// Index 0 is `last` when present.
    position: u64,
    last: Option<i16>,
}

impl LinearResampler {
    /// Creates a resampler between two rates.
    ///
    /// Both rates must be non-zero.
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            from_rate: from_rate.max(1),
            to_rate: to_rate.max(1),
            position: 0,
            last: None,
        }
    }

    /// Source rate in Hz.
    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    /// Target rate in Hz.
    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Returns `true` when no conversion happens.
    pub fn is_passthrough(&self) -> bool {
        self.from_rate == self.to_rate
    }

    /// Resamples the next block of the stream.
    ///
    /// Output samples that need input beyond the end of `input` are produced
    /// by the following call.
    pub fn process(&mut self, input: &[i16]) -> Vec<i16> {
        if self.is_passthrough() {
            return input.to_vec();
        }
        if input.is_empty() {
            return Vec::new();
        }

        let mut extended = Vec::with_capacity(input.len() + 1);
        if let Some(last) = self.last {
            extended.push(last);
        }
        extended.extend_from_slice(input);

        let to = u64::from(self.to_rate);
        let step = u64::from(self.from_rate);
        let limit = (extended.len() as u64 - 1) * to;
        let mut output = Vec::with_capacity((input.len() as u64 * to / step) as usize + 1);
        while self.position < limit {
            let idx = (self.position / to) as usize;
            let rem = (self.position % to) as i64;
            let s1 = i64::from(extended[idx]);
            let s2 = i64::from(extended[idx + 1]);
            let scaled = s1 * to as i64 + (s2 - s1) * rem;
            output.push((scaled as f64 / to as f64).round() as i16);
            self.position += step;
        }

        // The final input sample becomes index 0 of the next block.
        self.position -= limit;
        self.last = extended.last().copied();
        output
    }

    /// Forgets stream history.
    pub fn reset(&mut self) {
        self.position = 0;
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resample_same_rate() {
        let mut r = LinearResampler::new(16000, 16000);
        assert!(r.is_passthrough());
        assert_eq!(r.process(&[100, 200, 300]), vec![100, 200, 300]);
    }

    #[test]
    fn test_resample_empty() {
        let mut r = LinearResampler::new(48000, 16000);
        assert!(r.process(&[]).is_empty());
    }

    #[test]
    fn test_resample_downsample_ratio() {
        // 48kHz to 16kHz = 3:1
        let mut r = LinearResampler::new(48000, 16000);
        let samples: Vec<i16> = (0..480).map(|i| (i * 10) as i16).collect();
        let out = r.process(&samples);
        assert_eq!(out.len(), 160);
        assert_eq!(out[0], 0);
        assert_eq!(out[1], 30);
    }

    #[test]
    fn test_resample_upsample_interpolates() {
        let mut r = LinearResampler::new(8000, 16000);
        let out = r.process(&[0, 100, 200, 300]);
        // The last input sample waits for the next block.
        assert_eq!(out, vec![0, 50, 100, 150, 200, 250]);
        let out = r.process(&[400]);
        assert_eq!(out, vec![300, 350]);
    }

    #[test]
    fn test_resample_block_split_matches_whole() {
        let samples: Vec<i16> = (0..96).map(|i| ((i * 37) % 500) as i16).collect();

        let mut whole = LinearResampler::new(8000, 48000);
        let expected = whole.process(&samples);

        let mut split = LinearResampler::new(8000, 48000);
        let mut actual = Vec::new();
        for block in samples.chunks(20) {
            actual.extend(split.process(block));
        }
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_resample_long_run_length() {
        // 160 samples at 8kHz per 20ms, 960 at 48kHz
        let mut r = LinearResampler::new(8000, 48000);
        let mut total = 0;
        for _ in 0..50 {
            total += r.process(&[0i16; 160]).len();
        }
        // One input sample of lookahead is held back.
        assert_eq!(total, 50 * 960 - 6);
    }

    #[test]
    fn test_reset_clears_history() {
        let mut r = LinearResampler::new(8000, 16000);
        r.process(&[1000, 1000]);
        r.reset();
        assert_eq!(r.process(&[0, 0])[0], 0);
    }
}
