//! Streaming linear resampler
//!
//! Capture callbacks arrive in arbitrary block sizes at the device's native
//! rate. The resampler keeps its fractional read position and the last input
//! sample between calls so consecutive blocks join without discontinuity.

/// Linear-interpolation resampler that carries phase across blocks
#[derive(Debug, Clone)]
pub struct StreamResampler {
    from_rate: u32,
    to_rate: u32,
    /// Input samples consumed per output sample
    step: f64,
    /// Read position relative to the start of the next block; -1.0 refers
    /// to `last`
    position: f64,
    /// Final sample of the previous block
    last: Option<f32>,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            from_rate,
            to_rate,
            step: from_rate as f64 / to_rate as f64,
            position: 0.0,
            last: None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.from_rate == self.to_rate
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Resample one block, appending to `out`
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        if input.is_empty() {
            return;
        }
        if self.is_passthrough() {
            out.extend_from_slice(input);
            return;
        }

        let sample_at = |index: isize| -> f32 {
            if index < 0 {
                self.last.unwrap_or(input[0])
            } else {
                input[index as usize]
            }
        };

        let end = (input.len() - 1) as f64;
        let mut position = self.position;
        while position <= end {
            let base = position.floor();
            let frac = (position - base) as f32;
            let i0 = base as isize;
            let s0 = sample_at(i0);
            // At the block's final index frac is zero and the next sample
            // belongs to the following block
            let s1 = if (i0 + 1) as f64 > end { s0 } else { sample_at(i0 + 1) };
            out.push(s0 + (s1 - s0) * frac);
            position += self.step;
        }

        self.position = position - input.len() as f64;
        self.last = input.last().copied();
    }

    /// Forget carried state (used when a capture restarts)
    pub fn reset(&mut self) {
        self.position = 0.0;
        self.last = None;
    }
}

/// Average interleaved frames down to one channel
pub fn downmix_to_mono(interleaved: &[f32], channels: u16, out: &mut Vec<f32>) {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        out.extend_from_slice(interleaved);
        return;
    }
    out.extend(
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough() {
        let mut resampler = StreamResampler::new(16000, 16000);
        let mut out = Vec::new();
        resampler.process(&[0.1, 0.2, 0.3], &mut out);
        assert_eq!(out, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_downsample_by_three() {
        let mut resampler = StreamResampler::new(48000, 16000);
        let input: Vec<f32> = (0..480).map(|i| i as f32).collect();
        let mut out = Vec::new();
        resampler.process(&input, &mut out);
        assert_eq!(out.len(), 160);
        assert_eq!(out[0], 0.0);
        assert_eq!(out[1], 3.0);
        assert_eq!(out[159], 477.0);
    }

    #[test]
    fn test_block_boundaries_are_seamless() {
        let input: Vec<f32> = (0..1000).map(|i| (i as f32 * 0.01).sin()).collect();

        let mut whole = StreamResampler::new(44100, 16000);
        let mut expected = Vec::new();
        whole.process(&input, &mut expected);

        let mut split = StreamResampler::new(44100, 16000);
        let mut actual = Vec::new();
        for block in input.chunks(37) {
            split.process(block, &mut actual);
        }

        assert_eq!(expected.len(), actual.len());
        for (a, b) in expected.iter().zip(actual.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_upsample_interpolates() {
        let mut resampler = StreamResampler::new(24000, 48000);
        let mut out = Vec::new();
        resampler.process(&[0.0, 1.0], &mut out);
        assert_eq!(out, vec![0.0, 0.5, 1.0]);
        resampler.process(&[0.0], &mut out);
        assert_eq!(out, vec![0.0, 0.5, 1.0, 0.5, 0.0]);
    }

    #[test]
    fn test_downmix() {
        let mut out = Vec::new();
        downmix_to_mono(&[1.0, 0.0, 0.5, 0.5], 2, &mut out);
        assert_eq!(out, vec![0.5, 0.5]);
    }
}
