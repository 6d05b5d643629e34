//! Linear sample-rate converter
//!
//! Interposed between the device rate and the codec rate when they
//! differ. Linear interpolation is sufficient for speech-band material;
//! channel count is preserved.

use crate::error::Error;
use crate::Result;

/// Sample-rate converter for interleaved 16-bit PCM
pub struct Resampler {
    in_rate: u32,
    out_rate: u32,
    channels: usize,
}

impl Resampler {
    /// Create a converter between the given rates
    pub fn new(in_rate: u32, out_rate: u32, channels: u8) -> Result<Self> {
        if in_rate == 0 || out_rate == 0 || channels == 0 {
            return Err(Error::BadInput(format!(
                "resampler rates {}->{} ch {}",
                in_rate, out_rate, channels
            )));
        }
        Ok(Self {
            in_rate,
            out_rate,
            channels: channels as usize,
        })
    }

    /// Number of output samples produced for `input_samples` input samples
    pub fn output_len(&self, input_samples: usize) -> usize {
        let frames = input_samples / self.channels;
        let out_frames = frames * self.out_rate as usize / self.in_rate as usize;
        out_frames * self.channels
    }

    /// Convert one frame; returns the number of samples written to `out`
    pub fn process(&mut self, input: &[i16], out: &mut [i16]) -> Result<usize> {
        if input.len() % self.channels != 0 {
            return Err(Error::BadInput("input not frame-aligned".into()));
        }

        let in_frames = input.len() / self.channels;
        let out_frames = in_frames * self.out_rate as usize / self.in_rate as usize;
        let required = out_frames * self.channels;
        if out.len() < required {
            return Err(Error::InsufficientBuffer {
                required,
                available: out.len(),
            });
        }
        if in_frames == 0 {
            return Ok(0);
        }

        for frame in 0..out_frames {
            // fixed-point source position in 16.16
            let pos = ((frame as u64 * self.in_rate as u64) << 16) / self.out_rate as u64;
            let index = (pos >> 16) as usize;
            let frac = (pos & 0xffff) as i64;

            for ch in 0..self.channels {
                let a = input[index * self.channels + ch] as i64;
                let b = if index + 1 < in_frames {
                    input[(index + 1) * self.channels + ch] as i64
                } else {
                    a
                };
                out[frame * self.channels + ch] = (a + ((b - a) * frac >> 16)) as i16;
            }
        }

        Ok(required)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsample_doubles_length() {
        let mut rs = Resampler::new(8000, 16_000, 1).unwrap();
        let input: Vec<i16> = (0..160).map(|i| i as i16).collect();
        let mut out = vec![0i16; 320];
        let n = rs.process(&input, &mut out).unwrap();
        assert_eq!(n, 320);
    }

    #[test]
    fn test_downsample_halves_length() {
        let mut rs = Resampler::new(16_000, 8000, 1).unwrap();
        let input = vec![100i16; 320];
        let mut out = vec![0i16; 160];
        let n = rs.process(&input, &mut out).unwrap();
        assert_eq!(n, 160);
        // constant input stays constant
        assert!(out.iter().all(|&s| s == 100));
    }

    #[test]
    fn test_identity_rate_is_passthrough() {
        let mut rs = Resampler::new(8000, 8000, 1).unwrap();
        let input: Vec<i16> = (0..160).map(|i| (i * 7) as i16).collect();
        let mut out = vec![0i16; 160];
        rs.process(&input, &mut out).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn test_interpolation_monotonic_on_ramp() {
        let mut rs = Resampler::new(8000, 16_000, 1).unwrap();
        let input: Vec<i16> = (0..100).map(|i| (i * 100) as i16).collect();
        let mut out = vec![0i16; 200];
        let n = rs.process(&input, &mut out).unwrap();
        for pair in out[..n].windows(2) {
            assert!(pair[1] >= pair[0]);
        }
    }

    #[test]
    fn test_stereo_preserves_channels() {
        let mut rs = Resampler::new(8000, 16_000, 2).unwrap();
        // left = 1000, right = -1000
        let input: Vec<i16> = (0..160).map(|i| if i % 2 == 0 { 1000 } else { -1000 }).collect();
        let mut out = vec![0i16; 320];
        let n = rs.process(&input, &mut out).unwrap();
        assert_eq!(n, 320);
        for frame in out.chunks(2) {
            assert_eq!(frame[0], 1000);
            assert_eq!(frame[1], -1000);
        }
    }

    #[test]
    fn test_invalid_params() {
        assert!(Resampler::new(0, 8000, 1).is_err());
        assert!(Resampler::new(8000, 8000, 0).is_err());
    }
}
