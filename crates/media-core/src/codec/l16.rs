//! L16: uncompressed 16-bit linear PCM, network byte order (RFC 3551)

use super::{AudioCodec, AudioCodecInfo, AudioDecoder, AudioEncoder};
use crate::error::Error;
use crate::types::AudioParams;
use crate::Result;

/// L16 codec descriptor
pub struct L16Codec {
    info: AudioCodecInfo,
}

impl L16Codec {
    /// 8 kHz mono variant (dynamic payload type)
    pub fn mono_8k() -> Self {
        Self {
            info: AudioCodecInfo {
                name: "L16",
                clock_rate: 8000,
                channels: 1,
                static_pt: None,
                default_fmtp: None,
            },
        }
    }

    /// 44.1 kHz stereo variant (static payload type 10)
    pub fn stereo_44k() -> Self {
        Self {
            info: AudioCodecInfo {
                name: "L16",
                clock_rate: 44_100,
                channels: 2,
                static_pt: Some(10),
                default_fmtp: None,
            },
        }
    }
}

impl AudioCodec for L16Codec {
    fn info(&self) -> &AudioCodecInfo {
        &self.info
    }

    fn encoder(&self, _params: &AudioParams, _fmtp: Option<&str>) -> Result<Box<dyn AudioEncoder>> {
        Ok(Box::new(L16State))
    }

    fn decoder(&self, _fmtp: Option<&str>) -> Result<Box<dyn AudioDecoder>> {
        Ok(Box::new(L16State))
    }
}

struct L16State;

impl AudioEncoder for L16State {
    fn encode(&mut self, samples: &[i16], out: &mut [u8]) -> Result<usize> {
        let required = samples.len() * 2;
        if out.len() < required {
            return Err(Error::InsufficientBuffer {
                required,
                available: out.len(),
            });
        }

        for (sample, chunk) in samples.iter().zip(out.chunks_exact_mut(2)) {
            chunk.copy_from_slice(&sample.to_be_bytes());
        }

        Ok(required)
    }
}

impl AudioDecoder for L16State {
    fn decode(&mut self, data: &[u8], out: &mut [i16]) -> Result<usize> {
        if data.is_empty() || data.len() % 2 != 0 {
            return Err(Error::BadInput(format!(
                "L16 packet of {} bytes",
                data.len()
            )));
        }

        let count = data.len() / 2;
        if out.len() < count {
            return Err(Error::InsufficientBuffer {
                required: count,
                available: out.len(),
            });
        }

        for (chunk, sample) in data.chunks_exact(2).zip(out.iter_mut()) {
            *sample = i16::from_be_bytes([chunk[0], chunk[1]]);
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_exact() {
        let codec = L16Codec::mono_8k();
        let params = AudioParams::new(8000, 1, 20);
        let mut encoder = codec.encoder(&params, None).unwrap();
        let mut decoder = codec.decoder(None).unwrap();

        let samples: Vec<i16> = (0..160).map(|i| (i * 201 - 16_000) as i16).collect();
        let mut packet = [0u8; 320];
        assert_eq!(encoder.encode(&samples, &mut packet).unwrap(), 320);

        let mut decoded = [0i16; 160];
        assert_eq!(decoder.decode(&packet, &mut decoded).unwrap(), 160);
        assert_eq!(&decoded[..], &samples[..]);
    }

    #[test]
    fn test_network_byte_order() {
        let codec = L16Codec::mono_8k();
        let params = AudioParams::new(8000, 1, 20);
        let mut encoder = codec.encoder(&params, None).unwrap();

        let mut packet = [0u8; 2];
        encoder.encode(&[0x1234], &mut packet).unwrap();
        assert_eq!(packet, [0x12, 0x34]);
    }

    #[test]
    fn test_odd_length_rejected() {
        let codec = L16Codec::mono_8k();
        let mut decoder = codec.decoder(None).unwrap();
        let mut out = [0i16; 4];
        assert!(decoder.decode(&[1, 2, 3], &mut out).is_err());
    }
}
