//! G.711 audio codec: PCMU (µ-law) and PCMA (A-law)
//!
//! The fundamental telephony codec. 8 kHz mono, one byte per sample,
//! stateless in both directions.

use super::{AudioCodec, AudioCodecInfo, AudioDecoder, AudioEncoder};
use crate::error::Error;
use crate::types::AudioParams;
use crate::Result;

/// µ-law bias per G.711
const ULAW_BIAS: i32 = 0x84;

/// Largest magnitude the µ-law encoder accepts; clipping happens before
/// the bias is added so the segment search never sees bit 15
const ULAW_CLIP: i32 = 32_635;

/// Companding variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum G711Variant {
    /// µ-law (PCMU, payload type 0)
    MuLaw,
    /// A-law (PCMA, payload type 8)
    ALaw,
}

/// G.711 codec descriptor
pub struct G711Codec {
    info: AudioCodecInfo,
    variant: G711Variant,
}

impl G711Codec {
    /// The PCMU descriptor
    pub fn pcmu() -> Self {
        Self {
            info: AudioCodecInfo {
                name: "PCMU",
                clock_rate: 8000,
                channels: 1,
                static_pt: Some(0),
                default_fmtp: None,
            },
            variant: G711Variant::MuLaw,
        }
    }

    /// The PCMA descriptor
    pub fn pcma() -> Self {
        Self {
            info: AudioCodecInfo {
                name: "PCMA",
                clock_rate: 8000,
                channels: 1,
                static_pt: Some(8),
                default_fmtp: None,
            },
            variant: G711Variant::ALaw,
        }
    }
}

impl AudioCodec for G711Codec {
    fn info(&self) -> &AudioCodecInfo {
        &self.info
    }

    fn encoder(&self, _params: &AudioParams, _fmtp: Option<&str>) -> Result<Box<dyn AudioEncoder>> {
        Ok(Box::new(G711State {
            variant: self.variant,
        }))
    }

    fn decoder(&self, _fmtp: Option<&str>) -> Result<Box<dyn AudioDecoder>> {
        Ok(Box::new(G711State {
            variant: self.variant,
        }))
    }
}

struct G711State {
    variant: G711Variant,
}

impl AudioEncoder for G711State {
    fn encode(&mut self, samples: &[i16], out: &mut [u8]) -> Result<usize> {
        if out.len() < samples.len() {
            return Err(Error::InsufficientBuffer {
                required: samples.len(),
                available: out.len(),
            });
        }

        let compand = match self.variant {
            G711Variant::MuLaw => linear_to_ulaw,
            G711Variant::ALaw => linear_to_alaw,
        };
        for (sample, byte) in samples.iter().zip(out.iter_mut()) {
            *byte = compand(*sample);
        }

        Ok(samples.len())
    }
}

impl AudioDecoder for G711State {
    fn decode(&mut self, data: &[u8], out: &mut [i16]) -> Result<usize> {
        if data.is_empty() {
            return Err(Error::BadInput("empty G.711 packet".into()));
        }
        if out.len() < data.len() {
            return Err(Error::InsufficientBuffer {
                required: data.len(),
                available: out.len(),
            });
        }

        let expand = match self.variant {
            G711Variant::MuLaw => ulaw_to_linear,
            G711Variant::ALaw => alaw_to_linear,
        };
        for (byte, sample) in data.iter().zip(out.iter_mut()) {
            *sample = expand(*byte);
        }

        Ok(data.len())
    }
}

fn linear_to_ulaw(sample: i16) -> u8 {
    let sign = if sample < 0 { 0x80u8 } else { 0 };
    let magnitude = (sample as i32).abs().min(ULAW_CLIP) + ULAW_BIAS;

    let mut exponent = 7u8;
    let mut mask = 0x4000;
    while exponent > 0 && magnitude & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }

    let mantissa = ((magnitude >> (exponent + 3)) & 0x0f) as u8;
    !(sign | (exponent << 4) | mantissa)
}

fn ulaw_to_linear(byte: u8) -> i16 {
    let byte = !byte;
    let sign = byte & 0x80;
    let exponent = (byte >> 4) & 0x07;
    let mantissa = byte & 0x0f;

    let magnitude = (((mantissa as i32) << 3) + ULAW_BIAS) << exponent;
    let value = magnitude - ULAW_BIAS;

    if sign != 0 {
        -value as i16
    } else {
        value as i16
    }
}

fn linear_to_alaw(sample: i16) -> u8 {
    let sign = if sample >= 0 { 0x80u8 } else { 0 };
    let magnitude = (sample as i32).abs().min(0x7fff);

    let compressed = if magnitude < 0x100 {
        (magnitude >> 4) as u8
    } else {
        let mut exponent = 7u8;
        let mut mask = 0x4000;
        while exponent > 1 && magnitude & mask == 0 {
            exponent -= 1;
            mask >>= 1;
        }
        let mantissa = ((magnitude >> (exponent + 3)) & 0x0f) as u8;
        (exponent << 4) | mantissa
    };

    (sign | compressed) ^ 0x55
}

fn alaw_to_linear(byte: u8) -> i16 {
    let byte = byte ^ 0x55;
    let sign = byte & 0x80;
    let exponent = (byte >> 4) & 0x07;
    let mantissa = (byte & 0x0f) as i32;

    let magnitude = if exponent == 0 {
        (mantissa << 4) + 8
    } else {
        ((mantissa << 4) + 0x108) << (exponent - 1)
    };

    if sign != 0 {
        magnitude as i16
    } else {
        -magnitude as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ulaw_known_values() {
        // silence encodes to 0xff, full negative scale to 0x00 region
        assert_eq!(linear_to_ulaw(0), 0xff);
        assert_eq!(ulaw_to_linear(0xff), 0);
    }

    #[test]
    fn test_ulaw_roundtrip_tolerance() {
        for sample in (-32768..=32767).step_by(257) {
            let encoded = linear_to_ulaw(sample as i16);
            let decoded = ulaw_to_linear(encoded) as i32;
            let error = (decoded - sample).abs();
            // quantization error grows with magnitude; 3% is generous
            assert!(
                error <= 32 + (sample.abs() / 32),
                "sample {} decoded to {}",
                sample,
                decoded
            );
        }
    }

    #[test]
    fn test_full_scale_saturates() {
        // clipping region: near full scale must encode as maximum
        // amplitude, never wrap into the near-silence codes
        for sample in [i16::MAX, i16::MIN, 32_635, -32_635] {
            let decoded = ulaw_to_linear(linear_to_ulaw(sample));
            assert_eq!(decoded.signum(), sample.signum());
            assert!(
                decoded.abs() >= 32_000,
                "sample {} decoded to {}",
                sample,
                decoded
            );
        }

        for sample in [i16::MAX, i16::MIN] {
            let decoded = alaw_to_linear(linear_to_alaw(sample));
            assert_eq!(decoded.signum(), sample.signum());
            assert!(decoded.abs() >= 32_000);
        }
    }

    #[test]
    fn test_alaw_roundtrip_tolerance() {
        for sample in (-32768..=32767).step_by(263) {
            let encoded = linear_to_alaw(sample as i16);
            let decoded = alaw_to_linear(encoded) as i32;
            let error = (decoded - sample).abs();
            assert!(
                error <= 64 + (sample.abs() / 16),
                "sample {} decoded to {}",
                sample,
                decoded
            );
        }
    }

    #[test]
    fn test_encode_decode_frame() {
        let codec = G711Codec::pcma();
        let params = AudioParams::new(8000, 1, 20);
        let mut encoder = codec.encoder(&params, None).unwrap();
        let mut decoder = codec.decoder(None).unwrap();

        let samples: Vec<i16> = (0..160).map(|i| (i * 100) as i16).collect();
        let mut packet = [0u8; 160];
        let len = encoder.encode(&samples, &mut packet).unwrap();
        assert_eq!(len, 160);

        let mut decoded = [0i16; 160];
        let count = decoder.decode(&packet, &mut decoded).unwrap();
        assert_eq!(count, 160);
    }

    #[test]
    fn test_insufficient_buffer() {
        let codec = G711Codec::pcmu();
        let params = AudioParams::new(8000, 1, 20);
        let mut encoder = codec.encoder(&params, None).unwrap();

        let samples = [0i16; 160];
        let mut small = [0u8; 80];
        assert!(matches!(
            encoder.encode(&samples, &mut small),
            Err(Error::InsufficientBuffer { .. })
        ));
    }

    #[test]
    fn test_empty_packet_rejected() {
        let codec = G711Codec::pcmu();
        let mut decoder = codec.decoder(None).unwrap();
        let mut out = [0i16; 160];
        assert!(matches!(
            decoder.decode(&[], &mut out),
            Err(Error::BadInput(_))
        ));
    }
}
