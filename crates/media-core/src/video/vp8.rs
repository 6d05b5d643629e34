//! VP8 RTP payload format (RFC 7741)
//!
//! Transmit prepends the one-byte payload descriptor, setting S on the
//! first packet of each frame. Receive strips the descriptor, including
//! the optional extension fields, and assembles until the marker.

use bytes::{BufMut, Bytes, BytesMut};

use super::codec::{EncodedFrame, VideoDepacketizer, VideoPacketizer};
use crate::error::Error;
use crate::Result;

/// VP8 packetizer state
#[derive(Default)]
pub struct Vp8Packetizer;

impl VideoPacketizer for Vp8Packetizer {
    fn packetize(
        &mut self,
        frame: &EncodedFrame,
        max_size: usize,
        emit: &mut dyn FnMut(bool, &[u8]) -> Result<()>,
    ) -> Result<()> {
        if max_size < 2 {
            return Err(Error::BadInput("VP8 max packet size too small".into()));
        }
        if frame.data.is_empty() {
            return Err(Error::BadInput("empty VP8 frame".into()));
        }

        let chunk = max_size - 1;
        let mut first = true;
        let mut rest = frame.data.as_slice();
        let mut packet = Vec::with_capacity(max_size);

        while !rest.is_empty() {
            let take = rest.len().min(chunk);
            let last = take == rest.len();

            packet.clear();
            // descriptor: S bit marks the start of the frame, PID 0
            packet.push(if first { 0x10 } else { 0x00 });
            packet.extend_from_slice(&rest[..take]);
            emit(last, &packet)?;

            rest = &rest[take..];
            first = false;
        }

        Ok(())
    }
}

/// Size of the payload descriptor at the front of `payload`
fn descriptor_len(payload: &[u8]) -> Result<usize> {
    if payload.is_empty() {
        return Err(Error::BadInput("empty VP8 payload".into()));
    }

    let b0 = payload[0];
    let mut len = 1;

    if b0 & 0x80 != 0 {
        // extension byte present
        if payload.len() < 2 {
            return Err(Error::BadInput("truncated VP8 descriptor".into()));
        }
        let ext = payload[1];
        len += 1;

        if ext & 0x80 != 0 {
            // PictureID, 7 or 15 bits
            if payload.len() <= len {
                return Err(Error::BadInput("truncated VP8 picture id".into()));
            }
            len += if payload[len] & 0x80 != 0 { 2 } else { 1 };
        }
        if ext & 0x40 != 0 {
            len += 1; // TL0PICIDX
        }
        if ext & 0x30 != 0 {
            len += 1; // TID / KEYIDX
        }
    }

    if payload.len() < len {
        return Err(Error::BadInput("truncated VP8 descriptor".into()));
    }
    Ok(len)
}

/// VP8 depacketizer state
#[derive(Default)]
pub struct Vp8Depacketizer {
    assembly: BytesMut,
    started: bool,
}

impl VideoDepacketizer for Vp8Depacketizer {
    fn depacketize(&mut self, marker: bool, payload: &[u8]) -> Result<Option<Bytes>> {
        let skip = descriptor_len(payload)?;
        let start = payload[0] & 0x10 != 0;

        if start {
            self.assembly.clear();
            self.started = true;
        }
        if !self.started {
            // fragment without a preceding start; wait for the next frame
            return Ok(None);
        }

        self.assembly.put_slice(&payload[skip..]);

        if marker {
            self.started = false;
            return Ok(Some(self.assembly.split().freeze()));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(len: usize) -> EncodedFrame {
        EncodedFrame {
            data: (0..len).map(|i| (i % 256) as u8).collect(),
            keyframe: false,
        }
    }

    fn collect_packets(frame: &EncodedFrame, max_size: usize) -> Vec<(bool, Vec<u8>)> {
        let mut packets = Vec::new();
        Vp8Packetizer
            .packetize(frame, max_size, &mut |last, data| {
                packets.push((last, data.to_vec()));
                Ok(())
            })
            .unwrap();
        packets
    }

    #[test]
    fn test_small_frame_single_packet() {
        let packets = collect_packets(&frame(50), 100);
        assert_eq!(packets.len(), 1);
        assert!(packets[0].0);
        assert_eq!(packets[0].1[0], 0x10); // S bit
        assert_eq!(packets[0].1.len(), 51);
    }

    #[test]
    fn test_fragmentation_sets_s_on_first_only() {
        let packets = collect_packets(&frame(250), 101);
        assert_eq!(packets.len(), 3);

        assert_eq!(packets[0].1[0], 0x10);
        assert_eq!(packets[1].1[0], 0x00);
        assert_eq!(packets[2].1[0], 0x00);

        assert!(!packets[0].0);
        assert!(!packets[1].0);
        assert!(packets[2].0);
    }

    #[test]
    fn test_roundtrip() {
        let original = frame(500);
        let packets = collect_packets(&original, 90);

        let mut depack = Vp8Depacketizer::default();
        let mut assembled = None;
        for (last, data) in &packets {
            if let Some(frame) = depack.depacketize(*last, data).unwrap() {
                assembled = Some(frame);
            }
        }
        assert_eq!(&assembled.unwrap()[..], &original.data[..]);
    }

    #[test]
    fn test_extended_descriptor_skipped() {
        let mut depack = Vp8Depacketizer::default();
        // X + S set, extension with 15-bit picture id, then payload
        let payload = [0x90u8, 0x80, 0x81, 0x23, 0xaa, 0xbb];
        let frame = depack.depacketize(true, &payload).unwrap().unwrap();
        assert_eq!(&frame[..], &[0xaa, 0xbb]);
    }

    #[test]
    fn test_mid_frame_join_waits_for_start() {
        let mut depack = Vp8Depacketizer::default();
        // no S bit and no prior start: ignored
        assert_eq!(depack.depacketize(false, &[0x00, 1, 2]).unwrap(), None);
        assert_eq!(depack.depacketize(true, &[0x00, 3, 4]).unwrap(), None);

        // next frame starts cleanly
        let frame = depack.depacketize(true, &[0x10, 9]).unwrap().unwrap();
        assert_eq!(&frame[..], &[9]);
    }

    #[test]
    fn test_truncated_descriptor_rejected() {
        let mut depack = Vp8Depacketizer::default();
        assert!(depack.depacketize(false, &[0x80]).is_err());
        assert!(depack.depacketize(false, &[]).is_err());
    }
}
