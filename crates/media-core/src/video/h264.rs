//! H.264 RTP payload format (RFC 3984)
//!
//! Transmit splits an Annex B bitstream at its start codes and sends
//! each NAL as a single-NAL-unit packet, fragmenting oversized NALs
//! with FU-A. Receive reassembles the Annex B stream, re-inserting the
//! 00 00 01 start sequence before each NAL and reconstructing the NAL
//! header from the start fragment of an FU-A.

use bytes::{BufMut, Bytes, BytesMut};

use super::codec::{EncodedFrame, VideoDepacketizer, VideoPacketizer};
use crate::error::Error;
use crate::Result;

/// FU-A fragmentation NAL type
const NAL_FU_A: u8 = 28;

/// Supplemental Enhancement Information NAL type
const NAL_SEI: u8 = 6;

const START_CODE: [u8; 3] = [0, 0, 1];

/// Find the next 00 00 01 start sequence at or after `from`
fn find_start_code(data: &[u8], from: usize) -> Option<usize> {
    if data.len() < 3 {
        return None;
    }
    (from..data.len() - 2).find(|&i| data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1)
}

/// H.264 packetizer state
#[derive(Default)]
pub struct H264Packetizer;

impl H264Packetizer {
    fn send_nal(
        &self,
        hdr: u8,
        payload: &[u8],
        max_size: usize,
        last_nal: bool,
        emit: &mut dyn FnMut(bool, &[u8]) -> Result<()>,
    ) -> Result<()> {
        if payload.len() + 1 <= max_size {
            let mut packet = Vec::with_capacity(payload.len() + 1);
            packet.push(hdr);
            packet.extend_from_slice(payload);
            return emit(last_nal, &packet);
        }

        // FU-A fragmentation
        let nri = hdr & 0x60;
        let nal_type = hdr & 0x1f;
        let chunk = max_size - 2;

        let mut fu_indicator = nri | NAL_FU_A;
        let mut fu_header = 0x80 | nal_type; // S bit on the first fragment
        let mut rest = payload;
        let mut packet = Vec::with_capacity(max_size);

        while rest.len() > chunk {
            packet.clear();
            packet.push(fu_indicator);
            packet.push(fu_header);
            packet.extend_from_slice(&rest[..chunk]);
            emit(false, &packet)?;

            rest = &rest[chunk..];
            fu_header &= !0x80;
            fu_indicator = nri | NAL_FU_A;
        }

        fu_header |= 0x40; // E bit on the final fragment
        packet.clear();
        packet.push(fu_indicator);
        packet.push(fu_header);
        packet.extend_from_slice(rest);
        emit(last_nal, &packet)
    }
}

impl VideoPacketizer for H264Packetizer {
    fn packetize(
        &mut self,
        frame: &EncodedFrame,
        max_size: usize,
        emit: &mut dyn FnMut(bool, &[u8]) -> Result<()>,
    ) -> Result<()> {
        if max_size < 3 {
            return Err(Error::BadInput("H.264 max packet size too small".into()));
        }

        let data = &frame.data;
        let mut pos = match find_start_code(data, 0) {
            Some(pos) => pos,
            None => return Err(Error::BadInput("no start code in H.264 frame".into())),
        };

        while pos < data.len() {
            // skip the start code and any leading zeros
            let mut nal_start = pos + 3;
            while nal_start < data.len() && data[nal_start] == 0 {
                nal_start += 1;
            }
            if nal_start >= data.len() {
                break;
            }

            let nal_end = find_start_code(data, nal_start).unwrap_or(data.len());
            let hdr = data[nal_start];
            let payload = &data[nal_start + 1..nal_end];

            // SEI carries no picture data
            if hdr & 0x1f != NAL_SEI {
                let last = nal_end >= data.len();
                self.send_nal(hdr, payload, max_size, last, emit)?;
            }

            pos = nal_end;
        }

        Ok(())
    }
}

/// H.264 depacketizer state
#[derive(Default)]
pub struct H264Depacketizer {
    assembly: BytesMut,
}

impl VideoDepacketizer for H264Depacketizer {
    fn depacketize(&mut self, marker: bool, payload: &[u8]) -> Result<Option<Bytes>> {
        if payload.is_empty() {
            return Err(Error::BadInput("empty H.264 payload".into()));
        }

        let hdr = payload[0];
        if hdr & 0x80 != 0 {
            self.assembly.clear();
            return Err(Error::BadInput("H.264 forbidden bit set".into()));
        }

        let nal_type = hdr & 0x1f;
        match nal_type {
            1..=23 => {
                self.assembly.put_slice(&START_CODE);
                self.assembly.put_slice(payload);
            }
            NAL_FU_A => {
                if payload.len() < 2 {
                    self.assembly.clear();
                    return Err(Error::BadInput("truncated FU-A header".into()));
                }
                let fu = payload[1];
                let start = fu & 0x80 != 0;
                let orig_type = fu & 0x1f;

                if start {
                    // reconstruct the original NAL header
                    self.assembly.put_slice(&START_CODE);
                    self.assembly.put_u8((hdr & 0x60) | orig_type);
                }
                self.assembly.put_slice(&payload[2..]);
            }
            other => {
                self.assembly.clear();
                return Err(Error::BadInput(format!("unknown NAL type {}", other)));
            }
        }

        if marker {
            let frame = self.assembly.split().freeze();
            Ok(Some(frame))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annexb(nals: &[&[u8]]) -> EncodedFrame {
        let mut data = Vec::new();
        for nal in nals {
            data.extend_from_slice(&START_CODE);
            data.extend_from_slice(nal);
        }
        EncodedFrame {
            data,
            keyframe: false,
        }
    }

    fn collect_packets(frame: &EncodedFrame, max_size: usize) -> Vec<(bool, Vec<u8>)> {
        let mut packets = Vec::new();
        H264Packetizer
            .packetize(frame, max_size, &mut |last, data| {
                packets.push((last, data.to_vec()));
                Ok(())
            })
            .unwrap();
        packets
    }

    #[test]
    fn test_single_nal_packet() {
        let frame = annexb(&[&[0x65, 1, 2, 3, 4]]);
        let packets = collect_packets(&frame, 1024);

        assert_eq!(packets.len(), 1);
        let (last, data) = &packets[0];
        assert!(*last);
        assert_eq!(data, &vec![0x65, 1, 2, 3, 4]);
    }

    #[test]
    fn test_fu_a_fragmentation() {
        let payload: Vec<u8> = (0..100).collect();
        let mut nal = vec![0x65u8];
        nal.extend_from_slice(&payload);
        let frame = annexb(&[&nal]);

        let packets = collect_packets(&frame, 32);
        assert!(packets.len() > 1);

        // only the final packet carries the marker
        for (last, _) in &packets[..packets.len() - 1] {
            assert!(!*last);
        }
        assert!(packets.last().unwrap().0);

        // fragment headers: S on first, E on last, same type throughout
        let first = &packets[0].1;
        assert_eq!(first[0] & 0x1f, NAL_FU_A);
        assert_eq!(first[1] & 0x80, 0x80);
        assert_eq!(first[1] & 0x1f, 0x05);

        let final_packet = &packets.last().unwrap().1;
        assert_eq!(final_packet[1] & 0x40, 0x40);
    }

    #[test]
    fn test_packetize_depacketize_roundtrip() {
        let nal1 = {
            let mut v = vec![0x67u8];
            v.extend((0..20).map(|i| i as u8));
            v
        };
        let nal2 = {
            let mut v = vec![0x65u8];
            v.extend((0..300).map(|i| (i % 251) as u8));
            v
        };
        let frame = annexb(&[&nal1, &nal2]);

        let packets = collect_packets(&frame, 100);

        let mut depack = H264Depacketizer::default();
        let mut assembled = None;
        for (last, data) in &packets {
            if let Some(frame) = depack.depacketize(*last, data).unwrap() {
                assembled = Some(frame);
            }
        }

        let assembled = assembled.expect("frame assembled on marker");
        assert_eq!(&assembled[..], &frame.data[..]);
    }

    #[test]
    fn test_sei_skipped() {
        let frame = annexb(&[&[0x06, 9, 9], &[0x65, 1, 2]]);
        let packets = collect_packets(&frame, 1024);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].1[0], 0x65);
    }

    #[test]
    fn test_forbidden_bit_rejected() {
        let mut depack = H264Depacketizer::default();
        assert!(depack.depacketize(true, &[0x80 | 0x65, 1]).is_err());
    }

    #[test]
    fn test_unknown_nal_type_rejected() {
        let mut depack = H264Depacketizer::default();
        assert!(depack.depacketize(true, &[30, 1, 2]).is_err());
    }

    #[test]
    fn test_four_byte_start_codes_accepted() {
        let mut data = vec![0u8, 0, 0, 1, 0x65, 1, 2, 3];
        data.extend_from_slice(&[0, 0, 0, 1, 0x41, 4, 5]);
        let frame = EncodedFrame {
            data,
            keyframe: true,
        };

        let packets = collect_packets(&frame, 1024);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].1[0], 0x65);
        assert_eq!(packets[1].1[0], 0x41);
    }
}
