//! Property tests for the RTP wire codec and sequence ordering.

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;

use softsip_rtp_core::jbuf::{JitterBuffer, JitterBufferConfig};
use softsip_rtp_core::packet::{RtpHeader, RtpPacket};
use softsip_rtp_core::seq_less;

proptest! {
    #[test]
    fn header_roundtrips(
        pt in 0u8..=127,
        seq in any::<u16>(),
        ts in any::<u32>(),
        ssrc in any::<u32>(),
        marker in any::<bool>(),
        payload in proptest::collection::vec(any::<u8>(), 0..512),
    ) {
        let mut header = RtpHeader::new(pt, seq, ts, ssrc);
        header.marker = marker;
        let packet = RtpPacket::new(header, Bytes::from(payload.clone()));

        let wire = packet.serialize().freeze();
        let parsed = RtpPacket::parse(&wire).unwrap();

        prop_assert_eq!(parsed.header.payload_type, pt);
        prop_assert_eq!(parsed.header.sequence, seq);
        prop_assert_eq!(parsed.header.timestamp, ts);
        prop_assert_eq!(parsed.header.ssrc, ssrc);
        prop_assert_eq!(parsed.header.marker, marker);
        prop_assert_eq!(&parsed.payload[..], &payload[..]);
    }

    #[test]
    fn seq_order_is_antisymmetric(a in any::<u16>(), b in any::<u16>()) {
        if a == b {
            prop_assert!(!seq_less(a, b));
            prop_assert!(!seq_less(b, a));
        } else {
            // exactly one direction holds unless the distance is 2^15
            let both = seq_less(a, b) && seq_less(b, a);
            let neither = !seq_less(a, b) && !seq_less(b, a);
            prop_assert!(!both);
            if neither {
                prop_assert_eq!(b.wrapping_sub(a), 0x8000);
            }
        }
    }

    #[test]
    fn drained_sequences_strictly_increase(
        start in any::<u16>(),
        order in proptest::collection::vec(0u16..32, 1..32),
    ) {
        let mut jb = JitterBuffer::new(JitterBufferConfig {
            min_depth: 1,
            max_depth: 64,
        });

        for offset in &order {
            let seq = start.wrapping_add(*offset);
            let header = RtpHeader::new(0, seq, *offset as u32 * 160, 0x7777);
            let _ = jb.put(header, BytesMut::new().freeze());
        }

        // whatever was admitted comes out wrap-aware strictly increasing
        let mut last: Option<u16> = None;
        while let Some((header, _)) = jb.get() {
            if let Some(last) = last {
                prop_assert!(seq_less(last, header.sequence));
            }
            last = Some(header.sequence);
        }
    }
}
