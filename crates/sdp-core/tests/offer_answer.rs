//! End-to-end offer/answer exchanges over serialized descriptions.

use std::net::IpAddr;

use proptest::prelude::*;

use softsip_sdp_core::negotiate::{build_answer_media, remote_endpoints};
use softsip_sdp_core::{MediaDescription, MediaDirection, MediaKind, SdpSession};

fn local_capabilities() -> MediaDescription {
    let mut audio = MediaDescription::new(MediaKind::Audio, 10_000);
    audio.add_format(Some(0), "PCMU", 8000, 1, None).unwrap();
    audio.add_format(Some(8), "PCMA", 8000, 1, None).unwrap();
    audio
        .add_format(Some(101), "telephone-event", 8000, 1, Some("0-15"))
        .unwrap();
    audio.ptime = Some(20);
    audio
}

#[test]
fn pcma_only_offer_gets_pcma_answer() {
    // remote advertises only PCMA; we support PCMU and PCMA
    let offer_text = "v=0\r\n\
                      o=bob 42 42 IN IP4 192.0.2.3\r\n\
                      s=-\r\n\
                      c=IN IP4 192.0.2.3\r\n\
                      t=0 0\r\n\
                      m=audio 49170 RTP/AVP 8 101\r\n\
                      a=rtpmap:8 PCMA/8000\r\n\
                      a=rtpmap:101 telephone-event/8000\r\n\
                      a=fmtp:101 0-15\r\n\
                      a=ptime:20\r\n";

    let offer = SdpSession::parse(offer_text).unwrap();
    let remote_audio = offer.media_of_kind(MediaKind::Audio).unwrap();

    let answer_media = build_answer_media(remote_audio, &local_capabilities(), 10_000).unwrap();

    // the answer lists PCMA only, with the offer's payload type
    let codecs: Vec<&str> = answer_media
        .formats
        .iter()
        .filter(|f| !f.name.eq_ignore_ascii_case("telephone-event"))
        .map(|f| f.name.as_str())
        .collect();
    assert_eq!(codecs, vec!["PCMA"]);
    assert_eq!(answer_media.formats[0].payload_type, 8);

    // wrap into a full description and re-parse
    let mut answer = SdpSession::new(IpAddr::from([10, 0, 0, 1]));
    answer.media.push(answer_media);
    let reparsed = SdpSession::parse(&answer.to_string()).unwrap();
    assert_eq!(reparsed, answer);

    let (rtp, rtcp) = remote_endpoints(&offer, remote_audio);
    assert_eq!(rtp.to_string(), "192.0.2.3:49170");
    assert_eq!(rtcp.to_string(), "192.0.2.3:49171");
}

#[test]
fn hold_offer_produces_recvonly_answer() {
    let mut offer = SdpSession::new(IpAddr::from([192, 0, 2, 3]));
    let mut audio = MediaDescription::new(MediaKind::Audio, 49_170);
    audio.add_format(Some(0), "PCMU", 8000, 1, None).unwrap();
    audio.direction = Some(MediaDirection::SendOnly);
    offer.media.push(audio);

    let answer = build_answer_media(
        offer.media_of_kind(MediaKind::Audio).unwrap(),
        &local_capabilities(),
        10_000,
    )
    .unwrap();

    assert_eq!(answer.direction, Some(MediaDirection::RecvOnly));
}

#[test]
fn video_answer_carries_nack_pli_when_supported() {
    let mut remote = MediaDescription::new(MediaKind::Video, 51_372);
    remote.add_format(Some(97), "VP8", 90_000, 1, None).unwrap();
    remote.nack_pli = true;

    let mut local = MediaDescription::new(MediaKind::Video, 10_002);
    local.add_format(Some(96), "VP8", 90_000, 1, None).unwrap();
    local.nack_pli = true;
    local.framerate = Some(30);

    let answer = build_answer_media(&remote, &local, 10_002).unwrap();
    assert!(answer.nack_pli);
    assert_eq!(answer.formats[0].payload_type, 97);
    assert_eq!(answer.framerate, Some(30));
}

proptest! {
    // Any description we produce re-parses to the identical model and
    // re-serializes byte-for-byte
    #[test]
    fn serialization_fixpoint(
        port in 1024u16..40_000,
        ptime in prop::option::of(10u32..60),
        hold in any::<bool>(),
        label in prop::option::of(1u32..10),
    ) {
        let mut session = SdpSession::new(IpAddr::from([10, 0, 0, 1]));
        session.tool = Some("softsip 0.1.0".to_string());

        let mut audio = MediaDescription::new(MediaKind::Audio, port & !1);
        audio.add_format(Some(0), "PCMU", 8000, 1, None).unwrap();
        audio.ptime = ptime;
        audio.label = label;
        audio.direction = Some(if hold {
            MediaDirection::SendOnly
        } else {
            MediaDirection::SendRecv
        });
        session.media.push(audio);

        let text = session.to_string();
        let parsed = SdpSession::parse(&text).unwrap();
        prop_assert_eq!(&parsed, &session);
        prop_assert_eq!(parsed.to_string(), text);
    }
}
