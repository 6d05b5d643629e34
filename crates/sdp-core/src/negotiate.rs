//! Offer/answer negotiation (RFC 3264)
//!
//! Offers advertise the locally registered formats in registration order.
//! Answers pick the first format of the remote's list that matches a
//! local format; ties go to the first locally registered. The answer
//! mirrors the remote's payload types so that transmit and receive use
//! the numbering the offerer chose.

use std::net::SocketAddr;

use tracing::info;

use crate::attributes::rtpmap::SdpFormat;
use crate::error::Error;
use crate::media::{MediaDescription, MediaKind};
use crate::session::SdpSession;
use crate::{MediaDirection, Result, TELEPHONE_EVENT};

/// Format names that never take part in codec selection
fn is_signalling_format(name: &str) -> bool {
    name.eq_ignore_ascii_case(TELEPHONE_EVENT) || name.eq_ignore_ascii_case("CN")
}

/// Pick the codec for an answer: the first remote format matching any
/// local format by name, clock rate and channel count.
pub fn select_format<'r>(
    remote: &'r MediaDescription,
    local: &MediaDescription,
) -> Result<&'r SdpFormat> {
    for remote_format in &remote.formats {
        if is_signalling_format(&remote_format.name) {
            continue;
        }
        if local
            .find_format(
                &remote_format.name,
                remote_format.clock_rate,
                remote_format.channels,
            )
            .is_some()
        {
            return Ok(remote_format);
        }
    }

    Err(Error::NoMatch(match remote.kind {
        MediaKind::Audio => "audio",
        MediaKind::Video => "video",
    }))
}

/// Build the answer media section for a remote offer.
///
/// `local` describes our own capabilities in offer shape (formats in
/// registration order plus the attribute set we produce). The answer
/// carries the selected codec under the remote's payload type, our fmtp
/// parameters, and a telephone-event format when both sides offered one.
pub fn build_answer_media(
    remote: &MediaDescription,
    local: &MediaDescription,
    local_port: u16,
) -> Result<MediaDescription> {
    let chosen = select_format(remote, local)?;
    let local_match = local
        .find_format(&chosen.name, chosen.clock_rate, chosen.channels)
        .ok_or(Error::NoMatch("local"))?;

    info!(
        kind = %remote.kind,
        codec = %chosen,
        pt = chosen.payload_type,
        "negotiated format"
    );

    let mut answer = MediaDescription::new(remote.kind, local_port);
    answer.proto = remote.proto.clone();

    let mut format = SdpFormat::new(
        chosen.payload_type,
        &chosen.name,
        chosen.clock_rate,
        chosen.channels,
    );
    format.fmtp = local_match.fmtp.clone();
    answer.formats.push(format);

    // Telephony events survive when both sides support them, under the
    // remote's numbering
    if remote.kind == MediaKind::Audio {
        let remote_te = remote
            .formats
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(TELEPHONE_EVENT));
        let local_te = local
            .formats
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(TELEPHONE_EVENT));
        if let (Some(remote_te), Some(local_te)) = (remote_te, local_te) {
            let mut te = SdpFormat::new(
                remote_te.payload_type,
                &remote_te.name,
                remote_te.clock_rate,
                remote_te.channels,
            );
            te.fmtp = local_te.fmtp.clone();
            answer.formats.push(te);
        }
    }

    answer.direction = Some(remote.effective_direction().reversed());
    answer.ptime = local.ptime;
    answer.rtcp_mux = remote.rtcp_mux && local.rtcp_mux;
    answer.nack_pli = remote.kind == MediaKind::Video && local.nack_pli;
    answer.framerate = local.framerate;
    answer.label = local.label;
    answer.bandwidth_as = local.bandwidth_as;

    Ok(answer)
}

/// The format the remote side will accept from us: for an answered offer
/// this is the remote's first format matching our capabilities.
pub fn remote_format<'r>(
    remote: &'r MediaDescription,
    local: &MediaDescription,
) -> Result<&'r SdpFormat> {
    select_format(remote, local)
}

/// Remote telephone-event payload type, if the peer accepts one
pub fn remote_telephone_event_pt(remote: &MediaDescription) -> Option<u8> {
    remote
        .formats
        .iter()
        .find(|f| f.name.eq_ignore_ascii_case(TELEPHONE_EVENT))
        .map(|f| f.payload_type)
}

/// RTP and RTCP endpoints of a remote media section
pub fn remote_endpoints(
    session: &SdpSession,
    media: &MediaDescription,
) -> (SocketAddr, SocketAddr) {
    let rtp = SocketAddr::new(session.connection, media.port);
    let rtcp = SocketAddr::new(session.connection, media.effective_rtcp_port());
    (rtp, rtcp)
}

/// The local direction a hold or resume request maps to
pub fn hold_direction(hold: bool) -> MediaDirection {
    if hold {
        MediaDirection::SendOnly
    } else {
        MediaDirection::SendRecv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn local_audio() -> MediaDescription {
        let mut m = MediaDescription::new(MediaKind::Audio, 10_000);
        m.add_format(Some(0), "PCMU", 8000, 1, None).unwrap();
        m.add_format(Some(8), "PCMA", 8000, 1, None).unwrap();
        m.add_format(Some(101), "telephone-event", 8000, 1, Some("0-15"))
            .unwrap();
        m.ptime = Some(20);
        m
    }

    #[test]
    fn test_answer_picks_remote_first_match() {
        // remote offers only PCMA, under a different PT than ours
        let mut remote = MediaDescription::new(MediaKind::Audio, 49_170);
        remote.add_format(Some(8), "PCMA", 8000, 1, None).unwrap();
        remote
            .add_format(Some(98), "telephone-event", 8000, 1, Some("0-15"))
            .unwrap();

        let answer = build_answer_media(&remote, &local_audio(), 10_000).unwrap();

        assert_eq!(answer.formats.len(), 2);
        assert_eq!(answer.formats[0].name, "PCMA");
        assert_eq!(answer.formats[0].payload_type, 8);
        // telephone-event follows the remote's numbering
        assert_eq!(answer.formats[1].payload_type, 98);
        assert_eq!(answer.formats[1].fmtp.as_deref(), Some("0-15"));
    }

    #[test]
    fn test_answer_respects_remote_preference_order() {
        let mut remote = MediaDescription::new(MediaKind::Audio, 49_170);
        remote.add_format(Some(8), "PCMA", 8000, 1, None).unwrap();
        remote.add_format(Some(0), "PCMU", 8000, 1, None).unwrap();

        let chosen = select_format(&remote, &local_audio()).unwrap();
        assert_eq!(chosen.name, "PCMA");
    }

    #[test]
    fn test_no_common_codec() {
        let mut remote = MediaDescription::new(MediaKind::Audio, 49_170);
        remote.add_format(Some(18), "G729", 8000, 1, None).unwrap();

        assert!(matches!(
            build_answer_media(&remote, &local_audio(), 10_000),
            Err(Error::NoMatch("audio"))
        ));
    }

    #[test]
    fn test_telephone_event_never_selected_as_codec() {
        let mut remote = MediaDescription::new(MediaKind::Audio, 49_170);
        remote
            .add_format(Some(101), "telephone-event", 8000, 1, Some("0-15"))
            .unwrap();
        remote.add_format(Some(0), "PCMU", 8000, 1, None).unwrap();

        let chosen = select_format(&remote, &local_audio()).unwrap();
        assert_eq!(chosen.name, "PCMU");
    }

    #[test]
    fn test_answer_direction_reverses_remote() {
        let mut remote = MediaDescription::new(MediaKind::Audio, 49_170);
        remote.add_format(Some(0), "PCMU", 8000, 1, None).unwrap();
        remote.direction = Some(MediaDirection::SendOnly);

        let answer = build_answer_media(&remote, &local_audio(), 10_000).unwrap();
        assert_eq!(answer.direction, Some(MediaDirection::RecvOnly));
    }

    #[test]
    fn test_rtcp_mux_requires_both_sides() {
        let mut remote = MediaDescription::new(MediaKind::Audio, 49_170);
        remote.add_format(Some(0), "PCMU", 8000, 1, None).unwrap();
        remote.rtcp_mux = true;

        let answer = build_answer_media(&remote, &local_audio(), 10_000).unwrap();
        assert!(!answer.rtcp_mux);

        let mut local = local_audio();
        local.rtcp_mux = true;
        let answer = build_answer_media(&remote, &local, 10_000).unwrap();
        assert!(answer.rtcp_mux);
    }

    #[test]
    fn test_hold_direction() {
        assert_eq!(hold_direction(true), MediaDirection::SendOnly);
        assert_eq!(hold_direction(false), MediaDirection::SendRecv);
    }

    #[test]
    fn test_remote_endpoints() {
        let mut session = SdpSession::new(IpAddr::from([192, 0, 2, 3]));
        let mut audio = MediaDescription::new(MediaKind::Audio, 49_170);
        audio.add_format(Some(0), "PCMU", 8000, 1, None).unwrap();
        session.media.push(audio);

        let (rtp, rtcp) = remote_endpoints(&session, &session.media[0]);
        assert_eq!(rtp.port(), 49_170);
        assert_eq!(rtcp.port(), 49_171);
        assert_eq!(rtp.ip(), IpAddr::from([192, 0, 2, 3]));
    }
}
