//! Two call controllers signalling to each other in-process: the SDP
//! bodies travel between them the way a SIP dialog layer would carry
//! them.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

use softsip_media_core::audio::{AudioConfig, TxMode};
use softsip_rtp_core::session::RtpSessionConfig;
use softsip_sdp_core::{MediaDirection, MediaKind};
use softsip_session_core::{Call, CallConfig, CallEvent, CallState};

fn call_config(name: &str) -> CallConfig {
    CallConfig {
        local_uri: format!("sip:{}@127.0.0.1", name),
        audio: AudioConfig {
            source_driver: "tone".into(),
            player_driver: "null".into(),
            tx_mode: TxMode::Poll,
            ..Default::default()
        },
        video: None,
        rtp: RtpSessionConfig {
            local_ip: IpAddr::from([127, 0, 0, 1]),
            port_min: 50_000,
            port_max: 59_999,
            rtcp_mux: false,
            rtcp_enabled: true,
        },
        ..Default::default()
    }
}

async fn expect_event(events: &mut UnboundedReceiver<CallEvent>) -> CallEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for call event")
        .expect("event channel closed")
}

/// Establish a call between two controllers, returning both plus their
/// event receivers.
async fn established_pair() -> (
    Arc<Call>,
    Arc<Call>,
    UnboundedReceiver<CallEvent>,
    UnboundedReceiver<CallEvent>,
) {
    softsip_media_core::init();

    let (alice, mut alice_events) = Call::new(call_config("alice"));
    let (bob, mut bob_events) = Call::new(call_config("bob"));

    let offer = alice.dial("sip:bob@127.0.0.1").await.unwrap();
    assert_eq!(alice.state(), CallState::Outgoing);

    bob.on_invite("sip:alice@127.0.0.1", Some(&offer.to_string()))
        .await
        .unwrap();
    assert_eq!(bob.state(), CallState::Incoming);
    assert!(matches!(
        expect_event(&mut bob_events).await,
        CallEvent::Incoming(_)
    ));

    let answer = bob.answer().unwrap();
    assert_eq!(expect_event(&mut bob_events).await, CallEvent::Established);

    alice.on_answer(&answer.to_string()).unwrap();
    assert_eq!(alice.state(), CallState::Established);
    assert_eq!(
        expect_event(&mut alice_events).await,
        CallEvent::Established
    );

    (alice, bob, alice_events, bob_events)
}

#[tokio::test(flavor = "multi_thread")]
async fn basic_call_negotiates_and_flows_media() {
    let (alice, bob, _alice_events, _bob_events) = established_pair().await;

    tokio::time::sleep(Duration::from_millis(600)).await;

    // PCMA was negotiated first on both sides and audio flows both ways
    let alice_stats = alice.audio_stats().unwrap();
    let bob_stats = bob.audio_stats().unwrap();
    assert!(alice_stats.tx_packets >= 10, "{:?}", alice_stats);
    assert!(alice_stats.rx_packets >= 10, "{:?}", alice_stats);
    assert!(bob_stats.tx_packets >= 10, "{:?}", bob_stats);

    assert!(alice.duration().unwrap() >= Duration::from_millis(500));

    alice.hangup("user hangup");
    assert_eq!(alice.state(), CallState::Terminated);
    bob.hangup("peer hangup");

    // teardown is idempotent
    alice.hangup("again");
}

#[tokio::test(flavor = "multi_thread")]
async fn answer_mirrors_offer_payload_types() {
    softsip_media_core::init();

    let (bob, _events) = Call::new(call_config("bob"));

    // remote advertises PCMA only, under its own numbering
    let offer = "v=0\r\n\
                 o=alice 7 7 IN IP4 127.0.0.1\r\n\
                 s=-\r\n\
                 c=IN IP4 127.0.0.1\r\n\
                 t=0 0\r\n\
                 m=audio 50998 RTP/AVP 8 96\r\n\
                 a=rtpmap:8 PCMA/8000\r\n\
                 a=rtpmap:96 telephone-event/8000\r\n\
                 a=fmtp:96 0-15\r\n\
                 a=ptime:20\r\n";

    bob.on_invite("sip:alice@example.com", Some(offer))
        .await
        .unwrap();
    let answer = bob.answer().unwrap();

    let audio = answer
        .media_of_kind(MediaKind::Audio)
        .expect("audio in answer");
    let names: Vec<&str> = audio.formats.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["PCMA", "telephone-event"]);
    assert_eq!(audio.formats[0].payload_type, 8);
    assert_eq!(audio.formats[1].payload_type, 96);

    bob.hangup("done");
}

#[tokio::test(flavor = "multi_thread")]
async fn no_common_codec_is_rejected() {
    softsip_media_core::init();

    let (bob, _events) = Call::new(call_config("bob"));

    let offer = "v=0\r\n\
                 o=alice 9 9 IN IP4 127.0.0.1\r\n\
                 s=-\r\n\
                 c=IN IP4 127.0.0.1\r\n\
                 t=0 0\r\n\
                 m=audio 51000 RTP/AVP 18\r\n\
                 a=rtpmap:18 G729/8000\r\n";

    let result = bob.on_invite("sip:alice@example.com", Some(offer)).await;
    assert!(result.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn dtmf_travels_between_calls() {
    let (alice, bob, _alice_events, mut bob_events) = established_pair().await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    alice.send_dtmf('5').unwrap();

    let mut digits = Vec::new();
    for _ in 0..2 {
        match expect_event(&mut bob_events).await {
            CallEvent::Dtmf { digit, end } => digits.push((digit, end)),
            other => panic!("unexpected event {:?}", other),
        }
    }

    assert_eq!(digits[0], ('5', false));
    assert_eq!(digits[1], ('5', true));

    alice.hangup("done");
    bob.hangup("done");
}

#[tokio::test(flavor = "multi_thread")]
async fn hold_and_resume_round_trip() {
    let (alice, bob, _alice_events, _bob_events) = established_pair().await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    // hold: re-INVITE with local direction sendonly
    let hold_offer = alice.hold(true).unwrap();
    let audio = hold_offer.media_of_kind(MediaKind::Audio).unwrap();
    assert_eq!(audio.direction, Some(MediaDirection::SendOnly));
    assert!(alice.is_on_hold());

    let hold_answer = bob.on_reinvite(&hold_offer.to_string()).unwrap();
    assert_eq!(
        hold_answer.media_of_kind(MediaKind::Audio).unwrap().direction,
        Some(MediaDirection::RecvOnly)
    );
    alice.on_answer(&hold_answer.to_string()).unwrap();

    // held: alice keeps transmitting, bob keeps decoding; bob stops
    // sending, so nothing reaches alice's decoder any more
    let bob_put_before = bob.audio_jitter_stats().unwrap().n_put;
    let alice_put_before = alice.audio_jitter_stats().unwrap().n_put;
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(bob.audio_jitter_stats().unwrap().n_put > bob_put_before);
    assert!(alice.audio_jitter_stats().unwrap().n_put <= alice_put_before + 2);

    // resume
    let resume_offer = alice.hold(false).unwrap();
    assert_eq!(
        resume_offer.media_of_kind(MediaKind::Audio).unwrap().direction,
        Some(MediaDirection::SendRecv)
    );
    let resume_answer = bob.on_reinvite(&resume_offer.to_string()).unwrap();
    alice.on_answer(&resume_answer.to_string()).unwrap();
    assert!(!alice.is_on_hold());

    let alice_put_resumed = alice.audio_jitter_stats().unwrap().n_put;
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(alice.audio_jitter_stats().unwrap().n_put > alice_put_resumed);

    alice.hangup("done");
    bob.hangup("done");
}

#[tokio::test(flavor = "multi_thread")]
async fn unanswered_incoming_call_times_out() {
    softsip_media_core::init();

    let mut config = call_config("bob");
    config.ring_timeout_secs = 1;
    let (bob, mut events) = Call::new(config);

    let offer = "v=0\r\n\
                 o=alice 11 11 IN IP4 127.0.0.1\r\n\
                 s=-\r\n\
                 c=IN IP4 127.0.0.1\r\n\
                 t=0 0\r\n\
                 m=audio 51002 RTP/AVP 0\r\n\
                 a=rtpmap:0 PCMU/8000\r\n";

    bob.on_invite("sip:alice@example.com", Some(offer))
        .await
        .unwrap();
    assert!(matches!(
        expect_event(&mut events).await,
        CallEvent::Incoming(_)
    ));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(bob.state(), CallState::Terminated);
    assert_eq!(
        expect_event(&mut events).await,
        CallEvent::Closed("no answer".to_string())
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn reinvite_can_change_codec() {
    let (alice, bob, _alice_events, _bob_events) = established_pair().await;

    // the peer renegotiates down to PCMU only
    let offer = "v=0\r\n\
                 o=alice 21 22 IN IP4 127.0.0.1\r\n\
                 s=-\r\n\
                 c=IN IP4 127.0.0.1\r\n\
                 t=0 0\r\n\
                 m=audio 51004 RTP/AVP 0 101\r\n\
                 a=rtpmap:0 PCMU/8000\r\n\
                 a=rtpmap:101 telephone-event/8000\r\n\
                 a=fmtp:101 0-15\r\n\
                 a=ptime:20\r\n";

    let answer = bob.on_reinvite(offer).unwrap();
    let audio = answer.media_of_kind(MediaKind::Audio).unwrap();
    assert_eq!(audio.formats[0].name, "PCMU");
    assert_eq!(audio.formats[0].payload_type, 0);
    assert_eq!(bob.state(), CallState::Established);

    alice.hangup("done");
    bob.hangup("done");
}
