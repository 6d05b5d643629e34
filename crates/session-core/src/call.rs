//! Call control state machine
//!
//! States: Idle → Outgoing | Incoming → Ringing | Early → Established →
//! Terminated. The SIP dialog layer drives the transitions by feeding
//! signalling events in; the call builds local descriptions, negotiates
//! against remote ones and runs the media pipelines accordingly.
//! Teardown is idempotent and an unanswered incoming call closes itself
//! after the ring timeout.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use softsip_media_core::audio::{AudioEvent, AudioPipeline};
use softsip_media_core::codec::{audio_codecs, find_audio_codec};
use softsip_media_core::video::codec::{find_video_codec, video_codecs};
use softsip_media_core::video::VideoPipeline;
use softsip_rtp_core::session::RtpSession;
use softsip_sdp_core::negotiate::{
    build_answer_media, hold_direction, remote_endpoints, remote_format,
    remote_telephone_event_pt,
};
use softsip_sdp_core::{
    MediaDescription, MediaKind, SdpSession, PT_TELEPHONE_EVENT_PREFERRED, TELEPHONE_EVENT,
};

use crate::config::CallConfig;
use crate::error::Error;
use crate::events::CallEvent;
use crate::Result;

/// Call states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Nothing happened yet
    Idle,
    /// Peer INVITE received, not yet answered
    Incoming,
    /// Local INVITE sent, no response yet
    Outgoing,
    /// Peer is ringing (180 without SDP)
    Ringing,
    /// Early media negotiated (183 with SDP)
    Early,
    /// Call is up
    Established,
    /// Call is over
    Terminated,
}

struct AudioMedia {
    session: Arc<RtpSession>,
    pipeline: Arc<AudioPipeline>,
}

struct VideoMedia {
    session: Arc<RtpSession>,
    pipeline: Arc<VideoPipeline>,
}

/// One call and its media pipelines
pub struct Call {
    config: CallConfig,
    state: Mutex<CallState>,
    peer_uri: Mutex<String>,
    on_hold: AtomicBool,
    /// set when the incoming INVITE carried an SDP offer
    got_offer: AtomicBool,

    audio: Mutex<Option<AudioMedia>>,
    video: Mutex<Option<VideoMedia>>,

    local_sdp: Mutex<Option<SdpSession>>,

    events: mpsc::UnboundedSender<CallEvent>,
    ring_timer: Mutex<Option<tokio::task::JoinHandle<()>>>,

    time_started: Mutex<Option<Instant>>,
    time_stopped: Mutex<Option<Instant>>,

    weak_self: Mutex<Weak<Call>>,
}

impl Call {
    /// Create an idle call; events arrive on the returned receiver
    pub fn new(config: CallConfig) -> (Arc<Self>, mpsc::UnboundedReceiver<CallEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();

        let call = Arc::new(Self {
            config,
            state: Mutex::new(CallState::Idle),
            peer_uri: Mutex::new(String::new()),
            on_hold: AtomicBool::new(false),
            got_offer: AtomicBool::new(false),
            audio: Mutex::new(None),
            video: Mutex::new(None),
            local_sdp: Mutex::new(None),
            events,
            ring_timer: Mutex::new(None),
            time_started: Mutex::new(None),
            time_stopped: Mutex::new(None),
            weak_self: Mutex::new(Weak::new()),
        });
        *call.weak_self.lock() = Arc::downgrade(&call);

        (call, receiver)
    }

    /// Current state
    pub fn state(&self) -> CallState {
        *self.state.lock()
    }

    /// Peer URI, once known
    pub fn peer_uri(&self) -> String {
        self.peer_uri.lock().clone()
    }

    /// Whether the call is locally held
    pub fn is_on_hold(&self) -> bool {
        self.on_hold.load(Ordering::Relaxed)
    }

    /// Time the call has been established, if it was
    pub fn duration(&self) -> Option<Duration> {
        let started = (*self.time_started.lock())?;
        Some(match *self.time_stopped.lock() {
            Some(stopped) => stopped.duration_since(started),
            None => started.elapsed(),
        })
    }

    /// Place an outgoing call: allocates media transports and returns
    /// the SDP offer for the INVITE. Devices stay closed until the
    /// negotiation completes.
    pub async fn dial(&self, peer: &str) -> Result<SdpSession> {
        self.expect_state(CallState::Idle, "dial")?;

        *self.peer_uri.lock() = peer.to_string();
        self.alloc_media().await?;

        let offer = self.build_local_description()?;
        *self.local_sdp.lock() = Some(offer.clone());

        self.set_state(CallState::Outgoing);
        Ok(offer)
    }

    /// An INVITE arrived. When it carries an SDP body, it is decoded as
    /// the offer. The ring timer starts; an unanswered call closes
    /// itself.
    pub async fn on_invite(&self, peer: &str, offer: Option<&str>) -> Result<()> {
        self.expect_state(CallState::Idle, "on_invite")?;

        *self.peer_uri.lock() = peer.to_string();
        self.alloc_media().await?;

        if let Some(offer) = offer {
            let remote = SdpSession::parse(offer)?;
            self.build_answer(&remote)?;
            self.apply_remote_description(&remote)?;
            self.got_offer.store(true, Ordering::Relaxed);
        }

        self.set_state(CallState::Incoming);
        self.emit(CallEvent::Incoming(peer.to_string()));
        self.start_ring_timer();
        Ok(())
    }

    /// Answer an incoming call: opens the pipelines and returns the SDP
    /// for the 200 OK (the answer, or our offer when the INVITE had no
    /// SDP body).
    pub fn answer(&self) -> Result<SdpSession> {
        self.expect_state(CallState::Incoming, "answer")?;
        self.cancel_ring_timer();

        let description = match self.local_sdp.lock().clone() {
            Some(description) => description,
            None => {
                // late-offer INVITE: we offer, the ACK will answer
                let offer = self.build_local_description()?;
                *self.local_sdp.lock() = Some(offer.clone());
                offer
            }
        };

        self.set_state(CallState::Established);
        if self.got_offer.load(Ordering::Relaxed) {
            self.start_media()?;
        }
        self.emit(CallEvent::Established);
        Ok(description)
    }

    /// A provisional response arrived for our INVITE: 180 without SDP
    /// rings, 183 with SDP starts early media.
    pub fn on_progress(&self, sdp: Option<&str>) -> Result<()> {
        let state = self.state();
        if state != CallState::Outgoing && state != CallState::Ringing {
            return Err(Error::InvalidState {
                state,
                operation: "on_progress",
            });
        }

        match sdp {
            None => {
                self.set_state(CallState::Ringing);
                self.emit(CallEvent::Ringing);
            }
            Some(sdp) => {
                let remote = SdpSession::parse(sdp)?;
                self.apply_remote_description(&remote)?;
                self.set_state(CallState::Early);
                self.start_media()?;
                self.emit(CallEvent::Progress);
            }
        }
        Ok(())
    }

    /// The peer's answer arrived: the final answer to our INVITE, the
    /// ACK answer of a late-offer call, or the answer to a re-INVITE we
    /// sent (hold/resume).
    pub fn on_answer(&self, sdp: &str) -> Result<()> {
        let state = self.state();
        match state {
            CallState::Outgoing | CallState::Ringing | CallState::Early => {}
            CallState::Established => {}
            _ => {
                return Err(Error::InvalidState {
                    state,
                    operation: "on_answer",
                })
            }
        }

        let remote = SdpSession::parse(sdp)?;
        self.apply_remote_description(&remote)?;
        self.got_offer.store(true, Ordering::Relaxed);

        if state != CallState::Established {
            self.set_state(CallState::Established);
        }
        self.start_media()?;
        if state != CallState::Established {
            self.emit(CallEvent::Established);
        }
        Ok(())
    }

    /// The peer renegotiates mid-call. Returns the SDP answer for the
    /// 200 OK. Codec changes swap encoder/decoder state; an effective
    /// sample-rate change also re-opens the affected device.
    pub fn on_reinvite(&self, sdp: &str) -> Result<SdpSession> {
        self.expect_state(CallState::Established, "on_reinvite")?;

        let remote = SdpSession::parse(sdp)?;
        let answer = self.build_answer(&remote)?;
        self.apply_remote_description(&remote)?;
        self.start_media()?;
        Ok(answer)
    }

    /// Put the call on hold or resume it. Returns the re-INVITE offer
    /// with the local direction flipped to sendonly (hold) or back to
    /// sendrecv (resume).
    pub fn hold(&self, hold: bool) -> Result<SdpSession> {
        self.expect_state(CallState::Established, "hold")?;

        info!(hold, peer = %self.peer_uri(), "hold state change");
        self.on_hold.store(hold, Ordering::Relaxed);

        if let Some(audio) = self.audio.lock().as_ref() {
            audio.pipeline.stream().hold(hold);
        }
        if let Some(video) = self.video.lock().as_ref() {
            video.pipeline.stream().hold(hold);
        }

        let mut offer = self
            .local_sdp
            .lock()
            .clone()
            .ok_or(Error::InvalidState {
                state: CallState::Established,
                operation: "hold without local description",
            })?;
        for media in &mut offer.media {
            media.direction = Some(hold_direction(hold));
        }
        offer.bump_version();
        *self.local_sdp.lock() = Some(offer.clone());
        Ok(offer)
    }

    /// Send a DTMF digit as a full press/release burst
    pub fn send_dtmf(&self, digit: char) -> Result<()> {
        let audio = self.audio.lock();
        let audio = audio.as_ref().ok_or(Error::InvalidState {
            state: self.state(),
            operation: "send_dtmf",
        })?;
        audio.pipeline.send_digit(digit)?;
        audio.pipeline.release_digit()?;
        Ok(())
    }

    /// Mute or unmute transmitted audio
    pub fn mute(&self, muted: bool) {
        if let Some(audio) = self.audio.lock().as_ref() {
            audio.pipeline.mute(muted);
        }
    }

    /// Transport statistics of the audio stream, once media exists
    pub fn audio_stats(&self) -> Option<softsip_rtp_core::RtpStats> {
        self.audio.lock().as_ref().map(|audio| audio.session.stats())
    }

    /// Jitter buffer counters of the audio stream, once media exists
    pub fn audio_jitter_stats(&self) -> Option<softsip_rtp_core::JitterStats> {
        self.audio
            .lock()
            .as_ref()
            .map(|audio| audio.pipeline.stream().jitter_stats())
    }

    /// End the call from any state. Pipelines stop idempotently; the
    /// `Closed` event carries the reason.
    pub fn hangup(&self, reason: &str) {
        {
            let mut state = self.state.lock();
            if *state == CallState::Terminated {
                return;
            }
            info!(%reason, "call terminated");
            *state = CallState::Terminated;
        }

        self.cancel_ring_timer();
        self.stop_media();
        *self.time_stopped.lock() = Some(Instant::now());
        self.emit(CallEvent::Closed(reason.to_string()));
    }

    fn expect_state(&self, expected: CallState, operation: &'static str) -> Result<()> {
        let state = self.state();
        if state != expected {
            return Err(Error::InvalidState { state, operation });
        }
        Ok(())
    }

    fn set_state(&self, new: CallState) {
        let mut state = self.state.lock();
        debug!(from = ?*state, to = ?new, "call state");
        *state = new;
    }

    fn emit(&self, event: CallEvent) {
        let _ = self.events.send(event);
    }

    /// Bind the RTP transports and create the pipelines. Capture and
    /// playback devices are not opened here.
    async fn alloc_media(&self) -> Result<()> {
        if self.audio.lock().is_some() {
            return Ok(());
        }

        let session = RtpSession::bind(self.config.rtp.clone()).await?;
        let pipeline = AudioPipeline::new(self.config.audio.clone(), Arc::clone(&session));

        let events = self.events.clone();
        pipeline.set_event_handler(move |event| match event {
            AudioEvent::Dtmf { digit, end } => {
                let _ = events.send(CallEvent::Dtmf { digit, end });
            }
            AudioEvent::SourceError(message) => {
                // the transmit direction is down; receive keeps running
                warn!("audio capture failed mid-call: {}", message);
            }
        });

        *self.audio.lock() = Some(AudioMedia { session, pipeline });

        if let Some(video_config) = self.config.video.clone() {
            if !video_codecs().is_empty() {
                let session = RtpSession::bind(self.config.rtp.clone()).await?;
                let pipeline = VideoPipeline::new(video_config, Arc::clone(&session));
                *self.video.lock() = Some(VideoMedia { session, pipeline });
            }
        }

        Ok(())
    }

    /// The address we advertise in SDP. Address discovery (NAT) is the
    /// business of an external collaborator; fall back to loopback when
    /// the transport bound a wildcard address.
    fn advertised_ip(&self) -> IpAddr {
        let ip = self.config.rtp.local_ip;
        if ip.is_unspecified() {
            IpAddr::from([127, 0, 0, 1])
        } else {
            ip
        }
    }

    /// Build our full local description: every registered codec inside
    /// the configured ranges, in registration order, plus telephony
    /// events on audio.
    fn build_local_description(&self) -> Result<SdpSession> {
        let mut sdp = SdpSession::new(self.advertised_ip());
        sdp.tool = Some(format!("softsip {}", env!("CARGO_PKG_VERSION")));

        let direction = hold_direction(self.is_on_hold());

        if let Some(audio) = self.audio.lock().as_ref() {
            let mut media =
                MediaDescription::new(MediaKind::Audio, audio.session.local_rtp_addr().port());
            media.rtcp_mux = self.config.rtp.rtcp_mux;
            media.ptime = Some(self.config.audio.ptime);
            media.label = Some(1);
            media.bandwidth_as = Some(self.config.audio_bandwidth_kbps);
            media.direction = Some(direction);

            for codec in audio_codecs() {
                let info = codec.info();
                if !self.config.audio_srate.contains(info.clock_rate) {
                    debug!(codec = info.name, "skipping codec outside sample-rate range");
                    continue;
                }
                if !self.config.audio_channels.contains(info.channels as u32) {
                    debug!(codec = info.name, "skipping codec outside channel range");
                    continue;
                }
                media.add_format(
                    info.static_pt,
                    info.name,
                    info.clock_rate,
                    info.channels,
                    info.default_fmtp,
                )?;
            }

            media.add_format(
                Some(PT_TELEPHONE_EVENT_PREFERRED),
                TELEPHONE_EVENT,
                8000,
                1,
                Some("0-15"),
            )?;

            sdp.media.push(media);
        }

        if let (Some(video), Some(config)) =
            (self.video.lock().as_ref(), self.config.video.as_ref())
        {
            let mut media =
                MediaDescription::new(MediaKind::Video, video.session.local_rtp_addr().port());
            media.rtcp_mux = self.config.rtp.rtcp_mux;
            media.framerate = Some(config.params.fps);
            media.label = Some(2);
            media.nack_pli = true;
            media.direction = Some(direction);

            for codec in video_codecs() {
                let info = codec.info();
                media.add_format(
                    info.static_pt,
                    info.name,
                    info.clock_rate,
                    1,
                    info.default_fmtp,
                )?;
            }

            sdp.media.push(media);
        }

        Ok(sdp)
    }

    /// Build the SDP answer for a remote offer and make it our local
    /// description.
    fn build_answer(&self, remote: &SdpSession) -> Result<SdpSession> {
        let caps = self.build_local_description()?;

        let mut answer = SdpSession::new(self.advertised_ip());
        answer.tool = caps.tool.clone();

        for remote_media in &remote.media {
            let local_caps = match caps.media_of_kind(remote_media.kind) {
                Some(local_caps) => local_caps,
                None => continue, // media kind we do not handle
            };
            let media = build_answer_media(remote_media, local_caps, local_caps.port)?;
            answer.media.push(media);
        }

        if let Some(previous) = self.local_sdp.lock().as_ref() {
            answer.origin.session_id = previous.origin.session_id;
            answer.origin.session_version = previous.origin.session_version + 1;
        }
        *self.local_sdp.lock() = Some(answer.clone());
        Ok(answer)
    }

    /// Configure both pipelines from the remote description: codec
    /// selection, payload types, addresses, direction, ptime, feedback
    /// and keep-alive.
    fn apply_remote_description(&self, remote: &SdpSession) -> Result<()> {
        let local_sdp = self.local_sdp.lock().clone().ok_or(Error::InvalidState {
            state: self.state(),
            operation: "negotiation without local description",
        })?;

        // audio
        if let Some(audio) = self.audio.lock().as_ref() {
            let remote_media = remote
                .media_of_kind(MediaKind::Audio)
                .ok_or(softsip_sdp_core::Error::NoMatch("audio"))?;
            let local_media = local_sdp
                .media_of_kind(MediaKind::Audio)
                .ok_or(softsip_sdp_core::Error::NoMatch("audio"))?;

            let chosen = remote_format(remote_media, local_media)?.clone();
            let codec = find_audio_codec(
                &chosen.name,
                Some(chosen.clock_rate),
                Some(chosen.channels),
            )
            .ok_or_else(|| Error::CodecNotFound(chosen.name.clone()))?;

            // transmit with the peer's numbering and parameters; receive
            // symmetrically
            audio.pipeline.set_encoder(
                Arc::clone(&codec),
                chosen.payload_type,
                chosen.fmtp.as_deref(),
            )?;
            let local_fmtp = local_media
                .find_format(&chosen.name, chosen.clock_rate, chosen.channels)
                .and_then(|f| f.fmtp.clone());
            audio
                .pipeline
                .set_decoder(codec, chosen.payload_type, local_fmtp.as_deref())?;

            audio.pipeline.set_local_formats(local_media.formats.clone());
            audio
                .pipeline
                .set_remote_telev_pt(remote_telephone_event_pt(remote_media));

            if let Some(ptime) = remote_media.ptime {
                audio.pipeline.set_ptime(ptime);
            }

            audio
                .pipeline
                .stream()
                .set_direction(remote_media.effective_direction().reversed());

            let (rtp, rtcp) = remote_endpoints(remote, remote_media);
            audio.session.set_remote(rtp, Some(rtcp));
            audio.session.set_keepalive_pt(local_media.unused_dynamic_pt());
        }

        // video
        if let Some(video) = self.video.lock().as_ref() {
            let remote_media = match remote.media_of_kind(MediaKind::Video) {
                Some(remote_media) if remote_media.port != 0 => Some(remote_media),
                _ => {
                    debug!("peer declined video");
                    video.pipeline.stop();
                    None
                }
            };
            if let Some(remote_media) = remote_media {
                self.apply_remote_video(video, &local_sdp, remote, remote_media)?;
            }
        }

        Ok(())
    }

    fn apply_remote_video(
        &self,
        video: &VideoMedia,
        local_sdp: &SdpSession,
        remote: &SdpSession,
        remote_media: &MediaDescription,
    ) -> Result<()> {
        let local_media = local_sdp
            .media_of_kind(MediaKind::Video)
            .ok_or(softsip_sdp_core::Error::NoMatch("video"))?;

        let chosen = remote_format(remote_media, local_media)?.clone();
        let codec = find_video_codec(&chosen.name)
            .ok_or_else(|| Error::CodecNotFound(chosen.name.clone()))?;

        video
            .pipeline
            .set_encoder(Arc::clone(&codec), chosen.payload_type, chosen.fmtp.as_deref())?;
        video.pipeline.set_decoder(codec, chosen.payload_type)?;
        video.pipeline.set_local_formats(local_media.formats.clone());

        if let Some(framerate) = remote_media.framerate {
            video.pipeline.set_fps(framerate);
        }

        video.session.set_nack_pli(remote_media.nack_pli);
        video
            .pipeline
            .stream()
            .set_direction(remote_media.effective_direction().reversed());

        let (rtp, rtcp) = remote_endpoints(remote, remote_media);
        video.session.set_remote(rtp, Some(rtcp));
        video.session.set_keepalive_pt(local_media.unused_dynamic_pt());
        Ok(())
    }

    /// Open devices and start media flowing; safe to call again after a
    /// renegotiation.
    fn start_media(&self) -> Result<()> {
        let cname = self.config.local_uri.clone();

        if let Some(audio) = self.audio.lock().as_ref() {
            audio.pipeline.start()?;
            audio.session.start_rtcp(&cname);
            audio.session.start_keepalive();
        }

        if let Some(video) = self.video.lock().as_ref() {
            let device = self
                .config
                .video
                .as_ref()
                .map(|v| v.source_device.clone())
                .unwrap_or_default();
            video.pipeline.start(&device, &self.peer_uri())?;
            video.session.start_rtcp(&cname);
            video.session.start_keepalive();
        }

        if self.time_started.lock().is_none() {
            *self.time_started.lock() = Some(Instant::now());
        }
        Ok(())
    }

    /// Teardown order: capture and playback first (inside each pipeline),
    /// then buffers and codec state, finally the transports.
    fn stop_media(&self) {
        if let Some(audio) = self.audio.lock().as_ref() {
            audio.pipeline.stop();
            audio.session.close();
        }
        if let Some(video) = self.video.lock().as_ref() {
            video.pipeline.stop();
            video.session.close();
        }
    }

    fn start_ring_timer(&self) {
        let weak = self.weak_self.lock().clone();
        let timeout = Duration::from_secs(self.config.ring_timeout_secs);

        *self.ring_timer.lock() = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(call) = weak.upgrade() {
                if call.state() == CallState::Incoming {
                    info!("incoming call timed out unanswered");
                    call.hangup("no answer");
                }
            }
        }));
    }

    fn cancel_ring_timer(&self) {
        if let Some(timer) = self.ring_timer.lock().take() {
            timer.abort();
        }
    }
}

impl Drop for Call {
    fn drop(&mut self) {
        self.cancel_ring_timer();
        self.stop_media();
    }
}
