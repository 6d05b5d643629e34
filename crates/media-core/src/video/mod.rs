//! Video pipeline
//!
//! Transmit: source frames are encoded, packetized to the negotiated
//! maximum payload size and sent with a shared per-frame timestamp, the
//! marker on the frame's last packet. Receive: payloads are reassembled,
//! decoded and displayed; a failed decode asks the peer for a keyframe
//! via PLI or FIR. Keyframes are produced on start, on explicit request,
//! and whenever the peer asks for one.

pub mod codec;
pub mod device;
pub mod h264;
pub mod vp8;

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use softsip_rtp_core::jbuf::JitterBufferConfig;
use softsip_rtp_core::packet::RtpHeader;
use softsip_rtp_core::session::RtpSession;
use softsip_sdp_core::SdpFormat;

use crate::error::Error;
use crate::stream::MediaStream;
use crate::types::{VideoFrame, VideoParams};
use crate::Result;

use codec::{find_video_codec, VideoCodec, VideoDecoder, VideoDepacketizer, VideoEncoder, VideoPacketizer};
use device::{self as viddev, VideoDisplay, VideoStreamHandle};

/// RTP clock rate for video
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

/// Frame-rate estimation window in seconds
const FPS_WINDOW_SECS: u32 = 5;

/// Video pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    /// Capture driver name; empty picks the first registered
    pub source_driver: String,

    /// Capture device name, driver-specific
    pub source_device: String,

    /// Display driver name; empty picks the first registered
    pub display_driver: String,

    /// Stream parameters offered in negotiation
    pub params: VideoParams,

    /// Jitter buffer depth bounds, in packets
    pub jitter_min_packets: usize,

    /// Maximum jitter depth, in packets
    pub jitter_max_packets: usize,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            source_driver: String::new(),
            source_device: String::new(),
            display_driver: String::new(),
            params: VideoParams::default(),
            jitter_min_packets: 1,
            jitter_max_packets: 50,
        }
    }
}

struct VideoTx {
    codec: Option<Arc<dyn VideoCodec>>,
    encoder: Option<Box<dyn VideoEncoder>>,
    packetizer: Option<Box<dyn VideoPacketizer>>,
    pt: u8,
    ts: u32,
    fps: u32,
    max_packet_size: usize,
    /// a keyframe is pending for the next encoded picture
    picup: bool,
    muted: bool,
    mute_frame: Option<VideoFrame>,
    frames: u32,
    efps: u32,
}

struct VideoRx {
    codec: Option<Arc<dyn VideoCodec>>,
    decoder: Option<Box<dyn VideoDecoder>>,
    depacketizer: Option<Box<dyn VideoDepacketizer>>,
    pt: Option<u8>,
    frames: u32,
    efps: u32,
}

struct VideoCore {
    stream: Arc<MediaStream>,
    config: VideoConfig,
    tx: Mutex<VideoTx>,
    rx: Mutex<VideoRx>,
    formats: Mutex<Vec<SdpFormat>>,
    display: Mutex<Option<Box<dyn VideoDisplay>>>,
    peer: Mutex<String>,
}

/// The video pipeline of one call
pub struct VideoPipeline {
    core: Arc<VideoCore>,
    source: Mutex<Option<Box<dyn VideoStreamHandle>>>,
    fps_timer: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl VideoPipeline {
    /// Create the pipeline over a bound RTP session
    pub fn new(config: VideoConfig, session: Arc<RtpSession>) -> Arc<Self> {
        let jbuf = JitterBufferConfig {
            min_depth: config.jitter_min_packets,
            max_depth: config.jitter_max_packets,
        };
        let stream = MediaStream::new("video", session, jbuf);

        let fps = config.params.fps;
        let max_packet_size = config.params.max_packet_size;
        let core = Arc::new(VideoCore {
            stream,
            config,
            tx: Mutex::new(VideoTx {
                codec: None,
                encoder: None,
                packetizer: None,
                pt: 0,
                ts: 160,
                fps,
                max_packet_size,
                picup: true,
                muted: false,
                mute_frame: None,
                frames: 0,
                efps: 0,
            }),
            rx: Mutex::new(VideoRx {
                codec: None,
                decoder: None,
                depacketizer: None,
                pt: None,
                frames: 0,
                efps: 0,
            }),
            formats: Mutex::new(Vec::new()),
            display: Mutex::new(None),
            peer: Mutex::new(String::new()),
        });

        let recv_core = Arc::downgrade(&core);
        core.stream.set_recv_handler(move |header, payload| {
            if let Some(core) = recv_core.upgrade() {
                on_rtp(&core, header, payload);
            }
        });

        // peer keyframe requests (FIR or PLI) force an intra picture
        let feedback_core = Arc::downgrade(&core);
        core.stream.set_feedback_handler(move |_event| {
            if let Some(core) = feedback_core.upgrade() {
                core.tx.lock().picup = true;
            }
        });

        Arc::new(Self {
            core,
            source: Mutex::new(None),
            fps_timer: Mutex::new(None),
        })
    }

    /// The media stream (direction, stats, hold)
    pub fn stream(&self) -> &Arc<MediaStream> {
        &self.core.stream
    }

    /// Negotiated local formats, for payload-type switching on receive
    pub fn set_local_formats(&self, formats: Vec<SdpFormat>) {
        *self.core.formats.lock() = formats;
    }

    /// (Re)create the encoder and packetizer
    pub fn set_encoder(
        &self,
        codec: Arc<dyn VideoCodec>,
        pt_tx: u8,
        fmtp: Option<&str>,
    ) -> Result<()> {
        let mut tx = self.core.tx.lock();
        info!(codec = codec.info().name, pt = pt_tx, "set video encoder");

        let mut params = self.core.config.params;
        params.fps = tx.fps;
        tx.encoder = Some(codec.encoder(&params, fmtp).map_err(|e| {
            warn!("video encoder init failed: {}", e);
            e
        })?);
        tx.packetizer = Some(codec.packetizer());
        tx.pt = pt_tx;
        tx.picup = true;
        tx.codec = Some(codec);
        Ok(())
    }

    /// (Re)create the decoder and depacketizer
    pub fn set_decoder(&self, codec: Arc<dyn VideoCodec>, pt_rx: u8) -> Result<()> {
        let mut rx = self.core.rx.lock();
        info!(codec = codec.info().name, pt = pt_rx, "set video decoder");

        rx.decoder = Some(codec.decoder(None).map_err(|e| {
            warn!("video decoder init failed: {}", e);
            e
        })?);
        rx.depacketizer = Some(codec.depacketizer());
        rx.pt = Some(pt_rx);
        rx.codec = Some(codec);
        Ok(())
    }

    /// Open the display and source and begin flowing frames.
    /// `peer` labels the display output.
    pub fn start(self: &Arc<Self>, device: &str, peer: &str) -> Result<()> {
        *self.core.peer.lock() = peer.to_string();

        self.core
            .stream
            .session()
            .set_clock_rate(VIDEO_CLOCK_RATE, VIDEO_CLOCK_RATE);
        self.core.stream.start();

        // display first so the first decoded frame has somewhere to go
        if self.core.display.lock().is_none() {
            let driver = viddev::find_video_display_driver(&self.core.config.display_driver)?;
            *self.core.display.lock() = Some(driver.open_display("")?);
        }

        if self.source.lock().is_none() {
            let driver = viddev::find_video_source_driver(&self.core.config.source_driver)?;

            let frame_core = Arc::downgrade(&self.core);
            let frame_cb = Arc::new(move |frame: VideoFrame| {
                if let Some(core) = frame_core.upgrade() {
                    on_frame(&core, frame);
                }
            });

            let error_cb = Arc::new(move |message: String| {
                warn!("video source failed: {}", message);
            });

            let handle =
                driver.open_source(&self.core.config.params, device, frame_cb, error_cb)?;
            *self.source.lock() = Some(handle);
        }

        self.start_fps_timer();
        Ok(())
    }

    /// Tear down source, display and timers. Idempotent.
    pub fn stop(&self) {
        // source first so no frame callback runs during the rest
        *self.source.lock() = None;

        if let Some(task) = self.fps_timer.lock().take() {
            task.abort();
        }

        *self.core.display.lock() = None;
        self.core.stream.stop();
    }

    /// Replace outgoing pictures with a fixed frame (or stop doing so)
    pub fn mute(&self, muted: bool) {
        let mut tx = self.core.tx.lock();
        tx.muted = muted;
        // the next real picture must be decodable on its own
        tx.picup = true;
    }

    /// Force the next encoded picture to be a keyframe
    pub fn request_keyframe(&self) {
        self.core.tx.lock().picup = true;
    }

    /// Estimated frame rates over the last window: (tx, rx)
    pub fn estimated_fps(&self) -> (u32, u32) {
        (self.core.tx.lock().efps, self.core.rx.lock().efps)
    }

    /// Apply the peer's `framerate` attribute
    pub fn set_fps(&self, fps: u32) {
        if fps > 0 {
            self.core.tx.lock().fps = fps;
        }
    }

    fn start_fps_timer(self: &Arc<Self>) {
        let mut timer = self.fps_timer.lock();
        if timer.is_some() {
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            debug!("fps estimation requires a running reactor");
            return;
        }

        let core = Arc::downgrade(&self.core);
        *timer = Some(tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(FPS_WINDOW_SECS as u64));
            interval.tick().await; // first tick fires immediately
            loop {
                interval.tick().await;
                let core = match core.upgrade() {
                    Some(core) => core,
                    None => break,
                };
                {
                    let mut tx = core.tx.lock();
                    tx.efps = tx.frames / FPS_WINDOW_SECS;
                    tx.frames = 0;
                }
                {
                    let mut rx = core.rx.lock();
                    rx.efps = rx.frames / FPS_WINDOW_SECS;
                    rx.frames = 0;
                }
            }
        }));
    }
}

impl Drop for VideoPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Capture path: encode the frame and send its packets, marker on the
/// last one, one timestamp for the whole picture.
fn on_frame(core: &VideoCore, frame: VideoFrame) {
    let mut guard = core.tx.lock();
    let tx = &mut *guard;

    if !core.stream.is_active() {
        return;
    }
    tx.frames += 1;

    let frame = if tx.muted {
        tx.mute_frame
            .get_or_insert_with(|| VideoFrame::filled(frame.size, 0x66, 0xff, 0xff))
            .clone()
    } else {
        frame
    };

    let encoder = match &mut tx.encoder {
        Some(encoder) => encoder,
        None => return,
    };
    let encoded = match encoder.encode(&frame, tx.picup) {
        Ok(encoded) => encoded,
        Err(e) => {
            warn!("video encode failed: {}", e);
            return;
        }
    };
    tx.picup = false;

    let packetizer = match &mut tx.packetizer {
        Some(packetizer) => packetizer,
        None => return,
    };

    let (pt, ts) = (tx.pt, tx.ts);
    let stream = &core.stream;
    let result = packetizer.packetize(&encoded, tx.max_packet_size, &mut |last, payload| {
        stream.send(last, pt, ts, payload)?;
        Ok(())
    });
    if let Err(e) = result {
        warn!("video packetize failed: {}", e);
    }

    tx.ts = tx.ts.wrapping_add(VIDEO_CLOCK_RATE / tx.fps.max(1));
}

/// Receive path: reassemble, decode, display; ask for a keyframe on
/// any decode failure.
fn on_rtp(core: &VideoCore, header: RtpHeader, payload: Bytes) {
    let pt = header.payload_type;

    let current = core.rx.lock().pt;
    if current != Some(pt) {
        let format = core
            .formats
            .lock()
            .iter()
            .find(|f| f.payload_type == pt)
            .cloned();
        let format = match format {
            Some(format) => format,
            None => {
                debug!(pt, "dropping video packet with unknown payload type");
                return;
            }
        };

        if let Some(old) = current {
            info!(old, new = pt, "video decoder changed payload type");
        }
        if let Err(e) = swap_decoder(core, &format) {
            warn!("video decoder swap failed: {}", e);
            return;
        }
    }

    let assembled = {
        let mut rx = core.rx.lock();
        let depacketizer = match &mut rx.depacketizer {
            Some(depacketizer) => depacketizer,
            None => return,
        };
        match depacketizer.depacketize(header.marker, &payload) {
            Ok(assembled) => assembled,
            Err(e) => {
                debug!("video depacketize failed: {}", e);
                request_peer_keyframe(core);
                return;
            }
        }
    };

    let Some(frame_data) = assembled else {
        return;
    };

    let decoded = {
        let mut rx = core.rx.lock();
        let decoder = match &mut rx.decoder {
            Some(decoder) => decoder,
            None => return,
        };
        match decoder.decode(&frame_data) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("video decode failed: {}", e);
                request_peer_keyframe(core);
                return;
            }
        }
    };

    if let Some(frame) = decoded {
        core.rx.lock().frames += 1;
        let peer = core.peer.lock().clone();
        if let Some(display) = core.display.lock().as_mut() {
            if let Err(e) = display.display(&peer, &frame) {
                warn!("video display failed: {}", e);
            }
        }
    }
}

fn request_peer_keyframe(core: &VideoCore) {
    if let Err(e) = core.stream.request_keyframe() {
        debug!("keyframe request not sent: {}", e);
    }
}

fn swap_decoder(core: &VideoCore, format: &SdpFormat) -> Result<()> {
    let codec = find_video_codec(&format.name)
        .ok_or_else(|| Error::NotFound(format!("video codec {}", format.name)))?;

    let mut rx = core.rx.lock();
    rx.decoder = Some(codec.decoder(format.fmtp.as_deref())?);
    rx.depacketizer = Some(codec.depacketizer());
    rx.pt = Some(format.payload_type);
    rx.codec = Some(codec);
    Ok(())
}
