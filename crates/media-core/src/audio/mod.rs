//! Audio pipeline
//!
//! Composes the transmit direction (capture, buffer, resample, filter,
//! encode, RTP) and the receive direction (RTP, jitter buffer, decode,
//! filter, resample, buffer, playback) around one media stream, with
//! RFC 4733 telephony events interleaved on the transmit side.

pub mod buffer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use softsip_rtp_core::jbuf::JitterBufferConfig;
use softsip_rtp_core::packet::RtpHeader;
use softsip_rtp_core::session::RtpSession;
use softsip_rtp_core::PT_COMFORT_NOISE;
use softsip_sdp_core::SdpFormat;

use crate::codec::{
    dsp_clock_rate, find_audio_codec, half_timestamp_rate, AudioCodec, AudioDecoder, AudioEncoder,
};
use crate::device::{self, AudioStreamHandle};
use crate::dtmf::{self, TelephonyEvents};
use crate::error::Error;
use crate::filter::{self, AudioFilter, FilterParams};
use crate::resamp::Resampler;
use crate::stream::MediaStream;
use crate::types::AudioParams;
use crate::{Result, SAMPLE_SCRATCH};

use buffer::PcmBuffer;

/// How the transmit tick is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxMode {
    /// Encode inside the capture callback
    Poll,
    /// Dedicated worker thread
    Thread,
    /// Dedicated worker thread at real-time priority where available
    ThreadRealtime,
    /// Tick on the reactor's timer
    Timer,
}

/// Audio pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Capture driver name; empty picks the first registered
    pub source_driver: String,

    /// Capture device name, driver-specific
    pub source_device: String,

    /// Playback driver name; empty picks the first registered
    pub player_driver: String,

    /// Playback device name, driver-specific
    pub player_device: String,

    /// Force the capture side to this rate, resampling to the codec rate
    pub source_rate: Option<u32>,

    /// Force the playback side to this rate, resampling from the codec rate
    pub player_rate: Option<u32>,

    /// Transmit tick mode
    pub tx_mode: TxMode,

    /// Open the source before the player
    pub source_first: bool,

    /// Packet time in milliseconds
    pub ptime: u32,

    /// Minimum jitter buffering in milliseconds
    pub jitter_min_ms: u32,

    /// Maximum jitter buffering in milliseconds
    pub jitter_max_ms: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            source_driver: String::new(),
            source_device: String::new(),
            player_driver: String::new(),
            player_device: String::new(),
            source_rate: None,
            player_rate: None,
            tx_mode: TxMode::Poll,
            source_first: true,
            ptime: 20,
            jitter_min_ms: 40,
            jitter_max_ms: 200,
        }
    }
}

/// Events surfaced to the owning call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioEvent {
    /// A DTMF digit arrived from the peer
    Dtmf {
        /// The keypad character
        digit: char,
        /// End-of-event flag
        end: bool,
    },

    /// The capture device failed; the transmit direction is down
    SourceError(String),
}

type EventHandler = Arc<dyn Fn(AudioEvent) + Send + Sync>;

/// Transmit direction state
struct AudioTx {
    codec: Option<Arc<dyn AudioCodec>>,
    encoder: Option<Box<dyn AudioEncoder>>,
    pt: u8,
    fmtp: Option<String>,
    channels: u8,
    buffer: Option<Arc<PcmBuffer>>,
    resampler: Option<Resampler>,
    sampv: Vec<i16>,
    sampv_rs: Vec<i16>,
    frame: Vec<u8>,
    silence: Vec<u8>,
    packet: Vec<u8>,
    ptime: u32,
    ts: u32,
    ts_tel: u32,
    marker: bool,
    is_g722: bool,
    muted: bool,
    /// remote telephone-event payload type
    pt_tel: Option<u8>,
    cur_digit: Option<char>,
    frame_bytes: usize,
}

/// Receive direction state
struct AudioRx {
    codec: Option<Arc<dyn AudioCodec>>,
    decoder: Option<Box<dyn AudioDecoder>>,
    pt: Option<u8>,
    fmtp: Option<String>,
    /// local telephone-event payload type
    pt_tel: Option<u8>,
    buffer: Option<Arc<PcmBuffer>>,
    resampler: Option<Resampler>,
    sampv: Vec<i16>,
    sampv_rs: Vec<i16>,
    out_bytes: Vec<u8>,
    ptime: u32,
    last_seq: Option<u16>,
    /// rate the open player runs at, for mid-call decoder swaps
    play_rate: Option<u32>,
}

/// State shared with device threads and the receive path
struct AudioCore {
    stream: Arc<MediaStream>,
    config: AudioConfig,
    tx: Mutex<AudioTx>,
    rx: Mutex<AudioRx>,
    telev: Mutex<TelephonyEvents>,
    filters: Mutex<Vec<Box<dyn AudioFilter>>>,
    /// negotiated local formats, for payload-type switching on receive
    formats: Mutex<Vec<SdpFormat>>,
    events: Mutex<Option<EventHandler>>,
}

/// The audio pipeline of one call
pub struct AudioPipeline {
    core: Arc<AudioCore>,
    source: Mutex<Option<Box<dyn AudioStreamHandle>>>,
    player: Mutex<Option<Box<dyn AudioStreamHandle>>>,
    tx_thread: Mutex<Option<(Arc<AtomicBool>, std::thread::JoinHandle<()>)>>,
    tx_timer: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl AudioPipeline {
    /// Create the pipeline over a bound RTP session
    pub fn new(config: AudioConfig, session: Arc<RtpSession>) -> Arc<Self> {
        let jbuf =
            JitterBufferConfig::from_ms(config.jitter_min_ms, config.jitter_max_ms, config.ptime);
        let stream = MediaStream::new("audio", session, jbuf);

        let ptime = config.ptime;
        let core = Arc::new(AudioCore {
            stream,
            config,
            tx: Mutex::new(AudioTx {
                codec: None,
                encoder: None,
                pt: 0,
                fmtp: None,
                channels: 1,
                buffer: None,
                resampler: None,
                sampv: vec![0; SAMPLE_SCRATCH],
                sampv_rs: vec![0; SAMPLE_SCRATCH],
                frame: Vec::new(),
                silence: Vec::new(),
                packet: vec![0; SAMPLE_SCRATCH * 2],
                ptime,
                ts: 160,
                ts_tel: 160,
                marker: true,
                is_g722: false,
                muted: false,
                pt_tel: None,
                cur_digit: None,
                frame_bytes: 0,
            }),
            rx: Mutex::new(AudioRx {
                codec: None,
                decoder: None,
                pt: None,
                fmtp: None,
                pt_tel: None,
                buffer: None,
                resampler: None,
                sampv: vec![0; SAMPLE_SCRATCH],
                sampv_rs: vec![0; SAMPLE_SCRATCH],
                out_bytes: vec![0; SAMPLE_SCRATCH * 2],
                ptime,
                last_seq: None,
                play_rate: None,
            }),
            telev: Mutex::new(TelephonyEvents::new(ptime.max(dtmf::TELEV_PTIME))),
            filters: Mutex::new(Vec::new()),
            formats: Mutex::new(Vec::new()),
            events: Mutex::new(None),
        });

        let pipeline = Arc::new(Self {
            core: Arc::clone(&core),
            source: Mutex::new(None),
            player: Mutex::new(None),
            tx_thread: Mutex::new(None),
            tx_timer: Mutex::new(None),
        });

        let recv_core = Arc::downgrade(&core);
        core.stream.set_recv_handler(move |header, payload| {
            if let Some(core) = recv_core.upgrade() {
                on_rtp(&core, header, payload);
            }
        });

        pipeline
    }

    /// The media stream (direction, stats, hold)
    pub fn stream(&self) -> &Arc<MediaStream> {
        &self.core.stream
    }

    /// Register the handler for DTMF and device events
    pub fn set_event_handler<F>(&self, handler: F)
    where
        F: Fn(AudioEvent) + Send + Sync + 'static,
    {
        *self.core.events.lock() = Some(Arc::new(handler));
    }

    /// Negotiated local formats, consulted when the peer switches
    /// payload types mid-call. Also fixes the local telephone-event PT.
    pub fn set_local_formats(&self, formats: Vec<SdpFormat>) {
        let pt_tel = formats
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(softsip_sdp_core::TELEPHONE_EVENT))
            .map(|f| f.payload_type);
        self.core.rx.lock().pt_tel = pt_tel;
        *self.core.formats.lock() = formats;
    }

    /// The peer's telephone-event payload type, used for transmit
    pub fn set_remote_telev_pt(&self, pt: Option<u8>) {
        self.core.tx.lock().pt_tel = pt;
    }

    /// (Re)create the encoder.
    ///
    /// Setting an identical codec, payload type and fmtp again is a
    /// no-op. A codec with a different effective rate or channel count
    /// re-opens the audio source at the new rate.
    pub fn set_encoder(
        &self,
        codec: Arc<dyn AudioCodec>,
        pt_tx: u8,
        fmtp: Option<&str>,
    ) -> Result<()> {
        let reset;
        {
            let mut tx = self.core.tx.lock();

            let same_instance = tx.codec.as_ref().map(|c| {
                let a = c.info();
                let b = codec.info();
                a.name == b.name && a.clock_rate == b.clock_rate && a.channels == b.channels
            });
            if same_instance == Some(true)
                && tx.pt == pt_tx
                && tx.fmtp.as_deref() == fmtp
                && tx.encoder.is_some()
            {
                return Ok(());
            }

            let info = codec.info();
            info!(
                codec = info.name,
                rate = dsp_clock_rate(info.name, info.clock_rate),
                channels = info.channels,
                pt = pt_tx,
                "set audio encoder"
            );

            reset = !codec_equal(tx.codec.as_deref(), &*codec);

            let params = AudioParams::new(
                dsp_clock_rate(info.name, info.clock_rate),
                info.channels,
                tx.ptime,
            );
            tx.encoder = Some(codec.encoder(&params, fmtp).map_err(|e| {
                warn!("encoder init failed: {}", e);
                e
            })?);
            tx.is_g722 = half_timestamp_rate(info.name);
            tx.channels = info.channels;
            tx.pt = pt_tx;
            tx.fmtp = fmtp.map(str::to_string);
            tx.codec = Some(codec);
        }

        if reset {
            // the source must reopen at the new rate before encoding resumes
            self.stop_tx_worker();
            *self.source.lock() = None;
        }

        self.update_stream_clock();

        if self.source.lock().is_none() && self.core.stream.is_active() {
            self.start()?;
        }
        Ok(())
    }

    /// (Re)create the decoder; a different effective rate or channel
    /// count re-opens the player.
    pub fn set_decoder(
        &self,
        codec: Arc<dyn AudioCodec>,
        pt_rx: u8,
        fmtp: Option<&str>,
    ) -> Result<()> {
        let reset;
        {
            let mut rx = self.core.rx.lock();

            let info = codec.info();
            info!(
                codec = info.name,
                rate = dsp_clock_rate(info.name, info.clock_rate),
                channels = info.channels,
                pt = pt_rx,
                "set audio decoder"
            );

            reset = !codec_equal(rx.codec.as_deref(), &*codec);

            rx.decoder = Some(codec.decoder(fmtp).map_err(|e| {
                warn!("decoder init failed: {}", e);
                e
            })?);
            rx.pt = Some(pt_rx);
            rx.fmtp = fmtp.map(str::to_string);
            rx.codec = Some(codec);
        }

        self.update_stream_clock();

        if reset {
            *self.player.lock() = None;
            self.core.filters.lock().clear();
            if self.core.stream.is_active() {
                self.start()?;
            }
        }
        Ok(())
    }

    /// Open devices and begin flowing media. The open order of source
    /// and player is configurable; both require their codec to be set.
    pub fn start(&self) -> Result<()> {
        self.core.stream.start();
        self.setup_filters();

        if self.core.config.source_first {
            self.start_source()?;
            self.start_player()?;
        } else {
            self.start_player()?;
            self.start_source()?;
        }
        Ok(())
    }

    /// Tear down devices, workers and buffers. Idempotent; a following
    /// [`AudioPipeline::start`] behaves like a fresh pipeline.
    pub fn stop(&self) {
        self.stop_tx_worker();

        // device order matters: capture first, then playback
        *self.source.lock() = None;
        *self.player.lock() = None;

        self.core.filters.lock().clear();
        {
            let mut tx = self.core.tx.lock();
            tx.buffer = None;
            tx.resampler = None;
            tx.marker = true;
        }
        {
            let mut rx = self.core.rx.lock();
            rx.buffer = None;
            rx.resampler = None;
            rx.last_seq = None;
            rx.play_rate = None;
        }

        self.core.stream.stop();
    }

    /// Replace subsequent captured frames with silence (or stop doing so)
    pub fn mute(&self, muted: bool) {
        self.core.tx.lock().muted = muted;
    }

    /// Whether transmit audio is muted
    pub fn is_muted(&self) -> bool {
        self.core.tx.lock().muted
    }

    /// Begin transmitting a DTMF digit
    pub fn send_digit(&self, digit: char) -> Result<()> {
        let code = dtmf::digit_to_code(digit)
            .ok_or_else(|| Error::BadInput(format!("not a DTMF digit: {:?}", digit)))?;

        info!(%digit, "sending DTMF digit");
        self.core.telev.lock().send(code, false);
        self.core.tx.lock().cur_digit = Some(digit);
        Ok(())
    }

    /// Release the digit currently being transmitted
    pub fn release_digit(&self) -> Result<()> {
        let digit = self.core.tx.lock().cur_digit.take();
        if let Some(digit) = digit {
            let code = dtmf::digit_to_code(digit)
                .ok_or_else(|| Error::BadInput(format!("not a DTMF digit: {:?}", digit)))?;
            info!(%digit, "ending DTMF digit");
            self.core.telev.lock().send(code, true);
        }
        Ok(())
    }

    /// The peer changed our packet time via SDP; future frames use it
    pub fn set_ptime(&self, ptime: u32) {
        let mut tx = self.core.tx.lock();
        if tx.ptime != ptime {
            info!(old = tx.ptime, new = ptime, "peer changed packet time");
            tx.ptime = ptime;
        }
    }

    fn update_stream_clock(&self) {
        let tx_rate = self
            .core
            .tx
            .lock()
            .codec
            .as_ref()
            .map(|c| c.info().clock_rate);
        let rx_rate = self
            .core
            .rx
            .lock()
            .codec
            .as_ref()
            .map(|c| c.info().clock_rate);
        let session = self.core.stream.session();
        session.set_clock_rate(tx_rate.unwrap_or(8000), rx_rate.unwrap_or(8000));
    }

    fn setup_filters(&self) {
        let mut filters = self.core.filters.lock();
        if !filters.is_empty() {
            return;
        }

        let enc = self.core.tx.lock().codec.as_ref().map(|c| {
            let info = c.info();
            let rate = dsp_clock_rate(info.name, info.clock_rate);
            FilterParams {
                clock_rate: rate,
                channels: info.channels,
                frame_samples: AudioParams::new(rate, info.channels, self.core.config.ptime)
                    .frame_samples(),
            }
        });
        let dec = self.core.rx.lock().codec.as_ref().map(|c| {
            let info = c.info();
            let rate = dsp_clock_rate(info.name, info.clock_rate);
            FilterParams {
                clock_rate: rate,
                channels: info.channels,
                frame_samples: AudioParams::new(rate, info.channels, self.core.config.ptime)
                    .frame_samples(),
            }
        });

        *filters = filter::build_chain(enc.as_ref(), dec.as_ref());
    }

    fn start_source(&self) -> Result<()> {
        let params;
        {
            let mut tx = self.core.tx.lock();
            let info = match &tx.codec {
                Some(codec) => codec.info().clone(),
                None => return Ok(()),
            };

            let codec_rate = dsp_clock_rate(info.name, info.clock_rate);
            let mut dsp_rate = codec_rate;
            if let Some(rate) = self.core.config.source_rate {
                if rate != codec_rate {
                    info!(from = rate, to = codec_rate, "capture resampler enabled");
                    tx.resampler = Some(Resampler::new(rate, codec_rate, info.channels)?);
                    dsp_rate = rate;
                }
            }

            params = AudioParams::new(dsp_rate, info.channels, tx.ptime);
            tx.frame_bytes = params.frame_bytes();
            tx.frame = vec![0; tx.frame_bytes];
            tx.silence = vec![0; tx.frame_bytes];
            if tx.buffer.is_none() {
                tx.buffer = Some(Arc::new(PcmBuffer::new(tx.frame_bytes * 30)));
            }
        }

        if self.source.lock().is_some() {
            return Ok(());
        }

        let driver = device::find_source_driver(&self.core.config.source_driver)?;

        let capture_core = Arc::downgrade(&self.core);
        let read = Arc::new(move |data: &[u8]| {
            if let Some(core) = capture_core.upgrade() {
                on_capture(&core, data);
            }
        });

        let error_core = Arc::downgrade(&self.core);
        let error = Arc::new(move |message: String| {
            if let Some(core) = error_core.upgrade() {
                warn!("audio source failed: {}", message);
                emit_event(&core, AudioEvent::SourceError(message));
            }
        });

        let handle =
            driver.open_source(&params, &self.core.config.source_device, read, error)?;
        *self.source.lock() = Some(handle);

        self.start_tx_worker();
        Ok(())
    }

    fn start_player(&self) -> Result<()> {
        let params;
        let buffer;
        {
            let mut rx = self.core.rx.lock();
            let info = match &rx.codec {
                Some(codec) => codec.info().clone(),
                None => return Ok(()),
            };

            let codec_rate = dsp_clock_rate(info.name, info.clock_rate);
            let mut dsp_rate = codec_rate;
            if let Some(rate) = self.core.config.player_rate {
                if rate != codec_rate {
                    info!(from = codec_rate, to = rate, "playback resampler enabled");
                    rx.resampler = Some(Resampler::new(codec_rate, rate, info.channels)?);
                    dsp_rate = rate;
                }
            }

            params = AudioParams::new(dsp_rate, info.channels, rx.ptime);
            rx.play_rate = Some(dsp_rate);
            let shared = match &rx.buffer {
                Some(shared) => Arc::clone(shared),
                None => {
                    let shared = Arc::new(PcmBuffer::new(params.frame_bytes() * 8));
                    rx.buffer = Some(Arc::clone(&shared));
                    shared
                }
            };
            buffer = shared;
        }

        if self.player.lock().is_some() {
            return Ok(());
        }

        let driver = device::find_player_driver(&self.core.config.player_driver)?;
        let write = Arc::new(move |dst: &mut [u8]| {
            buffer.read(dst);
            true
        });

        let handle = driver.open_player(&params, &self.core.config.player_device, write)?;
        *self.player.lock() = Some(handle);
        Ok(())
    }

    fn start_tx_worker(&self) {
        match self.core.config.tx_mode {
            TxMode::Poll => {}
            TxMode::Thread | TxMode::ThreadRealtime => {
                let mut worker = self.tx_thread.lock();
                if worker.is_some() {
                    return;
                }
                let run = Arc::new(AtomicBool::new(true));
                let running = Arc::clone(&run);
                let core = Arc::downgrade(&self.core);
                let realtime = self.core.config.tx_mode == TxMode::ThreadRealtime;

                let thread = std::thread::Builder::new()
                    .name("audio-tx".into())
                    .spawn(move || {
                        if realtime {
                            // best-effort; priority elevation is platform policy
                            debug!("audio tx thread requested real-time scheduling");
                        }
                        while running.load(Ordering::Relaxed) {
                            if let Some(core) = core.upgrade() {
                                poll_tx(&core);
                                check_telev(&core);
                            } else {
                                break;
                            }
                            std::thread::sleep(Duration::from_millis(5));
                        }
                    });

                match thread {
                    Ok(thread) => *worker = Some((run, thread)),
                    Err(e) => warn!("audio tx thread not started: {}", e),
                }
            }
            TxMode::Timer => {
                let mut timer = self.tx_timer.lock();
                if timer.is_some() {
                    return;
                }
                if tokio::runtime::Handle::try_current().is_err() {
                    warn!("timer tx mode requires a running reactor");
                    return;
                }
                let core = Arc::downgrade(&self.core);
                *timer = Some(tokio::spawn(async move {
                    let mut interval = tokio::time::interval(Duration::from_millis(5));
                    loop {
                        interval.tick().await;
                        match core.upgrade() {
                            Some(core) => {
                                poll_tx(&core);
                                check_telev(&core);
                            }
                            None => break,
                        }
                    }
                }));
            }
        }
    }

    fn stop_tx_worker(&self) {
        if let Some((run, thread)) = self.tx_thread.lock().take() {
            run.store(false, Ordering::Relaxed);
            let _ = thread.join();
        }
        if let Some(task) = self.tx_timer.lock().take() {
            task.abort();
        }
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn codec_equal(current: Option<&dyn AudioCodec>, new: &dyn AudioCodec) -> bool {
    match current {
        None => false,
        Some(current) => {
            let a = current.info();
            let b = new.info();
            dsp_clock_rate(a.name, a.clock_rate) == dsp_clock_rate(b.name, b.clock_rate)
                && a.channels == b.channels
        }
    }
}

fn emit_event(core: &AudioCore, event: AudioEvent) {
    let handler = core.events.lock().clone();
    if let Some(handler) = handler {
        handler(event);
    }
}

/// Capture callback. Real-time path: buffers the frame and, in poll
/// mode, runs the encode tick inline. May run on any driver thread.
fn on_capture(core: &AudioCore, data: &[u8]) {
    {
        let tx = core.tx.lock();
        let buffer = match &tx.buffer {
            Some(buffer) => buffer,
            None => return,
        };
        if tx.muted {
            // devices misbehave without a steady RTP flow, so muted
            // capture still feeds silence through the encoder
            let len = data.len().min(tx.silence.len());
            buffer.write(&tx.silence[..len]);
        } else {
            buffer.write(data);
        }
    }

    if core.config.tx_mode == TxMode::Poll {
        poll_tx(core);
        check_telev(core);
    }
}

/// One transmit tick: read a frame, resample, filter, encode, send.
/// Real-time path; all scratch buffers are preallocated.
fn poll_tx(core: &AudioCore) {
    let mut guard = core.tx.lock();
    let tx = &mut *guard;

    let buffer = match &tx.buffer {
        Some(buffer) => Arc::clone(buffer),
        None => return,
    };
    if tx.frame_bytes == 0 || !buffer.read_frame(&mut tx.frame[..tx.frame_bytes]) {
        return;
    }

    let mut sampc = tx.frame_bytes / 2;
    for (chunk, sample) in tx.frame[..tx.frame_bytes]
        .chunks_exact(2)
        .zip(tx.sampv.iter_mut())
    {
        *sample = i16::from_le_bytes([chunk[0], chunk[1]]);
    }

    let samples: &mut [i16] = if let Some(resampler) = &mut tx.resampler {
        match resampler.process(&tx.sampv[..sampc], &mut tx.sampv_rs) {
            Ok(n) => {
                sampc = n;
                &mut tx.sampv_rs[..sampc]
            }
            Err(e) => {
                warn!("capture resample failed: {}", e);
                return;
            }
        }
    } else {
        &mut tx.sampv[..sampc]
    };

    // encode-side filters in list order
    for f in core.filters.lock().iter_mut() {
        if let Err(e) = f.encode(samples) {
            warn!(filter = f.name(), "encode filter failed: {}", e);
        }
    }

    let encoder = match &mut tx.encoder {
        Some(encoder) => encoder,
        None => return,
    };
    let len = match encoder.encode(samples, &mut tx.packet) {
        Ok(len) => len,
        Err(e) => {
            warn!("audio encode failed: {}", e);
            return;
        }
    };

    if len > 0 {
        if let Err(e) = core.stream.send(tx.marker, tx.pt, tx.ts, &tx.packet[..len]) {
            debug!("audio send failed: {}", e);
        }
    }

    let step = (sampc / tx.channels.max(1) as usize) as u32;
    tx.ts = tx.ts.wrapping_add(if tx.is_g722 { step / 2 } else { step });
    tx.marker = false;
}

/// Interleave pending telephony events onto the stream. Events keep
/// their own timestamp anchor: all packets of one event share the
/// timestamp captured at its onset.
fn check_telev(core: &AudioCore) {
    let mut out = BytesMut::new();
    let marker = match core.telev.lock().poll(&mut out) {
        Some(marker) => marker,
        None => return,
    };

    let (pt_tel, ts_tel) = {
        let mut tx = core.tx.lock();
        let pt_tel = match tx.pt_tel {
            Some(pt) => pt,
            None => return,
        };
        if marker {
            tx.ts_tel = tx.ts;
        }
        (pt_tel, tx.ts_tel)
    };

    if let Err(e) = core.stream.send(marker, pt_tel, ts_tel, &out) {
        warn!("telephony-event send failed: {}", e);
    }
}

/// In-order receive path, after the jitter buffer
fn on_rtp(core: &AudioCore, header: RtpHeader, payload: Bytes) {
    let pt = header.payload_type;

    // telephone events decode off the speech path
    if core.rx.lock().pt_tel == Some(pt) {
        handle_telev(core, &payload);
        return;
    }

    // Comfort Noise (RFC 3389) is dropped
    if pt == PT_COMFORT_NOISE {
        return;
    }

    // payload type changed: switch to the matching negotiated format,
    // or drop until renegotiation brings one
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
                debug!(pt, "dropping packet with unknown payload type");
                return;
            }
        };

        if let Some(old) = current {
            info!(old, new = pt, "audio decoder changed payload type");
        }
        if let Err(e) = swap_decoder(core, &format) {
            warn!("decoder swap failed: {}", e);
            return;
        }
    }

    decode_frame(core, &header, &payload);
}

/// Replace the decoder in place for a mid-call payload-type switch.
/// When the new codec runs at a different rate than the open player,
/// a resampler bridges the difference instead of re-opening the device
/// from the receive path.
fn swap_decoder(core: &AudioCore, format: &SdpFormat) -> Result<()> {
    let codec = find_audio_codec(&format.name, Some(format.clock_rate), Some(format.channels))
        .ok_or_else(|| Error::NotFound(format!("codec {}", format.name)))?;

    let mut rx = core.rx.lock();
    rx.decoder = Some(codec.decoder(format.fmtp.as_deref())?);

    let info = codec.info();
    let codec_rate = dsp_clock_rate(info.name, info.clock_rate);
    rx.resampler = match rx.play_rate {
        Some(play_rate) if play_rate != codec_rate => {
            Some(Resampler::new(codec_rate, play_rate, info.channels)?)
        }
        _ => None,
    };

    rx.pt = Some(format.payload_type);
    rx.fmtp = format.fmtp.clone();
    rx.codec = Some(codec);
    Ok(())
}

fn handle_telev(core: &AudioCore, payload: &[u8]) {
    let event = match core.telev.lock().recv(payload) {
        Ok(Some(event)) => event,
        Ok(None) => return,
        Err(e) => {
            debug!("bad telephone-event packet: {}", e);
            return;
        }
    };

    if let Some(digit) = dtmf::code_to_digit(event.code) {
        info!(%digit, end = event.end, "DTMF digit received");
        emit_event(
            core,
            AudioEvent::Dtmf {
                digit,
                end: event.end,
            },
        );
    }
}

/// Decode one packet (concealing any gap before it), run the decode
/// filters in reverse order, resample and hand to the playback buffer.
fn decode_frame(core: &AudioCore, header: &RtpHeader, payload: &[u8]) {
    let mut guard = core.rx.lock();
    let rx = &mut *guard;

    if rx.decoder.is_none() {
        return;
    }

    // conceal lost frames ahead of this packet
    if let Some(last) = rx.last_seq {
        let gap = header.sequence.wrapping_sub(last.wrapping_add(1));
        if gap > 0 && gap < 0x8000 {
            for _ in 0..gap.min(2) {
                conceal_one(core, rx);
            }
        }
    }
    rx.last_seq = Some(header.sequence);

    let decoder = match rx.decoder.as_mut() {
        Some(decoder) => decoder,
        None => return,
    };
    let sampc = match decoder.decode(payload, &mut rx.sampv) {
        Ok(sampc) => sampc,
        Err(e) => {
            warn!("audio decode failed: {}", e);
            return;
        }
    };

    deliver_samples(core, rx, sampc);
}

/// Run packet-loss concealment for one missing frame
fn conceal_one(core: &AudioCore, rx: &mut AudioRx) {
    let decoder = match rx.decoder.as_mut() {
        Some(decoder) => decoder,
        None => return,
    };
    if !decoder.has_plc() {
        return;
    }

    match decoder.conceal(&mut rx.sampv) {
        Ok(sampc) if sampc > 0 => deliver_samples(core, rx, sampc),
        Ok(_) => {}
        Err(e) => debug!("concealment failed: {}", e),
    }
}

fn deliver_samples(core: &AudioCore, rx: &mut AudioRx, mut sampc: usize) {
    // decode-side filters in reverse list order
    for f in core.filters.lock().iter_mut().rev() {
        if let Err(e) = f.decode(&mut rx.sampv[..sampc]) {
            warn!(filter = f.name(), "decode filter failed: {}", e);
        }
    }

    let samples: &[i16] = if let Some(resampler) = &mut rx.resampler {
        match resampler.process(&rx.sampv[..sampc], &mut rx.sampv_rs) {
            Ok(n) => {
                sampc = n;
                &rx.sampv_rs[..sampc]
            }
            Err(e) => {
                warn!("playback resample failed: {}", e);
                return;
            }
        }
    } else {
        &rx.sampv[..sampc]
    };

    let buffer = match &rx.buffer {
        Some(buffer) => buffer,
        None => return,
    };

    for (sample, chunk) in samples.iter().zip(rx.out_bytes.chunks_exact_mut(2)) {
        chunk.copy_from_slice(&sample.to_le_bytes());
    }
    buffer.write(&rx.out_bytes[..sampc * 2]);
}
