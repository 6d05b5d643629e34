//! RTP session transport
//!
//! An [`RtpSession`] owns the UDP socket pair of one media stream. It
//! assigns sequence numbers and the transmit SSRC at send time, counts
//! lost packets from sequence gaps on receive, tracks the remote SSRC and
//! reports changes to the owner, schedules periodic RTCP reports, answers
//! keyframe requests with PLI or FIR, and transmits keep-alive packets
//! during silence.

mod port;
mod stats;

pub use stats::RtpStats;

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::packet::{RtpHeader, RtpPacket};
use crate::rtcp::{
    self, RtcpFir, RtcpPacket, RtcpPli, RtcpReceiverReport, RtcpReportBlock, RtcpSdes,
    RtcpSenderReport,
};
use crate::{Error, Result, RtpSsrc, PT_DYNAMIC_MAX, PT_DYNAMIC_MIN};

/// Receive buffer size for incoming datagrams
const RECV_SIZE: usize = 8192;

/// RTP keep-alive interval in seconds (draft-ietf-avt-app-rtp-keepalive)
const KEEPALIVE_INTERVAL_SECS: u64 = 15;

/// RTCP report interval
const RTCP_INTERVAL: Duration = Duration::from_secs(5);

/// Bitrate sampling interval
const STATS_INTERVAL: Duration = Duration::from_secs(3);

/// Configuration for binding an RTP session
#[derive(Debug, Clone)]
pub struct RtpSessionConfig {
    /// Local address to bind on
    pub local_ip: IpAddr,

    /// Lowest local port to try (rounded up to even)
    pub port_min: u16,

    /// Highest local port to try
    pub port_max: u16,

    /// Multiplex RTCP on the RTP port (`a=rtcp-mux`)
    pub rtcp_mux: bool,

    /// Enable RTCP at all
    pub rtcp_enabled: bool,
}

impl Default for RtpSessionConfig {
    fn default() -> Self {
        Self {
            local_ip: IpAddr::from([0, 0, 0, 0]),
            port_min: 10_000,
            port_max: 20_000,
            rtcp_mux: false,
            rtcp_enabled: true,
        }
    }
}

/// Per-packet receive metadata handed to the owner
#[derive(Debug, Clone, Copy)]
pub struct RxMeta {
    /// The remote SSRC differs from the previously observed one
    pub ssrc_changed: bool,

    /// Packets lost before this one, from the sequence gap
    pub lost: u16,
}

/// Feedback surfaced from received RTCP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackEvent {
    /// Peer asked for a keyframe via PLI
    PictureLoss,

    /// Peer asked for a keyframe via FIR
    FullIntra,
}

type RtpHandler = Box<dyn Fn(SocketAddr, RtpHeader, Bytes, RxMeta) + Send + Sync>;
type FeedbackHandler = Box<dyn Fn(FeedbackEvent) + Send + Sync>;

struct TxState {
    seq: u16,
    last_timestamp: u32,
}

struct RxState {
    /// last observed remote SSRC; 0 = none yet
    ssrc: RtpSsrc,
    /// previous sequence number; None before the first packet
    prev_seq: Option<u16>,
    /// extended highest sequence (cycles << 16 | seq)
    ext_highest_seq: u32,
    cumulative_lost: u32,
    /// interarrival jitter per RFC 3550 A.8, in timestamp units
    jitter: f64,
    last_transit: Option<f64>,
}

/// An RTP session bound to a local socket pair
pub struct RtpSession {
    rtp_socket: Arc<UdpSocket>,
    rtcp_socket: Option<Arc<UdpSocket>>,
    local_rtp: SocketAddr,
    local_rtcp: SocketAddr,
    ssrc: RtpSsrc,
    cname: Mutex<String>,

    tx: Mutex<TxState>,
    rx: Mutex<RxState>,
    remote_rtp: Mutex<Option<SocketAddr>>,
    remote_rtcp: Mutex<Option<SocketAddr>>,

    stats: stats::StatsInner,
    clock_rate_tx: AtomicU32,
    clock_rate_rx: AtomicU32,

    nack_pli: AtomicBool,
    fir_seq: AtomicU8,

    /// set by every send, cleared by the keep-alive check
    ka_flag: AtomicBool,
    keepalive_pt: Mutex<Option<u8>>,
    keepalive_running: AtomicBool,
    rtcp_running: AtomicBool,

    rtp_handler: Mutex<Option<Arc<RtpHandler>>>,
    feedback_handler: Mutex<Option<Arc<FeedbackHandler>>>,

    rtcp_enabled: bool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: Instant,
}

impl RtpSession {
    /// Bind a session to a socket pair from the configured port range
    pub async fn bind(config: RtpSessionConfig) -> Result<Arc<Self>> {
        let (rtp_socket, rtcp_socket) = port::bind_pair(&config).await?;

        let local_rtp = rtp_socket.local_addr()?;
        let local_rtcp = match &rtcp_socket {
            Some(s) => s.local_addr()?,
            None => local_rtp,
        };

        let mut rng = rand::thread_rng();
        let session = Arc::new(Self {
            rtp_socket: Arc::new(rtp_socket),
            rtcp_socket: rtcp_socket.map(Arc::new),
            local_rtp,
            local_rtcp,
            ssrc: rng.gen(),
            cname: Mutex::new(String::new()),
            tx: Mutex::new(TxState {
                seq: rng.gen(),
                last_timestamp: 0,
            }),
            rx: Mutex::new(RxState {
                ssrc: 0,
                prev_seq: None,
                ext_highest_seq: 0,
                cumulative_lost: 0,
                jitter: 0.0,
                last_transit: None,
            }),
            remote_rtp: Mutex::new(None),
            remote_rtcp: Mutex::new(None),
            stats: stats::StatsInner::default(),
            clock_rate_tx: AtomicU32::new(8000),
            clock_rate_rx: AtomicU32::new(8000),
            nack_pli: AtomicBool::new(false),
            fir_seq: AtomicU8::new(0),
            ka_flag: AtomicBool::new(false),
            keepalive_pt: Mutex::new(None),
            keepalive_running: AtomicBool::new(false),
            rtcp_running: AtomicBool::new(false),
            rtp_handler: Mutex::new(None),
            feedback_handler: Mutex::new(None),
            rtcp_enabled: config.rtcp_enabled,
            tasks: Mutex::new(Vec::new()),
            started: Instant::now(),
        });

        info!(rtp = %local_rtp, rtcp = %local_rtcp, ssrc = session.ssrc,
              "RTP session bound");

        Ok(session)
    }

    /// The transmit SSRC, constant for the session lifetime
    pub fn ssrc(&self) -> RtpSsrc {
        self.ssrc
    }

    /// Local RTP address
    pub fn local_rtp_addr(&self) -> SocketAddr {
        self.local_rtp
    }

    /// Local RTCP address (equal to RTP when muxed)
    pub fn local_rtcp_addr(&self) -> SocketAddr {
        self.local_rtcp
    }

    /// Last observed remote SSRC; 0 when none seen yet
    pub fn remote_ssrc(&self) -> RtpSsrc {
        self.rx.lock().ssrc
    }

    /// Set the negotiated remote RTP and RTCP addresses
    pub fn set_remote(&self, rtp: SocketAddr, rtcp: Option<SocketAddr>) {
        *self.remote_rtp.lock() = Some(rtp);
        *self.remote_rtcp.lock() = Some(rtcp.unwrap_or(rtp));
    }

    /// Media clock rates for SR timestamps and jitter, tx and rx side
    pub fn set_clock_rate(&self, tx: u32, rx: u32) {
        self.clock_rate_tx.store(tx, Ordering::Relaxed);
        self.clock_rate_rx.store(rx, Ordering::Relaxed);
    }

    /// Whether the peer advertised `a=rtcp-fb:* nack pli`
    pub fn set_nack_pli(&self, supported: bool) {
        self.nack_pli.store(supported, Ordering::Relaxed);
    }

    /// Register the handler invoked for every received RTP packet
    pub fn set_rtp_handler<F>(&self, handler: F)
    where
        F: Fn(SocketAddr, RtpHeader, Bytes, RxMeta) + Send + Sync + 'static,
    {
        *self.rtp_handler.lock() = Some(Arc::new(Box::new(handler)));
    }

    /// Register the handler invoked for keyframe-request feedback
    pub fn set_feedback_handler<F>(&self, handler: F)
    where
        F: Fn(FeedbackEvent) + Send + Sync + 'static,
    {
        *self.feedback_handler.lock() = Some(Arc::new(Box::new(handler)));
    }

    /// Start the receive loops and the bitrate sampler
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        let session = Arc::clone(self);
        let socket = Arc::clone(&self.rtp_socket);
        tasks.push(tokio::spawn(async move {
            session.rtp_recv_loop(socket).await;
        }));

        if let Some(rtcp_socket) = &self.rtcp_socket {
            let session = Arc::clone(self);
            let socket = Arc::clone(rtcp_socket);
            tasks.push(tokio::spawn(async move {
                session.rtcp_recv_loop(socket).await;
            }));
        }

        let session = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(STATS_INTERVAL);
            loop {
                interval.tick().await;
                session.stats.sample_bitrates();
            }
        }));
    }

    /// Send one RTP packet toward the negotiated remote address.
    ///
    /// The sequence number is assigned here, so packets of one session are
    /// emitted in strict sequence order regardless of the caller.
    pub fn send(&self, marker: bool, payload_type: u8, timestamp: u32, payload: &[u8]) -> Result<()> {
        let remote = self
            .remote_rtp
            .lock()
            .ok_or(Error::InvalidState("remote address not set"))?;

        let mut header;
        {
            let mut tx = self.tx.lock();
            header = RtpHeader::new(payload_type, tx.seq, timestamp, self.ssrc);
            tx.seq = tx.seq.wrapping_add(1);
            tx.last_timestamp = timestamp;
        }
        header.marker = marker;

        let mut wire = BytesMut::with_capacity(header.size() + payload.len());
        header.serialize(&mut wire);
        wire.extend_from_slice(payload);

        match self.rtp_socket.try_send_to(&wire, remote) {
            Ok(_) => {
                self.stats.count_tx(wire.len());
                self.ka_flag.store(true, Ordering::Relaxed);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                warn!("RTP send dropped: socket not ready");
                Ok(())
            }
            Err(e) => Err(Error::Transport(e)),
        }
    }

    /// Start periodic RTCP sender/receiver reports with the given CNAME
    pub fn start_rtcp(self: &Arc<Self>, cname: &str) {
        if !self.rtcp_enabled {
            return;
        }
        *self.cname.lock() = cname.to_string();
        if self.rtcp_running.swap(true, Ordering::Relaxed) {
            return;
        }

        let session = Arc::clone(self);
        self.tasks.lock().push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(RTCP_INTERVAL);
            loop {
                interval.tick().await;
                if let Err(e) = session.send_report() {
                    debug!("RTCP report not sent: {}", e);
                }
            }
        }));
    }

    /// Ask the remote sender for a keyframe.
    ///
    /// Sends PLI when the peer advertised `nack pli`, otherwise FIR.
    pub fn request_keyframe(&self) -> Result<()> {
        let remote_ssrc = self.rx.lock().ssrc;

        let packet = if self.nack_pli.load(Ordering::Relaxed) {
            RtcpPacket::PictureLossIndication(RtcpPli::new(self.ssrc, remote_ssrc))
        } else {
            let seq = self.fir_seq.fetch_add(1, Ordering::Relaxed);
            RtcpPacket::FullIntraRequest(RtcpFir::new(self.ssrc, remote_ssrc, seq))
        };

        self.send_rtcp(&[packet])
    }

    /// Payload type used for keep-alive, from the unused dynamic range.
    ///
    /// `None` disables keep-alive.
    pub fn set_keepalive_pt(&self, pt: Option<u8>) {
        if let Some(pt) = pt {
            if !(PT_DYNAMIC_MIN..=PT_DYNAMIC_MAX).contains(&pt) {
                warn!(pt, "keep-alive payload type outside dynamic range, disabled");
                *self.keepalive_pt.lock() = None;
                return;
            }
        }
        *self.keepalive_pt.lock() = pt;
    }

    /// Start the keep-alive timer.
    ///
    /// Activity is checked every half interval; after 7.5-15 s without any
    /// transmitted RTP an empty packet is sent on the keep-alive payload
    /// type, then every 15 s until regular traffic resumes.
    pub fn start_keepalive(self: &Arc<Self>) {
        if self.keepalive_running.swap(true, Ordering::Relaxed) {
            return;
        }
        let session = Arc::clone(self);
        self.tasks.lock().push(tokio::spawn(async move {
            let mut delay = Duration::from_millis(KEEPALIVE_INTERVAL_SECS * 1000 / 2);
            loop {
                tokio::time::sleep(delay).await;

                if !session.ka_flag.swap(false, Ordering::Relaxed) {
                    session.send_keepalive();
                    delay = Duration::from_secs(KEEPALIVE_INTERVAL_SECS);
                } else {
                    delay = Duration::from_millis(KEEPALIVE_INTERVAL_SECS * 1000 / 2);
                }
            }
        }));
    }

    /// Transport statistics snapshot
    pub fn stats(&self) -> RtpStats {
        self.stats.snapshot()
    }

    /// Stop all background tasks; further receives are not delivered.
    ///
    /// Safe to call more than once.
    pub fn close(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.rtcp_running.store(false, Ordering::Relaxed);
        self.keepalive_running.store(false, Ordering::Relaxed);
        *self.rtp_handler.lock() = None;
        *self.feedback_handler.lock() = None;
    }

    fn send_keepalive(&self) {
        let pt = match *self.keepalive_pt.lock() {
            Some(pt) => pt,
            None => return,
        };
        let timestamp = self.tx.lock().last_timestamp;
        debug!(pt, "sending RTP keep-alive");
        if let Err(e) = self.send(false, pt, timestamp, &[]) {
            warn!("keep-alive send failed: {}", e);
        }
        // an empty keep-alive must not suppress the next check
        self.ka_flag.store(false, Ordering::Relaxed);
    }

    fn send_rtcp(&self, packets: &[RtcpPacket]) -> Result<()> {
        let remote = self
            .remote_rtcp
            .lock()
            .ok_or(Error::InvalidState("remote RTCP address not set"))?;

        let wire = rtcp::serialize_compound(packets)?;
        let socket = self.rtcp_socket.as_deref().unwrap_or(&self.rtp_socket);

        match socket.try_send_to(&wire, remote) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(Error::Transport(e)),
        }
    }

    fn send_report(&self) -> Result<()> {
        let stats = self.stats.snapshot();
        let report_block = self.build_report_block();

        let mut packets = Vec::with_capacity(2);
        if stats.tx_packets > 0 {
            let mut sr = RtcpSenderReport::new(self.ssrc);
            sr.rtp_timestamp = self.current_rtp_timestamp();
            sr.sender_packet_count = stats.tx_packets;
            sr.sender_octet_count = stats.tx_bytes as u32;
            if let Some(block) = report_block {
                sr.report_blocks.push(block);
            }
            packets.push(RtcpPacket::SenderReport(sr));
        } else {
            let mut rr = RtcpReceiverReport::new(self.ssrc);
            if let Some(block) = report_block {
                rr.report_blocks.push(block);
            }
            packets.push(RtcpPacket::ReceiverReport(rr));
        }

        let cname = self.cname.lock().clone();
        if !cname.is_empty() {
            packets.push(RtcpPacket::SourceDescription(RtcpSdes::cname(
                self.ssrc, &cname,
            )));
        }

        self.send_rtcp(&packets)
    }

    fn build_report_block(&self) -> Option<RtcpReportBlock> {
        let rx = self.rx.lock();
        if rx.ssrc == 0 {
            return None;
        }

        let mut block = RtcpReportBlock::new(rx.ssrc);
        block.cumulative_lost = rx.cumulative_lost.min(0x00ff_ffff);
        block.highest_seq = rx.ext_highest_seq;
        block.jitter = rx.jitter as u32;
        Some(block)
    }

    fn current_rtp_timestamp(&self) -> u32 {
        // Extrapolate from the last transmitted timestamp; good enough for
        // lip-sync across one report interval
        self.tx.lock().last_timestamp
    }

    async fn rtp_recv_loop(self: Arc<Self>, socket: Arc<UdpSocket>) {
        let mut buf = vec![0u8; RECV_SIZE];
        loop {
            let (len, source) = match socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(e) => {
                    warn!("RTP receive failed: {}", e);
                    return;
                }
            };

            // RFC 5761 demultiplexing when RTCP shares the port
            if self.rtcp_socket.is_none() && len >= 2 && (192..=223).contains(&buf[1]) {
                self.handle_rtcp(&buf[..len]);
                continue;
            }

            let packet = match RtpPacket::parse(&buf[..len]) {
                Ok(p) => p,
                Err(e) => {
                    debug!(%source, "dropping unparseable packet: {}", e);
                    continue;
                }
            };

            if packet.payload.is_empty() {
                // keep-alive from the peer
                continue;
            }

            self.stats.count_rx(len);
            let meta = self.update_rx_state(&packet.header);

            if meta.lost > 0 {
                debug!(lost = meta.lost, "sequence gap on receive");
            }

            let handler = self.rtp_handler.lock().clone();
            if let Some(handler) = handler {
                handler(source, packet.header, packet.payload, meta);
            }
        }
    }

    async fn rtcp_recv_loop(self: Arc<Self>, socket: Arc<UdpSocket>) {
        let mut buf = vec![0u8; RECV_SIZE];
        loop {
            let (len, _source) = match socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(e) => {
                    warn!("RTCP receive failed: {}", e);
                    return;
                }
            };
            self.handle_rtcp(&buf[..len]);
        }
    }

    fn handle_rtcp(&self, data: &[u8]) {
        let packets = match rtcp::parse_compound(data) {
            Ok(p) => p,
            Err(e) => {
                debug!("dropping unparseable RTCP: {}", e);
                return;
            }
        };

        for packet in packets {
            let event = match packet {
                RtcpPacket::PictureLossIndication(_) => Some(FeedbackEvent::PictureLoss),
                RtcpPacket::FullIntraRequest(_) => Some(FeedbackEvent::FullIntra),
                _ => None,
            };

            if let Some(event) = event {
                info!(?event, "keyframe request from peer");
                let handler = self.feedback_handler.lock().clone();
                if let Some(handler) = handler {
                    handler(event);
                }
            }
        }
    }

    /// Update loss accounting, jitter and SSRC tracking for a received header
    fn update_rx_state(&self, header: &RtpHeader) -> RxMeta {
        let mut rx = self.rx.lock();

        let ssrc_changed = if header.ssrc != rx.ssrc {
            let changed = rx.ssrc != 0;
            if changed {
                info!("remote SSRC changed {:#x} -> {:#x}", rx.ssrc, header.ssrc);
                rx.prev_seq = None;
                rx.cumulative_lost = 0;
                rx.last_transit = None;
                rx.jitter = 0.0;
            }
            rx.ssrc = header.ssrc;
            changed
        } else {
            false
        };

        let lost = match rx.prev_seq {
            None => {
                rx.ext_highest_seq = header.sequence as u32;
                0
            }
            Some(prev) => {
                let expected = prev.wrapping_add(1);
                let gap = header.sequence.wrapping_sub(expected);
                // treat backward jumps as reordering, not loss
                let lost = if gap < 0x8000 { gap } else { 0 };

                // extended highest sequence with cycle counting
                if crate::seq_less(prev, header.sequence) {
                    if header.sequence < prev {
                        rx.ext_highest_seq = rx.ext_highest_seq.wrapping_add(0x1_0000);
                    }
                    rx.ext_highest_seq =
                        (rx.ext_highest_seq & 0xffff_0000) | header.sequence as u32;
                }

                rx.cumulative_lost = rx.cumulative_lost.saturating_add(lost as u32);
                lost
            }
        };
        rx.prev_seq = Some(header.sequence);

        // interarrival jitter (RFC 3550 A.8)
        let clock_rate = self.clock_rate_rx.load(Ordering::Relaxed).max(1) as f64;
        let arrival = self.started.elapsed().as_secs_f64() * clock_rate;
        let transit = arrival - header.timestamp as f64;
        if let Some(last) = rx.last_transit {
            let d = (transit - last).abs();
            rx.jitter += (d - rx.jitter) / 16.0;
        }
        rx.last_transit = Some(transit);

        RxMeta { ssrc_changed, lost }
    }
}

impl Drop for RtpSession {
    fn drop(&mut self) {
        self.close();
    }
}
