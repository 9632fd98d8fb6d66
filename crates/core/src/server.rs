use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::{AudioCodec, AudioConfig, StreamConfig};
use crate::error::{DoorbellError, Result};
use crate::media::Packetizer;
use crate::media::aac::{AacBridge, AacEncoder, AacPacketizer};
use crate::media::g711::{G711Capture, G711Law, G711Packetizer};
use crate::rtsp::handler::{AudioTrackFactory, MethodHandler};
use crate::rtsp::request::RtspRequest;
use crate::rtsp::response::RtspResponse;
use crate::rtsp::sdp;
use crate::session::{ConnectionId, SessionPool, SlotHandle, Track, TrackTransport};
use crate::source::{AudioSource, FrameSource, NetworkInfo, SystemNetwork};
use crate::transport::interleaved::Inbound;
use crate::transport::{ControlConnection, ReadStatus, UdpTransport};

const CONTROL_WRITE_TIMEOUT: Duration = Duration::from_millis(200);
const CYCLE_SLEEP: Duration = Duration::from_millis(1);
const PCMU_INTERVAL: Duration = Duration::from_millis(20);

enum AudioPipeline {
    Pcmu(G711Capture),
    Aac(AacBridge),
}

/// The audio track served next to the video: microphone, encoder and the
/// cadence packets go out at.
pub struct StreamAudio {
    pipeline: AudioPipeline,
    source: Option<Box<dyn AudioSource>>,
    muted: bool,
}

impl StreamAudio {
    /// G.711 μ-law at 8 kHz, decimated from the microphone's `capture_rate`.
    pub fn pcmu(capture_rate: u32, source: Option<Box<dyn AudioSource>>) -> Self {
        Self {
            pipeline: AudioPipeline::Pcmu(G711Capture::new(G711Law::Mu, capture_rate)),
            source,
            muted: false,
        }
    }

    /// AAC-LC through an external encoder.
    pub fn aac(encoder: Box<dyn AacEncoder>, config: &AudioConfig, source: Option<Box<dyn AudioSource>>) -> Self {
        Self {
            pipeline: AudioPipeline::Aac(AacBridge::new(
                encoder,
                config.capture_rate,
                config.sample_rate,
            )),
            source,
            muted: config.muted,
        }
    }

    /// Build the track the configuration asks for. AAC needs an encoder;
    /// without one the track falls back to PCMU.
    pub fn from_config(
        config: &AudioConfig,
        encoder: Option<Box<dyn AacEncoder>>,
        source: Option<Box<dyn AudioSource>>,
    ) -> Self {
        match (config.codec, encoder) {
            (AudioCodec::Aac, Some(encoder)) => Self::aac(encoder, config, source),
            (AudioCodec::Aac, None) => {
                tracing::warn!("no AAC encoder available, serving PCMU");
                let mut audio = Self::pcmu(config.capture_rate, source);
                audio.muted = config.muted;
                audio
            }
            (AudioCodec::Pcmu, _) => {
                let mut audio = Self::pcmu(config.capture_rate, source);
                audio.muted = config.muted;
                audio
            }
        }
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    /// Time between audio packets.
    pub fn interval(&self) -> Duration {
        match &self.pipeline {
            AudioPipeline::Pcmu(_) => PCMU_INTERVAL,
            AudioPipeline::Aac(bridge) => {
                let frame_ms = 1_024_000 / u64::from(bridge.sample_rate().max(1));
                Duration::from_millis(frame_ms.max(20))
            }
        }
    }

    /// Next encoded unit: 160 G.711 codes or one raw AAC access unit.
    fn next_unit(&mut self) -> Option<Vec<u8>> {
        let source = self.source.as_deref_mut();
        match &mut self.pipeline {
            AudioPipeline::Pcmu(capture) => Some(capture.next_packet(source, self.muted)),
            AudioPipeline::Aac(bridge) => bridge.next_access_unit(source, self.muted),
        }
    }
}

impl AudioTrackFactory for StreamAudio {
    fn audio_packetizer(&self) -> Box<dyn Packetizer> {
        match &self.pipeline {
            AudioPipeline::Pcmu(capture) => Box::new(G711Packetizer::new(capture.law())),
            AudioPipeline::Aac(bridge) => Box::new(AacPacketizer::new(bridge.sample_rate())),
        }
    }
}

struct ServerState {
    config: StreamConfig,
    network: Box<dyn NetworkInfo>,
    listener: Option<TcpListener>,
    udp: Option<UdpTransport>,
    connections: HashMap<ConnectionId, ControlConnection>,
    next_connection: ConnectionId,
    pool: SessionPool,
    frames: Box<dyn FrameSource>,
    audio: Option<StreamAudio>,
    framesize: Option<(u16, u16)>,
}

/// Streaming media server: RTSP control plus JPEG video and optional audio
/// to a bounded number of viewers.
///
/// All work happens in one polling cycle ([`pump_sessions`](Self::pump_sessions))
/// that accepts connections, answers requests, reaps dead sessions and
/// sends whatever media is due. [`start`](Self::start) runs that cycle on a
/// worker thread; tests drive it directly with a controlled clock.
pub struct StreamServer {
    bind_addr: String,
    state: Arc<Mutex<ServerState>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl StreamServer {
    pub fn new(config: StreamConfig, frames: Box<dyn FrameSource>) -> Self {
        let bind_addr = format!("0.0.0.0:{}", config.port);
        let pool = SessionPool::new(config.max_sessions);
        Self {
            bind_addr,
            state: Arc::new(Mutex::new(ServerState {
                config,
                network: Box::new(SystemNetwork::default()),
                listener: None,
                udp: None,
                connections: HashMap::new(),
                next_connection: 1,
                pool,
                frames,
                audio: None,
                framesize: None,
            })),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Listen on a specific address instead of `0.0.0.0:<port>`.
    pub fn with_bind_addr(mut self, bind_addr: &str) -> Self {
        self.bind_addr = bind_addr.to_string();
        self
    }

    pub fn with_network(self, network: Box<dyn NetworkInfo>) -> Self {
        self.state.lock().network = network;
        self
    }

    /// Serve an audio track. It is advertised only while the configuration
    /// has audio enabled.
    pub fn with_audio(self, audio: StreamAudio) -> Self {
        {
            let mut state = self.state.lock();
            if state.config.audio.enabled {
                state.audio = Some(audio);
            } else {
                tracing::debug!("audio disabled in configuration, track not served");
            }
        }
        self
    }

    /// Bind the listener and the RTP socket without starting a worker.
    pub fn bind(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        if state.listener.is_some() {
            return Err(DoorbellError::AlreadyRunning);
        }
        let listener = TcpListener::bind(&self.bind_addr).inspect_err(|e| {
            tracing::error!(addr = %self.bind_addr, error = %e, "RTSP bind failed");
        })?;
        listener.set_nonblocking(true)?;
        state.udp = Some(UdpTransport::bind()?);
        state.listener = Some(listener);
        tracing::info!(addr = %self.bind_addr, "RTSP server listening");
        Ok(())
    }

    /// Bind and run the polling cycle on a worker thread.
    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(DoorbellError::AlreadyRunning);
        }
        self.bind()?;
        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let state = self.state.clone();
        self.worker = Some(thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                state.lock().pump(Instant::now());
                thread::sleep(CYCLE_SLEEP);
            }
            tracing::debug!("RTSP worker exited");
        }));
        Ok(())
    }

    /// Stop the worker, close every connection and free every slot.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            tracing::error!("RTSP worker panicked");
        }
        let mut state = self.state.lock();
        for handle in state.pool.handles() {
            state.pool.remove(handle);
        }
        state.connections.clear();
        state.listener = None;
        state.udp = None;
        tracing::info!("RTSP server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one polling cycle at `now`.
    pub fn pump_sessions(&self, now: Instant) -> Result<()> {
        let mut state = self.state.lock();
        if state.listener.is_none() {
            return Err(DoorbellError::NotStarted);
        }
        state.pump(now);
        Ok(())
    }

    /// `rtsp://<ip>:<port>/mjpeg/1`, or `None` while the network is down.
    pub fn get_stream_url(&self) -> Option<String> {
        let state = self.state.lock();
        let ip = state.network.local_ipv4()?;
        Some(sdp::presentation_url(&ip.to_string(), state.config.port))
    }

    pub fn active_session_count(&self) -> usize {
        self.state.lock().pool.len()
    }

    pub fn set_audio_muted(&self, muted: bool) {
        if let Some(audio) = self.state.lock().audio.as_mut() {
            audio.set_muted(muted);
        }
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop();
        }
    }
}

impl ServerState {
    fn pump(&mut self, now: Instant) {
        self.accept_connections();
        self.service_connections(now);
        self.reap_idle(now);
        self.send_video(now);
        self.send_audio(now);
    }

    fn accept_connections(&mut self) {
        let Some(listener) = &self.listener else {
            return;
        };
        loop {
            match listener.accept() {
                Ok((stream, _)) => match ControlConnection::new(stream, CONTROL_WRITE_TIMEOUT) {
                    Ok(conn) => {
                        let id = self.next_connection;
                        self.next_connection += 1;
                        self.connections.insert(id, conn);
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to set up control connection"),
                },
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn service_connections(&mut self, now: Instant) {
        let local_ip = self.network.local_ipv4();
        let mut closed = Vec::new();

        for (&id, conn) in self.connections.iter_mut() {
            if conn.poll_read() == ReadStatus::Closed {
                closed.push(id);
                // Requests already buffered are still answered below.
            }

            while let Some(unit) = conn.next_inbound() {
                for handle in self.pool.on_connection(id) {
                    if let Some(session) = self.pool.get_mut(handle) {
                        session.touch(now);
                    }
                }
                let raw = match unit {
                    Inbound::Request(raw) => raw,
                    Inbound::Interleaved { channel, len } => {
                        tracing::trace!(channel, len, "interleaved data from client");
                        continue;
                    }
                };

                let response = match RtspRequest::parse(&raw) {
                    Ok(request) => {
                        let mut handler = MethodHandler {
                            config: &self.config,
                            pool: &mut self.pool,
                            audio: self.audio.as_ref().map(|a| a as &dyn AudioTrackFactory),
                            connection: id,
                            peer: conn.peer_addr(),
                            local_ip,
                            framesize: self.framesize,
                            now,
                        };
                        handler.handle(&request)
                    }
                    Err(e) => {
                        tracing::warn!(peer = %conn.peer_addr(), error = %e, "malformed RTSP request");
                        RtspResponse::bad_request()
                    }
                };

                if let Err(e) = conn.send(response.serialize().as_bytes()) {
                    tracing::warn!(peer = %conn.peer_addr(), error = %e, "failed to send RTSP response");
                    closed.push(id);
                    break;
                }
            }
        }

        closed.dedup();
        for id in closed {
            if let Some(conn) = self.connections.remove(&id) {
                tracing::info!(peer = %conn.peer_addr(), "client disconnected");
            }
            for handle in self.pool.on_connection(id) {
                self.release(handle, "connection closed");
            }
        }
    }

    fn reap_idle(&mut self, now: Instant) {
        for handle in self.pool.handles() {
            if self.pool.get(handle).is_some_and(|s| s.is_idle(now)) {
                self.release(handle, "inactivity timeout");
            }
        }
    }

    fn release(&mut self, handle: SlotHandle, reason: &'static str) {
        if let Some(session) = self.pool.remove(handle) {
            tracing::info!(
                session_id = format_args!("{:08x}", session.id),
                slot = handle.index(),
                active = self.pool.len(),
                reason,
                "session released"
            );
        }
    }

    fn send_video(&mut self, now: Instant) {
        let interval = self.config.frame_interval();
        let due: Vec<SlotHandle> = self
            .pool
            .handles()
            .into_iter()
            .filter(|h| {
                self.pool.get(*h).is_some_and(|s| {
                    s.playing
                        && s.video.is_some()
                        && s.last_frame.is_none_or(|last| now.saturating_duration_since(last) >= interval)
                })
            })
            .collect();
        if due.is_empty() {
            return;
        }

        let Some(frame) = self.frames.acquire_frame() else {
            tracing::debug!("no frame available, skipping cycle");
            return;
        };
        self.framesize = Some((frame.width, frame.height));

        for handle in due {
            let Some(session) = self.pool.get_mut(handle) else {
                continue;
            };
            let Some(track) = session.video.as_mut() else {
                continue;
            };
            if let Some(last) = session.last_frame {
                track.packetizer.advance_elapsed(now.saturating_duration_since(last));
            }
            session.last_frame = Some(now);
            let packets = track.packetizer.packetize(&frame.data);
            deliver(track, &packets, self.connections.get_mut(&session.connection), self.udp.as_ref(), now);
        }

        self.frames.release_frame(frame);
    }

    fn send_audio(&mut self, now: Instant) {
        let Some(audio) = self.audio.as_mut() else {
            return;
        };
        let interval = audio.interval();
        let due: Vec<SlotHandle> = self
            .pool
            .handles()
            .into_iter()
            .filter(|h| {
                self.pool.get(*h).is_some_and(|s| {
                    s.playing
                        && s.audio.is_some()
                        && s.last_audio.is_none_or(|last| now.saturating_duration_since(last) >= interval)
                })
            })
            .collect();
        if due.is_empty() {
            return;
        }

        let unit = audio.next_unit();
        for handle in due {
            let Some(session) = self.pool.get_mut(handle) else {
                continue;
            };
            session.last_audio = Some(now);
            let (Some(unit), Some(track)) = (unit.as_deref(), session.audio.as_mut()) else {
                continue;
            };
            let packets = track.packetizer.packetize(unit);
            deliver(track, &packets, self.connections.get_mut(&session.connection), self.udp.as_ref(), now);
        }
    }
}

/// Send one unit's packets on the track's transport. The first failure
/// abandons the rest of the unit.
fn deliver(
    track: &mut Track,
    packets: &[Vec<u8>],
    conn: Option<&mut ControlConnection>,
    udp: Option<&UdpTransport>,
    now: Instant,
) {
    match track.transport {
        TrackTransport::Interleaved { rtp_channel, .. } => {
            let Some(conn) = conn else {
                return;
            };
            for packet in packets {
                if let Err(e) = conn.send_interleaved(rtp_channel, packet) {
                    tracing::warn!(peer = %conn.peer_addr(), channel = rtp_channel, error = %e, "interleaved write failed, unit dropped");
                    return;
                }
            }
        }
        TrackTransport::Udp { rtp, .. } => {
            let Some(udp) = udp else {
                return;
            };
            if track.backoff.is_backing_off(now) {
                tracing::trace!(%rtp, "UDP backoff, unit skipped");
                return;
            }
            for packet in packets {
                if let Err(e) = udp.send_to(packet, rtp) {
                    let delay = track.backoff.record_failure(now);
                    tracing::warn!(%rtp, error = %e, streak = track.backoff.fail_streak(), ?delay, "UDP send failed");
                    return;
                }
            }
            track.backoff.record_success();
        }
    }
}
