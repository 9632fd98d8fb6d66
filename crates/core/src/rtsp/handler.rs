use std::net::{Ipv4Addr, SocketAddr};
use std::time::Instant;

use crate::config::{StreamConfig, TransportPolicy};
use crate::error::DoorbellError;
use crate::media::Packetizer;
use crate::media::jpeg::JpegPacketizer;
use crate::rtsp::request::RtspRequest;
use crate::rtsp::response::RtspResponse;
use crate::rtsp::sdp::{self, MediaDescription};
use crate::session::{
    ConnectionId, Session, SessionPool, SlotHandle, Track, TrackKind, TrackTransport, TransportHeader,
    parse_session_id,
};

/// Methods listed in the OPTIONS `Public` header.
pub const PUBLIC_METHODS: &str = "OPTIONS, DESCRIBE, SETUP, PLAY, TEARDOWN, GET_PARAMETER";

/// Builds packetizers for the audio track; absent when audio is disabled.
pub trait AudioTrackFactory {
    fn audio_packetizer(&self) -> Box<dyn Packetizer>;
}

/// Handles RTSP method requests arriving on one control connection.
///
/// Borrowed per request from the server state, so the session pool is
/// shared by every connection without a lock of its own.
pub struct MethodHandler<'a> {
    pub config: &'a StreamConfig,
    pub pool: &'a mut SessionPool,
    pub audio: Option<&'a dyn AudioTrackFactory>,
    pub connection: ConnectionId,
    pub peer: SocketAddr,
    /// Our address as other hosts see it; `None` while offline.
    pub local_ip: Option<Ipv4Addr>,
    pub framesize: Option<(u16, u16)>,
    pub now: Instant,
}

impl MethodHandler<'_> {
    pub fn handle(&mut self, request: &RtspRequest) -> RtspResponse {
        let cseq = request.cseq().to_string();
        tracing::debug!(method = %request.method, %cseq, peer = %self.peer, "RTSP request");

        let mut response = match request.method.as_str() {
            "OPTIONS" => RtspResponse::ok().add_header("Public", PUBLIC_METHODS),
            "DESCRIBE" => self.handle_describe(request),
            "SETUP" => self.handle_setup(request),
            "PLAY" => self.handle_play(request),
            "TEARDOWN" => self.handle_teardown(request),
            "GET_PARAMETER" => self.handle_get_parameter(request),
            _ => {
                tracing::warn!(method = %request.method, %cseq, "unsupported RTSP method");
                RtspResponse::not_implemented()
            }
        };
        response.headers.insert(0, ("CSeq".to_string(), cseq));
        response
    }

    /// Our IP if known, else the host the client dialled, else the client's
    /// own address.
    fn host(&self, uri: &str) -> String {
        if let Some(ip) = self.local_ip {
            return ip.to_string();
        }
        if let Some(after_scheme) = uri.strip_prefix("rtsp://") {
            let host = after_scheme
                .split('/')
                .next()
                .and_then(|host_port| host_port.split(':').next())
                .unwrap_or("")
                .trim();
            if !host.is_empty() {
                return host.to_string();
            }
        }
        self.peer.ip().to_string()
    }

    fn base_url(&self, uri: &str) -> String {
        sdp::presentation_url(&self.host(uri), self.config.port)
    }

    fn handle_describe(&self, request: &RtspRequest) -> RtspResponse {
        let host = self.host(&request.uri);
        let base_url = self.base_url(&request.uri);

        let mut media = vec![
            MediaDescription::from_packetizer("video", TrackKind::Video.control(), &JpegPacketizer::new(0))
                .with_framesize(self.framesize),
        ];
        if let Some(audio) = self.audio {
            let packetizer = audio.audio_packetizer();
            media.push(MediaDescription::from_packetizer(
                "audio",
                TrackKind::Audio.control(),
                packetizer.as_ref(),
            ));
        }

        let body = sdp::generate_sdp(&host, &base_url, &self.config.session_name, &media);
        RtspResponse::ok()
            .add_header("Content-Base", &format!("{base_url}/"))
            .add_header("Content-Type", "application/sdp")
            .with_body(body)
    }

    fn handle_setup(&mut self, request: &RtspRequest) -> RtspResponse {
        let kind = TrackKind::from_uri(&request.uri);
        let packetizer: Box<dyn Packetizer> = match (kind, self.audio) {
            (TrackKind::Video, _) => Box::new(JpegPacketizer::with_random_ssrc()),
            (TrackKind::Audio, Some(audio)) => audio.audio_packetizer(),
            (TrackKind::Audio, None) => {
                tracing::warn!(uri = %request.uri, "SETUP for audio while audio is disabled");
                return RtspResponse::not_found();
            }
        };

        let header = TransportHeader::parse(request.get_header("Transport").unwrap_or(""));
        let transport = if header.tcp {
            let (rtp_channel, rtcp_channel) = header.interleaved.unwrap_or(kind.default_channels());
            TrackTransport::Interleaved {
                rtp_channel,
                rtcp_channel,
            }
        } else if self.config.transport == TransportPolicy::InterleavedOnly {
            tracing::warn!(peer = %self.peer, "UDP transport requested while interleaved-only");
            return RtspResponse::unsupported_transport();
        } else {
            match header.udp_transport(self.peer.ip()) {
                Some(t) => t,
                None => {
                    tracing::warn!(peer = %self.peer, "SETUP without client_port");
                    return RtspResponse::unsupported_transport();
                }
            }
        };

        let handle = match request.get_header("Session") {
            Some(value) => match parse_session_id(value).and_then(|id| self.pool.find(id)) {
                Some(handle) => handle,
                None => {
                    tracing::warn!(session = value, "SETUP for unknown session");
                    return RtspResponse::session_not_found();
                }
            },
            None => {
                let mut id = Session::random_id();
                while self.pool.find(id).is_some() {
                    id = Session::random_id();
                }
                let session = Session::new(
                    id,
                    self.connection,
                    self.config.session_timeout_secs,
                    self.now,
                );
                match self.pool.insert(session) {
                    Ok(handle) => handle,
                    Err(DoorbellError::ResourceExhausted(capacity)) => {
                        tracing::warn!(capacity, peer = %self.peer, "session pool full");
                        return RtspResponse::not_enough_bandwidth();
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "session allocation failed");
                        return RtspResponse::new(500, "Internal Server Error");
                    }
                }
            }
        };

        let now = self.now;
        let Some(session) = self.pool.get_mut(handle) else {
            return RtspResponse::session_not_found();
        };
        let transport_header = transport.response_header();
        session.set_track(kind, Track::new(transport, packetizer));
        session.touch(now);

        tracing::info!(
            session_id = format_args!("{:08x}", session.id),
            slot = handle.index(),
            track = kind.control(),
            peer = %self.peer,
            interleaved = transport.is_interleaved(),
            "session set up"
        );

        RtspResponse::ok()
            .add_header("Transport", &transport_header)
            .add_header("Session", &session.session_header_value())
    }

    fn session_from(&self, request: &RtspRequest) -> Option<SlotHandle> {
        let id = parse_session_id(request.get_header("Session")?)?;
        self.pool.find(id)
    }

    fn handle_play(&mut self, request: &RtspRequest) -> RtspResponse {
        let base_url = self.base_url(&request.uri);
        let Some(handle) = self.session_from(request) else {
            tracing::warn!(peer = %self.peer, "PLAY for unknown session");
            return RtspResponse::session_not_found();
        };
        let now = self.now;
        let Some(session) = self.pool.get_mut(handle) else {
            return RtspResponse::session_not_found();
        };
        session.play(now);
        tracing::info!(session_id = format_args!("{:08x}", session.id), "session playing");

        let rtp_info: Vec<String> = [TrackKind::Video, TrackKind::Audio]
            .into_iter()
            .filter_map(|kind| {
                session.track(kind).map(|track| {
                    format!(
                        "url={base_url}/{};seq={};rtptime={}",
                        kind.control(),
                        track.packetizer.next_sequence(),
                        track.packetizer.next_rtp_timestamp()
                    )
                })
            })
            .collect();

        let mut response = RtspResponse::ok()
            .add_header("Session", &session.session_header_value())
            .add_header("Range", "npt=0.000-");
        if !rtp_info.is_empty() {
            response = response.add_header("RTP-Info", &rtp_info.join(","));
        }
        response
    }

    fn handle_teardown(&mut self, request: &RtspRequest) -> RtspResponse {
        // Without a Session header, tear down what this connection set up.
        let handle = match request.get_header("Session") {
            Some(_) => self.session_from(request),
            None => self.pool.on_connection(self.connection).into_iter().next(),
        };
        let Some(session) = handle.and_then(|h| self.pool.remove(h)) else {
            tracing::warn!(peer = %self.peer, "TEARDOWN for unknown session");
            return RtspResponse::session_not_found();
        };
        tracing::info!(
            session_id = format_args!("{:08x}", session.id),
            active = self.pool.len(),
            "session released by TEARDOWN"
        );
        RtspResponse::ok().add_header("Session", &format!("{:08x}", session.id))
    }

    fn handle_get_parameter(&mut self, request: &RtspRequest) -> RtspResponse {
        tracing::trace!(peer = %self.peer, "GET_PARAMETER keepalive");
        let mut response = RtspResponse::ok();
        if let Some(handle) = self.session_from(request)
            && let Some(session) = self.pool.get_mut(handle)
        {
            session.touch(self.now);
            response = response.add_header("Session", &session.session_header_value());
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::g711::{G711Law, G711Packetizer};
    use std::net::IpAddr;

    struct Pcmu;

    impl AudioTrackFactory for Pcmu {
        fn audio_packetizer(&self) -> Box<dyn Packetizer> {
            Box::new(G711Packetizer::new(G711Law::Mu))
        }
    }

    struct Harness {
        config: StreamConfig,
        pool: SessionPool,
        audio: bool,
        now: Instant,
    }

    impl Harness {
        fn new(audio: bool) -> Self {
            Self {
                config: StreamConfig::default(),
                pool: SessionPool::new(4),
                audio,
                now: Instant::now(),
            }
        }

        fn request(&mut self, connection: ConnectionId, raw: &str) -> RtspResponse {
            let request = RtspRequest::parse(raw).unwrap();
            let mut handler = MethodHandler {
                config: &self.config,
                pool: &mut self.pool,
                audio: if self.audio { Some(&Pcmu) } else { None },
                connection,
                peer: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)), 40000),
                local_ip: Some(Ipv4Addr::new(192, 168, 1, 50)),
                framesize: Some((640, 480)),
                now: self.now,
            };
            handler.handle(&request)
        }

        fn setup(&mut self, connection: ConnectionId) -> RtspResponse {
            self.request(
                connection,
                "SETUP rtsp://192.168.1.50:8554/mjpeg/1/track1 RTSP/1.0\r\nCSeq: 3\r\n\
                 Transport: RTP/AVP/TCP;unicast;interleaved=0-1\r\n\r\n",
            )
        }
    }

    fn header<'r>(response: &'r RtspResponse, name: &str) -> Option<&'r str> {
        response
            .headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn options_lists_methods_and_echoes_cseq() {
        let mut h = Harness::new(false);
        let resp = h.request(1, "OPTIONS rtsp://h/mjpeg/1 RTSP/1.0\r\nCSeq: 7\r\n\r\n");
        assert_eq!(resp.status_code, 200);
        assert_eq!(header(&resp, "CSeq"), Some("7"));
        assert_eq!(header(&resp, "Public"), Some(PUBLIC_METHODS));
    }

    #[test]
    fn describe_has_one_or_two_media_sections() {
        let mut h = Harness::new(false);
        let resp = h.request(1, "DESCRIBE rtsp://192.168.1.50:8554/mjpeg/1 RTSP/1.0\r\nCSeq: 2\r\n\r\n");
        let body = resp.body.as_deref().unwrap();
        assert_eq!(body.matches("m=").count(), 1);
        assert!(body.contains("a=framesize:26 640-480"));
        assert_eq!(header(&resp, "Content-Base"), Some("rtsp://192.168.1.50:8554/mjpeg/1/"));
        assert_eq!(header(&resp, "Content-Type"), Some("application/sdp"));

        let mut h = Harness::new(true);
        let resp = h.request(1, "DESCRIBE rtsp://192.168.1.50:8554/mjpeg/1 RTSP/1.0\r\nCSeq: 2\r\n\r\n");
        let body = resp.body.as_deref().unwrap();
        assert_eq!(body.matches("m=").count(), 2);
        assert!(body.contains("m=audio 0 RTP/AVP 0"));
        assert!(body.contains("a=rtpmap:0 PCMU/8000"));
    }

    #[test]
    fn setup_interleaved_then_play() {
        let mut h = Harness::new(false);
        let resp = h.setup(1);
        assert_eq!(resp.status_code, 200);
        assert_eq!(header(&resp, "Transport"), Some("RTP/AVP/TCP;unicast;interleaved=0-1"));
        let session = header(&resp, "Session").unwrap().to_string();
        assert!(session.ends_with(";timeout=60"));
        assert_eq!(session.split(';').next().unwrap().len(), 8);

        let id = session.split(';').next().unwrap();
        let play = h.request(
            1,
            &format!("PLAY rtsp://192.168.1.50:8554/mjpeg/1 RTSP/1.0\r\nCSeq: 4\r\nSession: {id}\r\n\r\n"),
        );
        assert_eq!(play.status_code, 200);
        let rtp_info = header(&play, "RTP-Info").unwrap();
        assert!(rtp_info.starts_with("url=rtsp://192.168.1.50:8554/mjpeg/1/track1;seq="));
        assert!(h.pool.get(h.pool.find(u32::from_str_radix(id, 16).unwrap()).unwrap()).unwrap().playing);
    }

    #[test]
    fn second_setup_adds_audio_track() {
        let mut h = Harness::new(true);
        let session = header(&h.setup(1), "Session").unwrap().to_string();
        let resp = h.request(
            1,
            &format!(
                "SETUP rtsp://h/mjpeg/1/track2 RTSP/1.0\r\nCSeq: 4\r\n\
                 Transport: RTP/AVP/TCP;unicast\r\nSession: {session}\r\n\r\n"
            ),
        );
        assert_eq!(resp.status_code, 200);
        assert_eq!(header(&resp, "Transport"), Some("RTP/AVP/TCP;unicast;interleaved=2-3"));
        assert_eq!(h.pool.len(), 1);
        let handle = h.pool.handles()[0];
        assert!(h.pool.get(handle).unwrap().audio.is_some());
    }

    #[test]
    fn setup_errors() {
        let mut h = Harness::new(false);
        let audio = h.request(
            1,
            "SETUP rtsp://h/mjpeg/1/track2 RTSP/1.0\r\nCSeq: 1\r\nTransport: RTP/AVP/TCP;interleaved=2-3\r\n\r\n",
        );
        assert_eq!(audio.status_code, 404);

        let no_ports = h.request(
            1,
            "SETUP rtsp://h/mjpeg/1/track1 RTSP/1.0\r\nCSeq: 2\r\nTransport: RTP/AVP;unicast\r\n\r\n",
        );
        assert_eq!(no_ports.status_code, 461);

        let unknown = h.request(
            1,
            "SETUP rtsp://h/mjpeg/1/track1 RTSP/1.0\r\nCSeq: 3\r\n\
             Transport: RTP/AVP/TCP;interleaved=0-1\r\nSession: deadbeef\r\n\r\n",
        );
        assert_eq!(unknown.status_code, 454);
        assert!(h.pool.is_empty());
    }

    #[test]
    fn udp_rejected_when_interleaved_only() {
        let mut h = Harness::new(false);
        h.config.transport = TransportPolicy::InterleavedOnly;
        let resp = h.request(
            1,
            "SETUP rtsp://h/mjpeg/1/track1 RTSP/1.0\r\nCSeq: 2\r\nTransport: RTP/AVP;unicast;client_port=6000-6001\r\n\r\n",
        );
        assert_eq!(resp.status_code, 461);

        h.config.transport = TransportPolicy::Any;
        let resp = h.request(
            1,
            "SETUP rtsp://h/mjpeg/1/track1 RTSP/1.0\r\nCSeq: 3\r\nTransport: RTP/AVP;unicast;client_port=6000-6001\r\n\r\n",
        );
        assert_eq!(resp.status_code, 200);
        assert_eq!(header(&resp, "Transport"), Some("RTP/AVP;unicast;client_port=6000-6001"));
    }

    #[test]
    fn fifth_setup_is_refused_until_a_teardown() {
        let mut h = Harness::new(false);
        let sessions: Vec<String> = (1..=4)
            .map(|conn| header(&h.setup(conn), "Session").unwrap().to_string())
            .collect();
        assert_eq!(h.setup(5).status_code, 453);
        assert_eq!(h.pool.len(), 4);

        let id = sessions[2].split(';').next().unwrap();
        let teardown = h.request(3, &format!("TEARDOWN rtsp://h/mjpeg/1 RTSP/1.0\r\nCSeq: 9\r\nSession: {id}\r\n\r\n"));
        assert_eq!(teardown.status_code, 200);
        assert_eq!(h.pool.len(), 3);

        assert_eq!(h.setup(5).status_code, 200);
        assert_eq!(h.pool.len(), 4);
    }

    #[test]
    fn teardown_without_session_header_uses_connection() {
        let mut h = Harness::new(false);
        let _ = h.setup(7);
        let resp = h.request(7, "TEARDOWN rtsp://h/mjpeg/1 RTSP/1.0\r\nCSeq: 5\r\n\r\n");
        assert_eq!(resp.status_code, 200);
        assert!(h.pool.is_empty());
        let again = h.request(7, "TEARDOWN rtsp://h/mjpeg/1 RTSP/1.0\r\nCSeq: 6\r\n\r\n");
        assert_eq!(again.status_code, 454);
    }

    #[test]
    fn unknown_method_not_implemented() {
        let mut h = Harness::new(false);
        let resp = h.request(1, "RECORD rtsp://h/mjpeg/1 RTSP/1.0\r\nCSeq: 3\r\n\r\n");
        assert_eq!(resp.status_code, 501);
        assert_eq!(header(&resp, "CSeq"), Some("3"));
    }
}
