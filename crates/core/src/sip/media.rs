use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::media::g711::{G711Capture, G711Packetizer};
use crate::media::rtp::RtpPacket;
use crate::media::Packetizer;
use crate::sip::dtmf::{DoorCode, DtmfReceiver};
use crate::sip::sdp::RemoteMedia;
use crate::source::{AudioSource, DoorRelease};

const FRAME_INTERVAL: Duration = Duration::from_millis(20);
/// Datagrams drained per pump; the rest wait for the next cycle.
const MAX_RECV_PER_PUMP: usize = 4;

struct ActiveStream {
    remote: RemoteMedia,
    capture: G711Capture,
    packetizer: G711Packetizer,
    dtmf: DtmfReceiver,
    next_send: Instant,
}

/// In-call audio: G.711 out from the microphone, G.711 and DTMF in.
pub struct CallMedia {
    socket: UdpSocket,
    capture_rate: u32,
    source: Option<Box<dyn AudioSource>>,
    muted: bool,
    door: Option<Box<dyn DoorRelease>>,
    code: Option<DoorCode>,
    stream: Option<ActiveStream>,
    received_audio: u64,
    inbound_peak: i16,
}

impl CallMedia {
    /// Bind the RTP port (`0` picks an ephemeral one).
    pub fn bind(port: u16, capture_rate: u32) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port))?;
        socket.set_nonblocking(true)?;
        tracing::info!(port = socket.local_addr()?.port(), "call RTP socket bound");
        Ok(Self {
            socket,
            capture_rate,
            source: None,
            muted: false,
            door: None,
            code: None,
            stream: None,
            received_audio: 0,
            inbound_peak: 0,
        })
    }

    pub fn local_port(&self) -> u16 {
        self.socket.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    /// Microphone sampled at `capture_rate`, decimated to 8 kHz for G.711.
    pub fn set_audio_source(&mut self, source: Box<dyn AudioSource>, capture_rate: u32) {
        self.source = Some(source);
        self.capture_rate = capture_rate;
    }

    pub fn has_audio_source(&self) -> bool {
        self.source.is_some()
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    /// Strike fired each time the keyed digits complete `code`.
    pub fn set_door(&mut self, door: Box<dyn DoorRelease>, code: Option<DoorCode>) {
        self.door = Some(door);
        self.code = code;
    }

    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    /// Audio packets received during the current call.
    pub fn received_audio(&self) -> u64 {
        self.received_audio
    }

    /// Largest decoded inbound sample magnitude during the current call.
    pub fn inbound_peak(&self) -> i16 {
        self.inbound_peak
    }

    /// Start exchanging audio with the answerer.
    pub fn start(&mut self, remote: RemoteMedia, now: Instant) {
        tracing::info!(
            remote = %remote.rtp_addr(),
            codec = remote.law.name(),
            direction = remote.direction.attribute(),
            "call media started"
        );
        if let Some(code) = self.code.as_mut() {
            code.reset();
        }
        self.received_audio = 0;
        self.inbound_peak = 0;
        self.stream = Some(ActiveStream {
            remote,
            capture: G711Capture::new(remote.law, self.capture_rate),
            packetizer: G711Packetizer::new(remote.law),
            dtmf: DtmfReceiver::default(),
            next_send: now,
        });
    }

    /// Stop sending; counters stay readable until the next call starts.
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            tracing::info!(received = self.received_audio, "call media stopped");
        }
    }

    /// Send the frame due at `now` and drain inbound packets.
    pub fn pump(&mut self, now: Instant) {
        self.send_due(now);
        self.receive();
    }

    fn send_due(&mut self, now: Instant) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        if self.source.is_none() || !stream.remote.direction.receives() || now < stream.next_send {
            return;
        }

        stream.next_send += FRAME_INTERVAL;
        if stream.next_send + FRAME_INTERVAL * 5 < now {
            stream.next_send = now + FRAME_INTERVAL;
        }

        let codes = stream.capture.next_packet(self.source.as_deref_mut(), self.muted);
        for packet in stream.packetizer.packetize(&codes) {
            match self.socket.send_to(&packet, stream.remote.rtp_addr()) {
                Ok(sent) if sent == packet.len() => {
                    tracing::trace!(seq = stream.packetizer.next_sequence().wrapping_sub(1), "call RTP sent");
                }
                Ok(sent) => tracing::warn!(sent, expected = packet.len(), "short call RTP write, frame dropped"),
                Err(e) => tracing::warn!(error = %e, "call RTP send failed, frame dropped"),
            }
        }
    }

    fn receive(&mut self) {
        let mut buf = [0u8; 512];
        for _ in 0..MAX_RECV_PER_PUMP {
            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) => self.handle_packet(&buf[..len], from),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::debug!(error = %e, "call RTP receive error");
                    break;
                }
            }
        }
    }

    fn handle_packet(&mut self, data: &[u8], from: SocketAddr) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        if !stream.remote.direction.sends() || from.ip() != stream.remote.ip {
            return;
        }
        let Some(packet) = RtpPacket::parse(data) else {
            tracing::debug!(%from, len = data.len(), "malformed call RTP dropped");
            return;
        };

        let pt = packet.payload_type();
        if pt == stream.remote.telephone_event {
            let Some(digit) = stream.dtmf.on_packet(packet.timestamp(), packet.payload()) else {
                return;
            };
            tracing::info!(%digit, "DTMF received");
            let opened = self.code.as_mut().is_some_and(|code| code.push(digit));
            if opened {
                tracing::info!("door code accepted, releasing door");
                if let Some(door) = self.door.as_mut() {
                    door.release();
                }
            }
        } else if pt == stream.remote.law.payload_type() {
            let law = stream.remote.law;
            let peak = packet
                .payload()
                .iter()
                .map(|&code| law.decode(code).saturating_abs())
                .max()
                .unwrap_or(0);
            self.inbound_peak = self.inbound_peak.max(peak);
            self.received_audio += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::media::g711::G711Law;
    use crate::sip::sdp::Direction;

    fn remote_at(socket: &UdpSocket) -> RemoteMedia {
        RemoteMedia {
            ip: Ipv4Addr::LOCALHOST,
            port: socket.local_addr().unwrap().port(),
            law: G711Law::Mu,
            telephone_event: 101,
            direction: Direction::SendRecv,
        }
    }

    fn rtp(pt: u8, seq: u16, timestamp: u32, payload: &[u8]) -> Vec<u8> {
        let mut packet = vec![0x80, pt];
        packet.extend_from_slice(&seq.to_be_bytes());
        packet.extend_from_slice(&timestamp.to_be_bytes());
        packet.extend_from_slice(&0x1234_5678u32.to_be_bytes());
        packet.extend_from_slice(payload);
        packet
    }

    fn pump_for(media: &mut CallMedia, rounds: usize) {
        for _ in 0..rounds {
            media.pump(Instant::now());
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    struct Tone;

    impl AudioSource for Tone {
        fn capture(&mut self, buffer: &mut [i16], _timeout: Duration) -> bool {
            buffer.fill(1000);
            true
        }
    }

    #[test]
    fn dtmf_code_releases_door_once() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut media = CallMedia::bind(0, 16000).unwrap();
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = opened.clone();
        media.set_door(
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            DoorCode::new("42"),
        );
        media.start(remote_at(&peer), Instant::now());

        let target = ("127.0.0.1", media.local_port());
        for (seq, (event, ts)) in [(4u8, 800u32), (2, 1600)].into_iter().enumerate() {
            for repeat in 0..3u16 {
                let packet = rtp(101, seq as u16 * 3 + repeat, ts, &[event, 0x8A, 0x03, 0x20]);
                peer.send_to(&packet, target).unwrap();
            }
        }
        pump_for(&mut media, 20);
        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wrong_code_keeps_door_shut() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut media = CallMedia::bind(0, 16000).unwrap();
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = opened.clone();
        media.set_door(
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            DoorCode::new("42"),
        );
        media.start(remote_at(&peer), Instant::now());

        let target = ("127.0.0.1", media.local_port());
        peer.send_to(&rtp(101, 1, 800, &[2, 0x8A, 0, 160]), target).unwrap();
        peer.send_to(&rtp(101, 2, 1600, &[4, 0x8A, 0, 160]), target).unwrap();
        pump_for(&mut media, 10);
        assert_eq!(opened.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn inbound_audio_is_decoded() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut media = CallMedia::bind(0, 8000).unwrap();
        media.start(remote_at(&peer), Instant::now());
        let loud = G711Law::Mu.encode(8000);
        peer.send_to(&rtp(0, 1, 160, &[loud; 160]), ("127.0.0.1", media.local_port()))
            .unwrap();
        pump_for(&mut media, 10);
        assert_eq!(media.received_audio(), 1);
        assert!(media.inbound_peak() > 7000);
    }

    #[test]
    fn sends_20ms_frames_from_the_microphone() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut media = CallMedia::bind(0, 16000).unwrap();
        media.set_audio_source(Box::new(Tone), 16000);

        let t0 = Instant::now();
        media.start(remote_at(&peer), t0);
        media.pump(t0);
        media.pump(t0 + Duration::from_millis(10));
        media.pump(t0 + Duration::from_millis(20));

        let mut buf = [0u8; 512];
        let (len, _) = peer.recv_from(&mut buf).unwrap();
        let first = RtpPacket::parse(&buf[..len]).unwrap();
        assert_eq!(first.payload_type(), 0);
        assert_eq!(first.payload().len(), 160);
        assert!(first.payload().iter().all(|&c| c == G711Law::Mu.encode(1000)));
        let first_ts = first.timestamp();

        let (len, _) = peer.recv_from(&mut buf).unwrap();
        let second = RtpPacket::parse(&buf[..len]).unwrap();
        assert_eq!(second.timestamp(), first_ts.wrapping_add(160));

        peer.set_nonblocking(true).unwrap();
        assert!(peer.recv_from(&mut buf).is_err(), "only two frames were due");
    }

    #[test]
    fn muted_microphone_sends_silence() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut media = CallMedia::bind(0, 16000).unwrap();
        media.set_audio_source(Box::new(Tone), 16000);
        media.set_muted(true);
        media.start(remote_at(&peer), Instant::now());
        media.pump(Instant::now());

        let mut buf = [0u8; 512];
        let (len, _) = peer.recv_from(&mut buf).unwrap();
        assert!(buf[12..len].iter().all(|&c| c == 0xFF));
    }

    #[test]
    fn recvonly_without_microphone_sends_nothing() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut media = CallMedia::bind(0, 16000).unwrap();
        media.start(remote_at(&peer), Instant::now());
        media.pump(Instant::now());
        peer.set_nonblocking(true).unwrap();
        let mut buf = [0u8; 64];
        assert!(peer.recv_from(&mut buf).is_err());
        media.stop();
        assert!(!media.is_active());
    }
}
