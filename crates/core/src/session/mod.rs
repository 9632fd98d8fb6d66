//! Viewer sessions (RFC 2326 §3, §12.37).
//!
//! A session is created by the first SETUP of a viewer and may carry a
//! video track and an audio track, each with its own transport, packetizer
//! (and so its own sequence, timestamp and SSRC) and UDP backoff.
//!
//! ## Session lifecycle
//!
//! ```text
//! SETUP (no Session header)  -> Negotiated  (slot taken)
//! SETUP (Session: id)        -> Negotiated  (second track added)
//! PLAY                       -> Playing
//! TEARDOWN / disconnect /
//! 60 s without control data  -> released    (slot freed)
//! ```
//!
//! Sessions live in a [`SessionPool`]: a fixed number of slots addressed by
//! [`SlotHandle`]s. A handle carries the slot's generation, so a handle kept
//! past a release never reaches the slot's next occupant.

pub mod transport;

use std::time::{Duration, Instant};

use crate::error::{DoorbellError, Result};
use crate::media::Packetizer;
use crate::transport::UdpBackoff;
pub use transport::{TrackTransport, TransportHeader};

/// Identifies the control connection a session was negotiated on.
pub type ConnectionId = u64;

/// Which of the two tracks a request addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

impl TrackKind {
    /// `track2` in the control URI selects audio; anything else is video.
    pub fn from_uri(uri: &str) -> Self {
        if uri.contains("track2") {
            Self::Audio
        } else {
            Self::Video
        }
    }

    pub fn control(self) -> &'static str {
        match self {
            Self::Video => "track1",
            Self::Audio => "track2",
        }
    }

    /// Interleaved channel pair used when the client does not name one.
    pub fn default_channels(self) -> (u8, u8) {
        match self {
            Self::Video => (0, 1),
            Self::Audio => (2, 3),
        }
    }
}

/// One negotiated media track of a session.
pub struct Track {
    pub transport: TrackTransport,
    pub packetizer: Box<dyn Packetizer>,
    pub backoff: UdpBackoff,
}

impl Track {
    pub fn new(transport: TrackTransport, packetizer: Box<dyn Packetizer>) -> Self {
        Self {
            transport,
            packetizer,
            backoff: UdpBackoff::default(),
        }
    }
}

/// A single viewer session.
pub struct Session {
    pub id: u32,
    pub connection: ConnectionId,
    pub video: Option<Track>,
    pub audio: Option<Track>,
    pub playing: bool,
    pub last_frame: Option<Instant>,
    pub last_audio: Option<Instant>,
    /// Last control request or RTCP packet from the viewer.
    pub last_activity: Instant,
    pub timeout_secs: u64,
}

impl Session {
    pub fn new(id: u32, connection: ConnectionId, timeout_secs: u64, now: Instant) -> Self {
        Self {
            id,
            connection,
            video: None,
            audio: None,
            playing: false,
            last_frame: None,
            last_audio: None,
            last_activity: now,
            timeout_secs,
        }
    }

    /// Random non-zero session id.
    pub fn random_id() -> u32 {
        loop {
            let id = rand::random::<u32>();
            if id != 0 {
                return id;
            }
        }
    }

    /// `Session` header value, e.g. `"0badcafe;timeout=60"`.
    pub fn session_header_value(&self) -> String {
        format!("{:08x};timeout={}", self.id, self.timeout_secs)
    }

    pub fn track(&self, kind: TrackKind) -> Option<&Track> {
        match kind {
            TrackKind::Video => self.video.as_ref(),
            TrackKind::Audio => self.audio.as_ref(),
        }
    }

    pub fn set_track(&mut self, kind: TrackKind, track: Track) {
        tracing::debug!(
            session_id = format_args!("{:08x}", self.id),
            track = kind.control(),
            transport = %track.transport.response_header(),
            "track configured"
        );
        match kind {
            TrackKind::Video => self.video = Some(track),
            TrackKind::Audio => self.audio = Some(track),
        }
    }

    /// Mark playing and reset the media clocks.
    pub fn play(&mut self, now: Instant) {
        self.playing = true;
        self.last_frame = None;
        self.last_audio = None;
        self.last_activity = now;
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    pub fn is_idle(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_activity) > Duration::from_secs(self.timeout_secs)
    }
}

/// Parse the id out of a `Session` header (`"0badcafe;timeout=60"`).
pub fn parse_session_id(header: &str) -> Option<u32> {
    let id = header.split(';').next()?.trim();
    u32::from_str_radix(id, 16).ok()
}

/// Index of a pool slot plus the generation it was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle {
    index: usize,
    generation: u32,
}

impl SlotHandle {
    pub fn index(&self) -> usize {
        self.index
    }
}

struct Slot {
    generation: u32,
    session: Option<Session>,
}

/// Fixed-capacity arena of viewer sessions.
pub struct SessionPool {
    slots: Vec<Slot>,
}

impl SessionPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity)
                .map(|_| Slot {
                    generation: 0,
                    session: None,
                })
                .collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.session.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Place a session in the first free slot.
    pub fn insert(&mut self, session: Session) -> Result<SlotHandle> {
        let capacity = self.capacity();
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, s)| s.session.is_none())
            .ok_or(DoorbellError::ResourceExhausted(capacity))?;
        slot.session = Some(session);
        Ok(SlotHandle {
            index,
            generation: slot.generation,
        })
    }

    pub fn get(&self, handle: SlotHandle) -> Option<&Session> {
        self.slots
            .get(handle.index)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.session.as_ref())
    }

    pub fn get_mut(&mut self, handle: SlotHandle) -> Option<&mut Session> {
        self.slots
            .get_mut(handle.index)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.session.as_mut())
    }

    /// Free the slot. The handle (and every copy of it) goes stale.
    pub fn remove(&mut self, handle: SlotHandle) -> Option<Session> {
        let slot = self
            .slots
            .get_mut(handle.index)
            .filter(|s| s.generation == handle.generation)?;
        let session = slot.session.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        Some(session)
    }

    pub fn find(&self, id: u32) -> Option<SlotHandle> {
        self.handles()
            .into_iter()
            .find(|h| self.get(*h).is_some_and(|s| s.id == id))
    }

    /// Handles of every occupied slot.
    pub fn handles(&self) -> Vec<SlotHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.session.is_some())
            .map(|(index, s)| SlotHandle {
                index,
                generation: s.generation,
            })
            .collect()
    }

    /// Handles of the sessions negotiated on `connection`.
    pub fn on_connection(&self, connection: ConnectionId) -> Vec<SlotHandle> {
        self.handles()
            .into_iter()
            .filter(|h| self.get(*h).is_some_and(|s| s.connection == connection))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::jpeg::JpegPacketizer;

    fn session(id: u32) -> Session {
        Session::new(id, 1, 60, Instant::now())
    }

    #[test]
    fn pool_never_exceeds_capacity() {
        let mut pool = SessionPool::new(4);
        let handles: Vec<_> = (1..=4).map(|id| pool.insert(session(id)).unwrap()).collect();
        assert_eq!(pool.len(), 4);
        assert!(matches!(
            pool.insert(session(5)),
            Err(DoorbellError::ResourceExhausted(4))
        ));

        pool.remove(handles[1]).unwrap();
        let reused = pool.insert(session(5)).unwrap();
        assert_eq!(reused.index(), 1);
        assert_eq!(pool.len(), 4);
    }

    #[test]
    fn stale_handle_misses_new_occupant() {
        let mut pool = SessionPool::new(1);
        let old = pool.insert(session(1)).unwrap();
        pool.remove(old);
        let new = pool.insert(session(2)).unwrap();
        assert!(pool.get(old).is_none());
        assert!(pool.remove(old).is_none());
        assert_eq!(pool.get(new).unwrap().id, 2);
    }

    #[test]
    fn lookup_by_id_and_connection() {
        let mut pool = SessionPool::new(4);
        let a = pool.insert(session(0xAB)).unwrap();
        let mut other = session(0xCD);
        other.connection = 9;
        let b = pool.insert(other).unwrap();
        assert_eq!(pool.find(0xAB), Some(a));
        assert_eq!(pool.on_connection(9), vec![b]);
        assert!(pool.find(0xEF).is_none());
    }

    #[test]
    fn session_header_format() {
        let s = session(0x0BAD_CAFE);
        assert_eq!(s.session_header_value(), "0badcafe;timeout=60");
        assert_eq!(parse_session_id("0badcafe;timeout=60"), Some(0x0BAD_CAFE));
        assert_eq!(parse_session_id(" 1f "), Some(0x1F));
        assert_eq!(parse_session_id("zz"), None);
    }

    #[test]
    fn idle_after_timeout() {
        let start = Instant::now();
        let mut s = Session::new(1, 1, 60, start);
        assert!(!s.is_idle(start + Duration::from_secs(59)));
        assert!(s.is_idle(start + Duration::from_secs(61)));
        s.touch(start + Duration::from_secs(30));
        assert!(!s.is_idle(start + Duration::from_secs(61)));
    }

    #[test]
    fn tracks_are_independent() {
        let mut s = session(1);
        s.set_track(
            TrackKind::Video,
            Track::new(
                TrackTransport::Interleaved {
                    rtp_channel: 0,
                    rtcp_channel: 1,
                },
                Box::new(JpegPacketizer::new(1)),
            ),
        );
        assert!(s.track(TrackKind::Video).is_some());
        assert!(s.track(TrackKind::Audio).is_none());
        assert_eq!(TrackKind::from_uri("rtsp://h/mjpeg/1/track2"), TrackKind::Audio);
        assert_eq!(TrackKind::from_uri("rtsp://h/mjpeg/1/track1"), TrackKind::Video);
    }
}
