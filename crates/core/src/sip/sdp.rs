//! Audio offer and answer handling for the doorbell call.
//!
//! The offer is fixed: PCMU and PCMA at 8 kHz plus RFC 4733
//! telephone-events, 20 ms packets.
//!
//! ```text
//! v=0
//! o=- 0 0 IN IP4 192.168.1.20
//! s=Doorbell
//! c=IN IP4 192.168.1.20
//! t=0 0
//! m=audio 40000 RTP/AVP 0 8 101
//! a=rtpmap:0 PCMU/8000
//! a=rtpmap:8 PCMA/8000
//! a=rtpmap:101 telephone-event/8000
//! a=fmtp:101 0-15
//! a=ptime:20
//! a=sendrecv
//! ```

use std::net::{Ipv4Addr, SocketAddr};

use crate::media::g711::G711Law;

/// Payload type offered for telephone-events, assumed when the answer
/// does not map one.
pub const TELEPHONE_EVENT_PT: u8 = 101;

/// SDP media direction attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

impl Direction {
    /// Attribute name of RFC 4566 §6, without the `a=`.
    pub fn attribute(self) -> &'static str {
        match self {
            Self::SendRecv => "sendrecv",
            Self::SendOnly => "sendonly",
            Self::RecvOnly => "recvonly",
            Self::Inactive => "inactive",
        }
    }

    fn from_attribute(attr: &str) -> Option<Self> {
        match attr {
            "sendrecv" => Some(Self::SendRecv),
            "sendonly" => Some(Self::SendOnly),
            "recvonly" => Some(Self::RecvOnly),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }

    /// Whether the side that wrote this attribute sends media.
    pub fn sends(self) -> bool {
        matches!(self, Self::SendRecv | Self::SendOnly)
    }

    /// Whether the side that wrote this attribute accepts media.
    pub fn receives(self) -> bool {
        matches!(self, Self::SendRecv | Self::RecvOnly)
    }
}

/// Build the INVITE offer.
pub fn offer(local_ip: Ipv4Addr, rtp_port: u16, session_name: &str, direction: Direction) -> String {
    let lines = [
        "v=0".to_string(),
        format!("o=- 0 0 IN IP4 {local_ip}"),
        format!("s={session_name}"),
        format!("c=IN IP4 {local_ip}"),
        "t=0 0".to_string(),
        format!("m=audio {rtp_port} RTP/AVP 0 8 {TELEPHONE_EVENT_PT}"),
        "a=rtpmap:0 PCMU/8000".to_string(),
        "a=rtpmap:8 PCMA/8000".to_string(),
        format!("a=rtpmap:{TELEPHONE_EVENT_PT} telephone-event/8000"),
        format!("a=fmtp:{TELEPHONE_EVENT_PT} 0-15"),
        "a=ptime:20".to_string(),
        format!("a={}", direction.attribute()),
    ];
    format!("{}\r\n", lines.join("\r\n"))
}

/// Audio parameters taken from the remote answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteMedia {
    pub ip: Ipv4Addr,
    pub port: u16,
    pub law: G711Law,
    pub telephone_event: u8,
    pub direction: Direction,
}

impl RemoteMedia {
    /// Parse an answer. `fallback_ip` (the signaling peer) is used when
    /// there is no usable `c=` line. `None` without an `m=audio` port.
    pub fn parse(sdp: &str, fallback_ip: Ipv4Addr) -> Option<Self> {
        let mut ip = fallback_ip;
        let mut port = 0u16;
        let mut preferred: Option<G711Law> = None;
        let mut has_pcmu = false;
        let mut has_pcma = false;
        let mut telephone_event = TELEPHONE_EVENT_PT;
        let mut direction = Direction::SendRecv;

        for line in sdp.lines().map(str::trim) {
            if let Some(conn) = line.strip_prefix("c=") {
                if let Some(addr) = conn.split("IN IP4").nth(1) {
                    if let Ok(parsed) = addr.trim().parse() {
                        ip = parsed;
                    }
                }
            } else if let Some(media) = line.strip_prefix("m=audio ") {
                let mut fields = media.split_whitespace();
                port = fields.next().and_then(|p| p.parse().ok()).unwrap_or(0);
                for pt in fields.skip(1).filter_map(|f| f.parse::<u8>().ok()) {
                    if let Some(law) = G711Law::from_payload_type(pt) {
                        preferred.get_or_insert(law);
                    }
                }
            } else if let Some(map) = line.strip_prefix("a=rtpmap:") {
                let Some((pt, codec)) = map.split_once(' ') else {
                    continue;
                };
                let codec = codec.trim().to_ascii_lowercase();
                if codec.starts_with("pcmu/8000") {
                    has_pcmu = true;
                } else if codec.starts_with("pcma/8000") {
                    has_pcma = true;
                } else if codec.starts_with("telephone-event/8000") {
                    if let Ok(pt) = pt.trim().parse() {
                        telephone_event = pt;
                    }
                }
            } else if let Some(dir) = line.strip_prefix("a=").and_then(Direction::from_attribute) {
                direction = dir;
            }
        }

        if port == 0 {
            return None;
        }

        let law = preferred.unwrap_or(if !has_pcmu && has_pcma {
            G711Law::A
        } else {
            G711Law::Mu
        });

        Some(Self {
            ip,
            port,
            law,
            telephone_event,
            direction,
        })
    }

    pub fn rtp_addr(&self) -> SocketAddr {
        SocketAddr::from((self.ip, self.port))
    }
}
