use std::net::{IpAddr, SocketAddr};

/// Where a track's RTP goes once negotiated (RFC 2326 §12.39).
///
/// ```text
/// Client → Server:
///   Transport: RTP/AVP/TCP;unicast;interleaved=0-1
///   Transport: RTP/AVP;unicast;client_port=8000-8001
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackTransport {
    /// `$`-framed on the RTSP control connection.
    Interleaved { rtp_channel: u8, rtcp_channel: u8 },
    /// Datagrams to the viewer's port pair.
    Udp { rtp: SocketAddr, rtcp: SocketAddr },
}

impl TrackTransport {
    /// Value echoed in the SETUP response `Transport` header.
    pub fn response_header(&self) -> String {
        match self {
            Self::Interleaved {
                rtp_channel,
                rtcp_channel,
            } => format!("RTP/AVP/TCP;unicast;interleaved={rtp_channel}-{rtcp_channel}"),
            Self::Udp { rtp, rtcp } => format!("RTP/AVP;unicast;client_port={}-{}", rtp.port(), rtcp.port()),
        }
    }

    pub fn is_interleaved(&self) -> bool {
        matches!(self, Self::Interleaved { .. })
    }
}

/// Client-side transport request parsed from the RTSP `Transport` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHeader {
    /// `RTP/AVP/TCP` was requested.
    pub tcp: bool,
    /// `interleaved=RTP-RTCP`, if the client named channels.
    pub interleaved: Option<(u8, u8)>,
    /// `client_port=RTP-RTCP`, if present.
    pub client_ports: Option<(u16, u16)>,
}

impl TransportHeader {
    /// Parse the `Transport` header value.
    ///
    /// ## Examples
    ///
    /// ```
    /// use doorbell::session::transport::TransportHeader;
    ///
    /// let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001");
    /// assert!(!th.tcp);
    /// assert_eq!(th.client_ports, Some((8000, 8001)));
    ///
    /// let th = TransportHeader::parse("RTP/AVP/TCP;unicast;interleaved=2-3");
    /// assert!(th.tcp);
    /// assert_eq!(th.interleaved, Some((2, 3)));
    /// ```
    pub fn parse(header: &str) -> Self {
        let mut parsed = TransportHeader {
            tcp: false,
            interleaved: None,
            client_ports: None,
        };
        for part in header.split(';') {
            let part = part.trim();
            if part.eq_ignore_ascii_case("RTP/AVP/TCP") {
                parsed.tcp = true;
            } else if let Some(channels) = part.strip_prefix("interleaved=") {
                parsed.interleaved = parse_pair(channels);
            } else if let Some(ports) = part.strip_prefix("client_port=") {
                parsed.client_ports = parse_pair(ports);
            }
        }
        parsed
    }

    /// Resolve UDP destinations against the viewer's address.
    pub fn udp_transport(&self, peer: IpAddr) -> Option<TrackTransport> {
        let (rtp, rtcp) = self.client_ports?;
        Some(TrackTransport::Udp {
            rtp: SocketAddr::new(peer, rtp),
            rtcp: SocketAddr::new(peer, rtcp),
        })
    }
}

/// `a-b`, or a lone `a` meaning `a-(a+1)`.
fn parse_pair<T>(value: &str) -> Option<(T, T)>
where
    T: std::str::FromStr + Copy + TryFrom<u32>,
    u32: From<T>,
{
    match value.split_once('-') {
        Some((a, b)) => Some((a.trim().parse().ok()?, b.trim().parse().ok()?)),
        None => {
            let a: T = value.trim().parse().ok()?;
            let b = T::try_from(u32::from(a) + 1).ok()?;
            Some((a, b))
        }
    }
}
