//! Network transport for RTSP signaling and RTP media delivery.
//!
//! - **TCP** ([`tcp`]): one non-blocking control connection per viewer,
//!   carrying RTSP requests/responses and, for interleaved sessions, the
//!   media itself.
//! - **Interleaved** ([`interleaved`]): `$`-framed RTP/RTCP on the control
//!   connection (RFC 2326 §10.12), the firewall-friendly path.
//! - **UDP** ([`udp`]): a single ephemeral socket for all datagram RTP
//!   delivery, with per-track backoff after send failures.

pub mod interleaved;
pub mod tcp;
pub mod udp;

pub use tcp::{ControlConnection, ReadStatus};
pub use udp::{UdpBackoff, UdpTransport};
