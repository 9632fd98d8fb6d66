//! Media codecs and RTP packetization.
//!
//! This module provides the [`Packetizer`] trait and the codec-specific
//! implementations that turn encoded media units into RTP packets.
//!
//! ## RTP overview (RFC 3550)
//!
//! Every RTP packet carries a 12-byte fixed header ([`rtp::RtpHeader`])
//! containing:
//!
//! - **Sequence number** (16-bit, wrapping) for reordering and loss detection.
//! - **Timestamp** (32-bit) in the track's media clock.
//! - **SSRC** (32-bit), random per track.
//! - **Marker bit**, codec specific (last fragment of a JPEG frame, every
//!   AAC packet).
//!
//! ## Supported codecs
//!
//! | Codec | Module | RFC | PT | Clock |
//! |-------|--------|-----|----|-------|
//! | JPEG | [`jpeg`] | [RFC 2435](https://tools.ietf.org/html/rfc2435) | 26 | 90 kHz |
//! | PCMU / PCMA | [`g711`] | [RFC 3551](https://tools.ietf.org/html/rfc3551) | 0 / 8 | 8 kHz |
//! | AAC-LC | [`aac`] | [RFC 3640](https://tools.ietf.org/html/rfc3640) | 96 | sample rate |

pub mod aac;
pub mod g711;
pub mod jpeg;
pub mod rtp;

use std::time::Duration;

/// Codec-specific RTP packetizer.
///
/// Each track of a viewer session owns one packetizer, so sequence numbers
/// and timestamps are independent per track and per viewer. The generic RTP
/// header is handled by [`rtp::RtpHeader`]; packetizers compose it rather
/// than reimplementing header serialization.
pub trait Packetizer: Send {
    /// Packetize one encoded unit (a JPEG frame, a block of G.711 codes,
    /// one raw AAC access unit) into complete RTP packets.
    ///
    /// An empty result means the unit was unusable and has been dropped.
    fn packetize(&mut self, unit: &[u8]) -> Vec<Vec<u8>>;

    /// Advance the timestamp by measured wall-clock time between units.
    ///
    /// Audio packetizers advance by their sample count inside
    /// [`packetize`](Self::packetize) and ignore this.
    fn advance_elapsed(&mut self, _elapsed: Duration) {}

    /// Encoding name for the SDP `a=rtpmap` attribute.
    fn codec_name(&self) -> &'static str;

    /// RTP clock rate in Hz.
    fn clock_rate(&self) -> u32;

    /// RTP payload type number (RFC 3551).
    fn payload_type(&self) -> u8;

    /// SDP media-level attribute lines (`a=rtpmap`, `a=fmtp`), with prefix.
    fn sdp_attributes(&self) -> Vec<String>;

    /// Sequence number of the next packet (for `RTP-Info` in PLAY responses).
    fn next_sequence(&self) -> u16;

    /// Timestamp of the next packet (for `RTP-Info` in PLAY responses).
    fn next_rtp_timestamp(&self) -> u32;
}
