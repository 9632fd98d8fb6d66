//! Real-time communications core of a network doorbell.
//!
//! Two engines share a handful of primitives:
//!
//! - [`sip`]: registers with a SIP registrar, places the doorbell call when
//!   [`RingHandle::ring_now`] fires, carries G.711 audio and opens the door
//!   on a DTMF code.
//! - [`server`]: an RTSP server streaming the camera as RFC 2435 JPEG, with
//!   an optional PCMU or AAC audio track, to a bounded number of viewers.
//!
//! Camera, microphone, network and door strike are reached through the
//! traits in [`source`].

pub mod auth;
pub mod config;
pub mod error;
pub mod media;
pub mod rtsp;
pub mod server;
pub mod session;
pub mod sip;
pub mod source;
pub mod transport;

pub use config::{DoorbellConfig, SipConfig, StreamConfig};
pub use error::{DoorbellError, Result};
pub use media::Packetizer;
pub use server::{StreamAudio, StreamServer};
pub use sip::{RingHandle, SipClient};
pub use source::{AudioSource, DoorRelease, Frame, FrameSource, NetworkInfo};
