//! RTSP signaling (RFC 2326).
//!
//! Parses requests, builds responses, routes methods and generates the
//! DESCRIBE session description for the single `/mjpeg/1` presentation.
//!
//! ## RTSP message format (RFC 2326 §4)
//!
//! ```text
//! DESCRIBE rtsp://192.168.1.50:8554/mjpeg/1 RTSP/1.0\r\n
//! CSeq: 2\r\n
//! Accept: application/sdp\r\n
//! \r\n
//! ```
//!
//! ## Supported methods
//!
//! | Method | RFC section | Purpose |
//! |--------|-------------|---------|
//! | OPTIONS | §10.1 | Capability discovery |
//! | DESCRIBE | §10.2 | SDP with the video track and, when enabled, audio |
//! | SETUP | §10.4 | Interleaved channels or UDP ports, per track |
//! | PLAY | §10.5 | Start media delivery |
//! | TEARDOWN | §10.7 | Release the session slot |
//! | GET_PARAMETER | §10.8 | Keepalive |
//!
//! Anything else is answered `501 Not Implemented`.

pub mod handler;
pub mod request;
pub mod response;
pub mod sdp;

pub use handler::{AudioTrackFactory, MethodHandler};
pub use request::RtspRequest;
pub use response::RtspResponse;
