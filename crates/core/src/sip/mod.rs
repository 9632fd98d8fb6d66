//! SIP user agent for the doorbell call.
//!
//! [`SipClient`] keeps a registration alive, dials the configured target
//! when a [`RingHandle`] fires and runs the call through
//! [`transaction::CallState`]. Audio is G.711 over RTP; DTMF keyed on the
//! answering handset can open the door.
//!
//! Everything is UDP and non-blocking. The owner calls
//! [`SipClient::pump`] every few milliseconds with the current time.

pub mod builder;
pub mod client;
pub mod dtmf;
pub mod media;
pub mod message;
pub mod sdp;
pub mod transaction;

pub use client::{RegistrationState, RingHandle, RingTick, SipClient};
pub use message::SipMessage;
pub use transaction::{CallOutcome, CallState};
