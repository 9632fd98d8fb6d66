use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{DoorbellError, Result};

const BACKOFF_STEP: Duration = Duration::from_millis(50);
const BACKOFF_MAX: Duration = Duration::from_millis(500);
const MAX_FAIL_STREAK: u32 = 10;

/// UDP transport for outbound RTP packet delivery.
///
/// Binds a single ephemeral socket (`0.0.0.0:0`) shared by every viewer
/// that negotiated UDP. The transport is address-only; the session layer
/// resolves which address each track goes to.
#[derive(Clone)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    /// Bind an ephemeral UDP socket for outbound RTP.
    pub fn bind() -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    /// Send one datagram. A short send counts as a failure.
    pub fn send_to(&self, payload: &[u8], addr: SocketAddr) -> Result<usize> {
        let sent = self.socket.send_to(payload, addr)?;
        if sent != payload.len() {
            return Err(DoorbellError::TransportWrite {
                written: sent,
                expected: payload.len(),
            });
        }
        Ok(sent)
    }
}

/// Linear backoff after consecutive UDP send failures: 50 ms per failure
/// in the current streak, capped at 500 ms.
#[derive(Debug, Default, Clone)]
pub struct UdpBackoff {
    fail_streak: u32,
    until: Option<Instant>,
}

impl UdpBackoff {
    /// Whether sending should be skipped at `now`.
    pub fn is_backing_off(&self, now: Instant) -> bool {
        self.until.is_some_and(|until| now < until)
    }

    pub fn record_failure(&mut self, now: Instant) -> Duration {
        self.fail_streak = (self.fail_streak + 1).min(MAX_FAIL_STREAK);
        let delay = (BACKOFF_STEP * self.fail_streak).min(BACKOFF_MAX);
        self.until = Some(now + delay);
        delay
    }

    pub fn record_success(&mut self) {
        self.fail_streak = 0;
        self.until = None;
    }

    pub fn fail_streak(&self) -> u32 {
        self.fail_streak
    }
}
