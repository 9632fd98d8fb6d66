//! Interfaces to the hardware and platform around the protocol engines.
//!
//! The camera, microphone, network stack and door strike are external
//! collaborators; the engines only see these traits.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

/// One encoded video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Baseline JPEG bytes.
    pub data: Vec<u8>,
    pub width: u16,
    pub height: u16,
}

/// Camera frame source.
pub trait FrameSource: Send {
    /// Grab the latest frame, or `None` if the camera has nothing right now.
    fn acquire_frame(&mut self) -> Option<Frame>;

    /// Give a frame back once every viewer has been served.
    fn release_frame(&mut self, _frame: Frame) {}
}

/// Microphone source delivering native-rate 16-bit mono PCM.
pub trait AudioSource: Send {
    /// Fill `buffer` completely within `timeout`. `false` on failure or
    /// when no samples are available.
    fn capture(&mut self, buffer: &mut [i16], timeout: Duration) -> bool;
}

/// Door strike or relay fired by the in-call DTMF code.
pub trait DoorRelease: Send {
    fn release(&mut self);
}

impl<F: FnMut() + Send> DoorRelease for F {
    fn release(&mut self) {
        self()
    }
}

/// Network state as seen by the SIP client and the stream URL.
pub trait NetworkInfo: Send {
    /// The address other hosts reach us on; `None` while offline.
    fn local_ipv4(&self) -> Option<Ipv4Addr>;

    /// Default gateway, used when the registrar name does not resolve.
    fn gateway(&self) -> Option<Ipv4Addr>;
}

/// Discovers the local address from the routing table.
#[derive(Debug, Clone, Default)]
pub struct SystemNetwork {
    gateway: Option<Ipv4Addr>,
}

impl SystemNetwork {
    pub fn new(gateway: Option<Ipv4Addr>) -> Self {
        Self { gateway }
    }
}

impl NetworkInfo for SystemNetwork {
    fn local_ipv4(&self) -> Option<Ipv4Addr> {
        // Connecting a UDP socket sends nothing; it only selects a route.
        let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect("8.8.8.8:53").ok()?;
        match socket.local_addr().ok()? {
            SocketAddr::V4(addr) if !addr.ip().is_unspecified() => Some(*addr.ip()),
            _ => None,
        }
    }

    fn gateway(&self) -> Option<Ipv4Addr> {
        self.gateway
    }
}

/// Fixed addresses, for hosts with a known configuration and for tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticNetwork {
    pub local: Option<Ipv4Addr>,
    pub gateway: Option<Ipv4Addr>,
}

impl NetworkInfo for StaticNetwork {
    fn local_ipv4(&self) -> Option<Ipv4Addr> {
        self.local.filter(|ip| !ip.is_unspecified())
    }

    fn gateway(&self) -> Option<Ipv4Addr> {
        self.gateway
    }
}
