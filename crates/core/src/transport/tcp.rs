use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use super::interleaved::{self, Inbound, InboundBuffer};
use crate::error::{DoorbellError, Result};

/// Outcome of draining a control socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// New bytes arrived.
    Data,
    /// Nothing to read right now.
    Idle,
    /// Peer closed the connection or the socket failed.
    Closed,
}

/// One RTSP control connection, driven without blocking from the server's
/// polling cycle.
///
/// The socket is non-blocking. Reads take whatever is available; writes
/// retry on `WouldBlock` until `write_timeout` elapses, so a slow viewer
/// stalls the cycle for at most that long.
pub struct ControlConnection {
    stream: TcpStream,
    inbound: InboundBuffer,
    peer_addr: SocketAddr,
    write_timeout: Duration,
}

impl ControlConnection {
    pub fn new(stream: TcpStream, write_timeout: Duration) -> Result<Self> {
        let peer_addr = stream.peer_addr()?;
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        tracing::info!(%peer_addr, "client connected");
        Ok(Self {
            stream,
            inbound: InboundBuffer::new(),
            peer_addr,
            write_timeout,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Drain everything the socket has buffered.
    pub fn poll_read(&mut self) -> ReadStatus {
        let mut status = ReadStatus::Idle;
        let mut chunk = [0u8; 1024];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return ReadStatus::Closed,
                Ok(n) => {
                    self.inbound.extend(&chunk[..n]);
                    status = ReadStatus::Data;
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return status,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!(peer = %self.peer_addr, error = %e, "control read failed");
                    return ReadStatus::Closed;
                }
            }
        }
    }

    /// Next complete request or interleaved packet received so far.
    pub fn next_inbound(&mut self) -> Option<Inbound> {
        self.inbound.next()
    }

    /// Write all of `bytes` or fail with the number of bytes that made it.
    pub fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let deadline = Instant::now() + self.write_timeout;
        let mut written = 0;
        while written < bytes.len() {
            match self.stream.write(&bytes[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        break;
                    }
                    thread::sleep(Duration::from_millis(1));
                }
                Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if written == 0 => return Err(e.into()),
                Err(_) => break,
            }
        }
        if written < bytes.len() {
            return Err(DoorbellError::TransportWrite {
                written,
                expected: bytes.len(),
            });
        }
        Ok(())
    }

    /// Send an RTP/RTCP packet on an interleaved channel.
    pub fn send_interleaved(&mut self, channel: u8, packet: &[u8]) -> Result<()> {
        let framed = interleaved::frame(channel, packet)?;
        self.send(&framed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn pair() -> (ControlConnection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (ControlConnection::new(server, Duration::from_secs(1)).unwrap(), client)
    }

    #[test]
    fn reads_requests_without_blocking() {
        let (mut conn, mut client) = pair();
        assert_eq!(conn.poll_read(), ReadStatus::Idle);

        client.write_all(b"OPTIONS rtsp://h/ RTSP/1.0\r\nCSeq: 1\r\n\r\n").unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while conn.poll_read() != ReadStatus::Data && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(matches!(conn.next_inbound(), Some(Inbound::Request(r)) if r.starts_with("OPTIONS")));
    }

    #[test]
    fn detects_closed_peer() {
        let (mut conn, client) = pair();
        drop(client);
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut status = conn.poll_read();
        while status != ReadStatus::Closed && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
            status = conn.poll_read();
        }
        assert_eq!(status, ReadStatus::Closed);
    }

    #[test]
    fn interleaved_send_is_framed() {
        let (mut conn, mut client) = pair();
        conn.send_interleaved(0, &[1, 2, 3]).unwrap();
        let mut buf = [0u8; 7];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [b'$', 0, 0, 3, 1, 2, 3]);
    }
}
