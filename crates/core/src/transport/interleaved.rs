//! Interleaved binary data on the RTSP connection (RFC 2326 §10.12).
//!
//! ```text
//! +-----+---------+-----------------+------------------+
//! | '$' | channel | length (u16 BE) | RTP/RTCP packet  |
//! +-----+---------+-----------------+------------------+
//! ```

use std::io::Write;

use crate::error::{DoorbellError, Result};

pub const INTERLEAVED_MAGIC: u8 = b'$';

/// Prefix `packet` with the interleaved frame header.
pub fn frame(channel: u8, packet: &[u8]) -> Result<Vec<u8>> {
    let len = u16::try_from(packet.len()).map_err(|_| DoorbellError::TransportWrite {
        written: 0,
        expected: packet.len(),
    })?;
    let mut out = Vec::with_capacity(4 + packet.len());
    out.push(INTERLEAVED_MAGIC);
    out.push(channel);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(packet);
    Ok(out)
}

/// Write one framed packet. A failed or short write drops this packet only.
pub fn write_packet<W: Write>(writer: &mut W, channel: u8, packet: &[u8]) -> Result<()> {
    let framed = frame(channel, packet)?;
    writer.write_all(&framed)?;
    Ok(())
}

/// One unit read off a control connection.
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    /// A complete RTSP request, headers and body.
    Request(String),
    /// An interleaved packet from the client (RTCP receiver reports).
    Interleaved { channel: u8, len: usize },
}

/// Accumulates bytes from a control connection and splits them into
/// RTSP requests and interleaved packets.
#[derive(Debug, Default)]
pub struct InboundBuffer {
    buf: Vec<u8>,
}

/// Requests larger than this are treated as garbage and discarded.
const MAX_REQUEST: usize = 4096;

impl InboundBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Pop the next complete unit, if one has fully arrived.
    pub fn next(&mut self) -> Option<Inbound> {
        if self.buf.first() == Some(&INTERLEAVED_MAGIC) {
            if self.buf.len() < 4 {
                return None;
            }
            let channel = self.buf[1];
            let len = u16::from_be_bytes([self.buf[2], self.buf[3]]) as usize;
            if self.buf.len() < 4 + len {
                return None;
            }
            self.buf.drain(..4 + len);
            return Some(Inbound::Interleaved { channel, len });
        }

        let Some(end) = self.buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            if self.buf.len() > MAX_REQUEST {
                tracing::warn!(len = self.buf.len(), "oversized request discarded");
                self.buf.clear();
            }
            return None;
        };
        let head_len = end + 4;
        let head = String::from_utf8_lossy(&self.buf[..head_len]).into_owned();
        let body_len = head
            .lines()
            .find_map(|l| {
                let (name, value) = l.split_once(':')?;
                name.trim()
                    .eq_ignore_ascii_case("Content-Length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);

        if self.buf.len() < head_len + body_len {
            return None;
        }
        let body = String::from_utf8_lossy(&self.buf[head_len..head_len + body_len]).into_owned();
        self.buf.drain(..head_len + body_len);
        Some(Inbound::Request(head + &body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_header_layout() {
        let framed = frame(2, &[0xAA; 300]).unwrap();
        assert_eq!(&framed[..4], &[b'$', 2, 0x01, 0x2C]);
        assert_eq!(framed.len(), 304);
    }

    #[test]
    fn oversized_packet_is_rejected() {
        assert!(frame(0, &vec![0; 70_000]).is_err());
    }

    #[test]
    fn splits_requests_and_rtcp() {
        let mut buf = InboundBuffer::new();
        buf.extend(b"$\x01\x00\x04abcdOPTIONS rtsp://x RTSP/1.0\r\nCSeq: 5\r\n");
        assert_eq!(buf.next(), Some(Inbound::Interleaved { channel: 1, len: 4 }));
        assert_eq!(buf.next(), None);
        buf.extend(b"\r\nTEARDOWN rtsp://x RTSP/1.0\r\n\r\n");
        assert_eq!(
            buf.next(),
            Some(Inbound::Request("OPTIONS rtsp://x RTSP/1.0\r\nCSeq: 5\r\n\r\n".into()))
        );
        assert!(matches!(buf.next(), Some(Inbound::Request(r)) if r.starts_with("TEARDOWN")));
        assert!(buf.is_empty());
    }

    #[test]
    fn waits_for_body() {
        let mut buf = InboundBuffer::new();
        buf.extend(b"SET_PARAMETER rtsp://x RTSP/1.0\r\nContent-Length: 4\r\n\r\nab");
        assert_eq!(buf.next(), None);
        buf.extend(b"cd");
        assert!(matches!(buf.next(), Some(Inbound::Request(r)) if r.ends_with("abcd")));
    }
}
