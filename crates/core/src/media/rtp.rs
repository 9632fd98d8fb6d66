use std::time::Duration;

/// Length of the fixed RTP header without CSRCs.
pub const RTP_HEADER_LEN: usize = 12;

/// Generic RTP fixed header builder (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Each media track of each viewer (and the in-call audio stream) owns one
/// of these. It manages:
/// - **Sequence number**: 16-bit, wrapping, incremented on every packet
///   including every fragment of a multi-packet frame.
/// - **Timestamp**: kept as u64; the low 32 bits go on the wire. It advances
///   either by a fixed sample count or by measured wall-clock time scaled
///   to the track clock rate.
/// - **SSRC**: random per RFC 3550 §8.1.
#[derive(Debug)]
pub struct RtpHeader {
    /// RTP payload type (7-bit, RFC 3551).
    pub pt: u8,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
    clock_rate: u32,
    sequence: u16,
    timestamp: u64,
}

impl RtpHeader {
    /// Create header state with an explicit SSRC.
    pub fn new(pt: u8, clock_rate: u32, ssrc: u32) -> Self {
        tracing::debug!(
            pt,
            clock_rate,
            ssrc = format_args!("{:#010X}", ssrc),
            "RTP header state created"
        );
        Self {
            pt,
            ssrc,
            clock_rate,
            sequence: 0,
            timestamp: 0,
        }
    }

    /// Create with a random SSRC.
    pub fn with_random_ssrc(pt: u8, clock_rate: u32) -> Self {
        Self::new(pt, clock_rate, rand::random::<u32>())
    }

    /// Sequence number the next [`write`](Self::write) will use.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Timestamp the next packet will carry, truncated to the wire width.
    pub fn rtp_timestamp(&self) -> u32 {
        self.timestamp as u32
    }

    pub fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    /// Serialize a 12-byte RTP fixed header and advance the sequence number.
    pub fn write(&mut self, marker: bool) -> [u8; RTP_HEADER_LEN] {
        let mut header = [0u8; RTP_HEADER_LEN];
        header[0] = 2 << 6;
        header[1] = ((marker as u8) << 7) | (self.pt & 0x7F);
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&(self.timestamp as u32).to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        self.sequence = self.sequence.wrapping_add(1);
        header
    }

    /// Advance the timestamp by a fixed number of clock ticks
    /// (e.g. 160 per 20 ms G.711 packet, 1024 per AAC frame).
    pub fn advance_timestamp(&mut self, increment: u32) {
        self.timestamp = self.timestamp.wrapping_add(increment as u64);
    }

    /// Advance the timestamp by measured wall-clock time.
    ///
    /// At least one tick is added so consecutive frames never share a
    /// timestamp. Returns the increment applied.
    pub fn advance_elapsed(&mut self, elapsed: Duration) -> u32 {
        let ticks = elapsed.as_micros() * self.clock_rate as u128 / 1_000_000;
        let increment = u32::try_from(ticks).unwrap_or(u32::MAX).max(1);
        self.advance_timestamp(increment);
        increment
    }
}

/// Read-only view of a received RTP packet with big-endian field accessors.
#[derive(Debug, Clone, Copy)]
pub struct RtpPacket<'a> {
    data: &'a [u8],
    payload_start: usize,
    payload_end: usize,
}

impl<'a> RtpPacket<'a> {
    /// Validate version, CSRC list, header extension and padding.
    ///
    /// Returns `None` for anything that is not a well-formed RTP v2 packet.
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() < RTP_HEADER_LEN || data[0] >> 6 != 2 {
            return None;
        }

        let csrc_count = (data[0] & 0x0F) as usize;
        let mut start = RTP_HEADER_LEN + csrc_count * 4;
        if data.len() < start {
            return None;
        }

        if data[0] & 0x10 != 0 {
            let ext = data.get(start..start + 4)?;
            let words = u16::from_be_bytes([ext[2], ext[3]]) as usize;
            start += 4 + words * 4;
            if data.len() < start {
                return None;
            }
        }

        let mut end = data.len();
        if data[0] & 0x20 != 0 {
            let padding = *data.last()? as usize;
            if padding == 0 || end - start < padding {
                return None;
            }
            end -= padding;
        }

        Some(Self {
            data,
            payload_start: start,
            payload_end: end,
        })
    }

    pub fn version(&self) -> u8 {
        self.data[0] >> 6
    }

    pub fn marker(&self) -> bool {
        self.data[1] & 0x80 != 0
    }

    pub fn payload_type(&self) -> u8 {
        self.data[1] & 0x7F
    }

    pub fn sequence(&self) -> u16 {
        u16::from_be_bytes([self.data[2], self.data[3]])
    }

    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.data[4], self.data[5], self.data[6], self.data[7]])
    }

    pub fn ssrc(&self) -> u32 {
        u32::from_be_bytes([self.data[8], self.data[9], self.data[10], self.data[11]])
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.data[self.payload_start..self.payload_end]
    }
}
