//! Baseline JPEG over RTP (RFC 2435).
//!
//! Only the entropy-coded scan data is sent; the receiver rebuilds the JPEG
//! headers from the 8-byte JPEG/RTP header carried in every packet:
//!
//! ```text
//!  0                   1                   2                   3
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | Type-specific |              Fragment Offset                  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      Type     |       Q       |     Width     |     Height    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Q is fixed at 80, so no quantization table header is ever sent and the
//! receiver derives tables from the standard scaling of RFC 2435 §4.2.

use super::Packetizer;
use super::rtp::RtpHeader;

/// RTP payload type for JPEG (RFC 3551).
pub const JPEG_PAYLOAD_TYPE: u8 = 26;
/// Video clock rate.
pub const JPEG_CLOCK_RATE: u32 = 90_000;
/// Scan bytes carried per packet; 1200 bytes of RTP payload minus the JPEG header.
pub const MAX_FRAGMENT_PAYLOAD: usize = 1192;
/// Main JPEG header of RFC 2435 §3.1; no restart or table headers follow.
pub const JPEG_HEADER_LEN: usize = 8;
/// Quality factor written into every JPEG/RTP header.
pub const FIXED_QUALITY: u8 = 80;

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOF0: u8 = 0xC0;
const SOS: u8 = 0xDA;

/// Chroma subsampling of a frame, from the luma sampling factors in SOF0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChromaLayout {
    /// Luma 2×1.
    Yuv422,
    /// Luma 2×2.
    Yuv420,
    /// Luma 1×1.
    Yuv444,
}

impl ChromaLayout {
    fn from_sampling(factors: u8) -> Self {
        match factors {
            0x22 => Self::Yuv420,
            0x11 => Self::Yuv444,
            _ => Self::Yuv422,
        }
    }

    /// RFC 2435 type field.
    ///
    /// The format has no 4:4:4 type; those frames go out as type 0 and the
    /// receiver decodes them with 4:2:2 sampling.
    pub fn rtp_type(self) -> u8 {
        match self {
            Self::Yuv422 | Self::Yuv444 => 0,
            Self::Yuv420 => 1,
        }
    }
}

/// Location of the scan data within an encoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanData {
    /// Offset of the first entropy-coded byte.
    pub offset: usize,
    /// Length of the scan data, excluding a trailing EOI marker.
    pub len: usize,
    pub layout: ChromaLayout,
    pub width: u16,
    pub height: u16,
}

impl ScanData {
    pub fn bytes<'a>(&self, jpeg: &'a [u8]) -> &'a [u8] {
        &jpeg[self.offset..self.offset + self.len]
    }
}

fn be16(data: &[u8], at: usize) -> Option<usize> {
    let hi = *data.get(at)?;
    let lo = *data.get(at + 1)?;
    Some(u16::from_be_bytes([hi, lo]) as usize)
}

/// Walk the marker segments of a baseline JPEG and locate its scan data.
///
/// Returns `None` on a bad SOI magic, a byte where a marker was expected,
/// a truncated segment, a missing SOF0/SOS, or an empty scan.
pub fn find_scan_data(jpeg: &[u8]) -> Option<ScanData> {
    if jpeg.len() < 4 || jpeg[0] != 0xFF || jpeg[1] != SOI {
        return None;
    }

    let mut frame: Option<(ChromaLayout, u16, u16)> = None;
    let mut i = 2;

    while i + 1 < jpeg.len() {
        if jpeg[i] != 0xFF {
            return None;
        }
        let marker = jpeg[i + 1];
        i += 2;

        // Fill bytes and standalone markers carry no length.
        if marker == 0xFF {
            i -= 1;
            continue;
        }
        if marker == SOI || marker == EOI || (0xD0..=0xD7).contains(&marker) {
            continue;
        }

        let seg_len = be16(jpeg, i)?;
        if seg_len < 2 || i + seg_len > jpeg.len() {
            return None;
        }

        match marker {
            SOF0 => {
                // length(2) precision(1) height(2) width(2) ncomp(1) id(1) HV(1)
                let height = be16(jpeg, i + 3)? as u16;
                let width = be16(jpeg, i + 5)? as u16;
                let sampling = *jpeg.get(i + 9)?;
                frame = Some((ChromaLayout::from_sampling(sampling), width, height));
            }
            SOS => {
                let (layout, width, height) = frame?;
                let offset = i + seg_len;
                let mut len = jpeg.len() - offset;
                if jpeg.ends_with(&[0xFF, EOI]) && len >= 2 {
                    len -= 2;
                }
                if len == 0 {
                    return None;
                }
                return Some(ScanData {
                    offset,
                    len,
                    layout,
                    width,
                    height,
                });
            }
            _ => {}
        }
        i += seg_len;
    }

    None
}

/// RFC 2435 packetizer: splits the scan data of one frame into packets of
/// at most [`MAX_FRAGMENT_PAYLOAD`] bytes, marker bit on the last.
///
/// All fragments of a frame share one timestamp. The caller advances it by
/// measured wall-clock time between frames (see
/// [`advance_elapsed`](Packetizer::advance_elapsed)).
#[derive(Debug)]
pub struct JpegPacketizer {
    header: RtpHeader,
    max_payload: usize,
}

impl JpegPacketizer {
    pub fn new(ssrc: u32) -> Self {
        Self {
            header: RtpHeader::new(JPEG_PAYLOAD_TYPE, JPEG_CLOCK_RATE, ssrc),
            max_payload: MAX_FRAGMENT_PAYLOAD,
        }
    }

    pub fn with_random_ssrc() -> Self {
        Self::new(rand::random::<u32>())
    }

    fn jpeg_header(offset: usize, rtp_type: u8, width: u16, height: u16) -> [u8; JPEG_HEADER_LEN] {
        let offset = (offset as u32).to_be_bytes();
        [
            0,
            offset[1],
            offset[2],
            offset[3],
            rtp_type,
            FIXED_QUALITY,
            (width / 8).min(255) as u8,
            (height / 8).min(255) as u8,
        ]
    }
}

impl Packetizer for JpegPacketizer {
    fn packetize(&mut self, jpeg: &[u8]) -> Vec<Vec<u8>> {
        let Some(scan) = find_scan_data(jpeg) else {
            tracing::warn!(len = jpeg.len(), "JPEG parse failed, dropping frame");
            return Vec::new();
        };
        let rtp_type = scan.layout.rtp_type();

        let data = scan.bytes(jpeg);
        let mut packets = Vec::with_capacity(data.len().div_ceil(self.max_payload));
        let mut offset = 0;

        for chunk in data.chunks(self.max_payload) {
            let last = offset + chunk.len() >= data.len();
            let mut packet = Vec::with_capacity(12 + JPEG_HEADER_LEN + chunk.len());
            packet.extend_from_slice(&self.header.write(last));
            packet.extend_from_slice(&Self::jpeg_header(offset, rtp_type, scan.width, scan.height));
            packet.extend_from_slice(chunk);

            tracing::trace!(offset, len = chunk.len(), last, "JPEG fragment");
            packets.push(packet);
            offset += chunk.len();
        }

        packets
    }

    fn advance_elapsed(&mut self, elapsed: std::time::Duration) {
        self.header.advance_elapsed(elapsed);
    }

    fn codec_name(&self) -> &'static str {
        "JPEG"
    }

    fn clock_rate(&self) -> u32 {
        JPEG_CLOCK_RATE
    }

    fn payload_type(&self) -> u8 {
        JPEG_PAYLOAD_TYPE
    }

    fn sdp_attributes(&self) -> Vec<String> {
        vec![format!("a=rtpmap:{JPEG_PAYLOAD_TYPE} JPEG/{JPEG_CLOCK_RATE}")]
    }

    fn next_sequence(&self) -> u16 {
        self.header.sequence()
    }

    fn next_rtp_timestamp(&self) -> u32 {
        self.header.rtp_timestamp()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal baseline JPEG: SOI, DQT, SOF0, SOS, `scan`, EOI.
    pub(crate) fn synthetic_jpeg(width: u16, height: u16, sampling: u8, scan: &[u8]) -> Vec<u8> {
        let mut jpeg = vec![0xFF, SOI];
        jpeg.extend_from_slice(&[0xFF, 0xDB, 0x00, 0x04, 0x00, 0x01]);
        jpeg.extend_from_slice(&[0xFF, SOF0, 0x00, 0x11, 0x08]);
        jpeg.extend_from_slice(&height.to_be_bytes());
        jpeg.extend_from_slice(&width.to_be_bytes());
        jpeg.extend_from_slice(&[0x03, 0x01, sampling, 0x00, 0x02, 0x11, 0x01, 0x03, 0x11, 0x01]);
        jpeg.extend_from_slice(&[0xFF, SOS, 0x00, 0x0C, 0x03, 0x01, 0x00, 0x02, 0x11, 0x03, 0x11, 0x00, 0x3F, 0x00]);
        jpeg.extend_from_slice(scan);
        jpeg.extend_from_slice(&[0xFF, EOI]);
        jpeg
    }

    #[test]
    fn locates_scan_and_layout() {
        let jpeg = synthetic_jpeg(640, 480, 0x21, &[1, 2, 3, 4]);
        let scan = find_scan_data(&jpeg).unwrap();
        assert_eq!(scan.bytes(&jpeg), &[1, 2, 3, 4]);
        assert_eq!(scan.layout, ChromaLayout::Yuv422);
        assert_eq!((scan.width, scan.height), (640, 480));

        let jpeg = synthetic_jpeg(320, 240, 0x22, &[9]);
        assert_eq!(find_scan_data(&jpeg).unwrap().layout, ChromaLayout::Yuv420);
        let jpeg = synthetic_jpeg(320, 240, 0x11, &[9]);
        assert_eq!(find_scan_data(&jpeg).unwrap().layout, ChromaLayout::Yuv444);
    }

    #[test]
    fn keeps_scan_without_trailing_eoi() {
        let mut jpeg = synthetic_jpeg(64, 64, 0x21, &[7, 7, 7]);
        jpeg.truncate(jpeg.len() - 2);
        assert_eq!(find_scan_data(&jpeg).unwrap().len, 3);
    }

    #[test]
    fn rejects_malformed_frames() {
        assert!(find_scan_data(&[]).is_none());
        assert!(find_scan_data(&[0x00, 0xD8, 0xFF, 0xD9]).is_none());

        let jpeg = synthetic_jpeg(64, 64, 0x21, &[1]);
        let mut garbage = jpeg.clone();
        garbage[2] = 0x12;
        assert!(find_scan_data(&garbage).is_none());

        // Cut inside the SOF0 segment.
        assert!(find_scan_data(&jpeg[..12]).is_none());

        // No SOS at all.
        let no_scan = [0xFF, SOI, 0xFF, 0xDB, 0x00, 0x03, 0x00, 0xFF, EOI];
        assert!(find_scan_data(&no_scan).is_none());
    }

    #[test]
    fn twenty_kilobyte_scan_yields_seventeen_fragments() {
        let scan: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let jpeg = synthetic_jpeg(800, 600, 0x21, &scan);
        let mut p = JpegPacketizer::new(0x1234_5678);
        let packets = p.packetize(&jpeg);

        assert_eq!(packets.len(), 17);
        for (i, packet) in packets.iter().enumerate() {
            let last = i == packets.len() - 1;
            assert_eq!(packet[1], if last { 0x9A } else { 0x1A });
            assert!(packet.len() <= 12 + JPEG_HEADER_LEN + MAX_FRAGMENT_PAYLOAD);
        }
    }

    #[test]
    fn fragments_reassemble_to_scan_data() {
        let scan: Vec<u8> = (0..5000u32).map(|i| (i * 7 % 256) as u8).collect();
        let jpeg = synthetic_jpeg(640, 480, 0x22, &scan);
        let mut p = JpegPacketizer::new(1);
        let packets = p.packetize(&jpeg);

        let mut rebuilt = Vec::new();
        for packet in &packets {
            let header = &packet[12..20];
            let offset = u32::from_be_bytes([0, header[1], header[2], header[3]]) as usize;
            assert_eq!(offset, rebuilt.len());
            assert_eq!(header[4], 1);
            assert_eq!(header[5], FIXED_QUALITY);
            assert_eq!(header[6], 80);
            assert_eq!(header[7], 60);
            rebuilt.extend_from_slice(&packet[20..]);
        }
        assert_eq!(rebuilt, scan);
    }

    #[test]
    fn sequence_counts_every_fragment() {
        let scan = vec![0x55u8; 3000];
        let jpeg = synthetic_jpeg(320, 240, 0x21, &scan);
        let mut p = JpegPacketizer::new(1);

        let mut expected = 0u16;
        for _ in 0..3 {
            for packet in p.packetize(&jpeg) {
                assert_eq!(u16::from_be_bytes([packet[2], packet[3]]), expected);
                expected = expected.wrapping_add(1);
            }
            p.advance_elapsed(std::time::Duration::from_millis(67));
        }
        assert_eq!(p.next_sequence(), 9);
        assert_eq!(p.next_rtp_timestamp(), 3 * 6030);
    }

    #[test]
    fn fragments_share_frame_timestamp() {
        let jpeg = synthetic_jpeg(320, 240, 0x21, &vec![1u8; 2500]);
        let mut p = JpegPacketizer::new(1);
        let ts: Vec<u32> = p
            .packetize(&jpeg)
            .iter()
            .map(|pk| u32::from_be_bytes([pk[4], pk[5], pk[6], pk[7]]))
            .collect();
        assert_eq!(ts, vec![0, 0, 0]);
    }

    #[test]
    fn yuv444_frames_stream_as_type_zero() {
        let jpeg = synthetic_jpeg(320, 240, 0x11, &[1, 2, 3]);
        let packets = JpegPacketizer::new(1).packetize(&jpeg);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0][1], 0x80 | JPEG_PAYLOAD_TYPE);
        assert_eq!(&packets[0][16..20], &[0, FIXED_QUALITY, 40, 30]);
        assert_eq!(&packets[0][20..], &[1, 2, 3]);
    }
}
