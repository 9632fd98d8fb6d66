//! AAC-LC bridge: PCM in, RFC 3640 (`mpeg4-generic`, AAC-hbr) RTP out.
//!
//! The encoder is an external collaborator that emits ADTS-framed output in
//! whatever chunk sizes it likes. The bridge absorbs those chunks in a small
//! stash, recovers frame boundaries from the ADTS header, strips it, and
//! hands the raw access unit to [`AacPacketizer`], which prefixes the
//! AU-header section:
//!
//! ```text
//! +---------------------------+------------------------+-----------+
//! | AU-headers-length (16)    | AU-size(13) | index(3) | raw AU    |
//! | = 0x0010                  |                        |           |
//! +---------------------------+------------------------+-----------+
//! ```

use super::Packetizer;
use super::g711::{Decimator, Resampler};
use super::rtp::RtpHeader;
use crate::error::Result;
use crate::source::AudioSource;

/// Dynamic payload type used for the AAC track.
pub const AAC_PAYLOAD_TYPE: u8 = 96;
/// PCM samples per AAC-LC frame.
pub const AAC_FRAME_SAMPLES: usize = 1024;
/// Upper bound on buffered encoder output.
pub const STASH_CAPACITY: usize = 4096;
/// Largest AU the 13-bit AU-size field can describe.
pub const MAX_AU_SIZE: usize = (1 << 13) - 1;

/// An AAC encoder producing ADTS-framed output.
pub trait AacEncoder: Send {
    /// Encode one frame of PCM at the encoder's sample rate, returning
    /// whatever encoded bytes are ready (possibly none, possibly several
    /// frames, possibly a partial frame).
    fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>>;
}

/// MPEG-4 sampling frequency index (ISO/IEC 14496-3 §1.6.3.4).
///
/// Unknown rates map to index 8 (16 kHz).
pub fn frequency_index(rate: u32) -> u8 {
    match rate {
        96000 => 0,
        88200 => 1,
        64000 => 2,
        48000 => 3,
        44100 => 4,
        32000 => 5,
        24000 => 6,
        22050 => 7,
        16000 => 8,
        12000 => 9,
        11025 => 10,
        8000 => 11,
        7350 => 12,
        _ => 8,
    }
}

/// Two-byte AudioSpecificConfig for mono AAC-LC at `rate`.
pub fn audio_specific_config(rate: u32) -> u16 {
    const AAC_LC: u16 = 2;
    const MONO: u16 = 1;
    (AAC_LC << 11) | ((frequency_index(rate) as u16) << 7) | (MONO << 3)
}

/// Fixed fields of an ADTS header needed to delimit frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
    /// Header plus payload.
    pub frame_len: usize,
    /// 7 bytes, or 9 when a CRC follows.
    pub header_len: usize,
}

impl AdtsHeader {
    /// Parse the header at the start of `data`. `None` without a sync word.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 7 || !is_sync(data[0], data[1]) {
            return None;
        }
        let protection_absent = data[1] & 0x01 != 0;
        let frame_len = (((data[3] & 0x03) as usize) << 11)
            | ((data[4] as usize) << 3)
            | (((data[5] & 0xE0) as usize) >> 5);
        let header_len = if protection_absent { 7 } else { 9 };

        (frame_len >= header_len).then_some(Self {
            frame_len,
            header_len,
        })
    }
}

/// 12-bit sync word followed by layer 0.
fn is_sync(first: u8, second: u8) -> bool {
    first == 0xFF && second & 0xF6 == 0xF0
}

/// Microphone → encoder → raw access units.
pub struct AacBridge {
    encoder: Box<dyn AacEncoder>,
    sample_rate: u32,
    resampler: Decimator,
    mic: Vec<i16>,
    pcm: Vec<i16>,
    stash: Vec<u8>,
}

impl AacBridge {
    /// `capture_rate` is the microphone's native rate; the encoder runs at
    /// `sample_rate` and owns its own bitrate setting.
    pub fn new(encoder: Box<dyn AacEncoder>, capture_rate: u32, sample_rate: u32) -> Self {
        let resampler = Decimator::new(capture_rate, sample_rate);
        Self {
            encoder,
            sample_rate,
            mic: vec![0; AAC_FRAME_SAMPLES * resampler.step()],
            pcm: vec![0; AAC_FRAME_SAMPLES],
            resampler,
            stash: Vec::with_capacity(STASH_CAPACITY),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Capture one frame of audio, encode it, and return the next complete
    /// access unit if one is available.
    ///
    /// Silence (zero samples) is encoded when the source is muted or capture
    /// fails, so the AAC stream keeps its cadence.
    pub fn next_access_unit(
        &mut self,
        source: Option<&mut (dyn AudioSource + 'static)>,
        muted: bool,
    ) -> Option<Vec<u8>> {
        let captured = match source {
            Some(source) if !muted => source.capture(&mut self.mic, std::time::Duration::from_millis(80)),
            _ => false,
        };
        if !captured {
            self.mic.fill(0);
        }
        self.resampler.resample(&self.mic, &mut self.pcm);

        match self.encoder.encode(&self.pcm) {
            Ok(bytes) => self.push_encoded(&bytes),
            Err(e) => {
                tracing::warn!(error = %e, "AAC encode failed");
                return None;
            }
        }
        self.pop_access_unit()
    }

    /// Absorb encoder output. Bytes beyond the stash capacity are dropped.
    pub fn push_encoded(&mut self, bytes: &[u8]) {
        let room = STASH_CAPACITY - self.stash.len();
        if bytes.len() > room {
            tracing::warn!(dropped = bytes.len() - room, "AAC stash full");
        }
        self.stash.extend_from_slice(&bytes[..bytes.len().min(room)]);
    }

    /// Take the next raw access unit out of the stash.
    ///
    /// With a valid ADTS header the header is stripped and one frame is
    /// returned once it is complete. A header claiming more than the stash
    /// can hold, or garbage ahead of a later sync word, is skipped up to the
    /// next sync word. With no sync word anywhere the whole stash is flushed
    /// as one raw unit.
    pub fn pop_access_unit(&mut self) -> Option<Vec<u8>> {
        loop {
            if self.stash.len() < 7 {
                return None;
            }
            match AdtsHeader::parse(&self.stash) {
                Some(adts) if adts.frame_len > STASH_CAPACITY => {
                    tracing::warn!(frame_len = adts.frame_len, "ADTS frame larger than stash, resyncing");
                    self.skip_to_sync();
                }
                Some(adts) => {
                    if self.stash.len() < adts.frame_len {
                        return None;
                    }
                    let au = self.stash[adts.header_len..adts.frame_len].to_vec();
                    self.stash.drain(..adts.frame_len);
                    if !au.is_empty() {
                        return Some(au);
                    }
                }
                None if next_sync(&self.stash).is_some() => {
                    tracing::debug!("garbage ahead of ADTS sync, resyncing");
                    self.skip_to_sync();
                }
                None => {
                    tracing::debug!(len = self.stash.len(), "no ADTS sync, flushing stash raw");
                    return Some(std::mem::take(&mut self.stash));
                }
            }
        }
    }

    /// Drop stash bytes up to the next sync word after the first byte, or
    /// everything when there is none.
    fn skip_to_sync(&mut self) {
        let skip = next_sync(&self.stash).unwrap_or(self.stash.len());
        self.stash.drain(..skip);
    }
}

/// Position of the first ADTS sync word past offset 0.
fn next_sync(data: &[u8]) -> Option<usize> {
    data.windows(2)
        .skip(1)
        .position(|w| is_sync(w[0], w[1]))
        .map(|at| at + 1)
}

fn fmtp_for_rate(rate: u32) -> String {
    format!(
        "profile-level-id=1;mode=AAC-hbr;config={:04X};SizeLength=13;IndexLength=3;IndexDeltaLength=3",
        audio_specific_config(rate)
    )
}

/// RFC 3640 packetizer: one access unit per packet, marker always set.
#[derive(Debug)]
pub struct AacPacketizer {
    header: RtpHeader,
    sample_rate: u32,
}

impl AacPacketizer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            header: RtpHeader::with_random_ssrc(AAC_PAYLOAD_TYPE, sample_rate),
            sample_rate,
        }
    }
}

impl Packetizer for AacPacketizer {
    fn packetize(&mut self, au: &[u8]) -> Vec<Vec<u8>> {
        if au.is_empty() || au.len() > MAX_AU_SIZE {
            tracing::warn!(len = au.len(), "AAC access unit does not fit an AU header");
            return Vec::new();
        }
        let au_header = ((au.len() as u16) << 3) & 0xFFF8;

        let mut packet = Vec::with_capacity(12 + 4 + au.len());
        packet.extend_from_slice(&self.header.write(true));
        packet.extend_from_slice(&0x0010u16.to_be_bytes());
        packet.extend_from_slice(&au_header.to_be_bytes());
        packet.extend_from_slice(au);

        self.header.advance_timestamp(AAC_FRAME_SAMPLES as u32);
        vec![packet]
    }

    fn codec_name(&self) -> &'static str {
        "MPEG4-GENERIC"
    }

    fn clock_rate(&self) -> u32 {
        self.sample_rate
    }

    fn payload_type(&self) -> u8 {
        AAC_PAYLOAD_TYPE
    }

    fn sdp_attributes(&self) -> Vec<String> {
        vec![
            format!("a=rtpmap:{AAC_PAYLOAD_TYPE} MPEG4-GENERIC/{}/1", self.sample_rate),
            format!("a=fmtp:{AAC_PAYLOAD_TYPE} {}", fmtp_for_rate(self.sample_rate)),
        ]
    }

    fn next_sequence(&self) -> u16 {
        self.header.sequence()
    }

    fn next_rtp_timestamp(&self) -> u32 {
        self.header.rtp_timestamp()
    }
}
