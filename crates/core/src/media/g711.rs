//! G.711 companding (ITU-T G.711) and the 8 kHz capture path.
//!
//! Both laws map a 16-bit linear sample to one byte: a sign bit, a 3-bit
//! segment (exponent) and a 4-bit step within the segment. μ-law adds a bias
//! of 0x84 before the segment search; A-law inverts alternate bits with the
//! 0x55/0xD5 masks.

use std::time::Duration;

use super::Packetizer;
use super::rtp::RtpHeader;
use crate::source::AudioSource;

/// G.711 clock rate; also the only sample rate the codec carries.
pub const G711_RATE: u32 = 8000;
/// Samples per 20 ms packet.
pub const SAMPLES_PER_PACKET: usize = 160;

const SEG_END: [i32; 8] = [0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF, 0x1FFF, 0x3FFF, 0x7FFF];
const ULAW_BIAS: i32 = 0x84;
const ULAW_CLIP: i32 = 32635;

fn segment(value: i32) -> usize {
    SEG_END.iter().position(|&end| value <= end).unwrap_or(SEG_END.len())
}

/// Encode one linear sample as μ-law.
pub fn linear_to_ulaw(sample: i16) -> u8 {
    let (mut pcm, mask) = if sample < 0 {
        (-(sample as i32), 0x7F)
    } else {
        (sample as i32, 0xFF)
    };
    pcm = pcm.min(ULAW_CLIP) + ULAW_BIAS;

    let seg = segment(pcm);
    if seg >= 8 {
        return (0x7F ^ mask) as u8;
    }
    let code = ((seg as i32) << 4) | ((pcm >> (seg + 3)) & 0x0F);
    (code ^ mask) as u8
}

/// Decode one μ-law byte.
pub fn ulaw_to_linear(code: u8) -> i16 {
    let u = !code;
    let mut t = (((u & 0x0F) as i32) << 3) + ULAW_BIAS;
    t <<= (u & 0x70) >> 4;
    if u & 0x80 != 0 {
        (ULAW_BIAS - t) as i16
    } else {
        (t - ULAW_BIAS) as i16
    }
}

/// Encode one linear sample as A-law.
pub fn linear_to_alaw(sample: i16) -> u8 {
    let (pcm, mask) = if sample >= 0 {
        (sample as i32, 0xD5)
    } else {
        (-(sample as i32) - 1, 0x55)
    };

    let seg = segment(pcm);
    if seg >= 8 {
        return (0x7F ^ mask) as u8;
    }
    let step = if seg < 2 {
        (pcm >> 4) & 0x0F
    } else {
        (pcm >> (seg + 3)) & 0x0F
    };
    ((((seg as i32) << 4) | step) ^ mask) as u8
}

/// Decode one A-law byte.
pub fn alaw_to_linear(code: u8) -> i16 {
    let a = code ^ 0x55;
    let mut t = ((a & 0x0F) as i32) << 4;
    match (a & 0x70) >> 4 {
        0 => t += 8,
        1 => t += 0x108,
        seg => {
            t += 0x108;
            t <<= seg - 1;
        }
    }
    if a & 0x80 != 0 { t as i16 } else { -t as i16 }
}

/// The two G.711 laws and their static RTP payload types (RFC 3551).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum G711Law {
    /// PCMU, payload type 0.
    Mu,
    /// PCMA, payload type 8.
    A,
}

impl G711Law {
    /// Static payload types of RFC 3551 §6.
    pub fn from_payload_type(pt: u8) -> Option<Self> {
        match pt {
            0 => Some(Self::Mu),
            8 => Some(Self::A),
            _ => None,
        }
    }

    pub fn payload_type(self) -> u8 {
        match self {
            Self::Mu => 0,
            Self::A => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Mu => "PCMU",
            Self::A => "PCMA",
        }
    }

    /// Code for a zero sample, sent whenever real audio is unavailable.
    pub fn silence(self) -> u8 {
        match self {
            Self::Mu => 0xFF,
            Self::A => 0xD5,
        }
    }

    /// Compand one 16-bit sample (ITU-T G.711).
    pub fn encode(self, sample: i16) -> u8 {
        match self {
            Self::Mu => linear_to_ulaw(sample),
            Self::A => linear_to_alaw(sample),
        }
    }

    /// Expand one code back to 16-bit linear.
    pub fn decode(self, code: u8) -> i16 {
        match self {
            Self::Mu => ulaw_to_linear(code),
            Self::A => alaw_to_linear(code),
        }
    }

    pub fn encode_all(self, samples: &[i16]) -> Vec<u8> {
        samples.iter().map(|&s| self.encode(s)).collect()
    }
}

/// Rate reduction from the microphone's native rate to 8 kHz.
pub trait Resampler: Send {
    /// Fill `output` from `input`; samples past the end of `input` become 0.
    fn resample(&mut self, input: &[i16], output: &mut [i16]);
}

/// Keeps every `step`-th sample. No anti-alias filtering.
#[derive(Debug, Clone, Copy)]
pub struct Decimator {
    step: usize,
}

impl Decimator {
    /// Integer ratio of the two rates, at least 1.
    pub fn new(in_rate: u32, out_rate: u32) -> Self {
        Self {
            step: (in_rate / out_rate.max(1)).max(1) as usize,
        }
    }

    pub fn step(&self) -> usize {
        self.step
    }
}

impl Resampler for Decimator {
    fn resample(&mut self, input: &[i16], output: &mut [i16]) {
        for (i, out) in output.iter_mut().enumerate() {
            *out = input.get(i * self.step).copied().unwrap_or(0);
        }
    }
}

/// Averages each group of `step` samples: a box filter that removes the
/// worst aliasing for little extra cost.
#[derive(Debug, Clone, Copy)]
pub struct AveragingDecimator {
    step: usize,
}

impl AveragingDecimator {
    pub fn new(in_rate: u32, out_rate: u32) -> Self {
        Self {
            step: (in_rate / out_rate.max(1)).max(1) as usize,
        }
    }
}

impl Resampler for AveragingDecimator {
    fn resample(&mut self, input: &[i16], output: &mut [i16]) {
        for (i, out) in output.iter_mut().enumerate() {
            let start = (i * self.step).min(input.len());
            let end = (start + self.step).min(input.len());
            let group = &input[start..end];
            *out = if group.is_empty() {
                0
            } else {
                (group.iter().map(|&s| s as i32).sum::<i32>() / group.len() as i32) as i16
            };
        }
    }
}

/// Pulls native-rate samples from an [`AudioSource`] and yields one 20 ms
/// packet of G.711 codes.
///
/// When the source is muted or capture fails, a packet of silence codes is
/// produced instead so the receiver keeps a continuous stream.
pub struct G711Capture {
    law: G711Law,
    resampler: Box<dyn Resampler>,
    native: Vec<i16>,
    narrow: Vec<i16>,
    read_timeout: Duration,
}

impl G711Capture {
    pub fn new(law: G711Law, capture_rate: u32) -> Self {
        Self::with_resampler(law, capture_rate, Box::new(Decimator::new(capture_rate, G711_RATE)))
    }

    pub fn with_resampler(law: G711Law, capture_rate: u32, resampler: Box<dyn Resampler>) -> Self {
        let step = (capture_rate / G711_RATE).max(1) as usize;
        Self {
            law,
            resampler,
            native: vec![0; SAMPLES_PER_PACKET * step],
            narrow: vec![0; SAMPLES_PER_PACKET],
            read_timeout: Duration::from_millis(10),
        }
    }

    pub fn law(&self) -> G711Law {
        self.law
    }

    /// One packet's worth of codes.
    pub fn next_packet(&mut self, source: Option<&mut (dyn AudioSource + 'static)>, muted: bool) -> Vec<u8> {
        let captured = match source {
            Some(source) if !muted => source.capture(&mut self.native, self.read_timeout),
            _ => false,
        };
        if !captured {
            return vec![self.law.silence(); SAMPLES_PER_PACKET];
        }
        self.resampler.resample(&self.native, &mut self.narrow);
        self.law.encode_all(&self.narrow)
    }
}

/// G.711 RTP packetizer: one packet per 20 ms block of codes.
#[derive(Debug)]
pub struct G711Packetizer {
    law: G711Law,
    header: RtpHeader,
}

impl G711Packetizer {
    pub fn new(law: G711Law) -> Self {
        Self {
            law,
            header: RtpHeader::with_random_ssrc(law.payload_type(), G711_RATE),
        }
    }
}

impl Packetizer for G711Packetizer {
    fn packetize(&mut self, codes: &[u8]) -> Vec<Vec<u8>> {
        if codes.is_empty() {
            return Vec::new();
        }
        let mut packet = Vec::with_capacity(12 + codes.len());
        packet.extend_from_slice(&self.header.write(false));
        packet.extend_from_slice(codes);
        self.header.advance_timestamp(codes.len() as u32);
        vec![packet]
    }

    fn codec_name(&self) -> &'static str {
        self.law.name()
    }

    fn clock_rate(&self) -> u32 {
        G711_RATE
    }

    fn payload_type(&self) -> u8 {
        self.law.payload_type()
    }

    fn sdp_attributes(&self) -> Vec<String> {
        vec![format!(
            "a=rtpmap:{} {}/{}",
            self.law.payload_type(),
            self.law.name(),
            G711_RATE
        )]
    }

    fn next_sequence(&self) -> u16 {
        self.header.sequence()
    }

    fn next_rtp_timestamp(&self) -> u32 {
        self.header.rtp_timestamp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_codes() {
        assert_eq!(linear_to_ulaw(0), 0xFF);
        assert_eq!(linear_to_alaw(0), 0xD5);
        assert_eq!(ulaw_to_linear(0xFF), 0);
    }

    #[test]
    fn ulaw_reference_values() {
        assert_eq!(linear_to_ulaw(i16::MAX), 0x80);
        assert_eq!(linear_to_ulaw(-i16::MAX), 0x00);
        assert_eq!(linear_to_ulaw(1000), 0xCE);
        assert_eq!(ulaw_to_linear(0x80), 32124);
        assert_eq!(ulaw_to_linear(0x00), -32124);
    }

    #[test]
    fn alaw_reference_values() {
        assert_eq!(linear_to_alaw(i16::MAX), 0xAA);
        assert_eq!(linear_to_alaw(i16::MIN), 0x2A);
        assert_eq!(alaw_to_linear(0xD5), 8);
        assert_eq!(alaw_to_linear(0xAA), 32256);
    }

    #[test]
    fn companding_error_is_bounded() {
        for law in [G711Law::Mu, G711Law::A] {
            for sample in (-32000i16..32000).step_by(97) {
                let decoded = law.decode(law.encode(sample)) as i32;
                let tolerance = (sample as i32).abs() / 16 + 16;
                assert!(
                    (decoded - sample as i32).abs() <= tolerance,
                    "{law:?}: {sample} decoded as {decoded}"
                );
            }
        }
    }

    #[test]
    fn decimation_keeps_every_step_sample() {
        let input: Vec<i16> = (0..8).collect();
        let mut out = [0i16; 6];
        Decimator::new(16000, 8000).resample(&input, &mut out);
        assert_eq!(out, [0, 2, 4, 6, 0, 0]);
    }

    #[test]
    fn averaging_decimation() {
        let input = [10i16, 20, 30, 50];
        let mut out = [0i16; 3];
        AveragingDecimator::new(16000, 8000).resample(&input, &mut out);
        assert_eq!(out, [15, 40, 0]);
    }

    struct Ramp;

    impl AudioSource for Ramp {
        fn capture(&mut self, buffer: &mut [i16], _timeout: Duration) -> bool {
            for (i, s) in buffer.iter_mut().enumerate() {
                *s = i as i16;
            }
            true
        }
    }

    struct Broken;

    impl AudioSource for Broken {
        fn capture(&mut self, _buffer: &mut [i16], _timeout: Duration) -> bool {
            false
        }
    }

    #[test]
    fn capture_substitutes_silence() {
        let mut capture = G711Capture::new(G711Law::Mu, 16000);
        let mut broken = Broken;
        assert_eq!(capture.next_packet(Some(&mut broken), false), vec![0xFF; 160]);

        let mut ramp = Ramp;
        assert_eq!(capture.next_packet(Some(&mut ramp), true), vec![0xFF; 160]);
        assert_eq!(capture.next_packet(None, false), vec![0xFF; 160]);

        let packet = capture.next_packet(Some(&mut ramp), false);
        assert_eq!(packet.len(), 160);
        assert_eq!(packet[1], linear_to_ulaw(2));

        let mut alaw = G711Capture::new(G711Law::A, 8000);
        assert_eq!(alaw.next_packet(None, false), vec![0xD5; 160]);
    }

    #[test]
    fn packetizer_advances_by_sample_count() {
        let mut p = G711Packetizer::new(G711Law::Mu);
        let packets = p.packetize(&[0xFF; 160]);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].len(), 172);
        assert_eq!(packets[0][1], 0);
        assert_eq!(p.next_rtp_timestamp(), 160);
        assert_eq!(p.next_sequence(), 1);
        assert_eq!(p.sdp_attributes(), vec!["a=rtpmap:0 PCMU/8000".to_string()]);
    }
}
