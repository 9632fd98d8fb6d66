//! SDP generation for DESCRIBE responses (RFC 4566).
//!
//! ```text
//! v=0
//! o=- 0 0 IN IP4 192.168.1.50
//! s=ESP32-S3 Camera
//! c=IN IP4 0.0.0.0
//! t=0 0
//! a=control:rtsp://192.168.1.50:8554/mjpeg/1
//! m=video 0 RTP/AVP 26
//! a=rtpmap:26 JPEG/90000
//! a=framesize:26 640-480
//! a=control:rtsp://192.168.1.50:8554/mjpeg/1/track1
//! m=audio 0 RTP/AVP 0                      (only with audio enabled)
//! a=rtpmap:0 PCMU/8000
//! a=control:rtsp://192.168.1.50:8554/mjpeg/1/track2
//! ```

use crate::media::Packetizer;

/// Path of the single presentation.
pub const PRESENTATION_PATH: &str = "/mjpeg/1";

/// `rtsp://host:port/mjpeg/1`
pub fn presentation_url(host: &str, port: u16) -> String {
    format!("rtsp://{host}:{port}{PRESENTATION_PATH}")
}

/// One `m=` section.
#[derive(Debug, Clone)]
pub struct MediaDescription {
    pub media: &'static str,
    pub payload_type: u8,
    pub attributes: Vec<String>,
    /// Track name appended to the presentation URL for `a=control`.
    pub control: &'static str,
}

impl MediaDescription {
    pub fn from_packetizer(media: &'static str, control: &'static str, packetizer: &dyn Packetizer) -> Self {
        Self {
            media,
            payload_type: packetizer.payload_type(),
            attributes: packetizer.sdp_attributes(),
            control,
        }
    }

    /// Append `a=framesize` (non-standard, read by common JPEG players).
    pub fn with_framesize(mut self, size: Option<(u16, u16)>) -> Self {
        if let Some((width, height)) = size.filter(|(w, h)| *w > 0 && *h > 0) {
            self.attributes
                .push(format!("a=framesize:{} {width}-{height}", self.payload_type));
        }
        self
    }
}

/// Build the DESCRIBE body for the presentation served from `host`.
pub fn generate_sdp(host: &str, base_url: &str, session_name: &str, media: &[MediaDescription]) -> String {
    let mut sdp: Vec<String> = vec![
        "v=0".to_string(),
        format!("o=- 0 0 IN IP4 {host}"),
        format!("s={session_name}"),
        "c=IN IP4 0.0.0.0".to_string(),
        "t=0 0".to_string(),
        format!("a=control:{base_url}"),
    ];

    for m in media {
        sdp.push(format!("m={} 0 RTP/AVP {}", m.media, m.payload_type));
        sdp.extend(m.attributes.iter().cloned());
        sdp.push(format!("a=control:{base_url}/{}", m.control));
    }

    tracing::debug!(sections = media.len(), "SDP generated");

    format!("{}\r\n", sdp.join("\r\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::aac::AacPacketizer;
    use crate::media::g711::{G711Law, G711Packetizer};
    use crate::media::jpeg::JpegPacketizer;

    fn video() -> MediaDescription {
        MediaDescription::from_packetizer("video", "track1", &JpegPacketizer::new(1))
    }

    #[test]
    fn video_only_presentation() {
        let url = presentation_url("192.168.1.50", 8554);
        let sdp = generate_sdp("192.168.1.50", &url, "ESP32-S3 Camera", &[video().with_framesize(Some((640, 480)))]);

        assert!(sdp.starts_with("v=0\r\no=- 0 0 IN IP4 192.168.1.50\r\ns=ESP32-S3 Camera\r\n"));
        assert!(sdp.contains("c=IN IP4 0.0.0.0\r\nt=0 0\r\n"));
        assert!(sdp.contains("a=control:rtsp://192.168.1.50:8554/mjpeg/1\r\n"));
        assert!(sdp.contains("m=video 0 RTP/AVP 26\r\na=rtpmap:26 JPEG/90000\r\na=framesize:26 640-480\r\n"));
        assert!(sdp.contains("a=control:rtsp://192.168.1.50:8554/mjpeg/1/track1\r\n"));
        assert_eq!(sdp.matches("m=").count(), 1);
        assert!(sdp.ends_with("\r\n"));
    }

    #[test]
    fn framesize_omitted_before_first_frame() {
        let sdp = generate_sdp("h", "rtsp://h:8554/mjpeg/1", "s", &[video().with_framesize(None)]);
        assert!(!sdp.contains("a=framesize"));
    }

    #[test]
    fn pcmu_audio_section() {
        let audio = MediaDescription::from_packetizer("audio", "track2", &G711Packetizer::new(G711Law::Mu));
        let sdp = generate_sdp("h", "rtsp://h:8554/mjpeg/1", "s", &[video(), audio]);
        assert_eq!(sdp.matches("m=").count(), 2);
        assert!(sdp.contains("m=audio 0 RTP/AVP 0\r\na=rtpmap:0 PCMU/8000\r\na=control:rtsp://h:8554/mjpeg/1/track2\r\n"));
        assert!(sdp.find("m=video").unwrap() < sdp.find("m=audio").unwrap());
    }

    #[test]
    fn aac_audio_section() {
        let audio = MediaDescription::from_packetizer("audio", "track2", &AacPacketizer::new(16000));
        let sdp = generate_sdp("h", "rtsp://h:8554/mjpeg/1", "s", &[video(), audio]);
        assert!(sdp.contains("m=audio 0 RTP/AVP 96\r\n"));
        assert!(sdp.contains("a=rtpmap:96 MPEG4-GENERIC/16000/1\r\n"));
        assert!(sdp.contains("config=1408;"));
    }
}
