//! Runtime configuration.
//!
//! Every struct has a `Default` matching the device defaults, so a
//! configuration file only needs the fields that differ (credentials and the
//! call target, typically):
//!
//! ```toml
//! [sip]
//! user = "doorbell"
//! password = "secret"
//! target = "**11"
//!
//! [stream.audio]
//! enabled = true
//! codec = "aac"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{DoorbellError, ParseErrorKind, Result};

/// Top-level configuration for both subsystems.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DoorbellConfig {
    pub sip: SipConfig,
    pub stream: StreamConfig,
}

impl DoorbellConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(text)
            .map_err(|e| DoorbellError::parse(ParseErrorKind::Config(e.to_string())))?;
        config.stream.audio.normalize();
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

/// SIP account and registrar settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SipConfig {
    pub user: String,
    pub password: String,
    /// Display name in the `From` header.
    pub display_name: String,
    /// Number or extension dialled by a ring.
    pub target: String,
    /// SIP domain, also the registrar host when `registrar` is unset.
    pub domain: String,
    /// Registrar host name or address; falls back to the gateway when it
    /// does not resolve.
    pub registrar: Option<String>,
    pub registrar_port: u16,
    pub local_port: u16,
    pub rtp_port: u16,
    /// DTMF digits that open the door when keyed in order during a call.
    pub door_code: Option<String>,
    pub user_agent: String,
    #[serde(skip)]
    pub timers: SipTimers,
}

impl Default for SipConfig {
    fn default() -> Self {
        Self {
            user: String::new(),
            password: String::new(),
            display_name: "Doorbell".to_string(),
            target: "**11".to_string(),
            domain: "fritz.box".to_string(),
            registrar: None,
            registrar_port: 5060,
            local_port: 5062,
            rtp_port: 40000,
            door_code: None,
            user_agent: "ESP32-Doorbell/1.0".to_string(),
            timers: SipTimers::default(),
        }
    }
}

impl SipConfig {
    /// A ring or registration needs user, password and target.
    pub fn is_complete(&self) -> bool {
        !self.user.is_empty() && !self.password.is_empty() && !self.target.is_empty()
    }

    /// Host the REGISTER and INVITE requests are sent to.
    pub fn registrar_host(&self) -> &str {
        self.registrar.as_deref().unwrap_or(&self.domain)
    }
}

/// Bounded windows of the SIP client.
#[derive(Debug, Clone)]
pub struct SipTimers {
    pub register_interval: Duration,
    /// Value of the `Expires` header in REGISTER.
    pub register_expires: Duration,
    pub response_timeout: Duration,
    /// How long an unanswered INVITE rings before it is cancelled.
    pub ring_window: Duration,
    /// Maximum call duration absent a remote hangup.
    pub hold_window: Duration,
    pub cancel_wait: Duration,
    pub proxy_cache: Duration,
}

impl Default for SipTimers {
    fn default() -> Self {
        Self {
            register_interval: Duration::from_secs(60),
            register_expires: Duration::from_secs(120),
            response_timeout: Duration::from_millis(2000),
            ring_window: Duration::from_secs(30),
            hold_window: Duration::from_secs(60),
            cancel_wait: Duration::from_secs(3),
            proxy_cache: Duration::from_secs(60),
        }
    }
}

/// Which RTP transports SETUP may negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportPolicy {
    /// Interleaved TCP or UDP, as the client asks.
    #[default]
    Any,
    /// Reject UDP with 461 so media always rides the RTSP connection.
    InterleavedOnly,
}

/// RTSP server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub port: u16,
    pub max_sessions: usize,
    pub transport: TransportPolicy,
    /// Target video frame interval in milliseconds.
    pub frame_interval_ms: u64,
    pub session_timeout_secs: u64,
    pub session_name: String,
    pub audio: AudioConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            port: 8554,
            max_sessions: 4,
            transport: TransportPolicy::Any,
            frame_interval_ms: 67,
            session_timeout_secs: 60,
            session_name: "ESP32-S3 Camera".to_string(),
            audio: AudioConfig::default(),
        }
    }
}

impl StreamConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
}

/// Audio track codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioCodec {
    /// G.711 μ-law, 8 kHz, payload type 0.
    #[default]
    Pcmu,
    /// AAC-LC in RFC 3640 hbr mode, payload type 96.
    Aac,
}

/// Audio capture and streaming settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub enabled: bool,
    pub codec: AudioCodec,
    /// Native microphone capture rate.
    pub capture_rate: u32,
    /// AAC encoder sample rate (8000 or 16000).
    pub sample_rate: u32,
    /// AAC encoder bitrate in bits per second.
    pub bitrate: u32,
    pub muted: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            codec: AudioCodec::Pcmu,
            capture_rate: 16000,
            sample_rate: 16000,
            bitrate: 32000,
            muted: false,
        }
    }
}

impl AudioConfig {
    /// Clamp the AAC rate and bitrate to what the encoder accepts.
    pub fn normalize(&mut self) {
        if self.sample_rate != 8000 && self.sample_rate != 16000 {
            tracing::warn!(rate = self.sample_rate, "unsupported AAC sample rate, using 16000");
            self.sample_rate = 16000;
        }
        if !(16000..=48000).contains(&self.bitrate) {
            tracing::warn!(bitrate = self.bitrate, "AAC bitrate out of range, using 32000");
            self.bitrate = 32000;
        }
    }
}
