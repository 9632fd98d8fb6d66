use crate::error::{DoorbellError, ParseErrorKind, Result};

/// A parsed RTSP request (RFC 2326 §6).
///
/// ```text
/// Method SP Request-URI SP RTSP-Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// [body]
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2.
#[derive(Debug)]
pub struct RtspRequest {
    pub method: String,
    pub uri: String,
    pub version: String,
    /// Headers as ordered (name, value) pairs, names as received.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RtspRequest {
    /// Parse a complete request as framed by
    /// [`InboundBuffer`](crate::transport::interleaved::InboundBuffer).
    pub fn parse(raw: &str) -> Result<Self> {
        let (head, body) = raw.split_once("\r\n\r\n").unwrap_or((raw, ""));
        let mut lines = head.lines();

        let request_line = lines
            .next()
            .filter(|l| !l.trim().is_empty())
            .ok_or(DoorbellError::parse(ParseErrorKind::EmptyMessage))?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        let &[method, uri, version] = &parts[..] else {
            return Err(DoorbellError::parse(ParseErrorKind::InvalidStartLine));
        };

        if version != "RTSP/1.0" {
            tracing::warn!(version, "client sent non-RTSP/1.0 version");
        }

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or(DoorbellError::parse(ParseErrorKind::InvalidHeader))?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        Ok(RtspRequest {
            method: method.to_string(),
            uri: uri.to_string(),
            version: version.to_string(),
            headers,
            body: body.to_string(),
        })
    }

    /// Look up a header value by name (case-insensitive).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The CSeq to echo; `"0"` when the client sent none.
    pub fn cseq(&self) -> &str {
        self.get_header("CSeq").unwrap_or("0")
    }
}
