use crate::error::{DoorbellError, ParseErrorKind, Result};

/// First line of a SIP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    Request { method: String, uri: String },
    Response { code: u16, reason: String },
}

/// A parsed SIP request or response (RFC 3261 §7).
///
/// Header lookup is case-insensitive and understands the compact forms
/// (`v`, `f`, `t`, `i`, `m`, `l`, `c`), so a name such as `"Call-ID"` also
/// finds an `i:` line.
#[derive(Debug, Clone)]
pub struct SipMessage {
    pub start: StartLine,
    /// Headers as ordered (name, value) pairs, names as received.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

const COMPACT_FORMS: &[(&str, &str)] = &[
    ("Via", "v"),
    ("From", "f"),
    ("To", "t"),
    ("Call-ID", "i"),
    ("Contact", "m"),
    ("Content-Length", "l"),
    ("Content-Type", "c"),
];

fn compact_form(name: &str) -> Option<&'static str> {
    COMPACT_FORMS
        .iter()
        .find(|(long, _)| long.eq_ignore_ascii_case(name))
        .map(|(_, short)| *short)
}

fn header_name_matches(key: &str, name: &str) -> bool {
    key.eq_ignore_ascii_case(name) || compact_form(name).is_some_and(|short| key.eq_ignore_ascii_case(short))
}

impl SipMessage {
    /// Parse one datagram.
    pub fn parse(raw: &str) -> Result<Self> {
        let (head, body) = raw.split_once("\r\n\r\n").unwrap_or((raw, ""));
        let mut lines = head.lines();

        let first = lines
            .next()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .ok_or(DoorbellError::parse(ParseErrorKind::EmptyMessage))?;

        let start = if let Some(status) = first.strip_prefix("SIP/2.0 ") {
            let (code, reason) = status.split_once(' ').unwrap_or((status, ""));
            let code = code
                .trim()
                .parse::<u16>()
                .map_err(|_| DoorbellError::parse(ParseErrorKind::InvalidStartLine))?;
            StartLine::Response {
                code,
                reason: reason.trim().to_string(),
            }
        } else {
            let parts: Vec<&str> = first.split_whitespace().collect();
            let &[method, uri, "SIP/2.0"] = &parts[..] else {
                return Err(DoorbellError::parse(ParseErrorKind::InvalidStartLine));
            };
            StartLine::Request {
                method: method.to_ascii_uppercase(),
                uri: uri.to_string(),
            }
        };

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

        Ok(Self {
            start,
            headers,
            body: body.to_string(),
        })
    }

    /// Parse a received datagram, rejecting non-UTF-8 payloads.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| DoorbellError::parse(ParseErrorKind::InvalidEncoding))?;
        Self::parse(text)
    }

    pub fn is_request(&self) -> bool {
        matches!(self.start, StartLine::Request { .. })
    }

    /// Request method, `None` for responses.
    pub fn method(&self) -> Option<&str> {
        match &self.start {
            StartLine::Request { method, .. } => Some(method),
            StartLine::Response { .. } => None,
        }
    }

    /// Response status code, `None` for requests.
    pub fn status(&self) -> Option<u16> {
        match self.start {
            StartLine::Response { code, .. } => Some(code),
            StartLine::Request { .. } => None,
        }
    }

    /// First value of a header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| header_name_matches(key, name))
            .map(|(_, value)| value.as_str())
    }

    /// Every value of a header, in order (several `Via` lines, for example).
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(key, _)| header_name_matches(key, name))
            .map(|(_, value)| value.as_str())
            .collect()
    }

    pub fn call_id(&self) -> Option<&str> {
        self.header("Call-ID")
    }

    /// `CSeq` as (sequence number, method).
    pub fn cseq(&self) -> Option<(u32, &str)> {
        let (num, method) = self.header("CSeq")?.split_once(' ')?;
        Some((num.trim().parse().ok()?, method.trim()))
    }

    /// Whether this message belongs to the exchange identified by
    /// (Call-ID, CSeq number, CSeq method).
    pub fn matches(&self, call_id: &str, cseq: u32, method: &str) -> bool {
        self.call_id().is_some_and(|id| id.eq_ignore_ascii_case(call_id))
            && self
                .cseq()
                .is_some_and(|(num, m)| num == cseq && m.eq_ignore_ascii_case(method))
    }

    /// `tag` parameter of `To`; absent until the remote side answers.
    pub fn to_tag(&self) -> Option<&str> {
        self.header("To").and_then(tag_param)
    }

    pub fn from_tag(&self) -> Option<&str> {
        self.header("From").and_then(tag_param)
    }

    /// URI inside the `Contact` header.
    pub fn contact_uri(&self) -> Option<&str> {
        self.header("Contact").and_then(sip_uri)
    }

    /// `branch` parameter of the top `Via`.
    pub fn via_branch(&self) -> Option<&str> {
        header_param(self.header("Via")?, "branch")
    }
}

/// `tag` parameter of a `From`/`To` value.
pub fn tag_param(value: &str) -> Option<&str> {
    header_param(value, "tag")
}

fn header_param<'a>(value: &'a str, name: &str) -> Option<&'a str> {
    value.split(';').skip(1).find_map(|param| {
        let (key, val) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| val.trim())
            .filter(|v| !v.is_empty())
    })
}

/// The `sip:` URI inside a name-addr such as `"Door" <sip:620@fritz.box>;tag=1`.
pub fn sip_uri(value: &str) -> Option<&str> {
    let start = value.find("sip:")?;
    let rest = &value[start..];
    let end = rest.find(['>', ';']).unwrap_or(rest.len());
    Some(rest[..end].trim()).filter(|uri| uri.len() > 4)
}
