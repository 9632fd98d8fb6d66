use std::net::Ipv4Addr;

use crate::auth::AuthorizationHeader;
use crate::error::{DoorbellError, ParseErrorKind, Result};
use crate::sip::message::SipMessage;

/// New `Via` branch carrying the RFC 3261 magic cookie.
pub fn new_branch() -> String {
    format!("z9hG4bK-{:x}", rand::random::<u32>())
}

/// New `From`/`To` tag.
pub fn new_tag() -> String {
    format!("{:x}", rand::random::<u32>())
}

/// New Call-ID scoped to the local address.
pub fn new_call_id(local_ip: Ipv4Addr) -> String {
    format!("{:x}@{local_ip}", rand::random::<u32>())
}

/// Wrap a bare `user@host` in a `sip:` URI; `<...>` brackets are dropped.
pub fn normalize_uri(uri: &str) -> String {
    let uri = uri.trim();
    let uri = uri
        .strip_prefix('<')
        .and_then(|u| u.strip_suffix('>'))
        .unwrap_or(uri);
    if uri.starts_with("sip:") {
        uri.to_string()
    } else {
        format!("sip:{uri}")
    }
}

/// Identity of this user agent as it appears in every request.
#[derive(Debug, Clone)]
pub struct LocalParty {
    pub user: String,
    pub display_name: String,
    pub domain: String,
    pub ip: Ipv4Addr,
    pub port: u16,
    pub user_agent: String,
}

impl LocalParty {
    /// `Via` value for UDP (RFC 3261 §18.2.1); `branch` must carry the `z9hG4bK` cookie.
    pub fn via(&self, branch: &str) -> String {
        format!("SIP/2.0/UDP {}:{};branch={branch}", self.ip, self.port)
    }

    /// `From` value with display name and our dialog tag.
    pub fn from(&self, tag: &str) -> String {
        format!(
            "\"{}\" <sip:{}@{}>;tag={tag}",
            self.display_name, self.user, self.domain
        )
    }

    /// Where the registrar and the answerer reach us: our IP, not the domain.
    pub fn contact(&self) -> String {
        format!("<sip:{}@{}:{}>", self.user, self.ip, self.port)
    }

    /// `sip:user@domain`, the address-of-record.
    pub fn aor(&self) -> String {
        format!("sip:{}@{}", self.user, self.domain)
    }

    /// `sip:domain`, the registrar URI.
    pub fn registrar_uri(&self) -> String {
        format!("sip:{}", self.domain)
    }

    /// Start a request with the mandatory headers of RFC 3261 §8.1.1.
    pub fn request(
        &self,
        method: &str,
        uri: impl Into<String>,
        dialog: &DialogIds<'_>,
    ) -> SipRequest {
        SipRequest::new(method, uri)
            .header("Via", self.via(dialog.branch))
            .header("Max-Forwards", "70")
            .header("From", self.from(dialog.local_tag))
            .header("To", to_header(dialog.remote, dialog.remote_tag))
            .header("Call-ID", dialog.call_id)
            .header("CSeq", format!("{} {method}", dialog.cseq))
    }
}

/// Identifiers that tie a request to its transaction and dialog.
#[derive(Debug, Clone, Copy)]
pub struct DialogIds<'a> {
    pub call_id: &'a str,
    pub local_tag: &'a str,
    /// `None` until the remote side has answered with a tag.
    pub remote_tag: Option<&'a str>,
    /// `user@host` placed in the `To` header.
    pub remote: &'a str,
    pub branch: &'a str,
    pub cseq: u32,
}

fn to_header(remote: &str, tag: Option<&str>) -> String {
    let uri = normalize_uri(remote);
    match tag {
        Some(tag) => format!("<{uri}>;tag={tag}"),
        None => format!("<{uri}>"),
    }
}

/// An outgoing request under construction.
#[derive(Debug, Clone)]
pub struct SipRequest {
    pub method: String,
    pub uri: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<(String, String)>,
}

impl SipRequest {
    pub fn new(method: &str, uri: impl Into<String>) -> Self {
        Self {
            method: method.to_string(),
            uri: uri.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    /// `Authorization` or `Proxy-Authorization`, whichever the challenge asked for.
    pub fn authorization(self, auth: Option<AuthorizationHeader>) -> Self {
        match auth {
            Some(auth) => self.header(auth.name, auth.value),
            None => self,
        }
    }

    /// Attach a body; `Content-Type` is emitted only when a body is present.
    pub fn body(mut self, content_type: &str, body: String) -> Self {
        if !body.is_empty() {
            self.body = Some((content_type.to_string(), body));
        }
        self
    }

    /// Wire form, `Content-Length` always last before the body.
    pub fn serialize(&self) -> String {
        let mut out = format!("{} {} SIP/2.0\r\n", self.method, self.uri);
        for (name, value) in &self.headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        match &self.body {
            Some((content_type, body)) => {
                out.push_str(&format!(
                    "Content-Type: {content_type}\r\nContent-Length: {}\r\n\r\n{body}",
                    body.len()
                ));
            }
            None => out.push_str("Content-Length: 0\r\n\r\n"),
        }
        out
    }
}

/// A response to a received request, echoing its transaction headers.
#[derive(Debug, Clone)]
pub struct SipResponse {
    pub code: u16,
    pub reason: &'static str,
    pub headers: Vec<(String, String)>,
}

impl SipResponse {
    /// Copy every `Via` plus `From`, `To`, `Call-ID` and `CSeq` from `request`.
    pub fn to_request(request: &SipMessage, code: u16, reason: &'static str) -> Result<Self> {
        let mut headers = Vec::new();

        let vias = request.header_values("Via");
        if vias.is_empty() {
            return Err(DoorbellError::parse(ParseErrorKind::MissingHeader("Via")));
        }
        headers.extend(vias.into_iter().map(|via| ("Via".to_string(), via.to_string())));

        for name in ["From", "To", "Call-ID", "CSeq"] {
            let value = request
                .header(name)
                .ok_or(DoorbellError::parse(ParseErrorKind::MissingHeader(name)))?;
            headers.push((name.to_string(), value.to_string()));
        }

        Ok(Self {
            code,
            reason,
            headers,
        })
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn serialize(&self) -> String {
        let mut out = format!("SIP/2.0 {} {}\r\n", self.code, self.reason);
        for (name, value) in &self.headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str("Content-Length: 0\r\n\r\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn party() -> LocalParty {
        LocalParty {
            user: "620".into(),
            display_name: "Doorbell".into(),
            domain: "fritz.box".into(),
            ip: Ipv4Addr::new(192, 168, 1, 20),
            port: 5062,
            user_agent: "ESP32-Doorbell/1.0".into(),
        }
    }

    #[test]
    fn request_carries_mandatory_headers_in_order() {
        let ids = DialogIds {
            call_id: "c1@192.168.1.20",
            local_tag: "abc",
            remote_tag: None,
            remote: "620@fritz.box",
            branch: "z9hG4bK-1",
            cseq: 1,
        };
        let party = party();
        let msg = party
            .request("REGISTER", party.registrar_uri(), &ids)
            .header("Contact", party.contact())
            .header("Expires", "120")
            .serialize();

        assert!(msg.starts_with("REGISTER sip:fritz.box SIP/2.0\r\n"));
        let expected = "Via: SIP/2.0/UDP 192.168.1.20:5062;branch=z9hG4bK-1\r\n\
            Max-Forwards: 70\r\n\
            From: \"Doorbell\" <sip:620@fritz.box>;tag=abc\r\n\
            To: <sip:620@fritz.box>\r\n\
            Call-ID: c1@192.168.1.20\r\n\
            CSeq: 1 REGISTER\r\n\
            Contact: <sip:620@192.168.1.20:5062>\r\n\
            Expires: 120\r\n\
            Content-Length: 0\r\n\r\n";
        assert!(msg.ends_with(expected), "{msg}");
    }

    #[test]
    fn body_sets_type_and_length() {
        let msg = SipRequest::new("INVITE", "sip:**11@fritz.box")
            .body("application/sdp", "v=0\r\n".to_string())
            .serialize();
        assert!(msg.ends_with("Content-Type: application/sdp\r\nContent-Length: 5\r\n\r\nv=0\r\n"));

        let empty = SipRequest::new("INVITE", "sip:x").body("application/sdp", String::new()).serialize();
        assert!(!empty.contains("Content-Type"));
    }

    #[test]
    fn to_header_gets_remote_tag() {
        let ids = DialogIds {
            call_id: "c",
            local_tag: "l",
            remote_tag: Some("r"),
            remote: "sip:**11@fritz.box",
            branch: "z9hG4bK-2",
            cseq: 2,
        };
        let msg = party().request("BYE", "sip:**11@192.168.1.1", &ids).serialize();
        assert!(msg.contains("To: <sip:**11@fritz.box>;tag=r\r\n"));
        assert!(msg.contains("CSeq: 2 BYE\r\n"));
    }

    #[test]
    fn response_echoes_transaction_headers() {
        let request = SipMessage::parse(
            "OPTIONS sip:620@192.168.1.20:5062 SIP/2.0\r\n\
             Via: SIP/2.0/UDP 192.168.1.1:5060;branch=z9hG4bKa\r\n\
             Via: SIP/2.0/UDP 10.0.0.1;branch=z9hG4bKb\r\n\
             From: <sip:fritz.box>;tag=1\r\n\
             To: <sip:620@fritz.box>\r\n\
             Call-ID: opt1\r\n\
             CSeq: 7 OPTIONS\r\n\r\n",
        )
        .unwrap();
        let response = SipResponse::to_request(&request, 200, "OK").unwrap().serialize();
        assert!(response.starts_with("SIP/2.0 200 OK\r\nVia: SIP/2.0/UDP 192.168.1.1:5060;branch=z9hG4bKa\r\nVia: SIP/2.0/UDP 10.0.0.1;branch=z9hG4bKb\r\n"));
        assert!(response.contains("CSeq: 7 OPTIONS\r\n"));
        assert!(response.ends_with("Content-Length: 0\r\n\r\n"));
    }

    #[test]
    fn response_needs_call_id() {
        let request = SipMessage::parse(
            "BYE sip:x SIP/2.0\r\nVia: SIP/2.0/UDP h\r\nFrom: a\r\nTo: b\r\nCSeq: 1 BYE\r\n\r\n",
        )
        .unwrap();
        assert!(SipResponse::to_request(&request, 200, "OK").is_err());
    }

    #[test]
    fn identifiers_have_expected_shape() {
        assert!(new_branch().starts_with("z9hG4bK-"));
        assert!(new_call_id(Ipv4Addr::new(10, 0, 0, 2)).ends_with("@10.0.0.2"));
        assert!(new_tag().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(normalize_uri("<sip:a@b>"), "sip:a@b");
        assert_eq!(normalize_uri("**11@fritz.box"), "sip:**11@fritz.box");
    }
}
