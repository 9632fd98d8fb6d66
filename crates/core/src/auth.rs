//! HTTP Digest authentication for SIP (RFC 2617, RFC 3261 §22).
//!
//! A registrar or proxy answers an unauthenticated request with
//! `401 Unauthorized` (`WWW-Authenticate`) or
//! `407 Proxy Authentication Required` (`Proxy-Authenticate`). The client
//! resends the request once with a credential computed as:
//!
//! ```text
//! HA1      = MD5(username:realm:password)
//! HA2      = MD5(method:uri)
//! response = MD5(HA1:nonce:nc:cnonce:qop:HA2)   (qop present)
//! response = MD5(HA1:nonce:HA2)                 (legacy RFC 2069)
//! ```

use crate::error::{DoorbellError, Result};

/// Which side of the path issued a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeKind {
    /// `401` with `WWW-Authenticate`.
    Endpoint,
    /// `407` with `Proxy-Authenticate`.
    Proxy,
}

impl ChallengeKind {
    /// Header carrying the challenge in a response.
    pub fn challenge_header(self) -> &'static str {
        match self {
            Self::Endpoint => "WWW-Authenticate",
            Self::Proxy => "Proxy-Authenticate",
        }
    }

    /// Header carrying the credential in the retried request.
    pub fn authorization_header(self) -> &'static str {
        match self {
            Self::Endpoint => "Authorization",
            Self::Proxy => "Proxy-Authorization",
        }
    }

    /// Maps a response status code to a challenge kind.
    pub fn from_status(code: u16) -> Option<Self> {
        match code {
            401 => Some(Self::Endpoint),
            407 => Some(Self::Proxy),
            _ => None,
        }
    }
}

/// A parsed digest challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub kind: ChallengeKind,
    pub realm: String,
    pub nonce: String,
    /// `None` when the server did not name one (MD5 is assumed).
    pub algorithm: Option<String>,
    /// `Some("auth")` when the server offered `auth` protection.
    pub qop: Option<String>,
    pub opaque: Option<String>,
}

impl Challenge {
    /// Parse a `WWW-Authenticate`/`Proxy-Authenticate` header value.
    ///
    /// Fails with [`DoorbellError::InvalidChallenge`] when the realm or nonce
    /// is missing or empty.
    pub fn parse(value: &str, kind: ChallengeKind) -> Result<Self> {
        let params = value
            .trim()
            .strip_prefix("Digest")
            .ok_or_else(|| DoorbellError::InvalidChallenge(format!("not a digest challenge: {value}")))?;

        let mut realm = None;
        let mut nonce = None;
        let mut algorithm = None;
        let mut qop = None;
        let mut opaque = None;

        for (key, val) in split_params(params) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(val),
                "nonce" => nonce = Some(val),
                "algorithm" => algorithm = Some(val),
                "opaque" => opaque = Some(val),
                "qop" => {
                    if val.split(',').any(|q| q.trim().eq_ignore_ascii_case("auth")) {
                        qop = Some("auth".to_string());
                    }
                }
                _ => {}
            }
        }

        let realm = realm
            .filter(|r| !r.is_empty())
            .ok_or_else(|| DoorbellError::InvalidChallenge("missing realm".into()))?;
        let nonce = nonce
            .filter(|n| !n.is_empty())
            .ok_or_else(|| DoorbellError::InvalidChallenge("missing nonce".into()))?;

        Ok(Self {
            kind,
            realm,
            nonce,
            algorithm,
            qop,
            opaque,
        })
    }
}

/// Splits `key=value, key="quoted, value"` pairs, honouring quotes.
fn split_params(input: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut rest = input.trim();

    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else { break };
        let key = rest[..eq].trim().trim_start_matches(',').trim().to_string();
        rest = rest[eq + 1..].trim_start();

        let value;
        if let Some(quoted) = rest.strip_prefix('"') {
            let end = quoted.find('"').unwrap_or(quoted.len());
            value = quoted[..end].to_string();
            rest = quoted.get(end + 1..).unwrap_or("");
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            value = rest[..end].trim().to_string();
            rest = &rest[end..];
        }
        rest = rest.trim_start().trim_start_matches(',').trim_start();
        out.push((key, value));
    }
    out
}

/// SIP account credentials.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// A header line ready to be added to a retried request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationHeader {
    pub name: &'static str,
    pub value: String,
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Compute the digest `response` field.
///
/// `qop` selects the RFC 2617 form; without it the legacy RFC 2069 form is
/// used and `nc`/`cnonce` are ignored.
pub fn digest_response(
    credentials: &Credentials,
    realm: &str,
    nonce: &str,
    method: &str,
    uri: &str,
    qop: Option<(&str, &str, &str)>,
) -> String {
    let ha1 = md5_hex(&format!(
        "{}:{}:{}",
        credentials.username, realm, credentials.password
    ));
    let ha2 = md5_hex(&format!("{method}:{uri}"));

    match qop {
        Some((qop, nc, cnonce)) => md5_hex(&format!("{ha1}:{nonce}:{nc}:{cnonce}:{qop}:{ha2}")),
        None => md5_hex(&format!("{ha1}:{nonce}:{ha2}")),
    }
}

/// Builds authorization headers against the most recent challenge.
///
/// The challenge is kept until the server issues a new one, so the nonce
/// count keeps increasing across requests that reuse it.
#[derive(Debug)]
pub struct DigestAuthenticator {
    credentials: Credentials,
    challenge: Option<Challenge>,
    nonce_count: u32,
}

impl DigestAuthenticator {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            challenge: None,
            nonce_count: 0,
        }
    }

    /// Store a fresh challenge. The nonce count restarts when the nonce changes.
    pub fn set_challenge(&mut self, challenge: Challenge) {
        let same_nonce = self
            .challenge
            .as_ref()
            .is_some_and(|c| c.nonce == challenge.nonce);
        if !same_nonce {
            self.nonce_count = 0;
        }
        tracing::debug!(realm = %challenge.realm, kind = ?challenge.kind, "digest challenge stored");
        self.challenge = Some(challenge);
    }

    pub fn challenge(&self) -> Option<&Challenge> {
        self.challenge.as_ref()
    }

    pub fn nonce_count(&self) -> u32 {
        self.nonce_count
    }

    /// Build the authorization header for `method` on `uri` with a random cnonce.
    pub fn authorize(&mut self, method: &str, uri: &str) -> Result<AuthorizationHeader> {
        let cnonce = format!("{:08x}", rand::random::<u32>());
        self.authorize_with_cnonce(method, uri, &cnonce)
    }

    /// Same as [`authorize`](Self::authorize) with a caller-chosen cnonce.
    pub fn authorize_with_cnonce(
        &mut self,
        method: &str,
        uri: &str,
        cnonce: &str,
    ) -> Result<AuthorizationHeader> {
        let challenge = self
            .challenge
            .as_ref()
            .ok_or_else(|| DoorbellError::InvalidChallenge("no challenge received".into()))?;

        let mut value = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\"",
            self.credentials.username, challenge.realm, challenge.nonce, uri
        );

        let response = match challenge.qop.as_deref() {
            Some(qop) => {
                self.nonce_count += 1;
                let nc = format!("{:08x}", self.nonce_count);
                let response = digest_response(
                    &self.credentials,
                    &challenge.realm,
                    &challenge.nonce,
                    method,
                    uri,
                    Some((qop, &nc, cnonce)),
                );
                value.push_str(&format!(", response=\"{response}\""));
                if let Some(algorithm) = &challenge.algorithm {
                    value.push_str(&format!(", algorithm={algorithm}"));
                }
                value.push_str(&format!(", qop={qop}, nc={nc}, cnonce=\"{cnonce}\""));
                response
            }
            None => {
                let response = digest_response(
                    &self.credentials,
                    &challenge.realm,
                    &challenge.nonce,
                    method,
                    uri,
                    None,
                );
                value.push_str(&format!(", response=\"{response}\""));
                if let Some(algorithm) = &challenge.algorithm {
                    value.push_str(&format!(", algorithm={algorithm}"));
                }
                response
            }
        };

        if let Some(opaque) = &challenge.opaque {
            value.push_str(&format!(", opaque=\"{opaque}\""));
        }

        tracing::trace!(method, uri, response, "digest credentials computed");

        Ok(AuthorizationHeader {
            name: challenge.kind.authorization_header(),
            value,
        })
    }
}
