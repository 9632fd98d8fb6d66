use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::auth::{AuthorizationHeader, Challenge, ChallengeKind, Credentials, DigestAuthenticator};
use crate::config::SipConfig;
use crate::error::{DoorbellError, Result};
use crate::sip::builder::{new_branch, new_call_id, new_tag, normalize_uri, DialogIds, LocalParty, SipResponse};
use crate::sip::dtmf::DoorCode;
use crate::sip::media::CallMedia;
use crate::sip::message::SipMessage;
use crate::sip::sdp::{self, Direction, RemoteMedia};
use crate::sip::transaction::{CallAction, CallEvent, CallOutcome, CallState, CallTransaction};
use crate::source::{AudioSource, DoorRelease, NetworkInfo};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const NETWORK_WARN_INTERVAL: Duration = Duration::from_secs(10);
const ALLOWED_METHODS: &str = "INVITE, ACK, BYE, CANCEL, OPTIONS";
const MAX_DATAGRAM: usize = 4096;

/// Outcome of the periodic REGISTER exchange.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistrationState {
    /// The most recent attempt succeeded.
    pub registered: bool,
    pub last_success: Option<Instant>,
    pub last_attempt: Option<Instant>,
    /// Status of the last final REGISTER response, challenges included.
    pub last_status_code: Option<u16>,
}

impl RegistrationState {
    /// Registered, and the last success is no older than two intervals.
    pub fn is_healthy(&self, now: Instant, interval: Duration) -> bool {
        self.registered
            && self
                .last_success
                .is_some_and(|at| now.saturating_duration_since(at) <= interval * 2)
    }
}

/// Cloneable trigger for the doorbell call, safe to use from any thread.
///
/// [`ring_now`](Self::ring_now) only raises a flag; the call is placed by
/// the next [`SipClient::pump_call`].
#[derive(Debug, Clone)]
pub struct RingHandle {
    requested: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
    configured: bool,
}

impl RingHandle {
    /// Request a ring. `false` only when the SIP account is not configured;
    /// requests while a ring is pending or a call is up are absorbed.
    pub fn ring_now(&self) -> bool {
        if !self.configured {
            tracing::warn!("SIP configuration incomplete, cannot ring");
            return false;
        }
        if self.active.load(Ordering::Acquire) {
            tracing::info!("call already active, ring ignored");
        } else if self.requested.swap(true, Ordering::AcqRel) {
            tracing::debug!("ring already pending");
        }
        true
    }

    /// A ring is pending or a call is in progress.
    pub fn is_ringing(&self) -> bool {
        self.requested.load(Ordering::Acquire) || self.active.load(Ordering::Acquire)
    }
}

/// Called on every [`SipClient::pump_call`] while a call is in progress,
/// e.g. to drive a ring tone.
pub type RingTick = Box<dyn FnMut() + Send>;

/// SIP user agent: registration, the doorbell call and its audio.
///
/// All methods are non-blocking except [`register`](Self::register), which
/// waits at most twice the response timeout. Drive it from one thread with
/// [`pump`](Self::pump).
pub struct SipClient {
    config: SipConfig,
    network: Box<dyn NetworkInfo>,
    socket: UdpSocket,
    local_port: u16,
    auth: DigestAuthenticator,
    registration: RegistrationState,
    proxy: Option<(SocketAddr, Instant)>,
    call: Option<CallTransaction>,
    last_outcome: Option<CallOutcome>,
    last_invite_status: Option<u16>,
    ring_tick: Option<RingTick>,
    media: CallMedia,
    ring_requested: Arc<AtomicBool>,
    call_active: Arc<AtomicBool>,
    last_network_warning: Option<Instant>,
}

impl SipClient {
    /// Bind the signaling and RTP sockets.
    pub fn bind(config: SipConfig, network: Box<dyn NetworkInfo>) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", config.local_port))?;
        socket.set_nonblocking(true)?;
        let local_port = socket.local_addr()?.port();
        let media = CallMedia::bind(config.rtp_port, 16000)?;

        if config.is_complete() {
            tracing::info!(port = local_port, user = %config.user, "SIP client bound");
        } else {
            tracing::warn!(port = local_port, "SIP configuration incomplete, registration and ringing disabled");
        }

        let auth = DigestAuthenticator::new(Credentials {
            username: config.user.clone(),
            password: config.password.clone(),
        });

        Ok(Self {
            config,
            network,
            socket,
            local_port,
            auth,
            registration: RegistrationState::default(),
            proxy: None,
            call: None,
            last_outcome: None,
            last_invite_status: None,
            ring_tick: None,
            media,
            ring_requested: Arc::new(AtomicBool::new(false)),
            call_active: Arc::new(AtomicBool::new(false)),
            last_network_warning: None,
        })
    }

    /// Send microphone audio during calls.
    pub fn with_audio(mut self, source: Box<dyn AudioSource>, capture_rate: u32) -> Self {
        self.media.set_audio_source(source, capture_rate);
        self
    }

    /// Door strike fired by the configured DTMF code.
    pub fn with_door(mut self, door: Box<dyn DoorRelease>) -> Self {
        let code = self.config.door_code.as_deref().and_then(DoorCode::new);
        if code.is_none() {
            tracing::warn!("door release attached without a door code, it will never fire");
        }
        self.media.set_door(door, code);
        self
    }

    /// Hook run on every call pump while a call is in progress.
    pub fn with_ring_tick(mut self, tick: RingTick) -> Self {
        self.ring_tick = Some(tick);
        self
    }

    pub fn handle(&self) -> RingHandle {
        RingHandle {
            requested: self.ring_requested.clone(),
            active: self.call_active.clone(),
            configured: self.config.is_complete(),
        }
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn rtp_port(&self) -> u16 {
        self.media.local_port()
    }

    pub fn registration(&self) -> &RegistrationState {
        &self.registration
    }

    pub fn is_registered(&self, now: Instant) -> bool {
        self.registration
            .is_healthy(now, self.config.timers.register_interval)
    }

    /// State of the call in progress, if any.
    pub fn call_state(&self) -> Option<CallState> {
        self.call.as_ref().map(CallTransaction::state)
    }

    /// How the most recent call ended.
    pub fn last_outcome(&self) -> Option<CallOutcome> {
        self.last_outcome
    }

    /// Last status code received for one of our INVITEs, provisional or final.
    pub fn last_invite_status(&self) -> Option<u16> {
        self.last_invite_status
    }

    pub fn media(&self) -> &CallMedia {
        &self.media
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.media.set_muted(muted);
    }

    /// One service cycle: inbound messages, the call, then registration.
    pub fn pump(&mut self, now: Instant) {
        self.pump_incoming(now);
        self.pump_call(now);
        self.pump_registration(now);
    }

    /// Register when the interval has elapsed. Skipped during a call.
    pub fn pump_registration(&mut self, now: Instant) {
        if !self.config.is_complete() || self.call.is_some() {
            return;
        }
        let due = self
            .registration
            .last_attempt
            .is_none_or(|at| now.saturating_duration_since(at) >= self.config.timers.register_interval);
        if !due {
            return;
        }
        match self.register(now) {
            Ok(()) | Err(DoorbellError::NetworkNotReady) => {}
            Err(e) => tracing::warn!(error = %e, "SIP registration failed"),
        }
    }

    /// REGISTER, answering one digest challenge with CSeq + 1.
    pub fn register(&mut self, now: Instant) -> Result<()> {
        if !self.config.is_complete() {
            return Err(DoorbellError::Config("SIP user, password and target are required".into()));
        }
        let party = self.local_party(now)?;
        let dest = self.proxy_addr(now)?;

        self.registration.last_attempt = Some(now);
        self.registration.registered = false;

        let call_id = new_call_id(party.ip);
        let tag = new_tag();
        let mut cseq = 1;
        let mut response = self.register_attempt(&party, dest, &call_id, &tag, cseq, None, now)?;
        self.registration.last_status_code = response.status();

        if let Some(kind) = response.status().and_then(ChallengeKind::from_status) {
            tracing::info!(status = response.status(), "registrar requested authentication");
            let value = response
                .header(kind.challenge_header())
                .ok_or_else(|| DoorbellError::InvalidChallenge(format!("missing {}", kind.challenge_header())))?;
            self.auth.set_challenge(Challenge::parse(value, kind)?);
            let authorization = self.auth.authorize("REGISTER", &party.registrar_uri())?;
            cseq += 1;
            response = self.register_attempt(&party, dest, &call_id, &tag, cseq, Some(authorization), now)?;
            self.registration.last_status_code = response.status();
        }

        match response.status() {
            Some(200..=299) => {
                self.registration.registered = true;
                self.registration.last_success = Some(now);
                tracing::info!(registrar = %dest, user = %self.config.user, "SIP registration successful");
                Ok(())
            }
            code => Err(DoorbellError::UnexpectedStatus {
                method: "REGISTER".into(),
                code: code.unwrap_or(0),
            }),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn register_attempt(
        &mut self,
        party: &LocalParty,
        dest: SocketAddr,
        call_id: &str,
        tag: &str,
        cseq: u32,
        authorization: Option<AuthorizationHeader>,
        now: Instant,
    ) -> Result<SipMessage> {
        let branch = new_branch();
        let aor = format!("{}@{}", party.user, party.domain);
        let ids = DialogIds {
            call_id,
            local_tag: tag,
            remote_tag: None,
            remote: &aor,
            branch: &branch,
            cseq,
        };
        let message = party
            .request("REGISTER", party.registrar_uri(), &ids)
            .header("Contact", party.contact())
            .authorization(authorization)
            .header("Expires", self.config.timers.register_expires.as_secs().to_string())
            .header("User-Agent", &party.user_agent)
            .serialize();

        tracing::debug!(cseq, %dest, "sending REGISTER");
        self.send(&message, dest)?;
        self.wait_for_response(call_id, cseq, "REGISTER", now)
    }

    /// Block until the final response to (Call-ID, CSeq, method) arrives.
    ///
    /// Requests received meanwhile are answered; other responses are dropped.
    fn wait_for_response(
        &mut self,
        call_id: &str,
        cseq: u32,
        method: &'static str,
        now: Instant,
    ) -> Result<SipMessage> {
        let deadline = Instant::now() + self.config.timers.response_timeout;
        let mut buf = [0u8; MAX_DATAGRAM];

        while Instant::now() < deadline {
            let (len, from) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if is_transient(&e) => {
                    std::thread::sleep(POLL_INTERVAL);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let message = match SipMessage::from_bytes(&buf[..len]) {
                Ok(message) => message,
                Err(e) => {
                    tracing::debug!(%from, error = %e, "undecodable SIP datagram dropped");
                    continue;
                }
            };
            if message.is_request() {
                self.handle_request(&message, from, now);
                continue;
            }
            if !message.matches(call_id, cseq, method) {
                tracing::debug!(status = message.status(), "discarding unmatched SIP response");
                continue;
            }
            if message.status().is_some_and(|code| code < 200) {
                continue;
            }
            return Ok(message);
        }
        Err(DoorbellError::Timeout(method))
    }

    /// Drain the signaling socket.
    pub fn pump_incoming(&mut self, now: Instant) {
        if self.local_party(now).is_err() {
            return;
        }
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) => match SipMessage::from_bytes(&buf[..len]) {
                    Ok(message) if message.is_request() => self.handle_request(&message, from, now),
                    Ok(message) => self.handle_response(&message, from, now),
                    Err(e) => tracing::debug!(%from, error = %e, "undecodable SIP datagram dropped"),
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if is_transient(&e) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "SIP receive failed");
                    break;
                }
            }
        }
    }

    /// Start a requested ring, fire due call timers and move call audio.
    pub fn pump_call(&mut self, now: Instant) {
        if self.ring_requested.swap(false, Ordering::AcqRel) {
            match self.start_call(now) {
                Ok(()) => {}
                Err(DoorbellError::CallInProgress) => tracing::debug!("ring ignored, call in progress"),
                Err(e) => tracing::warn!(error = %e, "ring failed"),
            }
        }

        let due = self
            .call
            .as_ref()
            .and_then(|call| call.due_timer(now, &self.config.timers));
        if let Some(event) = due {
            self.apply_call_event(event, None, now);
        }

        if self.call.is_some()
            && let Some(tick) = self.ring_tick.as_mut()
        {
            tick();
        }

        if self.media.is_active() {
            self.media.pump(now);
        }
    }

    fn start_call(&mut self, now: Instant) -> Result<()> {
        if self.call.is_some() {
            return Err(DoorbellError::CallInProgress);
        }
        if !self.config.is_complete() {
            return Err(DoorbellError::Config("SIP user, password and target are required".into()));
        }
        let party = self.local_party(now)?;
        let target = format!("{}@{}", self.config.target, self.config.domain);
        let call = CallTransaction::new(new_call_id(party.ip), new_tag(), new_branch(), target, now);

        let message = invite(&party, &call, &self.media, None);
        self.send_to_proxy(&message, now)?;

        tracing::info!(call_id = %call.call_id, target = %call.target, "ringing");
        self.call = Some(call);
        self.call_active.store(true, Ordering::Release);
        Ok(())
    }

    fn handle_request(&mut self, request: &SipMessage, from: SocketAddr, now: Instant) {
        let method = request.method().unwrap_or_default();
        tracing::debug!(method, %from, "SIP request received");

        let (code, reason) = match method {
            "ACK" => return,
            "OPTIONS" | "BYE" | "CANCEL" => (200, "OK"),
            "INVITE" => (486, "Busy Here"),
            _ => (501, "Not Implemented"),
        };

        match SipResponse::to_request(request, code, reason) {
            Ok(response) => {
                let response = if method == "OPTIONS" {
                    response.header("Allow", ALLOWED_METHODS)
                } else {
                    response
                };
                if let Err(e) = self.send(&response.serialize(), from) {
                    tracing::warn!(error = %e, method, "SIP response not sent");
                }
            }
            Err(e) => tracing::debug!(error = %e, method, "cannot answer SIP request"),
        }

        if matches!(method, "BYE" | "CANCEL") {
            let ours = self.call.as_ref().is_some_and(|call| {
                request
                    .call_id()
                    .is_some_and(|id| id.eq_ignore_ascii_case(&call.call_id))
            });
            if ours {
                tracing::info!(method, "remote side ended the call");
                self.apply_call_event(CallEvent::RemoteHangup, None, now);
            }
        }
    }

    fn handle_response(&mut self, response: &SipMessage, from: SocketAddr, now: Instant) {
        let (Some(code), Some((cseq, method))) = (response.status(), response.cseq()) else {
            return;
        };
        let Some(call) = self.call.as_mut() else {
            tracing::debug!(status = code, "SIP response outside any call dropped");
            return;
        };
        if !response
            .call_id()
            .is_some_and(|id| id.eq_ignore_ascii_case(&call.call_id))
        {
            tracing::debug!(status = code, "SIP response for another call dropped");
            return;
        }
        if !method.eq_ignore_ascii_case("INVITE") {
            tracing::debug!(status = code, method, "in-dialog response");
            return;
        }

        if cseq != call.cseq {
            if code >= 300 {
                // Retransmitted final response of a superseded INVITE.
                tracing::debug!(status = code, cseq, "acknowledging stale INVITE response");
                if let Err(e) = self.execute(CallAction::AckFinal, Some(response), now) {
                    tracing::warn!(error = %e, "stale ACK not sent");
                }
            }
            return;
        }

        if code < 300 {
            if let Some(contact) = response.contact_uri() {
                call.remote_contact = Some(contact.to_string());
            }
            if let Some(tag) = response.to_tag() {
                call.remote_tag = Some(tag.to_string());
            }
            if !response.body.trim().is_empty() {
                let fallback = match from.ip() {
                    IpAddr::V4(ip) => ip,
                    IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
                };
                call.remote_media = RemoteMedia::parse(&response.body, fallback).or(call.remote_media);
            }
        }

        tracing::debug!(status = code, cseq, "INVITE response");
        self.last_invite_status = Some(code);
        let event = match code {
            100..=199 => CallEvent::Provisional,
            200..=299 => CallEvent::Success,
            401 | 407 => CallEvent::Challenge {
                code,
                valid: self.store_challenge(response, code),
            },
            _ => CallEvent::Failure(code),
        };
        self.apply_call_event(event, Some(response), now);
    }

    fn store_challenge(&mut self, response: &SipMessage, code: u16) -> bool {
        let Some(kind) = ChallengeKind::from_status(code) else {
            return false;
        };
        let parsed = response
            .header(kind.challenge_header())
            .ok_or_else(|| DoorbellError::InvalidChallenge(format!("missing {}", kind.challenge_header())))
            .and_then(|value| Challenge::parse(value, kind));
        match parsed {
            Ok(challenge) => {
                self.auth.set_challenge(challenge);
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "unusable INVITE challenge");
                false
            }
        }
    }

    fn apply_call_event(&mut self, event: CallEvent, response: Option<&SipMessage>, now: Instant) {
        let Some(call) = self.call.as_mut() else {
            return;
        };
        let mut pending: VecDeque<CallAction> = call.apply(event, now).into();

        while let Some(action) = pending.pop_front() {
            let result = self.execute(action, response, now);
            let follow_up = match result {
                Ok(()) if action == CallAction::AckAnswer => Some(CallEvent::AckSent),
                Ok(()) => None,
                Err(e) => {
                    tracing::warn!(?action, error = %e, "call action failed");
                    Some(CallEvent::SendFailed)
                }
            };
            if let (Some(event), Some(call)) = (follow_up, self.call.as_mut()) {
                pending.extend(call.apply(event, now));
            }
        }

        self.finish_call_if_done();
    }

    fn execute(&mut self, action: CallAction, response: Option<&SipMessage>, now: Instant) -> Result<()> {
        if action == CallAction::StartMedia {
            match self.call.as_ref().and_then(|call| call.remote_media) {
                Some(remote) => self.media.start(remote, now),
                None => tracing::warn!("answer carried no usable audio description, call is silent"),
            }
            return Ok(());
        }

        let party = self.local_party(now)?;
        let Some(call) = self.call.as_mut() else {
            return Ok(());
        };

        let message = match action {
            CallAction::AckFinal => {
                let Some(response) = response else {
                    return Ok(());
                };
                let cseq = response.cseq().map_or(call.cseq, |(num, _)| num);
                let ids = DialogIds {
                    call_id: &call.call_id,
                    local_tag: &call.local_tag,
                    remote_tag: response.to_tag(),
                    remote: &call.target,
                    branch: response.via_branch().unwrap_or(&call.branch),
                    cseq,
                };
                party
                    .request("ACK", normalize_uri(&call.target), &ids)
                    .header("User-Agent", &party.user_agent)
                    .serialize()
            }
            CallAction::ReinviteWithAuth => {
                call.cseq += 1;
                call.branch = new_branch();
                let authorization = self.auth.authorize("INVITE", &party.registrar_uri())?;
                tracing::info!(cseq = call.cseq, "resending INVITE with credentials");
                invite(&party, call, &self.media, Some(authorization))
            }
            CallAction::AckAnswer => {
                let branch = new_branch();
                let ids = DialogIds {
                    call_id: &call.call_id,
                    local_tag: &call.local_tag,
                    remote_tag: call.remote_tag.as_deref(),
                    remote: &call.target,
                    branch: &branch,
                    cseq: call.cseq,
                };
                party
                    .request("ACK", call.dialog_uri(), &ids)
                    .header("User-Agent", &party.user_agent)
                    .serialize()
            }
            CallAction::Cancel => {
                tracing::info!(elapsed = ?call.ring_elapsed(now), "ring window expired, cancelling");
                let ids = DialogIds {
                    call_id: &call.call_id,
                    local_tag: &call.local_tag,
                    remote_tag: None,
                    remote: &call.target,
                    branch: &call.branch,
                    cseq: call.cseq,
                };
                party
                    .request("CANCEL", normalize_uri(&call.target), &ids)
                    .header("User-Agent", &party.user_agent)
                    .serialize()
            }
            CallAction::Bye => {
                let branch = new_branch();
                let ids = DialogIds {
                    call_id: &call.call_id,
                    local_tag: &call.local_tag,
                    remote_tag: call.remote_tag.as_deref(),
                    remote: &call.target,
                    branch: &branch,
                    cseq: call.cseq + 1,
                };
                party
                    .request("BYE", call.dialog_uri(), &ids)
                    .header("User-Agent", &party.user_agent)
                    .serialize()
            }
            CallAction::StartMedia => return Ok(()),
        };

        self.send_to_proxy(&message, now)
    }

    fn finish_call_if_done(&mut self) {
        let Some(CallState::Terminated(outcome)) = self.call_state() else {
            return;
        };
        if let Some(call) = self.call.take() {
            tracing::info!(call_id = %call.call_id, ?outcome, "call ended");
        }
        self.media.stop();
        self.last_outcome = Some(outcome);
        self.call_active.store(false, Ordering::Release);
    }

    /// Our identity on the current network; warns at most every 10 s while offline.
    fn local_party(&mut self, now: Instant) -> Result<LocalParty> {
        let Some(ip) = self.network.local_ipv4() else {
            let warn = self
                .last_network_warning
                .is_none_or(|at| now.saturating_duration_since(at) >= NETWORK_WARN_INTERVAL);
            if warn {
                tracing::warn!("network not ready, SIP idle");
                self.last_network_warning = Some(now);
            }
            return Err(DoorbellError::NetworkNotReady);
        };
        Ok(LocalParty {
            user: self.config.user.clone(),
            display_name: self.config.display_name.clone(),
            domain: self.config.domain.clone(),
            ip,
            port: self.local_port,
            user_agent: self.config.user_agent.clone(),
        })
    }

    /// Registrar address: DNS first, then the default gateway. Cached.
    fn proxy_addr(&mut self, now: Instant) -> Result<SocketAddr> {
        if let Some((addr, at)) = self.proxy {
            if now.saturating_duration_since(at) < self.config.timers.proxy_cache {
                return Ok(addr);
            }
        }

        let host = self.config.registrar_host();
        let port = self.config.registrar_port;
        let resolved = (host, port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.find(SocketAddr::is_ipv4));

        let addr = match resolved {
            Some(addr) => addr,
            None => {
                let gateway = self.network.gateway().ok_or(DoorbellError::NetworkNotReady)?;
                tracing::warn!(host, %gateway, "registrar did not resolve, using gateway");
                SocketAddr::from((gateway, port))
            }
        };
        tracing::debug!(host, %addr, "SIP proxy resolved");
        self.proxy = Some((addr, now));
        Ok(addr)
    }

    fn send_to_proxy(&mut self, message: &str, now: Instant) -> Result<()> {
        let dest = self.proxy_addr(now)?;
        self.send(message, dest)
    }

    fn send(&self, message: &str, dest: SocketAddr) -> Result<()> {
        tracing::trace!(%dest, message, "SIP send");
        let sent = self.socket.send_to(message.as_bytes(), dest)?;
        if sent != message.len() {
            return Err(DoorbellError::TransportWrite {
                written: sent,
                expected: message.len(),
            });
        }
        Ok(())
    }
}

/// INVITE offering our audio; sendrecv only with a microphone attached.
fn invite(
    party: &LocalParty,
    call: &CallTransaction,
    media: &CallMedia,
    authorization: Option<AuthorizationHeader>,
) -> String {
    let direction = if media.has_audio_source() {
        Direction::SendRecv
    } else {
        Direction::RecvOnly
    };
    let offer = sdp::offer(party.ip, media.local_port(), &party.display_name, direction);
    let ids = DialogIds {
        call_id: &call.call_id,
        local_tag: &call.local_tag,
        remote_tag: None,
        remote: &call.target,
        branch: &call.branch,
        cseq: call.cseq,
    };
    party
        .request("INVITE", normalize_uri(&call.target), &ids)
        .header("Contact", party.contact())
        .authorization(authorization)
        .header("User-Agent", &party.user_agent)
        .body("application/sdp", offer)
        .serialize()
}

fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset
    )
}
