//! The outbound call as an explicit state machine.
//!
//! ```text
//!            1xx                 2xx               ACK sent
//! Inviting ───────▶ Proceeding ───────▶ Answered ──────────▶ InCall
//!    │  401/407 (once)   │ ring window                          │ hold window
//!    ◀─────────┘         ▼                                      ▼
//!    │ ring window   Cancelling ── 487 / 2xx + BYE / wait ──▶ Terminated
//!    └──────────────────────────────────────────────────▶ Terminated
//! ```
//!
//! [`transition`] is the whole table; the client only feeds it events and
//! executes the returned actions.

use std::time::{Duration, Instant};

use crate::config::SipTimers;
use crate::sip::sdp::RemoteMedia;

/// How a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// Answered, then hung up by either side.
    Completed,
    /// Final error response (status code), or a second challenge.
    Rejected(u16),
    /// Cancelled after ringing unanswered.
    Cancelled,
    /// Ring window expired before any provisional response.
    Abandoned,
    /// A request could not be sent or a challenge was unusable.
    Failed,
}

/// Progress of the single outbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// INVITE sent, nothing heard yet. `authenticated` once the one
    /// credentialed retry has gone out.
    Inviting { authenticated: bool },
    /// A provisional response arrived; the INVITE may now be cancelled.
    Proceeding { authenticated: bool },
    /// 2xx received; the ACK is about to go out.
    Answered,
    InCall { since: Instant },
    Cancelling { since: Instant },
    Terminated(CallOutcome),
}

impl CallState {
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated(_))
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEvent {
    /// 1xx for the current INVITE.
    Provisional,
    /// 2xx for the current INVITE.
    Success,
    /// 401/407 for the current INVITE; `valid` when the challenge parsed.
    Challenge { code: u16, valid: bool },
    /// Any other final response for the current INVITE.
    Failure(u16),
    RingTimeout,
    AckSent,
    HoldExpired,
    CancelTimeout,
    /// Remote BYE or CANCEL.
    RemoteHangup,
    SendFailed,
}

/// Side effects requested by a transition, executed in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallAction {
    /// ACK a final non-2xx response within the INVITE transaction.
    AckFinal,
    /// Resend the INVITE with credentials, CSeq + 1.
    ReinviteWithAuth,
    /// ACK a 2xx to the remote contact.
    AckAnswer,
    StartMedia,
    Cancel,
    Bye,
}

/// The transition table.
pub fn transition(state: CallState, event: CallEvent, now: Instant) -> (CallState, Vec<CallAction>) {
    use CallAction::*;
    use CallEvent::*;
    use CallState::*;

    match (state, event) {
        (Inviting { authenticated } | Proceeding { authenticated }, Provisional) => {
            (Proceeding { authenticated }, vec![])
        }
        (Inviting { .. } | Proceeding { .. }, Success) => (Answered, vec![AckAnswer]),
        // Answered just as the CANCEL went out: complete the dialog and hang up.
        (Cancelling { .. }, Success) => (Terminated(CallOutcome::Cancelled), vec![AckAnswer, Bye]),
        // Retransmitted 2xx: the ACK was lost.
        (InCall { since }, Success) => (InCall { since }, vec![AckAnswer]),

        (Inviting { authenticated: false } | Proceeding { authenticated: false }, Challenge { valid: true, .. }) => {
            (Inviting { authenticated: true }, vec![AckFinal, ReinviteWithAuth])
        }
        (Inviting { authenticated: false } | Proceeding { authenticated: false }, Challenge { valid: false, .. }) => {
            (Terminated(CallOutcome::Failed), vec![AckFinal])
        }
        (Inviting { .. } | Proceeding { .. }, Challenge { code, .. } | Failure(code)) => {
            (Terminated(CallOutcome::Rejected(code)), vec![AckFinal])
        }
        (Cancelling { .. }, Challenge { .. } | Failure(_)) => {
            (Terminated(CallOutcome::Cancelled), vec![AckFinal])
        }

        (Inviting { .. }, RingTimeout) => (Terminated(CallOutcome::Abandoned), vec![]),
        (Proceeding { .. }, RingTimeout) => (Cancelling { since: now }, vec![Cancel]),
        (Cancelling { .. }, CancelTimeout) => (Terminated(CallOutcome::Cancelled), vec![]),

        (Answered, AckSent) => (InCall { since: now }, vec![StartMedia]),
        (InCall { .. }, HoldExpired) => (Terminated(CallOutcome::Completed), vec![Bye]),

        (Answered | InCall { .. }, RemoteHangup) => (Terminated(CallOutcome::Completed), vec![]),
        (Inviting { .. } | Proceeding { .. } | Cancelling { .. }, RemoteHangup) => {
            (Terminated(CallOutcome::Cancelled), vec![])
        }
        (Terminated(_), _) => (state, vec![]),
        (_, SendFailed) => (Terminated(CallOutcome::Failed), vec![]),

        (state, _) => (state, vec![]),
    }
}

/// The single outbound call and its identifiers.
#[derive(Debug)]
pub struct CallTransaction {
    pub call_id: String,
    pub local_tag: String,
    pub remote_tag: Option<String>,
    /// CSeq of the current INVITE.
    pub cseq: u32,
    /// Via branch of the current INVITE, reused by its CANCEL and non-2xx ACK.
    pub branch: String,
    /// `user@domain` dialled.
    pub target: String,
    /// URI from the answer's `Contact`, the request target for ACK and BYE.
    pub remote_contact: Option<String>,
    pub remote_media: Option<RemoteMedia>,
    started: Instant,
    state: CallState,
}

impl CallTransaction {
    pub fn new(call_id: String, local_tag: String, branch: String, target: String, now: Instant) -> Self {
        Self {
            call_id,
            local_tag,
            remote_tag: None,
            cseq: 1,
            branch,
            target,
            remote_contact: None,
            remote_media: None,
            started: now,
            state: CallState::Inviting { authenticated: false },
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// Feed one event and return what the client must do.
    pub fn apply(&mut self, event: CallEvent, now: Instant) -> Vec<CallAction> {
        let (next, actions) = transition(self.state, event, now);
        if next != self.state {
            tracing::debug!(call_id = %self.call_id, from = ?self.state, to = ?next, ?event, "call state");
        }
        self.state = next;
        actions
    }

    /// The timer event due at `now`, if any.
    pub fn due_timer(&self, now: Instant, timers: &SipTimers) -> Option<CallEvent> {
        let elapsed = |since: Instant| now.saturating_duration_since(since);
        match self.state {
            CallState::Inviting { .. } | CallState::Proceeding { .. }
                if elapsed(self.started) >= timers.ring_window =>
            {
                Some(CallEvent::RingTimeout)
            }
            CallState::InCall { since } if elapsed(since) > timers.hold_window => Some(CallEvent::HoldExpired),
            CallState::Cancelling { since } if elapsed(since) > timers.cancel_wait => {
                Some(CallEvent::CancelTimeout)
            }
            _ => None,
        }
    }

    /// Request URI for ACK and BYE: the remote contact, else the dialled target.
    pub fn dialog_uri(&self) -> String {
        self.remote_contact
            .clone()
            .unwrap_or_else(|| format!("sip:{}", self.target))
    }

    pub fn ring_elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(now: Instant) -> CallTransaction {
        CallTransaction::new("c".into(), "t".into(), "z9hG4bK-1".into(), "**11@fritz.box".into(), now)
    }

    #[test]
    fn answered_call_runs_to_bye() {
        let t0 = Instant::now();
        let mut call = call(t0);
        assert!(call.apply(CallEvent::Provisional, t0).is_empty());
        assert_eq!(call.apply(CallEvent::Success, t0), vec![CallAction::AckAnswer]);
        assert_eq!(call.state(), CallState::Answered);
        assert_eq!(call.apply(CallEvent::AckSent, t0), vec![CallAction::StartMedia]);
        assert_eq!(call.state(), CallState::InCall { since: t0 });

        let timers = SipTimers::default();
        assert_eq!(call.due_timer(t0 + Duration::from_secs(59), &timers), None);
        let late = t0 + Duration::from_secs(61);
        assert_eq!(call.due_timer(late, &timers), Some(CallEvent::HoldExpired));
        assert_eq!(call.apply(CallEvent::HoldExpired, late), vec![CallAction::Bye]);
        assert_eq!(call.state(), CallState::Terminated(CallOutcome::Completed));
    }

    #[test]
    fn challenge_is_retried_once() {
        let t0 = Instant::now();
        let mut call = call(t0);
        let challenge = CallEvent::Challenge { code: 407, valid: true };
        assert_eq!(
            call.apply(challenge, t0),
            vec![CallAction::AckFinal, CallAction::ReinviteWithAuth]
        );
        assert_eq!(call.state(), CallState::Inviting { authenticated: true });

        call.apply(CallEvent::Provisional, t0);
        assert_eq!(call.apply(challenge, t0), vec![CallAction::AckFinal]);
        assert_eq!(call.state(), CallState::Terminated(CallOutcome::Rejected(407)));
    }

    #[test]
    fn unusable_challenge_fails() {
        let t0 = Instant::now();
        let mut call = call(t0);
        call.apply(CallEvent::Challenge { code: 401, valid: false }, t0);
        assert_eq!(call.state(), CallState::Terminated(CallOutcome::Failed));
    }

    #[test]
    fn ring_window_cancels_only_after_provisional() {
        let timers = SipTimers::default();
        let t0 = Instant::now();
        let late = t0 + Duration::from_secs(30);

        let mut silent = call(t0);
        assert_eq!(silent.due_timer(late, &timers), Some(CallEvent::RingTimeout));
        assert!(silent.apply(CallEvent::RingTimeout, late).is_empty());
        assert_eq!(silent.state(), CallState::Terminated(CallOutcome::Abandoned));

        let mut ringing = call(t0);
        ringing.apply(CallEvent::Provisional, t0);
        assert_eq!(ringing.apply(CallEvent::RingTimeout, late), vec![CallAction::Cancel]);
        assert_eq!(ringing.state(), CallState::Cancelling { since: late });

        assert_eq!(ringing.apply(CallEvent::Failure(487), late), vec![CallAction::AckFinal]);
        assert_eq!(ringing.state(), CallState::Terminated(CallOutcome::Cancelled));
    }

    #[test]
    fn cancel_wait_expires() {
        let timers = SipTimers::default();
        let t0 = Instant::now();
        let mut call = call(t0);
        call.apply(CallEvent::Provisional, t0);
        call.apply(CallEvent::RingTimeout, t0 + Duration::from_secs(30));
        assert_eq!(call.due_timer(t0 + Duration::from_secs(33), &timers), None);
        let late = t0 + Duration::from_millis(33_001);
        assert_eq!(call.due_timer(late, &timers), Some(CallEvent::CancelTimeout));
        call.apply(CallEvent::CancelTimeout, late);
        assert_eq!(call.state(), CallState::Terminated(CallOutcome::Cancelled));
    }

    #[test]
    fn answer_racing_cancel_is_hung_up() {
        let t0 = Instant::now();
        let mut call = call(t0);
        call.apply(CallEvent::Provisional, t0);
        call.apply(CallEvent::RingTimeout, t0);
        assert_eq!(
            call.apply(CallEvent::Success, t0),
            vec![CallAction::AckAnswer, CallAction::Bye]
        );
        assert_eq!(call.state(), CallState::Terminated(CallOutcome::Cancelled));
        assert!(call.apply(CallEvent::AckSent, t0).is_empty());
    }

    #[test]
    fn no_cancel_after_final_response() {
        let t0 = Instant::now();
        let states = [
            CallState::Answered,
            CallState::InCall { since: t0 },
            CallState::Cancelling { since: t0 },
            CallState::Terminated(CallOutcome::Rejected(486)),
            CallState::Terminated(CallOutcome::Completed),
        ];
        for state in states {
            for event in [CallEvent::RingTimeout, CallEvent::Provisional, CallEvent::CancelTimeout] {
                let (_, actions) = transition(state, event, t0);
                assert!(!actions.contains(&CallAction::Cancel), "{state:?} + {event:?}");
            }
        }
    }

    #[test]
    fn terminated_is_absorbing() {
        let t0 = Instant::now();
        let done = CallState::Terminated(CallOutcome::Completed);
        for event in [CallEvent::Success, CallEvent::SendFailed, CallEvent::RemoteHangup] {
            assert_eq!(transition(done, event, t0), (done, vec![]));
        }
    }

    #[test]
    fn remote_hangup_ends_call() {
        let t0 = Instant::now();
        let (state, actions) = transition(CallState::InCall { since: t0 }, CallEvent::RemoteHangup, t0);
        assert_eq!(state, CallState::Terminated(CallOutcome::Completed));
        assert!(actions.is_empty());

        let (state, _) = transition(CallState::Proceeding { authenticated: false }, CallEvent::RemoteHangup, t0);
        assert_eq!(state, CallState::Terminated(CallOutcome::Cancelled));
    }

    #[test]
    fn dialog_uri_prefers_contact() {
        let mut call = call(Instant::now());
        assert_eq!(call.dialog_uri(), "sip:**11@fritz.box");
        call.remote_contact = Some("sip:**11@192.168.1.1:5060".into());
        assert_eq!(call.dialog_uri(), "sip:**11@192.168.1.1:5060");
    }
}
