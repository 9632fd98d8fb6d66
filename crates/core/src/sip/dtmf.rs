//! RFC 4733 telephone-events and the door code matcher.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     event     |E|R| volume    |          duration             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Senders repeat the end packet of an event (typically three times) with
//! the same RTP timestamp; only the first one counts.

use std::collections::VecDeque;

/// Digit for an event code: 0–9, `*`, `#`, A–D.
pub fn event_digit(event: u8) -> Option<char> {
    match event {
        0..=9 => Some(char::from(b'0' + event)),
        10 => Some('*'),
        11 => Some('#'),
        12..=15 => Some(char::from(b'A' + event - 12)),
        _ => None,
    }
}

/// One telephone-event payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtmfEvent {
    pub event: u8,
    pub end: bool,
    pub volume: u8,
    pub duration: u16,
}

impl DtmfEvent {
    /// Decode the 4-byte RFC 4733 §2.3 payload. Trailing bytes are ignored.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let &[event, flags, d0, d1, ..] = payload else {
            return None;
        };
        Some(Self {
            event,
            end: flags & 0x80 != 0,
            volume: flags & 0x3F,
            duration: u16::from_be_bytes([d0, d1]),
        })
    }
}

/// Turns a stream of telephone-event packets into key presses.
#[derive(Debug, Default)]
pub struct DtmfReceiver {
    last_end_timestamp: Option<u32>,
}

impl DtmfReceiver {
    /// The digit completed by this packet, if it is the first end packet of
    /// its event.
    pub fn on_packet(&mut self, rtp_timestamp: u32, payload: &[u8]) -> Option<char> {
        let event = DtmfEvent::parse(payload)?;
        if !event.end || self.last_end_timestamp == Some(rtp_timestamp) {
            return None;
        }
        self.last_end_timestamp = Some(rtp_timestamp);
        event_digit(event.event)
    }
}

/// Matches the most recent digits against a fixed code.
///
/// Only the exact sequence fires; digits keyed before it do not matter,
/// so `"91234"` opens a door whose code is `"1234"`.
#[derive(Debug, Clone)]
pub struct DoorCode {
    code: Vec<char>,
    recent: VecDeque<char>,
}

impl DoorCode {
    /// `None` for an empty code.
    pub fn new(code: &str) -> Option<Self> {
        let code: Vec<char> = code.chars().filter(|c| !c.is_whitespace()).map(|c| c.to_ascii_uppercase()).collect();
        if code.is_empty() {
            return None;
        }
        Some(Self {
            recent: VecDeque::with_capacity(code.len()),
            code,
        })
    }

    /// Record a digit; `true` when it completes the code.
    pub fn push(&mut self, digit: char) -> bool {
        if self.recent.len() == self.code.len() {
            self.recent.pop_front();
        }
        self.recent.push_back(digit.to_ascii_uppercase());
        if self.recent.iter().eq(self.code.iter()) {
            self.recent.clear();
            return true;
        }
        false
    }

    pub fn reset(&mut self) {
        self.recent.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_table() {
        let digits: String = (0..=15).filter_map(event_digit).collect();
        assert_eq!(digits, "0123456789*#ABCD");
        assert_eq!(event_digit(16), None);
    }

    #[test]
    fn parse_end_flag() {
        let event = DtmfEvent::parse(&[5, 0x8A, 0x03, 0x20]).unwrap();
        assert_eq!(event.event, 5);
        assert!(event.end);
        assert_eq!(event.volume, 10);
        assert_eq!(event.duration, 800);
        assert!(DtmfEvent::parse(&[5, 0x80]).is_none());
    }

    #[test]
    fn repeated_end_packets_count_once() {
        let mut rx = DtmfReceiver::default();
        assert_eq!(rx.on_packet(1000, &[1, 0x0A, 0, 160]), None);
        assert_eq!(rx.on_packet(1000, &[1, 0x8A, 0, 240]), Some('1'));
        assert_eq!(rx.on_packet(1000, &[1, 0x8A, 0, 240]), None);
        assert_eq!(rx.on_packet(1000, &[1, 0x8A, 0, 240]), None);
        assert_eq!(rx.on_packet(2600, &[11, 0x8A, 0, 240]), Some('#'));
    }

    #[test]
    fn code_fires_on_exact_sequence() {
        let mut code = DoorCode::new("1234").unwrap();
        assert!(!"123".chars().any(|d| code.push(d)));
        assert!(code.push('4'));
        // Starts over after firing.
        assert!(!code.push('4'));
    }

    #[test]
    fn code_ignores_partial_and_reordered_input() {
        let mut code = DoorCode::new("1234").unwrap();
        assert!(!"2134".chars().any(|d| code.push(d)));
        assert!(!"1243".chars().any(|d| code.push(d)));
        assert!(!"12".chars().any(|d| code.push(d)));
    }

    #[test]
    fn code_matches_after_leading_noise() {
        let mut code = DoorCode::new("112").unwrap();
        let fired: Vec<bool> = "1112".chars().map(|d| code.push(d)).collect();
        assert_eq!(fired, [false, false, false, true]);
    }

    #[test]
    fn star_and_letters() {
        let mut code = DoorCode::new("*a").unwrap();
        assert!(!code.push('*'));
        assert!(code.push('A'));
        assert!(DoorCode::new("  ").is_none());
    }
}
