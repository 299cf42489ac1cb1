use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

// ─── MIDI-style messages ────────────────────────────────────────────────────

/// A normalized MIDI-style message: the interchange format between the
/// engine and its transports.
///
/// Wire semantics are preserved exactly: a note-on with velocity 0 on the
/// wire decodes as `NoteOff`, so downstream code can match on variants
/// without re-checking velocities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MidiMessage {
    NoteOn { pitch: u8, velocity: u8, channel: u8 },
    NoteOff { pitch: u8, velocity: u8, channel: u8 },
    ControlChange { controller: u8, value: u8, channel: u8 },
    ProgramChange { program: u8, channel: u8 },
    /// Anything the engine does not interpret; carried verbatim.
    Other(Vec<u8>),
}

impl MidiMessage {
    /// Decode a raw MIDI byte sequence. Returns `None` for empty input.
    pub fn from_bytes(bytes: &[u8]) -> Option<MidiMessage> {
        let status = *bytes.first()?;
        let channel = status & 0x0F;
        let msg = match status & 0xF0 {
            0x90 if bytes.len() >= 3 && bytes[2] > 0 => MidiMessage::NoteOn {
                pitch: bytes[1],
                velocity: bytes[2],
                channel,
            },
            // Note-on with velocity 0 is a note-off by convention.
            0x90 if bytes.len() >= 3 => MidiMessage::NoteOff {
                pitch: bytes[1],
                velocity: 0,
                channel,
            },
            0x80 if bytes.len() >= 3 => MidiMessage::NoteOff {
                pitch: bytes[1],
                velocity: bytes[2],
                channel,
            },
            0xB0 if bytes.len() >= 3 => MidiMessage::ControlChange {
                controller: bytes[1],
                value: bytes[2],
                channel,
            },
            0xC0 if bytes.len() >= 2 => MidiMessage::ProgramChange {
                program: bytes[1],
                channel,
            },
            _ => MidiMessage::Other(bytes.to_vec()),
        };
        Some(msg)
    }

    /// Encode back to raw MIDI bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            MidiMessage::NoteOn { pitch, velocity, channel } => {
                vec![0x90 | (channel & 0x0F), *pitch, *velocity]
            }
            MidiMessage::NoteOff { pitch, velocity, channel } => {
                vec![0x80 | (channel & 0x0F), *pitch, *velocity]
            }
            MidiMessage::ControlChange { controller, value, channel } => {
                vec![0xB0 | (channel & 0x0F), *controller, *value]
            }
            MidiMessage::ProgramChange { program, channel } => {
                vec![0xC0 | (channel & 0x0F), *program]
            }
            MidiMessage::Other(bytes) => bytes.clone(),
        }
    }

    pub fn is_note_on(&self) -> bool {
        matches!(self, MidiMessage::NoteOn { .. })
    }

    pub fn is_note_off(&self) -> bool {
        matches!(self, MidiMessage::NoteOff { .. })
    }

    /// Pitch number for note messages, `None` otherwise.
    pub fn pitch(&self) -> Option<u8> {
        match self {
            MidiMessage::NoteOn { pitch, .. } | MidiMessage::NoteOff { pitch, .. } => Some(*pitch),
            _ => None,
        }
    }

    pub fn velocity(&self) -> Option<u8> {
        match self {
            MidiMessage::NoteOn { velocity, .. } | MidiMessage::NoteOff { velocity, .. } => {
                Some(*velocity)
            }
            _ => None,
        }
    }

    /// Copy with the velocity replaced (note messages only; others unchanged).
    pub fn with_velocity(&self, velocity: u8) -> MidiMessage {
        match self {
            MidiMessage::NoteOn { pitch, channel, .. } => MidiMessage::NoteOn {
                pitch: *pitch,
                velocity,
                channel: *channel,
            },
            MidiMessage::NoteOff { pitch, channel, .. } => MidiMessage::NoteOff {
                pitch: *pitch,
                velocity,
                channel: *channel,
            },
            other => other.clone(),
        }
    }

    /// Copy with the channel replaced (`Other` payloads unchanged).
    pub fn with_channel(&self, channel: u8) -> MidiMessage {
        match self.clone() {
            MidiMessage::NoteOn { pitch, velocity, .. } => {
                MidiMessage::NoteOn { pitch, velocity, channel }
            }
            MidiMessage::NoteOff { pitch, velocity, .. } => {
                MidiMessage::NoteOff { pitch, velocity, channel }
            }
            MidiMessage::ControlChange { controller, value, .. } => {
                MidiMessage::ControlChange { controller, value, channel }
            }
            MidiMessage::ProgramChange { program, .. } => {
                MidiMessage::ProgramChange { program, channel }
            }
            other => other,
        }
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MidiMessage::NoteOn { pitch, velocity, channel } => {
                write!(f, "note-on  p={:<3} v={:<3} ch={}", pitch, velocity, channel)
            }
            MidiMessage::NoteOff { pitch, velocity, channel } => {
                write!(f, "note-off p={:<3} v={:<3} ch={}", pitch, velocity, channel)
            }
            MidiMessage::ControlChange { controller, value, channel } => {
                write!(f, "cc       n={:<3} v={:<3} ch={}", controller, value, channel)
            }
            MidiMessage::ProgramChange { program, channel } => {
                write!(f, "program  n={:<3} ch={}", program, channel)
            }
            MidiMessage::Other(bytes) => write!(f, "other    {:02X?}", bytes),
        }
    }
}

// ─── Timed messages ─────────────────────────────────────────────────────────

/// A message bound to a tick position. The meaning of `time` (segment-local,
/// delta, or sequence-absolute) depends on which renderer produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedMessage {
    pub time: u64,
    pub message: MidiMessage,
}

impl TimedMessage {
    pub fn new(time: u64, message: MidiMessage) -> Self {
        Self { time, message }
    }
}

// ─── Session clock ──────────────────────────────────────────────────────────

/// Monotonic clock for a capture session.
#[derive(Clone)]
pub struct SessionClock {
    start: Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_on_round_trip() {
        let msg = MidiMessage::from_bytes(&[0x91, 60, 100]).unwrap();
        assert_eq!(
            msg,
            MidiMessage::NoteOn { pitch: 60, velocity: 100, channel: 1 }
        );
        assert_eq!(msg.to_bytes(), vec![0x91, 60, 100]);
    }

    #[test]
    fn test_velocity_zero_note_on_is_note_off() {
        let msg = MidiMessage::from_bytes(&[0x90, 64, 0]).unwrap();
        assert_eq!(
            msg,
            MidiMessage::NoteOff { pitch: 64, velocity: 0, channel: 0 }
        );
        assert!(msg.is_note_off());
    }

    #[test]
    fn test_explicit_note_off_keeps_release_velocity() {
        let msg = MidiMessage::from_bytes(&[0x85, 72, 40]).unwrap();
        assert_eq!(
            msg,
            MidiMessage::NoteOff { pitch: 72, velocity: 40, channel: 5 }
        );
    }

    #[test]
    fn test_control_and_program_change() {
        let cc = MidiMessage::from_bytes(&[0xB0, 64, 127]).unwrap();
        assert_eq!(
            cc,
            MidiMessage::ControlChange { controller: 64, value: 127, channel: 0 }
        );
        let pc = MidiMessage::from_bytes(&[0xC2, 5]).unwrap();
        assert_eq!(pc, MidiMessage::ProgramChange { program: 5, channel: 2 });
        assert_eq!(pc.to_bytes(), vec![0xC2, 5]);
    }

    #[test]
    fn test_unknown_status_passes_through() {
        let raw = vec![0xF8];
        let msg = MidiMessage::from_bytes(&raw).unwrap();
        assert_eq!(msg, MidiMessage::Other(raw.clone()));
        assert_eq!(msg.to_bytes(), raw);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(MidiMessage::from_bytes(&[]), None);
    }

    #[test]
    fn test_with_velocity_and_channel() {
        let msg = MidiMessage::NoteOn { pitch: 60, velocity: 100, channel: 0 };
        let replaced = msg.with_velocity(64).with_channel(9);
        assert_eq!(
            replaced,
            MidiMessage::NoteOn { pitch: 60, velocity: 64, channel: 9 }
        );
        // Non-note messages keep their velocity untouched
        let cc = MidiMessage::ControlChange { controller: 1, value: 2, channel: 0 };
        assert_eq!(cc.with_velocity(99), cc);
    }

    #[test]
    fn test_session_clock_monotonic() {
        let clock = SessionClock::new();
        let a = clock.now_us();
        let b = clock.now_us();
        assert!(b >= a);
    }
}
