//! Virtual MIDI ports: a scripted performer, a push-driven queue input, and
//! a capturing output sink. These exercise the full engine with no hardware
//! attached: demo mode and the integration tests both run on them.

use crate::sequence::Sequence;
use crate::transport::{MidiInputPort, MidiOutputPort, TransportError};
use crate::types::{MidiMessage, SessionClock};
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use log::debug;
use std::collections::VecDeque;
use std::sync::Mutex;

// ─── Scripted input ─────────────────────────────────────────────────────────

/// Replays a fixed script of (µs offset, message) pairs against its own
/// session clock: each poll releases every message whose offset has passed.
/// Once the script is spent, polls report the port as closed so the capture
/// loop winds down on its own.
pub struct ScriptedInput {
    clock: SessionClock,
    script: VecDeque<(u64, MidiMessage)>,
    closed: bool,
}

impl ScriptedInput {
    pub fn new(mut script: Vec<(u64, MidiMessage)>) -> Self {
        script.sort_by_key(|(at, _)| *at);
        Self {
            clock: SessionClock::new(),
            script: script.into(),
            closed: false,
        }
    }
}

impl MidiInputPort for ScriptedInput {
    fn poll(&mut self) -> Result<Vec<MidiMessage>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.script.is_empty() {
            self.closed = true;
            return Err(TransportError::Closed);
        }
        let now = self.clock.now_us();
        let mut due = Vec::new();
        while self.script.front().is_some_and(|(at, _)| *at <= now) {
            due.push(self.script.pop_front().unwrap().1);
        }
        Ok(due)
    }

    fn close(&mut self) {
        self.closed = true;
        self.script.clear();
    }
}

/// Script a straight performance of a sequence's key pitches: one note-on
/// per segment every `ioi_ms`, released after `hold_ms`.
pub fn script_performance(
    sequence: &Sequence,
    ioi_ms: u64,
    hold_ms: u64,
    velocity: u8,
) -> Vec<(u64, MidiMessage)> {
    let mut script = Vec::with_capacity(sequence.len() * 2);
    for i in 0..sequence.len() {
        let pitch = sequence.get(i).map(|s| s.key.pitch).unwrap_or(60);
        let at = i as u64 * ioi_ms * 1000;
        script.push((
            at,
            MidiMessage::NoteOn { pitch, velocity, channel: 0 },
        ));
        script.push((
            at + hold_ms * 1000,
            MidiMessage::NoteOff { pitch, velocity: 0, channel: 0 },
        ));
    }
    script
}

// ─── Queue input ────────────────────────────────────────────────────────────

/// Push side of a [`QueueInput`]. Dropping every handle closes the port.
#[derive(Clone)]
pub struct QueueInputHandle {
    tx: Sender<MidiMessage>,
}

impl QueueInputHandle {
    pub fn push(&self, msg: MidiMessage) {
        let _ = self.tx.send(msg);
    }
}

/// An input port fed interactively by test code (or another thread).
pub struct QueueInput {
    rx: Receiver<MidiMessage>,
    closed: bool,
}

impl QueueInput {
    pub fn pair() -> (QueueInputHandle, QueueInput) {
        let (tx, rx) = unbounded();
        (QueueInputHandle { tx }, QueueInput { rx, closed: false })
    }
}

impl MidiInputPort for QueueInput {
    fn poll(&mut self) -> Result<Vec<MidiMessage>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let mut pending = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(msg) => pending.push(msg),
                Err(TryRecvError::Empty) => return Ok(pending),
                Err(TryRecvError::Disconnected) => {
                    return if pending.is_empty() {
                        Err(TransportError::Closed)
                    } else {
                        Ok(pending)
                    };
                }
            }
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

// ─── Capturing output ───────────────────────────────────────────────────────

/// Records everything sent to it, stamped with µs since creation. Share via
/// `Arc`: the engine drives it as a [`MidiOutputPort`], the test reads back
/// with [`MemoryOutput::sent`].
pub struct MemoryOutput {
    clock: SessionClock,
    sent: Mutex<Vec<(u64, MidiMessage)>>,
}

impl Default for MemoryOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryOutput {
    pub fn new() -> Self {
        Self {
            clock: SessionClock::new(),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Everything sent so far, in emission order.
    pub fn sent(&self) -> Vec<(u64, MidiMessage)> {
        self.sent.lock().unwrap().clone()
    }

    /// Just the messages, without timestamps.
    pub fn messages(&self) -> Vec<MidiMessage> {
        self.sent.lock().unwrap().iter().map(|(_, m)| m.clone()).collect()
    }
}

impl MidiOutputPort for MemoryOutput {
    fn send(&self, msg: &MidiMessage) {
        self.sent
            .lock()
            .unwrap()
            .push((self.clock.now_us(), msg.clone()));
    }

    fn close(&self) {
        debug!("memory output closed after {} messages", self.sent.lock().unwrap().len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{Pitch, Segment};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_scripted_input_releases_in_time_order() {
        let mut input = ScriptedInput::new(vec![
            (40_000, MidiMessage::NoteOff { pitch: 60, velocity: 0, channel: 0 }),
            (0, MidiMessage::NoteOn { pitch: 60, velocity: 100, channel: 0 }),
        ]);

        let first = input.poll().unwrap();
        assert_eq!(first.len(), 1);
        assert!(first[0].is_note_on());

        thread::sleep(Duration::from_millis(50));
        let second = input.poll().unwrap();
        assert_eq!(second.len(), 1);
        assert!(second[0].is_note_off());

        // Script exhausted → closed
        assert!(input.poll().is_err());
    }

    #[test]
    fn test_scripted_input_close() {
        let mut input = ScriptedInput::new(vec![(
            0,
            MidiMessage::NoteOn { pitch: 60, velocity: 1, channel: 0 },
        )]);
        input.close();
        assert!(input.poll().is_err());
    }

    #[test]
    fn test_script_performance_covers_all_keys() {
        let segments = vec![
            Segment::new(Pitch::new(60, 100, 0, 10, 0), vec![]),
            Segment::new(Pitch::new(64, 100, 100, 110, 0), vec![]),
        ];
        let seq = Sequence::new(segments, 480, 500_000);
        let script = script_performance(&seq, 500, 250, 90);
        assert_eq!(script.len(), 4);
        assert_eq!(
            script[0].1,
            MidiMessage::NoteOn { pitch: 60, velocity: 90, channel: 0 }
        );
        assert_eq!(script[1].0, 250_000);
        assert_eq!(
            script[2].1,
            MidiMessage::NoteOn { pitch: 64, velocity: 90, channel: 0 }
        );
        assert_eq!(script[2].0, 500_000);
    }

    #[test]
    fn test_queue_input_poll_and_disconnect() {
        let (handle, mut input) = QueueInput::pair();
        handle.push(MidiMessage::NoteOn { pitch: 60, velocity: 100, channel: 0 });
        handle.push(MidiMessage::NoteOff { pitch: 60, velocity: 0, channel: 0 });

        let polled = input.poll().unwrap();
        assert_eq!(polled.len(), 2);
        assert!(input.poll().unwrap().is_empty());

        drop(handle);
        assert!(input.poll().is_err(), "dropped handle closes the port");
    }

    #[test]
    fn test_memory_output_records_in_order() {
        let output = MemoryOutput::new();
        output.send(&MidiMessage::NoteOn { pitch: 60, velocity: 100, channel: 0 });
        output.send(&MidiMessage::NoteOff { pitch: 60, velocity: 0, channel: 0 });
        let sent = output.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].0 <= sent[1].0);
        assert!(sent[0].1.is_note_on());
    }
}
