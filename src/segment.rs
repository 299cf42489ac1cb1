use crate::types::{MidiMessage, TimedMessage};
use serde::{Deserialize, Serialize};

// ─── Pitch ──────────────────────────────────────────────────────────────────

/// One musical note event with linked onset and offset, in absolute ticks.
///
/// `offset >= onset` is NOT guaranteed in general: zero-length notes
/// (`offset == onset`) occur in real scores and must be tolerated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pitch {
    pub pitch: u8,
    pub velocity: u8,
    pub onset: u64,
    pub offset: u64,
    pub channel: u8,
    /// Opaque reference carried for offline alignment tooling; the
    /// real-time engine never reads it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment_id: Option<String>,
}

impl Pitch {
    pub fn new(pitch: u8, velocity: u8, onset: u64, offset: u64, channel: u8) -> Self {
        Self {
            pitch,
            velocity,
            onset,
            offset,
            channel,
            alignment_id: None,
        }
    }

    /// Note-on at the onset and note-off (velocity 0) at the offset.
    pub fn to_events(&self) -> [TimedMessage; 2] {
        [
            TimedMessage::new(
                self.onset,
                MidiMessage::NoteOn {
                    pitch: self.pitch,
                    velocity: self.velocity,
                    channel: self.channel,
                },
            ),
            TimedMessage::new(
                self.offset,
                MidiMessage::NoteOff {
                    pitch: self.pitch,
                    velocity: 0,
                    channel: self.channel,
                },
            ),
        ]
    }

    /// Shift this note `ticks` earlier. Extraction guarantees the onset is
    /// never earlier than the shift amount; the offset uses a saturating
    /// subtraction so zero-length artifacts cannot underflow.
    fn shift_earlier(&mut self, ticks: u64) {
        debug_assert!(self.onset >= ticks);
        self.onset = self.onset.saturating_sub(ticks);
        self.offset = self.offset.saturating_sub(ticks);
    }
}

// ─── Segment ────────────────────────────────────────────────────────────────

/// One key pitch plus its cluster of accompaniment pitches, re-expressed in
/// segment-local time (the key onset becomes 0, all body onsets/offsets stay
/// non-negative).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Sequence-absolute onset of the key, in ticks.
    pub onset: u64,
    pub key: Pitch,
    pub body: Vec<Pitch>,
}

impl Segment {
    /// Build from absolute-time pitches. Body onsets must be `>=` the key
    /// onset; extraction validates this before constructing.
    pub fn new(key: Pitch, body: Vec<Pitch>) -> Self {
        let onset = key.onset;
        let mut key = key;
        key.shift_earlier(onset);
        let mut body = body;
        for p in &mut body {
            p.shift_earlier(onset);
        }
        let mut segment = Self { onset, key, body };
        segment.sort_body();
        segment
    }

    /// Order the body by (onset, pitch) for deterministic rendering.
    pub fn sort_body(&mut self) {
        self.body.sort_by_key(|p| (p.onset, p.pitch));
    }

    /// Time-ordered events in segment-local absolute time (starting at 0).
    pub fn events_local(&self, include_key: bool) -> Vec<TimedMessage> {
        let mut events = Vec::with_capacity((self.body.len() + 1) * 2);
        if include_key {
            events.extend(self.key.to_events());
        }
        for p in &self.body {
            events.extend(p.to_events());
        }
        events.sort_by_key(|e| e.time);
        events
    }

    /// Same events with each time replaced by the delta from its predecessor.
    pub fn events_delta(&self, include_key: bool) -> Vec<TimedMessage> {
        let mut events = self.events_local(include_key);
        let mut prev = 0;
        for e in &mut events {
            let at = e.time;
            e.time -= prev;
            prev = at;
        }
        events
    }

    /// Events in sequence-absolute time (local time plus the key onset).
    pub fn events_absolute(&self, include_key: bool) -> Vec<TimedMessage> {
        let mut events = self.events_local(include_key);
        for e in &mut events {
            e.time += self.onset;
        }
        events
    }
}
