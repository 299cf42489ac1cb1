use crate::segment::Segment;
use crate::types::MidiMessage;
use log::warn;
use std::collections::HashMap;

/// Live bookkeeping between touch input and triggered segments.
///
/// Two maps, both keyed by pitch number (never by channel):
/// - `triggered`: input pitch → the segment it fired. A `None` value marks a
///   binding voided by an overlapping re-trigger, so the eventual note-off
///   for that pitch resolves silently instead of warning.
/// - `live`: key pitch → the most recent live note-on, used to detect and
///   terminate a re-trigger of a still-sounding key.
///
/// Every insertion is paired with a removal on the matching note-off (or on
/// a forced re-trigger termination); nothing leaks across a performance.
#[derive(Default)]
pub struct SegmentBinder {
    triggered: HashMap<u8, Option<Segment>>,
    live: HashMap<u8, MidiMessage>,
}

impl SegmentBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the segment fired by a note-on at `input_pitch`.
    pub fn bind_segment(&mut self, input_pitch: u8, segment: Segment) {
        self.triggered.insert(input_pitch, Some(segment));
    }

    /// Mark the binding for `input_pitch` as superseded: its note-off will
    /// be a silent no-op.
    pub fn void_binding(&mut self, input_pitch: u8) {
        self.triggered.insert(input_pitch, None);
    }

    /// Pop and return the segment bound to `input_pitch`.
    ///
    /// `None` either because the binding was voided by a re-trigger
    /// (silent) or because the pitch was never bound (stray note-off,
    /// logged).
    pub fn resolve_note_off(&mut self, input_pitch: u8) -> Option<Segment> {
        match self.triggered.remove(&input_pitch) {
            Some(binding) => binding,
            None => {
                warn!("no segment bound for pitch {}", input_pitch);
                None
            }
        }
    }

    /// Record the latest live note-on for a key pitch (overwrites).
    pub fn set_live_note(&mut self, key_pitch: u8, note_on: MidiMessage) {
        self.live.insert(key_pitch, note_on);
    }

    pub fn has_live_note(&self, key_pitch: u8) -> bool {
        self.live.contains_key(&key_pitch)
    }

    pub fn live_note(&self, key_pitch: u8) -> Option<&MidiMessage> {
        self.live.get(&key_pitch)
    }

    pub fn clear_live_note(&mut self, key_pitch: u8) {
        self.live.remove(&key_pitch);
    }

    /// True when no key pitch is sounding.
    pub fn is_idle(&self) -> bool {
        self.live.is_empty()
    }

    pub fn binding_count(&self) -> usize {
        self.triggered.len()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}
