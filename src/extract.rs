//! Segment extraction: turns a dual-track symbolic score (melody +
//! accompaniment) into a [`Sequence`] of conductor-triggered segments.
//!
//! The score walk links each note-on to its matching note-off per
//! (pitch, channel), then buckets accompaniment notes between consecutive
//! melody onsets. Bucket boundaries are strict: a note exactly on the next
//! melody onset belongs to the next bucket.

use crate::segment::{Pitch, Segment};
use crate::sequence::Sequence;
use crate::timing;
use log::warn;
use midly::{MetaMessage, MidiMessage as SmfMessage, Smf, TrackEvent, TrackEventKind};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("score must have 2 or 3 tracks, found {0}")]
    TrackCount(usize),
    #[error("accompaniment bucket count {buckets} does not match melody note count {melody}")]
    BucketMismatch { buckets: usize, melody: usize },
    #[error("accompaniment note at tick {onset} precedes its key at tick {key_onset}")]
    MisalignedBody { onset: u64, key_onset: u64 },
    #[error("failed to read score file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed MIDI file: {0}")]
    Midi(#[from] midly::Error),
}

// ─── Track scan ─────────────────────────────────────────────────────────────

/// Link note-ons to note-offs across one track, producing absolute-time
/// pitches, and collect any tempo events found along the way.
///
/// A pitch re-triggered before its note-off closes the prior note at the new
/// onset time (last writer wins on the active slot). Notes still open at
/// end-of-track close at the track's final absolute time.
pub fn scan_track(track: &[TrackEvent]) -> (Vec<Pitch>, Vec<u32>) {
    let mut notes = Vec::new();
    let mut tempos = Vec::new();
    let mut active: HashMap<(u8, u8), (u64, u8)> = HashMap::new();
    let mut at: u64 = 0;

    for ev in track {
        at += ev.delta.as_int() as u64;
        match ev.kind {
            TrackEventKind::Meta(MetaMessage::Tempo(t)) => tempos.push(t.as_int()),
            TrackEventKind::Midi { channel, message } => {
                let ch = channel.as_int();
                match message {
                    SmfMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                        let slot = (key.as_int(), ch);
                        if let Some((onset, _)) = active.remove(&slot) {
                            // Overlapping re-trigger: the prior note ends here.
                            notes.push(Pitch::new(key.as_int(), vel.as_int(), onset, at, ch));
                        }
                        active.insert(slot, (at, vel.as_int()));
                    }
                    SmfMessage::NoteOn { key, .. } | SmfMessage::NoteOff { key, .. } => {
                        let slot = (key.as_int(), ch);
                        if let Some((onset, vel)) = active.remove(&slot) {
                            notes.push(Pitch::new(key.as_int(), vel, onset, at, ch));
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    for ((pitch, channel), (onset, velocity)) in active {
        notes.push(Pitch::new(pitch, velocity, onset, at, channel));
    }
    (notes, tempos)
}

// ─── Bucket partition ───────────────────────────────────────────────────────

/// Partition sorted accompaniment pitches against sorted melody onsets and
/// assemble the sequence. Bucket `i` takes every accompaniment pitch with
/// onset strictly below melody onset `i+1`; the final bucket absorbs the
/// remainder.
pub fn build_sequence(
    mut melody: Vec<Pitch>,
    mut accompaniment: Vec<Pitch>,
    ticks_per_beat: u16,
    tempo: u32,
) -> Result<Sequence, ExtractionError> {
    melody.sort_by_key(|p| (p.onset, p.pitch));
    accompaniment.sort_by_key(|p| (p.onset, p.pitch));

    if melody.is_empty() {
        if accompaniment.is_empty() {
            return Ok(Sequence::new(vec![], ticks_per_beat, tempo));
        }
        // Accompaniment with nothing to trigger it is malformed input.
        return Err(ExtractionError::BucketMismatch { buckets: 1, melody: 0 });
    }

    let mut buckets: Vec<Vec<Pitch>> = Vec::with_capacity(melody.len());
    let mut rest = accompaniment.into_iter().peekable();
    for i in 0..melody.len() {
        let mut bucket = Vec::new();
        if let Some(next_key) = melody.get(i + 1) {
            let boundary = next_key.onset;
            while rest.peek().map_or(false, |p| p.onset < boundary) {
                bucket.push(rest.next().unwrap());
            }
        } else {
            bucket.extend(rest.by_ref());
        }
        buckets.push(bucket);
    }

    if buckets.len() != melody.len() {
        return Err(ExtractionError::BucketMismatch {
            buckets: buckets.len(),
            melody: melody.len(),
        });
    }

    let mut segments = Vec::with_capacity(melody.len());
    for (key, bucket) in melody.into_iter().zip(buckets) {
        // Sorted bucket: the first entry is its earliest onset.
        if let Some(first) = bucket.first() {
            if first.onset < key.onset {
                return Err(ExtractionError::MisalignedBody {
                    onset: first.onset,
                    key_onset: key.onset,
                });
            }
        }
        segments.push(Segment::new(key, bucket));
    }
    Ok(Sequence::new(segments, ticks_per_beat, tempo))
}

// ─── SMF front end ──────────────────────────────────────────────────────────

/// Extract a sequence from a parsed standard MIDI file.
///
/// Accepted layouts: two tracks (melody, accompaniment) or three tracks
/// (tempo map, melody, accompaniment). More than one tempo event is reported
/// and the first wins; a score with none falls back to 120 BPM.
pub fn sequence_from_smf(smf: &Smf) -> Result<Sequence, ExtractionError> {
    if smf.tracks.len() != 2 && smf.tracks.len() != 3 {
        return Err(ExtractionError::TrackCount(smf.tracks.len()));
    }

    let ticks_per_beat = match smf.header.timing {
        midly::Timing::Metrical(t) => t.as_int(),
        _ => {
            warn!(
                "score uses non-metrical timing; assuming {} ticks per beat",
                timing::DEFAULT_TICKS_PER_BEAT
            );
            timing::DEFAULT_TICKS_PER_BEAT
        }
    };

    let mut track_notes = Vec::with_capacity(smf.tracks.len());
    let mut tempos = Vec::new();
    for track in &smf.tracks {
        let (notes, track_tempos) = scan_track(track);
        track_notes.push(notes);
        tempos.extend(track_tempos);
    }

    if tempos.len() > 1 {
        warn!("{} tempo changes found; using the first", tempos.len());
    }
    let tempo = match tempos.first() {
        Some(&t) => t,
        None => {
            warn!(
                "score has no tempo event; assuming {} µs per beat",
                timing::DEFAULT_TEMPO
            );
            timing::DEFAULT_TEMPO
        }
    };

    let (melody, accompaniment) = if smf.tracks.len() == 3 {
        (track_notes.swap_remove(1), track_notes.swap_remove(1))
    } else {
        let acc = track_notes.swap_remove(1);
        (track_notes.swap_remove(0), acc)
    };

    build_sequence(melody, accompaniment, ticks_per_beat, tempo)
}

/// Load and extract a sequence from a standard MIDI file on disk.
pub fn sequence_from_midi_file(path: &Path) -> Result<Sequence, ExtractionError> {
    let bytes = std::fs::read(path)?;
    let smf = Smf::parse(&bytes)?;
    sequence_from_smf(&smf)
}
