//! Performance-session persistence.
//!
//! On shutdown the engine can serialize the full capture history plus the
//! parameters needed to interpret it. Artifacts are pretty JSON written to a
//! uniquely-named file in the configured directory (`session.json`,
//! `session_1.json`, … when earlier artifacts exist). A saved session can
//! later seed an adaptive tempo follower as a rehearsal template.

use crate::history::HistoryEntry;
use crate::timing;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub ticks_per_beat: u16,
    /// Tempo in µs per beat.
    pub tempo: u32,
    pub speed_interpolator: String,
    pub velocity_interpolator: String,
    pub channel: u8,
    /// Seconds since the UNIX epoch when capture started.
    pub start_time: f64,
    pub events: Vec<HistoryEntry>,
}

impl SessionRecord {
    /// Write the record into `dir`, never clobbering an earlier artifact.
    /// Returns the path actually written.
    pub fn save(&self, dir: &Path) -> io::Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = unique_artifact_path(dir);
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(&path, json)?;
        info!("performance history saved to {:?}", path);
        Ok(path)
    }

    pub fn load(path: &Path) -> io::Result<SessionRecord> {
        let json = fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Derive an observed-bpm-ratio template from the recorded note-on
    /// triggers: score IOI (from the bound segments' onsets) over observed
    /// IOI (from wall-clock gaps), one entry per trigger, sentinel first.
    pub fn tempo_template(&self) -> Vec<f64> {
        let triggers: Vec<(f64, u64)> = self
            .events
            .iter()
            .filter(|e| e.input.is_note_on())
            .filter_map(|e| e.segment.as_ref().map(|s| (e.wall_time, s.onset)))
            .collect();
        if triggers.is_empty() {
            return vec![];
        }

        let mut template = Vec::with_capacity(triggers.len());
        template.push(1.0);
        for pair in triggers.windows(2) {
            let (prev_time, prev_onset) = pair[0];
            let (curr_time, curr_onset) = pair[1];
            let score_ioi = curr_onset.saturating_sub(prev_onset).max(1) as f64;
            let observed_ticks =
                timing::seconds_to_ticks(curr_time - prev_time, self.tempo, self.ticks_per_beat)
                    .max(1) as f64;
            template.push(score_ioi / observed_ticks);
        }
        template
    }
}

fn unique_artifact_path(dir: &Path) -> PathBuf {
    let base = dir.join("session.json");
    if !base.exists() {
        return base;
    }
    let mut n = 1;
    loop {
        let candidate = dir.join(format!("session_{}.json", n));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}
