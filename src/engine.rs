//! The real-time conductor engine.
//!
//! Three threads cooperate once capture starts: the **capture thread** polls
//! the input port and owns every piece of musical state (sequence cursor,
//! binder, interpolators, IOI clock); the **dispatch thread** drains the
//! scheduler and only emits output; the periodic **history cleanup** runs as
//! a self-rescheduling task on the same scheduler. Output sends come from
//! both the capture thread (immediate key echo) and the dispatch thread
//! (scheduled body), which the output-port contract allows.

use crate::binder::SegmentBinder;
use crate::history::{HistoryEntry, PerformanceHistory};
use crate::interpolator::{
    DecayingAverageVelocity, FixedSpeed, SpeedInterpolator, VelocityInterpolator,
};
use crate::scheduler::DispatchScheduler;
use crate::sequence::{Sequence, FIRST_IOI_PLACEHOLDER};
use crate::session::SessionRecord;
use crate::transport::{MidiInputPort, MidiOutputPort};
use crate::types::{MidiMessage, TimedMessage};
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Engine lifecycle. One-way: `Idle → Capturing → Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Capturing,
    Stopped,
}

/// Work items drained by the dispatch thread.
enum DispatchTask {
    Emit(MidiMessage),
    PruneHistory,
}

const CAPTURE_POLL: Duration = Duration::from_micros(200);
const DISPATCH_POLL: Duration = Duration::from_millis(2);
const CAPTURE_JOIN_TIMEOUT: Duration = Duration::from_secs(2);
const DISPATCH_JOIN_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_HISTORY_CAPACITY: usize = 1500;
const DEFAULT_CLEAN_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_RETENTION: Duration = Duration::from_secs(5);

// ─── Capture-side state ─────────────────────────────────────────────────────

/// Everything the capture thread owns exclusively. No locks: this state is
/// single-writer by construction.
struct CaptureState {
    sequence: Sequence,
    binder: SegmentBinder,
    speed: Box<dyn SpeedInterpolator>,
    velocity: Box<dyn VelocityInterpolator>,
    channel: u8,
    prev_note_on: Option<Instant>,
    completed: Arc<AtomicBool>,
}

impl CaptureState {
    fn on_message(
        &mut self,
        msg: MidiMessage,
        output: &Arc<dyn MidiOutputPort>,
        scheduler: &DispatchScheduler<DispatchTask>,
        history: &PerformanceHistory,
    ) {
        match msg {
            MidiMessage::NoteOn { pitch, velocity, .. } => {
                self.on_note_on(pitch, velocity, msg, output, scheduler, history);
            }
            MidiMessage::NoteOff { pitch, velocity, .. } => {
                self.on_note_off(pitch, velocity, msg, output, history);
            }
            other => {
                // Not ours to interpret; forward untouched.
                debug!("passing through: {}", other);
                output.send(&other);
                history.record(HistoryEntry::now(other, None, vec![]));
            }
        }
    }

    fn on_note_on(
        &mut self,
        input_pitch: u8,
        input_velocity: u8,
        msg: MidiMessage,
        output: &Arc<dyn MidiOutputPort>,
        scheduler: &DispatchScheduler<DispatchTask>,
        history: &PerformanceHistory,
    ) {
        if self.sequence.is_empty() {
            warn!("empty sequence; load a score before performing");
            return;
        }
        let segment = match self.sequence.advance() {
            Some(segment) => segment.clone(),
            None => {
                debug!("note-on after the sequence was exhausted");
                return;
            }
        };
        self.binder.bind_segment(input_pitch, segment.clone());

        // Only one note-on may be live per key pitch: a re-trigger while the
        // key still sounds terminates the previous one first.
        let key_pitch = segment.key.pitch;
        if let Some(previous) = self.binder.live_note(key_pitch).cloned() {
            if previous.pitch() != Some(input_pitch) {
                // The earlier trigger came from a different input pitch;
                // its note-off must now resolve to nothing.
                if let Some(stale_pitch) = previous.pitch() {
                    self.binder.void_binding(stale_pitch);
                }
            }
            output.send(&MidiMessage::NoteOff {
                pitch: key_pitch,
                velocity: input_velocity,
                channel: self.channel,
            });
        }

        self.binder.set_live_note(key_pitch, msg.clone());

        // The audible, felt response: echo the key at the performer's
        // velocity with zero scheduling delay.
        output.send(&MidiMessage::NoteOn {
            pitch: key_pitch,
            velocity: input_velocity,
            channel: self.channel,
        });

        let now = Instant::now();
        let observed_ioi = match self.prev_note_on {
            Some(prev) => self
                .sequence
                .seconds_to_ticks(now.duration_since(prev).as_secs_f64()),
            None => FIRST_IOI_PLACEHOLDER,
        };
        let speed_scale = self.speed.interpolate(observed_ioi);
        let target_velocity = self.velocity.interpolate(input_velocity);
        debug!(
            "ioi={} ticks, scale={:.3}, velocity={}",
            observed_ioi, speed_scale, target_velocity
        );

        let mut scheduled = Vec::new();
        for event in segment.events_local(false) {
            let message = event
                .message
                .with_velocity(target_velocity)
                .with_channel(self.channel);
            let delay = self.sequence.ticks_to_seconds(event.time) * speed_scale;
            scheduler.schedule_in(
                Duration::from_secs_f64(delay.max(0.0)),
                DispatchTask::Emit(message.clone()),
            );
            scheduled.push(TimedMessage::new(event.time, message));
        }

        history.record(HistoryEntry::now(msg, Some(segment), scheduled));
        self.prev_note_on = Some(now);
    }

    fn on_note_off(
        &mut self,
        input_pitch: u8,
        input_velocity: u8,
        msg: MidiMessage,
        output: &Arc<dyn MidiOutputPort>,
        history: &PerformanceHistory,
    ) {
        history.record(HistoryEntry::now(msg, None, vec![]));
        let segment = match self.binder.resolve_note_off(input_pitch) {
            Some(segment) => segment,
            // Superseded by a re-trigger or never bound: nothing to release.
            None => return,
        };
        output.send(&MidiMessage::NoteOff {
            pitch: segment.key.pitch,
            velocity: input_velocity,
            channel: self.channel,
        });
        self.binder.clear_live_note(segment.key.pitch);

        if self.binder.is_idle() && self.sequence.is_exhausted() {
            if !self.completed.swap(true, Ordering::SeqCst) {
                info!("Performance complete. Bravo!");
            }
        }
    }
}

fn run_capture(
    mut state: CaptureState,
    input: Arc<Mutex<Box<dyn MidiInputPort>>>,
    output: Arc<dyn MidiOutputPort>,
    scheduler: DispatchScheduler<DispatchTask>,
    history: PerformanceHistory,
    running: Arc<AtomicBool>,
) {
    info!("Capture running. Press a MIDI key to continue...");
    while running.load(Ordering::SeqCst) {
        let pending = {
            let mut port = input.lock().unwrap();
            port.poll()
        };
        match pending {
            Ok(messages) => {
                for msg in messages {
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    debug!("received input: {}", msg);
                    state.on_message(msg, &output, &scheduler, &history);
                }
            }
            Err(e) => {
                // Port closed mid-read: a shutdown signal, not a crash.
                debug!("input port ended capture: {}", e);
                break;
            }
        }
        thread::sleep(CAPTURE_POLL);
    }
    debug!("capture thread exiting");
}

// ─── Conductor ──────────────────────────────────────────────────────────────

/// The conductor system: binds live input to pre-composed segments and
/// schedules their playback with interpolated tempo and dynamics.
pub struct Conductor {
    input: Arc<Mutex<Box<dyn MidiInputPort>>>,
    output: Arc<dyn MidiOutputPort>,
    scheduler: DispatchScheduler<DispatchTask>,
    history: PerformanceHistory,
    running: Arc<AtomicBool>,
    completed: Arc<AtomicBool>,
    state: EngineState,
    capture: Option<CaptureState>,
    capture_handle: Option<JoinHandle<()>>,
    dispatch_handle: Option<JoinHandle<()>>,
    session_dir: Option<PathBuf>,
    channel: u8,
    clean_interval: Duration,
    retention: Duration,
    history_capacity: usize,
    start_time: f64,
    // Interpolator descriptions survive here after the strategies move into
    // the capture thread; the session artifact needs them at shutdown.
    speed_description: String,
    velocity_description: String,
    tempo: u32,
    ticks_per_beat: u16,
}

impl Conductor {
    pub fn new(input: Box<dyn MidiInputPort>, output: Arc<dyn MidiOutputPort>) -> Self {
        let completed = Arc::new(AtomicBool::new(false));
        let speed: Box<dyn SpeedInterpolator> = Box::new(FixedSpeed);
        let velocity: Box<dyn VelocityInterpolator> = Box::new(DecayingAverageVelocity::default());
        let sequence = Sequence::empty();
        let (tempo, ticks_per_beat) = (sequence.tempo, sequence.ticks_per_beat);
        Self {
            input: Arc::new(Mutex::new(input)),
            output,
            scheduler: DispatchScheduler::new(),
            history: PerformanceHistory::bounded(DEFAULT_HISTORY_CAPACITY),
            running: Arc::new(AtomicBool::new(false)),
            completed: completed.clone(),
            state: EngineState::Idle,
            speed_description: speed.describe(),
            velocity_description: velocity.describe(),
            capture: Some(CaptureState {
                sequence,
                binder: SegmentBinder::new(),
                speed,
                velocity,
                channel: 0,
                prev_note_on: None,
                completed,
            }),
            capture_handle: None,
            dispatch_handle: None,
            session_dir: None,
            channel: 0,
            clean_interval: DEFAULT_CLEAN_INTERVAL,
            retention: DEFAULT_RETENTION,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            start_time: 0.0,
            tempo,
            ticks_per_beat,
        }
    }

    pub fn with_speed_interpolator(mut self, speed: Box<dyn SpeedInterpolator>) -> Self {
        self.speed_description = speed.describe();
        if let Some(capture) = &mut self.capture {
            capture.speed = speed;
            let iois = capture.sequence.score_iois();
            capture.speed.load_score(iois);
        }
        self
    }

    pub fn with_velocity_interpolator(mut self, velocity: Box<dyn VelocityInterpolator>) -> Self {
        self.velocity_description = velocity.describe();
        if let Some(capture) = &mut self.capture {
            capture.velocity = velocity;
        }
        self
    }

    /// MIDI channel stamped on every emitted event.
    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        if let Some(capture) = &mut self.capture {
            capture.channel = channel;
        }
        self
    }

    /// Persist the full session into this directory on `stop`. Disables
    /// history pruning so nothing is lost.
    pub fn with_session_dir(mut self, dir: PathBuf) -> Self {
        self.session_dir = Some(dir);
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn with_clean_interval(mut self, interval: Duration) -> Self {
        self.clean_interval = interval;
        self
    }

    /// Install the sequence to perform. Must be called before `start`;
    /// also feeds the score IOIs to the speed interpolator.
    pub fn load_score(&mut self, sequence: Sequence) {
        self.tempo = sequence.tempo;
        self.ticks_per_beat = sequence.ticks_per_beat;
        if let Some(capture) = &mut self.capture {
            capture.speed.load_score(sequence.score_iois());
            capture.sequence = sequence;
        } else {
            warn!("cannot load a score after capture started");
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// True once every segment was consumed and every key released.
    pub fn performance_complete(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// Shared handle onto the capture history (mainly for inspection).
    pub fn history(&self) -> PerformanceHistory {
        self.history.clone()
    }

    /// Spawn the capture and dispatch threads and begin listening.
    pub fn start(&mut self) {
        match self.state {
            EngineState::Idle => {}
            EngineState::Capturing => {
                warn!("conductor is already capturing");
                return;
            }
            EngineState::Stopped => {
                warn!("conductor is stopped; create a new engine to capture again");
                return;
            }
        }
        let capture_state = match self.capture.take() {
            Some(state) => state,
            None => {
                warn!("capture state missing; cannot start");
                return;
            }
        };

        self.history = if self.session_dir.is_some() {
            PerformanceHistory::unbounded()
        } else {
            PerformanceHistory::bounded(self.history_capacity)
        };
        self.running.store(true, Ordering::SeqCst);
        self.start_time = crate::history::epoch_seconds();

        // Dispatch thread: emits scheduled body events and keeps the
        // history-pruning task rescheduling itself.
        let output = self.output.clone();
        let history = self.history.clone();
        let scheduler = self.scheduler.clone();
        let retention = self.retention;
        let clean_interval = self.clean_interval;
        self.dispatch_handle = Some(self.scheduler.spawn_drain(DISPATCH_POLL, move |task| {
            match task {
                DispatchTask::Emit(msg) => output.send(&msg),
                DispatchTask::PruneHistory => {
                    let removed = history.prune_older_than(retention);
                    if removed > 0 {
                        debug!("pruned {} history entries", removed);
                    }
                    scheduler.schedule_in(clean_interval, DispatchTask::PruneHistory);
                }
            }
        }));
        if self.session_dir.is_none() {
            self.scheduler
                .schedule_in(self.clean_interval, DispatchTask::PruneHistory);
        }

        let input = self.input.clone();
        let output = self.output.clone();
        let scheduler = self.scheduler.clone();
        let history = self.history.clone();
        let running = self.running.clone();
        self.capture_handle = Some(
            thread::Builder::new()
                .name("capture".into())
                .spawn(move || {
                    run_capture(capture_state, input, output, scheduler, history, running);
                })
                .expect("spawn capture thread"),
        );

        self.state = EngineState::Capturing;
        info!("Conductor started");
    }

    /// Shut everything down in order. Idempotent; a second call is a no-op.
    /// Scheduled-but-unfired dispatch entries are dropped, not flushed.
    pub fn stop(&mut self) {
        if self.state == EngineState::Stopped {
            return;
        }
        info!("Stopping conductor...");
        self.running.store(false, Ordering::SeqCst);

        // Close the input first so a pending poll cannot strand the
        // capture thread.
        {
            let mut port = self.input.lock().unwrap();
            port.close();
        }
        if let Some(handle) = self.capture_handle.take() {
            join_with_timeout(handle, CAPTURE_JOIN_TIMEOUT, "capture");
        }

        let dropped = self.scheduler.pending();
        self.scheduler.stop();
        if let Some(handle) = self.dispatch_handle.take() {
            join_with_timeout(handle, DISPATCH_JOIN_TIMEOUT, "dispatch");
        }
        if dropped > 0 {
            debug!("{} scheduled events dropped at shutdown", dropped);
        }

        self.output.close();

        if let Some(dir) = self.session_dir.clone() {
            let record = SessionRecord {
                ticks_per_beat: self.ticks_per_beat,
                tempo: self.tempo,
                speed_interpolator: self.speed_description.clone(),
                velocity_interpolator: self.velocity_description.clone(),
                channel: self.channel,
                start_time: self.start_time,
                events: self.history.snapshot(),
            };
            if let Err(e) = record.save(&dir) {
                error!("failed to save session to {:?}: {}", dir, e);
            }
        }

        self.state = EngineState::Stopped;
        info!("Conductor stopped");
    }
}

/// Wait for a thread with a deadline; a thread that will not die is logged
/// and left behind rather than hanging shutdown.
fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration, name: &str) {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!("{} thread did not stop within {:?}", name, timeout);
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    let _ = handle.join();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{Pitch, Segment};
    use crate::virtual_midi::{MemoryOutput, QueueInput};

    fn two_segment_sequence() -> Sequence {
        // Keys at ticks 0 and 120, one body note each 10 ticks after its key
        let segments = vec![
            Segment::new(
                Pitch::new(60, 100, 0, 40, 0),
                vec![Pitch::new(48, 70, 10, 30, 0)],
            ),
            Segment::new(
                Pitch::new(64, 100, 120, 160, 0),
                vec![Pitch::new(52, 70, 130, 150, 0)],
            ),
        ];
        Sequence::new(segments, 120, 250_000)
    }

    fn note_on(pitch: u8, velocity: u8) -> MidiMessage {
        MidiMessage::NoteOn { pitch, velocity, channel: 0 }
    }

    fn note_off(pitch: u8) -> MidiMessage {
        MidiMessage::NoteOff { pitch, velocity: 0, channel: 0 }
    }

    fn wait_until(deadline_ms: u64, mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_millis(deadline_ms);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_lifecycle_is_one_way_and_stop_idempotent() {
        let (_handle, input) = QueueInput::pair();
        let output = Arc::new(MemoryOutput::new());
        let mut conductor = Conductor::new(Box::new(input), output);
        assert_eq!(conductor.state(), EngineState::Idle);

        conductor.load_score(two_segment_sequence());
        conductor.start();
        assert_eq!(conductor.state(), EngineState::Capturing);

        conductor.stop();
        assert_eq!(conductor.state(), EngineState::Stopped);
        conductor.stop();
        assert_eq!(conductor.state(), EngineState::Stopped);

        // Restarting a stopped engine is refused
        conductor.start();
        assert_eq!(conductor.state(), EngineState::Stopped);
    }

    #[test]
    fn test_key_echo_and_scheduled_body() {
        let (handle, input) = QueueInput::pair();
        let output = Arc::new(MemoryOutput::new());
        let mut conductor = Conductor::new(Box::new(input), output.clone());
        conductor.load_score(two_segment_sequence());
        conductor.start();

        handle.push(note_on(60, 100));

        // Immediate key echo at the performer's velocity
        assert!(wait_until(500, || output
            .messages()
            .contains(&note_on(60, 100))));

        // Body note-on (10 ticks ≈ 20.8ms at 250_000/120) arrives with the
        // smoothed velocity (first call: 100 · 0.8 = 80)
        assert!(wait_until(1000, || output
            .messages()
            .iter()
            .any(|m| *m == note_on(48, 80))));

        conductor.stop();
    }

    #[test]
    fn test_overlapping_triggers_and_completion() {
        let (handle, input) = QueueInput::pair();
        let output = Arc::new(MemoryOutput::new());
        let mut conductor = Conductor::new(Box::new(input), output.clone());
        conductor.load_score(two_segment_sequence());
        conductor.start();

        handle.push(note_on(60, 100));
        // Second trigger before the first release: segment 2 binds to 61
        handle.push(note_on(61, 90));
        assert!(wait_until(500, || output
            .messages()
            .contains(&note_on(64, 90))));
        assert!(!conductor.performance_complete());

        handle.push(note_off(60));
        assert!(wait_until(500, || output.messages().contains(&note_off(60))));
        assert!(!conductor.performance_complete());

        handle.push(note_off(61));
        assert!(wait_until(500, || output
            .messages()
            .iter()
            .any(|m| *m == MidiMessage::NoteOff { pitch: 64, velocity: 0, channel: 0 })));
        assert!(wait_until(500, || conductor.performance_complete()));

        conductor.stop();
    }

    #[test]
    fn test_control_change_passes_through() {
        let (handle, input) = QueueInput::pair();
        let output = Arc::new(MemoryOutput::new());
        let mut conductor = Conductor::new(Box::new(input), output.clone());
        conductor.load_score(two_segment_sequence());
        conductor.start();

        let cc = MidiMessage::ControlChange { controller: 64, value: 127, channel: 3 };
        handle.push(cc.clone());
        assert!(wait_until(500, || output.messages().contains(&cc)));

        conductor.stop();
    }

    #[test]
    fn test_input_disconnect_ends_capture_without_crash() {
        let (handle, input) = QueueInput::pair();
        let output = Arc::new(MemoryOutput::new());
        let mut conductor = Conductor::new(Box::new(input), output);
        conductor.load_score(two_segment_sequence());
        conductor.start();

        drop(handle);
        thread::sleep(Duration::from_millis(50));
        conductor.stop();
        assert_eq!(conductor.state(), EngineState::Stopped);
    }

    #[test]
    fn test_session_saved_on_stop() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, input) = QueueInput::pair();
        let output = Arc::new(MemoryOutput::new());
        let mut conductor = Conductor::new(Box::new(input), output.clone())
            .with_session_dir(dir.path().to_path_buf());
        conductor.load_score(two_segment_sequence());
        conductor.start();

        handle.push(note_on(60, 100));
        assert!(wait_until(500, || output
            .messages()
            .contains(&note_on(60, 100))));
        handle.push(note_off(60));
        assert!(wait_until(500, || output.messages().contains(&note_off(60))));

        conductor.stop();

        let record = SessionRecord::load(&dir.path().join("session.json")).unwrap();
        assert_eq!(record.ticks_per_beat, 120);
        assert_eq!(record.tempo, 250_000);
        assert!(record.events.len() >= 2, "note-on and note-off recorded");
        assert!(record.events[0].segment.is_some());
    }
}
