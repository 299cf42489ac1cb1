//! SoundFont synthesizer: FluidLite rendering pulled by a cpal output
//! stream. The synth instance sits behind an `Arc<Mutex<…>>` so the audio
//! callback (reading samples) and the engine threads (injecting events) can
//! share it safely.

use crate::transport::MidiOutputPort;
use crate::types::MidiMessage;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream};
use fluidlite::{Settings, Synth};
use log::{debug, info, warn};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SynthError {
    #[error("synthesizer init failed: {0}")]
    Init(String),
    #[error("audio device error: {0}")]
    Audio(String),
}

/// All Notes Off controller number.
const CC_ALL_NOTES_OFF: u32 = 123;

/// Owns the FluidLite synth and the audio stream driving it. Keep this on
/// the thread that created it; hand [`Synthesizer::output_port`] to the
/// engine.
pub struct Synthesizer {
    synth: Arc<Mutex<Synth>>,
    stream: Stream,
    pub sample_rate: f32,
}

impl Synthesizer {
    /// Build the synth, load the SoundFont, and open the default audio
    /// output device.
    pub fn new(soundfont: &Path) -> Result<Self, SynthError> {
        let settings = Settings::new().map_err(|e| SynthError::Init(e.to_string()))?;
        let fl = Synth::new(settings).map_err(|e| SynthError::Init(e.to_string()))?;
        fl.sfload(soundfont, true)
            .map_err(|e| SynthError::Init(format!("loading soundfont: {}", e)))?;
        fl.set_gain(0.7);

        let synth = Arc::new(Mutex::new(fl));

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| SynthError::Audio("no default output device".into()))?;
        let config = device
            .default_output_config()
            .map_err(|e| SynthError::Audio(e.to_string()))?;
        let sample_rate = config.sample_rate().0 as f32;

        {
            let s = synth.lock().unwrap();
            s.set_sample_rate(sample_rate);
        }

        let err_fn = |e| warn!("audio stream error: {}", e);
        let format = config.sample_format();
        let stream_config = config.config();

        // cpal asks for samples; FluidLite fills the buffer.
        let stream = match format {
            SampleFormat::I16 => device
                .build_output_stream(
                    &stream_config,
                    {
                        let synth = synth.clone();
                        move |out: &mut [i16], _| {
                            if let Err(e) = synth.lock().unwrap().write(out) {
                                debug!("synth write i16: {}", e);
                            }
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| SynthError::Audio(e.to_string()))?,
            _ => device
                .build_output_stream(
                    &stream_config,
                    {
                        let synth = synth.clone();
                        move |out: &mut [f32], _| {
                            if let Err(e) = synth.lock().unwrap().write(out) {
                                debug!("synth write f32: {}", e);
                            }
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| SynthError::Audio(e.to_string()))?,
        };

        info!("synthesizer ready at {} Hz", sample_rate);
        Ok(Self {
            synth,
            stream,
            sample_rate,
        })
    }

    /// Begin pushing audio to the device. Must be called before playback
    /// can be heard.
    pub fn start(&self) -> Result<(), SynthError> {
        self.stream
            .play()
            .map_err(|e| SynthError::Audio(e.to_string()))
    }

    /// Silence every channel and pause the audio stream. Dropping the
    /// synthesizer releases the device entirely.
    pub fn stop(&self) {
        {
            let s = self.synth.lock().unwrap();
            for channel in 0..16u32 {
                let _ = s.cc(channel, CC_ALL_NOTES_OFF, 0);
            }
        }
        if let Err(e) = self.stream.pause() {
            debug!("audio stream pause failed: {}", e);
        }
    }

    /// Load a different SoundFont at runtime.
    pub fn load_instrument(&self, soundfont: &Path) -> Result<(), SynthError> {
        self.synth
            .lock()
            .unwrap()
            .sfload(soundfont, true)
            .map(|_| ())
            .map_err(|e| SynthError::Init(e.to_string()))
    }

    pub fn all_notes_off(&self, channel: u8) {
        let s = self.synth.lock().unwrap();
        let _ = s.cc(channel as u32, CC_ALL_NOTES_OFF, 0);
    }

    /// A `Send + Sync` port the engine can drive; shares the synth instance.
    pub fn output_port(&self) -> SynthOutput {
        SynthOutput {
            synth: self.synth.clone(),
        }
    }
}

/// Output port adapter over a shared FluidLite instance.
pub struct SynthOutput {
    synth: Arc<Mutex<Synth>>,
}

impl MidiOutputPort for SynthOutput {
    fn send(&self, msg: &MidiMessage) {
        let s = self.synth.lock().unwrap();
        let result = match msg {
            MidiMessage::NoteOn { pitch, velocity, channel } => {
                s.note_on(*channel as u32, *pitch as u32, *velocity as u32)
            }
            MidiMessage::NoteOff { pitch, channel, .. } => {
                s.note_off(*channel as u32, *pitch as u32)
            }
            MidiMessage::ControlChange { controller, value, channel } => {
                s.cc(*channel as u32, *controller as u32, *value as u32)
            }
            MidiMessage::ProgramChange { program, channel } => {
                s.program_change(*channel as u32, *program as u32)
            }
            MidiMessage::Other(bytes) => {
                debug!("synth ignoring uninterpreted message {:02X?}", bytes);
                Ok(())
            }
        };
        if let Err(e) = result {
            debug!("synth rejected {}: {}", msg, e);
        }
    }

    fn close(&self) {
        let s = self.synth.lock().unwrap();
        for channel in 0..16u32 {
            let _ = s.cc(channel, CC_ALL_NOTES_OFF, 0);
        }
    }
}
