//! MIDI device transport: port traits consumed by the engine plus the
//! `midir`-backed implementation addressing devices by name.
//!
//! Input is polled non-blocking: the midir callback forwards decoded
//! messages into a channel that `poll` drains. Output sends lock an inner
//! connection, so one port handle can safely be driven from both the
//! capture thread (key echo) and the dispatch thread (scheduled body).

use crate::types::MidiMessage;
use crossbeam_channel::{unbounded, Receiver, TryRecvError};
use log::{debug, info, warn};
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no MIDI {0} devices available")]
    NoDevices(&'static str),
    #[error("MIDI device not found: {0}")]
    DeviceNotFound(String),
    #[error("MIDI port closed")]
    Closed,
    #[error("MIDI backend error: {0}")]
    Backend(String),
}

// ─── Port traits ────────────────────────────────────────────────────────────

/// Non-blocking source of live MIDI messages.
pub trait MidiInputPort: Send {
    /// Drain every pending message. An error means the port is gone and
    /// capture should wind down; it is never a crash.
    fn poll(&mut self) -> Result<Vec<MidiMessage>, TransportError>;

    /// Release the device. Subsequent polls return [`TransportError::Closed`].
    fn close(&mut self);
}

/// Sink for outgoing messages. `send` may be invoked concurrently from the
/// capture and dispatch threads; implementations serialize internally.
pub trait MidiOutputPort: Send + Sync {
    fn send(&self, msg: &MidiMessage);
    fn close(&self);
}

// ─── Device listing ─────────────────────────────────────────────────────────

pub fn list_input_ports() -> Result<Vec<String>, TransportError> {
    let input = MidiInput::new("midi-conductor scanner")
        .map_err(|e| TransportError::Backend(e.to_string()))?;
    let names = input
        .ports()
        .iter()
        .filter_map(|p| input.port_name(p).ok())
        .collect();
    Ok(names)
}

pub fn list_output_ports() -> Result<Vec<String>, TransportError> {
    let output = MidiOutput::new("midi-conductor scanner")
        .map_err(|e| TransportError::Backend(e.to_string()))?;
    let names = output
        .ports()
        .iter()
        .filter_map(|p| output.port_name(p).ok())
        .collect();
    Ok(names)
}

// ─── midir input ────────────────────────────────────────────────────────────

/// Live MIDI input from a named device.
pub struct MidirInput {
    // Kept alive so the callback keeps firing; `close` drops it.
    connection: Option<MidiInputConnection<()>>,
    rx: Receiver<MidiMessage>,
    device: String,
}

impl MidirInput {
    /// Open the first input device whose name contains `device`.
    pub fn open(device: &str) -> Result<Self, TransportError> {
        let mut input = MidiInput::new("midi-conductor input")
            .map_err(|e| TransportError::Backend(e.to_string()))?;
        input.ignore(Ignore::None);

        let ports = input.ports();
        if ports.is_empty() {
            return Err(TransportError::NoDevices("input"));
        }
        let port = ports
            .iter()
            .find(|p| {
                input
                    .port_name(p)
                    .map(|n| n.contains(device))
                    .unwrap_or(false)
            })
            .ok_or_else(|| TransportError::DeviceNotFound(device.to_string()))?;

        let (tx, rx) = unbounded();
        let connection = input
            .connect(
                port,
                "midi-conductor-in",
                move |_timestamp, bytes, _| {
                    if let Some(msg) = MidiMessage::from_bytes(bytes) {
                        let _ = tx.send(msg);
                    }
                },
                (),
            )
            .map_err(|e| TransportError::Backend(e.to_string()))?;

        info!("MIDI input open: {}", device);
        Ok(Self {
            connection: Some(connection),
            rx,
            device: device.to_string(),
        })
    }
}

impl MidiInputPort for MidirInput {
    fn poll(&mut self) -> Result<Vec<MidiMessage>, TransportError> {
        if self.connection.is_none() {
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
        if let Some(connection) = self.connection.take() {
            connection.close();
            debug!("MIDI input closed: {}", self.device);
        }
    }
}

// ─── midir output ───────────────────────────────────────────────────────────

/// Live MIDI output to a named device.
pub struct MidirOutput {
    connection: Mutex<Option<MidiOutputConnection>>,
    device: String,
}

impl MidirOutput {
    /// Open the first output device whose name contains `device`.
    pub fn open(device: &str) -> Result<Self, TransportError> {
        let output = MidiOutput::new("midi-conductor output")
            .map_err(|e| TransportError::Backend(e.to_string()))?;

        let ports = output.ports();
        if ports.is_empty() {
            return Err(TransportError::NoDevices("output"));
        }
        let port = ports
            .iter()
            .find(|p| {
                output
                    .port_name(p)
                    .map(|n| n.contains(device))
                    .unwrap_or(false)
            })
            .ok_or_else(|| TransportError::DeviceNotFound(device.to_string()))?;

        let connection = output
            .connect(port, "midi-conductor-out")
            .map_err(|e| TransportError::Backend(e.to_string()))?;

        info!("MIDI output open: {}", device);
        Ok(Self {
            connection: Mutex::new(Some(connection)),
            device: device.to_string(),
        })
    }
}

impl MidiOutputPort for MidirOutput {
    fn send(&self, msg: &MidiMessage) {
        let mut guard = self.connection.lock().unwrap();
        match guard.as_mut() {
            Some(connection) => {
                if let Err(e) = connection.send(&msg.to_bytes()) {
                    warn!("MIDI send failed: {}", e);
                }
            }
            None => debug!("send on closed MIDI output dropped: {}", msg),
        }
    }

    fn close(&self) {
        if let Some(connection) = self.connection.lock().unwrap().take() {
            connection.close();
            debug!("MIDI output closed: {}", self.device);
        }
    }
}
