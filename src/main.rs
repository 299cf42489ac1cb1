use midi_conductor::engine::Conductor;
use midi_conductor::extract;
use midi_conductor::interpolator::{
    AdaptiveSpeed, DecayingAverageVelocity, FixedSpeed, PassthroughVelocity, SpeedInterpolator,
    VelocityInterpolator,
};
use midi_conductor::sequence::Sequence;
use midi_conductor::session::SessionRecord;
#[cfg(feature = "synth")]
use midi_conductor::synth::Synthesizer;
use midi_conductor::transport::{
    self, MidiInputPort, MidiOutputPort, MidirInput, MidirOutput,
};
use midi_conductor::virtual_midi::{script_performance, MemoryOutput, ScriptedInput};

use clap::Parser;
use log::{error, info, warn};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "midi-conductor")]
#[command(about = "Interactive MIDI conductor: echo the melody, it conducts the accompaniment")]
struct Cli {
    /// Score file (standard MIDI: melody + accompaniment tracks)
    #[arg(long)]
    score: Option<PathBuf>,

    /// List available MIDI devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Input device name (substring match); prompts interactively if omitted
    #[arg(long)]
    input: Option<String>,

    /// Output device name (substring match); prompts interactively if omitted
    #[arg(long)]
    output: Option<String>,

    /// MIDI channel stamped on every emitted event
    #[arg(long, default_value_t = 0)]
    channel: u8,

    /// Tempo following: "fixed" or "adaptive"
    #[arg(long, default_value = "adaptive")]
    speed: String,

    /// Adaptive tempo window size
    #[arg(long, default_value_t = 5)]
    window: usize,

    /// Dynamics: "passthrough" or "smooth"
    #[arg(long, default_value = "smooth")]
    velocity: String,

    /// Save the full session into this directory on exit
    #[arg(long)]
    save_session: Option<PathBuf>,

    /// Seed the adaptive tempo follower from a saved session
    #[arg(long)]
    template: Option<PathBuf>,

    /// Drive the engine from a scripted virtual performer (no hardware)
    #[arg(long)]
    simulate: bool,

    /// Virtual performer inter-onset interval in milliseconds
    #[arg(long, default_value_t = 400)]
    simulate_ioi_ms: u64,

    /// SoundFont for the built-in synthesizer (requires the "synth" feature)
    #[cfg(feature = "synth")]
    #[arg(long)]
    soundfont: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    if cli.list_devices {
        list_devices();
        return;
    }

    let score_path = match &cli.score {
        Some(path) => path.clone(),
        None => {
            error!("--score is required (or use --list-devices)");
            std::process::exit(2);
        }
    };
    let sequence = match extract::sequence_from_midi_file(&score_path) {
        Ok(sequence) => sequence,
        Err(e) => {
            error!("failed to load score {:?}: {}", score_path, e);
            std::process::exit(1);
        }
    };

    info!("═══════════════════════════════════════════════");
    info!("  MIDI CONDUCTOR v{}", env!("CARGO_PKG_VERSION"));
    info!("  Score: {:?} ({} segments)", score_path, sequence.len());
    info!(
        "  Tempo: {} µs/beat @ {} ticks/beat",
        sequence.tempo, sequence.ticks_per_beat
    );
    info!("  Mode: {}", if cli.simulate { "SIMULATED PERFORMER" } else { "LIVE" });
    info!("═══════════════════════════════════════════════");

    let speed = build_speed_interpolator(&cli);
    let velocity = build_velocity_interpolator(&cli);

    let input = match build_input(&cli, &sequence) {
        Ok(input) => input,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    let output = match build_output(&cli) {
        Ok(output) => output,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let mut conductor = Conductor::new(input, output.port.clone())
        .with_speed_interpolator(speed)
        .with_velocity_interpolator(velocity)
        .with_channel(cli.channel);
    if let Some(dir) = &cli.save_session {
        conductor = conductor.with_session_dir(dir.clone());
    }
    conductor.load_score(sequence);
    conductor.start();

    println!("[Press Enter to stop]");
    let mut line = String::new();
    let _ = io::stdin().lock().read_line(&mut line);

    conductor.stop();
}

fn list_devices() {
    match transport::list_input_ports() {
        Ok(names) if !names.is_empty() => {
            println!("Input devices:");
            for (i, name) in names.iter().enumerate() {
                println!("  {}: {}", i, name);
            }
        }
        Ok(_) => println!("No MIDI input devices found."),
        Err(e) => error!("{}", e),
    }
    match transport::list_output_ports() {
        Ok(names) if !names.is_empty() => {
            println!("Output devices:");
            for (i, name) in names.iter().enumerate() {
                println!("  {}: {}", i, name);
            }
        }
        Ok(_) => println!("No MIDI output devices found."),
        Err(e) => error!("{}", e),
    }
}

fn build_speed_interpolator(cli: &Cli) -> Box<dyn SpeedInterpolator> {
    match cli.speed.as_str() {
        "adaptive" => {
            let mut adaptive = AdaptiveSpeed::new().with_window(cli.window);
            if let Some(path) = &cli.template {
                match SessionRecord::load(path) {
                    Ok(record) => {
                        let template = record.tempo_template();
                        info!("loaded tempo template ({} entries) from {:?}", template.len(), path);
                        adaptive = adaptive.with_template(template);
                    }
                    Err(e) => warn!("ignoring template {:?}: {}", path, e),
                }
            }
            Box::new(adaptive)
        }
        "fixed" => Box::new(FixedSpeed),
        other => {
            warn!("unknown speed strategy {:?}; using fixed", other);
            Box::new(FixedSpeed)
        }
    }
}

fn build_velocity_interpolator(cli: &Cli) -> Box<dyn VelocityInterpolator> {
    match cli.velocity.as_str() {
        "smooth" => Box::new(DecayingAverageVelocity::default()),
        "passthrough" => Box::new(PassthroughVelocity),
        other => {
            warn!("unknown velocity strategy {:?}; using smooth", other);
            Box::new(DecayingAverageVelocity::default())
        }
    }
}

fn build_input(cli: &Cli, sequence: &Sequence) -> Result<Box<dyn MidiInputPort>, String> {
    if cli.simulate {
        let script = script_performance(sequence, cli.simulate_ioi_ms, cli.simulate_ioi_ms / 2, 96);
        info!("virtual performer scripted: {} events", script.len());
        return Ok(Box::new(ScriptedInput::new(script)));
    }
    let device = match &cli.input {
        Some(name) => name.clone(),
        None => {
            let names =
                transport::list_input_ports().map_err(|e| e.to_string())?;
            choose_device("input", &names)?
        }
    };
    MidirInput::open(&device)
        .map(|port| Box::new(port) as Box<dyn MidiInputPort>)
        .map_err(|e| e.to_string())
}

/// The engine's output port plus whatever must stay alive behind it (the
/// synthesizer owns the audio stream; dropping it silences playback).
struct EngineOutput {
    port: Arc<dyn MidiOutputPort>,
    #[cfg(feature = "synth")]
    _synthesizer: Option<Synthesizer>,
}

impl EngineOutput {
    #[cfg(feature = "synth")]
    fn device(port: Arc<dyn MidiOutputPort>) -> Self {
        Self { port, _synthesizer: None }
    }

    #[cfg(not(feature = "synth"))]
    fn device(port: Arc<dyn MidiOutputPort>) -> Self {
        Self { port }
    }
}

fn build_output(cli: &Cli) -> Result<EngineOutput, String> {
    #[cfg(feature = "synth")]
    if let Some(soundfont) = &cli.soundfont {
        let synth = Synthesizer::new(soundfont).map_err(|e| e.to_string())?;
        synth.start().map_err(|e| e.to_string())?;
        let port: Arc<dyn MidiOutputPort> = Arc::new(synth.output_port());
        return Ok(EngineOutput { port, _synthesizer: Some(synth) });
    }

    if cli.simulate && cli.output.is_none() {
        // Pure demo run: capture the emissions instead of needing a device.
        return Ok(EngineOutput::device(Arc::new(MemoryOutput::new())));
    }
    let device = match &cli.output {
        Some(name) => name.clone(),
        None => {
            let names = transport::list_output_ports().map_err(|e| e.to_string())?;
            choose_device("output", &names)?
        }
    };
    MidirOutput::open(&device)
        .map(|port| EngineOutput::device(Arc::new(port)))
        .map_err(|e| e.to_string())
}

/// Interactive device picker, used when no device name was given.
fn choose_device(kind: &str, names: &[String]) -> Result<String, String> {
    if names.is_empty() {
        return Err(format!("no MIDI {} devices available", kind));
    }
    println!("=============================");
    println!("Please choose an {} device:", kind);
    for (i, name) in names.iter().enumerate() {
        println!("  {}: {}", i, name);
    }
    let stdin = io::stdin();
    loop {
        print!("> ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        stdin
            .lock()
            .read_line(&mut line)
            .map_err(|e| e.to_string())?;
        match line.trim().parse::<usize>() {
            Ok(choice) if choice < names.len() => return Ok(names[choice].clone()),
            _ => println!(
                "Invalid input. Please enter a number between 0 and {}.",
                names.len() - 1
            ),
        }
    }
}
