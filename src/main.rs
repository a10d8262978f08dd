// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::collections::HashSet;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{crate_version, Parser, Subcommand};
use midly::{num::u4, MidiMessage};
use midimux::{
    config,
    cursor::SequenceCursor,
    engine::{Engine, EngineEvent, DEFAULT_QUANTUM},
    midi,
    sequence::{self, reader, EventSink, Flow, MemoryStore, SoundId},
    service::Sequencer,
    tick::Tick,
};
use tracing_subscriber::EnvFilter;

const DEFAULT_CLI_PRIORITY: i32 = 64;
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A MIDI sequencer that shares a few output channels between many sequences."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available MIDI output devices.
    MidiDevices {},
    /// Lists the chunks of a sequence file and the events in each track.
    Inspect {
        /// The path to the sequence file.
        path: String,
    },
    /// Plays sequences from an engine config until they all end.
    Play {
        /// The path to the engine config.
        config_path: String,
        /// The MIDI device to play through. Overrides the config.
        #[arg[short, long]]
        midi_device_name: Option<String>,
        /// The priority every sequence starts with.
        #[arg[short, long, default_value_t = DEFAULT_CLI_PRIORITY]]
        priority: i32,
        /// The sequence ids to start. Defaults to every configured sequence.
        ids: Vec<u32>,
    },
}

/// Counts events by kind without acting on them.
#[derive(Default)]
struct EventCounter {
    notes: usize,
    controllers: usize,
    other_channel: usize,
    system: usize,
    meta: usize,
}

impl EventSink for EventCounter {
    fn channel_message(
        &mut self,
        _cursor: &mut SequenceCursor,
        _channel: u4,
        message: MidiMessage,
    ) -> Flow {
        match message {
            MidiMessage::NoteOn { .. } | MidiMessage::NoteOff { .. } => self.notes += 1,
            MidiMessage::Controller { .. } => self.controllers += 1,
            _ => self.other_channel += 1,
        }
        Flow::Continue
    }

    fn system(&mut self, _cursor: &mut SequenceCursor, _payload: &[u8]) -> Flow {
        self.system += 1;
        Flow::Continue
    }

    fn meta(&mut self, _cursor: &mut SequenceCursor, kind: u8, _payload: &[u8]) -> Flow {
        self.meta += 1;
        if kind == reader::META_END_OF_TRACK {
            Flow::Stop
        } else {
            Flow::Continue
        }
    }
}

fn inspect(path: &Path) -> Result<(), Box<dyn Error>> {
    let data = std::fs::read(path)?;
    let chunks = sequence::chunks(&data)?;

    println!("Chunks (count: {}):", chunks.len());
    for chunk in chunks.iter() {
        println!(
            "- {} ({} bytes at {})",
            String::from_utf8_lossy(&chunk.tag),
            chunk.payload.len(),
            chunk.payload.start
        );
    }

    let tracks = chunks
        .iter()
        .filter(|chunk| &chunk.tag == sequence::TRACK_TAG)
        .count();
    for index in 0..tracks {
        let quantum_us = u32::try_from(DEFAULT_QUANTUM.as_micros()).unwrap_or(u32::MAX);
        let mut cursor = SequenceCursor::new(quantum_us);
        cursor.set_sequence(&data, index)?;
        cursor.set_tick(Tick::from_raw(u32::MAX));

        let mut counter = EventCounter::default();
        match reader::advance(&data, &mut cursor, &mut counter) {
            Ok(_) => println!(
                "Track {}: {} notes, {} controllers, {} other channel, {} system, {} meta",
                index,
                counter.notes,
                counter.controllers,
                counter.other_channel,
                counter.system,
                counter.meta
            ),
            Err(e) => println!("Track {}: unreadable: {}", index, e),
        }
    }

    Ok(())
}

fn play(
    config_path: &Path,
    midi_device_name: Option<String>,
    priority: i32,
    ids: Vec<u32>,
) -> Result<(), Box<dyn Error>> {
    let config = config::Engine::deserialize(config_path)?;
    let settings = config.to_settings()?;

    let base = config_path.parent().unwrap_or_else(|| Path::new("."));
    let store = Arc::new(MemoryStore::new());
    for sequence in config.sequences() {
        store.load_file(sequence.id(), &sequence.path(base))?;
    }

    let device_name = match midi_device_name {
        Some(name) => name,
        None => config
            .midi_device()
            .ok_or("no MIDI device configured")?
            .to_string(),
    };
    let device = midi::get_device(&device_name)?;

    let ids: Vec<SoundId> = if ids.is_empty() {
        config.sequences().iter().map(|s| s.id()).collect()
    } else {
        ids.into_iter().map(SoundId).collect()
    };
    if ids.is_empty() {
        println!("No sequences to play.");
        return Ok(());
    }

    let mut sequencer = Sequencer::new(Engine::new(settings, store, device)?);
    let events = sequencer.subscribe();
    sequencer.start()?;
    {
        let mut engine = sequencer.lock();
        for id in ids.iter() {
            engine.start_sequence(*id, priority)?;
        }
    }

    let mut remaining: HashSet<SoundId> = ids.into_iter().collect();
    while !remaining.is_empty() {
        match events.recv()? {
            EngineEvent::Finished(id) => {
                println!("Finished {}.", id);
                remaining.remove(&id);
            }
            EngineEvent::Aborted(id) => {
                println!("Aborted {}.", id);
                remaining.remove(&id);
            }
            EngineEvent::Marker(id, marker) => println!("{} passed marker {}.", id, marker),
        }
    }

    sequencer.stop();
    Ok(())
}

/// Log filter from `RUST_LOG`, falling back to `info`.
fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().with_env_filter(log_filter()).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::MidiDevices {} => {
            let devices = midi::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Inspect { path } => inspect(&PathBuf::from(path))?,
        Commands::Play {
            config_path,
            midi_device_name,
            priority,
            ids,
        } => play(&PathBuf::from(config_path), midi_device_name, priority, ids)?,
    }

    Ok(())
}
