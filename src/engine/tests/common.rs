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
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use midly::MidiMessage;

use crate::channel::Binding;
use crate::engine::{Engine, EngineEvent, Settings};
use crate::midi::MockDevice;
use crate::sequence::{MemoryStore, SoundId};
use crate::testutil::{Event, SequenceBuilder};

/// Test settings run 10 ticks per service call: a 10ms quantum at 1ms per tick.
pub(crate) const TICKS_PER_SERVICE: u32 = 10;

pub(crate) fn test_settings(physical_channels: usize) -> Settings {
    Settings {
        quantum: Duration::from_millis(10),
        tempo: 480_000,
        physical_channels,
        player_slots: 4,
        ..Settings::default()
    }
}

pub(crate) struct TestEngine {
    pub engine: Engine,
    pub device: MockDevice,
    pub events: Receiver<EngineEvent>,
}

/// An engine over a mock device with the given single-track sequences loaded.
pub(crate) fn test_engine(settings: Settings, sequences: Vec<(u32, Vec<Event>)>) -> TestEngine {
    let store = MemoryStore::new();
    for (id, events) in sequences {
        store.insert(SoundId(id), single_track(events));
    }
    let device = MockDevice::get("mock-test");
    let mut engine = Engine::new(settings, Arc::new(store), Arc::new(device.clone())).unwrap();
    let events = engine.subscribe();
    TestEngine {
        engine,
        device,
        events,
    }
}

pub(crate) fn single_track(events: Vec<Event>) -> Vec<u8> {
    SequenceBuilder::new().track(events).build()
}

pub(crate) fn service(engine: &mut Engine, calls: usize) {
    for _ in 0..calls {
        engine.service();
    }
}

pub(crate) fn binding(engine: &Engine, id: u32, channel: usize) -> Option<Binding> {
    engine
        .player(SoundId(id))
        .and_then(|player| player.channels[channel].binding())
}

pub(crate) fn note_ons(messages: &[MidiMessage]) -> Vec<u8> {
    messages
        .iter()
        .filter_map(|message| match message {
            MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => Some(key.as_int()),
            _ => None,
        })
        .collect()
}

pub(crate) fn note_offs(messages: &[MidiMessage]) -> Vec<u8> {
    messages
        .iter()
        .filter_map(|message| match message {
            MidiMessage::NoteOff { key, .. } => Some(key.as_int()),
            MidiMessage::NoteOn { key, vel } if vel.as_int() == 0 => Some(key.as_int()),
            _ => None,
        })
        .collect()
}

pub(crate) fn controllers(messages: &[MidiMessage], number: u8) -> Vec<u8> {
    messages
        .iter()
        .filter_map(|message| match message {
            MidiMessage::Controller { controller, value } if controller.as_int() == number => {
                Some(value.as_int())
            }
            _ => None,
        })
        .collect()
}

/// A one-part track that plays `key` from the start and ends much later.
pub(crate) fn held_note(channel: u8, key: u8) -> Vec<Event> {
    vec![
        Event::note_on(0, channel, key, 100),
        Event::end_of_track(100_000),
    ]
}
