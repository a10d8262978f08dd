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
//! Builders for sequence data used across the unit tests.

use std::{
    thread,
    time::{Duration, Instant},
};

use crate::sequence::{HEADER_TAG, TRACK_TAG};

/// A single track event: a delta time followed by raw bytes.
pub struct Event {
    delta: u32,
    bytes: Vec<u8>,
}

impl Event {
    /// An event with arbitrary bytes, used for running status and bad data.
    pub fn raw(delta: u32, bytes: Vec<u8>) -> Event {
        Event { delta, bytes }
    }

    pub fn note_on(delta: u32, channel: u8, key: u8, vel: u8) -> Event {
        Event::raw(delta, vec![0x90 | channel, key, vel])
    }

    pub fn note_off(delta: u32, channel: u8, key: u8) -> Event {
        Event::raw(delta, vec![0x80 | channel, key, 0])
    }

    pub fn controller(delta: u32, channel: u8, controller: u8, value: u8) -> Event {
        Event::raw(delta, vec![0xB0 | channel, controller, value])
    }

    pub fn program(delta: u32, channel: u8, program: u8) -> Event {
        Event::raw(delta, vec![0xC0 | channel, program])
    }

    pub fn pitch_bend(delta: u32, channel: u8, bend: u16) -> Event {
        Event::raw(
            delta,
            vec![0xE0 | channel, (bend & 0x7F) as u8, ((bend >> 7) & 0x7F) as u8],
        )
    }

    pub fn system(delta: u32, payload: Vec<u8>) -> Event {
        let mut bytes = vec![0xF0];
        write_vlq(&mut bytes, payload.len() as u32);
        bytes.extend(payload);
        Event::raw(delta, bytes)
    }

    pub fn meta(delta: u32, kind: u8, payload: Vec<u8>) -> Event {
        let mut bytes = vec![0xFF, kind];
        write_vlq(&mut bytes, payload.len() as u32);
        bytes.extend(payload);
        Event::raw(delta, bytes)
    }

    pub fn tempo(delta: u32, tempo: u32) -> Event {
        Event::meta(delta, 0x51, tempo.to_be_bytes()[1..].to_vec())
    }

    pub fn time_signature(delta: u32, numerator: u8) -> Event {
        Event::meta(delta, 0x58, vec![numerator, 2, 24, 8])
    }

    pub fn end_of_track(delta: u32) -> Event {
        Event::meta(delta, 0x2F, vec![])
    }

    /// Part setup: channel, enabled, priority, trim, program.
    pub fn part_setup(
        delta: u32,
        channel: u8,
        enabled: bool,
        priority: u8,
        trim: u8,
        program: u8,
    ) -> Event {
        Event::system(
            delta,
            vec![0x7D, 0x00, channel, u8::from(enabled), priority, trim, program],
        )
    }

    pub fn marker(delta: u32, marker: u8) -> Event {
        Event::system(delta, vec![0x7D, 0x01, marker])
    }
}

/// Assembles a header chunk and track chunks into one buffer.
#[derive(Default)]
pub struct SequenceBuilder {
    tracks: Vec<Vec<Event>>,
}

impl SequenceBuilder {
    pub fn new() -> SequenceBuilder {
        SequenceBuilder::default()
    }

    pub fn track(mut self, events: Vec<Event>) -> SequenceBuilder {
        self.tracks.push(events);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(HEADER_TAG);
        data.extend_from_slice(&6u32.to_be_bytes());
        data.extend_from_slice(&1u16.to_be_bytes());
        data.extend_from_slice(&(self.tracks.len() as u16).to_be_bytes());
        data.extend_from_slice(&480u16.to_be_bytes());

        for events in self.tracks {
            let mut payload = Vec::new();
            for event in events {
                write_vlq(&mut payload, event.delta);
                payload.extend(event.bytes);
            }
            data.extend_from_slice(TRACK_TAG);
            data.extend_from_slice(&(payload.len() as u32).to_be_bytes());
            data.extend(payload);
        }
        data
    }
}

fn write_vlq(out: &mut Vec<u8>, value: u32) {
    let mut groups = vec![(value & 0x7F) as u8];
    let mut rest = value >> 7;
    while rest > 0 {
        groups.push(((rest & 0x7F) as u8) | 0x80);
        rest >>= 7;
    }
    out.extend(groups.into_iter().rev());
}

/// Wait for the given predicate to return true or fail.
pub fn eventually<F>(predicate: F, error_msg: &str)
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    let mut tick = Duration::from_millis(5);
    let timeout = Duration::from_secs(10);
    let max_tick = Duration::from_millis(100);

    loop {
        if start.elapsed() > timeout {
            panic!("{}", error_msg);
        }
        if predicate() {
            return;
        }
        thread::sleep(tick);
        tick = std::cmp::min(tick * 2, max_tick);
    }
}
