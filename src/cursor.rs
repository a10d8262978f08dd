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
//! Playback position within one track of a sequence.

use std::ops::Range;

use crate::{
    clock::{Clock, DEFAULT_TEMPO},
    sequence::{find_chunk, ByteReader, ChunkError, TRACK_TAG},
    tick::{Tick, MAX_BEATS_PER_MEASURE, MAX_TICKS_PER_BEAT},
};

/// Default ticks per beat of a freshly started sequence.
pub const DEFAULT_TICKS_PER_BEAT: u32 = 480;

/// Default beats per measure of a freshly started sequence.
pub const DEFAULT_BEATS_PER_MEASURE: u32 = 4;

/// Where a player is in its sequence and how fast it moves.
///
/// The cursor is `Copy` so relocation can work on a scratch copy and only
/// commit it once every check has passed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SequenceCursor {
    chunk_index: usize,
    chunk_start: usize,
    chunk_end: usize,
    chunk_ptr: usize,
    tick: Tick,
    event_tick: Tick,
    ticks_per_beat: u32,
    beats_per_measure: u32,
    running_status: Option<u8>,
    clock: Clock,
}

impl SequenceCursor {
    /// Creates a cursor with default tempo and meter that is not yet on any
    /// track.
    pub fn new(quantum_us: u32) -> SequenceCursor {
        SequenceCursor {
            chunk_index: 0,
            chunk_start: 0,
            chunk_end: 0,
            chunk_ptr: 0,
            tick: Tick::ZERO,
            event_tick: Tick::ZERO,
            ticks_per_beat: DEFAULT_TICKS_PER_BEAT,
            beats_per_measure: DEFAULT_BEATS_PER_MEASURE,
            running_status: None,
            clock: Clock::new(quantum_us, DEFAULT_TEMPO),
        }
    }

    /// Positions the cursor at the start of track `index`: current tick zero
    /// and the first event due after its leading delta time.
    pub fn set_sequence(&mut self, data: &[u8], index: usize) -> Result<(), ChunkError> {
        let payload = find_chunk(data, TRACK_TAG, index)?;
        let mut reader = ByteReader::new(&data[..payload.end], payload.start);
        let delta = reader.read_vlq().map_err(|_| ChunkError::Truncated {
            offset: payload.start,
        })?;

        self.chunk_index = index;
        self.chunk_start = payload.start;
        self.chunk_end = payload.end;
        self.chunk_ptr = reader.position() - payload.start;
        self.tick = Tick::ZERO;
        self.event_tick = Tick::from_ticks(delta, self.ticks_per_beat, self.beats_per_measure);
        self.running_status = None;
        Ok(())
    }

    /// Moves the current tick on by however many ticks one quantum is worth.
    pub fn advance_clock(&mut self) {
        let elapsed = self.clock.advance();
        if elapsed > 0 {
            self.tick = self
                .tick
                .add_ticks(elapsed, self.ticks_per_beat, self.beats_per_measure);
        }
    }

    pub fn chunk_index(&self) -> usize {
        self.chunk_index
    }

    /// Byte range of the current track's payload.
    pub fn chunk(&self) -> Range<usize> {
        self.chunk_start..self.chunk_end
    }

    /// Offset of the next unread byte relative to the payload start.
    pub fn chunk_ptr(&self) -> usize {
        self.chunk_ptr
    }

    pub fn set_chunk_ptr(&mut self, chunk_ptr: usize) {
        self.chunk_ptr = chunk_ptr;
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn set_tick(&mut self, tick: Tick) {
        self.tick = tick;
    }

    /// Tick of the next unread event.
    pub fn event_tick(&self) -> Tick {
        self.event_tick
    }

    pub fn set_event_tick(&mut self, tick: Tick) {
        self.event_tick = tick;
    }

    pub fn ticks_per_beat(&self) -> u32 {
        self.ticks_per_beat
    }

    pub fn beats_per_measure(&self) -> u32 {
        self.beats_per_measure
    }

    /// Changes the meter. Out-of-range values are rejected and leave the
    /// cursor untouched.
    pub fn set_meter(&mut self, ticks_per_beat: u32, beats_per_measure: u32) -> bool {
        if !(1..=MAX_TICKS_PER_BEAT).contains(&ticks_per_beat)
            || !(1..=MAX_BEATS_PER_MEASURE).contains(&beats_per_measure)
        {
            return false;
        }
        self.ticks_per_beat = ticks_per_beat;
        self.beats_per_measure = beats_per_measure;
        self.tick = self.tick.normalize(ticks_per_beat, beats_per_measure);
        self.event_tick = self.event_tick.normalize(ticks_per_beat, beats_per_measure);
        true
    }

    pub fn running_status(&self) -> Option<u8> {
        self.running_status
    }

    pub fn set_running_status(&mut self, status: Option<u8>) {
        self.running_status = status;
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut Clock {
        &mut self.clock
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutil::{Event, SequenceBuilder};

    #[test]
    fn set_sequence_reads_the_leading_delta() {
        let data = SequenceBuilder::new()
            .track(vec![Event::note_on(0, 0, 60, 100)])
            .track(vec![Event::note_on(500, 0, 60, 100)])
            .build();
        let mut cursor = SequenceCursor::new(6944);
        cursor.set_sequence(&data, 1).expect("second track");

        assert_eq!(cursor.chunk_index(), 1);
        assert_eq!(cursor.tick(), Tick::ZERO);
        assert_eq!(cursor.event_tick(), Tick::from_parts(0, 1, 20));
        // 500 needs two bytes of delta.
        assert_eq!(cursor.chunk_ptr(), 2);
    }

    #[test]
    fn set_sequence_rejects_missing_tracks() {
        let data = SequenceBuilder::new().track(vec![]).build();
        let mut cursor = SequenceCursor::new(6944);
        let before = cursor;

        // The only track is empty, so there is no leading delta to read.
        assert!(matches!(
            cursor.set_sequence(&data, 0),
            Err(ChunkError::Truncated { .. })
        ));
        assert!(matches!(
            cursor.set_sequence(&data, 1),
            Err(ChunkError::Missing { index: 1, .. })
        ));
        assert_eq!(cursor, before);
    }

    #[test]
    fn clock_moves_the_current_tick() {
        let data = SequenceBuilder::new()
            .track(vec![Event::note_on(0, 0, 60, 100)])
            .build();
        let mut cursor = SequenceCursor::new(6944);
        cursor.set_sequence(&data, 0).expect("track");

        for _ in 0..144 {
            cursor.advance_clock();
        }
        // About two beats at 120bpm.
        let linear = cursor.tick().to_linear(480, 4);
        assert!((958..=962).contains(&linear), "linear {}", linear);
        assert!(cursor.tick().sub_beat() < 480);
    }

    #[test]
    fn meter_is_validated() {
        let mut cursor = SequenceCursor::new(6944);
        assert!(!cursor.set_meter(0, 4));
        assert!(!cursor.set_meter(480, 16));
        assert!(!cursor.set_meter(0x8000, 4));
        assert_eq!(cursor.ticks_per_beat(), DEFAULT_TICKS_PER_BEAT);
        assert!(cursor.set_meter(96, 3));
        assert_eq!((cursor.ticks_per_beat(), cursor.beats_per_measure()), (96, 3));
    }
}
