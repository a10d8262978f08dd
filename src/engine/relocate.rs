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
//! Moving a player to another position in its sequence.
//!
//! Both modes validate everything against a scratch copy of the cursor and
//! only touch the player once the destination is known to be reachable.

use midly::{num::u4, MidiMessage};
use tracing::{info, warn};

use super::{dispatch::apply_timing_meta, Engine};
use crate::{
    channel::CHANNELS_PER_PLAYER,
    cursor::SequenceCursor,
    error::Error,
    player::PlayerId,
    sequence::{
        reader::{self, META_END_OF_TRACK},
        EventSink, Flow, SoundId,
    },
    tick::Tick,
};

/// Default per-field maxima of a relocation target.
pub const DEFAULT_MAX_MEASURES: u32 = 1000;
pub const DEFAULT_MAX_BEATS: u32 = 12;
pub const DEFAULT_MAX_TICKS: u32 = 480;

/// A relocation target. Every field is zero based.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Position {
    pub chunk: usize,
    pub measure: u32,
    pub beat: u32,
    pub tick: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelocateMode {
    /// Silence everything and jump.
    Hard,
    /// Keep notes that are still held at the destination.
    Sustained,
}

/// Exclusive upper bounds of each position field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelocationLimits {
    pub measures: u32,
    pub beats: u32,
    pub ticks: u32,
}

impl Default for RelocationLimits {
    fn default() -> Self {
        RelocationLimits {
            measures: DEFAULT_MAX_MEASURES,
            beats: DEFAULT_MAX_BEATS,
            ticks: DEFAULT_MAX_TICKS,
        }
    }
}

impl RelocationLimits {
    pub fn validate(&self) -> Result<(), Error> {
        // The packed position holds 12 bits of measure and 16 of sub-beat.
        if !(1..=0x1000).contains(&self.measures)
            || !(1..=16).contains(&self.beats)
            || !(1..=0x1_0000).contains(&self.ticks)
        {
            return Err(Error::invalid_argument(format!(
                "relocation limits {:?} out of range",
                self
            )));
        }
        Ok(())
    }

    fn check(&self, position: &Position) -> Result<(), Error> {
        if position.measure >= self.measures
            || position.beat >= self.beats
            || position.tick >= self.ticks
        {
            return Err(Error::invalid_argument(format!(
                "position {}:{}:{} exceeds limits {}:{}:{}",
                position.measure,
                position.beat,
                position.tick,
                self.measures,
                self.beats,
                self.ticks
            )));
        }
        Ok(())
    }
}

/// Event sink for the silent scan to the destination. It tracks which keys
/// are held per part and honours tempo and meter changes; nothing is emitted.
struct SeekScan {
    transpose: i32,
    held: [u128; CHANNELS_PER_PLAYER],
    ended: bool,
}

impl SeekScan {
    fn key_bit(&self, key: u8) -> Option<u128> {
        let key = i32::from(key) + self.transpose;
        (0..128).contains(&key).then(|| 1u128 << key)
    }
}

impl EventSink for SeekScan {
    fn channel_message(
        &mut self,
        _cursor: &mut SequenceCursor,
        channel: u4,
        message: MidiMessage,
    ) -> Flow {
        let index = usize::from(channel.as_int());
        match message {
            MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                if let Some(bit) = self.key_bit(key.as_int()) {
                    self.held[index] |= bit;
                }
            }
            MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                if let Some(bit) = self.key_bit(key.as_int()) {
                    self.held[index] &= !bit;
                }
            }
            _ => {}
        }
        Flow::Continue
    }

    fn meta(&mut self, cursor: &mut SequenceCursor, kind: u8, payload: &[u8]) -> Flow {
        if kind == META_END_OF_TRACK {
            self.ended = true;
            return Flow::Stop;
        }
        apply_timing_meta(cursor, kind, payload);
        Flow::Continue
    }
}

impl Engine {
    /// Moves a playing sequence to `position`.
    ///
    /// Returns the number of notes that had to be forced off because nothing
    /// at the destination accounted for them. That only happens with sustained
    /// relocation of inconsistent data and is logged as a warning; the
    /// relocation itself still succeeds.
    ///
    /// On error nothing about the player has changed.
    pub fn relocate(
        &mut self,
        id: SoundId,
        position: Position,
        mode: RelocateMode,
    ) -> Result<u32, Error> {
        self.settings.relocation_limits.check(&position)?;
        let player_id = self.find_player(id)?;
        let (cursor, held) = self.seek(player_id, position)?;

        let forced = match mode {
            RelocateMode::Hard => {
                self.silence_player(player_id);
                0
            }
            RelocateMode::Sustained => self.reconcile(player_id, &held),
        };

        if let Some(player) = self.players.get_mut(player_id) {
            player.cursor = cursor;
        }
        if forced > 0 {
            let err = Error::ReconciliationFailure {
                id,
                missing: forced,
            };
            warn!(err = %err, "Forced notes off after relocation.");
        }
        info!(
            sound = %id,
            mode = ?mode,
            chunk = position.chunk,
            tick = %cursor.tick(),
            "Relocated sequence."
        );
        Ok(forced)
    }

    /// Computes the destination cursor and the keys held there without
    /// touching the player.
    fn seek(
        &self,
        player_id: PlayerId,
        position: Position,
    ) -> Result<(SequenceCursor, [u128; CHANNELS_PER_PLAYER]), Error> {
        let player = self
            .players
            .get(player_id)
            .ok_or_else(|| Error::invalid_argument("player is gone"))?;
        let id = player.sound;
        let data = &player.data;
        let mut cursor = player.cursor;

        let mut restart = position.chunk != cursor.chunk_index();
        if restart {
            cursor
                .set_sequence(data, position.chunk)
                .map_err(|e| Error::invalid_sequence(id, e.to_string()))?;
        }
        let target = Tick::from_parts(position.measure, position.beat, position.tick)
            .normalize(cursor.ticks_per_beat(), cursor.beats_per_measure());
        if !restart && target < cursor.tick() {
            cursor
                .set_sequence(data, position.chunk)
                .map_err(|e| Error::invalid_sequence(id, e.to_string()))?;
            restart = true;
        }

        let mut scan = SeekScan {
            transpose: player.transpose,
            held: [0; CHANNELS_PER_PLAYER],
            ended: false,
        };
        if !restart {
            for (index, channel) in player.channels.iter().enumerate() {
                if let Some(binding) = channel.binding {
                    scan.held[index] = self.physical[binding.physical].slot_notes(binding.slot);
                }
            }
        }

        cursor.set_tick(target);
        reader::advance(data, &mut cursor, &mut scan).map_err(|source| {
            Error::invalid_sequence(id, format!("unreadable before destination: {}", source))
        })?;
        if scan.ended {
            return Err(Error::invalid_argument(format!(
                "position {}:{}:{} is past the end of track {}",
                position.measure, position.beat, position.tick, position.chunk
            )));
        }
        Ok((cursor, scan.held))
    }

    /// Sends all-notes-off and neutral performance controls on every bound
    /// part of a player.
    fn silence_player(&mut self, player_id: PlayerId) {
        for index in 0..CHANNELS_PER_PLAYER {
            if let Some(channel) = self.channel_mut(player_id, index) {
                channel.reset_performance();
            }
            self.sync_notes(player_id, index, |physical, slot| physical.all_notes_off(slot));
            self.reset_physical_performance(player_id, index);
        }
    }

    /// Leaves notes held at the destination untouched and forces off the rest.
    /// Returns how many were forced off.
    fn reconcile(&mut self, player_id: PlayerId, held: &[u128; CHANNELS_PER_PLAYER]) -> u32 {
        let mut forced = 0;
        for (index, held) in held.iter().enumerate() {
            if let Some(channel) = self.channel_mut(player_id, index) {
                channel.reset_performance();
            }
            self.reset_physical_performance(player_id, index);

            let sounding = match self.players.get(player_id).map(|p| &p.channels[index]) {
                Some(channel) if channel.trim > 0 => channel
                    .binding
                    .map_or(0, |binding| {
                        self.physical[binding.physical].slot_notes(binding.slot)
                    }),
                _ => 0,
            };
            let stale = sounding & !held;
            if stale == 0 {
                continue;
            }
            self.sync_notes(player_id, index, |physical, slot| {
                (0..128u8)
                    .filter(|key| stale & (1u128 << key) != 0)
                    .filter_map(|key| physical.force_off(slot, key))
                    .collect::<Vec<_>>()
            });
            forced += stale.count_ones();
            warn!(
                player = %player_id,
                channel = index,
                keys = stale.count_ones(),
                "Notes sounding before relocation have no place at the destination."
            );
        }
        forced
    }
}
