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
//! The sequencing engine.
//!
//! One `Engine` owns every pool: players, physical channels and volume groups.
//! It is driven by [`Engine::service`] once per quantum and controlled through
//! the remaining public methods. It is not synchronized on its own; see
//! `service::Sequencer` for the threaded wrapper.

use std::{sync::Arc, time::Duration};

use crossbeam_channel::{Receiver, Sender};
use midly::{live::LiveEvent, num::u4, MidiMessage};
use tracing::{debug, error, info};

use crate::{
    channel::{
        output_pan, Binding, OutputParams, Owner, PhysicalChannel, Slot, CHANNELS_PER_PLAYER,
        MAX_PHYSICAL_CHANNELS, MAX_PRIORITY, MAX_VOLUME,
    },
    clock::MAX_SPEED,
    cursor::{SequenceCursor, DEFAULT_BEATS_PER_MEASURE, DEFAULT_TICKS_PER_BEAT},
    error::Error,
    midi::Device,
    player::{Player, PlayerId, PlayerPool, DEFAULT_GROUP, MAX_DETUNE, MAX_TRANSPOSE},
    sequence::{reader, SequenceStore, SoundId, HEADER_TAG},
    tick::{MAX_BEATS_PER_MEASURE, MAX_TICKS_PER_BEAT},
};

mod arbiter;
mod dispatch;
mod mixer;
mod relocate;


pub use mixer::{Groups, GROUP_COUNT, MASTER_GROUP, MUSIC_GROUP, SFX_GROUP, VOICE_GROUP};
pub use relocate::{Position, RelocateMode, RelocationLimits};

/// Default service quantum, roughly 144 calls per second.
pub const DEFAULT_QUANTUM: Duration = Duration::from_micros(6944);

/// Default number of physical output channels.
pub const DEFAULT_PHYSICAL_CHANNELS: usize = 15;

/// Default number of player slots.
pub const DEFAULT_PLAYER_SLOTS: usize = 2;

/// Tunables of an engine instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub quantum: Duration,
    pub physical_channels: usize,
    pub player_slots: usize,
    pub ticks_per_beat: u32,
    pub beats_per_measure: u32,
    pub tempo: u32,
    pub speed: u32,
    pub relocation_limits: RelocationLimits,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            quantum: DEFAULT_QUANTUM,
            physical_channels: DEFAULT_PHYSICAL_CHANNELS,
            player_slots: DEFAULT_PLAYER_SLOTS,
            ticks_per_beat: DEFAULT_TICKS_PER_BEAT,
            beats_per_measure: DEFAULT_BEATS_PER_MEASURE,
            tempo: crate::clock::DEFAULT_TEMPO,
            speed: crate::clock::UNITY_SPEED,
            relocation_limits: RelocationLimits::default(),
        }
    }
}

impl Settings {
    /// Checks every field against the ranges the engine can represent.
    pub fn validate(&self) -> Result<(), Error> {
        let quantum_us = self.quantum.as_micros();
        if quantum_us == 0 || quantum_us > u128::from(u32::MAX) {
            return Err(Error::invalid_argument(format!(
                "quantum {:?} out of range",
                self.quantum
            )));
        }
        if !(1..=MAX_PHYSICAL_CHANNELS).contains(&self.physical_channels) {
            return Err(Error::invalid_argument(format!(
                "physical channel count {} not in 1..={}",
                self.physical_channels, MAX_PHYSICAL_CHANNELS
            )));
        }
        if self.player_slots == 0 {
            return Err(Error::invalid_argument("at least one player slot is needed"));
        }
        if !(1..=MAX_TICKS_PER_BEAT).contains(&self.ticks_per_beat) {
            return Err(Error::invalid_argument(format!(
                "ticks per beat {} not in 1..={}",
                self.ticks_per_beat, MAX_TICKS_PER_BEAT
            )));
        }
        if !(1..=MAX_BEATS_PER_MEASURE).contains(&self.beats_per_measure) {
            return Err(Error::invalid_argument(format!(
                "beats per measure {} not in 1..={}",
                self.beats_per_measure, MAX_BEATS_PER_MEASURE
            )));
        }
        if self.speed > MAX_SPEED {
            return Err(Error::invalid_argument(format!(
                "speed {} above {}",
                self.speed, MAX_SPEED
            )));
        }
        self.relocation_limits.validate()
    }

    fn quantum_us(&self) -> u32 {
        u32::try_from(self.quantum.as_micros()).unwrap_or(u32::MAX)
    }
}

/// Notifications published by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    /// The sequence reached its end of track and was released.
    Finished(SoundId),
    /// The sequence data was corrupt and the player was released.
    Aborted(SoundId),
    /// The sequence passed a marker.
    Marker(SoundId, u8),
}

/// Per-sequence parameters reachable through `set_param` and `get_param`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Param {
    Priority,
    Volume,
    Pan,
    Detune,
    Transpose,
    Group,
    Speed,
    Marker,
    Hook,
    Measure,
    Beat,
    Tick,
    ChunkIndex,
}

pub struct Engine {
    settings: Settings,
    store: Arc<dyn SequenceStore>,
    device: Arc<dyn Device>,
    players: PlayerPool,
    physical: Vec<PhysicalChannel>,
    groups: Groups,
    pause_depth: u32,
    subscribers: Vec<Sender<EngineEvent>>,
}

impl Engine {
    pub fn new(
        settings: Settings,
        store: Arc<dyn SequenceStore>,
        device: Arc<dyn Device>,
    ) -> Result<Engine, Error> {
        settings.validate()?;
        info!(
            device = %device,
            physical_channels = settings.physical_channels,
            player_slots = settings.player_slots,
            quantum = ?settings.quantum,
            "Creating engine."
        );
        Ok(Engine {
            players: PlayerPool::new(settings.player_slots),
            physical: vec![PhysicalChannel::new(); settings.physical_channels],
            groups: Groups::new(),
            pause_depth: 0,
            subscribers: Vec::new(),
            settings,
            store,
            device,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Returns a receiver of every notification published from now on.
    pub fn subscribe(&mut self) -> Receiver<EngineEvent> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        self.subscribers.push(sender);
        receiver
    }

    /// Starts playing a resident sequence from the top of its first track.
    pub fn start_sequence(&mut self, id: SoundId, priority: i32) -> Result<(), Error> {
        if self.players.find(id).is_some() {
            return Err(Error::invalid_argument(format!(
                "sequence {} is already playing",
                id
            )));
        }
        let data = self
            .store
            .get(id)
            .ok_or_else(|| Error::invalid_sequence(id, "no sequence data"))?;
        if !data.starts_with(HEADER_TAG) {
            return Err(Error::invalid_sequence(id, "not a MIDI sequence"));
        }

        let mut cursor = SequenceCursor::new(self.settings.quantum_us());
        cursor.set_meter(self.settings.ticks_per_beat, self.settings.beats_per_measure);
        cursor.clock_mut().set_tempo(self.settings.tempo);
        cursor.clock_mut().set_speed(self.settings.speed);
        cursor
            .set_sequence(&data, 0)
            .map_err(|e| Error::invalid_sequence(id, e.to_string()))?;

        let player = Player::new(
            id,
            data,
            cursor,
            priority,
            self.groups.effective(DEFAULT_GROUP),
        );
        let player_id = self.players.allocate(player)?;
        info!(sound = %id, player = %player_id, priority, "Started sequence.");
        Ok(())
    }

    /// Stops a sequence, silencing and releasing its channels.
    pub fn stop_sequence(&mut self, id: SoundId) -> Result<(), Error> {
        let player_id = self.find_player(id)?;
        self.release_player(player_id);
        info!(sound = %id, "Stopped sequence.");
        Ok(())
    }

    /// Stops every playing sequence.
    pub fn stop_all(&mut self) {
        for player_id in self.players.active().to_vec() {
            self.release_player(player_id);
        }
        info!("Stopped all sequences.");
    }

    pub fn is_playing(&self, id: SoundId) -> bool {
        self.players.find(id).is_some()
    }

    pub fn player(&self, id: SoundId) -> Option<&Player> {
        self.players.find(id).and_then(|player_id| self.players.get(player_id))
    }

    pub fn physical_channels(&self) -> &[PhysicalChannel] {
        &self.physical
    }

    /// The lowest playing sound id greater than `after`, or the lowest overall.
    pub fn next_sound(&self, after: Option<SoundId>) -> Option<SoundId> {
        self.players
            .iter()
            .map(|(_, player)| player.sound)
            .filter(|sound| after.is_none_or(|after| *sound > after))
            .min()
    }

    /// Suspends servicing. Returns the new pause depth.
    pub fn pause(&mut self) -> u32 {
        self.pause_depth += 1;
        debug!(depth = self.pause_depth, "Paused.");
        self.pause_depth
    }

    /// Undoes one pause. Returns the new pause depth.
    pub fn resume(&mut self) -> u32 {
        self.pause_depth = self.pause_depth.saturating_sub(1);
        debug!(depth = self.pause_depth, "Resumed.");
        self.pause_depth
    }

    pub fn pause_depth(&self) -> u32 {
        self.pause_depth
    }

    /// Links two playing sequences so idle parts of one may be filled by the
    /// other's content on the same channel index.
    pub fn share_parts(&mut self, a: SoundId, b: SoundId) -> Result<(), Error> {
        if a == b {
            return Err(Error::invalid_argument(format!(
                "sequence {} cannot share parts with itself",
                a
            )));
        }
        let first = self.find_player(a)?;
        let second = self.find_player(b)?;
        for (player_id, sound) in [(first, a), (second, b)] {
            if self.players.get(player_id).and_then(|p| p.partner).is_some() {
                return Err(Error::invalid_argument(format!(
                    "sequence {} already shares parts",
                    sound
                )));
            }
        }

        if let Some(player) = self.players.get_mut(first) {
            player.partner = Some(second);
        }
        if let Some(player) = self.players.get_mut(second) {
            player.partner = Some(first);
        }
        info!(first = %a, second = %b, "Linked shared parts.");
        self.arbitrate();
        Ok(())
    }

    /// Sets a parameter and returns its previous value.
    pub fn set_param(&mut self, id: SoundId, param: Param, value: i32) -> Result<i32, Error> {
        let player_id = self.find_player(id)?;
        let previous = self.get_param(id, param)?;

        match param {
            Param::Priority => {
                let priority = in_range(param, value, 0, i32::from(MAX_PRIORITY))? as u8;
                if let Some(player) = self.players.get_mut(player_id) {
                    player.priority = priority;
                    for channel in player.channels.iter_mut() {
                        channel.update_priority(priority);
                    }
                }
                for index in 0..CHANNELS_PER_PLAYER {
                    self.sync_channel(player_id, index, |physical, _, channel| {
                        physical.set_priority(channel.priority)
                    });
                }
                self.arbitrate();
            }
            Param::Volume => {
                let volume = in_range(param, value, 0, i32::from(MAX_VOLUME))? as u8;
                if let Some(player) = self.players.get_mut(player_id) {
                    player.volume = volume;
                }
                self.refresh_player_volume(player_id);
                self.arbitrate();
            }
            Param::Pan => {
                let pan = in_range(param, value, 0, 127)? as u8;
                if let Some(player) = self.players.get_mut(player_id) {
                    player.pan = pan;
                }
                for index in 0..CHANNELS_PER_PLAYER {
                    self.sync_channel(player_id, index, |physical, player, channel| {
                        physical.set_pan(output_pan(channel.pan, player.pan))
                    });
                }
            }
            Param::Detune => {
                let detune = in_range(param, value, -MAX_DETUNE, MAX_DETUNE)?;
                if let Some(player) = self.players.get_mut(player_id) {
                    player.detune = detune;
                }
                for index in 0..CHANNELS_PER_PLAYER {
                    self.sync_channel(player_id, index, |physical, player, channel| {
                        physical.set_pitch(channel.pitch(player.detune))
                    });
                }
            }
            Param::Transpose => {
                let transpose = in_range(param, value, -MAX_TRANSPOSE, MAX_TRANSPOSE)?;
                if let Some(player) = self.players.get_mut(player_id) {
                    player.transpose = transpose;
                }
            }
            Param::Group => {
                let group = in_range(param, value, 0, GROUP_COUNT as i32 - 1)? as usize;
                if let Some(player) = self.players.get_mut(player_id) {
                    player.group = group;
                }
                self.refresh_player_volume(player_id);
                self.arbitrate();
            }
            Param::Speed => {
                let speed = in_range(param, value, 0, MAX_SPEED as i32)? as u32;
                if let Some(player) = self.players.get_mut(player_id) {
                    player.cursor.clock_mut().set_speed(speed);
                }
            }
            Param::Marker => {
                let marker = in_range(param, value, 0, 255)? as u8;
                if let Some(player) = self.players.get_mut(player_id) {
                    player.marker = Some(marker);
                }
            }
            Param::Hook => {
                let hook = in_range(param, value, 0, 255)? as u8;
                if let Some(player) = self.players.get_mut(player_id) {
                    player.hook = hook;
                }
            }
            Param::Measure | Param::Beat | Param::Tick | Param::ChunkIndex => {
                return Err(Error::invalid_argument(format!(
                    "{:?} is read only, use relocate",
                    param
                )));
            }
        }

        debug!(sound = %id, param = ?param, value, previous, "Set parameter.");
        Ok(previous)
    }

    /// Reads a parameter. A missing marker reads as -1.
    pub fn get_param(&self, id: SoundId, param: Param) -> Result<i32, Error> {
        let player = self
            .player(id)
            .ok_or_else(|| Error::invalid_sequence(id, "not playing"))?;
        let cursor = player.cursor();
        Ok(match param {
            Param::Priority => i32::from(player.priority),
            Param::Volume => i32::from(player.volume),
            Param::Pan => i32::from(player.pan),
            Param::Detune => player.detune,
            Param::Transpose => player.transpose,
            Param::Group => player.group as i32,
            Param::Speed => cursor.clock().speed() as i32,
            Param::Marker => player.marker.map_or(-1, i32::from),
            Param::Hook => i32::from(player.hook),
            Param::Measure => cursor.tick().measure() as i32,
            Param::Beat => cursor.tick().beat() as i32,
            Param::Tick => cursor.tick().sub_beat() as i32,
            Param::ChunkIndex => cursor.chunk_index() as i32,
        })
    }

    /// Advances every player by one quantum and executes its due events. Does
    /// nothing while paused.
    ///
    /// Never fails: corrupt sequences are logged and released, the rest keep
    /// playing.
    pub fn service(&mut self) {
        if self.pause_depth > 0 {
            return;
        }
        for player_id in self.players.active().to_vec() {
            self.service_player(player_id);
        }
    }

    fn service_player(&mut self, player_id: PlayerId) {
        let Some(player) = self.players.get(player_id) else {
            return;
        };
        let sound = player.sound;
        let data = Arc::clone(&player.data);
        let mut cursor = player.cursor;
        cursor.advance_clock();

        let mut playback = dispatch::Playback::new(self, player_id);
        let result = reader::advance(&data, &mut cursor, &mut playback);
        let ended = playback.ended();

        if let Some(player) = self.players.get_mut(player_id) {
            player.cursor = cursor;
        }

        match result {
            Ok(_) if ended => {
                info!(sound = %sound, "Sequence finished.");
                self.release_player(player_id);
                self.notify(EngineEvent::Finished(sound));
            }
            Ok(_) => {}
            Err(source) => {
                let err = Error::StreamCorruption { id: sound, source };
                error!(err = %err, cause = %source, "Aborting sequence.");
                self.release_player(player_id);
                self.notify(EngineEvent::Aborted(sound));
            }
        }
    }

    fn find_player(&self, id: SoundId) -> Result<PlayerId, Error> {
        self.players
            .find(id)
            .ok_or_else(|| Error::invalid_sequence(id, "not playing"))
    }

    /// Silences and unbinds every part of a player, unlinks its partner and
    /// frees its slot. Freed physical channels go to waiting parts.
    fn release_player(&mut self, player_id: PlayerId) {
        for index in 0..CHANNELS_PER_PLAYER {
            self.unbind(player_id, index);
        }
        if let Some(partner) = self.players.get(player_id).and_then(|p| p.partner) {
            if let Some(partner) = self.players.get_mut(partner) {
                partner.partner = None;
            }
        }
        self.players.release(player_id);
        self.arbitrate();
    }

    fn notify(&mut self, event: EngineEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event).is_ok());
    }

    /// Sends messages to a physical channel. Device failures are logged only.
    fn emit(&self, physical: usize, messages: impl IntoIterator<Item = MidiMessage>) {
        let channel = u4::from(physical as u8);
        for message in messages {
            if let Err(e) = self.device.emit(LiveEvent::Midi { channel, message }) {
                error!(err = e.as_ref(), channel = physical, "Error emitting MIDI event.");
            }
        }
    }

    /// The parameter set a physical channel takes on when bound to a part.
    fn output_params(&self, owner: Owner) -> Option<OutputParams> {
        let player = self.players.get(owner.player)?;
        let channel = player.channels.get(owner.channel)?;
        Some(OutputParams {
            program: channel.program,
            priority: channel.priority,
            note_request: channel.note_request,
            volume: channel.group_volume,
            pan: output_pan(channel.pan, player.pan),
            modulation: channel.modulation,
            pitch: channel.pitch(player.detune),
            sustain: channel.sustain,
        })
    }

    /// Puts a part into a physical channel slot and sends its full state.
    fn bind(&mut self, owner: Owner, binding: Binding) {
        let Some(params) = self.output_params(owner) else {
            return;
        };
        if let Some(channel) = self
            .players
            .get_mut(owner.player)
            .and_then(|player| player.channels.get_mut(owner.channel))
        {
            channel.binding = Some(binding);
        }
        let physical = &mut self.physical[binding.physical];
        physical.set_owner(binding.slot, Some(owner));
        let messages = physical.assign(&params);
        debug!(
            player = %owner.player,
            channel = owner.channel,
            physical = binding.physical,
            slot = ?binding.slot,
            priority = params.priority,
            "Bound part."
        );
        self.emit(binding.physical, messages);
    }

    /// Takes a part out of its physical channel, silencing what it left
    /// sounding. A part left in the other slot gets its parameters back.
    fn unbind(&mut self, player_id: PlayerId, index: usize) {
        let Some(binding) = self
            .players
            .get_mut(player_id)
            .and_then(|player| player.channels.get_mut(index))
            .and_then(|channel| channel.binding.take())
        else {
            return;
        };
        let remaining = self.physical[binding.physical].owner(binding.slot.other());
        let restored = remaining.and_then(|owner| self.output_params(owner));

        let physical = &mut self.physical[binding.physical];
        physical.set_owner(binding.slot, None);
        let mut messages = physical.release_all(binding.slot);
        if let Some(params) = restored {
            messages.extend(physical.assign(&params));
        }
        debug!(
            player = %player_id,
            channel = index,
            physical = binding.physical,
            slot = ?binding.slot,
            "Released part."
        );
        self.emit(binding.physical, messages);
    }

    /// Like `sync_channel`, for updates that touch the keys of the part's own
    /// slot.
    fn sync_notes<F, M>(&mut self, player_id: PlayerId, index: usize, update: F)
    where
        F: FnOnce(&mut PhysicalChannel, Slot) -> M,
        M: IntoIterator<Item = MidiMessage>,
    {
        let Some(binding) = self
            .players
            .get(player_id)
            .and_then(|player| player.channels.get(index))
            .and_then(|channel| channel.binding)
        else {
            return;
        };
        let messages: Vec<MidiMessage> = update(&mut self.physical[binding.physical], binding.slot)
            .into_iter()
            .collect();
        self.emit(binding.physical, messages);
    }

    /// Applies `update` to the physical channel bound to a part, if any, and
    /// emits whatever it returns.
    fn sync_channel<F, M>(&mut self, player_id: PlayerId, index: usize, update: F)
    where
        F: FnOnce(&mut PhysicalChannel, &Player, &crate::channel::VirtualChannel) -> M,
        M: IntoIterator<Item = MidiMessage>,
    {
        let Some(player) = self.players.get(player_id) else {
            return;
        };
        let Some(channel) = player.channels.get(index) else {
            return;
        };
        let Some(binding) = channel.binding else {
            return;
        };
        let messages: Vec<MidiMessage> =
            update(&mut self.physical[binding.physical], player, channel)
                .into_iter()
                .collect();
        self.emit(binding.physical, messages);
    }
}

fn in_range(param: Param, value: i32, min: i32, max: i32) -> Result<i32, Error> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(Error::invalid_argument(format!(
            "{:?} value {} not in {}..={}",
            param, value, min, max
        )))
    }
}
