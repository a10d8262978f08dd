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
//! Virtual (per-player) and physical (output) channel state.
//!
//! Physical channels only track what has been sent to the device. Every setter
//! returns the message that has to go out, if any, and leaves the sending to
//! the engine.

use midly::{
    num::{u14, u7},
    MidiMessage, PitchBend,
};

use crate::player::PlayerId;

/// Virtual channels owned by every player.
pub const CHANNELS_PER_PLAYER: usize = 16;

/// Largest physical pool: one per MIDI channel.
pub const MAX_PHYSICAL_CHANNELS: usize = 16;

pub const MAX_VOLUME: u8 = 127;
pub const MAX_PRIORITY: u8 = 127;
pub const PAN_CENTER: u8 = 64;

/// Right shift that brings the product of two volumes back into volume range.
pub const VOLUME_SHIFT: u32 = 7;

/// Output channel count of a freshly set up part. Scales pitch bend.
pub const DEFAULT_OUTPUT_CHANNELS: i32 = 2;

/// Centre of the 14-bit pitch bend range.
pub const PITCH_BEND_CENTER: i32 = 0x2000;

pub const CC_MODULATION: u8 = 1;
pub const CC_VOLUME: u8 = 7;
pub const CC_PAN: u8 = 10;
pub const CC_PRIORITY: u8 = 16;
pub const CC_NOTE_REQUEST: u8 = 17;
pub const CC_SUSTAIN: u8 = 64;
pub const CC_RESET_CONTROLLERS: u8 = 121;
pub const CC_ALL_NOTES_OFF: u8 = 123;

/// Which of the two owners of a physical channel a virtual channel occupies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Slot {
    Primary,
    Shared,
}

impl Slot {
    pub fn other(self) -> Slot {
        match self {
            Slot::Primary => Slot::Shared,
            Slot::Shared => Slot::Primary,
        }
    }

    fn index(self) -> usize {
        match self {
            Slot::Primary => 0,
            Slot::Shared => 1,
        }
    }
}

/// A virtual channel's hold on a physical channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Binding {
    pub physical: usize,
    pub slot: Slot,
}

/// The virtual channel that holds a physical channel slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Owner {
    pub player: PlayerId,
    pub channel: usize,
}

/// One logical channel of a player.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VirtualChannel {
    pub(crate) enabled: bool,
    pub(crate) program: Option<u8>,
    pub(crate) trim: u8,
    pub(crate) priority_offset: i8,
    pub(crate) priority: u8,
    pub(crate) note_request: u8,
    pub(crate) volume: u8,
    pub(crate) group_volume: u8,
    pub(crate) pan: u8,
    pub(crate) modulation: u8,
    pub(crate) sustain: bool,
    pub(crate) pitch_bend: i32,
    pub(crate) output_channels: i32,
    pub(crate) binding: Option<Binding>,
}

impl VirtualChannel {
    /// A disabled part at full volume with the player's priority.
    pub fn new(player_priority: u8, player_group_volume: u8) -> VirtualChannel {
        VirtualChannel {
            enabled: false,
            program: None,
            trim: MAX_VOLUME,
            priority_offset: 0,
            priority: player_priority,
            note_request: 1,
            volume: MAX_VOLUME,
            group_volume: player_group_volume,
            pan: PAN_CENTER,
            modulation: 0,
            sustain: false,
            pitch_bend: 0,
            output_channels: DEFAULT_OUTPUT_CHANNELS,
            binding: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn binding(&self) -> Option<Binding> {
        self.binding
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn program(&self) -> Option<u8> {
        self.program
    }

    pub fn trim(&self) -> u8 {
        self.trim
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn group_volume(&self) -> u8 {
        self.group_volume
    }

    pub fn pan(&self) -> u8 {
        self.pan
    }

    pub fn sustain(&self) -> bool {
        self.sustain
    }

    /// Whether the part may compete for a physical channel given the owning
    /// player's group volume.
    pub fn is_eligible(&self, player_group_volume: u8) -> bool {
        self.enabled
            && self.note_request != 0
            && player_group_volume != 0
            && self.trim != 0
            && self.volume != 0
    }

    /// Recomputes the effective priority from the player's priority and the
    /// part's signed offset.
    pub fn update_priority(&mut self, player_priority: u8) {
        let priority = i32::from(player_priority) + i32::from(self.priority_offset);
        self.priority = priority.clamp(0, i32::from(MAX_PRIORITY)) as u8;
    }

    /// Recomputes the volume that reaches the device from part volume, trim
    /// and the player's group volume.
    pub fn update_group_volume(&mut self, player_group_volume: u8) {
        let volume = (u32::from(self.volume) + 1)
            * (u32::from(self.trim) + 1)
            * u32::from(player_group_volume);
        self.group_volume = (volume >> (2 * VOLUME_SHIFT)) as u8;
    }

    /// Stores a 14-bit bend value scaled by the output channel count.
    pub fn set_pitch_bend(&mut self, value: u16) {
        let bend = i32::from(value) - PITCH_BEND_CENTER;
        self.pitch_bend = (self.output_channels * bend) >> 5;
    }

    /// Pitch offset in the units carried by the physical channel.
    pub fn pitch(&self, detune: i32) -> i32 {
        detune + self.pitch_bend
    }

    /// Sustain, modulation and pitch bend back to neutral.
    pub fn reset_performance(&mut self) {
        self.sustain = false;
        self.modulation = 0;
        self.pitch_bend = 0;
    }
}

/// Reinterprets a 7-bit value as a signed offset.
pub fn signed_offset(value: u8) -> i8 {
    (((value & 0x7F) << 1) as i8) >> 1
}

/// Combines a part pan with the player pan around the centre.
pub fn output_pan(part_pan: u8, player_pan: u8) -> u8 {
    let pan = i32::from(part_pan) + i32::from(player_pan) - i32::from(PAN_CENTER);
    pan.clamp(0, 127) as u8
}

/// One output channel of the device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhysicalChannel {
    primary: Option<Owner>,
    shared: Option<Owner>,
    program: Option<u8>,
    priority: u8,
    note_request: u8,
    volume: u8,
    pan: u8,
    modulation: u8,
    pitch: i32,
    sustain: bool,
    /// Sounding keys per slot.
    notes: [u128; 2],
    /// Keys released under the pedal per slot.
    sustained: [u128; 2],
}

impl Default for PhysicalChannel {
    fn default() -> Self {
        PhysicalChannel::new()
    }
}

impl PhysicalChannel {
    pub fn new() -> PhysicalChannel {
        PhysicalChannel {
            primary: None,
            shared: None,
            program: None,
            priority: 0,
            note_request: 0,
            volume: 0,
            pan: PAN_CENTER,
            modulation: 0,
            pitch: 0,
            sustain: false,
            notes: [0; 2],
            sustained: [0; 2],
        }
    }

    /// Free only when neither slot is held.
    pub fn is_free(&self) -> bool {
        self.primary.is_none() && self.shared.is_none()
    }

    pub fn owner(&self, slot: Slot) -> Option<Owner> {
        match slot {
            Slot::Primary => self.primary,
            Slot::Shared => self.shared,
        }
    }

    pub(crate) fn set_owner(&mut self, slot: Slot, owner: Option<Owner>) {
        match slot {
            Slot::Primary => self.primary = owner,
            Slot::Shared => self.shared = owner,
        }
    }

    /// Keys currently sounding in either slot, one bit per key.
    pub fn notes(&self) -> u128 {
        self.notes[0] | self.notes[1]
    }

    /// Keys released while the pedal was down, in either slot.
    pub fn sustained(&self) -> u128 {
        self.sustained[0] | self.sustained[1]
    }

    /// Keys sounding for the part in `slot`.
    pub fn slot_notes(&self, slot: Slot) -> u128 {
        self.notes[slot.index()]
    }

    pub fn slot_sustained(&self, slot: Slot) -> u128 {
        self.sustained[slot.index()]
    }

    pub fn is_sounding(&self, key: u8) -> bool {
        self.notes() & key_bit(key) != 0
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn pan(&self) -> u8 {
        self.pan
    }

    pub fn program(&self) -> Option<u8> {
        self.program
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn pitch(&self) -> i32 {
        self.pitch
    }

    pub fn note_on(&mut self, slot: Slot, key: u8, vel: u8) -> MidiMessage {
        let slot = slot.index();
        self.notes[slot] |= key_bit(key);
        self.sustained[slot] &= !key_bit(key);
        MidiMessage::NoteOn {
            key: u7::from(key),
            vel: u7::from(vel),
        }
    }

    /// Releases a key. With the pedal down the key is only marked sustained.
    pub fn note_off(&mut self, slot: Slot, key: u8) -> Option<MidiMessage> {
        let index = slot.index();
        if self.notes[index] & key_bit(key) == 0 {
            return None;
        }
        self.notes[index] &= !key_bit(key);
        if self.sustain {
            self.sustained[index] |= key_bit(key);
            return None;
        }
        self.off_unless_held(slot, key)
    }

    /// Silences a key of one slot regardless of the pedal.
    pub fn force_off(&mut self, slot: Slot, key: u8) -> Option<MidiMessage> {
        let index = slot.index();
        let bit = key_bit(key);
        if (self.notes[index] | self.sustained[index]) & bit == 0 {
            return None;
        }
        self.notes[index] &= !bit;
        self.sustained[index] &= !bit;
        self.off_unless_held(slot, key)
    }

    /// Note offs for every key the slot has sounding or sustained. Clears
    /// both of its masks; the other slot keeps its keys.
    pub fn release_all(&mut self, slot: Slot) -> Vec<MidiMessage> {
        let index = slot.index();
        let keys = self.notes[index] | self.sustained[index];
        self.notes[index] = 0;
        self.sustained[index] = 0;
        (0..128u8)
            .filter(|key| keys & key_bit(*key) != 0)
            .filter_map(|key| self.off_unless_held(slot, key))
            .collect()
    }

    /// Silences everything the slot holds. An unshared channel gets a single
    /// all-notes-off; with the other slot taken only this slot's keys are
    /// released.
    pub fn all_notes_off(&mut self, slot: Slot) -> Vec<MidiMessage> {
        if self.owner(slot.other()).is_some() {
            return self.release_all(slot);
        }
        self.notes = [0; 2];
        self.sustained = [0; 2];
        vec![controller(CC_ALL_NOTES_OFF, 0)]
    }

    /// A note off for `key`, unless the other slot still has it sounding.
    fn off_unless_held(&self, slot: Slot, key: u8) -> Option<MidiMessage> {
        let other = slot.other().index();
        ((self.notes[other] | self.sustained[other]) & key_bit(key) == 0).then(|| note_off(key))
    }

    pub fn set_program(&mut self, program: Option<u8>) -> Option<MidiMessage> {
        if program == self.program {
            return None;
        }
        self.program = program;
        program.map(program_change)
    }

    pub fn set_priority(&mut self, priority: u8) -> Option<MidiMessage> {
        (priority != self.priority).then(|| {
            self.priority = priority;
            controller(CC_PRIORITY, priority)
        })
    }

    pub fn set_note_request(&mut self, note_request: u8) -> Option<MidiMessage> {
        (note_request != self.note_request).then(|| {
            self.note_request = note_request;
            controller(CC_NOTE_REQUEST, note_request)
        })
    }

    pub fn set_volume(&mut self, volume: u8) -> Option<MidiMessage> {
        (volume != self.volume).then(|| {
            self.volume = volume;
            controller(CC_VOLUME, volume)
        })
    }

    pub fn set_pan(&mut self, pan: u8) -> Option<MidiMessage> {
        (pan != self.pan).then(|| {
            self.pan = pan;
            controller(CC_PAN, pan)
        })
    }

    pub fn set_modulation(&mut self, modulation: u8) -> Option<MidiMessage> {
        (modulation != self.modulation).then(|| {
            self.modulation = modulation;
            controller(CC_MODULATION, modulation)
        })
    }

    pub fn set_pitch(&mut self, pitch: i32) -> Option<MidiMessage> {
        (pitch != self.pitch).then(|| {
            self.pitch = pitch;
            pitch_message(pitch)
        })
    }

    /// Sets the pedal. It acts on the whole channel, so lifting it releases
    /// the sustained keys of both slots.
    pub fn set_sustain(&mut self, sustain: bool) -> Vec<MidiMessage> {
        let mut messages = Vec::new();
        if sustain != self.sustain {
            messages.push(controller(CC_SUSTAIN, if sustain { 127 } else { 0 }));
        }
        self.sustain = sustain;
        if !sustain {
            let keys = self.sustained() & !self.notes();
            self.sustained = [0; 2];
            messages.extend(
                (0..128u8)
                    .filter(|key| keys & key_bit(*key) != 0)
                    .map(note_off),
            );
        }
        messages
    }

    /// Takes on every parameter of a newly bound part and returns the whole
    /// set, whether or not it changed.
    pub fn assign(&mut self, params: &OutputParams) -> Vec<MidiMessage> {
        self.program = params.program;
        self.priority = params.priority;
        self.note_request = params.note_request;
        self.volume = params.volume;
        self.pan = params.pan;
        self.modulation = params.modulation;
        self.pitch = params.pitch;
        self.sustain = params.sustain;

        let mut messages = Vec::with_capacity(8);
        messages.extend(params.program.map(program_change));
        messages.push(controller(CC_PRIORITY, params.priority));
        messages.push(controller(CC_NOTE_REQUEST, params.note_request));
        messages.push(controller(CC_VOLUME, params.volume));
        messages.push(controller(CC_PAN, params.pan));
        messages.push(controller(CC_MODULATION, params.modulation));
        messages.push(pitch_message(params.pitch));
        messages.push(controller(
            CC_SUSTAIN,
            if params.sustain { 127 } else { 0 },
        ));
        messages
    }
}

/// Everything a physical channel mirrors from the part bound to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputParams {
    pub program: Option<u8>,
    pub priority: u8,
    pub note_request: u8,
    pub volume: u8,
    pub pan: u8,
    pub modulation: u8,
    pub pitch: i32,
    pub sustain: bool,
}

fn key_bit(key: u8) -> u128 {
    1u128 << (key & 0x7F)
}

pub fn controller(controller: u8, value: u8) -> MidiMessage {
    MidiMessage::Controller {
        controller: u7::from(controller),
        value: u7::from(value.min(127)),
    }
}

pub fn note_off(key: u8) -> MidiMessage {
    MidiMessage::NoteOff {
        key: u7::from(key),
        vel: u7::from(0),
    }
}

fn program_change(program: u8) -> MidiMessage {
    MidiMessage::ProgramChange {
        program: u7::from(program),
    }
}

/// Encodes a pitch offset as a 14-bit bend around the centre.
pub fn pitch_message(pitch: i32) -> MidiMessage {
    let value = (2 * pitch + PITCH_BEND_CENTER).clamp(0, 0x3FFF);
    MidiMessage::PitchBend {
        bend: PitchBend(u14::from(value as u16)),
    }
}
