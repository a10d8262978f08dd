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
//! Executes sequence events against players and their physical channels.

use midly::{num::u4, MidiMessage};
use tracing::{debug, warn};

use super::{Engine, EngineEvent};
use crate::{
    channel::{
        controller, output_pan, signed_offset, CC_ALL_NOTES_OFF, CC_MODULATION, CC_NOTE_REQUEST,
        CC_PAN, CC_PRIORITY, CC_RESET_CONTROLLERS, CC_SUSTAIN, CC_VOLUME, MAX_VOLUME,
    },
    cursor::SequenceCursor,
    player::PlayerId,
    sequence::{
        reader::{META_END_OF_TRACK, META_TEMPO, META_TIME_SIGNATURE},
        EventSink, Flow,
    },
};

/// Manufacturer id of engine-specific system messages.
pub(crate) const SYSEX_ID: u8 = 0x7D;

const SYSEX_PART_SETUP: u8 = 0x00;
const SYSEX_MARKER: u8 = 0x01;

/// Event sink used during normal playback of one player.
pub(crate) struct Playback<'a> {
    engine: &'a mut Engine,
    player: PlayerId,
    ended: bool,
}

impl<'a> Playback<'a> {
    pub(crate) fn new(engine: &'a mut Engine, player: PlayerId) -> Playback<'a> {
        Playback {
            engine,
            player,
            ended: false,
        }
    }

    /// Whether the end of track was reached.
    pub(crate) fn ended(&self) -> bool {
        self.ended
    }
}

impl EventSink for Playback<'_> {
    fn channel_message(
        &mut self,
        _cursor: &mut SequenceCursor,
        channel: u4,
        message: MidiMessage,
    ) -> Flow {
        self.engine
            .channel_message(self.player, usize::from(channel.as_int()), message);
        Flow::Continue
    }

    fn system(&mut self, _cursor: &mut SequenceCursor, payload: &[u8]) -> Flow {
        self.engine.system_message(self.player, payload);
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

/// Applies tempo and time signature changes to a cursor. Other meta events
/// are ignored.
pub(crate) fn apply_timing_meta(cursor: &mut SequenceCursor, kind: u8, payload: &[u8]) {
    match kind {
        META_TEMPO => {
            if let [a, b, c] = payload {
                let tempo = u32::from_be_bytes([0, *a, *b, *c]);
                cursor.clock_mut().set_tempo(tempo);
                debug!(tempo, "Tempo change.");
            }
        }
        META_TIME_SIGNATURE => {
            if let Some(numerator) = payload.first() {
                let ticks_per_beat = cursor.ticks_per_beat();
                if !cursor.set_meter(ticks_per_beat, u32::from(*numerator)) {
                    debug!(numerator, "Ignoring unsupported time signature.");
                }
            }
        }
        _ => {}
    }
}

impl Engine {
    /// Applies one channel message to a player's part.
    pub(crate) fn channel_message(
        &mut self,
        player_id: PlayerId,
        index: usize,
        message: MidiMessage,
    ) {
        let Some(channel) = self
            .players
            .get_mut(player_id)
            .and_then(|player| player.channels.get_mut(index))
        else {
            return;
        };
        if !channel.enabled {
            channel.enabled = true;
            self.arbitrate();
        }

        match message {
            MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                self.note_on(player_id, index, key.as_int(), vel.as_int())
            }
            MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                self.note_off(player_id, index, key.as_int())
            }
            MidiMessage::Controller { controller, value } => {
                self.control_change(player_id, index, controller.as_int(), value.as_int())
            }
            MidiMessage::ProgramChange { program } => {
                let program = Some(program.as_int());
                if let Some(channel) = self.channel_mut(player_id, index) {
                    channel.program = program;
                }
                self.sync_channel(player_id, index, |physical, _, _| {
                    physical.set_program(program)
                });
            }
            MidiMessage::PitchBend { bend } => {
                if let Some(channel) = self.channel_mut(player_id, index) {
                    channel.set_pitch_bend(bend.0.as_int());
                }
                self.sync_channel(player_id, index, |physical, player, channel| {
                    physical.set_pitch(channel.pitch(player.detune))
                });
            }
            MidiMessage::Aftertouch { .. } | MidiMessage::ChannelAftertouch { .. } => {}
        }
    }

    fn note_on(&mut self, player_id: PlayerId, index: usize, key: u8, vel: u8) {
        let Some(key) = self.players.get(player_id).and_then(|p| p.transpose_key(key)) else {
            return;
        };
        self.sync_notes(player_id, index, |physical, slot| {
            Some(physical.note_on(slot, key, vel))
        });
    }

    fn note_off(&mut self, player_id: PlayerId, index: usize, key: u8) {
        let Some(key) = self.players.get(player_id).and_then(|p| p.transpose_key(key)) else {
            return;
        };
        self.sync_notes(player_id, index, |physical, slot| physical.note_off(slot, key));
    }

    fn control_change(&mut self, player_id: PlayerId, index: usize, number: u8, value: u8) {
        match number {
            CC_MODULATION => {
                if let Some(channel) = self.channel_mut(player_id, index) {
                    channel.modulation = value;
                }
                self.sync_channel(player_id, index, |physical, _, _| {
                    physical.set_modulation(value)
                });
            }
            CC_VOLUME => {
                if let Some(channel) = self.channel_mut(player_id, index) {
                    channel.volume = value;
                }
                self.update_channel_volume(player_id, index);
            }
            CC_PAN => {
                if let Some(channel) = self.channel_mut(player_id, index) {
                    channel.pan = value;
                }
                self.sync_channel(player_id, index, |physical, player, channel| {
                    physical.set_pan(output_pan(channel.pan, player.pan))
                });
            }
            CC_PRIORITY => {
                if let Some(player) = self.players.get_mut(player_id) {
                    let priority = player.priority;
                    if let Some(channel) = player.channels.get_mut(index) {
                        channel.priority_offset = signed_offset(value);
                        channel.update_priority(priority);
                    }
                }
                self.sync_channel(player_id, index, |physical, _, channel| {
                    physical.set_priority(channel.priority)
                });
                self.arbitrate();
            }
            CC_NOTE_REQUEST => {
                if let Some(channel) = self.channel_mut(player_id, index) {
                    channel.note_request = value;
                }
                self.sync_channel(player_id, index, |physical, _, _| {
                    physical.set_note_request(value)
                });
                self.arbitrate();
            }
            CC_SUSTAIN => {
                let sustain = value >= 64;
                if let Some(channel) = self.channel_mut(player_id, index) {
                    channel.sustain = sustain;
                }
                self.sync_channel(player_id, index, |physical, _, _| {
                    physical.set_sustain(sustain)
                });
            }
            CC_RESET_CONTROLLERS => {
                if let Some(channel) = self.channel_mut(player_id, index) {
                    channel.reset_performance();
                }
                self.reset_physical_performance(player_id, index);
            }
            CC_ALL_NOTES_OFF => {
                self.sync_notes(player_id, index, |physical, slot| physical.all_notes_off(slot));
            }
            _ => {
                self.sync_channel(player_id, index, |_, _, _| Some(controller(number, value)));
            }
        }
    }

    /// Brings sustain, modulation and pitch of a bound physical channel back
    /// to the part's neutral state.
    pub(crate) fn reset_physical_performance(&mut self, player_id: PlayerId, index: usize) {
        self.sync_channel(player_id, index, |physical, player, channel| {
            let mut messages = physical.set_sustain(false);
            messages.extend(physical.set_modulation(0));
            messages.extend(physical.set_pitch(channel.pitch(player.detune)));
            messages
        });
    }

    /// Handles engine-specific system messages. Foreign payloads are skipped.
    pub(crate) fn system_message(&mut self, player_id: PlayerId, payload: &[u8]) {
        match payload {
            [SYSEX_ID, SYSEX_PART_SETUP, channel, enabled, priority, trim, program, ..] => {
                self.part_setup(
                    player_id,
                    usize::from(channel & 0x0F),
                    *enabled != 0,
                    *priority,
                    *trim,
                    *program,
                );
            }
            [SYSEX_ID, SYSEX_MARKER, marker, ..] => {
                let Some(player) = self.players.get_mut(player_id) else {
                    return;
                };
                player.marker = Some(*marker);
                let sound = player.sound;
                debug!(sound = %sound, marker, "Marker.");
                self.notify(EngineEvent::Marker(sound, *marker));
            }
            [SYSEX_ID, ..] => {
                warn!(player = %player_id, bytes = payload.len(), "Malformed engine system message.");
            }
            _ => {}
        }
    }

    fn part_setup(
        &mut self,
        player_id: PlayerId,
        index: usize,
        enabled: bool,
        priority: u8,
        trim: u8,
        program: u8,
    ) {
        let Some(player) = self.players.get_mut(player_id) else {
            return;
        };
        let player_priority = player.priority;
        let Some(channel) = player.channels.get_mut(index) else {
            return;
        };
        channel.enabled = enabled;
        channel.priority_offset = signed_offset(priority);
        channel.update_priority(player_priority);
        channel.trim = trim.min(MAX_VOLUME);
        channel.program = (program < 128).then_some(program);
        let program = channel.program;
        debug!(player = %player_id, channel = index, enabled, trim, "Part setup.");

        if !enabled {
            self.unbind(player_id, index);
        }
        self.sync_channel(player_id, index, |physical, _, channel| {
            let mut messages = Vec::new();
            messages.extend(physical.set_program(program));
            messages.extend(physical.set_priority(channel.priority));
            messages
        });
        self.update_channel_volume(player_id, index);
    }

    pub(crate) fn channel_mut(
        &mut self,
        player_id: PlayerId,
        index: usize,
    ) -> Option<&mut crate::channel::VirtualChannel> {
        self.players
            .get_mut(player_id)
            .and_then(|player| player.channels.get_mut(index))
    }
}
