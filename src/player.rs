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
//! Players and the fixed-size pool they are allocated from.

use std::{fmt, sync::Arc};

use crate::{
    channel::{
        VirtualChannel, CHANNELS_PER_PLAYER, MAX_PRIORITY, MAX_VOLUME, PAN_CENTER, VOLUME_SHIFT,
    },
    cursor::SequenceCursor,
    error::Error,
    sequence::SoundId,
};

/// Group that new players join.
pub const DEFAULT_GROUP: usize = 3;

pub const MAX_DETUNE: i32 = 9216;
pub const MAX_TRANSPOSE: i32 = 12;

/// Stable handle of a player slot in the pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlayerId(pub usize);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One playing sequence.
pub struct Player {
    pub(crate) sound: SoundId,
    pub(crate) data: Arc<[u8]>,
    pub(crate) cursor: SequenceCursor,
    pub(crate) priority: u8,
    pub(crate) volume: u8,
    pub(crate) group: usize,
    pub(crate) group_volume: u8,
    pub(crate) pan: u8,
    pub(crate) detune: i32,
    pub(crate) transpose: i32,
    pub(crate) partner: Option<PlayerId>,
    pub(crate) marker: Option<u8>,
    pub(crate) hook: u8,
    pub(crate) channels: [VirtualChannel; CHANNELS_PER_PLAYER],
}

impl fmt::Debug for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Player")
            .field("sound", &self.sound)
            .field("priority", &self.priority)
            .field("volume", &self.volume)
            .field("group", &self.group)
            .field("tick", &self.cursor.tick())
            .field("partner", &self.partner)
            .finish()
    }
}

impl Player {
    /// Creates a player at full volume in the default group. The priority is
    /// clamped into range.
    pub fn new(
        sound: SoundId,
        data: Arc<[u8]>,
        cursor: SequenceCursor,
        priority: i32,
        group_volume: u8,
    ) -> Player {
        let priority = priority.clamp(0, i32::from(MAX_PRIORITY)) as u8;
        let group_volume = player_group_volume(MAX_VOLUME, group_volume);
        Player {
            sound,
            data,
            cursor,
            priority,
            volume: MAX_VOLUME,
            group: DEFAULT_GROUP,
            group_volume,
            pan: PAN_CENTER,
            detune: 0,
            transpose: 0,
            partner: None,
            marker: None,
            hook: 0,
            channels: std::array::from_fn(|_| VirtualChannel::new(priority, group_volume)),
        }
    }

    pub fn sound(&self) -> SoundId {
        self.sound
    }

    pub fn cursor(&self) -> &SequenceCursor {
        &self.cursor
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn group(&self) -> usize {
        self.group
    }

    pub fn group_volume(&self) -> u8 {
        self.group_volume
    }

    pub fn pan(&self) -> u8 {
        self.pan
    }

    pub fn partner(&self) -> Option<PlayerId> {
        self.partner
    }

    pub fn marker(&self) -> Option<u8> {
        self.marker
    }

    pub fn channel(&self, index: usize) -> Option<&VirtualChannel> {
        self.channels.get(index)
    }

    pub fn channels(&self) -> &[VirtualChannel] {
        &self.channels
    }

    /// Transposes a key, dropping results outside the MIDI key range.
    pub fn transpose_key(&self, key: u8) -> Option<u8> {
        u8::try_from(i32::from(key) + self.transpose)
            .ok()
            .filter(|key| *key < 128)
    }
}

/// Scales a player volume by the effective volume of its group.
pub fn player_group_volume(volume: u8, group_effective: u8) -> u8 {
    (((u32::from(volume) + 1) * u32::from(group_effective)) >> VOLUME_SHIFT) as u8
}

/// A fixed number of player slots plus the order players are serviced and
/// arbitrated in.
pub struct PlayerPool {
    slots: Vec<Option<Player>>,
    active: Vec<PlayerId>,
}

impl PlayerPool {
    pub fn new(capacity: usize) -> PlayerPool {
        PlayerPool {
            slots: (0..capacity).map(|_| None).collect(),
            active: Vec::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Places a player in the first free slot and puts it at the head of the
    /// active list.
    pub fn allocate(&mut self, player: Player) -> Result<PlayerId, Error> {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or_else(|| Error::ResourceExhausted("no free player slot".to_string()))?;
        self.slots[index] = Some(player);
        let id = PlayerId(index);
        self.active.insert(0, id);
        Ok(id)
    }

    /// Takes a player out of the pool.
    pub fn release(&mut self, id: PlayerId) -> Option<Player> {
        let player = self.slots.get_mut(id.0)?.take()?;
        self.active.retain(|active| *active != id);
        Some(player)
    }

    pub fn get(&self, id: PlayerId) -> Option<&Player> {
        self.slots.get(id.0)?.as_ref()
    }

    pub fn get_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.slots.get_mut(id.0)?.as_mut()
    }

    pub fn find(&self, sound: SoundId) -> Option<PlayerId> {
        self.active
            .iter()
            .copied()
            .find(|id| self.get(*id).is_some_and(|player| player.sound == sound))
    }

    /// Active players in list order.
    pub fn active(&self) -> &[PlayerId] {
        &self.active
    }

    pub fn iter(&self) -> impl Iterator<Item = (PlayerId, &Player)> {
        self.active
            .iter()
            .filter_map(|id| self.get(*id).map(|player| (*id, player)))
    }
}
