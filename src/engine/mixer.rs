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
//! Group volumes and the cascade from groups to players to channels.

use tracing::{debug, info};

use super::Engine;
use crate::{
    channel::{CHANNELS_PER_PLAYER, MAX_VOLUME, VOLUME_SHIFT},
    error::Error,
    player::{player_group_volume, PlayerId},
};

pub const GROUP_COUNT: usize = 16;
pub const MASTER_GROUP: usize = 0;
pub const SFX_GROUP: usize = 1;
pub const VOICE_GROUP: usize = 2;
pub const MUSIC_GROUP: usize = 3;

/// Stored and effective volume of every group. The effective volume of the
/// master group is its stored volume; every other group is scaled by it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Groups {
    stored: [u8; GROUP_COUNT],
    effective: [u8; GROUP_COUNT],
}

impl Default for Groups {
    fn default() -> Self {
        Groups::new()
    }
}

impl Groups {
    pub fn new() -> Groups {
        Groups {
            stored: [MAX_VOLUME; GROUP_COUNT],
            effective: [MAX_VOLUME; GROUP_COUNT],
        }
    }

    /// Sets a group's volume and returns the previous stored value.
    pub fn set(&mut self, group: usize, volume: u8) -> Result<u8, Error> {
        validate(group, i32::from(volume))?;
        let previous = self.stored[group];
        self.stored[group] = volume;
        if group == MASTER_GROUP {
            self.effective[MASTER_GROUP] = volume;
            for other in 1..GROUP_COUNT {
                self.effective[other] = scale(self.stored[other], volume);
            }
        } else {
            self.effective[group] = scale(volume, self.stored[MASTER_GROUP]);
        }
        Ok(previous)
    }

    pub fn stored(&self, group: usize) -> u8 {
        self.stored.get(group).copied().unwrap_or(0)
    }

    pub fn effective(&self, group: usize) -> u8 {
        self.effective.get(group).copied().unwrap_or(0)
    }
}

fn scale(volume: u8, master: u8) -> u8 {
    (((u32::from(volume) + 1) * u32::from(master)) >> VOLUME_SHIFT) as u8
}

fn validate(group: usize, volume: i32) -> Result<(), Error> {
    if group >= GROUP_COUNT {
        return Err(Error::invalid_argument(format!(
            "group {} not below {}",
            group, GROUP_COUNT
        )));
    }
    if !(0..=i32::from(MAX_VOLUME)).contains(&volume) {
        return Err(Error::invalid_argument(format!(
            "volume {} not in 0..={}",
            volume, MAX_VOLUME
        )));
    }
    Ok(())
}

impl Engine {
    /// Sets a group volume, cascades it to every player and channel and
    /// returns the previous stored value.
    pub fn set_group_volume(&mut self, group: usize, volume: i32) -> Result<u8, Error> {
        validate(group, volume)?;
        let previous = self.groups.set(group, volume as u8)?;
        info!(group, volume, previous, "Set group volume.");

        for player_id in self.players.active().to_vec() {
            self.refresh_player_volume(player_id);
        }
        self.arbitrate();
        Ok(previous)
    }

    /// The stored volume of a group.
    pub fn group_volume(&self, group: usize) -> Result<u8, Error> {
        validate(group, 0)?;
        Ok(self.groups.stored(group))
    }

    /// The volume a group actually plays at after the master is applied.
    pub fn effective_group_volume(&self, group: usize) -> Result<u8, Error> {
        validate(group, 0)?;
        Ok(self.groups.effective(group))
    }

    /// Recomputes a player's group volume and every channel volume under it.
    /// Does not arbitrate.
    pub(crate) fn refresh_player_volume(&mut self, player_id: PlayerId) {
        let Some(player) = self.players.get_mut(player_id) else {
            return;
        };
        player.group_volume =
            player_group_volume(player.volume, self.groups.effective(player.group));
        for index in 0..CHANNELS_PER_PLAYER {
            self.apply_channel_volume(player_id, index);
        }
    }

    /// Recomputes one channel's volume and arbitrates.
    pub(crate) fn update_channel_volume(&mut self, player_id: PlayerId, index: usize) {
        self.apply_channel_volume(player_id, index);
        self.arbitrate();
    }

    /// Recomputes one channel's volume. A channel that ends up silent gives up
    /// its physical channel; a bound one gets the new volume.
    fn apply_channel_volume(&mut self, player_id: PlayerId, index: usize) {
        let Some(player) = self.players.get_mut(player_id) else {
            return;
        };
        let player_volume = player.group_volume;
        let Some(channel) = player.channels.get_mut(index) else {
            return;
        };
        channel.update_group_volume(player_volume);

        if player_volume == 0 || channel.trim == 0 || channel.volume == 0 {
            if channel.binding.is_some() {
                debug!(player = %player_id, channel = index, "Releasing silent part.");
                self.unbind(player_id, index);
            }
        } else {
            self.sync_channel(player_id, index, |physical, _, channel| {
                physical.set_volume(channel.group_volume)
            });
        }
    }
}
