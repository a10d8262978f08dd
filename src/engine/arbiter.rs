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
//! Assignment of parts to the physical channel pool.
//!
//! A bound part that is no longer eligible gives its channel back first. A
//! pass then scans the active players in list order and every part by index.
//! Bound parts may pull their shared partner into the other slot of their
//! physical channel. The strongest unbound eligible part is bound to a free
//! physical channel once the scan reaches the end of the list, and the scan
//! starts over. A pass stops when nothing is pending or nothing is free. Bound
//! parts are never displaced.

use tracing::debug;

use super::Engine;
use crate::{
    channel::{Binding, Owner, Slot, CHANNELS_PER_PLAYER},
    player::PlayerId,
};

/// A part remembered during a scan.
#[derive(Clone, Copy, Debug)]
struct Candidate {
    owner: Owner,
    priority: u8,
}

impl Engine {
    /// Runs arbitration to a fixed point.
    pub(crate) fn arbitrate(&mut self) {
        self.release_ineligible();
        loop {
            let mut strongest_bound: Option<Candidate> = None;
            let mut pending: Option<Candidate> = None;

            for player_id in self.players.active().to_vec() {
                for index in 0..CHANNELS_PER_PLAYER {
                    self.share_with_partner(player_id, index);

                    let Some(player) = self.players.get(player_id) else {
                        continue;
                    };
                    let channel = &player.channels[index];
                    let candidate = Candidate {
                        owner: Owner {
                            player: player_id,
                            channel: index,
                        },
                        priority: channel.priority,
                    };

                    if channel.binding.is_some() {
                        let outranked_by_partner = player
                            .partner
                            .and_then(|partner| self.players.get(partner))
                            .map(|partner| &partner.channels[index])
                            .is_some_and(|shared| {
                                shared.binding.is_some() && shared.priority > channel.priority
                            });
                        if outranked_by_partner {
                            continue;
                        }
                        if strongest_bound.is_none_or(|c| channel.priority > c.priority) {
                            strongest_bound = Some(candidate);
                        }
                    } else if channel.is_eligible(player.group_volume)
                        && pending.is_none_or(|c| channel.priority > c.priority)
                    {
                        pending = Some(candidate);
                    }
                }
            }

            let Some(pending) = pending else {
                return;
            };
            let Some(physical) = self.physical.iter().position(|p| p.is_free()) else {
                debug!(
                    player = %pending.owner.player,
                    channel = pending.owner.channel,
                    priority = pending.priority,
                    strongest_bound = strongest_bound.map(|c| c.priority),
                    "No free physical channel, part stays unbound."
                );
                return;
            };
            self.bind(
                pending.owner,
                Binding {
                    physical,
                    slot: Slot::Primary,
                },
            );
        }
    }

    /// Unbinds every bound part that is no longer eligible.
    fn release_ineligible(&mut self) {
        for player_id in self.players.active().to_vec() {
            for index in 0..CHANNELS_PER_PLAYER {
                let Some(player) = self.players.get(player_id) else {
                    continue;
                };
                let channel = &player.channels[index];
                if channel.binding.is_some() && !channel.is_eligible(player.group_volume) {
                    self.unbind(player_id, index);
                }
            }
        }
    }

    /// Fills the other slot of a bound part's physical channel with the
    /// partner's part on the same index.
    ///
    /// Each direction checks its own side: pulling the partner in requires
    /// the partner part to be eligible under the partner's group volume, and
    /// joining the partner requires this part to be eligible under this
    /// player's group volume.
    fn share_with_partner(&mut self, player_id: PlayerId, index: usize) {
        let Some(player) = self.players.get(player_id) else {
            return;
        };
        let Some(partner_id) = player.partner else {
            return;
        };
        let Some(partner) = self.players.get(partner_id) else {
            return;
        };
        let channel = &player.channels[index];
        let shared = &partner.channels[index];

        let (owner, binding) = match (channel.binding, shared.binding) {
            (Some(binding), None) if shared.is_eligible(partner.group_volume) =>
            {
                (
                    Owner {
                        player: partner_id,
                        channel: index,
                    },
                    binding,
                )
            }
            (None, Some(binding)) if channel.is_eligible(player.group_volume) =>
            {
                (
                    Owner {
                        player: player_id,
                        channel: index,
                    },
                    binding,
                )
            }
            _ => return,
        };

        let slot = binding.slot.other();
        if self.physical[binding.physical].owner(slot).is_some() {
            return;
        }
        self.bind(
            owner,
            Binding {
                physical: binding.physical,
                slot,
            },
        );
    }
}
