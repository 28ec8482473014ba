//! Turning an accepted proposal into a real party and moving it in

use super::manager::LfgManager;
use super::proposal::Proposal;
use crate::types::{GroupId, LfgEvent, LfgState, PlayerId, Roles, TeleportError};
use crate::world::World;
use tracing::{debug, error};

impl<W: World> LfgManager<W> {
    /// Create or refill the dungeon group for an accepted proposal
    ///
    /// Members join leader first, then tanks, healers and damage dealers.
    pub(super) fn make_new_group(&mut self, proposal: &Proposal) {
        let Some(dungeon) = self.catalog.get_dungeon(proposal.dungeon_id).cloned() else {
            error!(
                "Proposal {} references unknown dungeon {}",
                proposal.id, proposal.dungeon_id
            );
            return;
        };

        let mut ordered: Vec<PlayerId> = Vec::with_capacity(proposal.players.len());
        let mut tanks = Vec::new();
        let mut healers = Vec::new();
        let mut damage = Vec::new();
        let mut to_teleport = Vec::new();

        for (player, member) in &proposal.players {
            let role = member.role.combat();
            if *player == proposal.leader {
                ordered.push(*player);
            } else if role == Roles::TANK {
                tanks.push(*player);
            } else if role == Roles::HEALER {
                healers.push(*player);
            } else if role == Roles::DAMAGE {
                damage.push(*player);
            } else {
                unreachable!("{} was matched with invalid role {}", player, member.role);
            }

            let current = self.world.player(*player).and_then(|p| p.group);
            if proposal.is_new || current != proposal.group {
                to_teleport.push(*player);
            }
        }
        ordered.extend(tanks);
        ordered.extend(healers);
        ordered.extend(damage);

        let mut group: Option<GroupId> = proposal
            .group
            .filter(|existing| self.world.group(*existing).is_some());

        for player in ordered {
            let Some(snapshot) = self.world.player(player).filter(|p| p.online) else {
                continue;
            };

            if let Some(old) = snapshot.group.filter(|old| Some(*old) != group) {
                self.world.remove_member(old, player);
                self.store.remove_player_from_group(old, player);
                if self.world.group(old).is_none() {
                    self.remove_group_data(old);
                }
            }

            let target = match group {
                Some(existing) => {
                    if snapshot.group != Some(existing) {
                        self.world.add_member(existing, player);
                    }
                    existing
                }
                None => {
                    let created = self.world.create_lfg_group(player);
                    let data = self.store.group_entry(created);
                    data.is_lfg = true;
                    self.store.set_leader(created, player);
                    self.store.set_state(created.into(), LfgState::Proposal);
                    group = Some(created);
                    created
                }
            };
            self.store.add_player_to_group(target, player);

            let role = proposal.players.get(&player).map(|p| p.role).unwrap_or_default();
            self.world.set_roles(target, player, role);

            let random_selected = self
                .store
                .selected_dungeons(player)
                .first()
                .and_then(|id| self.catalog.get_dungeon(*id))
                .is_some_and(|selected| selected.is_random());
            if random_selected {
                self.world.apply_random_cooldown(player);
            }
        }

        let Some(group) = group else {
            error!("Proposal {} formed no group, every member is offline", proposal.id);
            return;
        };

        self.world.set_dungeon_difficulty(group, dungeon.difficulty);
        self.store.set_group_dungeon(group, dungeon.id);
        self.store.set_state(group.into(), LfgState::Dungeon);
        self.save_group_data(group);

        for player in to_teleport {
            let _ = self.teleport_player(player, false, false);
        }
    }

    /// Move a player into or out of their group's dungeon
    ///
    /// Unless the request came from the player, someone from the group who is
    /// already inside is used as the arrival point.
    pub fn teleport_player(
        &mut self,
        player: PlayerId,
        out: bool,
        from_opcode: bool,
    ) -> Result<(), TeleportError> {
        let result = self.try_teleport(player, out, from_opcode);
        if let Err(error) = result {
            debug!("Teleport of {} failed: {:?}", player, error);
            self.emit(LfgEvent::TeleportFailed {
                recipient: player,
                error,
            });
        }
        result
    }

    fn try_teleport(
        &mut self,
        player: PlayerId,
        out: bool,
        from_opcode: bool,
    ) -> Result<(), TeleportError> {
        let snapshot = self
            .world
            .player(player)
            .ok_or(TeleportError::InvalidLocation)?;
        let group = snapshot
            .group
            .and_then(|id| self.world.group(id))
            .filter(|group| group.is_lfg)
            .ok_or(TeleportError::InvalidLocation)?;
        let dungeon = self
            .store
            .group_dungeon(group.id)
            .and_then(|id| self.catalog.get_dungeon(id))
            .cloned()
            .ok_or(TeleportError::InvalidLocation)?;

        if out {
            if snapshot.map_id == dungeon.map_id {
                self.world.teleport_to_entry_point(player);
            }
            return Ok(());
        }

        if !snapshot.alive {
            return Err(TeleportError::PlayerDead);
        }
        if snapshot.falling {
            return Err(TeleportError::Falling);
        }
        if snapshot.fatigued {
            return Err(TeleportError::Fatigue);
        }
        if snapshot.in_vehicle {
            return Err(TeleportError::InVehicle);
        }
        if snapshot.charming {
            return Err(TeleportError::Charming);
        }
        if snapshot.frozen || snapshot.map_id == dungeon.map_id {
            return Err(TeleportError::InvalidLocation);
        }

        let mut destination = dungeon.entrance;
        if !from_opcode {
            let inside = group
                .members
                .iter()
                .filter(|member| **member != player)
                .filter_map(|member| self.world.player(*member))
                .find(|member| member.map_id == dungeon.map_id);
            if let Some(member) = inside {
                destination = member.position;
            }
        }

        if self.world.teleport(player, dungeon.map_id, destination) {
            Ok(())
        } else {
            Err(TeleportError::InvalidLocation)
        }
    }
}
