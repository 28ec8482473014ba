//! Dungeon completion and random dungeon rewards

use super::manager::{LfgManager, LfgOutcome};
use crate::types::{Difficulty, DungeonId, GroupId, LfgEvent, LfgState};
use crate::world::World;
use tracing::debug;

impl<W: World> LfgManager<W> {
    /// Mark a group's dungeon as completed and reward members who queued
    /// through a random or seasonal entry
    ///
    /// Only members standing in the completed dungeon on `current_map` are
    /// rewarded. Returns the number of rewards granted.
    pub fn finish_dungeon(
        &mut self,
        group: GroupId,
        dungeon_id: DungeonId,
        current_map: u32,
    ) -> usize {
        let group_dungeon = self.store.group_dungeon(group);
        if group_dungeon != Some(dungeon_id) {
            debug!(
                "{} finished dungeon {} but was sent to {:?}",
                group, dungeon_id, group_dungeon
            );
            return 0;
        }
        if self.store.state(group.into()) == LfgState::FinishedDungeon {
            debug!("{} already finished dungeon {}", group, dungeon_id);
            return 0;
        }

        self.store.set_state(group.into(), LfgState::FinishedDungeon);
        self.save_group_data(group);

        let done_map = self
            .catalog
            .get_dungeon(dungeon_id)
            .map(|dungeon| dungeon.map_id);
        let dungeon_entry = self.catalog.entry(dungeon_id);
        let group_size = self.config.max_group_size() as u8;
        let mut rewarded = 0;

        for player in self.store.members(group) {
            if self.store.state(player.into()) == LfgState::FinishedDungeon {
                continue;
            }
            let selected = self.store.selected_dungeons(player).first().copied();
            self.store.set_state(player.into(), LfgState::FinishedDungeon);

            let Some(selection) = selected
                .and_then(|id| self.catalog.get_dungeon(id))
                .filter(|dungeon| dungeon.is_rewarding())
                .cloned()
            else {
                continue;
            };
            let Some(snapshot) = self.world.player(player).filter(|p| p.online) else {
                continue;
            };
            if snapshot.map_id != current_map {
                continue;
            }

            self.world.remove_random_cooldown(player);

            if Some(snapshot.map_id) != done_map {
                continue;
            }

            if selection.difficulty == Difficulty::Heroic {
                let party_size = self
                    .store
                    .player(player)
                    .map_or(0, |data| data.party_size_at_join);
                let strangers = if party_size > 0 {
                    group_size.saturating_sub(party_size)
                } else {
                    group_size.saturating_sub(1)
                };
                self.world.credit_grouped_with_strangers(player, strangers);
            }

            let Some(reward) = self
                .catalog
                .random_dungeon_reward(selection.id, snapshot.level)
                .copied()
            else {
                continue;
            };
            if reward.first_quest == 0 {
                continue;
            }

            let (quest_id, done) = if self.world.can_reward_quest(player, reward.first_quest) {
                (reward.first_quest, false)
            } else if reward.other_quest != 0 {
                (reward.other_quest, true)
            } else {
                continue;
            };

            self.world.reward_quest(player, quest_id);
            debug!(
                "{} completed dungeon {} and got quest {}",
                player, dungeon_id, quest_id
            );
            self.emit(LfgEvent::PlayerReward {
                recipient: player,
                random_dungeon_entry: selection.entry(),
                dungeon_entry,
                done,
                quest_id,
            });
            self.record(LfgOutcome::Reward { repeat: done });
            rewarded += 1;
        }

        rewarded
    }
}
