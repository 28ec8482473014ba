//! Role composition solver
//!
//! Decides whether a set of role masks can be mapped onto the dungeon
//! composition with every member taking exactly one combat role. The search
//! works on its own copies, so callers never observe partial assignments.

use crate::config::LfgConfig;
use crate::types::{PlayerId, Roles};
use std::collections::BTreeMap;

/// Role slots of a full group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleComposition {
    pub tanks: u8,
    pub healers: u8,
    pub damage: u8,
}

impl RoleComposition {
    pub fn new(tanks: u8, healers: u8, damage: u8) -> Self {
        Self {
            tanks,
            healers,
            damage,
        }
    }

    pub fn from_config(config: &LfgConfig) -> Self {
        Self::new(config.tanks_needed, config.healers_needed, config.dps_needed)
    }

    pub fn group_size(&self) -> usize {
        (self.tanks + self.healers + self.damage) as usize
    }

    fn capacity(&self, role: Roles) -> u8 {
        if role == Roles::TANK {
            self.tanks
        } else if role == Roles::HEALER {
            self.healers
        } else {
            self.damage
        }
    }

    /// Slots still open once `roles` are seated
    ///
    /// Uses the solver's assignment; members that cannot all be seated fall
    /// back to filling tank then healer then damage.
    pub fn still_needed(&self, roles: impl IntoIterator<Item = Roles>) -> (u8, u8, u8) {
        let masks: Vec<Roles> = roles.into_iter().map(|role| role.combat()).collect();
        let seated = solve(&masks, *self).unwrap_or_else(|| self.seat_greedily(&masks));

        let (mut tanks, mut healers, mut damage) = (self.tanks, self.healers, self.damage);
        for role in seated {
            if role == Roles::TANK {
                tanks = tanks.saturating_sub(1);
            } else if role == Roles::HEALER {
                healers = healers.saturating_sub(1);
            } else if role == Roles::DAMAGE {
                damage = damage.saturating_sub(1);
            }
        }
        (tanks, healers, damage)
    }

    fn seat_greedily(&self, masks: &[Roles]) -> Vec<Roles> {
        let mut open = [self.tanks, self.healers, self.damage];
        masks
            .iter()
            .filter_map(|mask| {
                let slot = (0..CANDIDATES.len())
                    .find(|slot| mask.contains(CANDIDATES[*slot]) && open[*slot] > 0)?;
                open[slot] -= 1;
                Some(CANDIDATES[slot])
            })
            .collect()
    }
}

impl Default for RoleComposition {
    fn default() -> Self {
        Self::new(1, 1, 3)
    }
}

const CANDIDATES: [Roles; 3] = [Roles::TANK, Roles::HEALER, Roles::DAMAGE];

/// Pick one combat role per mask without exceeding any slot
///
/// Returns the chosen single-bit roles in input order, or `None` when no
/// assignment exists. The leader flag is ignored.
pub fn solve(masks: &[Roles], composition: RoleComposition) -> Option<Vec<Roles>> {
    if masks.len() > composition.group_size() {
        return None;
    }
    let mut chosen = Vec::with_capacity(masks.len());
    if search(masks, composition, [0; 3], &mut chosen) {
        Some(chosen)
    } else {
        None
    }
}

fn search(
    masks: &[Roles],
    composition: RoleComposition,
    used: [u8; 3],
    chosen: &mut Vec<Roles>,
) -> bool {
    let Some((first, rest)) = masks.split_first() else {
        return true;
    };

    for (slot, role) in CANDIDATES.iter().enumerate() {
        if !first.contains(*role) || used[slot] >= composition.capacity(*role) {
            continue;
        }
        let mut next = used;
        next[slot] += 1;
        chosen.push(*role);
        if search(rest, composition, next, chosen) {
            return true;
        }
        chosen.pop();
    }
    false
}

/// Solve for a keyed set of members
///
/// An empty map, or any member without a combat role, fails.
pub fn check_group_roles(
    roles: &BTreeMap<PlayerId, Roles>,
    composition: RoleComposition,
) -> Option<BTreeMap<PlayerId, Roles>> {
    if roles.is_empty() {
        return None;
    }
    let masks: Vec<Roles> = roles.values().map(Roles::combat).collect();
    let assignment = solve(&masks, composition)?;
    Some(roles.keys().copied().zip(assignment).collect())
}

/// Solve and keep each member's leader flag on its assigned role
pub fn assign_roles(
    roles: &BTreeMap<PlayerId, Roles>,
    composition: RoleComposition,
) -> Option<BTreeMap<PlayerId, Roles>> {
    let mut assigned = check_group_roles(roles, composition)?;
    for (player, role) in assigned.iter_mut() {
        if roles.get(player).is_some_and(Roles::is_leader) {
            *role |= Roles::LEADER;
        }
    }
    Some(assigned)
}
