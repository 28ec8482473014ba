//! Common types used throughout the dungeon finder

use crate::dungeon::locks::LockMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Unique identifier for players
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u64);

/// Unique identifier for groups (parties)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Player-{}", self.0)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Group-{}", self.0)
    }
}

/// Key of anything the dungeon finder tracks state for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id")]
pub enum EntityId {
    Player(PlayerId),
    Group(GroupId),
}

impl EntityId {
    pub fn as_player(&self) -> Option<PlayerId> {
        match self {
            EntityId::Player(id) => Some(*id),
            EntityId::Group(_) => None,
        }
    }

    pub fn as_group(&self) -> Option<GroupId> {
        match self {
            EntityId::Group(id) => Some(*id),
            EntityId::Player(_) => None,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, EntityId::Group(_))
    }
}

impl From<PlayerId> for EntityId {
    fn from(id: PlayerId) -> Self {
        EntityId::Player(id)
    }
}

impl From<GroupId> for EntityId {
    fn from(id: GroupId) -> Self {
        EntityId::Group(id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Player(id) => id.fmt(f),
            EntityId::Group(id) => id.fmt(f),
        }
    }
}

/// Dungeon identifier (low 24 bits of a dungeon entry)
pub type DungeonId = u32;

/// Ordered set of dungeon ids
pub type DungeonSet = BTreeSet<DungeonId>;

/// Role bitmask chosen by a player
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roles(u8);

impl Roles {
    pub const NONE: Roles = Roles(0);
    pub const LEADER: Roles = Roles(0x01);
    pub const TANK: Roles = Roles(0x02);
    pub const HEALER: Roles = Roles(0x04);
    pub const DAMAGE: Roles = Roles(0x08);
    pub const ANY: Roles = Roles(0x0F);

    /// Build from raw bits, dropping anything outside the four known roles
    pub fn from_bits_truncate(bits: u8) -> Self {
        Roles(bits & Self::ANY.0)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn contains(&self, other: Roles) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn remove(&mut self, other: Roles) {
        self.0 &= !other.0;
    }

    /// Roles without the leader flag
    pub fn combat(&self) -> Roles {
        Roles(self.0 & !Self::LEADER.0)
    }

    /// True when at least one of tank, healer or damage is selected
    pub fn has_combat_role(&self) -> bool {
        !self.combat().is_empty()
    }

    pub fn is_leader(&self) -> bool {
        self.contains(Self::LEADER)
    }
}

impl BitOr for Roles {
    type Output = Roles;

    fn bitor(self, rhs: Roles) -> Roles {
        Roles(self.0 | rhs.0)
    }
}

impl BitOrAssign for Roles {
    fn bitor_assign(&mut self, rhs: Roles) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Roles {
    type Output = Roles;

    fn bitand(self, rhs: Roles) -> Roles {
        Roles(self.0 & rhs.0)
    }
}

impl fmt::Display for Roles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (Roles::LEADER, "Leader"),
            (Roles::TANK, "Tank"),
            (Roles::HEALER, "Healer"),
            (Roles::DAMAGE, "Damage"),
        ]
        .iter()
        .filter(|(role, _)| self.contains(*role))
        .map(|(_, name)| *name)
        .collect();

        if names.is_empty() {
            write!(f, "None")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// Matchmaking state shared by players and groups
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LfgState {
    #[default]
    None,
    RoleCheck,
    Queued,
    Proposal,
    Dungeon,
    FinishedDungeon,
    RaidBrowser,
}

impl LfgState {
    /// States that become the restore point when entered
    pub fn is_stable(&self) -> bool {
        matches!(
            self,
            LfgState::None | LfgState::Dungeon | LfgState::FinishedDungeon
        )
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            LfgState::None => 0,
            LfgState::RoleCheck => 1,
            LfgState::Queued => 2,
            LfgState::Proposal => 3,
            LfgState::Dungeon => 5,
            LfgState::FinishedDungeon => 6,
            LfgState::RaidBrowser => 7,
        }
    }
}

impl fmt::Display for LfgState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LfgState::None => "None",
            LfgState::RoleCheck => "RoleCheck",
            LfgState::Queued => "Queued",
            LfgState::Proposal => "Proposal",
            LfgState::Dungeon => "Dungeon",
            LfgState::FinishedDungeon => "FinishedDungeon",
            LfgState::RaidBrowser => "RaidBrowser",
        };
        write!(f, "{}", name)
    }
}

/// Answer to a proposal or a vote kick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LfgAnswer {
    #[default]
    Pending,
    Deny,
    Agree,
}

impl From<bool> for LfgAnswer {
    fn from(accept: bool) -> Self {
        if accept {
            LfgAnswer::Agree
        } else {
            LfgAnswer::Deny
        }
    }
}

/// Player faction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Team {
    Alliance,
    Horde,
}

/// Player class, used to filter the roles a player may take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerClass {
    Warrior,
    Paladin,
    Hunter,
    Rogue,
    Priest,
    DeathKnight,
    Shaman,
    Mage,
    Warlock,
    Druid,
}

impl PlayerClass {
    pub fn can_tank(&self) -> bool {
        matches!(
            self,
            PlayerClass::Warrior
                | PlayerClass::Paladin
                | PlayerClass::DeathKnight
                | PlayerClass::Druid
        )
    }

    pub fn can_heal(&self) -> bool {
        matches!(
            self,
            PlayerClass::Paladin | PlayerClass::Priest | PlayerClass::Shaman | PlayerClass::Druid
        )
    }

    /// Clear the tank and healer bits this class cannot fill
    pub fn filter_roles(&self, roles: Roles) -> Roles {
        let mut filtered = roles;
        if !self.can_tank() {
            filtered.remove(Roles::TANK);
        }
        if !self.can_heal() {
            filtered.remove(Roles::HEALER);
        }
        filtered
    }
}

/// Dungeon finder entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LfgType {
    Dungeon,
    Raid,
    Heroic,
    Random,
}

impl LfgType {
    pub fn code(&self) -> u32 {
        match self {
            LfgType::Dungeon => 1,
            LfgType::Raid => 2,
            LfgType::Heroic => 5,
            LfgType::Random => 6,
        }
    }
}

/// Instance difficulty
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Difficulty {
    #[default]
    Normal,
    Heroic,
}

/// Result of a join request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LfgJoinResult {
    Ok,
    Failed,
    GroupFull,
    InternalError,
    NotMeetReqs,
    PartyNotMeetReqs,
    MixedRaidDungeon,
    MultiRealm,
    Disconnected,
    PartyInfoFailed,
    DungeonInvalid,
    Deserter,
    PartyDeserter,
    RandomCooldown,
    PartyRandomCooldown,
    TooManyMembers,
    UsingBgSystem,
}

impl LfgJoinResult {
    pub fn code(&self) -> u32 {
        match self {
            LfgJoinResult::Ok => 0,
            LfgJoinResult::Failed => 1,
            LfgJoinResult::GroupFull => 2,
            LfgJoinResult::InternalError => 4,
            LfgJoinResult::NotMeetReqs => 5,
            LfgJoinResult::PartyNotMeetReqs => 6,
            LfgJoinResult::MixedRaidDungeon => 7,
            LfgJoinResult::MultiRealm => 8,
            LfgJoinResult::Disconnected => 9,
            LfgJoinResult::PartyInfoFailed => 10,
            LfgJoinResult::DungeonInvalid => 11,
            LfgJoinResult::Deserter => 12,
            LfgJoinResult::PartyDeserter => 13,
            LfgJoinResult::RandomCooldown => 14,
            LfgJoinResult::PartyRandomCooldown => 15,
            LfgJoinResult::TooManyMembers => 16,
            LfgJoinResult::UsingBgSystem => 17,
        }
    }
}

impl fmt::Display for LfgJoinResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Aggregate state of a group role check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoleCheckState {
    Default,
    Finished,
    Initializing,
    MissingRole,
    WrongRoles,
    Aborted,
    NoRole,
}

/// Proposal lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProposalState {
    Initiated,
    Failed,
    Success,
}

/// Kind of status update sent to players
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LfgUpdateType {
    Default,
    RoleCheckAborted,
    JoinQueue,
    RoleCheckFailed,
    RemovedFromQueue,
    ProposalFailed,
    ProposalDeclined,
    GroupFound,
    AddedToQueue,
    ProposalBegin,
    UpdateStatus,
}

/// Why a teleport into or out of a dungeon could not happen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TeleportError {
    PlayerDead,
    Falling,
    InVehicle,
    Fatigue,
    InvalidLocation,
    Charming,
}

impl TeleportError {
    pub fn code(&self) -> u8 {
        match self {
            TeleportError::PlayerDead => 1,
            TeleportError::Falling => 2,
            TeleportError::InVehicle => 3,
            TeleportError::Fatigue => 4,
            TeleportError::InvalidLocation => 6,
            TeleportError::Charming => 8,
        }
    }
}

/// One member line of a proposal as shown to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalMemberView {
    pub player_id: PlayerId,
    pub role: Roles,
    pub answer: LfgAnswer,
    pub same_group: bool,
}

/// Wait estimates for one queued entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatusData {
    pub dungeon_id: DungeonId,
    pub wait_time_avg: i64,
    pub wait_time_tank: i64,
    pub wait_time_healer: i64,
    pub wait_time_dps: i64,
    pub queued_seconds: i64,
    pub tanks_needed: u8,
    pub healers_needed: u8,
    pub dps_needed: u8,
}

/// Notifications produced by the engine and delivered to players
///
/// The engine never talks to sessions directly: every outbound message is
/// appended to an outbox that the caller drains after each operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LfgEvent {
    JoinResult {
        recipient: PlayerId,
        result: LfgJoinResult,
        role_check: Option<RoleCheckState>,
        locks: BTreeMap<PlayerId, LockMap>,
    },
    Update {
        recipient: PlayerId,
        party: bool,
        update_type: LfgUpdateType,
        dungeons: DungeonSet,
        comment: String,
    },
    RoleChosen {
        recipient: PlayerId,
        player_id: PlayerId,
        roles: Roles,
    },
    RoleCheckUpdate {
        recipient: PlayerId,
        group_id: GroupId,
        state: RoleCheckState,
        dungeons: DungeonSet,
        answers: BTreeMap<PlayerId, Roles>,
    },
    ProposalUpdate {
        recipient: PlayerId,
        proposal_id: u32,
        state: ProposalState,
        dungeon_id: DungeonId,
        members: Vec<ProposalMemberView>,
    },
    BootUpdate {
        recipient: PlayerId,
        group_id: GroupId,
        victim: PlayerId,
        in_progress: bool,
        my_vote: LfgAnswer,
        agree_votes: u8,
        total_votes: u8,
        votes_needed: u8,
        seconds_left: i64,
        reason: String,
    },
    QueueStatus {
        recipient: PlayerId,
        status: QueueStatusData,
    },
    TeleportFailed {
        recipient: PlayerId,
        error: TeleportError,
    },
    PlayerReward {
        recipient: PlayerId,
        random_dungeon_entry: u32,
        dungeon_entry: u32,
        done: bool,
        quest_id: u32,
    },
}

impl LfgEvent {
    /// Player the notification is addressed to
    pub fn recipient(&self) -> PlayerId {
        match self {
            LfgEvent::JoinResult { recipient, .. }
            | LfgEvent::Update { recipient, .. }
            | LfgEvent::RoleChosen { recipient, .. }
            | LfgEvent::RoleCheckUpdate { recipient, .. }
            | LfgEvent::ProposalUpdate { recipient, .. }
            | LfgEvent::BootUpdate { recipient, .. }
            | LfgEvent::QueueStatus { recipient, .. }
            | LfgEvent::TeleportFailed { recipient, .. }
            | LfgEvent::PlayerReward { recipient, .. } => *recipient,
        }
    }

    /// Short name used for routing keys and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            LfgEvent::JoinResult { .. } => "join_result",
            LfgEvent::Update { .. } => "update",
            LfgEvent::RoleChosen { .. } => "role_chosen",
            LfgEvent::RoleCheckUpdate { .. } => "role_check",
            LfgEvent::ProposalUpdate { .. } => "proposal",
            LfgEvent::BootUpdate { .. } => "boot",
            LfgEvent::QueueStatus { .. } => "queue_status",
            LfgEvent::TeleportFailed { .. } => "teleport_failed",
            LfgEvent::PlayerReward { .. } => "reward",
        }
    }
}
