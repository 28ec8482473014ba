//! AMQP message definitions and serialization

use crate::error::{LfgError, Result};
use crate::types::*;
use crate::world::{GroupSnapshot, PlayerSnapshot};
use serde::{Deserialize, Serialize};
use serde_json;

/// AMQP queue and exchange names
pub const LFG_REQUEST_QUEUE: &str = "lfg.requests";
pub const LFG_EVENTS_EXCHANGE: &str = "lfg.events";

/// Prefix of every outbound notification routing key
pub const EVENT_ROUTING_PREFIX: &str = "lfg.event";

/// Upper bound on a free-text join comment or kick reason
pub const MAX_COMMENT_LENGTH: usize = 255;

/// Requests accepted on the request queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LfgRequest {
    /// Refresh what the engine knows about a player
    UpsertPlayer(PlayerSnapshot),
    /// Refresh a real party's roster
    UpsertGroup(GroupSnapshot),
    Join {
        player_id: PlayerId,
        roles: Roles,
        dungeons: Vec<u32>,
        #[serde(default)]
        comment: String,
    },
    Leave {
        entity: EntityId,
        #[serde(default)]
        disconnected: bool,
    },
    RoleAnswer {
        group_id: GroupId,
        player_id: PlayerId,
        roles: Roles,
    },
    ProposalAnswer {
        proposal_id: u32,
        player_id: PlayerId,
        accept: bool,
    },
    InitBoot {
        group_id: GroupId,
        kicker: PlayerId,
        victim: PlayerId,
        #[serde(default)]
        reason: String,
    },
    BootVote {
        player_id: PlayerId,
        accept: bool,
    },
    FinishDungeon {
        group_id: GroupId,
        dungeon_id: DungeonId,
        map_id: u32,
    },
    Teleport {
        player_id: PlayerId,
        out: bool,
    },
}

impl LfgRequest {
    /// Short name used in logs and metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            LfgRequest::UpsertPlayer(_) => "upsert_player",
            LfgRequest::UpsertGroup(_) => "upsert_group",
            LfgRequest::Join { .. } => "join",
            LfgRequest::Leave { .. } => "leave",
            LfgRequest::RoleAnswer { .. } => "role_answer",
            LfgRequest::ProposalAnswer { .. } => "proposal_answer",
            LfgRequest::InitBoot { .. } => "init_boot",
            LfgRequest::BootVote { .. } => "boot_vote",
            LfgRequest::FinishDungeon { .. } => "finish_dungeon",
            LfgRequest::Teleport { .. } => "teleport",
        }
    }
}

/// Message envelope with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: Serialize + serde::de::DeserializeOwned,
{
    /// Create a new message envelope
    pub fn new(payload: T, routing_key: String) -> Self {
        Self {
            payload,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            routing_key,
        }
    }

    /// Serialize the envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            LfgError::SerializationError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Deserialize envelope from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            LfgError::InvalidRequest {
                reason: format!("Failed to deserialize message: {}", e),
            }
            .into()
        })
    }
}

/// Message serialization and validation utilities
pub struct MessageUtils;

impl MessageUtils {
    /// Serialize a request to bytes
    pub fn serialize_request(request: &LfgRequest) -> Result<Vec<u8>> {
        Self::validate_request(request)?;
        Self::serialize_message(request)
    }

    /// Deserialize a request from bytes
    ///
    /// Accepts either a bare request or one wrapped in a [`MessageEnvelope`].
    pub fn deserialize_request(bytes: &[u8]) -> Result<LfgRequest> {
        let request = match MessageEnvelope::<LfgRequest>::from_bytes(bytes) {
            Ok(envelope) => envelope.payload,
            Err(_) => serde_json::from_slice(bytes).map_err(|e| LfgError::InvalidRequest {
                reason: format!("Failed to deserialize request: {}", e),
            })?,
        };

        Self::validate_request(&request)?;
        Ok(request)
    }

    /// Reject requests that cannot be meaningful to the engine
    pub fn validate_request(request: &LfgRequest) -> Result<()> {
        let invalid = |reason: &str| -> Result<()> {
            Err(LfgError::InvalidRequest {
                reason: reason.to_string(),
            }
            .into())
        };

        match request {
            LfgRequest::UpsertPlayer(snapshot) => {
                if snapshot.id.0 == 0 {
                    return invalid("Player ID cannot be zero");
                }
                if snapshot.level == 0 {
                    return invalid("Player level cannot be zero");
                }
            }
            LfgRequest::UpsertGroup(snapshot) => {
                if snapshot.id.0 == 0 {
                    return invalid("Group ID cannot be zero");
                }
                if !snapshot.members.contains(&snapshot.leader) {
                    return invalid("Group leader must be a member");
                }
            }
            LfgRequest::Join {
                player_id,
                dungeons,
                comment,
                ..
            } => {
                if player_id.0 == 0 {
                    return invalid("Player ID cannot be zero");
                }
                if dungeons.is_empty() {
                    return invalid("Join must select at least one dungeon");
                }
                if comment.len() > MAX_COMMENT_LENGTH {
                    return invalid("Comment is too long");
                }
            }
            LfgRequest::InitBoot {
                kicker,
                victim,
                reason,
                ..
            } => {
                if kicker == victim {
                    return invalid("A player cannot vote to kick themselves");
                }
                if reason.len() > MAX_COMMENT_LENGTH {
                    return invalid("Kick reason is too long");
                }
            }
            LfgRequest::ProposalAnswer { proposal_id, .. } => {
                if *proposal_id == 0 {
                    return invalid("Proposal ID cannot be zero");
                }
            }
            LfgRequest::Leave { .. }
            | LfgRequest::RoleAnswer { .. }
            | LfgRequest::BootVote { .. }
            | LfgRequest::FinishDungeon { .. }
            | LfgRequest::Teleport { .. } => {}
        }

        Ok(())
    }

    /// Serialize any AMQP message to bytes
    pub fn serialize_message<T: Serialize>(message: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(message).map_err(|e| {
            LfgError::SerializationError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Routing key for an outbound notification, `lfg.event.<kind>`
    pub fn get_routing_key(event: &LfgEvent) -> String {
        format!("{}.{}", EVENT_ROUTING_PREFIX, event.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_join_request() -> LfgRequest {
        LfgRequest::Join {
            player_id: PlayerId(1),
            roles: Roles::TANK | Roles::LEADER,
            dungeons: vec![43],
            comment: "need tank".to_string(),
        }
    }

    #[test]
    fn test_message_envelope_creation() {
        let envelope = MessageEnvelope::new(create_test_join_request(), "lfg.request".to_string());

        assert_eq!(envelope.routing_key, "lfg.request");
        assert!(!envelope.correlation_id.is_empty());
    }

    #[test]
    fn test_request_validation() {
        assert!(MessageUtils::validate_request(&create_test_join_request()).is_ok());

        let empty_selection = LfgRequest::Join {
            player_id: PlayerId(1),
            roles: Roles::DAMAGE,
            dungeons: vec![],
            comment: String::new(),
        };
        assert!(MessageUtils::validate_request(&empty_selection).is_err());

        let self_kick = LfgRequest::InitBoot {
            group_id: GroupId(1),
            kicker: PlayerId(2),
            victim: PlayerId(2),
            reason: String::new(),
        };
        assert!(MessageUtils::validate_request(&self_kick).is_err());

        let leaderless = LfgRequest::UpsertGroup(GroupSnapshot {
            id: GroupId(1),
            leader: PlayerId(9),
            members: vec![PlayerId(1), PlayerId(2)],
            is_lfg: false,
        });
        assert!(MessageUtils::validate_request(&leaderless).is_err());
    }

    #[test]
    fn test_deserialize_wire_format() {
        let json = r#"{"type":"Join","player_id":7,"roles":2,"dungeons":[261]}"#;
        let request = MessageUtils::deserialize_request(json.as_bytes()).unwrap();
        assert_eq!(
            request,
            LfgRequest::Join {
                player_id: PlayerId(7),
                roles: Roles::TANK,
                dungeons: vec![261],
                comment: String::new(),
            }
        );

        let json = r#"{"type":"Leave","entity":{"kind":"Group","id":3}}"#;
        let request = MessageUtils::deserialize_request(json.as_bytes()).unwrap();
        assert_eq!(
            request,
            LfgRequest::Leave {
                entity: EntityId::Group(GroupId(3)),
                disconnected: false,
            }
        );
    }

    #[test]
    fn test_enveloped_request_is_unwrapped() {
        let envelope = MessageEnvelope::new(create_test_join_request(), "lfg.request".to_string());
        let bytes = envelope.to_bytes().unwrap();
        let request = MessageUtils::deserialize_request(&bytes).unwrap();
        assert_eq!(request, create_test_join_request());
    }

    #[test]
    fn test_garbage_is_rejected() {
        let err = MessageUtils::deserialize_request(b"not json").unwrap_err();
        assert!(err.to_string().contains("Invalid request"));
    }

    #[test]
    fn test_routing_key_generation() {
        let event = LfgEvent::TeleportFailed {
            recipient: PlayerId(1),
            error: TeleportError::Falling,
        };
        assert_eq!(MessageUtils::get_routing_key(&event), "lfg.event.teleport_failed");
    }
}
