//! WebSocket protocol message definitions
//! These are the wire types for client-server communication.
//!
//! Every message is a `{ "type": ..., "data": ... }` envelope.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::sim::{InputCommand, MotionState, PlayerId};

/// Room joined when the client gives no hint
pub const DEFAULT_ROOM: &str = "lobby";

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMsg {
    /// Request to join a room
    Join {
        /// Optional room name, otherwise [`DEFAULT_ROOM`]
        #[serde(default)]
        room: Option<String>,
    },

    /// One sequenced input sample
    Input(InputCommand),

    /// Probe for latency and clock offset
    #[serde(rename_all = "camelCase")]
    Ping {
        /// Client wall clock (ms)
        client_time: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMsg {
    /// Confirmation of room join, sent only to the joining player
    #[serde(rename_all = "camelCase")]
    Joined {
        player_id: PlayerId,
        room: String,
        server_time: u64,
        /// Simulation rate the client must predict at
        tick_rate: u32,
        spawn: Vec2,
        /// Everyone in the room, including the new player
        players: Vec<PlayerSnapshot>,
    },

    /// Authoritative world state, once per tick
    Snapshot(ServerSnapshot),

    #[serde(rename_all = "camelCase")]
    PlayerJoined { player_id: PlayerId, position: Vec2 },

    #[serde(rename_all = "camelCase")]
    PlayerLeft { player_id: PlayerId, position: Vec2 },

    #[serde(rename_all = "camelCase")]
    Pong {
        /// Echo of the ping's client time
        client_time: u64,
        server_time: u64,
    },

    /// A projectile hit a player, sent to everyone in the room
    #[serde(rename_all = "camelCase")]
    PlayerDamaged {
        player_id: PlayerId,
        shooter_id: PlayerId,
        damage: f32,
        new_health: f32,
        killed: bool,
    },

    #[serde(rename_all = "camelCase")]
    PlayerRespawned {
        player_id: PlayerId,
        position: Vec2,
        health: f32,
    },

    /// An input failed validation and was not queued
    #[serde(rename_all = "camelCase")]
    InputRejected {
        sequence_number: u32,
        reason: RejectReason,
    },

    /// Error message
    Error { code: String, message: String },
}

impl ServerMsg {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Why an input command was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Sequence number not newer than the last admitted one
    Stale,
    TimestampInFuture,
    TimestampTooOld,
    /// The connection exceeded its inbound message allowance
    RateLimited,
}

/// Point-in-time world state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSnapshot {
    pub server_tick: u64,
    pub server_time: u64,
    pub players: Vec<PlayerSnapshot>,
    pub bullets: Vec<BulletState>,
}

impl ServerSnapshot {
    pub fn player(&self, id: PlayerId) -> Option<&PlayerSnapshot> {
        self.players.iter().find(|p| p.id == id)
    }
}

/// Player state in a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub id: PlayerId,
    #[serde(flatten)]
    pub motion: MotionState,
    pub health: f32,
    pub alive: bool,
    /// Last input sequence the server applied for this player
    pub last_processed_input_seq: u32,
}

/// Server-authoritative projectile
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulletState {
    pub id: u64,
    pub position: Vec2,
    pub velocity: Vec2,
    pub owner_id: PlayerId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::InputFlags;
    use serde_json::json;

    #[test]
    fn input_uses_flat_envelope() {
        let raw = json!({
            "type": "INPUT",
            "data": {
                "sequenceNumber": 7,
                "left": false,
                "right": true,
                "jump": false,
                "shoot": true,
                "timestamp": 1234
            }
        });

        let msg: ClientMsg = serde_json::from_value(raw).unwrap();
        assert_eq!(
            msg,
            ClientMsg::Input(InputCommand {
                sequence_number: 7,
                flags: InputFlags {
                    right: true,
                    shoot: true,
                    ..InputFlags::NONE
                },
                timestamp: 1234,
            })
        );
    }

    #[test]
    fn join_room_hint_is_optional() {
        let msg: ClientMsg = serde_json::from_str(r#"{"type":"JOIN","data":{}}"#).unwrap();
        assert_eq!(msg, ClientMsg::Join { room: None });
    }

    #[test]
    fn rejection_reason_is_snake_case() {
        let msg = ServerMsg::InputRejected {
            sequence_number: 3,
            reason: RejectReason::Stale,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "INPUT_REJECTED");
        assert_eq!(value["data"]["sequenceNumber"], 3);
        assert_eq!(value["data"]["reason"], "stale");

        let value = serde_json::to_value(RejectReason::RateLimited).unwrap();
        assert_eq!(value, "rate_limited");
    }

    #[test]
    fn damage_event_uses_camel_case_fields() {
        let id = uuid::Uuid::nil();
        let value = serde_json::to_value(ServerMsg::PlayerDamaged {
            player_id: id,
            shooter_id: id,
            damage: 25.0,
            new_health: 75.0,
            killed: false,
        })
        .unwrap();
        assert_eq!(value["type"], "PLAYER_DAMAGED");
        assert_eq!(value["data"]["newHealth"], 75.0);
        assert_eq!(value["data"]["shooterId"], id.to_string());
    }

    #[test]
    fn unknown_message_type_fails_to_parse() {
        assert!(serde_json::from_str::<ClientMsg>(r#"{"type":"TELEPORT","data":{}}"#).is_err());
    }
}
