//! Deterministic simulation shared by the server and the client
//!
//! Everything in here must behave identically on both sides of the wire:
//! the server tick loop and the client prediction engine drive the same
//! [`physics::Integrator`] with the same [`physics::PhysicsConstants`].

pub mod combat;
pub mod physics;

pub use physics::{Integrator, PhysicsConstants, Platform, SimError, World};

use glam::Vec2;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ws::protocol::PlayerSnapshot;

/// Opaque identifier minted once per connection
pub type PlayerId = Uuid;

/// Horizontal direction the player last moved in (used for shooting)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Facing {
    Left,
    #[default]
    Right,
}

impl Facing {
    pub fn sign(self) -> f32 {
        match self {
            Facing::Left => -1.0,
            Facing::Right => 1.0,
        }
    }
}

/// The part of a player that the integration function mutates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionState {
    /// Center of the player's bounding box
    pub position: Vec2,
    pub velocity: Vec2,
    pub on_ground: bool,
    #[serde(default)]
    pub facing: Facing,
}

impl MotionState {
    pub fn at_rest(position: Vec2) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.velocity.is_finite()
    }
}

/// Buttons held during one simulation step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InputFlags {
    #[serde(default)]
    pub left: bool,
    #[serde(default)]
    pub right: bool,
    #[serde(default)]
    pub jump: bool,
    #[serde(default)]
    pub shoot: bool,
}

impl InputFlags {
    pub const NONE: Self = Self {
        left: false,
        right: false,
        jump: false,
        shoot: false,
    };
}

/// A sequenced input sample. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputCommand {
    /// Strictly increasing per connection, starting at 1
    pub sequence_number: u32,
    #[serde(flatten)]
    pub flags: InputFlags,
    /// Client's estimate of server time when the command was sampled (ms)
    pub timestamp: u64,
}

/// Authoritative per-player state, owned by the room tick loop
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub id: PlayerId,
    pub motion: MotionState,
    pub health: f32,
    pub alive: bool,
    pub last_processed_input_seq: u32,

    pub spawn_point: Vec2,
    /// Seconds until the next shot is allowed
    pub shot_cooldown: f32,
    /// Seconds until a dead player respawns
    pub respawn_timer: f32,
}

impl PlayerState {
    pub fn spawn(id: PlayerId, spawn_point: Vec2, constants: &PhysicsConstants) -> Self {
        Self {
            id,
            motion: MotionState::at_rest(spawn_point),
            health: constants.max_health,
            alive: true,
            last_processed_input_seq: 0,
            spawn_point,
            shot_cooldown: 0.0,
            respawn_timer: 0.0,
        }
    }

    /// Bring a dead player back at their spawn point with full health
    pub fn respawn(&mut self, constants: &PhysicsConstants) {
        self.motion = MotionState::at_rest(self.spawn_point);
        self.health = constants.max_health;
        self.alive = true;
        self.shot_cooldown = 0.0;
        self.respawn_timer = 0.0;
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            id: self.id,
            motion: self.motion,
            health: self.health,
            alive: self.alive,
            last_processed_input_seq: self.last_processed_input_seq,
        }
    }
}
