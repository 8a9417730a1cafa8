//! Combat system - bullets, damage, hit detection
//!
//! Projectiles are simulated on the server only; clients render whatever the
//! latest snapshot carries.

use glam::Vec2;

use super::{Facing, PlayerId, World};
use crate::ws::protocol::BulletState;

/// Weapon stats shared by every player
#[derive(Debug, Clone, Copy)]
pub struct WeaponStats {
    /// Damage per hit
    pub damage: f32,
    /// Projectile speed (px/s)
    pub projectile_speed: f32,
    /// Cooldown between shots (seconds)
    pub cooldown: f32,
    /// Projectile lifetime (seconds)
    pub projectile_lifetime: f32,
    /// Projectile half width/height
    pub projectile_half_extents: Vec2,
}

impl Default for WeaponStats {
    fn default() -> Self {
        Self {
            damage: 25.0,
            projectile_speed: 600.0,
            cooldown: 0.2,
            projectile_lifetime: 3.0,
            projectile_half_extents: Vec2::new(4.0, 1.5),
        }
    }
}

/// Active projectile in the room
#[derive(Debug, Clone)]
pub struct Projectile {
    pub id: u64,
    pub owner_id: PlayerId,
    pub position: Vec2,
    pub velocity: Vec2,
    pub damage: f32,
    pub half_extents: Vec2,
    pub lifetime_remaining: f32,
}

impl Projectile {
    /// Spawn a projectile just in front of the shooter
    pub fn new(id: u64, owner_id: PlayerId, muzzle: Vec2, facing: Facing, stats: &WeaponStats) -> Self {
        Self {
            id,
            owner_id,
            position: muzzle,
            velocity: Vec2::new(facing.sign() * stats.projectile_speed, 0.0),
            damage: stats.damage,
            half_extents: stats.projectile_half_extents,
            lifetime_remaining: stats.projectile_lifetime,
        }
    }

    /// Move one step and return the position the projectile moved from
    pub fn advance(&mut self, dt: f32) -> Vec2 {
        let from = self.position;
        self.position += self.velocity * dt;
        self.lifetime_remaining -= dt;
        from
    }

    /// False once the projectile has expired or left the world
    pub fn is_live(&self, world: &World) -> bool {
        self.lifetime_remaining > 0.0 && world.contains(self.position)
    }

    /// AABB overlap against a player box at the current position
    pub fn check_hit(&self, target_center: Vec2, target_half_extents: Vec2) -> bool {
        let delta = (self.position - target_center).abs();
        let reach = self.half_extents + target_half_extents;
        delta.x <= reach.x && delta.y <= reach.y
    }

    /// Swept overlap of the path `from -> position` against a player box.
    /// Returns the fraction of the path travelled at first contact.
    pub fn sweep_hit(&self, from: Vec2, target_center: Vec2, target_half_extents: Vec2) -> Option<f32> {
        let reach = self.half_extents + target_half_extents;
        segment_enters_box(from, self.position, target_center - reach, target_center + reach)
    }

    pub fn state(&self) -> BulletState {
        BulletState {
            id: self.id,
            position: self.position,
            velocity: self.velocity,
            owner_id: self.owner_id,
        }
    }
}

/// Slab test of the segment `start -> end` against the box `min..=max`
fn segment_enters_box(start: Vec2, end: Vec2, min: Vec2, max: Vec2) -> Option<f32> {
    let delta = end - start;
    let mut enter = 0.0_f32;
    let mut exit = 1.0_f32;

    for axis in 0..2 {
        if delta[axis].abs() <= f32::EPSILON {
            if start[axis] < min[axis] || start[axis] > max[axis] {
                return None;
            }
            continue;
        }

        let inv = 1.0 / delta[axis];
        let (near, far) = {
            let a = (min[axis] - start[axis]) * inv;
            let b = (max[axis] - start[axis]) * inv;
            if a <= b { (a, b) } else { (b, a) }
        };
        enter = enter.max(near);
        exit = exit.min(far);
        if enter > exit {
            return None;
        }
    }

    Some(enter)
}

/// Combat rules
pub struct CombatSystem;

impl CombatSystem {
    /// Check if a player can fire (cooldown check)
    pub fn can_fire(shot_cooldown: f32) -> bool {
        shot_cooldown <= 0.0
    }

    /// Update weapon cooldown
    pub fn update_cooldown(cooldown: f32, dt: f32) -> f32 {
        (cooldown - dt).max(0.0)
    }

    /// Where a bullet leaves the shooter's body
    pub fn muzzle(position: Vec2, facing: Facing, shooter_half_extents: Vec2) -> Vec2 {
        position + Vec2::new(facing.sign() * (shooter_half_extents.x + 2.0), 0.0)
    }

    /// Apply damage to health, returns (new_health, is_dead)
    pub fn apply_damage(current_health: f32, damage: f32) -> (f32, bool) {
        let new_health = (current_health - damage).max(0.0);
        (new_health, new_health <= 0.0)
    }
}

/// Hit result from combat resolution
#[derive(Debug, Clone)]
pub struct HitResult {
    pub projectile_id: u64,
    pub shooter_id: PlayerId,
    pub target_id: PlayerId,
    pub damage: f32,
    /// Target health after the hit
    pub remaining_health: f32,
    pub killed: bool,
}
