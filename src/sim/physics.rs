//! Platformer physics and world collision

use std::sync::Arc;

use glam::Vec2;

use super::{Facing, InputFlags, MotionState};

/// Tolerance used when deciding whether a player is resting on a surface.
/// Snapping `y = top - half_height` does not always round-trip in f32.
const SURFACE_EPSILON: f32 = 0.5;

/// Movement constants shared by server and client
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicsConstants {
    /// Horizontal speed set while left or right is held (px/s)
    pub move_speed: f32,
    /// Multiplicative horizontal damping applied every tick
    pub drag: f32,
    /// Vertical velocity applied on jump (negative is up)
    pub jump_velocity: f32,
    /// Downward acceleration (px/s^2)
    pub gravity: f32,
    /// Terminal falling speed
    pub max_fall_speed: f32,
    /// Half width/height of the player's bounding box
    pub player_half_extents: Vec2,
    pub max_health: f32,
}

impl Default for PhysicsConstants {
    fn default() -> Self {
        Self {
            move_speed: 200.0,
            drag: 0.8,
            jump_velocity: -500.0,
            gravity: 800.0,
            max_fall_speed: 1000.0,
            player_half_extents: Vec2::new(10.0, 20.0),
            max_health: 100.0,
        }
    }
}

/// One-way platform: players land on it from above and pass through from below
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Platform {
    pub center: Vec2,
    pub half_extents: Vec2,
}

impl Platform {
    pub const SMALL: Vec2 = Vec2::new(60.0, 10.0);
    pub const MEDIUM: Vec2 = Vec2::new(100.0, 10.0);
    pub const LARGE: Vec2 = Vec2::new(150.0, 10.0);

    pub fn new(x: f32, y: f32, half_extents: Vec2) -> Self {
        Self {
            center: Vec2::new(x, y),
            half_extents,
        }
    }

    pub fn top(&self) -> f32 {
        self.center.y - self.half_extents.y
    }

    pub fn left(&self) -> f32 {
        self.center.x - self.half_extents.x
    }

    pub fn right(&self) -> f32 {
        self.center.x + self.half_extents.x
    }
}

/// Static level geometry
#[derive(Debug, Clone, PartialEq)]
pub struct World {
    pub width: f32,
    pub height: f32,
    /// Y coordinate of the ground surface
    pub ground_y: f32,
    pub platforms: Vec<Platform>,
    pub spawn_points: Vec<Vec2>,
}

impl World {
    /// The default side-scrolling arena
    pub fn arena() -> Self {
        let width = 3000.0;
        let height = 800.0;
        let ground_y = height - 100.0;
        let standing_y = ground_y - PhysicsConstants::default().player_half_extents.y;

        Self {
            width,
            height,
            ground_y,
            platforms: vec![
                Platform::new(300.0, 600.0, Platform::MEDIUM),
                Platform::new(600.0, 500.0, Platform::SMALL),
                Platform::new(900.0, 450.0, Platform::LARGE),
                Platform::new(1300.0, 400.0, Platform::MEDIUM),
                Platform::new(1600.0, 350.0, Platform::SMALL),
                Platform::new(1900.0, 300.0, Platform::LARGE),
                Platform::new(2300.0, 500.0, Platform::MEDIUM),
                Platform::new(2600.0, 400.0, Platform::SMALL),
            ],
            spawn_points: [100.0, 500.0, 1100.0, 1500.0, 2000.0, 2500.0, 2900.0]
                .into_iter()
                .map(|x| Vec2::new(x, standing_y))
                .collect(),
        }
    }

    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= 0.0 && point.x <= self.width && point.y >= 0.0 && point.y <= self.height
    }
}

/// Errors raised while stepping a single player
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum SimError {
    #[error("invalid timestep: {0}")]
    InvalidTimestep(f32),

    #[error("motion state became non-finite")]
    NonFiniteState,
}

/// The single integration function used by both the server and the client.
///
/// On error the motion state is left untouched.
pub fn step_motion(
    motion: &mut MotionState,
    input: InputFlags,
    world: &World,
    constants: &PhysicsConstants,
    dt: f32,
) -> Result<(), SimError> {
    if !dt.is_finite() || dt <= 0.0 {
        return Err(SimError::InvalidTimestep(dt));
    }

    let mut next = *motion;
    let half = constants.player_half_extents;

    // Horizontal velocity is set, not accumulated
    match (input.left, input.right) {
        (true, false) => {
            next.velocity.x = -constants.move_speed;
            next.facing = Facing::Left;
        }
        (false, true) => {
            next.velocity.x = constants.move_speed;
            next.facing = Facing::Right;
        }
        _ => {}
    }
    next.velocity.x *= constants.drag;

    if input.jump && next.on_ground {
        next.velocity.y = constants.jump_velocity;
        next.on_ground = false;
    }

    if !next.on_ground {
        next.velocity.y = (next.velocity.y + constants.gravity * dt).min(constants.max_fall_speed);
    }

    let previous_bottom = next.position.y + half.y;
    next.position += next.velocity * dt;

    // World bounds
    next.position.x = next.position.x.clamp(half.x, world.width - half.x);
    if next.position.y < half.y {
        next.position.y = half.y;
        next.velocity.y = next.velocity.y.max(0.0);
    }

    next.on_ground = resolve_surfaces(&mut next, previous_bottom, world, half);

    if !next.is_finite() {
        return Err(SimError::NonFiniteState);
    }

    *motion = next;
    Ok(())
}

/// Snap the player onto the ground or the highest platform they crossed this step.
/// Returns whether the player ends the step supported.
fn resolve_surfaces(motion: &mut MotionState, previous_bottom: f32, world: &World, half: Vec2) -> bool {
    let bottom = motion.position.y + half.y;

    if motion.velocity.y >= 0.0 {
        let left = motion.position.x - half.x;
        let right = motion.position.x + half.x;

        let landing = world
            .platforms
            .iter()
            .filter(|p| right > p.left() && left < p.right())
            .filter(|p| previous_bottom <= p.top() + SURFACE_EPSILON && bottom >= p.top() - SURFACE_EPSILON)
            .map(|p| p.top())
            .fold(None, |best: Option<f32>, top| Some(best.map_or(top, |b| b.min(top))));

        if let Some(top) = landing {
            motion.position.y = top - half.y;
            motion.velocity.y = 0.0;
            return true;
        }
    }

    if bottom >= world.ground_y - SURFACE_EPSILON {
        motion.position.y = world.ground_y - half.y;
        motion.velocity.y = 0.0;
        return true;
    }

    false
}

/// Bundles the world, constants and fixed timestep so both sides step players identically
#[derive(Debug, Clone)]
pub struct Integrator {
    world: Arc<World>,
    constants: PhysicsConstants,
    dt: f32,
}

impl Integrator {
    pub fn new(world: Arc<World>, constants: PhysicsConstants, tick_rate_hz: u32) -> Self {
        Self {
            world,
            constants,
            dt: 1.0 / tick_rate_hz.max(1) as f32,
        }
    }

    /// Advance one tick. Dead players do not move.
    pub fn step(&self, motion: &mut MotionState, alive: bool, input: InputFlags) -> Result<(), SimError> {
        if !alive {
            return Ok(());
        }
        step_motion(motion, input, &self.world, &self.constants, self.dt)
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn constants(&self) -> &PhysicsConstants {
        &self.constants
    }

    /// Fixed timestep in seconds
    pub fn dt(&self) -> f32 {
        self.dt
    }
}
