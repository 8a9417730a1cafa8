//! Smoothing for players the client does not control
//!
//! Remote players are only known through snapshots. Each one keeps a short
//! history of samples; the rendered position chases a target that is the
//! newest sample, briefly extrapolated along its velocity.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use glam::Vec2;
use tracing::debug;

use crate::sim::PlayerId;

use super::config::InterpolationConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemoteSample {
    pub position: Vec2,
    pub velocity: Vec2,
    pub health: f32,
    pub alive: bool,
    pub arrival: Instant,
}

/// Bounded history of samples for one entity, ordered by arrival
#[derive(Debug, Clone)]
pub struct RemoteSnapshotBuffer {
    samples: VecDeque<RemoteSample>,
    capacity: usize,
}

impl RemoteSnapshotBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Append a sample. Samples older than the newest one are ignored.
    pub fn push(&mut self, sample: RemoteSample) -> bool {
        if self.latest().is_some_and(|last| sample.arrival < last.arrival) {
            return false;
        }
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        true
    }

    pub fn latest(&self) -> Option<&RemoteSample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// What the renderer needs for a remote player
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemoteRenderState {
    pub position: Vec2,
    pub velocity: Vec2,
    pub health: f32,
    pub alive: bool,
}

#[derive(Debug, Clone)]
struct RemoteEntity {
    buffer: RemoteSnapshotBuffer,
    render_position: Vec2,
}

#[derive(Debug, Clone)]
pub struct RemoteInterpolator {
    config: InterpolationConfig,
    entities: HashMap<PlayerId, RemoteEntity>,
}

impl RemoteInterpolator {
    pub fn new(config: InterpolationConfig) -> Self {
        Self {
            config,
            entities: HashMap::new(),
        }
    }

    /// Record a sample, creating the entity on first sight
    pub fn ingest(&mut self, id: PlayerId, sample: RemoteSample) {
        let capacity = self.config.buffer_capacity;
        let entity = self.entities.entry(id).or_insert_with(|| RemoteEntity {
            buffer: RemoteSnapshotBuffer::new(capacity),
            render_position: sample.position,
        });

        // A respawn is a teleport, not motion to smooth over
        let respawned = entity.buffer.latest().is_some_and(|last| !last.alive) && sample.alive;
        if entity.buffer.push(sample) && respawned {
            entity.render_position = sample.position;
        }
    }

    pub fn remove(&mut self, id: &PlayerId) -> bool {
        self.entities.remove(id).is_some()
    }

    /// Drop entities whose newest sample is older than the stale timeout,
    /// without moving anyone. Returns the evicted ids.
    pub fn evict_stale(&mut self, now: Instant) -> Vec<PlayerId> {
        let timeout = self.config.stale_timeout;
        let stale: Vec<PlayerId> = self
            .entities
            .iter()
            .filter(|(_, entity)| {
                entity
                    .buffer
                    .latest()
                    .map_or(true, |latest| now.saturating_duration_since(latest.arrival) >= timeout)
            })
            .map(|(id, _)| *id)
            .collect();

        for id in &stale {
            self.entities.remove(id);
            debug!(player_id = %id, "Evicted stale remote player");
        }

        stale
    }

    /// Evict stale entities, then advance every rendered position one frame
    /// toward its target. Returns the ids evicted for staleness.
    pub fn update(&mut self, now: Instant) -> Vec<PlayerId> {
        let stale = self.evict_stale(now);
        let config = &self.config;

        for entity in self.entities.values_mut() {
            let Some(latest) = entity.buffer.latest().copied() else {
                continue;
            };

            let elapsed = now.saturating_duration_since(latest.arrival);

            let target = if latest.alive && elapsed <= config.extrapolation_window {
                let ahead = elapsed.min(config.max_extrapolation).as_secs_f32();
                let offset = (latest.velocity * ahead).clamp_length_max(config.max_extrapolation_distance);
                latest.position + offset
            } else {
                latest.position
            };

            let error = target - entity.render_position;
            let distance = error.length();
            let factor = if distance > config.far_error {
                config.far_lerp
            } else if distance > config.near_error {
                config.near_lerp
            } else {
                config.settle_lerp
            };

            entity.render_position += (error * factor).clamp_length_max(config.max_extrapolation_distance);
        }

        stale
    }

    pub fn render_state(&self, id: &PlayerId) -> Option<RemoteRenderState> {
        let entity = self.entities.get(id)?;
        let latest = entity.buffer.latest()?;
        Some(RemoteRenderState {
            position: entity.render_position,
            velocity: latest.velocity,
            health: latest.health,
            alive: latest.alive,
        })
    }

    pub fn render_states(&self) -> HashMap<PlayerId, RemoteRenderState> {
        self.entities
            .keys()
            .filter_map(|id| self.render_state(id).map(|state| (*id, state)))
            .collect()
    }

    pub fn contains(&self, id: &PlayerId) -> bool {
        self.entities.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
