//! Reconciling the predicted local player with authoritative snapshots
//!
//! The simulation state is always hard-set to server state plus replay, so two
//! clients with identical histories end up bit-identical. Only the rendered
//! position is smoothed, through a decaying visual offset.

use glam::Vec2;
use tracing::debug;

use crate::ws::protocol::PlayerSnapshot;

use super::prediction::{PredictedState, PredictionEngine};

/// Below this the visual offset is dropped entirely (px)
const OFFSET_EPSILON: f32 = 0.01;

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correction {
    /// Pending commands dropped by the acknowledgement
    pub acknowledged: usize,
    /// Commands replayed on top of the server state
    pub replayed: usize,
    /// Distance between the old and new predicted positions
    pub error: f32,
    /// The correction exceeded the snap distance and was not blended
    pub snapped: bool,
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    last_ack: u32,
    visual_offset: Vec2,
    decay: f32,
    snap_distance: f32,
}

impl Reconciler {
    pub fn new(decay: f32, snap_distance: f32) -> Self {
        Self {
            last_ack: 0,
            visual_offset: Vec2::ZERO,
            decay: decay.clamp(0.0, 1.0),
            snap_distance,
        }
    }

    /// Apply the server's view of the local player. Snapshots acknowledging
    /// less than a previous one are ignored.
    pub fn reconcile(&mut self, engine: &mut PredictionEngine, snapshot: &PlayerSnapshot) -> Option<Correction> {
        let ack = snapshot.last_processed_input_seq;
        if ack < self.last_ack {
            debug!(ack, last_ack = self.last_ack, "Ignoring out-of-order acknowledgement");
            return None;
        }
        self.last_ack = ack;

        let before = engine.state().motion.position;
        let acknowledged = engine.pending_mut().acknowledge(ack);
        let replayed = engine.rebase(PredictedState::from(snapshot));
        let after = engine.state().motion.position;

        let delta = before - after;
        let error = delta.length();
        let snapped = error > self.snap_distance;

        if snapped {
            self.visual_offset = Vec2::ZERO;
        } else {
            self.visual_offset += delta;
            if self.visual_offset.length() > self.snap_distance {
                self.visual_offset = Vec2::ZERO;
            }
        }

        if error > 1.0 {
            debug!(ack, error, replayed, snapped, "Prediction corrected");
        }

        Some(Correction {
            acknowledged,
            replayed,
            error,
            snapped,
        })
    }

    /// Shrink the visual offset; call once per rendered frame
    pub fn decay(&mut self) {
        self.visual_offset *= self.decay;
        if self.visual_offset.length() < OFFSET_EPSILON {
            self.visual_offset = Vec2::ZERO;
        }
    }

    /// Where the local player should be drawn
    pub fn render_position(&self, engine: &PredictionEngine) -> Vec2 {
        engine.state().motion.position + self.visual_offset
    }

    pub fn visual_offset(&self) -> Vec2 {
        self.visual_offset
    }

    pub fn last_ack(&self) -> u32 {
        self.last_ack
    }
}
