//! Snapshot building and fan-out

use std::sync::Arc;

use tracing::{error, trace};

use crate::net::{Frame, OutboundQueue};
use crate::ws::protocol::{PlayerSnapshot, ServerMsg, ServerSnapshot};

use super::room::RoomState;

/// Builds one snapshot per tick and serializes it once for every session
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    stats: SnapshotStats,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the room's current state
    pub fn build(&self, state: &RoomState, server_time: u64) -> ServerSnapshot {
        let mut players: Vec<PlayerSnapshot> = state.players.values().map(|s| s.state.snapshot()).collect();
        players.sort_by_key(|p| p.id);

        ServerSnapshot {
            server_tick: state.tick,
            server_time,
            players,
            bullets: state.projectiles.iter().map(|p| p.state()).collect(),
        }
    }

    /// Serialize once and push the shared frame to every queue
    pub fn broadcast<'a>(
        &mut self,
        snapshot: &ServerSnapshot,
        queues: impl IntoIterator<Item = &'a Arc<OutboundQueue>>,
    ) -> usize {
        let text = match serde_json::to_string(&ServerMsg::Snapshot(snapshot.clone())) {
            Ok(text) => Arc::<str>::from(text),
            Err(e) => {
                error!(tick = snapshot.server_tick, error = %e, "Failed to serialize snapshot");
                return 0;
            }
        };

        let frame = Frame::snapshot(text.clone());
        let mut recipients = 0;
        for queue in queues {
            queue.push(frame.clone());
            recipients += 1;
        }

        self.stats.record(snapshot.players.len(), text.len());
        trace!(tick = snapshot.server_tick, recipients, bytes = text.len(), "Snapshot broadcast");
        recipients
    }

    pub fn stats(&self) -> &SnapshotStats {
        &self.stats
    }
}

/// Running snapshot size stats for debugging
#[derive(Debug, Default)]
pub struct SnapshotStats {
    pub total_snapshots: u64,
    pub total_bytes: u64,
    pub avg_players_per_snapshot: f32,
}

impl SnapshotStats {
    pub fn record(&mut self, player_count: usize, bytes: usize) {
        self.total_snapshots += 1;
        self.total_bytes += bytes as u64;

        // Running average
        let n = self.total_snapshots as f32;
        self.avg_players_per_snapshot =
            self.avg_players_per_snapshot * ((n - 1.0) / n) + (player_count as f32 / n);
    }
}
