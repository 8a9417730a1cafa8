//! Registry of running rooms, keyed by name

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc::error::SendError;
use tracing::{debug, info};

use crate::config::Config;
use crate::sim::World;
use crate::ws::protocol::DEFAULT_ROOM;

use super::room::{Room, RoomError, RoomEvent, RoomHandle, RoomSettings};

const MAX_ROOM_NAME_LEN: usize = 32;

pub struct RoomRegistry {
    rooms: Arc<DashMap<String, RoomHandle>>,
    settings: RoomSettings,
    world: Arc<World>,
}

impl RoomRegistry {
    pub fn new(settings: RoomSettings, world: Arc<World>) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            settings,
            world,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let settings = RoomSettings {
            tick_rate_hz: config.tick_rate_hz,
            max_players: config.max_players_per_room,
            ..RoomSettings::default()
        };
        Self::new(settings, Arc::new(World::arena()))
    }

    pub fn get(&self, name: &str) -> Option<RoomHandle> {
        self.rooms.get(name).map(|r| r.value().clone())
    }

    /// Existing room by name, or a freshly spawned one
    fn get_or_create(&self, name: &str) -> RoomHandle {
        self.rooms
            .entry(name.to_string())
            .or_insert_with(|| {
                let (room, handle) = Room::new(name, self.world.clone(), &self.settings);
                info!(room = %name, room_id = %handle.id, "Spawning room");
                tokio::spawn(room.run(self.rooms.clone()));
                handle
            })
            .value()
            .clone()
    }

    /// Route a join event to the named room, creating it on first use.
    /// A room that closed between lookup and send is replaced once.
    pub async fn join(&self, name: &str, event: RoomEvent) -> Result<RoomHandle, RoomError> {
        let mut event = event;
        for _ in 0..2 {
            let handle = self.get_or_create(name);
            match handle.events_tx.send(event).await {
                Ok(()) => return Ok(handle),
                Err(SendError(returned)) => {
                    debug!(room = %name, room_id = %handle.id, "Room closed during join, retrying");
                    self.rooms.remove_if(name, |_, h| h.id == handle.id);
                    event = returned;
                }
            }
        }
        Err(RoomError::Closed)
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn total_players(&self) -> usize {
        self.rooms.iter().map(|r| r.value().player_count()).sum()
    }

    pub fn settings(&self) -> &RoomSettings {
        &self.settings
    }
}

/// Trimmed room name, falling back to the default lobby
pub fn normalize_room_name(hint: Option<&str>) -> String {
    let name = hint.map(str::trim).unwrap_or_default();
    if name.is_empty() {
        return DEFAULT_ROOM.to_string();
    }
    name.chars().take(MAX_ROOM_NAME_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::input_buffer::{InputBuffer, InputBufferConfig};
    use crate::net::OutboundQueue;
    use crate::ws::protocol::ServerMsg;
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn room_names_are_normalized() {
        assert_eq!(normalize_room_name(None), "lobby");
        assert_eq!(normalize_room_name(Some("   ")), "lobby");
        assert_eq!(normalize_room_name(Some(" arena ")), "arena");
        assert_eq!(normalize_room_name(Some(&"x".repeat(100))).len(), 32);
    }

    async fn next_msg(queue: &OutboundQueue) -> ServerMsg {
        let frame = tokio::time::timeout(Duration::from_secs(2), queue.next())
            .await
            .expect("timed out")
            .expect("queue closed");
        serde_json::from_str(&frame.text).unwrap()
    }

    #[tokio::test]
    async fn join_spawns_room_and_streams_snapshots() {
        let registry = RoomRegistry::new(RoomSettings::default(), Arc::new(World::arena()));
        let player_id = Uuid::new_v4();
        let outbound = OutboundQueue::new(16);

        let (event, outcome) = RoomEvent::join(
            player_id,
            InputBuffer::shared(InputBufferConfig::default()),
            outbound.clone(),
        );
        let handle = registry.join("arena", event).await.unwrap();

        assert_eq!(outcome.await.unwrap(), Ok(()));
        assert_eq!(handle.name, "arena");
        assert_eq!(registry.active_rooms(), 1);

        match next_msg(&outbound).await {
            ServerMsg::Joined { player_id: id, room, tick_rate, .. } => {
                assert_eq!(id, player_id);
                assert_eq!(room, "arena");
                assert_eq!(tick_rate, 20);
            }
            other => panic!("expected JOINED, got {other:?}"),
        }
        match next_msg(&outbound).await {
            ServerMsg::Snapshot(snapshot) => assert!(snapshot.player(player_id).is_some()),
            other => panic!("expected SNAPSHOT, got {other:?}"),
        }
        assert_eq!(registry.total_players(), 1);
    }

    #[tokio::test]
    async fn empty_room_shuts_down_and_is_replaced() {
        let settings = RoomSettings {
            idle_shutdown: Duration::from_millis(100),
            ..RoomSettings::default()
        };
        let registry = RoomRegistry::new(settings, Arc::new(World::arena()));
        let player_id = Uuid::new_v4();
        let join = || {
            RoomEvent::join(
                player_id,
                InputBuffer::shared(InputBufferConfig::default()),
                OutboundQueue::new(16),
            )
            .0
        };

        let first = registry.join("lobby", join()).await.unwrap();
        first.leave(player_id).await;

        tokio::time::timeout(Duration::from_secs(2), async {
            while !first.is_closed() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("room never closed");
        assert!(registry.get("lobby").is_none());

        let second = registry.join("lobby", join()).await.unwrap();
        assert_ne!(first.id, second.id);
    }
}
