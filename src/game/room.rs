//! Room state and authoritative tick loop
//!
//! A room task is the only writer of its player arena. Connection tasks talk
//! to it through [`RoomEvent`]s and the per-player [`SharedInputBuffer`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use glam::Vec2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::net::{Frame, OutboundQueue};
use crate::sim::combat::{CombatSystem, HitResult, Projectile, WeaponStats};
use crate::sim::{InputFlags, Integrator, PhysicsConstants, PlayerId, PlayerState, World};
use crate::util::time::{tick_duration, unix_millis, DEFAULT_TICK_RATE_HZ};
use crate::ws::protocol::ServerMsg;

use super::input_buffer::SharedInputBuffer;
use super::snapshot::SnapshotBuilder;

/// Tunables shared by every room the registry spawns
#[derive(Debug, Clone)]
pub struct RoomSettings {
    pub tick_rate_hz: u32,
    pub max_players: usize,
    pub constants: PhysicsConstants,
    pub weapon: WeaponStats,
    /// Seconds a dead player waits before respawning
    pub respawn_delay: f32,
    /// How long a room may sit empty before shutting down
    pub idle_shutdown: Duration,
    pub event_capacity: usize,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            tick_rate_hz: DEFAULT_TICK_RATE_HZ,
            max_players: 8,
            constants: PhysicsConstants::default(),
            weapon: WeaponStats::default(),
            respawn_delay: 3.0,
            idle_shutdown: Duration::from_secs(5),
            event_capacity: 64,
        }
    }
}

/// Room-level failures surfaced to clients as ERROR messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("Room is full")]
    Full,

    #[error("Room is shutting down")]
    Closed,

    #[error("Already joined a room")]
    AlreadyJoined,

    #[error("Join a room first")]
    NotJoined,
}

impl RoomError {
    pub fn code(&self) -> &'static str {
        match self {
            RoomError::Full => "room_full",
            RoomError::Closed => "room_closed",
            RoomError::AlreadyJoined => "already_joined",
            RoomError::NotJoined => "not_joined",
        }
    }

    pub fn to_msg(&self) -> ServerMsg {
        ServerMsg::error(self.code(), self.to_string())
    }
}

/// Tells the joining session whether it entered the arena
pub type JoinReply = oneshot::Sender<Result<(), RoomError>>;

/// Membership changes sent from connection tasks
#[derive(Debug)]
pub enum RoomEvent {
    Join {
        player_id: PlayerId,
        inputs: SharedInputBuffer,
        outbound: Arc<OutboundQueue>,
        reply: JoinReply,
    },
    Leave {
        player_id: PlayerId,
    },
}

impl RoomEvent {
    /// A join event plus the receiver its outcome arrives on
    pub fn join(
        player_id: PlayerId,
        inputs: SharedInputBuffer,
        outbound: Arc<OutboundQueue>,
    ) -> (Self, oneshot::Receiver<Result<(), RoomError>>) {
        let (reply, outcome) = oneshot::channel();
        let event = RoomEvent::Join {
            player_id,
            inputs,
            outbound,
            reply,
        };
        (event, outcome)
    }
}

#[derive(Debug, Clone)]
pub enum Recipient {
    Player(PlayerId),
    AllExcept(PlayerId),
    All,
    /// A session that is not (or no longer) in the arena
    Session(Arc<OutboundQueue>),
}

/// A message the room wants delivered
#[derive(Debug, Clone)]
pub struct Outbound {
    pub to: Recipient,
    pub msg: ServerMsg,
}

impl Outbound {
    fn new(to: Recipient, msg: ServerMsg) -> Self {
        Self { to, msg }
    }
}

/// One connected player: authoritative state plus its I/O endpoints
#[derive(Debug)]
pub struct PlayerSlot {
    pub state: PlayerState,
    pub inputs: SharedInputBuffer,
    pub outbound: Arc<OutboundQueue>,
}

/// Room state (owned by the room task)
pub struct RoomState {
    pub id: Uuid,
    pub name: String,
    pub tick: u64,
    pub tick_rate_hz: u32,
    pub players: HashMap<PlayerId, PlayerSlot>,
    pub projectiles: Vec<Projectile>,
    next_projectile_id: u64,
    rng: ChaCha8Rng,
    max_players: usize,
    integrator: Integrator,
    weapon: WeaponStats,
    respawn_delay: f32,
}

impl RoomState {
    pub fn new(id: Uuid, name: impl Into<String>, world: Arc<World>, settings: &RoomSettings) -> Self {
        let name = name.into();
        Self {
            id,
            rng: ChaCha8Rng::seed_from_u64(room_seed(&name)),
            name,
            tick: 0,
            tick_rate_hz: settings.tick_rate_hz,
            players: HashMap::new(),
            projectiles: Vec::new(),
            next_projectile_id: 1,
            max_players: settings.max_players,
            integrator: Integrator::new(world, settings.constants, settings.tick_rate_hz),
            weapon: settings.weapon,
            respawn_delay: settings.respawn_delay,
        }
    }

    pub fn integrator(&self) -> &Integrator {
        &self.integrator
    }

    /// Pick a spawn point for a new player
    fn choose_spawn(&mut self) -> Vec2 {
        let world = self.integrator.world();
        if world.spawn_points.is_empty() {
            let half = self.integrator.constants().player_half_extents;
            return Vec2::new(world.width / 2.0, world.ground_y - half.y);
        }
        let idx = self.rng.gen_range(0..world.spawn_points.len());
        world.spawn_points[idx]
    }

    /// Deliver messages to their recipients' outbound queues
    pub fn deliver(&self, outbound: Vec<Outbound>) {
        for Outbound { to, msg } in outbound {
            let frame = match Frame::control(&msg) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(room = %self.name, error = %e, "Failed to serialize room message");
                    continue;
                }
            };

            match to {
                Recipient::Player(id) => {
                    if let Some(slot) = self.players.get(&id) {
                        slot.outbound.push(frame);
                    }
                }
                Recipient::AllExcept(id) => {
                    for slot in self.players.values().filter(|s| s.state.id != id) {
                        slot.outbound.push(frame.clone());
                    }
                }
                Recipient::All => {
                    for slot in self.players.values() {
                        slot.outbound.push(frame.clone());
                    }
                }
                Recipient::Session(queue) => {
                    queue.push(frame);
                }
            }
        }
    }
}

/// Stable per-room seed so spawn selection is reproducible for a given room name
fn room_seed(name: &str) -> u64 {
    // FNV-1a
    name.bytes()
        .fold(0xcbf2_9ce4_8422_2325_u64, |hash, b| (hash ^ b as u64).wrapping_mul(0x0100_0000_01b3))
}

/// Apply one membership event to the arena
pub fn dispatch(state: &mut RoomState, event: RoomEvent) -> Vec<Outbound> {
    match event {
        RoomEvent::Join {
            player_id,
            inputs,
            outbound,
            reply,
        } => {
            let session = outbound.clone();
            let result = handle_join(state, player_id, inputs, outbound);
            if reply.send(result.as_ref().map(|_| ()).map_err(|e| *e)).is_err() {
                debug!(room = %state.name, player_id = %player_id, "Joining session stopped waiting");
            }
            result.unwrap_or_else(|e| vec![Outbound::new(Recipient::Session(session), e.to_msg())])
        }
        RoomEvent::Leave { player_id } => handle_leave(state, player_id),
    }
}

fn handle_join(
    state: &mut RoomState,
    player_id: PlayerId,
    inputs: SharedInputBuffer,
    outbound: Arc<OutboundQueue>,
) -> Result<Vec<Outbound>, RoomError> {
    if state.players.contains_key(&player_id) {
        warn!(room = %state.name, player_id = %player_id, "Player already in room");
        return Err(RoomError::AlreadyJoined);
    }

    if state.players.len() >= state.max_players {
        info!(room = %state.name, player_id = %player_id, "Room full, rejecting join");
        return Err(RoomError::Full);
    }

    let spawn = state.choose_spawn();
    let player = PlayerState::spawn(player_id, spawn, state.integrator.constants());
    state.players.insert(
        player_id,
        PlayerSlot {
            state: player,
            inputs,
            outbound,
        },
    );

    info!(
        room = %state.name,
        player_id = %player_id,
        player_count = state.players.len(),
        "Player joined room"
    );

    let mut players: Vec<_> = state.players.values().map(|s| s.state.snapshot()).collect();
    players.sort_by_key(|p| p.id);

    Ok(vec![
        Outbound::new(
            Recipient::Player(player_id),
            ServerMsg::Joined {
                player_id,
                room: state.name.clone(),
                server_time: unix_millis(),
                tick_rate: state.tick_rate_hz,
                spawn,
                players,
            },
        ),
        Outbound::new(
            Recipient::AllExcept(player_id),
            ServerMsg::PlayerJoined {
                player_id,
                position: spawn,
            },
        ),
    ])
}

fn handle_leave(state: &mut RoomState, player_id: PlayerId) -> Vec<Outbound> {
    let Some(slot) = state.players.remove(&player_id) else {
        debug!(room = %state.name, player_id = %player_id, "Leave for unknown player");
        return Vec::new();
    };

    // Bullets outlive their shooter
    info!(
        room = %state.name,
        player_id = %player_id,
        player_count = state.players.len(),
        "Player left room"
    );

    vec![Outbound::new(
        Recipient::All,
        ServerMsg::PlayerLeft {
            player_id,
            position: slot.state.motion.position,
        },
    )]
}

/// Combat outcomes of one tick, broadcast to the room
#[derive(Debug, Default)]
pub struct TickEvents {
    pub hits: Vec<HitResult>,
    /// Players moved back to their spawn point, with the new position
    pub respawns: Vec<(PlayerId, Vec2)>,
}

impl TickEvents {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty() && self.respawns.is_empty()
    }

    pub fn into_outbound(self, max_health: f32) -> Vec<Outbound> {
        let damaged = self.hits.into_iter().map(|hit| {
            Outbound::new(
                Recipient::All,
                ServerMsg::PlayerDamaged {
                    player_id: hit.target_id,
                    shooter_id: hit.shooter_id,
                    damage: hit.damage,
                    new_health: hit.remaining_health,
                    killed: hit.killed,
                },
            )
        });
        let respawned = self.respawns.into_iter().map(|(player_id, position)| {
            Outbound::new(
                Recipient::All,
                ServerMsg::PlayerRespawned {
                    player_id,
                    position,
                    health: max_health,
                },
            )
        });
        damaged.chain(respawned).collect()
    }
}

/// Advance the room by one fixed step
pub fn simulate_tick(state: &mut RoomState) -> TickEvents {
    state.tick += 1;
    let dt = state.integrator.dt();

    let mut new_projectiles = Vec::new();
    let mut respawns = Vec::new();

    for slot in state.players.values_mut() {
        let command = slot.inputs.lock().pop_next();
        let flags = command.map(|c| c.flags).unwrap_or(InputFlags::NONE);
        let player = &mut slot.state;

        // Consumed inputs are acknowledged even when they cannot be applied
        if let Some(command) = command {
            player.last_processed_input_seq = command.sequence_number;
        }

        player.shot_cooldown = CombatSystem::update_cooldown(player.shot_cooldown, dt);

        if !player.alive {
            player.respawn_timer -= dt;
            if player.respawn_timer <= 0.0 {
                player.respawn(state.integrator.constants());
                respawns.push((player.id, player.motion.position));
                debug!(room = %state.name, player_id = %player.id, "Player respawned");
            }
            continue;
        }

        let before = player.motion;
        if let Err(e) = state.integrator.step(&mut player.motion, player.alive, flags) {
            warn!(
                room = %state.name,
                player_id = %player.id,
                tick = state.tick,
                error = %e,
                "Player update failed, keeping previous state"
            );
            player.motion = before;
            if !player.motion.is_finite() {
                player.respawn(state.integrator.constants());
                respawns.push((player.id, player.motion.position));
            }
            continue;
        }

        if flags.shoot && CombatSystem::can_fire(player.shot_cooldown) {
            let muzzle = CombatSystem::muzzle(
                player.motion.position,
                player.motion.facing,
                state.integrator.constants().player_half_extents,
            );
            new_projectiles.push(Projectile::new(
                state.next_projectile_id,
                player.id,
                muzzle,
                player.motion.facing,
                &state.weapon,
            ));
            state.next_projectile_id += 1;
            player.shot_cooldown = state.weapon.cooldown;
        }
    }

    state.projectiles.extend(new_projectiles);
    let hits = update_projectiles(state, dt);
    TickEvents { hits, respawns }
}

/// Move projectiles along their path this tick. A projectile stops at the
/// first living non-owner its path touches, starting from where it was.
fn update_projectiles(state: &mut RoomState, dt: f32) -> Vec<HitResult> {
    let half = state.integrator.constants().player_half_extents;
    let world = state.integrator.world();
    let mut candidates = Vec::new();

    let players = &state.players;
    state.projectiles.retain_mut(|projectile| {
        let from = projectile.advance(dt);

        let target = players
            .values()
            .map(|s| &s.state)
            .filter(|p| p.alive && p.id != projectile.owner_id)
            .filter_map(|p| projectile.sweep_hit(from, p.motion.position, half).map(|t| (t, p.id)))
            .min_by(|a, b| a.0.total_cmp(&b.0));

        match target {
            Some((_, target_id)) => {
                candidates.push((projectile.id, projectile.owner_id, target_id, projectile.damage));
                false
            }
            None => projectile.is_live(world),
        }
    });

    let mut hits = Vec::new();
    for (projectile_id, shooter_id, target_id, damage) in candidates {
        let Some(target) = state.players.get_mut(&target_id).map(|s| &mut s.state) else {
            continue;
        };
        // Killed by an earlier projectile this tick
        if !target.alive {
            continue;
        }

        let (health, killed) = CombatSystem::apply_damage(target.health, damage);
        target.health = health;
        hits.push(HitResult {
            projectile_id,
            shooter_id,
            target_id,
            damage,
            remaining_health: health,
            killed,
        });
        if killed {
            target.alive = false;
            target.motion.velocity = Vec2::ZERO;
            target.respawn_timer = state.respawn_delay;
            info!(
                room = %state.name,
                shooter_id = %shooter_id,
                target_id = %target_id,
                "Player killed"
            );
        }
    }

    hits
}

/// Handle to a running room
#[derive(Debug, Clone)]
pub struct RoomHandle {
    pub id: Uuid,
    pub name: String,
    pub events_tx: mpsc::Sender<RoomEvent>,
    player_count: Arc<AtomicUsize>,
}

impl RoomHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    /// True once the room task has stopped accepting events
    pub fn is_closed(&self) -> bool {
        self.events_tx.is_closed()
    }

    pub async fn leave(&self, player_id: PlayerId) {
        if self.events_tx.send(RoomEvent::Leave { player_id }).await.is_err() {
            debug!(room = %self.name, player_id = %player_id, "Room already closed on leave");
        }
    }
}

/// The authoritative room
pub struct Room {
    state: RoomState,
    events_rx: mpsc::Receiver<RoomEvent>,
    snapshots: SnapshotBuilder,
    player_count: Arc<AtomicUsize>,
    idle_shutdown: Duration,
}

impl Room {
    pub fn new(name: impl Into<String>, world: Arc<World>, settings: &RoomSettings) -> (Self, RoomHandle) {
        let id = Uuid::new_v4();
        let state = RoomState::new(id, name, world, settings);
        let (events_tx, events_rx) = mpsc::channel(settings.event_capacity.max(1));
        let player_count = Arc::new(AtomicUsize::new(0));

        let handle = RoomHandle {
            id,
            name: state.name.clone(),
            events_tx,
            player_count: player_count.clone(),
        };

        let room = Self {
            state,
            events_rx,
            snapshots: SnapshotBuilder::new(),
            player_count,
            idle_shutdown: settings.idle_shutdown,
        };

        (room, handle)
    }

    /// Run the authoritative tick loop until the room has been empty for
    /// `idle_shutdown`. The room removes itself from `rooms` before closing.
    pub async fn run(mut self, rooms: Arc<DashMap<String, RoomHandle>>) {
        info!(room = %self.state.name, room_id = %self.state.id, "Room started");

        let mut tick_interval = interval(tick_duration(self.state.tick_rate_hz));
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut empty_since = Some(Instant::now());

        loop {
            tick_interval.tick().await;

            self.drain_events();

            let events = simulate_tick(&mut self.state);
            if !events.is_empty() {
                debug!(
                    room = %self.state.name,
                    tick = self.state.tick,
                    hits = events.hits.len(),
                    respawns = events.respawns.len(),
                    "Combat events"
                );
                let max_health = self.state.integrator.constants().max_health;
                self.state.deliver(events.into_outbound(max_health));
            }

            let snapshot = self.snapshots.build(&self.state, unix_millis());
            self.snapshots.broadcast(&snapshot, self.state.players.values().map(|s| &s.outbound));

            if self.state.players.is_empty() {
                let since = *empty_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= self.idle_shutdown {
                    break;
                }
            } else {
                empty_since = None;
            }
        }

        let id = self.state.id;
        rooms.remove_if(&self.state.name, |_, handle| handle.id == id);
        self.events_rx.close();

        // Joins that raced the shutdown never entered the arena
        while let Ok(event) = self.events_rx.try_recv() {
            if let RoomEvent::Join { outbound, reply, .. } = event {
                let _ = reply.send(Err(RoomError::Closed));
                outbound.push_msg(&RoomError::Closed.to_msg());
            }
        }

        info!(
            room = %self.state.name,
            ticks = self.state.tick,
            snapshots = self.snapshots.stats().total_snapshots,
            "Room closed"
        );
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            let outbound = dispatch(&mut self.state, event);
            self.player_count.store(self.state.players.len(), Ordering::Relaxed);
            self.state.deliver(outbound);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::input_buffer::{InputBuffer, InputBufferConfig};
    use crate::net::FrameKind;
    use crate::sim::InputCommand;

    struct TestPlayer {
        id: PlayerId,
        inputs: SharedInputBuffer,
        outbound: Arc<OutboundQueue>,
    }

    impl TestPlayer {
        fn new() -> Self {
            Self {
                id: Uuid::new_v4(),
                inputs: InputBuffer::shared(InputBufferConfig::default()),
                outbound: OutboundQueue::new(32),
            }
        }

        fn join(&self, state: &mut RoomState) -> Vec<Outbound> {
            let (event, _) = RoomEvent::join(self.id, self.inputs.clone(), self.outbound.clone());
            dispatch(state, event)
        }

        /// Move onto the ground at `x`, facing right
        fn place(&self, state: &mut RoomState, x: f32) {
            let player = &mut state.players.get_mut(&self.id).unwrap().state;
            player.motion.position = Vec2::new(x, 680.0);
            player.motion.velocity = Vec2::ZERO;
            player.motion.on_ground = true;
            player.motion.facing = crate::sim::Facing::Right;
        }

        fn send(&self, sequence_number: u32, flags: InputFlags) {
            let now = unix_millis();
            self.inputs
                .lock()
                .admit(
                    InputCommand {
                        sequence_number,
                        flags,
                        timestamp: now,
                    },
                    now,
                )
                .unwrap();
        }

        fn drain_texts(&self) -> Vec<String> {
            let mut texts = Vec::new();
            while !self.outbound.is_empty() {
                let frame = tokio_test::block_on(self.outbound.next()).unwrap();
                assert_eq!(frame.kind, FrameKind::Control);
                texts.push(frame.text.to_string());
            }
            texts
        }
    }

    fn room(settings: RoomSettings) -> RoomState {
        RoomState::new(Uuid::new_v4(), "test", Arc::new(World::arena()), &settings)
    }

    const RIGHT: InputFlags = InputFlags {
        left: false,
        right: true,
        jump: false,
        shoot: false,
    };

    #[test]
    fn join_replies_to_joiner_and_notifies_others() {
        let mut state = room(RoomSettings::default());
        let alice = TestPlayer::new();
        let bob = TestPlayer::new();

        let out = alice.join(&mut state);
        state.deliver(out);
        let out = bob.join(&mut state);
        assert!(matches!(out[0].msg, ServerMsg::Joined { ref players, .. } if players.len() == 2));
        assert!(matches!(out[1].to, Recipient::AllExcept(id) if id == bob.id));
        state.deliver(out);

        let alice_msgs = alice.drain_texts();
        assert!(alice_msgs[0].contains("\"JOINED\""));
        assert!(alice_msgs[1].contains("\"PLAYER_JOINED\""));
        assert!(bob.drain_texts()[0].contains("\"JOINED\""));
        assert_eq!(state.world_spawn_check(), 2);
    }

    #[test]
    fn full_room_rejects_join() {
        let mut state = room(RoomSettings {
            max_players: 1,
            ..RoomSettings::default()
        });
        let alice = TestPlayer::new();
        let bob = TestPlayer::new();
        alice.join(&mut state);

        let (event, mut outcome) = RoomEvent::join(bob.id, bob.inputs.clone(), bob.outbound.clone());
        let out = dispatch(&mut state, event);
        state.deliver(out);

        assert_eq!(state.players.len(), 1);
        assert_eq!(outcome.try_recv().unwrap(), Err(RoomError::Full));
        assert!(bob.drain_texts()[0].contains("room_full"));
    }

    #[test]
    fn join_outcome_is_reported_to_the_session() {
        let mut state = room(RoomSettings::default());
        let alice = TestPlayer::new();

        let (event, mut outcome) = RoomEvent::join(alice.id, alice.inputs.clone(), alice.outbound.clone());
        dispatch(&mut state, event);
        assert_eq!(outcome.try_recv().unwrap(), Ok(()));

        let (event, mut outcome) = RoomEvent::join(alice.id, alice.inputs.clone(), alice.outbound.clone());
        dispatch(&mut state, event);
        assert_eq!(outcome.try_recv().unwrap(), Err(RoomError::AlreadyJoined));
        assert_eq!(state.players.len(), 1);
    }

    #[test]
    fn leave_broadcasts_last_position() {
        let mut state = room(RoomSettings::default());
        let alice = TestPlayer::new();
        let bob = TestPlayer::new();
        alice.join(&mut state);
        bob.join(&mut state);
        alice.drain_texts();

        let out = dispatch(&mut state, RoomEvent::Leave { player_id: bob.id });
        state.deliver(out);

        assert!(!state.players.contains_key(&bob.id));
        let texts = alice.drain_texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("\"PLAYER_LEFT\""));
        assert!(dispatch(&mut state, RoomEvent::Leave { player_id: bob.id }).is_empty());
    }

    #[test]
    fn tick_consumes_one_input_per_player_in_order() {
        let mut state = room(RoomSettings::default());
        let alice = TestPlayer::new();
        alice.join(&mut state);
        for seq in 1..=3 {
            alice.send(seq, RIGHT);
        }

        simulate_tick(&mut state);
        assert_eq!(state.players[&alice.id].state.last_processed_input_seq, 1);
        simulate_tick(&mut state);
        simulate_tick(&mut state);
        assert_eq!(state.players[&alice.id].state.last_processed_input_seq, 3);

        // No input: acknowledgement holds, velocity decays
        let vx = state.players[&alice.id].state.motion.velocity.x;
        simulate_tick(&mut state);
        let player = &state.players[&alice.id].state;
        assert_eq!(player.last_processed_input_seq, 3);
        assert!(player.motion.velocity.x < vx);
    }

    #[test]
    fn duplicate_input_does_not_advance_acknowledgement() {
        let mut state = room(RoomSettings::default());
        let alice = TestPlayer::new();
        alice.join(&mut state);

        alice.send(1, RIGHT);
        simulate_tick(&mut state);

        let now = unix_millis();
        let duplicate = InputCommand {
            sequence_number: 1,
            flags: RIGHT,
            timestamp: now,
        };
        assert!(alice.inputs.lock().admit(duplicate, now).is_err());

        simulate_tick(&mut state);
        assert_eq!(state.players[&alice.id].state.last_processed_input_seq, 1);
    }

    #[test]
    fn corrupt_player_does_not_stop_others() {
        let mut state = room(RoomSettings::default());
        let alice = TestPlayer::new();
        let bob = TestPlayer::new();
        alice.join(&mut state);
        bob.join(&mut state);

        let bob_start = state.players[&bob.id].state.motion.position;
        state.players.get_mut(&alice.id).unwrap().state.motion.position.x = f32::NAN;
        bob.send(1, RIGHT);

        simulate_tick(&mut state);

        let alice_state = &state.players[&alice.id].state;
        assert!(alice_state.motion.is_finite());
        assert_eq!(alice_state.motion.position, alice_state.spawn_point);
        assert!(state.players[&bob.id].state.motion.position.x > bob_start.x);
    }

    #[test]
    fn shooting_spawns_bullet_and_respects_cooldown() {
        let mut state = room(RoomSettings::default());
        let alice = TestPlayer::new();
        alice.join(&mut state);
        let shoot = InputFlags {
            shoot: true,
            ..InputFlags::NONE
        };
        alice.send(1, shoot);
        alice.send(2, shoot);

        simulate_tick(&mut state);
        assert_eq!(state.projectiles.len(), 1);
        assert_eq!(state.projectiles[0].owner_id, alice.id);

        // 50ms later the 200ms cooldown has not elapsed
        simulate_tick(&mut state);
        assert_eq!(state.projectiles.len(), 1);
    }

    #[test]
    fn bullet_hits_damage_and_kill() {
        let mut state = room(RoomSettings::default());
        let alice = TestPlayer::new();
        let bob = TestPlayer::new();
        alice.join(&mut state);
        bob.join(&mut state);

        let target = Vec2::new(1000.0, 680.0);
        let bob_slot = state.players.get_mut(&bob.id).unwrap();
        bob_slot.state.motion.position = target;
        bob_slot.state.motion.on_ground = true;
        bob_slot.state.health = 25.0;

        let weapon = WeaponStats::default();
        state.projectiles.push(Projectile::new(
            99,
            alice.id,
            target - Vec2::new(20.0, 0.0),
            crate::sim::Facing::Right,
            &weapon,
        ));

        let events = simulate_tick(&mut state);
        let hits = &events.hits;

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].target_id, bob.id);
        assert!(hits[0].killed);
        assert_eq!(hits[0].remaining_health, 0.0);
        assert!(state.projectiles.is_empty());
        let bob_state = &state.players[&bob.id].state;
        assert!(!bob_state.alive);
        assert_eq!(bob_state.health, 0.0);
        assert_eq!(bob_state.respawn_timer, 3.0);
    }

    #[test]
    fn fast_bullet_cannot_skip_over_a_player() {
        let mut state = room(RoomSettings::default());
        let alice = TestPlayer::new();
        let bob = TestPlayer::new();
        alice.join(&mut state);
        bob.join(&mut state);
        alice.place(&mut state, 200.0);
        bob.place(&mut state, 1000.0);

        // One 30px step carries the bullet from 985 to 1015, past Bob's 28px hit window
        state.projectiles.push(Projectile::new(
            7,
            alice.id,
            Vec2::new(985.0, 680.0),
            crate::sim::Facing::Right,
            &WeaponStats::default(),
        ));

        let events = simulate_tick(&mut state);

        assert_eq!(events.hits.len(), 1);
        assert_eq!(events.hits[0].target_id, bob.id);
        assert_eq!(state.players[&bob.id].state.health, 75.0);
        assert!(state.projectiles.is_empty());
    }

    #[test]
    fn point_blank_shot_hits_adjacent_player() {
        let mut state = room(RoomSettings::default());
        let alice = TestPlayer::new();
        let bob = TestPlayer::new();
        alice.join(&mut state);
        bob.join(&mut state);
        alice.place(&mut state, 1000.0);
        bob.place(&mut state, 1020.0);

        alice.send(
            1,
            InputFlags {
                shoot: true,
                ..InputFlags::NONE
            },
        );
        let events = simulate_tick(&mut state);

        assert_eq!(events.hits.len(), 1);
        assert_eq!(events.hits[0].shooter_id, alice.id);
        assert_eq!(state.players[&bob.id].state.health, 75.0);
    }

    #[test]
    fn nearest_player_on_the_path_takes_the_hit() {
        let mut state = room(RoomSettings::default());
        let alice = TestPlayer::new();
        let bob = TestPlayer::new();
        let carol = TestPlayer::new();
        alice.join(&mut state);
        bob.join(&mut state);
        carol.join(&mut state);
        alice.place(&mut state, 200.0);
        // Both boxes straddle the path; Carol's is entered first
        bob.place(&mut state, 1020.0);
        carol.place(&mut state, 1010.0);

        state.projectiles.push(Projectile::new(
            7,
            alice.id,
            Vec2::new(980.0, 680.0),
            crate::sim::Facing::Right,
            &WeaponStats::default(),
        ));
        let events = simulate_tick(&mut state);

        assert_eq!(events.hits.len(), 1);
        assert_eq!(events.hits[0].target_id, carol.id);
        assert_eq!(state.players[&bob.id].state.health, 100.0);
    }

    #[test]
    fn combat_events_reach_every_player() {
        let mut state = room(RoomSettings {
            respawn_delay: 0.01,
            ..RoomSettings::default()
        });
        let alice = TestPlayer::new();
        let bob = TestPlayer::new();
        let out = alice.join(&mut state);
        state.deliver(out);
        let out = bob.join(&mut state);
        state.deliver(out);
        alice.drain_texts();
        bob.drain_texts();
        alice.place(&mut state, 200.0);
        bob.place(&mut state, 1000.0);
        state.players.get_mut(&bob.id).unwrap().state.health = 25.0;

        state.projectiles.push(Projectile::new(
            7,
            alice.id,
            Vec2::new(985.0, 680.0),
            crate::sim::Facing::Right,
            &WeaponStats::default(),
        ));
        let events = simulate_tick(&mut state);
        state.deliver(events.into_outbound(100.0));

        for player in [&alice, &bob] {
            let texts = player.drain_texts();
            assert_eq!(texts.len(), 1);
            let msg: ServerMsg = serde_json::from_str(&texts[0]).unwrap();
            assert!(matches!(
                msg,
                ServerMsg::PlayerDamaged { player_id, killed: true, new_health, .. }
                    if player_id == bob.id && new_health == 0.0
            ));
        }

        // Respawn timer runs out on the next tick
        let events = simulate_tick(&mut state);
        assert_eq!(events.respawns.len(), 1);
        state.deliver(events.into_outbound(100.0));
        let msg: ServerMsg = serde_json::from_str(&alice.drain_texts()[0]).unwrap();
        assert!(matches!(
            msg,
            ServerMsg::PlayerRespawned { player_id, health, .. } if player_id == bob.id && health == 100.0
        ));
    }

    #[test]
    fn dead_player_consumes_inputs_and_respawns() {
        let mut state = room(RoomSettings {
            respawn_delay: 0.1,
            ..RoomSettings::default()
        });
        let alice = TestPlayer::new();
        alice.join(&mut state);
        {
            let player = &mut state.players.get_mut(&alice.id).unwrap().state;
            player.alive = false;
            player.health = 0.0;
            player.respawn_timer = 0.1;
        }
        alice.send(1, RIGHT);

        simulate_tick(&mut state);
        let player = &state.players[&alice.id].state;
        assert_eq!(player.last_processed_input_seq, 1);
        assert!(!player.alive);

        simulate_tick(&mut state);
        let player = &state.players[&alice.id].state;
        assert!(player.alive);
        assert_eq!(player.health, 100.0);
        assert_eq!(player.motion.position, player.spawn_point);
    }

    impl RoomState {
        /// Every player spawned on one of the arena's spawn points
        fn world_spawn_check(&self) -> usize {
            let points = &self.integrator.world().spawn_points;
            self.players
                .values()
                .filter(|s| points.contains(&s.state.spawn_point))
                .count()
        }
    }
}
