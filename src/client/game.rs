//! The client frame loop
//!
//! `GameClient` owns no I/O. The transport stages server messages with
//! [`GameClient::stage`]; each rendered frame [`GameClient::frame`] applies
//! them, predicts, reconciles, interpolates and returns what to send.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::Vec2;
use tracing::{debug, info, warn};

use crate::net::ClockSync;
use crate::sim::{InputFlags, Integrator, MotionState, PhysicsConstants, PlayerId, World};
use crate::util::time::unix_millis;
use crate::ws::protocol::{BulletState, ClientMsg, PlayerSnapshot, ServerMsg, ServerSnapshot};

use super::config::ClientConfig;
use super::interpolation::{RemoteInterpolator, RemoteRenderState, RemoteSample};
use super::prediction::{PredictedState, PredictionEngine};
use super::reconciliation::Reconciler;

/// Coarse link health for the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    /// Waiting for JOINED or the first snapshot
    Connecting,
    Connected,
    /// Joined, but snapshots stopped arriving
    Stale,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalRenderState {
    pub position: Vec2,
    pub velocity: Vec2,
    pub health: f32,
    pub alive: bool,
}

/// Combat notifications for the renderer, in arrival order
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CombatEvent {
    Damaged {
        player_id: PlayerId,
        shooter_id: PlayerId,
        new_health: f32,
        killed: bool,
    },
    Respawned {
        player_id: PlayerId,
        position: Vec2,
    },
}

/// Undrained combat events kept per client
const MAX_COMBAT_EVENTS: usize = 64;

/// Session facts learned from JOINED
#[derive(Debug, Clone)]
struct Membership {
    player_id: PlayerId,
    room: String,
    tick_rate_hz: u32,
}

pub struct GameClient {
    config: ClientConfig,
    world: Arc<World>,
    constants: PhysicsConstants,

    membership: Option<Membership>,
    engine: Option<PredictionEngine>,
    reconciler: Reconciler,
    interpolator: RemoteInterpolator,
    clock: ClockSync,

    inbox: VecDeque<(ServerMsg, Instant)>,
    /// Newest snapshot not yet reconciled against
    pending_snapshot: Option<ServerSnapshot>,
    last_snapshot_tick: Option<u64>,
    last_snapshot_at: Option<Instant>,
    bullets: Vec<BulletState>,
    combat_events: VecDeque<CombatEvent>,
    accumulator: f32,
    transport_open: bool,
    last_error: Option<(String, String)>,

    /// Pairs a monotonic instant with wall-clock ms so frame times map to wall time
    epoch: (Instant, u64),
}

impl GameClient {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_epoch(config, Instant::now(), unix_millis())
    }

    /// Client whose wall clock reads `wall_ms` at `instant`
    pub fn with_epoch(config: ClientConfig, instant: Instant, wall_ms: u64) -> Self {
        let reconciler = Reconciler::new(config.correction_decay, config.snap_distance);
        let interpolator = RemoteInterpolator::new(config.interpolation.clone());
        let clock = ClockSync::new(config.ping_interval, config.clock_smoothing);

        Self {
            config,
            world: Arc::new(World::arena()),
            constants: PhysicsConstants::default(),
            membership: None,
            engine: None,
            reconciler,
            interpolator,
            clock,
            inbox: VecDeque::new(),
            pending_snapshot: None,
            last_snapshot_tick: None,
            last_snapshot_at: None,
            bullets: Vec::new(),
            combat_events: VecDeque::new(),
            accumulator: 0.0,
            transport_open: true,
            last_error: None,
            epoch: (instant, wall_ms),
        }
    }

    /// First message to send after connecting
    pub fn join_message(&self) -> ClientMsg {
        ClientMsg::Join {
            room: self.config.room.clone(),
        }
    }

    /// Queue a server message for the next frame
    pub fn stage(&mut self, msg: ServerMsg, arrival: Instant) {
        self.inbox.push_back((msg, arrival));
    }

    /// The transport is gone: remote players freeze, local prediction continues
    pub fn transport_closed(&mut self) {
        if self.transport_open {
            info!("Transport closed");
        }
        self.transport_open = false;
    }

    /// Run one rendered frame. Returns the messages to send, in order.
    pub fn frame(&mut self, now: Instant, dt: f32, flags: InputFlags) -> Vec<ClientMsg> {
        let mut outgoing = Vec::new();

        while let Some((msg, arrival)) = self.inbox.pop_front() {
            self.apply_control(msg, arrival);
        }

        self.predict(now, dt, flags, &mut outgoing);
        self.reconcile();

        // Without a transport remote players hold still until they go stale
        if self.transport_open {
            self.interpolator.update(now);
        } else {
            self.interpolator.evict_stale(now);
        }

        let wall = self.wall_ms(now);
        if self.transport_open && self.membership.is_some() && self.clock.should_probe(wall) {
            outgoing.push(ClientMsg::Ping {
                client_time: self.clock.ping(wall),
            });
        }

        outgoing
    }

    fn apply_control(&mut self, msg: ServerMsg, arrival: Instant) {
        match msg {
            ServerMsg::Joined {
                player_id,
                room,
                server_time,
                tick_rate,
                spawn,
                players,
            } => self.on_joined(player_id, room, server_time, tick_rate, spawn, players, arrival),
            ServerMsg::Snapshot(snapshot) => self.on_snapshot(snapshot, arrival),
            ServerMsg::PlayerJoined { player_id, position } => {
                if self.is_local(player_id) {
                    return;
                }
                debug!(player_id = %player_id, "Remote player joined");
                self.interpolator.ingest(
                    player_id,
                    RemoteSample {
                        position,
                        velocity: Vec2::ZERO,
                        health: self.constants.max_health,
                        alive: true,
                        arrival,
                    },
                );
            }
            ServerMsg::PlayerLeft { player_id, .. } => {
                debug!(player_id = %player_id, "Remote player left");
                self.interpolator.remove(&player_id);
            }
            ServerMsg::Pong {
                client_time,
                server_time,
            } => {
                let wall = self.wall_ms(arrival);
                self.clock.on_pong(client_time, server_time, wall);
            }
            ServerMsg::PlayerDamaged {
                player_id,
                shooter_id,
                new_health,
                killed,
                ..
            } => {
                if self.is_local(player_id) {
                    if let Some(engine) = self.engine.as_mut() {
                        engine.set_vitals(new_health, !killed);
                    }
                }
                self.push_combat_event(CombatEvent::Damaged {
                    player_id,
                    shooter_id,
                    new_health,
                    killed,
                });
            }
            ServerMsg::PlayerRespawned {
                player_id,
                position,
                health,
            } => {
                if !self.is_local(player_id) {
                    self.interpolator.ingest(
                        player_id,
                        RemoteSample {
                            position,
                            velocity: Vec2::ZERO,
                            health,
                            alive: true,
                            arrival,
                        },
                    );
                }
                self.push_combat_event(CombatEvent::Respawned { player_id, position });
            }
            ServerMsg::InputRejected {
                sequence_number,
                reason,
            } => {
                debug!(sequence = sequence_number, ?reason, "Input rejected by server");
                if let Some(engine) = self.engine.as_mut() {
                    engine.pending_mut().remove(sequence_number);
                }
            }
            ServerMsg::Error { code, message } => {
                warn!(code = %code, message = %message, "Server error");
                self.last_error = Some((code, message));
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn on_joined(
        &mut self,
        player_id: PlayerId,
        room: String,
        server_time: u64,
        tick_rate: u32,
        spawn: Vec2,
        players: Vec<PlayerSnapshot>,
        arrival: Instant,
    ) {
        info!(player_id = %player_id, room = %room, tick_rate, "Joined room");

        let initial = players
            .iter()
            .find(|p| p.id == player_id)
            .map(PredictedState::from)
            .unwrap_or(PredictedState {
                motion: MotionState::at_rest(spawn),
                health: self.constants.max_health,
                alive: true,
            });

        // Sequence numbers are never reused on one connection, even across rooms
        let next_sequence = self.engine.as_ref().map_or(1, PredictionEngine::next_sequence);
        let integrator = Integrator::new(self.world.clone(), self.constants, tick_rate);
        self.engine = Some(
            PredictionEngine::new(integrator, initial, self.config.max_pending_inputs).with_next_sequence(next_sequence),
        );
        self.reconciler = Reconciler::new(self.config.correction_decay, self.config.snap_distance);
        self.interpolator = RemoteInterpolator::new(self.config.interpolation.clone());
        self.bullets.clear();
        self.accumulator = 0.0;
        self.pending_snapshot = None;
        self.last_snapshot_tick = None;

        let wall = self.wall_ms(arrival);
        self.clock.seed(server_time, wall);

        for player in players.iter().filter(|p| p.id != player_id) {
            self.interpolator.ingest(player.id, remote_sample(player, arrival));
        }

        self.membership = Some(Membership {
            player_id,
            room,
            tick_rate_hz: tick_rate,
        });
    }

    fn on_snapshot(&mut self, snapshot: ServerSnapshot, arrival: Instant) {
        if self.last_snapshot_tick.is_some_and(|tick| snapshot.server_tick <= tick) {
            debug!(tick = snapshot.server_tick, "Dropping out-of-order snapshot");
            return;
        }
        self.last_snapshot_tick = Some(snapshot.server_tick);
        self.last_snapshot_at = Some(arrival);

        let local = self.membership.as_ref().map(|m| m.player_id);
        for player in snapshot.players.iter().filter(|p| Some(p.id) != local) {
            self.interpolator.ingest(player.id, remote_sample(player, arrival));
        }

        self.bullets.clone_from(&snapshot.bullets);
        self.pending_snapshot = Some(snapshot);
    }

    /// Fixed-step prediction at the server's tick rate
    fn predict(&mut self, now: Instant, dt: f32, flags: InputFlags, outgoing: &mut Vec<ClientMsg>) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };

        let step = engine.integrator().dt();
        self.accumulator += dt.max(0.0);

        let timestamp = self.clock.server_time(self.epoch.1 + ms_since(self.epoch.0, now));
        let mut steps = 0;
        while self.accumulator >= step && steps < self.config.max_steps_per_frame {
            let command = engine.predict(flags, timestamp);
            outgoing.push(ClientMsg::Input(command));
            self.accumulator -= step;
            steps += 1;
        }

        if self.accumulator >= step {
            debug!(steps, leftover = self.accumulator, "Frame too long, dropping simulation time");
            self.accumulator = 0.0;
        }
    }

    fn reconcile(&mut self) {
        let snapshot = self.pending_snapshot.take();
        if let (Some(engine), Some(snapshot), Some(membership)) =
            (self.engine.as_mut(), snapshot, self.membership.as_ref())
        {
            if let Some(own) = snapshot.player(membership.player_id) {
                self.reconciler.reconcile(engine, own);
            }
        }
        self.reconciler.decay();
    }

    fn push_combat_event(&mut self, event: CombatEvent) {
        if self.combat_events.len() >= MAX_COMBAT_EVENTS {
            self.combat_events.pop_front();
        }
        self.combat_events.push_back(event);
    }

    fn wall_ms(&self, at: Instant) -> u64 {
        self.epoch.1 + ms_since(self.epoch.0, at)
    }

    fn is_local(&self, id: PlayerId) -> bool {
        self.membership.as_ref().is_some_and(|m| m.player_id == id)
    }

    pub fn connectivity(&self, now: Instant) -> Connectivity {
        if !self.transport_open {
            return Connectivity::Disconnected;
        }
        match (&self.membership, self.last_snapshot_at) {
            (Some(_), Some(at)) if now.saturating_duration_since(at) > self.config.connection_stale_after => {
                Connectivity::Stale
            }
            (Some(_), Some(_)) => Connectivity::Connected,
            _ => Connectivity::Connecting,
        }
    }

    pub fn local_render_state(&self) -> Option<LocalRenderState> {
        let engine = self.engine.as_ref()?;
        let state = engine.state();
        Some(LocalRenderState {
            position: self.reconciler.render_position(engine),
            velocity: state.motion.velocity,
            health: state.health,
            alive: state.alive,
        })
    }

    pub fn remote_render_states(&self) -> HashMap<PlayerId, RemoteRenderState> {
        self.interpolator.render_states()
    }

    pub fn bullets(&self) -> &[BulletState] {
        &self.bullets
    }

    /// Take the combat events received since the last call
    pub fn drain_combat_events(&mut self) -> Vec<CombatEvent> {
        self.combat_events.drain(..).collect()
    }

    pub fn player_id(&self) -> Option<PlayerId> {
        self.membership.as_ref().map(|m| m.player_id)
    }

    pub fn room(&self) -> Option<&str> {
        self.membership.as_ref().map(|m| m.room.as_str())
    }

    pub fn tick_rate_hz(&self) -> Option<u32> {
        self.membership.as_ref().map(|m| m.tick_rate_hz)
    }

    pub fn pending_inputs(&self) -> usize {
        self.engine.as_ref().map_or(0, |e| e.pending().len())
    }

    pub fn predicted_state(&self) -> Option<&PredictedState> {
        self.engine.as_ref().map(|e| e.state())
    }

    pub fn rtt(&self) -> Option<Duration> {
        self.clock.rtt_ms().map(|ms| Duration::from_secs_f64(ms / 1_000.0))
    }

    /// Most recent ERROR from the server as `(code, message)`
    pub fn last_error(&self) -> Option<(&str, &str)> {
        self.last_error.as_ref().map(|(c, m)| (c.as_str(), m.as_str()))
    }
}

fn remote_sample(player: &PlayerSnapshot, arrival: Instant) -> RemoteSample {
    RemoteSample {
        position: player.motion.position,
        velocity: player.motion.velocity,
        health: player.health,
        alive: player.alive,
        arrival,
    }
}

fn ms_since(epoch: Instant, at: Instant) -> u64 {
    at.saturating_duration_since(epoch).as_millis() as u64
}
