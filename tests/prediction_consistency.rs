//! The client's prediction must match the server's authoritative simulation
//! exactly when fed the same inputs.

use std::sync::Arc;

use uuid::Uuid;

use skirmish_netcode::client::prediction::{PredictedState, PredictionEngine};
use skirmish_netcode::client::reconciliation::Reconciler;
use skirmish_netcode::game::room::{dispatch, simulate_tick, RoomEvent, RoomSettings, RoomState};
use skirmish_netcode::game::{InputBuffer, InputBufferConfig};
use skirmish_netcode::net::OutboundQueue;
use skirmish_netcode::sim::{InputFlags, Integrator, PhysicsConstants, World};
use skirmish_netcode::util::time::unix_millis;

/// A deterministic mix of running, turning and jumping
fn pattern(step: u32) -> InputFlags {
    InputFlags {
        right: step % 40 < 25,
        left: step % 40 >= 30,
        jump: step % 17 == 0,
        shoot: false,
    }
}

#[test]
fn server_and_client_trajectories_match() {
    let world = Arc::new(World::arena());
    let settings = RoomSettings::default();
    let mut room = RoomState::new(Uuid::new_v4(), "determinism", world.clone(), &settings);

    let player_id = Uuid::new_v4();
    let inputs = InputBuffer::shared(InputBufferConfig {
        capacity: 1024,
        ..InputBufferConfig::default()
    });
    let (event, _) = RoomEvent::join(player_id, inputs.clone(), OutboundQueue::new(8));
    dispatch(&mut room, event);

    let start = room.players[&player_id].state.snapshot();
    let integrator = Integrator::new(world, PhysicsConstants::default(), settings.tick_rate_hz);
    let mut engine = PredictionEngine::new(integrator, PredictedState::from(&start), 1024);
    let mut reconciler = Reconciler::new(0.8, 150.0);

    for step in 0..200 {
        let command = engine.predict(pattern(step), unix_millis());
        inputs.lock().admit(command, unix_millis()).unwrap();
        simulate_tick(&mut room);

        let server = &room.players[&player_id].state;
        assert_eq!(server.last_processed_input_seq, command.sequence_number);
        assert_eq!(server.motion, engine.state().motion, "diverged at step {step}");

        // Lossless acknowledgement never moves the player
        let correction = reconciler.reconcile(&mut engine, &server.snapshot()).unwrap();
        assert_eq!(correction.error, 0.0);
        assert_eq!(correction.replayed, 0);
    }
}

#[test]
fn delayed_acknowledgements_replay_to_the_same_state() {
    let world = Arc::new(World::arena());
    let settings = RoomSettings::default();
    let mut room = RoomState::new(Uuid::new_v4(), "latency", world.clone(), &settings);

    let player_id = Uuid::new_v4();
    let inputs = InputBuffer::shared(InputBufferConfig::default());
    let (event, _) = RoomEvent::join(player_id, inputs.clone(), OutboundQueue::new(8));
    dispatch(&mut room, event);

    let start = room.players[&player_id].state.snapshot();
    let integrator = Integrator::new(world, PhysicsConstants::default(), settings.tick_rate_hz);
    let mut engine = PredictionEngine::new(integrator, PredictedState::from(&start), 256);
    let mut reconciler = Reconciler::new(0.8, 150.0);

    // Server runs three ticks behind the client
    let mut in_flight = std::collections::VecDeque::new();
    for step in 0..120 {
        let command = engine.predict(pattern(step), unix_millis());
        in_flight.push_back(command);

        if in_flight.len() > 3 {
            let delivered = in_flight.pop_front().unwrap();
            inputs.lock().admit(delivered, unix_millis()).unwrap();
            simulate_tick(&mut room);

            let predicted = engine.state().motion;
            let snapshot = room.players[&player_id].state.snapshot();
            let correction = reconciler.reconcile(&mut engine, &snapshot).unwrap();

            assert_eq!(correction.replayed, 3);
            assert_eq!(engine.state().motion, predicted, "replay diverged at step {step}");
        }
    }
}
