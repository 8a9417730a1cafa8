//! Headless bot: connects, joins a room and plays a scripted pattern,
//! logging what a renderer would draw.

use std::time::{Duration, Instant};

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use skirmish_netcode::client::{ClientConfig, ClientTransport, CombatEvent, GameClient, TransportEvent};
use skirmish_netcode::sim::InputFlags;
use skirmish_netcode::util::logging::init_tracing;

const FPS: u64 = 60;

/// Run right, then left, jumping and shooting on a fixed cycle
fn scripted_input(frame: u64) -> InputFlags {
    let phase = frame % 240;
    InputFlags {
        right: phase < 120,
        left: phase >= 120,
        jump: frame % 90 == 0,
        shoot: frame % 20 == 0,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    init_tracing(&log_level, false);

    let config = ClientConfig::from_env();
    let mut transport = ClientTransport::connect(&config.server_url, config.transport_capacity).await?;
    let mut client = GameClient::new(config);

    transport.send(&client.join_message())?;

    let frame_duration = Duration::from_micros(1_000_000 / FPS);
    let mut ticker = interval(frame_duration);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut last = Instant::now();
    let mut frame: u64 = 0;

    loop {
        ticker.tick().await;
        let now = Instant::now();
        let dt = now.duration_since(last).as_secs_f32();
        last = now;

        while let Some(event) = transport.try_next() {
            match event {
                TransportEvent::Message(msg, arrival) => client.stage(msg, arrival),
                TransportEvent::Closed => client.transport_closed(),
            }
        }

        for msg in client.frame(now, dt, scripted_input(frame)) {
            if let Err(e) = transport.send(&msg) {
                warn!(error = %e, "Dropping outbound message");
            }
        }

        for event in client.drain_combat_events() {
            match event {
                CombatEvent::Damaged {
                    player_id,
                    new_health,
                    killed,
                    ..
                } => debug!(player_id = %player_id, new_health, killed, "Player damaged"),
                CombatEvent::Respawned { player_id, position } => {
                    debug!(player_id = %player_id, ?position, "Player respawned")
                }
            }
        }

        if frame % FPS == 0 {
            let local = client.local_render_state();
            info!(
                frame,
                connectivity = ?client.connectivity(now),
                position = ?local.map(|s| s.position),
                health = ?local.map(|s| s.health),
                remotes = client.remote_render_states().len(),
                bullets = client.bullets().len(),
                pending = client.pending_inputs(),
                rtt_ms = ?client.rtt().map(|d| d.as_millis()),
                "Bot status"
            );
        }

        if client.connectivity(now) == skirmish_netcode::client::Connectivity::Disconnected {
            info!("Server closed the connection");
            break;
        }

        frame += 1;
    }

    Ok(())
}
