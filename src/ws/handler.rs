//! WebSocket upgrade handler and per-connection session

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{normalize_room_name, InputBuffer, RoomError, RoomEvent, RoomHandle, SharedInputBuffer};
use crate::net::OutboundQueue;
use crate::sim::{InputCommand, PlayerId};
use crate::util::rate_limit::PlayerRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, RejectReason, ServerMsg};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let player_id = Uuid::new_v4();
    info!(player_id = %player_id, "New WebSocket connection");

    let (ws_sink, ws_stream) = socket.split();

    let outbound = OutboundQueue::new(state.config.outbound_queue_capacity);
    let writer_handle = tokio::spawn(write_loop(player_id, ws_sink, outbound.clone()));

    let mut session = Session {
        player_id,
        inputs: InputBuffer::shared(state.config.input_buffer_config()),
        outbound: outbound.clone(),
        rate_limiter: PlayerRateLimiter::new(state.config.input_rate_limit),
        room: None,
        state,
    };

    session.run(ws_stream).await;

    // Signal disconnect to the room
    if let Some(room) = session.room.take() {
        room.leave(player_id).await;
    }

    outbound.close();
    writer_handle.abort();

    info!(
        player_id = %player_id,
        dropped_frames = outbound.dropped_count(),
        "WebSocket connection closed"
    );
}

/// Writer task: outbound queue -> WebSocket
async fn write_loop(player_id: PlayerId, mut ws_sink: SplitSink<WebSocket, Message>, outbound: Arc<OutboundQueue>) {
    while let Some(frame) = outbound.next().await {
        // axum 0.7 messages own their text, so the shared frame is copied once here
        if let Err(e) = ws_sink.send(Message::Text(frame.text.to_string())).await {
            debug!(player_id = %player_id, error = %e, "WebSocket send failed");
            break;
        }
    }
    let _ = ws_sink.close().await;
}

/// Reader side of one connection
struct Session {
    player_id: PlayerId,
    state: AppState,
    inputs: SharedInputBuffer,
    outbound: Arc<OutboundQueue>,
    rate_limiter: PlayerRateLimiter,
    room: Option<RoomHandle>,
}

impl Session {
    async fn run(&mut self, mut ws_stream: SplitStream<WebSocket>) {
        while let Some(result) = ws_stream.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    let allowed = self.rate_limiter.check_input();

                    let msg = match serde_json::from_str::<ClientMsg>(&text) {
                        Ok(msg) => msg,
                        Err(e) => {
                            warn!(player_id = %self.player_id, error = %e, "Failed to parse client message");
                            continue;
                        }
                    };

                    if allowed {
                        self.handle_msg(msg).await;
                    } else {
                        self.reject_rate_limited(msg);
                    }
                }
                Ok(Message::Binary(_)) => {
                    warn!(player_id = %self.player_id, "Received binary message, ignoring");
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(Message::Close(_)) => {
                    info!(player_id = %self.player_id, "Client initiated close");
                    break;
                }
                Err(e) => {
                    error!(player_id = %self.player_id, error = %e, "WebSocket error");
                    break;
                }
            }
        }
    }

    async fn handle_msg(&mut self, msg: ClientMsg) {
        match msg {
            ClientMsg::Join { room } => self.handle_join(room.as_deref()).await,
            ClientMsg::Input(command) => self.handle_input(command),
            ClientMsg::Ping { client_time } => {
                self.outbound.push_msg(&ServerMsg::Pong {
                    client_time,
                    server_time: unix_millis(),
                });
            }
        }
    }

    /// Inputs over the allowance are answered so the client can drop them;
    /// anything else is discarded.
    fn reject_rate_limited(&self, msg: ClientMsg) {
        warn!(player_id = %self.player_id, "Rate limited inbound message");
        if let ClientMsg::Input(command) = msg {
            self.outbound.push_msg(&ServerMsg::InputRejected {
                sequence_number: command.sequence_number,
                reason: RejectReason::RateLimited,
            });
        }
    }

    async fn handle_join(&mut self, hint: Option<&str>) {
        let name = normalize_room_name(hint);

        if let Some(current) = self.room.take() {
            if current.name == name {
                self.room = Some(current);
                self.outbound.push_msg(&RoomError::AlreadyJoined.to_msg());
                return;
            }

            // Switching rooms: leave first, and nothing queued for the old room carries over
            current.leave(self.player_id).await;
            let dropped = self.inputs.lock().clear_pending();
            debug!(player_id = %self.player_id, from = %current.name, to = %name, dropped, "Switching rooms");
        }

        let (event, outcome) = RoomEvent::join(self.player_id, self.inputs.clone(), self.outbound.clone());

        let handle = match self.state.rooms.join(&name, event).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(player_id = %self.player_id, room = %name, error = %e, "Join failed");
                self.outbound.push_msg(&e.to_msg());
                return;
            }
        };

        // Membership starts only once the room has accepted us
        match outcome.await {
            Ok(Ok(())) => {
                debug!(player_id = %self.player_id, room = %name, "Joined room");
                self.room = Some(handle);
            }
            Ok(Err(e)) => {
                // The room already sent the ERROR
                debug!(player_id = %self.player_id, room = %name, error = %e, "Join refused");
            }
            Err(_) => {
                warn!(player_id = %self.player_id, room = %name, "Room dropped join without answering");
                self.outbound.push_msg(&RoomError::Closed.to_msg());
            }
        }
    }

    fn handle_input(&mut self, command: InputCommand) {
        if self.room.is_none() {
            debug!(player_id = %self.player_id, "Input before join");
            self.outbound.push_msg(&RoomError::NotJoined.to_msg());
            return;
        }

        let result = self.inputs.lock().admit(command, unix_millis());
        if let Err(rejection) = result {
            debug!(
                player_id = %self.player_id,
                sequence = command.sequence_number,
                error = %rejection,
                "Input rejected"
            );
            self.outbound.push_msg(&ServerMsg::InputRejected {
                sequence_number: command.sequence_number,
                reason: rejection.reason(),
            });
        }
    }
}
