//! WebSocket upgrade handler and session loop

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::input::validate_input;
use crate::game::{RoomEvent, RoomInbound};
use crate::matchmaking::queue::QueuedPlayer;
use crate::util::rate_limit::PlayerRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Stable identity for reconnection; a fresh id is minted without it
    pub player_id: Option<Uuid>,
    /// Display name fallback when the join message has none
    pub name: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let player_id = query.player_id.unwrap_or_else(Uuid::new_v4);
    ws.on_upgrade(move |socket| handle_socket(socket, player_id, query.name, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, player_id: Uuid, name_hint: Option<String>, state: AppState) {
    info!(player_id = %player_id, "new WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome {
        player_id,
        server_time: unix_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(player_id = %player_id, error = %e, "failed to send welcome");
        return;
    }

    let (inbound_tx, broadcast_rx) = state.matchmaking.register_player(player_id);

    let consented = run_session(
        player_id,
        name_hint,
        ws_sink,
        ws_stream,
        inbound_tx.clone(),
        broadcast_rx,
        &state,
    )
    .await;

    // A dropped socket starts the reconnection grace window; an
    // explicit leave was already routed inside the session loop.
    if !consented {
        let _ = inbound_tx
            .send(RoomInbound {
                player_id,
                event: RoomEvent::Leave { consented: false },
                received_at: unix_millis(),
            })
            .await;
    }

    state.matchmaking.unregister_player(player_id).await;

    info!(player_id = %player_id, "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split. Returns true when
/// the client left on purpose.
async fn run_session(
    player_id: Uuid,
    name_hint: Option<String>,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    inbound_tx: mpsc::Sender<RoomInbound>,
    mut broadcast_rx: broadcast::Receiver<ServerMsg>,
    state: &AppState,
) -> bool {
    let rate_limiter = PlayerRateLimiter::new();
    let simulate_latency_ms = state.config.simulate_latency_ms;

    // Session-scoped replies (pongs) that only this client should see
    let (direct_tx, mut direct_rx) = mpsc::channel::<ServerMsg>(8);

    // Writer task: room broadcasts and direct replies -> WebSocket
    let writer_player_id = player_id;
    let writer_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = broadcast_rx.recv() => match msg {
                    Ok(msg) => {
                        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                            debug!(player_id = %writer_player_id, error = %e, "WebSocket send failed");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Lag skips messages but never disconnects
                        warn!(player_id = %writer_player_id, lagged_count = n, "client lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(player_id = %writer_player_id, "broadcast channel closed");
                        break;
                    }
                },
                msg = direct_rx.recv() => match msg {
                    Some(msg) => {
                        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                            debug!(player_id = %writer_player_id, error = %e, "WebSocket send failed");
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });

    let mut consented = false;

    // Reader loop: WebSocket -> room events
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(player_id = %player_id, "rate limited client message");
                    continue;
                }
                if simulate_latency_ms > 0 {
                    tokio::time::sleep(tokio::time::Duration::from_millis(simulate_latency_ms))
                        .await;
                }

                match handle_text(player_id, &name_hint, &text, &inbound_tx, &direct_tx, state).await {
                    SessionFlow::Continue => {}
                    SessionFlow::ConsentedLeave => {
                        consented = true;
                        break;
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(player_id = %player_id, "received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(player_id = %player_id, "client initiated close");
                break;
            }
            Err(e) => {
                error!(player_id = %player_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
    consented
}

enum SessionFlow {
    Continue,
    ConsentedLeave,
}

/// Route one text frame. Input messages are shape-validated from raw
/// JSON rather than serde (see `game::input::validate_input`); all
/// other message types go through the typed protocol.
async fn handle_text(
    player_id: Uuid,
    name_hint: &Option<String>,
    text: &str,
    inbound_tx: &mpsc::Sender<RoomInbound>,
    direct_tx: &mpsc::Sender<ServerMsg>,
    state: &AppState,
) -> SessionFlow {
    let Ok(raw) = serde_json::from_str::<Value>(text) else {
        warn!(player_id = %player_id, "unparseable client message");
        return SessionFlow::Continue;
    };

    if raw.get("type").and_then(Value::as_str) == Some("input") {
        match validate_input(&raw) {
            Some(frame) => {
                forward(player_id, RoomEvent::Input(frame), inbound_tx).await;
            }
            None => {
                // Could be a client bug rather than abuse; drop silently
                warn!(player_id = %player_id, "malformed input message rejected");
            }
        }
        return SessionFlow::Continue;
    }

    let msg: ClientMsg = match serde_json::from_value(raw) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(player_id = %player_id, error = %e, "failed to parse client message");
            return SessionFlow::Continue;
        }
    };

    match msg {
        ClientMsg::Join { name, role, .. } => {
            // A live room mapping means this is a grace-window return
            if state.matchmaking.room_for(&player_id).is_some() {
                forward(player_id, RoomEvent::Reconnect, inbound_tx).await;
            } else {
                let player =
                    QueuedPlayer::new(player_id, name.or_else(|| name_hint.clone()), role);
                if let Err(e) = state.matchmaking.join_queue(player).await {
                    warn!(player_id = %player_id, error = %e, "join rejected");
                }
            }
        }
        ClientMsg::Ping { t } => {
            // Echoed to the pinging session only, never the whole room
            let _ = direct_tx.send(ServerMsg::Pong { t }).await;
        }
        ClientMsg::Leave => {
            state.matchmaking.leave_queue(player_id).await;
            forward(player_id, RoomEvent::Leave { consented: true }, inbound_tx).await;
            return SessionFlow::ConsentedLeave;
        }
    }

    SessionFlow::Continue
}

async fn forward(player_id: Uuid, event: RoomEvent, inbound_tx: &mpsc::Sender<RoomInbound>) {
    let inbound = RoomInbound {
        player_id,
        event,
        received_at: unix_millis(),
    };
    if inbound_tx.send(inbound).await.is_err() {
        debug!(player_id = %player_id, "inbound channel closed");
    }
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn test_state() -> AppState {
        AppState::new(Config {
            server_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "warn".into(),
            client_origin: "*".into(),
            reconnect_grace_secs: 60,
            stage_duration_ms: 120_000.0,
            simulate_latency_ms: 0,
        })
    }

    fn channels() -> (
        mpsc::Sender<RoomInbound>,
        mpsc::Receiver<RoomInbound>,
        mpsc::Sender<ServerMsg>,
        mpsc::Receiver<ServerMsg>,
    ) {
        let (inbound_tx, inbound_rx) = mpsc::channel(8);
        let (direct_tx, direct_rx) = mpsc::channel(8);
        (inbound_tx, inbound_rx, direct_tx, direct_rx)
    }

    #[tokio::test]
    async fn ping_is_answered_only_to_the_sender() {
        let state = test_state();
        let player_id = Uuid::new_v4();
        let (inbound_tx, mut inbound_rx, direct_tx, mut direct_rx) = channels();

        handle_text(
            player_id,
            &None,
            r#"{"type":"ping","t":99}"#,
            &inbound_tx,
            &direct_tx,
            &state,
        )
        .await;

        assert!(matches!(direct_rx.try_recv(), Ok(ServerMsg::Pong { t: 99 })));
        // Nothing is routed toward the room
        assert!(inbound_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn join_without_room_enters_the_queue() {
        let state = test_state();
        let player_id = Uuid::new_v4();
        let (inbound_tx, mut inbound_rx, direct_tx, _direct_rx) = channels();

        handle_text(
            player_id,
            &None,
            r#"{"type":"join","name":"alice"}"#,
            &inbound_tx,
            &direct_tx,
            &state,
        )
        .await;

        assert!(state.matchmaking.is_in_queue(&player_id).await);
        assert!(inbound_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn input_is_validated_before_forwarding() {
        let state = test_state();
        let player_id = Uuid::new_v4();
        let (inbound_tx, mut inbound_rx, direct_tx, _direct_rx) = channels();

        handle_text(
            player_id,
            &None,
            r#"{"type":"input","seq":1,"teleport":true}"#,
            &inbound_tx,
            &direct_tx,
            &state,
        )
        .await;
        assert!(inbound_rx.try_recv().is_err());

        handle_text(
            player_id,
            &None,
            r#"{"type":"input","seq":1,"up":true}"#,
            &inbound_tx,
            &direct_tx,
            &state,
        )
        .await;
        let inbound = inbound_rx.try_recv().unwrap();
        assert!(matches!(inbound.event, RoomEvent::Input(frame) if frame.up && frame.seq == 1));
    }
}
