//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::sim::SimCommand;
use crate::util::rate_limit::ClientRateLimiter;
use crate::ws::protocol::ClientMsg;
use crate::ws::registry::CLIENT_QUEUE_CAPACITY;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (ws_sink, ws_stream) = socket.split();

    let (tx, rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
    let client_id = state.registry.register(tx);
    info!(client_id = %client_id, "New WebSocket connection");

    // Current state goes out before any tick broadcast
    let greeting = state.snapshot().to_message();
    state.registry.send_to(client_id, &greeting);

    let writer = tokio::spawn(write_loop(client_id, ws_sink, rx));
    run_session(client_id, &state, ws_stream, writer).await;

    state.registry.unregister(client_id);
    info!(client_id = %client_id, "WebSocket connection closed");
}

/// Drain the client's outbound queue into the socket. Ends when the queue
/// is closed (client removed from the registry) or the socket fails.
async fn write_loop(
    client_id: Uuid,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<String>,
) {
    while let Some(text) = rx.recv().await {
        if let Err(e) = ws_sink.send(Message::Text(text)).await {
            debug!(client_id = %client_id, error = %e, "WebSocket send failed");
            break;
        }
    }
    let _ = ws_sink.close().await;
}

/// Read inbound messages until the client or its writer goes away
async fn run_session(
    client_id: Uuid,
    state: &AppState,
    mut ws_stream: SplitStream<WebSocket>,
    mut writer: JoinHandle<()>,
) {
    let rate_limiter = ClientRateLimiter::new();

    loop {
        tokio::select! {
            frame = ws_stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if !rate_limiter.check_input() {
                        warn!(client_id = %client_id, "Rate limited input message");
                        continue;
                    }

                    match serde_json::from_str::<ClientMsg>(&text) {
                        Ok(msg) => {
                            if let Err(e) = handle_client_msg(state, client_id, msg).await {
                                error!(client_id = %client_id, error = %e, "Dropping connection");
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(client_id = %client_id, error = %e, "Failed to parse client message");
                        }
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    warn!(client_id = %client_id, "Received binary message, ignoring");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) => {
                    info!(client_id = %client_id, "Client initiated close");
                    break;
                }
                Some(Err(e)) => {
                    warn!(client_id = %client_id, error = %e, "WebSocket error");
                    break;
                }
                None => break,
            },
            _ = &mut writer => {
                debug!(client_id = %client_id, "Writer finished");
                return;
            }
        }
    }

    writer.abort();
}

/// Act on one parsed client message
pub async fn handle_client_msg(
    state: &AppState,
    client_id: Uuid,
    msg: ClientMsg,
) -> Result<(), SessionError> {
    match msg {
        ClientMsg::SetScene { scene } => {
            state
                .commands
                .send(SimCommand::SetScene {
                    scene,
                    client_id: Some(client_id),
                })
                .await
                .map_err(|_| SessionError::SimulationStopped)?;
        }
        ClientMsg::ManualControl { controls } => {
            state
                .commands
                .send(SimCommand::ManualControl {
                    controls: controls.into(),
                    client_id,
                })
                .await
                .map_err(|_| SessionError::SimulationStopped)?;
        }
        ClientMsg::RequestState => {
            let msg = state.snapshot().to_message();
            state.registry.send_to(client_id, &msg);
        }
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Simulation loop is not running")]
    SimulationStopped,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::state::tests::test_state;
    use crate::app::SimulationServer;
    use crate::config::Config;
    use crate::sim::{CarState, Gear, PhysicsParams, Scenario, StateSnapshot};
    use crate::ws::protocol::ManualControls;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    async fn next_json(socket: &mut Client) -> serde_json::Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), socket.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if let WsMessage::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    async fn send_text(socket: &mut Client, text: &str) {
        socket.send(WsMessage::Text(text.to_string())).await.unwrap();
    }

    #[tokio::test]
    async fn bad_messages_do_not_close_the_connection() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            server_addr: "127.0.0.1:0".parse().unwrap(),
            event_log_dir: dir.path().join("error_data"),
            audio_dir: dir.path().join("audio"),
            ..Config::default()
        };
        let server = SimulationServer::start(config).await.unwrap();
        let (mut socket, _) = connect_async(format!("ws://{}/ws", server.local_addr()))
            .await
            .unwrap();

        let greeting = next_json(&mut socket).await;
        assert_eq!(greeting["type"], "state_update");
        assert_eq!(greeting["scene"], "highway");

        send_text(&mut socket, "not json").await;
        send_text(&mut socket, r#"{"type":"set_scene","scene":"moon"}"#).await;
        send_text(&mut socket, r#"{"type":"warp_drive"}"#).await;
        socket.send(WsMessage::Binary(vec![1, 2, 3])).await.unwrap();
        // Well past the per-second inbound quota
        for _ in 0..200 {
            send_text(&mut socket, "{").await;
        }

        // Let the limiter refill a little
        tokio::time::sleep(Duration::from_millis(250)).await;
        send_text(&mut socket, r#"{"type":"set_scene","scene":"parking"}"#).await;

        loop {
            let msg = next_json(&mut socket).await;
            if msg["type"] == "scene_changed" {
                assert_eq!(msg["scene"], "parking");
                break;
            }
        }

        send_text(&mut socket, r#"{"type":"request_state"}"#).await;
        let update = next_json(&mut socket).await;
        assert_eq!(update["type"], "state_update");
        assert_eq!(update["scene"], "parking");
        assert_eq!(server.state().registry.len(), 1);

        socket.close(None).await.unwrap();
        server.stop().await;
    }

    #[tokio::test]
    async fn set_scene_is_forwarded_to_the_loop() {
        let (state, mut commands, _snapshots) = test_state();
        let client_id = Uuid::new_v4();

        handle_client_msg(
            &state,
            client_id,
            ClientMsg::SetScene {
                scene: Scenario::Parking,
            },
        )
        .await
        .unwrap();

        match commands.recv().await.unwrap() {
            SimCommand::SetScene { scene, client_id: from } => {
                assert_eq!(scene, Scenario::Parking);
                assert_eq!(from, Some(client_id));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[tokio::test]
    async fn manual_control_keeps_only_given_fields() {
        let (state, mut commands, _snapshots) = test_state();

        let controls = ManualControls {
            acceleration: Some(30.0),
            gear: Some(Gear::Reverse),
            ..Default::default()
        };
        handle_client_msg(&state, Uuid::new_v4(), ClientMsg::ManualControl { controls })
            .await
            .unwrap();

        let SimCommand::ManualControl { controls, .. } = commands.recv().await.unwrap() else {
            panic!("expected manual control");
        };
        assert_eq!(controls.acceleration, Some(30.0));
        assert_eq!(controls.gear, Some(Gear::Reverse));
        assert_eq!(controls.steering_angle, None);
    }

    #[tokio::test]
    async fn request_state_is_unicast() {
        let (state, _commands, snapshot_tx) = test_state();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        let a = state.registry.register(tx_a);
        state.registry.register(tx_b);

        let car = CarState {
            speed: 33.0,
            gear: Gear::Drive,
            ..Default::default()
        };
        snapshot_tx.send_replace(StateSnapshot::new(
            5,
            Scenario::Intersection,
            car,
            PhysicsParams::default(),
        ));

        handle_client_msg(&state, a, ClientMsg::RequestState)
            .await
            .unwrap();

        let value: serde_json::Value = serde_json::from_str(&rx_a.try_recv().unwrap()).unwrap();
        assert_eq!(value["type"], "state_update");
        assert_eq!(value["scene"], "intersection");
        assert_eq!(value["car"]["speed"], 33.0);
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn stopped_simulation_is_an_error() {
        let (state, commands, _snapshots) = test_state();
        drop(commands);

        let result = handle_client_msg(
            &state,
            Uuid::new_v4(),
            ClientMsg::SetScene {
                scene: Scenario::Highway,
            },
        )
        .await;
        assert!(matches!(result, Err(SessionError::SimulationStopped)));
    }
}
