use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};

use crate::car_physics::ControlInput;
use crate::error::RaceResult;
use crate::spawn::SpawnInfo;
use crate::state::RaceState;

// -------------------------------
// Wire messages
// -------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Input {
        #[serde(default)]
        throttle: f32,
        #[serde(default)]
        steer: f32,
        #[serde(default)]
        brake: f32,
    },
    Keys {
        #[serde(default)]
        pressed: Vec<String>,
    },
    Reset,
    SwitchPhysics {
        /// Missing means toggle.
        #[serde(default)]
        model: Option<String>,
    },
    Scheme {
        name: String,
    },
    Ping,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome { car_id: String, slot: usize, position: [f32; 2] },
    Pong,
    Error { message: String },
}

impl ServerMessage {
    fn welcome(spawn: &SpawnInfo) -> Self {
        ServerMessage::Welcome { car_id: spawn.car_id.clone(), slot: spawn.slot, position: spawn.position }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"error","message":"encode"}"#.to_string())
    }
}

/// Apply one client message to the race. Returns the direct reply, if any.
pub fn handle_message(state: &mut RaceState, car_id: &str, msg: ClientMessage) -> Option<ServerMessage> {
    let result: RaceResult<()> = match msg {
        ClientMessage::Ping => return Some(ServerMessage::Pong),
        ClientMessage::Input { throttle, steer, brake } => {
            state.set_analog_input(car_id, ControlInput::new(throttle, steer, brake))
        }
        ClientMessage::Keys { pressed } => state.set_pressed_keys(car_id, pressed),
        ClientMessage::Reset => state.reset_car(car_id),
        ClientMessage::SwitchPhysics { model: Some(model) } => state.switch_physics_model(car_id, &model),
        ClientMessage::SwitchPhysics { model: None } => state.toggle_physics_model(car_id).map(|_| ()),
        ClientMessage::Scheme { name } => state.set_control_scheme(car_id, &name),
    };

    match result {
        Ok(()) => None,
        Err(e) => Some(ServerMessage::Error { message: e.to_string() }),
    }
}

/// Spawn the player's car, then subscribe its sender to snapshots. A failed
/// spawn leaves the client list untouched.
pub fn join_race(state: &mut RaceState, car_id: &str, tx: mpsc::UnboundedSender<String>) -> RaceResult<SpawnInfo> {
    let spawn = state.add_car(car_id, true, None)?;
    state.register_client(tx);
    Ok(spawn)
}

// -------------------------------
// Server loop
// -------------------------------

pub async fn start_websocket_server(bind_addr: String, state: Arc<Mutex<RaceState>>) -> std::io::Result<()> {
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("websocket listening on ws://{bind_addr}");

    loop {
        let (raw, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!("accept failed: {e}");
                continue;
            }
        };
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = serve_client(raw, state).await {
                tracing::warn!(%peer, "client connection ended with error: {e}");
            }
        });
    }
}

async fn serve_client(raw: TcpStream, state: Arc<Mutex<RaceState>>) -> Result<(), tungstenite::Error> {
    let ws = accept_async(raw).await?;
    let (mut write, mut read) = ws.split();

    // -------------------------------
    // 1) Outgoing channel + send loop
    // -------------------------------
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if write.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    // -------------------------------
    // 2) Player car at a grid slot
    // -------------------------------
    let car_id = uuid::Uuid::new_v4().to_string();
    let spawn = join_race(&mut *state.lock().await, &car_id, tx.clone());

    let spawn = match spawn {
        Ok(spawn) => spawn,
        Err(e) => {
            tracing::warn!(car_id = %car_id, "player rejected: {e}");
            let _ = tx.send(ServerMessage::Error { message: e.to_string() }.to_json());
            return Ok(());
        }
    };

    tracing::info!(car_id = %car_id, slot = spawn.slot, "player connected");
    let _ = tx.send(ServerMessage::welcome(&spawn).to_json());

    // -------------------------------
    // 3) Receive loop
    // -------------------------------
    while let Some(msg) = read.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(_) => break,
        };
        if msg.is_close() {
            break;
        }
        let Ok(text) = msg.to_text() else { continue };
        if text.is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<ClientMessage>(text) {
            Ok(parsed) => {
                let mut race = state.lock().await;
                handle_message(&mut race, &car_id, parsed)
            }
            Err(e) => Some(ServerMessage::Error { message: format!("bad message: {e}") }),
        };

        if let Some(reply) = reply {
            let _ = tx.send(reply.to_json());
        }
    }

    tracing::info!(car_id = %car_id, "player disconnected");
    let mut race = state.lock().await;
    if let Err(e) = race.remove_car(&car_id) {
        tracing::warn!(car_id = %car_id, "remove on disconnect failed: {e}");
    }
    Ok(())
}
