mod board;
mod command;
mod sim;

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::{env, net::SocketAddr, sync::Arc, time::Duration};
use time::macros::format_description;
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};
use tracing_subscriber::EnvFilter;

use board::ActuatorBoard;
use sim::{FieldSim, Scenario};

/// Frames buffered per client before it starts lagging.
const FRAME_BACKLOG: usize = 16;

#[derive(Debug, Serialize)]
struct StatusFrame {
    humidity: f64,
    ldr: u16,
    #[serde(rename = "riegoActivo")]
    irrigation_active: bool,
    temperature: f64,
    timestamp: String,
}

struct Field {
    sim: FieldSim,
    board: ActuatorBoard,
}

#[derive(Clone)]
struct NodeState {
    field: Arc<Mutex<Field>>,
    frames: broadcast::Sender<String>,
}

impl NodeState {
    fn new(sim: FieldSim) -> Self {
        let (frames, _) = broadcast::channel(FRAME_BACKLOG);
        Self {
            field: Arc::new(Mutex::new(Field {
                sim,
                board: ActuatorBoard::new(),
            })),
            frames,
        }
    }
}

/// Device clock, "HH:MM:SS". The device has no notion of dates.
fn clock(now: OffsetDateTime) -> String {
    let fmt = format_description!("[hour]:[minute]:[second]");
    now.format(&fmt).unwrap_or_else(|_| "00:00:00".to_string())
}

/// Advance the simulation one step and let automatic mode react.
async fn tick(field: &Mutex<Field>, now: OffsetDateTime) -> StatusFrame {
    let mut f = field.lock().await;
    let relay = f.board.relay;
    f.sim.set_irrigating(relay);
    let s = f.sim.sample(now.unix_timestamp() as f64);
    f.board.auto_step(s.humidity);

    StatusFrame {
        humidity: s.humidity,
        ldr: s.ldr,
        irrigation_active: f.board.relay,
        temperature: s.temperature,
        timestamp: clock(now),
    }
}

async fn sampler(state: NodeState, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        let frame = tick(&state.field, OffsetDateTime::now_utc()).await;
        match serde_json::to_string(&frame) {
            Ok(text) => {
                // no clients is fine
                let clients = state.frames.send(text).unwrap_or(0);
                tracing::debug!(
                    humidity = frame.humidity,
                    ldr = frame.ldr,
                    relay = frame.irrigation_active,
                    clients,
                    "frame"
                );
            }
            Err(e) => tracing::error!("frame encode failed: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

fn router(state: NodeState) -> Router {
    Router::new().route("/ws", get(ws_upgrade)).with_state(state)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<NodeState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| client(socket, state))
}

async fn client(socket: WebSocket, state: NodeState) {
    tracing::info!("hub connected");
    let (mut sink, mut stream) = socket.split();
    let mut frames = state.frames.subscribe();

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(text) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        tracing::warn!("send failed: {e}");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "client lagging, frames skipped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => apply_command(&state.field, text.as_str()).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!("receive failed: {e}");
                    break;
                }
            },
        }
    }

    tracing::info!("hub disconnected");
}

async fn apply_command(field: &Mutex<Field>, text: &str) {
    match command::decode(text) {
        Ok(keys) => {
            tracing::info!(?keys, "command");
            let mut f = field.lock().await;
            for k in keys {
                f.board.apply(k);
            }
        }
        Err(e) => tracing::warn!(%text, "bad command json: {e}"),
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port: u16 = env::var("NODE_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9001);
    let sample_every_s: u64 = env::var("SAMPLE_EVERY_S")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|s| *s > 0)
        .unwrap_or(5);
    let scenario = Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());
    let diurnal_period_s: f64 = env::var("DIURNAL_PERIOD_S")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|p: &f64| *p > 0.0)
        .unwrap_or(86_400.0);

    let state = NodeState::new(FieldSim::new(scenario, diurnal_period_s));
    tokio::spawn(sampler(state.clone(), Duration::from_secs(sample_every_s)));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind node port {port}"))?;
    tracing::info!(%addr, %scenario, sample_every_s, "field node serving /ws");

    axum::serve(listener, router(state))
        .await
        .context("node server error")
}

// ===========================================================================
// Tests
// ===========================================================================
