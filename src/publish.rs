//! Fixed-tick publication of the gaze state to websocket subscribers.
//!
//! One ticker reads the latest snapshot every period, encodes it once, and fans the
//! text out over a broadcast channel. Each subscriber session forwards what it
//! receives. The ticker never waits on the capture loop and never on a subscriber.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::{PayloadFormat, StreamConfig};
use crate::error::{GazeError, Result};
use crate::state::{GazeState, GazeStateReader};
use crate::types::GazeVector;

/// Encoded ticks a slow subscriber may fall behind before it starts skipping.
const SUBSCRIBER_BACKLOG: usize = 8;

#[derive(Debug, Serialize)]
struct PupilPayload {
    px: f32,
    py: f32,
    eye_w: u32,
    eye_h: u32,
    confidence: f32,
}

#[derive(Debug, Serialize)]
struct VectorPayload {
    gx: f32,
    gy: f32,
    gz: f32,
}

#[derive(Debug, Serialize)]
struct CombinedPayload {
    #[serde(flatten)]
    pupil: PupilPayload,
    #[serde(flatten)]
    gaze: Option<VectorPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    distance_cm: Option<f32>,
}

impl From<&GazeState> for PupilPayload {
    fn from(state: &GazeState) -> Self {
        Self {
            px: state.pupil.x,
            py: state.pupil.y,
            eye_w: state.eye_w,
            eye_h: state.eye_h,
            confidence: state.confidence,
        }
    }
}

impl From<GazeVector> for VectorPayload {
    fn from(v: GazeVector) -> Self {
        Self {
            gx: v.x(),
            gy: v.y(),
            gz: v.z(),
        }
    }
}

/// JSON text for one tick.
pub fn encode(format: PayloadFormat, state: &GazeState) -> Result<String> {
    let text = match format {
        PayloadFormat::Pupil => serde_json::to_string(&PupilPayload::from(state))?,
        PayloadFormat::Vector => {
            let gaze = state.gaze.unwrap_or(GazeVector::FORWARD);
            serde_json::to_string(&VectorPayload::from(gaze))?
        }
        PayloadFormat::Combined => serde_json::to_string(&CombinedPayload {
            pupil: PupilPayload::from(state),
            gaze: state.gaze.map(VectorPayload::from),
            distance_cm: state.distance_cm,
        })?,
    };
    Ok(text)
}

/// Sends the current snapshot to the broadcast channel every `period`, forever.
pub async fn tick_loop(
    reader: GazeStateReader,
    format: PayloadFormat,
    period: Duration,
    updates: broadcast::Sender<String>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        match encode(format, &reader.snapshot()) {
            // An error here only means nobody is subscribed
            Ok(text) => {
                let _ = updates.send(text);
            }
            Err(e) => warn!(error = %e, "Failed to encode gaze state"),
        }
    }
}

#[derive(Clone)]
struct Hub {
    updates: broadcast::Sender<String>,
}

pub fn router(updates: broadcast::Sender<String>, path: &str) -> Router {
    Router::new()
        .route(path, get(ws_handler))
        .with_state(Hub { updates })
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(hub): State<Hub>,
    peer: Option<ConnectInfo<SocketAddr>>,
) -> impl IntoResponse {
    // Subscribe before the upgrade so the first tick after the handshake is not missed
    let rx = hub.updates.subscribe();
    let peer = peer.map(|ConnectInfo(addr)| addr);
    ws.on_upgrade(move |socket| session(socket, peer, rx))
}

async fn session(socket: WebSocket, peer: Option<SocketAddr>, mut rx: broadcast::Receiver<String>) {
    info!(?peer, "Subscriber connected");
    let (mut outbound, mut inbound) = socket.split();

    loop {
        tokio::select! {
            update = rx.recv() => match update {
                Ok(text) => {
                    if outbound.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(?peer, skipped, "Subscriber lagging, skipped ticks");
                }
                Err(RecvError::Closed) => break,
            },
            message = inbound.next() => match message {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                // No client-to-server messages are defined
                Some(Ok(_)) => {}
            },
        }
    }

    info!(?peer, "Subscriber disconnected");
}

/// Runs the ticker and the websocket server on `listener` until the server fails.
pub async fn serve(listener: TcpListener, reader: GazeStateReader, config: &StreamConfig) -> Result<()> {
    let (updates, _) = broadcast::channel(SUBSCRIBER_BACKLOG);
    let ticker = tokio::spawn(tick_loop(reader, config.format, config.tick(), updates.clone()));

    info!(
        addr = ?listener.local_addr().ok(),
        path = %config.path,
        tick_ms = config.tick_ms,
        format = ?config.format,
        "Publishing gaze state"
    );
    let app = router(updates, &config.path);
    let result = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await;

    ticker.abort();
    result.map_err(|e| GazeError::Server(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::channel;
    use crate::types::PupilEstimate;
    use serde_json::{json, Value};

    fn parse(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    fn measured() -> GazeState {
        GazeState {
            pupil: PupilEstimate { x: 31.5, y: 17.25 },
            origin: (130, 166),
            eye_w: 60,
            eye_h: 36,
            confidence: 0.75,
            gaze: GazeVector::normalize([0.0, 0.6, 0.8]),
            distance_cm: Some(63.0),
            frame_id: 9,
        }
    }

    #[test]
    fn pupil_payload_has_exactly_the_published_fields() {
        let v = parse(&encode(PayloadFormat::Pupil, &measured()).unwrap());
        assert_eq!(
            v,
            json!({"px": 31.5, "py": 17.25, "eye_w": 60, "eye_h": 36, "confidence": 0.75})
        );
    }

    #[test]
    fn default_state_encodes_as_zero_confidence() {
        let v = parse(&encode(PayloadFormat::Pupil, &GazeState::default()).unwrap());
        assert_eq!(v["confidence"], json!(0.0));
        assert_eq!(v["px"], json!(0.0));
        assert_eq!(v["py"], json!(0.0));
    }

    #[test]
    fn vector_payload_falls_back_to_looking_forward() {
        let v = parse(&encode(PayloadFormat::Vector, &GazeState::default()).unwrap());
        assert_eq!(v, json!({"gx": 0.0, "gy": 0.0, "gz": 1.0}));

        let v = parse(&encode(PayloadFormat::Vector, &measured()).unwrap());
        assert!((v["gy"].as_f64().unwrap() - 0.6).abs() < 1e-6);
        assert!((v["gz"].as_f64().unwrap() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn combined_payload_omits_unknown_parts() {
        let v = parse(&encode(PayloadFormat::Combined, &GazeState::default()).unwrap());
        let fields = v.as_object().unwrap();
        assert_eq!(fields.len(), 5);
        assert!(!fields.contains_key("gx"));
        assert!(!fields.contains_key("distance_cm"));

        let v = parse(&encode(PayloadFormat::Combined, &measured()).unwrap());
        assert_eq!(v["distance_cm"], json!(63.0));
        assert!(v.get("gz").is_some());
        assert_eq!(v["eye_w"], json!(60));
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_publishes_latest_snapshot_without_new_frames() {
        let (writer, reader) = channel(GazeState::default());
        let (updates, mut rx) = broadcast::channel(SUBSCRIBER_BACKLOG);
        let ticker = tokio::spawn(tick_loop(
            reader,
            PayloadFormat::Pupil,
            Duration::from_millis(33),
            updates,
        ));

        let first = parse(&rx.recv().await.unwrap());
        assert_eq!(first["confidence"], json!(0.0));

        writer.publish(measured());
        let next = parse(&rx.recv().await.unwrap());
        assert_eq!(next["px"], json!(31.5));

        // Nothing new is written; ticks keep coming with the same snapshot
        for _ in 0..3 {
            assert_eq!(parse(&rx.recv().await.unwrap()), next);
        }
        ticker.abort();
    }
}
