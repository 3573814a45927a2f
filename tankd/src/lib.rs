pub mod camera;
pub mod ir;
pub mod motor;

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    Json, Router,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Map, Value};
use tank_protocol::{CommandAck, CommandRequest, ErrorResponse, VehicleStatus};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use camera::FrameSource;
use ir::IrSensor;
use motor::{DEFAULT_SPEED, MotorDriver};

const AVAILABLE_COMMANDS: [&str; 8] = [
    "forward",
    "backward",
    "left",
    "right",
    "pivot_left",
    "pivot_right",
    "move",
    "stop",
];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub camera_fps: u32,
    pub ir_fps: u32,
    pub ir_pin: u8,
    pub camera_device: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            camera_fps: 15,
            ir_fps: 30,
            ir_pin: 13,
            camera_device: "/dev/video0".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    driver: Arc<dyn MotorDriver>,
    camera: Arc<Mutex<Box<dyn FrameSource>>>,
    ir: Arc<dyn IrSensor>,
    camera_fps: u32,
    ir_fps: u32,
}

impl AppState {
    pub fn new(
        driver: Arc<dyn MotorDriver>,
        camera: Box<dyn FrameSource>,
        ir: Arc<dyn IrSensor>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            driver,
            camera: Arc::new(Mutex::new(camera)),
            ir,
            camera_fps: config.camera_fps.max(1),
            ir_fps: config.ir_fps.max(1),
        }
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/status", get(status))
        .route("/api/v1/command", post(command))
        .route("/api/v1/forward", post(forward))
        .route("/api/v1/backward", post(backward))
        .route("/api/v1/left", post(left))
        .route("/api/v1/right", post(right))
        .route("/api/v1/stop", post(stop))
        .route("/ws/camera", get(ws_camera))
        .route("/ws/ir", get(ws_ir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(
    config: ServerConfig,
    state: AppState,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = config.bind.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "tankd listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn status() -> Json<VehicleStatus> {
    Json(VehicleStatus {
        status: "ready".to_string(),
        available_commands: AVAILABLE_COMMANDS.iter().map(|c| c.to_string()).collect(),
    })
}

/// The vehicle side of the command channel: one endpoint, command name plus
/// optional params, acknowledged with ok/error.
async fn command(
    State(state): State<AppState>,
    Json(request): Json<CommandRequest>,
) -> Result<Json<CommandAck>, ApiError> {
    apply_command(&*state.driver, &request.command, &request.params)?;
    Ok(Json(CommandAck::ok()))
}

fn apply_command(
    driver: &dyn MotorDriver,
    command: &str,
    params: &Map<String, Value>,
) -> Result<(), ApiError> {
    let result = match command {
        "forward" => driver.forward(speed_param(params)?),
        "backward" => driver.backward(speed_param(params)?),
        "left" => driver.turn_left(speed_param(params)?),
        "right" => driver.turn_right(speed_param(params)?),
        "pivot_left" => driver.pivot_left(speed_param(params)?),
        "pivot_right" => driver.pivot_right(speed_param(params)?),
        "move" => {
            let left = track_param(params, "left")?;
            let right = track_param(params, "right")?;
            driver.drive(left, right)
        }
        "stop" => driver.stop(),
        other => return Err(ApiError::bad_request(format!("unknown command: {other}"))),
    };
    result.map_err(|e| ApiError::internal(e.to_string()))
}

fn speed_param(params: &Map<String, Value>) -> Result<f64, ApiError> {
    let speed = match params.get("speed") {
        None => DEFAULT_SPEED,
        Some(value) => value
            .as_f64()
            .ok_or_else(|| ApiError::bad_request("speed must be a number"))?,
    };
    if !(0.0..=100.0).contains(&speed) {
        return Err(ApiError::bad_request("speed must be between 0 and 100"));
    }
    Ok(speed)
}

fn track_param(params: &Map<String, Value>, name: &str) -> Result<f64, ApiError> {
    let value = params
        .get(name)
        .ok_or_else(|| ApiError::bad_request(format!("missing param: {name}")))?
        .as_f64()
        .ok_or_else(|| ApiError::bad_request(format!("{name} must be a number")))?;
    if !(-100.0..=100.0).contains(&value) {
        return Err(ApiError::bad_request(format!(
            "{name} must be between -100 and 100"
        )));
    }
    Ok(value)
}

#[derive(Debug, Deserialize)]
struct SpeedQuery {
    speed: Option<f64>,
}

impl SpeedQuery {
    fn params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        if let Some(speed) = self.speed {
            params.insert("speed".to_string(), speed.into());
        }
        params
    }
}

// Endpoint-per-direction convenience surface, same validation as /command.

async fn forward(
    State(state): State<AppState>,
    Query(query): Query<SpeedQuery>,
) -> Result<Json<CommandAck>, ApiError> {
    apply_command(&*state.driver, "forward", &query.params())?;
    Ok(Json(CommandAck::ok()))
}

async fn backward(
    State(state): State<AppState>,
    Query(query): Query<SpeedQuery>,
) -> Result<Json<CommandAck>, ApiError> {
    apply_command(&*state.driver, "backward", &query.params())?;
    Ok(Json(CommandAck::ok()))
}

async fn left(
    State(state): State<AppState>,
    Query(query): Query<SpeedQuery>,
) -> Result<Json<CommandAck>, ApiError> {
    apply_command(&*state.driver, "left", &query.params())?;
    Ok(Json(CommandAck::ok()))
}

async fn right(
    State(state): State<AppState>,
    Query(query): Query<SpeedQuery>,
) -> Result<Json<CommandAck>, ApiError> {
    apply_command(&*state.driver, "right", &query.params())?;
    Ok(Json(CommandAck::ok()))
}

async fn stop(State(state): State<AppState>) -> Result<Json<CommandAck>, ApiError> {
    apply_command(&*state.driver, "stop", &Map::new())?;
    Ok(Json(CommandAck::ok()))
}

async fn ws_camera(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| stream_camera(socket, state))
}

async fn stream_camera(mut socket: WebSocket, state: AppState) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1) / state.camera_fps);
    loop {
        ticker.tick().await;
        let frame = {
            let mut camera = state.camera.lock().expect("camera lock poisoned");
            camera.next_frame()
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("camera frame failed: {e}");
                break;
            }
        };
        if socket.send(Message::Binary(frame.into())).await.is_err() {
            // viewer hung up
            break;
        }
    }
}

async fn ws_ir(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| stream_ir(socket, state))
}

async fn stream_ir(mut socket: WebSocket, state: AppState) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1) / state.ir_fps);
    loop {
        ticker.tick().await;
        let value = match state.ir.read() {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("ir read failed: {e}");
                break;
            }
        };
        if socket
            .send(Message::Text(value.to_string().into()))
            .await
            .is_err()
        {
            break;
        }
    }
}
