use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const API_VERSION: &str = "v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// One detected object in a single video frame. Detections are recomputed
/// from scratch every frame and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: String,
    pub confidence: f32,
    /// [x1, y1, x2, y2] in frame pixels.
    pub bbox: [i32; 4],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Ok,
    Error,
}

/// Acknowledgment on the command channel. Best-effort: the vehicle has no
/// closed-loop feedback, so `Ok` means "command accepted", not "motion
/// confirmed".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandAck {
    pub status: AckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CommandAck {
    pub fn ok() -> Self {
        Self {
            status: AckStatus::Ok,
            detail: None,
        }
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            status: AckStatus::Error,
            detail: Some(detail.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == AckStatus::Ok
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleStatus {
    pub status: String,
    pub available_commands: Vec<String>,
}

/// Console status query: the operator-visible view of the auto-movement
/// controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub auto_movement_enabled: bool,
    pub target_objects: Vec<String>,
    pub movement_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementStatus {
    Moving,
    Stopped,
}

/// Events pushed to browser observers over the console WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConsoleEvent {
    Status { status: MovementStatus },
    Detections { detections: Vec<Detection> },
    Ir { value: u8 },
    AutoMovement { enabled: bool },
    TargetObjects { objects: Vec<String> },
}

/// Messages received from browser observers over the console WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperatorMessage {
    SetTargetObjects {
        objects: Vec<String>,
    },
    SetAutoMovement {
        enabled: bool,
    },
    Drive {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        speed: Option<f64>,
    },
}
