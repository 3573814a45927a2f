//! The command channel: request/acknowledgment link to the vehicle.
//!
//! Best-effort by contract — a transport failure or a rejected command is
//! reported to the caller, never retried here.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tank_protocol::{CommandAck, CommandRequest, ErrorResponse};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub struct ChannelError {
    message: String,
}

impl ChannelError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "command channel error: {}", self.message)
    }
}

impl std::error::Error for ChannelError {}

#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Send one named command with optional parameters and wait for the
    /// vehicle's acknowledgment.
    async fn send(
        &self,
        command: &str,
        params: Map<String, Value>,
    ) -> Result<CommandAck, ChannelError>;
}

#[async_trait]
impl<T: CommandChannel + ?Sized> CommandChannel for Arc<T> {
    async fn send(
        &self,
        command: &str,
        params: Map<String, Value>,
    ) -> Result<CommandAck, ChannelError> {
        self.as_ref().send(command, params).await
    }
}

pub type SharedChannel = Arc<dyn CommandChannel>;

/// HTTP transport: POSTs to the vehicle's `/api/v1/command` endpoint.
pub struct HttpCommandChannel {
    http: reqwest::Client,
    base: String,
}

impl HttpCommandChannel {
    pub fn new(vehicle_url: &str) -> Result<Self, ChannelError> {
        let http = reqwest::Client::builder()
            .timeout(COMMAND_TIMEOUT)
            .build()
            .map_err(|e| ChannelError::new(format!("http client setup failed: {e}")))?;
        Ok(Self {
            http,
            base: vehicle_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CommandChannel for HttpCommandChannel {
    async fn send(
        &self,
        command: &str,
        params: Map<String, Value>,
    ) -> Result<CommandAck, ChannelError> {
        let url = format!("{}/api/v1/command", self.base);
        let response = self
            .http
            .post(url)
            .json(&CommandRequest {
                command: command.to_string(),
                params,
            })
            .send()
            .await
            .map_err(|e| ChannelError::new(format!("send {command} failed: {e}")))?;

        if response.status().is_success() {
            response
                .json::<CommandAck>()
                .await
                .map_err(|e| ChannelError::new(format!("bad ack for {command}: {e}")))
        } else {
            // The vehicle answered but refused the command; surface that as
            // an error ack rather than a channel failure.
            let detail = match response.json::<ErrorResponse>().await {
                Ok(body) => body.error,
                Err(e) => format!("unreadable error body: {e}"),
            };
            Ok(CommandAck::error(detail))
        }
    }
}
