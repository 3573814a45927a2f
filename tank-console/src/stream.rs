//! WebSocket consumers for the vehicle's camera and IR streams.
//!
//! Both relays run a plain reconnect loop: on any connect or read failure
//! they log, back off, and dial again until the process exits.

use std::{sync::Arc, time::Duration};

use futures_util::StreamExt;
use tank_protocol::ConsoleEvent;
use tokio::sync::broadcast;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};

use crate::autopilot::AutoPilot;
use crate::channel::CommandChannel;
use crate::detect::Detector;
use crate::observers::ObserverHub;

pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Consume the camera stream: republish each frame for browser viewers,
/// run detection, and hand the batch to the auto-movement controller.
/// One task, so frames reach the controller sequentially in arrival order.
pub async fn camera_relay<C: CommandChannel + 'static>(
    url: String,
    detector: Arc<dyn Detector>,
    pilot: Arc<AutoPilot<C>>,
    hub: Arc<ObserverHub>,
    frames: broadcast::Sender<Vec<u8>>,
) {
    loop {
        match connect_async(url.as_str()).await {
            Ok((mut socket, _response)) => {
                info!(%url, "camera stream connected");
                while let Some(message) = socket.next().await {
                    match message {
                        Ok(Message::Binary(frame)) => {
                            // No connected viewers is not an error.
                            let _ = frames.send(frame.to_vec());
                            let detections = detector.detect(&frame);
                            if !detections.is_empty() {
                                hub.broadcast(ConsoleEvent::Detections {
                                    detections: detections.clone(),
                                });
                            }
                            pilot.on_new_detections(&detections);
                        }
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            warn!("camera stream read failed: {e}");
                            break;
                        }
                    }
                }
            }
            Err(e) => warn!(%url, "camera connect failed: {e}"),
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

/// Consume the IR stream and rebroadcast readings to observers.
pub async fn ir_relay(url: String, hub: Arc<ObserverHub>) {
    loop {
        match connect_async(url.as_str()).await {
            Ok((mut socket, _response)) => {
                info!(%url, "ir stream connected");
                while let Some(message) = socket.next().await {
                    match message {
                        Ok(Message::Text(text)) => match text.trim().parse::<u8>() {
                            Ok(value) => hub.broadcast(ConsoleEvent::Ir { value }),
                            Err(_) => warn!(reading = %text, "unparseable ir reading"),
                        },
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            warn!("ir stream read failed: {e}");
                            break;
                        }
                    }
                }
            }
            Err(e) => warn!(%url, "ir connect failed: {e}"),
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}
