use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use tank_console::autopilot::{AutoPilot, DEFAULT_FORWARD_SPEED};
use tank_console::channel::{HttpCommandChannel, SharedChannel};
use tank_console::detect::{Detector, NullDetector};
use tank_console::observers::ObserverHub;
use tank_console::server::{ConsoleState, app};
use tank_console::stream::{camera_relay, ir_relay};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// Vehicle base URL (http); WebSocket URLs are derived from it
    #[arg(long)]
    vehicle: Option<String>,

    /// Bind address for the browser frontend
    #[arg(long)]
    bind: Option<String>,

    /// Initial comma-separated target object classes
    #[arg(long)]
    targets: Option<String>,

    /// Enable auto-movement at startup
    #[arg(long)]
    auto: bool,

    /// Forward speed used by the auto maneuver (0-100)
    #[arg(long)]
    forward_speed: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConsoleConfig {
    vehicle: String,
    bind: String,
    forward_speed: f64,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            vehicle: "http://127.0.0.1:8000".to_string(),
            bind: "127.0.0.1:9000".to_string(),
            forward_speed: DEFAULT_FORWARD_SPEED,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tank_console=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = load_config()?;
    if let Some(vehicle) = cli.vehicle {
        config.vehicle = vehicle;
    }
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    if let Some(forward_speed) = cli.forward_speed {
        config.forward_speed = forward_speed;
    }

    let channel: SharedChannel = Arc::new(HttpCommandChannel::new(&config.vehicle)?);
    let hub = Arc::new(ObserverHub::new());
    let pilot = Arc::new(AutoPilot::new(
        channel.clone(),
        hub.clone(),
        config.forward_speed,
    ));
    if let Some(targets) = cli.targets {
        pilot.set_target_objects(&[targets]);
    }
    pilot.set_enabled(cli.auto);

    let (frames, _) = broadcast::channel(8);
    let detector: Arc<dyn Detector> = Arc::new(NullDetector);

    tokio::spawn(camera_relay(
        ws_url(&config.vehicle, "/ws/camera"),
        detector,
        pilot.clone(),
        hub.clone(),
        frames.clone(),
    ));
    tokio::spawn(ir_relay(ws_url(&config.vehicle, "/ws/ir"), hub.clone()));

    let state = ConsoleState {
        pilot,
        hub,
        channel,
        frames,
    };
    let addr: SocketAddr = config.bind.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, vehicle = %config.vehicle, "tank-console listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

fn ws_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{base}{path}")
}

fn load_config() -> Result<ConsoleConfig, Box<dyn std::error::Error>> {
    let path = config_path()?;
    if !path.exists() {
        return Ok(ConsoleConfig::default());
    }
    let text = std::fs::read_to_string(path)?;
    let config: ConsoleConfig = toml::from_str(&text)?;
    Ok(config)
}

fn config_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
    let base = dirs::config_dir().ok_or("failed to locate config dir")?;
    Ok(base.join("tankcar").join("console.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_swaps_scheme_and_appends_path() {
        assert_eq!(
            ws_url("http://192.168.1.10:8000/", "/ws/camera"),
            "ws://192.168.1.10:8000/ws/camera"
        );
        assert_eq!(
            ws_url("https://vehicle.local", "/ws/ir"),
            "wss://vehicle.local/ws/ir"
        );
    }
}
