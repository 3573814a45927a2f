use std::sync::Arc;

use tankd::camera::FrameSource;
use tankd::ir::IrSensor;
use tankd::motor::MotorDriver;
use tankd::{AppState, ServerConfig, run_server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tankd=info,tower_http=info".into()),
        )
        .init();

    let mut config = ServerConfig::default();
    if let Ok(bind) = std::env::var("TANKD_BIND") {
        config.bind = bind;
    }
    if let Ok(fps) = std::env::var("TANKD_CAMERA_FPS") {
        config.camera_fps = fps.parse()?;
    }
    if let Ok(fps) = std::env::var("TANKD_IR_FPS") {
        config.ir_fps = fps.parse()?;
    }
    if let Ok(pin) = std::env::var("TANKD_IR_PIN") {
        config.ir_pin = pin.parse()?;
    }
    if let Ok(device) = std::env::var("TANKD_CAMERA_DEV") {
        config.camera_device = device;
    }

    let state = AppState::new(
        motor_driver()?,
        frame_source(&config)?,
        ir_sensor(&config)?,
        &config,
    );
    run_server(config, state).await
}

#[cfg(feature = "gpio")]
fn motor_driver() -> Result<Arc<dyn MotorDriver>, Box<dyn std::error::Error>> {
    Ok(Arc::new(tankd::motor::GpioDriver::new()?))
}

#[cfg(not(feature = "gpio"))]
fn motor_driver() -> Result<Arc<dyn MotorDriver>, Box<dyn std::error::Error>> {
    tracing::warn!("gpio feature disabled, using mock motor driver");
    Ok(Arc::new(tankd::motor::MockDriver::new()))
}

#[cfg(feature = "camera-v4l2")]
fn frame_source(config: &ServerConfig) -> Result<Box<dyn FrameSource>, Box<dyn std::error::Error>> {
    Ok(Box::new(tankd::camera::V4l2FrameSource::open(
        &config.camera_device,
        640,
        480,
    )?))
}

#[cfg(not(feature = "camera-v4l2"))]
fn frame_source(
    _config: &ServerConfig,
) -> Result<Box<dyn FrameSource>, Box<dyn std::error::Error>> {
    tracing::warn!("camera-v4l2 feature disabled, streaming a test pattern");
    Ok(Box::new(tankd::camera::StubFrameSource::default()))
}

#[cfg(feature = "gpio")]
fn ir_sensor(config: &ServerConfig) -> Result<Arc<dyn IrSensor>, Box<dyn std::error::Error>> {
    Ok(Arc::new(tankd::ir::GpioIrSensor::new(config.ir_pin)?))
}

#[cfg(not(feature = "gpio"))]
fn ir_sensor(_config: &ServerConfig) -> Result<Arc<dyn IrSensor>, Box<dyn std::error::Error>> {
    Ok(Arc::new(tankd::ir::StubIrSensor::default()))
}
