//! Tank-drive motor control: two H-bridge channels, one per track.
//!
//! Speeds are percentages in [-100, 100]; the sign selects the direction
//! pins, the magnitude becomes the PWM duty cycle.

use std::fmt;

#[derive(Debug)]
pub struct MotorError {
    message: String,
}

impl MotorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for MotorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "motor driver error: {}", self.message)
    }
}

impl std::error::Error for MotorError {}

pub const DEFAULT_SPEED: f64 = 50.0;

/// Drives the two tracks. `drive` is the single required operation; the
/// directional helpers are fixed speed pairs on top of it.
pub trait MotorDriver: Send + Sync {
    /// Drive both tracks. Implementations clamp to [-100, 100].
    fn drive(&self, left: f64, right: f64) -> Result<(), MotorError>;

    fn forward(&self, speed: f64) -> Result<(), MotorError> {
        self.drive(speed, speed)
    }

    fn backward(&self, speed: f64) -> Result<(), MotorError> {
        self.drive(-speed, -speed)
    }

    /// Right track forward, left track backward.
    fn turn_left(&self, speed: f64) -> Result<(), MotorError> {
        self.drive(-speed, speed)
    }

    /// Left track forward, right track backward.
    fn turn_right(&self, speed: f64) -> Result<(), MotorError> {
        self.drive(speed, -speed)
    }

    /// Only the right track moves.
    fn pivot_left(&self, speed: f64) -> Result<(), MotorError> {
        self.drive(0.0, speed)
    }

    /// Only the left track moves.
    fn pivot_right(&self, speed: f64) -> Result<(), MotorError> {
        self.drive(speed, 0.0)
    }

    fn stop(&self) -> Result<(), MotorError> {
        self.drive(0.0, 0.0)
    }
}

pub fn clamp_speed(speed: f64) -> f64 {
    speed.clamp(-100.0, 100.0)
}

/// Records every track-speed pair instead of touching hardware. Default
/// driver off the vehicle and in tests.
#[derive(Debug, Default)]
pub struct MockDriver {
    history: std::sync::Mutex<Vec<(f64, f64)>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<(f64, f64)> {
        self.history.lock().expect("motor history lock poisoned").clone()
    }

    pub fn last(&self) -> Option<(f64, f64)> {
        self.history().last().copied()
    }
}

impl MotorDriver for MockDriver {
    fn drive(&self, left: f64, right: f64) -> Result<(), MotorError> {
        let pair = (clamp_speed(left), clamp_speed(right));
        tracing::debug!(left = pair.0, right = pair.1, "mock drive");
        self.history
            .lock()
            .expect("motor history lock poisoned")
            .push(pair);
        Ok(())
    }
}

#[cfg(feature = "gpio")]
pub use gpio::GpioDriver;

#[cfg(feature = "gpio")]
mod gpio {
    use super::{MotorDriver, MotorError, clamp_speed};
    use rppal::gpio::{Gpio, OutputPin};
    use std::sync::Mutex;

    // BCM pin assignments (L298N wiring on the vehicle).
    const ENA: u8 = 18; // left PWM
    const ENB: u8 = 13; // right PWM
    const IN1: u8 = 23; // left direction a
    const IN2: u8 = 24; // left direction b
    const IN3: u8 = 27; // right direction a
    const IN4: u8 = 22; // right direction b

    const PWM_HZ: f64 = 1000.0;

    struct Channel {
        enable: OutputPin,
        dir_a: OutputPin,
        dir_b: OutputPin,
    }

    impl Channel {
        fn apply(&mut self, speed: f64) -> Result<(), MotorError> {
            if speed > 0.0 {
                self.dir_a.set_high();
                self.dir_b.set_low();
            } else if speed < 0.0 {
                self.dir_a.set_low();
                self.dir_b.set_high();
            } else {
                self.dir_a.set_low();
                self.dir_b.set_low();
            }
            self.enable
                .set_pwm_frequency(PWM_HZ, speed.abs() / 100.0)
                .map_err(|e| MotorError::new(format!("pwm update failed: {e}")))?;
            Ok(())
        }
    }

    /// rppal-backed driver with 1 kHz software PWM on the enable pins.
    pub struct GpioDriver {
        channels: Mutex<(Channel, Channel)>,
    }

    impl GpioDriver {
        pub fn new() -> Result<Self, MotorError> {
            let gpio = Gpio::new().map_err(|e| MotorError::new(format!("gpio init: {e}")))?;
            let mut pin = |n: u8| -> Result<OutputPin, MotorError> {
                Ok(gpio
                    .get(n)
                    .map_err(|e| MotorError::new(format!("gpio pin {n}: {e}")))?
                    .into_output_low())
            };
            let left = Channel {
                enable: pin(ENA)?,
                dir_a: pin(IN1)?,
                dir_b: pin(IN2)?,
            };
            let right = Channel {
                enable: pin(ENB)?,
                dir_a: pin(IN3)?,
                dir_b: pin(IN4)?,
            };
            tracing::info!("motor GPIO initialized");
            Ok(Self {
                channels: Mutex::new((left, right)),
            })
        }
    }

    impl MotorDriver for GpioDriver {
        fn drive(&self, left: f64, right: f64) -> Result<(), MotorError> {
            let (left, right) = (clamp_speed(left), clamp_speed(right));
            let mut channels = self.channels.lock().expect("motor channel lock poisoned");
            channels.0.apply(left)?;
            channels.1.apply(right)?;
            tracing::info!(left, right, "drive");
            Ok(())
        }
    }
}
