//! IR obstacle sensor readings for the `/ws/ir` stream.

use std::fmt;

#[derive(Debug)]
pub struct IrError {
    message: String,
}

impl IrError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for IrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ir sensor error: {}", self.message)
    }
}

impl std::error::Error for IrError {}

pub trait IrSensor: Send + Sync {
    /// Current sensor level, 0 or 1.
    fn read(&self) -> Result<u8, IrError>;
}

/// Fixed-value sensor for development without hardware.
#[derive(Debug, Clone, Copy)]
pub struct StubIrSensor {
    value: u8,
}

impl StubIrSensor {
    pub fn new(value: u8) -> Self {
        Self { value: value.min(1) }
    }
}

impl Default for StubIrSensor {
    fn default() -> Self {
        Self::new(1)
    }
}

impl IrSensor for StubIrSensor {
    fn read(&self) -> Result<u8, IrError> {
        Ok(self.value)
    }
}

#[cfg(feature = "gpio")]
pub use gpio::GpioIrSensor;

#[cfg(feature = "gpio")]
mod gpio {
    use super::{IrError, IrSensor};
    use rppal::gpio::{Gpio, InputPin};

    pub struct GpioIrSensor {
        pin: InputPin,
    }

    impl GpioIrSensor {
        pub fn new(bcm_pin: u8) -> Result<Self, IrError> {
            let gpio = Gpio::new().map_err(|e| IrError::new(format!("gpio init: {e}")))?;
            let pin = gpio
                .get(bcm_pin)
                .map_err(|e| IrError::new(format!("gpio pin {bcm_pin}: {e}")))?
                .into_input();
            Ok(Self { pin })
        }
    }

    impl IrSensor for GpioIrSensor {
        fn read(&self) -> Result<u8, IrError> {
            Ok(self.pin.read() as u8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_sensor_clamps_to_binary() {
        assert_eq!(StubIrSensor::new(7).read().unwrap(), 1);
        assert_eq!(StubIrSensor::new(0).read().unwrap(), 0);
    }
}
