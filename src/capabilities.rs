//! Device capabilities the session drives but does not implement
//!
//! The light command toggles an [`Indicator`] (a flashlight on a phone), and
//! connection changes switch the accelerometer through a [`SensorSwitch`].
//! Only the on/off decisions live in this crate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// An on/off indicator such as a flashlight
pub trait Indicator: Send + Sync {
    /// Whether the device has this indicator at all
    fn is_available(&self) -> bool;

    fn is_on(&self) -> bool;

    fn set(&self, on: bool);

    /// Turn on if off, off if on. Returns the new state.
    fn toggle(&self) -> bool {
        let next = !self.is_on();
        self.set(next);
        next
    }
}

/// Accelerometer polling switch
pub trait SensorSwitch: Send + Sync {
    fn enable(&self);
    fn disable(&self);
    fn is_enabled(&self) -> bool;
}

/// Indicator held in memory; the CLI prints its transitions
#[derive(Debug)]
pub struct SoftIndicator {
    available: bool,
    on: AtomicBool,
}

impl SoftIndicator {
    pub fn new() -> Self {
        Self::with_availability(true)
    }

    pub fn with_availability(available: bool) -> Self {
        Self {
            available,
            on: AtomicBool::new(false),
        }
    }
}

impl Default for SoftIndicator {
    fn default() -> Self {
        Self::new()
    }
}

impl Indicator for SoftIndicator {
    fn is_available(&self) -> bool {
        self.available
    }

    fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }

    fn set(&self, on: bool) {
        self.on.store(on, Ordering::SeqCst);
        info!(on, "Indicator switched");
    }
}

/// Sensor switch that only logs and remembers its state
#[derive(Debug, Default)]
pub struct LoggingSensor {
    enabled: AtomicBool,
}

impl LoggingSensor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SensorSwitch for LoggingSensor {
    fn enable(&self) {
        if !self.enabled.swap(true, Ordering::SeqCst) {
            info!("Accelerometer enabled");
        }
    }

    fn disable(&self) {
        if self.enabled.swap(false, Ordering::SeqCst) {
            info!("Accelerometer disabled");
        } else {
            debug!("Accelerometer already disabled");
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

/// Capability bundle handed to the session at startup
#[derive(Clone)]
pub struct DeviceCapabilities {
    pub indicator: Arc<dyn Indicator>,
    pub sensor: Arc<dyn SensorSwitch>,
}

impl DeviceCapabilities {
    pub fn new(indicator: Arc<dyn Indicator>, sensor: Arc<dyn SensorSwitch>) -> Self {
        Self { indicator, sensor }
    }
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self::new(Arc::new(SoftIndicator::new()), Arc::new(LoggingSensor::new()))
    }
}

impl std::fmt::Debug for DeviceCapabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCapabilities")
            .field("indicator_on", &self.indicator.is_on())
            .field("sensor_enabled", &self.sensor.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_flips_state() {
        let indicator = SoftIndicator::new();
        assert!(!indicator.is_on());
        assert!(indicator.toggle());
        assert!(indicator.is_on());
        assert!(!indicator.toggle());
        assert!(!indicator.is_on());
    }

    #[test]
    fn test_unavailable_indicator_reports_it() {
        let indicator = SoftIndicator::with_availability(false);
        assert!(!indicator.is_available());
    }

    #[test]
    fn test_sensor_switch() {
        let sensor = LoggingSensor::new();
        assert!(!sensor.is_enabled());
        sensor.enable();
        sensor.enable();
        assert!(sensor.is_enabled());
        sensor.disable();
        assert!(!sensor.is_enabled());
    }
}
