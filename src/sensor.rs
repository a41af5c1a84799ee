//! Sensor sinks the driver publishes into.
//!
//! Sinks are owned by the host and lent to the driver as shared references,
//! so the host can keep reading them while the driver is running.

use core::cell::Cell;

/// A host-side sensor that accepts new readings.
pub trait Sensor {
    fn publish_state(&self, value: f32);
}

/// Sensor that keeps the most recent value and a publish counter.
#[derive(Debug, Default)]
pub struct LatestValue {
    state: Cell<Option<f32>>,
    count: Cell<u32>,
}

impl LatestValue {
    pub const fn new() -> Self {
        Self {
            state: Cell::new(None),
            count: Cell::new(0),
        }
    }

    /// Last published value, if any
    pub fn state(&self) -> Option<f32> {
        self.state.get()
    }

    /// Number of values published so far
    pub fn count(&self) -> u32 {
        self.count.get()
    }
}

impl Sensor for LatestValue {
    fn publish_state(&self, value: f32) {
        self.state.set(Some(value));
        self.count.set(self.count.get().wrapping_add(1));
    }
}

/// Optional sinks for every value the driver can publish.
#[derive(Default, Clone, Copy)]
pub struct Sensors<'a> {
    pub voltage: Option<&'a dyn Sensor>,
    pub current: Option<&'a dyn Sensor>,
    pub power: Option<&'a dyn Sensor>,
    pub power_factor: Option<&'a dyn Sensor>,
    pub frequency: Option<&'a dyn Sensor>,
    pub energy: Option<&'a dyn Sensor>,
}

/// Publish `value` to `sensor` if both are present.
pub(crate) fn publish(sensor: Option<&dyn Sensor>, value: Option<f32>) {
    if let (Some(sensor), Some(value)) = (sensor, value) {
        sensor.publish_state(value);
    }
}
