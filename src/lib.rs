//!
//! A platform-agnostic driver for the BL0942 energy metering device, talking to it over UART.
//! Built using embedded-hal and embedded-io.
//!
//! The driver follows the polling lifecycle of ESPHome style hosts: `setup` once, `update` on a
//! timer to request a data packet, and `tick` every main loop pass to collect the reply. Decoded
//! voltage, current, power, power factor, line frequency and energy are published to optional
//! host-owned [`Sensor`]s.
//!

#![cfg_attr(not(any(test, feature = "std")), no_std)]

mod fmt;

pub mod calibration;
pub mod component;
pub mod driver;
pub mod packet;
pub mod register;
pub mod sensor;

pub use calibration::{Calibration, Reading};
pub use component::PollingComponent;
pub use driver::*;
pub use packet::{DataPacket, PacketError, Status};
pub use register::Register;
pub use sensor::{LatestValue, Sensor, Sensors};
