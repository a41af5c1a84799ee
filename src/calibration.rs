//! Conversion of raw BL0942 register values to physical units.

use crate::packet::{DataPacket, Status};

/// Internal reference voltage of the BL0942, in volts.
pub const VREF: f32 = 1.218;

// Datasheet transfer function gains (inputs in mV, Vref in V).
const I_RMS_GAIN: f32 = 305_978.0;
const V_RMS_GAIN: f32 = 73_989.0;
const WATT_GAIN: f32 = 3_537.0;
// One CF pulse per 1638.4 * 256 accumulated WATT units per second.
const CF_PULSE_WATT_SECONDS: f32 = 1_638.4 * 256.0;

/// Register counts per physical unit.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Calibration {
    /// `V_RMS` counts per volt
    pub voltage_reference: f32,
    /// `I_RMS` counts per ampere
    pub current_reference: f32,
    /// `WATT` counts per watt
    pub power_reference: f32,
    /// `CF_CNT` pulses per kWh
    pub energy_reference: f32,
}

impl Default for Calibration {
    /// Constants used by most BL0942 smart plugs (1mOhm shunt, 5x390k/510R divider)
    fn default() -> Self {
        Self {
            voltage_reference: 15_873.359_442_99,
            current_reference: 251_213.464_696_22,
            power_reference: 596.0,
            energy_reference: 3_304.611_273_28,
        }
    }
}

impl Calibration {
    ///
    ///
    /// # Arguments
    ///
    /// * `shunt_ohm`: Current shunt resistance.
    /// * `divider_high_ohm`: Upper (line side) resistance of the voltage divider.
    /// * `divider_low_ohm`: Lower resistance of the voltage divider, across the V pins.
    ///
    /// returns: Calibration
    pub fn from_circuit(shunt_ohm: f32, divider_high_ohm: f32, divider_low_ohm: f32) -> Self {
        // mV seen on the current pins per ampere, and on the voltage pins per volt
        let current_mv = shunt_ohm * 1000.0;
        let voltage_mv = 1000.0 * divider_low_ohm / (divider_high_ohm + divider_low_ohm);

        let power_reference = WATT_GAIN * current_mv * voltage_mv / (VREF * VREF);

        Self {
            voltage_reference: V_RMS_GAIN * voltage_mv / VREF,
            current_reference: I_RMS_GAIN * current_mv / VREF,
            power_reference,
            energy_reference: 3_600_000.0 * power_reference / CF_PULSE_WATT_SECONDS,
        }
    }

    /// Convert one data packet to a [`Reading`].
    pub fn convert(&self, packet: &DataPacket) -> Reading {
        let voltage = packet.v_rms as f32 / self.voltage_reference;
        let current = packet.i_rms as f32 / self.current_reference;
        let power = packet.watt as f32 / self.power_reference;

        let apparent_power = voltage * current;
        let power_factor = if apparent_power > 0.0 {
            Some((power / apparent_power).clamp(-1.0, 1.0))
        } else {
            None
        };

        let frequency = match packet.frequency {
            0 => None,
            period_us => Some(1_000_000.0 / period_us as f32),
        };

        Reading {
            voltage,
            current,
            power,
            power_factor,
            frequency,
            cf_cnt: packet.cf_cnt,
            status: packet.status,
        }
    }

    /// Convert a CF pulse count to kWh.
    pub fn energy_kwh(&self, pulses: u64) -> f32 {
        pulses as f32 / self.energy_reference
    }
}

/// Physical values decoded from one data packet.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reading {
    /// RMS line voltage in V
    pub voltage: f32,
    /// RMS current in A
    pub current: f32,
    /// Active power in W, negative when flowing back to the grid
    pub power: f32,
    /// Active / apparent power, `None` with no apparent power to compare against
    pub power_factor: Option<f32>,
    /// Line frequency in Hz, `None` if the chip hasn't measured a period yet
    pub frequency: Option<f32>,
    /// Raw CF pulse counter
    pub cf_cnt: u32,
    pub status: Status,
}
