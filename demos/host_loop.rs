//! Runs the driver the way an ESPHome style host would: `setup` once, `update`
//! on a timer and `tick` on every loop pass. The serial port is a small
//! in-memory BL0942 so the example runs on any machine.

use bl0942::packet::{checksum, PACKET_HEADER, PACKET_LEN};
use bl0942::{BL0942Config, BL0942Driver, PollingComponent, Sensor, SetupStep};
use core::convert::Infallible;
use embedded_hal::delay::DelayNs;
use embedded_io::{ErrorType, Read, ReadReady, Write};
use std::cell::Cell;
use std::collections::VecDeque;
use std::error::Error;
use std::time::{Duration, Instant};

const LOOP_PASS: Duration = Duration::from_millis(20);
const RUN_FOR: Duration = Duration::from_secs(5);

/// Prints every value it receives
struct PrintSensor {
    name: &'static str,
    unit: &'static str,
}

impl Sensor for PrintSensor {
    fn publish_state(&self, value: f32) {
        println!("{:>14}: {value:.3} {}", self.name, self.unit);
    }
}

/// Energy sink that remembers the last total
#[derive(Default)]
struct EnergyTotal(Cell<f32>);

impl Sensor for EnergyTotal {
    fn publish_state(&self, value: f32) {
        self.0.set(value);
    }
}

/// BL0942 at address 0 with a steady 230V, 1.5A resistive load
#[derive(Default)]
struct SimulatedMeter {
    registers: [u32; 32],
    unlocked: bool,
    cf_cnt: u32,
    input: Vec<u8>,
    output: VecDeque<u8>,
}

impl SimulatedMeter {
    fn data_packet(&mut self) -> [u8; PACKET_LEN] {
        // Raw values for the default calibration
        let i_rms: u32 = 377_000;
        let v_rms: u32 = 3_655_000;
        let watt: u32 = 205_000;
        self.cf_cnt += 1;

        let mut packet = [0u8; PACKET_LEN];
        packet[0] = PACKET_HEADER;
        packet[1..4].copy_from_slice(&i_rms.to_le_bytes()[..3]);
        packet[4..7].copy_from_slice(&v_rms.to_le_bytes()[..3]);
        packet[7..10].copy_from_slice(&i_rms.to_le_bytes()[..3]);
        packet[10..13].copy_from_slice(&watt.to_le_bytes()[..3]);
        packet[13..16].copy_from_slice(&self.cf_cnt.to_le_bytes()[..3]);
        packet[16..18].copy_from_slice(&20_000u16.to_le_bytes());
        packet[22] = checksum(0x58, &packet[..22]);
        packet
    }

    fn process(&mut self) {
        loop {
            match self.input.first().copied() {
                Some(0x58) if self.input.len() >= 2 => {
                    let reg = self.input[1];
                    self.input.drain(..2);
                    if reg == 0xAA {
                        let packet = self.data_packet();
                        self.output.extend(packet);
                    } else {
                        let value = self.registers[(reg & 0x1F) as usize].to_le_bytes();
                        let reply = [value[0], value[1], value[2]];
                        self.output.extend(reply);
                        self.output.push_back(checksum(0x58u8.wrapping_add(reg), &reply));
                    }
                }
                Some(0xA8) if self.input.len() >= 6 => {
                    let frame: Vec<u8> = self.input.drain(..6).collect();
                    let value = u32::from_le_bytes([frame[2], frame[3], frame[4], 0]);
                    match frame[1] {
                        0x1D => self.unlocked = value == 0x55,
                        reg if self.unlocked => self.registers[(reg & 0x1F) as usize] = value,
                        _ => {}
                    }
                }
                Some(0x58) | Some(0xA8) | None => return,
                Some(_) => {
                    self.input.remove(0);
                }
            }
        }
    }
}

impl ErrorType for SimulatedMeter {
    type Error = Infallible;
}

impl Read for SimulatedMeter {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let count = buf.len().min(self.output.len());
        for (slot, byte) in buf.iter_mut().zip(self.output.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }
}

impl ReadReady for SimulatedMeter {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.output.is_empty())
    }
}

impl Write for SimulatedMeter {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.input.extend_from_slice(buf);
        self.process();
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(ns as u64));
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let voltage = PrintSensor {
        name: "voltage",
        unit: "V",
    };
    let current = PrintSensor {
        name: "current",
        unit: "A",
    };
    let power = PrintSensor {
        name: "power",
        unit: "W",
    };
    let power_factor = PrintSensor {
        name: "power factor",
        unit: "",
    };
    let frequency = PrintSensor {
        name: "frequency",
        unit: "Hz",
    };
    let energy = EnergyTotal::default();

    let mut driver = BL0942Driver::new(
        SimulatedMeter::default(),
        StdDelay,
        BL0942Config {
            update_interval_ms: 1000,
            ..BL0942Config::default()
        },
    )?;
    driver.set_voltage_sensor(&voltage);
    driver.set_current_sensor(&current);
    driver.set_power_sensor(&power);
    driver.set_power_factor_sensor(&power_factor);
    driver.set_frequency_sensor(&frequency);
    driver.set_energy_sensor(&energy);

    if let SetupStep::SwitchBaudrate(baudrate) = driver.setup()? {
        // A real host reconfigures its UART here
        println!("switching UART to {baudrate} baud");
        driver.finish_setup()?;
    }

    let interval = Duration::from_millis(driver.update_interval_ms() as u64);
    let started = Instant::now();
    let mut next_update = started;

    while started.elapsed() < RUN_FOR {
        if Instant::now() >= next_update {
            driver.update()?;
            next_update += interval;
        }
        driver.tick()?;
        std::thread::sleep(LOOP_PASS);
    }

    println!("energy total: {:.6} kWh", energy.0.get());
    let (_uart, _delay) = driver.release();
    Ok(())
}
