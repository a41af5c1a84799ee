use crate::calibration::{Calibration, Reading};
use crate::component::PollingComponent;
use crate::fmt::{log_debug, log_error, log_info, log_warn};
use crate::packet::{self, DataPacket, PacketError, PACKET_HEADER, PACKET_LEN, REGISTER_REPLY_LEN};
use crate::register::{self, mode, Register};
use crate::sensor::{publish, Sensor, Sensors};
use embedded_hal::delay::DelayNs;
use embedded_io::{Read, ReadReady, Write};
use heapless::Vec;

const REPLY_POLL_US: u32 = 500;
const REPLY_TIMEOUT_US: u32 = 50_000;
const SOFT_RESET_DELAY_MS: u32 = 10;
// Upper bound on reads when draining stale input
const DISCARD_MAX_READS: usize = 64;

const CF_CNT_MASK: u32 = 0xFF_FFFF;
// Most pulses a wrap may account for between two samples. At 3304 pulses/kWh
// this is ~20kWh, far more than any load draws in one polling interval.
const CF_CNT_MAX_WRAP_PULSES: u32 = 0x1_0000;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LineFrequency {
    F50Hz,
    F60Hz,
}

/// UART baud rate programmed into the MODE register. The chip boots at 4800
/// (or 9600 with the SCLK_BPS pin high); the host's UART has to follow, see
/// [`SetupStep::SwitchBaudrate`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UartRate {
    B4800,
    B9600,
    B19200,
    B38400,
}

impl UartRate {
    pub fn baudrate(self) -> u32 {
        match self {
            UartRate::B4800 => 4800,
            UartRate::B9600 => 9600,
            UartRate::B19200 => 19200,
            UartRate::B38400 => 38400,
        }
    }

    fn mode_bits(self) -> u32 {
        match self {
            UartRate::B4800 => mode::UART_RATE_4800,
            UartRate::B9600 => mode::UART_RATE_9600,
            UartRate::B19200 => mode::UART_RATE_19200,
            UartRate::B38400 => mode::UART_RATE_38400,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BL0942Error<E> {
    Serial(E),
    /// No register reply within the timeout
    Timeout,
    /// Corrupt register reply
    Packet(PacketError),
    /// MODE register read back differently than written
    Setup { expected: u32, actual: u32 },
    /// Device address outside 0..=3
    Address(u8),
    /// Setup through [`PollingComponent::setup`] switched the chip to this baud
    /// rate. Reconfigure the host UART and call [`BL0942Driver::finish_setup`].
    BaudrateChanged(u32),
}

/// What the host has to do after [`BL0942Driver::setup`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SetupStep {
    /// The chip is configured and write protected again.
    Done,
    /// The chip now talks at this baud rate and is still unlocked. Switch the
    /// host UART, then call [`BL0942Driver::finish_setup`].
    SwitchBaudrate(u32),
}

#[derive(Copy, Clone, Debug)]
pub struct BL0942Config {
    /// Device address (0-3, set by the A1/A2 pins)
    pub address: u8,
    /// The line frequency
    pub line_frequency: LineFrequency,
    /// UART rate to switch the chip to
    pub uart_rate: UartRate,
    /// UART rate the chip comes out of power-on or soft reset with
    pub boot_uart_rate: UartRate,
    /// Soft reset the chip during setup. Also zeroes its energy counter.
    pub reset: bool,
    pub calibration: Calibration,
    /// Polling interval reported to the host
    pub update_interval_ms: u32,
}

impl Default for BL0942Config {
    fn default() -> Self {
        Self {
            address: 0,
            line_frequency: LineFrequency::F50Hz,
            uart_rate: UartRate::B4800,
            boot_uart_rate: UartRate::B4800,
            reset: false,
            calibration: Calibration::default(),
            update_interval_ms: 1000,
        }
    }
}

impl BL0942Config {
    /// MODE register value for this configuration
    pub fn mode(&self) -> u32 {
        mode::RESV
            | mode::CF_EN
            | mode::CF_CNT_ADD_SEL
            | self.uart_rate.mode_bits()
            | match self.line_frequency {
                LineFrequency::F50Hz => 0,
                LineFrequency::F60Hz => mode::AC_FREQ_60HZ,
            }
    }
}

/// Accumulates the chip's 24-bit CF pulse counter into a running total.
///
/// A sample lower than the previous one is either a wrap past `0xFFFFFF` or a
/// chip reset (brown-out, soft reset) that restarted counting from zero. The
/// two look the same on the wire. A drop is taken as a wrap only when the
/// wrapped distance is small enough to be plausible for one polling interval,
/// otherwise the new sample is counted from zero. A reset that happens while
/// the counter sits within that distance of `0xFFFFFF` is still miscounted as a
/// wrap, overstating the total by at most `0xFFFFFF - last` pulses.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct EnergyCounter {
    last_cf_cnt: Option<u32>,
    total_pulses: u64,
}

impl EnergyCounter {
    pub const fn new() -> Self {
        Self {
            last_cf_cnt: None,
            total_pulses: 0,
        }
    }

    /// Feed a `CF_CNT` sample, returns the new total.
    pub fn add(&mut self, cf_cnt: u32) -> u64 {
        let cf_cnt = cf_cnt & CF_CNT_MASK;

        let delta = match self.last_cf_cnt {
            None => cf_cnt,
            Some(last) if cf_cnt >= last => cf_cnt - last,
            Some(last) if (CF_CNT_MASK - last) + cf_cnt + 1 <= CF_CNT_MAX_WRAP_PULSES => {
                (CF_CNT_MASK - last) + cf_cnt + 1
            }
            Some(last) => {
                log_warn!("BL0942 CF counter went back from {} to {}", last, cf_cnt);
                cf_cnt
            }
        };

        self.last_cf_cnt = Some(cf_cnt);
        self.total_pulses += delta as u64;
        self.total_pulses
    }

    pub fn total_pulses(&self) -> u64 {
        self.total_pulses
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

pub struct BL0942Driver<'a, UART, Delay> {
    uart: UART,
    delay: Delay,
    config: BL0942Config,
    rx_buffer: Vec<u8, PACKET_LEN>,
    sensors: Sensors<'a>,
    energy: EnergyCounter,
    last_reading: Option<Reading>,
}

impl<'a, UART, Delay> BL0942Driver<'a, UART, Delay>
where
    UART: Read + Write + ReadReady,
    Delay: DelayNs,
{
    ///
    ///
    /// # Arguments
    ///
    /// * `uart`: The serial port wired to the chip's RX/TX pins.
    /// * `delay`: Used while waiting for register replies during setup.
    /// * `config`: Address, line frequency, UART rate and calibration.
    ///
    /// returns: Result<BL0942Driver<UART, Delay>, BL0942Error<<UART as ErrorType>::Error>>
    pub fn new(
        uart: UART,
        delay: Delay,
        config: BL0942Config,
    ) -> Result<Self, BL0942Error<UART::Error>> {
        if config.address > register::MAX_ADDRESS {
            return Err(BL0942Error::Address(config.address));
        }

        Ok(Self {
            uart,
            delay,
            config,
            rx_buffer: Vec::new(),
            sensors: Sensors::default(),
            energy: EnergyCounter::new(),
            last_reading: None,
        })
    }

    /// Drop stale input and program the MODE register.
    ///
    /// When `uart_rate` differs from `boot_uart_rate` the MODE write is the
    /// last frame sent at the old rate. The chip answers at the new rate from
    /// then on, so setup stops there and returns
    /// [`SetupStep::SwitchBaudrate`]; the host reconfigures its UART and calls
    /// [`Self::finish_setup`] to lock and verify. Otherwise setup runs to the
    /// end and returns [`SetupStep::Done`].
    pub fn setup(&mut self) -> Result<SetupStep, BL0942Error<UART::Error>> {
        self.rx_buffer.clear();
        self.discard_input()?;

        self.write_register(Register::UsrWrProt, register::USR_WRPROT_UNLOCK)?;
        if self.config.reset {
            self.write_register(Register::SoftReset, register::SOFT_RESET_MAGIC)?;
            self.delay.delay_ms(SOFT_RESET_DELAY_MS);
            self.energy.reset();
            // Reset restores write protection
            self.write_register(Register::UsrWrProt, register::USR_WRPROT_UNLOCK)?;
        }
        self.write_register(Register::Mode, self.config.mode())?;

        if self.config.uart_rate != self.config.boot_uart_rate {
            let baudrate = self.config.uart_rate.baudrate();
            log_info!(
                "BL0942 at address {} switched to {} baud",
                self.config.address,
                baudrate
            );
            return Ok(SetupStep::SwitchBaudrate(baudrate));
        }

        self.finish_setup()?;
        Ok(SetupStep::Done)
    }

    /// Restore write protection and check the MODE register took.
    ///
    /// Called by [`Self::setup`] itself unless it returned
    /// [`SetupStep::SwitchBaudrate`], in which case the host calls it once its
    /// UART runs at the new rate.
    pub fn finish_setup(&mut self) -> Result<(), BL0942Error<UART::Error>> {
        // Anything received around the rate switch is line noise
        self.rx_buffer.clear();
        self.discard_input()?;

        let mode = self.config.mode();
        self.write_register(Register::UsrWrProt, 0)?;

        let actual = self.read_register(Register::Mode)?;
        if actual != mode {
            log_error!(
                "BL0942 setup failed, MODE is {:#x}, expected {:#x}",
                actual,
                mode
            );
            return Err(BL0942Error::Setup {
                expected: mode,
                actual,
            });
        }

        log_info!(
            "BL0942 at address {} configured, MODE {:#x}",
            self.config.address,
            mode
        );
        Ok(())
    }

    /// Request a fresh data packet. The reply is picked up by [`Self::receive`].
    pub fn update(&mut self) -> Result<(), BL0942Error<UART::Error>> {
        if !self.rx_buffer.is_empty() {
            log_warn!(
                "Discarding {} bytes of incomplete BL0942 packet",
                self.rx_buffer.len()
            );
            self.rx_buffer.clear();
        }

        self.uart
            .write_all(&packet::build_packet_request(self.config.address))
            .map_err(BL0942Error::Serial)?;
        self.uart.flush().map_err(BL0942Error::Serial)
    }

    /// Drain the bytes that are ready without blocking and decode any packet
    /// they complete.
    ///
    /// Bytes ahead of a packet header are skipped. Corrupt packets are
    /// dropped without an error, only serial failures are returned.
    pub fn receive(&mut self) -> Result<Option<Reading>, BL0942Error<UART::Error>> {
        let mut reading = None;
        let mut skipped = 0usize;

        while self.uart.read_ready().map_err(BL0942Error::Serial)? {
            let mut chunk = [0u8; PACKET_LEN];
            let wanted = PACKET_LEN - self.rx_buffer.len();
            let read = self
                .uart
                .read(&mut chunk[..wanted])
                .map_err(BL0942Error::Serial)?;
            if read == 0 {
                break;
            }

            for &byte in &chunk[..read] {
                if self.rx_buffer.is_empty() && byte != PACKET_HEADER {
                    skipped += 1;
                    continue;
                }

                // Never full here, a full buffer is consumed right away
                let _ = self.rx_buffer.push(byte);

                if self.rx_buffer.is_full() {
                    let frame = core::mem::take(&mut self.rx_buffer);
                    match self.parse_data(&frame) {
                        Some(decoded) => reading = Some(decoded),
                        None => self.resync(&frame),
                    }
                }
            }
        }

        if skipped > 0 {
            log_debug!("Skipped {} bytes outside a BL0942 packet", skipped);
        }

        Ok(reading)
    }

    /// Decode one complete data packet and publish it to the configured sensors.
    ///
    /// Returns `None` and publishes nothing if the length, header or checksum is wrong.
    pub fn parse_data(&mut self, data: &[u8]) -> Option<Reading> {
        match DataPacket::parse(self.config.address, data) {
            Ok(packet) => Some(self.publish_packet(&packet)),
            Err(err) => {
                log_warn!("Dropping BL0942 packet: {:?}", err);
                None
            }
        }
    }

    pub fn read_register(&mut self, register: Register) -> Result<u32, BL0942Error<UART::Error>> {
        self.uart
            .write_all(&packet::build_read_request(self.config.address, register))
            .map_err(BL0942Error::Serial)?;
        self.uart.flush().map_err(BL0942Error::Serial)?;

        let mut reply = [0u8; REGISTER_REPLY_LEN];
        let mut received = 0;
        let mut waited_us = 0;

        while received < REGISTER_REPLY_LEN {
            let read = if self.uart.read_ready().map_err(BL0942Error::Serial)? {
                self.uart
                    .read(&mut reply[received..])
                    .map_err(BL0942Error::Serial)?
            } else {
                0
            };

            if read > 0 {
                received += read;
                continue;
            }

            if waited_us >= REPLY_TIMEOUT_US {
                log_warn!("BL0942 register {:?} read timed out", register);
                return Err(BL0942Error::Timeout);
            }
            self.delay.delay_us(REPLY_POLL_US);
            waited_us += REPLY_POLL_US;
        }

        packet::parse_register_reply(self.config.address, register, &reply)
            .map_err(BL0942Error::Packet)
    }

    /// Write the low 24 bits of `value`. User registers need `UsrWrProt` unlocked first.
    pub fn write_register(
        &mut self,
        register: Register,
        value: u32,
    ) -> Result<(), BL0942Error<UART::Error>> {
        self.uart
            .write_all(&packet::build_write_frame(self.config.address, register, value))
            .map_err(BL0942Error::Serial)?;
        self.uart.flush().map_err(BL0942Error::Serial)
    }

    fn publish_packet(&mut self, packet: &DataPacket) -> Reading {
        let reading = self.config.calibration.convert(packet);
        let pulses = self.energy.add(packet.cf_cnt);

        publish(self.sensors.voltage, Some(reading.voltage));
        publish(self.sensors.current, Some(reading.current));
        publish(self.sensors.power, Some(reading.power));
        publish(self.sensors.power_factor, reading.power_factor);
        publish(self.sensors.frequency, reading.frequency);
        publish(
            self.sensors.energy,
            Some(self.config.calibration.energy_kwh(pulses)),
        );

        log_debug!(
            "BL0942: {} V, {} A, {} W",
            reading.voltage,
            reading.current,
            reading.power
        );

        self.last_reading = Some(reading);
        reading
    }

    /// Keep whatever follows the next header byte of a rejected frame.
    fn resync(&mut self, frame: &[u8]) {
        if let Some(pos) = frame[1..].iter().position(|&b| b == PACKET_HEADER) {
            // Shorter than the frame it came from, always fits
            let _ = self.rx_buffer.extend_from_slice(&frame[pos + 1..]);
        }
    }

    fn discard_input(&mut self) -> Result<(), BL0942Error<UART::Error>> {
        let mut scratch = [0u8; 32];
        for _ in 0..DISCARD_MAX_READS {
            if !self.uart.read_ready().map_err(BL0942Error::Serial)? {
                break;
            }
            if self.uart.read(&mut scratch).map_err(BL0942Error::Serial)? == 0 {
                break;
            }
        }
        Ok(())
    }
}

impl<'a, UART, Delay> BL0942Driver<'a, UART, Delay> {
    pub fn set_voltage_sensor(&mut self, sensor: &'a dyn Sensor) {
        self.sensors.voltage = Some(sensor);
    }

    pub fn set_current_sensor(&mut self, sensor: &'a dyn Sensor) {
        self.sensors.current = Some(sensor);
    }

    pub fn set_power_sensor(&mut self, sensor: &'a dyn Sensor) {
        self.sensors.power = Some(sensor);
    }

    pub fn set_power_factor_sensor(&mut self, sensor: &'a dyn Sensor) {
        self.sensors.power_factor = Some(sensor);
    }

    pub fn set_frequency_sensor(&mut self, sensor: &'a dyn Sensor) {
        self.sensors.frequency = Some(sensor);
    }

    /// Published in kWh
    pub fn set_energy_sensor(&mut self, sensor: &'a dyn Sensor) {
        self.sensors.energy = Some(sensor);
    }

    /// Replace all sinks at once, `None` entries stop publishing that value.
    pub fn set_sensors(&mut self, sensors: Sensors<'a>) {
        self.sensors = sensors;
    }

    pub fn config(&self) -> &BL0942Config {
        &self.config
    }

    /// The last successfully decoded packet
    pub fn last_reading(&self) -> Option<&Reading> {
        self.last_reading.as_ref()
    }

    /// Energy counted since the driver started, or since the chip was reset in setup
    pub fn energy_kwh(&self) -> f32 {
        self.config
            .calibration
            .energy_kwh(self.energy.total_pulses())
    }

    /// Give back the serial port and delay.
    pub fn release(self) -> (UART, Delay) {
        (self.uart, self.delay)
    }
}

impl<'a, UART, Delay> PollingComponent for BL0942Driver<'a, UART, Delay>
where
    UART: Read + Write + ReadReady,
    Delay: DelayNs,
{
    type Error = BL0942Error<UART::Error>;

    fn setup(&mut self) -> Result<(), Self::Error> {
        match BL0942Driver::setup(self)? {
            SetupStep::Done => Ok(()),
            SetupStep::SwitchBaudrate(baudrate) => Err(BL0942Error::BaudrateChanged(baudrate)),
        }
    }

    fn update(&mut self) -> Result<(), Self::Error> {
        BL0942Driver::update(self)
    }

    fn tick(&mut self) -> Result<(), Self::Error> {
        self.receive().map(|_| ())
    }

    fn update_interval_ms(&self) -> u32 {
        self.config.update_interval_ms
    }
}

#[cfg(feature = "std")]
impl<E> std::fmt::Display for BL0942Error<E>
where
    E: std::fmt::Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BL0942Error::Serial(err) => write!(f, "Serial Error: {err:?}"),
            BL0942Error::Timeout => write!(f, "No reply from BL0942"),
            BL0942Error::Packet(err) => write!(f, "Corrupt BL0942 reply: {err:?}"),
            BL0942Error::Setup { expected, actual } => write!(
                f,
                "BL0942 setup failed, MODE is {actual:#x}, expected {expected:#x}"
            ),
            BL0942Error::Address(address) => write!(f, "Invalid BL0942 address {address}"),
            BL0942Error::BaudrateChanged(baudrate) => write!(
                f,
                "BL0942 switched to {baudrate} baud, setup must be finished at the new rate"
            ),
        }
    }
}

#[cfg(feature = "std")]
impl<E> std::error::Error for BL0942Error<E>
where
    E: std::fmt::Debug,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}
