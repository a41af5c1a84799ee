//! Fake BL0942 behind an embedded-io serial port, for driving the driver without hardware.

#![allow(dead_code)]

use bl0942::packet::{checksum, PACKET_HEADER, PACKET_LEN};
use bl0942::Calibration;
use core::convert::Infallible;
use embedded_hal::delay::DelayNs;
use embedded_io::{ErrorType, Read, ReadReady, Write};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

pub const MODE: u8 = 0x19;
pub const SOFT_RESET: u8 = 0x1C;
pub const USR_WRPROT: u8 = 0x1D;
pub const MODE_DEFAULT: u32 = 0x87;

/// Calibration with round numbers so expected values are easy to write down
pub fn test_calibration() -> Calibration {
    Calibration {
        voltage_reference: 10_000.0,
        current_reference: 100_000.0,
        power_reference: 500.0,
        energy_reference: 1_000.0,
    }
}

/// Build a data packet as the chip at `address` would send it.
pub fn build_packet(
    address: u8,
    v_rms: u32,
    i_rms: u32,
    watt: i32,
    cf_cnt: u32,
    freq: u16,
) -> [u8; PACKET_LEN] {
    let mut data = [0u8; PACKET_LEN];
    data[0] = PACKET_HEADER;
    data[1..4].copy_from_slice(&i_rms.to_le_bytes()[..3]);
    data[4..7].copy_from_slice(&v_rms.to_le_bytes()[..3]);
    data[7..10].copy_from_slice(&i_rms.to_le_bytes()[..3]);
    data[10..13].copy_from_slice(&watt.to_le_bytes()[..3]);
    data[13..16].copy_from_slice(&cf_cnt.to_le_bytes()[..3]);
    data[16..18].copy_from_slice(&freq.to_le_bytes());
    data[22] = checksum(0x58 | address, &data[..22]);
    data
}

/// 230V, 2A, 400W, 50Hz with [`test_calibration`]
pub fn standard_packet(address: u8, cf_cnt: u32) -> [u8; PACKET_LEN] {
    build_packet(address, 2_300_000, 200_000, 200_000, cf_cnt, 20_000)
}

#[derive(Debug)]
pub struct ChipState {
    pub address: u8,
    pub registers: [u32; 32],
    pub locked: bool,
    /// Bytes waiting to be read by the driver
    pub rx: VecDeque<u8>,
    /// Everything the driver wrote
    pub tx: Vec<u8>,
    /// Reply to the next full packet requests
    pub packet: Option<[u8; PACKET_LEN]>,
    /// Don't answer anything
    pub silent: bool,
    /// Accept write frames but don't store them
    pub ignore_writes: bool,
    pub resets: u32,
    /// Rate the chip talks at, from the MODE register
    pub baudrate: u32,
    /// Rate the host UART is set to. Traffic is lost while the two differ.
    pub host_baudrate: u32,
    pending: Vec<u8>,
}

impl ChipState {
    fn reset_registers(&mut self) {
        self.registers = [0; 32];
        self.registers[MODE as usize] = MODE_DEFAULT;
        self.locked = true;
        self.baudrate = 4800;
    }

    fn reply(&mut self, bytes: &[u8]) {
        if !self.silent && self.baudrate == self.host_baudrate {
            self.rx.extend(bytes.iter().copied());
        }
    }

    fn process(&mut self) {
        loop {
            let Some(&command) = self.pending.first() else {
                return;
            };

            match command & 0xFC {
                0x58 => {
                    if self.pending.len() < 2 {
                        return;
                    }
                    let reg = self.pending[1];
                    self.pending.drain(..2);
                    if command & 0x03 != self.address {
                        continue;
                    }

                    if reg == 0xAA {
                        if let Some(packet) = self.packet {
                            self.reply(&packet);
                        }
                    } else {
                        let value = self.registers[(reg & 0x1F) as usize];
                        let mut reply = [0u8; 4];
                        reply[..3].copy_from_slice(&value.to_le_bytes()[..3]);
                        reply[3] = checksum(command.wrapping_add(reg), &reply[..3]);
                        self.reply(&reply);
                    }
                }
                0xA8 => {
                    if self.pending.len() < 6 {
                        return;
                    }
                    let frame: Vec<u8> = self.pending.drain(..6).collect();
                    if command & 0x03 != self.address || checksum(0, &frame[..5]) != frame[5] {
                        continue;
                    }

                    let reg = frame[1];
                    let value = u32::from_le_bytes([frame[2], frame[3], frame[4], 0]);
                    match reg {
                        USR_WRPROT => self.locked = value != 0x55,
                        SOFT_RESET if value == 0x5A5A5A => {
                            self.resets += 1;
                            self.reset_registers();
                        }
                        _ if !self.locked && !self.ignore_writes => {
                            self.registers[(reg & 0x1F) as usize] = value;
                        }
                        _ => {}
                    }

                    let baudrate = match (self.registers[MODE as usize] >> 12) & 0x3 {
                        0 => 4800,
                        1 => 9600,
                        2 => 19200,
                        _ => 38400,
                    };
                    if baudrate != self.baudrate {
                        // The rest of the buffer arrived at the old rate
                        self.baudrate = baudrate;
                        self.pending.clear();
                        return;
                    }
                }
                _ => {
                    self.pending.remove(0);
                }
            }
        }
    }
}

/// Cloneable handle: one clone goes into the driver, the test keeps another.
#[derive(Clone, Debug)]
pub struct FakeChip(pub Rc<RefCell<ChipState>>);

impl FakeChip {
    pub fn new(address: u8) -> Self {
        let mut state = ChipState {
            address,
            registers: [0; 32],
            locked: true,
            rx: VecDeque::new(),
            tx: Vec::new(),
            packet: None,
            silent: false,
            ignore_writes: false,
            resets: 0,
            baudrate: 4800,
            host_baudrate: 4800,
            pending: Vec::new(),
        };
        state.reset_registers();
        Self(Rc::new(RefCell::new(state)))
    }

    /// Make bytes available to the driver
    pub fn inject(&self, bytes: &[u8]) {
        self.0.borrow_mut().rx.extend(bytes.iter().copied());
    }

    pub fn set_packet(&self, packet: [u8; PACKET_LEN]) {
        self.0.borrow_mut().packet = Some(packet);
    }

    pub fn tx(&self) -> Vec<u8> {
        self.0.borrow().tx.clone()
    }

    pub fn clear_tx(&self) {
        self.0.borrow_mut().tx.clear();
    }

    pub fn register(&self, reg: u8) -> u32 {
        self.0.borrow().registers[reg as usize]
    }

    /// Reconfigure the host side of the link
    pub fn set_host_baudrate(&self, baudrate: u32) {
        self.0.borrow_mut().host_baudrate = baudrate;
    }

    pub fn baudrate(&self) -> u32 {
        self.0.borrow().baudrate
    }

    pub fn pending_rx(&self) -> usize {
        self.0.borrow().rx.len()
    }
}

impl ErrorType for FakeChip {
    type Error = Infallible;
}

impl Read for FakeChip {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut state = self.0.borrow_mut();
        let count = buf.len().min(state.rx.len());
        for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }
}

impl ReadReady for FakeChip {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.0.borrow().rx.is_empty())
    }
}

impl Write for FakeChip {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let mut state = self.0.borrow_mut();
        state.tx.extend_from_slice(buf);
        if state.baudrate == state.host_baudrate {
            state.pending.extend_from_slice(buf);
            state.process();
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Delay that only records how long it was asked to wait
#[derive(Clone, Default)]
pub struct MockDelay(pub Rc<Cell<u64>>);

impl MockDelay {
    pub fn elapsed_us(&self) -> u64 {
        self.0.get() / 1000
    }
}

impl DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.0.set(self.0.get() + ns as u64);
    }
}
