//! BL0942 UART frame encoding and decoding.
//!
//! The chip answers a full packet request (`0x58 | addr`, `0xAA`) with a
//! 23-byte data packet:
//!
//! | offset | size | field        |
//! |--------|------|--------------|
//! | 0      | 1    | header 0x55  |
//! | 1      | 3    | I_RMS        |
//! | 4      | 3    | V_RMS        |
//! | 7      | 3    | I_FAST_RMS   |
//! | 10     | 3    | WATT (signed)|
//! | 13     | 3    | CF_CNT       |
//! | 16     | 2    | FREQ         |
//! | 18     | 3    | STATUS       |
//! | 21     | 1    | reserved     |
//! | 22     | 1    | checksum     |
//!
//! All multi-byte values are little-endian. The checksum is the inverted
//! 8-bit sum of the read command byte and every preceding packet byte.

use crate::register::{Register, FULL_PACKET, READ_COMMAND, WRITE_COMMAND};

/// First byte of every data packet.
pub const PACKET_HEADER: u8 = 0x55;

/// Length of a full data packet including header and checksum.
pub const PACKET_LEN: usize = 23;

/// Length of a register read reply (three data bytes + checksum).
pub const REGISTER_REPLY_LEN: usize = 4;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PacketError {
    /// Frame is not exactly the expected size
    Length { expected: usize, actual: usize },
    /// First byte is not the packet header
    Header(u8),
    /// Checksum byte doesn't match the frame contents
    Checksum { expected: u8, actual: u8 },
}

/// Inverted 8-bit sum of `seed` and `data`.
pub fn checksum(seed: u8, data: &[u8]) -> u8 {
    !data.iter().fold(seed, |sum, &b| sum.wrapping_add(b))
}

pub fn read_u24_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0])
}

/// 24-bit two's complement, sign extended to 32 bits.
pub fn read_i24_le(bytes: &[u8]) -> i32 {
    (u32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]) as i32) >> 8
}

/// Flags from the `STATUS` register.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Status {
    /// Active power is negative
    pub reverse_power: bool,
    /// Anti-creep is holding power at zero
    pub creep: bool,
    /// Current below the zero-crossing threshold
    pub current_zx_low: bool,
    /// Voltage below the zero-crossing threshold
    pub voltage_zx_low: bool,
}

impl Status {
    pub fn from_register(value: u32) -> Self {
        Self {
            reverse_power: value & (1 << 0) != 0,
            creep: value & (1 << 1) != 0,
            current_zx_low: value & (1 << 8) != 0,
            voltage_zx_low: value & (1 << 9) != 0,
        }
    }
}

/// Raw register values carried by one data packet.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DataPacket {
    pub i_rms: u32,
    pub v_rms: u32,
    pub i_fast_rms: u32,
    pub watt: i32,
    pub cf_cnt: u32,
    /// Line period in microseconds
    pub frequency: u16,
    pub status: Status,
}

impl DataPacket {
    /// Validate and decode a data packet sent by the chip at `address`.
    pub fn parse(address: u8, data: &[u8]) -> Result<Self, PacketError> {
        if data.len() != PACKET_LEN {
            return Err(PacketError::Length {
                expected: PACKET_LEN,
                actual: data.len(),
            });
        }

        if data[0] != PACKET_HEADER {
            return Err(PacketError::Header(data[0]));
        }

        let expected = checksum(READ_COMMAND | address, &data[..PACKET_LEN - 1]);
        let actual = data[PACKET_LEN - 1];
        if expected != actual {
            return Err(PacketError::Checksum { expected, actual });
        }

        Ok(Self {
            i_rms: read_u24_le(&data[1..4]),
            v_rms: read_u24_le(&data[4..7]),
            i_fast_rms: read_u24_le(&data[7..10]),
            watt: read_i24_le(&data[10..13]),
            cf_cnt: read_u24_le(&data[13..16]),
            frequency: u16::from_le_bytes([data[16], data[17]]),
            status: Status::from_register(read_u24_le(&data[18..21])),
        })
    }
}

/// Request for the full data packet.
pub fn build_packet_request(address: u8) -> [u8; 2] {
    [READ_COMMAND | address, FULL_PACKET]
}

/// Request for a single register. The chip replies with [`REGISTER_REPLY_LEN`] bytes.
pub fn build_read_request(address: u8, register: Register) -> [u8; 2] {
    [READ_COMMAND | address, register as u8]
}

/// Write frame for a single register. Only the low 24 bits of `value` are sent.
pub fn build_write_frame(address: u8, register: Register, value: u32) -> [u8; 6] {
    let [b0, b1, b2, _] = value.to_le_bytes();
    let mut frame = [WRITE_COMMAND | address, register as u8, b0, b1, b2, 0];
    frame[5] = checksum(0, &frame[..5]);
    frame
}

/// Check a register read reply and extract its 24-bit value.
pub fn parse_register_reply(
    address: u8,
    register: Register,
    reply: &[u8; REGISTER_REPLY_LEN],
) -> Result<u32, PacketError> {
    let seed = (READ_COMMAND | address).wrapping_add(register as u8);
    let expected = checksum(seed, &reply[..3]);
    if expected != reply[3] {
        return Err(PacketError::Checksum {
            expected,
            actual: reply[3],
        });
    }

    Ok(read_u24_le(&reply[..3]))
}
