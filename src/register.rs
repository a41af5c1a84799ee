//! BL0942 register map and command bytes.

/// Read command. The low two bits carry the device address (A1/A2 pins).
pub const READ_COMMAND: u8 = 0x58;
/// Write command. The low two bits carry the device address (A1/A2 pins).
pub const WRITE_COMMAND: u8 = 0xA8;
/// Register "address" that makes the chip reply with the full data packet.
pub const FULL_PACKET: u8 = 0xAA;

/// Value written to `UsrWrProt` to unlock the user registers.
pub const USR_WRPROT_UNLOCK: u32 = 0x55;
/// Value written to `SoftReset` to reset the chip.
pub const SOFT_RESET_MAGIC: u32 = 0x5A5A5A;

/// Highest device address selectable with the A1/A2 pins.
pub const MAX_ADDRESS: u8 = 3;

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Register {
    // Electrical parameter registers (read only)
    IWave = 0x01,
    VWave = 0x02,
    IRms = 0x03,
    VRms = 0x04,
    IFastRms = 0x05,
    Watt = 0x06,
    CfCnt = 0x07,
    Freq = 0x08,
    Status = 0x09,

    // User operation registers
    IRmsOs = 0x12,
    WaCreep = 0x14,
    IFastRmsTh = 0x15,
    IFastRmsCyc = 0x16,
    FreqCyc = 0x17,
    OtFunx = 0x18,
    Mode = 0x19,
    GainCr = 0x1A,
    SoftReset = 0x1C,
    UsrWrProt = 0x1D,
}

/// Bits of the `MODE` register.
pub mod mode {
    /// Reserved bits, must stay set.
    pub const RESV: u32 = 0x03;
    /// Enable the CF pulse output.
    pub const CF_EN: u32 = 0x04;
    /// Update RMS registers every 800ms instead of 400ms.
    pub const RMS_UPDATE_800MS: u32 = 0x08;
    /// Fast RMS over a full cycle instead of a half cycle.
    pub const FAST_RMS_SEL: u32 = 0x10;
    /// 60Hz line (50Hz when clear).
    pub const AC_FREQ_60HZ: u32 = 0x200;
    /// Clear `CF_CNT` after each read.
    pub const CF_CNT_CLR_SEL: u32 = 0x400;
    /// Count absolute energy (both directions add).
    pub const CF_CNT_ADD_SEL: u32 = 0x800;

    pub const UART_RATE_4800: u32 = 0x0000;
    pub const UART_RATE_9600: u32 = 0x1000;
    pub const UART_RATE_19200: u32 = 0x2000;
    pub const UART_RATE_38400: u32 = 0x3000;
}
