//! Hardware access contract
//!
//! Bit-level SPI transfers, power-up sequencing and pin setup are provided by the
//! platform; the driver only relies on the operations in [`Hardware`]. None of
//! these may block at the bus level, polling loops belong to the driver.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use core::fmt::Debug;

/// Command strobes
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Strobe {
    Nop = 0x00,
    XOscOn = 0x01,
    TxCal = 0x02,
    RxOn = 0x03,
    TxOn = 0x04,
    /// Transmit if the channel is clear
    TxOnCca = 0x05,
    RfOff = 0x06,
    XOscOff = 0x07,
    FlushRx = 0x08,
    FlushTx = 0x09,
    Ack = 0x0A,
}

/// Configuration registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Register {
    Main = 0x10,
    MdmCtrl0 = 0x11,
    MdmCtrl1 = 0x12,
    Rssi = 0x13,
    SyncWord = 0x14,
    TxCtrl = 0x15,
    RxCtrl0 = 0x16,
    RxCtrl1 = 0x17,
    FsCtrl = 0x18,
    SecCtrl0 = 0x19,
    SecCtrl1 = 0x1A,
    BattMon = 0x1B,
    IoCfg0 = 0x1C,
    IoCfg1 = 0x1D,
}

/// Address recognition RAM locations (little endian)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum RamAddress {
    IeeeAddr = 0x160,
    PanId = 0x168,
    ShortAddr = 0x16A,
}

bitflags::bitflags! {
    /// Status byte returned on every SPI transaction
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct Status: u8 {
        const RSSI_VALID = 1 << 1;
        const LOCK = 1 << 2;
        const TX_ACTIVE = 1 << 3;
        const ENC_BUSY = 1 << 4;
        const TX_UNDERFLOW = 1 << 5;
        const XOSC16M_STABLE = 1 << 6;
    }
}

/// MDMCTRL0: automatic acknowledgment of frames requesting it
pub const AUTOACK: u16 = 1 << 4;

/// SECCTRL0: RX FIFO protection
pub const RXFIFO_PROTECTION: u16 = 1 << 9;

/// RXCTRL1: RX bandpass filter low current
pub const RXBPF_LOCUR: u16 = 1 << 13;

/// MDMCTRL1: correlation threshold field
pub const fn corr_thr(n: u16) -> u16 {
    (n & 0x1f) << 6
}

/// IOCFG0: FIFOP threshold field
pub const fn fifop_thr(n: u16) -> u16 {
    n & 0x7f
}

/// Synchronous transceiver access
///
/// Calls are only atomic with respect to the interrupt handler when issued
/// inside [`crate::shared::Shared::critical`].
pub trait Hardware {
    type Error: Debug;

    /// Issue a command strobe, returning the status byte
    fn strobe(&mut self, cmd: Strobe) -> Result<Status, Self::Error>;

    fn read_register(&mut self, reg: Register) -> Result<u16, Self::Error>;

    fn write_register(&mut self, reg: Register, value: u16) -> Result<(), Self::Error>;

    fn read_status(&mut self) -> Result<Status, Self::Error>;

    /// Read `buf.len()` bytes from the RX FIFO
    fn read_fifo(&mut self, buf: &mut [u8]) -> Result<(), Self::Error>;

    fn read_fifo_byte(&mut self) -> Result<u8, Self::Error>;

    /// Read and drop `n` bytes from the RX FIFO
    fn discard_fifo(&mut self, n: usize) -> Result<(), Self::Error> {
        for _ in 0..n {
            self.read_fifo_byte()?;
        }
        Ok(())
    }

    /// Append bytes to the TX FIFO
    fn write_fifo(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    fn write_ram(&mut self, addr: RamAddress, data: &[u8]) -> Result<(), Self::Error>;

    /// FIFOP pin, a complete frame (or overflow) is pending
    fn fifop(&mut self) -> bool;

    /// FIFO pin, the RX FIFO holds at least one byte
    fn fifo(&mut self) -> bool;

    /// SFD pin, start of frame delimiter sent or received
    fn sfd(&mut self) -> bool;

    /// CCA pin, channel currently assessed clear
    fn cca(&mut self) -> bool;

    /// The SPI bus is held by another peripheral
    fn bus_busy(&mut self) -> bool {
        false
    }

    fn set_fifop_interrupt(&mut self, enabled: bool);

    fn clear_fifop_interrupt(&mut self);
}
