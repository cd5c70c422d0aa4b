// Licensed under the Apache-2.0 license

//! Common types and constants for the shared I2C bus modules.
//!
//! This module provides shared definitions for error handling, bus
//! configuration, interrupt status bits and FIFO command words used across the
//! bus implementation.

use core::fmt;
use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};
use fugit::HertzU32;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum I2cSpeed {
    Standard = 100_000,
    Fast = 400_000,
    FastPlus = 1_000_000,
}

impl I2cSpeed {
    #[must_use]
    pub const fn frequency(self) -> HertzU32 {
        HertzU32::from_raw(self as u32)
    }
}

/// GPIO numbers of the data and clock lines a peripheral is routed to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusPins {
    pub sda: u8,
    pub scl: u8,
}

impl BusPins {
    #[must_use]
    pub const fn new(sda: u8, scl: u8) -> Self {
        Self { sda, scl }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct I2cConfig {
    pub baudrate: HertzU32,
    pub pins: BusPins,
}

pub struct I2cConfigBuilder {
    baudrate: HertzU32,
    pins: BusPins,
}

impl Default for I2cConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl I2cConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            baudrate: I2cSpeed::Standard.frequency(),
            pins: BusPins::new(4, 5),
        }
    }
    #[must_use]
    pub fn speed(mut self, speed: I2cSpeed) -> Self {
        self.baudrate = speed.frequency();
        self
    }
    #[must_use]
    pub fn baudrate(mut self, baudrate: HertzU32) -> Self {
        self.baudrate = baudrate;
        self
    }
    #[must_use]
    pub fn pins(mut self, sda: u8, scl: u8) -> Self {
        self.pins = BusPins::new(sda, scl);
        self
    }
    #[must_use]
    pub fn build(self) -> I2cConfig {
        I2cConfig {
            baudrate: self.baudrate,
            pins: self.pins,
        }
    }
}

/// Interrupt status and mask bits understood by the transfer engine.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct InterruptFlags(u32);

impl InterruptFlags {
    pub const NONE: Self = Self(0);
    pub const RX_FULL: Self = Self(1 << 2);
    pub const TX_EMPTY: Self = Self(1 << 4);
    pub const STOP_DET: Self = Self(1 << 9);
    /// Any of these wakes the transfer engine.
    pub const TRANSFER_EVENTS: Self =
        Self(Self::RX_FULL.0 | Self::TX_EMPTY.0 | Self::STOP_DET.0);

    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

/// One entry of the transmit FIFO: a data byte or a read token, optionally
/// tagged with a repeated start before it or a stop after it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DataCommand(u16);

impl DataCommand {
    const READ: u16 = 1 << 8;
    const STOP: u16 = 1 << 9;
    const RESTART: u16 = 1 << 10;

    #[must_use]
    pub const fn write(byte: u8) -> Self {
        Self(byte as u16)
    }

    #[must_use]
    pub const fn read() -> Self {
        Self(Self::READ)
    }

    #[must_use]
    pub const fn with_stop(self) -> Self {
        Self(self.0 | Self::STOP)
    }

    #[must_use]
    pub const fn with_restart(self) -> Self {
        Self(self.0 | Self::RESTART)
    }

    #[must_use]
    pub const fn is_read(self) -> bool {
        self.0 & Self::READ != 0
    }

    #[must_use]
    pub const fn is_stop(self) -> bool {
        self.0 & Self::STOP != 0
    }

    #[must_use]
    pub const fn is_restart(self) -> bool {
        self.0 & Self::RESTART != 0
    }

    #[must_use]
    pub const fn byte(self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    /// Raw register value, laid out as the data/command register expects it.
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }
}

/// Framing requested for a transfer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferFlags {
    pub restart: bool,
    pub stop: bool,
}

impl TransferFlags {
    pub const NONE: Self = Self {
        restart: false,
        stop: false,
    };
    pub const STOP: Self = Self {
        restart: false,
        stop: true,
    };

    #[must_use]
    pub const fn new(restart: bool, stop: bool) -> Self {
        Self { restart, stop }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Argument out of range (length, address, channel count, code value).
    InvalidParameter,
    /// The caller does not own the bus.
    NotActive,
    /// Not enough room in the transmit FIFO.
    FifoFull,
    /// A read or completion is already outstanding.
    TransferPending,
    /// The peripheral is still clocking a transfer.
    BusBusy,
    /// The peripheral is released from its pins.
    Detached,
    /// A clock line was held low past the retry bound.
    Timeout,
    /// The target did not acknowledge.
    Nack,
    /// The board has no LDAC line for this device.
    NoAuxPin,
    /// A GPIO driver reported a failure.
    Pin,
    /// An interrupt slot is already bound.
    SlotOccupied,
    /// The receive FIFO held more bytes than were requested.
    Overrun,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::InvalidParameter => "invalid parameter",
            Self::NotActive => "device does not own the bus",
            Self::FifoFull => "transmit FIFO full",
            Self::TransferPending => "transfer already pending",
            Self::BusBusy => "bus busy",
            Self::Detached => "peripheral detached from pins",
            Self::Timeout => "clock stretch timeout",
            Self::Nack => "no acknowledge",
            Self::NoAuxPin => "no LDAC pin",
            Self::Pin => "GPIO error",
            Self::SlotOccupied => "interrupt slot occupied",
            Self::Overrun => "receive overrun",
        };
        f.write_str(text)
    }
}

impl embedded_hal::i2c::Error for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Nack => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Unknown),
            Self::Timeout | Self::BusBusy => ErrorKind::Bus,
            Self::FifoFull | Self::Overrun => ErrorKind::Overrun,
            _ => ErrorKind::Other,
        }
    }
}
