// Licensed under the Apache-2.0 license

//! # Hardware Capability Traits
//!
//! The shared bus never touches registers directly. A board support layer
//! implements these small traits for its I2C block and GPIO bank, and the bus
//! and device drivers are written purely against them. That keeps the
//! arbitration and transfer logic testable on a host.
//!
//! ## Trait Hierarchy
//!
//! ```text
//! I2cHardwareCore (bring-up, target address, interrupts)
//! I2cFifo         (command/data FIFOs)
//!     └── I2cPeripheral (blanket: core + fifo)
//! GpioControl     (pin function, direction, level)
//! ```

use crate::i2c::common::{DataCommand, I2cConfig, InterruptFlags};

/// Bring-up, addressing and interrupt control of one I2C block in master mode.
///
/// All methods are plain register accesses and must be callable from
/// interrupt context. None of them may block.
pub trait I2cHardwareCore {
    /// Bring the peripheral up on `config.pins` at `config.baudrate`.
    ///
    /// Implementations route both pins to the I2C function, mask every
    /// interrupt source and unmask the peripheral's interrupt line.
    fn init(&mut self, config: &I2cConfig);

    /// Mask the interrupt line, return the pins to plain GPIO and disable the
    /// block.
    fn deinit(&mut self);

    /// Program the target address. The block is disabled around the write
    /// because the target register is only writable while disabled.
    fn set_target_address(&mut self, address: u16);

    /// Switch the target register between the programmed address and the
    /// general call address (0x00).
    fn set_general_call(&mut self, enabled: bool);

    fn is_general_call(&self) -> bool;

    /// Whether the block is still clocking a transfer on the wire.
    fn is_active(&self) -> bool;

    /// Unmask the given interrupt sources.
    fn enable_interrupts(&mut self, mask: InterruptFlags);

    /// Mask the given interrupt sources.
    fn disable_interrupts(&mut self, mask: InterruptFlags);

    /// Masked interrupt status.
    fn interrupt_status(&self) -> InterruptFlags;

    fn clear_stop_detected(&mut self);
}

/// Transmit/command and receive FIFOs.
pub trait I2cFifo {
    /// Entries in each FIFO.
    const DEPTH: usize = 16;

    /// Entries currently waiting in the transmit/command FIFO.
    fn tx_level(&self) -> usize;

    /// Bytes currently waiting in the receive FIFO.
    fn rx_level(&self) -> usize;

    fn push(&mut self, command: DataCommand);

    /// Pop one received byte. Only called when `rx_level() > 0`.
    fn pop(&mut self) -> u8;

    /// The receive-full interrupt asserts once `rx_level() > threshold`.
    fn set_rx_threshold(&mut self, threshold: u8);
}

/// Everything the bus needs from an I2C block.
pub trait I2cPeripheral: I2cHardwareCore + I2cFifo {}

impl<T: I2cHardwareCore + I2cFifo> I2cPeripheral for T {}

/// Pin multiplexer selection.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinFunction {
    I2c,
    Gpio,
}

/// Direct control over GPIO pads, addressed by GPIO number.
///
/// Used to drive the bus lines by hand while the I2C block is detached.
pub trait GpioControl {
    fn set_function(&mut self, pin: u8, function: PinFunction);

    /// `true` makes the pin an output, `false` an input.
    fn set_output(&mut self, pin: u8, output: bool);

    /// Output latch value, applied whenever the pin is an output.
    fn set_level(&mut self, pin: u8, high: bool);

    fn is_high(&mut self, pin: u8) -> bool;
}
