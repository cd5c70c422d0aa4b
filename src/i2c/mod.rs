// Licensed under the Apache-2.0 license

//! Shared I2C bus driver.
//!
//! This module lets several device drivers share one I2C block in master mode
//! without blocking. Devices take turns owning the bus through a FIFO queue;
//! the owner issues writes and reads that complete from the peripheral's
//! interrupt. Hardware access goes through the capability traits in
//! [`traits`], so the same code runs against real registers and host fakes.

pub mod arbiter;
pub mod bus;
pub mod common;
pub mod device;
pub mod interrupt_registry;
#[cfg(test)]
pub(crate) mod mock;
pub mod traits;
pub mod transfer;

pub use arbiter::{ReleaseOutcome, RequestOutcome};
pub use bus::{BusEvent, I2cBus, SharedBus};
pub use common::{BusPins, Error, I2cConfig, I2cConfigBuilder, I2cSpeed, TransferFlags};
pub use device::{BusDevice, DeviceId, I2cDevice};
pub use interrupt_registry::{I2cInstance, InterruptHandler, InterruptRegistry};
pub use traits::{GpioControl, I2cFifo, I2cHardwareCore, I2cPeripheral, PinFunction};
