// Licensed under the Apache-2.0 license

//! # Interrupt Dispatch Table for I2C Instances
//!
//! Interrupt vectors are free functions with no arguments, so the handler for
//! `I2C0_IRQ` needs a way to reach the [`crate::i2c::bus::I2cBus`] that owns
//! peripheral 0. Each bus is a distinct type (its hardware, logger and queue
//! capacity are type parameters), so the buses cannot share an array directly.
//!
//! ## Solutions Considered
//!
//! ### 1. One `static` per peripheral, hard-coded in each vector (Rejected)
//! Ties the driver to one board layout and duplicates the vector body.
//!
//! ### 2. Mutable global pointers (Rejected)
//! Needs `unsafe` at every access and cannot express "set once".
//!
//! ### 3. Registration table of trait objects (Chosen Solution)
//! ```rust,ignore
//! static REGISTRY: InterruptRegistry<'static, 2> = InterruptRegistry::new();
//!
//! // at startup, once per bus
//! REGISTRY.register(I2cInstance::I2c0, &BUS0)?;
//!
//! #[interrupt]
//! fn I2C0_IRQ() {
//!     REGISTRY.dispatch(I2cInstance::I2c0);
//! }
//! ```
//!
//! A slot accepts exactly one registration and is never rewritten, so the
//! vector always reaches the same bus.

use core::cell::Cell;

use critical_section::Mutex;

use crate::i2c::common::Error;

/// Number of I2C blocks on the RP2040.
pub const I2C_INSTANCES: usize = 2;

/// Something an interrupt vector can hand control to.
pub trait InterruptHandler: Sync {
    fn on_interrupt(&self);
}

/// Hardware I2C block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum I2cInstance {
    I2c0,
    I2c1,
}

impl I2cInstance {
    #[must_use]
    pub const fn bus_number(self) -> usize {
        match self {
            Self::I2c0 => 0,
            Self::I2c1 => 1,
        }
    }
}

pub struct InterruptRegistry<'a, const N: usize = I2C_INSTANCES> {
    slots: [Mutex<Cell<Option<&'a dyn InterruptHandler>>>; N],
}

impl<const N: usize> Default for InterruptRegistry<'_, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, const N: usize> InterruptRegistry<'a, N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [const { Mutex::new(Cell::new(None)) }; N],
        }
    }

    /// Bind `handler` to `instance`.
    ///
    /// # Errors
    ///
    /// [`Error::SlotOccupied`] if the instance already has a handler,
    /// [`Error::InvalidParameter`] if the table has no slot for it.
    pub fn register(
        &self,
        instance: I2cInstance,
        handler: &'a dyn InterruptHandler,
    ) -> Result<(), Error> {
        let slot = self
            .slots
            .get(instance.bus_number())
            .ok_or(Error::InvalidParameter)?;
        critical_section::with(|cs| {
            let cell = slot.borrow(cs);
            if cell.get().is_some() {
                return Err(Error::SlotOccupied);
            }
            cell.set(Some(handler));
            Ok(())
        })
    }

    /// Run the handler bound to `instance`. Returns `false` if none is.
    pub fn dispatch(&self, instance: I2cInstance) -> bool {
        let handler = self
            .slots
            .get(instance.bus_number())
            .and_then(|slot| critical_section::with(|cs| slot.borrow(cs).get()));
        match handler {
            Some(handler) => {
                handler.on_interrupt();
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_registered(&self, instance: I2cInstance) -> bool {
        self.slots
            .get(instance.bus_number())
            .is_some_and(|slot| critical_section::with(|cs| slot.borrow(cs).get().is_some()))
    }
}
