// Licensed under the Apache-2.0 license

//! Device identity on a shared bus.
//!
//! Drivers embed an [`I2cDevice`]: the device's [`BusDevice`] handle plus a
//! reference to the bus it lives on. Every bus call goes through it.

use crate::i2c::arbiter::{ReleaseOutcome, RequestOutcome};
use crate::i2c::bus::{BusEvent, SharedBus};
use crate::i2c::common::{BusPins, Error, TransferFlags};

/// Bus-assigned identity, stable across address changes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceId(u8);

impl DeviceId {
    pub(crate) const fn new(raw: u8) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u8 {
        self.0
    }
}

/// What the bus needs to know about a device: who it is and where it answers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusDevice {
    id: DeviceId,
    address: u16,
}

impl BusDevice {
    pub(crate) const fn new(id: DeviceId, address: u16) -> Self {
        Self { id, address }
    }

    #[must_use]
    pub const fn id(self) -> DeviceId {
        self.id
    }

    #[must_use]
    pub const fn address(self) -> u16 {
        self.address
    }

    #[must_use]
    pub const fn with_address(self, address: u16) -> Self {
        Self {
            id: self.id,
            address,
        }
    }
}

pub struct I2cDevice<'a, B: ?Sized> {
    handle: BusDevice,
    bus: &'a B,
}

impl<'a, B> I2cDevice<'a, B>
where
    B: SharedBus<'a> + ?Sized,
{
    /// Register a device answering at `address` on `bus`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if the address does not fit in
    /// ten bits or the bus has run out of identities.
    pub fn new(bus: &'a B, address: u16) -> Result<Self, Error> {
        let handle = bus.register_device(address)?;
        Ok(Self { handle, bus })
    }

    #[must_use]
    pub fn handle(&self) -> BusDevice {
        self.handle
    }

    #[must_use]
    pub fn address(&self) -> u16 {
        self.handle.address()
    }

    /// Change the address used for subsequent bus ownership.
    ///
    /// Takes effect on the wire at the next [`I2cDevice::reattach`] or
    /// request.
    pub fn set_address(&mut self, address: u16) {
        self.handle = self.handle.with_address(address);
    }

    #[must_use]
    pub fn bus(&self) -> &'a B {
        self.bus
    }

    pub fn request(&self, ready: Option<&'a dyn BusEvent>) -> RequestOutcome {
        self.bus.request(&self.handle, ready)
    }

    pub fn release(&self) -> ReleaseOutcome {
        self.bus.release(&self.handle)
    }

    /// Release the bus, or report that a transfer is still in flight.
    ///
    /// # Errors
    ///
    /// `WouldBlock` while the transfer finishes, [`Error::NotActive`] if the
    /// device was not queued.
    pub fn try_release(&self) -> nb::Result<(), Error> {
        match self.release() {
            ReleaseOutcome::Removed => Ok(()),
            ReleaseOutcome::Pending => Err(nb::Error::WouldBlock),
            ReleaseOutcome::NotOwner => Err(nb::Error::Other(Error::NotActive)),
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.bus.is_active_device(&self.handle)
    }

    /// # Errors
    ///
    /// See [`SharedBus::write`].
    pub fn write(
        &self,
        flags: TransferFlags,
        data: &[u8],
        done: Option<&'a dyn BusEvent>,
    ) -> Result<(), Error> {
        self.bus.write(&self.handle, flags, data, done)
    }

    /// # Errors
    ///
    /// See [`SharedBus::read`].
    pub fn read(
        &self,
        flags: TransferFlags,
        len: usize,
        done: &'a dyn BusEvent,
    ) -> Result<(), Error> {
        self.bus.read(&self.handle, flags, len, done)
    }

    /// # Errors
    ///
    /// See [`SharedBus::read_result`].
    pub fn read_result(&self, out: &mut [u8]) -> Result<usize, Error> {
        self.bus.read_result(&self.handle, out)
    }

    /// # Errors
    ///
    /// See [`SharedBus::set_general_call_mode`].
    pub fn set_general_call_mode(&self, enabled: bool) -> Result<(), Error> {
        self.bus.set_general_call_mode(&self.handle, enabled)
    }

    /// # Errors
    ///
    /// [`Error::NotActive`] unless this device owns the bus.
    pub fn is_general_call_mode(&self) -> Result<bool, Error> {
        self.bus.is_general_call_mode(&self.handle)
    }

    #[must_use]
    pub fn bus_pins(&self) -> BusPins {
        self.bus.bus_pins()
    }

    /// # Errors
    ///
    /// See [`SharedBus::set_bus_pins`].
    pub fn set_bus_pins(&self, pins: BusPins) -> Result<(), Error> {
        self.bus.set_bus_pins(&self.handle, pins)
    }

    /// # Errors
    ///
    /// See [`SharedBus::detach`].
    pub fn detach(&self) -> Result<(), Error> {
        self.bus.detach(&self.handle)
    }

    /// # Errors
    ///
    /// See [`SharedBus::reattach`].
    pub fn reattach(&self) -> Result<(), Error> {
        self.bus.reattach(&self.handle)
    }
}
