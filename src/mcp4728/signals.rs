// Licensed under the Apache-2.0 license

//! Completion flags shared between the bus interrupt and the DAC driver.
//!
//! The bus raises a flag from interrupt context; [`super::Mcp4728::task`]
//! clears it inside a critical section and then runs the user callback in
//! mainline context.

use core::cell::Cell;

use critical_section::{CriticalSection, Mutex};

use crate::i2c::bus::BusEvent;
use crate::i2c::device::BusDevice;

/// Asynchronous DAC operations that complete through the bus.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Operation {
    BusRequest,
    FastWrite,
    MultiWrite,
    EepromWrite,
    SetGains,
    SetVrefs,
    SetPowerDowns,
    Reset,
    Wakeup,
    Update,
    Read,
    Status,
}

/// A single fire flag.
pub struct Signal(Mutex<Cell<bool>>);

impl Signal {
    #[must_use]
    pub const fn new() -> Self {
        Self(Mutex::new(Cell::new(false)))
    }

    pub fn is_raised(&self) -> bool {
        critical_section::with(|cs| self.0.borrow(cs).get())
    }

    /// Clear the flag, reporting whether it was set.
    pub fn take(&self) -> bool {
        critical_section::with(|cs| self.0.borrow(cs).replace(false))
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl BusEvent for Signal {
    fn notify(&self, cs: CriticalSection<'_>, _device: BusDevice) {
        self.0.borrow(cs).set(true);
    }
}

/// Fire flags for one MCP4728.
///
/// Must outlive the bus's interest in them, so it usually lives in a
/// `static`:
///
/// ```rust,ignore
/// static DAC0_SIGNALS: DacSignals = DacSignals::new();
/// ```
pub struct DacSignals {
    bus_request: Signal,
    fast_write: Signal,
    multi_write: Signal,
    eeprom_write: Signal,
    set_gains: Signal,
    set_vrefs: Signal,
    set_power_downs: Signal,
    reset: Signal,
    wakeup: Signal,
    update: Signal,
    read: Signal,
    status: Signal,
}

impl DacSignals {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bus_request: Signal::new(),
            fast_write: Signal::new(),
            multi_write: Signal::new(),
            eeprom_write: Signal::new(),
            set_gains: Signal::new(),
            set_vrefs: Signal::new(),
            set_power_downs: Signal::new(),
            reset: Signal::new(),
            wakeup: Signal::new(),
            update: Signal::new(),
            read: Signal::new(),
            status: Signal::new(),
        }
    }

    #[must_use]
    pub fn get(&self, operation: Operation) -> &Signal {
        match operation {
            Operation::BusRequest => &self.bus_request,
            Operation::FastWrite => &self.fast_write,
            Operation::MultiWrite => &self.multi_write,
            Operation::EepromWrite => &self.eeprom_write,
            Operation::SetGains => &self.set_gains,
            Operation::SetVrefs => &self.set_vrefs,
            Operation::SetPowerDowns => &self.set_power_downs,
            Operation::Reset => &self.reset,
            Operation::Wakeup => &self.wakeup,
            Operation::Update => &self.update,
            Operation::Read => &self.read,
            Operation::Status => &self.status,
        }
    }

    #[must_use]
    pub fn is_pending(&self, operation: Operation) -> bool {
        self.get(operation).is_raised()
    }
}

impl Default for DacSignals {
    fn default() -> Self {
        Self::new()
    }
}
