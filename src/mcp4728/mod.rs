// Licensed under the Apache-2.0 license

//! MCP4728 quad 12-bit DAC on a shared I2C bus.
//!
//! Every DAC command is a single non-blocking bus transfer. The bus marks the
//! operation's flag in [`DacSignals`] from interrupt context, and
//! [`Mcp4728::task`] later runs the user callback from mainline code with the
//! application context:
//!
//! ```rust,ignore
//! static SIGNALS: DacSignals = DacSignals::new();
//!
//! let mut dac = Mcp4728::new(&BUS, DEFAULT_ADDRESS, &SIGNALS)?;
//! if dac.request_bus(Some(on_bus)) == RequestOutcome::Active {
//!     dac.fast_write(&[0x800, 0x400, 0, 0xFFF], true, Some(on_written))?;
//! }
//! loop {
//!     dac.task(&mut app);
//! }
//! ```
//!
//! Reading or changing the device address needs LDAC and a bit-banged
//! exchange; see [`sideband`].

pub mod command;
pub mod sideband;
pub mod signals;
#[cfg(test)]
pub(crate) mod sim;

pub use command::{
    AddressBits, Channel, ChannelConfig, ChannelReading, DacStatus, Gain, GeneralCall, PowerDown,
    UpdateMode, VoltageReference, DEFAULT_ADDRESS,
};
pub use sideband::{AddressSideband, NoSideband, Sideband, SidebandConfig};
pub use signals::{DacSignals, Operation, Signal};

use crate::common::{Logger, NoOpLogger};
use crate::i2c::arbiter::{ReleaseOutcome, RequestOutcome};
use crate::i2c::bus::{BusEvent, SharedBus};
use crate::i2c::common::{BusPins, Error, TransferFlags};
use crate::i2c::device::I2cDevice;
use command::{ADDRESS_BASE, CHANNELS, READ_RECORDS, READ_RECORD_LEN};

pub type Callback<C> = fn(&mut C);
pub type ReadCallback<C> = fn(&mut C, &[ChannelReading]);
pub type StatusCallback<C> = fn(&mut C, DacStatus);

/// Size of the read reply for all eight records.
const READ_REPLY_LEN: usize = READ_RECORDS * READ_RECORD_LEN;

/// User callbacks waiting for their flag. Each fires at most once.
struct Callbacks<C> {
    bus_request: Option<Callback<C>>,
    release: Option<Callback<C>>,
    fast_write: Option<Callback<C>>,
    multi_write: Option<Callback<C>>,
    eeprom_write: Option<Callback<C>>,
    set_gains: Option<Callback<C>>,
    set_vrefs: Option<Callback<C>>,
    set_power_downs: Option<Callback<C>>,
    reset: Option<Callback<C>>,
    wakeup: Option<Callback<C>>,
    update: Option<Callback<C>>,
    read: Option<ReadCallback<C>>,
    status: Option<StatusCallback<C>>,
}

impl<C> Callbacks<C> {
    const fn new() -> Self {
        Self {
            bus_request: None,
            release: None,
            fast_write: None,
            multi_write: None,
            eeprom_write: None,
            set_gains: None,
            set_vrefs: None,
            set_power_downs: None,
            reset: None,
            wakeup: None,
            update: None,
            read: None,
            status: None,
        }
    }

    fn slot(&mut self, operation: Operation) -> Option<&mut Option<Callback<C>>> {
        match operation {
            Operation::BusRequest => Some(&mut self.bus_request),
            Operation::FastWrite => Some(&mut self.fast_write),
            Operation::MultiWrite => Some(&mut self.multi_write),
            Operation::EepromWrite => Some(&mut self.eeprom_write),
            Operation::SetGains => Some(&mut self.set_gains),
            Operation::SetVrefs => Some(&mut self.set_vrefs),
            Operation::SetPowerDowns => Some(&mut self.set_power_downs),
            Operation::Reset => Some(&mut self.reset),
            Operation::Wakeup => Some(&mut self.wakeup),
            Operation::Update => Some(&mut self.update),
            Operation::Read | Operation::Status => None,
        }
    }
}

/// Write-family completions, in the order [`Mcp4728::task`] serves them.
const WRITE_OPERATIONS: [Operation; 6] = [
    Operation::FastWrite,
    Operation::MultiWrite,
    Operation::EepromWrite,
    Operation::SetGains,
    Operation::SetVrefs,
    Operation::SetPowerDowns,
];

const GENERAL_CALL_OPERATIONS: [Operation; 3] =
    [Operation::Reset, Operation::Wakeup, Operation::Update];

/// Driver for one MCP4728.
///
/// `C` is the application context handed to callbacks by [`Mcp4728::task`].
pub struct Mcp4728<'a, B: ?Sized, S = NoSideband, C = (), L: Logger = NoOpLogger> {
    device: I2cDevice<'a, B>,
    signals: &'a DacSignals,
    callbacks: Callbacks<C>,
    read_count: usize,
    reply: [u8; READ_REPLY_LEN],
    read_reply: Option<Result<usize, Error>>,
    status_reply: Option<Result<u8, Error>>,
    release_pending: bool,
    sideband: S,
    logger: L,
}

impl<'a, B, C> Mcp4728<'a, B, NoSideband, C, NoOpLogger>
where
    B: SharedBus<'a> + ?Sized,
{
    /// Driver without LDAC access or logging.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidParameter`] if `address` is outside 0x60..=0x67 or the
    /// bus is out of device identities.
    pub fn new(bus: &'a B, address: u8, signals: &'a DacSignals) -> Result<Self, Error> {
        Self::with_sideband(bus, address, signals, NoSideband, NoOpLogger)
    }
}

impl<'a, B, S, C, L> Mcp4728<'a, B, S, C, L>
where
    B: SharedBus<'a> + ?Sized,
    S: AddressSideband,
    L: Logger,
{
    /// # Errors
    ///
    /// As for [`Mcp4728::new`].
    pub fn with_sideband(
        bus: &'a B,
        address: u8,
        signals: &'a DacSignals,
        sideband: S,
        logger: L,
    ) -> Result<Self, Error> {
        if !(ADDRESS_BASE..=ADDRESS_BASE + 7).contains(&address) {
            return Err(Error::InvalidParameter);
        }
        Ok(Self {
            device: I2cDevice::new(bus, u16::from(address))?,
            signals,
            callbacks: Callbacks::new(),
            read_count: 0,
            reply: [0; READ_REPLY_LEN],
            read_reply: None,
            status_reply: None,
            release_pending: false,
            sideband,
            logger,
        })
    }

    #[must_use]
    pub fn address(&self) -> u8 {
        u8::try_from(self.device.address()).unwrap_or(ADDRESS_BASE)
    }

    #[must_use]
    pub fn device(&self) -> &I2cDevice<'a, B> {
        &self.device
    }

    /// Whether `operation` completed and its callback has not run yet.
    #[must_use]
    pub fn is_pending(&self, operation: Operation) -> bool {
        self.signals.is_pending(operation)
    }

    fn event(&self, operation: Operation) -> &'a dyn BusEvent {
        let signals: &'a DacSignals = self.signals;
        signals.get(operation)
    }

    fn store(&mut self, operation: Operation, done: Option<Callback<C>>) {
        if let Some(slot) = self.callbacks.slot(operation) {
            *slot = done;
        }
    }

    /// Queue for the bus. On `Deferred`, `ready` runs from [`Mcp4728::task`]
    /// once the bus is handed over.
    pub fn request_bus(&mut self, ready: Option<Callback<C>>) -> RequestOutcome {
        let outcome = self.device.request(Some(self.event(Operation::BusRequest)));
        if outcome == RequestOutcome::Deferred {
            self.callbacks.bus_request = ready;
        }
        outcome
    }

    /// Give the bus up. On `Pending`, [`Mcp4728::task`] retries and runs
    /// `done` once the release goes through. A finished read keeps its
    /// callback across the release.
    pub fn release_bus(&mut self, done: Option<Callback<C>>) -> ReleaseOutcome {
        self.claim_replies();
        let outcome = self.device.release();
        match outcome {
            ReleaseOutcome::Pending => {
                self.release_pending = true;
                self.callbacks.release = done;
            }
            ReleaseOutcome::Removed => {
                self.release_pending = false;
                self.callbacks.bus_request = None;
            }
            ReleaseOutcome::NotOwner => {}
        }
        outcome
    }

    fn submit(
        &mut self,
        operation: Operation,
        flags: TransferFlags,
        frame: &[u8],
        done: Option<Callback<C>>,
    ) -> Result<(), Error> {
        self.device
            .write(flags, frame, Some(self.event(operation)))?;
        self.store(operation, done);
        Ok(())
    }

    /// Fast write to channels A onwards. Build values with
    /// [`command::fast_value`].
    ///
    /// # Errors
    ///
    /// [`Error::InvalidParameter`] for more than four values or a value wider
    /// than 14 bits, otherwise as for [`SharedBus::write`].
    pub fn fast_write(
        &mut self,
        values: &[u16],
        stop: bool,
        done: Option<Callback<C>>,
    ) -> Result<(), Error> {
        let frame = command::encode_fast_write(values)?;
        let flags = TransferFlags::new(false, stop);
        self.submit(Operation::FastWrite, flags, &frame, done)
    }

    /// # Errors
    ///
    /// [`Error::InvalidParameter`] for more than four records or a code above
    /// 12 bits, otherwise as for [`SharedBus::write`].
    pub fn multi_write(
        &mut self,
        channels: &[ChannelConfig],
        done: Option<Callback<C>>,
    ) -> Result<(), Error> {
        let frame = command::encode_multi_write(channels)?;
        self.submit(Operation::MultiWrite, TransferFlags::STOP, &frame, done)
    }

    /// Write registers and EEPROM. Several records end at channel D.
    ///
    /// # Errors
    ///
    /// As for [`Mcp4728::multi_write`].
    pub fn sequential_write_eeprom(
        &mut self,
        channels: &[ChannelConfig],
        done: Option<Callback<C>>,
    ) -> Result<(), Error> {
        let frame = command::encode_sequential_eeprom(channels)?;
        self.submit(Operation::EepromWrite, TransferFlags::STOP, &frame, done)
    }

    /// # Errors
    ///
    /// As for [`SharedBus::write`].
    pub fn set_all_gains(
        &mut self,
        gains: [Gain; CHANNELS],
        done: Option<Callback<C>>,
    ) -> Result<(), Error> {
        let frame = [command::encode_gains(gains)];
        self.submit(Operation::SetGains, TransferFlags::STOP, &frame, done)
    }

    /// # Errors
    ///
    /// As for [`SharedBus::write`].
    pub fn set_all_vrefs(
        &mut self,
        vrefs: [VoltageReference; CHANNELS],
        done: Option<Callback<C>>,
    ) -> Result<(), Error> {
        let frame = [command::encode_vrefs(vrefs)];
        self.submit(Operation::SetVrefs, TransferFlags::STOP, &frame, done)
    }

    /// # Errors
    ///
    /// As for [`SharedBus::write`].
    pub fn set_all_power_downs(
        &mut self,
        modes: [PowerDown; CHANNELS],
        done: Option<Callback<C>>,
    ) -> Result<(), Error> {
        let frame = command::encode_power_downs(modes);
        self.submit(Operation::SetPowerDowns, TransferFlags::STOP, &frame, done)
    }

    /// Read `count` records (live register and EEPROM alternate, channel A
    /// first).
    ///
    /// # Errors
    ///
    /// [`Error::InvalidParameter`] unless `count` is 1..=8,
    /// [`Error::TransferPending`] while an earlier read still waits for
    /// [`Mcp4728::task`], otherwise as for [`SharedBus::read`].
    pub fn read_channels(&mut self, count: usize, done: ReadCallback<C>) -> Result<(), Error> {
        if count == 0 || count > READ_RECORDS {
            return Err(Error::InvalidParameter);
        }
        if self.signals.is_pending(Operation::Read) {
            return Err(Error::TransferPending);
        }
        self.claim_replies();
        self.device.read(
            TransferFlags::STOP,
            count * READ_RECORD_LEN,
            self.event(Operation::Read),
        )?;
        self.read_count = count;
        self.callbacks.read = Some(done);
        Ok(())
    }

    /// Read the status byte.
    ///
    /// # Errors
    ///
    /// [`Error::TransferPending`] while an earlier poll still waits for
    /// [`Mcp4728::task`], otherwise as for [`SharedBus::read`].
    pub fn poll_status(&mut self, done: StatusCallback<C>) -> Result<(), Error> {
        if self.signals.is_pending(Operation::Status) {
            return Err(Error::TransferPending);
        }
        self.claim_replies();
        self.device
            .read(TransferFlags::STOP, 1, self.event(Operation::Status))?;
        self.callbacks.status = Some(done);
        Ok(())
    }

    fn general_call(
        &mut self,
        operation: Operation,
        command: GeneralCall,
        done: Option<Callback<C>>,
    ) -> Result<(), Error> {
        self.device.set_general_call_mode(true)?;
        let written = self.device.write(
            TransferFlags::STOP,
            &[command as u8],
            Some(self.event(operation)),
        );
        if let Err(err) = written {
            if let Err(restore) = self.device.set_general_call_mode(false) {
                self.logger.error(format_args!(
                    "mcp4728: general call mode stuck on: {restore}"
                ));
            }
            return Err(err);
        }
        self.store(operation, done);
        Ok(())
    }

    /// General call reset: every MCP4728 on the bus reloads from EEPROM.
    ///
    /// # Errors
    ///
    /// [`Error::NotActive`] or [`Error::BusBusy`] if general call mode cannot
    /// be entered, otherwise as for [`SharedBus::write`].
    pub fn reset(&mut self, done: Option<Callback<C>>) -> Result<(), Error> {
        self.general_call(Operation::Reset, GeneralCall::Reset, done)
    }

    /// General call wake-up: clears power-down on every MCP4728.
    ///
    /// # Errors
    ///
    /// As for [`Mcp4728::reset`].
    pub fn wakeup(&mut self, done: Option<Callback<C>>) -> Result<(), Error> {
        self.general_call(Operation::Wakeup, GeneralCall::Wakeup, done)
    }

    /// General call software update: all outputs follow their registers.
    ///
    /// # Errors
    ///
    /// As for [`Mcp4728::reset`].
    pub fn update_all_channels(&mut self, done: Option<Callback<C>>) -> Result<(), Error> {
        self.general_call(Operation::Update, GeneralCall::SoftwareUpdate, done)
    }

    /// # Errors
    ///
    /// [`Error::NoAuxPin`] without LDAC, [`Error::Pin`] on a pin failure.
    pub fn set_ldac_pin(&mut self, high: bool) -> Result<(), Error> {
        self.sideband.set_ldac(high)
    }

    /// Run `exchange` with the I2C block detached, then bring it back whatever
    /// the outcome.
    fn with_detached<T>(
        &mut self,
        exchange: impl FnOnce(&mut S, BusPins, u8) -> Result<T, Error>,
        new_address: impl FnOnce(&T) -> u8,
    ) -> Result<T, Error> {
        if !self.sideband.is_present() {
            return Err(Error::NoAuxPin);
        }
        let pins = self.device.bus_pins();
        let current = self.address();
        self.claim_replies();
        self.device.detach()?;

        let result = exchange(&mut self.sideband, pins, current);
        if let Ok(value) = &result {
            self.device.set_address(u16::from(new_address(value)));
        }
        let restored = self.device.reattach();

        match (&result, &restored) {
            (Err(err), _) => self
                .logger
                .error(format_args!("mcp4728: address exchange failed: {err}")),
            (Ok(_), Err(err)) => self
                .logger
                .error(format_args!("mcp4728: reattach failed: {err}")),
            (Ok(_), Ok(())) => {}
        }
        let value = result?;
        restored?;
        Ok(value)
    }

    /// Read the address bits over the sideband and adopt the EEPROM address.
    /// Blocks for the whole exchange. The device must own the bus with no
    /// transfer in flight.
    ///
    /// # Errors
    ///
    /// [`Error::NoAuxPin`] without LDAC, [`Error::NotActive`] or
    /// [`Error::BusBusy`] if the bus cannot be detached, [`Error::Timeout`] or
    /// [`Error::Nack`] from the exchange.
    pub fn read_address(&mut self) -> Result<AddressBits, Error> {
        let bits = self.with_detached(
            |sideband, pins, _| sideband.read_address(pins),
            |bits| bits.eeprom_address(),
        )?;
        self.logger.info(format_args!(
            "mcp4728: address {:#04x} (register {:#04x})",
            bits.eeprom_address(),
            bits.register_address()
        ));
        Ok(bits)
    }

    /// Move the device to `new_address` over the sideband. Blocks for the
    /// exchange and the EEPROM write.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidParameter`] if `new_address` is outside 0x60..=0x67,
    /// otherwise as for [`Mcp4728::read_address`].
    pub fn write_address(&mut self, new_address: u8) -> Result<(), Error> {
        if !(ADDRESS_BASE..=ADDRESS_BASE + 7).contains(&new_address) {
            return Err(Error::InvalidParameter);
        }
        self.with_detached(
            |sideband, pins, current| sideband.write_address(pins, current, new_address),
            |_| new_address,
        )?;
        self.logger
            .info(format_args!("mcp4728: address now {new_address:#04x}"));
        Ok(())
    }

    /// Run the callbacks of completed operations. Call it from the main loop.
    ///
    /// Bus hand-over comes first, then a pending release, the write family,
    /// a read (or else a status poll), and last the general call commands.
    /// A general call completion waits until general call mode can be left.
    pub fn task(&mut self, context: &mut C) {
        let signals = self.signals;
        self.claim_replies();

        if signals.get(Operation::BusRequest).take() {
            if let Some(ready) = self.callbacks.bus_request.take() {
                ready(context);
            }
        }

        if self.release_pending {
            self.retry_release(context);
        }

        for operation in WRITE_OPERATIONS {
            self.fire(operation, context);
        }

        if signals.get(Operation::Read).take() {
            self.finish_read(context);
        } else if signals.get(Operation::Status).take() {
            self.finish_status(context);
        }

        for operation in GENERAL_CALL_OPERATIONS {
            if !signals.is_pending(operation) {
                continue;
            }
            if self.device.set_general_call_mode(false).is_err() {
                continue;
            }
            self.fire(operation, context);
        }
    }

    fn fire(&mut self, operation: Operation, context: &mut C) {
        if !self.signals.get(operation).take() {
            return;
        }
        if let Some(done) = self.callbacks.slot(operation).and_then(Option::take) {
            done(context);
        }
    }

    fn retry_release(&mut self, context: &mut C) {
        match self.device.release() {
            ReleaseOutcome::Removed => {
                self.release_pending = false;
                if let Some(done) = self.callbacks.release.take() {
                    done(context);
                }
            }
            ReleaseOutcome::Pending => {}
            ReleaseOutcome::NotOwner => {
                self.release_pending = false;
                self.callbacks.release = None;
                self.logger.error(format_args!(
                    "mcp4728: {:#04x} lost the bus during a pending release",
                    self.device.address()
                ));
            }
        }
    }

    /// Copy finished replies out of the bus staging buffer.
    ///
    /// The staging buffer belongs to the bus: the next read overwrites it and
    /// a release or detach clears it. Anything that can do either calls this
    /// first, so a completed read still reaches its callback.
    fn claim_replies(&mut self) {
        if self.read_reply.is_none() && self.signals.is_pending(Operation::Read) {
            let expected = self.read_count * READ_RECORD_LEN;
            let out = self.reply.get_mut(..expected).unwrap_or(&mut []);
            self.read_reply = Some(self.device.read_result(out));
        }
        if self.status_reply.is_none() && self.signals.is_pending(Operation::Status) {
            let mut raw = [0u8; 1];
            let header = match self.device.read_result(&mut raw) {
                Ok(1) => {
                    let [header] = raw;
                    Ok(header)
                }
                Ok(_) => Err(Error::InvalidParameter),
                Err(err) => Err(err),
            };
            self.status_reply = Some(header);
        }
    }

    /// A reply that cannot be decoded still runs the callback, with no
    /// records.
    fn finish_read(&mut self, context: &mut C) {
        let mut readings = [ChannelReading::default(); READ_RECORDS];
        let decoded = match self.read_reply.take() {
            Some(Ok(len)) => self
                .reply
                .get(..len)
                .ok_or(Error::InvalidParameter)
                .and_then(|reply| command::decode_readings(reply, &mut readings)),
            Some(Err(err)) => Err(err),
            None => Err(Error::NotActive),
        };
        let Some(done) = self.callbacks.read.take() else {
            return;
        };
        match decoded {
            Ok(count) => done(context, readings.get(..count).unwrap_or(&[])),
            Err(err) => {
                self.logger
                    .error(format_args!("mcp4728: read reply unusable: {err}"));
                done(context, &[]);
            }
        }
    }

    fn finish_status(&mut self, context: &mut C) {
        let status = self.status_reply.take().unwrap_or(Err(Error::NotActive));
        let Some(done) = self.callbacks.status.take() else {
            return;
        };
        match status {
            Ok(header) => done(context, DacStatus::from_header(header)),
            Err(err) => self
                .logger
                .error(format_args!("mcp4728: status read failed: {err}")),
        }
    }
}
