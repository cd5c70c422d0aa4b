// Licensed under the Apache-2.0 license

//! Interrupt-driven transfer engine.
//!
//! A [`Transfer`] describes the one master transfer a bus can have in flight.
//! Writes are loaded into the command FIFO in one go and complete when the
//! FIFO drains. Reads are issued as batches of read tokens no larger than the
//! FIFO; each batch is drained from the receive FIFO by the interrupt handler,
//! which then queues the next batch until the requested length is reached.
//!
//! Received bytes land in a staging buffer owned by the bus, so the interrupt
//! handler never writes into memory the caller is also borrowing.

use critical_section::CriticalSection;

use crate::i2c::bus::BusEvent;
use crate::i2c::common::{DataCommand, Error, InterruptFlags, TransferFlags};
use crate::i2c::device::BusDevice;
use crate::i2c::traits::I2cPeripheral;

/// Longest read a single transfer can stage.
pub const RX_STAGING_LEN: usize = 32;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferState {
    Idle,
    WriteInProgress,
    ReadInProgress { remaining: usize },
}

/// What an interrupt did to the transfer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Service {
    /// No transfer event was flagged.
    Ignored,
    /// More read bytes are outstanding.
    Continued,
    /// The transfer finished; the completion, if any, has been notified.
    Completed,
}

pub(crate) struct Transfer<'a> {
    state: TransferState,
    buffer: [u8; RX_STAGING_LEN],
    buffer_size: usize,
    bytes_transferred: usize,
    tokens_queued: usize,
    overrun: bool,
    flags: TransferFlags,
    owner: Option<BusDevice>,
    completion: Option<&'a dyn BusEvent>,
}

impl<'a> Transfer<'a> {
    pub(crate) const fn new() -> Self {
        Self {
            state: TransferState::Idle,
            buffer: [0; RX_STAGING_LEN],
            buffer_size: 0,
            bytes_transferred: 0,
            tokens_queued: 0,
            overrun: false,
            flags: TransferFlags::NONE,
            owner: None,
            completion: None,
        }
    }

    pub(crate) fn state(&self) -> TransferState {
        self.state
    }

    pub(crate) fn is_in_progress(&self) -> bool {
        self.state != TransferState::Idle
    }

    /// Forget everything, including staged read data.
    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }

    /// Queue `data` for transmission.
    ///
    /// Writes may be stacked while earlier bytes are still in the FIFO, but
    /// only one of them may carry a completion.
    pub(crate) fn start_write<H: I2cPeripheral>(
        &mut self,
        hw: &mut H,
        owner: BusDevice,
        flags: TransferFlags,
        data: &[u8],
        done: Option<&'a dyn BusEvent>,
    ) -> Result<(), Error> {
        if data.is_empty() {
            return Err(Error::InvalidParameter);
        }
        if matches!(self.state, TransferState::ReadInProgress { .. })
            || (done.is_some() && self.completion.is_some())
        {
            return Err(Error::TransferPending);
        }
        if data.len() > H::DEPTH.saturating_sub(hw.tx_level()) {
            return Err(Error::FifoFull);
        }

        let last = data.len() - 1;
        for (index, &byte) in data.iter().enumerate() {
            let mut command = DataCommand::write(byte);
            if index == 0 && flags.restart {
                command = command.with_restart();
            }
            if index == last && flags.stop {
                command = command.with_stop();
            }
            hw.push(command);
        }

        if done.is_some() {
            self.completion = done;
        }
        self.owner = Some(owner);
        self.flags = flags;
        self.state = TransferState::WriteInProgress;
        hw.enable_interrupts(InterruptFlags::TX_EMPTY);
        Ok(())
    }

    /// Start reading `len` bytes into the staging buffer. Bytes left in the
    /// receive FIFO by an earlier transfer are discarded first.
    pub(crate) fn start_read<H: I2cPeripheral>(
        &mut self,
        hw: &mut H,
        owner: BusDevice,
        flags: TransferFlags,
        len: usize,
        done: &'a dyn BusEvent,
    ) -> Result<(), Error> {
        if len == 0 || len > RX_STAGING_LEN {
            return Err(Error::InvalidParameter);
        }
        if self.completion.is_some() || matches!(self.state, TransferState::ReadInProgress { .. })
        {
            return Err(Error::TransferPending);
        }
        let space = H::DEPTH.saturating_sub(hw.tx_level());
        if space == 0 {
            return Err(Error::FifoFull);
        }

        while hw.rx_level() > 0 {
            hw.pop();
        }

        self.buffer_size = len;
        self.bytes_transferred = 0;
        self.tokens_queued = 0;
        self.overrun = false;
        self.flags = flags;
        self.owner = Some(owner);
        self.completion = Some(done);
        self.state = TransferState::ReadInProgress { remaining: len };
        self.queue_read_tokens(hw, space);
        hw.enable_interrupts(InterruptFlags::RX_FULL);
        Ok(())
    }

    /// Push the next batch of read tokens, at most `space` of them.
    fn queue_read_tokens<H: I2cPeripheral>(&mut self, hw: &mut H, space: usize) {
        let batch = self
            .buffer_size
            .saturating_sub(self.tokens_queued)
            .min(space)
            .min(H::DEPTH);
        if batch == 0 {
            return;
        }
        hw.set_rx_threshold(threshold(batch));
        for offset in 0..batch {
            let position = self.tokens_queued + offset;
            let mut command = DataCommand::read();
            if position == 0 && self.flags.restart {
                command = command.with_restart();
            }
            if position + 1 == self.buffer_size && self.flags.stop {
                command = command.with_stop();
            }
            hw.push(command);
        }
        self.tokens_queued += batch;
    }

    /// Run the engine for one interrupt. Called with the bus lock held.
    pub(crate) fn service<H: I2cPeripheral>(
        &mut self,
        hw: &mut H,
        cs: CriticalSection<'_>,
    ) -> Service {
        let status = hw.interrupt_status();
        if !status.intersects(InterruptFlags::TRANSFER_EVENTS) {
            return Service::Ignored;
        }
        if status.contains(InterruptFlags::TX_EMPTY) {
            hw.disable_interrupts(InterruptFlags::TX_EMPTY);
        }
        if status.contains(InterruptFlags::STOP_DET) {
            hw.clear_stop_detected();
        }

        match self.state {
            TransferState::Idle => return Service::Ignored,
            TransferState::WriteInProgress => {}
            TransferState::ReadInProgress { .. } => {
                while self.bytes_transferred < self.buffer_size && hw.rx_level() > 0 {
                    let byte = hw.pop();
                    if let Some(slot) = self.buffer.get_mut(self.bytes_transferred) {
                        *slot = byte;
                    }
                    self.bytes_transferred += 1;
                }

                if self.bytes_transferred < self.buffer_size {
                    let Some(outstanding) = self.tokens_queued.checked_sub(self.bytes_transferred)
                    else {
                        // More bytes than tokens: the data is not ours.
                        self.overrun = true;
                        hw.disable_interrupts(InterruptFlags::RX_FULL);
                        return self.complete(cs);
                    };
                    if outstanding == 0 {
                        let space = H::DEPTH.saturating_sub(hw.tx_level());
                        self.queue_read_tokens(hw, space);
                    } else {
                        hw.set_rx_threshold(threshold(outstanding));
                    }
                    self.state = TransferState::ReadInProgress {
                        remaining: self.buffer_size - self.bytes_transferred,
                    };
                    return Service::Continued;
                }
                hw.disable_interrupts(InterruptFlags::RX_FULL);
            }
        }
        debug_assert!(
            self.completion.is_none() || hw.tx_level() == 0,
            "completion with commands still queued"
        );
        self.complete(cs)
    }

    /// Go idle and fire the completion, if any.
    fn complete(&mut self, cs: CriticalSection<'_>) -> Service {
        self.state = TransferState::Idle;
        if let Some(done) = self.completion.take() {
            if let Some(owner) = self.owner {
                done.notify(cs, owner);
            }
        }
        Service::Completed
    }

    /// Copy the bytes of the last finished read out of the staging buffer.
    pub(crate) fn read_result(&self, owner: BusDevice, out: &mut [u8]) -> Result<usize, Error> {
        if self.owner.map(|o| o.id()) != Some(owner.id()) {
            return Err(Error::NotActive);
        }
        if matches!(self.state, TransferState::ReadInProgress { .. }) {
            return Err(Error::TransferPending);
        }
        if self.overrun {
            return Err(Error::Overrun);
        }
        let count = self.bytes_transferred.min(out.len());
        let (Some(dst), Some(src)) = (out.get_mut(..count), self.buffer.get(..count)) else {
            return Err(Error::InvalidParameter);
        };
        dst.copy_from_slice(src);
        Ok(count)
    }
}

/// Receive threshold that fires once `batch` bytes are waiting.
fn threshold(batch: usize) -> u8 {
    u8::try_from(batch.saturating_sub(1)).unwrap_or(u8::MAX)
}
