// Licensed under the Apache-2.0 license

//! Host-side stand-ins for the I2C block, used by unit tests.
//!
//! [`FakeI2c`] models the parts of the peripheral the transfer engine relies
//! on: 16-entry FIFOs, masked interrupt status, the target register and the
//! activity flag. Nothing moves on the wire until [`FakeI2c::clock`] is called,
//! which lets tests observe the bus mid-transfer.

use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::vec::Vec;

use critical_section::{CriticalSection, Mutex};

use crate::i2c::bus::BusEvent;
use crate::i2c::common::{BusPins, DataCommand, I2cConfig, InterruptFlags};
use crate::i2c::device::BusDevice;
use crate::i2c::traits::{I2cFifo, I2cHardwareCore};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WireOp {
    Write {
        target: u16,
        general_call: bool,
        byte: u8,
        restart: bool,
        stop: bool,
    },
    Read {
        target: u16,
        restart: bool,
        stop: bool,
    },
}

#[derive(Default)]
pub struct FakeState {
    pub initialized: bool,
    pub init_count: usize,
    pub pins: Option<BusPins>,
    pub target: u16,
    pub target_writes: Vec<u16>,
    pub general_call: bool,
    pub busy: bool,
    pub mask: InterruptFlags,
    pub tx: VecDeque<DataCommand>,
    pub rx: VecDeque<u8>,
    pub rx_threshold: u8,
    pub stop_detected: bool,
    pub responses: VecDeque<u8>,
    pub wire: Vec<WireOp>,
}

#[derive(Clone, Default)]
pub struct FakeI2c(Arc<StdMutex<FakeState>>);

impl FakeI2c {
    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.0.lock().unwrap()
    }

    /// Bytes the target returns for upcoming read tokens.
    pub fn respond(&self, bytes: &[u8]) {
        self.state().responses.extend(bytes.iter().copied());
    }

    /// Hold the activity flag, as if the last byte were still on the wire.
    pub fn set_busy(&self, busy: bool) {
        self.state().busy = busy;
    }

    pub fn queued(&self) -> Vec<DataCommand> {
        self.state().tx.iter().copied().collect()
    }

    pub fn wire(&self) -> Vec<WireOp> {
        self.state().wire.clone()
    }

    /// Data bytes written on the wire, in order.
    pub fn written(&self) -> Vec<u8> {
        self.state()
            .wire
            .iter()
            .filter_map(|op| match op {
                WireOp::Write { byte, .. } => Some(*byte),
                WireOp::Read { .. } => None,
            })
            .collect()
    }

    pub fn clear_wire(&self) {
        self.state().wire.clear();
    }

    pub fn mask(&self) -> InterruptFlags {
        self.state().mask
    }

    pub fn rx_threshold(&self) -> u8 {
        self.state().rx_threshold
    }

    /// Execute every queued command.
    pub fn clock(&self) {
        let mut state = self.state();
        while let Some(command) = state.tx.pop_front() {
            let target = if state.general_call { 0 } else { state.target };
            if command.is_read() {
                let byte = state.responses.pop_front().unwrap_or(0xFF);
                state.rx.push_back(byte);
                state.wire.push(WireOp::Read {
                    target,
                    restart: command.is_restart(),
                    stop: command.is_stop(),
                });
            } else {
                let general_call = state.general_call;
                state.wire.push(WireOp::Write {
                    target,
                    general_call,
                    byte: command.byte(),
                    restart: command.is_restart(),
                    stop: command.is_stop(),
                });
            }
            if command.is_stop() {
                state.stop_detected = true;
            }
        }
    }

    fn raw_status(state: &FakeState) -> InterruptFlags {
        let mut raw = InterruptFlags::NONE;
        if state.tx.is_empty() {
            raw = raw.union(InterruptFlags::TX_EMPTY);
        }
        if state.rx.len() > usize::from(state.rx_threshold) {
            raw = raw.union(InterruptFlags::RX_FULL);
        }
        if state.stop_detected {
            raw = raw.union(InterruptFlags::STOP_DET);
        }
        raw
    }

    pub fn interrupt_pending(&self) -> bool {
        let state = self.state();
        Self::raw_status(&state).intersects(state.mask)
    }
}

impl I2cHardwareCore for FakeI2c {
    fn init(&mut self, config: &I2cConfig) {
        let mut state = self.state();
        state.initialized = true;
        state.init_count += 1;
        state.pins = Some(config.pins);
        state.mask = InterruptFlags::NONE;
        state.general_call = false;
    }

    fn deinit(&mut self) {
        let mut state = self.state();
        state.initialized = false;
        state.mask = InterruptFlags::NONE;
    }

    fn set_target_address(&mut self, address: u16) {
        let mut state = self.state();
        state.target = address;
        state.target_writes.push(address);
    }

    fn set_general_call(&mut self, enabled: bool) {
        self.state().general_call = enabled;
    }

    fn is_general_call(&self) -> bool {
        self.state().general_call
    }

    fn is_active(&self) -> bool {
        self.state().busy
    }

    fn enable_interrupts(&mut self, mask: InterruptFlags) {
        let mut state = self.state();
        state.mask = state.mask.union(mask);
    }

    fn disable_interrupts(&mut self, mask: InterruptFlags) {
        let mut state = self.state();
        state.mask = state.mask.difference(mask);
    }

    fn interrupt_status(&self) -> InterruptFlags {
        let state = self.state();
        InterruptFlags::from_bits(Self::raw_status(&state).bits() & state.mask.bits())
    }

    fn clear_stop_detected(&mut self) {
        self.state().stop_detected = false;
    }
}

impl I2cFifo for FakeI2c {
    fn tx_level(&self) -> usize {
        self.state().tx.len()
    }

    fn rx_level(&self) -> usize {
        self.state().rx.len()
    }

    fn push(&mut self, command: DataCommand) {
        let mut state = self.state();
        assert!(state.tx.len() < Self::DEPTH, "tx FIFO overflow");
        state.tx.push_back(command);
    }

    fn pop(&mut self) -> u8 {
        self.state().rx.pop_front().unwrap_or(0)
    }

    fn set_rx_threshold(&mut self, threshold: u8) {
        self.state().rx_threshold = threshold;
    }
}

/// Counts notifications and remembers the device of the last one.
pub struct RecordingEvent {
    count: Mutex<Cell<usize>>,
    last: Mutex<Cell<Option<BusDevice>>>,
}

impl Default for RecordingEvent {
    fn default() -> Self {
        Self {
            count: Mutex::new(Cell::new(0)),
            last: Mutex::new(Cell::new(None)),
        }
    }
}

impl RecordingEvent {
    pub fn count(&self) -> usize {
        critical_section::with(|cs| self.count.borrow(cs).get())
    }

    pub fn last(&self) -> Option<BusDevice> {
        critical_section::with(|cs| self.last.borrow(cs).get())
    }
}

impl BusEvent for RecordingEvent {
    fn notify(&self, cs: CriticalSection<'_>, device: BusDevice) {
        let count = self.count.borrow(cs);
        count.set(count.get() + 1);
        self.last.borrow(cs).set(Some(device));
    }
}
