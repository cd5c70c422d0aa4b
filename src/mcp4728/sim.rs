// Licensed under the Apache-2.0 license

//! Line-level model of an MCP4728 for the address sideband tests.
//!
//! The master's pins are open-drain: a pin pulls its line low when it is an
//! output with the latch at 0. The model watches SDA/SCL edges, decodes bytes,
//! acknowledges the ones it accepts and answers the address read.

use std::cell::{RefCell, RefMut};
use std::collections::HashMap;
use std::convert::Infallible;
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType, OutputPin};

use crate::i2c::common::BusPins;
use crate::i2c::traits::{GpioControl, PinFunction};
use crate::mcp4728::command::ADDRESS_BASE;

pub struct SimState {
    pub pins: BusPins,
    pub functions: HashMap<u8, PinFunction>,
    outputs: HashMap<u8, bool>,
    levels: HashMap<u8, bool>,
    pub scl_stuck_low: bool,
    pub eeprom_bits: u8,
    pub register_bits: u8,
    pub ldac_high: bool,
    pub delay_ns: u64,
    /// Bytes of every transaction, recorded at STOP.
    pub transactions: Vec<Vec<u8>>,
    bytes: Vec<u8>,
    bit_index: u8,
    shift: u8,
    saw_rising: bool,
    ack_pending: bool,
    responding: Option<u8>,
    ldac_low_byte: Option<usize>,
}

impl SimState {
    fn master_low(&self, pin: u8) -> bool {
        self.outputs.get(&pin).copied().unwrap_or(false)
            && !self.levels.get(&pin).copied().unwrap_or(false)
    }

    fn device_low(&self) -> bool {
        if self.bit_index == 8 {
            return self.ack_pending;
        }
        match self.responding {
            Some(byte) if self.bit_index < 8 => byte & (0x80 >> self.bit_index) == 0,
            _ => false,
        }
    }

    fn sda_high(&self) -> bool {
        !self.master_low(self.pins.sda) && !self.device_low()
    }

    fn scl_high(&self) -> bool {
        !self.master_low(self.pins.scl) && !self.scl_stuck_low
    }

    fn lines(&self) -> (bool, bool) {
        (self.sda_high(), self.scl_high())
    }

    fn own_address(&self) -> u8 {
        (ADDRESS_BASE | self.eeprom_bits) << 1
    }

    fn reply(&self) -> u8 {
        (self.eeprom_bits << 5) | 0x10 | (self.register_bits << 1)
    }

    fn edges(&mut self, before: (bool, bool), after: (bool, bool)) {
        let (sda0, scl0) = before;
        let (sda1, scl1) = after;
        if scl0 && scl1 && sda0 != sda1 {
            if sda1 {
                self.stop_condition();
            } else {
                self.start_condition();
            }
        } else if !scl0 && scl1 {
            self.saw_rising = true;
            if self.responding.is_none() && self.bit_index < 8 {
                self.shift = (self.shift << 1) | u8::from(sda1);
            }
        } else if scl0 && !scl1 {
            self.falling();
        }
    }

    fn reset_bits(&mut self) {
        self.bit_index = 0;
        self.shift = 0;
        self.saw_rising = false;
        self.ack_pending = false;
        self.responding = None;
    }

    fn start_condition(&mut self) {
        self.reset_bits();
    }

    fn stop_condition(&mut self) {
        let bytes = std::mem::take(&mut self.bytes);
        let own = self.own_address();
        if let [first, current, new, confirm] = bytes[..] {
            if first == own
                && current == (0x61 | (self.eeprom_bits << 2))
                && new & 0xE3 == 0x62
                && confirm == new | 0x01
                && self.ldac_low_byte == Some(1)
            {
                self.eeprom_bits = (new >> 2) & 0x07;
                self.register_bits = self.eeprom_bits;
            }
        }
        self.transactions.push(bytes);
        self.ldac_low_byte = None;
        self.reset_bits();
    }

    fn falling(&mut self) {
        if !self.saw_rising {
            return;
        }
        self.saw_rising = false;
        self.bit_index += 1;
        if self.bit_index == 8 {
            if self.responding.is_some() {
                self.ack_pending = false;
            } else {
                let byte = self.shift;
                self.bytes.push(byte);
                self.ack_pending = self.bytes.len() > 1 || byte == 0x00 || byte == self.own_address();
            }
        } else if self.bit_index == 9 {
            let was_responding = self.responding.take().is_some();
            self.bit_index = 0;
            self.shift = 0;
            self.ack_pending = false;
            if !was_responding
                && self.bytes == [0x00, 0x0C, 0xC1]
                && self.ldac_low_byte == Some(1)
            {
                self.responding = Some(self.reply());
            }
        }
    }
}

/// Handle to the shared model; hands out the three sideband resources.
#[derive(Clone)]
pub struct SimDac(Rc<RefCell<SimState>>);

impl SimDac {
    pub fn new(pins: BusPins, address_bits: u8) -> Self {
        Self(Rc::new(RefCell::new(SimState {
            pins,
            functions: HashMap::new(),
            outputs: HashMap::new(),
            levels: HashMap::new(),
            scl_stuck_low: false,
            eeprom_bits: address_bits & 0x07,
            register_bits: address_bits & 0x07,
            ldac_high: false,
            delay_ns: 0,
            transactions: Vec::new(),
            bytes: Vec::new(),
            bit_index: 0,
            shift: 0,
            saw_rising: false,
            ack_pending: false,
            responding: None,
            ldac_low_byte: None,
        })))
    }

    pub fn state(&self) -> RefMut<'_, SimState> {
        self.0.borrow_mut()
    }

    pub fn gpio(&self) -> SimGpio {
        SimGpio(self.clone())
    }

    pub fn ldac(&self) -> SimLdac {
        SimLdac(self.clone())
    }

    pub fn delay(&self) -> SimDelay {
        SimDelay(self.clone())
    }

    pub fn function(&self, pin: u8) -> Option<PinFunction> {
        self.state().functions.get(&pin).copied()
    }

    /// Both lines released and high.
    pub fn lines_idle(&self) -> bool {
        let state = self.state();
        state.sda_high() && state.scl_high()
    }

    fn update(&self, f: impl FnOnce(&mut SimState)) {
        let mut state = self.state();
        let before = state.lines();
        f(&mut *state);
        let after = state.lines();
        state.edges(before, after);
    }
}

pub struct SimGpio(SimDac);

impl GpioControl for SimGpio {
    fn set_function(&mut self, pin: u8, function: PinFunction) {
        self.0.state().functions.insert(pin, function);
    }

    fn set_output(&mut self, pin: u8, output: bool) {
        self.0.update(|state| {
            state.outputs.insert(pin, output);
        });
    }

    fn set_level(&mut self, pin: u8, high: bool) {
        self.0.update(|state| {
            state.levels.insert(pin, high);
        });
    }

    fn is_high(&mut self, pin: u8) -> bool {
        let state = self.0.state();
        if pin == state.pins.sda {
            state.sda_high()
        } else if pin == state.pins.scl {
            state.scl_high()
        } else {
            !state.master_low(pin)
        }
    }
}

pub struct SimLdac(SimDac);

impl ErrorType for SimLdac {
    type Error = Infallible;
}

impl OutputPin for SimLdac {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        let mut state = self.0.state();
        if state.ldac_high && state.bit_index == 8 && !state.bytes.is_empty() {
            let byte = state.bytes.len() - 1;
            state.ldac_low_byte.get_or_insert(byte);
        }
        state.ldac_high = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.0.state().ldac_high = true;
        Ok(())
    }
}

pub struct SimDelay(SimDac);

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.0.state().delay_ns += u64::from(ns);
    }
}
