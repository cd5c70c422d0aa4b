// Licensed under the Apache-2.0 license

//! Bit-banged access to the MCP4728 address bits.
//!
//! Reading or changing the device address needs the LDAC pin to fall during
//! the eighth clock of a specific byte, which an I2C block cannot do. With the
//! peripheral detached, SDA and SCL are driven by hand as open-drain lines:
//! a line is pulled low by making the pin an output with its latch at 0, and
//! released by making it an input.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use fugit::MicrosDurationU32;

use crate::i2c::common::{BusPins, Error};
use crate::i2c::traits::{GpioControl, PinFunction};
use crate::mcp4728::command::{AddressBits, ADDRESS_BASE};

const GENERAL_CALL_ADDRESS: u8 = 0x00;
const GENERAL_CALL_READ_ADDRESS: u8 = 0x0C;
const GENERAL_CALL_READ_ADDRESS_REPLY: u8 = 0xC1;
const WRITE_ADDRESS_CURRENT: u8 = 0x61;
const WRITE_ADDRESS_NEW: u8 = 0x62;
const WRITE_ADDRESS_CONFIRM: u8 = 0x63;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SidebandConfig {
    /// Half of one SCL period.
    pub bit_time: MicrosDurationU32,
    /// Polls of a stretched SCL before giving up.
    pub stretch_retries: u32,
    /// Polls of SDA for the acknowledge before giving up.
    pub ack_retries: u32,
    /// Idle time after a read.
    pub settle: MicrosDurationU32,
    /// Idle time after an address write; the EEPROM needs 50 ms.
    pub eeprom_commit: MicrosDurationU32,
    /// LDAC goes through an inverting buffer.
    pub ldac_inverted: bool,
}

impl Default for SidebandConfig {
    fn default() -> Self {
        Self {
            bit_time: MicrosDurationU32::micros(2),
            stretch_retries: 100,
            ack_retries: 100,
            settle: MicrosDurationU32::micros(100),
            eeprom_commit: MicrosDurationU32::millis(60),
            ldac_inverted: false,
        }
    }
}

/// LDAC control and the address protocol, as seen by the DAC driver.
pub trait AddressSideband {
    /// `false` for boards without an LDAC line.
    fn is_present(&self) -> bool {
        true
    }

    /// Drive the logical LDAC level.
    ///
    /// # Errors
    ///
    /// [`Error::NoAuxPin`] without LDAC, [`Error::Pin`] if the pin driver fails.
    fn set_ldac(&mut self, high: bool) -> Result<(), Error>;

    /// Read the address bits. The I2C block must be detached from `pins`.
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] on a stuck clock, [`Error::Nack`] if the device
    /// stays silent.
    fn read_address(&mut self, pins: BusPins) -> Result<AddressBits, Error>;

    /// Move the device from address `current` to `new`. The I2C block must be
    /// detached from `pins`.
    ///
    /// # Errors
    ///
    /// As for [`AddressSideband::read_address`]; [`Error::InvalidParameter`]
    /// if `new` is outside 0x60..=0x67.
    fn write_address(&mut self, pins: BusPins, current: u8, new: u8) -> Result<(), Error>;
}

/// Placeholder for boards without an LDAC connection.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoSideband;

impl AddressSideband for NoSideband {
    fn is_present(&self) -> bool {
        false
    }

    fn set_ldac(&mut self, _high: bool) -> Result<(), Error> {
        Err(Error::NoAuxPin)
    }

    fn read_address(&mut self, _pins: BusPins) -> Result<AddressBits, Error> {
        Err(Error::NoAuxPin)
    }

    fn write_address(&mut self, _pins: BusPins, _current: u8, _new: u8) -> Result<(), Error> {
        Err(Error::NoAuxPin)
    }
}

/// GPIO bank, LDAC pin and delay source for the address protocol.
pub struct Sideband<G, P, D> {
    gpio: G,
    ldac: P,
    delay: D,
    config: SidebandConfig,
}

impl<G, P, D> Sideband<G, P, D>
where
    G: GpioControl,
    P: OutputPin,
    D: DelayNs,
{
    /// Take the pins and park LDAC high (outputs follow their registers only
    /// on a general call update).
    ///
    /// # Errors
    ///
    /// [`Error::Pin`] if LDAC cannot be driven.
    pub fn new(gpio: G, ldac: P, delay: D, config: SidebandConfig) -> Result<Self, Error> {
        let mut sideband = Self {
            gpio,
            ldac,
            delay,
            config,
        };
        sideband.drive_ldac(true)?;
        Ok(sideband)
    }

    pub fn config(&self) -> &SidebandConfig {
        &self.config
    }

    /// Give the pins back.
    pub fn release(self) -> (G, P, D) {
        (self.gpio, self.ldac, self.delay)
    }

    fn drive_ldac(&mut self, high: bool) -> Result<(), Error> {
        let level = high != self.config.ldac_inverted;
        let result = if level {
            self.ldac.set_high()
        } else {
            self.ldac.set_low()
        };
        result.map_err(|_| Error::Pin)
    }

    fn wait(&mut self) {
        self.delay.delay_us(self.config.bit_time.ticks());
    }

    fn wait_half(&mut self) {
        self.delay.delay_us(self.config.bit_time.ticks() / 2);
    }

    fn pull_low(&mut self, pin: u8) {
        self.gpio.set_output(pin, true);
    }

    fn release_line(&mut self, pin: u8) {
        self.gpio.set_output(pin, false);
    }

    fn prepare(&mut self, pins: BusPins) {
        for pin in [pins.sda, pins.scl] {
            self.gpio.set_output(pin, false);
            self.gpio.set_level(pin, false);
            self.gpio.set_function(pin, PinFunction::Gpio);
        }
    }

    fn start(&mut self, pins: BusPins) {
        self.pull_low(pins.sda);
        self.wait();
        self.pull_low(pins.scl);
        self.wait();
    }

    fn repeated_start(&mut self, pins: BusPins) {
        self.release_line(pins.scl);
        self.wait();
        self.pull_low(pins.sda);
        self.wait();
        self.pull_low(pins.scl);
        self.wait();
    }

    fn stop(&mut self, pins: BusPins) {
        self.pull_low(pins.sda);
        self.wait();
        self.release_line(pins.scl);
        self.wait();
        self.release_line(pins.sda);
        self.wait();
    }

    fn wait_for_clock(&mut self, scl: u8) -> Result<(), Error> {
        let mut retries = self.config.stretch_retries;
        while !self.gpio.is_high(scl) {
            if retries == 0 {
                return Err(Error::Timeout);
            }
            retries -= 1;
            self.wait();
        }
        Ok(())
    }

    /// Clock out `byte` MSB first while sampling SDA, then clock the
    /// acknowledge. With `latch`, LDAC falls after the eighth clock.
    fn transfer_byte(
        &mut self,
        pins: BusPins,
        byte: u8,
        latch: bool,
        expect_ack: bool,
    ) -> Result<u8, Error> {
        let mut received = 0u8;
        for bit in (0..8).rev() {
            let mask = 1u8 << bit;
            if byte & mask == 0 {
                self.pull_low(pins.sda);
            } else {
                self.release_line(pins.sda);
            }
            self.wait();
            self.release_line(pins.scl);
            self.wait();
            self.wait_for_clock(pins.scl)?;
            if self.gpio.is_high(pins.sda) {
                received |= mask;
            }
            self.pull_low(pins.scl);
            self.wait_half();
            if latch && bit == 0 {
                self.drive_ldac(false)?;
            }
            self.wait_half();
        }

        self.release_line(pins.sda);
        self.wait();
        self.release_line(pins.scl);
        self.wait();
        self.wait_for_clock(pins.scl)?;
        if expect_ack {
            let mut retries = self.config.ack_retries;
            while self.gpio.is_high(pins.sda) {
                if retries == 0 {
                    self.pull_low(pins.scl);
                    return Err(Error::Nack);
                }
                retries -= 1;
                self.wait();
            }
        }
        self.pull_low(pins.scl);
        self.wait();
        Ok(received)
    }

    /// Frame `body` with START/STOP and LDAC handling. The lines and LDAC are
    /// returned to idle on failure too.
    fn exchange<T>(
        &mut self,
        pins: BusPins,
        final_wait: MicrosDurationU32,
        body: impl FnOnce(&mut Self) -> Result<T, Error>,
    ) -> Result<T, Error> {
        self.prepare(pins);
        self.drive_ldac(true)?;
        self.start(pins);

        let result = body(self);

        let ldac = self.drive_ldac(true);
        self.stop(pins);
        let wait = if result.is_ok() {
            final_wait
        } else {
            self.config.settle
        };
        self.delay.delay_us(wait.ticks());

        let value = result?;
        ldac?;
        Ok(value)
    }
}

impl<G, P, D> AddressSideband for Sideband<G, P, D>
where
    G: GpioControl,
    P: OutputPin,
    D: DelayNs,
{
    fn set_ldac(&mut self, high: bool) -> Result<(), Error> {
        self.drive_ldac(high)
    }

    fn read_address(&mut self, pins: BusPins) -> Result<AddressBits, Error> {
        let settle = self.config.settle;
        self.exchange(pins, settle, |s| {
            s.transfer_byte(pins, GENERAL_CALL_ADDRESS, false, true)?;
            s.transfer_byte(pins, GENERAL_CALL_READ_ADDRESS, true, true)?;
            s.repeated_start(pins);
            s.transfer_byte(pins, GENERAL_CALL_READ_ADDRESS_REPLY, true, true)?;
            let raw = s.transfer_byte(pins, 0xFF, false, false)?;
            Ok(AddressBits(raw))
        })
    }

    fn write_address(&mut self, pins: BusPins, current: u8, new: u8) -> Result<(), Error> {
        if !(ADDRESS_BASE..=ADDRESS_BASE + 7).contains(&new) {
            return Err(Error::InvalidParameter);
        }
        let current_bits = current & 0x07;
        let new_bits = new & 0x07;
        let commit = self.config.eeprom_commit;
        self.exchange(pins, commit, |s| {
            s.transfer_byte(pins, (ADDRESS_BASE | current_bits) << 1, false, true)?;
            s.transfer_byte(pins, WRITE_ADDRESS_CURRENT | (current_bits << 2), true, true)?;
            s.transfer_byte(pins, WRITE_ADDRESS_NEW | (new_bits << 2), false, true)?;
            s.transfer_byte(pins, WRITE_ADDRESS_CONFIRM | (new_bits << 2), false, true)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp4728::sim::{SimDac, SimDelay, SimGpio, SimLdac};

    const PINS: BusPins = BusPins::new(4, 5);

    fn sideband(sim: &SimDac) -> Sideband<SimGpio, SimLdac, SimDelay> {
        Sideband::new(sim.gpio(), sim.ldac(), sim.delay(), SidebandConfig::default()).unwrap()
    }

    #[test]
    fn test_new_parks_ldac_high() {
        let sim = SimDac::new(PINS, 0);
        let _sideband = sideband(&sim);
        assert!(sim.state().ldac_high);
    }

    #[test]
    fn test_inverted_ldac() {
        let sim = SimDac::new(PINS, 0);
        let config = SidebandConfig {
            ldac_inverted: true,
            ..SidebandConfig::default()
        };
        let mut sideband = Sideband::new(sim.gpio(), sim.ldac(), sim.delay(), config).unwrap();
        assert!(!sim.state().ldac_high);
        sideband.set_ldac(false).unwrap();
        assert!(sim.state().ldac_high);
    }

    #[test]
    fn test_read_address() {
        let sim = SimDac::new(PINS, 3);
        let mut sideband = sideband(&sim);

        let bits = sideband.read_address(PINS).unwrap();
        assert_eq!(bits, AddressBits(0x76));
        assert_eq!(bits.eeprom_address(), 0x63);
        assert_eq!(sim.state().transactions, [vec![0x00, 0x0C, 0xC1]]);
        assert!(sim.state().ldac_high);
        assert_eq!(sim.function(PINS.sda), Some(PinFunction::Gpio));
        assert_eq!(sim.function(PINS.scl), Some(PinFunction::Gpio));
        assert!(sim.lines_idle());
    }

    #[test]
    fn test_write_address_then_read_back() {
        let sim = SimDac::new(PINS, 0);
        let mut sideband = sideband(&sim);

        sideband.write_address(PINS, 0x60, 0x63).unwrap();
        assert_eq!(sim.state().eeprom_bits, 3);
        assert_eq!(
            sim.state().transactions,
            [vec![0xC0, 0x61, 0x6E, 0x6F]]
        );
        assert!(sim.state().delay_ns >= 50_000_000);

        let bits = sideband.read_address(PINS).unwrap();
        assert_eq!(bits.eeprom_address(), 0x63);
        assert_eq!(bits.register_address(), 0x63);
    }

    #[test]
    fn test_write_from_wrong_address_is_nacked() {
        let sim = SimDac::new(PINS, 2);
        let mut sideband = sideband(&sim);
        assert_eq!(sideband.write_address(PINS, 0x60, 0x61), Err(Error::Nack));
        assert_eq!(sim.state().eeprom_bits, 2);
        assert!(sim.state().ldac_high);
        assert!(sim.lines_idle());
    }

    #[test]
    fn test_write_rejects_out_of_block_address() {
        let sim = SimDac::new(PINS, 0);
        let mut sideband = sideband(&sim);
        assert_eq!(
            sideband.write_address(PINS, 0x60, 0x68),
            Err(Error::InvalidParameter)
        );
        assert!(sim.state().transactions.is_empty());
    }

    #[test]
    fn test_stuck_clock_times_out() {
        let sim = SimDac::new(PINS, 0);
        sim.state().scl_stuck_low = true;
        let mut sideband = sideband(&sim);
        assert_eq!(sideband.read_address(PINS), Err(Error::Timeout));
        assert!(sim.state().ldac_high);
    }

    #[test]
    fn test_missing_sideband() {
        let mut none = NoSideband;
        assert!(!none.is_present());
        assert_eq!(none.set_ldac(true), Err(Error::NoAuxPin));
        assert_eq!(none.read_address(PINS), Err(Error::NoAuxPin));
        assert_eq!(none.write_address(PINS, 0x60, 0x61), Err(Error::NoAuxPin));
    }
}
