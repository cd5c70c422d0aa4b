// Licensed under the Apache-2.0 license

//! MCP4728 command encoding and reply decoding.
//!
//! Pure functions: nothing here touches the bus.

use heapless::Vec;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::i2c::common::Error;

/// Factory default address.
pub const DEFAULT_ADDRESS: u8 = 0x60;
/// Base of the 0x60..=0x67 address block.
pub const ADDRESS_BASE: u8 = 0x60;
pub const CHANNELS: usize = 4;
/// The read command returns the live register and the EEPROM copy of each
/// channel.
pub const READ_RECORDS: usize = 2 * CHANNELS;
pub const READ_RECORD_LEN: usize = 3;
pub const MAX_CODE: u16 = 0x0FFF;

const COMMAND_MULTI_WRITE: u8 = 0b0100_0000;
const COMMAND_SEQUENTIAL_WRITE: u8 = 0b0101_0000;
const COMMAND_SINGLE_WRITE: u8 = 0b0101_1000;
const COMMAND_WRITE_VREF: u8 = 0b1000_0000;
const COMMAND_WRITE_POWER_DOWN: u8 = 0b1010_0000;
const COMMAND_WRITE_GAIN: u8 = 0b1100_0000;

/// Fast-write value with power-down bits 13:12 and code bits 11:0.
const FAST_VALUE_MASK: u16 = 0x3FFF;

const STATUS_READY: u8 = 0x80;
const STATUS_POWER_ON_RESET: u8 = 0x40;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Channel {
    A = 0,
    B = 1,
    C = 2,
    D = 3,
}

impl Channel {
    const fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Self::A,
            1 => Self::B,
            2 => Self::C,
            _ => Self::D,
        }
    }
}

impl TryFrom<u8> for Channel {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        if value > 3 {
            return Err(Error::InvalidParameter);
        }
        Ok(Self::from_bits(value))
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Gain {
    #[default]
    X1 = 0,
    X2 = 1,
}

impl Gain {
    const fn from_bit(bit: u8) -> Self {
        if bit & 1 == 0 {
            Self::X1
        } else {
            Self::X2
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum VoltageReference {
    #[default]
    Vdd = 0,
    /// Internal 2.048 V reference.
    Internal = 1,
}

impl VoltageReference {
    const fn from_bit(bit: u8) -> Self {
        if bit & 1 == 0 {
            Self::Vdd
        } else {
            Self::Internal
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PowerDown {
    #[default]
    Normal = 0,
    /// Output pulled to ground through 1 kΩ.
    Ground1k = 1,
    Ground100k = 2,
    Ground500k = 3,
}

impl PowerDown {
    const fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Self::Normal,
            1 => Self::Ground1k,
            2 => Self::Ground100k,
            _ => Self::Ground500k,
        }
    }
}

/// UDAC bit: whether a write reaches the output at once or waits for LDAC.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum UpdateMode {
    #[default]
    Immediate = 0,
    Deferred = 1,
}

/// Settings for one channel in a multi-write or EEPROM write.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelConfig {
    pub channel: Channel,
    pub vref: VoltageReference,
    pub power_down: PowerDown,
    pub gain: Gain,
    pub update: UpdateMode,
    /// 12-bit output code.
    pub code: u16,
}

impl ChannelConfig {
    #[must_use]
    pub const fn new(channel: Channel, code: u16) -> Self {
        Self {
            channel,
            vref: VoltageReference::Vdd,
            power_down: PowerDown::Normal,
            gain: Gain::X1,
            update: UpdateMode::Immediate,
            code,
        }
    }

    fn check(&self) -> Result<(), Error> {
        if self.code > MAX_CODE {
            Err(Error::InvalidParameter)
        } else {
            Ok(())
        }
    }

    /// `VREF·PD1·PD0·GAIN·D11..D8`
    fn config_byte(&self) -> u8 {
        ((self.vref as u8) << 7)
            | ((self.power_down as u8) << 5)
            | ((self.gain as u8) << 4)
            | ((self.code >> 8) as u8 & 0x0F)
    }

    fn code_word(&self) -> CodeWord {
        CodeWord {
            config: self.config_byte(),
            code_low: (self.code & 0xFF) as u8,
        }
    }
}

/// Three-byte channel record, shared by the multi-write command and the read
/// reply.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct ChannelFrame {
    pub header: u8,
    pub config: u8,
    pub code_low: u8,
}

#[derive(Copy, Clone, Debug, IntoBytes, Immutable, Unaligned)]
#[repr(C)]
struct CodeWord {
    config: u8,
    code_low: u8,
}

/// One decoded record of the read reply.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelReading {
    pub channel: u8,
    pub vref: VoltageReference,
    pub power_down: PowerDown,
    pub gain: Gain,
    pub code: u16,
    pub ready: bool,
    pub powered_on: bool,
    /// Record comes from EEPROM rather than the live register.
    pub is_eeprom: bool,
}

impl ChannelReading {
    #[must_use]
    pub fn decode(frame: &ChannelFrame, is_eeprom: bool) -> Self {
        let status = DacStatus::from_header(frame.header);
        Self {
            channel: (frame.header >> 4) & 0x03,
            vref: VoltageReference::from_bit(frame.config >> 7),
            power_down: PowerDown::from_bits(frame.config >> 5),
            gain: Gain::from_bit(frame.config >> 4),
            code: (u16::from(frame.config & 0x0F) << 8) | u16::from(frame.code_low),
            ready: !status.is_busy,
            powered_on: status.is_powered_on,
            is_eeprom,
        }
    }
}

/// Decode a read reply. Records alternate live register, EEPROM.
///
/// # Errors
///
/// [`Error::InvalidParameter`] if `raw` is not a whole number of records or
/// `out` is too short.
pub fn decode_readings(raw: &[u8], out: &mut [ChannelReading]) -> Result<usize, Error> {
    let frames = <[ChannelFrame]>::ref_from_bytes(raw).map_err(|_| Error::InvalidParameter)?;
    if frames.len() > out.len() {
        return Err(Error::InvalidParameter);
    }
    for (index, (frame, slot)) in frames.iter().zip(out.iter_mut()).enumerate() {
        *slot = ChannelReading::decode(frame, index % 2 == 1);
    }
    Ok(frames.len())
}

/// Busy and power-on-reset flags from a status byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DacStatus {
    /// An EEPROM write is still running.
    pub is_busy: bool,
    pub is_powered_on: bool,
}

impl DacStatus {
    /// RDY (bit 7) reads 1 when the device is idle.
    #[must_use]
    pub const fn from_header(byte: u8) -> Self {
        Self {
            is_busy: byte & STATUS_READY == 0,
            is_powered_on: byte & STATUS_POWER_ON_RESET != 0,
        }
    }
}

/// Address byte returned by the sideband address read.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AddressBits(pub u8);

impl AddressBits {
    /// Address held in EEPROM (bits 7:5).
    #[must_use]
    pub const fn eeprom_address(self) -> u8 {
        ADDRESS_BASE | ((self.0 >> 5) & 0x07)
    }

    /// Address latched in the input register (bits 3:1).
    #[must_use]
    pub const fn register_address(self) -> u8 {
        ADDRESS_BASE | ((self.0 >> 1) & 0x07)
    }
}

/// Commands sent to the general call address.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum GeneralCall {
    Reset = 0x06,
    Wakeup = 0x09,
    SoftwareUpdate = 0x08,
}

/// Fast write of up to four channels, starting at channel A.
///
/// Each value carries the power-down bits in 13:12 and the code in 11:0.
///
/// # Errors
///
/// [`Error::InvalidParameter`] for zero or more than four values, or a value
/// with bits above 13 set.
pub fn encode_fast_write(values: &[u16]) -> Result<Vec<u8, 8>, Error> {
    if values.is_empty() || values.len() > CHANNELS {
        return Err(Error::InvalidParameter);
    }
    let mut frame = Vec::new();
    for &value in values {
        if value > FAST_VALUE_MASK {
            return Err(Error::InvalidParameter);
        }
        frame
            .extend_from_slice(&value.to_be_bytes())
            .map_err(|()| Error::InvalidParameter)?;
    }
    Ok(frame)
}

/// Combine a power-down mode and a 12-bit code into a fast-write value.
///
/// # Errors
///
/// [`Error::InvalidParameter`] if `code` exceeds 12 bits.
pub fn fast_value(power_down: PowerDown, code: u16) -> Result<u16, Error> {
    if code > MAX_CODE {
        return Err(Error::InvalidParameter);
    }
    Ok((u16::from(power_down as u8) << 12) | code)
}

/// Multi-write of one to four channel records.
///
/// # Errors
///
/// [`Error::InvalidParameter`] for zero or more than four records or a code
/// above 12 bits.
pub fn encode_multi_write(channels: &[ChannelConfig]) -> Result<Vec<u8, 12>, Error> {
    if channels.is_empty() || channels.len() > CHANNELS {
        return Err(Error::InvalidParameter);
    }
    let mut frame = Vec::new();
    for config in channels {
        config.check()?;
        let record = ChannelFrame {
            header: COMMAND_MULTI_WRITE
                | ((config.channel as u8) << 1)
                | config.update as u8,
            config: config.config_byte(),
            code_low: (config.code & 0xFF) as u8,
        };
        frame
            .extend_from_slice(record.as_bytes())
            .map_err(|()| Error::InvalidParameter)?;
    }
    Ok(frame)
}

/// Write registers and EEPROM.
///
/// One record uses the single-write command for its channel. Several records
/// use the sequential write, which always ends at channel D, so the first
/// record lands on channel `4 - len`.
///
/// # Errors
///
/// [`Error::InvalidParameter`] for zero or more than four records or a code
/// above 12 bits.
pub fn encode_sequential_eeprom(channels: &[ChannelConfig]) -> Result<Vec<u8, 9>, Error> {
    let Some(first) = channels.first() else {
        return Err(Error::InvalidParameter);
    };
    if channels.len() > CHANNELS {
        return Err(Error::InvalidParameter);
    }
    let command = if channels.len() == 1 {
        COMMAND_SINGLE_WRITE | ((first.channel as u8) << 1) | first.update as u8
    } else {
        let start = (CHANNELS - channels.len()) as u8;
        COMMAND_SEQUENTIAL_WRITE | (start << 1) | first.update as u8
    };

    let mut frame = Vec::new();
    frame.push(command).map_err(|_| Error::InvalidParameter)?;
    for config in channels {
        config.check()?;
        frame
            .extend_from_slice(config.code_word().as_bytes())
            .map_err(|()| Error::InvalidParameter)?;
    }
    Ok(frame)
}

/// `1·1·0·X·GA·GB·GC·GD`
#[must_use]
pub fn encode_gains(gains: [Gain; CHANNELS]) -> u8 {
    let [a, b, c, d] = gains;
    COMMAND_WRITE_GAIN | ((a as u8) << 3) | ((b as u8) << 2) | ((c as u8) << 1) | d as u8
}

/// `1·0·0·X·VA·VB·VC·VD`
#[must_use]
pub fn encode_vrefs(vrefs: [VoltageReference; CHANNELS]) -> u8 {
    let [a, b, c, d] = vrefs;
    COMMAND_WRITE_VREF | ((a as u8) << 3) | ((b as u8) << 2) | ((c as u8) << 1) | d as u8
}

/// `1·0·1·X·PDA1·PDA0·PDB1·PDB0`, `PDC1·PDC0·PDD1·PDD0·X·X·X·X`
#[must_use]
pub fn encode_power_downs(modes: [PowerDown; CHANNELS]) -> [u8; 2] {
    let [a, b, c, d] = modes;
    [
        COMMAND_WRITE_POWER_DOWN | ((a as u8) << 2) | b as u8,
        ((c as u8) << 6) | ((d as u8) << 4),
    ]
}
