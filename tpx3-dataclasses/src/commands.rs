//! Chip command builders
//!
//! Every command going to the chip is a fixed 5 byte sync
//! header, one opcode byte and an opcode specific, bit packed
//! payload. The builders here are pure, they only assemble
//! byte sequences. Shipping them to the hardware is the
//! business of the register file in the scan crate.

use std::fmt;

use serde::{Deserialize,
            Serialize};

use crate::constants::SYNC_HEADER;
use crate::bitfield::BitField;
use crate::errors::{CommandError,
                    LengthError};
use crate::matrices::PcrMatrix;

/// The opcode byte of every command the chip understands
#[derive(Debug, Copy, Clone, PartialEq)]
#[repr(u8)]
pub enum CommandCode {
  SetDac               = 0x02,
  ReadDac              = 0x03,
  SetTpPeriod          = 0x0C,
  SetTpPulseNumber     = 0x0D,
  WriteGeneralConfig   = 0x30,
  ReadGeneralConfig    = 0x31,
  ResetTimer           = 0x40,
  RequestTimer         = 0x41,
  StartTimer           = 0x4A,
  EndOfCommand         = 0x71,
  OtherChip            = 0x72,
  WritePcr             = 0x80,
  ReadPcr              = 0x90,
  ReadMatrixSequential = 0xA0,
  ReadMatrixDataDriven = 0xB0,
  WriteCtpr            = 0xC0,
  ReadCtpr             = 0xD0,
  ResetSequential      = 0xE0,
  StopMatrixReadout    = 0xF0,
}

impl CommandCode {
  pub fn to_u8(&self) -> u8 {
    *self as u8
  }
}

impl fmt::Display for CommandCode {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<CommandCode: {:?} (0x{:02X})>", self, self.to_u8())
  }
}

/// The on-chip DACs
///
/// Each DAC has a fixed code used on the wire and a bit
/// width. Most are 8 bit, the fine threshold and fine test
/// pulse DACs are 9 bit, the coarse threshold DAC is 4 bit.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Dac {
  IbiasPreampOn,
  IbiasPreampOff,
  VPreampNcas,
  IbiasIkrum,
  Vfbk,
  VthresholdFine,
  VthresholdCoarse,
  IbiasDiscS1On,
  IbiasDiscS1Off,
  IbiasDiscS2On,
  IbiasDiscS2Off,
  IbiasPixelDac,
  IbiasTpBufferIn,
  IbiasTpBufferOut,
  VtpCoarse,
  VtpFine,
  IbiasCpPll,
  PllVcntrl,
}

impl Dac {

  /// The numeric code used in the command payload
  pub fn code(&self) -> u8 {
    match self {
      Dac::IbiasPreampOn    => 1,
      Dac::IbiasPreampOff   => 2,
      Dac::VPreampNcas      => 3,
      Dac::IbiasIkrum       => 4,
      Dac::Vfbk             => 5,
      Dac::VthresholdFine   => 6,
      Dac::VthresholdCoarse => 7,
      Dac::IbiasDiscS1On    => 8,
      Dac::IbiasDiscS1Off   => 9,
      Dac::IbiasDiscS2On    => 10,
      Dac::IbiasDiscS2Off   => 11,
      Dac::IbiasPixelDac    => 12,
      Dac::IbiasTpBufferIn  => 13,
      Dac::IbiasTpBufferOut => 14,
      Dac::VtpCoarse        => 15,
      Dac::VtpFine          => 16,
      Dac::IbiasCpPll       => 17,
      Dac::PllVcntrl        => 18,
    }
  }

  pub fn width(&self) -> usize {
    match self {
      Dac::VthresholdCoarse => 4,
      Dac::VthresholdFine   => 9,
      Dac::VtpFine          => 9,
      _                     => 8,
    }
  }

  /// Look a DAC up by its name from the chip manual
  pub fn from_name(name : &str) -> Result<Self, CommandError> {
    match name {
      "Ibias_Preamp_ON"   => Ok(Dac::IbiasPreampOn),
      "Ibias_Preamp_OFF"  => Ok(Dac::IbiasPreampOff),
      "VPreamp_NCAS"      => Ok(Dac::VPreampNcas),
      "Ibias_Ikrum"       => Ok(Dac::IbiasIkrum),
      "Vfbk"              => Ok(Dac::Vfbk),
      "Vthreshold_fine"   => Ok(Dac::VthresholdFine),
      "Vthreshold_coarse" => Ok(Dac::VthresholdCoarse),
      "Ibias_DiscS1_ON"   => Ok(Dac::IbiasDiscS1On),
      "Ibias_DiscS1_OFF"  => Ok(Dac::IbiasDiscS1Off),
      "Ibias_DiscS2_ON"   => Ok(Dac::IbiasDiscS2On),
      "Ibias_DiscS2_OFF"  => Ok(Dac::IbiasDiscS2Off),
      "Ibias_PixelDAC"    => Ok(Dac::IbiasPixelDac),
      "Ibias_TPbufferIn"  => Ok(Dac::IbiasTpBufferIn),
      "Ibias_TPbufferOut" => Ok(Dac::IbiasTpBufferOut),
      "VTP_coarse"        => Ok(Dac::VtpCoarse),
      "VTP_fine"          => Ok(Dac::VtpFine),
      "Ibias_CP_PLL"      => Ok(Dac::IbiasCpPll),
      "PLL_Vcntrl"        => Ok(Dac::PllVcntrl),
      _                   => {
        error!("Unknown DAC name {}!", name);
        Err(CommandError::UnknownDac)
      }
    }
  }
}

impl fmt::Display for Dac {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<Dac: {:?}, code {}, {} bit>", self, self.code(), self.width())
  }
}

/// The operation mode bits of the general config register
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum OperationMode {
  /// Time of arrival and time over threshold per hit
  #[default]
  ToaAndTot,
  /// Time of arrival only
  ToaOnly,
  /// Event counting and integral time over threshold
  EventAndItot,
}

impl OperationMode {
  pub fn to_bits(&self) -> u16 {
    match self {
      OperationMode::ToaAndTot    => 0b00,
      OperationMode::ToaOnly      => 0b01,
      OperationMode::EventAndItot => 0b10,
    }
  }
}

/// The 12 bit general configuration register
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
  pub polarity             : bool,
  pub op_mode              : OperationMode,
  pub gray_count_en        : bool,
  pub ack_command_en       : bool,
  pub test_pulse_en        : bool,
  pub fast_io_en           : bool,
  pub timer_overflow_ctrl  : bool,
  pub select_tp_dig_analog : bool,
  pub select_tp_ext_int    : bool,
  pub select_toa_clk       : bool,
}

impl GeneralConfig {

  pub fn to_bits(&self) -> u16 {
    let mut bits = self.op_mode.to_bits() << 1;
    if self.polarity             { bits |= 1;       }
    if self.gray_count_en        { bits |= 1 << 3;  }
    if self.ack_command_en       { bits |= 1 << 4;  }
    if self.test_pulse_en        { bits |= 1 << 5;  }
    if self.fast_io_en           { bits |= 1 << 6;  }
    if self.timer_overflow_ctrl  { bits |= 1 << 7;  }
    if self.select_tp_dig_analog { bits |= 1 << 9;  }
    if self.select_tp_ext_int    { bits |= 1 << 10; }
    if self.select_toa_clk       { bits |= 1 << 11; }
    bits
  }
}

impl fmt::Display for GeneralConfig {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<GeneralConfig: 0x{:03X}>", self.to_bits())
  }
}

/// Glue the sync header, the opcode and a bit packed payload
/// into the final byte sequence
fn finalize(opcode : CommandCode, payload : &BitField)
  -> Result<Vec<u8>, LengthError> {
  let field = BitField::from_value(opcode.to_u8() as u64, 8)?.cat(payload);
  let mut command = SYNC_HEADER.to_vec();
  command.extend(field.to_byte_list()?);
  Ok(command)
}

/// A command which is nothing but its opcode
fn bare(opcode : CommandCode) -> Vec<u8> {
  let mut command = SYNC_HEADER.to_vec();
  command.push(opcode.to_u8());
  command
}

/// Set one DAC to the given value
pub fn set_dac(name : &str, value : u16) -> Result<Vec<u8>, CommandError> {
  let dac = Dac::from_name(name)?;
  if value as u32 >= 1 << dac.width() {
    error!("Value {} does not fit the {} bit DAC {}!", value, dac.width(), name);
    return Err(CommandError::ValueOutOfRange);
  }
  let mut payload = BitField::new(16);
  payload.set(13, 5, value as u64)?;
  payload.set(4, 0, dac.code() as u64)?;
  Ok(finalize(CommandCode::SetDac, &payload)?)
}

/// Ask the chip to report the current value of one DAC
pub fn read_dac(name : &str) -> Result<Vec<u8>, CommandError> {
  let dac = Dac::from_name(name)?;
  let mut payload = BitField::new(8);
  payload.set(4, 0, dac.code() as u64)?;
  Ok(finalize(CommandCode::ReadDac, &payload)?)
}

/// Write the pixel configuration registers of the given
/// columns, one command per column
pub fn write_pcr(columns : &[usize], matrix : &PcrMatrix)
  -> Result<Vec<Vec<u8>>, CommandError> {
  let mut commands = Vec::<Vec<u8>>::with_capacity(columns.len());
  for column in columns {
    let column_field = BitField::from_value(*column as u64, 8)
      .map_err(|_| CommandError::BadLength(LengthError::ColumnOutOfRange))?;
    let payload = column_field.cat(&matrix.column_bits(*column)?);
    commands.push(finalize(CommandCode::WritePcr, &payload)?);
  }
  Ok(commands)
}

/// Read the pixel configuration registers of the given
/// columns back, one command per column
pub fn read_pixel_config_reg(columns : &[usize])
  -> Result<Vec<Vec<u8>>, CommandError> {
  let mut commands = Vec::<Vec<u8>>::with_capacity(columns.len());
  for column in columns {
    let payload = BitField::from_value(*column as u64, 8)
      .map_err(|_| CommandError::BadLength(LengthError::ColumnOutOfRange))?;
    commands.push(finalize(CommandCode::ReadPcr, &payload)?);
  }
  Ok(commands)
}

/// Enable the column test pulse registers for the given
/// columns, all others get disabled
pub fn write_ctpr(columns : &[usize]) -> Result<Vec<u8>, CommandError> {
  let mut payload = BitField::new(256);
  for column in columns {
    if *column > 255 {
      return Err(CommandError::BadLength(LengthError::ColumnOutOfRange));
    }
    // column 0 sits at the high end, shift register order
    payload.set_bit(255 - column, true)?;
  }
  Ok(finalize(CommandCode::WriteCtpr, &payload)?)
}

pub fn read_ctpr() -> Vec<u8> {
  bare(CommandCode::ReadCtpr)
}

pub fn write_general_config(config : &GeneralConfig)
  -> Result<Vec<u8>, CommandError> {
  let mut payload = BitField::new(16);
  payload.set(11, 0, config.to_bits() as u64)?;
  Ok(finalize(CommandCode::WriteGeneralConfig, &payload)?)
}

pub fn read_general_config() -> Vec<u8> {
  bare(CommandCode::ReadGeneralConfig)
}

/// Set the test pulse period and phase. The period is in
/// units of 25 ns clock cycles.
pub fn write_tp_period(period : u8, phase : u8)
  -> Result<Vec<u8>, CommandError> {
  if phase > 0xF {
    return Err(CommandError::ValueOutOfRange);
  }
  let mut payload = BitField::new(16);
  payload.set(15, 8, period as u64)?;
  payload.set(3, 0, phase as u64)?;
  Ok(finalize(CommandCode::SetTpPeriod, &payload)?)
}

/// Set the number of test pulses per shutter window
pub fn write_tp_pulsenumber(n : u16) -> Result<Vec<u8>, CommandError> {
  let payload = BitField::from_value(n as u64, 16)?;
  Ok(finalize(CommandCode::SetTpPulseNumber, &payload)?)
}

pub fn reset_sequential() -> Vec<u8> {
  bare(CommandCode::ResetSequential)
}

pub fn stop_matrix_readout() -> Vec<u8> {
  bare(CommandCode::StopMatrixReadout)
}

pub fn read_pixel_matrix_datadriven() -> Vec<u8> {
  bare(CommandCode::ReadMatrixDataDriven)
}

pub fn read_pixel_matrix_sequential() -> Vec<u8> {
  bare(CommandCode::ReadMatrixSequential)
}

pub fn reset_timer() -> Vec<u8> {
  bare(CommandCode::ResetTimer)
}

pub fn request_timer() -> Vec<u8> {
  bare(CommandCode::RequestTimer)
}

pub fn start_timer() -> Vec<u8> {
  bare(CommandCode::StartTimer)
}

#[cfg(test)]
mod test_commands {
  use crate::commands::*;
  use crate::constants::SYNC_HEADER;
  use crate::matrices::{PcrMatrix, PixelConfig};

  #[test]
  fn test_set_dac_layout() {
    let command = set_dac("Vthreshold_fine", 0x155).unwrap();
    assert_eq!(command.len(), 8);
    assert_eq!(&command[0..5], &SYNC_HEADER);
    assert_eq!(command[5], 0x02);
    // value in bits 13..5, code 6 in bits 4..0
    let payload = u16::from_be_bytes([command[6], command[7]]);
    assert_eq!(payload >> 5 & 0x1FF, 0x155);
    assert_eq!(payload & 0x1F, 6);
  }

  #[test]
  fn test_set_dac_range_checks() {
    assert_eq!(set_dac("Vthreshold_coarse", 16).err(),
               Some(CommandError::ValueOutOfRange));
    assert!(set_dac("Vthreshold_coarse", 15).is_ok());
    assert_eq!(set_dac("Ibias_Ikrum", 256).err(),
               Some(CommandError::ValueOutOfRange));
    assert_eq!(set_dac("No_Such_Dac", 0).err(),
               Some(CommandError::UnknownDac));
  }

  #[test]
  fn test_dac_table() {
    // codes 1..18, no duplicates
    let names = ["Ibias_Preamp_ON", "Ibias_Preamp_OFF", "VPreamp_NCAS",
                 "Ibias_Ikrum", "Vfbk", "Vthreshold_fine", "Vthreshold_coarse",
                 "Ibias_DiscS1_ON", "Ibias_DiscS1_OFF", "Ibias_DiscS2_ON",
                 "Ibias_DiscS2_OFF", "Ibias_PixelDAC", "Ibias_TPbufferIn",
                 "Ibias_TPbufferOut", "VTP_coarse", "VTP_fine",
                 "Ibias_CP_PLL", "PLL_Vcntrl"];
    let mut codes = Vec::<u8>::new();
    for name in names {
      codes.push(Dac::from_name(name).unwrap().code());
    }
    codes.sort();
    assert_eq!(codes, (1..=18).collect::<Vec<u8>>());
  }

  #[test]
  fn test_write_pcr_shape() {
    let mut matrix = PcrMatrix::new();
    matrix.set(7, 0, PixelConfig { test_pulse : false, threshold : 0xF, mask : false }).unwrap();
    let commands = write_pcr(&[7], &matrix).unwrap();
    assert_eq!(commands.len(), 1);
    // 5 sync + 1 opcode + 1 column + 192 pcr bytes
    assert_eq!(commands[0].len(), 199);
    assert_eq!(commands[0][5], 0x80);
    assert_eq!(commands[0][6], 7);
    // row 0 of the column is the first pcr byte, trim 0xF
    // sits in bits 4..1 of the 6 bit register
    assert_eq!(commands[0][7] >> 2, 0xF << 1 & 0x3F);
  }

  #[test]
  fn test_write_ctpr_layout() {
    let command = write_ctpr(&[0, 255]).unwrap();
    assert_eq!(command.len(), 38);
    assert_eq!(command[5], 0xC0);
    // column 0 at the msb of the first payload byte
    assert_eq!(command[6], 0x80);
    // column 255 at the lsb of the last byte
    assert_eq!(command[37], 0x01);
    assert!(write_ctpr(&[256]).is_err());
  }

  #[test]
  fn test_general_config_bits() {
    let mut config = GeneralConfig::default();
    config.polarity      = true;
    config.op_mode       = OperationMode::EventAndItot;
    config.test_pulse_en = true;
    assert_eq!(config.to_bits(), 0b100101);
    let command = write_general_config(&config).unwrap();
    assert_eq!(command[5], 0x30);
    assert_eq!(u16::from_be_bytes([command[6], command[7]]), 0b100101);
  }

  #[test]
  fn test_tp_registers() {
    let command = write_tp_period(100, 3).unwrap();
    assert_eq!(command[5], 0x0C);
    assert_eq!(command[6], 100);
    assert_eq!(command[7], 3);
    assert!(write_tp_period(100, 16).is_err());
    let command = write_tp_pulsenumber(1000).unwrap();
    assert_eq!(u16::from_be_bytes([command[6], command[7]]), 1000);
  }

  #[test]
  fn test_bare_commands() {
    for (command, opcode) in [(reset_sequential(),              0xE0u8),
                              (stop_matrix_readout(),           0xF0),
                              (read_pixel_matrix_datadriven(),  0xB0),
                              (read_pixel_matrix_sequential(),  0xA0),
                              (reset_timer(),                   0x40),
                              (request_timer(),                 0x41),
                              (start_timer(),                   0x4A)] {
      assert_eq!(command.len(), 6);
      assert_eq!(&command[0..5], &SYNC_HEADER);
      assert_eq!(command[5], opcode);
    }
  }
}
