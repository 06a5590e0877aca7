//! The FPGA register file
//!
//! The scan engine only ever talks to the hardware through
//! this interface. Named registers control the readout
//! firmware (links, shutter, FIFO), chip commands go out as
//! raw byte sequences, chip data comes back as a batch of
//! 32 bit FIFO words.
//!
//! The production implementation lives with the transport
//! layer and is accessed under mutual exclusion by its owner.
//! The tests drive the engine against a software chip model
//! implementing the same trait.

use std::fmt;
use std::error::Error;

// ========== readout control registers ==========

/// Write 1 to open the shutter, 0 to close it
pub const SHUTTER          : &str = "CONTROL.SHUTTER";
/// Write 1 to reset the data FIFO
pub const FIFO_RESET       : &str = "FIFO.RESET";
/// Number of 32 bit words waiting in the data FIFO
pub const FIFO_OCCUPANCY   : &str = "FIFO.OCCUPANCY";
/// Bit mask of enabled chip links
pub const LINK_ENABLE      : &str = "LINKS.ENABLE";
/// Per link bit mask, set to sample on the inverted clock
pub const LINK_INVERT      : &str = "LINKS.INVERT";
/// Sampling delay of the enabled links, in taps
pub const LINK_DELAY       : &str = "LINKS.DELAY";
/// Write 1 to issue a soft reset to the chip
pub const CHIP_RESET       : &str = "CONTROL.CHIP_RESET";

/// Problems talking to the register file
#[derive(Debug, Clone, PartialEq)]
pub enum RegisterError {
  UnknownRegister,
  ReadFailed,
  WriteFailed,
  CommandFailed,
}

impl fmt::Display for RegisterError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr : &str;
    match self {
      RegisterError::UnknownRegister => {repr = "UnknownRegister";},
      RegisterError::ReadFailed      => {repr = "ReadFailed";},
      RegisterError::WriteFailed     => {repr = "WriteFailed";},
      RegisterError::CommandFailed   => {repr = "CommandFailed";},
    }
    write!(f, "<RegisterError: {}>", repr)
  }
}

impl Error for RegisterError {
}

/// Access to the readout firmware
pub trait RegisterFile {

  /// Read a named register
  fn read(&mut self, name : &str) -> Result<u32, RegisterError>;

  /// Write a named register
  fn write(&mut self, name : &str, value : u32) -> Result<(), RegisterError>;

  /// Push a chip command byte sequence out on the command
  /// link
  fn send_command(&mut self, command : &[u8]) -> Result<(), RegisterError>;

  /// Drain the data FIFO
  fn get_data(&mut self) -> Result<Vec<u32>, RegisterError>;
}
