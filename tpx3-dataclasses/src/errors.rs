//! Error types for the protocol and codec layer
//!
//! All errors are plain enums. Per convention, the scan layer
//! treats `PacketError` as recoverable (count and continue),
//! everything else aborts the current call.

use std::fmt;
use std::error::Error;

/// Problems with serialized representations of the dataclasses
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum SerializationError {
  TailInvalid,
  HeadInvalid,
  StreamTooShort,
  ValueNotFound,
  WrongByteSize,
  TomlDecodingError,
}

impl fmt::Display for SerializationError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr : &str;
    match self {
      SerializationError::TailInvalid       => {repr = "TailInvalid";},
      SerializationError::HeadInvalid       => {repr = "HeadInvalid";},
      SerializationError::StreamTooShort    => {repr = "StreamTooShort";},
      SerializationError::ValueNotFound     => {repr = "ValueNotFound";},
      SerializationError::WrongByteSize     => {repr = "WrongByteSize";},
      SerializationError::TomlDecodingError => {repr = "TomlDecodingError";},
    }
    write!(f, "<SerializationError: {}>", repr)
  }
}

impl Error for SerializationError {
}

/// Bit level bookkeeping went wrong - slices out of bounds,
/// values too wide for their slice or byte serialization of
/// a non byte-aligned field
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum LengthError {
  SliceOutOfBounds,
  ValueTooWide,
  NotByteAligned,
  ColumnOutOfRange,
}

impl fmt::Display for LengthError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr : &str;
    match self {
      LengthError::SliceOutOfBounds => {repr = "SliceOutOfBounds";},
      LengthError::ValueTooWide     => {repr = "ValueTooWide";},
      LengthError::NotByteAligned   => {repr = "NotByteAligned";},
      LengthError::ColumnOutOfRange => {repr = "ColumnOutOfRange";},
    }
    write!(f, "<LengthError: {}>", repr)
  }
}

impl Error for LengthError {
}

/// Command builders reject bad input before anything is
/// sent to the chip
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum CommandError {
  /// No DAC with the given name in the DAC table
  UnknownDac,
  /// DAC/register value does not fit its bit width
  ValueOutOfRange,
  /// Bit packing failed
  BadLength(LengthError),
}

impl fmt::Display for CommandError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr : String;
    match self {
      CommandError::UnknownDac      => {repr = String::from("UnknownDac");},
      CommandError::ValueOutOfRange => {repr = String::from("ValueOutOfRange");},
      CommandError::BadLength(err)  => {repr = format!("BadLength({})", err);},
    }
    write!(f, "<CommandError: {}>", repr)
  }
}

impl Error for CommandError {
}

impl From<LengthError> for CommandError {
  fn from(err : LengthError) -> Self {
    CommandError::BadLength(err)
  }
}

/// Decoding of a single 48bit chip word failed. One bad
/// packet must never abort a run, these are counted.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum PacketError {
  /// The header byte matches no known packet tag
  MalformedPacket,
  /// The header does not match what the caller expected
  UnexpectedHeader,
}

impl fmt::Display for PacketError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr : &str;
    match self {
      PacketError::MalformedPacket  => {repr = "MalformedPacket";},
      PacketError::UnexpectedHeader => {repr = "UnexpectedHeader";},
    }
    write!(f, "<PacketError: {}>", repr)
  }
}

impl Error for PacketError {
}

/// Scan/codec parameters outside their documented range.
/// Always raised before any hardware is touched.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ValidationError {
  ThresholdOutOfRange,
  InvalidScanRange,
  InvalidMaskStep,
  NoInjections,
}

impl fmt::Display for ValidationError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr : &str;
    match self {
      ValidationError::ThresholdOutOfRange => {repr = "ThresholdOutOfRange";},
      ValidationError::InvalidScanRange    => {repr = "InvalidScanRange";},
      ValidationError::InvalidMaskStep     => {repr = "InvalidMaskStep";},
      ValidationError::NoInjections        => {repr = "NoInjections";},
    }
    write!(f, "<ValidationError: {}>", repr)
  }
}

impl Error for ValidationError {
}
