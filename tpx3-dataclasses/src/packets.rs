//! Decoding of the 48 bit chip response words
//!
//! Everything the chip sends back, pixel hits, command
//! acknowledgements and register readbacks, arrives as 48 bit
//! words after frame assembly. Dispatch is on the top nibble
//! for hits and on the top byte for everything else.

use std::fmt;

use crate::lfsr::{gray_decode,
                  lfsr10_decode,
                  lfsr4_decode};
use crate::errors::PacketError;
use crate::commands::CommandCode;

/// Header nibble of a data driven pixel hit
pub const HIT_DATA_DRIVEN : u8 = 0xB;
/// Header nibble of a sequential readout pixel hit
pub const HIT_SEQUENTIAL  : u8 = 0xA;

/// A single decoded pixel hit
///
/// In data driven mode `toa` holds the Gray decoded 14 bit
/// time of arrival and `tot` the time over threshold. In
/// sequential (event counting) mode `toa` holds the raw
/// integral ToT and `tot` the decoded event counter.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PixelHit {
  pub x           : u8,
  pub y           : u8,
  pub toa         : u16,
  pub tot         : u16,
  pub hit_count   : u8,
  pub data_driven : bool,
}

impl fmt::Display for PixelHit {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<PixelHit: ({},{}), toa {}, tot {}, hits {}>",
           self.x, self.y, self.toa, self.tot, self.hit_count)
  }
}

/// One decoded 48 bit chip word
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ChipPacket {
  Hit(PixelHit),
  /// Acknowledgement, the opcode of the answered command in
  /// the low byte and the responding chip id above it
  EndOfCommand(u8, u32),
  /// DAC readback, dac code and value
  DacReadback(u8, u16),
  /// The 12 general config register bits
  GeneralConfigReadback(u16),
  /// Pixel configuration streamed back, raw payload
  PcrReadback(u64),
  /// Column test pulse register readback, raw payload
  CtprReadback(u64),
  /// Acknowledgement of the readout stop
  StopMatrixReadout,
  /// Acknowledgement of the sequential reset
  ResetSequential,
  /// Response from a chip that was not addressed, carries
  /// the chip id
  OtherChip(u32),
}

impl fmt::Display for ChipPacket {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr : String;
    match self {
      ChipPacket::Hit(hit)
        => {repr = format!("Hit {}", hit);},
      ChipPacket::EndOfCommand(cmd, chip_id)
        => {repr = format!("EndOfCommand 0x{:02X} from chip 0x{:X}", cmd, chip_id);},
      ChipPacket::DacReadback(code, value)
        => {repr = format!("DacReadback code {} value {}", code, value);},
      ChipPacket::GeneralConfigReadback(bits)
        => {repr = format!("GeneralConfigReadback 0x{:03X}", bits);},
      ChipPacket::PcrReadback(payload)
        => {repr = format!("PcrReadback 0x{:010X}", payload);},
      ChipPacket::CtprReadback(payload)
        => {repr = format!("CtprReadback 0x{:010X}", payload);},
      ChipPacket::StopMatrixReadout
        => {repr = String::from("StopMatrixReadout");},
      ChipPacket::ResetSequential
        => {repr = String::from("ResetSequential");},
      ChipPacket::OtherChip(chip_id)
        => {repr = format!("OtherChip 0x{:08X}", chip_id);},
    }
    write!(f, "<ChipPacket: {}>", repr)
  }
}

/// Pull the pixel coordinates out of the end-of-column,
/// super pixel and pixel fields
fn pixel_address(frame : u64) -> (u8, u8) {
  let eoc         = (frame >> 37 & 0x7F) as u8;
  let super_pixel = (frame >> 31 & 0x3F) as u8;
  let pixel       = (frame >> 28 & 0x7)  as u8;
  let right       = (pixel > 3) as u8;
  let x = eoc * 2 + right;
  let y = super_pixel * 4 + (pixel - 4 * right);
  (x, y)
}

fn decode_hit(frame : u64, data_driven : bool) -> PixelHit {
  let (x, y)    = pixel_address(frame);
  let raw_toa   = (frame >> 14 & 0x3FFF) as u16;
  let raw_tot   = (frame >> 4  & 0x3FF)  as u16;
  let hit_count = lfsr4_decode((frame & 0xF) as u8);
  let (toa, tot) : (u16, u16);
  if data_driven {
    toa = gray_decode(raw_toa);
    tot = lfsr10_decode(raw_tot);
  } else {
    // event counting mode, the 14 bit field is a plain
    // integral ToT, the 10 bit field the event counter
    toa = raw_toa;
    tot = lfsr10_decode(raw_tot);
  }
  PixelHit {
    x,
    y,
    toa,
    tot,
    hit_count,
    data_driven,
  }
}

/// Decode a 48 bit chip word
///
/// With `expected_header`, a word whose top byte differs from
/// the expectation is rejected even if it would decode fine
/// otherwise. Hit words match on their top nibble.
pub fn decode(frame : u64, expected_header : Option<u8>)
  -> Result<ChipPacket, PacketError> {
  let header = (frame >> 40 & 0xFF) as u8;
  if let Some(expected) = expected_header {
    let matches = if expected >> 4 == HIT_DATA_DRIVEN
                  || expected >> 4 == HIT_SEQUENTIAL {
      header >> 4 == expected >> 4
    } else {
      header == expected
    };
    if !matches {
      debug!("Header 0x{:02X} does not match expected 0x{:02X}", header, expected);
      return Err(PacketError::UnexpectedHeader);
    }
  }
  match header >> 4 {
    HIT_DATA_DRIVEN => {
      return Ok(ChipPacket::Hit(decode_hit(frame, true)));
    }
    HIT_SEQUENTIAL  => {
      return Ok(ChipPacket::Hit(decode_hit(frame, false)));
    }
    _ => (),
  }
  if header == CommandCode::EndOfCommand.to_u8() {
    let echo    = (frame & 0xFF) as u8;
    let chip_id = (frame >> 8 & 0xFFFF_FFFF) as u32;
    return Ok(ChipPacket::EndOfCommand(echo, chip_id));
  }
  if header == CommandCode::ReadDac.to_u8() {
    let code  = (frame >> 35 & 0x1F) as u8;
    let value = (frame >> 26 & 0x1FF) as u16;
    return Ok(ChipPacket::DacReadback(code, value));
  }
  if header == CommandCode::ReadGeneralConfig.to_u8() {
    return Ok(ChipPacket::GeneralConfigReadback((frame & 0xFFF) as u16));
  }
  if header == CommandCode::ReadPcr.to_u8() {
    return Ok(ChipPacket::PcrReadback(frame & 0xFF_FFFF_FFFF));
  }
  if header == CommandCode::ReadCtpr.to_u8() {
    return Ok(ChipPacket::CtprReadback(frame & 0xFF_FFFF_FFFF));
  }
  if header == CommandCode::StopMatrixReadout.to_u8() {
    return Ok(ChipPacket::StopMatrixReadout);
  }
  if header == CommandCode::ResetSequential.to_u8() {
    return Ok(ChipPacket::ResetSequential);
  }
  if header == CommandCode::OtherChip.to_u8() || header == 0x00 {
    return Ok(ChipPacket::OtherChip((frame & 0xFFFF_FFFF) as u32));
  }
  debug!("No packet tag matches header 0x{:02X}", header);
  Err(PacketError::MalformedPacket)
}

#[cfg(test)]
mod test_packets {
  use crate::packets::*;
  use crate::errors::PacketError;
  use crate::lfsr::{lfsr10_decode, lfsr4_decode};

  /// Assemble a data driven hit word from its raw fields
  fn hit_frame(header : u8, eoc : u64, super_pixel : u64, pixel : u64,
               toa : u64, tot : u64, hits : u64) -> u64 {
    (header as u64) << 44 | eoc << 37 | super_pixel << 31 | pixel << 28
      | toa << 14 | tot << 4 | hits
  }

  #[test]
  fn test_pixel_address_scheme() {
    // pixel 0..3 is the left column of the double column,
    // 4..7 the right one
    let frame = hit_frame(0xB, 10, 5, 2, 0, 0x3FF, 0xF);
    match decode(frame, None).unwrap() {
      ChipPacket::Hit(hit) => {
        assert_eq!(hit.x, 20);
        assert_eq!(hit.y, 22);
        assert!(hit.data_driven);
      }
      other => panic!("expected a hit, got {}", other),
    }
    let frame = hit_frame(0xB, 10, 5, 6, 0, 0x3FF, 0xF);
    match decode(frame, None).unwrap() {
      ChipPacket::Hit(hit) => {
        assert_eq!(hit.x, 21);
        assert_eq!(hit.y, 22);
      }
      other => panic!("expected a hit, got {}", other),
    }
  }

  #[test]
  fn test_hit_counter_decode() {
    // gray code of 100 is 100 ^ 50
    let gray_toa = 100u64 ^ 50;
    let frame = hit_frame(0xB, 0, 0, 0, gray_toa, 0x3FF, 0xF);
    match decode(frame, None).unwrap() {
      ChipPacket::Hit(hit) => {
        assert_eq!(hit.toa, 100);
        assert_eq!(hit.tot, lfsr10_decode(0x3FF));
        assert_eq!(hit.tot, 0);
        assert_eq!(hit.hit_count, lfsr4_decode(0xF));
      }
      other => panic!("expected a hit, got {}", other),
    }
  }

  #[test]
  fn test_sequential_hit_keeps_raw_itot() {
    let frame = hit_frame(0xA, 0, 0, 0, 1234, 0x3FF, 0xF);
    match decode(frame, None).unwrap() {
      ChipPacket::Hit(hit) => {
        assert_eq!(hit.toa, 1234);
        assert!(!hit.data_driven);
      }
      other => panic!("expected a hit, got {}", other),
    }
  }

  #[test]
  fn test_readback_packets() {
    let frame = 0x71u64 << 40 | 0xC0DE << 8 | 0x02;
    assert_eq!(decode(frame, None).unwrap(), ChipPacket::EndOfCommand(0x02, 0xC0DE));
    let frame = 0x03u64 << 40 | 6 << 35 | 300 << 26;
    assert_eq!(decode(frame, None).unwrap(), ChipPacket::DacReadback(6, 300));
    let frame = 0x31u64 << 40 | 0xA5;
    assert_eq!(decode(frame, None).unwrap(), ChipPacket::GeneralConfigReadback(0xA5));
    let frame = 0xF0u64 << 40;
    assert_eq!(decode(frame, None).unwrap(), ChipPacket::StopMatrixReadout);
    let frame = 0x72u64 << 40 | 0xDEADBEEF;
    assert_eq!(decode(frame, None).unwrap(), ChipPacket::OtherChip(0xDEADBEEF));
  }

  #[test]
  fn test_malformed_and_unexpected() {
    let frame = 0x55u64 << 40;
    assert_eq!(decode(frame, None).err(), Some(PacketError::MalformedPacket));
    let hit = hit_frame(0xB, 0, 0, 0, 0, 0x3FF, 0xF);
    assert_eq!(decode(hit, Some(0x71)).err(), Some(PacketError::UnexpectedHeader));
    // hit expectation matches on the nibble
    assert!(decode(hit, Some(0xB0)).is_ok());
  }
}
