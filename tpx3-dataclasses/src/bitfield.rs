//! Arbitrary width bit vectors
//!
//! The command builders assemble chip commands bit by bit,
//! the register map of the chip is full of fields which are
//! neither byte nor word aligned. `BitField` keeps the
//! bookkeeping in one place.
//!
//! Bit 0 is the least significant bit. Slices are inclusive
//! `[hi:lo]`, so `set(5, 2, v)` writes a 4 bit value.

use std::fmt;

use crate::errors::LengthError;

/// A fixed width sequence of bits
///
/// The width is set at construction and never changes,
/// except through concatenation which yields a new field.
#[derive(Debug, Clone, PartialEq)]
pub struct BitField {
  /// bits\[0\] is the LSB
  bits : Vec<bool>,
}

impl BitField {

  /// A new field of the given width, all bits zero
  pub fn new(width : usize) -> Self {
    Self {
      bits : vec![false; width],
    }
  }

  /// A new field of the given width, initialized from value
  pub fn from_value(value : u64, width : usize) -> Result<Self, LengthError> {
    let mut field = Self::new(width);
    if width == 0 {
      return Err(LengthError::SliceOutOfBounds);
    }
    field.set(width - 1, 0, value)?;
    Ok(field)
  }

  pub fn len(&self) -> usize {
    self.bits.len()
  }

  pub fn is_empty(&self) -> bool {
    self.bits.is_empty()
  }

  /// Write `value` into the inclusive bit slice `[hi:lo]`
  pub fn set(&mut self, hi : usize, lo : usize, value : u64)
    -> Result<(), LengthError> {
    if lo > hi || hi >= self.bits.len() {
      return Err(LengthError::SliceOutOfBounds);
    }
    let width = hi - lo + 1;
    if width > 64 {
      return Err(LengthError::ValueTooWide);
    }
    if width < 64 && value >> width != 0 {
      return Err(LengthError::ValueTooWide);
    }
    for k in 0..width {
      self.bits[lo + k] = (value >> k) & 1 == 1;
    }
    Ok(())
  }

  /// Read the inclusive bit slice `[hi:lo]` as an unsigned value
  pub fn get(&self, hi : usize, lo : usize) -> Result<u64, LengthError> {
    if lo > hi || hi >= self.bits.len() {
      return Err(LengthError::SliceOutOfBounds);
    }
    let width = hi - lo + 1;
    if width > 64 {
      return Err(LengthError::ValueTooWide);
    }
    let mut value = 0u64;
    for k in 0..width {
      if self.bits[lo + k] {
        value |= 1 << k;
      }
    }
    Ok(value)
  }

  /// Set a single bit
  pub fn set_bit(&mut self, pos : usize, value : bool)
    -> Result<(), LengthError> {
    if pos >= self.bits.len() {
      return Err(LengthError::SliceOutOfBounds);
    }
    self.bits[pos] = value;
    Ok(())
  }

  /// The whole field as a single value, for fields up to 64 bit
  pub fn to_value(&self) -> Result<u64, LengthError> {
    if self.bits.is_empty() {
      return Err(LengthError::SliceOutOfBounds);
    }
    self.get(self.bits.len() - 1, 0)
  }

  /// Concatenate, with `self` ending up at the high end
  /// of the combined field
  pub fn cat(&self, other : &BitField) -> BitField {
    let mut bits = other.bits.clone();
    bits.extend_from_slice(&self.bits);
    BitField {
      bits,
    }
  }

  /// Split the field into bytes, most significant byte first
  ///
  /// The width has to be a multiple of 8. There is no padding,
  /// commands which do not end up byte aligned are a bug in
  /// the builder and not something to paper over here.
  pub fn to_byte_list(&self) -> Result<Vec<u8>, LengthError> {
    if self.bits.len() % 8 != 0 {
      return Err(LengthError::NotByteAligned);
    }
    let nbytes = self.bits.len() / 8;
    let mut bytes = Vec::<u8>::with_capacity(nbytes);
    for n in 0..nbytes {
      // byte 0 holds the most significant bits
      let hi = self.bits.len() - 1 - n * 8;
      let byte = self.get(hi, hi - 7)? as u8;
      bytes.push(byte);
    }
    Ok(bytes)
  }
}

impl fmt::Display for BitField {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let mut repr = String::from("<BitField: width ");
    repr += &self.bits.len().to_string();
    if self.bits.len() <= 64 {
      if let Ok(value) = self.to_value() {
        repr += &format!(", value 0x{:X}", value);
      }
    }
    repr += ">";
    write!(f, "{}", repr)
  }
}

#[cfg(test)]
mod test_bitfield {
  use crate::bitfield::BitField;
  use crate::errors::LengthError;

  #[test]
  fn test_set_get_roundtrip() {
    let mut field = BitField::new(48);
    field.set(47, 44, 0xB).unwrap();
    field.set(27, 14, 0x1234).unwrap();
    field.set(3, 0, 0x5).unwrap();
    assert_eq!(field.get(47, 44).unwrap(), 0xB);
    assert_eq!(field.get(27, 14).unwrap(), 0x1234);
    assert_eq!(field.get(3, 0).unwrap(), 0x5);
    // untouched bits stay zero
    assert_eq!(field.get(43, 28).unwrap(), 0);
  }

  #[test]
  fn test_bounds_checks() {
    let mut field = BitField::new(16);
    assert_eq!(field.set(16, 0, 0), Err(LengthError::SliceOutOfBounds));
    assert_eq!(field.set(3, 4, 0),  Err(LengthError::SliceOutOfBounds));
    assert_eq!(field.set(3, 0, 16), Err(LengthError::ValueTooWide));
    assert!(field.set(3, 0, 15).is_ok());
    assert_eq!(field.get(16, 0).err(), Some(LengthError::SliceOutOfBounds));
  }

  #[test]
  fn test_from_value() {
    let field = BitField::from_value(0xAB, 8).unwrap();
    assert_eq!(field.to_value().unwrap(), 0xAB);
    assert!(BitField::from_value(0x100, 8).is_err());
  }

  #[test]
  fn test_cat_high_end() {
    let hi = BitField::from_value(0xAA, 8).unwrap();
    let lo = BitField::from_value(0x55, 8).unwrap();
    let combined = hi.cat(&lo);
    assert_eq!(combined.len(), 16);
    assert_eq!(combined.to_value().unwrap(), 0xAA55);
  }

  #[test]
  fn test_to_byte_list_msb_first() {
    let field = BitField::from_value(0x0102_0304, 32).unwrap();
    assert_eq!(field.to_byte_list().unwrap(), vec![1, 2, 3, 4]);
    let odd = BitField::new(12);
    assert_eq!(odd.to_byte_list(), Err(LengthError::NotByteAligned));
  }
}
