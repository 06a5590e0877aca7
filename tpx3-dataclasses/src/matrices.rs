//! Pixel configuration and per pixel result matrices
//!
//! All matrices cover the full 256x256 pixel plane and are
//! stored flat, indexed `y*256 + x`. The configuration matrix
//! holds one 6 bit pixel configuration register per pixel,
//! the result maps hold one value per pixel from the
//! calibration fits.
//!
//! Everything here serializes with u16 HEAD/TAIL markers and
//! goes to disk through the atomic write helper, a crashed
//! process never leaves a half written tuning behind.

use std::fmt;
use std::path::Path;

use crate::constants::{NPIX_X,
                       NPIX_Y,
                       NPIXELS};
use crate::bitfield::BitField;
use crate::errors::LengthError;
use crate::serialization::{Serialization,
                           SerializationError,
                           search_for_u16,
                           parse_u8,
                           parse_f32,
                           write_bytes_atomic};

/// The configuration register of a single pixel
///
/// 6 bits per pixel. Bit 5 enables the test pulse, bits 4..1
/// hold the local threshold trim, bit 0 masks the pixel off.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct PixelConfig {
  pub test_pulse : bool,
  pub threshold  : u8,
  pub mask       : bool,
}

impl PixelConfig {

  pub fn to_bits(&self) -> u8 {
    let mut bits = (self.threshold & 0xF) << 1;
    if self.test_pulse {
      bits |= 1 << 5;
    }
    if self.mask {
      bits |= 1;
    }
    bits
  }

  pub fn from_bits(bits : u8) -> Self {
    Self {
      test_pulse : bits >> 5 & 1 == 1,
      threshold  : bits >> 1 & 0xF,
      mask       : bits & 1 == 1,
    }
  }
}

impl fmt::Display for PixelConfig {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<PixelConfig: tp {}, thr {}, mask {}>",
           self.test_pulse, self.threshold, self.mask)
  }
}

/// The pixel configuration registers of the whole matrix
#[derive(Debug, Clone, PartialEq)]
pub struct PcrMatrix {
  pixels : Vec<PixelConfig>,
}

impl PcrMatrix {

  pub fn new() -> Self {
    Self {
      pixels : vec![PixelConfig::default(); NPIXELS],
    }
  }

  /// A matrix with every pixel masked off
  pub fn all_masked() -> Self {
    let mut matrix = Self::new();
    for pixel in matrix.pixels.iter_mut() {
      pixel.mask = true;
    }
    matrix
  }

  pub fn get(&self, x : usize, y : usize) -> Result<PixelConfig, LengthError> {
    if x >= NPIX_X || y >= NPIX_Y {
      return Err(LengthError::SliceOutOfBounds);
    }
    Ok(self.pixels[y * NPIX_X + x])
  }

  pub fn set(&mut self, x : usize, y : usize, config : PixelConfig)
    -> Result<(), LengthError> {
    if x >= NPIX_X || y >= NPIX_Y {
      return Err(LengthError::SliceOutOfBounds);
    }
    self.pixels[y * NPIX_X + x] = config;
    Ok(())
  }

  /// Pack one column into the bit sequence the chip expects,
  /// row 0 at the high end
  pub fn column_bits(&self, column : usize) -> Result<BitField, LengthError> {
    if column >= NPIX_X {
      return Err(LengthError::ColumnOutOfRange);
    }
    let mut field = BitField::new(NPIX_Y * 6);
    for row in 0..NPIX_Y {
      let bits = self.pixels[row * NPIX_X + column].to_bits();
      let hi   = (NPIX_Y - row) * 6 - 1;
      field.set(hi, hi - 5, bits as u64)?;
    }
    Ok(field)
  }

  pub fn to_file(&self, filename : &Path) -> Result<(), std::io::Error> {
    write_bytes_atomic(filename, &self.to_bytestream())
  }

  pub fn from_file(filename : &Path) -> Result<Self, SerializationError> {
    let stream = std::fs::read(filename)
      .map_err(|_| SerializationError::StreamTooShort)?;
    let mut pos = 0usize;
    Self::from_bytestream(&stream, &mut pos)
  }
}

impl Default for PcrMatrix {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for PcrMatrix {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let nmasked = self.pixels.iter().filter(|p| p.mask).count();
    let ntp     = self.pixels.iter().filter(|p| p.test_pulse).count();
    write!(f, "<PcrMatrix: {} masked, {} test pulse enabled>", nmasked, ntp)
  }
}

impl Serialization for PcrMatrix {
  const HEAD : u16   = 0xAAAA;
  const TAIL : u16   = 0x5555;
  const SIZE : usize = NPIXELS + 4;

  fn from_bytestream(bytestream : &Vec<u8>, pos : &mut usize)
    -> Result<Self, SerializationError> {
    let head_pos = search_for_u16(Self::HEAD, bytestream, *pos)?;
    *pos = head_pos + 2;
    if bytestream.len() < *pos + NPIXELS + 2 {
      return Err(SerializationError::StreamTooShort);
    }
    let mut matrix = Self::new();
    for n in 0..NPIXELS {
      matrix.pixels[n] = PixelConfig::from_bits(parse_u8(bytestream, pos));
    }
    let tail = u16::from_le_bytes([bytestream[*pos], bytestream[*pos + 1]]);
    *pos += 2;
    if tail != Self::TAIL {
      return Err(SerializationError::TailInvalid);
    }
    Ok(matrix)
  }

  fn to_bytestream(&self) -> Vec<u8> {
    let mut stream = Vec::<u8>::with_capacity(Self::SIZE);
    stream.extend_from_slice(&Self::HEAD.to_le_bytes());
    for pixel in &self.pixels {
      stream.push(pixel.to_bits());
    }
    stream.extend_from_slice(&Self::TAIL.to_le_bytes());
    stream
  }
}

/// One boolean per pixel, pixels to keep out of acquisition
///
/// Persisted on its own so a hand curated mask can be swapped
/// in without touching the trim values.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskMatrix {
  pub masked : Vec<bool>,
}

impl MaskMatrix {

  pub fn new() -> Self {
    Self {
      masked : vec![false; NPIXELS],
    }
  }

  pub fn n_masked(&self) -> usize {
    self.masked.iter().filter(|m| **m).count()
  }

  pub fn to_file(&self, filename : &Path) -> Result<(), std::io::Error> {
    write_bytes_atomic(filename, &self.to_bytestream())
  }

  pub fn from_file(filename : &Path) -> Result<Self, SerializationError> {
    let stream = std::fs::read(filename)
      .map_err(|_| SerializationError::StreamTooShort)?;
    let mut pos = 0usize;
    Self::from_bytestream(&stream, &mut pos)
  }
}

impl Default for MaskMatrix {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for MaskMatrix {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<MaskMatrix: {} masked pixels>", self.n_masked())
  }
}

impl Serialization for MaskMatrix {
  const HEAD : u16   = 0xDDDD;
  const TAIL : u16   = 0x2222;
  const SIZE : usize = NPIXELS + 4;

  fn from_bytestream(bytestream : &Vec<u8>, pos : &mut usize)
    -> Result<Self, SerializationError> {
    let head_pos = search_for_u16(Self::HEAD, bytestream, *pos)?;
    *pos = head_pos + 2;
    if bytestream.len() < *pos + NPIXELS + 2 {
      return Err(SerializationError::StreamTooShort);
    }
    let mut matrix = Self::new();
    for n in 0..NPIXELS {
      matrix.masked[n] = parse_u8(bytestream, pos) > 0;
    }
    let tail = u16::from_le_bytes([bytestream[*pos], bytestream[*pos + 1]]);
    *pos += 2;
    if tail != Self::TAIL {
      return Err(SerializationError::TailInvalid);
    }
    Ok(matrix)
  }

  fn to_bytestream(&self) -> Vec<u8> {
    let mut stream = Vec::<u8>::with_capacity(Self::SIZE);
    stream.extend_from_slice(&Self::HEAD.to_le_bytes());
    for masked in &self.masked {
      stream.push(*masked as u8);
    }
    stream.extend_from_slice(&Self::TAIL.to_le_bytes());
    stream
  }
}

/// The per pixel threshold trim from an equalisation run
///
/// Pixels where the equalisation did not converge carry trim
/// 0 and are flagged, the scan engine masks flagged pixels.
/// The trim values and the flags go to disk as two separate
/// files, the flag side as a plain `MaskMatrix`, so either can
/// be replaced on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct EqualisationMatrix {
  pub trim    : Vec<u8>,
  pub flagged : Vec<bool>,
}

impl EqualisationMatrix {

  pub fn new() -> Self {
    Self {
      trim    : vec![0u8; NPIXELS],
      flagged : vec![false; NPIXELS],
    }
  }

  pub fn n_flagged(&self) -> usize {
    self.flagged.iter().filter(|f| **f).count()
  }

  /// The flag side as a standalone mask matrix
  pub fn mask_matrix(&self) -> MaskMatrix {
    MaskMatrix {
      masked : self.flagged.clone(),
    }
  }

  /// Replace the flags with an externally curated mask
  pub fn apply_mask(&mut self, mask : &MaskMatrix) {
    self.flagged = mask.masked.clone();
  }

  /// Write the trim file, the mask goes through
  /// `mask_matrix().to_file(...)`
  pub fn to_file(&self, filename : &Path) -> Result<(), std::io::Error> {
    write_bytes_atomic(filename, &self.to_bytestream())
  }

  /// Read a trim file, all flags clear until a mask is applied
  pub fn from_file(filename : &Path) -> Result<Self, SerializationError> {
    let stream = std::fs::read(filename)
      .map_err(|_| SerializationError::StreamTooShort)?;
    let mut pos = 0usize;
    Self::from_bytestream(&stream, &mut pos)
  }
}

impl Default for EqualisationMatrix {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for EqualisationMatrix {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<EqualisationMatrix: {} flagged pixels>", self.n_flagged())
  }
}

impl Serialization for EqualisationMatrix {
  const HEAD : u16   = 0xBBBB;
  const TAIL : u16   = 0x4444;
  const SIZE : usize = NPIXELS + 4;

  fn from_bytestream(bytestream : &Vec<u8>, pos : &mut usize)
    -> Result<Self, SerializationError> {
    let head_pos = search_for_u16(Self::HEAD, bytestream, *pos)?;
    *pos = head_pos + 2;
    if bytestream.len() < *pos + NPIXELS + 2 {
      return Err(SerializationError::StreamTooShort);
    }
    let mut matrix = Self::new();
    for n in 0..NPIXELS {
      matrix.trim[n] = parse_u8(bytestream, pos) & 0xF;
    }
    let tail = u16::from_le_bytes([bytestream[*pos], bytestream[*pos + 1]]);
    *pos += 2;
    if tail != Self::TAIL {
      return Err(SerializationError::TailInvalid);
    }
    Ok(matrix)
  }

  fn to_bytestream(&self) -> Vec<u8> {
    let mut stream = Vec::<u8>::with_capacity(Self::SIZE);
    stream.extend_from_slice(&Self::HEAD.to_le_bytes());
    for trim in &self.trim {
      stream.push(trim & 0xF);
    }
    stream.extend_from_slice(&Self::TAIL.to_le_bytes());
    stream
  }
}

/// One f32 per pixel, used for the fitted threshold, noise
/// and chi2 maps
#[derive(Debug, Clone, PartialEq)]
pub struct PixelMap {
  pub values : Vec<f32>,
}

impl PixelMap {

  pub fn new() -> Self {
    Self {
      values : vec![0.0f32; NPIXELS],
    }
  }

  pub fn get(&self, x : usize, y : usize) -> Result<f32, LengthError> {
    if x >= NPIX_X || y >= NPIX_Y {
      return Err(LengthError::SliceOutOfBounds);
    }
    Ok(self.values[y * NPIX_X + x])
  }

  pub fn set(&mut self, x : usize, y : usize, value : f32)
    -> Result<(), LengthError> {
    if x >= NPIX_X || y >= NPIX_Y {
      return Err(LengthError::SliceOutOfBounds);
    }
    self.values[y * NPIX_X + x] = value;
    Ok(())
  }

  pub fn to_file(&self, filename : &Path) -> Result<(), std::io::Error> {
    write_bytes_atomic(filename, &self.to_bytestream())
  }

  pub fn from_file(filename : &Path) -> Result<Self, SerializationError> {
    let stream = std::fs::read(filename)
      .map_err(|_| SerializationError::StreamTooShort)?;
    let mut pos = 0usize;
    Self::from_bytestream(&stream, &mut pos)
  }
}

impl Default for PixelMap {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for PixelMap {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let mean = self.values.iter().sum::<f32>() / NPIXELS as f32;
    write!(f, "<PixelMap: mean {:.3}>", mean)
  }
}

impl Serialization for PixelMap {
  const HEAD : u16   = 0xCCCC;
  const TAIL : u16   = 0x3333;
  const SIZE : usize = NPIXELS * 4 + 4;

  fn from_bytestream(bytestream : &Vec<u8>, pos : &mut usize)
    -> Result<Self, SerializationError> {
    let head_pos = search_for_u16(Self::HEAD, bytestream, *pos)?;
    *pos = head_pos + 2;
    if bytestream.len() < *pos + NPIXELS * 4 + 2 {
      return Err(SerializationError::StreamTooShort);
    }
    let mut map = Self::new();
    for n in 0..NPIXELS {
      map.values[n] = parse_f32(bytestream, pos);
    }
    let tail = u16::from_le_bytes([bytestream[*pos], bytestream[*pos + 1]]);
    *pos += 2;
    if tail != Self::TAIL {
      return Err(SerializationError::TailInvalid);
    }
    Ok(map)
  }

  fn to_bytestream(&self) -> Vec<u8> {
    let mut stream = Vec::<u8>::with_capacity(Self::SIZE);
    stream.extend_from_slice(&Self::HEAD.to_le_bytes());
    for value in &self.values {
      stream.extend_from_slice(&value.to_le_bytes());
    }
    stream.extend_from_slice(&Self::TAIL.to_le_bytes());
    stream
  }
}

#[cfg(test)]
mod test_matrices {
  use crate::matrices::*;
  use crate::serialization::Serialization;

  #[test]
  fn test_pixel_config_bits() {
    let config = PixelConfig {
      test_pulse : true,
      threshold  : 0xA,
      mask       : true,
    };
    assert_eq!(config.to_bits(), 0b110101);
    assert_eq!(PixelConfig::from_bits(0b110101), config);
  }

  #[test]
  fn test_pcr_matrix_roundtrip() {
    let mut matrix = PcrMatrix::new();
    matrix.set(0, 0,     PixelConfig { test_pulse : true,  threshold : 7,  mask : false }).unwrap();
    matrix.set(255, 255, PixelConfig { test_pulse : false, threshold : 15, mask : true  }).unwrap();
    let stream = matrix.to_bytestream();
    assert_eq!(stream.len(), PcrMatrix::SIZE);
    let mut pos = 0usize;
    let back = PcrMatrix::from_bytestream(&stream, &mut pos).unwrap();
    assert_eq!(matrix, back);
    assert_eq!(pos, stream.len());
  }

  #[test]
  fn test_pcr_column_bits() {
    let mut matrix = PcrMatrix::new();
    let config = PixelConfig { test_pulse : true, threshold : 5, mask : false };
    matrix.set(3, 0, config).unwrap();
    let bits = matrix.column_bits(3).unwrap();
    assert_eq!(bits.len(), 1536);
    // row 0 lands at the high end
    assert_eq!(bits.get(1535, 1530).unwrap(), config.to_bits() as u64);
    assert_eq!(bits.get(1529, 0).unwrap(), 0);
    assert!(matrix.column_bits(256).is_err());
  }

  #[test]
  fn test_equalisation_matrix_roundtrip() {
    let mut matrix = EqualisationMatrix::new();
    matrix.trim[100]    = 12;
    matrix.flagged[100] = true;
    matrix.trim[65535]  = 3;
    // trim and mask travel separately
    let trim_stream = matrix.to_bytestream();
    let mask_stream = matrix.mask_matrix().to_bytestream();
    let mut pos = 0usize;
    let mut back = EqualisationMatrix::from_bytestream(&trim_stream, &mut pos).unwrap();
    assert_eq!(back.n_flagged(), 0);
    pos = 0;
    back.apply_mask(&MaskMatrix::from_bytestream(&mask_stream, &mut pos).unwrap());
    assert_eq!(matrix, back);
    assert_eq!(back.n_flagged(), 1);
  }

  #[test]
  fn test_mask_matrix_roundtrip() {
    let mut mask = MaskMatrix::new();
    mask.masked[0]     = true;
    mask.masked[65535] = true;
    let path = std::env::temp_dir().join("tpx3_test_mask_matrix.bin");
    mask.to_file(&path).unwrap();
    let back = MaskMatrix::from_file(&path).unwrap();
    assert_eq!(mask, back);
    assert_eq!(back.n_masked(), 2);
    std::fs::remove_file(&path).ok();
  }

  #[test]
  fn test_pixel_map_roundtrip() {
    let mut map = PixelMap::new();
    map.set(10, 20, 1234.5).unwrap();
    let stream = map.to_bytestream();
    let mut pos = 0usize;
    let back = PixelMap::from_bytestream(&stream, &mut pos).unwrap();
    assert_eq!(back.get(10, 20).unwrap(), 1234.5);
  }

  #[test]
  fn test_matrix_file_roundtrip() {
    let mut matrix = PcrMatrix::all_masked();
    matrix.set(42, 42, PixelConfig::default()).unwrap();
    let path = std::env::temp_dir().join("tpx3_test_pcr_matrix.bin");
    matrix.to_file(&path).unwrap();
    let back = PcrMatrix::from_file(&path).unwrap();
    assert_eq!(matrix, back);
    std::fs::remove_file(&path).ok();
  }
}
