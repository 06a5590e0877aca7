//! Serialization/Deserialization helpers
//!
//! All multi byte values are little endian. Structs which go
//! to disk implement the `Serialization` trait and are framed
//! by u16 HEAD/TAIL markers, so a reader can resync on a
//! partially written or corrupted file.

// re-exports
pub use crate::errors::SerializationError;

use std::path::Path;
use std::io::Write;

/// Convert a vector of u32 into a vector of u8
///
/// The resulting vector has four times the number of entries
/// of the original vector. Useful when serializing the raw
/// link words.
pub fn u32_to_u8(vec_u32 : &[u32]) -> Vec<u8> {
  vec_u32.iter()
      .flat_map(|&n| n.to_le_bytes().to_vec())
      .collect()
}

/// Restore a vector of u32 from a vector of u8
///
/// This interpretes four following u8 as an u32.
pub fn u8_to_u32(vec_u8 : &[u8]) -> Vec<u32> {
  vec_u8.chunks_exact(4)
      .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
      .collect()
}

pub fn parse_u8(bs : &Vec::<u8>, pos : &mut usize) -> u8 {
  let value = u8::from_le_bytes([bs[*pos]]);
  *pos += 1;
  value
}

/// Get u16 from a bytestream and move on the position marker
///
/// # Arguments
///
/// * bs
/// * pos
pub fn parse_u16(bs : &Vec::<u8>, pos : &mut usize) -> u16 {
  let value = u16::from_le_bytes([bs[*pos], bs[*pos+1]]);
  *pos += 2;
  value
}

pub fn parse_u32(bs : &Vec::<u8>, pos : &mut usize) -> u32 {
  let value = u32::from_le_bytes([bs[*pos], bs[*pos+1], bs[*pos+2], bs[*pos+3]]);
  *pos += 4;
  value
}

pub fn parse_u64(bs : &Vec::<u8>, pos : &mut usize) -> u64 {
  let value = u64::from_le_bytes([bs[*pos],   bs[*pos+1], bs[*pos+2], bs[*pos+3],
                                  bs[*pos+4], bs[*pos+5], bs[*pos+6], bs[*pos+7]]);
  *pos += 8;
  value
}

pub fn parse_f32(bs : &Vec::<u8>, pos : &mut usize) -> f32 {
  let value = f32::from_le_bytes([bs[*pos],   bs[*pos+1],
                                  bs[*pos+2], bs[*pos+3]]);
  *pos += 4;
  value
}

pub fn parse_f64(bs : &Vec::<u8>, pos : &mut usize) -> f64 {
  let value = f64::from_le_bytes([bs[*pos],   bs[*pos+1],
                                  bs[*pos+2], bs[*pos+3],
                                  bs[*pos+4], bs[*pos+5],
                                  bs[*pos+6], bs[*pos+7]]);
  *pos += 8;
  value
}

pub fn parse_bool(bs : &Vec::<u8>, pos : &mut usize) -> bool {
  let value = u8::from_le_bytes([bs[*pos]]);
  *pos += 1;
  value > 0
}

/// Encode/decode structs to Vec::<u8> to write to a file or
/// send over the network
///
pub trait Serialization {

  const HEAD : u16;
  const TAIL : u16;
  /// The SIZE is the size of the serialized
  /// bytestream INCLUDING 4 bytes for head
  /// and tail bytes. In case the struct does
  /// NOT HAVE a fixed size, SIZE will be 0
  /// (so default value of the trait)
  const SIZE : usize = 0;

  /// Decode a serializable from a bytestream
  fn from_bytestream(bytestream : &Vec<u8>,
                     pos        : &mut usize)
    -> Result<Self, SerializationError>
    where Self : Sized;

  /// Encode a serializable to a bytestream
  fn to_bytestream(&self) -> Vec<u8>;
}

/// Search for a certain number of type `u16` in a bytestream
pub fn search_for_u16(number : u16, bytestream : &Vec<u8>, start_pos : usize)
  -> Result<usize, SerializationError> {
  if bytestream.len() < 2 {
    error!("Stream empty!");
    return Err(SerializationError::StreamTooShort);
  }
  if start_pos > bytestream.len() - 2 {
    error!("Start position {} beyond stream capacity {}!", start_pos, bytestream.len() - 2);
    return Err(SerializationError::StreamTooShort);
  }
  let mut two_bytes : [u8;2];
  for n in start_pos..bytestream.len() - 1 {
    two_bytes = [bytestream[n], bytestream[n + 1]];
    if u16::from_le_bytes(two_bytes) == number {
      trace!("Found {} at {}", number, n);
      return Ok(n);
    }
  }
  let delta = bytestream.len() - start_pos;
  warn!("Can not find {} in bytestream [-{}:{}]!", number, delta, bytestream.len());
  Err(SerializationError::ValueNotFound)
}

/// Write a bytestream to disk, atomically
///
/// Writes to `<filename>.tmp` first and renames only after a
/// successful flush, so a crash mid-write never leaves a
/// truncated file under the final name.
pub fn write_bytes_atomic(filename : &Path, bytes : &[u8])
  -> Result<(), std::io::Error> {
  let mut tmp_name = filename.as_os_str().to_os_string();
  tmp_name.push(".tmp");
  let tmp_path = Path::new(&tmp_name);
  {
    let mut file = std::fs::File::create(tmp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
  }
  std::fs::rename(tmp_path, filename)?;
  Ok(())
}

#[cfg(test)]
mod test_serialization {
  use crate::serialization::*;

  #[test]
  fn test_u32_u8_conversion() {
    let data = vec![0xDEADBEEFu32, 0x0, 0xCAFE];
    let bytes = u32_to_u8(&data);
    assert_eq!(bytes.len(), 12);
    let back = u8_to_u32(&bytes);
    assert_eq!(data, back);
  }

  #[test]
  fn test_search_for_u16() {
    let mut stream = vec![0u8; 10];
    stream.extend_from_slice(&0xF0F0u16.to_le_bytes());
    stream.extend_from_slice(&[1, 2, 3]);
    let pos = search_for_u16(0xF0F0, &stream, 0).unwrap();
    assert_eq!(pos, 10);
    assert!(search_for_u16(0xBEEF, &stream, 0).is_err());
  }

  #[test]
  fn test_parse_helpers() {
    let mut stream = Vec::<u8>::new();
    stream.push(42u8);
    stream.extend_from_slice(&1000u16.to_le_bytes());
    stream.extend_from_slice(&123456u32.to_le_bytes());
    stream.extend_from_slice(&(1u64 << 47).to_le_bytes());
    stream.extend_from_slice(&3.5f32.to_le_bytes());
    let mut pos = 0usize;
    assert_eq!(parse_u8(&stream,  &mut pos), 42);
    assert_eq!(parse_u16(&stream, &mut pos), 1000);
    assert_eq!(parse_u32(&stream, &mut pos), 123456);
    assert_eq!(parse_u64(&stream, &mut pos), 1u64 << 47);
    assert_eq!(parse_f32(&stream, &mut pos), 3.5);
    assert_eq!(pos, stream.len());
  }
}
