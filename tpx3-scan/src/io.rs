//! Run file input/output
//!
//! A run file holds everything needed to analyze a scan
//! offline: the complete settings block, one metadata row per
//! scan step and the raw 32 bit link words exactly as they
//! came out of the FIFO. The step rows delimit each step's
//! slice of the raw stream, decoding happens entirely at
//! analysis time.
//!
//! A cancelled scan writes the same layout with fewer steps,
//! partial runs stay analyzable.

use std::fmt;
use std::path::Path;

use tpx3_dataclasses::packets::PixelHit;
use tpx3_dataclasses::serialization::{Serialization,
                                      SerializationError,
                                      search_for_u16,
                                      parse_u8,
                                      parse_u16,
                                      parse_u32,
                                      parse_u64,
                                      u32_to_u8,
                                      write_bytes_atomic};

use crate::settings::ScanSettings;

/// Metadata of one scan step
///
/// `index_start..index_stop` is the step's slice of the raw
/// word stream.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ScanStep {
  pub scan_param_id : u32,
  pub coarse        : u8,
  pub fine          : u16,
  pub mask_index    : u16,
  pub index_start   : u64,
  pub index_stop    : u64,
}

impl ScanStep {
  pub fn new() -> Self {
    Self {
      scan_param_id : 0,
      coarse        : 0,
      fine          : 0,
      mask_index    : 0,
      index_start   : 0,
      index_stop    : 0,
    }
  }
}

impl Default for ScanStep {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for ScanStep {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<ScanStep: id {}, coarse {}, fine {}, mask {}, words {}..{}>",
           self.scan_param_id, self.coarse, self.fine, self.mask_index,
           self.index_start, self.index_stop)
  }
}

impl Serialization for ScanStep {
  const HEAD : u16   = 0xEAEA;
  const TAIL : u16   = 0x1515;
  const SIZE : usize = 29;

  fn from_bytestream(bytestream : &Vec<u8>, pos : &mut usize)
    -> Result<Self, SerializationError> {
    let head_pos = search_for_u16(Self::HEAD, bytestream, *pos)?;
    *pos = head_pos + 2;
    if bytestream.len() < *pos + Self::SIZE - 2 {
      return Err(SerializationError::StreamTooShort);
    }
    let mut step = Self::new();
    step.scan_param_id = parse_u32(bytestream, pos);
    step.coarse        = parse_u8(bytestream, pos);
    step.fine          = parse_u16(bytestream, pos);
    step.mask_index    = parse_u16(bytestream, pos);
    step.index_start   = parse_u64(bytestream, pos);
    step.index_stop    = parse_u64(bytestream, pos);
    let tail = parse_u16(bytestream, pos);
    if tail != Self::TAIL {
      return Err(SerializationError::TailInvalid);
    }
    Ok(step)
  }

  fn to_bytestream(&self) -> Vec<u8> {
    let mut stream = Vec::<u8>::with_capacity(Self::SIZE);
    stream.extend_from_slice(&Self::HEAD.to_le_bytes());
    stream.extend_from_slice(&self.scan_param_id.to_le_bytes());
    stream.push(self.coarse);
    stream.extend_from_slice(&self.fine.to_le_bytes());
    stream.extend_from_slice(&self.mask_index.to_le_bytes());
    stream.extend_from_slice(&self.index_start.to_le_bytes());
    stream.extend_from_slice(&self.index_stop.to_le_bytes());
    stream.extend_from_slice(&Self::TAIL.to_le_bytes());
    stream
  }
}

/// One decoded hit joined to its scan step, the interpreted
/// side of a run
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct HitRecord {
  pub x             : u8,
  pub y             : u8,
  pub toa           : u16,
  pub tot           : u16,
  pub hit_count     : u8,
  pub scan_param_id : u32,
}

impl HitRecord {

  pub fn from_hit(hit : &PixelHit, scan_param_id : u32) -> Self {
    Self {
      x             : hit.x,
      y             : hit.y,
      toa           : hit.toa,
      tot           : hit.tot,
      hit_count     : hit.hit_count,
      scan_param_id,
    }
  }
}

impl fmt::Display for HitRecord {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<HitRecord: ({},{}), toa {}, tot {}, id {}>",
           self.x, self.y, self.toa, self.tot, self.scan_param_id)
  }
}

impl Serialization for HitRecord {
  const HEAD : u16   = 0xFAFA;
  const TAIL : u16   = 0x0505;
  const SIZE : usize = 15;

  fn from_bytestream(bytestream : &Vec<u8>, pos : &mut usize)
    -> Result<Self, SerializationError> {
    let head_pos = search_for_u16(Self::HEAD, bytestream, *pos)?;
    *pos = head_pos + 2;
    if bytestream.len() < *pos + Self::SIZE - 2 {
      return Err(SerializationError::StreamTooShort);
    }
    let x             = parse_u8(bytestream, pos);
    let y             = parse_u8(bytestream, pos);
    let toa           = parse_u16(bytestream, pos);
    let tot           = parse_u16(bytestream, pos);
    let hit_count     = parse_u8(bytestream, pos);
    let scan_param_id = parse_u32(bytestream, pos);
    let tail = parse_u16(bytestream, pos);
    if tail != Self::TAIL {
      return Err(SerializationError::TailInvalid);
    }
    Ok(Self {
      x,
      y,
      toa,
      tot,
      hit_count,
      scan_param_id,
    })
  }

  fn to_bytestream(&self) -> Vec<u8> {
    let mut stream = Vec::<u8>::with_capacity(Self::SIZE);
    stream.extend_from_slice(&Self::HEAD.to_le_bytes());
    stream.push(self.x);
    stream.push(self.y);
    stream.extend_from_slice(&self.toa.to_le_bytes());
    stream.extend_from_slice(&self.tot.to_le_bytes());
    stream.push(self.hit_count);
    stream.extend_from_slice(&self.scan_param_id.to_le_bytes());
    stream.extend_from_slice(&Self::TAIL.to_le_bytes());
    stream
  }
}

/// Write a flat hit record table, atomically
pub fn write_hit_records(filename : &Path, records : &[HitRecord])
  -> Result<(), std::io::Error> {
  let mut stream = Vec::<u8>::with_capacity(records.len() * HitRecord::SIZE);
  for record in records {
    stream.extend(record.to_bytestream());
  }
  write_bytes_atomic(filename, &stream)
}

/// Read a hit record table back
pub fn read_hit_records(filename : &Path)
  -> Result<Vec<HitRecord>, SerializationError> {
  let stream = std::fs::read(filename)
    .map_err(|_| SerializationError::StreamTooShort)?;
  let mut records = Vec::<HitRecord>::new();
  let mut pos = 0usize;
  while pos + HitRecord::SIZE <= stream.len() {
    records.push(HitRecord::from_bytestream(&stream, &mut pos)?);
  }
  Ok(records)
}

/// A complete (or cleanly cancelled) run
#[derive(Debug, Clone, PartialEq)]
pub struct RunData {
  pub run_id          : u32,
  /// Unix seconds at scan start
  pub timestamp       : u64,
  pub settings        : ScanSettings,
  pub steps           : Vec<ScanStep>,
  pub raw_words       : Vec<u32>,
  /// Unpaired link words dropped during assembly test reads
  pub n_dropped       : u64,
  /// Words from links outside the link table
  pub n_unknown_link  : u64,
  /// 48 bit words which failed to decode during monitoring
  pub n_decode_errors : u64,
}

impl RunData {

  pub fn new(settings : ScanSettings) -> Self {
    Self {
      run_id          : 0,
      timestamp       : 0,
      settings,
      steps           : Vec::new(),
      raw_words       : Vec::new(),
      n_dropped       : 0,
      n_unknown_link  : 0,
      n_decode_errors : 0,
    }
  }

  /// The raw word slice belonging to one scan step
  pub fn step_words(&self, step : &ScanStep) -> &[u32] {
    &self.raw_words[step.index_start as usize..step.index_stop as usize]
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

impl fmt::Display for RunData {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<RunData: run {}, {} steps, {} words, {} decode errors>",
           self.run_id, self.steps.len(), self.raw_words.len(),
           self.n_decode_errors)
  }
}

impl Serialization for RunData {
  const HEAD : u16 = 0xDADA;
  const TAIL : u16 = 0x0D0D;

  fn from_bytestream(bytestream : &Vec<u8>, pos : &mut usize)
    -> Result<Self, SerializationError> {
    let head_pos = search_for_u16(Self::HEAD, bytestream, *pos)?;
    *pos = head_pos + 2;
    if bytestream.len() < *pos + 44 {
      return Err(SerializationError::StreamTooShort);
    }
    let run_id          = parse_u32(bytestream, pos);
    let timestamp       = parse_u64(bytestream, pos);
    let n_dropped       = parse_u64(bytestream, pos);
    let n_unknown_link  = parse_u64(bytestream, pos);
    let n_decode_errors = parse_u64(bytestream, pos);
    let settings_len    = parse_u32(bytestream, pos) as usize;
    if bytestream.len() < *pos + settings_len {
      return Err(SerializationError::StreamTooShort);
    }
    let toml_string = String::from_utf8(bytestream[*pos..*pos + settings_len].to_vec())
      .map_err(|_| SerializationError::TomlDecodingError)?;
    *pos += settings_len;
    let settings : ScanSettings = toml::from_str(&toml_string)
      .map_err(|_| SerializationError::TomlDecodingError)?;
    if bytestream.len() < *pos + 4 {
      return Err(SerializationError::StreamTooShort);
    }
    let n_steps = parse_u32(bytestream, pos) as usize;
    let mut steps = Vec::<ScanStep>::with_capacity(n_steps);
    for _ in 0..n_steps {
      steps.push(ScanStep::from_bytestream(bytestream, pos)?);
    }
    if bytestream.len() < *pos + 8 {
      return Err(SerializationError::StreamTooShort);
    }
    let n_words = parse_u64(bytestream, pos) as usize;
    // the step rows index into the word stream, a row
    // pointing outside it can not come from our writer
    for step in &steps {
      if step.index_start > step.index_stop
      || step.index_stop > n_words as u64 {
        error!("{} indexes beyond the {} word stream!", step, n_words);
        return Err(SerializationError::WrongByteSize);
      }
    }
    if bytestream.len() < *pos + n_words * 4 + 2 {
      return Err(SerializationError::StreamTooShort);
    }
    let mut raw_words = Vec::<u32>::with_capacity(n_words);
    for _ in 0..n_words {
      raw_words.push(parse_u32(bytestream, pos));
    }
    let tail = parse_u16(bytestream, pos);
    if tail != Self::TAIL {
      return Err(SerializationError::TailInvalid);
    }
    Ok(Self {
      run_id,
      timestamp,
      settings,
      steps,
      raw_words,
      n_dropped,
      n_unknown_link,
      n_decode_errors,
    })
  }

  fn to_bytestream(&self) -> Vec<u8> {
    let toml_string = toml::to_string(&self.settings).unwrap_or_default();
    let mut stream = Vec::<u8>::with_capacity(
      48 + toml_string.len() + self.steps.len() * ScanStep::SIZE
         + self.raw_words.len() * 4);
    stream.extend_from_slice(&Self::HEAD.to_le_bytes());
    stream.extend_from_slice(&self.run_id.to_le_bytes());
    stream.extend_from_slice(&self.timestamp.to_le_bytes());
    stream.extend_from_slice(&self.n_dropped.to_le_bytes());
    stream.extend_from_slice(&self.n_unknown_link.to_le_bytes());
    stream.extend_from_slice(&self.n_decode_errors.to_le_bytes());
    stream.extend_from_slice(&(toml_string.len() as u32).to_le_bytes());
    stream.extend_from_slice(toml_string.as_bytes());
    stream.extend_from_slice(&(self.steps.len() as u32).to_le_bytes());
    for step in &self.steps {
      stream.extend(step.to_bytestream());
    }
    stream.extend_from_slice(&(self.raw_words.len() as u64).to_le_bytes());
    stream.extend(u32_to_u8(&self.raw_words));
    stream.extend_from_slice(&Self::TAIL.to_le_bytes());
    stream
  }
}

#[cfg(test)]
mod test_io {
  use crate::io::*;
  use crate::settings::ScanSettings;
  use tpx3_dataclasses::serialization::Serialization;

  fn sample_run() -> RunData {
    let mut run = RunData::new(ScanSettings::new());
    run.run_id    = 7;
    run.timestamp = 1_700_000_000;
    run.raw_words = vec![0xAABBCC00, 0xDDEEFF00, 0x11223300, 0x44556600];
    run.steps.push(ScanStep {
      scan_param_id : 0,
      coarse        : 6,
      fine          : 440,
      mask_index    : 0,
      index_start   : 0,
      index_stop    : 2,
    });
    run.steps.push(ScanStep {
      scan_param_id : 1,
      coarse        : 6,
      fine          : 440,
      mask_index    : 1,
      index_start   : 2,
      index_stop    : 4,
    });
    run.n_decode_errors = 3;
    run
  }

  #[test]
  fn test_scan_step_roundtrip() {
    let step = ScanStep {
      scan_param_id : 42,
      coarse        : 3,
      fine          : 200,
      mask_index    : 5,
      index_start   : 100,
      index_stop    : 250,
    };
    let stream = step.to_bytestream();
    assert_eq!(stream.len(), ScanStep::SIZE);
    let mut pos = 0usize;
    assert_eq!(ScanStep::from_bytestream(&stream, &mut pos).unwrap(), step);
  }

  #[test]
  fn test_run_roundtrip() {
    let run = sample_run();
    let stream = run.to_bytestream();
    let mut pos = 0usize;
    let back = RunData::from_bytestream(&stream, &mut pos).unwrap();
    assert_eq!(run, back);
    assert_eq!(pos, stream.len());
  }

  #[test]
  fn test_step_words_slicing() {
    let run = sample_run();
    assert_eq!(run.step_words(&run.steps[0]), &run.raw_words[0..2]);
    assert_eq!(run.step_words(&run.steps[1]), &run.raw_words[2..4]);
  }

  #[test]
  fn test_run_file_roundtrip() {
    let run  = sample_run();
    let path = std::env::temp_dir().join("tpx3_test_run.bin");
    run.to_file(&path).unwrap();
    let back = RunData::from_file(&path).unwrap();
    assert_eq!(run, back);
    std::fs::remove_file(&path).ok();
  }

  #[test]
  fn test_hit_record_table_roundtrip() {
    let records = vec![
      HitRecord { x : 10, y : 20, toa : 5000, tot : 42, hit_count : 1, scan_param_id : 7 },
      HitRecord { x : 255, y : 0, toa : 0, tot : 1022, hit_count : 14, scan_param_id : 8 },
    ];
    let path = std::env::temp_dir().join("tpx3_test_hit_records.bin");
    write_hit_records(&path, &records).unwrap();
    let back = read_hit_records(&path).unwrap();
    assert_eq!(records, back);
    std::fs::remove_file(&path).ok();
  }

  #[test]
  fn test_truncated_run_rejected() {
    let run = sample_run();
    let stream = run.to_bytestream();
    let truncated = stream[0..stream.len() - 10].to_vec();
    let mut pos = 0usize;
    assert!(RunData::from_bytestream(&truncated, &mut pos).is_err());
  }

  #[test]
  fn test_out_of_range_step_indices_rejected() {
    use tpx3_dataclasses::serialization::SerializationError;
    // a step claiming words beyond the raw stream
    let mut run = sample_run();
    run.steps[1].index_stop = 10;
    let stream = run.to_bytestream();
    let mut pos = 0usize;
    assert_eq!(RunData::from_bytestream(&stream, &mut pos).err(),
               Some(SerializationError::WrongByteSize));
    // a step with inverted indices
    let mut run = sample_run();
    run.steps[0].index_start = 3;
    run.steps[0].index_stop  = 1;
    let stream = run.to_bytestream();
    let mut pos = 0usize;
    assert_eq!(RunData::from_bytestream(&stream, &mut pos).err(),
               Some(SerializationError::WrongByteSize));
  }
}
