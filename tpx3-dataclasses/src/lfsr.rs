//! Counter decode tables
//!
//! The pixel counters on the chip are not binary counters but
//! linear feedback shift registers, the ToA field is Gray
//! coded. Raw counter states have to be translated back to
//! plain counts before any of them can be histogrammed.
//!
//! The lookup tables are built once on first use and shared
//! for the lifetime of the process.

use std::sync::OnceLock;

static LFSR10_TABLE : OnceLock<Vec<u16>> = OnceLock::new();
static LFSR4_TABLE  : OnceLock<Vec<u8>>  = OnceLock::new();

/// Counter value for a raw LFSR state that the register can
/// never take on. The all-zero state locks the shift register
/// up, so it is never produced by a healthy chip. Seeing this
/// value in decoded data flags a corrupted packet.
pub const LFSR10_INVALID : u16 = 1023;
/// Same for the 4 bit hit counter
pub const LFSR4_INVALID  : u8  = 15;

fn build_lfsr10() -> Vec<u16> {
  let mut table = vec![LFSR10_INVALID; 1024];
  // x^10 + x^7 + 1, seeded with all ones, maximum length
  let mut state = 0x3FFu16;
  for count in 0..1023u16 {
    table[state as usize] = count;
    let feedback = ((state >> 9) ^ (state >> 6)) & 1;
    state = ((state << 1) | feedback) & 0x3FF;
  }
  table
}

fn build_lfsr4() -> Vec<u8> {
  let mut table = vec![LFSR4_INVALID; 16];
  // x^4 + x^3 + 1
  let mut state = 0xFu8;
  for count in 0..15u8 {
    table[state as usize] = count;
    let feedback = ((state >> 3) ^ (state >> 2)) & 1;
    state = ((state << 1) | feedback) & 0xF;
  }
  table
}

/// Decode the 10 bit ToT/event counter. Input beyond 10 bit
/// gets masked.
pub fn lfsr10_decode(value : u16) -> u16 {
  let table = LFSR10_TABLE.get_or_init(build_lfsr10);
  table[(value & 0x3FF) as usize]
}

/// Decode the 4 bit hit counter
pub fn lfsr4_decode(value : u8) -> u8 {
  let table = LFSR4_TABLE.get_or_init(build_lfsr4);
  table[(value & 0xF) as usize]
}

/// Decode a Gray coded counter, used for the 14 bit ToA
pub fn gray_decode(value : u16) -> u16 {
  let mut value = value;
  let mut mask  = value >> 1;
  while mask != 0 {
    value ^= mask;
    mask >>= 1;
  }
  value
}
