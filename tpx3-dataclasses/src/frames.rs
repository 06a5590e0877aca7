//! Assembly of 48 bit chip words from the FPGA link stream
//!
//! The FPGA forwards chip data as a flat sequence of 32 bit
//! words. Each word carries 24 payload bits in its high bytes
//! and the id of the producing chip link in the low byte. Two
//! consecutive payloads of the same link make one 48 bit chip
//! word, second word high.
//!
//! Links map to logical chips through an externally supplied
//! table. A word from a link missing in that table is
//! discarded, a trailing unpaired word at the end of a link
//! stream as well. Both are counted, neither is an error.

use std::collections::HashMap;
use std::fmt;

/// The link id sits in the low byte of every FPGA word
pub fn link_id(word : u32) -> u8 {
  (word & 0xFF) as u8
}

/// The assembled 48 bit words of all chips plus the loss
/// bookkeeping of one assembly pass
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSet {
  /// One frame sequence per logical chip
  pub frames         : Vec<Vec<u64>>,
  /// Unpaired trailing words, at most one per link
  pub n_dropped      : u64,
  /// Words from links absent from the link table
  pub n_unknown_link : u64,
}

impl fmt::Display for FrameSet {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let nframes : usize = self.frames.iter().map(|f| f.len()).sum();
    write!(f, "<FrameSet: {} chips, {} frames, {} dropped, {} unknown link>",
           self.frames.len(), nframes, self.n_dropped, self.n_unknown_link)
  }
}

/// Groups raw FPGA words by link and pairs them into 48 bit
/// chip words
#[derive(Debug, Clone)]
pub struct FrameAssembler {
  /// link id to logical chip index
  chip_links : HashMap<u8, usize>,
  n_chips    : usize,
}

impl FrameAssembler {

  pub fn new(chip_links : HashMap<u8, usize>) -> Self {
    let n_chips = chip_links.values().max().map_or(0, |idx| idx + 1);
    Self {
      chip_links,
      n_chips,
    }
  }

  /// The standard single chip setup, 8 links all feeding
  /// chip 0
  pub fn single_chip() -> Self {
    let mut chip_links = HashMap::<u8, usize>::new();
    for link in 0..8u8 {
      chip_links.insert(link, 0);
    }
    Self::new(chip_links)
  }

  pub fn n_chips(&self) -> usize {
    self.n_chips
  }

  /// Pair up a flat word sequence into per chip frames
  pub fn assemble(&self, words : &[u32]) -> FrameSet {
    let mut per_link = HashMap::<u8, Vec<u32>>::new();
    let mut n_unknown_link = 0u64;
    for word in words {
      let link = link_id(*word);
      if !self.chip_links.contains_key(&link) {
        n_unknown_link += 1;
        continue;
      }
      per_link.entry(link).or_default().push(*word);
    }
    let mut frames = vec![Vec::<u64>::new(); self.n_chips];
    let mut n_dropped = 0u64;
    // deterministic output order regardless of hash order
    let mut links : Vec<u8> = per_link.keys().copied().collect();
    links.sort();
    for link in links {
      let link_words = &per_link[&link];
      let chip = self.chip_links[&link];
      for pair in link_words.chunks_exact(2) {
        // second word high, the low byte of each word is the
        // link id and gets stripped
        let frame = ((pair[1] & 0xFFFF_FF00) as u64) << 16
                  | (pair[0] as u64) >> 8;
        frames[chip].push(frame);
      }
      if link_words.len() % 2 == 1 {
        trace!("Dropping unpaired word on link {}", link);
        n_dropped += 1;
      }
    }
    FrameSet {
      frames,
      n_dropped,
      n_unknown_link,
    }
  }
}
