//! Threshold codec and coarse jump planner
//!
//! The discriminator threshold of the chip is set through two
//! DACs, a 9 bit fine DAC with 0.5 mV steps and a 4 bit
//! coarse DAC with 80 mV steps. Scans work on a single linear
//! threshold axis, `threshold = fine + 160 * coarse`, which
//! runs from 0 to 2911.
//!
//! A threshold sweep which spans more than one coarse level
//! has to switch the coarse DAC mid-scan. Switching right at
//! the edge of the fine range is a bad idea, the fine DAC is
//! least linear near its rails. The jump planner places every
//! coarse switch so that both the exit and the entry fine
//! value sit well inside the usable fine range.

use std::fmt;

use crate::constants::{VTHRESHOLD_MAX,
                       FINE_MAX,
                       COARSE_MAX,
                       COARSE_STEP};
use crate::errors::ValidationError;

/// Combine a fine and a coarse DAC value into a linear
/// threshold
pub fn compose(fine : u16, coarse : u8) -> Result<u16, ValidationError> {
  if fine > FINE_MAX || coarse > COARSE_MAX {
    return Err(ValidationError::ThresholdOutOfRange);
  }
  Ok(fine + COARSE_STEP * coarse as u16)
}

/// Split a linear threshold into one canonical (fine, coarse)
/// pair
///
/// The split deliberately favors high fine values. Existing
/// tunings were taken with exactly this decomposition, so it
/// stays even though other pairs would reproduce the same
/// threshold.
pub fn decompose(threshold : u16) -> Result<(u16, u8), ValidationError> {
  if threshold > VTHRESHOLD_MAX {
    return Err(ValidationError::ThresholdOutOfRange);
  }
  if threshold <= FINE_MAX {
    return Ok((threshold, 0));
  }
  let rel    = (threshold - 512) % COARSE_STEP;
  let coarse = ((threshold - 512 - rel) / COARSE_STEP + 1) as u8;
  let fine   = rel + 352;
  Ok((fine, coarse))
}

/// All (coarse, fine) pairs which reproduce the given
/// threshold exactly
///
/// The lower coarse bound is slightly conservative, it skips
/// pairs whose fine value would sit in the upper part of the
/// fine range. Existing calibrations depend on this exact
/// enumeration.
pub fn possible_thresholds(threshold : u16)
  -> Result<(Vec<u8>, Vec<u16>), ValidationError> {
  if threshold > VTHRESHOLD_MAX {
    return Err(ValidationError::ThresholdOutOfRange);
  }
  let mv = threshold as f64 / 2.0;
  let lo = (((mv - 256.0) / 80.0).ceil() + 1.0).max(0.0) as u8;
  let hi = ((mv / 80.0).floor() as u8).min(COARSE_MAX);
  let mut coarses = Vec::<u8>::new();
  let mut fines   = Vec::<u16>::new();
  for coarse in lo..=hi {
    coarses.push(coarse);
    fines.push(threshold - COARSE_STEP * coarse as u16);
  }
  Ok((coarses, fines))
}

/// DAC pairs for the endpoints of a threshold sweep
///
/// The start gets the highest possible coarse, the stop the
/// lowest. That way the sweep crosses as few coarse levels as
/// possible. If the stop would end up at or below the start
/// coarse, it is pinned to the start coarse and the whole
/// sweep runs on a single coarse level.
pub fn range_thresholds(start : u16, stop : u16)
  -> Result<(u8, u16, u8, u16), ValidationError> {
  if stop <= start {
    return Err(ValidationError::InvalidScanRange);
  }
  // the enumeration comes back empty in the topmost coarse
  // band (above 2752), where the only valid pair is the
  // canonical decomposition
  let (start_coarses, start_fines) = possible_thresholds(start)?;
  let (start_fine, start_coarse) = match start_coarses.last().zip(start_fines.last()) {
    Some((coarse, fine)) => (*fine, *coarse),
    None                 => decompose(start)?,
  };
  let (stop_coarses, stop_fines) = possible_thresholds(stop)?;
  let (mut stop_fine, mut stop_coarse) = match stop_coarses.first().zip(stop_fines.first()) {
    Some((coarse, fine)) => (*fine, *coarse),
    None                 => decompose(stop)?,
  };
  if stop_coarse <= start_coarse {
    stop_coarse = start_coarse;
    stop_fine   = stop - COARSE_STEP * stop_coarse as u16;
  }
  Ok((start_coarse, start_fine, stop_coarse, stop_fine))
}

/// An ordered list of (coarse, fine) waypoints for a
/// threshold sweep
///
/// The waypoints come in pairs sharing a coarse value. Each
/// pair spans the fine values scanned at that coarse level,
/// consecutive pairs are joined by a coarse jump at the same
/// linear threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct CoarseJumpPlan {
  pub steps : Vec<(u8, u16)>,
}

impl CoarseJumpPlan {

  /// Plan a sweep from `start` to `stop` (both inclusive)
  pub fn new(start : u16, stop : u16) -> Result<Self, ValidationError> {
    let (start_coarse, start_fine, stop_coarse, stop_fine)
      = range_thresholds(start, stop)?;
    let mut steps = Vec::<(u8, u16)>::new();
    steps.push((start_coarse, start_fine));
    steps.extend(recursive_jumps(start_coarse, stop_coarse, start));
    steps.push((stop_coarse, stop_fine));
    Ok(Self {
      steps,
    })
  }

  /// The literal per step scan sequence
  ///
  /// Every waypoint pair turns into its full run of fine
  /// values. The shared threshold at a coarse jump is emitted
  /// only once, on the low coarse side, and the stop
  /// threshold is included.
  pub fn expand(&self) -> Vec<(u8, u16)> {
    let mut sequence = Vec::<(u8, u16)>::new();
    let nsegments = self.steps.len() / 2;
    for (n, segment) in self.steps.chunks_exact(2).enumerate() {
      let (coarse, fine_from) = segment[0];
      let (_,      fine_to)   = segment[1];
      let last = n == nsegments - 1;
      for fine in fine_from..fine_to {
        sequence.push((coarse, fine));
      }
      if last {
        sequence.push((coarse, fine_to));
      }
    }
    sequence
  }
}

impl fmt::Display for CoarseJumpPlan {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let mut repr = String::from("<CoarseJumpPlan:");
    for (coarse, fine) in &self.steps {
      repr += &format!(" ({},{})", coarse, fine);
    }
    repr += ">";
    write!(f, "{}", repr)
  }
}

/// Walk one coarse step at a time from `coarse` up to
/// `target`, yielding an exit/enter waypoint pair for every
/// jump. Empty when no jump is needed.
///
/// The jump threshold is placed so that the exit fine is 336
/// and the enter fine 176, both 80 fine steps away from the
/// 256 center of the fine range. If the sweep starts above
/// that point the jump moves up just past the start.
pub fn recursive_jumps(coarse : u8, target : u8, start : u16)
  -> Vec<(u8, u16)> {
  if coarse >= target {
    return Vec::new();
  }
  let threshold  = std::cmp::max(COARSE_STEP * coarse as u16 + 336, start + 1);
  let exit_fine  = threshold - COARSE_STEP * coarse as u16;
  let enter_fine = threshold - COARSE_STEP * (coarse + 1) as u16;
  let mut steps  = vec![(coarse, exit_fine), (coarse + 1, enter_fine)];
  steps.extend(recursive_jumps(coarse + 1, target, start));
  steps
}
