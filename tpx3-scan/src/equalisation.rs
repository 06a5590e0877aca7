//! Equalisation matrix construction
//!
//! Takes the S-curve fits of two extremal scans, one with
//! every pixel trim at 0 and one at 15, and picks the per
//! pixel trim which centers each pixel's response between the
//! two extremal distributions.
//!
//! Pixels without a converged fit in either scan cannot be
//! trimmed, they get trim 0 and are flagged, the scan engine
//! masks flagged pixels.

use tpx3_dataclasses::constants::NPIXELS;
use tpx3_dataclasses::matrices::EqualisationMatrix;

use crate::scurve::ScurveFits;

/// Cumulative threshold histogram over integer bins
/// `lo..=hi`, non converged pixels excluded
pub fn vth_hist(fits : &ScurveFits, lo : u16, hi : u16) -> Vec<u32> {
  if hi < lo {
    warn!("Empty threshold window {}..{}!", lo, hi);
    return Vec::new();
  }
  let n_bins = (hi - lo + 1) as usize;
  let mut counts = vec![0u32; n_bins];
  for idx in 0..NPIXELS {
    if fits.chi2.values[idx] == 0.0 {
      continue;
    }
    let threshold = fits.threshold.values[idx].round();
    if threshold < lo as f32 || threshold > hi as f32 {
      continue;
    }
    counts[(threshold as u16 - lo) as usize] += 1;
  }
  // cumulative
  for n in 1..n_bins {
    counts[n] += counts[n - 1];
  }
  counts
}

/// The median threshold of the converged pixels, from the
/// cumulative histogram
pub fn median_threshold(fits : &ScurveFits, lo : u16, hi : u16) -> f64 {
  let cumulative = vth_hist(fits, lo, hi);
  let total = *cumulative.last().unwrap_or(&0);
  if total == 0 {
    return 0.0;
  }
  let half = total / 2;
  for (bin, count) in cumulative.iter().enumerate() {
    if *count > half {
      return (lo as usize + bin) as f64;
    }
  }
  hi as f64
}

/// Build the trim matrix from the two extremal scans
///
/// `lo..hi` are the sweep bounds of the underlying threshold
/// scans, they bound the histograms used for the target.
pub fn build_equalisation(fits_trim0  : &ScurveFits,
                          fits_trim15 : &ScurveFits,
                          lo          : u16,
                          hi          : u16) -> EqualisationMatrix {
  let median0  = median_threshold(fits_trim0, lo, hi);
  let median15 = median_threshold(fits_trim15, lo, hi);
  let mut matrix = EqualisationMatrix::new();
  // no usable distribution on either side, nothing to center
  // on, so nothing can be trimmed
  if median0 <= 0.0 || median15 <= 0.0 {
    warn!("No converged thresholds in {}..{}, flagging the whole matrix", lo, hi);
    for flagged in matrix.flagged.iter_mut() {
      *flagged = true;
    }
    return matrix;
  }
  let target = (median0 + median15) / 2.0;
  info!("Equalising to target {} (medians {} / {})", target, median0, median15);
  let mut n_flagged = 0usize;
  for idx in 0..NPIXELS {
    if fits_trim0.chi2.values[idx] == 0.0
    || fits_trim15.chi2.values[idx] == 0.0 {
      matrix.flagged[idx] = true;
      n_flagged += 1;
      continue;
    }
    let thr0  = fits_trim0.threshold.values[idx] as f64;
    let thr15 = fits_trim15.threshold.values[idx] as f64;
    // response shift per trim step for this pixel
    let slope = (thr0 - thr15) / 15.0;
    if slope <= 0.0 {
      matrix.flagged[idx] = true;
      n_flagged += 1;
      continue;
    }
    let trim = ((thr0 - target) / slope).round();
    matrix.trim[idx] = trim.clamp(0.0, 15.0) as u8;
  }
  if n_flagged > 0 {
    warn!("{} pixels could not be equalised and are flagged", n_flagged);
  }
  matrix
}

#[cfg(test)]
mod test_equalisation {
  use crate::equalisation::*;
  use crate::scurve::ScurveFits;
  use tpx3_dataclasses::constants::NPIXELS;
  use tpx3_dataclasses::matrices::PixelMap;

  fn uniform_fits(threshold : f32) -> ScurveFits {
    let mut fits = ScurveFits {
      threshold : PixelMap::new(),
      noise     : PixelMap::new(),
      chi2      : PixelMap::new(),
    };
    for idx in 0..NPIXELS {
      fits.threshold.values[idx] = threshold;
      fits.chi2.values[idx]      = 0.5;
    }
    fits
  }

  #[test]
  fn test_median_threshold() {
    let fits = uniform_fits(1450.0);
    assert_eq!(median_threshold(&fits, 1400, 1500), 1450.0);
    // nothing converged, nothing to take a median over
    let mut fits = uniform_fits(1450.0);
    for idx in 0..NPIXELS {
      fits.chi2.values[idx] = 0.0;
    }
    assert_eq!(median_threshold(&fits, 1400, 1500), 0.0);
  }

  #[test]
  fn test_equalisation_centers_pixels() {
    // per trim step every pixel moves by 2 threshold units
    let mut fits0 = uniform_fits(1460.0);
    let fits15    = uniform_fits(1430.0);
    // one outlier pixel responding 10 units high
    fits0.threshold.values[100] = 1470.0;
    let matrix = build_equalisation(&fits0, &fits15, 1400, 1500);
    // median pixel gets centered between the extremes
    assert_eq!(matrix.trim[0], 8);
    // the outlier sits 25 units above target with a per trim
    // slope of (1470-1430)/15
    assert_eq!(matrix.trim[100], 9);
    assert_eq!(matrix.n_flagged(), 0);
  }

  #[test]
  fn test_non_converged_pixels_flagged() {
    let mut fits0 = uniform_fits(1460.0);
    let fits15    = uniform_fits(1430.0);
    fits0.chi2.values[42] = 0.0;
    let matrix = build_equalisation(&fits0, &fits15, 1400, 1500);
    assert!(matrix.flagged[42]);
    assert_eq!(matrix.trim[42], 0);
    assert_eq!(matrix.n_flagged(), 1);
  }

  #[test]
  fn test_inverted_window_flags_everything() {
    // sweep bounds straight from a foreign run file may be
    // inverted, no bin may be allocated for them
    let fits0  = uniform_fits(1460.0);
    let fits15 = uniform_fits(1430.0);
    assert!(vth_hist(&fits0, 1500, 1400).is_empty());
    assert_eq!(median_threshold(&fits0, 1500, 1400), 0.0);
    let matrix = build_equalisation(&fits0, &fits15, 1500, 1400);
    assert_eq!(matrix.n_flagged(), NPIXELS);
  }

  #[test]
  fn test_degenerate_slope_flagged() {
    // trim 15 response above trim 0 response is unphysical
    let fits0  = uniform_fits(1430.0);
    let fits15 = uniform_fits(1460.0);
    let matrix = build_equalisation(&fits0, &fits15, 1400, 1500);
    assert_eq!(matrix.n_flagged(), NPIXELS);
  }
}
