//! S-curve aggregation and per pixel fits
//!
//! A threshold scan yields, per pixel, the number of observed
//! hits at each scanned threshold. Against an injected test
//! pulse that count follows an error function, its midpoint
//! is the effective local threshold and its width the noise.
//!
//! The 65536 pixel fits are independent of each other and run
//! on the rayon worker pool.

use ndarray::Array3;
use rayon::prelude::*;
use statrs::function::erf::erf;

use argmin::prelude::*;
use argmin::solver::neldermead::NelderMead;

use tpx3_dataclasses::constants::{NPIX_X,
                                  NPIX_Y};
use tpx3_dataclasses::frames::FrameAssembler;
use tpx3_dataclasses::packets::{decode,
                                ChipPacket};
use tpx3_dataclasses::matrices::PixelMap;
use tpx3_dataclasses::threshold::compose;

use crate::io::{RunData,
                ScanStep};

/// Joins scan_param_ids back to threshold bins
///
/// Consecutive ids taken at the same (coarse, fine) pair are
/// the mask steps of one threshold and share a bin.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanParamTable {
  /// bin index per scan_param_id
  pub bin_of     : Vec<usize>,
  /// the scanned thresholds, one per bin, ascending
  pub thresholds : Vec<f64>,
}

impl ScanParamTable {

  pub fn from_steps(steps : &[ScanStep]) -> Self {
    let mut bin_of     = Vec::<usize>::with_capacity(steps.len());
    let mut thresholds = Vec::<f64>::new();
    let mut last_pair  : Option<(u8, u16)> = None;
    for step in steps {
      let pair = (step.coarse, step.fine);
      if last_pair != Some(pair) {
        let threshold = compose(step.fine, step.coarse).unwrap_or(0) as f64;
        thresholds.push(threshold);
        last_pair = Some(pair);
      }
      bin_of.push(thresholds.len() - 1);
    }
    Self {
      bin_of,
      thresholds,
    }
  }

  pub fn n_bins(&self) -> usize {
    self.thresholds.len()
  }
}

/// Per pixel hit counts, binned by threshold
#[derive(Debug, Clone, PartialEq)]
pub struct ScurveHistogram {
  /// dimensions (x, y, threshold bin)
  pub counts : Array3<u32>,
}

impl ScurveHistogram {

  pub fn new(n_bins : usize) -> Self {
    Self {
      counts : Array3::<u32>::zeros((NPIX_X, NPIX_Y, n_bins)),
    }
  }

  pub fn fill(&mut self, x : usize, y : usize, bin : usize) {
    if x < NPIX_X && y < NPIX_Y && bin < self.counts.dim().2 {
      self.counts[(x, y, bin)] += 1;
    }
  }

  /// Assemble, decode and bin a complete run
  pub fn from_run(run : &RunData, assembler : &FrameAssembler)
    -> (Self, ScanParamTable) {
    let table = ScanParamTable::from_steps(&run.steps);
    let mut hist = Self::new(table.n_bins());
    for step in &run.steps {
      let bin = table.bin_of[step.scan_param_id as usize];
      let set = assembler.assemble(run.step_words(step));
      for chip_frames in &set.frames {
        for frame in chip_frames {
          if let Ok(ChipPacket::Hit(hit)) = decode(*frame, None) {
            hist.fill(hit.x as usize, hit.y as usize, bin);
          }
        }
      }
    }
    (hist, table)
  }
}

/// The outcome of the per pixel fits
///
/// Pixels whose fit did not converge (or which saw no hits at
/// all) carry chi2 0, downstream consumers exclude those.
#[derive(Debug, Clone, PartialEq)]
pub struct ScurveFits {
  pub threshold : PixelMap,
  pub noise     : PixelMap,
  pub chi2      : PixelMap,
}

struct ScurveFunc<'a> {
  vv     : &'a [f64],
  yy     : &'a [f64],
  n_inj  : f64,
  invert : bool,
}

fn scurve_model(v : f64, mu : f64, sigma : f64, n_inj : f64, invert : bool) -> f64 {
  let arg = (v - mu) / (2.0f64.sqrt() * sigma.abs().max(1e-6));
  if invert {
    n_inj / 2.0 * (1.0 - erf(arg))
  } else {
    n_inj / 2.0 * (1.0 + erf(arg))
  }
}

impl ArgminOp for ScurveFunc<'_> {
  type Param    = Vec<f64>;
  type Output   = f64;
  type Hessian  = ();
  type Jacobian = ();
  type Float    = f64;

  fn apply(&self, p : &Self::Param) -> Result<Self::Output, Error> {
    let (mu, sigma) = (p[0], p[1]);
    let residuals : f64 = self.vv.iter().zip(self.yy.iter())
      .map(|(&v, &y)| (y - scurve_model(v, mu, sigma, self.n_inj, self.invert)).powi(2))
      .sum();
    Ok(residuals)
  }
}

/// Fit a single pixel, (threshold, noise, chi2/ndf)
fn fit_pixel(vv : &[f64], yy : &[f64], n_inj : f64, invert : bool)
  -> (f64, f64, f64) {
  if yy.iter().all(|y| *y == 0.0) || vv.len() < 3 {
    return (0.0, 0.0, 0.0);
  }
  // seed from the midpoint crossing of the histogram itself
  let half = n_inj / 2.0;
  let crossing = if invert {
    yy.iter().position(|y| *y < half)
  } else {
    yy.iter().position(|y| *y >= half)
  };
  let guess_mu = match crossing {
    Some(idx) => vv[idx],
    None      => vv[vv.len() / 2],
  };
  let guess_sigma = (vv[vv.len() - 1] - vv[0]).abs() / 10.0 + 1.0;
  let guess = vec![guess_mu, guess_sigma];

  let problem = ScurveFunc {
    vv,
    yy,
    n_inj,
    invert,
  };
  let solver = NelderMead::new();
  let res = match Executor::new(problem, solver, guess)
    .max_iters(200)
    .run() {
    Ok(res) => res,
    Err(_)  => {
      return (0.0, 0.0, 0.0);
    }
  };
  let result = &res.state().best_param;
  let (mu, sigma) = (result[0], result[1].abs());
  let chi2 : f64 = vv.iter().zip(yy.iter())
    .map(|(&v, &y)| {
      let expected = scurve_model(v, mu, sigma, n_inj, invert);
      (y - expected).powi(2) / expected.max(1.0)
    })
    .sum();
  let ndf = (vv.len() - 2) as f64;
  (mu, sigma, chi2 / ndf)
}

/// Fit every pixel of the histogram
///
/// `invert_x` flips the curve for scans where the hit count
/// falls with rising threshold, which is the case for a
/// threshold sweep from below the pulse amplitude to above.
pub fn fit_scurves(hist         : &ScurveHistogram,
                   thresholds   : &[f64],
                   n_injections : u16,
                   invert_x     : bool) -> ScurveFits {
  let n_inj = n_injections as f64;
  let results : Vec<(f64, f64, f64)> = (0..NPIX_X * NPIX_Y)
    .into_par_iter()
    .map(|idx| {
      let (x, y) = (idx % NPIX_X, idx / NPIX_X);
      let yy : Vec<f64> = (0..thresholds.len())
        .map(|bin| hist.counts[(x, y, bin)] as f64)
        .collect();
      fit_pixel(thresholds, &yy, n_inj, invert_x)
    })
    .collect();
  let mut fits = ScurveFits {
    threshold : PixelMap::new(),
    noise     : PixelMap::new(),
    chi2      : PixelMap::new(),
  };
  for (idx, (mu, sigma, chi2)) in results.iter().enumerate() {
    let (x, y) = (idx % NPIX_X, idx / NPIX_X);
    // indexing is in range by construction
    fits.threshold.set(x, y, *mu    as f32).ok();
    fits.noise.set(x, y,     *sigma as f32).ok();
    fits.chi2.set(x, y,      *chi2  as f32).ok();
  }
  fits
}

#[cfg(test)]
mod test_scurve {
  use crate::scurve::*;
  use crate::io::ScanStep;

  fn steps_for(thresholds : &[(u8, u16)], mask_steps : u16) -> Vec<ScanStep> {
    let mut steps = Vec::<ScanStep>::new();
    let mut id = 0u32;
    for (coarse, fine) in thresholds {
      for mask_index in 0..mask_steps {
        steps.push(ScanStep {
          scan_param_id : id,
          coarse        : *coarse,
          fine          : *fine,
          mask_index,
          index_start   : 0,
          index_stop    : 0,
        });
        id += 1;
      }
    }
    steps
  }

  #[test]
  fn test_scan_param_table_folds_mask_steps() {
    let steps = steps_for(&[(6, 440), (6, 441), (6, 442)], 4);
    let table = ScanParamTable::from_steps(&steps);
    assert_eq!(table.n_bins(), 3);
    assert_eq!(table.bin_of.len(), 12);
    assert_eq!(table.bin_of[0..4],  [0, 0, 0, 0]);
    assert_eq!(table.bin_of[4..8],  [1, 1, 1, 1]);
    assert_eq!(table.thresholds, vec![1400.0, 1401.0, 1402.0]);
  }

  #[test]
  fn test_fit_recovers_injected_threshold() {
    let n_inj = 100.0;
    let mu_true    = 1450.0;
    let sigma_true = 4.0;
    let vv : Vec<f64> = (1400..1500).map(|t| t as f64).collect();
    let yy : Vec<f64> = vv.iter()
      .map(|&v| scurve_model(v, mu_true, sigma_true, n_inj, true).round())
      .collect();
    let (mu, sigma, chi2) = fit_pixel(&vv, &yy, n_inj, true);
    assert!((mu - mu_true).abs() < 1.0, "mu {} vs {}", mu, mu_true);
    assert!((sigma - sigma_true).abs() < 1.0, "sigma {} vs {}", sigma, sigma_true);
    assert!(chi2 > 0.0);
    assert!(chi2 < 1.0);
  }

  #[test]
  fn test_fit_step_function_within_one_bin() {
    // a step with a short asymmetric shoulder, no error
    // function matches it exactly
    let vv : Vec<f64> = (0..100).map(|t| 1400.0 + t as f64).collect();
    let yy : Vec<f64> = vv.iter()
      .map(|&v| {
        match v as u32 {
          0..=1448    => 100.0,
          1449        => 90.0,
          1450        => 50.0,
          1451        => 20.0,
          _           => 0.0,
        }
      })
      .collect();
    let (mu, _, chi2) = fit_pixel(&vv, &yy, 100.0, true);
    assert!((mu - 1450.0).abs() <= 1.0, "edge at {} instead of 1450", mu);
    assert!(chi2 > 0.0);
  }

  #[test]
  fn test_empty_pixel_gets_sentinel() {
    let vv : Vec<f64> = (0..50).map(|t| t as f64).collect();
    let yy = vec![0.0; 50];
    assert_eq!(fit_pixel(&vv, &yy, 100.0, false), (0.0, 0.0, 0.0));
  }

  #[test]
  fn test_histogram_fill_bounds() {
    let mut hist = ScurveHistogram::new(10);
    hist.fill(0, 0, 0);
    hist.fill(255, 255, 9);
    // out of range fills are ignored
    hist.fill(256, 0, 0);
    hist.fill(0, 0, 10);
    assert_eq!(hist.counts[(0, 0, 0)], 1);
    assert_eq!(hist.counts[(255, 255, 9)], 1);
    let total : u32 = hist.counts.iter().sum();
    assert_eq!(total, 2);
  }
}
