//! Offline analysis for recorded scan runs
//!
//! Reads a run file, assembles and decodes the raw link
//! stream, builds the per pixel S-curves, fits them and
//! writes the threshold, noise and chi2 maps. Two runs taken
//! at the extremal trims can be combined into an
//! equalisation matrix.

use std::path::{Path,
                PathBuf};

use colored::Colorize;
use indicatif::{ProgressBar,
                ProgressStyle};
use serde_json::json;

#[macro_use] extern crate log;

extern crate clap;
use clap::{Parser,
           Subcommand};

use tpx3_dataclasses::frames::FrameAssembler;
use tpx3_dataclasses::packets::{decode,
                                ChipPacket};

use tpx3_scan::equalisation::build_equalisation;
use tpx3_scan::io::{write_hit_records,
                    HitRecord,
                    RunData};
use tpx3_scan::scurve::{fit_scurves,
                        ScanParamTable,
                        ScurveFits,
                        ScurveHistogram};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
  /// Where the result maps end up
  #[arg(short, long, default_value = ".")]
  output_dir    : String,
  /// Show a progress bar while decoding
  #[arg(long, default_value_t = false)]
  show_progress : bool,
  #[command(subcommand)]
  command       : Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fit the S-curves of a single run
  Fit {
    /// The run file to analyze
    run_file  : PathBuf,
    /// Fit the falling curve (hit count drops with rising
    /// threshold)
    #[arg(long, default_value_t = true)]
    invert_x  : bool,
    /// Additionally write every decoded hit to hit_data.bin
    #[arg(long, default_value_t = false)]
    dump_hits : bool,
  },
  /// Build an equalisation matrix from two extremal runs
  Equalise {
    /// Run taken with every pixel trim at 0
    run_trim0  : PathBuf,
    /// Run taken with every pixel trim at 15
    run_trim15 : PathBuf,
  },
}

/// Decode a run into the S-curve histogram, with an optional
/// progress bar over the scan steps
fn build_histogram(run : &RunData, show_progress : bool)
  -> (ScurveHistogram, ScanParamTable) {
  let assembler = FrameAssembler::single_chip();
  let table = ScanParamTable::from_steps(&run.steps);
  let mut hist = ScurveHistogram::new(table.n_bins());
  let bar = if show_progress {
    let bar = ProgressBar::new(run.steps.len() as u64);
    bar.set_style(ProgressStyle::with_template(
      "decoding {bar:40} {pos}/{len} steps").unwrap_or(ProgressStyle::default_bar()));
    bar
  } else {
    ProgressBar::hidden()
  };
  let mut n_decode_errors = 0u64;
  for step in &run.steps {
    let bin = table.bin_of[step.scan_param_id as usize];
    let set = assembler.assemble(run.step_words(step));
    for chip_frames in &set.frames {
      for frame in chip_frames {
        match decode(*frame, None) {
          Ok(ChipPacket::Hit(hit)) => {
            hist.fill(hit.x as usize, hit.y as usize, bin);
          }
          Ok(_)  => (),
          Err(_) => {
            n_decode_errors += 1;
          }
        }
      }
    }
    bar.inc(1);
  }
  bar.finish_and_clear();
  if n_decode_errors > 0 {
    println!("{}", format!("=> {} words failed to decode", n_decode_errors).yellow());
  }
  (hist, table)
}

/// Decode every hit of the run again, joined to its
/// scan_param_id
fn collect_hits(run : &RunData) -> Vec<HitRecord> {
  let assembler = FrameAssembler::single_chip();
  let mut records = Vec::<HitRecord>::new();
  for step in &run.steps {
    let set = assembler.assemble(run.step_words(step));
    for chip_frames in &set.frames {
      for frame in chip_frames {
        if let Ok(ChipPacket::Hit(hit)) = decode(*frame, None) {
          records.push(HitRecord::from_hit(&hit, step.scan_param_id));
        }
      }
    }
  }
  records
}

fn fit_run(run : &RunData, invert_x : bool, show_progress : bool) -> ScurveFits {
  let (hist, table) = build_histogram(run, show_progress);
  println!("=> fitting {} pixels over {} threshold bins",
           256 * 256, table.n_bins());
  fit_scurves(&hist, &table.thresholds,
              run.settings.n_injections, invert_x)
}

fn write_fit_maps(fits : &ScurveFits, output_dir : &Path, prefix : &str)
  -> Result<(), std::io::Error> {
  fits.threshold.to_file(&output_dir.join(format!("{}threshold_map.bin", prefix)))?;
  fits.noise.to_file(&output_dir.join(format!("{}noise_map.bin", prefix)))?;
  fits.chi2.to_file(&output_dir.join(format!("{}chi2_map.bin", prefix)))?;
  Ok(())
}

fn load_run(filename : &Path) -> RunData {
  match RunData::from_file(filename) {
    Ok(run) => {
      println!("{}", format!("=> loaded {}", run).green());
      run
    }
    Err(err) => {
      println!("{}", format!("Can't read run file {}! {}",
                             filename.display(), err).red());
      std::process::exit(1);
    }
  }
}

fn main() {
  env_logger::init();
  let args = Args::parse();
  let output_dir = PathBuf::from(&args.output_dir);

  match args.command {
    Command::Fit { run_file, invert_x, dump_hits } => {
      let run  = load_run(&run_file);
      let fits = fit_run(&run, invert_x, args.show_progress);
      let n_converged = fits.chi2.values.iter().filter(|c| **c > 0.0).count();
      if let Err(err) = write_fit_maps(&fits, &output_dir, "") {
        println!("{}", format!("Can't write result maps! {}", err).red());
        std::process::exit(1);
      }
      if dump_hits {
        let records  = collect_hits(&run);
        let hit_file = output_dir.join("hit_data.bin");
        match write_hit_records(&hit_file, &records) {
          Ok(_)    => {
            println!("{}", format!("=> wrote {} hits to {}",
                                   records.len(), hit_file.display()).green());
          }
          Err(err) => {
            println!("{}", format!("Can't write {}! {}", hit_file.display(), err).red());
          }
        }
      }
      let summary = json!({
        "run_id"          : run.run_id,
        "n_steps"         : run.steps.len(),
        "n_decode_errors" : run.n_decode_errors,
        "n_converged"     : n_converged,
      });
      let summary_file = output_dir.join("summary.json");
      match std::fs::write(&summary_file, summary.to_string()) {
        Ok(_)    => info!("Wrote summary to {}", summary_file.display()),
        Err(err) => error!("Can't write {}! {}", summary_file.display(), err),
      }
      println!("{}", format!("=> {} of {} pixels converged", n_converged, 256 * 256).green());
    }
    Command::Equalise { run_trim0, run_trim15 } => {
      let run0  = load_run(&run_trim0);
      let run15 = load_run(&run_trim15);
      let fits0  = fit_run(&run0, true, args.show_progress);
      let fits15 = fit_run(&run15, true, args.show_progress);
      let matrix = build_equalisation(&fits0, &fits15,
                                      run0.settings.vthreshold_start,
                                      run0.settings.vthreshold_stop);
      let trim_file = output_dir.join("equalisation_matrix.bin");
      let mask_file = output_dir.join("mask_matrix.bin");
      let written = matrix.to_file(&trim_file)
        .and_then(|_| matrix.mask_matrix().to_file(&mask_file));
      match written {
        Ok(_) => {
          println!("{}", format!("=> wrote {} to {} and {}",
                                 matrix, trim_file.display(), mask_file.display()).green());
        }
        Err(err) => {
          println!("{}", format!("Can't write equalisation output! {}", err).red());
          std::process::exit(1);
        }
      }
    }
  }
}
