//! The scan engine
//!
//! Drives a threshold x mask double loop against the chip.
//! The outer loop walks the expanded coarse jump plan, the
//! inner loop cycles the column mask so that only a fraction
//! of the matrix sees test pulses at a time, which keeps the
//! analog supply sag and the link occupancy in check.
//!
//! The loop is strictly sequential, one command at a time,
//! and the shutter is a blocking wall clock wait. Do not put
//! anything slow between shutter open and close.

use std::fmt;
use std::sync::{Arc,
                Mutex};
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{Sender,
                        TrySendError};

use tpx3_dataclasses::commands;
use tpx3_dataclasses::commands::OperationMode;
use tpx3_dataclasses::constants::{CLOCK_PERIOD_NS,
                                  NPIX_X,
                                  NPIX_Y};
use tpx3_dataclasses::errors::{CommandError,
                               ValidationError};
use tpx3_dataclasses::frames::FrameAssembler;
use tpx3_dataclasses::matrices::{EqualisationMatrix,
                                 PcrMatrix,
                                 PixelConfig};
use tpx3_dataclasses::packets::{decode,
                                ChipPacket,
                                PixelHit};
use tpx3_dataclasses::threshold::CoarseJumpPlan;

use crate::io::{RunData,
                ScanStep};
use crate::registers::{self,
                       RegisterError,
                       RegisterFile};
use crate::settings::ScanSettings;
use crate::thread_control::ThreadControl;

/// Anything that can end a scan early
#[derive(Debug, Clone, PartialEq)]
pub enum ScanError {
  Validation(ValidationError),
  Command(CommandError),
  Register(RegisterError),
}

impl fmt::Display for ScanError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr : String;
    match self {
      ScanError::Validation(err) => {repr = format!("Validation({})", err);},
      ScanError::Command(err)    => {repr = format!("Command({})", err);},
      ScanError::Register(err)   => {repr = format!("Register({})", err);},
    }
    write!(f, "<ScanError: {}>", repr)
  }
}

impl std::error::Error for ScanError {
}

impl From<ValidationError> for ScanError {
  fn from(err : ValidationError) -> Self {
    ScanError::Validation(err)
  }
}

impl From<CommandError> for ScanError {
  fn from(err : CommandError) -> Self {
    ScanError::Command(err)
  }
}

impl From<RegisterError> for ScanError {
  fn from(err : RegisterError) -> Self {
    ScanError::Register(err)
  }
}

/// The decoded hits of one scan step, for a live consumer
#[derive(Debug, Clone, PartialEq)]
pub struct HitBatch {
  pub scan_param_id : u32,
  pub hits          : Vec<PixelHit>,
}

impl fmt::Display for HitBatch {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<HitBatch: id {}, {} hits>", self.scan_param_id, self.hits.len())
  }
}

/// The columns belonging to one mask step
pub fn mask_step_columns(mask_step : usize, mask_index : usize) -> Vec<usize> {
  (0..NPIX_X).filter(|c| c % mask_step == mask_index).collect()
}

/// The pixel configuration for one mask step
///
/// Pixels in active columns get unmasked and test pulse
/// enabled, everything else is masked. The trim values come
/// from the equalisation matrix if one is loaded, pixels the
/// equalisation flagged stay masked.
pub fn mask_step_matrix(columns : &[usize], trim : Option<&EqualisationMatrix>)
  -> PcrMatrix {
  let mut matrix = PcrMatrix::all_masked();
  for column in columns {
    for row in 0..NPIX_Y {
      let idx = row * NPIX_X + column;
      let mut config = PixelConfig {
        test_pulse : true,
        threshold  : 0,
        mask       : false,
      };
      if let Some(eq) = trim {
        if eq.flagged[idx] {
          continue;
        }
        config.threshold = eq.trim[idx];
      }
      // set never fails for column < 256, row < 256
      matrix.set(*column, row, config).ok();
    }
  }
  matrix
}

pub struct ScanEngine<R>
  where R : RegisterFile {
  pub registers      : R,
  pub assembler      : FrameAssembler,
  pub settings       : ScanSettings,
  pub thread_control : Arc<Mutex<ThreadControl>>,
  /// Loaded threshold trim, applied to every mask step
  pub trim           : Option<EqualisationMatrix>,
  hit_sender         : Option<Sender<HitBatch>>,
  n_sent             : u64,
  n_dropped_batches  : u64,
}

impl<R> ScanEngine<R>
  where R : RegisterFile {

  pub fn new(registers      : R,
             assembler      : FrameAssembler,
             settings       : ScanSettings,
             thread_control : Arc<Mutex<ThreadControl>>) -> Self {
    Self {
      registers,
      assembler,
      settings,
      thread_control,
      trim              : None,
      hit_sender        : None,
      n_sent            : 0,
      n_dropped_batches : 0,
    }
  }

  /// Attach a live consumer. The channel should be bounded,
  /// a slow or absent consumer costs batches, never time.
  pub fn subscribe(&mut self, sender : Sender<HitBatch>) {
    self.hit_sender = Some(sender);
  }

  pub fn load_equalisation(&mut self, matrix : EqualisationMatrix) {
    self.trim = Some(matrix);
  }

  /// The shutter stays open for the whole test pulse train
  /// plus a fixed margin
  pub fn shutter_duration(&self) -> Duration {
    let train_ns = self.settings.tp_period as u64
                 * self.settings.n_injections as u64
                 * CLOCK_PERIOD_NS;
    Duration::from_nanos(train_ns)
      + Duration::from_millis(self.settings.shutter_margin_ms)
  }

  /// Program the general config, the test pulse registers
  /// and all DACs from the settings
  fn configure(&mut self) -> Result<(), ScanError> {
    let mut config = self.settings.general_config;
    config.test_pulse_en = true;
    self.registers.send_command(&commands::write_general_config(&config)?)?;
    self.registers.send_command(
      &commands::write_tp_period(self.settings.tp_period, self.settings.tp_phase)?)?;
    self.registers.send_command(
      &commands::write_tp_pulsenumber(self.settings.n_injections)?)?;
    let mut names : Vec<&String> = self.settings.dac_settings.keys().collect();
    names.sort();
    for name in names {
      let value = self.settings.dac_settings[name];
      self.registers.send_command(&commands::set_dac(name, value)?)?;
    }
    self.registers.write(registers::FIFO_RESET, 1)?;
    Ok(())
  }

  /// Run the configured threshold scan
  ///
  /// The run file is written even when the scan is cancelled
  /// or dies on a hardware error, whatever was acquired up to
  /// that point stays analyzable.
  pub fn run(&mut self) -> Result<RunData, ScanError> {
    self.settings.validate()?;
    let mut run = RunData::new(self.settings.clone());
    run.timestamp = Utc::now().timestamp() as u64;
    match self.thread_control.lock() {
      Ok(mut tc) => {
        tc.thread_scan_active = true;
        run.run_id = tc.run_id;
      }
      Err(err) => {
        error!("Can't lock thread control! {}", err);
      }
    }
    let result = self.scan_loop(&mut run);
    if let Err(ref err) = result {
      error!("Scan for run {} died with {}, keeping partial data", run.run_id, err);
    }
    let filename = std::path::Path::new(&self.settings.output_dir)
      .join(format!("run_{}.tpx3run", run.run_id));
    if let Err(err) = run.to_file(&filename) {
      error!("Unable to write run file {}! {}", filename.display(), err);
    } else {
      info!("Wrote {} to {}", run, filename.display());
    }
    match self.thread_control.lock() {
      Ok(mut tc) => {
        tc.thread_scan_active = false;
        tc.n_decode_errors    = run.n_decode_errors;
      }
      Err(err) => {
        error!("Can't lock thread control! {}", err);
      }
    }
    result?;
    Ok(run)
  }

  fn scan_loop(&mut self, run : &mut RunData) -> Result<(), ScanError> {
    let plan = CoarseJumpPlan::new(self.settings.vthreshold_start,
                                   self.settings.vthreshold_stop)?;
    let sequence = plan.expand();
    info!("Scanning {} thresholds over plan {}", sequence.len(), plan);
    self.configure()?;
    let mask_step = self.settings.mask_step;
    let n_total   = (sequence.len() * mask_step) as f32;
    let mut scan_param_id = 0u32;
    let mut last_coarse : Option<u8> = None;
    let mut last_columns = Vec::<usize>::new();
    for (coarse, fine) in &sequence {
      if self.stop_requested() {
        warn!("Stop requested, ending run {} at id {}", run.run_id, scan_param_id);
        break;
      }
      if last_coarse != Some(*coarse) {
        self.registers.send_command(
          &commands::set_dac("Vthreshold_coarse", *coarse as u16)?)?;
        last_coarse = Some(*coarse);
      }
      self.registers.send_command(&commands::set_dac("Vthreshold_fine", *fine)?)?;
      for mask_index in 0..mask_step {
        let columns = mask_step_columns(mask_step, mask_index);
        let matrix  = mask_step_matrix(&columns, self.trim.as_ref());
        // rewrite the columns of the previous step as well,
        // they have to fall back to masked
        let mut dirty = last_columns.clone();
        dirty.extend_from_slice(&columns);
        dirty.sort();
        dirty.dedup();
        for command in commands::write_pcr(&dirty, &matrix)? {
          self.registers.send_command(&command)?;
        }
        self.registers.send_command(&commands::write_ctpr(&columns)?)?;
        last_columns = columns;
        let index_start = run.raw_words.len() as u64;
        self.acquire(run)?;
        let index_stop = run.raw_words.len() as u64;
        run.steps.push(ScanStep {
          scan_param_id,
          coarse      : *coarse,
          fine        : *fine,
          mask_index  : mask_index as u16,
          index_start,
          index_stop,
        });
        self.monitor(run, scan_param_id, index_start as usize);
        scan_param_id += 1;
        if let Ok(mut tc) = self.thread_control.lock() {
          tc.progress = scan_param_id as f32 / n_total;
        }
      }
      self.registers.send_command(&commands::reset_sequential())?;
    }
    if self.n_dropped_batches > 0 {
      warn!("Consumer lagged, dropped {} of {} hit batches",
            self.n_dropped_batches, self.n_sent + self.n_dropped_batches);
    }
    Ok(())
  }

  /// One shutter window, drains the FIFO afterwards
  fn acquire(&mut self, run : &mut RunData) -> Result<(), ScanError> {
    let readout = match self.settings.general_config.op_mode {
      OperationMode::EventAndItot => commands::read_pixel_matrix_sequential(),
      _                           => commands::read_pixel_matrix_datadriven(),
    };
    self.registers.send_command(&readout)?;
    self.registers.write(registers::SHUTTER, 1)?;
    std::thread::sleep(self.shutter_duration());
    self.registers.write(registers::SHUTTER, 0)?;
    self.registers.send_command(&commands::stop_matrix_readout())?;
    let words = self.registers.get_data()?;
    run.raw_words.extend_from_slice(&words);
    Ok(())
  }

  /// Decode the words of the step just taken, count decode
  /// errors and hand the hits to the live consumer if one is
  /// listening
  fn monitor(&mut self, run : &mut RunData, scan_param_id : u32,
             index_start : usize) {
    let set = self.assembler.assemble(&run.raw_words[index_start..]);
    run.n_dropped      += set.n_dropped;
    run.n_unknown_link += set.n_unknown_link;
    let mut hits = Vec::<PixelHit>::new();
    for chip_frames in &set.frames {
      for frame in chip_frames {
        match decode(*frame, None) {
          Ok(ChipPacket::Hit(hit)) => {
            hits.push(hit);
          }
          Ok(_) => (),
          Err(_) => {
            run.n_decode_errors += 1;
          }
        }
      }
    }
    if let Some(ref sender) = self.hit_sender {
      match sender.try_send(HitBatch { scan_param_id, hits }) {
        Ok(_) => {
          self.n_sent += 1;
        }
        Err(TrySendError::Full(_)) => {
          trace!("Hit channel full, dropping batch for id {}", scan_param_id);
          self.n_dropped_batches += 1;
        }
        Err(TrySendError::Disconnected(_)) => {
          debug!("Hit consumer gone, unsubscribing");
          self.hit_sender = None;
        }
      }
    }
  }

  fn stop_requested(&self) -> bool {
    match self.thread_control.lock() {
      Ok(tc) => tc.stop_flag,
      Err(err) => {
        error!("Can't lock thread control! {}", err);
        true
      }
    }
  }
}
