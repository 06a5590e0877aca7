//! Scan settings
//!
//! Everything a scan needs is in one TOML file, the complete
//! settings block gets embedded in the run output so a run is
//! reproducible from its own file.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{Read,
              Write};

use serde::{Deserialize,
            Serialize};

use tpx3_dataclasses::commands::GeneralConfig;
use tpx3_dataclasses::constants::VTHRESHOLD_MAX;
use tpx3_dataclasses::errors::ValidationError;
use tpx3_dataclasses::serialization::SerializationError;

/// The allowed column mask granularities
pub const MASK_STEPS : [usize;4] = [4, 16, 64, 256];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSettings {
  /// First threshold of the sweep, inclusive
  pub vthreshold_start  : u16,
  /// Last threshold of the sweep, inclusive
  pub vthreshold_stop   : u16,
  /// Test pulses per shutter window
  pub n_injections      : u16,
  /// Column mask granularity, one of 4, 16, 64 or 256
  pub mask_step         : usize,
  /// Test pulse period in 25 ns clock cycles
  pub tp_period         : u8,
  /// Test pulse phase
  pub tp_phase          : u8,
  /// Extra shutter time on top of the pulse train, in ms
  pub shutter_margin_ms : u64,
  /// Where run files end up
  pub output_dir        : String,
  /// The general config register of the chip
  pub general_config    : GeneralConfig,
  /// DAC values programmed before the scan, by manual name
  pub dac_settings      : HashMap<String, u16>,
}

impl ScanSettings {

  pub fn new() -> Self {
    let mut dac_settings = HashMap::<String, u16>::new();
    dac_settings.insert(String::from("Ibias_Preamp_ON"),  127);
    dac_settings.insert(String::from("VPreamp_NCAS"),     127);
    dac_settings.insert(String::from("Ibias_Ikrum"),       5);
    dac_settings.insert(String::from("Vfbk"),             127);
    dac_settings.insert(String::from("Ibias_DiscS1_ON"),  127);
    dac_settings.insert(String::from("Ibias_DiscS2_ON"),  127);
    dac_settings.insert(String::from("Ibias_PixelDAC"),   127);
    dac_settings.insert(String::from("VTP_coarse"),       127);
    dac_settings.insert(String::from("VTP_fine"),         255);
    Self {
      vthreshold_start  : 1400,
      vthreshold_stop   : 1600,
      n_injections      : 100,
      mask_step         : 16,
      tp_period         : 1,
      tp_phase          : 0,
      shutter_margin_ms : 2,
      output_dir        : String::from("."),
      general_config    : GeneralConfig::default(),
      dac_settings,
    }
  }

  /// Range checks on everything, run before any hardware is
  /// touched
  pub fn validate(&self) -> Result<(), ValidationError> {
    if self.vthreshold_start > VTHRESHOLD_MAX
    || self.vthreshold_stop  > VTHRESHOLD_MAX {
      error!("Threshold outside 0..{}!", VTHRESHOLD_MAX);
      return Err(ValidationError::ThresholdOutOfRange);
    }
    if self.vthreshold_start >= self.vthreshold_stop {
      error!("Empty threshold range {}..{}!",
             self.vthreshold_start, self.vthreshold_stop);
      return Err(ValidationError::InvalidScanRange);
    }
    if !MASK_STEPS.contains(&self.mask_step) {
      error!("Mask step {} not in {:?}!", self.mask_step, MASK_STEPS);
      return Err(ValidationError::InvalidMaskStep);
    }
    if self.n_injections == 0 {
      error!("A scan needs at least one injection per step!");
      return Err(ValidationError::NoInjections);
    }
    Ok(())
  }

  pub fn from_toml(filename : String) -> Result<ScanSettings, SerializationError> {
    match File::open(&filename) {
      Err(err) => {
        error!("Unable to open {}! {}", filename, err);
        return Err(SerializationError::TomlDecodingError);
      }
      Ok(mut file) => {
        let mut toml_string = String::from("");
        match file.read_to_string(&mut toml_string) {
          Err(err) => {
            error!("Unable to read {}! {}", filename, err);
            return Err(SerializationError::TomlDecodingError);
          }
          Ok(_) => {
            match toml::from_str(&toml_string) {
              Err(err) => {
                error!("Can't interpret toml! {}", err);
                return Err(SerializationError::TomlDecodingError);
              }
              Ok(settings) => {
                return Ok(settings);
              }
            }
          }
        }
      }
    }
  }

  pub fn to_toml(&self, mut filename : String) {
    if !filename.ends_with(".toml") {
      filename += ".toml";
    }
    info!("Will write to file {}!", filename);
    match File::create(&filename) {
      Err(err) => {
        error!("Unable to open file {}! {}", filename, err);
      }
      Ok(mut file) => {
        match toml::to_string_pretty(&self) {
          Err(err) => {
            error!("Unable to serialize toml! {err}");
          }
          Ok(toml_string) => {
            match file.write_all(toml_string.as_bytes()) {
              Err(err) => error!("Unable to write to file {}! {}", filename, err),
              Ok(_)    => debug!("Wrote settings to {}!", filename)
            }
          }
        }
      }
    }
  }
}

impl Default for ScanSettings {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for ScanSettings {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let mut repr = String::from("<ScanSettings:");
    repr += &(format!("\n  threshold      : {}..{}", self.vthreshold_start, self.vthreshold_stop));
    repr += &(format!("\n  n injections   : {}", self.n_injections));
    repr += &(format!("\n  mask step      : {}", self.mask_step));
    repr += &(format!("\n  tp period      : {} cycles, phase {}", self.tp_period, self.tp_phase));
    repr += &(format!("\n  shutter margin : {} ms", self.shutter_margin_ms));
    repr += &(format!("\n  general config : {}", self.general_config));
    repr += &(format!("\n  dacs           : {} set", self.dac_settings.len()));
    repr += &(format!("\n  output dir     : {}>", self.output_dir));
    write!(f, "{}", repr)
  }
}
