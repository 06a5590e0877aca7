//! Shared runtime state
//!
//! One `ThreadControl` behind an `Arc<Mutex<_>>` is shared
//! between the scan loop and whoever supervises it. The stop
//! flag is checked between scan steps, never mid step, so the
//! shutter timing of the running step is not disturbed.

use std::fmt;

use crate::settings::ScanSettings;

/// Send runtime information to threads via shared memory
/// (Arc(Mutex))
#[derive(Default, Debug)]
pub struct ThreadControl {
  /// Abort the scan at the next step boundary
  pub stop_flag            : bool,
  /// alive indicator for the scan thread
  pub thread_scan_active   : bool,
  /// alive indicator for the monitoring consumer
  pub thread_monitor_active: bool,
  /// The current run id
  pub run_id               : u32,
  /// Completed fraction of the current scan
  pub progress             : f32,
  /// Decode errors seen so far in this run
  pub n_decode_errors      : u64,
  pub scan_settings        : ScanSettings,
}

impl ThreadControl {
  pub fn new() -> Self {
    Self {
      stop_flag             : false,
      thread_scan_active    : false,
      thread_monitor_active : false,
      run_id                : 0,
      progress              : 0.0,
      n_decode_errors       : 0,
      scan_settings         : ScanSettings::new(),
    }
  }
}

impl fmt::Display for ThreadControl {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let mut repr = String::from("<ThreadControl:");
    repr += &(format!("\n  Run ID        : {}", self.run_id));
    repr += &(format!("\n  progress      : {:.1} %", self.progress * 100.0));
    repr += &(format!("\n  decode errors : {}", self.n_decode_errors));
    repr += "\n    -- program status:";
    repr += &(format!("\n  stop flag     : {}", self.stop_flag));
    repr += "\n    -- reported thread activity:";
    repr += &(format!("\n  scan          : {}", self.thread_scan_active));
    repr += &(format!("\n  monitor       : {}>", self.thread_monitor_active));
    write!(f, "{}", repr)
  }
}
