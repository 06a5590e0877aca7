//! Scan and calibration engine for the Timepix3 chip
//!
//! Drives threshold and test pulse scans against the
//! hardware register file, records the raw link stream
//! together with per step metadata and turns completed runs
//! into S-curve fits and equalisation matrices.
//!
//! The hardware facing loop is strictly sequential, the
//! shutter timing is wall clock real time. The only
//! concurrency in here is the per pixel fit, which runs on a
//! rayon worker pool, and the optional hit batch handoff to a
//! live consumer over a bounded channel.

pub mod registers;
pub mod settings;
pub mod thread_control;
pub mod scan;
pub mod scurve;
pub mod equalisation;
pub mod io;

#[macro_use] extern crate log;
