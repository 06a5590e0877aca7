//! Dataclasses for the Timepix3 control and calibration suite
//!
//! Protocol level code - bit level command encoding, decoding
//! of the 48bit chip response words, the threshold codec with
//! the coarse jump planner and the pixel configuration
//! matrices.
//!
//! Everything in here is pure - no hardware access, no I/O
//! besides the matrix persistence helpers.

pub mod errors;
pub mod constants;
pub mod serialization;
pub mod bitfield;
pub mod lfsr;
pub mod threshold;
pub mod commands;
pub mod packets;
pub mod frames;
pub mod matrices;

#[macro_use] extern crate log;
