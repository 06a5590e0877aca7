//! Chip geometry and protocol constants
//!
//! For the register map and the packet headers, see the
//! Timepix3 chip manual. All pixel matrices in this crate
//! are indexed as `y*NPIX + x`.

/// Number of pixel columns
pub const NPIX_X : usize = 256;
/// Number of pixel rows
pub const NPIX_Y : usize = 256;
/// Total number of pixels on the matrix
pub const NPIXELS : usize = NPIX_X * NPIX_Y;

/// Every command sent to the chip starts with
/// these 5 sync bytes
pub const SYNC_HEADER : [u8;5] = [0xAA, 0x55, 0xAA, 0x55, 0xAA];

/// Largest encodable linear threshold
/// (fine 511 + coarse 15 * 160)
pub const VTHRESHOLD_MAX : u16 = 2911;
/// Largest fine threshold DAC value (9 bit)
pub const FINE_MAX       : u16 = 511;
/// Largest coarse threshold DAC value (4 bit)
pub const COARSE_MAX     : u8  = 15;
/// One coarse step in linear threshold units
/// (80 mV-equivalent / 0.5 per fine step)
pub const COARSE_STEP    : u16 = 160;

/// The chip clock period in nanoseconds (40 MHz)
pub const CLOCK_PERIOD_NS : u64 = 25;

/// Width of one pixel configuration register in bits
pub const PCR_BITS : usize = 6;
