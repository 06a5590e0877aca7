//! Integration tests, chaining frame assembly, packet
//! decoding and the threshold codec the way the scan engine
//! uses them

use rand::Rng;

use tpx3_dataclasses::frames::FrameAssembler;
use tpx3_dataclasses::packets::{decode, ChipPacket};
use tpx3_dataclasses::threshold::{compose, CoarseJumpPlan};
use tpx3_dataclasses::commands;
use tpx3_dataclasses::matrices::{PcrMatrix, PixelConfig};
use tpx3_dataclasses::lfsr::{lfsr10_decode, lfsr4_decode};

/// Encode a data driven hit the way the chip would
fn encode_hit(x : u8, y : u8, toa : u16, tot_state : u16, hit_state : u8) -> u64 {
  let eoc         = (x / 2) as u64;
  let right       = (x % 2) as u64;
  let super_pixel = (y / 4) as u64;
  let pixel       = (y % 4) as u64 + 4 * right;
  let gray_toa    = (toa ^ (toa >> 1)) as u64;
  0xBu64 << 44 | eoc << 37 | super_pixel << 31 | pixel << 28
    | gray_toa << 14 | (tot_state as u64) << 4 | hit_state as u64
}

fn split_frame(frame : u64, link : u8) -> [u32;2] {
  let lo = ((frame & 0xFF_FFFF) as u32) << 8 | link as u32;
  let hi = (((frame >> 24) & 0xFF_FFFF) as u32) << 8 | link as u32;
  [lo, hi]
}

#[test]
fn wire_to_hit_pipeline() {
  let mut rng = rand::thread_rng();
  let assembler = FrameAssembler::single_chip();
  let mut expected = Vec::<(u8, u8, u16)>::new();
  let mut words    = Vec::<u32>::new();
  for _ in 0..1000 {
    let x   : u8  = rng.gen();
    let y   : u8  = rng.gen();
    let toa : u16 = rng.gen_range(0..0x4000);
    // lfsr states, never the stuck all zero state
    let tot_state : u16 = rng.gen_range(1..1024);
    let hit_state : u8  = rng.gen_range(1..16);
    expected.push((x, y, toa));
    let frame = encode_hit(x, y, toa, tot_state, hit_state);
    let link  = rng.gen_range(0..8u8);
    // the two halves of a frame always travel in order on
    // their link, but links interleave freely
    words.extend_from_slice(&split_frame(frame, link));
  }
  let set = assembler.assemble(&words);
  assert_eq!(set.n_dropped, 0);
  assert_eq!(set.n_unknown_link, 0);
  let nframes : usize = set.frames[0].len();
  assert_eq!(nframes, 1000);
  let mut decoded = Vec::<(u8, u8, u16)>::new();
  for frame in &set.frames[0] {
    match decode(*frame, Some(0xB0)).unwrap() {
      ChipPacket::Hit(hit) => {
        assert!(hit.tot < 1023);
        assert!(hit.hit_count < 15);
        decoded.push((hit.x, hit.y, hit.toa));
      }
      other => panic!("expected a hit, got {}", other),
    }
  }
  // frames per link keep their order, global order may
  // differ, compare as multisets
  let mut expected = expected;
  let mut decoded  = decoded;
  expected.sort();
  decoded.sort();
  assert_eq!(expected, decoded);
}

#[test]
fn lfsr_states_decode_through_hits() {
  for state in [0x3FFu16, 0x200, 0x001] {
    let frame = encode_hit(0, 0, 0, state, 0xF);
    match decode(frame, None).unwrap() {
      ChipPacket::Hit(hit) => {
        assert_eq!(hit.tot, lfsr10_decode(state));
        assert_eq!(hit.hit_count, lfsr4_decode(0xF));
      }
      other => panic!("expected a hit, got {}", other),
    }
  }
}

#[test]
fn jump_plan_drives_valid_dac_commands() {
  let plan = CoarseJumpPlan::new(700, 2000).unwrap();
  for (coarse, fine) in plan.expand() {
    // every step of the expanded plan must be programmable
    commands::set_dac("Vthreshold_coarse", coarse as u16).unwrap();
    commands::set_dac("Vthreshold_fine", fine).unwrap();
    compose(fine, coarse).unwrap();
  }
}

#[test]
fn mask_step_columns_pack_into_pcr_commands() {
  let mut matrix = PcrMatrix::all_masked();
  let mask_step = 16usize;
  for step in 0..mask_step {
    let columns : Vec<usize> = (0..256).filter(|c| c % mask_step == step).collect();
    assert_eq!(columns.len(), 16);
    for column in &columns {
      for row in 0..256 {
        matrix.set(*column, row, PixelConfig::default()).unwrap();
      }
    }
    let pcr_commands = commands::write_pcr(&columns, &matrix).unwrap();
    assert_eq!(pcr_commands.len(), 16);
    for command in &pcr_commands {
      assert_eq!(command.len(), 199);
    }
    let ctpr = commands::write_ctpr(&columns).unwrap();
    assert_eq!(ctpr.len(), 38);
  }
}
