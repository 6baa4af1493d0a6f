use std::io::Read;

use nearalloc::{Allocator, Config, DEFAULT_MAX_DISTANCE};

/// Waits until the user presses ENTER.
/// Useful for inspecting `/proc/<pid>/maps` between steps.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

fn patch_site() {}

fn main() {
  env_logger::init();

  let allocator = Allocator::with_config(Config::default().with_chunk_size(16 * 1024));
  let target = patch_site as fn() as usize;

  println!("PID = {}, patch site = {:#x}", std::process::id(), target);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 1) A trampoline within rel32 reach of the patch site.
  // --------------------------------------------------------------------
  let mut first = allocator
    .allocate_near(&[target], 64, DEFAULT_MAX_DISTANCE)
    .expect("no memory near the patch site");
  println!("\n[1] {:?}, distance = {:#x}", first, first.address().abs_diff(target));

  unsafe { first.as_ptr().write_bytes(0xcc, first.size()) };
  println!("[1] Filled with int3, {:?}", allocator.stats());

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 2) A second one lands in the same chunk.
  // --------------------------------------------------------------------
  let second = allocator
    .allocate_near(&[target], 64, DEFAULT_MAX_DISTANCE)
    .expect("no memory near the patch site");
  println!("\n[2] {:?}, {:?}", second, allocator.stats());

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) Free the first one and allocate something smaller: the hole is reused.
  // --------------------------------------------------------------------
  let hole = first.address();
  first.free();

  let third = allocator.allocate(32).expect("allocation failed");
  println!("\n[3] {:?}, reused freed block? {}", third, third.address() == hole);

  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 4) A window too narrow to hold a page cannot be served.
  // --------------------------------------------------------------------
  match allocator.allocate_near(&[target], 16, 0) {
    Ok(allocation) => println!("\n[4] unexpectedly got {allocation:?}"),
    Err(err) => println!("\n[4] max_distance = 0 -> {err}"),
  }

  println!("\n[5] Dropping everything returns the chunks to the OS.");
}
