use std::{io::Read, ptr};

use brkalloc::{HEADER_SIZE, Heap};

/// Waits until the user presses ENTER, leaving time to inspect the process
/// with `pmap` or `gdb` between steps.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

fn print_program_break(
  heap: &Heap,
  label: &str,
) {
  println!(
    "[{}] PID = {}, program break = {:?}",
    label,
    std::process::id(),
    heap.program_break(),
  );
}

fn print_alloc(
  heap: &Heap,
  size: usize,
  addr: *mut u8,
) {
  println!(
    "Allocated {} bytes (usable {}), address = {:?}, program break = {:?}",
    size,
    unsafe { heap.usable_size(addr) },
    addr,
    heap.program_break()
  );
}

fn print_free_list(heap: &Heap) {
  println!("Free list ({} bytes free):", heap.free_bytes());
  for block in heap.free_blocks() {
    println!(
      "  header {:#x}, payload {:#x}, {} bytes",
      block.address,
      block.address + HEADER_SIZE,
      block.size
    );
  }
}

fn main() {
  env_logger::init();

  let mut heap = Heap::new();

  unsafe {
    print_program_break(&heap, "start");
    block_until_enter_pressed();

    // 1) Three neighbouring blocks straight from the program break.
    let first = heap.allocate(100);
    println!("\n[1] Allocate 100 bytes");
    print_alloc(&heap, 100, first);
    ptr::write_bytes(first, 0xAB, 100);

    let second = heap.allocate(50);
    println!("\n[1] Allocate 50 bytes");
    print_alloc(&heap, 50, second);

    let third = heap.allocate(8) as *mut u64;
    println!("\n[1] Allocate a u64");
    print_alloc(&heap, 8, third.cast());
    third.write(0x1122334455667788);
    println!("[1] Value written = 0x{:X}", third.read());

    block_until_enter_pressed();

    // 2) Releasing the neighbours in turn merges them into one free block.
    heap.release(first);
    println!("\n[2] Released first block");
    print_free_list(&heap);

    heap.release(second);
    println!("\n[2] Released second block, it merges with the first");
    print_free_list(&heap);

    block_until_enter_pressed();

    // 3) A small request is carved out of the merged block.
    let small = heap.allocate(16);
    println!("\n[3] Allocate 16 bytes (split the free block)");
    print_alloc(&heap, 16, small);
    println!("[3] small == first? {}", small == first);
    print_free_list(&heap);

    block_until_enter_pressed();

    // 4) Growing an allocation moves it when the block is too small.
    let grown = heap.reallocate(small, 256);
    println!("\n[4] Reallocate 16 -> 256 bytes");
    print_alloc(&heap, 256, grown);
    print_free_list(&heap);

    block_until_enter_pressed();

    // 5) The last block goes back to the OS, and the break drops with it.
    print_program_break(&heap, "before releasing the last block");
    heap.release(grown);
    print_program_break(&heap, "after releasing the last block");

    // The u64 is last now and goes back too. The merged block in front of it
    // was already free, so it stays on the list for later requests.
    heap.release(third.cast());
    print_program_break(&heap, "after releasing the u64");
    print_free_list(&heap);

    println!("\n[5] End of walkthrough.");
  }
}
