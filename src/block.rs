use std::{mem, ptr};

use log::trace;

use crate::ALIGNMENT;

/// Header written in front of every payload handed out by the heap.
///
/// `next` only means something while the block sits on the free list.
#[repr(C, align(16))]
pub struct Block {
  pub size: usize,
  pub next: *mut Block,
}

/// Width of [`Block`]; every size computation adds this once per block.
pub const HEADER_SIZE: usize = mem::size_of::<Block>();

const _: () = assert!(HEADER_SIZE % ALIGNMENT == 0);
const _: () = assert!(mem::align_of::<Block>() == ALIGNMENT);

impl Block {
  /// Writes a fresh header at `address` and returns it.
  ///
  /// # Safety
  ///
  /// `address` must be aligned to [`ALIGNMENT`] and have room for at least
  /// `HEADER_SIZE + size` writable bytes inside the heap.
  pub unsafe fn init(
    address: *mut u8,
    size: usize,
  ) -> *mut Block {
    let block = address.cast::<Block>();
    unsafe {
      block.write(Block {
        size,
        next: ptr::null_mut(),
      });
    }
    block
  }

  /// Recovers the header from a pointer previously returned by [`Block::payload`].
  ///
  /// # Safety
  ///
  /// `payload` must have been produced by this heap and still be live.
  pub unsafe fn from_payload(payload: *mut u8) -> *mut Block {
    unsafe { payload.sub(HEADER_SIZE) }.cast()
  }

  /// # Safety
  ///
  /// `block` must point to a valid header.
  pub unsafe fn payload(block: *mut Block) -> *mut u8 {
    unsafe { block.cast::<u8>().add(HEADER_SIZE) }
  }

  pub fn address(block: *const Block) -> usize {
    block as usize
  }

  /// Address one past the last payload byte, i.e. where the physically
  /// following block would start.
  ///
  /// # Safety
  ///
  /// `block` must point to a valid header.
  pub unsafe fn end(block: *const Block) -> usize {
    Self::address(block) + unsafe { (*block).size } + HEADER_SIZE
  }

  /// Carves `block` down to `size` payload bytes and turns the tail into a
  /// new free block, which is returned.
  ///
  /// Returns `None` when the tail could not hold its own header; `block` is
  /// left untouched in that case. The free list is never touched: the caller
  /// links the remainder and owns the donor.
  ///
  /// # Safety
  ///
  /// `block` must point to a valid header that is not on the free list, and
  /// `size` must be a multiple of [`ALIGNMENT`].
  pub unsafe fn split(
    block: *mut Block,
    size: usize,
  ) -> Option<*mut Block> {
    unsafe {
      let total = (*block).size;
      let remainder = total.checked_sub(size)?.checked_sub(HEADER_SIZE)?;

      let tail = Self::init(Self::payload(block).add(size), remainder);
      (*block).size = size;

      trace!(
        "split block {:?}: {} -> {} + header + {} at {:?}",
        block, total, size, remainder, tail
      );

      Some(tail)
    }
  }
}
