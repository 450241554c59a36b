use std::{iter, ptr};

use log::trace;

use crate::block::{Block, HEADER_SIZE};

/// Singly linked list of free blocks, threaded through their headers.
///
/// New blocks go in at the head and nothing is kept sorted, so the physical
/// neighbour lookups the coalescer needs are linear scans.
pub struct FreeList {
  head: *mut Block,
}

impl FreeList {
  pub const fn new() -> Self {
    Self {
      head: ptr::null_mut(),
    }
  }

  /// # Safety
  ///
  /// `block` must be a valid header that is not already on the list.
  pub unsafe fn push(
    &mut self,
    block: *mut Block,
  ) {
    unsafe { (*block).next = self.head };
    self.head = block;
  }

  /// Unlinks `block` if it is on the list.
  ///
  /// # Safety
  ///
  /// Every block on the list must be a valid header.
  pub unsafe fn remove(
    &mut self,
    block: *mut Block,
  ) {
    unsafe {
      let mut link: *mut *mut Block = &mut self.head;

      while !(*link).is_null() {
        if *link == block {
          *link = (*block).next;
          (*block).next = ptr::null_mut();
          return;
        }
        link = &mut (**link).next;
      }
    }
  }

  /// First block, in list order, whose payload can hold `size` bytes.
  ///
  /// # Safety
  ///
  /// Every block on the list must be a valid header.
  pub unsafe fn first_fit(
    &self,
    size: usize,
  ) -> Option<*mut Block> {
    unsafe { self.iter() }.find(|&block| unsafe { (*block).size } >= size)
  }

  /// Free block that ends exactly where `block` starts.
  ///
  /// # Safety
  ///
  /// Every block on the list must be a valid header.
  pub unsafe fn find_prev(
    &self,
    block: *const Block,
  ) -> Option<*mut Block> {
    unsafe { self.find_ending_at(Block::address(block)) }
  }

  /// Free block whose footprint ends exactly at `address`.
  ///
  /// # Safety
  ///
  /// Every block on the list must be a valid header.
  pub unsafe fn find_ending_at(
    &self,
    address: usize,
  ) -> Option<*mut Block> {
    unsafe { self.iter() }
      .find(|&candidate| unsafe { Block::end(candidate) } == address)
  }

  /// Free block that starts exactly where `block` ends.
  ///
  /// # Safety
  ///
  /// `block` and every block on the list must be valid headers.
  pub unsafe fn find_next(
    &self,
    block: *const Block,
  ) -> Option<*mut Block> {
    let end = unsafe { Block::end(block) };
    unsafe { self.iter() }.find(|&candidate| Block::address(candidate) == end)
  }

  /// Merges `block` with its free physical neighbours and returns the block
  /// that now covers the merged range.
  ///
  /// Absorbed blocks are unlinked, so exactly one list entry remains for the
  /// whole range.
  ///
  /// # Safety
  ///
  /// `block` must be on the list and every block on the list must be a valid
  /// header.
  pub unsafe fn coalesce(
    &mut self,
    mut block: *mut Block,
  ) -> *mut Block {
    unsafe {
      if let Some(prev) = self.find_prev(block) {
        trace!("merging {:?} into preceding free block {:?}", block, prev);
        self.remove(block);
        (*prev).size += (*block).size + HEADER_SIZE;
        block = prev;
      }

      if let Some(next) = self.find_next(block) {
        trace!("merging following free block {:?} into {:?}", next, block);
        self.remove(next);
        (*block).size += (*next).size + HEADER_SIZE;
      }
    }

    block
  }

  /// Walks the list from the head.
  ///
  /// # Safety
  ///
  /// Every block on the list must be a valid header. The iterator reads
  /// headers lazily, so this must hold for as long as it is alive.
  pub unsafe fn iter(&self) -> impl Iterator<Item = *mut Block> + '_ {
    let mut current = self.head;

    iter::from_fn(move || {
      if current.is_null() {
        return None;
      }
      let block = current;
      current = unsafe { (*block).next };
      Some(block)
    })
  }
}

impl Default for FreeList {
  fn default() -> Self {
    Self::new()
  }
}
