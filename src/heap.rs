use std::ptr::{self, NonNull};

use log::{debug, trace, warn};

use crate::{
  HeapError, Result, align,
  align::padding_for,
  block::{Block, HEADER_SIZE},
  brk::{ProgramBreak, Sbrk},
  free_list::FreeList,
};

/// Snapshot of one entry of the free list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBlock {
  /// Address of the block header.
  pub address: usize,
  /// Payload bytes, header excluded.
  pub size: usize,
}

/// A first-fit heap carved out of a single region that grows at its end.
///
/// The heap owns its free list and the source of its address space, so any
/// number of them can coexist. All bookkeeping lives in the headers in front
/// of each payload.
///
/// Only the heap writes free-list headers, so the safe inspection methods
/// ([`Heap::free_blocks`], [`Heap::free_bytes`]) can read them as long as no
/// caller has broken the `# Safety` contract of an unsafe method.
pub struct Heap<B: ProgramBreak = Sbrk> {
  brk: B,
  free: FreeList,
}

impl Heap<Sbrk> {
  /// A heap on top of the process program break.
  pub const fn new() -> Self {
    Self {
      brk: Sbrk,
      free: FreeList::new(),
    }
  }
}

impl Default for Heap<Sbrk> {
  fn default() -> Self {
    Self::new()
  }
}

impl<B: ProgramBreak> Heap<B> {
  pub fn with_break(brk: B) -> Self {
    Self {
      brk,
      free: FreeList::new(),
    }
  }

  /// Current end of the heap region.
  pub fn program_break(&self) -> *mut u8 {
    self.brk.current()
  }

  pub fn break_source(&self) -> &B {
    &self.brk
  }

  /// Walks the free list in list order (most recently freed first).
  pub fn free_blocks(&self) -> impl Iterator<Item = FreeBlock> + '_ {
    // Sound while the headers are intact, see the note on `Heap`.
    unsafe { self.free.iter() }.map(|block| FreeBlock {
      address: Block::address(block),
      size: unsafe { (*block).size },
    })
  }

  /// Payload bytes sitting on the free list.
  pub fn free_bytes(&self) -> usize {
    self.free_blocks().map(|block| block.size).sum()
  }

  /// Payload size recorded for a live allocation, which may exceed what was
  /// requested. Zero for a null pointer.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a live pointer returned by this heap.
  pub unsafe fn usable_size(
    &self,
    ptr: *mut u8,
  ) -> usize {
    if ptr.is_null() {
      return 0;
    }
    unsafe { (*Block::from_payload(ptr)).size }
  }

  fn request_size(size: usize) -> Result<usize> {
    if size == 0 {
      return Err(HeapError::ZeroSize);
    }
    align!(size).ok_or(HeapError::Overflow)
  }

  /// Moves the break up far enough for a block of `size` payload bytes and
  /// writes its header at the old break. The block is handed out directly and
  /// never visits the free list.
  unsafe fn grow(
    &mut self,
    size: usize,
  ) -> Result<*mut Block> {
    let total = size.checked_add(HEADER_SIZE).ok_or(HeapError::Overflow)?;

    unsafe {
      let padding = padding_for(self.brk.current() as usize);
      if padding != 0 {
        self.brk.extend(padding).ok_or_else(|| {
          warn!("program break refused {} bytes of alignment padding", padding);
          HeapError::OutOfMemory { requested: padding }
        })?;
        debug!("padded program break by {} bytes", padding);
      }

      let Some(address) = self.brk.extend(total) else {
        warn!("program break refused to grow by {} bytes", total);
        if padding != 0 {
          self.brk.contract(padding);
        }
        return Err(HeapError::OutOfMemory { requested: total });
      };

      let block = Block::init(address, size);
      debug!(
        "grew heap by {} bytes: block {:?}, program break = {:?}",
        total,
        block,
        self.brk.current()
      );

      Ok(block)
    }
  }

  /// Gives `block` back to the break if nothing lies after it.
  ///
  /// Returns whether the heap shrank.
  unsafe fn shrink_if_trailing(
    &mut self,
    block: *mut Block,
  ) -> bool {
    unsafe {
      if Block::end(block) != self.brk.current() as usize {
        return false;
      }

      self.free.remove(block);
      let footprint = (*block).size + HEADER_SIZE;
      self.brk.contract(footprint);

      debug!(
        "returned {} bytes at {:?} to the program break, now {:?}",
        footprint,
        block,
        self.brk.current()
      );
    }

    true
  }

  /// Like [`Heap::allocate`], with the failure reason.
  ///
  /// # Safety
  ///
  /// Every header in the heap must be intact.
  pub unsafe fn try_allocate(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>> {
    let size = Self::request_size(size)?;

    unsafe {
      let block = match self.free.first_fit(size) {
        Some(block) => {
          self.free.remove(block);
          if let Some(rest) = Block::split(block, size) {
            self.free.push(rest);
          }
          trace!("reusing free block {:?} for {} bytes", block, size);
          block
        }
        None => self.grow(size)?,
      };

      Ok(NonNull::new_unchecked(Block::payload(block)))
    }
  }

  /// Returns at least `size` bytes, or null if `size` is zero or the heap
  /// cannot grow.
  ///
  /// Requests are rounded up to [`ALIGNMENT`](crate::ALIGNMENT). The first
  /// free block large enough wins; any surplus that can hold its own header
  /// is split off and put back on the free list.
  ///
  /// # Safety
  ///
  /// Every header in the heap must be intact, i.e. no earlier caller wrote
  /// past the end of its payload.
  pub unsafe fn allocate(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    match unsafe { self.try_allocate(size) } {
      Ok(ptr) => ptr.as_ptr(),
      Err(err) => {
        trace!("allocate({}) failed: {}", size, err);
        ptr::null_mut()
      }
    }
  }

  /// Like [`Heap::allocate_zeroed`], with the failure reason.
  ///
  /// # Safety
  ///
  /// See [`Heap::allocate`].
  pub unsafe fn try_allocate_zeroed(
    &mut self,
    count: usize,
    elem_size: usize,
  ) -> Result<NonNull<u8>> {
    if count == 0 || elem_size == 0 {
      return Err(HeapError::ZeroSize);
    }

    let size = count.checked_mul(elem_size).ok_or(HeapError::Overflow)?;

    unsafe {
      let ptr = self.try_allocate(size)?;
      ptr::write_bytes(ptr.as_ptr(), 0, self.usable_size(ptr.as_ptr()));
      Ok(ptr)
    }
  }

  /// Zero-filled room for `count` elements of `elem_size` bytes each.
  ///
  /// Null if either argument is zero or their product overflows.
  ///
  /// # Safety
  ///
  /// See [`Heap::allocate`].
  pub unsafe fn allocate_zeroed(
    &mut self,
    count: usize,
    elem_size: usize,
  ) -> *mut u8 {
    match unsafe { self.try_allocate_zeroed(count, elem_size) } {
      Ok(ptr) => ptr.as_ptr(),
      Err(err) => {
        trace!("allocate_zeroed({}, {}) failed: {}", count, elem_size, err);
        ptr::null_mut()
      }
    }
  }

  /// Like [`Heap::reallocate`], with the failure reason.
  ///
  /// # Safety
  ///
  /// See [`Heap::reallocate`].
  pub unsafe fn try_reallocate(
    &mut self,
    ptr: *mut u8,
    new_size: usize,
  ) -> Result<NonNull<u8>> {
    let Some(old) = NonNull::new(ptr) else {
      return unsafe { self.try_allocate(new_size) };
    };

    if new_size == 0 {
      return unsafe { self.try_allocate(new_size) };
    }

    unsafe {
      let old_size = self.usable_size(ptr);
      if old_size >= new_size {
        return Ok(old);
      }

      let new = self.try_allocate(new_size)?;
      ptr::copy_nonoverlapping(ptr, new.as_ptr(), old_size.min(new_size));
      self.release(ptr);

      trace!("moved {} bytes from {:?} to {:?}", old_size, ptr, new);

      Ok(new)
    }
  }

  /// Resizes the allocation behind `ptr` to hold at least `new_size` bytes.
  ///
  /// A null `ptr` or a zero `new_size` behaves like [`Heap::allocate`] with
  /// `new_size`; in the zero case `ptr` stays allocated. Blocks are never
  /// shrunk: if the recorded size already covers `new_size`, `ptr` comes
  /// back unchanged. Otherwise the contents move to a new block and the old
  /// one is released. On failure null is returned and `ptr` is untouched.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a live pointer returned by this heap.
  pub unsafe fn reallocate(
    &mut self,
    ptr: *mut u8,
    new_size: usize,
  ) -> *mut u8 {
    match unsafe { self.try_reallocate(ptr, new_size) } {
      Ok(ptr) => ptr.as_ptr(),
      Err(err) => {
        trace!("reallocate({:?}, {}) failed: {}", ptr, new_size, err);
        ptr::null_mut()
      }
    }
  }

  /// Hands the allocation behind `ptr` back to the heap. Null is ignored.
  ///
  /// The physically last block goes straight back to the program break, and
  /// the break drops by exactly its footprint. Any other block joins the free
  /// list and is merged with free neighbours; a free block left last by an
  /// earlier release stays on the list.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a live pointer returned by this heap, and must not
  /// be used afterwards. Releasing anything else corrupts the heap.
  pub unsafe fn release(
    &mut self,
    ptr: *mut u8,
  ) {
    if ptr.is_null() {
      return;
    }

    unsafe {
      let block = Block::from_payload(ptr);

      if self.shrink_if_trailing(block) {
        return;
      }

      self.free.push(block);
      let merged = self.free.coalesce(block);
      trace!(
        "released {:?}, free block {:?} now holds {} bytes",
        block,
        merged,
        (*merged).size
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use test_log::test;

  use super::*;
  use crate::brk::Arena;

  fn heap(capacity: usize) -> Heap<Arena> {
    Heap::with_break(Arena::with_capacity(capacity).unwrap())
  }

  fn header(ptr: *mut u8) -> usize {
    ptr as usize - HEADER_SIZE
  }

  #[test]
  fn test_alloc() {
    let mut heap = heap(1024);

    unsafe {
      let first_addr = heap.allocate(8) as *mut u64;

      *first_addr = 3u64;

      let size: usize = 6;

      let second_addr = heap.allocate(size * 2) as *mut u16;

      for i in 0..size {
        *(second_addr.add(i)) = (i + 1) as u16;
      }

      assert_eq!(*first_addr, 3);

      for i in 0..size {
        assert_eq!((i + 1) as u16, *(second_addr.add(i)))
      }

      heap.release(first_addr as *mut u8);

      let third_addr = heap.allocate(4) as *mut u32;

      assert_eq!(first_addr as *mut u32, third_addr);

      let fourth_addr = heap.allocate(16) as *mut u128;

      *fourth_addr = 25;

      assert!(fourth_addr as usize > second_addr as usize);
      assert_eq!(*fourth_addr, 25);
    }
  }

  #[test]
  fn test_zero_size_is_rejected() {
    let mut heap = heap(256);

    unsafe {
      assert!(heap.allocate(0).is_null());
      assert_eq!(heap.try_allocate(0), Err(HeapError::ZeroSize));
    }
    assert_eq!(heap.break_source().used(), 0);
  }

  #[test]
  fn test_sizes_are_rounded_up() {
    let mut heap = heap(256);

    unsafe {
      let a = heap.allocate(13);
      let b = heap.allocate(1);

      assert_eq!(heap.usable_size(a), 16);
      assert_eq!(b as usize - a as usize, 16 + HEADER_SIZE);
      assert_eq!(a as usize % crate::ALIGNMENT, 0);
      assert_eq!(heap.usable_size(ptr::null_mut()), 0);
    }
  }

  #[test]
  fn test_release_then_allocate_same_address() {
    let mut heap = heap(1024);

    unsafe {
      let first = heap.allocate(64);
      ptr::write_bytes(first, 0xAB, 64);
      let _guard = heap.allocate(16);

      heap.release(first);
      assert_eq!(heap.allocate(64), first);
      assert!(heap.free_blocks().next().is_none());
    }
  }

  #[test]
  fn test_split_leaves_remainder_after_block() {
    let mut heap = heap(1024);

    unsafe {
      let big = heap.allocate(256);
      let _guard = heap.allocate(16);
      heap.release(big);

      let small = heap.allocate(64);
      assert_eq!(small, big);
      assert_eq!(heap.usable_size(small), 64);

      let free: Vec<_> = heap.free_blocks().collect();
      assert_eq!(
        free,
        vec![FreeBlock {
          address: small as usize + 64,
          size: 256 - 64 - HEADER_SIZE,
        }]
      );
    }
  }

  #[test]
  fn test_exact_fit_is_not_split() {
    let mut heap = heap(1024);

    unsafe {
      let block = heap.allocate(64);
      let _guard = heap.allocate(16);
      heap.release(block);

      let again = heap.allocate(64);
      assert_eq!(again, block);
      assert_eq!(heap.usable_size(again), 64);
      assert_eq!(heap.free_bytes(), 0);
    }
  }

  #[test]
  fn test_rounded_request_takes_whole_block() {
    let mut heap = heap(1024);

    unsafe {
      let block = heap.allocate(64);
      let _guard = heap.allocate(16);
      heap.release(block);

      let again = heap.allocate(64 - HEADER_SIZE + 1);
      assert_eq!(again, block);
      assert_eq!(heap.usable_size(again), 64);
      assert!(heap.free_blocks().next().is_none());
    }
  }

  #[test]
  fn test_first_fit_prefers_most_recently_freed() {
    let mut heap = heap(1024);

    unsafe {
      let a = heap.allocate(64);
      let _g1 = heap.allocate(16);
      let b = heap.allocate(64);
      let _g2 = heap.allocate(16);

      heap.release(a);
      heap.release(b);

      assert_eq!(heap.allocate(64), b);
      assert_eq!(heap.allocate(64), a);
    }
  }

  #[test]
  fn test_coalesce_either_order() {
    for reversed in [false, true] {
      let mut heap = heap(1024);

      unsafe {
        let a = heap.allocate(96);
        let b = heap.allocate(48);
        let _guard = heap.allocate(16);

        if reversed {
          heap.release(b);
          heap.release(a);
        } else {
          heap.release(a);
          heap.release(b);
        }

        let free: Vec<_> = heap.free_blocks().collect();
        assert_eq!(
          free,
          vec![FreeBlock {
            address: header(a),
            size: 96 + 48 + HEADER_SIZE,
          }]
        );
      }
    }
  }

  #[test]
  fn test_coalesce_three_way() {
    let mut heap = heap(1024);

    unsafe {
      let a = heap.allocate(32);
      let b = heap.allocate(32);
      let c = heap.allocate(32);
      let _guard = heap.allocate(16);

      heap.release(a);
      heap.release(c);
      assert_eq!(heap.free_blocks().count(), 2);

      heap.release(b);
      let free: Vec<_> = heap.free_blocks().collect();
      assert_eq!(
        free,
        vec![FreeBlock {
          address: header(a),
          size: 3 * 32 + 2 * HEADER_SIZE,
        }]
      );
    }
  }

  #[test]
  fn test_trailing_release_shrinks_heap() {
    let mut heap = heap(1024);
    let before = heap.program_break();

    unsafe {
      let block = heap.allocate(64);
      assert_eq!(heap.program_break() as usize, before as usize + 64 + HEADER_SIZE);

      heap.release(block);
    }

    assert_eq!(heap.program_break(), before);
    assert_eq!(heap.break_source().used(), 0);
    assert!(heap.free_blocks().next().is_none());
  }

  #[test]
  fn test_trailing_release_leaves_free_predecessor() {
    let mut heap = heap(1024);

    unsafe {
      let _keep = heap.allocate(16);
      let a = heap.allocate(96);
      let b = heap.allocate(48);

      heap.release(a);
      assert_eq!(heap.free_blocks().count(), 1);
      let before = heap.program_break() as usize;

      heap.release(b);
      assert_eq!(heap.program_break() as usize, before - 48 - HEADER_SIZE);
      assert_eq!(heap.program_break() as usize, a as usize + 96);
      assert_eq!(
        heap.free_blocks().collect::<Vec<_>>(),
        vec![FreeBlock {
          address: header(a),
          size: 96,
        }]
      );

      let reused = heap.allocate(96);
      assert_eq!(reused, a);
      assert!(heap.free_blocks().next().is_none());
    }
  }

  #[test]
  fn test_release_in_address_order_keeps_first_block_free() {
    let mut heap = heap(1024);

    unsafe {
      let a = heap.allocate(96);
      let b = heap.allocate(48);

      heap.release(a);
      heap.release(b);
    }

    assert_eq!(heap.break_source().used(), 96 + HEADER_SIZE);
    assert_eq!(heap.free_bytes(), 96);
  }

  #[test]
  fn test_out_of_memory() {
    let mut heap = heap(256);

    unsafe {
      assert!(heap.allocate(512).is_null());
      assert_eq!(
        heap.try_allocate(512),
        Err(HeapError::OutOfMemory {
          requested: 512 + HEADER_SIZE
        })
      );
      assert_eq!(heap.try_allocate(usize::MAX), Err(HeapError::Overflow));
    }
    assert_eq!(heap.break_source().used(), 0);
  }

  #[test]
  fn test_allocate_zeroed() {
    let mut heap = heap(1024);

    unsafe {
      let dirty = heap.allocate(64);
      ptr::write_bytes(dirty, 0xFF, 64);
      let _guard = heap.allocate(16);
      heap.release(dirty);

      let zeroed = heap.allocate_zeroed(8, 8);
      assert_eq!(zeroed, dirty);
      assert!((0..64).all(|i| *zeroed.add(i) == 0));
    }
  }

  #[test]
  fn test_allocate_zeroed_guards() {
    let mut heap = heap(256);

    unsafe {
      assert!(heap.allocate_zeroed(0, 8).is_null());
      assert!(heap.allocate_zeroed(8, 0).is_null());
      assert!(heap.allocate_zeroed(usize::MAX, 2).is_null());
      assert_eq!(heap.try_allocate_zeroed(usize::MAX, 2), Err(HeapError::Overflow));
    }
    assert_eq!(heap.break_source().used(), 0);
  }

  #[test]
  fn test_reallocate_smaller_keeps_pointer() {
    let mut heap = heap(1024);

    unsafe {
      let ptr = heap.allocate(64);
      let used = heap.break_source().used();

      assert_eq!(heap.reallocate(ptr, 10), ptr);
      assert_eq!(heap.reallocate(ptr, 64), ptr);
      assert_eq!(heap.usable_size(ptr), 64);
      assert_eq!(heap.break_source().used(), used);
    }
  }

  #[test]
  fn test_reallocate_grows_and_copies() {
    let mut heap = heap(1024);

    unsafe {
      let ptr = heap.allocate(32);
      for i in 0..32 {
        *ptr.add(i) = i as u8;
      }

      let moved = heap.reallocate(ptr, 128);
      assert!(!moved.is_null());
      assert_ne!(moved, ptr);
      assert!(heap.usable_size(moved) >= 128);
      assert!((0..32).all(|i| *moved.add(i) == i as u8));

      assert_eq!(
        heap.free_blocks().collect::<Vec<_>>(),
        vec![FreeBlock {
          address: header(ptr),
          size: 32,
        }]
      );
    }
  }

  #[test]
  fn test_reallocate_null_or_zero() {
    let mut heap = heap(1024);

    unsafe {
      let fresh = heap.reallocate(ptr::null_mut(), 24);
      assert!(!fresh.is_null());
      assert_eq!(heap.usable_size(fresh), 32);

      assert!(heap.reallocate(fresh, 0).is_null());
      assert_eq!(heap.usable_size(fresh), 32);
      assert!(heap.free_blocks().next().is_none());

      assert!(heap.reallocate(ptr::null_mut(), 0).is_null());
    }
  }

  #[test]
  fn test_reallocate_failure_leaves_block_intact() {
    let mut heap = heap(256);

    unsafe {
      let ptr = heap.allocate(64);
      ptr::write_bytes(ptr, 0x5A, 64);

      assert!(heap.reallocate(ptr, 4096).is_null());
      assert_eq!(
        heap.try_reallocate(ptr, 4096),
        Err(HeapError::OutOfMemory {
          requested: 4096 + HEADER_SIZE
        })
      );

      assert_eq!(heap.usable_size(ptr), 64);
      assert!((0..64).all(|i| *ptr.add(i) == 0x5A));
      assert!(heap.free_blocks().next().is_none());
    }
  }

  #[test]
  fn test_release_null_is_noop() {
    let mut heap = heap(256);

    unsafe { heap.release(ptr::null_mut()) };

    assert_eq!(heap.break_source().used(), 0);
    assert!(heap.free_blocks().next().is_none());
  }
}
