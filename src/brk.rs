//! Sources of heap address space.
//!
//! A [`Heap`](crate::Heap) only ever talks to the end of its region, so all
//! it needs from the outside world is a movable "program break".

use std::{alloc, ptr::NonNull};

use libc::{c_void, intptr_t, sbrk};
use log::{debug, warn};

use crate::{ALIGNMENT, HeapError, Result};

/// A contiguous region whose upper end can be moved up and down.
pub trait ProgramBreak {
  /// Current end of the region.
  fn current(&self) -> *mut u8;

  /// Moves the break up by `increment` bytes and returns the previous break,
  /// or `None` if the region cannot grow that far.
  ///
  /// # Safety
  ///
  /// The caller becomes responsible for the returned bytes until it hands
  /// them back through [`ProgramBreak::contract`].
  unsafe fn extend(
    &mut self,
    increment: usize,
  ) -> Option<*mut u8>;

  /// Moves the break down by `decrement` bytes.
  ///
  /// # Safety
  ///
  /// The last `decrement` bytes below the break must have been obtained via
  /// [`ProgramBreak::extend`] and must no longer be referenced.
  unsafe fn contract(
    &mut self,
    decrement: usize,
  );
}

/// The process data segment, moved with `sbrk(2)`.
///
/// Every `Heap<Sbrk>` shares the same break, and so does the C library's own
/// `malloc` on most platforms. Blocks only go back to the OS while they are
/// still the very last thing below the break.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sbrk;

impl ProgramBreak for Sbrk {
  fn current(&self) -> *mut u8 {
    unsafe { sbrk(0) }.cast()
  }

  unsafe fn extend(
    &mut self,
    increment: usize,
  ) -> Option<*mut u8> {
    let increment = intptr_t::try_from(increment).ok()?;
    let address = unsafe { sbrk(increment) };

    if address == usize::MAX as *mut c_void {
      return None;
    }

    Some(address.cast())
  }

  unsafe fn contract(
    &mut self,
    decrement: usize,
  ) {
    debug_assert!(
      intptr_t::try_from(decrement).is_ok(),
      "cannot contract program break by {} bytes",
      decrement
    );

    let Ok(delta) = intptr_t::try_from(decrement) else {
      warn!("program break refused to contract by {} bytes", decrement);
      return;
    };

    if unsafe { sbrk(-delta) } == usize::MAX as *mut c_void {
      warn!("program break refused to contract by {} bytes", decrement);
    }
  }
}

/// A fixed-capacity buffer owned by the heap, with a break that moves inside it.
///
/// Handy for running several independent heaps side by side, and for tests
/// that must not race the C allocator for the real program break.
pub struct Arena {
  base: NonNull<u8>,
  capacity: usize,
  used: usize,
}

impl Arena {
  /// Reserves `capacity` bytes aligned to [`ALIGNMENT`].
  pub fn with_capacity(capacity: usize) -> Result<Self> {
    if capacity == 0 {
      return Err(HeapError::InvalidCapacity(capacity));
    }

    let layout = Self::layout(capacity)?;
    let base = NonNull::new(unsafe { alloc::alloc(layout) })
      .ok_or(HeapError::OutOfMemory { requested: capacity })?;

    debug!("reserved arena of {} bytes at {:?}", capacity, base);

    Ok(Self {
      base,
      capacity,
      used: 0,
    })
  }

  fn layout(capacity: usize) -> Result<alloc::Layout> {
    alloc::Layout::from_size_align(capacity, ALIGNMENT)
      .map_err(|_| HeapError::InvalidCapacity(capacity))
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Bytes currently below the break.
  pub fn used(&self) -> usize {
    self.used
  }

  pub fn base(&self) -> *mut u8 {
    self.base.as_ptr()
  }
}

impl ProgramBreak for Arena {
  fn current(&self) -> *mut u8 {
    self.base.as_ptr().wrapping_add(self.used)
  }

  unsafe fn extend(
    &mut self,
    increment: usize,
  ) -> Option<*mut u8> {
    let used = self.used.checked_add(increment)?;

    if used > self.capacity {
      return None;
    }

    let previous = self.current();
    self.used = used;

    Some(previous)
  }

  unsafe fn contract(
    &mut self,
    decrement: usize,
  ) {
    debug_assert!(decrement <= self.used);
    self.used = self.used.saturating_sub(decrement);
  }
}

impl Drop for Arena {
  fn drop(&mut self) {
    if let Ok(layout) = Self::layout(self.capacity) {
      unsafe { alloc::dealloc(self.base.as_ptr(), layout) };
    }
  }
}
