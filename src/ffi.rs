//! C ABI over one process-wide heap on the real program break.
//!
//! Gated behind `features = ["ffi"]`. The shared heap has no lock: callers
//! must serialize every call themselves.

use std::cell::UnsafeCell;

use libc::{c_void, size_t};

use crate::{Heap, Sbrk};

struct GlobalHeap(UnsafeCell<Heap<Sbrk>>);

// Access is serialized by the caller, see the module docs.
unsafe impl Sync for GlobalHeap {}

static HEAP: GlobalHeap = GlobalHeap(UnsafeCell::new(Heap::new()));

unsafe fn heap() -> &'static mut Heap<Sbrk> {
  unsafe { &mut *HEAP.0.get() }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn brkalloc_malloc(size: size_t) -> *mut c_void {
  unsafe { heap().allocate(size) }.cast()
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn brkalloc_calloc(
  count: size_t,
  elem_size: size_t,
) -> *mut c_void {
  unsafe { heap().allocate_zeroed(count, elem_size) }.cast()
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn brkalloc_realloc(
  ptr: *mut c_void,
  new_size: size_t,
) -> *mut c_void {
  unsafe { heap().reallocate(ptr.cast(), new_size) }.cast()
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn brkalloc_free(ptr: *mut c_void) {
  unsafe { heap().release(ptr.cast()) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn brkalloc_usable_size(ptr: *mut c_void) -> size_t {
  unsafe { heap().usable_size(ptr.cast()) }
}
