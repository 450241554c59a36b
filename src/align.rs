/// Rounds `value` up to the next multiple of [`ALIGNMENT`](crate::ALIGNMENT).
///
/// Evaluates to `None` when the rounded value does not fit in a `usize`.
///
/// # Examples
///
/// ```rust
/// use brkalloc::{ALIGNMENT, align};
///
/// assert_eq!(ALIGNMENT, 16);
/// assert_eq!(align!(13), Some(16));
/// assert_eq!(align!(32), Some(32));
/// assert_eq!(align!(usize::MAX), None);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align_to!($value, $crate::ALIGNMENT)
  };
}

/// Rounds `value` up to a multiple of `align`, which must be a power of two.
///
/// ```rust
/// use brkalloc::align_to;
///
/// assert_eq!(align_to!(9, 8), Some(16));
/// assert_eq!(align_to!(0, 8), Some(0));
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $align:expr) => {{
    let align: usize = $align;
    debug_assert!(align.is_power_of_two());
    ($value as usize)
      .checked_add(align - 1)
      .map(|value| value & !(align - 1))
  }};
}

/// Bytes needed to move `address` up to the next [`ALIGNMENT`](crate::ALIGNMENT) boundary.
pub(crate) fn padding_for(address: usize) -> usize {
  address.wrapping_neg() & (crate::ALIGNMENT - 1)
}
