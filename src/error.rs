use thiserror::Error;

/// Reasons an allocation request can fail.
///
/// The malloc-style entry points on [`Heap`](crate::Heap) flatten all of
/// these into a null pointer; the `try_*` variants report them as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeapError {
  #[error("zero-sized allocation request")]
  ZeroSize,

  #[error("allocation size overflows the address space")]
  Overflow,

  #[error("program break refused to grow by {requested} bytes")]
  OutOfMemory { requested: usize },

  #[error("invalid arena capacity: {0} bytes")]
  InvalidCapacity(usize),
}

pub type Result<T> = std::result::Result<T, HeapError>;
