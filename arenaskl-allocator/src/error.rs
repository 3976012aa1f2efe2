/// An error indicating that the ARENA is full.
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum Error {
  /// Insufficient space in the ARENA. Once returned, the ARENA stays full.
  Full {
    /// The requested size, including alignment padding and reserved bytes.
    requested: u64,
    /// The remaining size at the time of the request.
    available: u32,
  },
}

impl Error {
  #[inline]
  pub(crate) const fn full(requested: u64, available: u32) -> Self {
    Self::Full {
      requested,
      available,
    }
  }

  /// Returns `true` if the error reports an exhausted ARENA.
  #[inline]
  pub const fn is_full(&self) -> bool {
    matches!(self, Self::Full { .. })
  }
}

impl core::fmt::Display for Error {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      Self::Full {
        requested,
        available,
      } => write!(
        f,
        "Allocation failed: ARENA is full, requested size is {}, but only {} is available",
        requested, available
      ),
    }
  }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
