use arenaskl_allocator::Error as ArenaError;

/// Errors returned by the skiplist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
  /// A record with the same key already exists.
  RecordExists,
  /// The record was updated by another caller.
  RecordUpdated,
  /// The record was deleted by another caller.
  RecordDeleted,
  /// The ARENA does not have enough space left.
  Arena(ArenaError),
}

impl From<ArenaError> for Error {
  #[inline]
  fn from(e: ArenaError) -> Self {
    Self::Arena(e)
  }
}

impl core::fmt::Display for Error {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      Self::RecordExists => write!(f, "record with this key already exists"),
      Self::RecordUpdated => write!(f, "record was updated by another caller"),
      Self::RecordDeleted => write!(f, "record was deleted by another caller"),
      Self::Arena(e) => write!(f, "{}", e),
    }
  }
}

impl std::error::Error for Error {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      Self::Arena(e) => Some(e),
      _ => None,
    }
  }
}
