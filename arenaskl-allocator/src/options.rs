use super::Arena;

/// Options for creating an ARENA
#[derive(Debug, Clone, Copy)]
pub struct ArenaOptions {
  capacity: u32,
}

impl Default for ArenaOptions {
  #[inline]
  fn default() -> Self {
    Self::new()
  }
}

impl ArenaOptions {
  /// Create an options for creating an ARENA with default values.
  #[inline]
  pub const fn new() -> Self {
    Self { capacity: 1024 }
  }

  /// Set the capacity of the ARENA.
  ///
  /// The capacity is fixed for the lifetime of the ARENA, it never grows.
  ///
  /// The default capacity is `1KB`.
  ///
  /// # Example
  ///
  /// ```
  /// use arenaskl_allocator::ArenaOptions;
  ///
  /// let opts = ArenaOptions::new().with_capacity(2048);
  /// ```
  #[inline]
  pub const fn with_capacity(mut self, capacity: u32) -> Self {
    self.capacity = capacity;
    self
  }

  /// Get the capacity of the ARENA.
  ///
  /// # Example
  ///
  /// ```
  /// use arenaskl_allocator::ArenaOptions;
  ///
  /// let opts = ArenaOptions::new().with_capacity(2048);
  ///
  /// assert_eq!(opts.capacity(), 2048);
  /// ```
  #[inline]
  pub const fn capacity(&self) -> u32 {
    self.capacity
  }

  /// Creates a new ARENA with the options.
  ///
  /// # Example
  ///
  /// ```
  /// use arenaskl_allocator::ArenaOptions;
  ///
  /// let arena = ArenaOptions::new().with_capacity(2048).alloc();
  /// assert_eq!(arena.capacity(), 2048);
  /// ```
  #[inline]
  pub fn alloc(self) -> Arena {
    Arena::new(self.capacity)
  }
}
