use core::{fmt, ptr::NonNull, slice};

use crossbeam_utils::Backoff;

use crate::{
  common::{abort, AlignedVec, AtomicU64, AtomicUsize, Ordering},
  error::Error,
};

#[allow(unused_imports)]
use std::boxed::Box;

/// Offset `0` is never handed out, so it can stand for "no object".
const RESERVED_OFFSET: u64 = 1;

/// The alignment of an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Align {
  /// No alignment, used for key and value bytes.
  One = 1,
  /// 8-byte alignment, used for records holding 64-bit atomics.
  Eight = 8,
}

impl Align {
  /// Returns the alignment in bytes.
  #[inline]
  pub const fn bytes(&self) -> u32 {
    *self as u32
  }
}

struct Memory {
  refs: AtomicUsize,
  /// The bump cursor. Kept 64 bits wide so no request can wrap it around,
  /// any value greater than the capacity means the ARENA is full.
  allocated: AtomicU64,
  buf: AlignedVec,
}

/// A fixed-capacity, lock-free bump ARENA.
///
/// Objects are addressed by `u32` offsets from the start of the ARENA, the
/// offset `0` is reserved and never returned by [`Arena::allocate`].
/// Memory is never reused or freed until the last handle to the ARENA is dropped.
pub struct Arena {
  ptr: *mut u8,
  cap: u32,
  inner: NonNull<Memory>,
}

impl fmt::Debug for Arena {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Arena")
      .field("cap", &self.cap)
      .field("allocated", &self.size())
      .field("refs", &self.refs())
      .finish()
  }
}

impl Clone for Arena {
  fn clone(&self) -> Self {
    let memory = self.memory();

    let old_size = memory.refs.fetch_add(1, Ordering::Release);
    if old_size > usize::MAX >> 1 {
      abort();
    }

    Self {
      ptr: self.ptr,
      cap: self.cap,
      inner: self.inner,
    }
  }
}

unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
  /// Creates a new ARENA which can hold `capacity` bytes.
  ///
  /// The memory is allocated up front and zeroed, the ARENA never grows.
  ///
  /// # Example
  ///
  /// ```rust
  /// use arenaskl_allocator::Arena;
  ///
  /// let arena = Arena::new(1024);
  /// assert_eq!(arena.capacity(), 1024);
  /// ```
  pub fn new(capacity: u32) -> Self {
    let buf = AlignedVec::new(capacity as usize);
    let ptr = buf.as_mut_ptr();
    let memory = Memory {
      refs: AtomicUsize::new(1),
      allocated: AtomicU64::new(RESERVED_OFFSET),
      buf,
    };

    #[cfg(feature = "tracing")]
    tracing::debug!(capacity, "create ARENA");

    Self {
      ptr,
      cap: capacity,
      inner: unsafe { NonNull::new_unchecked(Box::into_raw(Box::new(memory))) },
    }
  }

  /// Allocates `size` bytes aligned to `align`, and accounts for `extra` more bytes
  /// which are reserved after the allocation but are not part of it.
  ///
  /// Returns the offset of the first usable byte. The offset is relative to the start
  /// of the ARENA and is never `0`.
  ///
  /// The bookkeeping is done with 64-bit arithmetic, so a request close to `u32::MAX`
  /// on top of an almost full ARENA is rejected instead of wrapping around.
  /// The first request that does not fit latches the ARENA into the full state:
  /// every later request fails, and [`Arena::size`] reports the capacity.
  ///
  /// # Example
  ///
  /// ```rust
  /// use arenaskl_allocator::{Align, Arena};
  ///
  /// let arena = Arena::new(64);
  /// let offset = arena.allocate(8, 0, Align::Eight).unwrap();
  /// assert_eq!(offset, 8);
  /// assert_eq!(arena.size(), 16);
  ///
  /// assert!(arena.allocate(64, 0, Align::One).is_err());
  /// assert!(arena.allocate(1, 0, Align::One).is_err());
  /// assert_eq!(arena.size(), 64);
  /// ```
  pub fn allocate(&self, size: u32, extra: u32, align: Align) -> Result<u32, Error> {
    let align = align.bytes() as u64;
    let padded = size as u64 + align - 1;
    let requested = padded + extra as u64;
    let cap = self.cap as u64;

    let memory = self.memory();
    let backoff = Backoff::new();
    let mut allocated = memory.allocated.load(Ordering::Acquire);

    loop {
      if allocated > cap {
        return Err(Error::full(requested, 0));
      }

      let want = allocated + requested;
      if want > cap {
        match memory.allocated.compare_exchange_weak(
          allocated,
          cap + 1,
          Ordering::SeqCst,
          Ordering::Acquire,
        ) {
          Ok(_) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(
              "ARENA is full, cannot allocate {} bytes, only {} bytes remaining",
              requested,
              cap - allocated
            );

            return Err(Error::full(requested, (cap - allocated) as u32));
          }
          Err(x) => {
            allocated = x;
            backoff.spin();
            continue;
          }
        }
      }

      match memory.allocated.compare_exchange_weak(
        allocated,
        want,
        Ordering::SeqCst,
        Ordering::Acquire,
      ) {
        Ok(_) => {
          let offset = (allocated + align - 1) & !(align - 1);

          #[cfg(feature = "tracing")]
          tracing::trace!(
            "allocate {} bytes at offset {} from ARENA",
            want - allocated,
            offset
          );

          return Ok(offset as u32);
        }
        Err(x) => {
          allocated = x;
          backoff.spin();
        }
      }
    }
  }

  /// Returns the bytes in `offset..offset + size`.
  ///
  /// The range is expected to come from a previous allocation, the ARENA only checks
  /// that it lies within the capacity.
  ///
  /// # Panics
  /// - If `offset + size` exceeds the capacity of the ARENA.
  #[inline]
  pub fn bytes_at(&self, offset: u32, size: u32) -> &[u8] {
    if size == 0 {
      return &[];
    }

    self.check_bounds(offset, size);
    // Safety: the range is in bounds, and the buffer lives as long as `self`.
    unsafe { slice::from_raw_parts(self.ptr.add(offset as usize), size as usize) }
  }

  /// Returns the bytes in `offset..offset + size` as mutable.
  ///
  /// # Safety
  /// - The range must come from a previous allocation, and the caller must be the only
  ///   one who reads or writes it while the returned slice is alive.
  ///
  /// # Panics
  /// - If `offset + size` exceeds the capacity of the ARENA.
  #[allow(clippy::mut_from_ref)]
  #[inline]
  pub unsafe fn bytes_at_mut(&self, offset: u32, size: u32) -> &mut [u8] {
    if size == 0 {
      return &mut [];
    }

    self.check_bounds(offset, size);
    slice::from_raw_parts_mut(self.ptr.add(offset as usize), size as usize)
  }

  /// Returns a pointer to the object of type `T` stored at `offset`.
  ///
  /// The offset `0` is mapped to the null pointer.
  ///
  /// # Safety
  /// - `offset` must be `0` or come from an allocation which is large enough for `T`
  ///   and aligned to `T`.
  #[inline]
  pub unsafe fn raw_at<T>(&self, offset: u32) -> *mut T {
    if offset == 0 {
      return core::ptr::null_mut();
    }

    self.ptr.add(offset as usize).cast()
  }

  /// Returns the offset of a pointer returned by [`Arena::raw_at`].
  ///
  /// Returns `0` for the null pointer and for pointers outside the ARENA.
  #[inline]
  pub fn offset_of<T>(&self, ptr: *const T) -> u32 {
    let ptr_addr = ptr as usize;
    let base_addr = self.ptr as usize;
    if ptr_addr > base_addr && ptr_addr < base_addr + self.cap as usize {
      (ptr_addr - base_addr) as u32
    } else {
      0
    }
  }

  /// Returns the number of bytes allocated so far, saturating at the capacity.
  ///
  /// # Example
  ///
  /// ```rust
  /// use arenaskl_allocator::Arena;
  ///
  /// let arena = Arena::new(1024);
  /// assert_eq!(arena.size(), 1);
  /// ```
  #[inline]
  pub fn size(&self) -> u32 {
    let allocated = self.memory().allocated.load(Ordering::Acquire);
    allocated.min(self.cap as u64) as u32
  }

  /// Returns the capacity of the ARENA.
  #[inline]
  pub const fn capacity(&self) -> u32 {
    self.cap
  }

  /// Returns the number of bytes that can still be allocated.
  #[inline]
  pub fn remaining(&self) -> u32 {
    self.cap - self.size()
  }

  /// Returns `true` once an allocation has failed for lack of space.
  #[inline]
  pub fn is_full(&self) -> bool {
    self.memory().allocated.load(Ordering::Acquire) > self.cap as u64
  }

  /// Returns the number of handles sharing this ARENA.
  #[inline]
  pub fn refs(&self) -> usize {
    self.memory().refs.load(Ordering::Acquire)
  }

  #[inline]
  fn check_bounds(&self, offset: u32, size: u32) {
    assert!(
      offset as u64 + size as u64 <= self.cap as u64,
      "range {}..{} is out of ARENA bounds (capacity {})",
      offset,
      offset as u64 + size as u64,
      self.cap
    );
  }

  #[inline]
  fn memory(&self) -> &Memory {
    // Safety:
    // The inner is always non-null, we only deallocate it when the memory refs is 1.
    unsafe { self.inner.as_ref() }
  }
}

impl Drop for Arena {
  fn drop(&mut self) {
    unsafe {
      let memory_ptr = self.inner.as_ptr();
      // Follow the drop steps from Arc.
      if (*memory_ptr).refs.fetch_sub(1, Ordering::Release) != 1 {
        return;
      }

      // The decreasing of the reference count synchronizes with this load, so every
      // use of the buffer through another handle happens before it is freed.
      (*memory_ptr).refs.load(Ordering::Acquire);
      drop(Box::from_raw(memory_ptr));
    }
  }
}
