use core::ptr;

#[cfg(not(feature = "loom"))]
pub(crate) use std::alloc::{alloc_zeroed, dealloc, Layout};

#[cfg(feature = "loom")]
pub(crate) use loom::alloc::{alloc_zeroed, dealloc, Layout};

#[cfg(not(feature = "loom"))]
pub(crate) use core::sync::atomic::*;

#[cfg(feature = "loom")]
pub(crate) use loom::sync::atomic::*;

/// Every node record is 8-byte aligned, so the base of the buffer must be as well.
pub(crate) const BUFFER_ALIGN: usize = 8;

/// A zeroed, fixed-size buffer with a guaranteed base alignment.
#[derive(Debug)]
pub(crate) struct AlignedVec {
  ptr: ptr::NonNull<u8>,
  cap: usize,
}

impl Drop for AlignedVec {
  #[inline]
  fn drop(&mut self) {
    if self.cap != 0 {
      unsafe {
        dealloc(self.ptr.as_ptr(), self.layout());
      }
    }
  }
}

impl AlignedVec {
  #[inline]
  pub(crate) fn new(capacity: usize) -> Self {
    assert!(
      capacity <= Self::max_capacity(),
      "`capacity` cannot exceed isize::MAX - {}",
      BUFFER_ALIGN - 1
    );

    if capacity == 0 {
      return Self {
        ptr: ptr::NonNull::<u64>::dangling().cast(),
        cap: 0,
      };
    }

    let ptr = unsafe {
      let layout = Layout::from_size_align_unchecked(capacity, BUFFER_ALIGN);
      let ptr = alloc_zeroed(layout);
      if ptr.is_null() {
        std::alloc::handle_alloc_error(layout);
      }
      ptr::NonNull::new_unchecked(ptr)
    };

    Self { ptr, cap: capacity }
  }

  #[inline]
  const fn max_capacity() -> usize {
    isize::MAX as usize - (BUFFER_ALIGN - 1)
  }

  #[inline]
  const fn layout(&self) -> Layout {
    unsafe { Layout::from_size_align_unchecked(self.cap, BUFFER_ALIGN) }
  }

  #[inline]
  pub(crate) fn as_mut_ptr(&self) -> *mut u8 {
    self.ptr.as_ptr()
  }
}

#[inline(never)]
#[cold]
pub(crate) fn abort() -> ! {
  #[cfg(feature = "std")]
  {
    std::process::abort()
  }

  #[cfg(not(feature = "std"))]
  {
    struct Abort;
    impl Drop for Abort {
      fn drop(&mut self) {
        panic!();
      }
    }
    let _a = Abort;
    panic!("abort");
  }
}
