use super::*;

pub(crate) fn run(f: impl Fn() + Send + Sync + 'static) {
  #[cfg(not(feature = "loom"))]
  f();

  #[cfg(feature = "loom")]
  loom::model(f);
}

#[test]
#[cfg(all(target_pointer_width = "64", not(feature = "loom")))]
#[cfg_attr(miri, ignore)]
fn test_size_overflow() {
  let arena = Arena::new(u32::MAX);

  // Allocating under the limit throws no error.
  let offset = arena.allocate(u16::MAX as u32, 0, Align::One).unwrap();
  assert_eq!(offset, 1);
  assert_eq!(arena.size(), u16::MAX as u32 + 1);

  // Allocating over the limit would overflow 32-bit accounting.
  let err = arena.allocate(u32::MAX, 0, Align::One).unwrap_err();
  assert!(err.is_full());
  assert_eq!(arena.size(), u32::MAX);

  // Continuing to allocate continues to fail.
  let err = arena.allocate(u16::MAX as u32, 0, Align::One).unwrap_err();
  assert!(err.is_full());
  assert_eq!(arena.size(), u32::MAX);
}

#[test]
fn test_offset_zero_is_reserved() {
  run(|| {
    let arena = Arena::new(64);
    assert_eq!(arena.size(), 1);

    let offset = arena.allocate(0, 0, Align::One).unwrap();
    assert_eq!(offset, 1);
    let offset = arena.allocate(3, 0, Align::One).unwrap();
    assert_eq!(offset, 1);
    assert_eq!(arena.size(), 4);
  });
}

#[test]
fn test_alignment() {
  run(|| {
    let arena = Arena::new(1024);

    let a = arena.allocate(3, 0, Align::One).unwrap();
    assert_eq!(a, 1);

    let b = arena.allocate(16, 0, Align::Eight).unwrap();
    assert_eq!(b % 8, 0);
    assert!(b >= a + 3);

    let c = arena.allocate(1, 0, Align::One).unwrap();
    let d = arena.allocate(8, 0, Align::Eight).unwrap();
    assert_eq!(d % 8, 0);
    assert!(d > c);
  });
}

#[test]
fn test_extra_is_accounted() {
  run(|| {
    let arena = Arena::new(1024);
    let offset = arena.allocate(24, 152, Align::Eight).unwrap();
    assert_eq!(offset, 8);
    // cursor 1 + 24 + 7 padding + 152 reserved
    assert_eq!(arena.size(), 184);

    let next = arena.allocate(1, 0, Align::One).unwrap();
    assert_eq!(next, 184);
  });
}

#[test]
fn test_full_latches() {
  run(|| {
    let arena = Arena::new(32);
    assert!(!arena.is_full());

    arena.allocate(16, 0, Align::One).unwrap();
    let err = arena.allocate(32, 0, Align::One).unwrap_err();
    assert_eq!(
      err,
      Error::Full {
        requested: 32,
        available: 15,
      }
    );
    assert!(arena.is_full());
    assert_eq!(arena.size(), arena.capacity());
    assert_eq!(arena.remaining(), 0);

    // A request which would have fit before is rejected as well.
    assert!(arena.allocate(1, 0, Align::One).unwrap_err().is_full());
    assert!(arena.allocate(0, 0, Align::One).unwrap_err().is_full());
    assert_eq!(arena.size(), 32);
  });
}

#[test]
fn test_exact_fit() {
  run(|| {
    let arena = Arena::new(16);
    let offset = arena.allocate(15, 0, Align::One).unwrap();
    assert_eq!(offset, 1);
    assert_eq!(arena.size(), 16);
    assert!(!arena.is_full());
    assert!(arena.allocate(1, 0, Align::One).is_err());
  });
}

#[test]
fn test_zero_capacity() {
  run(|| {
    let arena = Arena::new(0);
    assert_eq!(arena.size(), 0);
    assert!(arena.allocate(0, 0, Align::One).unwrap_err().is_full());
    assert_eq!(arena.bytes_at(0, 0), &[] as &[u8]);
  });
}

#[test]
fn test_boundary_allocation() {
  run(|| {
    let mut found = None;
    for cap in 1..256u32 {
      let arena = Arena::new(cap);
      match arena.allocate(24, 152, Align::Eight) {
        Ok(offset) => {
          assert!(offset as u64 + 24 <= cap as u64);
          assert_eq!(offset % 8, 0);
          found = Some(cap);
          break;
        }
        Err(e) => assert!(e.is_full()),
      }
    }
    assert_eq!(found, Some(184));
  });
}

#[test]
fn test_bytes_roundtrip() {
  run(|| {
    let arena = Arena::new(128);
    let offset = arena.allocate(5, 0, Align::One).unwrap();
    unsafe {
      arena.bytes_at_mut(offset, 5).copy_from_slice(b"hello");
    }
    assert_eq!(arena.bytes_at(offset, 5), b"hello");
    assert_eq!(arena.bytes_at(offset + 1, 3), b"ell");
  });
}

#[test]
#[cfg(not(feature = "loom"))]
#[should_panic]
fn test_bytes_out_of_bounds() {
  let arena = Arena::new(16);
  arena.bytes_at(10, 7);
}

#[test]
fn test_raw_at_and_offset_of() {
  run(|| {
    let arena = Arena::new(128);
    let offset = arena.allocate(8, 0, Align::Eight).unwrap();
    unsafe {
      let ptr = arena.raw_at::<u64>(offset);
      ptr.write(0xdead_beef);
      assert_eq!(arena.offset_of(ptr), offset);
      assert_eq!(*arena.raw_at::<u64>(offset), 0xdead_beef);
      assert!(arena.raw_at::<u64>(0).is_null());
    }
    assert_eq!(arena.offset_of::<u64>(core::ptr::null()), 0);

    let outside = 0u64;
    assert_eq!(arena.offset_of(&outside as *const u64), 0);
  });
}

#[test]
fn test_memory_is_zeroed() {
  run(|| {
    let arena = Arena::new(256);
    let offset = arena.allocate(200, 0, Align::Eight).unwrap();
    assert!(arena.bytes_at(offset, 200).iter().all(|b| *b == 0));
  });
}

#[test]
fn test_options() {
  run(|| {
    let arena = ArenaOptions::new().with_capacity(4096).alloc();
    assert_eq!(arena.capacity(), 4096);
    assert_eq!(ArenaOptions::default().alloc().capacity(), 1024);
  });
}

#[test]
fn test_clone_shares_memory() {
  run(|| {
    let arena = Arena::new(128);
    let offset = arena.allocate(4, 0, Align::One).unwrap();
    unsafe {
      arena.bytes_at_mut(offset, 4).copy_from_slice(b"abcd");
    }

    let cloned = arena.clone();
    assert_eq!(arena.refs(), 2);
    drop(arena);
    assert_eq!(cloned.refs(), 1);
    assert_eq!(cloned.bytes_at(offset, 4), b"abcd");
    assert_eq!(cloned.size(), 5);
  });
}

#[test]
#[cfg(all(feature = "std", not(feature = "loom")))]
#[cfg_attr(miri, ignore)]
fn test_concurrent_allocate() {
  use std::sync::{Arc, Mutex};

  const THREADS: usize = 8;
  const ALLOCS: usize = 1000;

  let arena = Arena::new(THREADS as u32 * ALLOCS as u32 * 16 + 8);
  let ranges = Arc::new(Mutex::new(std::vec::Vec::new()));
  let wg = wg::WaitGroup::new();

  for i in 0..THREADS {
    let arena = arena.clone();
    let ranges = ranges.clone();
    let wg = wg.add(1);
    std::thread::spawn(move || {
      let mut local = std::vec::Vec::with_capacity(ALLOCS);
      for _ in 0..ALLOCS {
        let offset = arena.allocate(8, 0, Align::Eight).unwrap();
        unsafe {
          arena.bytes_at_mut(offset, 8).fill(i as u8 + 1);
        }
        local.push((offset, i as u8 + 1));
      }
      ranges.lock().unwrap().extend(local);
      wg.done();
    });
  }

  wg.wait();

  let mut ranges = ranges.lock().unwrap().clone();
  assert_eq!(ranges.len(), THREADS * ALLOCS);
  ranges.sort_unstable();
  for w in ranges.windows(2) {
    assert!(w[0].0 + 8 <= w[1].0, "allocations overlap");
  }
  for (offset, tag) in ranges {
    assert!(arena.bytes_at(offset, 8).iter().all(|b| *b == tag));
  }
  assert!(arena.size() <= arena.capacity());
}
