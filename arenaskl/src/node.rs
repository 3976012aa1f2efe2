use core::{
  mem,
  sync::atomic::{AtomicU32, AtomicU64, Ordering},
};
use std::sync::LazyLock;

use arenaskl_allocator::{Align, Arena, Error as ArenaError};
use rand::Rng;

/// The maximum height of a tower.
pub const MAX_HEIGHT: usize = 20;

/// The value word of a logically deleted node. Value offsets are never `0`,
/// so no live value can encode to this.
pub(crate) const DELETED: u64 = 0;

/// Precompute the skiplist probabilities so that only a single random number
/// needs to be generated and so that the optimal pvalue can be used (inverse
/// of Euler's number).
pub(crate) static PROBABILITIES: LazyLock<[u32; MAX_HEIGHT]> = LazyLock::new(|| {
  const P: f64 = 1.0 / core::f64::consts::E;

  let mut probabilities = [0; MAX_HEIGHT];
  let mut p = 1f64;
  for probability in probabilities.iter_mut() {
    *probability = ((u32::MAX as f64) * p) as u32;
    p *= P;
  }
  probabilities
});

/// Returns a random tower height in `1..=MAX_HEIGHT`, where each level is
/// `1/e` as likely as the one below it.
pub(crate) fn random_height() -> usize {
  let rnd: u32 = rand::thread_rng().gen();
  height_for(rnd)
}

#[inline]
pub(crate) fn height_for(rnd: u32) -> usize {
  let probabilities = &*PROBABILITIES;
  let mut h = 1;
  while h < MAX_HEIGHT && rnd <= probabilities[h] {
    h += 1;
  }
  h
}

/// Packs the value offset, value size and meta into a single word.
///
/// - value offset: bits 0-31
/// - value size: bits 32-47
/// - meta: bits 48-63
#[inline]
pub const fn encode_value(offset: u32, size: u16, meta: u16) -> u64 {
  (meta as u64) << 48 | (size as u64) << 32 | offset as u64
}

/// Returns the value offset and the value size stored in a value word.
#[inline]
pub const fn decode_value(value: u64) -> (u32, u16) {
  (value as u32, (value >> 32) as u16)
}

/// Returns the meta stored in a value word.
#[inline]
pub const fn decode_meta(value: u64) -> u16 {
  (value >> 48) as u16
}

#[derive(Debug)]
#[repr(C)]
pub(crate) struct Link {
  next_offset: AtomicU32,
  prev_offset: AtomicU32,
}

impl Link {
  pub(crate) const SIZE: usize = mem::size_of::<Self>();
}

#[derive(Debug)]
#[repr(C)]
pub(crate) struct Node {
  // Immutable once the node is linked, so no need to synchronize to read the key.
  key_offset: u32,
  key_size: u32,

  // Multiple parts of the value are encoded as a single u64 so that it can be
  // atomically loaded and stored, see `encode_value`.
  value: AtomicU64,
  // ** DO NOT REMOVE BELOW COMMENT **
  // The tower is attached right after the node. Most nodes do not need the
  // full height of the tower, since the probability of each successive level
  // decreases exponentially. Because these elements are never accessed, they
  // are not allocated: the memory footprint of a node is truncated to its
  // height, and the tower is addressed by offset from the node.
  //
  // All accesses to tower elements use atomics, with no need to lock.
  // tower: [Link; MAX_HEIGHT],
}

impl Node {
  pub(crate) const SIZE: usize = mem::size_of::<Self>();
  pub(crate) const MAX_NODE_SIZE: usize = Self::SIZE + MAX_HEIGHT * Link::SIZE;

  /// Allocates a node with a tower of `height` levels.
  ///
  /// The memory of the ARENA is zeroed, so the node starts with an empty key,
  /// a deleted value, and null links.
  ///
  /// # Panics
  /// - If `height` is not in `1..=MAX_HEIGHT`.
  pub(crate) fn new_node_ptr(arena: &Arena, height: usize) -> Result<NodePtr, ArenaError> {
    assert!(
      (1..=MAX_HEIGHT).contains(&height),
      "height cannot be less than one or greater than the max height"
    );

    // The part of the tower that will never be used.
    let unused = (MAX_HEIGHT - height) * Link::SIZE;
    let offset = arena.allocate(
      (Self::MAX_NODE_SIZE - unused) as u32,
      unused as u32,
      Align::Eight,
    )?;

    // Safety: the allocation is 8-byte aligned and large enough for the node and its tower.
    let ptr = unsafe { arena.raw_at::<Node>(offset) };
    Ok(NodePtr::new(ptr, offset))
  }
}

/// A node in the ARENA, together with its offset.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NodePtr {
  ptr: *const Node,
  pub(crate) offset: u32,
}

impl PartialEq for NodePtr {
  #[inline]
  fn eq(&self, other: &Self) -> bool {
    self.offset == other.offset
  }
}

impl Eq for NodePtr {}

impl NodePtr {
  #[inline]
  pub(crate) const fn new(ptr: *const Node, offset: u32) -> Self {
    Self { ptr, offset }
  }

  #[inline]
  fn as_ref(&self) -> &Node {
    // Safety: a NodePtr is only built from an offset returned by `Node::new_node_ptr`.
    unsafe { &*self.ptr }
  }

  #[inline]
  fn tower(&self, level: usize) -> &Link {
    // Safety: callers never pass a level at or above the height the node was
    // allocated with, so the link is within the allocation.
    unsafe {
      &*self
        .ptr
        .cast::<u8>()
        .add(Node::SIZE + level * Link::SIZE)
        .cast::<Link>()
    }
  }

  /// Fills in the key and value of a node which is not yet reachable.
  ///
  /// # Safety
  /// - The node must not be linked into the list yet.
  #[inline]
  pub(crate) unsafe fn init(&self, key_offset: u32, key_size: u32, value: u64) {
    let ptr = self.ptr.cast_mut();
    (*ptr).key_offset = key_offset;
    (*ptr).key_size = key_size;
    (*ptr).value.store(value, Ordering::Relaxed);
  }

  #[inline]
  pub(crate) fn key<'a>(&self, arena: &'a Arena) -> &'a [u8] {
    let node = self.as_ref();
    arena.bytes_at(node.key_offset, node.key_size)
  }

  #[inline]
  pub(crate) fn value(&self) -> &AtomicU64 {
    &self.as_ref().value
  }

  /// Initializes both links of a level, before the node is published at that level.
  #[inline]
  pub(crate) fn write_tower(&self, level: usize, prev_offset: u32, next_offset: u32) {
    let link = self.tower(level);
    link.prev_offset.store(prev_offset, Ordering::Relaxed);
    link.next_offset.store(next_offset, Ordering::Relaxed);
  }

  #[inline]
  pub(crate) fn next_offset(&self, level: usize) -> u32 {
    self.tower(level).next_offset.load(Ordering::Acquire)
  }

  #[inline]
  pub(crate) fn prev_offset(&self, level: usize) -> u32 {
    self.tower(level).prev_offset.load(Ordering::Acquire)
  }

  #[inline]
  pub(crate) fn cas_next_offset(&self, level: usize, current: u32, new: u32) -> bool {
    self
      .tower(level)
      .next_offset
      .compare_exchange(current, new, Ordering::SeqCst, Ordering::Acquire)
      .is_ok()
  }

  #[inline]
  pub(crate) fn cas_prev_offset(&self, level: usize, current: u32, new: u32) -> bool {
    self
      .tower(level)
      .prev_offset
      .compare_exchange(current, new, Ordering::SeqCst, Ordering::Acquire)
      .is_ok()
  }
}
