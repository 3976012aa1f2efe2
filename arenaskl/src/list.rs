use core::{
  cmp,
  sync::atomic::{AtomicU32, Ordering},
};

use arenaskl_allocator::{Align, Arena, Error as ArenaError};
use crossbeam_utils::Backoff;

use crate::{
  error::Error,
  node::{
    decode_meta, decode_value, encode_value, random_height, Node, NodePtr, DELETED, MAX_HEIGHT,
  },
};

mod iterator;
pub use iterator::{Cursor, Entry, Iter};


/// The `(prev, next)` pair of nodes between which a key belongs at one level.
#[derive(Debug, Clone, Copy)]
struct Splice {
  prev: NodePtr,
  next: NodePtr,
}

/// A lock-free skiplist whose nodes, keys and values all live in one [`Arena`].
///
/// Keys are ordered byte-wise. Any number of threads may insert, read and
/// iterate at the same time; nothing ever blocks. Nodes are never freed on their
/// own, the memory is returned when the skiplist and every clone of its ARENA are dropped.
pub struct SkipList {
  arena: Arena,
  head: NodePtr,
  tail: NodePtr,
  /// Current height. 1 <= height <= MAX_HEIGHT. CAS.
  height: AtomicU32,
  /// Number of nodes linked at the base level, deleted ones included.
  len: AtomicU32,

  /// If set to true by tests, then extra delays are added to make it easier to
  /// detect unusual race conditions.
  #[cfg(test)]
  yield_now: bool,
}

// Safety: all shared state is accessed through atomics, and the ARENA is Send + Sync.
unsafe impl Send for SkipList {}
unsafe impl Sync for SkipList {}

impl core::fmt::Debug for SkipList {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("SkipList")
      .field("arena", &self.arena)
      .field("height", &self.height())
      .field("len", &self.len())
      .finish()
  }
}

impl SkipList {
  /// Creates an empty skiplist on top of `arena`.
  ///
  /// # Panics
  /// - If the ARENA is not large enough to hold the head and tail nodes.
  ///
  /// # Example
  ///
  /// ```rust
  /// use arenaskl::{Arena, SkipList};
  ///
  /// let list = SkipList::new(Arena::new(1 << 20));
  /// assert_eq!(list.height(), 1);
  /// ```
  pub fn new(arena: Arena) -> Self {
    match Self::try_new(arena) {
      Ok(list) => list,
      Err(_) => panic!("ARENA is not large enough to hold the head and tail nodes"),
    }
  }

  /// Creates an empty skiplist backed by a new ARENA of `capacity` bytes.
  ///
  /// # Panics
  /// - If the capacity is not large enough to hold the head and tail nodes.
  pub fn with_capacity(capacity: u32) -> Self {
    Self::new(Arena::new(capacity))
  }

  /// Creates an empty skiplist on top of `arena`, returning an error instead of
  /// panicking if the head and tail nodes do not fit.
  pub fn try_new(arena: Arena) -> Result<Self, ArenaError> {
    let head = Node::new_node_ptr(&arena, MAX_HEIGHT)?;
    let tail = Node::new_node_ptr(&arena, MAX_HEIGHT)?;

    // Link all head/tail levels together.
    for i in 0..MAX_HEIGHT {
      head.write_tower(i, 0, tail.offset);
      tail.write_tower(i, head.offset, 0);
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(
      head = head.offset,
      tail = tail.offset,
      capacity = arena.capacity(),
      "create skiplist"
    );

    Ok(Self {
      arena,
      head,
      tail,
      height: AtomicU32::new(1),
      len: AtomicU32::new(0),
      #[cfg(test)]
      yield_now: false,
    })
  }

  /// Returns the height of the highest tower within any of the nodes that
  /// have ever been allocated as part of this skiplist.
  #[inline]
  pub fn height(&self) -> u32 {
    self.height.load(Ordering::Acquire)
  }

  /// Returns the ARENA backing this skiplist.
  #[inline]
  pub const fn arena(&self) -> &Arena {
    &self.arena
  }

  /// Returns the number of bytes allocated from the ARENA.
  #[inline]
  pub fn size(&self) -> u32 {
    self.arena.size()
  }

  /// Returns the number of entries linked into the skiplist, including
  /// entries which have been deleted.
  #[inline]
  pub fn len(&self) -> usize {
    self.len.load(Ordering::Acquire) as usize
  }

  /// Returns `true` if no entry has ever been inserted.
  #[inline]
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Inserts `key` with `value` and `meta`.
  ///
  /// Returns [`Error::RecordExists`] if the key is already present. A key which
  /// has been deleted is brought back with the new value instead.
  ///
  /// # Panics
  /// - If the key is longer than `u32::MAX` bytes.
  /// - If the value is longer than `u16::MAX` bytes.
  ///
  /// # Example
  ///
  /// ```rust
  /// use arenaskl::{Error, SkipList};
  ///
  /// let list = SkipList::with_capacity(1 << 20);
  /// list.insert(b"a", b"1", 0).unwrap();
  /// assert_eq!(list.get(b"a"), Some((&b"1"[..], 0)));
  /// assert_eq!(list.insert(b"a", b"9", 0), Err(Error::RecordExists));
  /// ```
  pub fn insert(&self, key: &[u8], value: &[u8], meta: u16) -> Result<(), Error> {
    self.insert_with_height(key, value, meta, random_height())
  }

  fn insert_with_height(
    &self,
    key: &[u8],
    value: &[u8],
    meta: u16,
    height: usize,
  ) -> Result<(), Error> {
    let nd = self.new_node(key, value, meta, height)?;
    let value = nd.value().load(Ordering::Relaxed);

    let mut spl = [Splice {
      prev: self.head,
      next: self.tail,
    }; MAX_HEIGHT];
    if let Some(existing) = self.find_splice(key, &mut spl) {
      return self.revive(existing, value);
    }

    #[cfg(test)]
    if self.yield_now {
      // Add delay to make it easier to test race between this thread
      // and another thread that sees the intermediate state between
      // finding the splice and using it.
      std::thread::yield_now();
    }

    // We always insert from the base level and up. After a node is linked at the
    // base level, it is visible to every reader, the upper levels only make
    // searches faster.
    for (i, splice) in spl.iter().enumerate().take(height) {
      let Splice { mut prev, mut next } = *splice;

      // +----------------+     +------------+     +----------------+
      // |      prev      |     |     nd     |     |      next      |
      // | prevNextOffset |---->|            |     |                |
      // |                |<----| prevOffset |     |                |
      // |                |     | nextOffset |---->|                |
      // |                |     |            |<----| nextPrevOffset |
      // +----------------+     +------------+     +----------------+
      //
      // 1. Initialize prevOffset and nextOffset to point to prev and next.
      // 2. CAS prevNextOffset to repoint from next to nd.
      // 3. CAS nextPrevOffset to repoint from prev to nd.
      loop {
        nd.write_tower(i, prev.offset, next.offset);

        // Check whether next has an updated link to prev. If it does not,
        // that can mean one of two things:
        //   1. The thread that added the next node hasn't yet had a chance
        //      to add the prev link (but will shortly).
        //   2. Another thread has added a new node between prev and next.
        let next_prev_offset = next.prev_offset(i);
        if next_prev_offset != prev.offset && prev.next_offset(i) == next.offset {
          // Case #1, help the other thread along by updating the next
          // node's prev link.
          let _ = next.cas_prev_offset(i, next_prev_offset, prev.offset);
        }

        if prev.cas_next_offset(i, next.offset, nd.offset) {
          #[cfg(test)]
          if self.yield_now {
            // Add delay to make it easier to test race between this thread
            // and another thread that sees the intermediate state between
            // setting next and setting prev.
            std::thread::yield_now();
          }

          let _ = next.cas_prev_offset(i, prev.offset, nd.offset);
          break;
        }

        // CAS failed, another insert changed prev at this level. Recompute
        // prev and next at this level only, starting from prev.
        #[cfg(feature = "tracing")]
        tracing::trace!(level = i, "splice changed, search again");

        let (p, n, found) = self.find_splice_for_level(key, i, prev);
        if found {
          assert!(
            i == 0,
            "how can another thread have inserted a node at a non-base level?"
          );
          return self.revive(n, value);
        }
        prev = p;
        next = n;
      }
    }

    self.len.fetch_add(1, Ordering::AcqRel);
    Ok(())
  }

  /// Returns the value and meta of `key`, or `None` if the key is absent or deleted.
  ///
  /// # Example
  ///
  /// ```rust
  /// use arenaskl::SkipList;
  ///
  /// let list = SkipList::with_capacity(1 << 20);
  /// list.insert(b"k", b"v", 7).unwrap();
  /// assert_eq!(list.get(b"k"), Some((&b"v"[..], 7)));
  /// assert_eq!(list.get(b"x"), None);
  /// ```
  pub fn get(&self, key: &[u8]) -> Option<(&[u8], u16)> {
    let nd = self.find(key)?;
    let value = nd.value().load(Ordering::Acquire);
    if value == DELETED {
      return None;
    }

    Some((self.value_bytes(value), decode_meta(value)))
  }

  /// Returns `true` if `key` is present and not deleted.
  #[inline]
  pub fn contains_key(&self, key: &[u8]) -> bool {
    self.get(key).is_some()
  }

  /// Returns a double-ended iterator over the live entries, in key order.
  ///
  /// # Example
  ///
  /// ```rust
  /// use arenaskl::SkipList;
  ///
  /// let list = SkipList::with_capacity(1 << 20);
  /// for k in [b"b", b"a", b"c"] {
  ///   list.insert(k, b"", 0).unwrap();
  /// }
  /// let keys: Vec<_> = list.iter().map(|ent| ent.key().to_vec()).collect();
  /// assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
  /// ```
  #[inline]
  pub fn iter(&self) -> Iter<'_> {
    Iter::new(self)
  }

  /// Returns a cursor positioned before the first entry.
  #[inline]
  pub fn cursor(&self) -> Cursor<'_> {
    Cursor::new(self)
  }
}

impl SkipList {
  fn new_node(
    &self,
    key: &[u8],
    value: &[u8],
    meta: u16,
    height: usize,
  ) -> Result<NodePtr, Error> {
    let nd = Node::new_node_ptr(&self.arena, height)?;

    // Try to increase the height via CAS. Losing the race to a taller insert is fine.
    let backoff = Backoff::new();
    let mut list_height = self.height();
    while height as u32 > list_height {
      match self.height.compare_exchange_weak(
        list_height,
        height as u32,
        Ordering::SeqCst,
        Ordering::Acquire,
      ) {
        Ok(_) => {
          #[cfg(feature = "tracing")]
          tracing::debug!(from = list_height, to = height, "raise skiplist height");
          break;
        }
        Err(h) => {
          list_height = h;
          backoff.spin();
        }
      }
    }

    let (key_offset, key_size) = self.alloc_key(key)?;
    let value = self.alloc_value(value, meta)?;
    // Safety: the node is not linked yet.
    unsafe { nd.init(key_offset, key_size, value) };
    Ok(nd)
  }

  fn alloc_key(&self, key: &[u8]) -> Result<(u32, u32), ArenaError> {
    assert!(key.len() <= u32::MAX as usize, "key is too large");
    let key_size = key.len() as u32;

    let key_offset = self.arena.allocate(key_size, 0, Align::One)?;
    // Safety: the range was just allocated, nobody else can see it.
    unsafe {
      self
        .arena
        .bytes_at_mut(key_offset, key_size)
        .copy_from_slice(key);
    }
    Ok((key_offset, key_size))
  }

  pub(crate) fn alloc_value(&self, value: &[u8], meta: u16) -> Result<u64, ArenaError> {
    assert!(value.len() <= u16::MAX as usize, "value is too large");
    let value_size = value.len() as u16;

    let value_offset = self.arena.allocate(value_size as u32, 0, Align::One)?;
    // Safety: the range was just allocated, nobody else can see it.
    unsafe {
      self
        .arena
        .bytes_at_mut(value_offset, value_size as u32)
        .copy_from_slice(value);
    }
    Ok(encode_value(value_offset, value_size, meta))
  }

  /// Brings a deleted node back with `value`, or reports that the key exists.
  fn revive(&self, nd: NodePtr, value: u64) -> Result<(), Error> {
    match nd
      .value()
      .compare_exchange(DELETED, value, Ordering::SeqCst, Ordering::Acquire)
    {
      Ok(_) => Ok(()),
      Err(_) => Err(Error::RecordExists),
    }
  }

  /// Fills `spl` with the splice of `key` at every level below the list height,
  /// searching from the top level down. Returns the node holding `key` if one exists.
  fn find_splice(&self, key: &[u8], spl: &mut [Splice; MAX_HEIGHT]) -> Option<NodePtr> {
    let list_height = self.height() as usize;
    let mut prev = self.head;

    for level in (0..list_height).rev() {
      let (p, next, found) = self.find_splice_for_level(key, level, prev);
      if found {
        return Some(next);
      }
      spl[level] = Splice { prev: p, next };
      prev = p;
    }

    None
  }

  /// Walks right from `start` at `level` until the next node is the tail or
  /// has a key not less than `key`.
  ///
  /// `start` must be the head or a node whose key is less than `key`.
  pub(crate) fn find_splice_for_level(
    &self,
    key: &[u8],
    level: usize,
    start: NodePtr,
  ) -> (NodePtr, NodePtr, bool) {
    let mut prev = start;

    loop {
      // Assume prev.key < key.
      let next = self.get_next(prev, level);
      if next == self.tail {
        // Tail node, so done.
        return (prev, next, false);
      }

      match key.cmp(next.key(&self.arena)) {
        cmp::Ordering::Equal => return (prev, next, true),
        // We are done for this level, since prev.key < key < next.key.
        cmp::Ordering::Less => return (prev, next, false),
        // Keep moving right on this level.
        cmp::Ordering::Greater => prev = next,
      }
    }
  }

  /// Returns the node holding `key`, deleted or not.
  fn find(&self, key: &[u8]) -> Option<NodePtr> {
    let mut prev = self.head;
    for level in (0..self.height() as usize).rev() {
      let (p, next, found) = self.find_splice_for_level(key, level, prev);
      if found {
        return Some(next);
      }
      prev = p;
    }
    None
  }

  /// Returns the base level splice of `key`.
  pub(crate) fn find_near(&self, key: &[u8]) -> (NodePtr, NodePtr, bool) {
    let mut prev = self.head;
    for level in (1..self.height() as usize).rev() {
      let (p, _, _) = self.find_splice_for_level(key, level, prev);
      prev = p;
    }
    self.find_splice_for_level(key, 0, prev)
  }

  #[inline]
  pub(crate) fn get_next(&self, nd: NodePtr, level: usize) -> NodePtr {
    let offset = nd.next_offset(level);
    // Safety: links only ever hold offsets of nodes allocated by this skiplist.
    NodePtr::new(unsafe { self.arena.raw_at::<Node>(offset) }, offset)
  }

  #[inline]
  pub(crate) fn get_prev(&self, nd: NodePtr, level: usize) -> NodePtr {
    let offset = nd.prev_offset(level);
    // Safety: links only ever hold offsets of nodes allocated by this skiplist.
    NodePtr::new(unsafe { self.arena.raw_at::<Node>(offset) }, offset)
  }

  /// Returns the first live node after `nd` at the base level and its value word,
  /// or the tail.
  pub(crate) fn next_live(&self, mut nd: NodePtr) -> (NodePtr, u64) {
    loop {
      nd = self.get_next(nd, 0);
      if nd == self.tail {
        return (nd, DELETED);
      }
      let value = nd.value().load(Ordering::Acquire);
      if value != DELETED {
        return (nd, value);
      }
    }
  }

  /// Returns the first live node before `nd` at the base level and its value word,
  /// or the head.
  pub(crate) fn prev_live(&self, mut nd: NodePtr) -> (NodePtr, u64) {
    loop {
      nd = self.get_prev(nd, 0);
      if nd == self.head {
        return (nd, DELETED);
      }
      let value = nd.value().load(Ordering::Acquire);
      if value != DELETED {
        return (nd, value);
      }
    }
  }

  #[inline]
  pub(crate) fn value_bytes(&self, value: u64) -> &[u8] {
    let (offset, size) = decode_value(value);
    self.arena.bytes_at(offset, size as u32)
  }

  #[inline]
  pub(crate) const fn head(&self) -> NodePtr {
    self.head
  }

  #[inline]
  pub(crate) const fn tail(&self) -> NodePtr {
    self.tail
  }
}
