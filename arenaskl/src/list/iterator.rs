use core::sync::atomic::Ordering;

use super::SkipList;
use crate::{
  error::Error,
  node::{decode_meta, decode_value, encode_value, NodePtr, DELETED},
};

/// A live entry of the skiplist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry<'a> {
  key: &'a [u8],
  value: &'a [u8],
  meta: u16,
}

impl<'a> Entry<'a> {
  #[inline]
  fn new(list: &'a SkipList, nd: NodePtr, value: u64) -> Self {
    Self {
      key: nd.key(list.arena()),
      value: list.value_bytes(value),
      meta: decode_meta(value),
    }
  }

  /// Returns the key of the entry.
  #[inline]
  pub const fn key(&self) -> &'a [u8] {
    self.key
  }

  /// Returns the value of the entry.
  #[inline]
  pub const fn value(&self) -> &'a [u8] {
    self.value
  }

  /// Returns the meta of the entry.
  #[inline]
  pub const fn meta(&self) -> u16 {
    self.meta
  }
}

/// A double-ended iterator over the live entries of a [`SkipList`], in key order.
///
/// Entries inserted while iterating may or may not be observed, depending on
/// where they land relative to the iterator. Entries linked before the iterator
/// passed their position are never skipped going forward. The two ends never cross.
pub struct Iter<'a> {
  list: &'a SkipList,
  front: NodePtr,
  back: NodePtr,
  done: bool,
}

impl<'a> Iter<'a> {
  #[inline]
  pub(super) fn new(list: &'a SkipList) -> Self {
    Self {
      list,
      front: list.head(),
      back: list.tail(),
      done: false,
    }
  }

  /// Returns `true` if `nd` has reached or passed the node last yielded from the back.
  #[inline]
  fn reached_back(&self, nd: NodePtr) -> bool {
    if nd == self.list.tail() || nd == self.back {
      return true;
    }
    self.back != self.list.tail()
      && nd.key(self.list.arena()) >= self.back.key(self.list.arena())
  }

  /// Returns `true` if `nd` has reached or passed the node last yielded from the front.
  #[inline]
  fn reached_front(&self, nd: NodePtr) -> bool {
    if nd == self.list.head() || nd == self.front {
      return true;
    }
    self.front != self.list.head()
      && nd.key(self.list.arena()) <= self.front.key(self.list.arena())
  }
}

impl<'a> Iterator for Iter<'a> {
  type Item = Entry<'a>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.done {
      return None;
    }

    let (nd, value) = self.list.next_live(self.front);
    if self.reached_back(nd) {
      self.done = true;
      return None;
    }

    self.front = nd;
    Some(Entry::new(self.list, nd, value))
  }
}

impl DoubleEndedIterator for Iter<'_> {
  fn next_back(&mut self) -> Option<Self::Item> {
    if self.done {
      return None;
    }

    let (nd, value) = self.list.prev_live(self.back);
    if self.reached_front(nd) {
      self.done = true;
      return None;
    }

    self.back = nd;
    Some(Entry::new(self.list, nd, value))
  }
}

impl core::iter::FusedIterator for Iter<'_> {}

/// A cursor over a [`SkipList`], which can seek, move in both directions, and
/// change the value of the entry it is positioned at.
///
/// The cursor remembers the value word it observed when it moved to an entry.
/// [`Cursor::set`], [`Cursor::set_meta`] and [`Cursor::delete`] only succeed if
/// nobody changed the entry since then.
pub struct Cursor<'a> {
  list: &'a SkipList,
  nd: NodePtr,
  value: u64,
}

impl<'a> Cursor<'a> {
  #[inline]
  pub(super) fn new(list: &'a SkipList) -> Self {
    Self {
      list,
      nd: list.head(),
      value: DELETED,
    }
  }

  /// Returns `true` if the cursor is positioned at an entry.
  #[inline]
  pub fn valid(&self) -> bool {
    self.nd != self.list.head() && self.nd != self.list.tail()
  }

  /// Returns the entry at the cursor, or `None` if the cursor is not positioned
  /// at an entry, or the entry has been deleted through this cursor.
  #[inline]
  pub fn entry(&self) -> Option<Entry<'a>> {
    if !self.valid() || self.value == DELETED {
      return None;
    }
    Some(Entry::new(self.list, self.nd, self.value))
  }

  /// Returns the key at the cursor.
  #[inline]
  pub fn key(&self) -> Option<&'a [u8]> {
    if !self.valid() {
      return None;
    }
    Some(self.nd.key(self.list.arena()))
  }

  /// Moves to the first live entry.
  #[inline]
  pub fn seek_first(&mut self) -> Option<Entry<'a>> {
    self.set_position(self.list.next_live(self.list.head()))
  }

  /// Moves to the last live entry.
  #[inline]
  pub fn seek_last(&mut self) -> Option<Entry<'a>> {
    self.set_position(self.list.prev_live(self.list.tail()))
  }

  /// Moves to the first live entry whose key is greater than or equal to `key`.
  pub fn seek_ge(&mut self, key: &[u8]) -> Option<Entry<'a>> {
    let (_, next, _) = self.list.find_near(key);
    if next == self.list.tail() {
      return self.set_position((next, DELETED));
    }

    let value = next.value().load(Ordering::Acquire);
    if value == DELETED {
      return self.set_position(self.list.next_live(next));
    }
    self.set_position((next, value))
  }

  /// Moves to the last live entry whose key is less than or equal to `key`.
  pub fn seek_le(&mut self, key: &[u8]) -> Option<Entry<'a>> {
    let (prev, next, found) = self.list.find_near(key);
    let nd = if found { next } else { prev };
    if nd == self.list.head() {
      return self.set_position((nd, DELETED));
    }

    let value = nd.value().load(Ordering::Acquire);
    if value == DELETED {
      return self.set_position(self.list.prev_live(nd));
    }
    self.set_position((nd, value))
  }

  /// Moves to the next live entry. From before the first entry this is the
  /// first entry; past the last entry the cursor stays put.
  #[allow(clippy::should_implement_trait)]
  #[inline]
  pub fn next(&mut self) -> Option<Entry<'a>> {
    if self.nd == self.list.tail() {
      return None;
    }
    self.set_position(self.list.next_live(self.nd))
  }

  /// Moves to the previous live entry. From past the last entry this is the
  /// last entry; before the first entry the cursor stays put.
  #[inline]
  pub fn prev(&mut self) -> Option<Entry<'a>> {
    if self.nd == self.list.head() {
      return None;
    }
    self.set_position(self.list.prev_live(self.nd))
  }

  /// Replaces the value and meta of the entry at the cursor.
  ///
  /// Returns [`Error::RecordUpdated`] if another caller changed the entry since the
  /// cursor observed it, or [`Error::RecordDeleted`] if it is deleted. In both
  /// cases the cursor observes the current state, so the call can be retried,
  /// and it succeeds once an insert has brought a deleted key back.
  ///
  /// # Panics
  /// - If the cursor is not positioned at an entry.
  /// - If the value is longer than `u16::MAX` bytes.
  pub fn set(&mut self, value: &[u8], meta: u16) -> Result<(), Error> {
    assert!(self.valid(), "cursor is not positioned at an entry");
    self.reload_if_deleted()?;

    let new = self.list.alloc_value(value, meta)?;
    self.swap_value(new)
  }

  /// Replaces the meta of the entry at the cursor, keeping its value.
  ///
  /// Fails the same way as [`Cursor::set`].
  ///
  /// # Panics
  /// - If the cursor is not positioned at an entry.
  pub fn set_meta(&mut self, meta: u16) -> Result<(), Error> {
    assert!(self.valid(), "cursor is not positioned at an entry");
    self.reload_if_deleted()?;

    let (offset, size) = decode_value(self.value);
    self.swap_value(encode_value(offset, size, meta))
  }

  /// Marks the entry at the cursor as deleted. The node stays linked, readers and
  /// iterators skip it, and a later insert of the same key brings it back.
  ///
  /// Fails the same way as [`Cursor::set`].
  ///
  /// # Panics
  /// - If the cursor is not positioned at an entry.
  pub fn delete(&mut self) -> Result<(), Error> {
    assert!(self.valid(), "cursor is not positioned at an entry");
    self.reload_if_deleted()?;

    self.swap_value(DELETED)
  }

  /// A deleted entry may have been brought back by an insert since the cursor
  /// last looked at it.
  fn reload_if_deleted(&mut self) -> Result<(), Error> {
    if self.value == DELETED {
      self.value = self.nd.value().load(Ordering::Acquire);
      if self.value == DELETED {
        return Err(Error::RecordDeleted);
      }
    }
    Ok(())
  }

  fn swap_value(&mut self, new: u64) -> Result<(), Error> {
    match self
      .nd
      .value()
      .compare_exchange(self.value, new, Ordering::SeqCst, Ordering::Acquire)
    {
      Ok(_) => {
        self.value = new;
        Ok(())
      }
      Err(current) => {
        self.value = current;
        if current == DELETED {
          Err(Error::RecordDeleted)
        } else {
          Err(Error::RecordUpdated)
        }
      }
    }
  }

  #[inline]
  fn set_position(&mut self, (nd, value): (NodePtr, u64)) -> Option<Entry<'a>> {
    self.nd = nd;
    self.value = value;
    self.entry()
  }
}
