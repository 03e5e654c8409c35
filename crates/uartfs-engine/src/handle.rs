use std::collections::HashMap;

use uartfs_message::Handle;

use crate::adapter::{FsError, FsResult};

/// Fixed-capacity arena of open objects keyed by wire handles.
///
/// Ids are handed out in increasing order, wrapping and skipping 0 and ids
/// still in use, so a handle from an earlier session is not reissued soon
/// after it was released.
#[derive(Debug)]
pub struct HandleTable<T> {
    slots: Vec<Option<(Handle, T)>>,
    index: HashMap<Handle, usize>,
    free: Vec<usize>,
    next_id: u16,
}

impl<T> HandleTable<T> {
    /// A table holding at most `capacity` live entries (clamped to `1..=u16::MAX - 1`).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, u16::MAX as usize - 1);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            index: HashMap::with_capacity(capacity),
            free: (0..capacity).rev().collect(),
            next_id: 1,
        }
    }

    /// Store `value` and return its new handle, or `OutOfSpace` when full.
    pub fn insert(&mut self, value: T) -> FsResult<Handle> {
        let slot = self.free.pop().ok_or(FsError::OutOfSpace)?;
        let handle = self.next_free_id();
        self.slots[slot] = Some((handle, value));
        self.index.insert(handle, slot);
        Ok(handle)
    }

    pub fn get_mut(&mut self, handle: Handle) -> FsResult<&mut T> {
        let slot = *self.index.get(&handle).ok_or(FsError::InvalidHandle(handle))?;
        self.slots[slot]
            .as_mut()
            .map(|(_, value)| value)
            .ok_or(FsError::InvalidHandle(handle))
    }

    pub fn remove(&mut self, handle: Handle) -> FsResult<T> {
        let slot = self
            .index
            .remove(&handle)
            .ok_or(FsError::InvalidHandle(handle))?;
        self.free.push(slot);
        self.slots[slot]
            .take()
            .map(|(_, value)| value)
            .ok_or(FsError::InvalidHandle(handle))
    }

    /// Drop every entry; returns how many were live. Id allocation continues
    /// where it left off.
    pub fn clear(&mut self) -> usize {
        let live = self.index.len();
        for slot in self.index.drain().map(|(_, slot)| slot) {
            self.slots[slot] = None;
            self.free.push(slot);
        }
        live
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.free.is_empty()
    }

    fn next_free_id(&mut self) -> Handle {
        // Terminates: live entries are fewer than the 65535 usable ids.
        loop {
            let candidate = Handle(self.next_id);
            self.next_id = match self.next_id.wrapping_add(1) {
                0 => 1,
                next => next,
            };
            if !self.index.contains_key(&candidate) {
                return candidate;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_handle_is_one() {
        let mut table = HandleTable::new(4);
        assert_eq!(table.insert("a").unwrap(), Handle(1));
        assert_eq!(table.insert("b").unwrap(), Handle(2));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn released_ids_are_not_reused_immediately() {
        let mut table = HandleTable::new(4);
        let first = table.insert(1).unwrap();
        table.remove(first).unwrap();

        let second = table.insert(2).unwrap();
        assert_ne!(first, second);
        assert_eq!(table.get_mut(first), Err(FsError::InvalidHandle(first)));
        assert_eq!(*table.get_mut(second).unwrap(), 2);
    }

    #[test]
    fn capacity_is_enforced() {
        let mut table = HandleTable::new(2);
        table.insert(()).unwrap();
        table.insert(()).unwrap();
        assert!(table.is_full());
        assert_eq!(table.insert(()), Err(FsError::OutOfSpace));
    }

    #[test]
    fn remove_frees_a_slot() {
        let mut table = HandleTable::new(1);
        let handle = table.insert("x").unwrap();
        assert_eq!(table.remove(handle).unwrap(), "x");
        assert_eq!(table.remove(handle), Err(FsError::InvalidHandle(handle)));
        assert!(table.insert("y").is_ok());
    }

    #[test]
    fn clear_invalidates_everything() {
        let mut table = HandleTable::new(8);
        let handles: Vec<Handle> = (0..3).map(|i| table.insert(i).unwrap()).collect();

        assert_eq!(table.clear(), 3);
        assert!(table.is_empty());
        for handle in handles {
            assert!(table.get_mut(handle).is_err());
        }
        assert_eq!(table.insert(9).unwrap(), Handle(4));
    }

    #[test]
    fn ids_wrap_and_skip_zero_and_live() {
        let mut table = HandleTable::new(4);
        let kept = table.insert("kept").unwrap();
        assert_eq!(kept, Handle(1));
        table.next_id = u16::MAX;

        assert_eq!(table.insert("max").unwrap(), Handle(u16::MAX));
        // 0 is skipped and 1 is live.
        assert_eq!(table.insert("wrapped").unwrap(), Handle(2));
    }

    #[test]
    fn get_mut_updates_in_place() {
        let mut table = HandleTable::new(2);
        let handle = table.insert(10).unwrap();
        *table.get_mut(handle).unwrap() += 5;
        assert_eq!(*table.get_mut(handle).unwrap(), 15);
    }
}
