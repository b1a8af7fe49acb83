//! Fixed-capacity slot tables.
//!
//! A `SlotTable` is an array of optional records sized once at construction.
//! Allocation follows a two-pass discipline: reuse the slot whose record has
//! the same key, else claim the first free slot, else fail. Slots are never
//! compacted; freeing a record leaves a hole that a later insert reuses.

use alloc::vec::Vec;

/// Records stored in a [`SlotTable`] are identified by a key.
pub trait Keyed {
    type Key: PartialEq + Copy;

    fn key(&self) -> Self::Key;
}

/// Returned when no slot is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableFull;

/// Fixed array of optional records.
#[derive(Debug, Clone)]
pub struct SlotTable<T> {
    slots: Vec<Option<T>>,
}

impl<T: Keyed> SlotTable<T> {
    /// Allocate `capacity` free slots. The table never grows past this.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_none())
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(|s| s.is_some())
    }

    /// Slot index of the record with `key`.
    pub fn position(&self, key: T::Key) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|r| r.key() == key))
    }

    pub fn get(&self, key: T::Key) -> Option<&T> {
        self.iter().find(|r| r.key() == key)
    }

    pub fn get_mut(&mut self, key: T::Key) -> Option<&mut T> {
        self.iter_mut().find(|r| r.key() == key)
    }

    pub fn contains(&self, key: T::Key) -> bool {
        self.position(key).is_some()
    }

    /// Record in slot `index`, if occupied.
    pub fn slot(&self, index: usize) -> Option<&T> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn slot_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    /// Store `record`, replacing any record with the same key.
    ///
    /// Returns the slot index used.
    pub fn insert(&mut self, record: T) -> Result<usize, TableFull> {
        let index = match self.position(record.key()) {
            Some(index) => index,
            None => self.free_slot()?,
        };
        self.slots[index] = Some(record);
        Ok(index)
    }

    /// Update the record with `key` in place, or create one in a free slot.
    pub fn upsert(
        &mut self,
        key: T::Key,
        update: impl FnOnce(&mut T),
        create: impl FnOnce() -> T,
    ) -> Result<usize, TableFull> {
        if let Some(index) = self.position(key) {
            if let Some(record) = self.slots[index].as_mut() {
                update(record);
            }
            return Ok(index);
        }
        let index = self.free_slot()?;
        self.slots[index] = Some(create());
        Ok(index)
    }

    /// Free the slot holding `key`.
    pub fn remove(&mut self, key: T::Key) -> Option<T> {
        let index = self.position(key)?;
        self.slots[index].take()
    }

    /// Free slot `index`.
    pub fn take_slot(&mut self, index: usize) -> Option<T> {
        self.slots.get_mut(index).and_then(Option::take)
    }

    /// Keep only the records for which `keep` returns true.
    ///
    /// Returns how many records were freed.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) -> usize {
        let mut freed = 0;
        for slot in self.slots.iter_mut() {
            if slot.as_ref().is_some_and(|r| !keep(r)) {
                *slot = None;
                freed += 1;
            }
        }
        freed
    }

    /// Free every slot.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
    }

    /// Occupied records in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().filter_map(Option::as_mut)
    }

    /// Indices of occupied slots, for sweeps that need `&mut self` elsewhere.
    pub fn occupied(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i))
    }

    fn free_slot(&self) -> Result<usize, TableFull> {
        self.slots.iter().position(Option::is_none).ok_or(TableFull)
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Entry {
        id: u8,
        value: u32,
    }

    impl Keyed for Entry {
        type Key = u8;

        fn key(&self) -> u8 {
            self.id
        }
    }

    fn entry(id: u8, value: u32) -> Entry {
        Entry { id, value }
    }

    #[test]
    fn test_insert_reuses_matching_key() {
        let mut table = SlotTable::with_capacity(2);
        assert_eq!(table.insert(entry(1, 10)), Ok(0));
        assert_eq!(table.insert(entry(1, 11)), Ok(0));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(1).map(|e| e.value), Some(11));
    }

    #[test]
    fn test_full_table_leaves_entries_untouched() {
        let mut table = SlotTable::with_capacity(2);
        table.insert(entry(1, 10)).unwrap();
        table.insert(entry(2, 20)).unwrap();
        assert!(table.is_full());

        assert_eq!(table.insert(entry(3, 30)), Err(TableFull));
        assert_eq!(table.get(1), Some(&entry(1, 10)));
        assert_eq!(table.get(2), Some(&entry(2, 20)));

        // A matching key still updates in a full table.
        assert_eq!(table.insert(entry(2, 21)), Ok(1));
    }

    #[test]
    fn test_freed_slot_reused_without_compaction() {
        let mut table = SlotTable::with_capacity(3);
        table.insert(entry(1, 10)).unwrap();
        table.insert(entry(2, 20)).unwrap();
        table.insert(entry(3, 30)).unwrap();

        assert_eq!(table.remove(1), Some(entry(1, 10)));
        assert_eq!(table.position(3), Some(2), "Slots must not shift");
        assert_eq!(table.insert(entry(4, 40)), Ok(0));
    }

    #[test]
    fn test_upsert_updates_or_creates() {
        let mut table = SlotTable::with_capacity(1);
        table.upsert(5, |e: &mut Entry| e.value += 1, || entry(5, 0)).unwrap();
        table.upsert(5, |e: &mut Entry| e.value += 1, || entry(5, 0)).unwrap();
        assert_eq!(table.get(5).map(|e| e.value), Some(1));
        assert_eq!(
            table.upsert(6, |_| {}, || entry(6, 0)),
            Err(TableFull),
            "Should fail when no slot is free"
        );
    }

    #[test]
    fn test_retain_counts_freed() {
        let mut table = SlotTable::with_capacity(4);
        for id in 0..4 {
            table.insert(entry(id, id as u32)).unwrap();
        }
        assert_eq!(table.retain(|e| e.value % 2 == 0), 2);
        assert_eq!(table.len(), 2);
        assert_eq!(table.occupied().collect::<Vec<_>>(), vec![0, 2]);
    }
}
