// File: src/table.rs
//
// Open-addressed hash table keyed by interned string handles. Used for
// globals, class method tables, and instance field tables. Capacity is
// always a power of two, so probing uses `hash & (capacity - 1)` rather
// than a general modulus (see the Open Question in DESIGN.md).

use crate::object::ObjHandle;

const MAX_LOAD_FACTOR: f64 = 0.75;
const INITIAL_CAPACITY: usize = 8;

#[derive(Clone)]
enum Slot<V> {
    Empty,
    Tombstone,
    Occupied { key: ObjHandle, hash: u32, value: V },
}

/// A generic string-keyed hash table. `V` is `Value` for every use in
/// this crate, but the table itself carries no language-specific
/// behaviour.
#[derive(Clone)]
pub struct Table<V> {
    entries: Vec<Slot<V>>,
    /// Occupied + tombstone count, used to decide when to grow.
    count: usize,
}

impl<V: Clone> Default for Table<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> Table<V> {
    pub fn new() -> Self {
        Self { entries: Vec::new(), count: 0 }
    }

    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|s| matches!(s, Slot::Occupied { .. }))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: ObjHandle, hash: u32) -> Option<&V> {
        if self.entries.is_empty() {
            return None;
        }
        let index = self.find_entry(&self.entries, key, hash)?;
        match &self.entries[index] {
            Slot::Occupied { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Inserts or overwrites a key. Returns `true` if this created a new
    /// entry (as opposed to overwriting an existing one).
    pub fn set(&mut self, key: ObjHandle, hash: u32, value: V) -> bool {
        if self.entries.is_empty() || (self.count + 1) as f64 > self.capacity() as f64 * MAX_LOAD_FACTOR {
            self.grow();
        }
        let index = self
            .find_entry(&self.entries, key, hash)
            .expect("table probe must find a slot after growth");
        let is_new = !matches!(self.entries[index], Slot::Occupied { .. });
        if is_new && !matches!(self.entries[index], Slot::Tombstone) {
            self.count += 1;
        }
        self.entries[index] = Slot::Occupied { key, hash, value };
        is_new
    }

    /// Removes a key, leaving a tombstone so later probes still find keys
    /// that collided with it.
    pub fn delete(&mut self, key: ObjHandle, hash: u32) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        match self.find_entry(&self.entries, key, hash) {
            Some(index) if matches!(self.entries[index], Slot::Occupied { .. }) => {
                self.entries[index] = Slot::Tombstone;
                true
            }
            _ => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjHandle, &V)> {
        self.entries.iter().filter_map(|slot| match slot {
            Slot::Occupied { key, value, .. } => Some((*key, value)),
            _ => None,
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ObjHandle, &mut V)> {
        self.entries.iter_mut().filter_map(|slot| match slot {
            Slot::Occupied { key, value, .. } => Some((*key, value)),
            _ => None,
        })
    }

    /// Bulk-copies every entry of `other` into `self`, used by `INHERIT`
    /// to copy a superclass's method table into a subclass at
    /// class-definition time.
    pub fn copy_from(&mut self, other: &Table<V>) {
        for (key, value) in other.iter() {
            self.set(key, other.hash_of(key).unwrap_or(0), value.clone());
        }
    }

    fn hash_of(&self, key: ObjHandle) -> Option<u32> {
        self.entries.iter().find_map(|slot| match slot {
            Slot::Occupied { key: k, hash, .. } if *k == key => Some(*hash),
            _ => None,
        })
    }

    fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn find_entry(&self, entries: &[Slot<V>], key: ObjHandle, hash: u32) -> Option<usize> {
        if entries.is_empty() {
            return None;
        }
        let capacity = entries.len();
        let mut index = (hash as usize) & (capacity - 1);
        let mut first_tombstone: Option<usize> = None;
        loop {
            match &entries[index] {
                Slot::Empty => return Some(first_tombstone.unwrap_or(index)),
                Slot::Tombstone => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(index);
                    }
                }
                Slot::Occupied { key: k, .. } if *k == key => return Some(index),
                Slot::Occupied { .. } => {}
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    fn grow(&mut self) {
        let new_capacity = if self.entries.is_empty() { INITIAL_CAPACITY } else { self.entries.len() * 2 };
        let mut new_entries = vec![Slot::Empty; new_capacity];
        let mut new_count = 0;
        for slot in self.entries.drain(..) {
            if let Slot::Occupied { key, hash, value } = slot {
                let index = Self::probe_for_insert(&new_entries, key, hash, new_capacity);
                new_entries[index] = Slot::Occupied { key, hash, value };
                new_count += 1;
            }
        }
        self.entries = new_entries;
        self.count = new_count;
    }

    fn probe_for_insert(entries: &[Slot<V>], key: ObjHandle, hash: u32, capacity: usize) -> usize {
        let mut index = (hash as usize) & (capacity - 1);
        loop {
            match &entries[index] {
                Slot::Empty => return index,
                Slot::Occupied { key: k, .. } if *k == key => return index,
                _ => index = (index + 1) & (capacity - 1),
            }
        }
    }
}
