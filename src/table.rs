//! An open-addressing hash table with linear probing and tombstone deletion.
//!
//! Lox uses this both for global variables and for the string-intern set. The
//! table deliberately does **not** use [std::collections::HashMap]: the
//! deletion/resize interplay (tombstones, the 0.75 load factor, the count
//! bookkeeping) is observable behaviour this crate relies on, and keys carry
//! their own precomputed hashes.

use crate::value::Value;

/// A key usable in a [Table].
///
/// Keys are small `Copy` handles that compare by identity and know their own
/// hash. String keys get this for free from interning: there is exactly one
/// handle per distinct content, so identity comparison is content comparison.
pub trait TableKey: Copy + PartialEq {
    /// The precomputed hash of this key.
    fn key_hash(&self) -> u32;
}

/// A hash table mapping keys to [Value]s.
///
/// Capacity is always zero or a power of two. The probe sequence starts at
/// `hash % capacity` and steps linearly, wrapping around.
#[derive(Debug, Clone)]
pub struct Table<K: TableKey> {
    /// Occupied slots **plus tombstones**. Tombstones keep counting towards
    /// the load factor so that probe chains stay bounded.
    count: usize,
    slots: Vec<Slot<K>>,
}

/// One slot in the table.
///
/// A tombstone marks a deleted entry. It is distinct from a never-used slot
/// so that probing can continue past it: some other key may have collided
/// through this slot on its way in.
#[derive(Debug, Clone)]
enum Slot<K> {
    Empty,
    Tombstone,
    Occupied { key: K, value: Value },
}

/// When the table would exceed this fraction of its capacity, it grows.
const MAX_LOAD_NUMERATOR: usize = 3;
const MAX_LOAD_DENOMINATOR: usize = 4;

/// The capacity used for the very first insertion.
const MIN_CAPACITY: usize = 8;

///////////////////////////////////////// Implementation //////////////////////////////////////////

impl<K: TableKey> Table<K> {
    /// Returns a new, empty table. No storage is allocated until the first
    /// insertion.
    pub fn new() -> Self {
        Table {
            count: 0,
            slots: Vec::new(),
        }
    }

    /// Looks up the value stored under `key`.
    pub fn get(&self, key: K) -> Option<Value> {
        if self.slots.is_empty() {
            return None;
        }

        match self.slots[find_slot(&self.slots, key)] {
            Slot::Occupied { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Inserts or overwrites the value stored under `key`.
    ///
    /// Returns true if `key` was not already present.
    pub fn set(&mut self, key: K, value: Value) -> bool {
        if (self.count + 1) * MAX_LOAD_DENOMINATOR > self.slots.len() * MAX_LOAD_NUMERATOR {
            self.grow();
        }

        let index = find_slot(&self.slots, key);
        let slot = &mut self.slots[index];

        let is_new_key = !matches!(slot, Slot::Occupied { .. });
        // Claiming a tombstone does not bump the count: the tombstone was
        // already counted when its original key went in.
        if matches!(slot, Slot::Empty) {
            self.count += 1;
        }

        *slot = Slot::Occupied { key, value };
        is_new_key
    }

    /// Removes `key` from the table. Returns true if it was present.
    ///
    /// The slot becomes a tombstone rather than going back to empty, which
    /// preserves the probe chains of any keys that collided through it.
    pub fn delete(&mut self, key: K) -> bool {
        if self.slots.is_empty() {
            return false;
        }

        let index = find_slot(&self.slots, key);
        match self.slots[index] {
            Slot::Occupied { .. } => {
                self.slots[index] = Slot::Tombstone;
                true
            }
            _ => false,
        }
    }

    /// Copies every live entry of `from` into this table.
    pub fn add_all(&mut self, from: &Table<K>) {
        for (key, value) in from.iter() {
            self.set(key, value);
        }
    }

    /// Probes for a key by *content* rather than identity.
    ///
    /// This is the one operation interning needs before a handle exists: the
    /// caller supplies the would-be key's hash and a predicate that compares
    /// candidate keys against the raw content.
    pub fn find_key(&self, hash: u32, mut matches_content: impl FnMut(K) -> bool) -> Option<K> {
        if self.slots.is_empty() {
            return None;
        }

        let capacity = self.slots.len();
        let mut index = hash as usize % capacity;
        loop {
            match self.slots[index] {
                Slot::Empty => return None,
                Slot::Tombstone => {}
                Slot::Occupied { key, .. } => {
                    if matches_content(key) {
                        return Some(key);
                    }
                }
            }
            index = (index + 1) % capacity;
        }
    }

    /// Iterates over the live entries, in table order.
    pub fn iter(&self) -> impl Iterator<Item = (K, Value)> + '_ {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Occupied { key, value } => Some((*key, *value)),
            _ => None,
        })
    }

    /// Returns the number of live (non-tombstone) entries.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Returns true if the table holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Doubles the capacity and rehashes every live entry. Tombstones are
    /// dropped here, so the count comes back down to the live entry count.
    fn grow(&mut self) {
        let capacity = if self.slots.is_empty() {
            MIN_CAPACITY
        } else {
            self.slots.len() * 2
        };

        let old = std::mem::replace(&mut self.slots, vec![Slot::Empty; capacity]);

        self.count = 0;
        for slot in old {
            if let Slot::Occupied { key, value } = slot {
                let index = find_slot(&self.slots, key);
                self.slots[index] = Slot::Occupied { key, value };
                self.count += 1;
            }
        }
    }
}

impl<K: TableKey> Default for Table<K> {
    fn default() -> Self {
        Table::new()
    }
}

/// Returns the index of the slot `key` lives in, or, if absent, the slot a
/// new entry for `key` should claim: the first tombstone passed, if any,
/// otherwise the terminating empty slot.
///
/// The load factor guarantees at least one empty slot, so this terminates.
fn find_slot<K: TableKey>(slots: &[Slot<K>], key: K) -> usize {
    let capacity = slots.len();
    let mut index = key.key_hash() as usize % capacity;
    let mut tombstone = None;

    loop {
        match slots[index] {
            Slot::Empty => return tombstone.unwrap_or(index),
            Slot::Tombstone => {
                if tombstone.is_none() {
                    tombstone = Some(index);
                }
            }
            Slot::Occupied { key: existing, .. } => {
                if existing == key {
                    return index;
                }
            }
        }
        index = (index + 1) % capacity;
    }
}

////////////////////////////////////////////// Tests //////////////////////////////////////////////

#[cfg(test)]
mod test {
    use super::*;

    /// A key with a controllable hash, so tests can force collisions.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    struct TestKey {
        id: u32,
        hash: u32,
    }

    impl TableKey for TestKey {
        fn key_hash(&self) -> u32 {
            self.hash
        }
    }

    fn key(id: u32) -> TestKey {
        TestKey { id, hash: id }
    }

    /// Keys that all land on the same probe start.
    fn colliding_key(id: u32) -> TestKey {
        TestKey { id, hash: 0 }
    }

    #[test]
    fn get_from_empty_table() {
        let table: Table<TestKey> = Table::new();
        assert_eq!(None, table.get(key(1)));
    }

    #[test]
    fn set_then_get() {
        let mut table = Table::new();
        assert!(table.set(key(1), Value::Number(10.0)));
        assert!(table.set(key(2), Value::Number(20.0)));

        // Overwriting is not a new key.
        assert!(!table.set(key(1), Value::Number(11.0)));

        assert_eq!(Some(Value::Number(11.0)), table.get(key(1)));
        assert_eq!(Some(Value::Number(20.0)), table.get(key(2)));
        assert_eq!(None, table.get(key(3)));
        assert_eq!(2, table.len());
    }

    #[test]
    fn delete_then_reinsert_reuses_tombstone() {
        let mut table = Table::new();
        table.set(key(1), Value::Number(1.0));
        let count_before = table.count;

        assert!(table.delete(key(1)));
        assert!(!table.delete(key(1)));
        assert_eq!(None, table.get(key(1)));

        // Re-inserting claims the tombstone and reports a new key, without
        // inflating the load-factor count.
        assert!(table.set(key(1), Value::Number(2.0)));
        assert_eq!(Some(Value::Number(2.0)), table.get(key(1)));
        assert_eq!(count_before, table.count);
    }

    #[test]
    fn probing_continues_past_tombstones() {
        let mut table = Table::new();

        // All three keys hash to the same slot, forming one probe chain.
        table.set(colliding_key(1), Value::Number(1.0));
        table.set(colliding_key(2), Value::Number(2.0));
        table.set(colliding_key(3), Value::Number(3.0));

        // Deleting the middle of the chain must not strand the tail.
        assert!(table.delete(colliding_key(2)));
        assert_eq!(Some(Value::Number(3.0)), table.get(colliding_key(3)));
        assert_eq!(Some(Value::Number(1.0)), table.get(colliding_key(1)));
        assert_eq!(None, table.get(colliding_key(2)));
    }

    #[test]
    fn growth_preserves_every_live_key() {
        let mut table = Table::new();

        // Push well past the 0.75 load factor several times over.
        for i in 0..100 {
            table.set(key(i), Value::Number(i as f64));
        }

        assert_eq!(100, table.len());
        for i in 0..100 {
            assert_eq!(Some(Value::Number(i as f64)), table.get(key(i)));
        }

        // Capacity stayed a power of two.
        assert!(table.slots.len().is_power_of_two());
    }

    #[test]
    fn growth_drops_tombstones() {
        let mut table = Table::new();
        for i in 0..6 {
            table.set(key(i), Value::Nil);
        }
        for i in 0..6 {
            table.delete(key(i));
        }
        table.set(key(100), Value::Nil);

        // Force a grow; afterwards only live entries are counted.
        for i in 200..210 {
            table.set(key(i), Value::Nil);
        }
        assert_eq!(11, table.len());
        assert_eq!(11, table.count);
    }

    #[test]
    fn find_key_compares_by_content() {
        let mut table = Table::new();
        table.set(key(7), Value::Nil);
        table.set(key(8), Value::Nil);

        let found = table.find_key(7, |k| k.id == 7);
        assert_eq!(Some(key(7)), found);

        // Same hash, failing predicate: not found.
        assert_eq!(None, table.find_key(7, |k| k.id == 9));
        // Never-inserted hash: not found.
        assert_eq!(None, table.find_key(999, |k| k.hash == 999));
    }

    #[test]
    fn add_all_copies_live_entries() {
        let mut from = Table::new();
        from.set(key(1), Value::Number(1.0));
        from.set(key(2), Value::Number(2.0));
        from.delete(key(2));

        let mut to = Table::new();
        to.set(key(3), Value::Number(3.0));
        to.add_all(&from);

        assert_eq!(2, to.len());
        assert_eq!(Some(Value::Number(1.0)), to.get(key(1)));
        assert_eq!(None, to.get(key(2)));
        assert_eq!(Some(Value::Number(3.0)), to.get(key(3)));
    }
}
