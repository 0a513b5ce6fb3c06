// An integer-keyed, string-valued hash table using open addressing with
// linear probing.
//
// Deleted entries leave a tombstone behind so that keys placed further along
// the same cluster remain reachable. Tombstones are reused by later
// insertions and dropped entirely whenever the table grows.
//
// The table grows by doubling whenever placing a key in a previously empty
// slot would bring (live + tombstones) / capacity to 3/4 or more.

use std::mem;

use crate::error::{Error, Result};

pub(crate) mod hash;

pub const DEFAULT_CAPACITY: usize = 16;

/// Key value that may never be stored. Files written by other implementations
/// of the on-disk format use it to mark deleted slots.
pub const RESERVED_KEY: i32 = i32::MIN;

const GROWTH_FACTOR: usize = 2;

// Load factor threshold of 3/4, kept as a ratio to stay in integer math.
const LOAD_NUMERATOR: usize = 3;
const LOAD_DENOMINATOR: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Empty,
    Occupied { key: i32, value: String },
    Tombstone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Probe {
    // The key lives at this index.
    Found(usize),
    // The key is absent; this is where it should go. Tombstones earlier in
    // the probe sequence win over the terminating empty slot.
    Vacant(usize),
    // Every slot was visited without finding the key or room for it.
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placed {
    Overwrote,
    FilledEmpty,
    ReusedTombstone,
}

fn probe(slots: &[Slot], key: i32) -> Probe {
    let capacity = slots.len();
    let start = hash::slot_index(key, capacity);
    let mut first_tombstone = None;

    for step in 0..capacity {
        let idx = (start + step) % capacity;
        match &slots[idx] {
            Slot::Empty => return Probe::Vacant(first_tombstone.unwrap_or(idx)),
            Slot::Tombstone => {
                if first_tombstone.is_none() {
                    first_tombstone = Some(idx);
                }
            }
            Slot::Occupied { key: k, .. } if *k == key => return Probe::Found(idx),
            Slot::Occupied { .. } => {}
        }
    }

    match first_tombstone {
        Some(idx) => Probe::Vacant(idx),
        None => Probe::Exhausted,
    }
}

// The single insertion path, shared by `Table::set` and `Table::resize`.
fn place(slots: &mut [Slot], key: i32, value: String) -> Result<(usize, Placed)> {
    match probe(slots, key) {
        Probe::Found(idx) => {
            slots[idx] = Slot::Occupied { key, value };
            Ok((idx, Placed::Overwrote))
        }
        Probe::Vacant(idx) => {
            let placed = match mem::replace(&mut slots[idx], Slot::Occupied { key, value }) {
                Slot::Tombstone => Placed::ReusedTombstone,
                _ => Placed::FilledEmpty,
            };
            Ok((idx, placed))
        }
        Probe::Exhausted => Err(Error::TableFull {
            capacity: slots.len(),
        }),
    }
}

fn alloc_slots(capacity: usize) -> Result<Vec<Slot>> {
    let mut slots = Vec::new();
    slots.try_reserve_exact(capacity)?;
    slots.resize_with(capacity, || Slot::Empty);
    Ok(slots)
}

fn copy_value(value: &str) -> Result<String> {
    let mut owned = String::new();
    owned.try_reserve_exact(value.len())?;
    owned.push_str(value);
    Ok(owned)
}

fn check_key(key: i32) -> Result<()> {
    if key == RESERVED_KEY {
        Err(Error::ReservedKey(key))
    } else {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Table {
    slots: Vec<Slot>,
    live: usize,
    tombstones: usize,
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

impl Table {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a table with `capacity` slots, or [`DEFAULT_CAPACITY`] if
    /// `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_CAPACITY
        } else {
            capacity
        };
        Table {
            slots: (0..capacity).map(|_| Slot::Empty).collect(),
            live: 0,
            tombstones: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn tombstones(&self) -> usize {
        self.tombstones
    }

    /// Fraction of slots that are occupied or tombstoned.
    pub fn load_factor(&self) -> f64 {
        (self.live + self.tombstones) as f64 / self.capacity() as f64
    }

    fn needs_growth(&self) -> bool {
        (self.live + self.tombstones + 1) * LOAD_DENOMINATOR >= self.capacity() * LOAD_NUMERATOR
    }

    fn find(&self, key: i32) -> Option<usize> {
        let capacity = self.capacity();
        let start = hash::slot_index(key, capacity);
        for step in 0..capacity {
            let idx = (start + step) % capacity;
            match &self.slots[idx] {
                Slot::Empty => return None,
                Slot::Occupied { key: k, .. } if *k == key => return Some(idx),
                // Keep going past tombstones: the key may have been placed
                // after the slot was freed.
                Slot::Occupied { .. } | Slot::Tombstone => {}
            }
        }
        None
    }

    /// Inserts `key`, or replaces its value if it is already present. The
    /// value is copied into storage owned by the table.
    ///
    /// On error the table is left exactly as it was.
    pub fn set(&mut self, key: i32, value: &str) -> Result<()> {
        check_key(key)?;
        let value = copy_value(value)?;

        match probe(&self.slots, key) {
            Probe::Found(idx) => {
                self.slots[idx] = Slot::Occupied { key, value };
                return Ok(());
            }
            // Reusing a tombstone does not raise the load factor, so there is
            // no need to grow first.
            Probe::Vacant(idx) if self.slots[idx] == Slot::Tombstone => {
                self.slots[idx] = Slot::Occupied { key, value };
                self.tombstones -= 1;
                self.live += 1;
                return Ok(());
            }
            Probe::Vacant(_) | Probe::Exhausted => {}
        }

        while self.needs_growth() {
            self.resize(self.capacity() * GROWTH_FACTOR)?;
        }

        match place(&mut self.slots, key, value)?.1 {
            Placed::Overwrote => {}
            Placed::FilledEmpty => self.live += 1,
            Placed::ReusedTombstone => {
                self.tombstones -= 1;
                self.live += 1;
            }
        }
        Ok(())
    }

    /// Returns the value stored for `key`, if any. The reference is only
    /// valid until the table is next mutated.
    pub fn get(&self, key: i32) -> Result<Option<&str>> {
        check_key(key)?;
        Ok(self.find(key).and_then(|idx| match &self.slots[idx] {
            Slot::Occupied { value, .. } => Some(value.as_str()),
            Slot::Empty | Slot::Tombstone => None,
        }))
    }

    pub fn contains_key(&self, key: i32) -> bool {
        key != RESERVED_KEY && self.find(key).is_some()
    }

    /// Removes `key`, returning the value it held.
    pub fn delete(&mut self, key: i32) -> Result<String> {
        check_key(key)?;
        let idx = self.find(key).ok_or(Error::KeyNotFound(key))?;
        match mem::replace(&mut self.slots[idx], Slot::Tombstone) {
            Slot::Occupied { value, .. } => {
                self.live -= 1;
                self.tombstones += 1;
                Ok(value)
            }
            other => {
                self.slots[idx] = other;
                Err(Error::KeyNotFound(key))
            }
        }
    }

    // Rebuilds the slot array at `new_capacity`, dropping all tombstones.
    //
    // Every fallible step (allocation and placement) happens against the new
    // array while the old one is untouched. Values are moved across only once
    // every key has a home, so a failure leaves the table as it was.
    fn resize(&mut self, new_capacity: usize) -> Result<()> {
        if new_capacity <= self.capacity() {
            return Err(Error::InvalidParameter(format!(
                "cannot resize table from {} to {} slots",
                self.capacity(),
                new_capacity
            )));
        }

        let mut slots = alloc_slots(new_capacity)?;
        let mut moves = Vec::new();
        moves.try_reserve_exact(self.live)?;

        for (from, slot) in self.slots.iter().enumerate() {
            if let Slot::Occupied { key, .. } = slot {
                let (to, _) = place(&mut slots, *key, String::new())?;
                moves.push((from, to));
            }
        }

        for (from, to) in moves {
            if let (Slot::Occupied { value: src, .. }, Slot::Occupied { value: dst, .. }) =
                (&mut self.slots[from], &mut slots[to])
            {
                mem::swap(src, dst);
            }
        }

        self.slots = slots;
        self.tombstones = 0;
        Ok(())
    }

    /// Iterates over live entries in slot order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            slots: self.slots.iter(),
            remaining: self.live,
        }
    }
}

pub struct Iter<'a> {
    slots: std::slice::Iter<'a, Slot>,
    remaining: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (i32, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        for slot in self.slots.by_ref() {
            if let Slot::Occupied { key, value } = slot {
                self.remaining -= 1;
                return Some((*key, value.as_str()));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Iter<'_> {}

impl<'a> IntoIterator for &'a Table {
    type Item = (i32, &'a str);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
