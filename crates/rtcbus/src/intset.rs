// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sparse set of `u32`.
//!
//! # Layout
//!
//! ```text
//! table: HashMap<high, mask>
//!   high = key & !31      (start of a 32-key block)
//!   mask = bit n set  <=> high + n is a member
//! largest_ever >= max(member)   (hint, may overshoot)
//! ```
//!
//! Blocks whose mask drops to zero are removed immediately, so two sets are
//! equal exactly when their tables are equal.

use std::collections::HashMap;
use std::fmt;

const LOW_MASK: u32 = 31;

#[inline]
const fn high_part(key: u32) -> u32 {
    key & !LOW_MASK
}

#[inline]
const fn low_bit(key: u32) -> u32 {
    1 << (key & LOW_MASK)
}

/// Sparse bitset over `u32` keys.
#[derive(Clone, Default)]
pub struct IntSet {
    table: HashMap<u32, u32>,
    largest_ever: u32,
}

impl IntSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set pre-sized for roughly `size` members.
    pub fn with_capacity(size: usize) -> Self {
        Self {
            table: HashMap::with_capacity(size / 32 + 1),
            largest_ever: 0,
        }
    }

    pub fn from_slice(keys: &[u32]) -> Self {
        keys.iter().copied().collect()
    }

    /// Add `key`. Returns false if it was already present.
    pub fn add(&mut self, key: u32) -> bool {
        let mask = self.table.entry(high_part(key)).or_insert(0);
        let bit = low_bit(key);
        if *mask & bit != 0 {
            return false;
        }
        *mask |= bit;
        if key > self.largest_ever {
            self.largest_ever = key;
        }
        true
    }

    /// Remove `key`. Returns false if it was not present.
    pub fn remove(&mut self, key: u32) -> bool {
        let high = high_part(key);
        let Some(mask) = self.table.get_mut(&high) else {
            return false;
        };
        let bit = low_bit(key);
        if *mask & bit == 0 {
            return false;
        }
        *mask &= !bit;
        if *mask == 0 {
            self.table.remove(&high);
        }
        true
    }

    pub fn contains(&self, key: u32) -> bool {
        self.table
            .get(&high_part(key))
            .is_some_and(|mask| mask & low_bit(key) != 0)
    }

    pub fn len(&self) -> usize {
        self.table.values().map(|m| m.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn clear(&mut self) {
        self.table.clear();
    }

    /// Upper bound on every key ever added. Never smaller than the current
    /// maximum; may be larger after removals.
    pub fn largest_ever(&self) -> u32 {
        self.largest_ever
    }

    /// Members in ascending order.
    pub fn iter(&self) -> Iter<'_> {
        let mut blocks: Vec<(u32, u32)> = self
            .table
            .iter()
            .filter(|(high, _)| **high <= self.largest_ever)
            .map(|(h, m)| (*h, *m))
            .collect();
        blocks.sort_unstable_by_key(|(high, _)| *high);
        Iter {
            _set: self,
            blocks,
            index: 0,
            current: None,
        }
    }

    /// Members in no particular order. Cheaper than [`iter`](Self::iter).
    pub fn iter_fast(&self) -> impl Iterator<Item = u32> + '_ {
        self.table.iter().flat_map(|(high, mask)| BitIter {
            high: *high,
            mask: *mask,
        })
    }

    /// Members in ascending order.
    pub fn to_vec(&self) -> Vec<u32> {
        self.iter().collect()
    }

    pub fn union(&self, other: &IntSet) -> IntSet {
        let mut out = self.clone();
        for (high, mask) in &other.table {
            *out.table.entry(*high).or_insert(0) |= mask;
        }
        out.largest_ever = self.largest_ever.max(other.largest_ever);
        out
    }

    pub fn intersection(&self, other: &IntSet) -> IntSet {
        let mut out = IntSet::new();
        for (high, mask) in &self.table {
            if let Some(theirs) = other.table.get(high) {
                let both = mask & theirs;
                if both != 0 {
                    out.table.insert(*high, both);
                }
            }
        }
        out.largest_ever = self.largest_ever.min(other.largest_ever);
        out
    }

    /// Members of `self` not in `other`.
    pub fn difference(&self, other: &IntSet) -> IntSet {
        let mut out = IntSet::new();
        for (high, mask) in &self.table {
            let left = mask & !other.table.get(high).copied().unwrap_or(0);
            if left != 0 {
                out.table.insert(*high, left);
            }
        }
        out.largest_ever = self.largest_ever;
        out
    }

    pub fn symmetric_difference(&self, other: &IntSet) -> IntSet {
        let mut out = self.difference(other);
        for (high, mask) in &other.table {
            let left = mask & !self.table.get(high).copied().unwrap_or(0);
            if left != 0 {
                *out.table.entry(*high).or_insert(0) |= left;
            }
        }
        out.largest_ever = self.largest_ever.max(other.largest_ever);
        out
    }

    /// Compact rendering: runs collapse to `a-b`, e.g. `"1-3 7"`.
    pub fn dump(&self) -> String {
        let mut parts = Vec::new();
        let mut run: Option<(u32, u32)> = None;
        for key in self.iter() {
            run = match run {
                Some((start, end)) if end.checked_add(1) == Some(key) => Some((start, key)),
                Some(done) => {
                    parts.push(render_run(done));
                    Some((key, key))
                }
                None => Some((key, key)),
            };
        }
        if let Some(done) = run {
            parts.push(render_run(done));
        }
        parts.join(" ")
    }
}

fn render_run((start, end): (u32, u32)) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{}-{}", start, end)
    }
}

impl PartialEq for IntSet {
    fn eq(&self, other: &Self) -> bool {
        self.table == other.table
    }
}

impl Eq for IntSet {}

impl fmt::Debug for IntSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IntSet({})", self.dump())
    }
}

impl FromIterator<u32> for IntSet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        let mut set = IntSet::new();
        set.extend(iter);
        set
    }
}

impl Extend<u32> for IntSet {
    fn extend<I: IntoIterator<Item = u32>>(&mut self, iter: I) {
        for key in iter {
            self.add(key);
        }
    }
}

impl<'a> IntoIterator for &'a IntSet {
    type Item = u32;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

struct BitIter {
    high: u32,
    mask: u32,
}

impl Iterator for BitIter {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.mask == 0 {
            return None;
        }
        let low = self.mask.trailing_zeros();
        self.mask &= self.mask - 1;
        Some(self.high + low)
    }
}

/// Ordered iterator returned by [`IntSet::iter`].
pub struct Iter<'a> {
    _set: &'a IntSet,
    blocks: Vec<(u32, u32)>,
    index: usize,
    current: Option<BitIter>,
}

impl Iterator for Iter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        loop {
            if let Some(bits) = self.current.as_mut() {
                if let Some(key) = bits.next() {
                    return Some(key);
                }
            }
            let (high, mask) = *self.blocks.get(self.index)?;
            self.index += 1;
            self.current = Some(BitIter { high, mask });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_remove_contains() {
        let mut set = IntSet::new();
        assert!(set.is_empty());
        assert!(set.add(5));
        assert!(!set.add(5));
        assert!(set.add(64));
        assert!(set.contains(5));
        assert!(!set.contains(6));
        assert_eq!(set.len(), 2);
        assert!(set.remove(5));
        assert!(!set.remove(5));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn empty_blocks_are_dropped() {
        let mut set = IntSet::from_slice(&[33]);
        set.remove(33);
        assert!(set.is_empty());
        assert_eq!(set, IntSet::new());
        assert!(set.table.is_empty());
    }

    #[test]
    fn ordered_iteration() {
        let set = IntSet::from_slice(&[1000, 3, 31, 32, 0, u32::MAX]);
        assert_eq!(set.to_vec(), vec![0, 3, 31, 32, 1000, u32::MAX]);
        let mut fast: Vec<u32> = set.iter_fast().collect();
        fast.sort_unstable();
        assert_eq!(fast, set.to_vec());
    }

    #[test]
    fn largest_ever_never_undershoots() {
        let mut set = IntSet::from_slice(&[10, 200]);
        assert_eq!(set.largest_ever(), 200);
        set.remove(200);
        assert!(set.largest_ever() >= 10);
        assert_eq!(set.to_vec(), vec![10]);
    }

    #[test]
    fn set_algebra() {
        let a = IntSet::from_slice(&[1, 2, 3, 40]);
        let b = IntSet::from_slice(&[3, 4, 40, 41]);
        assert_eq!(a.union(&b).to_vec(), vec![1, 2, 3, 4, 40, 41]);
        assert_eq!(a.intersection(&b).to_vec(), vec![3, 40]);
        assert_eq!(a.difference(&b).to_vec(), vec![1, 2]);
        assert_eq!(a.symmetric_difference(&b).to_vec(), vec![1, 2, 4, 41]);
        let disjoint = IntSet::from_slice(&[100]);
        assert!(a.intersection(&disjoint).table.is_empty());
        assert!(a.difference(&a).is_empty());
    }

    #[test]
    fn dump_collapses_runs() {
        assert_eq!(IntSet::from_slice(&[1, 2, 3, 7, 9, 10]).dump(), "1-3 7 9-10");
        assert_eq!(IntSet::new().dump(), "");
    }
}
