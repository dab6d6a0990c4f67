//! Interval index — the per-layer record of byte ranges a layer is
//! authoritative for.
//!
//! Between syncs the index is an append-mostly list: `insert` only ever
//! grows an entry or appends a new one, so the set is a conservative
//! superset of the bytes ever written to the layer. `sort_and_coalesce`
//! turns it into a sorted, disjoint cover before it is persisted.
//!
//! - codec.rs: on-disk format (16-byte big-endian records) and file I/O.

pub mod codec;

pub use codec::{decode, encode, load_index, store_index, write_index_to};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Interval {
    pub start: u64,
    pub size: u64,
}

impl Interval {
    pub fn new(start: u64, size: u64) -> Self {
        Self { start, size }
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.size)
    }

    #[inline]
    pub fn contains(&self, offset: u64) -> bool {
        self.start <= offset && offset < self.end()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalIndex {
    entries: Vec<Interval>,
    // true when entries are sorted and pairwise disjoint
    coalesced: bool,
}

impl IntervalIndex {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            coalesced: true,
        }
    }

    /// Index of a freshly frozen root: one entry `[0, len)`.
    pub fn full(len: u64) -> Self {
        Self {
            entries: vec![Interval::new(0, len)],
            coalesced: true,
        }
    }

    pub fn from_entries(entries: Vec<Interval>) -> Self {
        let coalesced = is_sorted_disjoint(&entries);
        Self { entries, coalesced }
    }

    pub fn entries(&self) -> &[Interval] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_coalesced(&self) -> bool {
        self.coalesced
    }

    /// Record that `[start, start+len)` now belongs to this layer.
    ///
    /// First entry that matches wins:
    /// (a) entry ends exactly at `start` → extend it;
    /// (b) entry starts at `start` → grow it if the new range is longer;
    /// (c) range starts inside the entry → extend the entry to the union;
    /// otherwise the range is appended.
    pub fn insert(&mut self, start: u64, len: u64) {
        let new_end = start.saturating_add(len);
        for e in self.entries.iter_mut() {
            if e.end() == start {
                e.size = e.size.saturating_add(len);
                self.coalesced = false;
                return;
            }
            if e.start == start {
                if len > e.size {
                    e.size = len;
                    self.coalesced = false;
                }
                return;
            }
            if e.start < start && e.end() > start {
                if new_end > e.end() {
                    e.size = new_end - e.start;
                    self.coalesced = false;
                }
                return;
            }
        }
        let appended = Interval::new(start, len);
        if self.coalesced {
            if let Some(last) = self.entries.last() {
                if appended.start <= last.end() {
                    self.coalesced = false;
                }
            }
        }
        self.entries.push(appended);
    }

    /// Forget everything at or beyond `new_len`.
    ///
    /// Entries starting at/after `new_len` are dropped, entries crossing it are
    /// clipped. An index left empty gets a zero-length marker at `new_len`.
    pub fn truncate(&mut self, new_len: u64) {
        self.entries.retain(|e| e.start < new_len);
        for e in self.entries.iter_mut() {
            if e.end() > new_len {
                e.size = new_len - e.start;
            }
        }
        if self.entries.is_empty() {
            self.entries.push(Interval::new(new_len, 0));
            self.coalesced = true;
        }
    }

    /// Sort by start and sweep-merge touching/overlapping entries.
    pub fn sort_and_coalesce(&mut self) {
        if self.coalesced {
            return;
        }
        let before = self.entries.len();
        let mut sorted = std::mem::take(&mut self.entries);
        sorted.sort_by_key(|e| (e.start, e.size));

        let mut out: Vec<Interval> = Vec::with_capacity(sorted.len());
        for e in sorted {
            if let Some(last) = out.last_mut() {
                if e.start <= last.end() {
                    if e.end() > last.end() {
                        last.size = e.end() - last.start;
                    }
                    continue;
                }
            }
            out.push(e);
        }

        if out.len() < before {
            log::debug!("index coalesced: {} -> {} entries", before, out.len());
        }
        self.entries = out;
        self.coalesced = true;
    }

    /// Coalesced copy, leaving `self` untouched.
    pub fn coalesced_copy(&self) -> Self {
        let mut c = self.clone();
        c.sort_and_coalesce();
        c
    }

    /// Entry covering `offset`, preferring the one reaching furthest.
    pub fn covering(&self, offset: u64) -> Option<Interval> {
        if self.coalesced {
            let pos = self.entries.partition_point(|e| e.start <= offset);
            if pos == 0 {
                return None;
            }
            let e = self.entries[pos - 1];
            return if e.contains(offset) { Some(e) } else { None };
        }
        self.entries
            .iter()
            .filter(|e| e.contains(offset))
            .max_by_key(|e| e.end())
            .copied()
    }

    /// Smallest entry start strictly inside `(lo, hi)`.
    pub fn first_start_within(&self, lo: u64, hi: u64) -> Option<u64> {
        if self.coalesced {
            let pos = self.entries.partition_point(|e| e.start <= lo);
            return self.entries[pos..]
                .iter()
                .find(|e| !e.is_empty())
                .map(|e| e.start)
                .filter(|&s| s < hi);
        }
        self.entries
            .iter()
            .filter(|e| !e.is_empty() && e.start > lo && e.start < hi)
            .map(|e| e.start)
            .min()
    }

    /// Ranges of `self` that `other` does not cover. Sorted, disjoint,
    /// never zero-length.
    pub fn subtract(&self, other: &IntervalIndex) -> Vec<Interval> {
        let a = self.coalesced_copy();
        let b: Vec<Interval> = other
            .coalesced_copy()
            .entries
            .into_iter()
            .filter(|e| !e.is_empty())
            .collect();

        let mut out = Vec::new();
        let mut j = 0usize;
        for e in a.entries.iter().filter(|e| !e.is_empty()) {
            let end = e.end();
            let mut cur = e.start;
            while j < b.len() && b[j].end() <= cur {
                j += 1;
            }
            let mut k = j;
            while cur < end {
                if k < b.len() && b[k].start < end {
                    if b[k].start > cur {
                        out.push(Interval::new(cur, b[k].start - cur));
                    }
                    cur = cur.max(b[k].end());
                    k += 1;
                } else {
                    out.push(Interval::new(cur, end - cur));
                    cur = end;
                }
            }
        }
        out
    }

    /// Coalesced union of both indexes.
    pub fn union(&self, other: &IntervalIndex) -> IntervalIndex {
        let mut entries = self.entries.clone();
        entries.extend_from_slice(&other.entries);
        let mut u = IntervalIndex {
            entries,
            coalesced: false,
        };
        u.sort_and_coalesce();
        u
    }

    /// Number of distinct bytes covered.
    pub fn covered_bytes(&self) -> u64 {
        self.coalesced_copy().entries.iter().map(|e| e.size).sum()
    }
}

/// Clip a list of ranges to `[0, len)`, dropping what falls outside.
pub fn clip_to(ranges: Vec<Interval>, len: u64) -> Vec<Interval> {
    ranges
        .into_iter()
        .filter(|r| r.start < len)
        .map(|r| Interval::new(r.start, r.size.min(len - r.start)))
        .filter(|r| !r.is_empty())
        .collect()
}

fn is_sorted_disjoint(entries: &[Interval]) -> bool {
    entries.windows(2).all(|w| w[0].end() < w[1].start)
}
