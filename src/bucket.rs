//
// bucket.rs -- GDBM bucket routines
//
// Copyright (c) 2019-2024 Jeff Garzik
//
// This file is part of the xdbm software project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT

use std::io::{self, Read, Write};

use crate::avail::{self, AvailElem};
use crate::hashutil::{hash_key, PartialKey};
use crate::ser::{read32, write32, Layout};
use crate::{HASH_BITS, KEY_SMALL};

/// A hash bucket holds up to `header.bucket_elems` key/value pointers,
/// plus a small local free-space pool that avoids touching the
/// database-wide avail list for small frees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketElement {
    pub hash: u32,
    pub key_start: PartialKey,
    pub data_ofs: u64,
    pub key_size: u32,
    pub data_size: u32,
}

impl BucketElement {
    pub fn new(key: &[u8], data: &[u8], offset: u64) -> Self {
        BucketElement {
            hash: hash_key(key),
            key_start: PartialKey::new(key),
            data_ofs: offset,
            key_size: key.len() as u32,
            data_size: data.len() as u32,
        }
    }

    /// A slot with no data offset is empty: offset 0 is always the
    /// header block and can never hold a record.
    pub fn is_occupied(&self) -> bool {
        self.data_ofs != 0
    }

    fn from_reader(layout: Layout, rdr: &mut impl Read) -> io::Result<Self> {
        let hash = read32(layout.endian, rdr)?;

        let mut key_start = [0u8; KEY_SMALL];
        rdr.read_exact(&mut key_start)?;

        let data_ofs = crate::ser::read_off(layout, rdr)?;
        let key_size = read32(layout.endian, rdr)?;
        let data_size = read32(layout.endian, rdr)?;

        Ok(BucketElement {
            hash,
            key_start: PartialKey::from_bytes(key_start),
            data_ofs,
            key_size,
            data_size,
        })
    }

    fn serialize(&self, layout: Layout, w: &mut impl Write) -> io::Result<()> {
        write32(layout.endian, w, self.hash)?;
        w.write_all(self.key_start.as_bytes())?;
        crate::ser::write_off(layout, w, self.data_ofs)?;
        write32(layout.endian, w, self.key_size)?;
        write32(layout.endian, w, self.data_size)
    }
}

pub(crate) fn elem_size(layout: Layout) -> u32 {
    4 + KEY_SMALL as u32 + layout.alignment.offset_width() + 4 + 4
}

#[derive(Debug, Clone)]
pub struct Bucket {
    /// Local free-space pool, capped at [`Bucket::AVAIL`] entries.
    pub avail: Vec<AvailElem>,
    pub bits: u32,
    pub count: u32,
    pub tab: Vec<BucketElement>,
}

impl Bucket {
    /// Maximum number of entries in a bucket's local avail pool.
    pub const AVAIL: u32 = 6;

    pub fn new(bits: u32, bucket_elems: usize, avail: Vec<AvailElem>, tab: Vec<BucketElement>) -> Self {
        let tab = if tab.is_empty() {
            vec![BucketElement::default(); bucket_elems]
        } else {
            tab
        };

        Bucket {
            avail,
            bits,
            count: 0,
            tab,
        }
    }

    pub fn from_reader(bucket_elems: u32, layout: Layout, rdr: &mut impl Read) -> io::Result<Self> {
        let av_count = read32(layout.endian, rdr)?;
        crate::ser::read_pad(layout, rdr)?;

        let mut avail = Vec::with_capacity(av_count as usize);
        for _ in 0..av_count {
            avail.push(read_avail_elem(layout, rdr)?);
        }
        for _ in av_count..Self::AVAIL {
            let _ = read_avail_elem(layout, rdr)?;
        }

        let bits = read32(layout.endian, rdr)?;
        let count = read32(layout.endian, rdr)?;

        let mut tab = Vec::with_capacity(bucket_elems as usize);
        for _ in 0..bucket_elems {
            tab.push(BucketElement::from_reader(layout, rdr)?);
        }

        Ok(Bucket {
            avail,
            bits,
            count,
            tab,
        })
    }

    pub fn serialize(&self, layout: Layout, w: &mut impl Write) -> io::Result<()> {
        write32(layout.endian, w, self.avail.len() as u32)?;
        crate::ser::write_pad(layout, w)?;

        for elem in &self.avail {
            write_avail_elem(layout, w, elem)?;
        }
        for _ in self.avail.len() as u32..Self::AVAIL {
            write_avail_elem(layout, w, &AvailElem { sz: 0, addr: 0 })?;
        }

        write32(layout.endian, w, self.bits)?;
        write32(layout.endian, w, self.count)?;

        self.tab.iter().try_for_each(|elem| elem.serialize(layout, w))
    }

    /// Adds `(addr, sz)` to the bucket's local free-space pool, keeping
    /// it sorted ascending by size. The caller is responsible for
    /// checking [`Bucket::AVAIL`] capacity before calling this.
    pub fn free(&mut self, addr: u64, sz: u32) {
        avail::insert_sorted(&mut self.avail, AvailElem { sz, addr });
    }

    pub fn allocate(&mut self, size: u32) -> Option<(u64, u32)> {
        avail::best_fit(&mut self.avail, size)
    }

    /// Inserts `elem` into the first empty slot starting at its natural
    /// hash-derived home, linear-probing forward (with wraparound).
    pub fn insert(&mut self, elem: BucketElement) {
        let len = self.tab.len();
        let home = (elem.hash as usize) % len;

        for i in 0..len {
            let idx = (home + i) % len;
            if !self.tab[idx].is_occupied() {
                self.tab[idx] = elem;
                self.count += 1;
                return;
            }
        }

        unreachable!("insert called on a full bucket");
    }

    /// Removes and returns the element at table index `elem_ofs`.
    pub fn remove(&mut self, elem_ofs: usize) -> BucketElement {
        let elem = self.tab[elem_ofs];
        self.tab[elem_ofs] = BucketElement::default();
        self.count -= 1;
        elem
    }

    /// Splits this bucket into two, partitioning entries by the next
    /// hash bit below the current `bits` depth. Both halves come back
    /// with `bits` incremented by one and freshly sized avail pools; any
    /// local avail entries are dropped (reclaimed by the caller via
    /// `free_record` is not necessary -- they describe space that
    /// remains valid and is simply no longer tracked locally).
    pub fn split(&self) -> (Bucket, Bucket) {
        let new_bits = self.bits + 1;
        let len = self.tab.len();
        let mut lo = vec![BucketElement::default(); len];
        let mut hi = vec![BucketElement::default(); len];
        let (mut lo_count, mut hi_count) = (0u32, 0u32);

        for elem in self.tab.iter().filter(|e| e.is_occupied()) {
            let home = elem.hash as usize;
            let upper_bit = (home >> (HASH_BITS - new_bits)) & 1;

            let (tab, count) = if upper_bit == 0 {
                (&mut lo, &mut lo_count)
            } else {
                (&mut hi, &mut hi_count)
            };
            insert_into(tab, *elem);
            *count += 1;
        }

        (
            Bucket {
                avail: vec![],
                bits: new_bits,
                count: lo_count,
                tab: lo,
            },
            Bucket {
                avail: vec![],
                bits: new_bits,
                count: hi_count,
                tab: hi,
            },
        )
    }
}

fn insert_into(tab: &mut [BucketElement], elem: BucketElement) {
    let len = tab.len();
    let home = (elem.hash as usize) % len;
    for i in 0..len {
        let idx = (home + i) % len;
        if !tab[idx].is_occupied() {
            tab[idx] = elem;
            return;
        }
    }
    unreachable!("split produced an over-full half");
}

fn read_avail_elem(layout: Layout, rdr: &mut impl Read) -> io::Result<AvailElem> {
    let sz = read32(layout.endian, rdr)?;
    crate::ser::read_pad(layout, rdr)?;
    let addr = crate::ser::read_off(layout, rdr)?;
    Ok(AvailElem { sz, addr })
}

fn write_avail_elem(layout: Layout, w: &mut impl Write, elem: &AvailElem) -> io::Result<()> {
    write32(layout.endian, w, elem.sz)?;
    crate::ser::write_pad(layout, w)?;
    crate::ser::write_off(layout, w, elem.addr)
}

/// Fixed, non-element-count-dependent byte overhead of a serialized
/// bucket: its avail subsection (always [`Bucket::AVAIL`] slots wide,
/// regardless of how many are occupied) plus the bits/count fields.
pub(crate) fn fixed_overhead(layout: Layout) -> u32 {
    let avail_section = 4 + layout.alignment.padding() + Bucket::AVAIL * avail::elem_size(layout);
    avail_section + 4 + 4
}

/// Number of [`BucketElement`] slots that fit in a block of `bucket_sz`
/// bytes, after the fixed avail/bits/count overhead.
pub fn elems_for(layout: Layout, bucket_sz: u32) -> u32 {
    let overhead = fixed_overhead(layout);
    if bucket_sz <= overhead {
        0
    } else {
        (bucket_sz - overhead) / elem_size(layout)
    }
}

#[derive(Debug)]
struct CacheEntry {
    offset: u64,
    bucket: Bucket,
    dirty: bool,
}

/// Hash-indexed, write-back bucket cache. `current` always names the
/// most recently loaded bucket; entries beyond `cachesize` are evicted
/// least-recently-used, oldest first.
#[derive(Debug)]
pub struct BucketCache {
    pub cachesize: usize,
    entries: Vec<CacheEntry>,
    // order[0] is most recently used
    order: Vec<usize>,
    current: Option<usize>,
}

impl BucketCache {
    pub fn new(cachesize: usize, initial: Option<(u64, Bucket)>) -> Self {
        let mut cache = BucketCache {
            cachesize: cachesize.max(1),
            entries: Vec::new(),
            order: Vec::new(),
            current: None,
        };

        if let Some((offset, bucket)) = initial {
            cache.insert(offset, bucket);
        }

        cache
    }

    fn index_of(&self, offset: u64) -> Option<usize> {
        self.entries.iter().position(|e| e.offset == offset)
    }

    fn touch(&mut self, idx: usize) {
        self.order.retain(|&i| i != idx);
        self.order.insert(0, idx);
    }

    pub fn contains(&self, offset: u64) -> bool {
        self.index_of(offset).is_some()
    }

    /// Inserts or replaces the bucket at `offset`, marking it dirty.
    /// Evicts and returns the least-recently-used entry if the cache is
    /// now over capacity.
    pub fn insert(&mut self, offset: u64, bucket: Bucket) -> Option<(u64, Bucket)> {
        if let Some(idx) = self.index_of(offset) {
            self.entries[idx].bucket = bucket;
            self.entries[idx].dirty = true;
            self.touch(idx);
            return None;
        }

        let idx = self.entries.len();
        self.entries.push(CacheEntry {
            offset,
            bucket,
            dirty: true,
        });
        self.order.insert(0, idx);

        if self.entries.len() <= self.cachesize {
            return None;
        }

        let evict_idx = self.order.pop().unwrap();
        let evicted = self.entries.remove(evict_idx);

        // removing a Vec element shifts every subsequent index down by one
        self.order.iter_mut().for_each(|i| {
            if *i > evict_idx {
                *i -= 1;
            }
        });
        if let Some(cur) = self.current {
            self.current = Some(if cur > evict_idx { cur - 1 } else { cur });
        }

        Some((evicted.offset, evicted.bucket))
    }

    pub fn set_current(&mut self, offset: u64) {
        self.current = self.index_of(offset);
        if let Some(idx) = self.current {
            self.touch(idx);
        }
    }

    pub fn current_bucket(&self) -> Option<&Bucket> {
        self.current.map(|idx| &self.entries[idx].bucket)
    }

    pub fn current_bucket_mut(&mut self) -> Option<&mut Bucket> {
        if let Some(idx) = self.current {
            self.entries[idx].dirty = true;
            Some(&mut self.entries[idx].bucket)
        } else {
            None
        }
    }

    pub fn current_bucket_offset(&self) -> Option<u64> {
        self.current.map(|idx| self.entries[idx].offset)
    }

    /// Every dirty bucket, offset-sorted, ready to be flushed to storage.
    pub fn dirty_list(&self) -> Vec<(u64, &Bucket)> {
        let mut list: Vec<(u64, &Bucket)> = self
            .entries
            .iter()
            .filter(|e| e.dirty)
            .map(|e| (e.offset, &e.bucket))
            .collect();
        list.sort_by_key(|(offset, _)| *offset);
        list
    }

    pub fn clear_dirty(&mut self) {
        self.entries.iter_mut().for_each(|e| e.dirty = false);
    }
}
