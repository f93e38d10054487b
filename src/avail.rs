//
// avail.rs -- free space (avail) list routines
//
// Copyright (c) 2019-2024 Jeff Garzik
//
// This file is part of the xdbm software project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT

use std::io::{self, Read, Write};

use crate::ser::{read32, read_pad, write32, write_pad, Layout};
use crate::Error;

#[derive(Debug, Clone, Copy, Ord, PartialOrd, Eq, PartialEq)]
pub struct AvailElem {
    pub sz: u32,
    pub addr: u64,
}

impl AvailElem {
    fn from_reader(layout: Layout, rdr: &mut impl Read) -> io::Result<Self> {
        let sz = read32(layout.endian, rdr)?;
        read_pad(layout, rdr)?;
        let addr = crate::ser::read_off(layout, rdr)?;

        Ok(AvailElem { sz, addr })
    }

    fn serialize(&self, layout: Layout, w: &mut impl Write) -> io::Result<()> {
        write32(layout.endian, w, self.sz)?;
        write_pad(layout, w)?;
        crate::ser::write_off(layout, w, self.addr)
    }
}

pub(crate) fn elem_size(layout: Layout) -> u32 {
    4 + layout.alignment.padding() + layout.alignment.offset_width()
}

pub(crate) fn header_size(layout: Layout) -> u32 {
    // sz, count, padding, next_block
    4 + 4 + layout.alignment.padding() + layout.alignment.offset_width()
}

/// A free-space list block: either the master table embedded in the
/// database header, or one link of the overflow chain reachable via
/// `next_block`.
#[derive(Debug, Clone)]
pub struct AvailBlock {
    /// Maximum number of elements this block's reserved storage holds.
    pub sz: u32,
    pub next_block: u64,
    pub elems: Vec<AvailElem>,
}

impl AvailBlock {
    pub fn new(sz: u32, next_block: u64, elems: Vec<AvailElem>) -> Self {
        Self {
            sz,
            next_block,
            elems,
        }
    }

    pub fn from_reader(layout: Layout, rdr: &mut impl Read) -> io::Result<Self> {
        let sz = read32(layout.endian, rdr)?;
        let count = read32(layout.endian, rdr)?;
        read_pad(layout, rdr)?;
        let next_block = crate::ser::read_off(layout, rdr)?;

        let elems = (0..count)
            .map(|_| AvailElem::from_reader(layout, rdr))
            .collect::<io::Result<Vec<_>>>()?;

        Ok(Self {
            sz,
            next_block,
            elems,
        })
    }

    pub fn serialize(&self, layout: Layout, w: &mut impl Write) -> io::Result<()> {
        write32(layout.endian, w, self.sz)?;
        write32(layout.endian, w, self.elems.len() as u32)?;
        write_pad(layout, w)?;
        crate::ser::write_off(layout, w, self.next_block)?;

        self.elems.iter().try_for_each(|e| e.serialize(layout, w))
    }

    /// Byte footprint of a block with capacity for `sz` elements. Used to
    /// size both the header's embedded table and overflow blocks.
    pub fn sizeof(layout: Layout, sz: u32) -> u32 {
        header_size(layout) + sz * elem_size(layout)
    }

    pub fn extent(&self, layout: Layout) -> u32 {
        Self::sizeof(layout, self.sz)
    }

    /// Returns a combined block if `next`'s elements fit within this
    /// block's reserved capacity; `next`'s `next_block` link replaces
    /// ours.
    pub fn merge(&self, next: &AvailBlock) -> Option<AvailBlock> {
        if (self.elems.len() + next.elems.len()) as u32 > self.sz {
            return None;
        }

        let mut elems = self.elems.clone();
        elems.extend(next.elems.iter().copied());

        Some(AvailBlock::new(self.sz, next.next_block, elems))
    }

    /// Removes and returns the smallest element able to satisfy `size`,
    /// best-fit.
    pub fn allocate(&mut self, size: u32) -> Option<(u64, u32)> {
        best_fit(&mut self.elems, size)
    }

    /// Inserts `(addr, sz)` into the free list, keeping it sorted
    /// ascending by size.
    pub fn free(&mut self, addr: u64, sz: u32) {
        insert_sorted(&mut self.elems, AvailElem { sz, addr })
    }
}

/// Removes and returns the smallest-sized element that is `>= size`.
pub fn best_fit(elems: &mut Vec<AvailElem>, size: u32) -> Option<(u64, u32)> {
    let candidate = elems
        .iter()
        .enumerate()
        .filter(|(_, e)| e.sz >= size)
        .min_by_key(|(_, e)| e.sz)
        .map(|(idx, e)| (idx, *e));

    candidate.map(|(idx, e)| {
        elems.remove(idx);
        (e.addr, e.sz)
    })
}

/// Inserts `elem` keeping `elems` sorted ascending by size (ties broken
/// by address, per `AvailElem`'s derived `Ord`).
pub(crate) fn insert_sorted(elems: &mut Vec<AvailElem>, elem: AvailElem) {
    let pos = elems.partition_point(|e| *e < elem);
    elems.insert(pos, elem);
}

/// Merges pairs of elements describing adjacent extents
/// (`a.addr + a.sz == b.addr`) into one, until no more adjacent pairs
/// remain. The avail table is kept sorted by size rather than address,
/// so adjacency can't be found by scanning consecutive indices; this
/// does a full scan for an adjacent partner on each pass instead.
/// Restores size-ascending order when done.
pub fn coalesce(elems: &mut Vec<AvailElem>) {
    loop {
        let mut pair = None;
        'search: for i in 0..elems.len() {
            for j in 0..elems.len() {
                if i != j && elems[i].addr + u64::from(elems[i].sz) == elems[j].addr {
                    pair = Some((i, j));
                    break 'search;
                }
            }
        }

        let Some((i, j)) = pair else { break };
        let absorbed = elems.remove(j);
        let i = if j < i { i - 1 } else { i };
        elems[i].sz += absorbed.sz;
    }

    elems.sort();
}

/// Splits `elems` roughly in half: the first half stays in the caller's
/// block, the second half moves to a newly allocated overflow block.
pub fn partition_elems(elems: &[AvailElem]) -> (Vec<AvailElem>, Vec<AvailElem>) {
    let mid = elems.len() / 2;
    (elems[..mid].to_vec(), elems[mid..].to_vec())
}

/// Walks the overflow chain starting at `first`, reading each block via
/// `read_block`, detecting cycles by tracking visited offsets.
pub fn traverse<F>(first: &AvailBlock, mut read_block: F) -> Result<Vec<AvailBlock>, Error>
where
    F: FnMut(u64) -> io::Result<AvailBlock>,
{
    let mut blocks = Vec::new();
    let mut seen = std::collections::HashSet::new();
    let mut next = first.next_block;

    while next != 0 {
        if !seen.insert(next) {
            return Err(Error::AvailCycle { offset: next });
        }

        let block = read_block(next)?;
        let following = block.next_block;
        blocks.push(block);
        next = following;
    }

    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ser::{Alignment, Endian, Offset};

    fn layout() -> Layout {
        Layout {
            offset: Offset::LFS,
            alignment: Alignment::Align64,
            endian: Endian::Little,
        }
    }

    #[test]
    fn roundtrip_block() {
        let block = AvailBlock::new(
            4,
            0,
            vec![
                AvailElem { sz: 64, addr: 512 },
                AvailElem { sz: 128, addr: 1024 },
            ],
        );
        let mut buf = Vec::new();
        block.serialize(layout(), &mut buf).unwrap();

        let back = AvailBlock::from_reader(layout(), &mut buf.as_slice()).unwrap();
        assert_eq!(back.elems, block.elems);
        assert_eq!(back.next_block, block.next_block);
    }

    #[test]
    fn best_fit_picks_smallest_sufficient() {
        let mut elems = vec![
            AvailElem { sz: 200, addr: 10 },
            AvailElem { sz: 64, addr: 20 },
            AvailElem { sz: 80, addr: 30 },
        ];
        let (addr, sz) = best_fit(&mut elems, 70).unwrap();
        assert_eq!((addr, sz), (30, 80));
        assert_eq!(elems.len(), 2);
    }

    #[test]
    fn coalesce_merges_adjacent() {
        let mut elems = vec![
            AvailElem { sz: 64, addr: 0 },
            AvailElem { sz: 64, addr: 64 },
            AvailElem { sz: 64, addr: 256 },
        ];
        coalesce(&mut elems);
        // sorted ascending by size, not insertion/address order.
        assert_eq!(
            elems,
            vec![AvailElem { sz: 64, addr: 256 }, AvailElem { sz: 128, addr: 0 }]
        );
    }

    #[test]
    fn coalesce_finds_adjacency_regardless_of_table_order() {
        // table is kept size-sorted, so the adjacent pair (addr 256, sz
        // 64) and (addr 320, sz 64) are not neighboring indices.
        let mut elems = vec![
            AvailElem { sz: 64, addr: 256 },
            AvailElem { sz: 96, addr: 0 },
            AvailElem { sz: 64, addr: 320 },
        ];
        coalesce(&mut elems);
        assert_eq!(
            elems,
            vec![AvailElem { sz: 96, addr: 0 }, AvailElem { sz: 128, addr: 256 }]
        );
    }

    #[test]
    fn traverse_detects_cycle() {
        let first = AvailBlock::new(4, 100, vec![]);
        let err = traverse(&first, |offset| {
            Ok(AvailBlock::new(4, if offset == 100 { 100 } else { 0 }, vec![]))
        })
        .unwrap_err();
        assert!(matches!(err, Error::AvailCycle { offset: 100 }));
    }
}
