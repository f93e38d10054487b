//
// header.rs -- global file header routines
//
// Copyright (c) 2019-2024 Jeff Garzik
//
// This file is part of the xdbm software project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT

use std::io::{self, Read, Write};

use crate::avail::{self, AvailBlock};
use crate::bucket;
use crate::magic::Magic;
use crate::ser::{read32, write32, Alignment, Layout};
use crate::{Error, Result};

// magic(4) + block_sz(4) + dir_ofs + dir_sz(4) + dir_bits(4) + bucket_sz(4)
// + bucket_elems(4) + next_block + avail header, plus 8 bytes (version +
// numsync counter) when the numsync extension is present.
fn fixed_size(layout: Layout, has_numsync: bool) -> u32 {
    let mut size = 4 + 4 + layout.alignment.offset_width();
    size += 4 + 4 + 4 + 4;
    size += layout.alignment.offset_width();
    size += avail::header_size(layout);
    if has_numsync {
        size += 8;
    }
    size
}

fn avail_capacity(layout: Layout, block_sz: u32, has_numsync: bool) -> u32 {
    let overhead = fixed_size(layout, has_numsync);
    if block_sz <= overhead {
        0
    } else {
        (block_sz - overhead) / avail::elem_size(layout)
    }
}

#[derive(Debug)]
pub struct Header {
    pub magic: Magic,
    pub block_sz: u32,
    pub dir_ofs: u64,
    pub dir_sz: u32,
    pub dir_bits: u32,
    pub bucket_sz: u32,
    pub bucket_elems: u32,
    pub next_block: u64,
    pub avail: AvailBlock,
    pub numsync: u32,

    pub layout: Layout,
    pub dirty: bool,
}

impl Header {
    pub fn new(block_size: u32, layout: Layout, dir_bits: u32, numsync: bool) -> Self {
        let bucket_sz = block_size;
        let bucket_elems = bucket::elems_for(layout, bucket_sz);
        let avail_sz = avail_capacity(layout, block_size, numsync);

        Header {
            magic: Magic::new(layout.endian, layout.offset, numsync),
            block_sz: block_size,
            dir_ofs: u64::from(block_size),
            dir_sz: block_size,
            dir_bits,
            bucket_sz,
            bucket_elems,
            next_block: 3 * u64::from(block_size),
            avail: AvailBlock::new(avail_sz, 0, vec![]),
            numsync: 0,
            layout,
            dirty: true,
        }
    }

    pub fn from_reader(
        alignment: Option<Alignment>,
        file_len: u64,
        rdr: &mut impl Read,
    ) -> Result<Self> {
        let magic = Magic::from_reader(rdr)?;
        let layout = Layout {
            offset: magic.offset(),
            alignment: alignment.unwrap_or_else(|| magic.default_alignment()),
            endian: magic.endian(),
        };
        let has_numsync = magic.is_numsync();

        let block_sz = read32(layout.endian, rdr)?;
        let dir_ofs = crate::ser::read_off(layout, rdr)?;
        let dir_sz = read32(layout.endian, rdr)?;
        let dir_bits = read32(layout.endian, rdr)?;
        let bucket_sz = read32(layout.endian, rdr)?;
        let bucket_elems = read32(layout.endian, rdr)?;
        let next_block = crate::ser::read_off(layout, rdr)?;

        let mut avail = AvailBlock::from_reader(layout, rdr)?;
        // historically GDBM's avail table could be left unsorted by older
        // releases; restore size-ascending ordering on load.
        avail.elems.sort();

        let numsync = if has_numsync {
            let version = read32(layout.endian, rdr)?;
            if version != 0 {
                return Err(Error::BadNumsyncVersion { version });
            }
            read32(layout.endian, rdr)?
        } else {
            0
        };

        let minimum_block_sz = fixed_size(layout, has_numsync) + avail::elem_size(layout);
        if block_sz < minimum_block_sz {
            return Err(Error::BadHeaderBlockSize {
                size: block_sz,
                minimum: minimum_block_sz,
            });
        }

        if next_block > file_len {
            return Err(Error::BadHeaderNextBlock {
                next_block,
                file_size: file_len,
            });
        }

        if dir_ofs + u64::from(dir_sz) > file_len {
            return Err(Error::BadHeaderDirectoryOffset {
                offset: dir_ofs,
                size: dir_sz,
                file_size: file_len,
            });
        }

        let expected_bits = (dir_sz / layout.offset.width()).trailing_zeros();
        let minimum_size = layout.offset.width() << dir_bits;
        if dir_bits != expected_bits || dir_sz < minimum_size {
            return Err(Error::BadHeaderDirectory {
                size: dir_sz,
                bits: dir_bits,
                minimum_size,
                expected_bits,
            });
        }

        let bucket_minimum = bucket::fixed_overhead(layout) + bucket::elem_size(layout);
        if bucket_sz < bucket_minimum {
            return Err(Error::BadHeaderBucketSize {
                size: bucket_sz,
                minimum: bucket_minimum,
            });
        }

        let expected_elems = bucket::elems_for(layout, bucket_sz);
        if bucket_elems != expected_elems {
            return Err(Error::BadHeaderBucketElems {
                elems: bucket_elems,
                expected: expected_elems,
            });
        }

        let expected_avail_sz = avail_capacity(layout, block_sz, has_numsync);
        if avail.sz == 0 || avail.sz != expected_avail_sz {
            return Err(Error::BadHeaderAvail {
                elems: avail.sz,
                size: avail::AvailBlock::sizeof(layout, avail.sz),
                block_size: block_sz,
            });
        }

        if avail.elems.len() as u32 > avail.sz {
            return Err(Error::BadHeaderAvailCount {
                elems: avail.elems.len() as u32,
                maximum: avail.sz,
            });
        }

        for (index, elem) in avail.elems.iter().enumerate() {
            if elem.addr < u64::from(block_sz) || elem.addr + u64::from(elem.sz) > next_block {
                return Err(Error::BadAvailElem {
                    block_offset: 0,
                    elem: index,
                    offset: elem.addr,
                    size: elem.sz,
                    file_size: file_len,
                });
            }
        }

        Ok(Header {
            magic,
            block_sz,
            dir_ofs,
            dir_sz,
            dir_bits,
            bucket_sz,
            bucket_elems,
            next_block,
            avail,
            numsync,
            layout,
            dirty: false,
        })
    }

    pub fn serialize(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_all(self.magic.as_bytes())?;
        write32(self.layout.endian, w, self.block_sz)?;
        crate::ser::write_off(self.layout, w, self.dir_ofs)?;
        write32(self.layout.endian, w, self.dir_sz)?;
        write32(self.layout.endian, w, self.dir_bits)?;
        write32(self.layout.endian, w, self.bucket_sz)?;
        write32(self.layout.endian, w, self.bucket_elems)?;
        crate::ser::write_off(self.layout, w, self.next_block)?;
        self.avail.serialize(self.layout, w)?;

        if self.magic.is_numsync() {
            write32(self.layout.endian, w, 0)?; // version
            write32(self.layout.endian, w, self.numsync)?;
        }

        Ok(())
    }

    pub fn allocate(&mut self, size: u32) -> Option<(u64, u32)> {
        self.avail.allocate(size)
    }

    pub fn free(&mut self, addr: u64, sz: u32) {
        self.avail.free(addr, sz);
        self.dirty = true;
    }

    pub fn increment_numsync(&mut self) {
        self.numsync = self.numsync.wrapping_add(1);
        self.dirty = true;
    }

    /// Adds or removes the numsync extension, returning any avail
    /// elements evicted from the header's embedded table because the
    /// new layout no longer has room for them. The caller is expected to
    /// re-home each via `free_record`.
    pub fn convert_numsync(&mut self, numsync: bool) -> Vec<(u64, u32)> {
        if self.magic.is_numsync() == numsync {
            return vec![];
        }

        let new_capacity = avail_capacity(self.layout, self.block_sz, numsync);
        self.magic = Magic::new(self.layout.endian, self.layout.offset, numsync);
        if !numsync {
            self.numsync = 0;
        }
        self.dirty = true;

        if self.avail.elems.len() as u32 <= new_capacity {
            self.avail.sz = new_capacity;
            return vec![];
        }

        let evicted = self.avail.elems.split_off(new_capacity as usize);
        self.avail.sz = new_capacity;
        evicted.into_iter().map(|e| (e.addr, e.sz)).collect()
    }
}
