//
// tests/common/mod.rs -- shared fixtures for integration tests
//
// Copyright (c) 2019-2024 Jeff Garzik
//
// This file is part of the xdbm software project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT

#![allow(dead_code)]

use xdbm::{Alignment, Endian, Offset, OpenOptions, ReadWrite, Store};

/// Every on-disk format variant the header/magic subsystem distinguishes:
/// (alignment, endian, offset, numsync).
pub fn layout_matrix() -> Vec<(Alignment, Endian, Offset, bool)> {
    let mut out = Vec::new();
    for alignment in [Alignment::Align64, Alignment::Align32] {
        for endian in [Endian::Little, Endian::Big] {
            for offset in [Offset::LFS, Offset::Small] {
                for numsync in [false, true] {
                    out.push((alignment, endian, offset, numsync));
                }
            }
        }
    }
    out
}

/// A fresh, backing-file-less database in the given layout, pre-populated with
/// `"key {n}" -> "value {n}"` for `n` in `0..count`.
pub fn populated(
    alignment: Alignment,
    endian: Endian,
    offset: Offset,
    numsync: bool,
    count: usize,
) -> Store<ReadWrite> {
    let mut db = OpenOptions::new()
        .write()
        .create()
        .alignment(Some(alignment))
        .endian(Some(endian))
        .offset(Some(offset))
        .numsync(numsync)
        .tempfile()
        .expect("creating temporary database");

    for n in 0..count {
        let key = format!("key {n}");
        let value = format!("value {n}");
        db.insert(key.as_bytes(), value.as_bytes())
            .expect("inserting fixture record");
    }

    db
}

/// A default-layout database pre-populated the same way, for tests that don't care
/// about layout variation.
pub fn basic(count: usize) -> Store<ReadWrite> {
    populated(Alignment::Align64, Endian::Little, Offset::LFS, true, count)
}
