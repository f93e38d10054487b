//
// tests/allocator.rs -- free-space allocator: recycling, overflow, sort order
//
// Copyright (c) 2024 Jeff Garzik
//
// This file is part of the xdbm software project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT

use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};

use xdbm::{Alignment, BlockSize, Endian, Offset, OpenOptions};

/// Scenario 2: free-list recycle. Deleting records and reinserting others of
/// the same key/value lengths must reuse the freed space rather than grow
/// the file -- `central_free` routes every freed record through the header's
/// master table regardless of which bucket it lived in, so same-size records
/// landing in a different bucket than the one they were freed from can still
/// be satisfied from it.
#[test]
fn free_list_recycles_space_without_growing_the_file() {
    let db_path = tempfile::tempdir().unwrap().into_path().join("db");

    let mut db = OpenOptions::new()
        .write()
        .create()
        .alignment(Some(Alignment::Align64))
        .endian(Some(Endian::Little))
        .offset(Some(Offset::LFS))
        .block_size(BlockSize::Exactly(4096))
        .central_free(true)
        .open(&db_path)
        .expect("creating database");

    let value = vec![0x42u8; 512];
    for n in 0..20usize {
        db.insert(format!("k{n}").as_bytes(), &value).expect("insert");
    }
    db.sync().expect("sync");
    let grown_len = fs::metadata(&db_path).unwrap().len();

    for n in (0..20usize).step_by(2) {
        db.remove(format!("k{n}").as_bytes()).expect("remove");
    }
    db.sync().expect("sync");

    for n in (0..20usize).step_by(2) {
        db.insert(format!("r{n}").as_bytes(), &value)
            .expect("insert into recycled space");
    }
    db.sync().expect("sync");

    let final_len = fs::metadata(&db_path).unwrap().len();
    assert_eq!(
        final_len, grown_len,
        "file grew instead of reusing freed record space"
    );

    for n in (0..20usize).step_by(2) {
        assert_eq!(
            db.get::<_, Vec<u8>>(format!("r{n}").as_bytes()).unwrap(),
            Some(value.clone())
        );
    }
    for n in (1..20usize).step_by(2) {
        assert_eq!(
            db.get::<_, Vec<u8>>(format!("k{n}").as_bytes()).unwrap(),
            Some(value.clone())
        );
    }
}

/// Byte offset of the first avail element under `Align64`/no-numsync: magic
/// (4) + block_sz (4) + dir_ofs (8) + dir_sz (4) + dir_bits (4) + bucket_sz
/// (4) + bucket_elems (4) + next_block (8) + avail block header (sz(4) +
/// count(4) + pad(4) + next_block(8)).
const AVAIL_ELEMS_OFFSET: u64 = 60;
const AVAIL_ELEM_SIZE: u64 = 16;

fn read_avail_elem(buf: &[u8]) -> (u32, u64) {
    let sz = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    let addr = u64::from_le_bytes(buf[8..16].try_into().unwrap());
    (sz, addr)
}

fn write_avail_elem(buf: &mut [u8], sz: u32, addr: u64) {
    buf[0..4].copy_from_slice(&sz.to_le_bytes());
    buf[4..8].copy_from_slice(&[0u8; 4]);
    buf[8..16].copy_from_slice(&addr.to_le_bytes());
}

/// Scenario 5: avail sort repair. Older databases could carry a master
/// avail table whose on-disk order wasn't size-ascending; splices one into
/// the header directly (bypassing the library, which never writes one
/// unsorted) and confirms a reopen both tolerates it and restores
/// size-ascending order the next time the header is written back out.
#[test]
fn avail_table_sort_is_repaired_on_load() {
    let db_path = tempfile::tempdir().unwrap().into_path().join("db");

    {
        let mut db = OpenOptions::new()
            .write()
            .create()
            .alignment(Some(Alignment::Align64))
            .endian(Some(Endian::Little))
            .offset(Some(Offset::LFS))
            .numsync(false)
            .block_size(BlockSize::Exactly(4096))
            .central_free(true)
            .open(&db_path)
            .expect("creating database");

        db.insert("a", &vec![0u8; 50]).expect("insert");
        db.insert("bb", &vec![0u8; 150]).expect("insert");
        db.insert("ccc", &vec![0u8; 300]).expect("insert");
        db.remove("a").expect("remove");
        db.remove("bb").expect("remove");
        db.remove("ccc").expect("remove");
        db.sync().expect("sync");
    }

    // splice the three elements into size-descending order directly on disk.
    let mut elems = {
        let mut f = fs::File::open(&db_path).expect("opening raw file");
        f.seek(SeekFrom::Start(AVAIL_ELEMS_OFFSET)).unwrap();
        let mut raw = [0u8; (AVAIL_ELEM_SIZE * 3) as usize];
        f.read_exact(&mut raw).expect("reading avail elements");
        (0..3)
            .map(|i| {
                let start = i * AVAIL_ELEM_SIZE as usize;
                read_avail_elem(&raw[start..start + AVAIL_ELEM_SIZE as usize])
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(elems.len(), 3);
    elems.sort();
    assert!(
        elems[0].0 < elems[1].0 && elems[1].0 < elems[2].0,
        "fixture didn't produce three distinctly-sized avail elements: {elems:?}"
    );
    elems.reverse();

    {
        let mut f = fs::OpenOptions::new().write(true).open(&db_path).expect("opening raw file for write");
        f.seek(SeekFrom::Start(AVAIL_ELEMS_OFFSET)).unwrap();
        let mut raw = [0u8; (AVAIL_ELEM_SIZE * 3) as usize];
        for (i, (sz, addr)) in elems.iter().enumerate() {
            let start = i * AVAIL_ELEM_SIZE as usize;
            write_avail_elem(&mut raw[start..start + AVAIL_ELEM_SIZE as usize], *sz, *addr);
        }
        f.write_all(&raw).expect("writing shuffled avail elements");
    }

    {
        let mut db = OpenOptions::new().write().open(&db_path).expect("reopening database");

        // larger than any of the three freed extents, so this allocates fresh
        // space via `extend` and leaves the three avail elements untouched.
        db.insert("probe", &vec![0u8; 400]).expect("insert");
        db.sync().expect("sync");
    }

    let mut f = fs::File::open(&db_path).expect("opening raw file");
    f.seek(SeekFrom::Start(AVAIL_ELEMS_OFFSET)).unwrap();
    let mut raw = [0u8; (AVAIL_ELEM_SIZE * 3) as usize];
    f.read_exact(&mut raw).expect("reading avail elements");
    let repaired: Vec<(u32, u64)> = (0..3)
        .map(|i| {
            let start = i * AVAIL_ELEM_SIZE as usize;
            read_avail_elem(&raw[start..start + AVAIL_ELEM_SIZE as usize])
        })
        .collect();

    assert!(
        repaired[0].0 < repaired[1].0 && repaired[1].0 < repaired[2].0,
        "avail table was not restored to size-ascending order: {repaired:?}"
    );
}

/// Boundary: the master avail table overflows into an overflow block once
/// more elements accumulate than its embedded capacity, and popping/pushing
/// that chain doesn't corrupt or cycle. Exercised with a minimum block size
/// (a small avail capacity) and `central_free` so every freed record goes
/// straight to the master table.
#[test]
fn master_avail_overflow_spills_to_an_overflow_block() {
    let mut db = OpenOptions::new()
        .write()
        .create()
        .alignment(Some(Alignment::Align64))
        .endian(Some(Endian::Little))
        .offset(Some(Offset::LFS))
        .block_size(BlockSize::Exactly(512))
        .central_free(true)
        .coalesce(false)
        .tempfile()
        .expect("creating temporary database");

    // varying value lengths populate the master table with a spread of
    // element sizes rather than one uniform size.
    const N: usize = 400;
    for n in 0..N {
        let value = vec![n as u8; 40 + (n % 37)];
        db.insert(format!("overflow-{n}").as_bytes(), &value).expect("insert");
    }
    for n in (0..N).step_by(2) {
        db.remove(format!("overflow-{n}").as_bytes()).expect("remove");
    }
    db.sync().expect("sync past master table capacity");

    for n in (1..N).step_by(2) {
        let value = vec![n as u8; 40 + (n % 37)];
        assert_eq!(
            db.get::<_, Vec<u8>>(format!("overflow-{n}").as_bytes()).unwrap(),
            Some(value),
            "record {n} missing after avail table overflowed"
        );
    }

    // drive further free/alloc cycles through the same overflow chain.
    for n in (0..N).step_by(2) {
        let value = vec![(n + 1) as u8; 20 + (n % 19)];
        db.insert(format!("refill-{n}").as_bytes(), &value).expect("insert");
    }
    db.sync().expect("sync again");

    for n in (0..N).step_by(2) {
        let value = vec![(n + 1) as u8; 20 + (n % 19)];
        assert_eq!(
            db.get::<_, Vec<u8>>(format!("refill-{n}").as_bytes()).unwrap(),
            Some(value)
        );
    }
    for n in (1..N).step_by(2) {
        let value = vec![n as u8; 40 + (n % 37)];
        assert_eq!(
            db.get::<_, Vec<u8>>(format!("overflow-{n}").as_bytes()).unwrap(),
            Some(value)
        );
    }
}
