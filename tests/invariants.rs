//
// tests/invariants.rs -- universal store/fetch/delete/iterate invariants
//
// Copyright (c) 2024 Jeff Garzik
//
// This file is part of the xdbm software project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT

mod common;

use std::collections::{BTreeMap, HashSet};

use xdbm::{Alignment, Endian, Offset, OpenOptions};

/// A tiny xorshift generator, used only to vary key selection and operation
/// order deterministically across a long mixed sequence -- no dependency
/// beyond what the teacher already carries.
struct Xorshift(u64);

impl Xorshift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
}

/// Properties 1-4: every live key fetches its last stored value, every
/// absent key misses, `len()` matches the live set's cardinality, and
/// `keys()` enumerates exactly that set with no duplicates.
#[test]
fn mixed_sequence_preserves_fetch_count_and_iteration() {
    let mut db = OpenOptions::new()
        .write()
        .create()
        .tempfile()
        .expect("creating temporary database");

    let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
    let mut rng = Xorshift(0x9e3779b97f4a7c15);
    const KEYSPACE: u64 = 250;

    for step in 0..3000u64 {
        let key = format!("key-{}", rng.next() % KEYSPACE).into_bytes();

        match rng.next() % 3 {
            0 => {
                let value = format!("value-{step}").into_bytes();
                db.insert(&key, &value).expect("insert");
                model.insert(key, value);
            }
            1 => {
                let removed = db.remove(&key).expect("remove");
                assert_eq!(removed, model.remove(&key), "remove result mismatch for {key:?}");
            }
            _ => {
                let got = db.get::<_, Vec<u8>>(&key).expect("fetch");
                assert_eq!(got, model.get(&key).cloned(), "fetch mismatch for {key:?}");
            }
        }
    }

    // property 1 & 2
    for probe in 0..KEYSPACE {
        let key = format!("key-{probe}").into_bytes();
        assert_eq!(
            db.get::<_, Vec<u8>>(&key).expect("fetch"),
            model.get(&key).cloned(),
            "final fetch mismatch for {key:?}"
        );
    }

    // property 3
    assert_eq!(db.len().expect("len"), model.len());

    // property 4
    let mut seen = HashSet::new();
    for key in db.keys::<Vec<u8>>() {
        let key = key.expect("iterate key");
        assert!(seen.insert(key.clone()), "duplicate key from iteration: {key:?}");
        assert!(model.contains_key(&key), "iterated key absent from model: {key:?}");
    }
    assert_eq!(seen.len(), model.len(), "iteration missed or invented keys");
}

/// Property 5: after a successful sync, closing and reopening the database
/// yields the same live key/value mapping.
#[test]
fn sync_close_reopen_preserves_mapping() {
    let db_path = tempfile::tempdir().unwrap().into_path().join("db");

    let expected: BTreeMap<Vec<u8>, Vec<u8>> = (0..400usize)
        .map(|n| (format!("k{n}").into_bytes(), format!("v{n}-{}", n * 7).into_bytes()))
        .collect();

    {
        let mut db = OpenOptions::new()
            .write()
            .create()
            .open(&db_path)
            .expect("creating database");

        for (k, v) in &expected {
            db.insert(k, v).expect("insert");
        }
        for n in (0..400usize).filter(|n| n % 5 == 0) {
            db.remove(format!("k{n}").as_bytes()).expect("remove");
        }
        db.sync().expect("sync");
    }

    let expected: BTreeMap<Vec<u8>, Vec<u8>> = expected
        .into_iter()
        .filter(|(k, _)| {
            let n: usize = std::str::from_utf8(&k[1..]).unwrap().parse().unwrap();
            n % 5 != 0
        })
        .collect();

    let mut reopened = OpenOptions::new().write().open(&db_path).expect("reopening database");

    assert_eq!(reopened.len().expect("len"), expected.len());
    for (k, v) in &expected {
        assert_eq!(reopened.get::<_, Vec<u8>>(k).unwrap(), Some(v.clone()));
    }
}

/// Property 6: after `compact()`, the mapping is unchanged.
#[test]
fn compact_preserves_mapping() {
    let mut db = common::basic(0);

    let record = |n: usize| (format!("rec{n}").into_bytes(), vec![n as u8; n % 64]);

    for n in 0..500usize {
        let (k, v) = record(n);
        db.insert(&k, &v).expect("insert");
    }
    for n in (0..500usize).filter(|n| n % 2 == 0) {
        db.remove(format!("rec{n}").as_bytes()).expect("remove");
    }

    let expected: BTreeMap<Vec<u8>, Vec<u8>> = (0..500usize).filter(|n| n % 2 != 0).map(record).collect();

    db.compact().expect("compact");

    assert_eq!(db.len().expect("len"), expected.len());
    for (k, v) in &expected {
        assert_eq!(db.get::<_, Vec<u8>>(k).unwrap(), Some(v.clone()));
    }
}

/// Scenario 1 (boundary): split through directory doubling. Insert enough
/// records to force the directory to double at least once at the smallest
/// legal block size, and confirm every value still fetches correctly both
/// before and after a close/reopen, including read-only.
#[test]
fn split_through_directory_doubling() {
    let db_path = tempfile::tempdir().unwrap().into_path().join("db");

    const N: usize = 1024;
    let kv = |i: usize| (i.to_le_bytes().to_vec(), vec![(i % 251) as u8; 256]);

    {
        let mut db = OpenOptions::new()
            .write()
            .create()
            .alignment(Some(Alignment::Align64))
            .endian(Some(Endian::Little))
            .offset(Some(Offset::LFS))
            .block_size(xdbm::BlockSize::Exactly(512))
            .open(&db_path)
            .expect("creating database at minimum block size");

        let initial_buckets = db.bucket_count();

        for i in 0..N {
            let (k, v) = kv(i);
            db.insert(&k, &v).expect("insert");
        }

        assert!(
            db.bucket_count() > initial_buckets,
            "expected directory/bucket growth after {N} inserts"
        );

        for i in 0..N {
            let (k, v) = kv(i);
            assert_eq!(db.get::<_, Vec<u8>>(&k).unwrap(), Some(v));
        }

        db.sync().expect("sync");
    }

    let mut reader = OpenOptions::new().open(&db_path).expect("reopening read-only");
    for i in 0..N {
        let (k, v) = kv(i);
        assert_eq!(reader.get::<_, Vec<u8>>(&k).unwrap(), Some(v));
    }
}
