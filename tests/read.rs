//
// tests/read.rs -- read-only lookups against a populated database
//
// Copyright (c) 2019-2024 Jeff Garzik
//
// This file is part of the xdbm software project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT

mod common;

#[test]
fn api_get_not() {
    let mut db = common::basic(10);
    assert_eq!(
        db.get::<str, Vec<u8>>("This key does not exist.").unwrap(),
        None
    );
}

#[test]
fn api_get() {
    const COUNT: usize = 500;
    let mut db = common::basic(COUNT);

    for n in 0..COUNT {
        let key = format!("key {n}");
        let expected = format!("value {n}");
        assert_eq!(
            db.get::<str, Vec<u8>>(key.as_str()).unwrap(),
            Some(expected.into_bytes())
        );
    }
}

#[test]
fn api_iter_covers_every_key() {
    use std::collections::HashSet;

    const COUNT: usize = 500;
    let mut db = common::basic(COUNT);

    let mut expected: HashSet<Vec<u8>> = (0..COUNT)
        .map(|n| format!("key {n}").into_bytes())
        .collect();

    for key in db.keys::<Vec<u8>>() {
        let key = key.unwrap();
        assert!(expected.remove(&key), "unexpected key {key:?}");
    }

    assert!(expected.is_empty(), "missed {} keys", expected.len());
}

#[test]
fn api_len() {
    const COUNT: usize = 321;
    let mut db = common::basic(COUNT);
    assert_eq!(db.len().unwrap(), COUNT);
}
