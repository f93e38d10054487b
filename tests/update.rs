//
// tests/update.rs -- insert/remove mutation semantics
//
// Copyright (c) 2019-2024 Jeff Garzik
//
// This file is part of the xdbm software project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT

mod common;

#[test]
fn api_remove() {
    let mut db = common::basic(10);

    // removing a non-existent key is a no-op that reports no prior value
    assert_eq!(
        db.remove("This key does not exist.").unwrap(),
        None
    );

    // removing an existing key returns its prior value
    let removed = db.remove("key 1").unwrap();
    assert_eq!(removed, Some(b"value 1".to_vec()));

    // and the key is gone afterwards
    assert!(!db.contains_key("key 1").unwrap());
}

#[test]
fn api_try_insert_respects_existing_value() {
    let mut db = common::basic(0);

    assert_eq!(db.try_insert("marmite", "cat").unwrap(), None);
    assert_eq!(
        db.try_insert("marmite", "dog").unwrap(),
        Some(b"cat".to_vec())
    );
    assert_eq!(
        db.get::<str, Vec<u8>>("marmite").unwrap(),
        Some(b"cat".to_vec())
    );
}

#[test]
fn api_insert_replaces_existing_value() {
    let mut db = common::basic(0);

    assert_eq!(db.insert("marmite", "cat").unwrap(), None);
    assert_eq!(
        db.insert("marmite", "dog").unwrap(),
        Some(b"cat".to_vec())
    );
    assert_eq!(
        db.get::<str, Vec<u8>>("marmite").unwrap(),
        Some(b"dog".to_vec())
    );
}
