//
// tests/iterate.rs -- full-database iteration (keys/values/pairs)
//
// Copyright (c) 2019-2024 Jeff Garzik
//
// This file is part of the xdbm software project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT

mod common;

use std::collections::{HashMap, HashSet};

const COUNT: usize = 300;

fn expected_pairs() -> HashMap<Vec<u8>, Vec<u8>> {
    (0..COUNT)
        .map(|n| (format!("key {n}").into_bytes(), format!("value {n}").into_bytes()))
        .collect()
}

#[test]
fn api_iter() {
    let mut db = common::basic(COUNT);
    let mut remaining = expected_pairs();

    for kv in db.iter::<Vec<u8>, Vec<u8>>() {
        let (k, v) = kv.unwrap();
        assert_eq!(remaining.remove(&k), Some(v));
    }

    assert!(remaining.is_empty(), "iteration missed some keys");
}

#[test]
fn api_keys() {
    let mut db = common::basic(COUNT);
    let mut remaining: HashSet<Vec<u8>> = expected_pairs().into_keys().collect();

    for k in db.keys::<Vec<u8>>() {
        let k = k.unwrap();
        assert!(remaining.remove(&k), "key {k:?} not expected");
    }

    assert!(remaining.is_empty(), "iteration missed some keys");
}

#[test]
fn api_values() {
    let mut db = common::basic(COUNT);
    let mut remaining: HashSet<Vec<u8>> = expected_pairs().into_values().collect();

    for v in db.values::<Vec<u8>>() {
        let v = v.unwrap();
        assert!(remaining.remove(&v), "value {v:?} not expected");
    }

    assert!(remaining.is_empty(), "iteration missed some values");
}
