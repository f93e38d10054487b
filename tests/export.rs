//
// tests/export.rs -- ASCII/binary dump and reimport round-trips
//
// Copyright (c) 2019-2024 Jeff Garzik
//
// This file is part of the xdbm software project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT

mod common;

use xdbm::{ExportBinMode, OpenOptions};

#[test]
fn api_export_import_bin_roundtrip() {
    let mut db = common::basic(100);

    let mut buf = Vec::new();
    db.export_bin(&mut buf, ExportBinMode::ExpNative)
        .expect("exporting binary dump");

    let mut fresh = OpenOptions::new()
        .write()
        .create()
        .tempfile()
        .expect("creating fresh database");
    fresh
        .import_bin(&mut buf.as_slice(), ExportBinMode::ExpNative)
        .expect("importing binary dump");

    for n in 0..100usize {
        let key = format!("key {n}");
        let expected = format!("value {n}").into_bytes();
        assert_eq!(fresh.get::<str, Vec<u8>>(key.as_str()).unwrap(), Some(expected));
    }
}

#[test]
fn api_export_import_ascii_roundtrip() {
    let mut db = common::basic(100);

    let mut buf = Vec::new();
    db.export_ascii::<str>(&mut buf, None)
        .expect("exporting ascii dump");

    let mut fresh = OpenOptions::new()
        .write()
        .create()
        .tempfile()
        .expect("creating fresh database");
    fresh
        .import_ascii(&mut buf.as_slice())
        .expect("importing ascii dump");

    for n in 0..100usize {
        let key = format!("key {n}");
        let expected = format!("value {n}").into_bytes();
        assert_eq!(fresh.get::<str, Vec<u8>>(key.as_str()).unwrap(), Some(expected));
    }
}
