//
// tests/convert.rs -- standard <-> numsync format conversion
//
// Copyright (c) 2024 Jeff Garzik
//
// This file is part of the xdbm software project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT

use xdbm::OpenOptions;

#[test]
fn api_convert() {
    for starting_numsync in [false, true] {
        let path = tempfile::tempdir().unwrap().into_path().join("db");

        OpenOptions::new()
            .write()
            .create()
            .numsync(starting_numsync)
            .open(&path)
            .and_then(|mut db| {
                db.insert(b"key".as_slice(), b"value".as_slice()).map(|_| ())?;
                db.sync()
            })
            .expect("creating database");

        let target_numsync = !starting_numsync;

        OpenOptions::new()
            .write()
            .open(&path)
            .and_then(|mut db| {
                db.set_numsync(target_numsync)?;
                db.sync()
            })
            .expect("converting format");

        let db = OpenOptions::new()
            .open(&path)
            .expect("reopening converted database");

        assert_eq!(db.magic().is_numsync(), target_numsync);
    }
}
