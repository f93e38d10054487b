//
// tests/cas.rs -- atomic compare-and-swap semantics
//
// Copyright (c) 2024 Jeff Garzik
//
// This file is part of the xdbm software project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT

use xdbm::{CompareAndSwapSummary, OpenOptions, Store, ReadWrite};

#[test]
fn api_compare_and_swap() {
    #[derive(Debug)]
    struct Test {
        current: Option<&'static [u8]>,
        old: Option<&'static [u8]>,
        new: Option<&'static [u8]>,
        expected: CompareAndSwapSummary,
    }

    fn the_test(
        db: &mut Store<ReadWrite>,
        Test {
            current,
            old,
            new,
            expected,
        }: Test,
    ) {
        let key: &[u8] = b"key";
        db.remove(key).expect("remove");

        if let Some(current) = current {
            db.insert(key, current).expect("seed insert");
        }

        let result = db
            .compare_and_swap(key, old, new)
            .expect("compare_and_swap");

        assert_eq!(result, expected, "current: {current:?}, old: {old:?}, new: {new:?}");
    }

    let mut db = OpenOptions::new()
        .write()
        .create()
        .tempfile()
        .expect("creating temporary database");

    const A: &[u8] = b"one";
    const B: &[u8] = b"two";

    [
        // Delete if old didn't exist and key is absent.
        (None, None, None, (None, None)),
        // Insert if old didn't exist (key is absent, so this is the expected use).
        (None, None, Some(A), (None, Some(A))),
        // old expects a value but the key is absent: mismatch, no change.
        (None, Some(A), Some(A), (None, None)),
        (None, Some(A), None, (None, None)),
        // old expects absence but the key holds a value: mismatch, no change.
        (Some(A), None, None, (Some(A), Some(A))),
        // old matches: replace.
        (Some(A), Some(A), Some(B), (Some(A), Some(B))),
        // old matches: delete.
        (Some(A), Some(A), None, (Some(A), None)),
        // old doesn't match the current value: mismatch, no change.
        (Some(A), Some(B), None, (Some(A), Some(A))),
    ]
    .into_iter()
    .enumerate()
    .for_each(|(n, (current, old, new, (expected_was, expected_is)))| {
        the_test(
            &mut db,
            Test {
                current,
                old,
                new,
                expected: CompareAndSwapSummary {
                    was: expected_was.map(|bs| bs.to_vec()),
                    is: expected_is.map(|bs| bs.to_vec()),
                },
            },
        );
        println!("case {n} ok");
    });
}
