//
// tests/snapshot.rs -- crash-recovery even/odd snapshot selection
//
// Copyright (c) 2024 Jeff Garzik
//
// This file is part of the xdbm software project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT

use xdbm::{latest_snapshot, OpenOptions, SnapshotOutcome};

fn kv(i: usize) -> (Vec<u8>, Vec<u8>) {
    (i.to_le_bytes().to_vec(), vec![(i % 251) as u8; 256])
}

/// Scenario 3: snapshot selection. Enables crash-recovery snapshots,
/// performs two rounds of inserts each followed by a `sync`, and confirms
/// `latest_snapshot` selects the half with the greater `numsync` and that
/// opening it yields every record inserted so far.
///
/// Reflink cloning depends on the backing filesystem, not just the OS; if
/// this environment's filesystem doesn't support it, `snapshot.rs`
/// self-disables and neither half of the pair ever becomes readable. That
/// is itself correct behavior (see `rotate`'s `ENOSYS`/`EINVAL`/
/// `EOPNOTSUPP` handling), so this test detects that case after the first
/// sync and exits early rather than failing on an environment limitation.
#[test]
fn latest_snapshot_selects_the_most_recently_synced_half() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("db");
    let even = dir.path().join("db~even");
    let odd = dir.path().join("db~odd");

    let mut db = OpenOptions::new()
        .write()
        .create()
        .numsync(true)
        .open(&db_path)
        .expect("creating database");

    db.failure_atomic(&even, &odd).expect("enabling snapshots");

    for i in 0..100usize {
        let (k, v) = kv(i);
        db.insert(&k, &v).expect("insert");
    }
    db.sync().expect("sync");

    if latest_snapshot(&even, &odd).expect("selecting after first sync") == SnapshotOutcome::Bad {
        eprintln!("reflink clone unsupported on this filesystem; skipping snapshot scenario");
        return;
    }

    let (k100, v100) = kv(100);
    db.insert(&k100, &v100).expect("insert");
    db.sync().expect("sync");

    let selected = match latest_snapshot(&even, &odd).expect("selecting after second sync") {
        SnapshotOutcome::Selected(path) => path,
        other => panic!("expected a selected snapshot, got {other:?}"),
    };

    let mut recovered = OpenOptions::new()
        .open(&selected)
        .expect("opening selected snapshot");
    for i in 0..=100usize {
        let (k, v) = kv(i);
        assert_eq!(
            recovered.get::<_, Vec<u8>>(&k).unwrap(),
            Some(v),
            "missing record {i} in recovered snapshot"
        );
    }
}

/// Boundary: a `numsync` gap wider than one ordinary rotation step is
/// `Suspicious`, not resolved in either file's favor. Constructed directly
/// (rather than via `failure_atomic`'s rotation, which never produces more
/// than a one-step gap between a readable pair) since this represents
/// something other than ordinary operation having touched the files.
#[test]
fn latest_snapshot_flags_a_suspicious_gap() {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let even = dir.path().join("db~even");
    let odd = dir.path().join("db~odd");

    for (path, sync_count) in [(&even, 1usize), (&odd, 5usize)] {
        let mut db = OpenOptions::new()
            .write()
            .create()
            .numsync(true)
            .open(path)
            .expect("creating probe database");
        for _ in 0..sync_count {
            db.insert("a", "1").expect("insert");
            db.sync().expect("sync");
        }
        drop(db);
        fs::set_permissions(path, fs::Permissions::from_mode(0o400)).expect("marking readable");
    }

    assert_eq!(
        latest_snapshot(&even, &odd).expect("selecting"),
        SnapshotOutcome::Suspicious
    );
}

/// A readable snapshot whose header is the standard (non-numsync) variant
/// carries no sync counter; selection must fall back to comparing `mtime`
/// rather than erroring the whole comparison.
#[test]
fn latest_snapshot_falls_back_to_mtime_without_numsync() {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::thread::sleep;
    use std::time::Duration;

    let dir = tempfile::tempdir().unwrap();
    let even = dir.path().join("db~even");
    let odd = dir.path().join("db~odd");

    for path in [&even, &odd] {
        let mut db = OpenOptions::new()
            .write()
            .create()
            .numsync(false)
            .open(path)
            .expect("creating standard-header database");
        db.insert("a", "1").expect("insert");
        db.sync().expect("sync");
        drop(db);
        fs::set_permissions(path, fs::Permissions::from_mode(0o400)).expect("marking readable");

        // ensure the next file's mtime lands in a later tick; coarse
        // filesystem mtime resolution otherwise makes the two collide.
        sleep(Duration::from_millis(1100));
    }

    assert_eq!(
        latest_snapshot(&even, &odd).expect("selecting"),
        SnapshotOutcome::Selected(odd)
    );
}
