//
// snapshot.rs -- crash-recovery snapshot pairs (even/odd reflink clones)
//
// Copyright (c) 2024 Jeff Garzik
//
// This file is part of the xdbm software project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT

//! Crash-recovery "failure atomic" support.
//!
//! A database opened with [`crate::Store::failure_atomic`] maintains a pair of sibling files
//! (conventionally suffixed `~even`/`~odd`) that each hold a reflink clone of the database as of
//! the most recent successful [`crate::Store::sync`]. Exactly one of the pair is marked readable
//! (its permission bits carry `0o400`) at any time in steady state; the other carries `0o200`,
//! marking it either uninitialized or superseded. A process that crashes mid-write can recover by
//! picking whichever of the pair [`latest_snapshot`] selects.

use std::path::PathBuf;

use crate::Result;

/// Outcome of comparing an even/odd snapshot pair for recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// The given path is the snapshot to recover from.
    Selected(PathBuf),
    /// Both files are readable and their `numsync` counters disagree by more than the one step a
    /// normal rotation produces; something other than ordinary operation touched them.
    Suspicious,
    /// Both files are readable, agree on `numsync`, and have identical modification times --
    /// they're the same snapshot (or indistinguishable).
    Same,
    /// Neither file is in a readable (committed) state.
    Bad,
}

#[cfg(unix)]
mod imp {
    use std::fs::{self, File};
    use std::io;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
    use std::os::unix::io::AsRawFd;
    use std::path::{Path, PathBuf};

    use crate::header::Header;
    use crate::{Error, Result};

    use super::SnapshotOutcome;

    const MODE_WRITING: u32 = 0o200;
    const MODE_READABLE: u32 = 0o400;

    // Linux `FICLONE` ioctl request number (`_IOW(0x94, 9, int)`). Defined locally rather than
    // taken from `libc`, which does not expose it on every target.
    const FICLONE: libc::c_ulong = 0x4004_9409;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Eo {
        Even,
        Odd,
    }

    impl Eo {
        fn flip(self) -> Self {
            match self {
                Eo::Even => Eo::Odd,
                Eo::Odd => Eo::Even,
            }
        }
    }

    /// Tracks an open even/odd snapshot pair and which of the two is next in line to receive a
    /// rotation.
    #[derive(Debug)]
    pub struct SnapshotState {
        even: PathBuf,
        odd: PathBuf,
        next: Eo,
        disabled: bool,
    }

    impl SnapshotState {
        /// Creates a fresh, empty even/odd pair at the given (currently nonexistent) paths and
        /// performs the initial snapshot of `db`.
        pub fn setup(even: PathBuf, odd: PathBuf, db: &File) -> Result<Self> {
            if even == odd {
                return Err(Error::BadSnapshot(
                    "even and odd snapshot paths must differ".into(),
                ));
            }

            for path in [&even, &odd] {
                let f = fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(MODE_WRITING)
                    .open(path)
                    .map_err(Error::Io)?;
                fsync_to_root(&f, path).map_err(Error::Io)?;
            }

            let mut state = SnapshotState {
                even,
                odd,
                next: Eo::Even,
                disabled: false,
            };

            state.rotate(db).map_err(Error::Io)?;

            Ok(state)
        }

        fn target(&self) -> &Path {
            match self.next {
                Eo::Even => &self.even,
                Eo::Odd => &self.odd,
            }
        }

        fn other(&self) -> &Path {
            match self.next {
                Eo::Even => &self.odd,
                Eo::Odd => &self.even,
            }
        }

        /// Clones `db`'s current on-disk contents into whichever of the even/odd files is next
        /// in line, then marks the other half of the pair as the superseded, writable half.
        ///
        /// Self-disables (becoming a permanent no-op for the lifetime of this handle) if the
        /// platform's reflink ioctl reports unsupported, mirroring upstream's handling of
        /// `ENOSYS`/`EINVAL`/`EOPNOTSUPP`.
        pub fn rotate(&mut self, db: &File) -> io::Result<()> {
            if self.disabled {
                return Ok(());
            }

            let target = self.target().to_path_buf();
            let other = self.other().to_path_buf();

            fs::set_permissions(&target, fs::Permissions::from_mode(MODE_WRITING))?;
            let target_file = fs::OpenOptions::new().write(true).open(&target)?;
            target_file.sync_all()?;

            match reflink_clone(db, &target_file) {
                Ok(()) => {}
                Err(err) if is_unsupported(&err) => {
                    self.disabled = true;
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
            target_file.sync_all()?;

            fs::set_permissions(&target, fs::Permissions::from_mode(MODE_READABLE))?;
            target_file.sync_all()?;

            fs::set_permissions(&other, fs::Permissions::from_mode(MODE_WRITING))?;
            fs::OpenOptions::new().write(true).open(&other)?.sync_all()?;

            self.next = self.next.flip();

            Ok(())
        }
    }

    fn reflink_clone(src: &File, dst: &File) -> io::Result<()> {
        let ret = unsafe { libc::ioctl(dst.as_raw_fd(), FICLONE, src.as_raw_fd()) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn is_unsupported(err: &io::Error) -> bool {
        matches!(
            err.raw_os_error(),
            Some(libc::ENOSYS) | Some(libc::EINVAL) | Some(libc::EOPNOTSUPP)
        )
    }

    /// Walks from `path` up to the filesystem root, fsyncing every directory along the way, so
    /// that the directory entries naming a newly created snapshot file survive a crash.
    fn fsync_to_root(file: &File, path: &Path) -> io::Result<()> {
        file.sync_all()?;

        let mut dir = fs::canonicalize(path)?;
        while dir.pop() {
            File::open(&dir)?.sync_all()?;
        }

        Ok(())
    }

    struct SnapshotInfo {
        /// `None` when the snapshot's header is the standard (non-numsync)
        /// variant, which carries no sync counter to compare.
        numsync: Option<u32>,
        mtime: std::time::SystemTime,
    }

    fn stat_snapshot(path: &Path) -> Result<Option<SnapshotInfo>> {
        let metadata = match fs::metadata(path) {
            Ok(m) => m,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(Error::Io(err)),
        };

        if !metadata.is_file() {
            return Err(Error::BadSnapshot(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        let mode = metadata.permissions().mode() & 0o777;
        let readable = mode & MODE_READABLE != 0;
        let writing = mode & MODE_WRITING != 0;

        match (readable, writing) {
            (true, true) | (false, false) => Err(Error::BadSnapshot(format!(
                "{} has an invalid permission state (mode {mode:o})",
                path.display()
            ))),
            (false, true) => Ok(None),
            (true, false) => {
                let mut f = File::open(path).map_err(Error::Io)?;
                let file_len = f.metadata().map_err(Error::Io)?.len();
                let header = Header::from_reader(None, file_len, &mut f)?;

                // a standard-header snapshot carries no numsync counter;
                // the caller falls back to comparing mtimes for it.
                let numsync = header.magic.is_numsync().then_some(header.numsync);

                Ok(Some(SnapshotInfo {
                    numsync,
                    mtime: metadata.modified().map_err(Error::Io)?,
                }))
            }
        }
    }

    /// Picks the snapshot to recover from out of an even/odd pair, per `gdbm_numsync_cmp`'s
    /// wraparound-aware comparison: a `numsync` gap of exactly +1/-1 identifies the newer file
    /// unambiguously; any other nonzero gap is `Suspicious` (neither ordinary rotation nor a
    /// single missed step could have produced it).
    pub fn latest_snapshot(even: &Path, odd: &Path) -> Result<SnapshotOutcome> {
        let e = stat_snapshot(even)?;
        let o = stat_snapshot(odd)?;

        match (e, o) {
            (None, None) => Ok(SnapshotOutcome::Bad),
            (Some(_), None) => Ok(SnapshotOutcome::Selected(even.to_path_buf())),
            (None, Some(_)) => Ok(SnapshotOutcome::Selected(odd.to_path_buf())),
            (Some(e), Some(o)) => match (e.numsync, o.numsync) {
                (Some(en), Some(on)) => {
                    let gap = on.wrapping_sub(en) as i32;
                    match gap {
                        0 if o.mtime == e.mtime => Ok(SnapshotOutcome::Same),
                        0 if o.mtime > e.mtime => Ok(SnapshotOutcome::Selected(odd.to_path_buf())),
                        0 => Ok(SnapshotOutcome::Selected(even.to_path_buf())),
                        1 => Ok(SnapshotOutcome::Selected(odd.to_path_buf())),
                        -1 => Ok(SnapshotOutcome::Selected(even.to_path_buf())),
                        _ => Ok(SnapshotOutcome::Suspicious),
                    }
                }
                // numsync unavailable on at least one side (a standard-header
                // snapshot): compare mtime instead.
                _ if o.mtime == e.mtime => Ok(SnapshotOutcome::Same),
                _ if o.mtime > e.mtime => Ok(SnapshotOutcome::Selected(odd.to_path_buf())),
                _ => Ok(SnapshotOutcome::Selected(even.to_path_buf())),
            },
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use std::fs::File;
    use std::io;
    use std::path::{Path, PathBuf};

    use crate::{Error, Result};

    use super::SnapshotOutcome;

    /// Snapshot support requires POSIX permission bits and is unavailable on this platform.
    #[derive(Debug)]
    pub struct SnapshotState {
        _private: (),
    }

    impl SnapshotState {
        pub fn setup(_even: PathBuf, _odd: PathBuf, _db: &File) -> Result<Self> {
            Err(Error::SnapshotUnsupported)
        }

        pub fn rotate(&mut self, _db: &File) -> io::Result<()> {
            Ok(())
        }
    }

    pub fn latest_snapshot(_even: &Path, _odd: &Path) -> Result<SnapshotOutcome> {
        Err(Error::SnapshotUnsupported)
    }
}

pub use imp::{latest_snapshot, SnapshotState};

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn latest_snapshot_missing_pair_is_bad() {
        let dir = tempfile::tempdir().unwrap();
        let even = dir.path().join("db~even");
        let odd = dir.path().join("db~odd");

        assert_eq!(latest_snapshot(&even, &odd).unwrap(), SnapshotOutcome::Bad);
    }

    #[test]
    fn latest_snapshot_rejects_ambiguous_permission_bits() {
        let dir = tempfile::tempdir().unwrap();
        let even = dir.path().join("db~even");
        let odd = dir.path().join("db~odd");

        fs::write(&even, b"not a real header, just exercising the permission-bit guard").unwrap();
        fs::set_permissions(&even, fs::Permissions::from_mode(0o600)).unwrap();

        assert!(latest_snapshot(&even, &odd).is_err());
    }
}
