//
// lock.rs -- advisory whole-file locking at open time
//
// Copyright (c) 2024 Jeff Garzik
//
// This file is part of the xdbm software project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT

//! A single non-blocking advisory lock, acquired once at open time and released on close.
//!
//! Three locking mechanisms are tried in order -- `flock`, POSIX `lockf`, and `fcntl` range locks
//! -- since not every filesystem (notably some network filesystems) supports all three. The first
//! mechanism that isn't flatly unsupported wins; a genuine lock conflict on any mechanism is
//! reported immediately rather than falling through to try the next one.

#[cfg(unix)]
mod imp {
    use std::fs::File;
    use std::os::unix::io::{AsRawFd, RawFd};

    use crate::{Error, Result};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Mechanism {
        Flock,
        Lockf,
        Fcntl,
    }

    /// Outcome of trying a single locking mechanism.
    enum Try {
        /// Lock acquired.
        Ok,
        /// The mechanism is supported but the lock is held elsewhere: stop trying, this is a
        /// real conflict.
        Conflict,
        /// The mechanism isn't usable here (unsupported by the filesystem, or -- for `lockf` --
        /// the handle isn't writable); fall through to the next mechanism.
        Next,
    }

    /// An acquired advisory lock, released on drop.
    #[derive(Debug)]
    pub struct FileLock {
        fd: RawFd,
        mechanism: Mechanism,
        exclusive: bool,
    }

    impl FileLock {
        /// Tries `flock`, then `lockf`, then `fcntl`, in that order, non-blocking. The first
        /// mechanism to succeed wins; a conflict on any mechanism fails the whole acquisition
        /// immediately.
        pub fn acquire(f: &File, exclusive: bool) -> Result<Self> {
            let fd = f.as_raw_fd();

            match try_flock(fd, exclusive) {
                Try::Ok => {
                    return Ok(FileLock {
                        fd,
                        mechanism: Mechanism::Flock,
                        exclusive,
                    })
                }
                Try::Conflict => return Err(Error::CannotLock),
                Try::Next => {}
            }

            match try_lockf(fd, exclusive) {
                Try::Ok => {
                    return Ok(FileLock {
                        fd,
                        mechanism: Mechanism::Lockf,
                        exclusive,
                    })
                }
                Try::Conflict => return Err(Error::CannotLock),
                Try::Next => {}
            }

            match try_fcntl(fd, exclusive) {
                Try::Ok => Ok(FileLock {
                    fd,
                    mechanism: Mechanism::Fcntl,
                    exclusive,
                }),
                Try::Conflict | Try::Next => Err(Error::CannotLock),
            }
        }
    }

    impl Drop for FileLock {
        fn drop(&mut self) {
            match self.mechanism {
                Mechanism::Flock => {
                    unsafe { libc::flock(self.fd, libc::LOCK_UN) };
                }
                Mechanism::Lockf => {
                    unsafe { libc::lockf(self.fd, libc::F_ULOCK, 0) };
                }
                Mechanism::Fcntl => {
                    let mut fl: libc::flock = unsafe { std::mem::zeroed() };
                    fl.l_type = libc::F_UNLCK as libc::c_short;
                    fl.l_whence = libc::SEEK_SET as libc::c_short;
                    fl.l_start = 0;
                    fl.l_len = 0;
                    unsafe { libc::fcntl(self.fd, libc::F_SETLK, &fl) };
                }
            }
        }
    }

    fn conflict_errno(errno: i32) -> bool {
        errno == libc::EACCES || errno == libc::EAGAIN || errno == libc::EDEADLK
    }

    fn try_flock(fd: RawFd, exclusive: bool) -> Try {
        let op = (if exclusive { libc::LOCK_EX } else { libc::LOCK_SH }) | libc::LOCK_NB;

        if unsafe { libc::flock(fd, op) } == 0 {
            return Try::Ok;
        }

        match std::io::Error::last_os_error().raw_os_error() {
            Some(libc::EWOULDBLOCK) => Try::Conflict,
            _ => Try::Next,
        }
    }

    fn try_lockf(fd: RawFd, exclusive: bool) -> Try {
        // lockf requires a writable descriptor; readers can't take one, so always fall
        // through for a reader rather than risk spuriously treating an unrelated EBADF as
        // "unsupported."
        if !exclusive {
            return Try::Next;
        }

        if unsafe { libc::lockf(fd, libc::F_TLOCK, 0) } == 0 {
            return Try::Ok;
        }

        match std::io::Error::last_os_error().raw_os_error() {
            Some(errno) if conflict_errno(errno) => Try::Conflict,
            _ => Try::Next,
        }
    }

    fn try_fcntl(fd: RawFd, exclusive: bool) -> Try {
        let mut fl: libc::flock = unsafe { std::mem::zeroed() };
        fl.l_type = (if exclusive { libc::F_WRLCK } else { libc::F_RDLCK }) as libc::c_short;
        fl.l_whence = libc::SEEK_SET as libc::c_short;
        fl.l_start = 0;
        fl.l_len = 0;

        if unsafe { libc::fcntl(fd, libc::F_SETLK, &fl) } == 0 {
            return Try::Ok;
        }

        match std::io::Error::last_os_error().raw_os_error() {
            Some(errno) if conflict_errno(errno) => Try::Conflict,
            _ => Try::Next,
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use std::fs::File;

    use crate::Result;

    /// No-op lock on platforms without the POSIX locking primitives this module builds on.
    #[derive(Debug)]
    pub struct FileLock;

    impl FileLock {
        pub fn acquire(_f: &File, _exclusive: bool) -> Result<Self> {
            Ok(FileLock)
        }
    }
}

pub use imp::FileLock;
