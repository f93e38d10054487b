//
// options.rs -- GDBM core library API routines
//
// Copyright (c) 2024 Jeff Garzik, John Hedges
//
// This file is part of the xdbm software project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT

use crate::{Alignment, Endian, Error, Store, Offset, ReadOnly, ReadWrite, Result};

#[derive(Copy, Clone, Debug, PartialOrd, PartialEq, Default)]
pub enum BlockSize {
    #[default]
    Filesystem,
    Roughly(u32),
    Exactly(u32),
}

#[derive(Default, Copy, Clone, Debug)]
pub struct Create {
    pub offset: Option<Offset>,
    pub endian: Option<Endian>,
    pub no_numsync: bool,
    pub block_size: BlockSize,
    pub coalesce: bool,
    pub central_free: bool,
    pub newdb: bool,
}
#[derive(Default, Copy, Clone, Debug)]
pub struct NotCreate;

#[derive(Copy, Clone, Debug, Default)]
pub struct NotWrite;
#[derive(Copy, Clone, Debug, Default)]
pub struct Write<C> {
    pub sync: bool,
    pub fast_write: bool,
    pub create: C,
}

#[derive(Copy, Clone, Debug, Default)]
pub struct OpenOptions<W> {
    /// Override default alignement when opening a database.
    pub alignment: Option<Alignment>,
    /// Bytesize of in-memory bucket cache (defaults to DEFAULT_CACHESIZE)
    pub cachesize: Option<usize>,
    /// Skip advisory file locking entirely (matches upstream GDBM_NOLOCK).
    pub nolock: bool,

    pub write: W,
}

impl OpenOptions<NotWrite> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<W> OpenOptions<W> {
    pub fn alignment(self, alignment: Option<Alignment>) -> OpenOptions<W> {
        OpenOptions { alignment, ..self }
    }

    pub fn cachesize(self, cachesize: Option<usize>) -> OpenOptions<W> {
        OpenOptions { cachesize, ..self }
    }

    /// Disable advisory file locking entirely. Matches upstream GDBM's
    /// `GDBM_NOLOCK` flag; the caller becomes responsible for serializing
    /// access to the file.
    pub fn nolock(self, nolock: bool) -> OpenOptions<W> {
        OpenOptions { nolock, ..self }
    }
}

impl OpenOptions<NotWrite> {
    pub fn write(self) -> OpenOptions<Write<NotCreate>> {
        OpenOptions {
            alignment: self.alignment,
            cachesize: self.cachesize,
            nolock: self.nolock,
            write: Write {
                sync: false,
                fast_write: false,
                create: NotCreate,
            },
        }
    }
}

impl<C> OpenOptions<Write<C>> {
    pub fn sync(self, sync: bool) -> OpenOptions<Write<C>> {
        OpenOptions {
            alignment: self.alignment,
            cachesize: self.cachesize,
            nolock: self.nolock,
            write: Write {
                sync,
                ..self.write
            },
        }
    }

    /// Elide the intermediate fsync barriers of the bucket/directory/header
    /// flush order, keeping only the final one.
    pub fn fast_write(self, fast_write: bool) -> OpenOptions<Write<C>> {
        OpenOptions {
            alignment: self.alignment,
            cachesize: self.cachesize,
            nolock: self.nolock,
            write: Write {
                fast_write,
                ..self.write
            },
        }
    }
}

impl OpenOptions<Write<NotCreate>> {
    pub fn create(self) -> OpenOptions<Write<Create>> {
        OpenOptions {
            alignment: self.alignment,
            cachesize: self.cachesize,
            nolock: self.nolock,
            write: Write {
                create: Create::default(),
                sync: self.write.sync,
                fast_write: self.write.fast_write,
            },
        }
    }
}

impl OpenOptions<Write<Create>> {
    pub fn offset(self, offset: Option<Offset>) -> OpenOptions<Write<Create>> {
        OpenOptions {
            alignment: self.alignment,
            cachesize: self.cachesize,
            nolock: self.nolock,
            write: Write {
                create: Create {
                    offset,
                    ..self.write.create
                },
                ..self.write
            },
        }
    }

    pub fn endian(self, endian: Option<Endian>) -> OpenOptions<Write<Create>> {
        OpenOptions {
            alignment: self.alignment,
            cachesize: self.cachesize,
            nolock: self.nolock,
            write: Write {
                create: Create {
                    endian,
                    ..self.write.create
                },
                ..self.write
            },
        }
    }

    pub fn numsync(self, numsync: bool) -> OpenOptions<Write<Create>> {
        OpenOptions {
            alignment: self.alignment,
            cachesize: self.cachesize,
            nolock: self.nolock,
            write: Write {
                create: Create {
                    no_numsync: !numsync,
                    ..self.write.create
                },
                ..self.write
            },
        }
    }

    pub fn block_size(self, block_size: BlockSize) -> OpenOptions<Write<Create>> {
        OpenOptions {
            alignment: self.alignment,
            cachesize: self.cachesize,
            nolock: self.nolock,
            write: Write {
                create: Create {
                    block_size,
                    ..self.write.create
                },
                ..self.write
            },
        }
    }

    /// Merge adjacent free-space extents on release (upstream
    /// `GDBM_COALESCEBLKS`). Defaults to off.
    pub fn coalesce(self, coalesce: bool) -> OpenOptions<Write<Create>> {
        OpenOptions {
            alignment: self.alignment,
            cachesize: self.cachesize,
            nolock: self.nolock,
            write: Write {
                create: Create {
                    coalesce,
                    ..self.write.create
                },
                ..self.write
            },
        }
    }

    /// Route every freed extent to the header's master avail table instead
    /// of the owning bucket's local pool (upstream `GDBM_CENTFREE`).
    /// Defaults to off.
    pub fn central_free(self, central_free: bool) -> OpenOptions<Write<Create>> {
        OpenOptions {
            alignment: self.alignment,
            cachesize: self.cachesize,
            nolock: self.nolock,
            write: Write {
                create: Create {
                    central_free,
                    ..self.write.create
                },
                ..self.write
            },
        }
    }

    /// Always start from an empty database, discarding any existing file at the path
    /// (upstream `GDBM_NEWDB`). Without this, opening falls back to an existing file at the
    /// path if one is present, creating only when it is absent (`GDBM_WRCREAT`).
    pub fn newdb(self, newdb: bool) -> OpenOptions<Write<Create>> {
        OpenOptions {
            alignment: self.alignment,
            cachesize: self.cachesize,
            nolock: self.nolock,
            write: Write {
                create: Create {
                    newdb,
                    ..self.write.create
                },
                ..self.write
            },
        }
    }
}

impl OpenOptions<NotWrite> {
    pub fn open<P: AsRef<std::path::Path>>(&self, path: P) -> Result<Store<ReadOnly>> {
        std::fs::OpenOptions::new()
            .read(true)
            .open(path)
            .map_err(Error::Io)
            .and_then(|f| {
                Store::<ReadOnly>::open(f, self.alignment, self.cachesize, false, self.nolock)
            })
    }
}

impl OpenOptions<Write<NotCreate>> {
    pub fn open<P: AsRef<std::path::Path>>(&self, path: P) -> Result<Store<ReadWrite>> {
        std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(Error::Io)
            .and_then(|f| {
                Store::<ReadWrite>::open(f, self.alignment, self.cachesize, true, self.nolock)
            })
            .map(|mut db| {
                db.set_sync(self.write.sync);
                db.set_fast_write(self.write.fast_write);
                db
            })
    }
}

impl OpenOptions<Write<Create>> {
    pub fn open<P: AsRef<std::path::Path>>(&self, path: P) -> Result<Store<ReadWrite>> {
        if self.write.create.newdb {
            return std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)
                .map_err(Error::Io)
                .and_then(|f| Store::create(f, self))
                .map(|mut db| {
                    db.set_sync(self.write.sync);
                    db.set_fast_write(self.write.fast_write);
                    db
                });
        }

        std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(Error::Io)
            .and_then(|f| {
                Store::<ReadWrite>::open(f, self.alignment, self.cachesize, true, self.nolock)
            })
            .or_else(|_| {
                std::fs::OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create_new(true)
                    .open(&path)
                    .map_err(Error::Io)
                    .and_then(|f| Store::create(f, self))
            })
            .map(|mut db| {
                db.set_sync(self.write.sync);
                db.set_fast_write(self.write.fast_write);
                db
            })
    }

    /// Open a temporary database.
    ///
    /// The database file is created using `tempfile::tempfile` and therefore is never visible in
    /// the filesystem, and is deleted when the `Store` struct is dropped/closed. This is useful for
    /// creating a key-value dataset that is too large to fit in system memory, but is not required
    /// to be opened again.
    ///
    /// # Example
    /// ```
    /// # fn main() -> Result<(), String> {
    /// #     || -> xdbm::Result<()> {
    /// let db = xdbm::OpenOptions::new()
    ///     .cachesize(Some(100 * 1024))
    ///     .write()
    ///     .create()
    ///     .tempfile()?;
    /// #         Ok(())
    /// #     }().map_err(|e| e.to_string())
    /// # }
    /// ```
    pub fn tempfile(&self) -> Result<Store<ReadWrite>> {
        tempfile::tempfile()
            .map_err(Error::Io)
            .and_then(|f| Store::create(f, self))
            .map(|mut db| {
                db.set_sync(self.write.sync);
                db.set_fast_write(self.write.fast_write);
                db
            })
    }
}
