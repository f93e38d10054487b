//
// ser.rs -- on-disk primitive serialization routines
//
// Copyright (c) 2019-2024 Jeff Garzik
//
// This file is part of the xdbm software project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use std::io::{self, Read, Write};

/// Which GDBM magic variant (and therefore historical off_t width) gets
/// stamped into the header. Kept distinct from [`Alignment`]: on-disk
/// field width is governed by alignment, while `Offset` only selects
/// which magic constant identifies the file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Offset {
    /// Legacy 32-bit `off_t` database.
    Small,
    /// Large-file-capable, 64-bit `off_t` database.
    LFS,
}

impl Offset {
    /// Width, in bytes, of a bare directory-entry offset field. The
    /// directory is a flat array of file offsets with no interleaved
    /// fixed-width fields, so unlike the header/bucket/avail structs its
    /// entry width tracks the legacy off_t width directly rather than
    /// [`Alignment`].
    pub fn width(self) -> u32 {
        match self {
            Offset::Small => 4,
            Offset::LFS => 8,
        }
    }
}

/// Field alignment of DB file
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Alignment {
    /// File offset fields are 32bit
    Align32,
    /// File offset fields are 64bit
    Align64,
}

impl Alignment {
    /// Byte width of one on-disk offset field, padding excluded.
    pub fn offset_width(self) -> u32 {
        match self {
            Alignment::Align32 => 4,
            Alignment::Align64 => 8,
        }
    }

    /// Bytes of padding that precede an offset field of this alignment.
    pub fn padding(self) -> u32 {
        match self {
            Alignment::Align32 => 0,
            Alignment::Align64 => 4,
        }
    }
}

/// Endianness of DB file
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// The three independent axes of on-disk representation. Every
/// serialize/deserialize routine in the crate takes a `Layout` rather
/// than each axis separately.
#[derive(Clone, Copy, Debug)]
pub struct Layout {
    pub offset: Offset,
    pub alignment: Alignment,
    pub endian: Endian,
}

// serialize u32, with runtime endian selection
pub fn w32(endian: Endian, val: u32) -> Vec<u8> {
    match endian {
        Endian::Little => val.to_le_bytes(),
        Endian::Big => val.to_be_bytes(),
    }
    .to_vec()
}

// serialize u64, with runtime endian selection
pub fn w64(endian: Endian, val: u64) -> Vec<u8> {
    match endian {
        Endian::Little => val.to_le_bytes(),
        Endian::Big => val.to_be_bytes(),
    }
    .to_vec()
}

pub fn woff_t(alignment: Alignment, endian: Endian, val: u64) -> Vec<u8> {
    match alignment {
        Alignment::Align32 => w32(endian, val as u32),
        Alignment::Align64 => w64(endian, val),
    }
}

pub fn write32(endian: Endian, w: &mut impl Write, val: u32) -> io::Result<()> {
    w.write_all(&w32(endian, val))
}

pub fn write64(endian: Endian, w: &mut impl Write, val: u64) -> io::Result<()> {
    w.write_all(&w64(endian, val))
}

pub fn read32(endian: Endian, r: &mut impl Read) -> io::Result<u32> {
    match endian {
        Endian::Little => r.read_u32::<LittleEndian>(),
        Endian::Big => r.read_u32::<BigEndian>(),
    }
}

pub fn read64(endian: Endian, r: &mut impl Read) -> io::Result<u64> {
    match endian {
        Endian::Little => r.read_u64::<LittleEndian>(),
        Endian::Big => r.read_u64::<BigEndian>(),
    }
}

/// Writes a file-offset field: a bare 32-bit value under
/// [`Alignment::Align32`], or a zero-padded 64-bit value under
/// [`Alignment::Align64`].
pub fn write_off(layout: Layout, w: &mut impl Write, val: u64) -> io::Result<()> {
    w.write_all(&woff_t(layout.alignment, layout.endian, val))
}

pub fn read_off(layout: Layout, r: &mut impl Read) -> io::Result<u64> {
    match layout.alignment {
        Alignment::Align32 => read32(layout.endian, r).map(u64::from),
        Alignment::Align64 => read64(layout.endian, r),
    }
}

/// Consumes the padding bytes that precede a 64-bit-aligned field; no-op
/// under 32-bit alignment.
pub fn read_pad(layout: Layout, r: &mut impl Read) -> io::Result<()> {
    if layout.alignment.padding() > 0 {
        let mut pad = [0u8; 4];
        r.read_exact(&mut pad)?;
    }
    Ok(())
}

pub fn write_pad(layout: Layout, w: &mut impl Write) -> io::Result<()> {
    if layout.alignment.padding() > 0 {
        w.write_all(&[0u8; 4])?;
    }
    Ok(())
}
