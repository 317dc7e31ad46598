//! Id-Size-Payload-Padding record format
//!
//! A stream of records, each one tagged with a fixed width id so a reader can
//! step over the records it doesn't care about without understanding them.
//! Records nest: a payload may itself be a sequence of records.
//!
//! # Record
//!
//! Unless otherwise noted everything is stored in Little Endian format. The
//! widths of `id` and `size` and the alignment are picked per [`Format`],
//! none of it is self-describing so reader and writer must agree up front.
//!
//! | Type      | Name    | Description |
//! | --------: | ------- | ----------- |
//! | `F::Id`   | id      | What the payload holds |
//! | `F::Size` | size    | The length of the payload, padding excluded, is allowed to be 0 bytes |
//! | [u8; N]   | payload | The content of the record, interpret according to the id |
//! | [u8; P]   | padding | Zeros, <code>P = (ALIGN - N % ALIGN) % ALIGN</code> |
//!
//! # Writing
//!
//! [`open`] writes the id and a zero size placeholder, the payload is then
//! written straight to the stream and [`close`] pads the record, seeks back
//! and patches in the real size. The stream must be able to `tell` and `seek`
//! for that, stages that can't should go through
//! [`Record::write_buffered`] instead.
//!
//! # Reading
//!
//! [`find`] walks records with [`read_id`] and [`ignore`] until the id
//! matches, leaving the stream right after the id. [`RecordMut::read`] then
//! reads the size and decodes the payload through a [`rcore::Limiter`] so the
//! decoder can never run past the record.
use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use rcore::{Stream, StreamError, StreamExt};

mod builder;
mod raw;
mod record;

pub use builder::{close, open, Open};
pub use raw::{find, ignore, read_id};
pub use record::{Payload, Record, RecordMut};

#[derive(Error, Debug)]
pub enum IdrecError {
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error("id {0:#x} does not fit the id field")]
    IdOverflow(u64),
    #[error("record length {0} does not fit the size field")]
    LengthOverflow(u64),
    #[error("stream can't report its position")]
    Unpositioned,
    #[error("payload is not valid utf-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl IdrecError {
    pub fn is_eof(&self) -> bool {
        matches!(self, IdrecError::Stream(e) if e.is_eof())
    }
}

/// Width of an on disk integer field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Width {
    U8,
    U16,
    U32,
    U64,
}

impl Width {
    pub fn from_bytes(bytes: u64) -> Option<Width> {
        match bytes {
            1 => Some(Width::U8),
            2 => Some(Width::U16),
            4 => Some(Width::U32),
            8 => Some(Width::U64),
            _ => None,
        }
    }

    pub fn bytes(self) -> u64 {
        match self {
            Width::U8 => 1,
            Width::U16 => 2,
            Width::U32 => 4,
            Width::U64 => 8,
        }
    }

    pub fn fits(self, value: u64) -> bool {
        match self {
            Width::U64 => true,
            w => value < 1 << (w.bytes() * 8),
        }
    }

    pub fn read<S: Stream + ?Sized>(self, stream: &mut S) -> Result<u64, StreamError> {
        let mut buf = [0u8; 8];
        let len = self.bytes() as usize;
        stream.read_exact(&mut buf[..len])?;
        Ok(LittleEndian::read_uint(&buf, len))
    }

    /// Callers check [`Width::fits`] first, wider values are cut.
    pub fn write<S: Stream + ?Sized>(self, stream: &mut S, value: u64) -> Result<(), StreamError> {
        match self {
            Width::U8 => stream.write_u8(value as u8),
            Width::U16 => stream.write_u16::<LittleEndian>(value as u16),
            Width::U32 => stream.write_u32::<LittleEndian>(value as u32),
            Width::U64 => stream.write_u64::<LittleEndian>(value),
        }
    }
}

/// An unsigned integer usable as an id or size field.
pub trait Field: Copy + Eq + fmt::Debug + Into<u64> + TryFrom<u64> {
    const WIDTH: Width;
}

impl Field for u8 {
    const WIDTH: Width = Width::U8;
}

impl Field for u16 {
    const WIDTH: Width = Width::U16;
}

impl Field for u32 {
    const WIDTH: Width = Width::U32;
}

impl Field for u64 {
    const WIDTH: Width = Width::U64;
}

/// Compile time choice of field widths and alignment.
pub trait Format {
    type Id: Field;
    type Size: Field;
    const ALIGN: u64;
}

/// The same choice made at runtime, what every operation works from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    pub id: Width,
    pub size: Width,
    pub align: u64,
}

impl Layout {
    pub fn of<F: Format>() -> Layout {
        Layout {
            id: F::Id::WIDTH,
            size: F::Size::WIDTH,
            align: F::ALIGN,
        }
    }

    pub fn header_size(&self) -> u64 {
        self.id.bytes() + self.size.bytes()
    }

    pub fn padding(&self, len: u64) -> u64 {
        padding(len, self.align)
    }
}

/// Zero bytes needed after `len` bytes to land on a multiple of `align`.
///
/// An alignment of 0 or 1 never pads.
pub fn padding(len: u64, align: u64) -> u64 {
    if align <= 1 {
        return 0;
    }
    (align - len % align) % align
}

pub fn header_size<F: Format>() -> u64 {
    Layout::of::<F>().header_size()
}
