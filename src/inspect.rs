use std::io::Write;
use std::path::Path;

use log::debug;

use rcore::buf::fill_buf;
use rcore::{Buffer, CachedFile, FileStream, Limiter, Mode, Pos, Stream, POS_MAX};
use rrec::idrec::Layout;

use crate::cli::{CliError, Config};
use crate::hash::checksum;

// Bytes per line of dump output
const DUMP_WIDTH: usize = 32;

#[derive(Debug, PartialEq, Eq)]
pub struct Entry {
    pub offset: Pos,
    pub id: u64,
    pub len: u64,
    pub padding: u64,
    pub digest: u32,
}

fn open(path: &Path, config: &Config) -> Result<CachedFile, CliError> {
    let file = FileStream::open(
        path,
        Mode::READ | Mode::OPEN_EXISTING | Mode::SHARE_READ | Mode::BINARY,
    )?;
    Ok(CachedFile::with_blocks(
        file,
        config.io.cache_block,
        config.io.cache_blocks,
    )?)
}

/// Every record from the current position on.
pub fn entries<S: Stream + ?Sized>(
    stream: &mut S,
    layout: &Layout,
) -> Result<Vec<Entry>, CliError> {
    let mut entries = vec![];

    loop {
        let offset = stream.tell();
        let id = match layout.read_id(stream, POS_MAX)? {
            Some(id) => id,
            None => break,
        };
        let len = match layout.read_size(stream) {
            Ok(len) => len,
            Err(e) if e.is_eof() => return Err(CliError::Truncated(offset)),
            Err(e) => return Err(e.into()),
        };

        let (digest, read) = checksum(&mut Limiter::new(&mut *stream, len))?;
        if read < len {
            return Err(CliError::Truncated(offset));
        }

        let padding = layout.padding(len);
        if stream.skip(padding).is_err() {
            return Err(CliError::Truncated(offset));
        }

        debug!("inspect: {:#x} at {}, {} bytes", id, offset, len);
        entries.push(Entry {
            offset,
            id,
            len,
            padding,
            digest,
        });
    }

    Ok(entries)
}

pub fn list<W: Write>(path: &Path, config: &Config, out: &mut W) -> Result<(), CliError> {
    let layout = config.layout()?;
    let mut file = open(path, config)?;
    let mut reader = Buffer::new(&mut file, config.io.read_block, 0);

    let tag_width = layout.id.bytes() as usize * 2 + 2;
    for entry in entries(&mut reader, &layout)? {
        writeln!(
            out,
            "{:>10}  {:#0tag_width$x}  {:>10}  {:>3}  {}",
            entry.offset,
            entry.id,
            entry.len,
            entry.padding,
            hex::encode(entry.digest.to_be_bytes()),
            tag_width = tag_width,
        )?;
    }
    Ok(())
}

/// Leaves `stream` on the size field of the first record carrying `tag`.
fn seek_tag<S: Stream + ?Sized>(
    stream: &mut S,
    layout: &Layout,
    tag: u64,
) -> Result<Option<Pos>, CliError> {
    if !layout.id.fits(tag) {
        return Err(CliError::Tag(tag));
    }
    if !layout.find(stream, tag, POS_MAX)? {
        return Ok(None);
    }
    Ok(Some(stream.tell() - layout.id.bytes()))
}

/// Prints offset and length of the record, `false` when there is none.
pub fn find<W: Write>(
    path: &Path,
    tag: u64,
    config: &Config,
    out: &mut W,
) -> Result<bool, CliError> {
    let layout = config.layout()?;
    let mut file = open(path, config)?;
    let mut reader = Buffer::new(&mut file, config.io.read_block, 0);

    match seek_tag(&mut reader, &layout, tag)? {
        Some(offset) => {
            let len = layout.read_size(&mut reader)?;
            writeln!(out, "{} {}", offset, len)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Prints the payload of the record as hex, `false` when there is none.
pub fn dump<W: Write>(
    path: &Path,
    tag: u64,
    config: &Config,
    out: &mut W,
) -> Result<bool, CliError> {
    let layout = config.layout()?;
    let mut file = open(path, config)?;
    let mut reader = Buffer::new(&mut file, config.io.read_block, 0);

    let offset = match seek_tag(&mut reader, &layout, tag)? {
        Some(offset) => offset,
        None => return Ok(false),
    };
    let len = layout.read_size(&mut reader)?;

    let mut payload = Limiter::new(&mut reader, len);
    let mut line = [0u8; DUMP_WIDTH];
    loop {
        let (eof, read) = fill_buf(&mut payload, &mut line)?;
        if read > 0 {
            writeln!(out, "{}", hex::encode(&line[..read]))?;
        }
        if eof {
            break;
        }
    }

    if payload.remaining() > 0 {
        return Err(CliError::Truncated(offset));
    }
    Ok(true)
}
