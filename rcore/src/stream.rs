use byteorder::ByteOrder;

use crate::buf::fill_buf;
use crate::error::{Result, State, StreamError};

/// Offset from the start of a stream's addressable range.
pub type Pos = u64;

/// Reserved: never a valid offset, means "unbounded" or "invalid".
pub const POS_MAX: Pos = Pos::MAX;

const SCRATCH_SIZE: usize = 4 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekFrom {
    Start(u64),
    End(i64),
    Current(i64),
}

/// Resolve a seek request against a current position and a total size.
pub fn resolve_seek(pos: SeekFrom, current: Pos, size: Pos) -> Result<Pos> {
    let target = match pos {
        SeekFrom::Start(x) => Some(x),
        SeekFrom::End(x) => size.checked_add_signed(x),
        SeekFrom::Current(x) => current.checked_add_signed(x),
    };

    match target {
        Some(t) if t != POS_MAX => Ok(t),
        _ => Err(StreamError::SeekOutOfRange),
    }
}

/// The capability set every stage implements.
///
/// A stage owns exactly one [`State`]. Data moving calls first consult it and
/// re-report a terminal state without touching the medium. On success the
/// state stays `Ok`, running out of data moves it to `Eof`, anything else to
/// `Fail`.
///
/// `read` and `write` may be short, but never make zero progress on a
/// non-empty buffer without returning an error.
pub trait Stream {
    fn state(&self) -> State;

    fn ok(&self) -> bool {
        self.state().is_ok()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    fn flush(&mut self) -> Result<()> {
        self.state().check()
    }

    /// Current position, [`POS_MAX`] when the stage can't tell.
    fn tell(&self) -> Pos;

    /// Successful seeks clear `Eof`, never `Fail`.
    fn seek(&mut self, pos: SeekFrom) -> Result<Pos>;

    fn skip(&mut self, amount: u64) -> Result<()> {
        let mut scratch = [0u8; SCRATCH_SIZE];
        let mut left = amount;

        while left > 0 {
            let len = left.min(SCRATCH_SIZE as u64) as usize;
            self.read_exact(&mut scratch[..len])?;
            left -= len as u64;
        }
        Ok(())
    }

    /// Fewer bytes than requested ends in `Eof`.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        match fill_buf(self, buf)? {
            (false, _) => Ok(()),
            (true, _) => Err(StreamError::Eof),
        }
    }

    fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            match self.write(buf)? {
                0 => return Err(StreamError::Failed),
                x => buf = &buf[x..],
            }
        }
        Ok(())
    }
}

impl<S: Stream + ?Sized> Stream for &mut S {
    fn state(&self) -> State {
        (**self).state()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        (**self).write(buf)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn tell(&self) -> Pos {
        (**self).tell()
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<Pos> {
        (**self).seek(pos)
    }

    fn skip(&mut self, amount: u64) -> Result<()> {
        (**self).skip(amount)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        (**self).write_all(buf)
    }
}

impl<S: Stream + ?Sized> Stream for Box<S> {
    fn state(&self) -> State {
        (**self).state()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        (**self).write(buf)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn tell(&self) -> Pos {
        (**self).tell()
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<Pos> {
        (**self).seek(pos)
    }

    fn skip(&mut self, amount: u64) -> Result<()> {
        (**self).skip(amount)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        (**self).write_all(buf)
    }
}

/// Fixed width integer helpers, the way `byteorder::ReadBytesExt` sits on
/// top of `std::io::Read`.
pub trait StreamExt: Stream {
    fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_u16<B: ByteOrder>(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(B::read_u16(&buf))
    }

    fn read_u32<B: ByteOrder>(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(B::read_u32(&buf))
    }

    fn read_u64<B: ByteOrder>(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(B::read_u64(&buf))
    }

    fn write_u8(&mut self, n: u8) -> Result<()> {
        self.write_all(&[n])
    }

    fn write_u16<B: ByteOrder>(&mut self, n: u16) -> Result<()> {
        let mut buf = [0u8; 2];
        B::write_u16(&mut buf, n);
        self.write_all(&buf)
    }

    fn write_u32<B: ByteOrder>(&mut self, n: u32) -> Result<()> {
        let mut buf = [0u8; 4];
        B::write_u32(&mut buf, n);
        self.write_all(&buf)
    }

    fn write_u64<B: ByteOrder>(&mut self, n: u64) -> Result<()> {
        let mut buf = [0u8; 8];
        B::write_u64(&mut buf, n);
        self.write_all(&buf)
    }

    /// Copy everything up to `Eof` into `dst`, returns the byte count.
    fn copy_to<W: Stream + ?Sized>(&mut self, dst: &mut W) -> Result<u64> {
        let mut scratch = [0u8; SCRATCH_SIZE];
        let mut total = 0;

        loop {
            match self.read(&mut scratch) {
                Ok(len) => {
                    dst.write_all(&scratch[..len])?;
                    total += len as u64;
                }
                Err(StreamError::Eof) => return Ok(total),
                Err(e) => return Err(e),
            }
        }
    }
}

impl<S: Stream + ?Sized> StreamExt for S {}
