use log::{trace, warn};

use crate::error::{Result, State, StreamError};
use crate::stream::{Pos, SeekFrom, Stream, POS_MAX};

/// Read-ahead and write-behind blocks in front of another stage.
///
/// Either block size may be zero, which passes that direction straight
/// through. The two directions don't coordinate with each other, so callers
/// mixing reads and writes must keep the inner position consistent
/// themselves.
pub struct Buffer<S: Stream> {
    inner: S,
    read_buf: Vec<u8>,
    read_pos: usize,
    read_len: usize,
    write_buf: Vec<u8>,
    write_size: usize,
    state: State,
}

impl<S: Stream> Buffer<S> {
    pub fn new(inner: S, read_size: usize, write_size: usize) -> Self {
        Buffer {
            inner,
            read_buf: vec![0u8; read_size],
            read_pos: 0,
            read_len: 0,
            write_buf: Vec::with_capacity(write_size),
            write_size,
            state: State::Ok,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Bytes read ahead but not yet handed out.
    pub fn buffered_read(&self) -> usize {
        self.read_len - self.read_pos
    }

    /// Bytes accepted but not yet handed to the inner stage.
    pub fn buffered_write(&self) -> usize {
        self.write_buf.len()
    }

    fn flush_write(&mut self) -> Result<()> {
        if self.write_buf.is_empty() {
            return Ok(());
        }
        trace!("buffer: flush {} bytes", self.write_buf.len());
        let res = self.inner.write_all(&self.write_buf);
        self.write_buf.clear();
        res
    }

    fn refill(&mut self) -> Result<()> {
        // One call, however many bytes it brings back
        let len = self.inner.read(&mut self.read_buf)?;
        trace!("buffer: refill {} bytes", len);
        self.read_pos = 0;
        self.read_len = len;
        Ok(())
    }

    fn read_buffered(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.read_pos == self.read_len {
            self.refill()?;
        }
        let len = (self.read_len - self.read_pos).min(buf.len());
        buf[..len].copy_from_slice(&self.read_buf[self.read_pos..self.read_pos + len]);
        self.read_pos += len;
        Ok(len)
    }

    fn write_buffered(&mut self, mut buf: &[u8]) -> Result<usize> {
        let total = buf.len();
        while !buf.is_empty() {
            let room = self.write_size - self.write_buf.len();
            let len = room.min(buf.len());
            self.write_buf.extend_from_slice(&buf[..len]);
            buf = &buf[len..];

            if self.write_buf.len() == self.write_size {
                self.flush_write()?;
            }
        }
        Ok(total)
    }
}

impl<S: Stream> Stream for Buffer<S> {
    fn state(&self) -> State {
        self.state
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.state.check()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let res = if self.read_buf.is_empty() {
            self.inner.read(buf)
        } else {
            self.read_buffered(buf)
        };
        self.state.track(res)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.state.check()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let res = if self.write_size == 0 {
            self.inner.write(buf)
        } else {
            self.write_buffered(buf)
        };
        self.state.track(res)
    }

    fn flush(&mut self) -> Result<()> {
        self.state.check()?;
        let res = self.flush_write().and_then(|_| self.inner.flush());
        self.state.track(res)
    }

    fn tell(&self) -> Pos {
        match self.inner.tell() {
            POS_MAX => POS_MAX,
            pos => pos - self.buffered_read() as Pos + self.buffered_write() as Pos,
        }
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<Pos> {
        if self.state == State::Fail {
            return Err(StreamError::Failed);
        }

        // Current is relative to what the caller has seen, not the inner stage
        let pos = match pos {
            SeekFrom::Current(x) => match self.tell() {
                POS_MAX => return self.state.track(Err(StreamError::SeekOutOfRange)),
                cur => match cur.checked_add_signed(x) {
                    Some(target) => SeekFrom::Start(target),
                    None => return self.state.track(Err(StreamError::SeekOutOfRange)),
                },
            },
            x => x,
        };

        let res = self.flush_write().and_then(|_| self.inner.seek(pos));
        self.read_pos = 0;
        self.read_len = 0;

        let pos = self.state.track(res)?;
        self.state = State::Ok;
        Ok(pos)
    }

    fn skip(&mut self, amount: u64) -> Result<()> {
        self.state.check()?;

        let from_buf = (self.buffered_read() as u64).min(amount) as usize;
        self.read_pos += from_buf;

        let left = amount - from_buf as u64;
        if left == 0 {
            return Ok(());
        }
        let res = self.flush_write().and_then(|_| self.inner.skip(left));
        self.state.track(res)
    }
}

impl<S: Stream> Drop for Buffer<S> {
    fn drop(&mut self) {
        if self.write_buf.is_empty() {
            return;
        }
        if self.state == State::Fail {
            warn!("buffer: dropping {} unwritten bytes", self.write_buf.len());
            return;
        }
        if let Err(e) = self.flush_write().and_then(|_| self.inner.flush()) {
            warn!("buffer: flush on drop failed: {}", e);
        }
    }
}
