use log::trace;

use crate::error::{Result, State, StreamError};
use crate::stream::{resolve_seek, Pos, SeekFrom, Stream, POS_MAX};

/// A window of at most `limit` bytes onto another stage.
///
/// Positions are relative to where the window starts. Reads and skips that
/// would run past the window are clipped and end in `Eof`, writes that would
/// run past it are clipped and fail the limiter.
pub struct Limiter<S: Stream> {
    inner: S,
    base: Pos,
    limit: u64,
    consumed: u64,
    state: State,
}

impl<S: Stream> Limiter<S> {
    /// Window starting at the inner stage's current position.
    pub fn new(inner: S, limit: u64) -> Self {
        Limiter {
            base: inner.tell(),
            inner,
            limit,
            consumed: 0,
            state: State::Ok,
        }
    }

    /// Skips `origin` bytes of the inner stage before the window opens.
    pub fn with_origin(mut inner: S, origin: u64, limit: u64) -> Self {
        let state = match inner.skip(origin) {
            Ok(()) => State::Ok,
            Err(e) => e.state(),
        };
        Limiter {
            base: inner.tell(),
            inner,
            limit,
            consumed: 0,
            state,
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    pub fn remaining(&self) -> u64 {
        self.limit - self.consumed
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    fn write_clipped(&mut self, buf: &[u8]) -> Result<usize> {
        let allowed = self.remaining();
        if buf.len() as u64 <= allowed {
            let len = self.inner.write(buf)?;
            self.consumed += len as u64;
            return Ok(len);
        }

        trace!("limiter: write of {} clipped to {}", buf.len(), allowed);
        self.inner.write_all(&buf[..allowed as usize])?;
        self.consumed += allowed;
        Err(StreamError::Truncated {
            requested: buf.len() as u64,
            allowed,
        })
    }
}

impl<S: Stream> Stream for Limiter<S> {
    fn state(&self) -> State {
        self.state
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.state.check()?;
        if buf.is_empty() {
            return Ok(0);
        }
        if self.remaining() == 0 {
            return self.state.track(Err(StreamError::Eof));
        }

        let len = (buf.len() as u64).min(self.remaining()) as usize;
        let res = self.inner.read(&mut buf[..len]);
        let len = self.state.track(res)?;
        self.consumed += len as u64;
        Ok(len)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.state.check()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let res = self.write_clipped(buf);
        self.state.track(res)
    }

    fn flush(&mut self) -> Result<()> {
        self.state.check()?;
        let res = self.inner.flush();
        self.state.track(res)
    }

    fn tell(&self) -> Pos {
        self.consumed
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<Pos> {
        if self.state == State::Fail {
            return Err(StreamError::Failed);
        }
        if self.base == POS_MAX {
            return self.state.track(Err(StreamError::Unsupported));
        }

        let res = resolve_seek(pos, self.consumed, self.limit).and_then(|target| {
            if target > self.limit {
                return Err(StreamError::SeekOutOfRange);
            }
            self.inner.seek(SeekFrom::Start(self.base + target))?;
            Ok(target)
        });

        let target = self.state.track(res)?;
        self.consumed = target;
        self.state = State::Ok;
        Ok(target)
    }

    fn skip(&mut self, amount: u64) -> Result<()> {
        self.state.check()?;

        let allowed = amount.min(self.remaining());
        let res = self.inner.skip(allowed).map(|_| self.consumed += allowed);
        self.state.track(res)?;

        if allowed < amount {
            return self.state.track(Err(StreamError::Eof));
        }
        Ok(())
    }
}
