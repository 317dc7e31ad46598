use log::trace;

use crate::error::{Result, State, StreamError};
use crate::stream::{resolve_seek, Pos, SeekFrom, Stream, POS_MAX};

/// Growable in-memory stream.
///
/// The position is an index into the buffer. Writing past the end grows the
/// buffer up to an optional limit, reading past the end is `Eof`.
#[derive(Debug, Default)]
pub struct MemoryStream {
    data: Vec<u8>,
    pos: usize,
    limit: Option<u64>,
    state: State,
}

impl MemoryStream {
    pub fn new() -> Self {
        MemoryStream::default()
    }

    /// Growth past `limit` bytes fails the stream.
    pub fn with_capacity_limit(limit: u64) -> Self {
        MemoryStream {
            data: Vec::with_capacity(limit.min(64 * 1024) as usize),
            limit: Some(limit),
            ..MemoryStream::default()
        }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        MemoryStream {
            data,
            ..MemoryStream::default()
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Cut the buffer at the current position.
    pub fn truncate(&mut self) -> Result<()> {
        self.state.check()?;
        self.data.truncate(self.pos);
        Ok(())
    }

    fn write_at(&mut self, buf: &[u8]) -> Result<usize> {
        let end = self
            .pos
            .checked_add(buf.len())
            .ok_or(StreamError::Capacity { limit: POS_MAX })?;

        if let Some(limit) = self.limit {
            if end as u64 > limit {
                return Err(StreamError::Capacity { limit });
            }
        }

        if end > self.data.len() {
            trace!("memory: grow {} -> {}", self.data.len(), end);
            self.data.resize(end, 0);
        }
        self.data[self.pos..end].copy_from_slice(buf);
        self.pos = end;

        Ok(buf.len())
    }
}

impl Stream for MemoryStream {
    fn state(&self) -> State {
        self.state
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.state.check()?;
        if buf.is_empty() {
            return Ok(0);
        }

        let available = self.data.len().saturating_sub(self.pos);
        if available == 0 {
            return self.state.track(Err(StreamError::Eof));
        }

        let len = available.min(buf.len());
        buf[..len].copy_from_slice(&self.data[self.pos..self.pos + len]);
        self.pos += len;

        Ok(len)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.state.check()?;
        let res = self.write_at(buf);
        self.state.track(res)
    }

    fn tell(&self) -> Pos {
        self.pos as Pos
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<Pos> {
        if self.state == State::Fail {
            return Err(StreamError::Failed);
        }

        let res = resolve_seek(pos, self.pos as Pos, self.data.len() as Pos).and_then(|target| {
            usize::try_from(target).map_err(|_| StreamError::SeekOutOfRange)
        });

        match self.state.track(res) {
            Ok(target) => {
                self.pos = target;
                self.state = State::Ok;
                Ok(target as Pos)
            }
            Err(e) => Err(e),
        }
    }

    fn skip(&mut self, amount: u64) -> Result<()> {
        self.state.check()?;

        let available = (self.data.len().saturating_sub(self.pos)) as u64;
        if amount > available {
            self.pos = self.data.len();
            return self.state.track(Err(StreamError::Eof));
        }
        self.pos += amount as usize;
        Ok(())
    }
}

#[cfg(test)]
mod test_memory_stream {
    use super::*;
    use crate::stream::StreamExt;
    use byteorder::LittleEndian;

    #[test]
    fn write_then_read_back() {
        let mut mem = MemoryStream::new();
        for i in 0..10u32 {
            mem.write_u32::<LittleEndian>(i).unwrap();
        }
        assert_eq!(mem.len(), 40);
        assert_eq!(mem.tell(), 40);

        mem.seek(SeekFrom::Start(0)).unwrap();
        for i in 0..10u32 {
            assert_eq!(mem.read_u32::<LittleEndian>().unwrap(), i);
        }
        assert!(mem.read_u32::<LittleEndian>().unwrap_err().is_eof());
        assert_eq!(mem.state(), State::Eof);
    }

    #[test]
    fn short_read_copies_what_is_there() {
        let mut mem = MemoryStream::from_vec(vec![1, 2, 3]);
        let mut buf = [0u8; 8];

        assert_eq!(mem.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert!(mem.ok());

        assert!(mem.read(&mut buf).unwrap_err().is_eof());
        assert_eq!(mem.state(), State::Eof);
    }

    #[test]
    fn eof_is_sticky_until_seek() {
        let mut mem = MemoryStream::from_vec(vec![1, 2]);
        let mut buf = [0u8; 4];

        assert!(mem.read_exact(&mut buf).unwrap_err().is_eof());
        assert!(mem.write(&[9]).unwrap_err().is_eof());

        mem.seek(SeekFrom::Start(0)).unwrap();
        assert!(mem.ok());
        assert_eq!(mem.read_u8().unwrap(), 1);
    }

    #[test]
    fn capacity_limit_fails_without_partial_write() {
        let mut mem = MemoryStream::with_capacity_limit(6);
        mem.write_all(&[1, 2, 3, 4]).unwrap();

        assert!(matches!(
            mem.write(&[5, 6, 7]),
            Err(StreamError::Capacity { limit: 6 })
        ));
        assert_eq!(mem.state(), State::Fail);
        assert_eq!(mem.as_slice(), &[1, 2, 3, 4]);

        // Fail survives a seek
        assert!(mem.seek(SeekFrom::Start(0)).is_err());
        assert_eq!(mem.state(), State::Fail);
    }

    #[test]
    fn overwrite_in_the_middle() {
        let mut mem = MemoryStream::from_vec(vec![0; 6]);
        mem.seek(SeekFrom::Start(2)).unwrap();
        mem.write_all(&[7, 7]).unwrap();

        assert_eq!(mem.as_slice(), &[0, 0, 7, 7, 0, 0]);
        assert_eq!(mem.tell(), 4);
    }

    #[test]
    fn skip_past_end() {
        let mut mem = MemoryStream::from_vec(vec![0; 6]);
        mem.skip(4).unwrap();
        assert_eq!(mem.tell(), 4);

        assert!(mem.skip(4).unwrap_err().is_eof());
        assert_eq!(mem.tell(), 6);
    }

    #[test]
    fn truncate_at_position() {
        let mut mem = MemoryStream::from_vec(vec![1, 2, 3, 4]);
        mem.seek(SeekFrom::End(-1)).unwrap();
        mem.truncate().unwrap();
        assert_eq!(mem.as_slice(), &[1, 2, 3]);
    }
}
