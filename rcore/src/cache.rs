use std::num::NonZeroUsize;
use std::path::Path;

use log::{debug, trace, warn};
use lru::LruCache;

use crate::buf::fill_buf;
use crate::error::{Result, State, StreamError};
use crate::file::{FileStream, Mode};
use crate::stream::{resolve_seek, Pos, SeekFrom, Stream, POS_MAX};

const DEFAULT_BLOCKS: usize = 2;

/// One resident block of the file.
///
/// `data` may be shorter than the block size near the end of the file.
/// `dirty` is the modified byte range relative to `offset`, only that range is
/// ever written back.
struct Block {
    offset: u64,
    data: Vec<u8>,
    dirty: Option<(usize, usize)>,
}

impl Block {
    fn mark(&mut self, start: usize, end: usize) {
        self.dirty = Some(match self.dirty {
            None => (start, end),
            Some((s, e)) => (s.min(start), e.max(end)),
        });
    }
}

/// File stream behind a small LRU set of fixed size blocks.
///
/// Reads and writes smaller than a block are served from memory. A dirty block
/// is written back before it is evicted, on flush, on close and on drop.
/// Not thread safe.
pub struct CachedFile {
    file: FileStream,
    block_size: usize,
    // Keyed by block offset
    blocks: LruCache<u64, Block>,
    pos: Pos,
    size: u64,
    state: State,
}

impl CachedFile {
    pub fn open<P: AsRef<Path>>(path: P, mode: Mode, block_size: usize) -> Result<Self> {
        let mut cached = CachedFile::closed(State::Fail, block_size);
        cached.reopen(path, mode)?;
        Ok(cached)
    }

    /// Wrap an already open file with `blocks` resident blocks.
    pub fn with_blocks(file: FileStream, block_size: usize, blocks: usize) -> Result<Self> {
        let size = file.size()?;
        Ok(CachedFile {
            pos: file.tell(),
            state: file.state(),
            file,
            block_size: block_size.max(1),
            blocks: LruCache::new(capacity(blocks)),
            size,
        })
    }

    /// No handle, sitting in `state` until reopened.
    pub fn closed(state: State, block_size: usize) -> Self {
        CachedFile {
            file: FileStream::closed(state),
            block_size: block_size.max(1),
            blocks: LruCache::new(capacity(DEFAULT_BLOCKS)),
            pos: 0,
            size: 0,
            state,
        }
    }

    /// Flush and close whatever is open, then open `path`.
    ///
    /// Read access is always required since partial block writes load the
    /// block first.
    pub fn reopen<P: AsRef<Path>>(&mut self, path: P, mode: Mode) -> Result<()> {
        if let Err(e) = self.close() {
            warn!("cache: dropping unflushed blocks on reopen: {}", e);
        }

        if !mode.contains(Mode::READ) {
            self.state = State::Fail;
            return Err(StreamError::InvalidMode("cached file needs read access"));
        }

        let res = self
            .file
            .reopen(path, mode)
            .and_then(|_| self.file.size());

        match res {
            Ok(size) => {
                self.size = size;
                self.pos = self.file.tell();
                self.state = State::Ok;
                Ok(())
            }
            Err(e) => {
                self.state = State::Fail;
                Err(e)
            }
        }
    }

    /// Write back dirty blocks and close, idempotent.
    pub fn close(&mut self) -> Result<()> {
        let res = if self.file.is_open() {
            self.write_back_all()
        } else {
            Ok(())
        };
        self.blocks.clear();
        self.file.close();
        res
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Logical size, including cached writes past the end of the file.
    pub fn size(&self) -> u64 {
        self.size
    }

    fn write_back(file: &mut FileStream, block: &mut Block) -> Result<()> {
        if let Some((start, end)) = block.dirty {
            trace!(
                "cache: write back {}..{} of block @ {}",
                start,
                end,
                block.offset
            );
            file.seek(SeekFrom::Start(block.offset + start as u64))?;
            file.write_all(&block.data[start..end])?;
            block.dirty = None;
        }
        Ok(())
    }

    fn write_back_all(&mut self) -> Result<()> {
        for (_, block) in self.blocks.iter_mut() {
            CachedFile::write_back(&mut self.file, block)?;
        }
        Ok(())
    }

    /// The resident block at `offset`, loading it if needed.
    fn block(&mut self, offset: u64) -> Result<&mut Block> {
        if !self.blocks.contains(&offset) {
            self.load(offset)?;
        }
        // get_mut also marks it most recently used
        self.blocks.get_mut(&offset).ok_or(StreamError::Failed)
    }

    fn load(&mut self, offset: u64) -> Result<()> {
        if self.blocks.len() >= self.blocks.cap().get() {
            if let Some((key, mut old)) = self.blocks.pop_lru() {
                trace!("cache: evict block @ {}", key);
                if let Err(e) = CachedFile::write_back(&mut self.file, &mut old) {
                    // Keep it so a later flush can retry
                    self.blocks.put(key, old);
                    return Err(e);
                }
            }
        }

        let want = self.size.saturating_sub(offset).min(self.block_size as u64) as usize;
        let mut data = vec![0u8; want];
        if want > 0 {
            trace!("cache: load block @ {} ({} bytes)", offset, want);
            self.file.seek(SeekFrom::Start(offset))?;
            // Bytes the file doesn't have yet stay zero
            fill_buf(&mut self.file, &mut data)?;
        }

        self.blocks.put(
            offset,
            Block {
                offset,
                data,
                dirty: None,
            },
        );
        Ok(())
    }

    fn read_cached(&mut self, buf: &mut [u8]) -> Result<usize> {
        let want = (self.size.saturating_sub(self.pos)).min(buf.len() as u64) as usize;
        if want == 0 {
            return Err(StreamError::Eof);
        }

        let bs = self.block_size as u64;
        let mut done = 0;
        while done < want {
            let offset = self.pos - self.pos % bs;
            let intra = (self.pos - offset) as usize;
            let visible = (self.size - offset).min(bs) as usize;

            let block = self.block(offset)?;
            if block.data.len() < visible {
                // Grown by writes elsewhere, the gap reads as zeros
                block.data.resize(visible, 0);
            }

            let len = (visible - intra).min(want - done);
            buf[done..done + len].copy_from_slice(&block.data[intra..intra + len]);
            done += len;
            self.pos += len as u64;
        }
        Ok(done)
    }

    fn write_cached(&mut self, buf: &[u8]) -> Result<usize> {
        if self.pos.checked_add(buf.len() as u64).map_or(true, |end| end == POS_MAX) {
            return Err(StreamError::SeekOutOfRange);
        }

        let bs = self.block_size as u64;
        let mut done = 0;
        while done < buf.len() {
            let offset = self.pos - self.pos % bs;
            let intra = (self.pos - offset) as usize;
            let len = (self.block_size - intra).min(buf.len() - done);

            let block = self.block(offset)?;
            if block.data.len() < intra + len {
                block.data.resize(intra + len, 0);
            }
            block.data[intra..intra + len].copy_from_slice(&buf[done..done + len]);
            block.mark(intra, intra + len);

            done += len;
            self.pos += len as u64;
            self.size = self.size.max(self.pos);
        }
        Ok(done)
    }
}

fn capacity(blocks: usize) -> NonZeroUsize {
    NonZeroUsize::new(blocks).unwrap_or(NonZeroUsize::MIN)
}

impl Stream for CachedFile {
    fn state(&self) -> State {
        self.state
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.state.check()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let res = self.read_cached(buf);
        self.state.track(res)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.state.check()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let res = self.write_cached(buf);
        self.state.track(res)
    }

    fn flush(&mut self) -> Result<()> {
        self.state.check()?;
        let res = self.write_back_all().and_then(|_| self.file.flush());
        self.state.track(res)
    }

    fn tell(&self) -> Pos {
        if self.file.is_open() {
            self.pos
        } else {
            POS_MAX
        }
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<Pos> {
        if self.state == State::Fail {
            return Err(StreamError::Failed);
        }
        if !self.file.is_open() {
            return self.state.track(Err(StreamError::Closed));
        }

        let target = self.state.track(resolve_seek(pos, self.pos, self.size))?;
        self.pos = target;
        self.state = State::Ok;
        Ok(target)
    }

    fn skip(&mut self, amount: u64) -> Result<()> {
        self.state.check()?;

        let left = self.size.saturating_sub(self.pos);
        if amount > left {
            self.pos = self.size;
            return self.state.track(Err(StreamError::Eof));
        }
        self.pos += amount;
        Ok(())
    }
}

impl Drop for CachedFile {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("cache: write back on drop failed: {}", e);
        } else {
            debug!("cache: dropped");
        }
    }
}

#[cfg(test)]
mod test_cached_file {
    use super::*;
    use crate::stream::StreamExt;
    use byteorder::LittleEndian;
    use std::fs;

    fn rw_create() -> Mode {
        Mode::READ | Mode::WRITE | Mode::CREATE | Mode::BINARY
    }

    #[test]
    fn small_writes_coalesce() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cached.bin");

        let mut cached = CachedFile::open(&path, rw_create(), 16).unwrap();
        for i in 0..10u32 {
            cached.write_u32::<LittleEndian>(i).unwrap();
        }
        assert_eq!(cached.size(), 40);

        cached.seek(SeekFrom::Start(0)).unwrap();
        for i in 0..10u32 {
            assert_eq!(cached.read_u32::<LittleEndian>().unwrap(), i);
        }
        assert!(cached.read_u32::<LittleEndian>().unwrap_err().is_eof());

        cached.close().unwrap();
        let raw = fs::read(&path).unwrap();
        assert_eq!(raw.len(), 40);
        assert_eq!(&raw[36..], &9u32.to_le_bytes());
    }

    #[test]
    fn partial_block_write_keeps_neighbours() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rmw.bin");
        fs::write(&path, (0u8..32).collect::<Vec<u8>>()).unwrap();

        let mut cached =
            CachedFile::open(&path, Mode::READ | Mode::WRITE | Mode::OPEN_EXISTING, 8).unwrap();
        cached.seek(SeekFrom::Start(10)).unwrap();
        cached.write_all(&[0xAA, 0xBB]).unwrap();
        drop(cached);

        let raw = fs::read(&path).unwrap();
        let mut expected: Vec<u8> = (0u8..32).collect();
        expected[10] = 0xAA;
        expected[11] = 0xBB;
        assert_eq!(raw, expected);
    }

    #[test]
    fn eviction_writes_back_dirty_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evict.bin");

        let file = FileStream::open(&path, rw_create()).unwrap();
        let mut cached = CachedFile::with_blocks(file, 4, 1).unwrap();

        // Each write lands in a new block, forcing the previous one out
        cached.write_all(&[1, 1, 1, 1]).unwrap();
        cached.write_all(&[2, 2, 2, 2]).unwrap();
        assert_eq!(fs::read(&path).unwrap(), vec![1, 1, 1, 1]);

        cached.write_all(&[3, 3]).unwrap();
        assert_eq!(fs::read(&path).unwrap(), vec![1, 1, 1, 1, 2, 2, 2, 2]);

        cached.flush().unwrap();
        assert_eq!(
            fs::read(&path).unwrap(),
            vec![1, 1, 1, 1, 2, 2, 2, 2, 3, 3]
        );
    }

    #[test]
    fn least_recently_used_block_goes_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lru.bin");

        let file = FileStream::open(&path, rw_create()).unwrap();
        let mut cached = CachedFile::with_blocks(file, 4, 2).unwrap();
        cached.write_all(&[1, 1, 1, 1]).unwrap();
        cached.write_all(&[2, 2, 2, 2]).unwrap();

        // Touch the first block so the second one is the oldest
        cached.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(cached.read_u8().unwrap(), 1);

        cached.seek(SeekFrom::Start(8)).unwrap();
        cached.write_all(&[3, 3, 3, 3]).unwrap();
        assert_eq!(fs::read(&path).unwrap(), vec![0, 0, 0, 0, 2, 2, 2, 2]);

        cached.close().unwrap();
        assert_eq!(
            fs::read(&path).unwrap(),
            vec![1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3]
        );
    }

    #[test]
    fn read_across_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("across.bin");
        fs::write(&path, (0u8..50).collect::<Vec<u8>>()).unwrap();

        let mut cached = CachedFile::open(&path, Mode::READ | Mode::OPEN_EXISTING, 7).unwrap();
        cached.seek(SeekFrom::Start(5)).unwrap();

        let mut buf = [0u8; 20];
        cached.read_exact(&mut buf).unwrap();
        assert_eq!(buf.to_vec(), (5u8..25).collect::<Vec<u8>>());
        assert_eq!(cached.tell(), 25);
    }

    #[test]
    fn write_past_end_leaves_zero_gap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gap.bin");

        let mut cached = CachedFile::open(&path, rw_create(), 4).unwrap();
        cached.write_all(&[1]).unwrap();
        cached.seek(SeekFrom::Start(10)).unwrap();
        cached.write_all(&[2]).unwrap();
        assert_eq!(cached.size(), 11);

        cached.seek(SeekFrom::Start(0)).unwrap();
        let mut buf = [0xFFu8; 11];
        cached.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2]);

        cached.close().unwrap();
        assert_eq!(fs::read(&path).unwrap(), buf.to_vec());
    }

    #[test]
    fn write_only_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let res = CachedFile::open(dir.path().join("wo.bin"), Mode::WRITE | Mode::CREATE, 4);
        assert!(matches!(res, Err(StreamError::InvalidMode(_))));
    }

    #[test]
    fn closed_then_reopened() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("closed.bin");

        let mut cached = CachedFile::closed(State::Fail, 4096);
        assert!(!cached.ok());
        assert_eq!(cached.tell(), POS_MAX);

        cached.reopen(&path, rw_create()).unwrap();
        assert!(cached.ok());
        assert_eq!(cached.tell(), 0);
        cached.close().unwrap();
        cached.close().unwrap();
    }
}
