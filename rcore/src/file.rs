use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, Write};
use std::ops::{BitOr, BitOrAssign};
use std::path::{Path, PathBuf};

use log::{debug, trace};

use crate::error::{Result, State, StreamError};
use crate::stream::{Pos, SeekFrom, Stream, POS_MAX};

/// Composable open flags.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Mode(u32);

impl Mode {
    pub const READ: Mode = Mode(1 << 0);
    pub const WRITE: Mode = Mode(1 << 1);
    /// Create, truncating whatever was there
    pub const CREATE: Mode = Mode(1 << 2);
    /// The file must already exist
    pub const OPEN_EXISTING: Mode = Mode(1 << 3);
    /// Open if it exists, create otherwise, never truncate
    pub const PRESERVE_EXISTING: Mode = Mode(1 << 4);
    pub const APPEND: Mode = Mode(1 << 5);
    /// Accepted for compatibility, every stream is binary
    pub const BINARY: Mode = Mode(1 << 6);

    pub const SHARE_NONE: Mode = Mode(0);
    pub const SHARE_READ: Mode = Mode(1 << 8);
    pub const SHARE_WRITE: Mode = Mode(1 << 9);
    pub const SHARE_DELETE: Mode = Mode(1 << 10);
    pub const SHARE_ALL: Mode = Mode(Mode::SHARE_READ.0 | Mode::SHARE_WRITE.0 | Mode::SHARE_DELETE.0);

    pub fn contains(self, other: Mode) -> bool {
        self.0 & other.0 == other.0
    }

    /// Reject mutually exclusive combinations before touching the file system.
    pub fn validate(self) -> Result<()> {
        if !self.contains(Mode::READ) && !self.contains(Mode::WRITE) {
            return Err(StreamError::InvalidMode("neither read nor write requested"));
        }
        if self.contains(Mode::CREATE) && self.contains(Mode::OPEN_EXISTING) {
            return Err(StreamError::InvalidMode("create with open-existing"));
        }
        if self.contains(Mode::CREATE) && self.contains(Mode::PRESERVE_EXISTING) {
            return Err(StreamError::InvalidMode("create with preserve-existing"));
        }
        if self.contains(Mode::OPEN_EXISTING) && self.contains(Mode::PRESERVE_EXISTING) {
            return Err(StreamError::InvalidMode("open-existing with preserve-existing"));
        }
        if self.contains(Mode::APPEND) && !self.contains(Mode::WRITE) {
            return Err(StreamError::InvalidMode("append without write"));
        }
        if (self.contains(Mode::CREATE) || self.contains(Mode::PRESERVE_EXISTING))
            && !self.contains(Mode::WRITE)
        {
            return Err(StreamError::InvalidMode("create without write"));
        }
        Ok(())
    }

    fn options(self) -> Result<OpenOptions> {
        self.validate()?;

        let mut opts = OpenOptions::new();
        opts.read(self.contains(Mode::READ))
            .write(self.contains(Mode::WRITE))
            .append(self.contains(Mode::APPEND));

        if self.contains(Mode::CREATE) {
            opts.create(true).truncate(!self.contains(Mode::APPEND));
        } else if self.contains(Mode::PRESERVE_EXISTING) {
            opts.create(true).truncate(false);
        } else if !self.contains(Mode::OPEN_EXISTING) && self.contains(Mode::WRITE) {
            opts.create(true).truncate(!self.contains(Mode::APPEND));
        }

        #[cfg(windows)]
        {
            use std::os::windows::fs::OpenOptionsExt;

            let mut share = 0;
            if self.contains(Mode::SHARE_READ) {
                share |= 0x1;
            }
            if self.contains(Mode::SHARE_WRITE) {
                share |= 0x2;
            }
            if self.contains(Mode::SHARE_DELETE) {
                share |= 0x4;
            }
            opts.share_mode(share);
        }

        Ok(opts)
    }
}

impl BitOr for Mode {
    type Output = Mode;

    fn bitor(self, rhs: Mode) -> Mode {
        Mode(self.0 | rhs.0)
    }
}

impl BitOrAssign for Mode {
    fn bitor_assign(&mut self, rhs: Mode) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Mode::READ, "READ"),
            (Mode::WRITE, "WRITE"),
            (Mode::CREATE, "CREATE"),
            (Mode::OPEN_EXISTING, "OPEN_EXISTING"),
            (Mode::PRESERVE_EXISTING, "PRESERVE_EXISTING"),
            (Mode::APPEND, "APPEND"),
            (Mode::BINARY, "BINARY"),
            (Mode::SHARE_READ, "SHARE_READ"),
            (Mode::SHARE_WRITE, "SHARE_WRITE"),
            (Mode::SHARE_DELETE, "SHARE_DELETE"),
        ];

        let set: Vec<&str> = names
            .iter()
            .filter(|(m, _)| self.contains(*m))
            .map(|(_, n)| *n)
            .collect();
        write!(f, "Mode({})", set.join(" | "))
    }
}

/// Does anything live at `path`.
pub fn exists<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref().exists()
}

/// Is `path` marked read-only. Missing paths are not.
pub fn readonly<P: AsRef<Path>>(path: P) -> bool {
    fs::metadata(path)
        .map(|meta| meta.permissions().readonly())
        .unwrap_or(false)
}

/// Stream over an OS file handle.
pub struct FileStream {
    file: Option<File>,
    path: Option<PathBuf>,
    mode: Mode,
    pos: Pos,
    state: State,
}

impl FileStream {
    pub fn open<P: AsRef<Path>>(path: P, mode: Mode) -> Result<Self> {
        let mut stream = FileStream::closed(State::Fail);
        stream.reopen(path, mode)?;
        Ok(stream)
    }

    /// A stream without a handle, sitting in `state` until reopened.
    pub fn closed(state: State) -> Self {
        FileStream {
            file: None,
            path: None,
            mode: Mode::default(),
            pos: 0,
            state,
        }
    }

    /// Close whatever is open and open `path`, the only way out of `Fail`.
    pub fn reopen<P: AsRef<Path>>(&mut self, path: P, mode: Mode) -> Result<()> {
        self.close();

        let path = path.as_ref();
        let opened = mode
            .options()
            .and_then(|opts| opts.open(path).map_err(StreamError::from));

        match opened {
            Ok(mut file) => {
                let pos = if mode.contains(Mode::APPEND) {
                    let res = file.seek(io::SeekFrom::End(0)).map_err(StreamError::from);
                    self.state.track(res)?
                } else {
                    0
                };
                debug!("file: open {} {:?}", path.display(), mode);

                self.file = Some(file);
                self.path = Some(path.to_path_buf());
                self.mode = mode;
                self.pos = pos;
                self.state = State::Ok;
                Ok(())
            }
            Err(e) => {
                debug!("file: open {} failed: {}", path.display(), e);
                self.state = State::Fail;
                Err(e)
            }
        }
    }

    /// Safe to call any number of times, also runs on drop.
    pub fn close(&mut self) {
        if let Some(file) = self.file.take() {
            if let Some(path) = &self.path {
                debug!("file: close {}", path.display());
            }
            drop(file);
        }
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn size(&self) -> Result<u64> {
        let file = self.file.as_ref().ok_or(StreamError::Closed)?;
        Ok(file.metadata()?.len())
    }

    /// Cut the file at the current position.
    pub fn truncate(&mut self) -> Result<()> {
        self.state.check()?;
        let pos = self.pos;
        let res = self
            .file
            .as_mut()
            .ok_or(StreamError::Closed)
            .and_then(|file| file.set_len(pos).map_err(StreamError::from));
        self.state.track(res)
    }

    fn handle(&mut self) -> Result<&mut File> {
        self.file.as_mut().ok_or(StreamError::Closed)
    }

    fn read_file(&mut self, buf: &mut [u8]) -> Result<usize> {
        let file = self.handle()?;
        loop {
            match file.read(buf) {
                Ok(0) => return Err(StreamError::Eof),
                Ok(x) => return Ok(x),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn write_file(&mut self, buf: &[u8]) -> Result<usize> {
        let file = self.handle()?;
        let len = loop {
            match file.write(buf) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(x) => break x,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };

        // Appends land at the end no matter where we were
        if self.mode.contains(Mode::APPEND) {
            let pos = self.handle()?.stream_position()?;
            self.pos = pos;
        } else {
            self.pos += len as u64;
        }
        Ok(len)
    }
}

impl Stream for FileStream {
    fn state(&self) -> State {
        self.state
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.state.check()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let res = self.read_file(buf);
        if let Ok(len) = res {
            self.pos += len as u64;
            trace!("file: read {} @ {}", len, self.pos);
        }
        self.state.track(res)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.state.check()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let res = self.write_file(buf);
        self.state.track(res)
    }

    fn flush(&mut self) -> Result<()> {
        self.state.check()?;
        let res = self
            .handle()
            .and_then(|file| file.flush().map_err(StreamError::from));
        self.state.track(res)
    }

    fn tell(&self) -> Pos {
        if self.file.is_some() {
            self.pos
        } else {
            POS_MAX
        }
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<Pos> {
        if self.state == State::Fail {
            return Err(StreamError::Failed);
        }

        let target = match pos {
            SeekFrom::Start(x) => io::SeekFrom::Start(x),
            SeekFrom::End(x) => io::SeekFrom::End(x),
            SeekFrom::Current(x) => io::SeekFrom::Current(x),
        };
        let res = self
            .handle()
            .and_then(|file| file.seek(target).map_err(StreamError::from));

        let pos = self.state.track(res)?;
        self.pos = pos;
        self.state = State::Ok;
        Ok(pos)
    }

    fn skip(&mut self, amount: u64) -> Result<()> {
        self.state.check()?;

        let res = self.size().and_then(|size| {
            let left = size.saturating_sub(self.pos);
            let step = amount.min(left);
            let file = self.handle()?;
            let pos = file.seek(io::SeekFrom::Current(step as i64))?;
            Ok((pos, step < amount))
        });

        match self.state.track(res)? {
            (pos, false) => {
                self.pos = pos;
                Ok(())
            }
            (pos, true) => {
                self.pos = pos;
                self.state.track(Err(StreamError::Eof))
            }
        }
    }
}

impl Drop for FileStream {
    fn drop(&mut self) {
        self.close();
    }
}
