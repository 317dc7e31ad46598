pub mod async_io;
pub mod buf;
pub mod buffer;
pub mod cache;
pub mod error;
pub mod file;
pub mod limiter;
pub mod memory;
pub mod replicator;
pub mod stream;

pub use crate::async_io::{AsyncReader, AsyncWriter};
pub use crate::buffer::Buffer;
pub use crate::cache::CachedFile;
pub use crate::error::{Result, State, StreamError};
pub use crate::file::{FileStream, Mode};
pub use crate::limiter::Limiter;
pub use crate::memory::MemoryStream;
pub use crate::replicator::Replicator;
pub use crate::stream::{Pos, SeekFrom, Stream, StreamExt, POS_MAX};
