use std::hash::Hasher as StdHasher;

use twox_hash::XxHash32;

use rcore::{Stream, StreamError};

const CHUNK_SIZE: usize = 4 * 1024;

// Make the checksum api be similiar to blake3's
pub struct Checksum(XxHash32);

impl Checksum {
    pub fn new() -> Checksum {
        Checksum(XxHash32::with_seed(0))
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.write(data);
    }

    pub fn finalize(self) -> u32 {
        self.0.finish() as u32
    }
}

/// Digest of everything up to `Eof`, and how many bytes that was.
pub fn checksum<S: Stream + ?Sized>(data: &mut S) -> Result<(u32, u64), StreamError> {
    let mut hash = Checksum::new();
    let mut buf = [0u8; CHUNK_SIZE];
    let mut total = 0;

    loop {
        match data.read(&mut buf) {
            Ok(len) => {
                hash.update(&buf[..len]);
                total += len as u64;
            }
            Err(StreamError::Eof) => return Ok((hash.finalize(), total)),
            Err(e) => return Err(e),
        }
    }
}
