use std::cmp;
use std::collections::VecDeque;

use crate::error::{Result, StreamError};
use crate::stream::Stream;

/// Read until `buf` is full or the stream runs dry.
///
/// Returns `(eof, bytes_read)`. Anything but `Eof` from the stream is an error.
pub fn fill_buf<S: Stream + ?Sized>(data: &mut S, buf: &mut [u8]) -> Result<(bool, usize)> {
    let mut buf_read = 0;

    while buf_read < buf.len() {
        match data.read(&mut buf[buf_read..]) {
            Ok(0) => return Err(StreamError::Failed),
            Ok(x) => buf_read += x,
            Err(StreamError::Eof) => return Ok((true, buf_read)),
            Err(e) => return Err(e),
        };
    }
    Ok((false, buf_read))
}

pub fn flush_buf(in_buf: &mut VecDeque<u8>, buf: &mut [u8]) -> usize {
    // 1. Grab [0...min(buf.len(), in_buf.len()))
    let split_at = cmp::min(in_buf.len(), buf.len());
    // 2. Copy into buf
    for (dst, src) in buf[..split_at].iter_mut().zip(in_buf.drain(..split_at)) {
        *dst = src;
    }

    split_at
}

#[cfg(test)]
mod test_fill_buf {
    use super::*;
    use crate::error::State;
    use crate::memory::MemoryStream;

    #[test]
    fn big_buf_small_vec() {
        let mut in_buf = MemoryStream::from_vec(vec![1, 2]);
        let mut buf: [u8; 4] = [0; 4];

        assert_eq!(fill_buf(&mut in_buf, &mut buf).unwrap(), (true, 2));
        assert_eq!(&buf, &[1, 2, 0, 0]);
        assert_eq!(in_buf.state(), State::Eof);
    }

    #[test]
    fn small_buf_big_vec() {
        let mut in_buf = MemoryStream::from_vec(vec![1, 2, 3, 4]);
        let mut buf: [u8; 2] = [0; 2];

        assert_eq!(fill_buf(&mut in_buf, &mut buf).unwrap(), (false, 2));
        assert_eq!(&buf, &[1, 2]);
        assert!(in_buf.ok());
    }

    #[test]
    fn same_buf_same_vec() {
        let mut in_buf = MemoryStream::from_vec(vec![1, 2, 3, 4]);
        let mut buf: [u8; 4] = [0; 4];

        assert_eq!(fill_buf(&mut in_buf, &mut buf).unwrap(), (false, 4));
        assert_eq!(&buf, &[1, 2, 3, 4]);
    }
}
