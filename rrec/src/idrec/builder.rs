use log::trace;

use rcore::{Pos, SeekFrom, Stream, POS_MAX};

use crate::idrec::{Format, IdrecError, Layout};

const ZEROS: [u8; 64] = [0; 64];

/// A record whose header is written but whose size is still a placeholder.
#[must_use = "the record size stays 0 until it is closed"]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Open {
    start: Pos,
    id: u64,
    layout: Layout,
}

impl Open {
    /// Where the record's header begins.
    pub fn start(&self) -> Pos {
        self.start
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Layout {
    pub fn open<S: Stream + ?Sized>(&self, stream: &mut S, id: u64) -> Result<Open, IdrecError> {
        if !self.id.fits(id) {
            return Err(IdrecError::IdOverflow(id));
        }
        let start = stream.tell();
        if start == POS_MAX {
            return Err(IdrecError::Unpositioned);
        }

        self.id.write(stream, id)?;
        self.size.write(stream, 0)?;
        trace!("idrec: open {:#x} at {}", id, start);

        Ok(Open {
            start,
            id,
            layout: *self,
        })
    }
}

pub fn open<F: Format, S: Stream + ?Sized>(stream: &mut S, id: F::Id) -> Result<Open, IdrecError> {
    Layout::of::<F>().open(stream, id.into())
}

/// Pad the record, patch in its size and return the position after it.
pub fn close<S: Stream + ?Sized>(stream: &mut S, record: Open) -> Result<Pos, IdrecError> {
    let layout = record.layout;

    let end = stream.tell();
    let len = match end {
        POS_MAX => return Err(IdrecError::Unpositioned),
        end => end
            .checked_sub(record.start + layout.header_size())
            .ok_or(IdrecError::Unpositioned)?,
    };
    if !layout.size.fits(len) {
        return Err(IdrecError::LengthOverflow(len));
    }

    let pad = layout.padding(len);
    let mut left = pad;
    while left > 0 {
        let chunk = left.min(ZEROS.len() as u64);
        stream.write_all(&ZEROS[..chunk as usize])?;
        left -= chunk;
    }

    stream.seek(SeekFrom::Start(record.start + layout.id.bytes()))?;
    layout.size.write(stream, len)?;
    stream.seek(SeekFrom::Start(end + pad))?;
    trace!("idrec: close {:#x}, {} + {} bytes", record.id, len, pad);

    Ok(end + pad)
}

#[cfg(test)]
mod test_idrec_builder {
    use super::*;
    use crate::idrec::header_size;
    use rcore::{MemoryStream, StreamExt};

    struct Wide;

    impl Format for Wide {
        type Id = u32;
        type Size = u32;
        const ALIGN: u64 = 4;
    }

    struct Tiny;

    impl Format for Tiny {
        type Id = u8;
        type Size = u8;
        const ALIGN: u64 = 8;
    }

    #[test]
    fn placeholder_then_patch() {
        let mut mem = MemoryStream::new();
        let rec = open::<Wide, _>(&mut mem, 0x11).unwrap();
        assert_eq!(rec.start(), 0);
        assert_eq!(mem.as_slice(), &[0x11, 0, 0, 0, 0, 0, 0, 0]);

        mem.write_all(&[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(close(&mut mem, rec).unwrap(), 16);
        assert_eq!(mem.tell(), 16);
        assert_eq!(
            mem.as_slice(),
            &[0x11, 0, 0, 0, 5, 0, 0, 0, 1, 2, 3, 4, 5, 0, 0, 0]
        );
    }

    #[test]
    fn close_advances_by_header_payload_padding() {
        for len in 0..20u64 {
            let mut mem = MemoryStream::from_vec(vec![0xFF; 3]);
            mem.seek(SeekFrom::End(0)).unwrap();

            let rec = open::<Tiny, _>(&mut mem, 7).unwrap();
            mem.write_all(&vec![9; len as usize]).unwrap();
            let end = close(&mut mem, rec).unwrap();

            assert_eq!(end - 3, header_size::<Tiny>() + len + crate::idrec::padding(len, 8));
            assert_eq!(end % 8, (3 + header_size::<Tiny>()) % 8);
        }
    }

    #[test]
    fn nested_records() {
        let mut mem = MemoryStream::new();
        let outer = open::<Wide, _>(&mut mem, 1).unwrap();
        let inner = open::<Wide, _>(&mut mem, 2).unwrap();
        mem.write_u8(0xAA).unwrap();
        assert_eq!(close(&mut mem, inner).unwrap(), 20);
        assert_eq!(close(&mut mem, outer).unwrap(), 20);

        mem.seek(SeekFrom::Start(4)).unwrap();
        assert_eq!(mem.read_u32::<byteorder::LittleEndian>().unwrap(), 12);
        mem.seek(SeekFrom::Start(12)).unwrap();
        assert_eq!(mem.read_u32::<byteorder::LittleEndian>().unwrap(), 1);
    }

    #[test]
    fn oversized_fields_are_refused() {
        let mut mem = MemoryStream::new();
        assert!(matches!(
            Layout::of::<Tiny>().open(&mut mem, 0x100),
            Err(IdrecError::IdOverflow(0x100))
        ));
        assert!(mem.is_empty());

        let rec = open::<Tiny, _>(&mut mem, 1).unwrap();
        mem.write_all(&[0; 300]).unwrap();
        assert!(matches!(
            close(&mut mem, rec),
            Err(IdrecError::LengthOverflow(300))
        ));
    }

    #[test]
    fn stage_without_position_is_refused() {
        struct Blind(MemoryStream);

        impl Stream for Blind {
            fn state(&self) -> rcore::State {
                self.0.state()
            }

            fn read(&mut self, buf: &mut [u8]) -> rcore::Result<usize> {
                self.0.read(buf)
            }

            fn write(&mut self, buf: &[u8]) -> rcore::Result<usize> {
                self.0.write(buf)
            }

            fn tell(&self) -> Pos {
                POS_MAX
            }

            fn seek(&mut self, _pos: SeekFrom) -> rcore::Result<Pos> {
                Err(rcore::StreamError::Unsupported)
            }
        }

        let mut blind = Blind(MemoryStream::new());
        assert!(matches!(
            open::<Wide, _>(&mut blind, 3),
            Err(IdrecError::Unpositioned)
        ));
        assert!(blind.0.is_empty());
    }
}
