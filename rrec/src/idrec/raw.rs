use log::trace;

use rcore::{Pos, Stream, StreamError, POS_MAX};

use crate::idrec::{Field, Format, IdrecError, Layout};

impl Layout {
    /// Next id, or `None` at `end` or when the stream ran out on a record
    /// boundary.
    pub fn read_id<S: Stream + ?Sized>(
        &self,
        stream: &mut S,
        end: Pos,
    ) -> Result<Option<u64>, IdrecError> {
        if end != POS_MAX && stream.tell() >= end {
            return Ok(None);
        }
        match self.id.read(stream) {
            Ok(id) => Ok(Some(id)),
            Err(StreamError::Eof) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn read_size<S: Stream + ?Sized>(&self, stream: &mut S) -> Result<u64, IdrecError> {
        Ok(self.size.read(stream)?)
    }

    /// Step over a record whose id was just read.
    pub fn ignore<S: Stream + ?Sized>(&self, stream: &mut S) -> Result<(), IdrecError> {
        let size = self.read_size(stream)?;
        let skip = size
            .checked_add(self.padding(size))
            .ok_or(IdrecError::LengthOverflow(size))?;
        stream.skip(skip)?;
        Ok(())
    }

    /// Walk records until one carries `id`, leaving the stream just past it.
    ///
    /// `Ok(false)` when `end` or the end of the stream comes first.
    pub fn find<S: Stream + ?Sized>(
        &self,
        stream: &mut S,
        id: u64,
        end: Pos,
    ) -> Result<bool, IdrecError> {
        while let Some(found) = self.read_id(stream, end)? {
            if found == id {
                trace!("idrec: found {:#x} at {}", id, stream.tell());
                return Ok(true);
            }
            match self.ignore(stream) {
                Ok(()) => (),
                Err(e) if e.is_eof() => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }
}

pub fn read_id<F: Format, S: Stream + ?Sized>(
    stream: &mut S,
    end: Pos,
) -> Result<Option<F::Id>, IdrecError> {
    match Layout::of::<F>().read_id(stream, end)? {
        Some(id) => F::Id::try_from(id)
            .map(Some)
            .map_err(|_| IdrecError::IdOverflow(id)),
        None => Ok(None),
    }
}

pub fn ignore<F: Format, S: Stream + ?Sized>(stream: &mut S) -> Result<(), IdrecError> {
    Layout::of::<F>().ignore(stream)
}

pub fn find<F: Format, S: Stream + ?Sized>(
    stream: &mut S,
    id: F::Id,
    end: Pos,
) -> Result<bool, IdrecError> {
    Layout::of::<F>().find(stream, id.into(), end)
}

#[cfg(test)]
mod test_idrec_raw {
    use super::*;
    use crate::idrec::{close, open};
    use rcore::{MemoryStream, SeekFrom, State, StreamExt};

    struct Wide;

    impl Format for Wide {
        type Id = u32;
        type Size = u32;
        const ALIGN: u64 = 4;
    }

    // Records A, B, C with 1, 6 and 3 payload bytes
    fn abc() -> MemoryStream {
        let mut mem = MemoryStream::new();
        for (id, len) in [(0xA, 1), (0xB, 6), (0xC, 3)] {
            let rec = open::<Wide, _>(&mut mem, id).unwrap();
            mem.write_all(&vec![id as u8; len]).unwrap();
            close(&mut mem, rec).unwrap();
        }
        mem.seek(SeekFrom::Start(0)).unwrap();
        mem
    }

    #[test]
    fn find_skips_to_match() {
        let mut mem = abc();
        assert!(find::<Wide, _>(&mut mem, 0xC, POS_MAX).unwrap());

        // A: 8 + 1 + 3, B: 8 + 6 + 2, then C's id
        assert_eq!(mem.tell(), 12 + 16 + 4);
        assert_eq!(Layout::of::<Wide>().read_size(&mut mem).unwrap(), 3);
        let mut payload = [0u8; 3];
        mem.read_exact(&mut payload).unwrap();
        assert_eq!(payload, [0xC; 3]);
    }

    #[test]
    fn find_missing_runs_out() {
        let mut mem = abc();
        assert!(!find::<Wide, _>(&mut mem, 0xD, POS_MAX).unwrap());
        assert_eq!(mem.state(), State::Eof);
    }

    #[test]
    fn find_stops_at_end() {
        let mut mem = abc();
        // C starts at 28, so it's out of reach
        assert!(!find::<Wide, _>(&mut mem, 0xC, 28).unwrap());
        assert_eq!(mem.tell(), 28);
        assert!(mem.ok());
    }

    #[test]
    fn read_id_then_ignore() {
        let mut mem = abc();
        let mut ids = Vec::new();
        while let Some(id) = read_id::<Wide, _>(&mut mem, POS_MAX).unwrap() {
            ids.push(id);
            ignore::<Wide, _>(&mut mem).unwrap();
        }
        assert_eq!(ids, vec![0xA, 0xB, 0xC]);
    }

    #[test]
    fn truncated_record_is_eof() {
        let mut mem = MemoryStream::new();
        mem.write_u32::<byteorder::LittleEndian>(0xA).unwrap();
        mem.write_u32::<byteorder::LittleEndian>(100).unwrap();
        mem.write_all(&[0; 10]).unwrap();
        mem.seek(SeekFrom::Start(0)).unwrap();

        assert!(!find::<Wide, _>(&mut mem, 0xB, POS_MAX).unwrap());

        mem.seek(SeekFrom::Start(4)).unwrap();
        assert!(ignore::<Wide, _>(&mut mem).unwrap_err().is_eof());
    }

    #[test]
    fn failed_stream_is_an_error() {
        let mut mem = abc();
        let mut lim = rcore::Limiter::new(&mut mem, 2);
        let _ = lim.write(&[0; 4]);
        assert_eq!(lim.state(), State::Fail);

        assert!(find::<Wide, _>(&mut lim, 0xA, POS_MAX).is_err());
    }
}
