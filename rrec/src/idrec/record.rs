use std::marker::PhantomData;

use byteorder::LittleEndian;

use rcore::{Limiter, MemoryStream, Pos, SeekFrom, State, Stream, StreamError, StreamExt};

use crate::idrec::{close, Format, IdrecError, Layout};

/// How a value turns into the payload of a record and back.
///
/// `decode` sees a window of exactly the payload, running out of it is `Eof`.
pub trait Payload {
    fn encode(&self, stream: &mut dyn Stream) -> Result<(), IdrecError>;
    fn decode(&mut self, stream: &mut dyn Stream) -> Result<(), IdrecError>;
}

impl Payload for u8 {
    fn encode(&self, stream: &mut dyn Stream) -> Result<(), IdrecError> {
        Ok(stream.write_u8(*self)?)
    }

    fn decode(&mut self, stream: &mut dyn Stream) -> Result<(), IdrecError> {
        *self = stream.read_u8()?;
        Ok(())
    }
}

impl Payload for u16 {
    fn encode(&self, stream: &mut dyn Stream) -> Result<(), IdrecError> {
        Ok(stream.write_u16::<LittleEndian>(*self)?)
    }

    fn decode(&mut self, stream: &mut dyn Stream) -> Result<(), IdrecError> {
        *self = stream.read_u16::<LittleEndian>()?;
        Ok(())
    }
}

impl Payload for u32 {
    fn encode(&self, stream: &mut dyn Stream) -> Result<(), IdrecError> {
        Ok(stream.write_u32::<LittleEndian>(*self)?)
    }

    fn decode(&mut self, stream: &mut dyn Stream) -> Result<(), IdrecError> {
        *self = stream.read_u32::<LittleEndian>()?;
        Ok(())
    }
}

impl Payload for u64 {
    fn encode(&self, stream: &mut dyn Stream) -> Result<(), IdrecError> {
        Ok(stream.write_u64::<LittleEndian>(*self)?)
    }

    fn decode(&mut self, stream: &mut dyn Stream) -> Result<(), IdrecError> {
        *self = stream.read_u64::<LittleEndian>()?;
        Ok(())
    }
}

/// Raw bytes, the whole payload.
impl Payload for Vec<u8> {
    fn encode(&self, stream: &mut dyn Stream) -> Result<(), IdrecError> {
        Ok(stream.write_all(self)?)
    }

    fn decode(&mut self, stream: &mut dyn Stream) -> Result<(), IdrecError> {
        let mut sink = MemoryStream::new();
        stream.copy_to(&mut sink)?;
        *self = sink.into_inner();
        Ok(())
    }
}

impl Payload for String {
    fn encode(&self, stream: &mut dyn Stream) -> Result<(), IdrecError> {
        Ok(stream.write_all(self.as_bytes())?)
    }

    fn decode(&mut self, stream: &mut dyn Stream) -> Result<(), IdrecError> {
        let mut bytes = Vec::new();
        bytes.decode(stream)?;
        *self = String::from_utf8(bytes)?;
        Ok(())
    }
}

/// Borrowed value bound to the record id `ID`, for writing.
pub struct Record<'a, F: Format, T: Payload, const ID: u64> {
    data: &'a T,
    _format: PhantomData<F>,
}

impl<'a, F: Format, T: Payload, const ID: u64> Record<'a, F, T, ID> {
    pub fn new(data: &'a T) -> Self {
        Record {
            data,
            _format: PhantomData,
        }
    }

    pub const fn id() -> u64 {
        ID
    }

    /// Position `stream` right after the next record with this id.
    pub fn find<S: Stream + ?Sized>(stream: &mut S, end: Pos) -> Result<bool, IdrecError> {
        Layout::of::<F>().find(stream, ID, end)
    }

    /// Write in place, `stream` must be able to seek back over the record.
    pub fn write<S: Stream + ?Sized>(&self, mut stream: &mut S) -> Result<Pos, IdrecError> {
        let record = Layout::of::<F>().open(stream, ID)?;
        self.data.encode(&mut stream)?;
        close(stream, record)
    }

    /// Build the record in memory, then copy it to `stream` front to back.
    ///
    /// For stages that can't seek, returns the number of bytes written.
    pub fn write_buffered<S: Stream + ?Sized>(&self, stream: &mut S) -> Result<u64, IdrecError> {
        let mut tmp = MemoryStream::new();
        let len = self.write(&mut tmp)?;
        tmp.seek(SeekFrom::Start(0))?;
        tmp.copy_to(stream)?;
        Ok(len)
    }
}

/// Mutably borrowed value bound to the record id `ID`, for reading.
pub struct RecordMut<'a, F: Format, T: Payload, const ID: u64> {
    data: &'a mut T,
    _format: PhantomData<F>,
}

impl<'a, F: Format, T: Payload, const ID: u64> RecordMut<'a, F, T, ID> {
    pub fn new(data: &'a mut T) -> Self {
        RecordMut {
            data,
            _format: PhantomData,
        }
    }

    pub const fn id() -> u64 {
        ID
    }

    pub fn find<S: Stream + ?Sized>(stream: &mut S, end: Pos) -> Result<bool, IdrecError> {
        Record::<F, T, ID>::find(stream, end)
    }

    pub fn write<S: Stream + ?Sized>(&self, stream: &mut S) -> Result<Pos, IdrecError> {
        Record::<F, T, ID>::new(&*self.data).write(stream)
    }

    /// Decode the record whose id was just read.
    ///
    /// Whatever the payload leaves unread is skipped along with the padding,
    /// so the stream ends up at the next record either way.
    pub fn read<S: Stream + ?Sized>(&mut self, stream: &mut S) -> Result<(), IdrecError> {
        let layout = Layout::of::<F>();
        let size = layout.read_size(stream)?;

        let (decoded, rest) = {
            let mut window = Limiter::new(&mut *stream, size);
            let decoded = self.data.decode(&mut window);
            // Only a broken stream stops short of the next record
            if window.state() == State::Fail {
                return decoded.and(Err(StreamError::Failed.into()));
            }
            (decoded, window.remaining())
        };

        stream.skip(rest.saturating_add(layout.padding(size)))?;
        decoded
    }
}
