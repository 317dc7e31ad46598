use std::thread;

use rcore::{
    AsyncWriter, Buffer, CachedFile, FileStream, Mode, SeekFrom, Stream, StreamExt, POS_MAX,
};
use rrec::idrec::{self, Format, Layout, Payload, Record, RecordMut};

struct Chunk;

impl Format for Chunk {
    type Id = u16;
    type Size = u32;
    const ALIGN: u64 = 8;
}

const HEAD: u64 = 0x4448;
const BODY: u64 = 0x4442;
const TAIL: u64 = 0x4c54;

#[derive(Default, Debug, PartialEq)]
struct Head {
    version: u8,
    entries: u32,
}

impl Payload for Head {
    fn encode(&self, stream: &mut dyn Stream) -> Result<(), idrec::IdrecError> {
        self.version.encode(stream)?;
        self.entries.encode(stream)
    }

    fn decode(&mut self, stream: &mut dyn Stream) -> Result<(), idrec::IdrecError> {
        self.version.decode(stream)?;
        self.entries.decode(stream)
    }
}

fn rw() -> Mode {
    Mode::READ | Mode::WRITE | Mode::CREATE
}

#[test]
fn records_through_a_cached_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records.bin");
    let head = Head {
        version: 1,
        entries: 3,
    };
    let body: Vec<u8> = (0..100).collect();

    {
        let mut file = CachedFile::open(&path, rw(), 64).unwrap();
        Record::<Chunk, Head, HEAD>::new(&head)
            .write(&mut file)
            .unwrap();
        Record::<Chunk, Vec<u8>, BODY>::new(&body)
            .write(&mut file)
            .unwrap();
        Record::<Chunk, u64, TAIL>::new(&0xDEAD_BEEF)
            .write(&mut file)
            .unwrap();
        file.close().unwrap();
    }

    let mut file = FileStream::open(&path, Mode::READ | Mode::OPEN_EXISTING).unwrap();
    // Padding follows the payload length, not the header
    assert_eq!(file.size().unwrap(), (6 + 5 + 3) + (6 + 100 + 4) + (6 + 8));

    let mut reader = Buffer::new(&mut file, 32, 0);
    assert!(RecordMut::<Chunk, Vec<u8>, BODY>::find(&mut reader, POS_MAX).unwrap());
    let mut back = Vec::new();
    RecordMut::<Chunk, Vec<u8>, BODY>::new(&mut back)
        .read(&mut reader)
        .unwrap();
    assert_eq!(back, body);

    reader.seek(SeekFrom::Start(0)).unwrap();
    assert!(RecordMut::<Chunk, Head, HEAD>::find(&mut reader, POS_MAX).unwrap());
    let mut head_back = Head::default();
    RecordMut::<Chunk, Head, HEAD>::new(&mut head_back)
        .read(&mut reader)
        .unwrap();
    assert_eq!(head_back, head);

    let mut ids = Vec::new();
    reader.seek(SeekFrom::Start(0)).unwrap();
    while let Some(id) = idrec::read_id::<Chunk, _>(&mut reader, POS_MAX).unwrap() {
        ids.push(id as u64);
        idrec::ignore::<Chunk, _>(&mut reader).unwrap();
    }
    assert_eq!(ids, vec![HEAD, BODY, TAIL]);
}

#[test]
fn buffered_records_through_an_async_writer() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("async.bin");
    let mut file = FileStream::open(&path, rw()).unwrap();

    thread::scope(|s| {
        let mut writer = AsyncWriter::new(s, &mut file, 16).unwrap();
        for i in 0..10u32 {
            Record::<Chunk, u32, BODY>::new(&i)
                .write_buffered(&mut writer)
                .unwrap();
        }
        writer.close().unwrap();
    });

    file.seek(SeekFrom::Start(0)).unwrap();
    let mut seen = Vec::new();
    while RecordMut::<Chunk, u32, BODY>::find(&mut file, POS_MAX).unwrap() {
        let mut x = 0u32;
        RecordMut::<Chunk, u32, BODY>::new(&mut x)
            .read(&mut file)
            .unwrap();
        seen.push(x);
    }
    assert_eq!(seen, (0..10).collect::<Vec<_>>());
}

#[test]
fn find_respects_the_end_bound() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bound.bin");
    let layout = Layout::of::<Chunk>();
    let mut file = FileStream::open(&path, rw()).unwrap();

    let mut ends = Vec::new();
    for id in [1u64, 2, 3] {
        let rec = layout.open(&mut file, id).unwrap();
        file.write_u8(id as u8).unwrap();
        ends.push(idrec::close(&mut file, rec).unwrap());
    }
    assert_eq!(ends, vec![14, 28, 42]);

    file.seek(SeekFrom::Start(0)).unwrap();
    assert!(!layout.find(&mut file, 3, ends[1]).unwrap());
    assert_eq!(file.tell(), ends[1]);

    assert!(layout.find(&mut file, 3, POS_MAX).unwrap());
    assert_eq!(layout.read_size(&mut file).unwrap(), 1);
}
