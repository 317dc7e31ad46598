//! Double-buffered stages that move the blocking I/O onto a worker thread.
//!
//! The worker runs inside a [`std::thread::scope`], so the stage it reads
//! from or writes to only needs to be borrowed for the scope. Between the
//! caller and the worker sits a bounded byte ring. The reader's worker reads
//! ahead into its own chunk and hands it over once the ring has room, the
//! writer's worker takes whatever is queued and writes it out while the
//! caller keeps filling the ring.
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, Scope, ScopedJoinHandle};

use log::{debug, trace, warn};
use parking_lot::{Condvar, Mutex};

use crate::buf::flush_buf;
use crate::error::{Result, State, StreamError};
use crate::stream::{Pos, SeekFrom, Stream, POS_MAX};

struct Ring {
    data: VecDeque<u8>,
    capacity: usize,
    // Writer worker holds bytes taken off the ring
    busy: bool,
    // Caller side is gone (reader) or done producing (writer)
    closed: bool,
    // Worker has exited
    done: bool,
    // Worker's terminal status, handed to the caller once
    outcome: Option<StreamError>,
}

struct Shared {
    ring: Mutex<Ring>,
    filled: Condvar,
    drained: Condvar,
}

impl Shared {
    fn new(capacity: usize) -> Self {
        Shared {
            ring: Mutex::new(Ring {
                data: VecDeque::with_capacity(capacity),
                capacity,
                busy: false,
                closed: false,
                done: false,
                outcome: None,
            }),
            filled: Condvar::new(),
            drained: Condvar::new(),
        }
    }

    fn close(&self) {
        let mut ring = self.ring.lock();
        ring.closed = true;
        self.filled.notify_all();
        self.drained.notify_all();
    }

    fn set_outcome(&self, e: StreamError) {
        let mut ring = self.ring.lock();
        ring.outcome = Some(e);
    }
}

/// Marks the worker as gone on the way out, panics included, and wakes
/// anyone waiting on it.
struct Hangup<'a>(&'a Shared);

impl Drop for Hangup<'_> {
    fn drop(&mut self) {
        let mut ring = self.0.ring.lock();
        ring.done = true;
        ring.busy = false;
        if thread::panicking() && ring.outcome.is_none() {
            ring.outcome = Some(StreamError::WorkerPanicked);
        }
        self.0.filled.notify_all();
        self.0.drained.notify_all();
    }
}

fn read_ahead<S: Stream + ?Sized>(source: &mut S, shared: &Shared, chunk: usize) {
    let _hangup = Hangup(shared);
    let mut buf = vec![0u8; chunk];

    loop {
        if shared.ring.lock().closed {
            return;
        }

        let len = match source.read(&mut buf) {
            Ok(0) => {
                shared.set_outcome(StreamError::Failed);
                return;
            }
            Ok(len) => len,
            Err(e) => {
                trace!("async reader: worker stops on {}", e);
                shared.set_outcome(e);
                return;
            }
        };

        let mut ring = shared.ring.lock();
        while ring.capacity - ring.data.len() < len && !ring.closed {
            shared.drained.wait(&mut ring);
        }
        if ring.closed {
            return;
        }
        ring.data.extend(&buf[..len]);
        shared.filled.notify_one();
    }
}

fn write_behind<S: Stream + ?Sized>(sink: &mut S, shared: &Shared) {
    let _hangup = Hangup(shared);
    let mut chunk = Vec::new();

    loop {
        {
            let mut ring = shared.ring.lock();
            ring.busy = false;
            shared.drained.notify_all();

            while ring.data.is_empty() && !ring.closed {
                shared.filled.wait(&mut ring);
            }
            if ring.data.is_empty() {
                break;
            }

            chunk.clear();
            chunk.extend(ring.data.drain(..));
            ring.busy = true;
            shared.drained.notify_all();
        }

        if let Err(e) = sink.write_all(&chunk) {
            trace!("async writer: worker stops on {}", e);
            shared.set_outcome(e);
            return;
        }
    }

    if let Err(e) = sink.flush() {
        shared.set_outcome(e);
    }
}

fn join<T>(worker: ScopedJoinHandle<'_, T>, who: &str) -> Result<()> {
    match worker.join() {
        Ok(_) => Ok(()),
        Err(_) => {
            warn!("{}: worker panicked", who);
            Err(StreamError::WorkerPanicked)
        }
    }
}

/// Reads ahead of the caller on a worker thread.
pub struct AsyncReader<'scope> {
    shared: Arc<Shared>,
    worker: Option<ScopedJoinHandle<'scope, ()>>,
    start: Pos,
    delivered: u64,
    state: State,
}

impl<'scope> AsyncReader<'scope> {
    /// Start reading `source` in chunks of `capacity` bytes.
    pub fn new<'env, S>(
        scope: &'scope Scope<'scope, 'env>,
        source: &'scope mut S,
        capacity: usize,
    ) -> Result<Self>
    where
        S: Stream + Send + ?Sized,
    {
        let capacity = capacity.max(1);
        let shared = Arc::new(Shared::new(capacity));
        let start = source.tell();

        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("async-reader".to_string())
                .spawn_scoped(scope, move || read_ahead(source, &shared, capacity))?
        };
        debug!("async reader: started, capacity {}", capacity);

        Ok(AsyncReader {
            shared,
            worker: Some(worker),
            start,
            delivered: 0,
            state: State::Ok,
        })
    }

    fn take(&self, buf: &mut [u8]) -> Result<usize> {
        let mut ring = self.shared.ring.lock();
        loop {
            if !ring.data.is_empty() {
                let len = flush_buf(&mut ring.data, buf);
                self.shared.drained.notify_one();
                return Ok(len);
            }
            if let Some(e) = ring.outcome.take() {
                return Err(e);
            }
            if ring.done {
                return Err(StreamError::WorkerPanicked);
            }
            self.shared.filled.wait(&mut ring);
        }
    }
}

impl Stream for AsyncReader<'_> {
    fn state(&self) -> State {
        self.state
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.state.check()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let res = self.take(buf);
        let len = self.state.track(res)?;
        self.delivered += len as u64;
        Ok(len)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize> {
        self.state.check()?;
        self.state.track(Err(StreamError::Unsupported))
    }

    fn tell(&self) -> Pos {
        match self.start {
            POS_MAX => POS_MAX,
            start => start + self.delivered,
        }
    }

    fn seek(&mut self, _pos: SeekFrom) -> Result<Pos> {
        if self.state == State::Fail {
            return Err(StreamError::Failed);
        }
        self.state.track(Err(StreamError::Unsupported))
    }
}

impl Drop for AsyncReader<'_> {
    fn drop(&mut self) {
        self.shared.close();
        if let Some(worker) = self.worker.take() {
            let _ = join(worker, "async reader");
        }
        debug!("async reader: stopped after {} bytes", self.delivered);
    }
}

/// Writes behind the caller on a worker thread.
///
/// A sink failure surfaces on the next write, flush or close after it
/// happens. Dropping the writer drains the queue and joins the worker,
/// [`AsyncWriter::close`] does the same but reports the outcome.
pub struct AsyncWriter<'scope> {
    shared: Arc<Shared>,
    worker: Option<ScopedJoinHandle<'scope, ()>>,
    start: Pos,
    accepted: u64,
    state: State,
}

impl<'scope> AsyncWriter<'scope> {
    /// Start writing to `sink` through a ring of `capacity` bytes.
    pub fn new<'env, S>(
        scope: &'scope Scope<'scope, 'env>,
        sink: &'scope mut S,
        capacity: usize,
    ) -> Result<Self>
    where
        S: Stream + Send + ?Sized,
    {
        let capacity = capacity.max(1);
        let shared = Arc::new(Shared::new(capacity));
        let start = sink.tell();

        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("async-writer".to_string())
                .spawn_scoped(scope, move || write_behind(sink, &shared))?
        };
        debug!("async writer: started, capacity {}", capacity);

        Ok(AsyncWriter {
            shared,
            worker: Some(worker),
            start,
            accepted: 0,
            state: State::Ok,
        })
    }

    /// Drain the queue, stop the worker and report how it went.
    pub fn close(mut self) -> Result<()> {
        self.finish()
    }

    fn finish(&mut self) -> Result<()> {
        let worker = match self.worker.take() {
            Some(worker) => worker,
            None => return self.state.check(),
        };

        self.shared.close();
        let joined = join(worker, "async writer");
        let outcome = self.shared.ring.lock().outcome.take();
        debug!("async writer: stopped after {} bytes", self.accepted);

        if let Some(e) = outcome {
            return self.state.track(Err(e));
        }
        self.state.track(joined)?;
        self.state.check()
    }

    fn put(&self, mut buf: &[u8]) -> Result<()> {
        let mut ring = self.shared.ring.lock();
        while !buf.is_empty() {
            if let Some(e) = ring.outcome.take() {
                return Err(e);
            }
            if ring.done {
                return Err(StreamError::WorkerPanicked);
            }

            let room = ring.capacity - ring.data.len();
            if room == 0 {
                self.shared.drained.wait(&mut ring);
                continue;
            }

            let len = room.min(buf.len());
            ring.data.extend(&buf[..len]);
            buf = &buf[len..];
            self.shared.filled.notify_one();
        }
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        let mut ring = self.shared.ring.lock();
        loop {
            if let Some(e) = ring.outcome.take() {
                return Err(e);
            }
            if ring.done {
                return Err(StreamError::WorkerPanicked);
            }
            if ring.data.is_empty() && !ring.busy {
                return Ok(());
            }
            self.shared.drained.wait(&mut ring);
        }
    }
}

impl Stream for AsyncWriter<'_> {
    fn state(&self) -> State {
        self.state
    }

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
        self.state.check()?;
        self.state.track(Err(StreamError::Unsupported))
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.state.check()?;
        let res = self.put(buf);
        self.state.track(res)?;
        self.accepted += buf.len() as u64;
        Ok(buf.len())
    }

    /// Waits until the worker has written out everything queued so far.
    fn flush(&mut self) -> Result<()> {
        self.state.check()?;
        let res = self.wait_idle();
        self.state.track(res)
    }

    fn tell(&self) -> Pos {
        match self.start {
            POS_MAX => POS_MAX,
            start => start + self.accepted,
        }
    }

    fn seek(&mut self, _pos: SeekFrom) -> Result<Pos> {
        if self.state == State::Fail {
            return Err(StreamError::Failed);
        }
        self.state.track(Err(StreamError::Unsupported))
    }
}

impl Drop for AsyncWriter<'_> {
    fn drop(&mut self) {
        if self.worker.is_none() {
            return;
        }
        if let Err(e) = self.finish() {
            warn!("async writer: close on drop failed: {}", e);
        }
    }
}
