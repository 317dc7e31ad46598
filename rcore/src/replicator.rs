use log::warn;

use crate::error::{Result, State, StreamError};
use crate::stream::{Pos, SeekFrom, Stream, POS_MAX};

/// Fans every write out to a set of borrowed sinks.
///
/// Delivery is best effort: a sink that fails doesn't stop the others from
/// receiving the data, but it does fail the replicator.
pub struct Replicator<'a> {
    sinks: Vec<&'a mut dyn Stream>,
    state: State,
}

impl<'a> Replicator<'a> {
    pub fn new() -> Self {
        Replicator {
            sinks: Vec::new(),
            state: State::Ok,
        }
    }

    pub fn push(&mut self, sink: &'a mut dyn Stream) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn sink_states(&self) -> Vec<State> {
        self.sinks.iter().map(|s| s.state()).collect()
    }

    /// Run `op` on every sink, then fail if any sink isn't `Ok` afterwards.
    fn fan_out<F>(&mut self, what: &str, mut op: F) -> Result<()>
    where
        F: FnMut(&mut (dyn Stream + 'a)) -> Result<()>,
    {
        for (i, sink) in self.sinks.iter_mut().enumerate() {
            if let Err(e) = op(&mut **sink) {
                warn!("replicator: {} on sink {} failed: {}", what, i, e);
            }
        }

        if self.sinks.iter().all(|s| s.ok()) {
            Ok(())
        } else {
            self.state.track(Err(StreamError::Failed))
        }
    }
}

impl Default for Replicator<'_> {
    fn default() -> Self {
        Replicator::new()
    }
}

impl Stream for Replicator<'_> {
    fn state(&self) -> State {
        self.state
    }

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
        self.state.check()?;
        self.state.track(Err(StreamError::Unsupported))
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.state.check()?;
        if buf.is_empty() {
            return Ok(0);
        }
        self.fan_out("write", |sink| sink.write_all(buf))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<()> {
        self.state.check()?;
        self.fan_out("flush", |sink| sink.flush())
    }

    fn tell(&self) -> Pos {
        self.sinks.first().map_or(POS_MAX, |s| s.tell())
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<Pos> {
        if self.state == State::Fail {
            return Err(StreamError::Failed);
        }
        self.fan_out("seek", |sink| sink.seek(pos).map(|_| ()))?;
        self.state = State::Ok;
        Ok(self.tell())
    }

    fn skip(&mut self, amount: u64) -> Result<()> {
        self.state.check()?;
        self.fan_out("skip", |sink| sink.skip(amount))
    }
}
