use thiserror::Error;

/// Tri-state outcome every stage carries.
///
/// `Eof` means the well-formed data ran out, `Fail` means something is
/// broken. Both stop further progress on the stage that holds them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum State {
    #[default]
    Ok,
    Eof,
    Fail,
}

impl State {
    pub fn is_ok(self) -> bool {
        self == State::Ok
    }

    /// The error a stage re-reports while sitting in this state.
    pub fn to_error(self) -> Option<StreamError> {
        match self {
            State::Ok => None,
            State::Eof => Some(StreamError::Eof),
            State::Fail => Some(StreamError::Failed),
        }
    }

    /// Gate at the top of every data-moving operation.
    pub fn check(self) -> Result<()> {
        match self.to_error() {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Record the outcome of an operation, leaving `Ok` untouched on success.
    pub fn track<T>(&mut self, res: Result<T>) -> Result<T> {
        if let Err(e) = &res {
            *self = e.state();
        }
        res
    }
}

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("end of stream")]
    Eof,
    #[error("stream is in failed state")]
    Failed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("capacity of {limit} bytes exceeded")]
    Capacity { limit: u64 },
    #[error("write of {requested} bytes truncated to {allowed}")]
    Truncated { requested: u64, allowed: u64 },
    #[error("invalid open mode: {0}")]
    InvalidMode(&'static str),
    #[error("seek out of range")]
    SeekOutOfRange,
    #[error("stream is closed")]
    Closed,
    #[error("operation not supported by this stage")]
    Unsupported,
    #[error("background worker panicked")]
    WorkerPanicked,
}

impl StreamError {
    /// Which state a stage lands in after reporting this error.
    pub fn state(&self) -> State {
        match self {
            StreamError::Eof => State::Eof,
            _ => State::Fail,
        }
    }

    pub fn is_eof(&self) -> bool {
        matches!(self, StreamError::Eof)
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;
