use std::fmt;
use synload_common::RingError;

/// Result type alias for synload core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for synload core operations
#[derive(Debug)]
pub enum Error {
    /// I/O errors, e.g. the percentile sink could not be written
    Io(std::io::Error),

    /// Errors from the socket layer
    Transport(synload_transport::Error),

    /// The socket cannot accept another request right now
    QueueFull,

    /// A bounded buffer is full
    CapacityExceeded { capacity: usize },

    /// A bounded buffer is empty
    Empty,

    /// Percentile outside `[0, 1]`
    InvalidPercentile(f64),

    /// The percentile index falls past the last retained sample (`p = 1.0`)
    PercentileOutOfRange { percentile: f64, samples: usize },

    /// A response arrived no later than its request was sent
    ClockAnomaly { start_ns: u64, now_ns: u64 },

    /// A response tag that matches no in-flight request
    UnknownTag(u64),

    /// Malformed packets
    Protocol(String),

    /// Configuration errors
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Transport(e) => write!(f, "Transport error: {e}"),
            Error::QueueFull => write!(f, "Socket queue is full"),
            Error::CapacityExceeded { capacity } => {
                write!(f, "Capacity of {capacity} elements exceeded")
            }
            Error::Empty => write!(f, "Buffer is empty"),
            Error::InvalidPercentile(p) => write!(f, "Percentile {p} is not in [0, 1]"),
            Error::PercentileOutOfRange { percentile, samples } => {
                write!(f, "Percentile {percentile} is out of range for {samples} samples")
            }
            Error::ClockAnomaly { start_ns, now_ns } => {
                write!(f, "Response at {now_ns} ns is not after request at {start_ns} ns")
            }
            Error::UnknownTag(tag) => write!(f, "Unknown request tag {tag:#x}"),
            Error::Protocol(msg) => write!(f, "Protocol error: {msg}"),
            Error::Config(msg) => write!(f, "Configuration error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<RingError> for Error {
    fn from(err: RingError) -> Self {
        match err {
            RingError::CapacityExceeded { capacity } => Error::CapacityExceeded { capacity },
            RingError::Empty => Error::Empty,
        }
    }
}

impl From<synload_transport::Error> for Error {
    fn from(err: synload_transport::Error) -> Self {
        match err {
            synload_transport::Error::Io(e) => Error::Io(e),
            synload_transport::Error::QueueFull => Error::QueueFull,
            synload_transport::Error::Ring(e) => Error::from(e),
            other => Error::Transport(other),
        }
    }
}
