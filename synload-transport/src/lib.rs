//! Synload Transport Layer
//!
//! Readiness-driven, non-blocking TCP I/O for the synload client.
//!
//! The crate never waits on its own: an external event loop reports readiness
//! and calls [`AsyncSocket::run_io`], which moves bytes between the kernel and
//! the socket's ring buffers and delivers finished reads to a
//! [`CompletionHandler`].
//!
//! ```rust,no_run
//! use synload_transport::{AsyncSocket, Completion, CompletionHandler, IoOperation, Readiness, RefCount};
//!
//! struct Print;
//!
//! impl CompletionHandler for Print {
//!     type Error = synload_transport::Error;
//!
//!     fn complete(&mut self, refs: &mut RefCount, c: Completion<'_>) -> synload_transport::Result<()> {
//!         refs.put();
//!         println!("op {} finished with {:?}: {:?}", c.op.payload, c.status, c.data);
//!         Ok(())
//!     }
//! }
//!
//! let mut socket = AsyncSocket::new();
//! socket.connect_host("127.0.0.1", 9000).unwrap();
//! socket.write(b"ping").unwrap();
//! socket.read(IoOperation::new(4, 1)).unwrap();
//! socket.refs_mut().get();
//!
//! while !socket.refs().is_idle() {
//!     socket.run_io(Readiness::BOTH, &mut Print).unwrap();
//! }
//! ```

use std::fmt;
use synload_common::RingError;

pub mod ioop;
pub mod socket;

pub use ioop::{Completion, CompletionHandler, IoOperation, IoStatus, Readiness, RefCount};
pub use socket::{AsyncSocket, SocketState, DEFAULT_BUFFER_SIZE, MAX_PENDING_READS};

/// Transport layer errors
#[derive(Debug)]
pub enum Error {
    /// I/O errors from the descriptor
    Io(std::io::Error),

    /// Connection setup errors
    Connection(String),

    /// The socket has no descriptor yet
    NotConnected,

    /// The socket failed or was closed
    Closed,

    /// The pending read queue or the transmit ring has no room
    QueueFull,

    /// A read longer than the receive ring can never complete
    OperationTooLarge { len: usize, capacity: usize },

    /// `write_commit` exceeded the last `write_prepare` reservation
    InvalidCommit { requested: usize, reserved: usize },

    /// Ring buffer misuse
    Ring(RingError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Connection(msg) => write!(f, "Connection error: {msg}"),
            Error::NotConnected => write!(f, "Socket is not connected"),
            Error::Closed => write!(f, "Socket is closed"),
            Error::QueueFull => write!(f, "Socket queue is full"),
            Error::OperationTooLarge { len, capacity } => {
                write!(f, "Read of {len} bytes exceeds receive buffer of {capacity} bytes")
            }
            Error::InvalidCommit { requested, reserved } => {
                write!(f, "Cannot commit {requested} bytes, only {reserved} reserved")
            }
            Error::Ring(e) => write!(f, "Ring buffer error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Ring(e) => Some(e),
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
        Error::Ring(err)
    }
}

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, Error>;
