//! Queued I/O operations and their completion events

use crate::Error;
use std::io;

/// A queued read request
///
/// The socket completes it once `len` bytes are buffered. `payload` is opaque
/// to the transport and handed back unchanged in the [`Completion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoOperation {
    pub len: usize,
    pub payload: u64,
}

impl IoOperation {
    pub fn new(len: usize, payload: u64) -> Self {
        Self { len, payload }
    }
}

/// How an operation finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    /// The requested bytes arrived
    Ok,
    /// The peer closed the connection or the socket was closed locally
    Closed,
    /// The descriptor reported an error
    Error(io::ErrorKind),
}

impl IoStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, IoStatus::Ok)
    }
}

/// A finished operation, delivered to a [`CompletionHandler`]
///
/// `data` holds exactly `op.len` bytes when `status` is [`IoStatus::Ok`] and is
/// empty otherwise. It borrows the socket's receive ring (or a scratch copy
/// when the bytes wrap around it) and is only valid for the handler call.
#[derive(Debug)]
pub struct Completion<'a> {
    pub op: IoOperation,
    pub status: IoStatus,
    pub data: &'a [u8],
}

/// Receiver of read completions
///
/// `run_io` calls `complete` once per finished operation, in enqueue order.
/// Handlers retire their outstanding work through `refs`.
pub trait CompletionHandler {
    /// Error type returned by the handler; transport errors convert into it
    type Error: From<Error>;

    fn complete(&mut self, refs: &mut RefCount, completion: Completion<'_>)
        -> Result<(), Self::Error>;
}

/// Readiness flags passed to `run_io`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

impl Readiness {
    pub const READABLE: Readiness = Readiness { readable: true, writable: false };
    pub const WRITABLE: Readiness = Readiness { readable: false, writable: true };
    pub const BOTH: Readiness = Readiness { readable: true, writable: true };
}

impl From<&mio::event::Event> for Readiness {
    fn from(event: &mio::event::Event) -> Self {
        // Closed and error conditions surface through the read path
        Readiness {
            readable: event.is_readable() || event.is_read_closed() || event.is_error(),
            writable: event.is_writable() || event.is_write_closed(),
        }
    }
}

/// Count of outstanding units of work on a socket
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefCount {
    count: usize,
}

impl RefCount {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one unit
    pub fn get(&mut self) {
        self.count += 1;
    }

    /// Return one unit
    pub fn put(&mut self) {
        if self.count == 0 {
            tracing::warn!("RefCount::put called with no outstanding references");
            return;
        }
        self.count -= 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_idle(&self) -> bool {
        self.count == 0
    }
}
