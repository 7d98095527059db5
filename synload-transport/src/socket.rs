//! Asynchronous TCP socket backed by ring buffers
//!
//! An [`AsyncSocket`] owns one non-blocking connection, a receive ring, a
//! transmit ring and a queue of pending read operations. It never blocks and
//! never runs its own event loop: an external readiness loop (epoll, kqueue,
//! `mio::Poll`, ...) calls [`AsyncSocket::run_io`] whenever the descriptor may
//! be readable or writable.
//!
//! Writes use a reservation contract: [`write_prepare`](AsyncSocket::write_prepare)
//! hands out the free part of the transmit ring (possibly split in two across
//! the wrap point), the caller copies its bytes in place, and
//! [`write_commit`](AsyncSocket::write_commit) makes them eligible for
//! transmission. Nothing is sent until the next writable `run_io`.
//!
//! Reads are queued [`IoOperation`]s. They complete strictly in enqueue order
//! once enough bytes are buffered; the bytes are not inspected.
//!
//! mio readiness is edge-triggered, so `run_io` reads until the descriptor
//! would block, and a caller that queues writes outside of a writable event
//! should follow up with `run_io(Readiness::WRITABLE, ..)`.

use crate::ioop::{Completion, CompletionHandler, IoOperation, IoStatus, Readiness, RefCount};
use crate::{Error, Result};
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use std::io;
use std::net::{Shutdown, SocketAddr, ToSocketAddrs};
use synload_common::{BoundedQueue, RingByteBuffer};

/// Maximum number of outstanding read operations per socket
pub const MAX_PENDING_READS: usize = 1024;

/// Default size of the receive and transmit rings
pub const DEFAULT_BUFFER_SIZE: usize = 16384;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// No descriptor yet; operations may still be queued
    Disconnected,
    /// Non-blocking connect in progress
    Connecting,
    Connected,
    /// Closed or errored; every pending read has been failed
    Failed,
}

/// Non-blocking TCP connection with ring-buffered reads and writes
pub struct AsyncSocket {
    stream: Option<TcpStream>,
    state: SocketState,
    /// Pending read operations, oldest first
    rx_ops: BoundedQueue<IoOperation>,
    rbuf: RingByteBuffer,
    wbuf: RingByteBuffer,
    /// Contiguous copy of a completion that wraps around `rbuf`
    scratch: Vec<u8>,
    /// Bytes handed out by the last `write_prepare`
    reserved: usize,
    refs: RefCount,
}

impl AsyncSocket {
    pub fn new() -> Self {
        Self::with_buffer_sizes(DEFAULT_BUFFER_SIZE, DEFAULT_BUFFER_SIZE)
    }

    /// Create a socket with custom receive and transmit ring sizes
    pub fn with_buffer_sizes(rx_size: usize, tx_size: usize) -> Self {
        Self {
            stream: None,
            state: SocketState::Disconnected,
            rx_ops: BoundedQueue::new(MAX_PENDING_READS),
            rbuf: RingByteBuffer::new(rx_size),
            wbuf: RingByteBuffer::new(tx_size),
            scratch: Vec::new(),
            reserved: 0,
            refs: RefCount::new(),
        }
    }

    /// Wrap an already connected std stream (e.g. the accepting side in tests)
    pub fn from_std(stream: std::net::TcpStream) -> Result<Self> {
        stream.set_nonblocking(true)?;
        let mut socket = Self::new();
        socket.stream = Some(TcpStream::from_std(stream));
        socket.state = SocketState::Connected;
        Ok(socket)
    }

    /// Start a non-blocking connection to `target`
    ///
    /// Returns as soon as the connection attempt is under way. Completion is
    /// observed by `run_io`; register the socket with the event loop first.
    pub fn connect(&mut self, target: SocketAddr) -> Result<()> {
        if self.stream.is_some() {
            return Err(Error::Connection("Socket already connected".to_string()));
        }

        let stream = TcpStream::connect(target)?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Could not set TCP_NODELAY: {}", e);
        }

        tracing::debug!("Connecting to {}", target);
        self.stream = Some(stream);
        self.state = SocketState::Connecting;
        Ok(())
    }

    /// Resolve `address:port` and connect to the first result
    pub fn connect_host(&mut self, address: &str, port: u16) -> Result<()> {
        let target = (address, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::Connection(format!("No address found for {address}:{port}")))?;
        self.connect(target)
    }

    /// Register the descriptor for read and write readiness
    pub fn register(&mut self, registry: &Registry, token: Token) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        registry.register(stream, token, Interest::READABLE | Interest::WRITABLE)?;
        Ok(())
    }

    pub fn reregister(&mut self, registry: &Registry, token: Token) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        registry.reregister(stream, token, Interest::READABLE | Interest::WRITABLE)?;
        Ok(())
    }

    pub fn deregister(&mut self, registry: &Registry) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        registry.deregister(stream)?;
        Ok(())
    }

    /// Queue a read of `op.len` bytes
    pub fn read(&mut self, op: IoOperation) -> Result<()> {
        if self.state == SocketState::Failed {
            return Err(Error::Closed);
        }
        if op.len > self.rbuf.capacity() {
            return Err(Error::OperationTooLarge { len: op.len, capacity: self.rbuf.capacity() });
        }
        self.rx_ops.push(op).map_err(|_| Error::QueueFull)
    }

    /// Reserve up to `len` bytes of the transmit ring
    ///
    /// The two slices together are at most `len` bytes long; the second one is
    /// only non-empty when the reservation wraps around the ring. Copy the
    /// outgoing bytes into them, then call [`write_commit`](Self::write_commit).
    pub fn write_prepare(&mut self, len: usize) -> Result<(&mut [u8], &mut [u8])> {
        if self.state == SocketState::Failed {
            return Err(Error::Closed);
        }
        self.reserved = len.min(self.wbuf.free());
        Ok(self.wbuf.writable_regions(self.reserved))
    }

    /// Mark `len` reserved bytes as ready for transmission
    pub fn write_commit(&mut self, len: usize) -> Result<()> {
        if len > self.reserved {
            return Err(Error::InvalidCommit { requested: len, reserved: self.reserved });
        }
        self.wbuf.commit(len)?;
        self.reserved = 0;
        Ok(())
    }

    /// Queue `data` for transmission in one step
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.wbuf.free() {
            return Err(Error::QueueFull);
        }
        let (first, second) = self.write_prepare(data.len())?;
        let split = first.len();
        first.copy_from_slice(&data[..split]);
        second.copy_from_slice(&data[split..]);
        self.write_commit(data.len())
    }

    /// Handle readiness reported by the event loop
    ///
    /// Writable: flush as much of the transmit ring as the descriptor accepts.
    /// Readable: fill the receive ring and complete every read whose length is
    /// now buffered, in order. An orderly close or a descriptor error fails all
    /// remaining reads and leaves the socket in [`SocketState::Failed`].
    ///
    /// Errors returned by the handler abort processing and are propagated.
    pub fn run_io<H: CompletionHandler>(
        &mut self,
        events: Readiness,
        handler: &mut H,
    ) -> std::result::Result<(), H::Error> {
        match self.state {
            SocketState::Failed => return Ok(()),
            SocketState::Disconnected => return Err(Error::NotConnected.into()),
            SocketState::Connecting => match self.finish_connect() {
                Ok(true) => {}
                Ok(false) => return Ok(()),
                Err(e) => {
                    tracing::warn!("Connection failed: {}", e);
                    return self.fail(IoStatus::Error(e.kind()), handler);
                }
            },
            SocketState::Connected => {}
        }

        if events.writable {
            if let Err(e) = self.flush_tx() {
                tracing::warn!("Socket write failed: {}", e);
                return self.fail(IoStatus::Error(e.kind()), handler);
            }
        }

        if events.readable {
            loop {
                let Some(stream) = self.stream.as_mut() else {
                    break;
                };
                let fill = self.rbuf.fill_from(stream);
                let ring_full = self.rbuf.is_full();

                // Bytes that arrived before a close or error still complete
                // their operations.
                self.deliver(handler)?;

                match fill {
                    Ok(fill) if fill.eof => {
                        tracing::debug!("Peer closed connection");
                        return self.fail(IoStatus::Closed, handler);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Socket read failed: {}", e);
                        return self.fail(IoStatus::Error(e.kind()), handler);
                    }
                }

                // Keep reading only if the ring filled up and completions made room
                if !ring_full || self.rbuf.is_full() {
                    break;
                }
            }
        }

        Ok(())
    }

    /// Shut the connection down and fail every pending read
    pub fn close<H: CompletionHandler>(
        &mut self,
        handler: &mut H,
    ) -> std::result::Result<(), H::Error> {
        tracing::debug!("Closing socket with {} pending reads", self.rx_ops.len());
        self.fail(IoStatus::Closed, handler)
    }

    fn finish_connect(&mut self) -> io::Result<bool> {
        let stream = self.stream.as_ref().ok_or(io::ErrorKind::NotConnected)?;
        if let Some(err) = stream.take_error()? {
            return Err(err);
        }

        match stream.peer_addr() {
            Ok(peer) => {
                tracing::debug!("Connected to {}", peer);
                self.state = SocketState::Connected;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn flush_tx(&mut self) -> io::Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };
        let written = self.wbuf.drain_to(stream)?;
        if written > 0 {
            tracing::trace!("Wrote {} bytes, {} still queued", written, self.wbuf.len());
        }
        Ok(())
    }

    fn deliver<H: CompletionHandler>(
        &mut self,
        handler: &mut H,
    ) -> std::result::Result<(), H::Error> {
        while let Some(&op) = self.rx_ops.front() {
            if self.rbuf.len() < op.len {
                break;
            }
            self.rx_ops.pop().map_err(Error::from)?;

            let data = match self.rbuf.contiguous(op.len) {
                Some(bytes) => bytes,
                None => {
                    self.scratch.resize(op.len, 0);
                    self.rbuf.copy_out(&mut self.scratch);
                    &self.scratch[..]
                }
            };

            let result =
                handler.complete(&mut self.refs, Completion { op, status: IoStatus::Ok, data });
            self.rbuf.consume(op.len).map_err(Error::from)?;
            result?;
        }
        Ok(())
    }

    fn fail<H: CompletionHandler>(
        &mut self,
        status: IoStatus,
        handler: &mut H,
    ) -> std::result::Result<(), H::Error> {
        if self.state != SocketState::Failed {
            if let Some(stream) = self.stream.as_ref() {
                let _ = stream.shutdown(Shutdown::Both);
            }
            self.state = SocketState::Failed;
            self.rbuf.clear();
            self.wbuf.clear();
            self.reserved = 0;
        }

        if !self.rx_ops.is_empty() {
            tracing::debug!("Failing {} pending reads with {:?}", self.rx_ops.len(), status);
        }
        // Every queued read is completed even if the handler rejects one
        let mut first_err = None;
        while let Ok(op) = self.rx_ops.pop() {
            if let Err(e) = handler.complete(&mut self.refs, Completion { op, status, data: &[] }) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    /// False once the socket has failed; callers must stop issuing operations
    pub fn is_usable(&self) -> bool {
        self.state != SocketState::Failed
    }

    /// True if another read can be queued
    pub fn can_read(&self) -> bool {
        self.is_usable() && !self.rx_ops.is_full()
    }

    pub fn pending_reads(&self) -> usize {
        self.rx_ops.len()
    }

    /// Largest read the receive ring can hold
    pub fn rx_capacity(&self) -> usize {
        self.rbuf.capacity()
    }

    /// Bytes received but not yet handed to a completion
    pub fn rx_buffered(&self) -> usize {
        self.rbuf.len()
    }

    /// Bytes committed but not yet transmitted
    pub fn tx_pending(&self) -> usize {
        self.wbuf.len()
    }

    /// Free space in the transmit ring
    pub fn tx_free(&self) -> usize {
        self.wbuf.free()
    }

    /// True while committed bytes wait for a writable event
    pub fn wants_write(&self) -> bool {
        !self.wbuf.is_empty()
    }

    pub fn refs(&self) -> &RefCount {
        &self.refs
    }

    pub fn refs_mut(&mut self) -> &mut RefCount {
        &mut self.refs
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        let stream = self.stream.as_ref().ok_or(Error::NotConnected)?;
        Ok(stream.local_addr()?)
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        let stream = self.stream.as_ref().ok_or(Error::NotConnected)?;
        Ok(stream.peer_addr()?)
    }
}

impl Default for AsyncSocket {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;
    use std::time::{Duration, Instant};

    /// Records every completion it receives
    #[derive(Default)]
    struct Recorder {
        completions: Vec<(IoOperation, IoStatus, Vec<u8>)>,
    }

    impl CompletionHandler for Recorder {
        type Error = Error;

        fn complete(&mut self, refs: &mut RefCount, completion: Completion<'_>) -> Result<()> {
            refs.put();
            self.completions.push((completion.op, completion.status, completion.data.to_vec()));
            Ok(())
        }
    }

    fn drive_until(socket: &mut AsyncSocket, recorder: &mut Recorder, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while recorder.completions.len() < count {
            assert!(Instant::now() < deadline, "Timed out waiting for completions");
            socket.run_io(Readiness::BOTH, recorder).unwrap();
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn echo_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut buf = vec![0u8; 1024];
            loop {
                let n = socket.read(&mut buf).unwrap_or(0);
                if n == 0 {
                    break;
                }
                socket.write_all(&buf[..n]).unwrap();
            }
        });
        addr
    }

    #[test]
    fn test_echo_reads_complete_in_order() {
        let addr = echo_server();
        let mut socket = AsyncSocket::new();
        socket.connect(addr).unwrap();

        socket.write(b"hello world").unwrap();
        socket.read(IoOperation::new(5, 1)).unwrap();
        socket.read(IoOperation::new(6, 2)).unwrap();
        socket.refs_mut().get();
        socket.refs_mut().get();

        let mut recorder = Recorder::default();
        drive_until(&mut socket, &mut recorder, 2);

        assert_eq!(recorder.completions[0], (IoOperation::new(5, 1), IoStatus::Ok, b"hello".to_vec()));
        assert_eq!(recorder.completions[1], (IoOperation::new(6, 2), IoStatus::Ok, b" world".to_vec()));
        assert!(socket.refs().is_idle());
        assert_eq!(socket.state(), SocketState::Connected);
        assert_eq!(socket.tx_pending(), 0);
        assert_eq!(socket.rx_buffered(), 0);
    }

    #[test]
    fn test_wrapped_completion_is_contiguous() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            socket.write_all(b"abcdefghijkl").unwrap();
            thread::sleep(Duration::from_millis(200));
        });

        // 12 bytes through an 8-byte ring: the second read wraps around it
        let mut socket = AsyncSocket::with_buffer_sizes(8, 8);
        socket.connect(addr).unwrap();
        socket.read(IoOperation::new(6, 1)).unwrap();
        socket.read(IoOperation::new(6, 2)).unwrap();

        let mut recorder = Recorder::default();
        drive_until(&mut socket, &mut recorder, 2);
        assert_eq!(recorder.completions[0].2, b"abcdef");
        assert_eq!(recorder.completions[1].2, b"ghijkl");
    }

    #[test]
    fn test_peer_close_fails_pending_reads() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            socket.write_all(b"abc").unwrap();
            // Dropping the stream closes the connection
        });

        let mut socket = AsyncSocket::new();
        socket.connect(addr).unwrap();
        socket.read(IoOperation::new(3, 1)).unwrap();
        socket.read(IoOperation::new(4, 2)).unwrap();
        socket.read(IoOperation::new(4, 3)).unwrap();

        let mut recorder = Recorder::default();
        drive_until(&mut socket, &mut recorder, 3);

        assert_eq!(recorder.completions[0].1, IoStatus::Ok);
        assert_eq!(recorder.completions[0].2, b"abc");
        assert_eq!(recorder.completions[1].0.payload, 2);
        assert!(!recorder.completions[1].1.is_ok());
        assert!(recorder.completions[1].2.is_empty());
        assert_eq!(recorder.completions[2].0.payload, 3);
        assert!(!recorder.completions[2].1.is_ok());

        assert_eq!(socket.state(), SocketState::Failed);
        assert!(!socket.is_usable());
        assert!(matches!(socket.read(IoOperation::new(1, 4)), Err(Error::Closed)));
        assert!(matches!(socket.write(b"x"), Err(Error::Closed)));

        // Further readiness on a failed socket is a no-op
        socket.run_io(Readiness::BOTH, &mut recorder).unwrap();
        assert_eq!(recorder.completions.len(), 3);
    }

    #[test]
    fn test_close_fails_pending_reads() {
        let mut socket = AsyncSocket::new();
        for i in 0..3 {
            socket.read(IoOperation::new(8, i)).unwrap();
        }

        let mut recorder = Recorder::default();
        socket.close(&mut recorder).unwrap();

        let statuses: Vec<_> = recorder.completions.iter().map(|c| (c.0.payload, c.1)).collect();
        assert_eq!(statuses, vec![(0, IoStatus::Closed), (1, IoStatus::Closed), (2, IoStatus::Closed)]);
        assert_eq!(socket.pending_reads(), 0);
        assert!(!socket.is_usable());
    }

    /// Rejects the first completion it sees
    #[derive(Default)]
    struct RejectFirst {
        seen: Vec<u64>,
    }

    impl CompletionHandler for RejectFirst {
        type Error = Error;

        fn complete(&mut self, refs: &mut RefCount, completion: Completion<'_>) -> Result<()> {
            refs.put();
            self.seen.push(completion.op.payload);
            if self.seen.len() == 1 {
                return Err(Error::Connection("rejected".to_string()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_close_drains_past_handler_error() {
        let mut socket = AsyncSocket::new();
        for i in 0..3 {
            socket.read(IoOperation::new(8, i)).unwrap();
            socket.refs_mut().get();
        }

        let mut handler = RejectFirst::default();
        let result = socket.close(&mut handler);

        assert!(matches!(result, Err(Error::Connection(_))));
        assert_eq!(handler.seen, vec![0, 1, 2]);
        assert_eq!(socket.pending_reads(), 0);
        assert!(socket.refs().is_idle());
    }

    #[test]
    fn test_read_queue_full() {
        let mut socket = AsyncSocket::new();
        for i in 0..MAX_PENDING_READS {
            socket.read(IoOperation::new(8, i as u64)).unwrap();
        }
        assert!(!socket.can_read());
        assert!(matches!(socket.read(IoOperation::new(8, 0)), Err(Error::QueueFull)));
        assert_eq!(socket.pending_reads(), MAX_PENDING_READS);
    }

    #[test]
    fn test_read_larger_than_ring_rejected() {
        let mut socket = AsyncSocket::with_buffer_sizes(16, 16);
        assert_eq!(socket.rx_capacity(), 16);
        let result = socket.read(IoOperation::new(17, 0));
        assert!(matches!(result, Err(Error::OperationTooLarge { len: 17, capacity: 16 })));
    }

    #[test]
    fn test_write_prepare_commit() {
        let mut socket = AsyncSocket::with_buffer_sizes(16, 8);
        socket.write(b"abcdef").unwrap();

        // Only 2 bytes free: the reservation is clamped
        let (first, second) = socket.write_prepare(5).unwrap();
        assert_eq!(first.len() + second.len(), 2);
        first.copy_from_slice(b"gh");
        assert!(matches!(
            socket.write_commit(3),
            Err(Error::InvalidCommit { requested: 3, reserved: 2 })
        ));
        socket.write_commit(2).unwrap();
        assert_eq!(socket.tx_pending(), 8);
        assert_eq!(socket.tx_free(), 0);
        assert!(matches!(socket.write(b"z"), Err(Error::QueueFull)));
        assert!(socket.wants_write());
    }

    #[test]
    fn test_run_io_requires_connection() {
        let mut socket = AsyncSocket::new();
        let mut recorder = Recorder::default();
        let result = socket.run_io(Readiness::BOTH, &mut recorder);
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[test]
    fn test_connect_twice_rejected() {
        let addr = echo_server();
        let mut socket = AsyncSocket::new();
        socket.connect(addr).unwrap();
        assert!(matches!(socket.connect(addr), Err(Error::Connection(_))));
    }

    #[test]
    fn test_from_std_stream() {
        let addr = echo_server();
        let stream = std::net::TcpStream::connect(addr).unwrap();
        let mut socket = AsyncSocket::from_std(stream).unwrap();
        assert_eq!(socket.state(), SocketState::Connected);
        assert_eq!(socket.peer_addr().unwrap(), addr);

        socket.write(b"ping").unwrap();
        socket.read(IoOperation::new(4, 9)).unwrap();
        let mut recorder = Recorder::default();
        drive_until(&mut socket, &mut recorder, 1);
        assert_eq!(recorder.completions[0].2, b"ping");
    }
}
