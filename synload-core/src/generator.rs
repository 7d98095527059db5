//! Synthetic request generation and response correlation
//!
//! [`RequestGenerator`] writes [`RequestPacket`]s onto an [`AsyncSocket`] and
//! queues one response read per request. It is the socket's
//! [`CompletionHandler`]: when a response read finishes, the generator decodes
//! the echoed tag, finds the in-flight record, and reports the measured
//! service and queueing time to the request's callback.
//!
//! The random source is borrowed for every draw rather than owned, so one
//! generator can be shared between several generators or other consumers.

use crate::config::GeneratorConfig;
use crate::protocol::{RequestPacket, ResponsePacket};
use crate::request::{InFlightRequest, RequestSlab, RequestState, ServiceSample, Tag};
use crate::timing::time_ns;
use crate::{Error, Result};
use rand::RngCore;
use synload_common::Distribution;
use synload_transport::{AsyncSocket, Completion, CompletionHandler, IoOperation, RefCount};

/// Issues synthetic requests and matches their responses
pub struct RequestGenerator {
    config: GeneratorConfig,
    distribution: Box<dyn Distribution>,
    requests: RequestSlab,
    next_id: u64,
    completed: u64,
    failed: u64,
    timed_out: u64,
}

impl RequestGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        config.validate().map_err(|e| Error::Config(format!("{e:#}")))?;
        let distribution =
            config.build_distribution().map_err(|e| Error::Config(format!("{e:#}")))?;

        tracing::debug!(
            "Request generator: {} service time, mean {} us, timeout {:?}",
            distribution.name(),
            config.service_us,
            config.read_timeout
        );

        Ok(Self {
            config,
            distribution,
            requests: RequestSlab::new(),
            next_id: 0,
            completed: 0,
            failed: 0,
            timed_out: 0,
        })
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Draw a service time in microseconds, rounded up
    pub fn gen_service_time<R: RngCore>(&self, rng: &mut R) -> u64 {
        let sample = self.distribution.sample(rng);
        if sample.is_finite() && sample > 0.0 {
            sample.ceil() as u64
        } else {
            0
        }
    }

    /// Send one request and queue the read for its response
    ///
    /// Fails with [`Error::QueueFull`] before touching anything if the socket
    /// cannot take both the request bytes and another read, and with
    /// [`Error::Transport`] if its receive ring is too small for a response.
    /// On success one unit of the socket's refcount is taken; it is returned
    /// when the response read completes or fails.
    pub fn send_request<R, F>(
        &mut self,
        socket: &mut AsyncSocket,
        rng: &mut R,
        should_measure: bool,
        callback: F,
    ) -> Result<Tag>
    where
        R: RngCore,
        F: FnOnce(ServiceSample) + 'static,
    {
        if !socket.is_usable() {
            return Err(Error::Transport(synload_transport::Error::Closed));
        }
        if !socket.can_read() || socket.tx_free() < RequestPacket::SIZE {
            return Err(Error::QueueFull);
        }
        // Once the request bytes are committed the response read must not fail
        if socket.rx_capacity() < ResponsePacket::SIZE {
            return Err(Error::Transport(synload_transport::Error::OperationTooLarge {
                len: ResponsePacket::SIZE,
                capacity: socket.rx_capacity(),
            }));
        }

        let service_us = self.gen_service_time(rng);
        let packet = RequestPacket::single(self.requests.vacant_tag().raw(), service_us);
        let id = self.next_id;
        self.next_id += 1;

        let request = InFlightRequest::new(id, should_measure, time_ns(), packet, Box::new(callback));
        let tag = self.requests.insert(request);
        debug_assert_eq!(tag.raw(), packet.tag);

        if let Err(e) = Self::queue_on_socket(socket, &packet) {
            self.requests.remove(tag);
            return Err(e);
        }
        socket.refs_mut().get();

        if let Some(request) = self.requests.get_mut(tag) {
            request.state = RequestState::AwaitingResponse;
        }
        tracing::trace!("Sent request {} tag {} service {} us", id, tag, service_us);
        Ok(tag)
    }

    fn queue_on_socket(socket: &mut AsyncSocket, packet: &RequestPacket) -> Result<()> {
        let bytes = packet.encode();
        let (first, second) = socket.write_prepare(bytes.len())?;
        let split = first.len();
        first.copy_from_slice(&bytes[..split]);
        second.copy_from_slice(&bytes[split..]);
        socket.write_commit(bytes.len())?;
        socket.read(IoOperation::new(ResponsePacket::SIZE, packet.tag))?;
        Ok(())
    }

    /// Handle a finished response read as of `now_ns`
    ///
    /// Always returns one unit of `refs`, whatever the outcome.
    pub fn complete_at(
        &mut self,
        refs: &mut RefCount,
        completion: Completion<'_>,
        now_ns: u64,
    ) -> Result<()> {
        refs.put();

        if !completion.status.is_ok() {
            return self.fail_read(Tag::from_raw(completion.op.payload), completion);
        }

        let response = ResponsePacket::decode(completion.data)?;
        if response.tag != completion.op.payload {
            // The bytes were meant for the positional request. Release it and
            // leave whichever record the echoed tag names to its own read.
            let expected = completion.op.payload;
            if let Some(request) = self.requests.remove(Tag::from_raw(expected)) {
                self.release_failed(request);
            }
            if self.requests.get(Tag::from_raw(response.tag)).is_none() {
                return Err(Error::UnknownTag(response.tag));
            }
            return Err(Error::Protocol(format!(
                "Response tag {:#x} does not match request tag {:#x}",
                response.tag, expected
            )));
        }

        let tag = Tag::from_raw(response.tag);
        let Some(request) = self.requests.get(tag) else {
            return Err(Error::UnknownTag(response.tag));
        };

        if request.state == RequestState::Failed {
            if let Some(request) = self.requests.remove(tag) {
                tracing::debug!("Discarding late response for request {} tag {}", request.id, tag);
            }
            return Ok(());
        }

        let start_ns = request.start_ns;
        if now_ns <= start_ns {
            if let Some(request) = self.requests.remove(tag) {
                self.release_failed(request);
            }
            return Err(Error::ClockAnomaly { start_ns, now_ns });
        }

        let Some(mut request) = self.requests.remove(tag) else {
            return Err(Error::UnknownTag(response.tag));
        };
        let service_us = (now_ns - start_ns) / 1000;
        let sample = ServiceSample {
            service_us,
            wait_us: service_us.saturating_sub(request.service_us),
            requested_us: request.service_us,
            should_measure: request.should_measure,
        };
        request.state = RequestState::Completed;
        self.completed += 1;

        tracing::trace!(
            "Request {} completed: service {} us, wait {} us",
            request.id,
            sample.service_us,
            sample.wait_us
        );
        if let Some(callback) = request.take_callback() {
            callback(sample);
        }
        Ok(())
    }

    fn fail_read(&mut self, tag: Tag, completion: Completion<'_>) -> Result<()> {
        let Some(request) = self.requests.remove(tag) else {
            return Err(Error::UnknownTag(tag.raw()));
        };
        tracing::debug!("Request {} failed with {:?}", request.id, completion.status);
        self.release_failed(request);
        Ok(())
    }

    fn release_failed(&mut self, mut request: InFlightRequest) {
        // Timed-out records were already counted
        if request.state != RequestState::Failed {
            self.failed += 1;
        }
        request.fail();
    }

    /// Fail every request still awaiting a response after the read timeout
    ///
    /// Expired records stay in the slab without a callback until their read
    /// completes or the socket closes, so their tags are not reused while a
    /// response may still arrive. Returns the number of newly expired requests.
    pub fn expire(&mut self, now_ns: u64) -> usize {
        let Some(timeout) = self.config.read_timeout else {
            return 0;
        };
        let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);

        let mut expired = 0;
        for (tag, request) in self.requests.iter_mut() {
            if request.state == RequestState::AwaitingResponse
                && now_ns.saturating_sub(request.start_ns) >= timeout_ns
            {
                tracing::warn!("Request {} tag {} timed out after {:?}", request.id, tag, timeout);
                request.fail();
                expired += 1;
            }
        }
        self.timed_out += expired as u64;
        expired
    }

    /// Look up an in-flight request
    pub fn request(&self, tag: Tag) -> Option<&InFlightRequest> {
        self.requests.get(tag)
    }

    /// Records held, including timed-out ones whose read is still queued
    pub fn in_flight(&self) -> usize {
        self.requests.len()
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Requests whose read failed, excluding timeouts
    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn timed_out(&self) -> u64 {
        self.timed_out
    }
}

impl CompletionHandler for RequestGenerator {
    type Error = Error;

    fn complete(&mut self, refs: &mut RefCount, completion: Completion<'_>) -> Result<()> {
        self.complete_at(refs, completion, time_ns())
    }
}
