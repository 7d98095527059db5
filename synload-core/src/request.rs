//! In-flight request records and their tags
//!
//! Every outstanding request lives in a [`RequestSlab`] slot until its response
//! arrives, its read fails, or the socket closes. The slot key travels over the
//! wire as the request tag and comes back in the response, so the generator can
//! find the record without any lookup table.
//!
//! Tags carry a generation next to the slot index. Releasing a slot bumps its
//! generation, so a stale or forged tag never resolves to a newer record.

use crate::protocol::RequestPacket;
use std::fmt;

/// Wire tag identifying an in-flight request
///
/// Layout: `(generation << 32) | slot_index`. Generations start at 1, so the
/// all-zero tag is never valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(u64);

impl Tag {
    fn new(generation: u32, index: u32) -> Self {
        Tag(((generation as u64) << 32) | index as u64)
    }

    pub fn from_raw(raw: u64) -> Self {
        Tag(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn index(&self) -> usize {
        (self.0 & 0xFFFF_FFFF) as usize
    }

    pub fn generation(&self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Lifecycle of an in-flight request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Record allocated, request not yet queued on the socket
    Sent,
    /// Request bytes committed and response read queued
    AwaitingResponse,
    /// Response received and reported
    Completed,
    /// Read failed or timed out; the record waits for its read to retire
    Failed,
}

/// Timing reported for one completed request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceSample {
    /// Measured time from send to response, in microseconds
    pub service_us: u64,
    /// Part of `service_us` beyond the requested service time
    pub wait_us: u64,
    /// Service time the request asked for, in microseconds
    pub requested_us: u64,
    /// Whether the caller marked this request for measurement
    pub should_measure: bool,
}

/// Per-request completion callback
pub type RequestCallback = Box<dyn FnOnce(ServiceSample)>;

/// Tracking record for one outstanding request
pub struct InFlightRequest {
    /// Monotonic request number, for logging
    pub id: u64,
    pub should_measure: bool,
    /// `timing::time_ns` at send time
    pub start_ns: u64,
    /// Requested service time in microseconds
    pub service_us: u64,
    pub state: RequestState,
    pub packet: RequestPacket,
    callback: Option<RequestCallback>,
}

impl InFlightRequest {
    pub fn new(
        id: u64,
        should_measure: bool,
        start_ns: u64,
        packet: RequestPacket,
        callback: RequestCallback,
    ) -> Self {
        Self {
            id,
            should_measure,
            start_ns,
            service_us: packet.delays[0],
            state: RequestState::Sent,
            packet,
            callback: Some(callback),
        }
    }

    /// Take the callback; it runs at most once
    pub fn take_callback(&mut self) -> Option<RequestCallback> {
        self.callback.take()
    }

    /// Mark the request failed and drop its callback
    pub fn fail(&mut self) {
        self.state = RequestState::Failed;
        self.callback = None;
    }
}

impl fmt::Debug for InFlightRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlightRequest")
            .field("id", &self.id)
            .field("should_measure", &self.should_measure)
            .field("start_ns", &self.start_ns)
            .field("service_us", &self.service_us)
            .field("state", &self.state)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

struct Slot {
    generation: u32,
    entry: Option<InFlightRequest>,
}

/// Generation-checked storage for in-flight requests
#[derive(Default)]
pub struct RequestSlab {
    slots: Vec<Slot>,
    /// Indices of vacant slots, reused LIFO
    free: Vec<u32>,
    len: usize,
}

impl RequestSlab {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag the next `insert` will return
    pub fn vacant_tag(&self) -> Tag {
        match self.free.last() {
            Some(&index) => Tag::new(self.slots[index as usize].generation, index),
            None => Tag::new(1, self.slots.len() as u32),
        }
    }

    pub fn insert(&mut self, request: InFlightRequest) -> Tag {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(request);
            return Tag::new(slot.generation, index);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot { generation: 1, entry: Some(request) });
        Tag::new(1, index)
    }

    pub fn get(&self, tag: Tag) -> Option<&InFlightRequest> {
        let slot = self.slots.get(tag.index())?;
        if slot.generation != tag.generation() {
            return None;
        }
        slot.entry.as_ref()
    }

    pub fn get_mut(&mut self, tag: Tag) -> Option<&mut InFlightRequest> {
        let slot = self.slots.get_mut(tag.index())?;
        if slot.generation != tag.generation() {
            return None;
        }
        slot.entry.as_mut()
    }

    /// Release the record behind `tag`, invalidating the tag
    pub fn remove(&mut self, tag: Tag) -> Option<InFlightRequest> {
        let slot = self.slots.get_mut(tag.index())?;
        if slot.generation != tag.generation() {
            return None;
        }
        let request = slot.entry.take()?;

        slot.generation = slot.generation.wrapping_add(1).max(1);
        self.free.push(tag.index() as u32);
        self.len -= 1;
        Some(request)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Tag, &mut InFlightRequest)> + '_ {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.entry.as_mut().map(|request| (Tag::new(generation, index as u32), request))
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
