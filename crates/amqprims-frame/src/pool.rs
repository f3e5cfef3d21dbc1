//! Arena of reusable outgoing frames.
//!
//! Frames are acquired as a [`FrameHandle`] and written through the pool.
//! Releasing consumes the handle, resets the slot and returns it to the free
//! list, so a released frame cannot be reached through its former handle.
//!
//! The pool pre-allocates `capacity` slots. When every slot is in use further
//! acquisitions grow the arena; grown slots are recycled like the rest.

use std::fmt;

use amqprims_codec::Performative;
use bytes::Bytes;

use crate::error::Result;

/// Default number of pre-allocated frame slots.
pub const DEFAULT_POOL_CAPACITY: usize = 10;

/// Called when a frame's payload does not fit the frame size limit.
///
/// The handler may adjust the performative (for example to mark a transfer
/// as `more`) and return `Ok` to have the writer emit the portion that fits,
/// leaving the remainder in the frame. Returning an error aborts the write.
pub type PayloadTooLargeHandler = Box<dyn FnMut(&mut Performative) -> Result<()>>;

/// An outgoing AMQP frame held in a pool slot.
#[derive(Default)]
pub struct OutgoingFrame {
    channel: Option<u16>,
    body: Option<Performative>,
    payload: Option<Bytes>,
    payload_too_large: Option<PayloadTooLargeHandler>,
}

impl OutgoingFrame {
    /// Channel of the frame, `None` when the slot is free.
    pub fn channel(&self) -> Option<u16> {
        self.channel
    }

    pub fn body(&self) -> Option<&Performative> {
        self.body.as_ref()
    }

    pub fn body_mut(&mut self) -> Option<&mut Performative> {
        self.body.as_mut()
    }

    /// Payload bytes not yet written.
    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    pub fn set_payload(&mut self, payload: Option<Bytes>) {
        self.payload = payload.filter(|p| !p.is_empty());
    }

    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    pub fn set_payload_too_large_handler(&mut self, handler: PayloadTooLargeHandler) {
        self.payload_too_large = Some(handler);
    }

    pub fn has_custom_payload_handler(&self) -> bool {
        self.payload_too_large.is_some()
    }

    /// Borrow every part the writer needs at once.
    pub(crate) fn parts_mut(
        &mut self,
    ) -> (
        Option<u16>,
        Option<&mut Performative>,
        &mut Option<Bytes>,
        Option<&mut PayloadTooLargeHandler>,
    ) {
        (
            self.channel,
            self.body.as_mut(),
            &mut self.payload,
            self.payload_too_large.as_mut(),
        )
    }

    fn reset(&mut self) {
        self.channel = None;
        self.body = None;
        self.payload = None;
        self.payload_too_large = None;
    }
}

impl fmt::Debug for OutgoingFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingFrame")
            .field("channel", &self.channel)
            .field("body", &self.body.as_ref().map(Performative::name))
            .field("payload_len", &self.payload.as_ref().map(Bytes::len))
            .field("custom_handler", &self.payload_too_large.is_some())
            .finish()
    }
}

/// Handle to an acquired frame. Not `Clone`: exactly one holder per acquisition.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct FrameHandle(usize);

impl FrameHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Arena of [`OutgoingFrame`] slots with a free list.
#[derive(Debug)]
pub struct FramePool {
    slots: Vec<OutgoingFrame>,
    free: Vec<usize>,
    capacity: usize,
}

impl FramePool {
    /// Create a pool with `capacity` pre-allocated slots.
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| OutgoingFrame::default()).collect();
        // pop from the back hands out low indices first
        let free = (0..capacity).rev().collect();
        Self {
            slots,
            free,
            capacity,
        }
    }

    /// Take a free slot and fill it.
    pub fn acquire(
        &mut self,
        channel: u16,
        body: impl Into<Performative>,
        payload: Option<Bytes>,
    ) -> FrameHandle {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(OutgoingFrame::default());
                self.slots.len() - 1
            }
        };
        let slot = &mut self.slots[index];
        slot.channel = Some(channel);
        slot.body = Some(body.into());
        slot.set_payload(payload);
        FrameHandle(index)
    }

    pub fn get(&self, handle: &FrameHandle) -> &OutgoingFrame {
        &self.slots[handle.0]
    }

    pub fn get_mut(&mut self, handle: &FrameHandle) -> &mut OutgoingFrame {
        &mut self.slots[handle.0]
    }

    /// Reset the slot and return it to the free list.
    pub fn release(&mut self, handle: FrameHandle) {
        self.slots[handle.0].reset();
        self.free.push(handle.0);
    }

    /// Configured number of pre-allocated slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently handed out.
    pub fn in_use(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Total slots in the arena, including grown ones.
    pub fn allocated(&self) -> usize {
        self.slots.len()
    }
}

impl Default for FramePool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use amqprims_codec::{Begin, Performative, Transfer};

    use super::*;
    use crate::error::FrameError;

    #[test]
    fn test_release_clears_slot() {
        let mut pool = FramePool::new(2);
        let handle = pool.acquire(5, Begin::default(), Some(Bytes::from_static(b"x")));
        pool.get_mut(&handle)
            .set_payload_too_large_handler(Box::new(|_| Ok(())));
        let index = handle.index();

        pool.release(handle);

        let slot = &pool.slots[index];
        assert_eq!(slot.channel(), None);
        assert!(slot.body().is_none());
        assert!(!slot.has_payload());
        assert!(!slot.has_custom_payload_handler());
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_reacquired_slot_has_no_residual_state() {
        let mut pool = FramePool::new(1);
        let first = pool.acquire(1, Transfer::default(), Some(Bytes::from_static(b"abc")));
        pool.get_mut(&first)
            .set_payload_too_large_handler(Box::new(|_| {
                Err(FrameError::MalformedFrame("custom".into()))
            }));
        pool.release(first);

        let second = pool.acquire(9, Begin::default(), None);
        let frame = pool.get(&second);
        assert_eq!(frame.channel(), Some(9));
        assert!(matches!(frame.body(), Some(Performative::Begin(_))));
        assert!(frame.payload().is_none());
        assert!(!frame.has_custom_payload_handler());
        assert_eq!(second.index(), 0);
    }

    #[test]
    fn test_pool_grows_when_exhausted() {
        let mut pool = FramePool::new(1);
        let a = pool.acquire(0, Begin::default(), None);
        let b = pool.acquire(0, Begin::default(), None);
        assert_ne!(a.index(), b.index());
        assert_eq!(pool.allocated(), 2);
        assert_eq!(pool.in_use(), 2);

        pool.release(a);
        pool.release(b);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.capacity(), 1);
    }

    #[test]
    fn test_empty_payload_is_absent() {
        let mut pool = FramePool::default();
        let handle = pool.acquire(0, Transfer::default(), Some(Bytes::new()));
        assert!(!pool.get(&handle).has_payload());
    }
}
