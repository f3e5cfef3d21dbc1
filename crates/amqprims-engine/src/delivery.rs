//! Deliveries and their application handles.

use amqprims_codec::DeliveryState;
use bytes::{Bytes, BytesMut};

use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::events::DeliveryKey;

/// Wire delivery-id of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryIdState {
    /// No transfer has been sent yet.
    #[default]
    Inactive,
    Active(u32),
    /// Aborted after at least one transfer; no id may be reused for it.
    Aborted,
}

impl DeliveryIdState {
    pub fn id(self) -> Option<u32> {
        match self {
            DeliveryIdState::Active(id) => Some(id),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct OutgoingDelivery {
    pub(crate) tag: Bytes,
    pub(crate) id: DeliveryIdState,
    pub(crate) message_format: u32,
    pub(crate) local_state: Option<DeliveryState>,
    pub(crate) remote_state: Option<DeliveryState>,
    pub(crate) locally_settled: bool,
    pub(crate) remotely_settled: bool,
    /// No more bytes may be appended.
    pub(crate) complete: bool,
    pub(crate) aborted: bool,
    /// The frame with `more = false` has been emitted.
    pub(crate) final_sent: bool,
    /// Accepted bytes not yet framed.
    pub(crate) pending: BytesMut,
}

impl OutgoingDelivery {
    pub(crate) fn new(tag: Bytes) -> Self {
        Self {
            tag,
            id: DeliveryIdState::Inactive,
            message_format: 0,
            local_state: None,
            remote_state: None,
            locally_settled: false,
            remotely_settled: false,
            complete: false,
            aborted: false,
            final_sent: false,
            pending: BytesMut::new(),
        }
    }

    pub(crate) fn has_unsent(&self) -> bool {
        !self.pending.is_empty() || (self.complete && !self.final_sent)
    }
}

#[derive(Debug)]
pub(crate) struct IncomingDelivery {
    pub(crate) tag: Bytes,
    pub(crate) id: u32,
    pub(crate) message_format: u32,
    pub(crate) payload: BytesMut,
    pub(crate) local_state: Option<DeliveryState>,
    pub(crate) remote_state: Option<DeliveryState>,
    pub(crate) locally_settled: bool,
    pub(crate) remotely_settled: bool,
    pub(crate) complete: bool,
}

impl IncomingDelivery {
    pub(crate) fn new(id: u32, tag: Bytes, message_format: u32) -> Self {
        Self {
            tag,
            id,
            message_format,
            payload: BytesMut::new(),
            local_state: None,
            remote_state: None,
            locally_settled: false,
            remotely_settled: false,
            complete: false,
        }
    }
}

/// Sender-side view of one delivery.
pub struct OutgoingDeliveryMut<'a> {
    engine: &'a mut Engine,
    key: DeliveryKey,
    /// Aborted through this handle; the link has already dropped it.
    aborted: bool,
}

impl<'a> OutgoingDeliveryMut<'a> {
    pub(crate) fn new(engine: &'a mut Engine, key: DeliveryKey) -> Self {
        Self {
            engine,
            key,
            aborted: false,
        }
    }

    fn delivery(&self) -> Option<&OutgoingDelivery> {
        self.engine
            .core
            .link(self.key.link)
            .and_then(|link| link.outgoing.get(&self.key.key))
    }

    pub fn key(&self) -> DeliveryKey {
        self.key
    }

    pub fn tag(&self) -> Option<Bytes> {
        self.delivery().map(|d| d.tag.clone())
    }

    pub fn id_state(&self) -> DeliveryIdState {
        if self.aborted {
            return DeliveryIdState::Aborted;
        }
        self.delivery().map_or(DeliveryIdState::Inactive, |d| d.id)
    }

    /// Delivery-id, once the first transfer went out.
    pub fn delivery_id(&self) -> Option<u32> {
        self.id_state().id()
    }

    pub fn is_complete(&self) -> bool {
        self.delivery().is_some_and(|d| d.complete)
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted || self.delivery().is_some_and(|d| d.aborted)
    }

    pub fn is_settled(&self) -> bool {
        self.delivery().is_some_and(|d| d.locally_settled)
    }

    pub fn is_remotely_settled(&self) -> bool {
        self.delivery().is_some_and(|d| d.remotely_settled)
    }

    pub fn local_state(&self) -> Option<DeliveryState> {
        self.delivery().and_then(|d| d.local_state.clone())
    }

    pub fn remote_state(&self) -> Option<DeliveryState> {
        self.delivery().and_then(|d| d.remote_state.clone())
    }

    /// Bytes accepted but still waiting for session window.
    pub fn pending_bytes(&self) -> usize {
        self.delivery().map_or(0, |d| d.pending.len())
    }

    /// Set the message format; only before the first transfer.
    pub fn set_message_format(&mut self, format: u32) -> Result<()> {
        let link = self.engine.core.link_mut(self.key.link)?;
        let delivery = link
            .outgoing
            .get_mut(&self.key.key)
            .ok_or(EngineError::UnknownDelivery)?;
        if delivery.id != DeliveryIdState::Inactive {
            return Err(EngineError::state(
                "message format cannot change after the first transfer",
            ));
        }
        delivery.message_format = format;
        Ok(())
    }

    /// Send `bytes` as the complete message body.
    pub fn write_bytes(&mut self, bytes: Bytes) -> Result<()> {
        self.stream_bytes(bytes, true)
    }

    /// Append `bytes` to the message body; `complete` marks the last chunk.
    pub fn stream_bytes(&mut self, bytes: Bytes, complete: bool) -> Result<()> {
        if self.aborted {
            return Err(EngineError::state("delivery was aborted"));
        }
        self.engine.core.check_writable()?;
        let (session, io) = self.engine.core.session_io(self.key.link.channel)?;
        session.send(self.key.link.handle, self.key.key, bytes, complete, io)?;
        self.engine.flush()
    }

    /// Abort a partly sent delivery. Does nothing before the first transfer.
    pub fn abort(&mut self) -> Result<()> {
        self.engine.core.check_writable()?;
        let (session, io) = self.engine.core.session_io(self.key.link.channel)?;
        if session.abort(self.key.link.handle, self.key.key, io)? {
            self.aborted = true;
        }
        self.engine.flush()
    }

    /// Update the local state and optionally settle. Before the first
    /// transfer the update rides on that transfer instead of a Disposition.
    pub fn disposition(&mut self, state: Option<DeliveryState>, settle: bool) -> Result<()> {
        self.engine.core.check_writable()?;
        let (session, io) = self.engine.core.session_io(self.key.link.channel)?;
        session.outgoing_disposition(self.key.link.handle, self.key.key, state, settle, io)?;
        self.engine.flush()
    }

    /// Settle, keeping the current local state.
    pub fn settle(&mut self) -> Result<()> {
        let state = self.local_state();
        self.disposition(state, true)
    }
}

/// Receiver-side view of one delivery.
pub struct IncomingDeliveryMut<'a> {
    engine: &'a mut Engine,
    key: DeliveryKey,
}

impl<'a> IncomingDeliveryMut<'a> {
    pub(crate) fn new(engine: &'a mut Engine, key: DeliveryKey) -> Self {
        Self { engine, key }
    }

    fn delivery(&self) -> Option<&IncomingDelivery> {
        self.engine
            .core
            .link(self.key.link)
            .and_then(|link| link.incoming.get(&self.key.key))
    }

    pub fn key(&self) -> DeliveryKey {
        self.key
    }

    pub fn tag(&self) -> Option<Bytes> {
        self.delivery().map(|d| d.tag.clone())
    }

    pub fn delivery_id(&self) -> Option<u32> {
        self.delivery().map(|d| d.id)
    }

    pub fn message_format(&self) -> u32 {
        self.delivery().map_or(0, |d| d.message_format)
    }

    /// More transfers are expected for this delivery.
    pub fn is_partial(&self) -> bool {
        self.delivery().is_some_and(|d| !d.complete)
    }

    pub fn is_settled(&self) -> bool {
        self.delivery().is_some_and(|d| d.locally_settled)
    }

    pub fn is_remotely_settled(&self) -> bool {
        self.delivery().is_some_and(|d| d.remotely_settled)
    }

    pub fn local_state(&self) -> Option<DeliveryState> {
        self.delivery().and_then(|d| d.local_state.clone())
    }

    pub fn remote_state(&self) -> Option<DeliveryState> {
        self.delivery().and_then(|d| d.remote_state.clone())
    }

    /// Payload bytes received and not yet read.
    pub fn available(&self) -> usize {
        self.delivery().map_or(0, |d| d.payload.len())
    }

    /// Take every payload byte received so far.
    pub fn read_all(&mut self) -> Result<Bytes> {
        let link = self.engine.core.link_mut(self.key.link)?;
        let delivery = link
            .incoming
            .get_mut(&self.key.key)
            .ok_or(EngineError::UnknownDelivery)?;
        Ok(delivery.payload.split().freeze())
    }

    pub fn disposition(&mut self, state: Option<DeliveryState>, settle: bool) -> Result<()> {
        self.engine.core.check_writable()?;
        let (session, io) = self.engine.core.session_io(self.key.link.channel)?;
        session.incoming_disposition(self.key.link.handle, self.key.key, state, settle, io)?;
        self.engine.flush()
    }

    pub fn settle(&mut self) -> Result<()> {
        let state = self.local_state();
        self.disposition(state, true)
    }
}
