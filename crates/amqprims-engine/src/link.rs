//! Links and their application handles.

use std::collections::BTreeMap;

use amqprims_codec::{
    conditions, Attach, Detach, ErrorCondition, ReceiverSettleMode, Role, SenderSettleMode,
    Source, Target, Transfer,
};
use bytes::Bytes;
use tracing::debug;

use crate::delivery::{IncomingDelivery, IncomingDeliveryMut, OutgoingDelivery, OutgoingDeliveryMut};
use crate::engine::{Engine, Outbound};
use crate::error::{EngineError, Result};
use crate::events::{DeliveryKey, EngineEvent, LinkId};
use crate::flow::LinkCredit;
use crate::session::EndpointState;

#[derive(Debug)]
pub(crate) struct Link {
    pub(crate) name: String,
    pub(crate) role: Role,
    pub(crate) handle: u32,
    pub(crate) remote_handle: Option<u32>,
    pub(crate) source: Option<Source>,
    pub(crate) target: Option<Target>,
    pub(crate) snd_settle_mode: SenderSettleMode,
    pub(crate) rcv_settle_mode: ReceiverSettleMode,
    pub(crate) max_message_size: Option<u64>,
    pub(crate) remote_attach: Option<Attach>,
    pub(crate) attach_sent: bool,
    pub(crate) detach_sent: bool,
    pub(crate) detach_received: bool,
    pub(crate) local_error: Option<ErrorCondition>,
    pub(crate) remote_error: Option<ErrorCondition>,
    pub(crate) credit: LinkCredit,
    pub(crate) outgoing: BTreeMap<u64, OutgoingDelivery>,
    pub(crate) incoming: BTreeMap<u64, IncomingDelivery>,
    /// Outgoing delivery whose final transfer has not been sent.
    pub(crate) current_outgoing: Option<u64>,
    /// Incoming delivery still receiving transfers.
    pub(crate) current_incoming: Option<u64>,
    next_key: u64,
    next_tag: u64,
}

impl Link {
    pub(crate) fn new(name: String, role: Role, handle: u32) -> Self {
        Self {
            name,
            role,
            handle,
            remote_handle: None,
            source: None,
            target: None,
            snd_settle_mode: SenderSettleMode::default(),
            rcv_settle_mode: ReceiverSettleMode::default(),
            max_message_size: None,
            remote_attach: None,
            attach_sent: false,
            detach_sent: false,
            detach_received: false,
            local_error: None,
            remote_error: None,
            credit: LinkCredit::new(0),
            outgoing: BTreeMap::new(),
            incoming: BTreeMap::new(),
            current_outgoing: None,
            current_incoming: None,
            next_key: 0,
            next_tag: 0,
        }
    }

    /// A link started by the peer; its terminus defaults to the peer's.
    pub(crate) fn remote(attach: Attach, handle: u32) -> Self {
        let mut link = Link::new(attach.name.clone(), attach.role.opposite(), handle);
        link.source = attach.source.clone();
        link.target = attach.target.clone();
        link.on_remote_attach(attach);
        link
    }

    pub(crate) fn local_state(&self) -> EndpointState {
        EndpointState::from_flags(self.attach_sent, self.detach_sent)
    }

    pub(crate) fn remote_state(&self) -> EndpointState {
        EndpointState::from_flags(self.remote_attach.is_some(), self.detach_received)
    }

    pub(crate) fn is_fully_detached(&self) -> bool {
        self.detach_sent && self.detach_received
    }

    fn next_key(&mut self) -> u64 {
        let key = self.next_key;
        self.next_key += 1;
        key
    }

    pub(crate) fn on_remote_attach(&mut self, attach: Attach) {
        self.remote_handle = Some(attach.handle);
        if self.role == Role::Receiver {
            // keep credit granted before the peer answered
            let granted = self.credit.credit();
            self.credit = LinkCredit::new(attach.initial_delivery_count.unwrap_or(0));
            self.credit.grant(granted);
        }
        self.remote_attach = Some(attach);
    }

    pub(crate) fn attach(&mut self, channel: u16, io: &mut Outbound) -> Result<()> {
        if self.attach_sent {
            return Err(EngineError::state(format!("link '{}' is already attached", self.name)));
        }
        let attach = Attach {
            name: self.name.clone(),
            handle: self.handle,
            role: self.role,
            snd_settle_mode: Some(self.snd_settle_mode),
            rcv_settle_mode: Some(self.rcv_settle_mode),
            source: self.source.clone(),
            target: self.target.clone(),
            initial_delivery_count: (self.role == Role::Sender)
                .then_some(self.credit.delivery_count()),
            max_message_size: self.max_message_size,
            ..Attach::default()
        };
        io.frame(channel, attach, None);
        self.attach_sent = true;
        debug!(channel, handle = self.handle, name = %self.name, role = ?self.role, "link attached");
        Ok(())
    }

    pub(crate) fn detach(
        &mut self,
        channel: u16,
        closed: bool,
        error: Option<ErrorCondition>,
        io: &mut Outbound,
    ) -> Result<()> {
        if !self.attach_sent {
            return Err(EngineError::state(format!("link '{}' was never attached", self.name)));
        }
        if self.detach_sent {
            return Err(EngineError::state(format!("link '{}' is already detached", self.name)));
        }
        io.frame(
            channel,
            Detach {
                handle: self.handle,
                closed,
                error: error.clone(),
            },
            None,
        );
        self.detach_sent = true;
        self.local_error = error;
        self.current_outgoing = None;
        Ok(())
    }

    /// Mark the link detached on both sides without any wire traffic.
    pub(crate) fn force_detach(&mut self) {
        self.detach_sent = true;
        self.detach_received = true;
        self.current_outgoing = None;
        self.current_incoming = None;
    }

    pub(crate) fn on_remote_detach(&mut self, detach: Detach, channel: u16, io: &mut Outbound) {
        self.detach_received = true;
        self.remote_error = detach.error.clone();
        io.event(EngineEvent::LinkRemotelyDetached {
            link: LinkId {
                channel,
                handle: self.handle,
            },
            closed: detach.closed,
            error: detach.error,
        });
    }

    pub(crate) fn new_delivery(&mut self, tag: Option<Bytes>) -> Result<u64> {
        if self.role != Role::Sender {
            return Err(EngineError::state("only senders create deliveries"));
        }
        if self.detach_sent {
            return Err(EngineError::state(format!("link '{}' is detached", self.name)));
        }
        let tag = match tag {
            Some(tag) => {
                if self.outgoing.values().any(|d| d.tag == tag) {
                    return Err(EngineError::state(
                        "delivery tag is already in use on this link",
                    ));
                }
                tag
            }
            None => self.generate_tag(),
        };
        let key = self.next_key();
        self.outgoing.insert(key, OutgoingDelivery::new(tag));
        Ok(key)
    }

    /// Sequential big-endian tags without leading zero bytes.
    fn generate_tag(&mut self) -> Bytes {
        loop {
            let value = self.next_tag;
            self.next_tag = self.next_tag.wrapping_add(1);
            let bytes = value.to_be_bytes();
            let skip = bytes.iter().take(7).take_while(|b| **b == 0).count();
            let tag = Bytes::copy_from_slice(&bytes[skip..]);
            if !self.outgoing.values().any(|d| d.tag == tag) {
                return tag;
            }
        }
    }

    /// Accept one inbound transfer. An error detaches the link.
    pub(crate) fn on_transfer(
        &mut self,
        channel: u16,
        transfer: Transfer,
        payload: Option<Bytes>,
        io: &mut Outbound,
    ) -> std::result::Result<(), ErrorCondition> {
        let link = LinkId {
            channel,
            handle: self.handle,
        };
        let key = match self.current_incoming {
            Some(key) => key,
            None => {
                let (Some(id), Some(tag)) = (transfer.delivery_id, transfer.delivery_tag.clone())
                else {
                    return Err(ErrorCondition::new(
                        conditions::INVALID_FIELD,
                        Some("first transfer of a delivery lacks delivery-id or tag".to_string()),
                    ));
                };
                if !self.credit.try_consume() {
                    return Err(ErrorCondition::new(
                        conditions::TRANSFER_LIMIT_EXCEEDED,
                        Some("transfer received without link credit".to_string()),
                    ));
                }
                let key = self.next_key();
                self.incoming.insert(
                    key,
                    IncomingDelivery::new(id, tag, transfer.message_format.unwrap_or(0)),
                );
                self.current_incoming = Some(key);
                key
            }
        };
        if !transfer.more || transfer.aborted {
            self.current_incoming = None;
        }

        let delivery_key = DeliveryKey { link, key };
        if transfer.aborted {
            self.incoming.remove(&key);
            io.event(EngineEvent::DeliveryAborted(delivery_key));
            return Ok(());
        }
        // settled early by the application: the rest is discarded
        let Some(delivery) = self.incoming.get_mut(&key) else {
            return Ok(());
        };
        if let Some(payload) = payload {
            delivery.payload.extend_from_slice(&payload);
        }
        if transfer.settled == Some(true) {
            delivery.remotely_settled = true;
        }
        if transfer.state.is_some() {
            delivery.remote_state = transfer.state;
        }
        if !transfer.more {
            delivery.complete = true;
        }
        io.event(EngineEvent::DeliveryRead(delivery_key));
        Ok(())
    }
}

/// Sending end of a link.
pub struct SenderMut<'a> {
    engine: &'a mut Engine,
    id: LinkId,
}

/// Receiving end of a link.
pub struct ReceiverMut<'a> {
    engine: &'a mut Engine,
    id: LinkId,
}

// accessors and lifecycle calls shared by both ends
macro_rules! link_common {
    ($ty:ident) => {
        impl<'a> $ty<'a> {
            pub(crate) fn new(engine: &'a mut Engine, id: LinkId) -> Self {
                Self { engine, id }
            }

            fn link(&self) -> Option<&Link> {
                self.engine.core.link(self.id)
            }

            fn configure(&mut self, apply: impl FnOnce(&mut Link)) -> Result<&mut Self> {
                let link = self.engine.core.link_mut(self.id)?;
                if link.attach_sent {
                    return Err(EngineError::state(
                        "link settings cannot change after attach",
                    ));
                }
                apply(link);
                Ok(self)
            }

            pub fn id(&self) -> LinkId {
                self.id
            }

            pub fn name(&self) -> Option<&str> {
                self.link().map(|link| link.name.as_str())
            }

            pub fn local_state(&self) -> EndpointState {
                self.link().map_or(EndpointState::Closed, Link::local_state)
            }

            pub fn remote_state(&self) -> EndpointState {
                self.link().map_or(EndpointState::Closed, Link::remote_state)
            }

            pub fn remote_attach(&self) -> Option<&Attach> {
                self.link().and_then(|link| link.remote_attach.as_ref())
            }

            pub fn remote_error(&self) -> Option<&ErrorCondition> {
                self.link().and_then(|link| link.remote_error.as_ref())
            }

            pub fn credit(&self) -> u32 {
                self.link().map_or(0, |link| link.credit.credit())
            }

            pub fn delivery_count(&self) -> u32 {
                self.link().map_or(0, |link| link.credit.delivery_count())
            }

            pub fn set_source(&mut self, source: Source) -> Result<&mut Self> {
                self.configure(|link| link.source = Some(source))
            }

            pub fn set_target(&mut self, target: Target) -> Result<&mut Self> {
                self.configure(|link| link.target = Some(target))
            }

            pub fn set_sender_settle_mode(&mut self, mode: SenderSettleMode) -> Result<&mut Self> {
                self.configure(|link| link.snd_settle_mode = mode)
            }

            pub fn set_receiver_settle_mode(
                &mut self,
                mode: ReceiverSettleMode,
            ) -> Result<&mut Self> {
                self.configure(|link| link.rcv_settle_mode = mode)
            }

            pub fn set_max_message_size(&mut self, size: u64) -> Result<&mut Self> {
                self.configure(|link| link.max_message_size = Some(size))
            }

            /// Send Attach.
            pub fn open(&mut self) -> Result<()> {
                self.engine.core.check_writable()?;
                let (session, io) = self.engine.core.session_io(self.id.channel)?;
                session.attach(self.id.handle, io)?;
                self.engine.flush()
            }

            /// Detach with `closed = true`.
            pub fn close(&mut self, error: Option<ErrorCondition>) -> Result<()> {
                self.end_link(true, error)
            }

            /// Detach with `closed = false`, leaving the terminus in place.
            pub fn detach(&mut self, error: Option<ErrorCondition>) -> Result<()> {
                self.end_link(false, error)
            }

            fn end_link(&mut self, closed: bool, error: Option<ErrorCondition>) -> Result<()> {
                self.engine.core.check_writable()?;
                let (session, io) = self.engine.core.session_io(self.id.channel)?;
                session.detach(self.id.handle, closed, error, io)?;
                self.engine.flush()
            }
        }
    };
}

link_common!(SenderMut);
link_common!(ReceiverMut);

impl<'a> SenderMut<'a> {
    /// The receiver asked to drain: use or discard all credit.
    pub fn is_drain_requested(&self) -> bool {
        self.link().is_some_and(|link| link.credit.drain())
    }

    /// Credit and session window allow a new delivery right now.
    pub fn is_sendable(&self) -> bool {
        let Some(session) = self.engine.core.connection.sessions.get(&self.id.channel) else {
            return false;
        };
        session.links.get(&self.id.handle).is_some_and(|link| {
            link.attach_sent
                && !link.detach_sent
                && link.remote_attach.is_some()
                && link.current_outgoing.is_none()
                && link.credit.credit() > 0
        }) && session.window.outgoing_window() > 0
    }

    /// Start a delivery with a generated tag.
    pub fn next_delivery(&mut self) -> Result<OutgoingDeliveryMut<'_>> {
        self.create_delivery(None)
    }

    /// Start a delivery with an explicit tag, unique among open deliveries.
    pub fn next_delivery_with_tag(&mut self, tag: Bytes) -> Result<OutgoingDeliveryMut<'_>> {
        self.create_delivery(Some(tag))
    }

    fn create_delivery(&mut self, tag: Option<Bytes>) -> Result<OutgoingDeliveryMut<'_>> {
        self.engine.core.check_writable()?;
        let key = self.engine.core.link_mut(self.id)?.new_delivery(tag)?;
        Ok(OutgoingDeliveryMut::new(
            self.engine,
            DeliveryKey { link: self.id, key },
        ))
    }

    /// Answer a drain request by consuming the remaining credit.
    pub fn drained(&mut self) -> Result<()> {
        self.engine.core.check_writable()?;
        let (session, io) = self.engine.core.session_io(self.id.channel)?;
        session.drained(self.id.handle, io)?;
        self.engine.flush()
    }

    /// Keys of deliveries that are not yet settled locally.
    pub fn unsettled(&self) -> Vec<DeliveryKey> {
        self.link().map_or_else(Vec::new, |link| {
            link.outgoing
                .keys()
                .map(|key| DeliveryKey {
                    link: self.id,
                    key: *key,
                })
                .collect()
        })
    }
}

impl<'a> ReceiverMut<'a> {
    /// Grant `credit` more deliveries. Sent once the link is attached.
    pub fn add_credit(&mut self, credit: u32) -> Result<()> {
        self.engine.core.check_writable()?;
        let (session, io) = self.engine.core.session_io(self.id.channel)?;
        session.grant_credit(self.id.handle, credit, io)?;
        self.engine.flush()
    }

    /// Ask the sender to use or discard all outstanding credit.
    pub fn drain(&mut self) -> Result<()> {
        self.engine.core.check_writable()?;
        let (session, io) = self.engine.core.session_io(self.id.channel)?;
        session.request_drain(self.id.handle, io)?;
        self.engine.flush()
    }

    pub fn is_draining(&self) -> bool {
        self.link().is_some_and(|link| link.credit.drain())
    }

    /// Incoming delivery by key.
    pub fn delivery(&mut self, key: DeliveryKey) -> Result<IncomingDeliveryMut<'_>> {
        if key.link != self.id {
            return Err(EngineError::UnknownDelivery);
        }
        self.engine.incoming(key)
    }

    /// Keys of deliveries not yet settled locally.
    pub fn unsettled(&self) -> Vec<DeliveryKey> {
        self.link().map_or_else(Vec::new, |link| {
            link.incoming
                .keys()
                .map(|key| DeliveryKey {
                    link: self.id,
                    key: *key,
                })
                .collect()
        })
    }
}
