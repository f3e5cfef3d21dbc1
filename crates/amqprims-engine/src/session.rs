//! Sessions: link bookkeeping, transfer sequencing and flow frames.
//!
//! A session owns its links and the session window. Inbound frames are
//! routed here by the connection after channel mapping; a violation by the
//! peer comes back as the error condition the session ended with.
//!
//! Outgoing transfers are cut to the peer's max-frame-size here rather than
//! in the frame writer, so every frame is charged against the outgoing
//! window. Deliveries that run out of window wait in `blocked` until a Flow
//! from the peer reopens it.

use std::collections::{BTreeMap, HashMap};

use amqprims_codec::{
    conditions, Attach, Begin, DeliveryState, Detach, Disposition, End, ErrorCondition, Flow,
    Performative, Role, Transfer,
};
use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::config::EngineConfiguration;
use crate::delivery::DeliveryIdState;
use crate::engine::{Engine, Outbound};
use crate::error::{EngineError, Result};
use crate::events::{DeliveryKey, EngineEvent, LinkId, SessionId};
use crate::flow::SessionWindow;
use crate::link::{Link, ReceiverMut, SenderMut};

type Violation = std::result::Result<(), ErrorCondition>;

/// Local or remote half of an endpoint's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndpointState {
    /// Not yet opened.
    #[default]
    Idle,
    Active,
    Closed,
}

impl EndpointState {
    pub(crate) fn from_flags(opened: bool, closed: bool) -> Self {
        match (opened, closed) {
            (_, true) => EndpointState::Closed,
            (true, false) => EndpointState::Active,
            (false, false) => EndpointState::Idle,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) channel: u16,
    pub(crate) remote_channel: Option<u16>,
    pub(crate) window: SessionWindow,
    pub(crate) handle_max: u32,
    pub(crate) remote_begin: Option<Begin>,
    pub(crate) begin_sent: bool,
    pub(crate) end_sent: bool,
    pub(crate) end_received: bool,
    pub(crate) local_error: Option<ErrorCondition>,
    pub(crate) remote_error: Option<ErrorCondition>,
    pub(crate) links: BTreeMap<u32, Link>,
    /// Remote handle to local handle.
    remote_handles: HashMap<u32, u32>,
    next_delivery_id: u32,
    /// Deliveries waiting for outgoing window, oldest first.
    blocked: Vec<(u32, u64)>,
}

impl Session {
    pub(crate) fn new(channel: u16, config: &EngineConfiguration) -> Self {
        Self {
            channel,
            remote_channel: None,
            window: SessionWindow::new(
                config.initial_outgoing_id,
                config.session_incoming_window,
                config.session_outgoing_window,
            ),
            handle_max: config.handle_max,
            remote_begin: None,
            begin_sent: false,
            end_sent: false,
            end_received: false,
            local_error: None,
            remote_error: None,
            links: BTreeMap::new(),
            remote_handles: HashMap::new(),
            next_delivery_id: 0,
            blocked: Vec::new(),
        }
    }

    pub(crate) fn local_state(&self) -> EndpointState {
        EndpointState::from_flags(self.begin_sent, self.end_sent)
    }

    pub(crate) fn remote_state(&self) -> EndpointState {
        EndpointState::from_flags(self.remote_begin.is_some(), self.end_received)
    }

    pub(crate) fn is_fully_ended(&self) -> bool {
        self.end_sent && self.end_received
    }

    fn id(&self) -> SessionId {
        SessionId(self.channel)
    }

    fn link_id(&self, handle: u32) -> LinkId {
        LinkId {
            channel: self.channel,
            handle,
        }
    }

    pub(crate) fn link_mut(&mut self, handle: u32) -> Result<&mut Link> {
        let channel = self.channel;
        self.links
            .get_mut(&handle)
            .ok_or(EngineError::UnknownLink { channel, handle })
    }

    fn check_open(&self) -> Result<()> {
        if !self.begin_sent {
            return Err(EngineError::state(format!(
                "session on channel {} has not begun",
                self.channel
            )));
        }
        if self.end_sent {
            return Err(EngineError::state(format!(
                "session on channel {} has ended",
                self.channel
            )));
        }
        Ok(())
    }

    /// Lowest handle not in use, bounded by both sides' handle-max.
    fn allocate_handle(&self) -> Option<u32> {
        let max = self
            .remote_begin
            .as_ref()
            .map_or(self.handle_max, |begin| begin.handle_max().min(self.handle_max));
        let mut candidate = 0u32;
        for handle in self.links.keys() {
            if *handle != candidate {
                break;
            }
            candidate = candidate.checked_add(1)?;
        }
        (candidate <= max).then_some(candidate)
    }

    pub(crate) fn begin(&mut self, io: &mut Outbound) -> Result<()> {
        if self.begin_sent {
            return Err(EngineError::state(format!(
                "session on channel {} has already begun",
                self.channel
            )));
        }
        let mut begin = Begin {
            remote_channel: self.remote_channel,
            handle_max: Some(self.handle_max),
            ..Begin::default()
        };
        self.window.fill_begin(&mut begin);
        io.frame(self.channel, begin, None);
        self.begin_sent = true;
        debug!(channel = self.channel, remote_channel = ?self.remote_channel, "session begun");
        Ok(())
    }

    /// End the session. Without an error every attached link is detached on
    /// the wire first; with one the links are force-detached locally.
    pub(crate) fn end(&mut self, error: Option<ErrorCondition>, io: &mut Outbound) -> Result<()> {
        self.check_open()?;
        match error {
            Some(error) => self.end_with_error(error, io),
            None => {
                let channel = self.channel;
                let end_received = self.end_received;
                for link in self.links.values_mut() {
                    if link.detach_sent {
                        continue;
                    }
                    if link.attach_sent && !end_received {
                        link.detach(channel, true, None, io)?;
                    } else {
                        link.force_detach();
                    }
                }
                self.send_end(None, io);
            }
        }
        Ok(())
    }

    /// Force-detach every link and send End carrying `error`.
    pub(crate) fn end_with_error(&mut self, error: ErrorCondition, io: &mut Outbound) {
        if self.end_sent {
            return;
        }
        warn!(channel = self.channel, %error, "ending session with error");
        self.force_detach_links(io);
        self.send_end(Some(error), io);
    }

    fn send_end(&mut self, error: Option<ErrorCondition>, io: &mut Outbound) {
        io.frame(self.channel, End { error: error.clone() }, None);
        self.end_sent = true;
        self.local_error = error;
        self.blocked.clear();
        debug!(channel = self.channel, "session ended");
    }

    fn force_detach_links(&mut self, io: &mut Outbound) {
        let channel = self.channel;
        for (handle, link) in &mut self.links {
            if !link.is_fully_detached() {
                link.force_detach();
                io.event(EngineEvent::LinkForceDetached(LinkId {
                    channel,
                    handle: *handle,
                }));
            }
        }
        self.links.clear();
        self.remote_handles.clear();
        self.blocked.clear();
    }

    pub(crate) fn on_remote_begin(&mut self, begin: Begin, remote_channel: u16) {
        self.remote_channel = Some(remote_channel);
        self.window.on_remote_begin(&begin);
        self.remote_begin = Some(begin);
    }

    pub(crate) fn new_link(&mut self, name: String, role: Role) -> Result<u32> {
        if self.end_sent {
            return Err(EngineError::state(format!(
                "session on channel {} has ended",
                self.channel
            )));
        }
        let taken = self
            .links
            .values()
            .any(|link| link.name == name && link.role == role && !link.detach_sent);
        if taken {
            return Err(EngineError::state(format!(
                "a {role:?} link named '{name}' already exists"
            )));
        }
        let handle = self
            .allocate_handle()
            .ok_or_else(|| EngineError::state("no free link handle below handle-max"))?;
        self.links.insert(handle, Link::new(name, role, handle));
        Ok(handle)
    }

    /// Route a frame received on this session's channel.
    pub(crate) fn on_frame(
        &mut self,
        body: Performative,
        payload: Option<Bytes>,
        io: &mut Outbound,
    ) -> Violation {
        if self.end_sent && !matches!(body, Performative::End(_)) {
            trace!(channel = self.channel, performative = body.name(), "frame after end ignored");
            return Ok(());
        }
        match body {
            Performative::Attach(attach) => self.on_attach(attach, io),
            Performative::Flow(flow) => self.on_flow(flow, io),
            Performative::Transfer(transfer) => self.on_transfer(transfer, payload, io),
            Performative::Disposition(disposition) => {
                self.on_disposition(disposition, io);
                Ok(())
            }
            Performative::Detach(detach) => self.on_detach(detach, io),
            Performative::End(end) => {
                self.on_end(end, io);
                Ok(())
            }
            other => Err(ErrorCondition::new(
                conditions::ILLEGAL_STATE,
                Some(format!("{other} is not valid on a session channel")),
            )),
        }
    }

    fn local_handle(&self, remote: u32) -> std::result::Result<u32, ErrorCondition> {
        self.remote_handles.get(&remote).copied().ok_or_else(|| {
            ErrorCondition::new(
                conditions::UNATTACHED_HANDLE,
                Some(format!("handle {remote} is not attached")),
            )
        })
    }

    fn on_attach(&mut self, attach: Attach, io: &mut Outbound) -> Violation {
        if self.remote_handles.contains_key(&attach.handle) {
            return Err(ErrorCondition::new(
                conditions::HANDLE_IN_USE,
                Some(format!("handle {} is already attached", attach.handle)),
            ));
        }
        if attach.handle > self.handle_max {
            return Err(ErrorCondition::new(
                conditions::NOT_ALLOWED,
                Some(format!(
                    "handle {} exceeds handle-max {}",
                    attach.handle, self.handle_max
                )),
            ));
        }

        let remote_handle = attach.handle;
        let expected_role = attach.role.opposite();
        let existing = self.links.values().find(|link| {
            link.name == attach.name
                && link.role == expected_role
                && link.remote_handle.is_none()
                && !link.detach_sent
        });
        let handle = match existing.map(|link| link.handle) {
            Some(handle) => {
                if let Some(link) = self.links.get_mut(&handle) {
                    link.on_remote_attach(attach);
                }
                handle
            }
            None => {
                let Some(handle) = self.allocate_handle() else {
                    return Err(ErrorCondition::new(
                        conditions::RESOURCE_LIMIT_EXCEEDED,
                        Some("no free link handle".to_string()),
                    ));
                };
                self.links.insert(handle, Link::remote(attach, handle));
                handle
            }
        };
        self.remote_handles.insert(remote_handle, handle);
        debug!(channel = self.channel, handle, remote_handle, "link remotely attached");
        io.event(EngineEvent::LinkRemotelyAttached(self.link_id(handle)));
        Ok(())
    }

    fn on_detach(&mut self, detach: Detach, io: &mut Outbound) -> Violation {
        let handle = self.local_handle(detach.handle)?;
        self.remote_handles.remove(&detach.handle);
        let channel = self.channel;
        if let Some(link) = self.links.get_mut(&handle) {
            link.on_remote_detach(detach, channel, io);
            if link.is_fully_detached() {
                self.remove_link(handle);
            }
        }
        Ok(())
    }

    fn remove_link(&mut self, handle: u32) {
        self.links.remove(&handle);
        self.blocked.retain(|(h, _)| *h != handle);
        trace!(channel = self.channel, handle, "link removed");
    }

    fn on_end(&mut self, end: End, io: &mut Outbound) {
        self.end_received = true;
        self.remote_error = end.error.clone();
        if end.error.is_some() {
            self.force_detach_links(io);
        } else {
            // handles die with the session
            for link in self.links.values_mut() {
                link.detach_received = true;
            }
            self.remote_handles.clear();
        }
        io.event(EngineEvent::SessionRemotelyEnded {
            session: self.id(),
            error: end.error,
        });
    }

    fn on_flow(&mut self, flow: Flow, io: &mut Outbound) -> Violation {
        self.window.on_remote_flow(&flow);
        let mut reply = None;
        match flow.handle {
            Some(remote) => {
                let handle = self.local_handle(remote)?;
                if let Some(link) = self.links.get_mut(&handle) {
                    let credit = flow.link_credit.unwrap_or(0);
                    match link.role {
                        Role::Sender => {
                            link.credit
                                .on_receiver_flow(flow.delivery_count, credit, flow.drain)
                        }
                        Role::Receiver => {
                            let count = flow.delivery_count.unwrap_or(link.credit.delivery_count());
                            link.credit.on_sender_flow(count, credit);
                        }
                    }
                    trace!(
                        channel = self.channel,
                        handle,
                        credit = link.credit.credit(),
                        drain = link.credit.drain(),
                        "link credit updated"
                    );
                    io.event(EngineEvent::LinkCreditUpdated(LinkId {
                        channel: self.channel,
                        handle,
                    }));
                    if flow.echo {
                        reply = Some(handle);
                    }
                }
            }
            None if flow.echo => {
                let session_flow = self.window.next_flow(self.remote_begin.is_some());
                io.frame(self.channel, session_flow, None);
            }
            None => {}
        }
        if let Some(handle) = reply {
            self.link_flow(handle, false, io)
                .map_err(|err| ErrorCondition::new(conditions::INTERNAL_ERROR, Some(err.to_string())))?;
        }
        self.pump_blocked(io);
        Ok(())
    }

    fn on_transfer(
        &mut self,
        transfer: Transfer,
        payload: Option<Bytes>,
        io: &mut Outbound,
    ) -> Violation {
        let handle = self.local_handle(transfer.handle)?;
        if !self.window.try_receive_transfer() {
            return Err(ErrorCondition::new(
                conditions::WINDOW_VIOLATION,
                Some("transfer received with incoming window exhausted".to_string()),
            ));
        }
        let channel = self.channel;
        let Some(link) = self.links.get_mut(&handle) else {
            return Ok(());
        };
        if link.role != Role::Receiver {
            return Err(ErrorCondition::new(
                conditions::NOT_ALLOWED,
                Some(format!("transfer received on sending link {handle}")),
            ));
        }
        if link.detach_sent {
            return Ok(());
        }
        if let Err(error) = link.on_transfer(channel, transfer, payload, io) {
            warn!(channel, handle, %error, "detaching link after invalid transfer");
            link.detach(channel, true, Some(error), io)
                .map_err(|err| ErrorCondition::new(conditions::INTERNAL_ERROR, Some(err.to_string())))?;
        }
        Ok(())
    }

    fn on_disposition(&mut self, disposition: Disposition, io: &mut Outbound) {
        // a receiver's disposition updates what we sent and vice versa
        let ours = disposition.role.opposite();
        let channel = self.channel;
        for (handle, link) in &mut self.links {
            if link.role != ours {
                continue;
            }
            let link_id = LinkId {
                channel,
                handle: *handle,
            };
            match ours {
                Role::Sender => {
                    for (key, delivery) in &mut link.outgoing {
                        let DeliveryIdState::Active(id) = delivery.id else {
                            continue;
                        };
                        if disposition.covers(id) {
                            if disposition.state.is_some() {
                                delivery.remote_state = disposition.state.clone();
                            }
                            delivery.remotely_settled |= disposition.settled;
                            io.event(EngineEvent::DeliveryUpdated(DeliveryKey {
                                link: link_id,
                                key: *key,
                            }));
                        }
                    }
                }
                Role::Receiver => {
                    for (key, delivery) in &mut link.incoming {
                        if disposition.covers(delivery.id) {
                            if disposition.state.is_some() {
                                delivery.remote_state = disposition.state.clone();
                            }
                            delivery.remotely_settled |= disposition.settled;
                            io.event(EngineEvent::DeliveryUpdated(DeliveryKey {
                                link: link_id,
                                key: *key,
                            }));
                        }
                    }
                }
            }
        }
    }

    pub(crate) fn attach(&mut self, handle: u32, io: &mut Outbound) -> Result<()> {
        self.check_open()?;
        let channel = self.channel;
        let link = self.link_mut(handle)?;
        link.attach(channel, io)?;
        if link.role == Role::Receiver && link.credit.credit() > 0 {
            self.link_flow(handle, false, io)?;
        }
        Ok(())
    }

    pub(crate) fn detach(
        &mut self,
        handle: u32,
        closed: bool,
        error: Option<ErrorCondition>,
        io: &mut Outbound,
    ) -> Result<()> {
        self.check_open()?;
        let channel = self.channel;
        let link = self.link_mut(handle)?;
        link.detach(channel, closed, error, io)?;
        if link.is_fully_detached() {
            self.remove_link(handle);
        } else {
            self.blocked.retain(|(h, _)| *h != handle);
        }
        Ok(())
    }

    fn check_sender(&mut self, handle: u32) -> Result<&mut Link> {
        let link = self.link_mut(handle)?;
        if link.role != Role::Sender {
            return Err(EngineError::state("operation requires a sending link"));
        }
        if !link.attach_sent || link.detach_sent {
            return Err(EngineError::state(format!("link '{}' is not attached", link.name)));
        }
        Ok(link)
    }

    fn check_receiver(&mut self, handle: u32) -> Result<&mut Link> {
        let link = self.link_mut(handle)?;
        if link.role != Role::Receiver {
            return Err(EngineError::state("operation requires a receiving link"));
        }
        if link.detach_sent {
            return Err(EngineError::state(format!("link '{}' is detached", link.name)));
        }
        Ok(link)
    }

    /// Accept bytes for an outgoing delivery and send what the windows allow.
    pub(crate) fn send(
        &mut self,
        handle: u32,
        key: u64,
        bytes: Bytes,
        complete: bool,
        io: &mut Outbound,
    ) -> Result<()> {
        self.check_open()?;
        let window_open = self.window.outgoing_window() > 0;
        let link = self.check_sender(handle)?;
        let current = link.current_outgoing;
        let credit = link.credit.credit();
        let delivery = link
            .outgoing
            .get_mut(&key)
            .ok_or(EngineError::UnknownDelivery)?;
        if delivery.aborted {
            return Err(EngineError::state("delivery was aborted"));
        }
        if delivery.complete {
            return Err(EngineError::state("delivery is already complete"));
        }
        if delivery.id == DeliveryIdState::Inactive {
            if current.is_some_and(|other| other != key) {
                return Err(EngineError::state(
                    "another delivery on this link is still being sent",
                ));
            }
            if bytes.is_empty() && !complete {
                return Ok(());
            }
            if credit == 0 {
                return Err(EngineError::state("sender has no link credit"));
            }
            if !window_open {
                return Err(EngineError::state("session outgoing window is exhausted"));
            }
        }
        delivery.pending.extend_from_slice(&bytes);
        delivery.complete = complete;
        self.pump(handle, key, io);
        Ok(())
    }

    /// Emit transfer frames for a delivery until it is drained or the
    /// outgoing window closes. Returns false when blocked.
    fn pump(&mut self, handle: u32, key: u64, io: &mut Outbound) -> bool {
        let channel = self.channel;
        let Some(link) = self.links.get_mut(&handle) else {
            return true;
        };
        loop {
            let Some(delivery) = link.outgoing.get_mut(&key) else {
                return true;
            };
            if !delivery.has_unsent() {
                return true;
            }
            let first = delivery.id == DeliveryIdState::Inactive;
            if (first && link.credit.credit() == 0) || !self.window.try_send_transfer() {
                if !self.blocked.contains(&(handle, key)) {
                    self.blocked.push((handle, key));
                }
                return false;
            }

            let mut transfer = Transfer {
                handle,
                more: true,
                settled: delivery.locally_settled.then_some(true),
                ..Transfer::default()
            };
            if first {
                link.credit.try_consume();
                let id = self.next_delivery_id;
                self.next_delivery_id = id.wrapping_add(1);
                delivery.id = DeliveryIdState::Active(id);
                link.current_outgoing = Some(key);
                transfer.delivery_id = Some(id);
                transfer.delivery_tag = Some(delivery.tag.clone());
                transfer.message_format = Some(delivery.message_format);
                transfer.state = delivery.local_state.clone();
            }

            let capacity = io.transfer_capacity(&transfer);
            let take = match capacity {
                0 => delivery.pending.len(),
                capacity => capacity.min(delivery.pending.len()),
            };
            let chunk = delivery.pending.split_to(take).freeze();
            let last = delivery.complete && delivery.pending.is_empty();
            transfer.more = !last;
            if last {
                delivery.final_sent = true;
                link.current_outgoing = None;
            }
            trace!(
                channel,
                handle,
                delivery_id = ?delivery.id.id(),
                bytes = chunk.len(),
                more = transfer.more,
                "transfer"
            );
            let done = last && delivery.locally_settled;
            io.frame(channel, transfer, (!chunk.is_empty()).then_some(chunk));
            if done {
                link.outgoing.remove(&key);
                return true;
            }
        }
    }

    /// Retry blocked deliveries in order until one blocks again.
    pub(crate) fn pump_blocked(&mut self, io: &mut Outbound) {
        let blocked = std::mem::take(&mut self.blocked);
        let mut pending = blocked.into_iter();
        while let Some((handle, key)) = pending.next() {
            if !self.pump(handle, key, io) {
                self.blocked.extend(pending);
                return;
            }
        }
    }

    /// Abort a delivery that has sent at least one transfer. Returns whether
    /// anything was aborted.
    pub(crate) fn abort(&mut self, handle: u32, key: u64, io: &mut Outbound) -> Result<bool> {
        self.check_open()?;
        let channel = self.channel;
        let link = self
            .links
            .get_mut(&handle)
            .ok_or(EngineError::UnknownLink { channel, handle })?;
        if link.role != Role::Sender || link.detach_sent {
            return Err(EngineError::state("abort requires an attached sending link"));
        }
        let delivery = link
            .outgoing
            .get_mut(&key)
            .ok_or(EngineError::UnknownDelivery)?;
        if !matches!(delivery.id, DeliveryIdState::Active(_)) || delivery.final_sent {
            return Ok(false);
        }
        if !self.window.try_send_transfer() {
            return Err(EngineError::state("session outgoing window is exhausted"));
        }
        delivery.aborted = true;
        delivery.id = DeliveryIdState::Aborted;
        delivery.pending.clear();
        if link.current_outgoing == Some(key) {
            link.current_outgoing = None;
        }
        link.outgoing.remove(&key);
        io.frame(
            channel,
            Transfer {
                handle,
                aborted: true,
                settled: Some(true),
                ..Transfer::default()
            },
            None,
        );
        self.blocked.retain(|entry| *entry != (handle, key));
        debug!(channel, handle, "delivery aborted");
        Ok(true)
    }

    pub(crate) fn outgoing_disposition(
        &mut self,
        handle: u32,
        key: u64,
        state: Option<DeliveryState>,
        settle: bool,
        io: &mut Outbound,
    ) -> Result<()> {
        self.check_open()?;
        let channel = self.channel;
        let link = self.link_mut(handle)?;
        let delivery = link
            .outgoing
            .get_mut(&key)
            .ok_or(EngineError::UnknownDelivery)?;
        if delivery.locally_settled {
            return Err(EngineError::state("delivery is already settled"));
        }
        delivery.local_state = state;
        delivery.locally_settled = settle;
        // before the first transfer the update rides on that transfer
        if let DeliveryIdState::Active(id) = delivery.id {
            io.frame(
                channel,
                Disposition {
                    role: Role::Sender,
                    first: id,
                    settled: settle,
                    state: delivery.local_state.clone(),
                    ..Disposition::default()
                },
                None,
            );
        }
        if delivery.locally_settled && delivery.final_sent {
            link.outgoing.remove(&key);
        }
        Ok(())
    }

    pub(crate) fn incoming_disposition(
        &mut self,
        handle: u32,
        key: u64,
        state: Option<DeliveryState>,
        settle: bool,
        io: &mut Outbound,
    ) -> Result<()> {
        self.check_open()?;
        let channel = self.channel;
        let link = self.link_mut(handle)?;
        let delivery = link
            .incoming
            .get_mut(&key)
            .ok_or(EngineError::UnknownDelivery)?;
        if delivery.locally_settled {
            return Err(EngineError::state("delivery is already settled"));
        }
        delivery.local_state = state;
        delivery.locally_settled = settle;
        io.frame(
            channel,
            Disposition {
                role: Role::Receiver,
                first: delivery.id,
                settled: settle,
                state: delivery.local_state.clone(),
                ..Disposition::default()
            },
            None,
        );
        if settle {
            link.incoming.remove(&key);
        }
        Ok(())
    }

    pub(crate) fn grant_credit(&mut self, handle: u32, credit: u32, io: &mut Outbound) -> Result<()> {
        if self.end_sent {
            return Err(EngineError::state("session has ended"));
        }
        let link = self.check_receiver(handle)?;
        link.credit.grant(credit);
        if link.attach_sent {
            self.link_flow(handle, false, io)?;
        }
        Ok(())
    }

    pub(crate) fn request_drain(&mut self, handle: u32, io: &mut Outbound) -> Result<()> {
        self.check_open()?;
        let link = self.check_receiver(handle)?;
        if !link.attach_sent {
            return Err(EngineError::state("drain requires an attached link"));
        }
        link.credit.request_drain();
        self.link_flow(handle, false, io)
    }

    /// Consume remaining credit after a drain request and tell the receiver.
    pub(crate) fn drained(&mut self, handle: u32, io: &mut Outbound) -> Result<()> {
        self.check_open()?;
        let link = self.check_sender(handle)?;
        if !link.credit.drain() {
            return Ok(());
        }
        link.credit.drained();
        self.link_flow(handle, true, io)
    }

    /// Send a Flow for one link; `drain` forces the drain flag on.
    fn link_flow(&mut self, handle: u32, drain: bool, io: &mut Outbound) -> Result<()> {
        let channel = self.channel;
        let link = self
            .links
            .get(&handle)
            .ok_or(EngineError::UnknownLink { channel, handle })?;
        let mut flow = self.window.next_flow(self.remote_begin.is_some());
        flow.handle = Some(handle);
        flow.link_credit = Some(link.credit.credit());
        flow.drain = drain || link.credit.drain();
        flow.delivery_count = (link.role == Role::Sender || link.remote_attach.is_some())
            .then_some(link.credit.delivery_count());
        trace!(channel, handle, credit = link.credit.credit(), drain = flow.drain, "link flow");
        io.frame(channel, flow, None);
        Ok(())
    }

    /// Send a session-level Flow, replenishing the incoming window.
    pub(crate) fn session_flow(&mut self, io: &mut Outbound) -> Result<()> {
        self.check_open()?;
        let flow = self.window.next_flow(self.remote_begin.is_some());
        io.frame(self.channel, flow, None);
        Ok(())
    }
}

/// Application handle to one session.
pub struct SessionMut<'a> {
    engine: &'a mut Engine,
    id: SessionId,
}

impl<'a> SessionMut<'a> {
    pub(crate) fn new(engine: &'a mut Engine, id: SessionId) -> Self {
        Self { engine, id }
    }

    fn session(&self) -> Option<&Session> {
        self.engine.core.connection.sessions.get(&self.id.0)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn local_state(&self) -> EndpointState {
        self.session().map_or(EndpointState::Closed, Session::local_state)
    }

    pub fn remote_state(&self) -> EndpointState {
        self.session().map_or(EndpointState::Closed, Session::remote_state)
    }

    /// The peer's Begin, once received.
    pub fn remote_begin(&self) -> Option<&Begin> {
        self.session().and_then(|s| s.remote_begin.as_ref())
    }

    pub fn remote_error(&self) -> Option<&ErrorCondition> {
        self.session().and_then(|s| s.remote_error.as_ref())
    }

    pub fn next_outgoing_id(&self) -> u32 {
        self.session().map_or(0, |s| s.window.next_outgoing_id())
    }

    pub fn incoming_window(&self) -> u32 {
        self.session().map_or(0, |s| s.window.incoming_window())
    }

    pub fn outgoing_window(&self) -> u32 {
        self.session().map_or(0, |s| s.window.outgoing_window())
    }

    /// Links on this session, sending and receiving.
    pub fn links(&self) -> Vec<LinkId> {
        self.session().map_or_else(Vec::new, |s| {
            s.links.keys().map(|handle| s.link_id(*handle)).collect()
        })
    }

    /// Send Begin. Answers the peer's Begin if it arrived first.
    pub fn open(&mut self) -> Result<()> {
        self.engine.core.check_writable()?;
        if !self.engine.core.connection.open_sent {
            return Err(EngineError::state("open the connection before its sessions"));
        }
        let (session, io) = self.engine.core.session_io(self.id.0)?;
        session.begin(io)?;
        self.engine.flush()
    }

    /// Send End, detaching links first unless an error is given.
    pub fn close(&mut self, error: Option<ErrorCondition>) -> Result<()> {
        self.engine.core.check_writable()?;
        let (session, io) = self.engine.core.session_io(self.id.0)?;
        session.end(error, io)?;
        self.engine.core.connection.reap_session(self.id.0);
        self.engine.flush()
    }

    /// Send a session Flow, replenishing the incoming window.
    pub fn flow(&mut self) -> Result<()> {
        self.engine.core.check_writable()?;
        let (session, io) = self.engine.core.session_io(self.id.0)?;
        session.session_flow(io)?;
        self.engine.flush()
    }

    /// Create a sending link; call `open` on it to attach.
    pub fn sender(&mut self, name: impl Into<String>) -> Result<SenderMut<'_>> {
        let handle = self.new_link(name.into(), Role::Sender)?;
        Ok(SenderMut::new(self.engine, self.id.link(handle)))
    }

    /// Create a receiving link; call `open` on it to attach.
    pub fn receiver(&mut self, name: impl Into<String>) -> Result<ReceiverMut<'_>> {
        let handle = self.new_link(name.into(), Role::Receiver)?;
        Ok(ReceiverMut::new(self.engine, self.id.link(handle)))
    }

    fn new_link(&mut self, name: String, role: Role) -> Result<u32> {
        self.engine.core.check_writable()?;
        let (session, _) = self.engine.core.session_io(self.id.0)?;
        session.new_link(name, role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_state_from_flags() {
        assert_eq!(EndpointState::from_flags(false, false), EndpointState::Idle);
        assert_eq!(EndpointState::from_flags(true, false), EndpointState::Active);
        assert_eq!(EndpointState::from_flags(true, true), EndpointState::Closed);
    }

    #[test]
    fn test_handles_allocated_lowest_first() {
        let mut session = Session::new(0, &EngineConfiguration::default());
        assert_eq!(session.new_link("a".into(), Role::Sender).unwrap(), 0);
        assert_eq!(session.new_link("b".into(), Role::Sender).unwrap(), 1);
        session.links.remove(&0);
        assert_eq!(session.new_link("c".into(), Role::Receiver).unwrap(), 0);
    }

    #[test]
    fn test_handle_max_bounds_allocation() {
        let config = EngineConfiguration {
            handle_max: 0,
            ..EngineConfiguration::default()
        };
        let mut session = Session::new(0, &config);
        session.new_link("a".into(), Role::Sender).unwrap();
        assert!(matches!(
            session.new_link("b".into(), Role::Sender),
            Err(EngineError::State(_))
        ));
    }

    #[test]
    fn test_duplicate_link_name_rejected() {
        let mut session = Session::new(0, &EngineConfiguration::default());
        session.new_link("a".into(), Role::Sender).unwrap();
        assert!(session.new_link("a".into(), Role::Sender).is_err());
        assert!(session.new_link("a".into(), Role::Receiver).is_ok());
    }
}
