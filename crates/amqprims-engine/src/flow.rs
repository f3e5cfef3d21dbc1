//! Session windows and link credit.
//!
//! All counters use wrapping 32-bit serial arithmetic. A budget computed from
//! a stale or inconsistent peer value is clamped to zero rather than wrapping
//! into a huge number, so neither side of a window can go negative.

use amqprims_codec::{Begin, Flow};

/// Transfer-frame windows of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionWindow {
    initial_outgoing_id: u32,
    next_outgoing_id: u32,
    /// Transfers the peer will still accept from us.
    outgoing_window: u32,
    /// Outgoing window we advertise to the peer.
    advertised_outgoing_window: u32,
    next_incoming_id: u32,
    /// Transfers we will still accept from the peer.
    incoming_window: u32,
    configured_incoming_window: u32,
    remote_outgoing_window: u32,
}

impl SessionWindow {
    pub fn new(initial_outgoing_id: u32, incoming_window: u32, outgoing_window: u32) -> Self {
        Self {
            initial_outgoing_id,
            next_outgoing_id: initial_outgoing_id,
            outgoing_window: 0,
            advertised_outgoing_window: outgoing_window,
            next_incoming_id: 0,
            incoming_window,
            configured_incoming_window: incoming_window,
            remote_outgoing_window: 0,
        }
    }

    pub fn next_outgoing_id(&self) -> u32 {
        self.next_outgoing_id
    }

    pub fn outgoing_window(&self) -> u32 {
        self.outgoing_window
    }

    pub fn next_incoming_id(&self) -> u32 {
        self.next_incoming_id
    }

    pub fn incoming_window(&self) -> u32 {
        self.incoming_window
    }

    pub fn remote_outgoing_window(&self) -> u32 {
        self.remote_outgoing_window
    }

    /// Fill the window fields of a Begin we send.
    pub fn fill_begin(&self, begin: &mut Begin) {
        begin.next_outgoing_id = self.next_outgoing_id;
        begin.incoming_window = self.incoming_window;
        begin.outgoing_window = self.advertised_outgoing_window;
    }

    /// Session-level fields of a Flow we send. Replenishes the incoming window.
    pub fn next_flow(&mut self, remote_begun: bool) -> Flow {
        self.incoming_window = self.configured_incoming_window;
        Flow {
            next_incoming_id: remote_begun.then_some(self.next_incoming_id),
            incoming_window: self.incoming_window,
            next_outgoing_id: self.next_outgoing_id,
            outgoing_window: self.advertised_outgoing_window,
            ..Flow::default()
        }
    }

    pub fn on_remote_begin(&mut self, begin: &Begin) {
        self.next_incoming_id = begin.next_outgoing_id;
        self.remote_outgoing_window = begin.outgoing_window;
        self.outgoing_window = serial_budget(
            self.initial_outgoing_id,
            begin.incoming_window,
            self.next_outgoing_id,
        );
    }

    pub fn on_remote_flow(&mut self, flow: &Flow) {
        let peer_next_incoming = flow.next_incoming_id.unwrap_or(self.initial_outgoing_id);
        self.outgoing_window =
            serial_budget(peer_next_incoming, flow.incoming_window, self.next_outgoing_id);
        self.remote_outgoing_window = flow.outgoing_window;
    }

    /// Account one outgoing transfer frame. Returns false, changing nothing,
    /// when the peer's window is exhausted.
    pub fn try_send_transfer(&mut self) -> bool {
        if self.outgoing_window == 0 {
            return false;
        }
        self.outgoing_window -= 1;
        self.next_outgoing_id = self.next_outgoing_id.wrapping_add(1);
        true
    }

    /// Account one incoming transfer frame. Returns false, changing nothing,
    /// when our window is exhausted.
    pub fn try_receive_transfer(&mut self) -> bool {
        if self.incoming_window == 0 {
            return false;
        }
        self.incoming_window -= 1;
        self.next_incoming_id = self.next_incoming_id.wrapping_add(1);
        true
    }
}

/// Credit state of one link endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkCredit {
    initial_delivery_count: u32,
    delivery_count: u32,
    link_credit: u32,
    drain: bool,
}

impl LinkCredit {
    pub fn new(initial_delivery_count: u32) -> Self {
        Self {
            initial_delivery_count,
            delivery_count: initial_delivery_count,
            link_credit: 0,
            drain: false,
        }
    }

    pub fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    pub fn credit(&self) -> u32 {
        self.link_credit
    }

    pub fn drain(&self) -> bool {
        self.drain
    }

    /// Sender side: apply the receiver's view from a Flow.
    pub fn on_receiver_flow(&mut self, delivery_count: Option<u32>, credit: u32, drain: bool) {
        let receiver_count = delivery_count.unwrap_or(self.initial_delivery_count);
        self.link_credit = serial_budget(receiver_count, credit, self.delivery_count);
        self.drain = drain;
    }

    /// Receiver side: adopt the sender's counters from a Flow.
    pub fn on_sender_flow(&mut self, delivery_count: u32, credit: u32) {
        self.delivery_count = delivery_count;
        self.link_credit = credit;
        if credit == 0 {
            self.drain = false;
        }
    }

    /// Receiver side: grant additional credit.
    pub fn grant(&mut self, credit: u32) {
        self.link_credit = self.link_credit.saturating_add(credit);
    }

    /// Receiver side: ask the sender to use or discard all credit.
    pub fn request_drain(&mut self) {
        self.drain = true;
    }

    /// Consume one unit of credit for a new delivery. Returns false, changing
    /// nothing, when no credit is left.
    pub fn try_consume(&mut self) -> bool {
        if self.link_credit == 0 {
            return false;
        }
        self.link_credit -= 1;
        self.delivery_count = self.delivery_count.wrapping_add(1);
        true
    }

    /// Sender side: advance the delivery count past all unused credit.
    pub fn drained(&mut self) {
        self.delivery_count = self.delivery_count.wrapping_add(self.link_credit);
        self.link_credit = 0;
        self.drain = false;
    }
}

/// `base + window - next` in serial arithmetic, clamped to `0..=window`.
fn serial_budget(base: u32, window: u32, next: u32) -> u32 {
    let budget = base.wrapping_add(window).wrapping_sub(next);
    if budget > window {
        0
    } else {
        budget
    }
}
