//! Application-visible events and the ids they refer to.

use std::fmt;

use amqprims_codec::{ErrorCondition, SaslCode};

/// A session, named by its local channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub(crate) u16);

impl SessionId {
    pub fn channel(self) -> u16 {
        self.0
    }

    pub(crate) fn link(self, handle: u32) -> LinkId {
        LinkId {
            channel: self.0,
            handle,
        }
    }
}

/// A link, named by its session and local handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId {
    pub(crate) channel: u16,
    pub(crate) handle: u32,
}

impl LinkId {
    pub fn session(self) -> SessionId {
        SessionId(self.channel)
    }

    pub fn handle(self) -> u32 {
        self.handle
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel, self.handle)
    }
}

/// A delivery on a link. Keys are never reused within a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryKey {
    pub(crate) link: LinkId,
    pub(crate) key: u64,
}

impl DeliveryKey {
    pub fn link(self) -> LinkId {
        self.link
    }
}

/// Something the peer did that the application may react to.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    ConnectionRemotelyOpened,
    ConnectionRemotelyClosed {
        error: Option<ErrorCondition>,
    },
    /// The peer began a session, either answering ours or starting a new one.
    SessionRemotelyBegun(SessionId),
    SessionRemotelyEnded {
        session: SessionId,
        error: Option<ErrorCondition>,
    },
    /// The peer attached a link, either answering ours or starting a new one.
    LinkRemotelyAttached(LinkId),
    LinkRemotelyDetached {
        link: LinkId,
        closed: bool,
        error: Option<ErrorCondition>,
    },
    /// The link was detached locally because its session ended with an error.
    LinkForceDetached(LinkId),
    /// Credit or drain state changed.
    LinkCreditUpdated(LinkId),
    /// Transfer payload arrived for an incoming delivery.
    DeliveryRead(DeliveryKey),
    /// The peer updated the state or settlement of a delivery.
    DeliveryUpdated(DeliveryKey),
    DeliveryAborted(DeliveryKey),
    SaslCompleted(SaslCode),
}
