//! Connection lifecycle and channel mapping.

use std::collections::{BTreeMap, HashMap};

use amqprims_codec::{conditions, Begin, Close, ErrorCondition, Open, Performative, Symbol};
use amqprims_frame::{ProtocolFrame, ProtocolHeader, MIN_MAX_FRAME_SIZE};
use tracing::{debug, trace, warn};

use crate::config::EngineConfiguration;
use crate::engine::{Engine, Outbound};
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, SessionId};
use crate::session::{Session, SessionMut};

/// Where the connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    /// Protocol headers sent and received.
    HeaderExchanged,
    /// Open sent and received.
    Opened,
    /// Close sent or received, not both.
    Closing,
    Closed,
    Failed,
}

#[derive(Debug, Default)]
pub(crate) struct Connection {
    pub(crate) header_sent: bool,
    pub(crate) header_received: bool,
    pub(crate) open_sent: bool,
    pub(crate) remote_open: Option<Open>,
    pub(crate) close_sent: bool,
    pub(crate) close_received: bool,
    pub(crate) failed: bool,
    pub(crate) local_error: Option<ErrorCondition>,
    pub(crate) remote_error: Option<ErrorCondition>,
    pub(crate) sessions: BTreeMap<u16, Session>,
    /// Remote channel to local channel.
    remote_channels: HashMap<u16, u16>,
}

fn symbols(values: &[String]) -> Option<Vec<Symbol>> {
    (!values.is_empty()).then(|| values.iter().map(|v| Symbol::from(v.as_str())).collect())
}

impl Connection {
    pub(crate) fn state(&self) -> ConnectionState {
        if self.failed {
            ConnectionState::Failed
        } else if self.close_sent && self.close_received {
            ConnectionState::Closed
        } else if self.close_sent || self.close_received {
            ConnectionState::Closing
        } else if self.open_sent && self.remote_open.is_some() {
            ConnectionState::Opened
        } else if self.header_sent && self.header_received {
            ConnectionState::HeaderExchanged
        } else {
            ConnectionState::Idle
        }
    }

    fn send_header(&mut self, io: &mut Outbound) {
        if !self.header_sent {
            io.header(ProtocolHeader::AMQP);
            self.header_sent = true;
        }
    }

    pub(crate) fn open(&mut self, config: &EngineConfiguration, io: &mut Outbound) -> Result<()> {
        if self.open_sent {
            return Err(EngineError::state("connection is already open"));
        }
        if self.close_sent {
            return Err(EngineError::state("connection is closed"));
        }
        self.send_header(io);
        let open = Open {
            container_id: config.container_id.clone(),
            hostname: config.hostname.clone(),
            max_frame_size: Some(config.max_frame_size),
            channel_max: Some(config.channel_max),
            idle_timeout: (config.idle_timeout_ms > 0).then_some(config.idle_timeout_ms),
            offered_capabilities: symbols(&config.offered_capabilities),
            desired_capabilities: symbols(&config.desired_capabilities),
            ..Open::default()
        };
        io.frame(0, open, None);
        self.open_sent = true;
        debug!(container_id = %config.container_id, "connection opened");
        Ok(())
    }

    pub(crate) fn close(&mut self, error: Option<ErrorCondition>, io: &mut Outbound) -> Result<()> {
        if !self.open_sent {
            return Err(EngineError::state("connection was never opened"));
        }
        if self.close_sent {
            return Err(EngineError::state("connection is already closed"));
        }
        self.send_close(error, io);
        Ok(())
    }

    pub(crate) fn send_close(&mut self, error: Option<ErrorCondition>, io: &mut Outbound) {
        io.frame(0, Close { error: error.clone() }, None);
        self.close_sent = true;
        self.local_error = error;
        debug!("connection closed");
    }

    pub(crate) fn on_header(&mut self, header: ProtocolHeader, io: &mut Outbound) -> Result<()> {
        if self.header_received {
            return Err(EngineError::protocol(
                conditions::ILLEGAL_STATE,
                format!("duplicate protocol header {header}"),
            ));
        }
        self.header_received = true;
        // the peer gets our header either way so it can see what we speak
        self.send_header(io);
        if header != ProtocolHeader::AMQP {
            return Err(EngineError::protocol(
                conditions::NOT_IMPLEMENTED,
                format!("unsupported protocol header {header}"),
            ));
        }
        debug!(%header, "protocol header exchanged");
        Ok(())
    }

    pub(crate) fn on_frame(
        &mut self,
        frame: ProtocolFrame,
        config: &EngineConfiguration,
        io: &mut Outbound,
    ) -> Result<()> {
        let ProtocolFrame {
            channel,
            body,
            payload,
        } = frame;
        let Some(body) = body else {
            trace!("heartbeat");
            return Ok(());
        };
        match body {
            Performative::Open(open) => self.on_open(open, io),
            Performative::Close(close) => {
                if self.close_received {
                    return Err(EngineError::protocol(
                        conditions::ILLEGAL_STATE,
                        "duplicate Close",
                    ));
                }
                self.close_received = true;
                self.remote_error = close.error.clone();
                debug!(error = ?close.error, "connection remotely closed");
                io.event(EngineEvent::ConnectionRemotelyClosed { error: close.error });
                Ok(())
            }
            body if self.remote_open.is_none() => Err(EngineError::protocol(
                conditions::ILLEGAL_STATE,
                format!("{body} received before Open"),
            )),
            Performative::Begin(begin) => self.on_begin(channel, begin, config, io),
            body => {
                let local = *self.remote_channels.get(&channel).ok_or_else(|| {
                    EngineError::protocol(
                        conditions::NOT_FOUND,
                        format!("{body} on channel {channel} with no session"),
                    )
                })?;
                let Some(session) = self.sessions.get_mut(&local) else {
                    return Ok(());
                };
                if let Err(error) = session.on_frame(body, payload, io) {
                    session.end_with_error(error, io);
                }
                self.reap_session(local);
                Ok(())
            }
        }
    }

    fn on_open(&mut self, open: Open, io: &mut Outbound) -> Result<()> {
        if self.remote_open.is_some() {
            return Err(EngineError::protocol(
                conditions::ILLEGAL_STATE,
                "duplicate Open",
            ));
        }
        io.remote_max_frame_size = open.max_frame_size().max(MIN_MAX_FRAME_SIZE);
        debug!(
            container_id = %open.container_id,
            max_frame_size = io.remote_max_frame_size,
            idle_timeout = open.idle_timeout(),
            "connection remotely opened"
        );
        self.remote_open = Some(open);
        io.event(EngineEvent::ConnectionRemotelyOpened);
        Ok(())
    }

    fn channel_max(&self, config: &EngineConfiguration) -> u16 {
        self.remote_open
            .as_ref()
            .map_or(config.channel_max, |open| open.channel_max().min(config.channel_max))
    }

    /// Lowest channel with no session.
    fn allocate_channel(&self, config: &EngineConfiguration) -> Option<u16> {
        let max = self.channel_max(config);
        let mut candidate = 0u16;
        for channel in self.sessions.keys() {
            if *channel != candidate {
                break;
            }
            candidate = candidate.checked_add(1)?;
        }
        (candidate <= max).then_some(candidate)
    }

    fn on_begin(
        &mut self,
        channel: u16,
        begin: Begin,
        config: &EngineConfiguration,
        io: &mut Outbound,
    ) -> Result<()> {
        if self.remote_channels.contains_key(&channel) {
            return Err(EngineError::protocol(
                conditions::NOT_ALLOWED,
                format!("Begin on channel {channel}, which is already in use"),
            ));
        }
        let local = match begin.remote_channel {
            Some(local) => {
                let session = self
                    .sessions
                    .get_mut(&local)
                    .filter(|s| s.begin_sent && s.remote_begin.is_none())
                    .ok_or_else(|| {
                        EngineError::protocol(
                            conditions::NOT_FOUND,
                            format!("Begin answers channel {local}, which awaits no answer"),
                        )
                    })?;
                session.on_remote_begin(begin, channel);
                local
            }
            None => {
                let local = self.allocate_channel(config).ok_or_else(|| {
                    EngineError::protocol(
                        conditions::RESOURCE_LIMIT_EXCEEDED,
                        "no free channel for remotely begun session",
                    )
                })?;
                let mut session = Session::new(local, config);
                session.on_remote_begin(begin, channel);
                self.sessions.insert(local, session);
                local
            }
        };
        self.remote_channels.insert(channel, local);
        debug!(channel = local, remote_channel = channel, "session remotely begun");
        io.event(EngineEvent::SessionRemotelyBegun(SessionId(local)));
        Ok(())
    }

    pub(crate) fn new_session(&mut self, config: &EngineConfiguration) -> Result<u16> {
        if self.close_sent {
            return Err(EngineError::state("connection is closed"));
        }
        let channel = self
            .allocate_channel(config)
            .ok_or_else(|| EngineError::state("no free channel below channel-max"))?;
        self.sessions.insert(channel, Session::new(channel, config));
        Ok(channel)
    }

    /// Drop a session once End went both ways.
    pub(crate) fn reap_session(&mut self, channel: u16) {
        if self
            .sessions
            .get(&channel)
            .is_some_and(Session::is_fully_ended)
        {
            self.sessions.remove(&channel);
            self.remote_channels.retain(|_, local| *local != channel);
            trace!(channel, "session removed");
        }
    }

    /// Close everything locally without wire traffic.
    pub(crate) fn shutdown(&mut self) {
        self.header_sent = true;
        self.header_received = true;
        self.open_sent = true;
        self.close_sent = true;
        self.close_received = true;
        for session in self.sessions.values_mut() {
            for link in session.links.values_mut() {
                link.force_detach();
            }
            session.end_sent = true;
            session.end_received = true;
        }
        if !self.sessions.is_empty() {
            warn!(sessions = self.sessions.len(), "shutting down with open sessions");
        }
        self.sessions.clear();
        self.remote_channels.clear();
    }
}

/// Application handle to the connection.
pub struct ConnectionMut<'a> {
    engine: &'a mut Engine,
}

impl<'a> ConnectionMut<'a> {
    pub(crate) fn new(engine: &'a mut Engine) -> Self {
        Self { engine }
    }

    pub fn state(&self) -> ConnectionState {
        self.engine.core.connection.state()
    }

    /// The peer's Open, once received.
    pub fn remote_open(&self) -> Option<&Open> {
        self.engine.core.connection.remote_open.as_ref()
    }

    pub fn remote_error(&self) -> Option<&ErrorCondition> {
        self.engine.core.connection.remote_error.as_ref()
    }

    pub fn local_error(&self) -> Option<&ErrorCondition> {
        self.engine.core.connection.local_error.as_ref()
    }

    /// Sessions currently mapped, by local channel.
    pub fn sessions(&self) -> Vec<SessionId> {
        self.engine
            .core
            .connection
            .sessions
            .keys()
            .map(|channel| SessionId(*channel))
            .collect()
    }

    /// Send the protocol header if needed, then Open.
    pub fn open(&mut self) -> Result<&mut Self> {
        self.engine.core.check_writable()?;
        let core = &mut self.engine.core;
        core.connection.open(&core.config, &mut core.io)?;
        self.engine.flush()?;
        Ok(self)
    }

    pub fn close(&mut self, error: Option<ErrorCondition>) -> Result<()> {
        self.engine.core.check_writable()?;
        let core = &mut self.engine.core;
        core.connection.close(error, &mut core.io)?;
        self.engine.flush()
    }

    /// Create a session on the lowest free channel; call `open` on it to begin.
    pub fn session(&mut self) -> Result<SessionMut<'_>> {
        self.engine.core.check_writable()?;
        let core = &mut self.engine.core;
        let channel = core.connection.new_session(&core.config)?;
        Ok(SessionMut::new(self.engine, SessionId(channel)))
    }
}
