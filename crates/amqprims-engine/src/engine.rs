//! The engine: a pipeline plus the protocol state it drives.
//!
//! [`Engine`] is sans-I/O. Bytes from the transport go in through
//! [`Engine::ingest`]; bytes for the transport come out through the output
//! handler (or [`Engine::take_output`] when none is registered). Application
//! calls on the connection, session, link and delivery handles queue frames
//! that are pushed through the pipeline before the call returns.
//!
//! A fatal error fails the engine exactly once: a Close is sent when the
//! connection is open, the error handler runs, and the call that triggered
//! the failure returns the error. Afterwards every call is refused.

use std::collections::VecDeque;

use amqprims_codec::{DescribedType, Performative, Role, Transfer};
use amqprims_frame::{
    FramePool, ProtocolFrame, ProtocolHeader, FRAME_HEADER_SIZE, MIN_MAX_FRAME_SIZE,
};
use bytes::{Bytes, BytesMut};
use tracing::{debug, error, trace};

use crate::config::EngineConfiguration;
use crate::connection::{Connection, ConnectionMut, ConnectionState};
use crate::delivery::{IncomingDeliveryMut, OutgoingDeliveryMut};
use crate::error::{EngineError, Result};
use crate::events::{DeliveryKey, EngineEvent, LinkId, SessionId};
use crate::handlers::SaslContext;
use crate::link::{Link, ReceiverMut, SenderMut};
use crate::pipeline::{EnginePipeline, WriteEvent};
use crate::session::{Session, SessionMut};
use crate::tick::{TickDriver, TickMode, Ticker};

/// Lifecycle of the engine itself, independent of the AMQP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Created, not yet started. The pipeline and configuration may change.
    Idle,
    Started,
    /// A fatal error occurred. Terminal.
    Failed,
    /// Shut down by the application. Terminal.
    Shutdown,
}

/// Writes and events produced by the state machine, awaiting dispatch.
#[derive(Debug)]
pub(crate) struct Outbound {
    pub(crate) pool: FramePool,
    pub(crate) writes: VecDeque<WriteEvent>,
    pub(crate) events: VecDeque<EngineEvent>,
    /// Largest frame the peer accepts; 512 until its Open arrives.
    pub(crate) remote_max_frame_size: u32,
}

impl Outbound {
    fn new(pool_capacity: usize) -> Self {
        Self {
            pool: FramePool::new(pool_capacity),
            writes: VecDeque::new(),
            events: VecDeque::new(),
            remote_max_frame_size: MIN_MAX_FRAME_SIZE,
        }
    }

    pub(crate) fn header(&mut self, header: ProtocolHeader) {
        self.writes.push_back(WriteEvent::Header(header));
    }

    pub(crate) fn frame(
        &mut self,
        channel: u16,
        body: impl Into<Performative>,
        payload: Option<Bytes>,
    ) {
        let handle = self.pool.acquire(channel, body, payload);
        self.writes.push_back(WriteEvent::Frame(handle));
    }

    pub(crate) fn heartbeat(&mut self) {
        self.writes.push_back(WriteEvent::Heartbeat);
    }

    pub(crate) fn event(&mut self, event: EngineEvent) {
        self.events.push_back(event);
    }

    /// Payload bytes that fit in one frame beside `transfer`; 0 when the
    /// performative alone fills the frame.
    pub(crate) fn transfer_capacity(&self, transfer: &Transfer) -> usize {
        let mut encoded = BytesMut::new();
        transfer.encode(&mut encoded);
        (self.remote_max_frame_size as usize).saturating_sub(FRAME_HEADER_SIZE + encoded.len())
    }

    fn release(&mut self, event: WriteEvent) {
        if let WriteEvent::Frame(handle) = event {
            self.pool.release(handle);
        }
    }
}

type OutputHandler = Box<dyn FnMut(Bytes)>;
type ErrorHandler = Box<dyn FnMut(&EngineError)>;

/// Engine state visible to pipeline handlers.
pub struct EngineCore {
    pub(crate) config: EngineConfiguration,
    state: EngineState,
    pub(crate) io: Outbound,
    pub(crate) connection: Connection,
    pub(crate) sasl: SaslContext,
    failure: Option<String>,
    /// Writes queued before a failure still go out in the same dispatch.
    draining: bool,
    pending_error: Option<EngineError>,
    output_handler: Option<OutputHandler>,
    error_handler: Option<ErrorHandler>,
    output: BytesMut,
    pub(crate) ticker: Ticker,
}

impl EngineCore {
    pub(crate) fn new(config: EngineConfiguration) -> Self {
        let pool_capacity = config.frame_pool_capacity;
        Self {
            config,
            state: EngineState::Idle,
            io: Outbound::new(pool_capacity),
            connection: Connection::default(),
            sasl: SaslContext::default(),
            failure: None,
            draining: false,
            pending_error: None,
            output_handler: None,
            error_handler: None,
            output: BytesMut::new(),
            ticker: Ticker::default(),
        }
    }

    pub fn configuration(&self) -> &EngineConfiguration {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Largest frame the peer accepts.
    pub fn remote_max_frame_size(&self) -> u32 {
        self.io.remote_max_frame_size
    }

    pub fn pool(&self) -> &FramePool {
        &self.io.pool
    }

    pub fn pool_mut(&mut self) -> &mut FramePool {
        &mut self.io.pool
    }

    pub fn sasl_context(&self) -> &SaslContext {
        &self.sasl
    }

    /// Reason the engine failed, if it has.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub(crate) fn fail(&mut self, error: EngineError) {
        if matches!(self.state, EngineState::Failed | EngineState::Shutdown) {
            debug!(%error, "engine already stopped; error dropped");
            return;
        }
        error!(%error, "engine failed");
        if self.connection.open_sent && !self.connection.close_sent {
            self.connection.send_close(error.condition(), &mut self.io);
        }
        self.connection.failed = true;
        self.state = EngineState::Failed;
        self.failure = Some(error.to_string());
        self.draining = true;
        if let Some(handler) = self.error_handler.as_mut() {
            handler(&error);
        }
        self.pending_error = Some(error);
    }

    pub(crate) fn accepts_reads(&self) -> bool {
        !matches!(self.state, EngineState::Failed | EngineState::Shutdown)
    }

    pub(crate) fn accepts_writes(&self) -> bool {
        match self.state {
            EngineState::Failed => self.draining,
            EngineState::Shutdown => false,
            EngineState::Idle | EngineState::Started => true,
        }
    }

    pub(crate) fn end_dispatch(&mut self) {
        self.draining = false;
        for event in std::mem::take(&mut self.io.writes) {
            self.io.release(event);
        }
        self.reschedule();
    }

    pub(crate) fn emit_output(&mut self, bytes: Bytes) {
        self.ticker.on_output();
        trace!(bytes = bytes.len(), "output");
        match self.output_handler.as_mut() {
            Some(handler) => handler(bytes),
            None => self.output.extend_from_slice(&bytes),
        }
    }

    pub(crate) fn take_output(&mut self) -> Bytes {
        self.output.split().freeze()
    }

    pub(crate) fn check_writable(&self) -> Result<()> {
        match self.state {
            EngineState::Idle => Err(EngineError::state("engine has not been started")),
            EngineState::Started => Ok(()),
            EngineState::Failed => Err(EngineError::NotWritable(
                self.failure.clone().unwrap_or_default(),
            )),
            EngineState::Shutdown => Err(EngineError::Closed),
        }
    }

    pub(crate) fn on_header(&mut self, header: ProtocolHeader) -> Result<()> {
        self.connection.on_header(header, &mut self.io)
    }

    pub(crate) fn on_frame(&mut self, frame: ProtocolFrame) -> Result<()> {
        self.connection.on_frame(frame, &self.config, &mut self.io)
    }

    pub(crate) fn link(&self, id: LinkId) -> Option<&Link> {
        self.connection
            .sessions
            .get(&id.channel)
            .and_then(|session| session.links.get(&id.handle))
    }

    pub(crate) fn link_mut(&mut self, id: LinkId) -> Result<&mut Link> {
        self.connection
            .sessions
            .get_mut(&id.channel)
            .ok_or(EngineError::UnknownSession(id.channel))?
            .link_mut(id.handle)
    }

    /// A session together with the outbound queue, for calls that emit frames.
    pub(crate) fn session_io(&mut self, channel: u16) -> Result<(&mut Session, &mut Outbound)> {
        if self.connection.close_sent {
            return Err(EngineError::state("connection is closed"));
        }
        let session = self
            .connection
            .sessions
            .get_mut(&channel)
            .ok_or(EngineError::UnknownSession(channel))?;
        Ok((session, &mut self.io))
    }

    fn idle_timeout(&self) -> Option<u64> {
        let connection = &self.connection;
        (self.config.idle_timeout_ms > 0 && connection.open_sent && !connection.close_received)
            .then_some(u64::from(self.config.idle_timeout_ms))
    }

    fn heartbeat_interval(&self) -> Option<u64> {
        let connection = &self.connection;
        let remote = connection.remote_open.as_ref()?.idle_timeout();
        (remote > 0 && connection.open_sent && !connection.close_sent)
            .then(|| u64::from(remote / 2).max(1))
    }

    /// Run idle checks at `now`; returns the next deadline (0 for none).
    fn tick_at(&mut self, now: u64) -> u64 {
        let timeout = self.idle_timeout();
        if self.ticker.local_expired(now, timeout) {
            self.fail(EngineError::IdleTimeout(self.config.idle_timeout_ms));
            return 0;
        }
        let interval = self.heartbeat_interval();
        if self.ticker.heartbeat_due(now, interval) {
            trace!(now, "heartbeat due");
            self.io.heartbeat();
        }
        self.ticker.deadline()
    }

    /// Let an automatic driver know about a deadline earlier than the one
    /// it already has.
    fn reschedule(&mut self) {
        if self.state != EngineState::Started {
            return;
        }
        let TickMode::Auto(driver) = &self.ticker.mode else {
            return;
        };
        let now = driver.now_millis();
        let deadline =
            self.ticker
                .projected_deadline(now, self.idle_timeout(), self.heartbeat_interval());
        if deadline == 0 || self.ticker.scheduled.is_some_and(|at| at <= deadline) {
            return;
        }
        if let TickMode::Auto(driver) = &mut self.ticker.mode {
            driver.schedule(deadline);
        }
        self.ticker.scheduled = Some(deadline);
    }
}

/// Sans-I/O AMQP engine.
pub struct Engine {
    pipeline: EnginePipeline,
    pub(crate) core: EngineCore,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// An engine with an empty pipeline and default configuration.
    pub fn new() -> Self {
        Self::with_configuration(EngineConfiguration::default())
    }

    pub fn with_configuration(config: EngineConfiguration) -> Self {
        Self {
            pipeline: EnginePipeline::new(),
            core: EngineCore::new(config),
        }
    }

    /// Lock the pipeline and configuration and start the handlers.
    pub fn start(&mut self) -> Result<ConnectionMut<'_>> {
        match self.core.state {
            EngineState::Idle => {}
            EngineState::Shutdown => return Err(EngineError::Closed),
            _ => return Err(EngineError::state("engine is already started")),
        }
        self.core.config.validate()?;
        self.core.io.pool = FramePool::new(self.core.config.frame_pool_capacity);
        self.core.state = EngineState::Started;
        self.pipeline.start(&mut self.core);
        debug!(handlers = self.pipeline.len(), "engine started");
        Ok(ConnectionMut::new(self))
    }

    /// Feed bytes received from the transport.
    pub fn ingest(&mut self, bytes: impl Into<Bytes>) -> Result<&mut Self> {
        self.core.check_writable()?;
        self.core.ticker.on_input();
        self.pipeline.ingest(&mut self.core, bytes.into());
        self.finish()?;
        Ok(self)
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        self.pipeline.flush(&mut self.core);
        self.finish()
    }

    fn finish(&mut self) -> Result<()> {
        match self.core.pending_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Run idle-timeout processing at `now` (milliseconds). Returns the time
    /// of the next deadline, or 0 when nothing is pending.
    ///
    /// Not available once [`tick_auto`](Self::tick_auto) has been used.
    pub fn tick(&mut self, now: u64) -> Result<u64> {
        self.core.check_writable()?;
        if matches!(self.core.ticker.mode, TickMode::Auto(_)) {
            return Err(EngineError::state(
                "tick cannot be called once automatic ticking is enabled",
            ));
        }
        self.core.ticker.mode = TickMode::Manual;
        self.run_tick(now)
    }

    fn run_tick(&mut self, now: u64) -> Result<u64> {
        let deadline = self.core.tick_at(now);
        self.flush()?;
        Ok(deadline)
    }

    /// Hand idle processing to `driver`, which calls
    /// [`auto_tick`](Self::auto_tick) at the deadlines it is given.
    pub fn tick_auto(&mut self, driver: impl TickDriver + 'static) -> Result<()> {
        self.core.check_writable()?;
        match self.core.ticker.mode {
            TickMode::Unset => {}
            TickMode::Manual => {
                return Err(EngineError::state(
                    "automatic ticking cannot start after tick was called",
                ))
            }
            TickMode::Auto(_) => {
                return Err(EngineError::state("automatic ticking is already enabled"))
            }
        }
        self.core.ticker.mode = TickMode::Auto(Box::new(driver));
        self.core.ticker.scheduled = None;
        self.core.reschedule();
        Ok(())
    }

    /// Entry point for a [`TickDriver`] when a scheduled deadline arrives.
    pub fn auto_tick(&mut self) -> Result<()> {
        self.core.check_writable()?;
        let TickMode::Auto(driver) = &self.core.ticker.mode else {
            return Err(EngineError::state("automatic ticking is not enabled"));
        };
        let now = driver.now_millis();
        self.core.ticker.scheduled = None;
        self.run_tick(now)?;
        Ok(())
    }

    /// Receive every output buffer as it is produced.
    pub fn output_handler(&mut self, handler: impl FnMut(Bytes) + 'static) -> &mut Self {
        self.core.output_handler = Some(Box::new(handler));
        self
    }

    /// Receive the error that fails the engine. Called at most once.
    pub fn error_handler(&mut self, handler: impl FnMut(&EngineError) + 'static) -> &mut Self {
        self.core.error_handler = Some(Box::new(handler));
        self
    }

    /// Output produced while no output handler was registered.
    pub fn take_output(&mut self) -> Bytes {
        self.core.take_output()
    }

    pub fn pipeline(&self) -> &EnginePipeline {
        &self.pipeline
    }

    /// The pipeline, for adding or removing handlers before `start`.
    pub fn pipeline_mut(&mut self) -> &mut EnginePipeline {
        &mut self.pipeline
    }

    pub fn configuration(&self) -> &EngineConfiguration {
        &self.core.config
    }

    /// Mutable configuration; refused once the engine has started.
    pub fn configuration_mut(&mut self) -> Result<&mut EngineConfiguration> {
        if self.core.state != EngineState::Idle {
            return Err(EngineError::state(
                "configuration cannot change once the engine has started",
            ));
        }
        Ok(&mut self.core.config)
    }

    pub fn sasl_context(&self) -> &SaslContext {
        &self.core.sasl
    }

    pub fn state(&self) -> EngineState {
        self.core.state
    }

    /// Failed or shut down.
    pub fn is_shutdown(&self) -> bool {
        matches!(self.core.state, EngineState::Failed | EngineState::Shutdown)
    }

    pub fn is_writable(&self) -> bool {
        self.core.check_writable().is_ok()
    }

    pub fn is_failed(&self) -> bool {
        self.core.state == EngineState::Failed
    }

    /// Why the engine failed, if it did.
    pub fn failure(&self) -> Option<&str> {
        self.core.failure()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.core.connection.state()
    }

    /// Close every endpoint locally and release queued frames. No further
    /// output is produced.
    pub fn shutdown(&mut self) {
        if self.core.state == EngineState::Shutdown {
            return;
        }
        self.core.connection.shutdown();
        let queued: Vec<WriteEvent> = self.core.io.writes.drain(..).collect();
        for event in queued {
            self.core.io.release(event);
        }
        self.core.io.events.clear();
        self.core.state = EngineState::Shutdown;
        debug!("engine shut down");
    }

    /// Next event from the peer, oldest first.
    pub fn poll_event(&mut self) -> Option<EngineEvent> {
        self.core.io.events.pop_front()
    }

    pub fn connection(&mut self) -> ConnectionMut<'_> {
        ConnectionMut::new(self)
    }

    pub fn session(&mut self, id: SessionId) -> Result<SessionMut<'_>> {
        if !self.core.connection.sessions.contains_key(&id.0) {
            return Err(EngineError::UnknownSession(id.0));
        }
        Ok(SessionMut::new(self, id))
    }

    pub fn sender(&mut self, id: LinkId) -> Result<SenderMut<'_>> {
        self.check_role(id, Role::Sender)?;
        Ok(SenderMut::new(self, id))
    }

    pub fn receiver(&mut self, id: LinkId) -> Result<ReceiverMut<'_>> {
        self.check_role(id, Role::Receiver)?;
        Ok(ReceiverMut::new(self, id))
    }

    fn check_role(&self, id: LinkId, role: Role) -> Result<()> {
        let link = self.core.link(id).ok_or(EngineError::UnknownLink {
            channel: id.channel,
            handle: id.handle,
        })?;
        if link.role != role {
            return Err(EngineError::state(format!(
                "link {id} is a {:?}, not a {role:?}",
                link.role
            )));
        }
        Ok(())
    }

    pub fn outgoing(&mut self, key: DeliveryKey) -> Result<OutgoingDeliveryMut<'_>> {
        let known = self
            .core
            .link(key.link)
            .is_some_and(|link| link.outgoing.contains_key(&key.key));
        if !known {
            return Err(EngineError::UnknownDelivery);
        }
        Ok(OutgoingDeliveryMut::new(self, key))
    }

    pub fn incoming(&mut self, key: DeliveryKey) -> Result<IncomingDeliveryMut<'_>> {
        let known = self
            .core
            .link(key.link)
            .is_some_and(|link| link.incoming.contains_key(&key.key));
        if !known {
            return Err(EngineError::UnknownDelivery);
        }
        Ok(IncomingDeliveryMut::new(self, key))
    }

    /// Frames acquired from the pool and not yet released.
    pub fn frames_in_use(&self) -> usize {
        self.core.io.pool.in_use()
    }
}
