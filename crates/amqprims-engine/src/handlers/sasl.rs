//! SASL negotiation layer.
//!
//! Sits between the performative handler and the frame handlers. Until the
//! exchange completes it holds back every outbound AMQP header and frame and
//! answers the peer's SASL frames through a listener; once the outcome is
//! `Ok` the held writes are released in order and the handler becomes a
//! pass-through. Mechanisms themselves live in the listener.

use amqprims_codec::{
    SaslChallenge, SaslCode, SaslInit, SaslMechanisms, SaslOutcome, SaslPerformative,
    SaslResponse, Symbol,
};
use amqprims_frame::{FrameHandle, ProtocolFrame, ProtocolHeader};
use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::pipeline::{EngineHandler, EngineHandlerContext, ReadEvent, WriteEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaslRole {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaslState {
    #[default]
    Idle,
    Negotiating,
    Authenticated,
    Failed,
}

/// Progress of the SASL exchange, readable through the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaslContext {
    role: Option<SaslRole>,
    state: SaslState,
    offered: Vec<Symbol>,
    mechanism: Option<Symbol>,
    outcome: Option<SaslCode>,
}

impl SaslContext {
    pub(crate) fn new(role: SaslRole) -> Self {
        Self {
            role: Some(role),
            ..Self::default()
        }
    }

    /// `None` when the engine runs without a SASL layer.
    pub fn role(&self) -> Option<SaslRole> {
        self.role
    }

    pub fn is_enabled(&self) -> bool {
        self.role.is_some()
    }

    pub fn state(&self) -> SaslState {
        self.state
    }

    /// Mechanisms offered by the server.
    pub fn offered_mechanisms(&self) -> &[Symbol] {
        &self.offered
    }

    pub fn mechanism(&self) -> Option<&Symbol> {
        self.mechanism.as_ref()
    }

    pub fn outcome(&self) -> Option<SaslCode> {
        self.outcome
    }
}

/// Reply of a server listener to an init or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaslDecision {
    Challenge(Bytes),
    Outcome {
        code: SaslCode,
        additional_data: Option<Bytes>,
    },
}

impl SaslDecision {
    pub fn accept() -> Self {
        SaslDecision::Outcome {
            code: SaslCode::Ok,
            additional_data: None,
        }
    }

    pub fn reject() -> Self {
        SaslDecision::Outcome {
            code: SaslCode::Auth,
            additional_data: None,
        }
    }
}

/// Server half of a SASL mechanism.
pub trait SaslServerListener {
    /// Mechanisms to offer, in order of preference.
    fn mechanisms(&mut self) -> Vec<Symbol>;

    fn handle_init(&mut self, init: &SaslInit) -> SaslDecision;

    fn handle_response(&mut self, _response: &SaslResponse) -> SaslDecision {
        SaslDecision::reject()
    }
}

/// Client half of a SASL mechanism.
pub trait SaslClientListener {
    /// Pick a mechanism from those offered; `None` aborts the exchange.
    fn select_mechanism(&mut self, offered: &[Symbol]) -> Option<SaslInit>;

    fn handle_challenge(&mut self, _challenge: &SaslChallenge) -> Bytes {
        Bytes::new()
    }

    fn handle_outcome(&mut self, _outcome: &SaslOutcome) {}
}

enum Listener {
    Client(Box<dyn SaslClientListener>),
    Server(Box<dyn SaslServerListener>),
}

pub struct SaslHandler {
    listener: Listener,
    header_sent: bool,
    done: bool,
    failed: bool,
    held: Vec<WriteEvent>,
}

impl SaslHandler {
    pub fn client(listener: impl SaslClientListener + 'static) -> Self {
        Self::new(Listener::Client(Box::new(listener)))
    }

    pub fn server(listener: impl SaslServerListener + 'static) -> Self {
        Self::new(Listener::Server(Box::new(listener)))
    }

    fn new(listener: Listener) -> Self {
        Self {
            listener,
            header_sent: false,
            done: false,
            failed: false,
            held: Vec::new(),
        }
    }

    fn role(&self) -> SaslRole {
        match self.listener {
            Listener::Client(_) => SaslRole::Client,
            Listener::Server(_) => SaslRole::Server,
        }
    }

    fn send_header(&mut self, ctx: &mut EngineHandlerContext<'_>) {
        if !self.header_sent {
            self.header_sent = true;
            ctx.fire_write(WriteEvent::Header(ProtocolHeader::SASL));
        }
    }

    fn hold(&mut self, event: WriteEvent) {
        self.held.push(event);
    }

    fn fail(&mut self, ctx: &mut EngineHandlerContext<'_>, reason: String) {
        warn!(%reason, "sasl negotiation failed");
        self.failed = true;
        ctx.engine_mut().sasl.state = SaslState::Failed;
        for event in self.held.drain(..) {
            if let WriteEvent::Frame(handle) = event {
                ctx.engine_mut().pool_mut().release(handle);
            }
        }
        ctx.fail(EngineError::Sasl(reason));
    }

    fn complete(&mut self, ctx: &mut EngineHandlerContext<'_>, code: SaslCode) {
        let core = ctx.engine_mut();
        core.sasl.outcome = Some(code);
        core.io.events.push_back(EngineEvent::SaslCompleted(code));
        if code != SaslCode::Ok {
            self.fail(ctx, format!("authentication failed with outcome {code:?}"));
            return;
        }
        debug!(held = self.held.len(), "sasl authenticated");
        ctx.engine_mut().sasl.state = SaslState::Authenticated;
        self.done = true;
        for event in self.held.drain(..) {
            ctx.fire_write(event);
        }
    }

    fn apply(&mut self, ctx: &mut EngineHandlerContext<'_>, decision: SaslDecision) {
        match decision {
            SaslDecision::Challenge(challenge) => {
                ctx.fire_write(WriteEvent::Sasl(SaslPerformative::Challenge(
                    SaslChallenge { challenge },
                )));
            }
            SaslDecision::Outcome {
                code,
                additional_data,
            } => {
                ctx.fire_write(WriteEvent::Sasl(SaslPerformative::Outcome(SaslOutcome {
                    code,
                    additional_data,
                })));
                self.complete(ctx, code);
            }
        }
    }

    fn client_read(&mut self, ctx: &mut EngineHandlerContext<'_>, body: SaslPerformative) {
        let Listener::Client(listener) = &mut self.listener else {
            return;
        };
        match body {
            SaslPerformative::Mechanisms(offer) => {
                let selected = listener.select_mechanism(&offer.mechanisms);
                ctx.engine_mut().sasl.offered = offer.mechanisms;
                match selected {
                    Some(init) => {
                        ctx.engine_mut().sasl.mechanism = Some(init.mechanism.clone());
                        self.send_header(ctx);
                        ctx.fire_write(WriteEvent::Sasl(SaslPerformative::Init(init)));
                    }
                    None => self.fail(ctx, "no acceptable SASL mechanism offered".to_string()),
                }
            }
            SaslPerformative::Challenge(challenge) => {
                let response = listener.handle_challenge(&challenge);
                ctx.fire_write(WriteEvent::Sasl(SaslPerformative::Response(SaslResponse {
                    response,
                })));
            }
            SaslPerformative::Outcome(outcome) => {
                listener.handle_outcome(&outcome);
                self.complete(ctx, outcome.code);
            }
            other => self.fail(ctx, format!("unexpected {other} from SASL server")),
        }
    }

    fn server_read(&mut self, ctx: &mut EngineHandlerContext<'_>, body: SaslPerformative) {
        let Listener::Server(listener) = &mut self.listener else {
            return;
        };
        match body {
            SaslPerformative::Init(init) => {
                ctx.engine_mut().sasl.mechanism = Some(init.mechanism.clone());
                let decision = listener.handle_init(&init);
                self.apply(ctx, decision);
            }
            SaslPerformative::Response(response) => {
                let decision = listener.handle_response(&response);
                self.apply(ctx, decision);
            }
            other => self.fail(ctx, format!("unexpected {other} from SASL client")),
        }
    }
}

impl EngineHandler for SaslHandler {
    fn engine_starting(&mut self, ctx: &mut EngineHandlerContext<'_>) {
        ctx.engine_mut().sasl = SaslContext::new(self.role());
    }

    fn handle_read_header(&mut self, ctx: &mut EngineHandlerContext<'_>, header: ProtocolHeader) {
        if self.done {
            ctx.fire_read(ReadEvent::Header(header));
            return;
        }
        if !header.is_sasl() {
            self.send_header(ctx);
            self.fail(ctx, format!("expected a SASL header, received {header}"));
            return;
        }
        ctx.engine_mut().sasl.state = SaslState::Negotiating;
        self.send_header(ctx);
        if let Listener::Server(listener) = &mut self.listener {
            let mechanisms = listener.mechanisms();
            ctx.engine_mut().sasl.offered = mechanisms.clone();
            ctx.fire_write(WriteEvent::Sasl(SaslPerformative::Mechanisms(
                SaslMechanisms { mechanisms },
            )));
        }
    }

    fn handle_read_sasl(&mut self, ctx: &mut EngineHandlerContext<'_>, body: SaslPerformative) {
        if self.done {
            self.fail(ctx, format!("unexpected {body} after SASL completed"));
            return;
        }
        match self.role() {
            SaslRole::Client => self.client_read(ctx, body),
            SaslRole::Server => self.server_read(ctx, body),
        }
    }

    fn handle_read_frame(&mut self, ctx: &mut EngineHandlerContext<'_>, frame: ProtocolFrame) {
        if self.done {
            ctx.fire_read(ReadEvent::Frame(frame));
        } else {
            self.fail(ctx, "AMQP frame received before SASL completed".to_string());
        }
    }

    fn handle_write_header(&mut self, ctx: &mut EngineHandlerContext<'_>, header: ProtocolHeader) {
        if self.done {
            ctx.fire_write(WriteEvent::Header(header));
            return;
        }
        if self.failed {
            return;
        }
        if self.role() == SaslRole::Client {
            self.send_header(ctx);
        }
        self.hold(WriteEvent::Header(header));
    }

    fn handle_write_frame(&mut self, ctx: &mut EngineHandlerContext<'_>, frame: FrameHandle) {
        if self.done {
            ctx.fire_write(WriteEvent::Frame(frame));
        } else if self.failed {
            // a Close after failed authentication never reaches the peer
            ctx.engine_mut().pool_mut().release(frame);
        } else {
            self.hold(WriteEvent::Frame(frame));
        }
    }

    fn handle_write_heartbeat(&mut self, ctx: &mut EngineHandlerContext<'_>) {
        if self.done {
            ctx.fire_write(WriteEvent::Heartbeat);
        }
    }
}
