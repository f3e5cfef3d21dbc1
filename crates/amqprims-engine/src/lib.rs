//! Sans-I/O AMQP 1.0 protocol engine.
//!
//! An [`Engine`] owns a pipeline of handlers and the connection state they
//! drive. The application feeds received bytes in with [`Engine::ingest`]
//! and writes whatever the output handler is given to its transport. No
//! sockets, threads or clocks are used; idle timeouts advance only through
//! [`Engine::tick`] or a [`TickDriver`].
//!
//! ```no_run
//! use amqprims_engine::{create_engine, EngineConfiguration};
//!
//! # fn main() -> amqprims_engine::Result<()> {
//! let mut engine = create_engine(EngineConfiguration::default())?;
//! engine.output_handler(|bytes| {
//!     // hand `bytes` to the transport
//!     let _ = bytes;
//! });
//! engine.start()?.open()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod constants;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod events;
pub mod factory;
pub mod flow;
pub mod handlers;
pub mod link;
pub mod pipeline;
pub mod session;
pub mod tick;

pub use config::{EngineConfiguration, DEFAULT_SESSION_WINDOW};
pub use connection::{ConnectionMut, ConnectionState};
pub use delivery::{DeliveryIdState, IncomingDeliveryMut, OutgoingDeliveryMut};
pub use engine::{Engine, EngineCore, EngineState};
pub use error::{EngineError, Result};
pub use events::{DeliveryKey, EngineEvent, LinkId, SessionId};
pub use factory::{create_engine, create_sasl_client_engine, create_sasl_server_engine};
pub use flow::{LinkCredit, SessionWindow};
pub use handlers::{
    FrameLoggingHandler, FrameParsingHandler, FrameWritingHandler, PerformativeHandler,
    SaslClientListener, SaslContext, SaslDecision, SaslHandler, SaslRole, SaslServerListener,
    SaslState,
};
pub use link::{ReceiverMut, SenderMut};
pub use pipeline::{EngineHandler, EngineHandlerContext, EnginePipeline, ReadEvent, WriteEvent};
pub use session::{EndpointState, SessionMut};
pub use tick::TickDriver;
