//! Sans-I/O AMQP 1.0 protocol primitives.
//!
//! amqprims turns bytes into AMQP frames and frames into connection, session,
//! link and delivery state without touching sockets, threads or clocks. The
//! application moves bytes between the engine and its transport.
//!
//! # Crate Structure
//!
//! - [`codec`]: AMQP type system, performatives and message sections
//! - [`frame`]: frame model, frame pool, resumable parser and frame writer
//! - [`engine`]: handler pipeline, protocol state machine and flow control

/// Re-export codec types.
pub mod codec {
    pub use amqprims_codec::*;
}

/// Re-export frame types.
pub mod frame {
    pub use amqprims_frame::*;
}

/// Re-export engine types.
pub mod engine {
    pub use amqprims_engine::*;
}
