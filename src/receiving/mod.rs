//! # Receiving
//!
//! One [`MessagePump`] per receive endpoint. The pump pulls batches sized
//! to its free handler slots, runs the application's [`MessageHandler`] for
//! each message and settles the message from the outcome.

pub mod handler;
pub mod pump;
pub mod state;

pub use handler::{handler_fn, ErrorHandleResult, FnMessageHandler, MessageContext, MessageHandler};
pub use pump::MessagePump;
pub use state::{PumpState, PumpStats};
