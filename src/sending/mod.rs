//! Outbound path: dispatcher and the sender pool it draws from.

pub mod dispatcher;
pub mod registry;

pub use dispatcher::MessageDispatcher;
pub use registry::MessageSenderRegistry;
