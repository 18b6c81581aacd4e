//! Message-bus client (component D): publish/subscribe with
//! auto-reconnect and typed JSON payloads, composed onto the reactor
//! via a single notifier fd.

mod client;
mod error;
mod topic;

pub use client::{BusClient, Message};
pub use error::BusError;
pub use topic::{operation_name, prefix, publish_topic, subscribe_filter, ModuleKind};
