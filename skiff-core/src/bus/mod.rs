//! Message bus for decoupled communication
//!
//! The message bus provides a dual-queue system for inbound and outbound
//! messages, decoupling chat channels from the agent core.

pub mod events;
pub mod queue;

pub use events::{
    new_request_id, InboundMessage, OutboundMessage, SUBAGENT_RESULT_TYPE, SYSTEM_CHANNEL,
};
pub use queue::{
    BusReceiver, InboundReceiver, MessageBus, OutboundReceiver, DEFAULT_BUS_CAPACITY,
};
