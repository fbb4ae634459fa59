//! Channel adapters and outbound delivery for skiff
//!
//! This crate provides the channel handler trait, the console adapter and the
//! manager that routes outbound messages to adapters.

pub mod base;
pub mod console;
pub mod delivery;
pub mod manager;

pub use base::{BaseChannel, ChannelError, ChannelHandler, ChannelHandlerPtr, Result};
pub use console::ConsoleHandler;
pub use delivery::{DeliveryOutcome, DeliveryPolicy};
pub use manager::ChannelManager;
