//! Core types and primitives for skiff
//!
//! This crate provides the message bus, the error taxonomy, the admission
//! gate, request contexts, delegation request types, configuration and
//! logging used by all other skiff components.

pub mod bus;
pub mod config;
pub mod context;
pub mod delegation;
pub mod error;
pub mod gate;
pub mod logging;
pub mod metrics;
pub mod session;
pub mod utils;

pub use context::RequestContext;
pub use error::{Error, Result};
pub use gate::{AdmissionGate, GatePermit};
pub use metrics::{MetricsRecorder, MetricsRecorderPtr};
