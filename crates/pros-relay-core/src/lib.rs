//! Pros Relay Core - platform-independent abstractions and configuration
//!
//! This crate provides the configuration, error types, reply shapes, and
//! the transport/sink trait seams that are shared across platform-specific
//! implementations.

mod config;
mod error;
mod reply;
mod sink;
mod transport;

pub use config::*;
pub use error::*;
pub use reply::*;
pub use sink::*;
pub use transport::*;
