// nodemesh Core - shared data model
//!
//! Contains:
//! - Node: node records, capabilities, liveness overlay
//! - Event: typed bus events
//! - Scenario: scenario documents and the install index row
//! - Config: node configuration

mod config;
mod event;
mod node;
mod scenario;

pub use config::*;
pub use event::*;
pub use node::*;
pub use scenario::*;
