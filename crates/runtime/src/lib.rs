//! nodemesh Runtime - presence, routing and scenario execution
//!
//! Responsibilities:
//! - Track node liveness and capabilities on top of the registry store
//! - Route `ui.notify` events to the right node
//! - Interpret scenario documents
//!
//! Architecture:
//! - bus: in-process event bus
//! - directory: node presence directory
//! - router/: routing rules, relay transport, event router
//! - scenario/: templates, engine, repository, service
//! - node: root context wiring everything together

pub mod bus;
pub mod directory;
pub mod io;
pub mod node;
pub mod router;
pub mod scenario;
pub mod skills;

#[cfg(test)]
mod e2e_tests;

pub use bus::{EventBus, EventHandler, SubscriptionId};
pub use directory::{DirectoryError, NodeDirectory};
pub use io::{ConsoleSink, LogVoice, MemoryConsole, MemoryVoice, StdoutConsole, VoiceSink};
pub use node::{MeshNode, NodeError, open_store};
pub use router::{
    HttpRelay, RelayTransport, RouteOutcome, Router, RouterError, RouterSettings, RoutingRule,
};
pub use scenario::{
    ExecutionContext, ScenarioEngine, ScenarioError, ScenarioRepository, ScenarioService,
};
pub use skills::{FnSkillInvoker, HttpSkillInvoker, InvokeError, SharedSkillInvoker, SkillInvoker};
