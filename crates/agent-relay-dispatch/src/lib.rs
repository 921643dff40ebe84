//! Busy-aware dispatch of agent work.
//!
//! Provides:
//! - `AgentMonitor` - busy/idle tracking from heartbeats and busy signals
//! - `ActionQueue` - FIFO of text commands delivered while the agent is idle
//! - `DelegationSupervisor` - task hand-off with lazy deadline evaluation
//! - Model catalog and selector resolution

pub mod agent;
pub mod delegation;
pub mod error;
pub mod models;
pub mod queue;

pub use agent::AgentMonitor;
pub use delegation::{
    AcceptOutcome, CreateDelegation, DelegationFilter, DelegationListing, DelegationSummary,
    DelegationSupervisor,
};
pub use error::DispatchError;
pub use models::{MODEL_CATALOG, ModelSelector};
pub use queue::{ActionQueue, TickOutcome};
