//! Core building blocks shared by the agent relay crates.
//!
//! This crate provides:
//! - `StateDocument` - the persisted queue, delegations and agent state
//! - `StateStore` - load/save contract with memory and JSON-file backends
//! - `StateHandle` - the owned state container passed to each component
//! - `EventBus` - fan-out publish with replay history
//! - `RelayConfig` - TOML configuration

pub mod config;
pub mod document;
pub mod event_bus;
pub mod state;
pub mod storage;
pub mod traits;

pub use config::{CapabilityScript, ConfigError, RelayConfig};
pub use document::{
    ActionQueueItem, AgentState, Delegation, DelegationPriority, DelegationStatus, Millis,
    StateDocument, now_millis,
};
pub use event_bus::{BusEvent, EventBus};
pub use state::StateHandle;
pub use traits::{StateStore, StoreError};
