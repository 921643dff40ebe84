//! Host inspection-protocol client.
//!
//! Provides:
//! - Target discovery and selection
//! - Wire frame types
//! - `ConnectionManager` with request correlation, context tracking and reconnect
//! - `ContextProber` for running capabilities across execution contexts

pub mod connection;
pub mod discovery;
pub mod error;
pub mod probe;
pub mod protocol;
pub mod ws;

pub use connection::{ConnectionManager, Connector, ExecutionContext, FrameChannel};
pub use discovery::Target;
pub use error::CdpError;
pub use probe::{
    ActionRunner, Capability, ContextEvaluator, ContextProber, ProbeOutcome, ScriptCapability,
};
pub use ws::WsConnector;
