//! # Weft Node Router
//!
//! Node-local command router for the Weft process-execution fabric.
//! Each device runs one router that negotiates a node identity with the
//! coordinating server, drives the placement engine's scheduling tick,
//! and routes [`CommandPacket`]s either to local capability modules or,
//! through the server, to remote nodes.
//!
//! ## Architecture Role
//! ```text
//! local modules ──send_command──▶ ┌────────────┐ ──deliver──▶ RouterDelegate
//!                                 │   Router    │              (worker/ctrl/gui)
//! server ──on_packet_received──▶  │ event queue │ ──relay───▶ ServerLink
//! tick driver ──Tick──────────▶   └────────────┘
//!                                       │
//!                                SchedulerGateway ──▶ PlacementEngine
//! ```
//!
//! All routing work runs on one single-consumer event queue, so packet
//! handling never interleaves with identity or gateway state changes.
//! The placement engine itself is a black box behind
//! [`SchedulerGateway`]'s single-entry lock.

pub mod config;
pub mod gateway;
pub mod identity;
pub mod router;
pub mod server;
pub mod sink;
pub mod test_util;
mod tick;

pub use config::RouterConfig;
pub use gateway::{EngineHost, PlacementEngine, SchedulerGateway};
pub use identity::{derive_login_token, NodeIdentity, LOGIN_TOKEN_PREFIX};
pub use router::{Router, RouterCore, RouterEvent};
pub use server::ServerLink;
pub use sink::RouterDelegate;

pub use fabric_types::{CommandPacket, Module, NodeAddr, NodeId, ProcAddr, ProcessId, ThreadId};

/// Router operation errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum RouterError {
    /// Contract violation by a caller the router trusts (missing packet
    /// field, double init, re-bind). Fails the in-flight operation.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// A routing decision needed the local identity before the bind
    /// handshake completed.
    #[error("Node identity is not bound")]
    IdentityUnbound,

    /// The placement engine knows no owner for the process/module pair.
    #[error("No owner node for process {pid} module {module}")]
    Unroutable { pid: ProcessId, module: Module },

    /// Configuration rejected before startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server link could not accept an outbound send.
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Result type for router operations
pub type RouterResult<T> = std::result::Result<T, RouterError>;
