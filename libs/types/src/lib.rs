//! # Weft Shared Types
//!
//! Packet and node-addressing types shared by the node-local router and
//! every capability module in the Weft process fabric.
//!
//! ## Design Philosophy
//!
//! - **Typed identifiers**: `NodeId` and `ProcessId` are distinct newtypes
//!   so a process id can never be passed where a node id is expected
//! - **Closed addressing**: `NodeAddr` folds the three routing sentinels
//!   (unset / local / broadcast) and concrete identities into one sum
//!   type, so "is this resolved?" is a match, not a string comparison
//! - **Opaque payloads**: `CommandPacket::content` is carried verbatim;
//!   only the destination module interprets it
//!
//! ## Quick Start
//!
//! ```rust
//! use fabric_types::{CommandPacket, Module, NodeAddr, ProcessId};
//!
//! // A command emitted by a local module, destination still unresolved.
//! let packet = CommandPacket::new(
//!     Some(ProcessId::new("p1")),
//!     NodeAddr::Unset,
//!     NodeAddr::Local,
//!     Module::Scheduler,
//!     "{}".to_string(),
//! );
//! assert!(!packet.dst_nid.is_resolved());
//! ```

pub mod identifiers;
pub mod packet;

pub use identifiers::{NodeAddr, NodeId, ParseNodeAddrError, ProcAddr, ProcessId, ThreadId};
pub use packet::{CommandPacket, Module};
