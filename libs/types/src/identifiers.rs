//! Typed identifiers for nodes and processes.
//!
//! Node identities are opaque strings assigned by the coordinating
//! server; process ids are opaque strings minted when a process is
//! created. Wrapping both in newtypes keeps the two from being swapped
//! in routing signatures.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Thread id inside a fabric process.
pub type ThreadId = u64;

/// Address of a process-information record in fabric memory space.
pub type ProcAddr = u64;

/// Identity the server assigns to a connected node for the session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a process running somewhere in the fabric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(String);

impl ProcessId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wire literal for [`NodeAddr::Unset`].
pub const ADDR_UNSET: &str = "none";
/// Wire literal for [`NodeAddr::Local`].
pub const ADDR_LOCAL: &str = ".";
/// Wire literal for [`NodeAddr::Broadcast`].
pub const ADDR_BROADCAST: &str = "all";

/// Destination or source slot of a command packet.
///
/// In router terms the sentinels mean: `Unset`, ask the placement
/// engine who owns the process; `Local`, rewrite to this node's bound
/// identity; `Broadcast`, deliver on every node including this one.
/// Anything else is a concrete server-assigned identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NodeAddr {
    Unset,
    Local,
    Broadcast,
    Node(NodeId),
}

impl NodeAddr {
    /// True once the slot names a deliverable destination: a concrete
    /// node or the broadcast fan-out.
    pub fn is_resolved(&self) -> bool {
        matches!(self, NodeAddr::Node(_) | NodeAddr::Broadcast)
    }

    /// True when the slot is exactly the given concrete identity.
    pub fn is_node(&self, id: &NodeId) -> bool {
        matches!(self, NodeAddr::Node(n) if n == id)
    }

    pub fn as_node(&self) -> Option<&NodeId> {
        match self {
            NodeAddr::Node(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeAddr::Unset => f.write_str(ADDR_UNSET),
            NodeAddr::Local => f.write_str(ADDR_LOCAL),
            NodeAddr::Broadcast => f.write_str(ADDR_BROADCAST),
            NodeAddr::Node(id) => f.write_str(id.as_str()),
        }
    }
}

/// Error parsing a node address from its wire form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid node address: {0:?}")]
pub struct ParseNodeAddrError(pub String);

impl FromStr for NodeAddr {
    type Err = ParseNodeAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Err(ParseNodeAddrError(s.to_string())),
            ADDR_UNSET => Ok(NodeAddr::Unset),
            ADDR_LOCAL => Ok(NodeAddr::Local),
            ADDR_BROADCAST => Ok(NodeAddr::Broadcast),
            other => Ok(NodeAddr::Node(NodeId::new(other))),
        }
    }
}

impl TryFrom<String> for NodeAddr {
    type Error = ParseNodeAddrError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<NodeAddr> for String {
    fn from(addr: NodeAddr) -> String {
        addr.to_string()
    }
}

impl From<NodeId> for NodeAddr {
    fn from(id: NodeId) -> NodeAddr {
        NodeAddr::Node(id)
    }
}
