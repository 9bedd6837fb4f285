//! Command packet and module discriminator.

use crate::identifiers::{NodeAddr, ProcessId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Local capability a packet is addressed to.
///
/// The enum is closed on purpose: an unknown module tag cannot be
/// constructed in-process, and a bad wire value fails at parse time
/// instead of reaching the router's dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    Memory,
    Vm,
    Scheduler,
    Controller,
    Gui,
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Module::Memory => "memory",
            Module::Vm => "vm",
            Module::Scheduler => "scheduler",
            Module::Controller => "controller",
            Module::Gui => "gui",
        };
        f.write_str(name)
    }
}

/// One routed command: addressing metadata plus an opaque payload.
///
/// `pid` is required for every command except node-bind traffic, which
/// never carries a process. `content` is a serialized payload owned by
/// the destination module; the router forwards it untouched.
///
/// A packet is built once per routing event and discarded after
/// delivery. The router rewrites `dst_nid` at most once (sentinel to
/// concrete identity) and stamps `src_nid`; nothing else mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPacket {
    pub pid: Option<ProcessId>,
    pub dst_nid: NodeAddr,
    pub src_nid: NodeAddr,
    pub module: Module,
    pub content: String,
}

impl CommandPacket {
    pub fn new(
        pid: Option<ProcessId>,
        dst_nid: NodeAddr,
        src_nid: NodeAddr,
        module: Module,
        content: String,
    ) -> Self {
        Self {
            pid,
            dst_nid,
            src_nid,
            module,
            content,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::NodeId;

    #[test]
    fn packet_serializes_with_wire_field_names() {
        let packet = CommandPacket::new(
            Some(ProcessId::new("p1")),
            NodeAddr::Node(NodeId::new("node-7")),
            NodeAddr::Local,
            Module::Controller,
            "{\"command\":\"warp\"}".to_string(),
        );

        let json = serde_json::to_value(&packet).unwrap();
        assert_eq!(json["pid"], "p1");
        assert_eq!(json["dst_nid"], "node-7");
        assert_eq!(json["src_nid"], ".");
        assert_eq!(json["module"], "controller");

        let back: CommandPacket = serde_json::from_value(json).unwrap();
        assert_eq!(back, packet);
    }

    #[test]
    fn module_wire_tags_are_stable() {
        for (module, tag) in [
            (Module::Memory, "\"memory\""),
            (Module::Vm, "\"vm\""),
            (Module::Scheduler, "\"scheduler\""),
            (Module::Controller, "\"controller\""),
            (Module::Gui, "\"gui\""),
        ] {
            assert_eq!(serde_json::to_string(&module).unwrap(), tag);
        }
    }
}
