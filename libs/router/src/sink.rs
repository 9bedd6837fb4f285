//! Delivery targets supplied by the owning service.

use fabric_types::{CommandPacket, NodeAddr, NodeId, ProcAddr, ProcessId, ThreadId};

/// Capability sinks and lifecycle notifications the owning service
/// implements for its router.
///
/// Delivery methods receive exactly one packet and must return without
/// blocking; anything slow belongs on the service's own queue. They are
/// invoked from the router's event loop, one at a time.
pub trait RouterDelegate: Send + Sync {
    /// Connect-status change. `nid` carries the bound identity when
    /// `connected`, [`NodeAddr::Unset`] otherwise.
    fn connect_status(&self, connected: bool, nid: &NodeAddr);

    /// Spawn a VM execution context for a newly placed process.
    fn create_vm(
        &self,
        pid: &ProcessId,
        root_tid: ThreadId,
        proc_addr: ProcAddr,
        master_nid: &NodeId,
        name: &str,
    );

    /// Create a GUI surface bound to a process.
    fn create_gui(&self, pid: &ProcessId);

    /// Packet addressed to the memory/VM worker.
    fn deliver_worker(&self, packet: &CommandPacket);

    /// Packet addressed to the controller.
    fn deliver_controller(&self, packet: &CommandPacket);

    /// Packet addressed to the GUI.
    fn deliver_gui(&self, packet: &CommandPacket);
}
