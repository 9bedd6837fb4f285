//! Serialized gateway to the external placement/scheduling engine.
//!
//! The engine decides which node owns which process. It is not thread
//! safe, so every call funnels through [`SchedulerGateway`], which holds
//! one non-reentrant lock across all five operations. The gateway is
//! needed even though routing already runs on a single event queue:
//! `init` runs on the router's startup path before the queue is active,
//! and queries like destination resolution may arrive from caller
//! threads.

use crate::{RouterError, RouterResult};
use fabric_types::{CommandPacket, Module, NodeAddr, NodeId, ProcAddr, ProcessId, ThreadId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Handle the placement engine uses to reach back into the node.
///
/// Passed to [`PlacementEngine::init`] exactly once. Calls may arrive
/// while the engine lock is held, so implementations must not call back
/// into the gateway synchronously; `send_command` enqueues instead of
/// routing inline.
pub trait EngineHost: Send + Sync {
    /// Ask the owning service to spawn a VM execution context.
    fn create_vm(
        &self,
        pid: &ProcessId,
        root_tid: ThreadId,
        proc_addr: ProcAddr,
        master_nid: &NodeId,
        name: &str,
    );

    /// Ask the owning service to create a GUI surface for a process.
    fn create_gui(&self, pid: &ProcessId);

    /// Emit an outbound command on the engine's behalf. Delivery is
    /// deferred to the router's event queue.
    fn send_command(
        &self,
        pid: ProcessId,
        dst_nid: NodeAddr,
        src_nid: NodeAddr,
        module: Module,
        content: String,
    );

    /// This node's bound identity.
    fn local_node(&self) -> RouterResult<NodeId>;
}

/// The placement/scheduling engine, treated as a black box.
///
/// Implementations are entered only through [`SchedulerGateway`], one
/// call at a time, and must not block on I/O while entered: any I/O the
/// engine needs has to happen outside the gateway's lock.
pub trait PlacementEngine: Send {
    /// One-time setup. Called exactly once, before any other operation.
    fn init(&mut self, host: Arc<dyn EngineHost>);

    /// Record this node's identity and display name.
    fn set_node_info(&mut self, nid: &NodeId, display_name: &str);

    /// Which node owns `pid`'s instance of `module`? Pure query aside
    /// from internal caching; `None` means no owner is known.
    fn resolve_destination(&mut self, pid: &ProcessId, module: Module) -> Option<NodeId>;

    /// Deliver an inbound scheduler-module command into the engine.
    fn receive_command(
        &mut self,
        pid: &ProcessId,
        dst_nid: &NodeAddr,
        src_nid: &NodeAddr,
        module: Module,
        content: &str,
    );

    /// Advance placement state by one scheduling period.
    fn execute_tick(&mut self);
}

/// Single point of serialized entry into the placement engine.
pub struct SchedulerGateway {
    engine: Mutex<Box<dyn PlacementEngine>>,
    initialized: AtomicBool,
}

impl SchedulerGateway {
    pub fn new(engine: Box<dyn PlacementEngine>) -> Self {
        Self {
            engine: Mutex::new(engine),
            initialized: AtomicBool::new(false),
        }
    }

    /// One-time engine setup with the owner handle. A second call is a
    /// protocol error.
    pub fn init(&self, host: Arc<dyn EngineHost>) -> RouterResult<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(RouterError::Protocol(
                "scheduler gateway initialized twice".to_string(),
            ));
        }
        self.engine.lock().init(host);
        Ok(())
    }

    pub fn set_node_info(&self, nid: &NodeId, display_name: &str) {
        trace!(nid = %nid, display_name, "recording node info with placement engine");
        self.engine.lock().set_node_info(nid, display_name);
    }

    pub fn resolve_destination(&self, pid: &ProcessId, module: Module) -> Option<NodeId> {
        self.engine.lock().resolve_destination(pid, module)
    }

    /// Deliver a scheduler-module packet's payload into the engine.
    /// Addressing must already be normalized; the scheduler never sees
    /// sentinel sources or destinations.
    pub fn receive_command(&self, packet: &CommandPacket) -> RouterResult<()> {
        let pid = packet.pid.as_ref().ok_or_else(|| {
            RouterError::Protocol("scheduler packet is missing a process id".to_string())
        })?;
        if matches!(packet.dst_nid, NodeAddr::Unset | NodeAddr::Local) {
            return Err(RouterError::Protocol(
                "scheduler packet destination is unresolved".to_string(),
            ));
        }
        if matches!(packet.src_nid, NodeAddr::Unset | NodeAddr::Local) {
            return Err(RouterError::Protocol(
                "scheduler packet source is unresolved".to_string(),
            ));
        }

        self.engine.lock().receive_command(
            pid,
            &packet.dst_nid,
            &packet.src_nid,
            packet.module,
            &packet.content,
        );
        Ok(())
    }

    pub fn execute_tick(&self) {
        trace!("scheduler tick");
        self.engine.lock().execute_tick();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{NullHost, StubEngine};
    use fabric_types::NodeId;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn init_is_once_only() {
        let (engine, _probe) = StubEngine::new();
        let gateway = SchedulerGateway::new(Box::new(engine));

        gateway.init(Arc::new(NullHost)).unwrap();
        let err = gateway.init(Arc::new(NullHost)).unwrap_err();
        assert!(matches!(err, RouterError::Protocol(_)));
    }

    #[test]
    fn resolve_passes_through_engine_answer() {
        let (engine, probe) = StubEngine::new();
        probe.route(ProcessId::new("p1"), Module::Gui, NodeId::new("node-9"));
        let gateway = SchedulerGateway::new(Box::new(engine));

        assert_eq!(
            gateway.resolve_destination(&ProcessId::new("p1"), Module::Gui),
            Some(NodeId::new("node-9"))
        );
        assert_eq!(
            gateway.resolve_destination(&ProcessId::new("p2"), Module::Gui),
            None
        );
    }

    #[test]
    fn receive_command_requires_normalized_addressing() {
        let (engine, probe) = StubEngine::new();
        let gateway = SchedulerGateway::new(Box::new(engine));

        let mut packet = CommandPacket::new(
            None,
            NodeAddr::Node(NodeId::new("node-1")),
            NodeAddr::Node(NodeId::new("node-2")),
            Module::Scheduler,
            "{}".to_string(),
        );
        assert!(matches!(
            gateway.receive_command(&packet),
            Err(RouterError::Protocol(_))
        ));

        packet.pid = Some(ProcessId::new("p1"));
        packet.src_nid = NodeAddr::Unset;
        assert!(matches!(
            gateway.receive_command(&packet),
            Err(RouterError::Protocol(_))
        ));

        packet.src_nid = NodeAddr::Node(NodeId::new("node-2"));
        gateway.receive_command(&packet).unwrap();
        assert_eq!(probe.received_commands().len(), 1);
    }

    #[test]
    fn engine_calls_are_mutually_exclusive() {
        let (engine, probe) = StubEngine::new();
        probe.set_tick_delay(Duration::from_millis(2));
        let gateway = Arc::new(SchedulerGateway::new(Box::new(engine)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gateway = Arc::clone(&gateway);
                thread::spawn(move || {
                    for _ in 0..5 {
                        gateway.execute_tick();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(probe.ticks(), 40);
        assert_eq!(probe.max_concurrent_entries(), 1);
    }
}
