//! # Router Dispatch Core
//!
//! Decides packet destinations and dispatches: local capability modules
//! get the packet through [`RouterDelegate`], remote nodes get it
//! through [`ServerLink::send_relay`]. All decisions run on one
//! single-consumer event queue so routing never interleaves with
//! identity or gateway state changes.
//!
//! ## Message Flow
//! 1. **Normalization** (local-sourced packets only): `Local` rewrites
//!    to the bound identity, `Unset` resolves through the placement
//!    engine, and the source slot is stamped with the bound identity:
//!    callers cannot forge a source node.
//! 2. **Local delivery**: packets addressed to this node or broadcast
//!    dispatch to the sink selected by their module tag.
//! 3. **Forwarding**: packets not addressed to this node, unless they
//!    came from the server, relay outward. A broadcast packet takes
//!    both paths; a server-delivered packet addressed elsewhere takes
//!    neither and is dropped.
//!
//! Failures stay scoped to the event that caused them: the loop logs
//! the error and keeps draining the queue.

use crate::config::RouterConfig;
use crate::gateway::{EngineHost, PlacementEngine, SchedulerGateway};
use crate::identity::{derive_login_token, NodeIdentity};
use crate::server::ServerLink;
use crate::sink::RouterDelegate;
use crate::tick;
use crate::{RouterError, RouterResult};
use fabric_types::{CommandPacket, Module, NodeAddr, NodeId, ProcAddr, ProcessId, ThreadId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Work items drained by the router's event loop, strictly in arrival
/// order.
#[derive(Debug)]
pub enum RouterEvent {
    /// Route one packet. `from_server` marks packets delivered by the
    /// coordinating server rather than a local module.
    Route {
        packet: CommandPacket,
        from_server: bool,
    },
    /// Server's answer to a connect request.
    ConnectResult { code: i32 },
    /// Server's answer to a bind request.
    BindResult { code: i32, nid: Option<NodeId> },
    /// Periodic scheduling tick.
    Tick,
}

/// The routing state machine.
///
/// Synchronous and queue-agnostic: [`Router`] drives it from the event
/// loop, one event per turn. Holds the identity slot, the scheduler
/// gateway, and the collaborator handles.
pub struct RouterCore {
    identity: Arc<NodeIdentity>,
    gateway: SchedulerGateway,
    delegate: Arc<dyn RouterDelegate>,
    server: Arc<dyn ServerLink>,
    config: RouterConfig,
}

impl RouterCore {
    pub fn new(
        delegate: Arc<dyn RouterDelegate>,
        server: Arc<dyn ServerLink>,
        engine: Box<dyn PlacementEngine>,
        config: RouterConfig,
    ) -> Self {
        Self {
            identity: Arc::new(NodeIdentity::new()),
            gateway: SchedulerGateway::new(engine),
            delegate,
            server,
            config,
        }
    }

    pub fn gateway(&self) -> &SchedulerGateway {
        &self.gateway
    }

    pub fn identity(&self) -> &Arc<NodeIdentity> {
        &self.identity
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Process one queued event. Errors are logged and dropped here so
    /// one bad event never blocks the ones behind it.
    pub fn handle_event(&self, event: RouterEvent) {
        let result = match event {
            RouterEvent::Route {
                packet,
                from_server,
            } => self.route(packet, from_server),
            RouterEvent::ConnectResult { code } => self.on_connect_result(code),
            RouterEvent::BindResult { code, nid } => self.on_bind_result(code, nid),
            RouterEvent::Tick => {
                self.gateway.execute_tick();
                Ok(())
            }
        };

        if let Err(e) = result {
            error!(error = %e, "router event failed; dropping");
        }
    }

    /// Derive the login token and ask the server to verify the account.
    pub fn connect(&self, account: &str, credential: &str) -> RouterResult<()> {
        let token = derive_login_token(credential);
        debug!(account, "sending connect request");
        self.server.send_connect(account, &token)
    }

    /// Server verdict on the connect request: success triggers the bind
    /// request, failure notifies the owning service.
    pub fn on_connect_result(&self, code: i32) -> RouterResult<()> {
        if code != 0 {
            warn!(code, "connect refused by server");
            self.delegate.connect_status(false, &NodeAddr::Unset);
            return Ok(());
        }

        let current = self
            .identity
            .get()
            .map_or(NodeAddr::Unset, NodeAddr::Node);
        self.server.send_bind(&current, &self.config.display_name)
    }

    /// Server verdict on the bind request: success stores the assigned
    /// identity and records it with the placement engine, then notifies
    /// the owning service.
    pub fn on_bind_result(&self, code: i32, nid: Option<NodeId>) -> RouterResult<()> {
        if code != 0 {
            warn!(code, "bind refused by server");
            self.delegate.connect_status(false, &NodeAddr::Unset);
            return Ok(());
        }

        let nid = nid.ok_or_else(|| {
            RouterError::Protocol("bind succeeded without an assigned identity".to_string())
        })?;
        self.identity.bind(nid.clone())?;
        self.gateway.set_node_info(&nid, &self.config.display_name);
        info!(nid = %nid, "node identity bound");

        self.delegate.connect_status(true, &NodeAddr::Node(nid));
        Ok(())
    }

    /// Route one packet: normalize addressing, then deliver locally
    /// and/or forward outward per the module docs' decision table.
    pub fn route(&self, mut packet: CommandPacket, from_server: bool) -> RouterResult<()> {
        let my_nid = self.identity.get()?;

        if !from_server {
            self.normalize(&mut packet, &my_nid)?;
        }

        let deliver_here =
            packet.dst_nid.is_node(&my_nid) || packet.dst_nid == NodeAddr::Broadcast;
        if deliver_here {
            self.deliver_local(&packet)?;
        }

        if !packet.dst_nid.is_node(&my_nid) && !from_server {
            debug!(dst = %packet.dst_nid, module = %packet.module, "relaying packet to server");
            self.server.send_relay(&packet)?;
        } else if !deliver_here {
            // Server-delivered but addressed elsewhere: the server is
            // expected to route straight to the owner, so this is noise,
            // not an error.
            debug!(dst = %packet.dst_nid, module = %packet.module, "dropping misaddressed packet");
        }

        Ok(())
    }

    /// Build and route an outbound command on behalf of a local module.
    pub fn send_command(
        &self,
        pid: ProcessId,
        dst_nid: NodeAddr,
        src_nid: NodeAddr,
        module: Module,
        content: String,
    ) -> RouterResult<()> {
        let packet = CommandPacket::new(Some(pid), dst_nid, src_nid, module, content);
        self.route(packet, false)
    }

    /// True when the placement engine puts the GUI for `pid` on this
    /// node.
    pub fn is_gui_local(&self, pid: &ProcessId) -> RouterResult<bool> {
        let my_nid = self.identity.get()?;
        Ok(self
            .gateway
            .resolve_destination(pid, Module::Gui)
            .is_some_and(|owner| owner == my_nid))
    }

    /// Rewrite sentinel addressing on a locally sourced packet. Runs at
    /// most once per packet: afterwards the destination is concrete or
    /// broadcast and is never re-resolved.
    fn normalize(&self, packet: &mut CommandPacket, my_nid: &NodeId) -> RouterResult<()> {
        match packet.dst_nid {
            NodeAddr::Local => packet.dst_nid = NodeAddr::Node(my_nid.clone()),
            NodeAddr::Unset => {
                let pid = packet.pid.as_ref().ok_or_else(|| {
                    RouterError::Protocol(
                        "destination resolution requires a process id".to_string(),
                    )
                })?;
                let owner = self
                    .gateway
                    .resolve_destination(pid, packet.module)
                    .ok_or_else(|| RouterError::Unroutable {
                        pid: pid.clone(),
                        module: packet.module,
                    })?;
                packet.dst_nid = NodeAddr::Node(owner);
            }
            _ => {}
        }

        packet.src_nid = NodeAddr::Node(my_nid.clone());
        Ok(())
    }

    /// Dispatch to the local sink selected by the module tag.
    fn deliver_local(&self, packet: &CommandPacket) -> RouterResult<()> {
        debug!(module = %packet.module, "delivering packet locally");
        match packet.module {
            Module::Memory | Module::Vm => self.delegate.deliver_worker(packet),
            Module::Scheduler => self.gateway.receive_command(packet)?,
            Module::Controller => self.delegate.deliver_controller(packet),
            Module::Gui => self.delegate.deliver_gui(packet),
        }
        Ok(())
    }
}

/// Handle handed to the placement engine at init time.
///
/// Outbound commands enqueue instead of routing inline: the engine
/// calls while the gateway lock is held, and routing would re-enter it.
struct EngineHostHandle {
    tx: mpsc::UnboundedSender<RouterEvent>,
    identity: Arc<NodeIdentity>,
    delegate: Arc<dyn RouterDelegate>,
}

impl EngineHost for EngineHostHandle {
    fn create_vm(
        &self,
        pid: &ProcessId,
        root_tid: ThreadId,
        proc_addr: ProcAddr,
        master_nid: &NodeId,
        name: &str,
    ) {
        self.delegate
            .create_vm(pid, root_tid, proc_addr, master_nid, name);
    }

    fn create_gui(&self, pid: &ProcessId) {
        self.delegate.create_gui(pid);
    }

    fn send_command(
        &self,
        pid: ProcessId,
        dst_nid: NodeAddr,
        src_nid: NodeAddr,
        module: Module,
        content: String,
    ) {
        let packet = CommandPacket::new(Some(pid), dst_nid, src_nid, module, content);
        if self
            .tx
            .send(RouterEvent::Route {
                packet,
                from_server: false,
            })
            .is_err()
        {
            warn!("router queue is gone; engine command dropped");
        }
    }

    fn local_node(&self) -> RouterResult<NodeId> {
        self.identity.get()
    }
}

/// One node's command router.
///
/// Owns the event queue, its worker task, and the tick driver. Public
/// methods enqueue work; nothing runs on the caller's thread except
/// login-token derivation and read-only queries. Dropping the router
/// stops the worker and the tick driver.
pub struct Router {
    tx: mpsc::UnboundedSender<RouterEvent>,
    core: Arc<RouterCore>,
    worker: JoinHandle<()>,
    ticker: JoinHandle<()>,
}

impl Router {
    /// Build the router, initialize the placement engine, and start the
    /// event loop plus tick driver. Must run inside a tokio runtime.
    pub fn new(
        delegate: Arc<dyn RouterDelegate>,
        server: Arc<dyn ServerLink>,
        engine: Box<dyn PlacementEngine>,
        config: RouterConfig,
    ) -> RouterResult<Self> {
        config.validate()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let core = Arc::new(RouterCore::new(delegate.clone(), server, engine, config));

        // Engine setup happens on the startup path, before the queue
        // drains anything; this is why the gateway carries its own lock.
        let host = Arc::new(EngineHostHandle {
            tx: tx.clone(),
            identity: Arc::clone(core.identity()),
            delegate,
        });
        core.gateway().init(host)?;

        let worker = tokio::spawn(run_event_loop(rx, Arc::clone(&core)));
        let ticker = tick::spawn(tx.clone(), core.config().tick_interval());
        info!(
            display_name = %core.config().display_name,
            tick_interval_ms = core.config().tick_interval_ms,
            "router started"
        );

        Ok(Self {
            tx,
            core,
            worker,
            ticker,
        })
    }

    /// Derive the login token and send the connect request. Surfaces
    /// derivation/transport failures to the caller instead of
    /// swallowing them.
    pub fn connect(&self, account: &str, credential: &str) -> RouterResult<()> {
        self.core.connect(account, credential)
    }

    /// Network-layer callback: server verdict on the connect request.
    pub fn on_connect_result(&self, code: i32) {
        self.enqueue(RouterEvent::ConnectResult { code });
    }

    /// Network-layer callback: server verdict on the bind request.
    pub fn on_bind_result(&self, code: i32, nid: Option<NodeId>) {
        self.enqueue(RouterEvent::BindResult { code, nid });
    }

    /// Network-layer callback: a packet delivered by the server.
    pub fn on_packet_received(&self, packet: CommandPacket) {
        self.route(packet, true);
    }

    /// Queue one packet for routing.
    pub fn route(&self, packet: CommandPacket, from_server: bool) {
        self.enqueue(RouterEvent::Route {
            packet,
            from_server,
        });
    }

    /// Build and queue an outbound command from a local module.
    pub fn send_command(
        &self,
        pid: ProcessId,
        dst_nid: NodeAddr,
        src_nid: NodeAddr,
        module: Module,
        content: String,
    ) {
        let packet = CommandPacket::new(Some(pid), dst_nid, src_nid, module, content);
        self.route(packet, false);
    }

    /// This node's bound identity; fails loudly before the bind
    /// handshake completes.
    pub fn local_node(&self) -> RouterResult<NodeId> {
        self.core.identity().get()
    }

    /// True when the placement engine puts the GUI for `pid` here.
    pub fn is_gui_local(&self, pid: &ProcessId) -> RouterResult<bool> {
        self.core.is_gui_local(pid)
    }

    fn enqueue(&self, event: RouterEvent) {
        if self.tx.send(event).is_err() {
            warn!("router queue is gone; event dropped");
        }
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.ticker.abort();
        self.worker.abort();
    }
}

async fn run_event_loop(mut rx: mpsc::UnboundedReceiver<RouterEvent>, core: Arc<RouterCore>) {
    debug!("router event loop started");
    while let Some(event) = rx.recv().await {
        core.handle_event(event);
    }
    debug!("router event loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{RecordingDelegate, RecordingServer, StubEngine};
    use crate::RouterConfig;

    fn bound_core() -> (
        RouterCore,
        Arc<crate::test_util::EngineProbe>,
        Arc<RecordingDelegate>,
        Arc<RecordingServer>,
    ) {
        let delegate = Arc::new(RecordingDelegate::default());
        let server = Arc::new(RecordingServer::default());
        let (engine, probe) = StubEngine::new();
        let core = RouterCore::new(
            delegate.clone(),
            server.clone(),
            Box::new(engine),
            RouterConfig::with_display_name("test-node"),
        );
        core.on_bind_result(0, Some(NodeId::new("node-1"))).unwrap();
        delegate.clear();
        (core, probe, delegate, server)
    }

    fn packet(pid: &str, dst: NodeAddr, module: Module) -> CommandPacket {
        CommandPacket::new(
            Some(ProcessId::new(pid)),
            dst,
            NodeAddr::Unset,
            module,
            "{}".to_string(),
        )
    }

    #[test]
    fn local_sentinel_rewrites_to_bound_identity() {
        let (core, _probe, delegate, server) = bound_core();

        core.route(packet("p1", NodeAddr::Local, Module::Controller), false)
            .unwrap();

        let delivered = delegate.controller_packets();
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].dst_nid.is_node(&NodeId::new("node-1")));
        assert!(delivered[0].src_nid.is_node(&NodeId::new("node-1")));
        assert!(server.relayed().is_empty());
    }

    #[test]
    fn source_node_cannot_be_forged() {
        let (core, probe, _delegate, server) = bound_core();
        probe.route(ProcessId::new("p1"), Module::Vm, NodeId::new("node-2"));

        let mut p = packet("p1", NodeAddr::Unset, Module::Vm);
        p.src_nid = NodeAddr::Node(NodeId::new("node-99"));
        core.route(p, false).unwrap();

        let relayed = server.relayed();
        assert_eq!(relayed.len(), 1);
        assert!(relayed[0].src_nid.is_node(&NodeId::new("node-1")));
    }

    #[test]
    fn unset_destination_resolves_through_engine_once() {
        let (core, probe, _delegate, server) = bound_core();
        probe.route(ProcessId::new("p1"), Module::Scheduler, NodeId::new("node-1"));

        core.route(packet("p1", NodeAddr::Unset, Module::Scheduler), false)
            .unwrap();

        assert_eq!(
            probe.resolutions(),
            vec![(ProcessId::new("p1"), Module::Scheduler)]
        );
        let received = probe.received_commands();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, ProcessId::new("p1"));
        assert!(received[0].1.is_node(&NodeId::new("node-1")));
        assert!(received[0].2.is_node(&NodeId::new("node-1")));
        assert_eq!(received[0].4, "{}");
        assert!(server.relayed().is_empty());
    }

    #[test]
    fn unset_destination_without_pid_is_a_protocol_error() {
        let (core, _probe, delegate, server) = bound_core();

        let mut p = packet("p1", NodeAddr::Unset, Module::Vm);
        p.pid = None;
        let err = core.route(p, false).unwrap_err();

        assert!(matches!(err, RouterError::Protocol(_)));
        assert!(delegate.worker_packets().is_empty());
        assert!(server.relayed().is_empty());
    }

    #[test]
    fn unknown_owner_is_a_routing_error() {
        let (core, _probe, _delegate, server) = bound_core();

        let err = core
            .route(packet("orphan", NodeAddr::Unset, Module::Vm), false)
            .unwrap_err();

        assert!(matches!(err, RouterError::Unroutable { .. }));
        assert!(server.relayed().is_empty());
    }

    #[test]
    fn broadcast_fans_out_locally_and_outward() {
        let (core, _probe, delegate, server) = bound_core();

        core.route(packet("p1", NodeAddr::Broadcast, Module::Gui), false)
            .unwrap();

        assert_eq!(delegate.gui_packets().len(), 1);
        assert_eq!(server.relayed().len(), 1);
        assert_eq!(server.relayed()[0].dst_nid, NodeAddr::Broadcast);
    }

    #[test]
    fn remote_destination_forwards_without_local_delivery() {
        let (core, _probe, delegate, server) = bound_core();

        core.route(
            packet("p1", NodeAddr::Node(NodeId::new("node-2")), Module::Memory),
            false,
        )
        .unwrap();

        assert!(delegate.worker_packets().is_empty());
        assert_eq!(server.relayed().len(), 1);
    }

    #[test]
    fn server_packet_for_this_node_is_delivered_not_forwarded() {
        let (core, _probe, delegate, server) = bound_core();

        let p = CommandPacket::new(
            Some(ProcessId::new("p1")),
            NodeAddr::Node(NodeId::new("node-1")),
            NodeAddr::Node(NodeId::new("node-2")),
            Module::Memory,
            "{}".to_string(),
        );
        core.route(p, true).unwrap();

        assert_eq!(delegate.worker_packets().len(), 1);
        assert!(server.relayed().is_empty());
    }

    #[test]
    fn server_packet_for_another_node_is_dropped() {
        let (core, _probe, delegate, server) = bound_core();

        let p = CommandPacket::new(
            Some(ProcessId::new("p1")),
            NodeAddr::Node(NodeId::new("node-3")),
            NodeAddr::Node(NodeId::new("node-2")),
            Module::Controller,
            "{}".to_string(),
        );
        core.route(p, true).unwrap();

        assert!(delegate.controller_packets().is_empty());
        assert!(delegate.worker_packets().is_empty());
        assert!(delegate.gui_packets().is_empty());
        assert!(server.relayed().is_empty());
    }

    #[test]
    fn server_addressing_is_not_rewritten() {
        let (core, _probe, delegate, server) = bound_core();

        // A server-delivered packet keeps its source; only local modules
        // get stamped.
        let p = CommandPacket::new(
            Some(ProcessId::new("p1")),
            NodeAddr::Node(NodeId::new("node-1")),
            NodeAddr::Node(NodeId::new("node-2")),
            Module::Gui,
            "{}".to_string(),
        );
        core.route(p, true).unwrap();

        let delivered = delegate.gui_packets();
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].src_nid.is_node(&NodeId::new("node-2")));
        assert!(server.relayed().is_empty());
    }

    #[test]
    fn routing_before_bind_fails_loudly() {
        let delegate = Arc::new(RecordingDelegate::default());
        let server = Arc::new(RecordingServer::default());
        let (engine, _probe) = StubEngine::new();
        let core = RouterCore::new(
            delegate,
            server,
            Box::new(engine),
            RouterConfig::default(),
        );

        let err = core
            .route(packet("p1", NodeAddr::Local, Module::Vm), false)
            .unwrap_err();
        assert!(matches!(err, RouterError::IdentityUnbound));
    }

    #[test]
    fn memory_and_vm_share_the_worker_sink() {
        let (core, _probe, delegate, _server) = bound_core();

        core.route(packet("p1", NodeAddr::Local, Module::Memory), false)
            .unwrap();
        core.route(packet("p1", NodeAddr::Local, Module::Vm), false)
            .unwrap();

        assert_eq!(delegate.worker_packets().len(), 2);
    }

    #[test]
    fn is_gui_local_compares_engine_answer_with_identity() {
        let (core, probe, _delegate, _server) = bound_core();
        probe.route(ProcessId::new("p1"), Module::Gui, NodeId::new("node-1"));
        probe.route(ProcessId::new("p2"), Module::Gui, NodeId::new("node-2"));

        assert!(core.is_gui_local(&ProcessId::new("p1")).unwrap());
        assert!(!core.is_gui_local(&ProcessId::new("p2")).unwrap());
        assert!(!core.is_gui_local(&ProcessId::new("p3")).unwrap());
    }

    #[test]
    fn failed_event_does_not_poison_the_queue() {
        let (core, _probe, delegate, _server) = bound_core();

        // Unroutable packet fails...
        core.handle_event(RouterEvent::Route {
            packet: packet("orphan", NodeAddr::Unset, Module::Vm),
            from_server: false,
        });
        // ...and the next event still processes normally.
        core.handle_event(RouterEvent::Route {
            packet: packet("p1", NodeAddr::Local, Module::Controller),
            from_server: false,
        });

        assert_eq!(delegate.controller_packets().len(), 1);
    }

    #[test]
    fn two_tick_events_advance_the_engine_twice() {
        let (core, probe, _delegate, _server) = bound_core();

        core.handle_event(RouterEvent::Tick);
        core.handle_event(RouterEvent::Tick);

        assert_eq!(probe.ticks(), 2);
        assert_eq!(probe.max_concurrent_entries(), 1);
    }

    #[test]
    fn connect_failure_notifies_disconnected() {
        let (core, _probe, delegate, server) = bound_core();

        core.on_connect_result(1).unwrap();

        assert_eq!(delegate.statuses(), vec![(false, NodeAddr::Unset)]);
        assert!(server.binds().is_empty());
    }

    #[test]
    fn bind_without_identity_is_a_protocol_error() {
        let delegate = Arc::new(RecordingDelegate::default());
        let server = Arc::new(RecordingServer::default());
        let (engine, _probe) = StubEngine::new();
        let core = RouterCore::new(
            delegate,
            server,
            Box::new(engine),
            RouterConfig::default(),
        );

        let err = core.on_bind_result(0, None).unwrap_err();
        assert!(matches!(err, RouterError::Protocol(_)));
    }
}
