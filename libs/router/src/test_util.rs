//! Recording fakes for the router's collaborators.
//!
//! Used by this crate's unit tests and the integration suite; also
//! handy for services testing their own delegate wiring without a real
//! placement engine or server connection.

use crate::gateway::{EngineHost, PlacementEngine};
use crate::server::ServerLink;
use crate::sink::RouterDelegate;
use crate::{RouterError, RouterResult};
use fabric_types::{CommandPacket, Module, NodeAddr, NodeId, ProcAddr, ProcessId, ThreadId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared observation window into a [`StubEngine`].
///
/// Tracks every call the gateway forwards, plus the maximum number of
/// concurrent entries ever observed, which a correctly locked gateway
/// keeps at one.
#[derive(Default)]
pub struct EngineProbe {
    routes: Mutex<HashMap<(ProcessId, Module), NodeId>>,
    resolutions: Mutex<Vec<(ProcessId, Module)>>,
    received: Mutex<Vec<(ProcessId, NodeAddr, NodeAddr, Module, String)>>,
    node_info: Mutex<Option<(NodeId, String)>>,
    host: Mutex<Option<Arc<dyn EngineHost>>>,
    ticks: AtomicUsize,
    tick_delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl EngineProbe {
    /// Program the owner node returned for a process/module pair.
    pub fn route(&self, pid: ProcessId, module: Module, owner: NodeId) {
        self.routes.lock().insert((pid, module), owner);
    }

    /// Stretch each tick so concurrent entry attempts overlap.
    pub fn set_tick_delay(&self, delay: Duration) {
        *self.tick_delay.lock() = delay;
    }

    pub fn resolutions(&self) -> Vec<(ProcessId, Module)> {
        self.resolutions.lock().clone()
    }

    pub fn received_commands(&self) -> Vec<(ProcessId, NodeAddr, NodeAddr, Module, String)> {
        self.received.lock().clone()
    }

    pub fn node_info(&self) -> Option<(NodeId, String)> {
        self.node_info.lock().clone()
    }

    pub fn host(&self) -> Option<Arc<dyn EngineHost>> {
        self.host.lock().clone()
    }

    pub fn ticks(&self) -> usize {
        self.ticks.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_entries(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn enter(&self) -> EntryGuard<'_> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        EntryGuard(self)
    }
}

struct EntryGuard<'a>(&'a EngineProbe);

impl Drop for EntryGuard<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Scripted placement engine backed by an [`EngineProbe`].
pub struct StubEngine {
    probe: Arc<EngineProbe>,
}

impl StubEngine {
    pub fn new() -> (Self, Arc<EngineProbe>) {
        let probe = Arc::new(EngineProbe::default());
        (
            Self {
                probe: Arc::clone(&probe),
            },
            probe,
        )
    }
}

impl PlacementEngine for StubEngine {
    fn init(&mut self, host: Arc<dyn EngineHost>) {
        let _entered = self.probe.enter();
        *self.probe.host.lock() = Some(host);
    }

    fn set_node_info(&mut self, nid: &NodeId, display_name: &str) {
        let _entered = self.probe.enter();
        *self.probe.node_info.lock() = Some((nid.clone(), display_name.to_string()));
    }

    fn resolve_destination(&mut self, pid: &ProcessId, module: Module) -> Option<NodeId> {
        let _entered = self.probe.enter();
        self.probe
            .resolutions
            .lock()
            .push((pid.clone(), module));
        self.probe.routes.lock().get(&(pid.clone(), module)).cloned()
    }

    fn receive_command(
        &mut self,
        pid: &ProcessId,
        dst_nid: &NodeAddr,
        src_nid: &NodeAddr,
        module: Module,
        content: &str,
    ) {
        let _entered = self.probe.enter();
        self.probe.received.lock().push((
            pid.clone(),
            dst_nid.clone(),
            src_nid.clone(),
            module,
            content.to_string(),
        ));
    }

    fn execute_tick(&mut self) {
        let _entered = self.probe.enter();
        let delay = *self.probe.tick_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.probe.ticks.fetch_add(1, Ordering::SeqCst);
    }
}

/// Engine host that accepts callbacks and discards them.
pub struct NullHost;

impl EngineHost for NullHost {
    fn create_vm(
        &self,
        _pid: &ProcessId,
        _root_tid: ThreadId,
        _proc_addr: ProcAddr,
        _master_nid: &NodeId,
        _name: &str,
    ) {
    }

    fn create_gui(&self, _pid: &ProcessId) {}

    fn send_command(
        &self,
        _pid: ProcessId,
        _dst_nid: NodeAddr,
        _src_nid: NodeAddr,
        _module: Module,
        _content: String,
    ) {
    }

    fn local_node(&self) -> RouterResult<NodeId> {
        Err(RouterError::IdentityUnbound)
    }
}

/// Server link that records every send.
#[derive(Default)]
pub struct RecordingServer {
    connects: Mutex<Vec<(String, String)>>,
    binds: Mutex<Vec<(NodeAddr, String)>>,
    relays: Mutex<Vec<CommandPacket>>,
    failing: AtomicBool,
}

impl RecordingServer {
    /// Make every subsequent send fail with a transport error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn connects(&self) -> Vec<(String, String)> {
        self.connects.lock().clone()
    }

    pub fn binds(&self) -> Vec<(NodeAddr, String)> {
        self.binds.lock().clone()
    }

    pub fn relayed(&self) -> Vec<CommandPacket> {
        self.relays.lock().clone()
    }

    fn check(&self) -> RouterResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(RouterError::Transport("link is down".to_string()))
        } else {
            Ok(())
        }
    }
}

impl ServerLink for RecordingServer {
    fn send_connect(&self, account: &str, token: &str) -> RouterResult<()> {
        self.check()?;
        self.connects
            .lock()
            .push((account.to_string(), token.to_string()));
        Ok(())
    }

    fn send_bind(&self, current: &NodeAddr, display_name: &str) -> RouterResult<()> {
        self.check()?;
        self.binds
            .lock()
            .push((current.clone(), display_name.to_string()));
        Ok(())
    }

    fn send_relay(&self, packet: &CommandPacket) -> RouterResult<()> {
        self.check()?;
        self.relays.lock().push(packet.clone());
        Ok(())
    }
}

/// Delegate that records every notification and delivery.
#[derive(Default)]
pub struct RecordingDelegate {
    statuses: Mutex<Vec<(bool, NodeAddr)>>,
    vms: Mutex<Vec<(ProcessId, ThreadId, ProcAddr, NodeId, String)>>,
    guis: Mutex<Vec<ProcessId>>,
    worker: Mutex<Vec<CommandPacket>>,
    controller: Mutex<Vec<CommandPacket>>,
    gui: Mutex<Vec<CommandPacket>>,
}

impl RecordingDelegate {
    pub fn statuses(&self) -> Vec<(bool, NodeAddr)> {
        self.statuses.lock().clone()
    }

    pub fn created_vms(&self) -> Vec<(ProcessId, ThreadId, ProcAddr, NodeId, String)> {
        self.vms.lock().clone()
    }

    pub fn created_guis(&self) -> Vec<ProcessId> {
        self.guis.lock().clone()
    }

    pub fn worker_packets(&self) -> Vec<CommandPacket> {
        self.worker.lock().clone()
    }

    pub fn controller_packets(&self) -> Vec<CommandPacket> {
        self.controller.lock().clone()
    }

    pub fn gui_packets(&self) -> Vec<CommandPacket> {
        self.gui.lock().clone()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.statuses.lock().clear();
        self.vms.lock().clear();
        self.guis.lock().clear();
        self.worker.lock().clear();
        self.controller.lock().clear();
        self.gui.lock().clear();
    }
}

impl RouterDelegate for RecordingDelegate {
    fn connect_status(&self, connected: bool, nid: &NodeAddr) {
        self.statuses.lock().push((connected, nid.clone()));
    }

    fn create_vm(
        &self,
        pid: &ProcessId,
        root_tid: ThreadId,
        proc_addr: ProcAddr,
        master_nid: &NodeId,
        name: &str,
    ) {
        self.vms.lock().push((
            pid.clone(),
            root_tid,
            proc_addr,
            master_nid.clone(),
            name.to_string(),
        ));
    }

    fn create_gui(&self, pid: &ProcessId) {
        self.guis.lock().push(pid.clone());
    }

    fn deliver_worker(&self, packet: &CommandPacket) {
        self.worker.lock().push(packet.clone());
    }

    fn deliver_controller(&self, packet: &CommandPacket) {
        self.controller.lock().push(packet.clone());
    }

    fn deliver_gui(&self, packet: &CommandPacket) {
        self.gui.lock().push(packet.clone());
    }
}
