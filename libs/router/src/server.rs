//! Outbound link to the coordinating server.

use crate::RouterResult;
use fabric_types::{CommandPacket, NodeAddr};

/// The transport layer's send surface, as seen by the router.
///
/// All three sends are fire-and-forget: the router never waits for an
/// acknowledgment, and the server's answers come back later through
/// [`Router::on_connect_result`](crate::Router::on_connect_result) /
/// [`Router::on_bind_result`](crate::Router::on_bind_result) /
/// [`Router::on_packet_received`](crate::Router::on_packet_received).
/// An `Err` means the link could not accept the send at all (for
/// example, the connection is down), not that the server rejected it.
pub trait ServerLink: Send + Sync {
    /// Request account verification with a derived login token.
    fn send_connect(&self, account: &str, token: &str) -> RouterResult<()>;

    /// Request a node identity. `current` is [`NodeAddr::Unset`] on the
    /// first handshake of a process lifetime.
    fn send_bind(&self, current: &NodeAddr, display_name: &str) -> RouterResult<()>;

    /// Hand a packet to the server for delivery to its destination
    /// node, or to all nodes for a broadcast destination.
    fn send_relay(&self, packet: &CommandPacket) -> RouterResult<()>;
}
