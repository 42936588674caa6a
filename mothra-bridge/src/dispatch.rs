//! Inbound dispatch into the host runtime.
//!
//! Every event kind goes through the same trampoline: attach, locate the listener method,
//! invoke it with the marshalled arguments, detach. Kinds differ only in their target and
//! in the argument list, which is built in the fixed left-to-right order of the listener
//! signatures.

use std::os::raw::c_int;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::bytes::{to_host_array, ByteView};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::registry::{Delivery, EventHandler};
use crate::runtime::{Attachment, HostArg, MethodTarget, RuntimeHandle};

/// RPC direction flag as carried across the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcKind {
    Request = 0,
    Response = 1,
}

impl RpcKind {
    pub fn from_raw(raw: c_int) -> Result<Self> {
        match raw {
            0 => Ok(RpcKind::Request),
            1 => Ok(RpcKind::Response),
            other => Err(BridgeError::InvalidRpcKind(other)),
        }
    }

    pub fn as_raw(self) -> c_int {
        self as c_int
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    DiscoveredPeer,
    ReceiveGossip,
    ReceiveRpc,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::DiscoveredPeer => "discovered_peer",
            EventKind::ReceiveGossip => "receive_gossip",
            EventKind::ReceiveRpc => "receive_rpc",
        }
    }
}

pub const DISCOVERED_PEER_METHOD: &str = "DiscoveredPeer";
pub const DISCOVERED_PEER_SIGNATURE: &str = "([B)V";
pub const RECEIVE_GOSSIP_METHOD: &str = "ReceiveGossip";
pub const RECEIVE_GOSSIP_SIGNATURE: &str = "([B[B)V";
pub const RECEIVE_RPC_METHOD: &str = "ReceiveRPC";
pub const RECEIVE_RPC_SIGNATURE: &str = "([BI[B[B)V";

/// Host-side listener methods, one per event kind.
///
/// Only the class varies. Method names and signatures must match the argument lists built
/// below, so they are fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listener {
    pub discovered_peer: MethodTarget,
    pub receive_gossip: MethodTarget,
    pub receive_rpc: MethodTarget,
}

impl Listener {
    pub fn new(class: &str) -> Self {
        Self {
            discovered_peer: MethodTarget::new(class, DISCOVERED_PEER_METHOD, DISCOVERED_PEER_SIGNATURE),
            receive_gossip: MethodTarget::new(class, RECEIVE_GOSSIP_METHOD, RECEIVE_GOSSIP_SIGNATURE),
            receive_rpc: MethodTarget::new(class, RECEIVE_RPC_METHOD, RECEIVE_RPC_SIGNATURE),
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(&config.listener_class)
    }

    pub fn target(&self, kind: EventKind) -> &MethodTarget {
        match kind {
            EventKind::DiscoveredPeer => &self.discovered_peer,
            EventKind::ReceiveGossip => &self.receive_gossip,
            EventKind::ReceiveRpc => &self.receive_rpc,
        }
    }
}

impl Default for Listener {
    fn default() -> Self {
        Self::from_config(&BridgeConfig::default())
    }
}

/// Delivers events by calling the listener's static methods on the host runtime.
pub struct HostDispatcher {
    runtime: Arc<RuntimeHandle>,
    listener: Listener,
}

impl HostDispatcher {
    pub fn new(runtime: Arc<RuntimeHandle>, listener: Listener) -> Self {
        Self { runtime, listener }
    }

    /// Attach, locate, invoke, detach. Only ordering errors are returned; every other
    /// failure is logged and the event dropped.
    pub fn dispatch(&self, kind: EventKind, args: &[HostArg]) -> Result<Delivery> {
        let attachment = match Attachment::acquire(&self.runtime) {
            Ok(a) => a,
            Err(e) if e.is_ordering() => return Err(e),
            Err(e) => {
                warn!(event = kind.as_str(), error = %e, "attach failed; event dropped");
                return Ok(Delivery::Dropped);
            }
        };
        let target = self.listener.target(kind);
        let method = match attachment.locate(target) {
            Ok(m) => m,
            Err(e) => {
                warn!(event = kind.as_str(), error = %e, "listener lookup failed; event dropped");
                return Ok(Delivery::Dropped);
            }
        };
        match attachment.invoke(method, args) {
            Ok(()) => {
                debug!(event = kind.as_str(), %target, "delivered");
                Ok(Delivery::Delivered)
            }
            Err(e) => {
                warn!(event = kind.as_str(), error = %e, "invocation failed; event dropped");
                Ok(Delivery::Dropped)
            }
        }
    }
}

fn bytes_arg(view: ByteView<'_>) -> HostArg {
    HostArg::Bytes(to_host_array(view))
}

impl EventHandler for HostDispatcher {
    fn discovered_peer(&self, peer: ByteView<'_>) -> Result<Delivery> {
        debug!(peer = %peer.display(), "discovered peer");
        self.dispatch(EventKind::DiscoveredPeer, &[bytes_arg(peer)])
    }

    fn receive_gossip(&self, topic: ByteView<'_>, data: ByteView<'_>) -> Result<Delivery> {
        debug!(topic = %topic.display(), len = data.len(), "gossip received");
        self.dispatch(EventKind::ReceiveGossip, &[bytes_arg(topic), bytes_arg(data)])
    }

    fn receive_rpc(
        &self,
        method: ByteView<'_>,
        kind: RpcKind,
        peer: ByteView<'_>,
        data: ByteView<'_>,
    ) -> Result<Delivery> {
        debug!(method = %method.display(), ?kind, peer = %peer.display(), len = data.len(), "rpc received");
        self.dispatch(
            EventKind::ReceiveRpc,
            &[
                bytes_arg(method),
                HostArg::Int(kind.as_raw()),
                bytes_arg(peer),
                bytes_arg(data),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes::HostByteArray;
    use crate::testing::MockHost;
    use std::thread;

    fn dispatcher(host: &Arc<MockHost>) -> HostDispatcher {
        let handle = Arc::new(RuntimeHandle::new());
        handle.capture(host.clone()).unwrap();
        HostDispatcher::new(handle, Listener::default())
    }

    fn bytes(s: &str) -> HostArg {
        HostArg::Bytes(HostByteArray::from_vec(s.as_bytes().to_vec()))
    }

    #[test]
    fn rpc_kind_raw_values() {
        assert_eq!(RpcKind::from_raw(0), Ok(RpcKind::Request));
        assert_eq!(RpcKind::from_raw(1), Ok(RpcKind::Response));
        assert_eq!(RpcKind::from_raw(7), Err(BridgeError::InvalidRpcKind(7)));
        assert_eq!(RpcKind::Response.as_raw(), 1);
    }

    #[test]
    fn default_listener_signatures() {
        let l = Listener::default();
        assert_eq!(l.discovered_peer.to_string(), "p2p/mothra/Mothra.DiscoveredPeer([B)V");
        assert_eq!(l.receive_gossip.to_string(), "p2p/mothra/Mothra.ReceiveGossip([B[B)V");
        assert_eq!(l.receive_rpc.to_string(), "p2p/mothra/Mothra.ReceiveRPC([BI[B[B)V");

        let other = Listener::new("net/p2p/Mothra");
        assert_eq!(other.receive_rpc.to_string(), "net/p2p/Mothra.ReceiveRPC([BI[B[B)V");
    }

    #[test]
    fn rpc_arguments_in_wire_order_with_empty_array() {
        let host = Arc::new(MockHost::default());
        let d = dispatcher(&host);
        let out = d
            .receive_rpc("ping".into(), RpcKind::Request, "peerXYZ".into(), ByteView::EMPTY)
            .unwrap();
        assert_eq!(out, Delivery::Delivered);
        let calls = host.calls();
        assert_eq!(calls.len(), 1);
        let (target, args) = &calls[0];
        assert_eq!(target.method, "ReceiveRPC");
        assert_eq!(
            args,
            &vec![
                bytes("ping"),
                HostArg::Int(0),
                bytes("peerXYZ"),
                HostArg::Bytes(HostByteArray::default()),
            ]
        );
    }

    #[test]
    fn gossip_and_peer_targets() {
        let host = Arc::new(MockHost::default());
        let d = dispatcher(&host);
        d.discovered_peer("16Uiu2HAmPeer".into()).unwrap();
        d.receive_gossip("/topic/a".into(), "hello".into()).unwrap();
        let calls = host.calls();
        assert_eq!(calls[0].0.method, "DiscoveredPeer");
        assert_eq!(calls[0].1, vec![bytes("16Uiu2HAmPeer")]);
        assert_eq!(calls[1].0.method, "ReceiveGossip");
        assert_eq!(calls[1].1, vec![bytes("/topic/a"), bytes("hello")]);
    }

    #[test]
    fn lookup_failure_drops_and_keeps_serving() {
        let host = Arc::new(MockHost::default());
        let d = dispatcher(&host);
        host.fail_lookups(true);
        for _ in 0..50 {
            let out = d.discovered_peer("p".into()).unwrap();
            assert_eq!(out, Delivery::Dropped);
        }
        assert_eq!(host.live_attachments(), 0);
        assert_eq!(host.attaches(), host.detaches());

        host.fail_lookups(false);
        assert_eq!(d.discovered_peer("p".into()).unwrap(), Delivery::Delivered);
        assert_eq!(host.calls().len(), 1);
    }

    #[test]
    fn lookup_fault_does_not_escape_to_attached_host_thread() {
        let host = Arc::new(MockHost::default());
        host.report_already_attached(true);
        host.fail_lookups(true);
        host.raise_on_lookup(Some("java.lang.NoClassDefFoundError"));
        let d = dispatcher(&host);
        assert_eq!(d.discovered_peer("p".into()).unwrap(), Delivery::Dropped);
        assert_eq!(host.pending_fault(), None);
        assert_eq!(host.detaches(), 0);
    }

    #[test]
    fn host_fault_does_not_escape() {
        let host = Arc::new(MockHost::default());
        host.raise_on_invoke(Some("java.lang.NullPointerException"));
        let d = dispatcher(&host);
        let out = d.receive_gossip("/t".into(), "x".into()).unwrap();
        assert_eq!(out, Delivery::Delivered);
        assert_eq!(host.pending_fault(), None);
        assert_eq!(host.live_attachments(), 0);
    }

    #[test]
    fn attach_failure_drops_event() {
        let host = Arc::new(MockHost::default());
        host.fail_attach(true);
        let d = dispatcher(&host);
        assert_eq!(d.discovered_peer("p".into()).unwrap(), Delivery::Dropped);
        assert_eq!(host.detaches(), 0);
    }

    #[test]
    fn dispatch_before_init_is_an_ordering_error() {
        let d = HostDispatcher::new(Arc::new(RuntimeHandle::new()), Listener::default());
        assert_eq!(d.discovered_peer("p".into()), Err(BridgeError::Uninitialized));
    }

    #[test]
    fn concurrent_trampolines_attach_independently() {
        let host = Arc::new(MockHost::default());
        let d = Arc::new(dispatcher(&host));
        let mut threads = Vec::new();
        for i in 0..8 {
            let d = d.clone();
            threads.push(thread::spawn(move || {
                for n in 0..200 {
                    let peer = format!("peer-{i}-{n}");
                    let out = match n % 3 {
                        0 => d.discovered_peer(peer.as_str().into()),
                        1 => d.receive_gossip("/topic/a".into(), peer.as_str().into()),
                        _ => d.receive_rpc(
                            "ping".into(),
                            RpcKind::Request,
                            peer.as_str().into(),
                            ByteView::EMPTY,
                        ),
                    };
                    assert_eq!(out, Ok(Delivery::Delivered));
                }
            }));
        }
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(host.calls().len(), 8 * 200);
        assert_eq!(host.live_attachments(), 0);
        assert_eq!(host.attaches(), 8 * 200);
        assert_eq!(host.detaches(), 8 * 200);
        assert_eq!(host.violations(), 0);
    }
}
