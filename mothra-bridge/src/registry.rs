//! Write-once registry of the handlers that receive inbound engine events.

use std::os::raw::c_int;
use std::sync::{Arc, OnceLock};

use tracing::warn;

use crate::bytes::ByteView;
use crate::dispatch::{EventKind, RpcKind};
use crate::error::{BridgeError, Result};

/// Engine event: a peer was discovered.
pub type DiscoveredPeerFn = unsafe extern "C" fn(peer: *const u8, peer_length: c_int);

/// Engine event: a gossip message arrived on a topic.
pub type ReceiveGossipFn =
    unsafe extern "C" fn(topic: *const u8, topic_length: c_int, data: *const u8, data_length: c_int);

/// Engine event: an RPC request (0) or response (1) arrived from a peer.
pub type ReceiveRpcFn = unsafe extern "C" fn(
    method: *const u8,
    method_length: c_int,
    req_resp: c_int,
    peer: *const u8,
    peer_length: c_int,
    data: *const u8,
    data_length: c_int,
);

/// What happened to one inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Not delivered; the reason was logged.
    Dropped,
}

/// Receiver of inbound engine events.
pub trait EventHandler: Send + Sync {
    fn discovered_peer(&self, peer: ByteView<'_>) -> Result<Delivery>;

    fn receive_gossip(&self, topic: ByteView<'_>, data: ByteView<'_>) -> Result<Delivery>;

    fn receive_rpc(
        &self,
        method: ByteView<'_>,
        kind: RpcKind,
        peer: ByteView<'_>,
        data: ByteView<'_>,
    ) -> Result<Delivery>;
}

/// Three native function pointers, as supplied by hosts that can be called from C directly.
#[derive(Clone, Copy)]
pub struct CallbackSet {
    pub on_peer_discovered: DiscoveredPeerFn,
    pub on_gossip: ReceiveGossipFn,
    pub on_rpc: ReceiveRpcFn,
}

impl std::fmt::Debug for CallbackSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSet")
            .field("on_peer_discovered", &(self.on_peer_discovered as usize))
            .field("on_gossip", &(self.on_gossip as usize))
            .field("on_rpc", &(self.on_rpc as usize))
            .finish()
    }
}

impl EventHandler for CallbackSet {
    fn discovered_peer(&self, peer: ByteView<'_>) -> Result<Delivery> {
        let (peer, peer_len) = peer.to_raw()?;
        unsafe { (self.on_peer_discovered)(peer, peer_len) };
        Ok(Delivery::Delivered)
    }

    fn receive_gossip(&self, topic: ByteView<'_>, data: ByteView<'_>) -> Result<Delivery> {
        let (topic, topic_len) = topic.to_raw()?;
        let (data, data_len) = data.to_raw()?;
        unsafe { (self.on_gossip)(topic, topic_len, data, data_len) };
        Ok(Delivery::Delivered)
    }

    fn receive_rpc(
        &self,
        method: ByteView<'_>,
        kind: RpcKind,
        peer: ByteView<'_>,
        data: ByteView<'_>,
    ) -> Result<Delivery> {
        let (method, method_len) = method.to_raw()?;
        let (peer, peer_len) = peer.to_raw()?;
        let (data, data_len) = data.to_raw()?;
        unsafe { (self.on_rpc)(method, method_len, kind.as_raw(), peer, peer_len, data, data_len) };
        Ok(Delivery::Delivered)
    }
}

/// Holds the event handler. Set exactly once; reads after that are lock-free.
#[derive(Default)]
pub struct CallbackRegistry {
    handler: OnceLock<Arc<dyn EventHandler>>,
}

impl CallbackRegistry {
    pub const fn new() -> Self {
        Self {
            handler: OnceLock::new(),
        }
    }

    /// Store the handler. A second registration is rejected and the first one is kept.
    pub fn register(&self, handler: Arc<dyn EventHandler>) -> Result<()> {
        self.handler.set(handler).map_err(|_| {
            warn!("rejected second handler registration");
            BridgeError::AlreadyRegistered
        })
    }

    pub fn is_registered(&self) -> bool {
        self.handler.get().is_some()
    }

    fn handler(&self, kind: EventKind) -> Result<&Arc<dyn EventHandler>> {
        self.handler.get().ok_or_else(|| {
            warn!(event = kind.as_str(), "event arrived before handlers were registered");
            BridgeError::Unregistered
        })
    }

    pub fn discovered_peer(&self, peer: ByteView<'_>) -> Result<Delivery> {
        self.handler(EventKind::DiscoveredPeer)?.discovered_peer(peer)
    }

    pub fn receive_gossip(&self, topic: ByteView<'_>, data: ByteView<'_>) -> Result<Delivery> {
        self.handler(EventKind::ReceiveGossip)?.receive_gossip(topic, data)
    }

    pub fn receive_rpc(
        &self,
        method: ByteView<'_>,
        kind: RpcKind,
        peer: ByteView<'_>,
        data: ByteView<'_>,
    ) -> Result<Delivery> {
        self.handler(EventKind::ReceiveRpc)?.receive_rpc(method, kind, peer, data)
    }
}
