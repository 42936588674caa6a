//! The bridge handle: owns the callback registry, the runtime handle and the egress path.
//!
//! Lifecycle: `Uninitialized` until [`Bridge::init`] captures the host runtime, `Initialized`
//! until [`Bridge::start`] hands the engine its trampolines and starts it, `Running` after.

use std::sync::Arc;

use tracing::{info, warn};

use crate::bytes::ByteView;
use crate::config::BridgeConfig;
use crate::dispatch::{HostDispatcher, Listener, RpcKind};
use crate::egress::{ClientConstants, Egress, NativeEngine};
use crate::error::{BridgeError, Result};
use crate::registry::{CallbackRegistry, CallbackSet, Delivery, EventHandler};
use crate::runtime::{HostRuntime, RuntimeHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Initialized,
    Running,
}

pub struct Bridge {
    runtime: Arc<RuntimeHandle>,
    registry: CallbackRegistry,
    egress: Egress,
    listener: Listener,
    trampolines: CallbackSet,
}

impl Bridge {
    pub fn new(engine: Arc<dyn NativeEngine>, config: &BridgeConfig) -> Self {
        Self {
            runtime: Arc::new(RuntimeHandle::new()),
            registry: CallbackRegistry::new(),
            egress: Egress::new(engine),
            listener: Listener::from_config(config),
            trampolines: crate::ffi::TRAMPOLINES,
        }
    }

    pub fn state(&self) -> LifecycleState {
        if self.egress.is_started() {
            LifecycleState::Running
        } else if self.runtime.is_initialized() {
            LifecycleState::Initialized
        } else {
            LifecycleState::Uninitialized
        }
    }

    /// `Init` event: capture the host runtime and route inbound events to its listener.
    pub fn init(&self, runtime: Arc<dyn HostRuntime>) -> Result<()> {
        self.runtime.capture(runtime)?;
        let dispatcher = HostDispatcher::new(self.runtime.clone(), self.listener.clone());
        match self.registry.register(Arc::new(dispatcher)) {
            Ok(()) => {}
            Err(BridgeError::AlreadyRegistered) => {
                warn!("native handlers already registered; host listener not installed");
            }
            Err(e) => return Err(e),
        }
        info!(listener = %self.listener.discovered_peer.class, "host runtime initialized");
        Ok(())
    }

    /// For hosts that receive events through native function pointers instead of `init`.
    pub fn register_handlers(&self, handler: Arc<dyn EventHandler>) -> Result<()> {
        self.registry.register(handler)
    }

    pub fn start(&self, constants: &ClientConstants, args: &[String]) -> Result<()> {
        if !self.registry.is_registered() {
            return Err(BridgeError::Unregistered);
        }
        self.egress.start(constants, args, self.trampolines)
    }

    pub fn send_gossip(&self, topic: ByteView<'_>, data: ByteView<'_>) -> Result<()> {
        self.egress.send_gossip(topic, data)
    }

    pub fn send_rpc_request(&self, method: ByteView<'_>, peer: ByteView<'_>, data: ByteView<'_>) -> Result<()> {
        self.egress.send_rpc_request(method, peer, data)
    }

    pub fn send_rpc_response(&self, method: ByteView<'_>, peer: ByteView<'_>, data: ByteView<'_>) -> Result<()> {
        self.egress.send_rpc_response(method, peer, data)
    }

    pub fn discovered_peer(&self, peer: ByteView<'_>) -> Result<Delivery> {
        self.registry.discovered_peer(peer)
    }

    pub fn receive_gossip(&self, topic: ByteView<'_>, data: ByteView<'_>) -> Result<Delivery> {
        self.registry.receive_gossip(topic, data)
    }

    pub fn receive_rpc(
        &self,
        method: ByteView<'_>,
        kind: RpcKind,
        peer: ByteView<'_>,
        data: ByteView<'_>,
    ) -> Result<Delivery> {
        self.registry.receive_rpc(method, kind, peer, data)
    }
}
