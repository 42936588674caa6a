//! Outbound path: host calls marshalled and forwarded to the engine entry points.
//! One call in, one call out. No batching, no queuing; backpressure is the engine's business.

use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::bytes::{to_c_strings, ByteView};
use crate::error::{BridgeError, Result};
use crate::registry::CallbackSet;

/// Entry points of the native networking engine.
pub trait NativeEngine: Send + Sync {
    /// Hand the engine the functions it calls for inbound events.
    fn register_handlers(&self, handlers: CallbackSet) -> Result<()>;

    /// Argument strings are owned by the caller for the duration of this call only.
    fn start(&self, constants: &[CString], args: &[CString]) -> Result<()>;

    fn send_gossip(&self, topic: ByteView<'_>, data: ByteView<'_>) -> Result<()>;

    fn send_rpc_request(&self, method: ByteView<'_>, peer: ByteView<'_>, data: ByteView<'_>) -> Result<()>;

    fn send_rpc_response(&self, method: ByteView<'_>, peer: ByteView<'_>, data: ByteView<'_>) -> Result<()>;
}

/// Client identification handed to the engine at start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientConstants {
    pub client_name: Option<String>,
    pub client_version: Option<String>,
    pub protocol_version: Option<String>,
}

impl ClientConstants {
    /// Positional form used by the C entry point: name, client version, protocol version.
    /// Missing or empty entries mean "not provided".
    pub fn from_positional(values: &[String]) -> Self {
        let pick = |i: usize| values.get(i).filter(|s| !s.is_empty()).cloned();
        Self {
            client_name: pick(0),
            client_version: pick(1),
            protocol_version: pick(2),
        }
    }

    pub fn to_positional(&self) -> [&str; 3] {
        [
            self.client_name.as_deref().unwrap_or(""),
            self.client_version.as_deref().unwrap_or(""),
            self.protocol_version.as_deref().unwrap_or(""),
        ]
    }
}

pub struct Egress {
    engine: Arc<dyn NativeEngine>,
    /// Claimed by the one caller allowed to start the engine.
    starting: AtomicBool,
    /// Set once the engine has started; sends are rejected until then.
    started: AtomicBool,
}

impl Egress {
    pub fn new(engine: Arc<dyn NativeEngine>) -> Self {
        Self {
            engine,
            starting: AtomicBool::new(false),
            started: AtomicBool::new(false),
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Register `handlers` with the engine and start it. At most once per process.
    pub fn start(&self, constants: &ClientConstants, args: &[String], handlers: CallbackSet) -> Result<()> {
        let c_constants = to_c_strings(&constants.to_positional())?;
        let c_args = to_c_strings(args)?;
        if self
            .starting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BridgeError::AlreadyStarted);
        }
        info!(
            client = constants.client_name.as_deref().unwrap_or("-"),
            args = ?args,
            "starting network"
        );
        let result = self
            .engine
            .register_handlers(handlers)
            .and_then(|()| self.engine.start(&c_constants, &c_args));
        match result {
            Ok(()) => self.started.store(true, Ordering::Release),
            Err(_) => self.starting.store(false, Ordering::Release),
        }
        result
    }

    fn ensure_started(&self) -> Result<()> {
        if self.is_started() {
            Ok(())
        } else {
            Err(BridgeError::NotStarted)
        }
    }

    pub fn send_gossip(&self, topic: ByteView<'_>, data: ByteView<'_>) -> Result<()> {
        self.ensure_started()?;
        debug!(topic = %topic.display(), len = data.len(), "send gossip");
        self.engine.send_gossip(topic, data)
    }

    pub fn send_rpc_request(&self, method: ByteView<'_>, peer: ByteView<'_>, data: ByteView<'_>) -> Result<()> {
        self.ensure_started()?;
        debug!(method = %method.display(), peer = %peer.display(), len = data.len(), "send rpc request");
        self.engine.send_rpc_request(method, peer, data)
    }

    pub fn send_rpc_response(&self, method: ByteView<'_>, peer: ByteView<'_>, data: ByteView<'_>) -> Result<()> {
        self.ensure_started()?;
        debug!(method = %method.display(), peer = %peer.display(), len = data.len(), "send rpc response");
        self.engine.send_rpc_response(method, peer, data)
    }
}
