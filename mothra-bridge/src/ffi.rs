//! C ABI for linking mothra-bridge into host shims (JNI glue, NDK, P/Invoke).
//!
//! Host side: `mothra_bridge_init` once with the host and engine tables, then
//! `mothra_bridge_network_start`, then the `mothra_bridge_send_*` calls. The prefix keeps these
//! apart from the engine's own `network_start`/`send_*` symbols when both are linked. Engine side: the `discovered_peer`, `receive_gossip` and
//! `receive_rpc` trampolines, which the bridge hands to the engine at start.
//! Status-returning functions return 0 on success and -1 on error.

use std::ffi::{c_void, CStr, CString};
use std::os::raw::{c_char, c_int};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use tracing::{error, info, warn};

use crate::bridge::Bridge;
use crate::bytes::{from_c_string_array, from_host_array, ByteView};
use crate::dispatch::{EventKind, RpcKind};
use crate::egress::{ClientConstants, NativeEngine};
use crate::error::{BridgeError, HostError, Result};
use crate::registry::{CallbackSet, Delivery, DiscoveredPeerFn, ReceiveGossipFn, ReceiveRpcFn};
use crate::runtime::{AttachStatus, HostArg, HostRuntime, MethodId, MethodTarget};
use crate::{config, logging};

static BRIDGE: OnceLock<Bridge> = OnceLock::new();

/// The engine-facing trampolines exported by this library.
pub const TRAMPOLINES: CallbackSet = CallbackSet {
    on_peer_discovered: discovered_peer,
    on_gossip: receive_gossip,
    on_rpc: receive_rpc,
};

pub const HOST_VALUE_BYTES: c_int = 0;
pub const HOST_VALUE_INT: c_int = 1;

/// One argument of a host static call. `bytes`/`len` are set for byte arrays (never null),
/// `int_value` for ints. Byte storage is only valid during the call.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct HostValue {
    pub tag: c_int,
    pub bytes: *const u8,
    pub len: c_int,
    pub int_value: c_int,
}

impl HostValue {
    fn from_arg(arg: &HostArg) -> Result<Self, HostError> {
        match arg {
            HostArg::Bytes(array) => {
                let (bytes, len) = from_host_array(array)
                    .to_raw()
                    .map_err(|e| HostError::Invocation(e.to_string()))?;
                Ok(HostValue {
                    tag: HOST_VALUE_BYTES,
                    bytes,
                    len,
                    int_value: 0,
                })
            }
            HostArg::Int(v) => Ok(HostValue {
                tag: HOST_VALUE_INT,
                bytes: std::ptr::null(),
                len: 0,
                int_value: *v,
            }),
        }
    }
}

/// Host runtime functions supplied by the host shim.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct HostVTable {
    /// Passed back as the first argument of every function below (e.g. a `JavaVM*`).
    pub context: *mut c_void,
    /// 0: attached by this call; 1: thread was already attached; negative: failure.
    pub attach_current_thread: unsafe extern "C" fn(context: *mut c_void) -> c_int,
    pub detach_current_thread: unsafe extern "C" fn(context: *mut c_void),
    /// Non-zero method id, or 0 when the class or method cannot be resolved.
    pub resolve_static_method: unsafe extern "C" fn(
        context: *mut c_void,
        class: *const c_char,
        method: *const c_char,
        signature: *const c_char,
    ) -> u64,
    /// 0 on success.
    pub call_static_void:
        unsafe extern "C" fn(context: *mut c_void, method: u64, args: *const HostValue, n_args: c_int) -> c_int,
    /// Describe and clear the pending fault. Null when none; otherwise freed with `free_fault`.
    pub take_pending_fault: unsafe extern "C" fn(context: *mut c_void) -> *mut c_char,
    pub free_fault: unsafe extern "C" fn(context: *mut c_void, fault: *mut c_char),
}

// SAFETY: the host shim guarantees its functions may be called from any native thread and
// that `context` stays valid for the life of the process.
unsafe impl Send for HostVTable {}
unsafe impl Sync for HostVTable {}

fn c_string(s: &str) -> Result<CString, HostError> {
    CString::new(s).map_err(|_| HostError::NotFound(format!("{s:?} contains NUL")))
}

impl HostRuntime for HostVTable {
    fn attach_current_thread(&self) -> Result<AttachStatus, HostError> {
        match unsafe { (self.attach_current_thread)(self.context) } {
            0 => Ok(AttachStatus::Attached),
            1 => Ok(AttachStatus::AlreadyAttached),
            code => Err(HostError::AttachFailed(format!("host returned {code}"))),
        }
    }

    fn detach_current_thread(&self) {
        unsafe { (self.detach_current_thread)(self.context) }
    }

    fn resolve_static_method(&self, target: &MethodTarget) -> Result<MethodId, HostError> {
        let class = c_string(&target.class)?;
        let method = c_string(&target.method)?;
        let signature = c_string(&target.signature)?;
        let id = unsafe {
            (self.resolve_static_method)(self.context, class.as_ptr(), method.as_ptr(), signature.as_ptr())
        };
        if id == 0 {
            return Err(HostError::NotFound(target.to_string()));
        }
        Ok(MethodId::new(id))
    }

    fn call_static_void(&self, method: MethodId, args: &[HostArg]) -> Result<(), HostError> {
        let values = args
            .iter()
            .map(HostValue::from_arg)
            .collect::<Result<Vec<_>, _>>()?;
        let rc = unsafe {
            (self.call_static_void)(self.context, method.raw(), values.as_ptr(), values.len() as c_int)
        };
        if rc != 0 {
            return Err(HostError::Invocation(format!("host returned {rc}")));
        }
        Ok(())
    }

    fn take_pending_fault(&self) -> Option<String> {
        let raw = unsafe { (self.take_pending_fault)(self.context) };
        if raw.is_null() {
            return None;
        }
        let fault = unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned();
        unsafe { (self.free_fault)(self.context, raw) };
        Some(fault)
    }
}

/// Entry points of the native engine.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct EngineVTable {
    pub register_handlers: unsafe extern "C" fn(
        discovered_peer: DiscoveredPeerFn,
        receive_gossip: ReceiveGossipFn,
        receive_rpc: ReceiveRpcFn,
    ),
    pub network_start: unsafe extern "C" fn(
        client_constants: *const *const c_char,
        num_client_constants: c_int,
        args: *const *const c_char,
        num_args: c_int,
    ),
    pub send_gossip: unsafe extern "C" fn(topic: *const u8, topic_length: c_int, data: *const u8, data_length: c_int),
    pub send_rpc_request: unsafe extern "C" fn(
        method: *const u8,
        method_length: c_int,
        peer: *const u8,
        peer_length: c_int,
        data: *const u8,
        data_length: c_int,
    ),
    pub send_rpc_response: unsafe extern "C" fn(
        method: *const u8,
        method_length: c_int,
        peer: *const u8,
        peer_length: c_int,
        data: *const u8,
        data_length: c_int,
    ),
}

fn argv(values: &[CString]) -> Result<(Vec<*const c_char>, c_int)> {
    let n = c_int::try_from(values.len())
        .map_err(|_| BridgeError::InvalidArgument(format!("{} arguments", values.len())))?;
    Ok((values.iter().map(|s| s.as_ptr()).collect(), n))
}

impl NativeEngine for EngineVTable {
    fn register_handlers(&self, handlers: CallbackSet) -> Result<()> {
        unsafe { (self.register_handlers)(handlers.on_peer_discovered, handlers.on_gossip, handlers.on_rpc) };
        Ok(())
    }

    fn start(&self, constants: &[CString], args: &[CString]) -> Result<()> {
        let (constants, n_constants) = argv(constants)?;
        let (args, n_args) = argv(args)?;
        unsafe { (self.network_start)(constants.as_ptr(), n_constants, args.as_ptr(), n_args) };
        Ok(())
    }

    fn send_gossip(&self, topic: ByteView<'_>, data: ByteView<'_>) -> Result<()> {
        let (topic, topic_len) = topic.to_raw()?;
        let (data, data_len) = data.to_raw()?;
        unsafe { (self.send_gossip)(topic, topic_len, data, data_len) };
        Ok(())
    }

    fn send_rpc_request(&self, method: ByteView<'_>, peer: ByteView<'_>, data: ByteView<'_>) -> Result<()> {
        let (method, method_len) = method.to_raw()?;
        let (peer, peer_len) = peer.to_raw()?;
        let (data, data_len) = data.to_raw()?;
        unsafe { (self.send_rpc_request)(method, method_len, peer, peer_len, data, data_len) };
        Ok(())
    }

    fn send_rpc_response(&self, method: ByteView<'_>, peer: ByteView<'_>, data: ByteView<'_>) -> Result<()> {
        let (method, method_len) = method.to_raw()?;
        let (peer, peer_len) = peer.to_raw()?;
        let (data, data_len) = data.to_raw()?;
        unsafe { (self.send_rpc_response)(method, method_len, peer, peer_len, data, data_len) };
        Ok(())
    }
}

/// Run `f`, turning a panic into `fallback` so it never unwinds into C.
fn guarded<R>(entry: &'static str, fallback: R, f: impl FnOnce() -> R) -> R {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        error!(entry, "panic caught at C boundary");
        fallback
    })
}

fn status(entry: &'static str, result: Result<()>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(e) => {
            warn!(entry, error = %e, "call rejected");
            -1
        }
    }
}

fn bridge() -> Result<&'static Bridge> {
    BRIDGE.get().ok_or(BridgeError::Uninitialized)
}

/// Returns the library version as a NUL-terminated string with static lifetime.
#[no_mangle]
pub extern "C" fn mothra_bridge_version() -> *const c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr() as *const c_char
}

/// Initialize once per process. `host` may be null for hosts that register native
/// handlers with `mothra_bridge_register_handlers` instead. `engine` must not be null.
/// Returns 0 on success, -1 on a null engine or a second call.
#[no_mangle]
pub extern "C" fn mothra_bridge_init(host: *const HostVTable, engine: *const EngineVTable) -> c_int {
    guarded("mothra_bridge_init", -1, || {
        if engine.is_null() {
            warn!("mothra_bridge_init: null engine table");
            return -1;
        }
        let config = config::load();
        logging::init(&config.log_filter);
        let engine = unsafe { *engine };
        if BRIDGE.set(Bridge::new(Arc::new(engine), &config)).is_err() {
            return status("mothra_bridge_init", Err(BridgeError::AlreadyInitialized));
        }
        if host.is_null() {
            info!("initialized without host runtime");
            return 0;
        }
        let host = unsafe { *host };
        status("mothra_bridge_init", bridge().and_then(|b| b.init(Arc::new(host))))
    })
}

/// Start the engine. `client_constants` are name, client version and protocol version;
/// empty strings mean "not provided". All strings are copied. Returns 0 on success,
/// -1 before init, before handlers are registered, or on a second start.
#[no_mangle]
pub extern "C" fn mothra_bridge_network_start(
    client_constants: *const *const c_char,
    num_client_constants: c_int,
    args: *const *const c_char,
    num_args: c_int,
) -> c_int {
    guarded("mothra_bridge_network_start", -1, || {
        let result = (|| {
            let constants = unsafe { from_c_string_array(client_constants, num_client_constants) }?;
            let args = unsafe { from_c_string_array(args, num_args) }?;
            bridge()?.start(&ClientConstants::from_positional(&constants), &args)
        })();
        status("mothra_bridge_network_start", result)
    })
}

/// Publish `data` on `topic`. Both buffers are borrowed for this call only.
/// Returns 0 on success, -1 before start.
#[no_mangle]
pub extern "C" fn mothra_bridge_send_gossip(
    topic: *const u8,
    topic_length: c_int,
    data: *const u8,
    data_length: c_int,
) -> c_int {
    guarded("mothra_bridge_send_gossip", -1, || {
        let topic = unsafe { ByteView::from_raw(topic, topic_length) };
        let data = unsafe { ByteView::from_raw(data, data_length) };
        status("mothra_bridge_send_gossip", bridge().and_then(|b| b.send_gossip(topic, data)))
    })
}

/// Send an RPC request for `method` to `peer`. Buffers are borrowed for this call only.
/// Returns 0 on success, -1 before start.
#[no_mangle]
pub extern "C" fn mothra_bridge_send_rpc_request(
    method: *const u8,
    method_length: c_int,
    peer: *const u8,
    peer_length: c_int,
    data: *const u8,
    data_length: c_int,
) -> c_int {
    guarded("mothra_bridge_send_rpc_request", -1, || {
        let method = unsafe { ByteView::from_raw(method, method_length) };
        let peer = unsafe { ByteView::from_raw(peer, peer_length) };
        let data = unsafe { ByteView::from_raw(data, data_length) };
        status(
            "mothra_bridge_send_rpc_request",
            bridge().and_then(|b| b.send_rpc_request(method, peer, data)),
        )
    })
}

/// Answer an RPC for `method` from `peer`. Buffers are borrowed for this call only.
/// Returns 0 on success, -1 before start.
#[no_mangle]
pub extern "C" fn mothra_bridge_send_rpc_response(
    method: *const u8,
    method_length: c_int,
    peer: *const u8,
    peer_length: c_int,
    data: *const u8,
    data_length: c_int,
) -> c_int {
    guarded("mothra_bridge_send_rpc_response", -1, || {
        let method = unsafe { ByteView::from_raw(method, method_length) };
        let peer = unsafe { ByteView::from_raw(peer, peer_length) };
        let data = unsafe { ByteView::from_raw(data, data_length) };
        status(
            "mothra_bridge_send_rpc_response",
            bridge().and_then(|b| b.send_rpc_response(method, peer, data)),
        )
    })
}

/// Register native handlers for inbound events. Only once, and only when
/// `mothra_bridge_init` was called without a host table. Returns 0 on success, -1 otherwise.
#[no_mangle]
pub extern "C" fn mothra_bridge_register_handlers(
    discovered_peer: DiscoveredPeerFn,
    receive_gossip: ReceiveGossipFn,
    receive_rpc: ReceiveRpcFn,
) -> c_int {
    guarded("mothra_bridge_register_handlers", -1, || {
        let handlers = CallbackSet {
            on_peer_discovered: discovered_peer,
            on_gossip: receive_gossip,
            on_rpc: receive_rpc,
        };
        status(
            "mothra_bridge_register_handlers",
            bridge().and_then(|b| b.register_handlers(Arc::new(handlers))),
        )
    })
}

/// Deliver one inbound event. Ordering errors abort the process; anything else is logged.
fn deliver(kind: EventKind, f: impl FnOnce(&Bridge) -> Result<Delivery>) {
    guarded(kind.as_str(), (), || {
        let Some(bridge) = BRIDGE.get() else {
            warn!(event = kind.as_str(), "event arrived before mothra_bridge_init; dropped");
            return;
        };
        match f(bridge) {
            Ok(_) | Err(BridgeError::Unregistered) => {}
            Err(e) if e.is_ordering() => {
                error!(event = kind.as_str(), error = %e, "dispatch ordering violation; aborting");
                std::process::abort();
            }
            Err(e) => warn!(event = kind.as_str(), error = %e, "event dropped"),
        }
    })
}

/// Engine event: `peer` was discovered. The buffer is copied before the host sees it.
#[no_mangle]
pub extern "C" fn discovered_peer(peer: *const u8, peer_length: c_int) {
    let peer = unsafe { ByteView::from_raw(peer, peer_length) };
    deliver(EventKind::DiscoveredPeer, |b| b.discovered_peer(peer));
}

/// Engine event: gossip on `topic`. Buffers are copied before the host sees them.
#[no_mangle]
pub extern "C" fn receive_gossip(topic: *const u8, topic_length: c_int, data: *const u8, data_length: c_int) {
    let topic = unsafe { ByteView::from_raw(topic, topic_length) };
    let data = unsafe { ByteView::from_raw(data, data_length) };
    deliver(EventKind::ReceiveGossip, |b| b.receive_gossip(topic, data));
}

/// Engine event: RPC request (`req_resp` 0) or response (1). Other flag values are
/// logged and the event dropped.
#[no_mangle]
pub extern "C" fn receive_rpc(
    method: *const u8,
    method_length: c_int,
    req_resp: c_int,
    peer: *const u8,
    peer_length: c_int,
    data: *const u8,
    data_length: c_int,
) {
    let method = unsafe { ByteView::from_raw(method, method_length) };
    let peer = unsafe { ByteView::from_raw(peer, peer_length) };
    let data = unsafe { ByteView::from_raw(data, data_length) };
    deliver(EventKind::ReceiveRpc, |b| {
        b.receive_rpc(method, RpcKind::from_raw(req_resp)?, peer, data)
    });
}
