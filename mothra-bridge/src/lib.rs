//! Bridge between the mothra p2p engine and a managed host runtime (JVM and the like).
//! Engine events are delivered to static listener methods on the host; host calls are
//! forwarded to the engine. No networking here; bytes pass through unmodified.

pub mod bridge;
pub mod bytes;
pub mod config;
pub mod dispatch;
pub mod egress;
pub mod error;
pub mod ffi;
pub mod logging;
pub mod registry;
pub mod runtime;

#[cfg(test)]
mod testing;

pub use bridge::{Bridge, LifecycleState};
pub use bytes::{ByteView, HostByteArray};
pub use config::BridgeConfig;
pub use dispatch::{EventKind, HostDispatcher, Listener, RpcKind};
pub use egress::{ClientConstants, NativeEngine};
pub use error::{BridgeError, HostError, Result};
pub use registry::{CallbackRegistry, CallbackSet, Delivery, EventHandler};
pub use runtime::{AttachStatus, HostArg, HostRuntime, MethodId, MethodTarget, RuntimeHandle};
