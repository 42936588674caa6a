//! Process-wide host runtime handle and scoped per-thread attachment.
//!
//! A native thread that wants to call into the host attaches, resolves a static method by
//! fixed name and signature, invokes it and detaches again. [`Attachment`] ties that
//! sequence to a scope so the detach happens on every exit path, early returns included.

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

use tracing::{trace, warn};

use crate::bytes::HostByteArray;
use crate::error::{BridgeError, HostError, Result};

/// Fixed class/method/signature triple of a host-side static method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodTarget {
    pub class: String,
    pub method: String,
    pub signature: String,
}

impl MethodTarget {
    pub fn new(class: impl Into<String>, method: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            method: method.into(),
            signature: signature.into(),
        }
    }
}

impl fmt::Display for MethodTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.class, self.method, self.signature)
    }
}

/// Opaque id of a resolved host method. Only meaningful to the runtime that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId(u64);

impl MethodId {
    pub fn new(raw: u64) -> Self {
        MethodId(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Argument passed to a host static method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostArg {
    Bytes(HostByteArray),
    Int(i32),
}

/// Result of attaching the current thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachStatus {
    /// The thread was attached by this call and must be detached afterwards.
    Attached,
    /// The thread was attached already (a host thread, or a nested dispatch); leave it attached.
    AlreadyAttached,
}

/// The managed host runtime, seen from native code.
pub trait HostRuntime: Send + Sync {
    fn attach_current_thread(&self) -> Result<AttachStatus, HostError>;

    fn detach_current_thread(&self);

    fn resolve_static_method(&self, target: &MethodTarget) -> Result<MethodId, HostError>;

    /// Synchronous call; blocks until the host handler returns.
    fn call_static_void(&self, method: MethodId, args: &[HostArg]) -> Result<(), HostError>;

    /// Take and clear the fault raised by the last invocation, if any.
    fn take_pending_fault(&self) -> Option<String>;
}

/// Write-once reference to the host runtime, captured by the `Init` event.
#[derive(Default)]
pub struct RuntimeHandle {
    runtime: OnceLock<Arc<dyn HostRuntime>>,
}

impl RuntimeHandle {
    pub const fn new() -> Self {
        Self {
            runtime: OnceLock::new(),
        }
    }

    pub fn capture(&self, runtime: Arc<dyn HostRuntime>) -> Result<()> {
        self.runtime
            .set(runtime)
            .map_err(|_| BridgeError::AlreadyInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.runtime.get().is_some()
    }

    pub fn get(&self) -> Result<&dyn HostRuntime> {
        self.runtime
            .get()
            .map(|rt| rt.as_ref())
            .ok_or(BridgeError::Uninitialized)
    }
}

thread_local! {
    static ATTACH_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// A native thread's attachment to the host runtime. Detaches on drop.
///
/// Not `Send`: an attachment belongs to the thread that acquired it.
pub struct Attachment<'r> {
    runtime: &'r dyn HostRuntime,
    status: AttachStatus,
    _thread_bound: PhantomData<*const ()>,
}

impl<'r> Attachment<'r> {
    /// Attach the calling thread. Fails with `Uninitialized` before the runtime was captured.
    pub fn acquire(handle: &'r RuntimeHandle) -> Result<Self> {
        let runtime = handle.get()?;
        let status = if ATTACH_DEPTH.with(|d| d.get()) > 0 {
            AttachStatus::AlreadyAttached
        } else {
            runtime.attach_current_thread()?
        };
        ATTACH_DEPTH.with(|d| d.set(d.get() + 1));
        trace!(?status, "thread attached");
        Ok(Attachment {
            runtime,
            status,
            _thread_bound: PhantomData,
        })
    }

    pub fn status(&self) -> AttachStatus {
        self.status
    }

    /// Resolve `target`. A failed lookup may leave a fault pending (a missing class, say);
    /// it is cleared here.
    pub fn locate(&self, target: &MethodTarget) -> Result<MethodId> {
        self.runtime.resolve_static_method(target).map_err(|source| {
            self.clear_fault("listener lookup raised");
            BridgeError::LookupFailed {
                target: target.to_string(),
                source,
            }
        })
    }

    /// Invoke and then clear any fault the handler left pending, so none escapes into native code.
    pub fn invoke(&self, method: MethodId, args: &[HostArg]) -> Result<()> {
        let result = self.runtime.call_static_void(method, args);
        self.clear_fault("host handler raised");
        result.map_err(BridgeError::from)
    }

    fn clear_fault(&self, what: &'static str) {
        if let Some(fault) = self.runtime.take_pending_fault() {
            warn!(%fault, "{what}; fault cleared");
        }
    }
}

impl Drop for Attachment<'_> {
    fn drop(&mut self) {
        ATTACH_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
        if self.status == AttachStatus::Attached {
            self.runtime.detach_current_thread();
            trace!("thread detached");
        }
    }
}
