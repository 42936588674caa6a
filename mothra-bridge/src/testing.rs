//! Recording host runtime and engine used by the unit tests.

use std::collections::HashSet;
use std::ffi::CString;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread::{self, ThreadId};

use crate::bytes::ByteView;
use crate::egress::NativeEngine;
use crate::error::{HostError, Result};
use crate::registry::CallbackSet;
use crate::runtime::{AttachStatus, HostArg, HostRuntime, MethodId, MethodTarget};

#[derive(Default)]
pub struct MockHost {
    attached: Mutex<HashSet<ThreadId>>,
    attaches: AtomicUsize,
    detaches: AtomicUsize,
    violations: AtomicUsize,
    fail_attach: AtomicBool,
    fail_lookups: AtomicBool,
    already_attached: AtomicBool,
    raise: Mutex<Option<String>>,
    lookup_fault: Mutex<Option<String>>,
    pending: Mutex<Option<String>>,
    methods: Mutex<Vec<MethodTarget>>,
    calls: Mutex<Vec<(MethodTarget, Vec<HostArg>)>>,
    journal: Mutex<Vec<String>>,
}

impl MockHost {
    pub fn fail_attach(&self, on: bool) {
        self.fail_attach.store(on, Ordering::SeqCst);
    }

    pub fn fail_lookups(&self, on: bool) {
        self.fail_lookups.store(on, Ordering::SeqCst);
    }

    pub fn report_already_attached(&self, on: bool) {
        self.already_attached.store(on, Ordering::SeqCst);
    }

    pub fn raise_on_invoke(&self, fault: Option<&str>) {
        *self.raise.lock().unwrap() = fault.map(str::to_owned);
    }

    /// Fault left pending by a failed lookup, as a JNI class or method lookup does.
    pub fn raise_on_lookup(&self, fault: Option<&str>) {
        *self.lookup_fault.lock().unwrap() = fault.map(str::to_owned);
    }

    pub fn attaches(&self) -> usize {
        self.attaches.load(Ordering::SeqCst)
    }

    pub fn detaches(&self) -> usize {
        self.detaches.load(Ordering::SeqCst)
    }

    pub fn live_attachments(&self) -> usize {
        self.attached.lock().unwrap().len()
    }

    /// Attach/detach/call sequences that a correct bridge never produces.
    pub fn violations(&self) -> usize {
        self.violations.load(Ordering::SeqCst)
    }

    pub fn pending_fault(&self) -> Option<String> {
        self.pending.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<(MethodTarget, Vec<HostArg>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    fn note(&self, entry: &str) {
        self.journal.lock().unwrap().push(entry.to_owned());
    }
}

impl HostRuntime for MockHost {
    fn attach_current_thread(&self) -> Result<AttachStatus, HostError> {
        if self.fail_attach.load(Ordering::SeqCst) {
            return Err(HostError::AttachFailed("vm refused".into()));
        }
        if self.already_attached.load(Ordering::SeqCst) {
            return Ok(AttachStatus::AlreadyAttached);
        }
        self.note("attach");
        if !self.attached.lock().unwrap().insert(thread::current().id()) {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        self.attaches.fetch_add(1, Ordering::SeqCst);
        Ok(AttachStatus::Attached)
    }

    fn detach_current_thread(&self) {
        self.note("detach");
        if !self.attached.lock().unwrap().remove(&thread::current().id()) {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        self.detaches.fetch_add(1, Ordering::SeqCst);
    }

    fn resolve_static_method(&self, target: &MethodTarget) -> Result<MethodId, HostError> {
        self.note("resolve");
        if self.fail_lookups.load(Ordering::SeqCst) {
            if let Some(fault) = self.lookup_fault.lock().unwrap().clone() {
                *self.pending.lock().unwrap() = Some(fault);
            }
            return Err(HostError::NotFound(target.to_string()));
        }
        let mut methods = self.methods.lock().unwrap();
        let idx = match methods.iter().position(|m| m == target) {
            Some(i) => i,
            None => {
                methods.push(target.clone());
                methods.len() - 1
            }
        };
        Ok(MethodId::new(idx as u64 + 1))
    }

    fn call_static_void(&self, method: MethodId, args: &[HostArg]) -> Result<(), HostError> {
        self.note("call");
        let attached = self.attached.lock().unwrap().contains(&thread::current().id());
        if !attached && !self.already_attached.load(Ordering::SeqCst) {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        let target = self
            .methods
            .lock()
            .unwrap()
            .get(method.raw() as usize - 1)
            .cloned()
            .ok_or_else(|| HostError::Invocation("unknown method id".into()))?;
        self.calls.lock().unwrap().push((target, args.to_vec()));
        if let Some(fault) = self.raise.lock().unwrap().clone() {
            *self.pending.lock().unwrap() = Some(fault);
        }
        Ok(())
    }

    fn take_pending_fault(&self) -> Option<String> {
        let fault = self.pending.lock().unwrap().take();
        self.note(if fault.is_some() {
            "take_fault:cleared"
        } else {
            "take_fault:none"
        });
        fault
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    RegisterHandlers,
    Start {
        constants: Vec<String>,
        args: Vec<String>,
    },
    Gossip {
        topic: Vec<u8>,
        data: Vec<u8>,
    },
    RpcRequest {
        method: Vec<u8>,
        peer: Vec<u8>,
        data: Vec<u8>,
    },
    RpcResponse {
        method: Vec<u8>,
        peer: Vec<u8>,
        data: Vec<u8>,
    },
}

#[derive(Default)]
pub struct MockEngine {
    calls: Mutex<Vec<EngineCall>>,
}

impl MockEngine {
    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    fn push(&self, call: EngineCall) {
        self.calls.lock().unwrap().push(call);
    }
}

fn lossy(values: &[CString]) -> Vec<String> {
    values
        .iter()
        .map(|s| s.to_string_lossy().into_owned())
        .collect()
}

impl NativeEngine for MockEngine {
    fn register_handlers(&self, _handlers: CallbackSet) -> Result<()> {
        self.push(EngineCall::RegisterHandlers);
        Ok(())
    }

    fn start(&self, constants: &[CString], args: &[CString]) -> Result<()> {
        self.push(EngineCall::Start {
            constants: lossy(constants),
            args: lossy(args),
        });
        Ok(())
    }

    fn send_gossip(&self, topic: ByteView<'_>, data: ByteView<'_>) -> Result<()> {
        self.push(EngineCall::Gossip {
            topic: topic.as_bytes().to_vec(),
            data: data.as_bytes().to_vec(),
        });
        Ok(())
    }

    fn send_rpc_request(&self, method: ByteView<'_>, peer: ByteView<'_>, data: ByteView<'_>) -> Result<()> {
        self.push(EngineCall::RpcRequest {
            method: method.as_bytes().to_vec(),
            peer: peer.as_bytes().to_vec(),
            data: data.as_bytes().to_vec(),
        });
        Ok(())
    }

    fn send_rpc_response(&self, method: ByteView<'_>, peer: ByteView<'_>, data: ByteView<'_>) -> Result<()> {
        self.push(EngineCall::RpcResponse {
            method: method.as_bytes().to_vec(),
            peer: peer.as_bytes().to_vec(),
            data: data.as_bytes().to_vec(),
        });
        Ok(())
    }
}
