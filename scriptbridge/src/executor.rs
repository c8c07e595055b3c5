//! Executor capability.
//!
//! The script engine is reached only through [`Executor`]; adapters over a
//! concrete embedding implement it and report their failures as `anyhow`
//! errors since those come from foreign code.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::callback::NativeCallback;
use crate::correlator::{Reply, RequestId};
use crate::protocol::CallEnvelope;
use crate::resource::{ResourceRequest, ResourceResolver, RetCode, UriResource};

/// Opaque id of one live executor instance. `NULL` means none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuntimeHandle(u64);

impl RuntimeHandle {
    pub const NULL: RuntimeHandle = RuntimeHandle(0);

    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for RuntimeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// The bridge's current handle, readable without the lifecycle lock.
#[derive(Debug, Clone, Default)]
pub struct SharedHandle(Arc<AtomicU64>);

impl SharedHandle {
    pub fn load(&self) -> RuntimeHandle {
        RuntimeHandle(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, handle: RuntimeHandle) {
        self.0.store(handle.0, Ordering::Release);
    }

    /// Reset to `NULL`, returning the previous handle.
    pub fn take(&self) -> RuntimeHandle {
        RuntimeHandle(self.0.swap(0, Ordering::AcqRel))
    }
}

#[derive(Debug, Clone)]
pub struct InitParams {
    /// Host global config as UTF-16LE JSON.
    pub global_config: Vec<u8>,
    pub single_thread_mode: bool,
    pub low_memory_mode: bool,
    pub enable_binary_serialization: bool,
    pub is_dev_module: bool,
    pub group_id: i64,
}

pub struct ScriptRequest {
    pub uri: String,
    /// Host-side source loader, if the script lives in host assets.
    pub loader: Option<Arc<dyn ResourceResolver>>,
    pub can_use_code_cache: bool,
    /// Per-tag cache directory; `None` runs without a code cache.
    pub code_cache_dir: Option<PathBuf>,
}

impl fmt::Debug for ScriptRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptRequest")
            .field("uri", &self.uri)
            .field("loader", &self.loader.is_some())
            .field("can_use_code_cache", &self.can_use_code_cache)
            .field("code_cache_dir", &self.code_cache_dir)
            .finish()
    }
}

pub trait Executor: Send + Sync {
    fn init(&self, params: InitParams) -> anyhow::Result<RuntimeHandle>;

    fn run_script(
        &self,
        request: &ScriptRequest,
        handle: RuntimeHandle,
        callback: Option<NativeCallback>,
    ) -> anyhow::Result<bool>;

    fn dispatch_call(
        &self,
        call: &CallEnvelope<'_>,
        handle: RuntimeHandle,
        callback: Option<NativeCallback>,
    );

    fn destroy(&self, handle: RuntimeHandle, low_memory_mode: bool);

    /// Deliver the result of an executor-issued async fetch.
    fn notify_resource_ready(&self, resource: UriResource, handle: RuntimeHandle, request_id: u64);

    /// Walk the executor's own delegate chain synchronously.
    fn resolve_uri_sync(&self, uri: &str, handle: RuntimeHandle) -> UriResource;

    /// Walk the executor's own chain; the result comes back through
    /// `Bridge::on_next_ready` with the same `request_id`.
    fn resolve_uri_async(&self, uri: &str, handle: RuntimeHandle, request_id: RequestId);

    fn engine_version(&self) -> Option<String> {
        None
    }
}

/// The executor's delegate chain seen as a resolver, for host fallback.
pub struct ExecutorChain {
    executor: Arc<dyn Executor>,
    handle: SharedHandle,
}

impl ExecutorChain {
    pub fn new(executor: Arc<dyn Executor>, handle: SharedHandle) -> Self {
        Self { executor, handle }
    }
}

impl ResourceResolver for ExecutorChain {
    fn resolve_sync(&self, request: &ResourceRequest) -> UriResource {
        let handle = self.handle.load();
        if handle.is_null() {
            return UriResource::with_code(RetCode::ResourceNotFound);
        }
        self.executor.resolve_uri_sync(&request.uri, handle)
    }

    fn resolve_async(&self, request: ResourceRequest, reply: Reply) {
        let handle = self.handle.load();
        if handle.is_null() {
            reply.send(UriResource::with_code(RetCode::ResourceNotFound));
            return;
        }
        // The entry stays registered; `on_next_ready` completes it.
        let request_id = reply.detach();
        self.executor
            .resolve_uri_async(&request.uri, handle, request_id);
    }
}
