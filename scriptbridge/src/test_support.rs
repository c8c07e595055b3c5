//! Test doubles shared by the unit tests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak, mpsc as std_mpsc};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::{Notify, mpsc};

use crate::bridge::Bridge;
use crate::callback::{BridgeCallback, NativeCallback};
use crate::correlator::RequestId;
use crate::debug::{DebugSession, DebugTransport};
use crate::error::{BridgeError, FetchError};
use crate::executor::{Executor, InitParams, RuntimeHandle, ScriptRequest};
use crate::protocol::CallEnvelope;
use crate::resource::{ByteStream, RemoteFetcher, RetCode, UriResource};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct NativeCall {
    pub module: String,
    pub func: String,
    pub call_id: String,
    pub args: Value,
}

#[derive(Default)]
pub struct RecordingCallback {
    calls: Mutex<Vec<NativeCall>>,
    exceptions: Mutex<Vec<String>>,
}

impl RecordingCallback {
    pub fn calls(&self) -> Vec<NativeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn exceptions(&self) -> Vec<String> {
        self.exceptions.lock().unwrap().clone()
    }
}

impl BridgeCallback for RecordingCallback {
    fn call_natives(&self, module: &str, func: &str, call_id: &str, args: Value) {
        self.calls.lock().unwrap().push(NativeCall {
            module: module.to_string(),
            func: func.to_string(),
            call_id: call_id.to_string(),
            args,
        });
    }

    fn report_exception(&self, error: &BridgeError) {
        self.exceptions.lock().unwrap().push(error.to_string());
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorEvent {
    Init {
        group_id: i64,
        is_dev_module: bool,
        global_config: Vec<u8>,
    },
    RunScript {
        uri: String,
        can_use_code_cache: bool,
        code_cache_dir: Option<PathBuf>,
    },
    Dispatch {
        action: String,
        payload: Vec<u8>,
    },
    Destroy {
        handle: RuntimeHandle,
        low_memory_mode: bool,
    },
    ResourceReady {
        request_id: u64,
        code: RetCode,
        content_len: Option<usize>,
    },
    ResolveSync {
        uri: String,
    },
    ResolveAsync {
        uri: String,
        request_id: RequestId,
    },
}

/// Records every call; init hands out handle 1 unless told to fail.
pub struct RecordingExecutor {
    events: Mutex<Vec<ExecutorEvent>>,
    next_handle: AtomicU64,
    fail_init: AtomicBool,
    fail_script: AtomicBool,
    pub resource_ready: Notify,
}

impl Default for RecordingExecutor {
    fn default() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            next_handle: AtomicU64::new(1),
            fail_init: AtomicBool::new(false),
            fail_script: AtomicBool::new(false),
            resource_ready: Notify::new(),
        }
    }
}

impl RecordingExecutor {
    pub fn failing_init() -> Self {
        let executor = Self::default();
        executor.fail_init.store(true, Ordering::SeqCst);
        executor
    }

    pub fn null_handle() -> Self {
        let executor = Self::default();
        executor.next_handle.store(0, Ordering::SeqCst);
        executor
    }

    pub fn fail_scripts(&self) {
        self.fail_script.store(true, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<ExecutorEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn dispatches(&self) -> Vec<(String, Vec<u8>)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ExecutorEvent::Dispatch { action, payload } => Some((action, payload)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: ExecutorEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl Executor for RecordingExecutor {
    fn init(&self, params: InitParams) -> anyhow::Result<RuntimeHandle> {
        self.record(ExecutorEvent::Init {
            group_id: params.group_id,
            is_dev_module: params.is_dev_module,
            global_config: params.global_config,
        });
        if self.fail_init.load(Ordering::SeqCst) {
            anyhow::bail!("engine refused to start");
        }
        Ok(RuntimeHandle::new(self.next_handle.load(Ordering::SeqCst)))
    }

    fn run_script(
        &self,
        request: &ScriptRequest,
        _handle: RuntimeHandle,
        callback: Option<NativeCallback>,
    ) -> anyhow::Result<bool> {
        self.record(ExecutorEvent::RunScript {
            uri: request.uri.clone(),
            can_use_code_cache: request.can_use_code_cache,
            code_cache_dir: request.code_cache_dir.clone(),
        });
        if self.fail_script.load(Ordering::SeqCst) {
            anyhow::bail!("syntax error");
        }
        if let Some(callback) = callback {
            callback(0);
        }
        Ok(true)
    }

    fn dispatch_call(
        &self,
        call: &CallEnvelope<'_>,
        _handle: RuntimeHandle,
        callback: Option<NativeCallback>,
    ) {
        self.record(ExecutorEvent::Dispatch {
            action: call.action().to_string(),
            payload: call.payload().to_vec(),
        });
        if let Some(callback) = callback {
            callback(0);
        }
    }

    fn destroy(&self, handle: RuntimeHandle, low_memory_mode: bool) {
        self.record(ExecutorEvent::Destroy {
            handle,
            low_memory_mode,
        });
    }

    fn notify_resource_ready(&self, resource: UriResource, _handle: RuntimeHandle, request_id: u64) {
        self.record(ExecutorEvent::ResourceReady {
            request_id,
            code: resource.code(),
            content_len: resource.content().map(|b| b.len()),
        });
        self.resource_ready.notify_one();
    }

    fn resolve_uri_sync(&self, uri: &str, _handle: RuntimeHandle) -> UriResource {
        self.record(ExecutorEvent::ResolveSync {
            uri: uri.to_string(),
        });
        UriResource::with_code(RetCode::ResourceNotFound)
    }

    fn resolve_uri_async(&self, uri: &str, _handle: RuntimeHandle, request_id: RequestId) {
        self.record(ExecutorEvent::ResolveAsync {
            uri: uri.to_string(),
            request_id,
        });
    }

    fn engine_version(&self) -> Option<String> {
        Some("test-engine".to_string())
    }
}

/// Routes every dispatched call straight back into `Bridge::call_natives`,
/// the way a script that echoes its arguments would.
#[derive(Default)]
pub struct LoopbackExecutor {
    pub inner: RecordingExecutor,
    bridge: OnceLock<Weak<Bridge>>,
}

impl LoopbackExecutor {
    pub fn attach(&self, bridge: &Arc<Bridge>) {
        let _ = self.bridge.set(Arc::downgrade(bridge));
    }
}

impl Executor for LoopbackExecutor {
    fn init(&self, params: InitParams) -> anyhow::Result<RuntimeHandle> {
        self.inner.init(params)
    }

    fn run_script(
        &self,
        request: &ScriptRequest,
        handle: RuntimeHandle,
        callback: Option<NativeCallback>,
    ) -> anyhow::Result<bool> {
        self.inner.run_script(request, handle, callback)
    }

    fn dispatch_call(
        &self,
        call: &CallEnvelope<'_>,
        handle: RuntimeHandle,
        callback: Option<NativeCallback>,
    ) {
        self.inner.dispatch_call(call, handle, None);
        if let Some(bridge) = self.bridge.get().and_then(Weak::upgrade) {
            bridge.call_natives("loopback", call.action(), "0", call.payload());
        }
        if let Some(callback) = callback {
            callback(0);
        }
    }

    fn destroy(&self, handle: RuntimeHandle, low_memory_mode: bool) {
        self.inner.destroy(handle, low_memory_mode);
    }

    fn notify_resource_ready(&self, resource: UriResource, handle: RuntimeHandle, request_id: u64) {
        self.inner.notify_resource_ready(resource, handle, request_id);
    }

    fn resolve_uri_sync(&self, uri: &str, handle: RuntimeHandle) -> UriResource {
        self.inner.resolve_uri_sync(uri, handle)
    }

    fn resolve_uri_async(&self, uri: &str, handle: RuntimeHandle, request_id: RequestId) {
        self.inner.resolve_uri_async(uri, handle, request_id);
    }
}

/// Re-enters the bridge from inside `dispatch_call`, after a pause long
/// enough for a concurrent `destroy` to start waiting on the dispatch.
pub struct ReentrantExecutor {
    pub inner: RecordingExecutor,
    bridge: OnceLock<Weak<Bridge>>,
    entered: Mutex<Option<std_mpsc::Sender<()>>>,
}

impl ReentrantExecutor {
    pub fn new(entered: std_mpsc::Sender<()>) -> Self {
        Self {
            inner: RecordingExecutor::default(),
            bridge: OnceLock::new(),
            entered: Mutex::new(Some(entered)),
        }
    }

    pub fn attach(&self, bridge: &Arc<Bridge>) {
        let _ = self.bridge.set(Arc::downgrade(bridge));
    }
}

impl Executor for ReentrantExecutor {
    fn init(&self, params: InitParams) -> anyhow::Result<RuntimeHandle> {
        self.inner.init(params)
    }

    fn run_script(
        &self,
        request: &ScriptRequest,
        handle: RuntimeHandle,
        callback: Option<NativeCallback>,
    ) -> anyhow::Result<bool> {
        self.inner.run_script(request, handle, callback)
    }

    fn dispatch_call(
        &self,
        call: &CallEnvelope<'_>,
        handle: RuntimeHandle,
        callback: Option<NativeCallback>,
    ) {
        self.inner.dispatch_call(call, handle, None);
        if let Some(entered) = self.entered.lock().unwrap().take() {
            let _ = entered.send(());
        }
        std::thread::sleep(Duration::from_millis(100));
        if let Some(bridge) = self.bridge.get().and_then(Weak::upgrade) {
            let frame: Vec<u8> = "tick".encode_utf16().flat_map(|u| u.to_ne_bytes()).collect();
            bridge.inspector_channel(&frame);
            let _ = bridge.state();
            bridge.report_exception("still running", "");
        }
        if let Some(callback) = callback {
            callback(0);
        }
    }

    fn destroy(&self, handle: RuntimeHandle, low_memory_mode: bool) {
        self.inner.destroy(handle, low_memory_mode);
    }

    fn notify_resource_ready(&self, resource: UriResource, handle: RuntimeHandle, request_id: u64) {
        self.inner.notify_resource_ready(resource, handle, request_id);
    }

    fn resolve_uri_sync(&self, uri: &str, handle: RuntimeHandle) -> UriResource {
        self.inner.resolve_uri_sync(uri, handle)
    }

    fn resolve_uri_async(&self, uri: &str, handle: RuntimeHandle, request_id: RequestId) {
        self.inner.resolve_uri_async(uri, handle, request_id);
    }
}

#[derive(Default)]
pub struct MemorySession {
    sent: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl MemorySession {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl DebugSession for MemorySession {
    fn send(&self, message: String) -> bool {
        if self.is_closed() {
            return false;
        }
        self.sent.lock().unwrap().push(message);
        true
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        !self.is_closed()
    }
}

/// In-process debugger connection; `push` plays the debugger's side.
#[derive(Default)]
pub struct MemoryTransport {
    pub session: Arc<MemorySession>,
    inbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    urls: Mutex<Vec<String>>,
    refuse: bool,
}

impl MemoryTransport {
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    pub fn push(&self, message: &str) -> bool {
        match self.inbound.lock().unwrap().as_ref() {
            Some(tx) => tx.send(message.to_string()).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl DebugTransport for MemoryTransport {
    async fn connect(
        &self,
        url: &str,
        inbound: mpsc::UnboundedSender<String>,
    ) -> anyhow::Result<Arc<dyn DebugSession>> {
        self.urls.lock().unwrap().push(url.to_string());
        if self.refuse {
            anyhow::bail!("connection refused");
        }
        *self.inbound.lock().unwrap() = Some(inbound);
        Ok(self.session.clone())
    }
}

/// Yields the scripted chunks in order; `Err` entries fail the stream.
pub struct ScriptedFetcher {
    script: Vec<Result<&'static str, &'static str>>,
}

impl ScriptedFetcher {
    pub fn new(script: Vec<Result<&'static str, &'static str>>) -> Self {
        Self { script }
    }
}

#[async_trait]
impl RemoteFetcher for ScriptedFetcher {
    async fn open(&self, url: &str) -> Result<ByteStream, FetchError> {
        let url = url.to_string();
        let chunks = self.script.clone().into_iter().map(move |step| match step {
            Ok(chunk) => Ok(Bytes::from_static(chunk.as_bytes())),
            Err(message) => Err(FetchError::transport(url.clone(), message)),
        });
        Ok(futures::stream::iter(chunks).boxed())
    }
}
