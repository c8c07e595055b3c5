//! Bridge lifecycle and call routing.
//!
//! State machine:
//! - `Uninitialized -> Initializing` on [`Bridge::init_js_bridge`]
//! - `Initializing -> Ready` when the executor hands back a live handle
//! - `Initializing -> Uninitialized` when executor init fails
//! - any state `-> Destroyed` on [`Bridge::destroy`] (terminal)
//!
//! Lifecycle transitions take the lifecycle mutex. Calls into the executor
//! go through the dispatch gate instead, which destroy closes and drains
//! before tearing anything down. Nothing reachable from inside a dispatch
//! takes the lifecycle mutex: the state is published through an atomic and
//! the debug session sits behind its own lock.
//!
//! `destroy` must not be called from inside an executor dispatch on the same
//! thread; it would wait for its own caller to return.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::callback::{BridgeCallback, CallbackSlot, NativeCallback};
use crate::code_cache::{CodeCacheRoot, PROCESS_CODE_CACHE, prepare_tag_dir};
use crate::codec::text::{ByteOrder, decode_utf16, encode_utf16le};
use crate::codec::{Codec, Format};
use crate::config::BridgeConfig;
use crate::correlator::{PendingResource, RequestCorrelator, RequestId};
use crate::debug::{DebugSession, DebugTransport, InspectorDispatcher, debug_url};
use crate::error::BridgeError;
use crate::executor::{Executor, ExecutorChain, InitParams, RuntimeHandle, ScriptRequest, SharedHandle};
use crate::protocol::{ACTION_WEBSOCKET_MESSAGE, CallEnvelope};
use crate::resource::{
    DEFAULT_FETCH_TIMEOUT, DebugDelegate, HostResolver, RemoteDelegate, RemoteFetcher,
    ReqwestFetcher, ResourceRequest, ResourceResolver, UriLoader, UriResource,
};
use crate::task_runner::TaskRunner;
use crate::version::VersionInfo;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum BridgeState {
    #[default]
    Uninitialized = 0,
    Initializing = 1,
    Ready = 2,
    Destroyed = 3,
}

impl BridgeState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Initializing,
            2 => Self::Ready,
            3 => Self::Destroyed,
            _ => Self::Uninitialized,
        }
    }
}

/// Owned by whoever holds the lifecycle mutex.
#[derive(Default)]
struct Lifecycle {
    debug_forwarder: Option<JoinHandle<()>>,
}

/// Counts executor dispatches in flight. Closing it turns new entries away;
/// draining blocks until the count reaches zero.
///
/// Unlike a read/write lock, entering never waits, so a dispatch that
/// re-enters the bridge cannot queue behind a pending destroy.
struct DispatchGate {
    open: AtomicBool,
    in_flight: AtomicUsize,
    idle: Mutex<()>,
    drained: Condvar,
}

impl DispatchGate {
    fn new() -> Self {
        Self {
            open: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            idle: Mutex::new(()),
            drained: Condvar::new(),
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    fn enter(&self) -> Option<DispatchGuard<'_>> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        // on a closed gate the guard drops here and hands the count back
        let guard = DispatchGuard { gate: self };
        self.is_open().then_some(guard)
    }

    fn leave(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _idle = self.lock_idle();
            self.drained.notify_all();
        }
    }

    fn lock_idle(&self) -> MutexGuard<'_, ()> {
        match self.idle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Close the gate and wait out every dispatch already inside.
    fn close_and_drain(&self) {
        self.open.store(false, Ordering::SeqCst);
        let mut idle = self.lock_idle();
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            idle = match self.drained.wait(idle) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }
}

struct DispatchGuard<'a> {
    gate: &'a DispatchGate,
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.gate.leave();
    }
}

fn version_for(executor: &dyn Executor, format: Format) -> VersionInfo {
    let info = VersionInfo::new().with_format(format);
    match executor.engine_version() {
        Some(engine) => info.with_engine(engine),
        None => info,
    }
}

pub struct BridgeBuilder {
    config: BridgeConfig,
    executor: Arc<dyn Executor>,
    callback: Option<Arc<dyn BridgeCallback>>,
    debug_transport: Option<Arc<dyn DebugTransport>>,
    inspector: Option<Arc<dyn InspectorDispatcher>>,
    fetcher: Option<Arc<dyn RemoteFetcher>>,
    code_cache: &'static CodeCacheRoot,
    runtime: Option<Handle>,
}

impl BridgeBuilder {
    pub fn with_callback(mut self, callback: Arc<dyn BridgeCallback>) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn with_debug_transport(mut self, transport: Arc<dyn DebugTransport>) -> Self {
        self.debug_transport = Some(transport);
        self
    }

    pub fn with_inspector(mut self, inspector: Arc<dyn InspectorDispatcher>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    pub fn with_remote_fetcher(mut self, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Use a code cache root other than the process-wide one.
    pub fn with_code_cache(mut self, code_cache: &'static CodeCacheRoot) -> Self {
        self.code_cache = code_cache;
        self
    }

    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> anyhow::Result<Arc<Bridge>> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().context("bridge needs a tokio runtime")?,
        };
        let codec = Codec::new(self.config.format());
        let version = version_for(self.executor.as_ref(), codec.format());

        let fetcher = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(
                ReqwestFetcher::with_options(&version.user_agent(), DEFAULT_FETCH_TIMEOUT)
                    .context("failed to build HTTP client")?,
            ),
        };

        let callback = match self.callback {
            Some(callback) => CallbackSlot::new(callback),
            None => CallbackSlot::default(),
        };
        let correlator = Arc::new(RequestCorrelator::new());
        let runner = Arc::new(TaskRunner::spawn("ui", &runtime));
        let loader = Arc::new(UriLoader::new(Arc::clone(&correlator), runtime.clone()));

        let remote = Arc::new(RemoteDelegate::new(
            fetcher,
            Arc::clone(&runner),
            callback.clone(),
        ));
        for scheme in RemoteDelegate::SCHEMES {
            loader.register_delegate(scheme, remote.clone());
            if self.config.is_dev_module {
                loader.register_debug_delegate(scheme, Arc::new(DebugDelegate));
            }
        }

        let handle = SharedHandle::default();
        let executor_chain = ExecutorChain::new(Arc::clone(&self.executor), handle.clone());
        let resolver = HostResolver::new(Arc::clone(&loader)).with_executor_chain(Arc::new(executor_chain));
        let code_cache_root = self.code_cache.resolve(self.config.cache_base_dir.as_deref());

        tracing::debug!(
            format = ?codec.format(),
            dev = self.config.is_dev_module,
            code_cache = ?code_cache_root,
            user_agent = %version.user_agent(),
            "Bridge built"
        );

        Ok(Arc::new(Bridge {
            codec,
            executor: self.executor,
            callback,
            correlator,
            resolver,
            runner,
            runtime,
            lifecycle: Mutex::new(Lifecycle::default()),
            state: AtomicU8::new(BridgeState::Uninitialized as u8),
            gate: DispatchGate::new(),
            debug_session: RwLock::new(None),
            handle,
            version,
            debug_transport: self.debug_transport,
            inspector: self.inspector,
            code_cache_root,
            debug_client_id: uuid::Uuid::new_v4().to_string(),
            config: self.config,
        }))
    }
}

pub struct Bridge {
    config: BridgeConfig,
    codec: Codec,
    executor: Arc<dyn Executor>,
    callback: CallbackSlot,
    correlator: Arc<RequestCorrelator>,
    resolver: HostResolver,
    runner: Arc<TaskRunner>,
    runtime: Handle,
    lifecycle: Mutex<Lifecycle>,
    /// Written only under `lifecycle`; read anywhere.
    state: AtomicU8,
    gate: DispatchGate,
    debug_session: RwLock<Option<Arc<dyn DebugSession>>>,
    handle: SharedHandle,
    version: VersionInfo,
    debug_transport: Option<Arc<dyn DebugTransport>>,
    inspector: Option<Arc<dyn InspectorDispatcher>>,
    code_cache_root: Option<PathBuf>,
    debug_client_id: String,
}

impl Bridge {
    pub fn builder(config: BridgeConfig, executor: Arc<dyn Executor>) -> BridgeBuilder {
        BridgeBuilder {
            config,
            executor,
            callback: None,
            debug_transport: None,
            inspector: None,
            fetcher: None,
            code_cache: &PROCESS_CODE_CACHE,
            runtime: None,
        }
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        match self.lifecycle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Bridge lifecycle mutex poisoned - recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Caller holds the lifecycle mutex.
    fn set_state(&self, _lifecycle: &Lifecycle, state: BridgeState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn session(&self) -> Option<Arc<dyn DebugSession>> {
        match self.debug_session.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace_session(&self, session: Option<Arc<dyn DebugSession>>) -> Option<Arc<dyn DebugSession>> {
        let mut guard = match self.debug_session.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, session)
    }

    fn close_debugger(&self, lifecycle: &mut Lifecycle) {
        if let Some(session) = self.replace_session(None) {
            session.close();
        }
        if let Some(forwarder) = lifecycle.debug_forwarder.take() {
            forwarder.abort();
        }
    }

    pub fn state(&self) -> BridgeState {
        BridgeState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_ready(&self) -> bool {
        self.gate.is_open()
    }

    pub fn runtime_handle(&self) -> RuntimeHandle {
        self.handle.load()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn correlator(&self) -> &Arc<RequestCorrelator> {
        &self.correlator
    }

    /// Host delegate chains. Register asset schemes here.
    pub fn uri_loader(&self) -> &Arc<UriLoader> {
        self.resolver.loader()
    }

    pub fn code_cache_root(&self) -> Option<&Path> {
        self.code_cache_root.as_deref()
    }

    pub fn version_info(&self) -> &VersionInfo {
        &self.version
    }

    /// Bring the executor up. In dev mode the debugger is connected first;
    /// whether that works or not, init continues.
    pub async fn init_js_bridge(self: &Arc<Self>, global_config: &str, group_id: i64) -> BridgeState {
        {
            let lifecycle = self.lock_lifecycle();
            let state = self.state();
            if state != BridgeState::Uninitialized {
                tracing::debug!(state = ?state, "Init ignored");
                return state;
            }
            self.set_state(&lifecycle, BridgeState::Initializing);
        }

        if self.config.is_dev_module {
            self.connect_debugger().await;
        }

        let params = InitParams {
            global_config: encode_utf16le(global_config),
            single_thread_mode: self.config.single_thread_mode,
            low_memory_mode: self.config.low_memory_mode,
            enable_binary_serialization: self.config.enable_binary_serialization,
            is_dev_module: self.config.is_dev_module,
            group_id,
        };

        let (state, failure) = {
            let mut lifecycle = self.lock_lifecycle();
            let state = self.state();
            if state != BridgeState::Initializing {
                tracing::info!(state = ?state, "Bridge destroyed during init");
                return state;
            }

            let failure = match self.executor.init(params) {
                Ok(handle) if !handle.is_null() => {
                    self.handle.store(handle);
                    self.gate.open();
                    self.set_state(&lifecycle, BridgeState::Ready);
                    tracing::info!(runtime = %handle, group_id, "Bridge ready");
                    None
                }
                Ok(_) => Some(BridgeError::ExecutorBootstrap(
                    "executor returned a null runtime handle".to_string(),
                )),
                Err(e) => Some(BridgeError::bootstrap(&e)),
            };
            if failure.is_some() {
                self.close_debugger(&mut lifecycle);
                self.set_state(&lifecycle, BridgeState::Uninitialized);
            }
            (self.state(), failure)
        };

        // Report without the lifecycle lock; the host may react by destroying us.
        if let Some(error) = failure {
            self.callback.report(&error);
        }
        state
    }

    async fn connect_debugger(self: &Arc<Self>) {
        let Some(transport) = self.debug_transport.clone() else {
            tracing::debug!("Dev mode without a debug transport");
            return;
        };
        let url = debug_url(self.config.effective_debug_host(), &self.debug_client_id);
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        let session = match transport.connect(&url, tx).await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Debugger connection failed, continuing without it");
                return;
            }
        };

        let weak = Arc::downgrade(self);
        let forwarder = self.runtime.spawn(async move {
            while let Some(message) = rx.recv().await {
                let Some(bridge) = weak.upgrade() else {
                    break;
                };
                bridge.on_receive_data(&message);
            }
        });

        let mut lifecycle = self.lock_lifecycle();
        if self.state() != BridgeState::Initializing {
            session.close();
            forwarder.abort();
            return;
        }
        self.replace_session(Some(session));
        lifecycle.debug_forwarder = Some(forwarder);
        tracing::info!(url = %url, "Debugger connected");
    }

    /// Tear everything down. Safe to call more than once.
    pub fn destroy(&self) {
        let mut lifecycle = self.lock_lifecycle();
        let previous = self.state();
        if previous == BridgeState::Destroyed {
            tracing::debug!("Bridge already destroyed");
            return;
        }
        self.set_state(&lifecycle, BridgeState::Destroyed);

        // Waits out in-flight dispatches; none start after this.
        self.gate.close_and_drain();

        self.close_debugger(&mut lifecycle);
        self.runner.stop();
        self.codec.release_strings();
        let dropped_requests = self.correlator.close();

        let handle = self.handle.take();
        if !handle.is_null() {
            self.executor.destroy(handle, self.config.low_memory_mode);
        }
        self.callback.clear();

        tracing::info!(
            previous = ?previous,
            runtime = %handle,
            dropped_requests,
            "Bridge destroyed"
        );
    }

    pub fn call_function(&self, action: &str, callback: Option<NativeCallback>, buffer: &[u8]) -> bool {
        self.call_function_range(action, callback, buffer, 0, buffer.len())
    }

    /// Dispatch `buffer[offset..offset + length]` to the executor.
    ///
    /// Returns false, without touching the executor, when the bridge is not
    /// ready or the call is malformed.
    pub fn call_function_range(
        &self,
        action: &str,
        callback: Option<NativeCallback>,
        buffer: &[u8],
        offset: usize,
        length: usize,
    ) -> bool {
        let envelope = match CallEnvelope::new(action, buffer, offset, length) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(action, error = %e, "Dropping call");
                return false;
            }
        };
        let Some(_gate) = self.gate.enter() else {
            tracing::trace!(action, "Call before ready or after destroy, dropped");
            return false;
        };

        let handle = self.handle.load();
        tracing::trace!(action, len = envelope.len(), runtime = %handle, "Dispatching call");
        self.executor.dispatch_call(&envelope, handle, callback);
        true
    }

    /// Run a script. With a cache tag the executor gets `<root>/<tag>/` as
    /// its code cache directory; if that cannot be created the script still
    /// runs, just without a cache.
    pub fn run_script_from_uri(
        &self,
        uri: &str,
        loader: Option<Arc<dyn ResourceResolver>>,
        can_use_code_cache: bool,
        code_cache_tag: &str,
        callback: Option<NativeCallback>,
    ) -> bool {
        if !self.is_ready() {
            tracing::debug!(uri, "Script load before ready or after destroy");
            return false;
        }

        let code_cache_dir = self.code_cache_dir_for(can_use_code_cache, code_cache_tag);
        let request = ScriptRequest {
            uri: uri.to_string(),
            loader,
            can_use_code_cache: code_cache_dir.is_some(),
            code_cache_dir,
        };

        let result = {
            let Some(_gate) = self.gate.enter() else {
                return false;
            };
            self.executor.run_script(&request, self.handle.load(), callback)
        };
        match result {
            Ok(loaded) => {
                tracing::debug!(uri, loaded, cached = request.can_use_code_cache, "Script run");
                loaded
            }
            Err(e) => {
                self.callback.report(&BridgeError::script_load(uri, &e));
                false
            }
        }
    }

    fn code_cache_dir_for(&self, can_use_code_cache: bool, tag: &str) -> Option<PathBuf> {
        if !can_use_code_cache || tag.is_empty() {
            return None;
        }
        let root = self.code_cache_root.as_deref()?;
        match prepare_tag_dir(root, tag) {
            Ok(dir) => Some(dir),
            Err(e) => {
                tracing::warn!(tag, error = %e, "Code cache dir unavailable, running uncached");
                None
            }
        }
    }

    /// Frame from the debugger. Ignored unless the bridge is in dev mode.
    pub fn on_receive_data(&self, message: &str) {
        if !self.config.is_dev_module {
            tracing::trace!("Debug frame outside dev mode, ignored");
            return;
        }

        if let Some(inspector) = &self.inspector
            && let Some(session) = self.session()
            && inspector.dispatch_from_frontend(message, session.as_ref())
        {
            return;
        }

        let bytes = encode_utf16le(message);
        self.call_function(ACTION_WEBSOCKET_MESSAGE, None, &bytes);
    }

    /// Outbound inspector frame from the executor, native-endian UTF-16.
    pub fn inspector_channel(&self, bytes: &[u8]) {
        match self.session() {
            Some(session) if session.is_connected() => {
                session.send(decode_utf16(bytes, ByteOrder::native()));
            }
            _ => tracing::trace!(len = bytes.len(), "No debugger connected, frame dropped"),
        }
    }

    /// Native call coming out of the executor.
    pub fn call_natives(&self, module: &str, func: &str, call_id: &str, bytes: &[u8]) {
        // decoding would refill the string table released by destroy
        if self.state() == BridgeState::Destroyed || !self.callback.is_set() {
            tracing::trace!(module, func, call_id, "No host listener, native call dropped");
            return;
        }
        let args = self.codec.decode_arguments(bytes);
        tracing::trace!(module, func, call_id, "Native call");
        self.callback.call_natives(module, func, call_id, args);
    }

    /// Executor asks the host for a resource and waits for the answer.
    pub fn fetch_resource_with_uri_sync(&self, uri: &str, from_executor: bool) -> UriResource {
        let request = ResourceRequest {
            uri: uri.to_string(),
            from_executor,
        };
        self.resolver.resolve_sync(&request)
    }

    /// Executor asks the host for a resource; the answer goes back through
    /// `notify_resource_ready` with the executor's own request id.
    pub fn fetch_resource_with_uri_async(
        self: &Arc<Self>,
        uri: &str,
        executor_request_id: u64,
        from_executor: bool,
    ) {
        if self.correlator.is_closed() {
            tracing::debug!(uri, executor_request_id, "Resource fetch after destroy, dropped");
            return;
        }
        let (pending, reply) = self.correlator.begin_reply(uri);
        self.resolver.resolve_async(
            ResourceRequest {
                uri: uri.to_string(),
                from_executor,
            },
            reply,
        );

        let weak = Arc::downgrade(self);
        self.runtime.spawn(async move {
            let Some(resource) = pending.wait().await else {
                tracing::debug!(executor_request_id, "Resource request dropped");
                return;
            };
            let Some(bridge) = weak.upgrade() else {
                return;
            };
            bridge.notify_executor(resource, executor_request_id);
        });
    }

    fn notify_executor(&self, resource: UriResource, executor_request_id: u64) {
        let Some(_gate) = self.gate.enter() else {
            tracing::debug!(executor_request_id, "Runtime gone, resource dropped");
            return;
        };
        self.executor
            .notify_resource_ready(resource, self.handle.load(), executor_request_id);
    }

    /// Host-initiated lookup through the host chain, then the executor's.
    pub fn resolve_sync(&self, uri: &str) -> UriResource {
        self.resolver.resolve_sync(&ResourceRequest::new(uri))
    }

    /// After destroy the returned waiter is already answered `Failed`.
    pub fn resolve_async(&self, uri: &str) -> PendingResource {
        let (pending, reply) = self.correlator.begin_reply(uri);
        if self.correlator.is_closed() {
            // begin_reply has answered it; the unsent reply is a no-op
            tracing::debug!(uri, reply = %reply.id(), "Resolve after destroy");
            return pending;
        }
        self.resolver.resolve_async(ResourceRequest::new(uri), reply);
        pending
    }

    /// Completion from the executor's delegate chain.
    ///
    /// Dropped unless `runtime` is this bridge's live handle.
    pub fn on_next_ready(&self, resource: UriResource, runtime: RuntimeHandle, request_id: RequestId) -> bool {
        let live = self.handle.load();
        if live.is_null() || live != runtime {
            tracing::warn!(runtime = %runtime, request_id = %request_id, "Completion for unknown runtime dropped");
            return false;
        }
        self.correlator.complete(request_id, resource)
    }

    /// Script error raised inside the executor.
    pub fn report_exception(&self, message: &str, stack_trace: &str) {
        self.callback.report(&BridgeError::Script {
            message: message.to_string(),
            stack_trace: stack_trace.to_string(),
        });
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.destroy();
    }
}
