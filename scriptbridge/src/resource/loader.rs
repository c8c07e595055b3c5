//! Scheme-routed delegate chains.
//!
//! Each scheme maps to an ordered list of delegates. A request enters at the
//! front of its scheme's list; every delegate may answer or pass it on
//! through [`Next`]. Lists are immutable snapshots, so a chain always ends.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use tokio::runtime::Handle;

use super::{ResourceRequest, ResourceResolver, RetCode, UriResource};
use crate::correlator::{PendingResource, Reply, RequestCorrelator};

pub trait UriDelegate: Send + Sync {
    fn name(&self) -> &str;

    fn request_sync(&self, request: &ResourceRequest, next: Next) -> UriResource;

    fn request_async(&self, request: ResourceRequest, reply: Reply, next: Next);
}

type Chain = Arc<[Arc<dyn UriDelegate>]>;

struct ChainContext {
    correlator: Arc<RequestCorrelator>,
    runtime: Handle,
}

/// The rest of a delegate chain after the current delegate.
#[derive(Clone)]
pub struct Next {
    chain: Chain,
    pos: usize,
    ctx: Arc<ChainContext>,
}

impl Next {
    fn current(&self) -> Option<(&Arc<dyn UriDelegate>, Next)> {
        let delegate = self.chain.get(self.pos)?;
        let rest = Next {
            chain: Arc::clone(&self.chain),
            pos: self.pos + 1,
            ctx: Arc::clone(&self.ctx),
        };
        Some((delegate, rest))
    }

    pub fn is_end(&self) -> bool {
        self.pos >= self.chain.len()
    }

    /// Resolve through the remaining delegates. An exhausted chain answers
    /// `SchemeNotRegistered`.
    pub fn resolve_sync(&self, request: &ResourceRequest) -> UriResource {
        match self.current() {
            Some((delegate, rest)) => {
                tracing::trace!(delegate = delegate.name(), uri = %request.uri, "Delegating sync request");
                delegate.request_sync(request, rest)
            }
            None => UriResource::with_code(RetCode::SchemeNotRegistered),
        }
    }

    pub fn resolve_async(&self, request: ResourceRequest, reply: Reply) {
        match self.current() {
            Some((delegate, rest)) => {
                tracing::trace!(delegate = delegate.name(), uri = %request.uri, "Delegating async request");
                delegate.request_async(request, reply, rest);
            }
            None => {
                reply.send(UriResource::with_code(RetCode::SchemeNotRegistered));
            }
        }
    }

    /// Start a sub-request on the rest of the chain and return its waiter.
    pub fn fetch(&self, request: ResourceRequest) -> PendingResource {
        let (pending, reply) = self.ctx.correlator.begin_reply(request.uri.clone());
        self.resolve_async(request, reply);
        pending
    }

    /// Run post-processing off the calling thread.
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.ctx.runtime.spawn(fut);
    }
}

/// Text before the first `:` when it forms a valid scheme, lowercased.
pub fn scheme_of(uri: &str) -> Option<String> {
    let (scheme, _) = uri.split_once(':')?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic()
        || !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    {
        return None;
    }
    Some(scheme.to_ascii_lowercase())
}

pub struct UriLoader {
    router: RwLock<HashMap<String, Chain>>,
    ctx: Arc<ChainContext>,
}

impl UriLoader {
    pub fn new(correlator: Arc<RequestCorrelator>, runtime: Handle) -> Self {
        Self {
            router: RwLock::new(HashMap::new()),
            ctx: Arc::new(ChainContext {
                correlator,
                runtime,
            }),
        }
    }

    pub fn correlator(&self) -> &Arc<RequestCorrelator> {
        &self.ctx.correlator
    }

    pub fn runtime(&self) -> &Handle {
        &self.ctx.runtime
    }

    /// Append `delegate` to the end of the scheme's chain.
    pub fn register_delegate(&self, scheme: &str, delegate: Arc<dyn UriDelegate>) {
        self.update_chain(scheme, |chain| chain.push(delegate));
    }

    /// Put `delegate` in front of the scheme's chain.
    pub fn register_debug_delegate(&self, scheme: &str, delegate: Arc<dyn UriDelegate>) {
        self.update_chain(scheme, |chain| chain.insert(0, delegate));
    }

    fn update_chain(&self, scheme: &str, f: impl FnOnce(&mut Vec<Arc<dyn UriDelegate>>)) {
        let scheme = scheme.to_ascii_lowercase();
        let mut router = match self.router.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Uri router lock poisoned - recovering");
                poisoned.into_inner()
            }
        };
        let mut chain: Vec<_> = router
            .get(&scheme)
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default();
        f(&mut chain);
        tracing::debug!(scheme = %scheme, delegates = chain.len(), "Registered uri delegate");
        router.insert(scheme, chain.into());
    }

    fn chain_for(&self, uri: &str) -> Result<Next, RetCode> {
        let scheme = scheme_of(uri).ok_or(RetCode::SchemeError)?;
        let router = match self.router.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let chain = router.get(&scheme).ok_or(RetCode::SchemeNotRegistered)?;
        Ok(Next {
            chain: Arc::clone(chain),
            pos: 0,
            ctx: Arc::clone(&self.ctx),
        })
    }
}

impl ResourceResolver for UriLoader {
    fn resolve_sync(&self, request: &ResourceRequest) -> UriResource {
        match self.chain_for(&request.uri) {
            Ok(next) => next.resolve_sync(request),
            Err(code) => UriResource::with_code(code),
        }
    }

    fn resolve_async(&self, request: ResourceRequest, reply: Reply) {
        match self.chain_for(&request.uri) {
            Ok(next) => next.resolve_async(request, reply),
            Err(code) => {
                reply.send(UriResource::with_code(code));
            }
        }
    }
}
