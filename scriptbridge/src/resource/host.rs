use std::sync::Arc;

use super::{ResourceRequest, ResourceResolver, RetCode, UriLoader, UriResource};
use crate::correlator::Reply;

/// Host-side resolver: the host's delegate chain, then the executor's.
///
/// A request flagged `from_executor` has already been through the
/// executor's chain, so a host miss ends it with `ResourceNotFound`
/// instead of handing it back.
pub struct HostResolver {
    loader: Arc<UriLoader>,
    executor_chain: Option<Arc<dyn ResourceResolver>>,
}

impl HostResolver {
    pub fn new(loader: Arc<UriLoader>) -> Self {
        Self {
            loader,
            executor_chain: None,
        }
    }

    pub fn with_executor_chain(mut self, chain: Arc<dyn ResourceResolver>) -> Self {
        self.executor_chain = Some(chain);
        self
    }

    pub fn loader(&self) -> &Arc<UriLoader> {
        &self.loader
    }

    fn after_host_miss(&self, request: &ResourceRequest) -> Option<Arc<dyn ResourceResolver>> {
        if request.from_executor {
            tracing::debug!(uri = %request.uri, "Host miss for executor request");
            return None;
        }
        self.executor_chain.clone()
    }
}

impl ResourceResolver for HostResolver {
    fn resolve_sync(&self, request: &ResourceRequest) -> UriResource {
        let resource = self.loader.resolve_sync(request);
        if !resource.code().is_miss() {
            return resource;
        }
        match self.after_host_miss(request) {
            Some(chain) => chain.resolve_sync(request),
            None if request.from_executor => UriResource::with_code(RetCode::ResourceNotFound),
            None => resource,
        }
    }

    fn resolve_async(&self, request: ResourceRequest, reply: Reply) {
        let (pending, sub_reply) = self.loader.correlator().begin_reply(request.uri.clone());
        self.loader.resolve_async(request.clone(), sub_reply);

        let fallback = self.after_host_miss(&request);
        self.loader.runtime().spawn(async move {
            let Some(resource) = pending.wait().await else {
                tracing::debug!(uri = %request.uri, "Host sub-request dropped");
                return;
            };
            if !resource.code().is_miss() {
                reply.send(resource);
                return;
            }
            match fallback {
                Some(chain) => chain.resolve_async(request, reply),
                None if request.from_executor => {
                    reply.send(UriResource::with_code(RetCode::ResourceNotFound));
                }
                None => {
                    reply.send(resource);
                }
            }
        });
    }
}
