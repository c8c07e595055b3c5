use super::{Next, ResourceRequest, RetCode, UriDelegate, UriResource};
use crate::correlator::Reply;

/// Front-of-chain delegate installed in dev mode.
///
/// It answers nothing itself; it logs the request and hands it down the
/// chain, answering `SchemeNotRegistered` when it is the last delegate.
#[derive(Debug, Default)]
pub struct DebugDelegate;

impl UriDelegate for DebugDelegate {
    fn name(&self) -> &str {
        "debug"
    }

    fn request_sync(&self, request: &ResourceRequest, next: Next) -> UriResource {
        if next.is_end() {
            return UriResource::with_code(RetCode::SchemeNotRegistered);
        }
        let resource = next.resolve_sync(request);
        tracing::debug!(uri = %request.uri, result = %resource, "Debug delegate sync result");
        resource
    }

    fn request_async(&self, request: ResourceRequest, reply: Reply, next: Next) {
        if next.is_end() {
            reply.send(UriResource::with_code(RetCode::SchemeNotRegistered));
            return;
        }
        let uri = request.uri.clone();
        let pending = next.fetch(request);
        next.spawn(async move {
            match pending.wait().await {
                Some(resource) => {
                    tracing::debug!(uri = %uri, result = %resource, "Debug delegate async result");
                    reply.send(resource);
                }
                None => tracing::debug!(uri = %uri, "Debug sub-request dropped"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::runtime::Handle;

    use super::*;
    use crate::correlator::RequestCorrelator;
    use crate::resource::{ResourceResolver, UriLoader};

    struct Fixed;

    impl UriDelegate for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn request_sync(&self, _: &ResourceRequest, _: Next) -> UriResource {
            UriResource::success(&b"fixed"[..])
        }

        fn request_async(&self, _: ResourceRequest, reply: Reply, _: Next) {
            reply.send(UriResource::success(&b"fixed"[..]));
        }
    }

    #[tokio::test]
    async fn alone_in_chain_reports_not_registered() {
        let loader = UriLoader::new(Arc::new(RequestCorrelator::new()), Handle::current());
        loader.register_debug_delegate("hpfile", Arc::new(DebugDelegate));

        let r = loader.resolve_sync(&ResourceRequest::new("hpfile://index.bundle"));
        assert_eq!(r.code(), RetCode::SchemeNotRegistered);

        let (pending, reply) = loader.correlator().begin_reply("hpfile://index.bundle");
        loader.resolve_async(ResourceRequest::new("hpfile://index.bundle"), reply);
        assert_eq!(
            pending.wait().await.map(|r| r.code()),
            Some(RetCode::SchemeNotRegistered)
        );
    }

    #[tokio::test]
    async fn passes_through_both_paths() {
        let loader = UriLoader::new(Arc::new(RequestCorrelator::new()), Handle::current());
        loader.register_delegate("hpfile", Arc::new(Fixed));
        loader.register_debug_delegate("hpfile", Arc::new(DebugDelegate));

        let r = loader.resolve_sync(&ResourceRequest::new("hpfile://a"));
        assert!(r.is_success());

        let (pending, reply) = loader.correlator().begin_reply("hpfile://a");
        loader.resolve_async(ResourceRequest::new("hpfile://a"), reply);
        let got = pending.wait().await.unwrap();
        assert_eq!(got.content().map(|b| &b[..]), Some(&b"fixed"[..]));
    }
}
