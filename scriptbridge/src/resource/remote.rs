//! Remote (`http`/`https`) resources.
//!
//! Fetches run on the bridge's [`TaskRunner`] and accumulate the whole body
//! before answering; a stream failure discards everything received so far.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures::stream::BoxStream;

use super::{Next, ResourceRequest, RetCode, UriDelegate, UriResource};
use crate::callback::CallbackSlot;
use crate::correlator::Reply;
use crate::error::{BridgeError, FetchError};
use crate::task_runner::TaskRunner;
use crate::version::VersionInfo;

pub type ByteStream = BoxStream<'static, Result<Bytes, FetchError>>;

/// Opens a byte stream for a network URL.
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    async fn open(&self, url: &str) -> Result<ByteStream, FetchError>;
}

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Default fetcher over `reqwest`.
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new() -> reqwest::Result<Self> {
        Self::with_options(&VersionInfo::new().user_agent(), DEFAULT_FETCH_TIMEOUT)
    }

    pub fn with_options(user_agent: &str, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RemoteFetcher for ReqwestFetcher {
    async fn open(&self, url: &str) -> Result<ByteStream, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::transport(url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let url = url.to_string();
        let stream = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| FetchError::transport(url.clone(), e.to_string())));
        Ok(stream.boxed())
    }
}

/// Read the whole stream. Partial bytes never escape on failure.
async fn read_all(fetcher: &dyn RemoteFetcher, url: &str) -> Result<Bytes, FetchError> {
    let mut stream = fetcher.open(url).await?;
    let mut buffer = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => buffer.extend_from_slice(&chunk),
            Err(e) => return Err(FetchError::stream(buffer.len(), e.to_string())),
        }
    }
    Ok(buffer.freeze())
}

pub struct RemoteDelegate {
    fetcher: Arc<dyn RemoteFetcher>,
    runner: Arc<TaskRunner>,
    callback: CallbackSlot,
}

impl RemoteDelegate {
    pub const SCHEMES: [&'static str; 2] = ["http", "https"];

    pub fn new(fetcher: Arc<dyn RemoteFetcher>, runner: Arc<TaskRunner>, callback: CallbackSlot) -> Self {
        Self {
            fetcher,
            runner,
            callback,
        }
    }
}

impl UriDelegate for RemoteDelegate {
    fn name(&self) -> &str {
        "remote"
    }

    fn request_sync(&self, request: &ResourceRequest, _next: Next) -> UriResource {
        tracing::debug!(uri = %request.uri, "Remote resources cannot be fetched synchronously");
        UriResource::with_code(RetCode::DelegateError)
    }

    fn request_async(&self, request: ResourceRequest, reply: Reply, _next: Next) {
        let fetcher = Arc::clone(&self.fetcher);
        let callback = self.callback.clone();
        let uri = request.uri;
        let request_id = reply.id();

        let posted = self.runner.post(async move {
            match read_all(fetcher.as_ref(), &uri).await {
                Ok(body) => {
                    tracing::debug!(uri = %uri, bytes = body.len(), "Remote resource loaded");
                    reply.send(UriResource::success(body));
                }
                Err(e) => {
                    tracing::warn!(uri = %uri, error = %e, "Remote resource failed");
                    callback.report(&BridgeError::RemoteStream { uri, source: e });
                    reply.send(UriResource::with_code(RetCode::Failed));
                }
            }
        });
        if !posted {
            // the dropped task took the reply with it, which discards the entry
            tracing::warn!(request_id = %request_id, "Task runner stopped, remote fetch dropped");
        }
    }
}
