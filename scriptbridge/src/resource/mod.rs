//! URI resolution: result types, the resolver trait, and the delegate chain.
//!
//! Two calling conventions share one trait:
//! - **sync**: answer inside the calling frame
//! - **async**: the caller registers a [`Reply`] with the correlator first,
//!   the resolver completes it later from any thread

mod debug;
mod host;
mod loader;
mod remote;

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::correlator::Reply;

pub use debug::DebugDelegate;
pub use host::HostResolver;
pub use loader::{Next, UriDelegate, UriLoader, scheme_of};
pub use remote::{ByteStream, DEFAULT_FETCH_TIMEOUT, RemoteDelegate, RemoteFetcher, ReqwestFetcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetCode {
    Success,
    Failed,
    DelegateError,
    UriError,
    SchemeError,
    SchemeNotRegistered,
    PathNotMatch,
    PathError,
    ResourceNotFound,
    Timeout,
}

impl RetCode {
    /// Codes meaning "nobody here had it", as opposed to a hard failure.
    pub fn is_miss(self) -> bool {
        matches!(
            self,
            RetCode::SchemeNotRegistered | RetCode::PathNotMatch | RetCode::ResourceNotFound
        )
    }
}

/// Resolved content or the reason there is none.
///
/// Content is present exactly when the code is `Success`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriResource {
    code: RetCode,
    content: Option<Bytes>,
}

impl UriResource {
    pub fn success(content: impl Into<Bytes>) -> Self {
        Self {
            code: RetCode::Success,
            content: Some(content.into()),
        }
    }

    /// A result with no content. `Success` yields an empty buffer instead.
    pub fn with_code(code: RetCode) -> Self {
        match code {
            RetCode::Success => Self::success(Bytes::new()),
            _ => Self {
                code,
                content: None,
            },
        }
    }

    pub fn code(&self) -> RetCode {
        self.code
    }

    pub fn content(&self) -> Option<&Bytes> {
        self.content.as_ref()
    }

    pub fn into_content(self) -> Option<Bytes> {
        self.content
    }

    pub fn is_success(&self) -> bool {
        self.code == RetCode::Success
    }
}

impl fmt::Display for UriResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.content {
            Some(bytes) => write!(f, "{:?} ({} bytes)", self.code, bytes.len()),
            None => write!(f, "{:?}", self.code),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    pub uri: String,
    /// Set when the executor already walked its own chain and missed.
    /// A host resolver must not hand such a request back to the executor.
    pub from_executor: bool,
}

impl ResourceRequest {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            from_executor: false,
        }
    }

    pub fn from_executor(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            from_executor: true,
        }
    }
}

pub trait ResourceResolver: Send + Sync {
    fn resolve_sync(&self, request: &ResourceRequest) -> UriResource;

    /// Resolve later; `reply` must be sent exactly once (dropping it leaves
    /// the waiter pending until the correlator is cleared).
    fn resolve_async(&self, request: ResourceRequest, reply: Reply);
}
