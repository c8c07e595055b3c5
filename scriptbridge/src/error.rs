//! Errors surfaced to the host through `report_exception`.
//!
//! Resource misses are never errors; they travel as [`RetCode`](crate::resource::RetCode).

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP {status} fetching {url}")]
    Status { url: String, status: u16 },

    #[error("transport error fetching {url}: {message}")]
    Transport { url: String, message: String },

    #[error("stream error after {received} bytes: {message}")]
    Stream { received: usize, message: String },
}

impl FetchError {
    pub fn transport(url: impl Into<String>, message: impl Into<String>) -> Self {
        FetchError::Transport {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn stream(received: usize, message: impl Into<String>) -> Self {
        FetchError::Stream {
            received,
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("executor bootstrap failed: {0}")]
    ExecutorBootstrap(String),

    #[error("failed to load script {uri}: {message}")]
    ScriptLoad { uri: String, message: String },

    #[error("remote resource {uri} failed: {source}")]
    RemoteStream {
        uri: String,
        #[source]
        source: FetchError,
    },

    #[error("script error: {message}")]
    Script {
        message: String,
        stack_trace: String,
    },
}

impl BridgeError {
    pub fn bootstrap(e: &anyhow::Error) -> Self {
        BridgeError::ExecutorBootstrap(format!("{e:#}"))
    }

    pub fn script_load(uri: impl Into<String>, e: &anyhow::Error) -> Self {
        BridgeError::ScriptLoad {
            uri: uri.into(),
            message: format!("{e:#}"),
        }
    }
}
