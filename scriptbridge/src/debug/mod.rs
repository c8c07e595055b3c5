//! Debug transport and inspector routing (dev mode only).
//!
//! Frames from the debugger are offered to the [`InspectorDispatcher`]
//! first; anything it does not claim is forwarded into the executor as a
//! normal call.

mod inspector;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use inspector::{DomainHandler, DomainInspector, InspectorDispatcher};

/// Used when the configured host is empty.
pub const DEFAULT_DEBUG_SERVER_HOST: &str = "localhost:38989";

/// Opens debugger connections. Inbound text frames go to `inbound`.
#[async_trait]
pub trait DebugTransport: Send + Sync {
    async fn connect(
        &self,
        url: &str,
        inbound: mpsc::UnboundedSender<String>,
    ) -> anyhow::Result<Arc<dyn DebugSession>>;
}

/// One open debugger connection.
pub trait DebugSession: Send + Sync {
    /// Returns false when the frame could not be queued.
    fn send(&self, message: String) -> bool;

    fn close(&self);

    fn is_connected(&self) -> bool;
}

pub fn debug_url(host: &str, client_id: &str) -> String {
    let host = if host.is_empty() {
        DEFAULT_DEBUG_SERVER_HOST
    } else {
        host
    };
    format!("ws://{host}/debugger-proxy?role=android_client&clientId={client_id}")
}
