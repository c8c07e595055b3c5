use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use super::DebugSession;

/// Claims debugger frames before they reach the executor.
pub trait InspectorDispatcher: Send + Sync {
    /// Returns true when the frame was handled and must not be forwarded.
    fn dispatch_from_frontend(&self, message: &str, session: &dyn DebugSession) -> bool;
}

/// Handles the methods of one protocol domain (`Domain.method`).
pub trait DomainHandler: Send + Sync {
    fn handle(&self, method: &str, params: &JsonValue) -> Result<JsonValue, String>;
}

#[derive(Deserialize)]
struct Frame {
    id: i64,
    method: String,
    #[serde(default)]
    params: JsonValue,
}

/// Method not found, as in JSON-RPC.
const METHOD_NOT_FOUND: i64 = -32601;

/// Routes `{id, method, params}` frames to per-domain handlers.
///
/// Frames that do not parse, or whose domain has no handler, are left for
/// the executor.
#[derive(Default)]
pub struct DomainInspector {
    domains: RwLock<HashMap<String, Arc<dyn DomainHandler>>>,
}

impl DomainInspector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, domain: impl Into<String>, handler: Arc<dyn DomainHandler>) {
        let mut domains = match self.domains.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        domains.insert(domain.into(), handler);
    }

    fn handler_for(&self, domain: &str) -> Option<Arc<dyn DomainHandler>> {
        let domains = match self.domains.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        domains.get(domain).cloned()
    }
}

impl InspectorDispatcher for DomainInspector {
    fn dispatch_from_frontend(&self, message: &str, session: &dyn DebugSession) -> bool {
        let Ok(frame) = serde_json::from_str::<Frame>(message) else {
            return false;
        };
        let Some((domain, method)) = frame.method.split_once('.') else {
            return false;
        };
        let Some(handler) = self.handler_for(domain) else {
            return false;
        };

        let reply = match handler.handle(method, &frame.params) {
            Ok(result) => json!({ "id": frame.id, "result": result }),
            Err(message) => json!({
                "id": frame.id,
                "error": { "code": METHOD_NOT_FOUND, "message": message },
            }),
        };
        tracing::trace!(domain, method, id = frame.id, "Inspector handled frame");
        if !session.send(reply.to_string()) {
            tracing::debug!(domain, method, "Inspector reply dropped, session closed");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemorySession;

    struct RuntimeDomain;

    impl DomainHandler for RuntimeDomain {
        fn handle(&self, method: &str, params: &JsonValue) -> Result<JsonValue, String> {
            match method {
                "evaluate" => Ok(json!({ "echo": params["expression"] })),
                other => Err(format!("'Runtime.{other}' wasn't found")),
            }
        }
    }

    fn inspector() -> DomainInspector {
        let inspector = DomainInspector::new();
        inspector.register("Runtime", Arc::new(RuntimeDomain));
        inspector
    }

    #[test]
    fn handles_registered_domain() {
        let session = MemorySession::default();
        let handled = inspector().dispatch_from_frontend(
            r#"{"id":4,"method":"Runtime.evaluate","params":{"expression":"1+1"}}"#,
            &session,
        );
        assert!(handled);

        let sent: JsonValue = serde_json::from_str(&session.sent()[0]).unwrap();
        insta::assert_json_snapshot!(sent, @r###"
        {
          "id": 4,
          "result": {
            "echo": "1+1"
          }
        }
        "###);
    }

    #[test]
    fn unknown_method_replies_error() {
        let session = MemorySession::default();
        assert!(inspector().dispatch_from_frontend(r#"{"id":5,"method":"Runtime.nope"}"#, &session));
        let sent: JsonValue = serde_json::from_str(&session.sent()[0]).unwrap();
        assert_eq!(sent["error"]["code"], METHOD_NOT_FOUND);
    }

    #[test]
    fn leaves_other_frames_alone() {
        let session = MemorySession::default();
        let inspector = inspector();
        assert!(!inspector.dispatch_from_frontend(r#"{"id":1,"method":"Page.reload"}"#, &session));
        assert!(!inspector.dispatch_from_frontend("not json", &session));
        assert!(!inspector.dispatch_from_frontend(r#"{"id":1,"method":"nodot"}"#, &session));
        assert!(session.sent().is_empty());
    }
}
