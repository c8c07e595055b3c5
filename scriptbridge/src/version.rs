//! Bridge and engine versions, and the `User-Agent` derived from them.

use serde::Serialize;

use crate::codec::Format;

pub const BRIDGE_VERSION: &str = env!("CARGO_PKG_VERSION");

const PRODUCT: &str = "scriptbridge";

/// What the host and the debugger are told about this bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionInfo {
    pub bridge: &'static str,
    /// Executor engine version, when the adapter reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    /// Payload format the bridge was built with.
    pub format: Format,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            bridge: BRIDGE_VERSION,
            engine: None,
            format: Format::default(),
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blank or whitespace-only engine strings are treated as unknown.
    pub fn with_engine(mut self, version: impl Into<String>) -> Self {
        let version = version.into();
        let version = version.trim();
        self.engine = (!version.is_empty()).then(|| version.to_string());
        self
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// `scriptbridge/<version>`, followed by ` engine/<version>` when the
    /// engine is known. Spaces inside the engine version become `-` so the
    /// product token stays a single word.
    pub fn user_agent(&self) -> String {
        match &self.engine {
            Some(engine) => format!(
                "{PRODUCT}/{} engine/{}",
                self.bridge,
                engine.replace(char::is_whitespace, "-")
            ),
            None => format!("{PRODUCT}/{}", self.bridge),
        }
    }
}
