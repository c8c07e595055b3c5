//! scriptbridge: the bridge between a host application and an embedded
//! script executor.
//!
//! Marshals calls and payloads in both directions, owns the executor
//! lifecycle, routes debugger traffic and correlates async resource fetches.

pub mod bridge;
pub mod callback;
pub mod code_cache;
pub mod codec;
pub mod config;
pub mod correlator;
pub mod debug;
pub mod error;
pub mod executor;
pub mod logging;
pub mod protocol;
pub mod resource;
pub mod task_runner;
pub mod value;
pub mod version;

#[cfg(test)]
mod test_support;

pub use bridge::{Bridge, BridgeBuilder, BridgeState};
pub use callback::{BridgeCallback, CallbackSlot, NativeCallback};
pub use codec::{Codec, CodecError, Format};
pub use config::BridgeConfig;
pub use logging::{LogFormat, LogSettings};
pub use correlator::{PendingResource, Reply, RequestCorrelator, RequestId};
pub use error::{BridgeError, FetchError};
pub use executor::{Executor, InitParams, RuntimeHandle, ScriptRequest};
pub use protocol::{CallEnvelope, EnvelopeError};
pub use resource::{ResourceRequest, ResourceResolver, RetCode, UriResource};
pub use value::Value;
pub use version::{BRIDGE_VERSION, VersionInfo};
