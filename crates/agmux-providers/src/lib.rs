//! Provider abstraction and concrete backend adapters (spec §4.1-§4.3).
//!
//! `traits` defines the normalized surface (`Provider`, `LongRunningProvider`,
//! `ExecuteConfig`, `ExecuteResult`); `bridge` is the single generic event
//! pump every concrete backend spawns once per subprocess; `sdk`, `rpc`, and
//! `oneshot` are the three concrete backends named abstractly in spec §1;
//! `registry` selects one by name.

mod cancellation;
mod error;
mod event;

pub mod bridge;
pub mod oneshot;
pub mod registry;
pub mod rpc;
pub mod sdk;
pub mod traits;

pub use cancellation::CancellationToken;
pub use error::{Error, Result};
pub use event::{AgentEvent, NativeEvent, StreamEventKind};
pub use registry::{ProviderKind, spawn_provider};
pub use traits::{
    EventHandler, EventStream, ExecuteConfig, ExecuteResult, LongRunningProvider, PermissionMode,
    Provider,
};
