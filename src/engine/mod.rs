//! 插件引擎：快照、线程私有实例与对外网关

pub mod finding;
pub mod gateway;
mod isolate;
pub mod snapshot;

pub use finding::{Action, Finding, TIMEOUT_MESSAGE};
pub use gateway::{EngineGateway, GatewayState};
pub use snapshot::{Plugin, Snapshot};
