//! 请求上下文：访问器集合与句柄注册表

pub mod getters;
pub mod registry;

pub use getters::{Accessor, ContextGetters, Field, FieldKind, FieldValue};
pub use registry::{ContextRegistry, Handle, Registration};
