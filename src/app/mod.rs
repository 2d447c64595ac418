//! 宿主接入面
pub mod ffi;
