pub mod buffer;
pub mod error;

pub use buffer::{AsBufferView, BufferKind, BufferView, OwnedBuffer};
pub use error::{BridgeError, BridgeErrorKind};

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
