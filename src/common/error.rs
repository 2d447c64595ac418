use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("engine not initialized")]
    NotInitialized,

    #[error("engine disposed")]
    Disposed,

    #[error("invalid request params: {0}")]
    InvalidParams(String),

    #[error("{filename}: {message}")]
    Script { filename: String, message: String },

    #[error("script execution timeout")]
    Timeout,

    #[error("engine error: {0}")]
    Engine(#[from] rquickjs::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether this error comes from calling the gateway outside the
    /// Initialized state (host contract violation, not a plugin failure).
    pub fn is_misuse(&self) -> bool {
        self.kind().is_misuse()
    }

    /// Get the kind/category of this error.
    pub fn kind(&self) -> BridgeErrorKind {
        match self {
            BridgeError::NotInitialized => BridgeErrorKind::NotInitialized,
            BridgeError::Disposed => BridgeErrorKind::Disposed,
            BridgeError::InvalidParams(_) => BridgeErrorKind::InvalidParams,
            BridgeError::Script { .. } => BridgeErrorKind::Script,
            BridgeError::Timeout => BridgeErrorKind::Timeout,
            BridgeError::Engine(_) => BridgeErrorKind::Engine,
            BridgeError::Config(_) => BridgeErrorKind::Config,
            BridgeError::Io(_) => BridgeErrorKind::Io,
        }
    }
}

/// Lightweight error category for pattern matching without borrowing the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeErrorKind {
    NotInitialized,
    Disposed,
    InvalidParams,
    Script,
    Timeout,
    Engine,
    Config,
    Io,
}

impl BridgeErrorKind {
    pub fn is_misuse(self) -> bool {
        matches!(
            self,
            BridgeErrorKind::NotInitialized | BridgeErrorKind::Disposed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BridgeErrorKind::NotInitialized => "NOT_INITIALIZED",
            BridgeErrorKind::Disposed => "DISPOSED",
            BridgeErrorKind::InvalidParams => "INVALID_PARAMS",
            BridgeErrorKind::Script => "SCRIPT",
            BridgeErrorKind::Timeout => "TIMEOUT",
            BridgeErrorKind::Engine => "ENGINE",
            BridgeErrorKind::Config => "CONFIG",
            BridgeErrorKind::Io => "IO",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn misuse_kinds() {
        assert!(BridgeError::NotInitialized.is_misuse());
        assert!(BridgeError::Disposed.is_misuse());
        assert!(!BridgeError::Timeout.is_misuse());
        assert!(!BridgeError::InvalidParams("x".into()).is_misuse());
    }

    #[test]
    fn script_error_display() {
        let err = BridgeError::Script {
            filename: "plugin.js".into(),
            message: "ReferenceError: x is not defined".into(),
        };
        assert_eq!(err.to_string(), "plugin.js: ReferenceError: x is not defined");
        assert_eq!(err.kind().as_str(), "SCRIPT");
    }
}
