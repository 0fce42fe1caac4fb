use thiserror::Error;

/// Raw result codes shared by every runtime backend. Values follow the
/// OpenXR `XrResult` numbering so backends can forward codes untouched.
pub mod code {
    pub const VALIDATION_FAILURE: i32 = -1;
    pub const RUNTIME_FAILURE: i32 = -2;
    pub const HANDLE_INVALID: i32 = -12;
    pub const SESSION_RUNNING: i32 = -14;
    pub const SESSION_NOT_RUNNING: i32 = -16;
    pub const TIME_INVALID: i32 = -30;
    pub const FORM_FACTOR_UNAVAILABLE: i32 = -35;
    pub const CALL_ORDER_INVALID: i32 = -37;
    pub const ACTIONSETS_ALREADY_ATTACHED: i32 = -47;
}

#[derive(Debug, Error)]
pub enum XrError {
    #[error("{call} failed with result {code}")]
    Runtime { call: &'static str, code: i32 },
    #[error("head-mounted display form factor is currently unavailable")]
    FormFactorUnavailable,
    #[error("required extension {0} is not supported by the runtime")]
    MissingExtension(String),
    #[error("no runtime swapchain format is supported for {0}")]
    UnsupportedFormat(&'static str),
    #[error("runtime located {located} views but {expected} were configured")]
    ViewCountMismatch { expected: usize, located: usize },
    #[error("runtime reported no environment blend modes")]
    NoBlendModes,
    #[error("xr system is not initialized")]
    NotInitialized,
    #[error("xr loader error: {0}")]
    Loader(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl XrError {
    pub fn runtime(call: &'static str, code: i32) -> Self {
        XrError::Runtime { call, code }
    }

    /// Only a missing headset can be retried; everything else needs a rebuild.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, XrError::FormFactorUnavailable)
    }
}

pub type XrResult<T> = Result<T, XrError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_form_factor_unavailable_is_recoverable() {
        assert!(XrError::FormFactorUnavailable.is_recoverable());
        assert!(!XrError::runtime("wait_frame", code::RUNTIME_FAILURE).is_recoverable());
        assert!(!XrError::NoBlendModes.is_recoverable());
    }

    #[test]
    fn runtime_error_names_failed_call() {
        let err = XrError::runtime("begin_frame", code::CALL_ORDER_INVALID);
        assert_eq!(err.to_string(), "begin_frame failed with result -37");
    }
}
