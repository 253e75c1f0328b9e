//! Error codes and descriptors carried by failed returns.
//!
//! Codes follow the JSON-RPC 2.0 reserved space:
//! - `-32700`: Parse error
//! - `-32600`: Invalid request
//! - `-32601`: Method not found
//! - `-32602`: Invalid params
//! - `-32603`: Internal error
//! - `-32099` to `-32000`: Server error (application defined)

use serde::{Deserialize, Serialize};

/// The inbound data could not be parsed.
pub const PARSE_ERROR: i64 = -32700;
/// The message is not a valid request.
pub const INVALID_REQUEST: i64 = -32600;
/// No method or registered callback matches the call.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// The call parameters could not be decoded.
pub const INVALID_PARAMS: i64 = -32602;
/// The invoked function failed or panicked.
pub const INTERNAL_ERROR: i64 = -32603;
/// Lowest application-defined server error code.
pub const SERVER_ERROR_MIN: i64 = -32099;
/// Highest application-defined server error code.
pub const SERVER_ERROR_MAX: i64 = -32000;

/// True for codes in the application-defined server error range.
pub fn is_server_error(code: i64) -> bool {
    (SERVER_ERROR_MIN..=SERVER_ERROR_MAX).contains(&code)
}

/// The error half of a return message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct ErrorDescriptor {
    pub code: i64,
    pub message: String,
    /// Diagnostic trace from the remote side, when it has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorDescriptor {
    /// A descriptor with an explicit code.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            stack: None,
        }
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(PARSE_ERROR, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("method not found: {method}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }

    /// An application error. Codes outside `-32099..=-32000` fall back to
    /// `-32000`.
    pub fn server(code: i64, message: impl Into<String>) -> Self {
        let code = if is_server_error(code) {
            code
        } else {
            SERVER_ERROR_MAX
        };
        Self::new(code, message)
    }

    /// Attach a diagnostic trace.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn constructors_use_reserved_codes() {
        assert_eq!(ErrorDescriptor::parse_error("x").code, -32700);
        assert_eq!(ErrorDescriptor::invalid_request("x").code, -32600);
        assert_eq!(ErrorDescriptor::method_not_found("nope").code, -32601);
        assert_eq!(ErrorDescriptor::invalid_params("x").code, -32602);
        assert_eq!(ErrorDescriptor::internal("x").code, -32603);
    }

    #[test]
    fn server_codes_are_clamped_to_range() {
        assert_eq!(ErrorDescriptor::server(-32042, "x").code, -32042);
        assert_eq!(ErrorDescriptor::server(7, "x").code, SERVER_ERROR_MAX);
        assert!(is_server_error(-32099));
        assert!(!is_server_error(-32100));
    }

    #[test]
    fn stack_is_omitted_when_absent() {
        let plain = serde_json::to_value(ErrorDescriptor::internal("boom")).unwrap();
        assert_eq!(plain, json!({"code": -32603, "message": "boom"}));

        let traced = ErrorDescriptor::internal("boom").with_stack("at run");
        let value = serde_json::to_value(&traced).unwrap();
        assert_eq!(value["stack"], "at run");
        assert_eq!(serde_json::from_value::<ErrorDescriptor>(value).unwrap(), traced);
    }

    #[test]
    fn display_includes_message_and_code() {
        let err = ErrorDescriptor::internal("boom");
        assert_eq!(err.to_string(), "boom (code -32603)");
    }
}
