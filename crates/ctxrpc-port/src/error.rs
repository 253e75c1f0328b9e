use std::time::Duration;

use ctxrpc_wire::ErrorDescriptor;

/// Errors surfaced by endpoints, routers and proxies.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The remote side reported a failure.
    #[error("remote error: {0}")]
    Remote(ErrorDescriptor),

    /// A local function failed. Sent to the caller as an internal error
    /// carrying this message.
    #[error("{0}")]
    Failed(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] ctxrpc_transport::TransportError),

    /// Identifier or message format error.
    #[error("wire error: {0}")]
    Wire(#[from] ctxrpc_wire::WireError),

    /// JSON conversion error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// No return arrived within the configured deadline.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The endpoint went away before the call settled.
    #[error("endpoint closed before the call settled")]
    Closed,

    /// The remote function handle was released.
    #[error("remote function {0} was released")]
    Released(String),

    /// The value holds something that has no plain-data form.
    #[error("value is not plain data: {0}")]
    NotData(String),
}

impl RpcError {
    /// A local failure with a message for the caller.
    pub fn failed(message: impl std::fmt::Display) -> Self {
        RpcError::Failed(message.to_string())
    }

    /// The remote descriptor, if this error came from the other side.
    pub fn remote(&self) -> Option<&ErrorDescriptor> {
        match self {
            RpcError::Remote(descriptor) => Some(descriptor),
            _ => None,
        }
    }

    /// The descriptor sent back when a local invocation ends with this error.
    ///
    /// Remote descriptors pass through unchanged so a specific code set by a
    /// nested call survives; everything else is an internal error.
    pub fn to_descriptor(&self) -> ErrorDescriptor {
        match self {
            RpcError::Remote(descriptor) => descriptor.clone(),
            RpcError::Failed(message) => ErrorDescriptor::internal(message.clone()),
            other => ErrorDescriptor::internal(other.to_string()),
        }
    }
}

impl From<ErrorDescriptor> for RpcError {
    fn from(descriptor: ErrorDescriptor) -> Self {
        RpcError::Remote(descriptor)
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
