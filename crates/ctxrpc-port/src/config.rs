use std::time::Duration;

/// Router-wide settings shared by every endpoint it creates.
#[derive(Debug, Clone, Default)]
pub struct RpcConfig {
    /// Deadline for an outbound call. `None` (the default) waits forever;
    /// with a deadline, an unanswered call is removed from the pending table
    /// and fails with `RpcError::Timeout`.
    pub call_timeout: Option<Duration>,
}

impl RpcConfig {
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }
}
