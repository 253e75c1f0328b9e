/// Errors that can occur while moving packets across a channel.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The transport was closed locally or the other end went away.
    #[error("transport closed")]
    Closed,

    /// An I/O error occurred on the underlying stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Packet data could not be encoded or decoded as JSON.
    #[error("packet json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame header contains an invalid magic number.
    #[error("invalid frame magic (expected 0x4358 \"CX\")")]
    InvalidMagic,

    /// The frame exceeds the configured maximum size.
    #[error("frame too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The packet's JSON nests deeper than the configured limit.
    #[error("packet nests {depth} levels deep (max {max})")]
    TooDeep { depth: usize, max: usize },

    /// The stream ended in the middle of a frame.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,

    /// The adapter needs a Tokio runtime and none is running.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;
