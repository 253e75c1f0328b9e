/// Errors raised while building or parsing wire data.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// A participant or endpoint name contains the reserved separator.
    #[error("segment {segment:?} must not contain '/'")]
    SeparatorInSegment { segment: String },

    /// A correlation id did not split into exactly three segments.
    #[error("correlation id {id:?} has {count} segments, expected 3")]
    SegmentCount { id: String, count: usize },

    /// The message is not valid JSON of the expected shape.
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    /// A field required by the message action is absent.
    #[error("message is missing field `{0}`")]
    MissingField(&'static str),

    /// A return carried both `result` and `error`, or neither.
    #[error("return must carry exactly one of `result` or `error`")]
    AmbiguousReturn,

    /// A `ref` node points at a node id not seen earlier in the value list.
    #[error("reference to unknown node {0}")]
    UnknownNode(u32),

    /// Two structured nodes in one value list share an id.
    #[error("node id {0} defined twice")]
    DuplicateNode(u32),

    /// A binary slot lies outside the packet's transfer list.
    #[error("binary slot {slot} out of range ({len} transfers)")]
    MissingTransfer { slot: usize, len: usize },

    /// A callback or getter token id contains the reserved separator, so it
    /// could not be echoed back in a correlation id.
    #[error("function token id {id:?} must not contain '/'")]
    SeparatorInToken { id: String },

    /// A getter token appeared somewhere other than an object property.
    #[error("getter token outside an object property")]
    MisplacedGetter,
}

pub type Result<T> = std::result::Result<T, WireError>;
