//! Wire format for ctxrpc messages.
//!
//! This crate knows nothing about live functions or transports. It defines:
//! - [`CorrelationId`]: the `participant/endpoint/action` composite key
//! - [`Message`]: call, return and cleanup envelopes with their `_meta` block
//! - [`WireValue`]: the JSON encoding of argument and result graphs, with
//!   node ids for shared references and tokens standing in for functions
//! - [`ErrorDescriptor`]: JSON-RPC style error codes carried by returns

pub mod codes;
pub mod error;
pub mod id;
pub mod message;
pub mod value;

pub use codes::ErrorDescriptor;
pub use error::{Result, WireError};
pub use id::{CorrelationId, SEPARATOR};
pub use message::{now_millis, Action, Body, Message, Outcome};
pub use value::{FunctionToken, NodeId, WireNode, WireProperty, WireValue};
