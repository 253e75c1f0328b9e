//! Endpoints, routing and value marshaling for ctxrpc.
//!
//! An [`Rpc`] router owns named [`Port`]s for one participant and shares a
//! single [`Transport`](ctxrpc_transport::Transport) between them. Register
//! an [`Implementation`] to serve an endpoint; [`Rpc::acquire`] a [`Proxy`]
//! to call one on the other side.
//!
//! Arguments and results are [`Value`]s. Functions inside them cross as
//! tokens and come out on the other side as remote [`Function`]s that call
//! back to their owner; shared and cyclic structure is preserved.

pub mod config;
pub mod deserialize;
pub mod error;
pub mod function;
pub mod implementation;
pub mod port;
pub mod proxy;
pub mod router;
pub mod serialize;
pub mod value;

pub use config::RpcConfig;
pub use deserialize::deserialize;
pub use error::{Result, RpcError};
pub use function::{CallFuture, Function, RemoteLink};
pub use implementation::Implementation;
pub use port::Port;
pub use proxy::Proxy;
pub use router::Rpc;
pub use serialize::{serialize, Serialized};
pub use value::{Array, Object, Property, Slot, Value};
