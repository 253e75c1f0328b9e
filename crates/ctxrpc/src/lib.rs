//! Request/response calls between execution contexts that share nothing but
//! a message channel.
//!
//! Arguments may carry functions, getters, binary buffers, and shared or
//! cyclic structure. Functions cross as tokens and can be called back from
//! the receiving side until they are released.
//!
//! # Crate Structure
//!
//! - [`transport`]: the channel contract and its adapters
//! - [`wire`]: correlation ids, message envelopes, wire values, error codes
//! - [`port`]: live values, endpoints, the router and proxies
//!
//! The most used types are re-exported at the crate root.

/// Re-export transport types.
pub mod transport {
    pub use ctxrpc_transport::*;
}

/// Re-export wire format types.
pub mod wire {
    pub use ctxrpc_wire::*;
}

/// Re-export endpoint and router types.
pub mod port {
    pub use ctxrpc_port::*;
}

pub use ctxrpc_port::{
    Array, CallFuture, Function, Implementation, Object, Port, Property, Proxy, Result, Rpc,
    RpcConfig, RpcError, Value,
};
pub use ctxrpc_transport::{Packet, Transport, TransportError};
pub use ctxrpc_wire::{CorrelationId, ErrorDescriptor};
