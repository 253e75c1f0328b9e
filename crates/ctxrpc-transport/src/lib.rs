//! Message transport contract and channel adapters.
//!
//! The RPC engine only needs three things from a channel: send a packet,
//! subscribe to inbound packets, and close. Everything in this crate either
//! defines that contract ([`Transport`]) or is a thin adapter satisfying it:
//! - [`MemoryTransport`]: an entangled in-process pair (message-port style)
//! - [`BroadcastHub`]: every member hears every other member
//! - [`FnTransport`]: a bare send function, inbound messages forwarded by hand
//! - [`StreamTransport`]: length-prefixed packets over any async byte stream

pub mod broadcast;
pub mod codec;
pub mod error;
pub mod func;
pub mod memory;
pub mod stream;
pub mod traits;

pub use broadcast::{BroadcastHub, BroadcastMember};
pub use codec::{
    decode_packet, encode_packet, FrameConfig, PacketCodec, RawPacket, DEFAULT_MAX_DEPTH,
    DEFAULT_MAX_FRAME, HEADER_SIZE,
};
pub use error::{Result, TransportError};
pub use func::FnTransport;
pub use memory::MemoryTransport;
pub use stream::StreamTransport;
pub use traits::{Handlers, MessageHandler, Packet, Subscription, Transport};
