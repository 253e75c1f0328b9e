use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Deserialize;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Result, TransportError};
use crate::traits::Packet;

/// Frame header: magic (2) + JSON length (4) + transfer count (2) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Magic bytes: "CX" (0x43 0x58).
pub const MAGIC: [u8; 2] = [0x43, 0x58];

/// Length prefix in front of every transfer buffer.
const TRANSFER_PREFIX: usize = 4;

/// Default maximum frame size: 16 MiB.
pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

/// Default maximum JSON nesting depth of a packet's data.
pub const DEFAULT_MAX_DEPTH: usize = 512;

/// Configuration for the packet codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum total frame size in bytes (header included). Default: 16 MiB.
    pub max_frame_size: usize,
    /// Maximum nesting of arrays and objects in the JSON body, checked on
    /// both send and receive. Default: 512.
    pub max_depth: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// One complete frame with its JSON body still unparsed.
///
/// The framing layer only moves bytes; a body that fails to parse costs one
/// packet, never the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    pub json: Bytes,
    pub transfer: Vec<Bytes>,
}

impl RawPacket {
    /// Parse the JSON body.
    ///
    /// serde_json's built-in recursion limit is lifted; the depth is bounded
    /// by `max_depth` with a scan that does not recurse.
    pub fn parse(self, max_depth: usize) -> Result<Packet> {
        let depth = nesting_depth(&self.json);
        if depth > max_depth {
            return Err(TransportError::TooDeep {
                depth,
                max: max_depth,
            });
        }
        let mut de = serde_json::Deserializer::from_slice(&self.json);
        de.disable_recursion_limit();
        let data = serde_json::Value::deserialize(&mut de)?;
        de.end()?;
        Ok(Packet {
            data,
            transfer: self.transfer,
        })
    }
}

/// Encode a packet into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────────┬────────────┬────────────┬──────────────┬───────────────────────────┐
/// │ Magic (2B) │ JSON len   │ Transfers  │ JSON bytes   │ per transfer:             │
/// │ 0x43 0x58  │ (4B LE)    │ (2B LE)    │              │ len (4B LE) + raw bytes   │
/// └────────────┴────────────┴────────────┴──────────────┴───────────────────────────┘
/// ```
pub fn encode_packet(packet: &Packet, dst: &mut BytesMut, config: &FrameConfig) -> Result<()> {
    let json = serde_json::to_vec(&packet.data)?;
    let depth = nesting_depth(&json);
    if depth > config.max_depth {
        return Err(TransportError::TooDeep {
            depth,
            max: config.max_depth,
        });
    }
    if packet.transfer.len() > u16::MAX as usize {
        return Err(TransportError::PayloadTooLarge {
            size: packet.transfer.len(),
            max: u16::MAX as usize,
        });
    }

    let total = HEADER_SIZE
        + json.len()
        + packet
            .transfer
            .iter()
            .map(|buffer| TRANSFER_PREFIX + buffer.len())
            .sum::<usize>();
    let limit = config.max_frame_size.min(u32::MAX as usize);
    if total > limit {
        return Err(TransportError::PayloadTooLarge {
            size: total,
            max: limit,
        });
    }

    dst.reserve(total);
    dst.put_slice(&MAGIC);
    dst.put_u32_le(json.len() as u32);
    dst.put_u16_le(packet.transfer.len() as u16);
    dst.put_slice(&json);
    for buffer in &packet.transfer {
        dst.put_u32_le(buffer.len() as u32);
        dst.put_slice(buffer);
    }
    Ok(())
}

/// Decode one frame from a buffer without parsing its JSON body.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_packet(src: &mut BytesMut, max_frame: usize) -> Result<Option<RawPacket>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }
    if src[0..2] != MAGIC {
        return Err(TransportError::InvalidMagic);
    }

    let json_len = u32::from_le_bytes([src[2], src[3], src[4], src[5]]) as usize;
    let transfers = u16::from_le_bytes([src[6], src[7]]) as usize;

    // Walk the transfer prefixes to learn the full frame length.
    let mut total = HEADER_SIZE + json_len;
    let mut lengths = Vec::with_capacity(transfers);
    for _ in 0..transfers {
        if total > max_frame {
            break;
        }
        if src.len() < total + TRANSFER_PREFIX {
            return check_partial(total, max_frame);
        }
        let at = total;
        let len =
            u32::from_le_bytes([src[at], src[at + 1], src[at + 2], src[at + 3]]) as usize;
        lengths.push(len);
        total += TRANSFER_PREFIX + len;
    }

    if total > max_frame {
        return Err(TransportError::PayloadTooLarge {
            size: total,
            max: max_frame,
        });
    }
    if src.len() < total {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let json = src.split_to(json_len).freeze();
    let mut transfer = Vec::with_capacity(transfers);
    for len in lengths {
        src.advance(TRANSFER_PREFIX);
        transfer.push(src.split_to(len).freeze());
    }

    Ok(Some(RawPacket { json, transfer }))
}

fn check_partial(known: usize, max_frame: usize) -> Result<Option<RawPacket>> {
    if known > max_frame {
        return Err(TransportError::PayloadTooLarge {
            size: known,
            max: max_frame,
        });
    }
    Ok(None)
}

/// Deepest array/object nesting in a JSON text. Brackets inside strings do
/// not count.
fn nesting_depth(json: &[u8]) -> usize {
    let mut depth = 0usize;
    let mut deepest = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for &byte in json {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'[' | b'{' => {
                depth += 1;
                deepest = deepest.max(depth);
            }
            b']' | b'}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    deepest
}

/// `tokio_util` codec: decodes [`RawPacket`] frames, encodes [`Packet`]s.
#[derive(Debug, Clone, Default)]
pub struct PacketCodec {
    config: FrameConfig,
}

impl PacketCodec {
    /// Codec with explicit configuration.
    pub fn with_config(config: FrameConfig) -> Self {
        Self { config }
    }

    /// Current configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl Decoder for PacketCodec {
    type Item = RawPacket;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RawPacket>> {
        decode_packet(src, self.config.max_frame_size)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<RawPacket>> {
        match self.decode(src)? {
            Some(packet) => Ok(Some(packet)),
            None if src.is_empty() => Ok(None),
            None => Err(TransportError::ConnectionClosed),
        }
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = TransportError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<()> {
        encode_packet(&packet, dst, &self.config)
    }
}
