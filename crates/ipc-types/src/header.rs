//! Fixed-layout message framing (spec §3, §4.2).
//!
//! The wire layout and the version/forward-compatibility policy mirror the
//! tag-prefixed binary codec in `mesh-rt::dist::wire` (STF): a version byte
//! first, then fixed fields in declaration order, little-endian. Unknown
//! trailing bytes are ignored on decode rather than rejected, the same
//! forward-compatibility stance STF takes for appended fields.

use crate::error::IpcError;
use crate::object_id::ObjectId;

/// Sentinel bytes at the front of every header, checked first on decode.
pub const MAGIC: [u8; 4] = *b"DASP";

/// Current on-wire header version. Anything greater is rejected as
/// forward-incompatible (the peer may be newer); readers that must stay
/// compatible with very old peers use the [`v1`] projection instead.
pub const CURRENT_VERSION: u16 = 1;

/// Header bit indicating the body slot holds a shared-memory block name
/// rather than inline payload bytes.
pub const FLAG_LARGE_BODY: u16 = 0x0001;

/// Fixed-size on-wire size of [`MessageHeader`], in bytes.
pub const HEADER_SIZE: usize = 4 // magic
    + 2 // version
    + 1 // message_type
    + 2 // flags
    + 8 // call_id
    + 4 // interface_id
    + 2 // method_id
    + 4 // error_code
    + 4 // body_size
    + 2 // session_id
    + 2 // generation
    + 4; // local_id

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Request = 1,
    Response = 2,
    Event = 3,
    Heartbeat = 4,
}

impl MessageType {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MessageType::Request),
            2 => Some(MessageType::Response),
            3 => Some(MessageType::Event),
            4 => Some(MessageType::Heartbeat),
            _ => None,
        }
    }
}

/// A decoded IPC message header. Field order here matches the wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub version: u16,
    pub message_type: MessageType,
    pub flags: u16,
    pub call_id: u64,
    pub interface_id: u32,
    pub method_id: u16,
    pub error_code: i32,
    pub body_size: u32,
    pub object_id: ObjectId,
}

impl MessageHeader {
    pub fn request(interface_id: u32, method_id: u16, call_id: u64, object_id: ObjectId, body_size: u32) -> Self {
        MessageHeader {
            version: CURRENT_VERSION,
            message_type: MessageType::Request,
            flags: 0,
            call_id,
            interface_id,
            method_id,
            error_code: 0,
            body_size,
            object_id,
        }
    }

    pub fn response(request: &MessageHeader, error_code: i32, body_size: u32) -> Self {
        MessageHeader {
            version: CURRENT_VERSION,
            message_type: MessageType::Response,
            flags: 0,
            call_id: request.call_id,
            interface_id: request.interface_id,
            method_id: request.method_id,
            error_code,
            body_size,
            object_id: request.object_id,
        }
    }

    pub fn has_large_body(&self) -> bool {
        self.flags & FLAG_LARGE_BODY != 0
    }

    pub fn set_large_body(&mut self, large: bool) {
        if large {
            self.flags |= FLAG_LARGE_BODY;
        } else {
            self.flags &= !FLAG_LARGE_BODY;
        }
    }

    /// Serialize into the fixed [`HEADER_SIZE`]-byte wire form.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        let mut pos = 0;
        macro_rules! put {
            ($bytes:expr) => {{
                let b = $bytes;
                buf[pos..pos + b.len()].copy_from_slice(&b);
                pos += b.len();
            }};
        }
        put!(MAGIC);
        put!(self.version.to_le_bytes());
        put!([self.message_type as u8]);
        put!(self.flags.to_le_bytes());
        put!(self.call_id.to_le_bytes());
        put!(self.interface_id.to_le_bytes());
        put!(self.method_id.to_le_bytes());
        put!(self.error_code.to_le_bytes());
        put!(self.body_size.to_le_bytes());
        put!(self.object_id.session_id.to_le_bytes());
        put!(self.object_id.generation.to_le_bytes());
        put!(self.object_id.local_id.to_le_bytes());
        debug_assert_eq!(pos, HEADER_SIZE);
        buf
    }

    /// Decode a header from the front of `data`. Trailing bytes beyond
    /// [`HEADER_SIZE`] are ignored (forward-compatibility: future fields
    /// may be appended at the tail).
    pub fn decode(data: &[u8]) -> Result<Self, IpcError> {
        if data.len() < HEADER_SIZE {
            return Err(IpcError::invalid_message_header("buffer shorter than header"));
        }
        if data[0..4] != MAGIC {
            return Err(IpcError::invalid_message_header("bad magic"));
        }
        let mut pos = 4;
        macro_rules! take {
            ($ty:ty) => {{
                const N: usize = std::mem::size_of::<$ty>();
                let mut b = [0u8; N];
                b.copy_from_slice(&data[pos..pos + N]);
                pos += N;
                <$ty>::from_le_bytes(b)
            }};
        }
        let version = take!(u16);
        if version > CURRENT_VERSION {
            return Err(IpcError::invalid_message_header(format!(
                "unsupported version {version}, current is {CURRENT_VERSION}"
            )));
        }
        let message_type_byte = data[pos];
        pos += 1;
        let message_type = MessageType::from_u8(message_type_byte)
            .ok_or_else(|| IpcError::invalid_message_header(format!("unknown message type {message_type_byte}")))?;
        let flags = take!(u16);
        let call_id = take!(u64);
        let interface_id = take!(u32);
        let method_id = take!(u16);
        let error_code = take!(i32);
        let body_size = take!(u32);
        let session_id = take!(u16);
        let generation = take!(u16);
        let local_id = take!(u32);

        Ok(MessageHeader {
            version,
            message_type,
            flags,
            call_id,
            interface_id,
            method_id,
            error_code,
            body_size,
            object_id: ObjectId { session_id, generation, local_id },
        })
    }
}

/// The legacy v1 header projection: widens `interface_id` into a 16-byte
/// GUID for readers that predate 32-bit compact interface ids.
///
/// Open-question resolution (SPEC_FULL.md): when no real GUID is known for
/// an `interface_id`, the writer zero-extends it into a reserved synthetic
/// namespace rather than failing the send.
pub mod v1 {
    use super::MessageHeader;
    use crate::guid::Guid;

    /// Reserved synthetic GUID namespace: `00000000-0000-0000-0000-0000########`.
    const SYNTHETIC_PREFIX: [u8; 10] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0];

    pub fn synthetic_guid_for_interface_id(interface_id: u32) -> Guid {
        let mut bytes = [0u8; 16];
        bytes[..10].copy_from_slice(&SYNTHETIC_PREFIX);
        bytes[12..16].copy_from_slice(&interface_id.to_be_bytes());
        Guid::from_bytes(bytes)
    }

    /// True if `guid` lies in the reserved synthetic namespace produced by
    /// [`synthetic_guid_for_interface_id`].
    pub fn is_synthetic(guid: &Guid) -> bool {
        guid.as_bytes()[..10] == SYNTHETIC_PREFIX
    }

    /// Project a v2+ header's 32-bit `interface_id` into a 16-byte `type_id`
    /// for a v1-only peer.
    pub fn to_v1_type_id(header: &MessageHeader) -> Guid {
        synthetic_guid_for_interface_id(header.interface_id)
    }

    /// Recover an `interface_id` from a v1 header's `type_id`. If the GUID
    /// is outside the synthetic namespace it is still accepted (opaque
    /// legacy data, per SPEC_FULL.md) and its low 4 bytes are used as-is.
    pub fn from_v1_type_id(type_id: &Guid) -> u32 {
        type_id.low_u32()
    }

}
