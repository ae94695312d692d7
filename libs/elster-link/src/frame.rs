//! Elster frame codec
//!
//! Every bus frame carries an 11-bit arbitration id (the sender) and eight
//! payload bytes:
//!
//! ```text
//!   A1 00  FA  01 0C  01 41  00
//!   |---|  ||  |---|  |---|
//!   1)     2)  3)     4)
//! ```
//!
//! 1. Partner device id packed with the frame type: the high nibble of byte 0
//!    holds `id >> 3 & 0xF0`, the low nibble the type (1 request, 2 data), the
//!    low nibble of byte 1 holds `id & 0x0F`. Byte 1 `0x79` marks a broadcast.
//! 2. `0xFA` announces an extended (two byte) register index. Indices up to
//!    `0xFF` are written directly into byte 2 instead.
//! 3. Big-endian register index (extended form only).
//! 4. Register value, directly after the register field.

use crate::error::{ElsterError, Result};
use crate::registers::RegisterDescriptor;
use crate::value::{self, TypedValue};

/// Frame type flag: value request
pub const REQUEST: u8 = 0x01;
/// Frame type flag: value data (reply or write)
pub const DATA: u8 = 0x02;
/// Byte 1 pattern of periodic broadcast frames
pub const BROADCAST: u8 = 0x79;

/// Marker byte announcing an extended register index
pub const EXTENDED_REGISTER: u8 = 0xFA;

/// Largest standard (11-bit) CAN identifier
pub const MAX_STANDARD_ID: u16 = 0x7FF;

/// Payload length of every Elster frame
pub const FRAME_LEN: usize = 8;

/// Standard CAN frame with a full 8-byte payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CanFrame {
    /// 11-bit arbitration id of the sending device
    pub id: u16,
    /// Payload bytes
    pub data: [u8; FRAME_LEN],
}

impl CanFrame {
    /// Create a new standard frame
    pub fn new(id: u16, data: [u8; FRAME_LEN]) -> Result<Self> {
        if id > MAX_STANDARD_ID {
            return Err(ElsterError::invalid_frame(format!(
                "standard CAN id 0x{id:X} exceeds 0x{MAX_STANDARD_ID:X}"
            )));
        }
        Ok(Self { id, data })
    }

    /// Create a frame from a possibly shorter payload, zero padded
    pub fn from_slice(id: u16, payload: &[u8]) -> Result<Self> {
        if payload.len() > FRAME_LEN {
            return Err(ElsterError::invalid_frame(format!(
                "CAN 2.0 data must be <= {FRAME_LEN} bytes, got {}",
                payload.len()
            )));
        }
        let mut data = [0u8; FRAME_LEN];
        data[..payload.len()].copy_from_slice(payload);
        Self::new(id, data)
    }

    /// Data length code (always 8 for Elster frames)
    pub fn dlc(&self) -> u8 {
        FRAME_LEN as u8
    }

    /// Decoded device header from bytes 0-1
    pub fn header(&self) -> FrameHeader {
        FrameHeader::decode([self.data[0], self.data[1]])
    }

    /// Register field starting at byte 2
    pub fn register_field(&self) -> RegisterField {
        // An 8-byte payload always covers the extended form
        read_register_field(&self.data)
    }

    pub fn is_data(&self) -> bool {
        self.data[0] & DATA != 0
    }
}

/// Device id and frame-type flags carried in payload bytes 0-1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub device_id: u16,
    pub is_request: bool,
    pub is_data: bool,
    pub is_broadcast: bool,
}

impl FrameHeader {
    pub fn decode(bytes: [u8; 2]) -> Self {
        let flags = bytes[0] & 0x0F;
        Self {
            device_id: decode_device_id(bytes),
            is_request: flags & REQUEST != 0,
            is_data: flags & DATA != 0,
            is_broadcast: bytes[1] == BROADCAST,
        }
    }
}

/// Register index and value bytes of a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterField {
    pub address: u16,
    pub value: [u8; 2],
    /// Offset of the value bytes (3 short form, 5 extended form)
    pub value_offset: usize,
}

/// Pack a device id and frame-type flag into payload bytes 0-1
pub fn encode_device_header(device_id: u16, flag: u8) -> [u8; 2] {
    [
        ((device_id >> 3) as u8 & 0xF0) | flag,
        device_id as u8 & 0x0F,
    ]
}

/// Recover the device id from payload bytes 0-1
///
/// Only bits 7-10 and 0-3 of the id survive the header packing, so this is
/// not an inverse of [`encode_device_header`] for ids using bits 4-6. Bus
/// participants conventionally sit on multiples of 0x80 plus a low nibble.
pub fn decode_device_id(bytes: [u8; 2]) -> u16 {
    (u16::from(bytes[0] & 0xF0) << 3) + u16::from(bytes[1] & 0x0F)
}

/// Write the register index at byte 2 and return the value offset
pub fn encode_register_address(data: &mut [u8; FRAME_LEN], address: u16) -> usize {
    if address > 0xFF {
        data[2] = EXTENDED_REGISTER;
        data[3..5].copy_from_slice(&address.to_be_bytes());
        5
    } else {
        data[2] = address as u8;
        3
    }
}

/// Read the register index and value bytes of a payload
pub fn decode_register_field(data: &[u8]) -> Result<RegisterField> {
    let extended = data.get(2) == Some(&EXTENDED_REGISTER);
    let needed = if extended { 7 } else { 5 };

    if data.len() < needed {
        return Err(ElsterError::invalid_frame(format!(
            "payload of {} bytes is too short for the register field",
            data.len()
        )));
    }

    Ok(read_register_field(data))
}

// Caller guarantees the payload covers the register field
fn read_register_field(data: &[u8]) -> RegisterField {
    if data[2] == EXTENDED_REGISTER {
        RegisterField {
            address: u16::from_be_bytes([data[3], data[4]]),
            value: [data[5], data[6]],
            value_offset: 5,
        }
    } else {
        RegisterField {
            address: u16::from(data[2]),
            value: [data[3], data[4]],
            value_offset: 3,
        }
    }
}

/// Build a request for `register` addressed to `target_id`
pub fn build_request_frame(
    sender_id: u16,
    target_id: u16,
    register: &RegisterDescriptor,
) -> Result<CanFrame> {
    let mut data = [0u8; FRAME_LEN];
    data[..2].copy_from_slice(&encode_device_header(target_id, REQUEST));
    encode_register_address(&mut data, register.address);
    CanFrame::new(sender_id, data)
}

/// Build a data frame carrying `value` for `register`
pub fn build_data_frame(
    sender_id: u16,
    target_id: u16,
    value: &TypedValue,
    register: &RegisterDescriptor,
) -> Result<CanFrame> {
    let payload = value::encode(value, register.kind)?;

    let mut data = [0u8; FRAME_LEN];
    data[..2].copy_from_slice(&encode_device_header(target_id, DATA));
    let offset = encode_register_address(&mut data, register.address);
    data[offset..offset + 2].copy_from_slice(&payload);
    CanFrame::new(sender_id, data)
}
