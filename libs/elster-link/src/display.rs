//! Human-readable frame and value output
//!
//! Frame lines follow the `candump` layout of can-utils, extended with the
//! decoded device id, register and value.

use std::fmt::{self, Write};

use crate::error::ElsterError;
use crate::frame::CanFrame;
use crate::registers::{RegisterDescriptor, RegisterTable};
use crate::value::{self, TypedValue};

/// Register names are cut to this width
const NAME_WIDTH: usize = 20;

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Absent => f.write_str("n/a"),
            TypedValue::Decimal(v) => write!(f, "{v:.1}"),
            TypedValue::TimeOfDay(s) | TypedValue::Date(s) | TypedValue::ScheduleWindow(s) => {
                f.write_str(s)
            },
            TypedValue::Bool(b) => write!(f, "{b}"),
            TypedValue::Unsigned16(v) => write!(f, "0x{v:04X}"),
            TypedValue::Byte(v) => write!(f, "0x{v:04X}"),
            TypedValue::Raw(bytes) => write!(f, "0x{:04X}", u16::from_be_bytes(*bytes)),
        }
    }
}

/// Slice without its trailing zero bytes
pub fn trim_trailing_zeros(data: &[u8]) -> &[u8] {
    let end = data.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &data[..end]
}

/// Bytes as ASCII, non-printable ones replaced by `.`
pub fn printable_ascii(data: &[u8]) -> String {
    data.iter()
        .map(|&b| if (32..=126).contains(&b) { b as char } else { '.' })
        .collect()
}

/// One `candump`-style line for a frame
///
/// Data frames of registers known to `table` get the register name and the
/// decoded value appended.
pub fn format_frame(frame: &CanFrame, table: &RegisterTable) -> String {
    let data = trim_trailing_zeros(&frame.data);
    let hex = data
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ");
    let length = format!("[{:x}]", frame.dlc());
    let chars = format!("'{}'", printable_ascii(data));
    let header = frame.header();
    let field = frame.register_field();

    let mut line = format!(
        "{:<4x} {:<3} {:<24} {:<10} {:>6x} {:04X} ",
        frame.id, length, hex, chars, header.device_id, field.address
    );

    if header.is_data {
        if let Some(register) = table.lookup(field.address) {
            let value = match value::decode(field.value, register.kind) {
                Ok(v) => v.to_string(),
                Err(_) => "invalid".to_string(),
            };
            // Writing into a String cannot fail
            let _ = write!(line, "{:<NAME_WIDTH$} {:>8}", truncated_name(register), value);
        }
    }

    line
}

/// `index name value` line of a decoded register
pub fn format_register_value(register: &RegisterDescriptor, value: &TypedValue) -> String {
    let value = value.to_string();
    format!(
        "{:04X} {:<NAME_WIDTH$} {:>8}",
        register.address,
        truncated_name(register),
        value
    )
}

/// `index name error` line of a register whose payload did not decode
pub fn format_register_error(register: &RegisterDescriptor, error: &ElsterError) -> String {
    format!(
        "{:04X} {:<NAME_WIDTH$} {}",
        register.address,
        truncated_name(register),
        error
    )
}

fn truncated_name(register: &RegisterDescriptor) -> &str {
    match register.name.char_indices().nth(NAME_WIDTH) {
        Some((end, _)) => &register.name[..end],
        None => register.name,
    }
}
