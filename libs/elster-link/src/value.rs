//! Register value codec
//!
//! Every Elster register carries a 2-byte payload. How those two bytes are
//! read depends on the register's [`ValueKind`]; the pattern `80 00` means the
//! device has no value and wins over every kind.

use std::fmt;

use crate::error::{ElsterError, Result};

/// Payload sent by a device that has no value for the register
pub const ABSENT_PAYLOAD: [u8; 2] = [0x80, 0x00];

/// Fixed-point divisor of a decimal register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecimalScale {
    /// Value / 10
    Tenths,
    /// Value / 100
    Hundredths,
    /// Value / 1000
    Thousandths,
}

impl DecimalScale {
    pub fn factor(&self) -> f64 {
        match self {
            Self::Tenths => 10.0,
            Self::Hundredths => 100.0,
            Self::Thousandths => 1000.0,
        }
    }
}

/// Wire representation of a register value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Little-endian unsigned 16-bit integer
    Unsigned16Le,
    /// Big-endian unsigned 16-bit integer divided by a scale
    Decimal(DecimalScale),
    /// First payload byte
    Byte,
    /// `HH:MM`, hour in the low byte and minute in the high byte
    TimeOfDay,
    /// `DD.MM.`, day in the high byte and month in the low byte
    Date,
    /// `HH:MM-HH:MM` in quarter-hour steps
    ScheduleWindow,
    /// `01 00` is true
    LittleBool,
    /// `00 01` is true
    Bool,
    /// No dedicated decoder, payload is passed through
    Raw,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unsigned16Le => "little_endian",
            Self::Decimal(DecimalScale::Tenths) => "dec_val",
            Self::Decimal(DecimalScale::Hundredths) => "cent_val",
            Self::Decimal(DecimalScale::Thousandths) => "mil_val",
            Self::Byte => "byte",
            Self::TimeOfDay => "time",
            Self::Date => "date",
            Self::ScheduleWindow => "time_domain",
            Self::LittleBool => "little_bool",
            Self::Bool => "bool",
            Self::Raw => "raw",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded register value
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    /// Device reported no value
    Absent,
    Unsigned16(u16),
    Decimal(f64),
    Byte(u8),
    TimeOfDay(String),
    Date(String),
    ScheduleWindow(String),
    Bool(bool),
    Raw([u8; 2]),
}

impl TypedValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, TypedValue::Absent)
    }
}

/// Decode a register payload according to its value kind
pub fn decode(payload: [u8; 2], kind: ValueKind) -> Result<TypedValue> {
    if payload == ABSENT_PAYLOAD {
        return Ok(TypedValue::Absent);
    }

    let be = u16::from_be_bytes(payload);
    let value = match kind {
        ValueKind::Unsigned16Le => TypedValue::Unsigned16(u16::from_le_bytes(payload)),
        ValueKind::Decimal(scale) => TypedValue::Decimal(f64::from(be) / scale.factor()),
        ValueKind::Byte => TypedValue::Byte(payload[0]),
        ValueKind::TimeOfDay => {
            TypedValue::TimeOfDay(format!("{:02}:{:02}", be & 0xFF, be >> 8))
        },
        ValueKind::Date => TypedValue::Date(format!("{:02}.{:02}.", be >> 8, be & 0xFF)),
        ValueKind::ScheduleWindow => {
            // High bit in either quarter-hour byte marks an unused slot
            if be & 0x8080 != 0 {
                return Ok(TypedValue::Absent);
            }
            let start = be >> 8;
            let end = be & 0xFF;
            TypedValue::ScheduleWindow(format!(
                "{:02}:{:02}-{:02}:{:02}",
                start / 4,
                15 * (start % 4),
                end / 4,
                15 * (end % 4)
            ))
        },
        ValueKind::LittleBool => match payload {
            [0x01, 0x00] => TypedValue::Bool(true),
            [0x00, 0x00] => TypedValue::Bool(false),
            bytes => return Err(ElsterError::InvalidEncodedValue { kind, bytes }),
        },
        ValueKind::Bool => match payload {
            [0x00, 0x01] => TypedValue::Bool(true),
            [0x00, 0x00] => TypedValue::Bool(false),
            bytes => return Err(ElsterError::InvalidEncodedValue { kind, bytes }),
        },
        ValueKind::Raw => TypedValue::Raw(payload),
    };

    Ok(value)
}

/// Encode a typed value into a register payload
///
/// Only numeric, byte and boolean kinds have a write convention.
pub fn encode(value: &TypedValue, kind: ValueKind) -> Result<[u8; 2]> {
    if value.is_absent() {
        return Err(ElsterError::unsupported("cannot encode an absent value"));
    }

    match kind {
        ValueKind::Unsigned16Le => Ok(as_u16(value, 1.0, kind)?.to_le_bytes()),
        ValueKind::Decimal(scale) => Ok(as_u16(value, scale.factor(), kind)?.to_be_bytes()),
        ValueKind::Byte => {
            let raw = as_u16(value, 1.0, kind)?;
            let byte = u8::try_from(raw)
                .map_err(|_| ElsterError::invalid_value(format!("{raw} does not fit a byte")))?;
            Ok([byte, 0x00])
        },
        ValueKind::LittleBool => Ok([u8::from(as_bool(value, kind)?), 0x00]),
        ValueKind::Bool => Ok([0x00, u8::from(as_bool(value, kind)?)]),
        ValueKind::TimeOfDay | ValueKind::Date | ValueKind::ScheduleWindow | ValueKind::Raw => {
            Err(ElsterError::unsupported(format!(
                "no write encoding for {kind} registers"
            )))
        },
    }
}

fn as_u16(value: &TypedValue, factor: f64, kind: ValueKind) -> Result<u16> {
    let number = match value {
        TypedValue::Unsigned16(v) => f64::from(*v),
        TypedValue::Byte(v) => f64::from(*v),
        TypedValue::Decimal(v) => *v,
        other => {
            return Err(ElsterError::invalid_value(format!(
                "{other:?} is not a {kind} value"
            )))
        },
    };

    let scaled = (number * factor).round();
    if !scaled.is_finite() || !(0.0..=f64::from(u16::MAX)).contains(&scaled) {
        return Err(ElsterError::invalid_value(format!(
            "{number} is out of range for {kind}"
        )));
    }
    if factor == 1.0 && scaled != number {
        return Err(ElsterError::invalid_value(format!(
            "{number} is not an integer"
        )));
    }

    Ok(scaled as u16)
}

fn as_bool(value: &TypedValue, kind: ValueKind) -> Result<bool> {
    match value {
        TypedValue::Bool(b) => Ok(*b),
        other => Err(ElsterError::invalid_value(format!(
            "{other:?} is not a {kind} value"
        ))),
    }
}
