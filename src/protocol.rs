//! Register-level encoding for the SunSpec meter image.
//!
//! A Modbus holding register is a single `u16`. Wider quantities are split
//! into big-endian register pairs: the most significant word is stored at the
//! lower address. Encoders never fail; values that do not fit the target
//! format are saturated instead of spilling into neighbouring registers.

use std::fmt;

/// How a logical quantity is packed into holding registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum FieldEncoding {
    /// Signed 16 bit two's-complement, one register.
    Int16,
    /// Signed 32 bit two's-complement, high word first.
    #[cfg_attr(feature = "serde", serde(rename = "int32", alias = "int32_be"))]
    Int32Be,
    /// IEEE-754 binary32, high word first.
    #[cfg_attr(feature = "serde", serde(rename = "float32", alias = "float32_be"))]
    Float32Be,
}

impl FieldEncoding {
    /// Number of registers occupied by a value of this encoding.
    pub const fn width(&self) -> u16 {
        match self {
            FieldEncoding::Int16 => 1,
            FieldEncoding::Int32Be | FieldEncoding::Float32Be => 2,
        }
    }

    /// Whether integer scaling (`gain` and SunSpec scale factor) applies.
    pub const fn is_integer(&self) -> bool {
        !matches!(self, FieldEncoding::Float32Be)
    }
}

impl fmt::Display for FieldEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldEncoding::Int16 => write!(f, "int16"),
            FieldEncoding::Int32Be => write!(f, "int32"),
            FieldEncoding::Float32Be => write!(f, "float32"),
        }
    }
}

/// SunSpec marker `SunS` at the first two registers of the map.
pub const SUNSPEC_MARKER: [u16; 2] = [0x5375, 0x6E53];

/// Model id terminating the SunSpec model chain.
pub const END_MODEL_ID: u16 = 0xFFFF;

/// Largest register count a single read-holding-registers request may ask for.
pub const MAX_READ_QUANTITY: u16 = 125;

fn saturate_i64(value: f64, min: i64, max: i64) -> i64 {
    if value.is_nan() {
        0
    } else {
        // `as` on a float saturates, the clamp narrows to the target range
        (value.round() as i64).clamp(min, max)
    }
}

/// Encodes a signed value into a single two's-complement register.
///
/// Values outside `i16` are saturated, NaN becomes 0.
pub fn encode_signed16(value: f64) -> u16 {
    saturate_i64(value, i16::MIN as i64, i16::MAX as i64) as i16 as u16
}

pub fn decode_signed16(register: u16) -> i16 {
    register as i16
}

/// Encodes a signed value into a two's-complement register pair.
///
/// Values outside `i32` are saturated, NaN becomes 0.
pub fn encode_int32(value: f64) -> [u16; 2] {
    let raw = saturate_i64(value, i32::MIN as i64, i32::MAX as i64) as i32 as u32;
    [(raw >> 16) as u16, raw as u16]
}

pub fn decode_int32(registers: [u16; 2]) -> i32 {
    (((registers[0] as u32) << 16) | registers[1] as u32) as i32
}

/// Encodes a real value as IEEE-754 binary32 in a register pair.
///
/// Rounds to nearest. Finite values beyond the binary32 range saturate to
/// `±f32::MAX`; infinities and NaN are passed through, NaN being the SunSpec
/// "not implemented" marker for float points.
pub fn encode_float32(value: f64) -> [u16; 2] {
    let narrowed = if value.is_finite() {
        value.clamp(f32::MIN as f64, f32::MAX as f64) as f32
    } else {
        value as f32
    };
    let bytes = narrowed.to_be_bytes();
    [
        u16::from_be_bytes([bytes[0], bytes[1]]),
        u16::from_be_bytes([bytes[2], bytes[3]]),
    ]
}

pub fn decode_float32(registers: [u16; 2]) -> f32 {
    let [hi, lo] = registers;
    let hi = hi.to_be_bytes();
    let lo = lo.to_be_bytes();
    f32::from_be_bytes([hi[0], hi[1], lo[0], lo[1]])
}

/// Encodes `value` according to `encoding`.
pub fn encode(encoding: FieldEncoding, value: f64) -> Vec<u16> {
    match encoding {
        FieldEncoding::Int16 => vec![encode_signed16(value)],
        FieldEncoding::Int32Be => encode_int32(value).to_vec(),
        FieldEncoding::Float32Be => encode_float32(value).to_vec(),
    }
}

/// Decodes registers written by [`encode`] back into a number.
///
/// Returns `None` if fewer registers than the encoding width are supplied.
pub fn decode(encoding: FieldEncoding, registers: &[u16]) -> Option<f64> {
    match (encoding, registers) {
        (FieldEncoding::Int16, [r, ..]) => Some(decode_signed16(*r) as f64),
        (FieldEncoding::Int32Be, [hi, lo, ..]) => Some(decode_int32([*hi, *lo]) as f64),
        (FieldEncoding::Float32Be, [hi, lo, ..]) => Some(decode_float32([*hi, *lo]) as f64),
        _ => None,
    }
}

/// Packs an ASCII string two characters per register, big-endian.
///
/// The result is exactly `registers` long: shorter strings are NUL padded,
/// longer ones truncated. Non-ASCII characters are replaced by `?`.
pub fn encode_string(value: &str, registers: u16) -> Vec<u16> {
    let mut bytes: Vec<u8> = value
        .chars()
        .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
        .take(registers as usize * 2)
        .collect();
    bytes.resize(registers as usize * 2, 0);
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

pub fn decode_string(registers: &[u16]) -> String {
    registers
        .iter()
        .flat_map(|r| r.to_be_bytes())
        .take_while(|b| *b != 0)
        .map(char::from)
        .collect()
}
