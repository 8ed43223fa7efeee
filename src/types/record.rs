use serde::{Deserialize, Serialize};

use crate::types::{
    PageId,
    error::{DatabaseError, Result},
    value::Value,
};

/// Text encoding declared at offset 56 of the database header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TextEncoding {
    #[default]
    Utf8,
    Utf16Le,
    Utf16Be,
}

impl TextEncoding {
    pub fn from_header(value: u32) -> Option<Self> {
        match value {
            1 => Some(TextEncoding::Utf8),
            2 => Some(TextEncoding::Utf16Le),
            3 => Some(TextEncoding::Utf16Be),
            _ => None,
        }
    }

    pub fn as_header(&self) -> u32 {
        match self {
            TextEncoding::Utf8 => 1,
            TextEncoding::Utf16Le => 2,
            TextEncoding::Utf16Be => 3,
        }
    }

    // Forensic input: malformed sequences are replaced, not rejected.
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            TextEncoding::Utf16Le => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect();
                String::from_utf16_lossy(&units)
            }
            TextEncoding::Utf16Be => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .collect();
                String::from_utf16_lossy(&units)
            }
        }
    }
}

/// Reads a SQLite varint: up to eight 7-bit groups, then one full byte.
/// Returns the value and the number of bytes consumed, or `None` if the
/// buffer ends mid-varint.
pub fn read_varint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    for i in 0..8 {
        let byte = *buf.get(i)?;
        value = (value << 7) | u64::from(byte & 0x7f);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    let last = *buf.get(8)?;
    Some(((value << 8) | u64::from(last), 9))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialType {
    Null,
    Int(usize),
    Float,
    Zero,
    One,
    Reserved(u64),
    Blob(usize),
    Text(usize),
}

impl SerialType {
    pub fn from_code(code: u64) -> Self {
        match code {
            0 => SerialType::Null,
            1 => SerialType::Int(1),
            2 => SerialType::Int(2),
            3 => SerialType::Int(3),
            4 => SerialType::Int(4),
            5 => SerialType::Int(6),
            6 => SerialType::Int(8),
            7 => SerialType::Float,
            8 => SerialType::Zero,
            9 => SerialType::One,
            10 | 11 => SerialType::Reserved(code),
            n if n % 2 == 0 => SerialType::Blob(usize::try_from((n - 12) / 2).unwrap_or(usize::MAX)),
            n => SerialType::Text(usize::try_from((n - 13) / 2).unwrap_or(usize::MAX)),
        }
    }

    pub fn content_len(&self) -> usize {
        match self {
            SerialType::Null | SerialType::Zero | SerialType::One | SerialType::Reserved(_) => 0,
            SerialType::Int(n) => *n,
            SerialType::Float => 8,
            SerialType::Blob(n) | SerialType::Text(n) => *n,
        }
    }

    fn decode(&self, bytes: &[u8], encoding: TextEncoding) -> Value {
        match self {
            SerialType::Null | SerialType::Reserved(_) => Value::Null,
            SerialType::Int(_) => Value::Integer(be_signed(bytes)),
            SerialType::Float => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                Value::Real(f64::from_be_bytes(raw))
            }
            SerialType::Zero => Value::Integer(0),
            SerialType::One => Value::Integer(1),
            SerialType::Blob(_) => Value::Blob(bytes.to_vec()),
            SerialType::Text(_) => Value::Text(encoding.decode(bytes)),
        }
    }
}

fn be_signed(bytes: &[u8]) -> i64 {
    let negative = bytes.first().is_some_and(|b| b & 0x80 != 0);
    let mut value: i64 = if negative { -1 } else { 0 };
    for &b in bytes {
        value = (value << 8) | i64::from(b);
    }
    value
}

/// Decodes a complete record payload (header + body) into column values.
pub fn decode_record(payload: &[u8], encoding: TextEncoding, page_id: PageId) -> Result<Vec<Value>> {
    let (header_len, consumed) = read_varint(payload)
        .ok_or_else(|| DatabaseError::corrupt_record(page_id, "record header length truncated"))?;
    let header_len = usize::try_from(header_len).unwrap_or(usize::MAX);
    if header_len < consumed || header_len > payload.len() {
        return Err(DatabaseError::corrupt_record(
            page_id,
            format!("record header length {header_len} exceeds payload of {} bytes", payload.len()),
        ));
    }

    let mut serials = Vec::new();
    let mut pos = consumed;
    while pos < header_len {
        let (code, n) = read_varint(&payload[pos..header_len])
            .ok_or_else(|| DatabaseError::corrupt_record(page_id, "serial type varint truncated"))?;
        let serial = SerialType::from_code(code);
        if let SerialType::Reserved(code) = serial {
            return Err(DatabaseError::corrupt_record(
                page_id,
                format!("reserved serial type {code}"),
            ));
        }
        serials.push(serial);
        pos += n;
    }

    let mut values = Vec::with_capacity(serials.len());
    let mut body = header_len;
    for serial in serials {
        let end = body
            .checked_add(serial.content_len())
            .filter(|end| *end <= payload.len())
            .ok_or_else(|| DatabaseError::corrupt_record(page_id, "record body truncated"))?;
        values.push(serial.decode(&payload[body..end], encoding));
        body = end;
    }
    Ok(values)
}
