//! Fixed-width record codec (§4.1).
//!
//! Encodes a row of [`Value`]s in schema order into the heap file's slot
//! layout: each attribute at its declared byte width, little-endian,
//! strings NUL-padded to capacity, POINT as two little-endian `f64`s,
//! followed by the slot's trailing 4-byte signed `next` field.

use crate::error::{StoreError, StoreResult};
use crate::schema::{DataType, Schema};
use crate::value::{Point, Value};

/// Sentinel written to a live slot's `next` field (§3).
pub const NEXT_LIVE: i32 = -2;
/// Sentinel marking the end of the free-list (§3, §4.2).
pub const NEXT_FREE_END: i32 = -1;

/// Encodes one record's attribute values plus its `next` field into a
/// fixed-width byte block sized exactly `schema.record_size()`.
pub fn encode(schema: &Schema, values: &[Value], next: i32) -> StoreResult<Vec<u8>> {
    if values.len() != schema.attributes.len() {
        return Err(StoreError::SchemaMismatch(format!(
            "expected {} values, got {}",
            schema.attributes.len(),
            values.len()
        )));
    }

    let mut buf = Vec::with_capacity(schema.record_size());
    for (attr, value) in schema.attributes.iter().zip(values) {
        encode_value(&attr.data_type, value, &attr.name, &mut buf)?;
    }
    buf.extend_from_slice(&next.to_le_bytes());
    Ok(buf)
}

fn encode_value(data_type: &DataType, value: &Value, attr_name: &str, buf: &mut Vec<u8>) -> StoreResult<()> {
    match (data_type, value) {
        (DataType::Int, Value::Int(v)) => buf.extend_from_slice(&v.to_le_bytes()),
        (DataType::Decimal, Value::Decimal(v)) => buf.extend_from_slice(&v.to_le_bytes()),
        (DataType::Bool, Value::Bool(v)) => buf.push(if *v { 1 } else { 0 }),
        (DataType::Date, Value::Date(v)) => buf.extend_from_slice(&v.to_le_bytes()),
        (DataType::Point, Value::Point(p)) => {
            buf.extend_from_slice(&p.x.to_le_bytes());
            buf.extend_from_slice(&p.y.to_le_bytes());
        }
        (DataType::Char(n), Value::Text(s)) | (DataType::Varchar(n), Value::Text(s)) => {
            if s.len() > *n || s.as_bytes().contains(&0) {
                return Err(StoreError::TypeCoercionFailed {
                    column: attr_name.to_string(),
                    reason: "string exceeds declared capacity or contains NUL".to_string(),
                });
            }
            let mut padded = vec![0u8; *n];
            padded[..s.len()].copy_from_slice(s.as_bytes());
            buf.extend_from_slice(&padded);
        }
        _ => {
            return Err(StoreError::SchemaMismatch(format!(
                "value for '{attr_name}' does not match its declared type"
            )))
        }
    }
    Ok(())
}

/// Decodes a fixed-width slot block back into attribute values plus the
/// trailing `next` field. Strings are NUL-trimmed; POINT is reconstructed
/// from its two doubles.
pub fn decode(schema: &Schema, block: &[u8]) -> StoreResult<(Vec<Value>, i32)> {
    if block.len() != schema.record_size() {
        return Err(StoreError::Corruption(format!(
            "slot size {} does not match schema record size {}",
            block.len(),
            schema.record_size()
        )));
    }

    let mut offset = 0usize;
    let mut values = Vec::with_capacity(schema.attributes.len());
    for attr in &schema.attributes {
        let width = attr.data_type.byte_size();
        let slice = &block[offset..offset + width];
        values.push(decode_value(&attr.data_type, slice));
        offset += width;
    }
    let next = i32::from_le_bytes(block[offset..offset + 4].try_into().unwrap());
    Ok((values, next))
}

fn decode_value(data_type: &DataType, slice: &[u8]) -> Value {
    match data_type {
        DataType::Int => Value::Int(i32::from_le_bytes(slice.try_into().unwrap())),
        DataType::Decimal => Value::Decimal(f64::from_le_bytes(slice.try_into().unwrap())),
        DataType::Bool => Value::Bool(slice[0] != 0),
        DataType::Date => Value::Date(u32::from_le_bytes(slice.try_into().unwrap())),
        DataType::Point => {
            let x = f64::from_le_bytes(slice[0..8].try_into().unwrap());
            let y = f64::from_le_bytes(slice[8..16].try_into().unwrap());
            Value::Point(Point::new(x, y))
        }
        DataType::Char(_) | DataType::Varchar(_) => {
            let end = slice.iter().position(|&b| b == 0).unwrap_or(slice.len());
            Value::Text(String::from_utf8_lossy(&slice[..end]).into_owned())
        }
    }
}
