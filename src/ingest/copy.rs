//! Encoder for the Postgres binary COPY format.
//!
//! Layout: an 11-byte signature, a flags word and a header extension length,
//! then one tuple per row (field count, then each field as a length-prefixed
//! value or -1 for NULL), then a -1 trailer.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::Value;

use crate::{query::SqlValue, schema::ScalarType};

const SIGNATURE: &[u8] = b"PGCOPY\n\xff\r\n\0";
const JSONB_VERSION: u8 = 1;

/// Wire type of a live column, from its `udt_name`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Text,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Bool,
    Uuid,
    Timestamp,
    Timestamptz,
    Date,
    Json,
    Jsonb,
}

impl WireType {
    /// `None` for types the encoder has no binary form for
    pub fn from_udt_name(name: &str) -> Option<Self> {
        let wire = match name {
            "text" | "varchar" | "bpchar" | "name" | "citext" => WireType::Text,
            "int2" => WireType::Int2,
            "int4" => WireType::Int4,
            "int8" => WireType::Int8,
            "float4" => WireType::Float4,
            "float8" => WireType::Float8,
            "bool" => WireType::Bool,
            "uuid" => WireType::Uuid,
            "timestamp" => WireType::Timestamp,
            "timestamptz" => WireType::Timestamptz,
            "date" => WireType::Date,
            "json" => WireType::Json,
            "jsonb" => WireType::Jsonb,
            _ => return None,
        };
        Some(wire)
    }

    fn scalar_type(self) -> ScalarType {
        match self {
            WireType::Text => ScalarType::Text,
            WireType::Int2 | WireType::Int4 => ScalarType::Int,
            WireType::Int8 => ScalarType::BigInt,
            WireType::Float4 | WireType::Float8 => ScalarType::Float,
            WireType::Bool => ScalarType::Bool,
            WireType::Uuid => ScalarType::Uuid,
            WireType::Timestamp | WireType::Timestamptz => ScalarType::Timestamp,
            WireType::Date => ScalarType::Date,
            WireType::Json | WireType::Jsonb => ScalarType::Json,
        }
    }
}

fn postgres_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

fn postgres_epoch_date() -> NaiveDate {
    postgres_epoch().date_naive()
}

/// Binary form of one field; `Ok(None)` is NULL
pub fn encode_field(value: &Value, wire: WireType) -> Result<Option<Bytes>, String> {
    let value = SqlValue::from_json(value, wire.scalar_type())?;
    let mut buf = BytesMut::new();

    match (value, wire) {
        (SqlValue::Null(_), _) => return Ok(None),
        (SqlValue::Text(v), _) => buf.put_slice(v.as_bytes()),
        (SqlValue::Int(v), WireType::Int2) => buf.put_i16(
            i16::try_from(v).map_err(|_| format!("{v} is out of range for int2"))?,
        ),
        (SqlValue::Int(v), _) => buf.put_i32(v),
        (SqlValue::BigInt(v), _) => buf.put_i64(v),
        (SqlValue::Float(v), WireType::Float4) => buf.put_f32(v as f32),
        (SqlValue::Float(v), _) => buf.put_f64(v),
        (SqlValue::Bool(v), _) => buf.put_u8(u8::from(v)),
        (SqlValue::Uuid(v), _) => buf.put_slice(v.as_bytes()),
        (SqlValue::Timestamp(v), _) => {
            let micros = v
                .signed_duration_since(postgres_epoch())
                .num_microseconds()
                .ok_or_else(|| format!("{v} is out of range"))?;
            buf.put_i64(micros)
        }
        (SqlValue::Date(v), _) => {
            let days = v.signed_duration_since(postgres_epoch_date()).num_days();
            buf.put_i32(i32::try_from(days).map_err(|_| format!("{v} is out of range"))?)
        }
        (SqlValue::Json(v), WireType::Jsonb) => {
            buf.put_u8(JSONB_VERSION);
            buf.put_slice(v.to_string().as_bytes())
        }
        (SqlValue::Json(v), _) => buf.put_slice(v.to_string().as_bytes()),
    }

    Ok(Some(buf.freeze()))
}

/// Accumulates COPY data between flushes
#[derive(Debug, Default)]
pub struct CopyEncoder {
    buf: BytesMut,
}

impl CopyEncoder {
    pub fn new() -> Self {
        let mut buf = BytesMut::with_capacity(64 * 1024);
        buf.put_slice(SIGNATURE);
        // Flags, then header extension length
        buf.put_i32(0);
        buf.put_i32(0);
        Self { buf }
    }

    pub fn start_row(&mut self, fields: usize) {
        self.buf.put_i16(fields as i16);
    }

    pub fn write(&mut self, field: Option<&[u8]>) {
        match field {
            Some(bytes) => {
                self.buf.put_i32(bytes.len() as i32);
                self.buf.put_slice(bytes);
            }
            None => self.write_null(),
        }
    }

    pub fn write_null(&mut self) {
        self.buf.put_i32(-1);
    }

    pub fn finish(&mut self) {
        self.buf.put_i16(-1);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Hands out everything encoded so far
    pub fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}
