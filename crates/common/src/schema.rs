//! Result schema, engine-internal values, and externalization.
//!
//! Contract:
//! - `to_external` maps the engine's internal representation of a column value
//!   to its public type (canonical numeric widths, millisecond timestamps,
//!   UTF-8 strings, raw bytes);
//! - `format` applies final display normalization on the external value
//!   (timestamps to `yyyy-MM-dd HH:mm:ss.SSS`, bytes to lowercase hex);
//! - `Null` propagates through both steps.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Write as _;

use crate::error::{MsqError, Result};

/// Public data type of one result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnDataType {
    /// 32-bit signed integer.
    Int,
    /// 64-bit signed integer.
    Long,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// Boolean.
    Boolean,
    /// Millisecond-precision timestamp.
    Timestamp,
    /// UTF-8 string.
    String,
    /// JSON document.
    Json,
    /// Raw byte string.
    Bytes,
}

/// Boxed engine value as it travels through data blocks and result rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absent value; propagates through externalization unchanged.
    Null,
    /// 32-bit signed integer.
    Int(i32),
    /// 64-bit signed integer.
    Long(i64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// Boolean.
    Boolean(bool),
    /// Epoch milliseconds.
    Timestamp(i64),
    /// UTF-8 string.
    String(String),
    /// JSON document.
    Json(serde_json::Value),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl Value {
    /// Whether this is the absent value.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Int(_) => "INT",
            Value::Long(_) => "LONG",
            Value::Float(_) => "FLOAT",
            Value::Double(_) => "DOUBLE",
            Value::Boolean(_) => "BOOLEAN",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::String(_) => "STRING",
            Value::Json(_) => "JSON",
            Value::Bytes(_) => "BYTES",
        }
    }
}

impl ColumnDataType {
    /// Convert an engine-internal value to this column's external type.
    ///
    /// The engine is free to carry widened numerics internally (e.g. a LONG
    /// holding an INT column, a DOUBLE holding a FLOAT column); this narrows
    /// them back to the declared width. `Null` passes through.
    pub fn to_external(&self, value: Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let external = match (self, value) {
            (ColumnDataType::Int, Value::Int(v)) => Value::Int(v),
            (ColumnDataType::Int, Value::Long(v)) => Value::Int(v as i32),
            (ColumnDataType::Long, Value::Int(v)) => Value::Long(i64::from(v)),
            (ColumnDataType::Long, Value::Long(v)) => Value::Long(v),
            (ColumnDataType::Float, Value::Float(v)) => Value::Float(v),
            (ColumnDataType::Float, Value::Double(v)) => Value::Float(v as f32),
            (ColumnDataType::Double, Value::Float(v)) => Value::Double(f64::from(v)),
            (ColumnDataType::Double, Value::Double(v)) => Value::Double(v),
            (ColumnDataType::Boolean, Value::Boolean(v)) => Value::Boolean(v),
            (ColumnDataType::Boolean, Value::Int(v)) => Value::Boolean(v != 0),
            (ColumnDataType::Timestamp, Value::Timestamp(v)) => Value::Timestamp(v),
            (ColumnDataType::Timestamp, Value::Long(v)) => Value::Timestamp(v),
            (ColumnDataType::String, Value::String(v)) => Value::String(v),
            (ColumnDataType::Json, Value::Json(v)) => Value::Json(v),
            (ColumnDataType::Json, Value::String(v)) => {
                let parsed = serde_json::from_str(&v)
                    .map_err(|e| MsqError::Serde(format!("invalid JSON column value: {e}")))?;
                Value::Json(parsed)
            }
            (ColumnDataType::Bytes, Value::Bytes(v)) => Value::Bytes(v),
            (ty, value) => {
                return Err(MsqError::Invariant(format!(
                    "cannot externalize {} value as {ty}",
                    value.type_name()
                )));
            }
        };
        Ok(external)
    }

    /// Apply final display normalization on an already-external value.
    pub fn format(&self, value: Value) -> Value {
        match (self, value) {
            (ColumnDataType::Timestamp, Value::Timestamp(millis)) => {
                Value::String(format_timestamp_millis(millis))
            }
            (ColumnDataType::Bytes, Value::Bytes(bytes)) => Value::String(to_hex(&bytes)),
            (_, value) => value,
        }
    }
}

impl fmt::Display for ColumnDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnDataType::Int => "INT",
            ColumnDataType::Long => "LONG",
            ColumnDataType::Float => "FLOAT",
            ColumnDataType::Double => "DOUBLE",
            ColumnDataType::Boolean => "BOOLEAN",
            ColumnDataType::Timestamp => "TIMESTAMP",
            ColumnDataType::String => "STRING",
            ColumnDataType::Json => "JSON",
            ColumnDataType::Bytes => "BYTES",
        };
        f.write_str(name)
    }
}

fn format_timestamp_millis(millis: i64) -> String {
    match chrono::DateTime::from_timestamp_millis(millis) {
        Some(ts) => ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        None => millis.to_string(),
    }
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Ordered result schema: column names and their declared types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSchema {
    /// Output column names, in order.
    pub column_names: Vec<String>,
    /// Output column types, in the same order.
    pub column_types: Vec<ColumnDataType>,
}

impl DataSchema {
    /// Build a schema; name/type lengths must match.
    pub fn new(column_names: Vec<String>, column_types: Vec<ColumnDataType>) -> Result<Self> {
        if column_names.len() != column_types.len() {
            return Err(MsqError::Invariant(format!(
                "schema has {} names but {} types",
                column_names.len(),
                column_types.len()
            )));
        }
        Ok(Self {
            column_names,
            column_types,
        })
    }

    /// Number of columns.
    pub fn size(&self) -> usize {
        self.column_names.len()
    }
}

/// Tabular query result: schema plus boxed rows matching it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    /// Result schema.
    pub data_schema: DataSchema,
    /// Result rows; every row has exactly `data_schema.size()` values.
    pub rows: Vec<Vec<Value>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrows_widened_numerics() {
        assert_eq!(
            ColumnDataType::Int.to_external(Value::Long(42)).unwrap(),
            Value::Int(42)
        );
        assert_eq!(
            ColumnDataType::Float.to_external(Value::Double(1.5)).unwrap(),
            Value::Float(1.5)
        );
        assert_eq!(
            ColumnDataType::Long.to_external(Value::Int(-7)).unwrap(),
            Value::Long(-7)
        );
    }

    #[test]
    fn null_propagates_through_externalization() {
        for ty in [
            ColumnDataType::Int,
            ColumnDataType::Timestamp,
            ColumnDataType::Bytes,
        ] {
            assert_eq!(ty.to_external(Value::Null).unwrap(), Value::Null);
            assert_eq!(ty.format(Value::Null), Value::Null);
        }
    }

    #[test]
    fn type_mismatch_is_an_invariant_error() {
        let err = ColumnDataType::Int
            .to_external(Value::String("nope".to_string()))
            .unwrap_err();
        assert_eq!(err.kind(), "InvariantError");
    }

    #[test]
    fn formats_timestamps_and_bytes() {
        let formatted = ColumnDataType::Timestamp.format(Value::Timestamp(0));
        assert_eq!(
            formatted,
            Value::String("1970-01-01 00:00:00.000".to_string())
        );

        let formatted = ColumnDataType::Bytes.format(Value::Bytes(vec![0xde, 0xad, 0x01]));
        assert_eq!(formatted, Value::String("dead01".to_string()));
    }

    #[test]
    fn schema_length_mismatch_rejected() {
        let err = DataSchema::new(
            vec!["a".to_string()],
            vec![ColumnDataType::Int, ColumnDataType::Long],
        )
        .unwrap_err();
        assert_eq!(err.kind(), "InvariantError");
    }
}
