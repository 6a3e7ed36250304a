//! Column decoding helpers shared by the repositories

use libsql::{Row, Value};

use crate::error::{Error, Result};

pub fn text(row: &Row, idx: i32) -> Result<String> {
    match row.get_value(idx)? {
        Value::Text(value) => Ok(value),
        other => Err(unexpected(idx, "text", &other)),
    }
}

pub fn integer(row: &Row, idx: i32) -> Result<i64> {
    match row.get_value(idx)? {
        Value::Integer(value) => Ok(value),
        other => Err(unexpected(idx, "integer", &other)),
    }
}

pub fn opt_text(row: &Row, idx: i32) -> Result<Option<String>> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Text(value) => Ok(Some(value)),
        other => Err(unexpected(idx, "text", &other)),
    }
}

pub fn opt_integer(row: &Row, idx: i32) -> Result<Option<i64>> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Integer(value) => Ok(Some(value)),
        other => Err(unexpected(idx, "integer", &other)),
    }
}

pub fn opt_blob(row: &Row, idx: i32) -> Result<Option<Vec<u8>>> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Blob(value) => Ok(Some(value)),
        other => Err(unexpected(idx, "blob", &other)),
    }
}

/// Bind an optional value, mapping `None` to SQL NULL.
pub fn nullable<T: Into<Value>>(value: Option<T>) -> Value {
    value.map_or(Value::Null, Into::into)
}

fn unexpected(idx: i32, expected: &str, found: &Value) -> Error {
    Error::Database(format!(
        "column {idx}: expected {expected}, found {found:?}"
    ))
}
