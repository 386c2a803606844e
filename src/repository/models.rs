use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{Row, StorageError, Value};

/// A stored user. `user_id` is the shard key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub user_id: String,
    pub name: String,
    pub email: String,
}

impl NewUser {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
            email: email.into(),
        }
    }
}

impl User {
    /// Decodes a row shaped `id, user_id, name, email, created_at`.
    pub fn from_row(row: Row) -> Result<Self, StorageError> {
        let [id, user_id, name, email, created_at]: [Value; 5] = row
            .try_into()
            .map_err(|row: Row| StorageError::Decode(format!("expected 5 columns, got {}", row.len())))?;

        Ok(Self {
            id: integer(&id, "id")?,
            user_id: text(user_id, "user_id")?,
            name: text(name, "name")?,
            email: text(email, "email")?,
            created_at: timestamp(&created_at, "created_at")?,
        })
    }
}

pub(crate) fn integer(value: &Value, column: &str) -> Result<i64, StorageError> {
    value.as_i64().ok_or_else(|| mismatch(column, "INTEGER", value))
}

pub(crate) fn timestamp(value: &Value, column: &str) -> Result<DateTime<Utc>, StorageError> {
    value
        .as_timestamp()
        .ok_or_else(|| mismatch(column, "TIMESTAMP", value))
}

fn text(value: Value, column: &str) -> Result<String, StorageError> {
    match value {
        Value::Text(s) => Ok(s),
        other => Err(mismatch(column, "TEXT", &other)),
    }
}

fn mismatch(column: &str, expected: &str, actual: &Value) -> StorageError {
    StorageError::Decode(format!(
        "column '{}' expected {}, got {}",
        column,
        expected,
        actual.type_name()
    ))
}
