//! Remote data backend contract.
//!
//! One table per entity type, one JSON object per row. Every call is scoped
//! by the owning user; the backend enforces the same filter server-side.

mod memory;
mod rest;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::models::UserId;

pub use memory::{FailureRule, InMemoryRemote, RemoteCall, RemoteOp};
pub use rest::RestDataClient;

/// A remote row as a JSON object.
pub type RemoteRow = Map<String, Value>;

/// Equality-filtered select, always scoped by owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchQuery {
    pub owner: UserId,
    pub filters: Vec<(String, String)>,
    /// Projection; `None` selects every column
    pub columns: Option<Vec<String>>,
}

impl FetchQuery {
    pub fn owned_by(owner: &UserId) -> Self {
        Self {
            owner: owner.clone(),
            filters: Vec::new(),
            columns: None,
        }
    }

    #[must_use]
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((column.into(), value.into()));
        self
    }

    #[must_use]
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.columns = Some(columns.iter().map(ToString::to_string).collect());
        self
    }
}

/// Thin CRUD surface over the remote relational backend.
///
/// Implementations do not retry; failures surface as `Error::Remote`.
#[async_trait]
pub trait RemoteDataClient: Send + Sync {
    async fn fetch(&self, table: &str, query: &FetchQuery) -> Result<Vec<RemoteRow>>;

    async fn insert(&self, table: &str, row: &RemoteRow) -> Result<()>;

    async fn update(&self, table: &str, id: &str, owner: &UserId, row: &RemoteRow) -> Result<()>;

    /// Remove a row. Deleting a missing row succeeds.
    async fn delete(&self, table: &str, id: &str, owner: &UserId) -> Result<()>;

    async fn exists(&self, table: &str, id: &str, owner: &UserId) -> Result<bool>;
}

/// Read a string column.
pub fn row_str<'a>(row: &'a RemoteRow, column: &str) -> Option<&'a str> {
    row.get(column).and_then(Value::as_str)
}

/// Read an integer column, accepting integral floats.
#[allow(clippy::cast_possible_truncation)]
pub fn row_i64(row: &RemoteRow, column: &str) -> Option<i64> {
    let value = row.get(column)?;
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|float| float.fract() == 0.0)
            .map(|float| float as i64)
    })
}
