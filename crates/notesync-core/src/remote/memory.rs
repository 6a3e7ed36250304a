//! In-process backend with call recording and failure injection.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{row_str, FetchQuery, RemoteDataClient, RemoteRow};
use crate::error::{RemoteError, Result};
use crate::models::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOp {
    Fetch,
    Insert,
    Update,
    Delete,
    Exists,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    pub op: RemoteOp,
    pub table: String,
    pub id: Option<String>,
    pub owner: Option<String>,
}

/// Scripted failure for matching calls.
#[derive(Debug, Clone)]
pub struct FailureRule {
    op: RemoteOp,
    table: Option<String>,
    id: Option<String>,
    remaining: Option<usize>,
    error: RemoteError,
}

impl FailureRule {
    /// Fail the next matching call only.
    pub const fn once(op: RemoteOp, error: RemoteError) -> Self {
        Self {
            op,
            table: None,
            id: None,
            remaining: Some(1),
            error,
        }
    }

    /// Fail every matching call.
    pub const fn always(op: RemoteOp, error: RemoteError) -> Self {
        Self {
            op,
            table: None,
            id: None,
            remaining: None,
            error,
        }
    }

    #[must_use]
    pub const fn times(mut self, count: usize) -> Self {
        self.remaining = Some(count);
        self
    }

    #[must_use]
    pub fn on_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    #[must_use]
    pub fn on_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    fn matches(&self, call: &RemoteCall) -> bool {
        self.op == call.op
            && self.table.as_ref().is_none_or(|table| *table == call.table)
            && self
                .id
                .as_ref()
                .is_none_or(|id| call.id.as_ref() == Some(id))
    }
}

#[derive(Default)]
struct State {
    tables: BTreeMap<String, BTreeMap<String, RemoteRow>>,
    calls: Vec<RemoteCall>,
    rules: VecDeque<FailureRule>,
    latency: Option<Duration>,
}

/// `RemoteDataClient` backed by in-memory tables keyed by row `id`.
#[derive(Default)]
pub struct InMemoryRemote {
    state: Mutex<State>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a row directly, bypassing recording and failure rules.
    pub fn seed(&self, table: &str, row: RemoteRow) {
        let Some(id) = row_str(&row, "id").map(str::to_string) else {
            return;
        };
        self.state()
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(id, row);
    }

    pub fn row(&self, table: &str, id: &str) -> Option<RemoteRow> {
        self.state()
            .tables
            .get(table)
            .and_then(|rows| rows.get(id))
            .cloned()
    }

    pub fn rows(&self, table: &str) -> Vec<RemoteRow> {
        self.state()
            .tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn inject(&self, rule: FailureRule) {
        self.state().rules.push_back(rule);
    }

    pub fn clear_failures(&self) {
        self.state().rules.clear();
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state().latency = latency;
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state().calls.clone()
    }

    pub fn call_count(&self, op: RemoteOp) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| call.op == op)
            .count()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    async fn enter(
        &self,
        op: RemoteOp,
        table: &str,
        id: Option<&str>,
        owner: Option<&UserId>,
    ) -> Result<()> {
        let call = RemoteCall {
            op,
            table: table.to_string(),
            id: id.map(str::to_string),
            owner: owner.map(|owner| owner.as_str().to_string()),
        };

        let (latency, failure) = {
            let mut state = self.state();
            state.calls.push(call.clone());
            let failure = take_failure(&mut state.rules, &call);
            (state.latency, failure)
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        failure.map_or(Ok(()), |error| Err(error.into()))
    }
}

fn take_failure(rules: &mut VecDeque<FailureRule>, call: &RemoteCall) -> Option<RemoteError> {
    let position = rules.iter().position(|rule| rule.matches(call))?;
    let rule = rules.get_mut(position)?;
    let error = rule.error.clone();
    let exhausted = match rule.remaining.as_mut() {
        Some(remaining) if *remaining <= 1 => true,
        Some(remaining) => {
            *remaining -= 1;
            false
        }
        None => false,
    };
    if exhausted {
        rules.remove(position);
    }
    Some(error)
}

fn owned_by(row: &RemoteRow, owner: &UserId) -> bool {
    row_str(row, "owner_id") == Some(owner.as_str())
}

fn matches_filter(row: &RemoteRow, column: &str, expected: &str) -> bool {
    match row.get(column) {
        Some(Value::String(value)) => value == expected,
        Some(Value::Null) | None => false,
        Some(other) => other.to_string() == expected,
    }
}

fn project(row: &RemoteRow, columns: Option<&Vec<String>>) -> RemoteRow {
    columns.map_or_else(
        || row.clone(),
        |columns| {
            row.iter()
                .filter(|(key, _)| columns.contains(key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        },
    )
}

#[async_trait]
impl RemoteDataClient for InMemoryRemote {
    async fn fetch(&self, table: &str, query: &FetchQuery) -> Result<Vec<RemoteRow>> {
        let id_filter = query
            .filters
            .iter()
            .find(|(column, _)| column == "id")
            .map(|(_, value)| value.as_str());
        self.enter(RemoteOp::Fetch, table, id_filter, Some(&query.owner))
            .await?;

        let state = self.state();
        let rows = state
            .tables
            .get(table)
            .map(|rows| {
                rows.values()
                    .filter(|row| owned_by(row, &query.owner))
                    .filter(|row| {
                        query
                            .filters
                            .iter()
                            .all(|(column, value)| matches_filter(row, column, value))
                    })
                    .map(|row| project(row, query.columns.as_ref()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }

    async fn insert(&self, table: &str, row: &RemoteRow) -> Result<()> {
        let id = row_str(row, "id")
            .ok_or_else(|| RemoteError::http(400, "row is missing an id"))?
            .to_string();
        self.enter(RemoteOp::Insert, table, Some(&id), None).await?;

        let mut state = self.state();
        let rows = state.tables.entry(table.to_string()).or_default();
        if rows.contains_key(&id) {
            return Err(RemoteError::http(409, format!("duplicate key {id}")).into());
        }
        rows.insert(id, row.clone());
        Ok(())
    }

    async fn update(&self, table: &str, id: &str, owner: &UserId, row: &RemoteRow) -> Result<()> {
        self.enter(RemoteOp::Update, table, Some(id), Some(owner))
            .await?;

        let mut state = self.state();
        if let Some(existing) = state
            .tables
            .get_mut(table)
            .and_then(|rows| rows.get_mut(id))
            .filter(|existing| owned_by(existing, owner))
        {
            for (key, value) in row {
                existing.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }

    async fn delete(&self, table: &str, id: &str, owner: &UserId) -> Result<()> {
        self.enter(RemoteOp::Delete, table, Some(id), Some(owner))
            .await?;

        let mut state = self.state();
        if let Some(rows) = state.tables.get_mut(table) {
            if rows.get(id).is_some_and(|row| owned_by(row, owner)) {
                rows.remove(id);
            }
        }
        Ok(())
    }

    async fn exists(&self, table: &str, id: &str, owner: &UserId) -> Result<bool> {
        self.enter(RemoteOp::Exists, table, Some(id), Some(owner))
            .await?;

        let state = self.state();
        Ok(state
            .tables
            .get(table)
            .and_then(|rows| rows.get(id))
            .is_some_and(|row| owned_by(row, owner)))
    }
}
