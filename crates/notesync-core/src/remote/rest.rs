//! PostgREST data client (Supabase `/rest/v1`).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};

use super::{FetchQuery, RemoteDataClient, RemoteRow};
use crate::auth::SessionProvider;
use crate::config::RemoteConfig;
use crate::error::{RemoteError, Result};
use crate::models::UserId;
use crate::util::compact_text;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// REST client authenticating every request with the current session.
#[derive(Clone)]
pub struct RestDataClient {
    base_url: String,
    anon_key: String,
    client: Client,
    session: Arc<dyn SessionProvider>,
}

impl fmt::Debug for RestDataClient {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RestDataClient")
            .field("base_url", &self.base_url)
            .field("anon_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl RestDataClient {
    pub fn new(config: &RemoteConfig, session: Arc<dyn SessionProvider>) -> Result<Self> {
        let (url, anon_key) = config.resolve()?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(RemoteError::from)?;
        Ok(Self {
            base_url: rest_base_url(&url),
            anon_key,
            client,
            session,
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self
            .session
            .access_token()
            .unwrap_or_else(|| self.anon_key.clone());
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.base_url, urlencoding::encode(table))
    }

    fn record_url(&self, table: &str, id: &str, owner: &UserId) -> String {
        format!(
            "{}?id=eq.{}&owner_id=eq.{}",
            self.table_url(table),
            urlencoding::encode(id),
            urlencoding::encode(owner.as_str())
        )
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(RemoteError::from)?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::http(status, error_message(status, &body)).into())
    }

    async fn rows(&self, url: String) -> Result<Vec<RemoteRow>> {
        let response = self
            .send(self.client.get(url).header("Accept", "application/json"))
            .await?;
        let rows = response
            .json::<Vec<RemoteRow>>()
            .await
            .map_err(|error| RemoteError::Decode(error.to_string()))?;
        Ok(rows)
    }
}

#[async_trait]
impl RemoteDataClient for RestDataClient {
    async fn fetch(&self, table: &str, query: &FetchQuery) -> Result<Vec<RemoteRow>> {
        tracing::debug!("GET {} ({} filters)", table, query.filters.len());
        self.rows(select_url(&self.table_url(table), query)).await
    }

    async fn insert(&self, table: &str, row: &RemoteRow) -> Result<()> {
        tracing::debug!("POST {}", table);
        self.send(
            self.client
                .post(self.table_url(table))
                .header("Prefer", "return=minimal")
                .json(row),
        )
        .await?;
        Ok(())
    }

    async fn update(&self, table: &str, id: &str, owner: &UserId, row: &RemoteRow) -> Result<()> {
        tracing::debug!("PATCH {} {}", table, id);
        self.send(
            self.client
                .patch(self.record_url(table, id, owner))
                .header("Prefer", "return=minimal")
                .json(row),
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, table: &str, id: &str, owner: &UserId) -> Result<()> {
        tracing::debug!("DELETE {} {}", table, id);
        match self
            .send(self.client.delete(self.record_url(table, id, owner)))
            .await
        {
            Err(crate::Error::Remote(error)) if error.is_not_found() => Ok(()),
            other => other.map(|_| ()),
        }
    }

    async fn exists(&self, table: &str, id: &str, owner: &UserId) -> Result<bool> {
        let url = format!("{}&select=id&limit=1", self.record_url(table, id, owner));
        Ok(!self.rows(url).await?.is_empty())
    }
}

fn rest_base_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    if trimmed.ends_with("/rest/v1") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/rest/v1")
    }
}

fn select_url(table_url: &str, query: &FetchQuery) -> String {
    let columns = query
        .columns
        .as_ref()
        .map_or_else(|| "*".to_string(), |columns| columns.join(","));
    let mut url = format!(
        "{table_url}?select={}&owner_id=eq.{}",
        urlencoding::encode(&columns),
        urlencoding::encode(query.owner.as_str())
    );
    for (column, value) in &query.filters {
        url.push_str(&format!(
            "&{}=eq.{}",
            urlencoding::encode(column),
            urlencoding::encode(value)
        ));
    }
    url
}

fn error_message(status: u16, body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|payload| {
            ["message", "msg", "error_description", "error", "hint"]
                .iter()
                .find_map(|key| payload.get(key).and_then(|value| value.as_str()))
                .map(str::to_string)
        });
    match parsed {
        Some(message) => compact_text(&message),
        None if body.trim().is_empty() => format!("HTTP {status}"),
        None => compact_text(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticSession;

    #[test]
    fn rest_base_url_appends_version_path() {
        assert_eq!(
            rest_base_url("https://demo.supabase.co/"),
            "https://demo.supabase.co/rest/v1"
        );
        assert_eq!(
            rest_base_url("https://demo.supabase.co/rest/v1"),
            "https://demo.supabase.co/rest/v1"
        );
    }

    #[test]
    fn select_url_scopes_by_owner_and_encodes_values() {
        let query = FetchQuery::owned_by(&UserId::new("user 1"))
            .eq("id", "a&b")
            .select(&["id", "updated_at"]);
        let url = select_url("https://x/rest/v1/notes", &query);
        assert_eq!(
            url,
            "https://x/rest/v1/notes?select=id%2Cupdated_at&owner_id=eq.user%201&id=eq.a%26b"
        );
    }

    #[test]
    fn select_url_defaults_to_all_columns() {
        let query = FetchQuery::owned_by(&UserId::new("u"));
        assert_eq!(
            select_url("https://x/rest/v1/folders", &query),
            "https://x/rest/v1/folders?select=%2A&owner_id=eq.u"
        );
    }

    #[test]
    fn error_message_prefers_structured_fields() {
        assert_eq!(
            error_message(409, r#"{"code":"23505","message":"duplicate key"}"#),
            "duplicate key"
        );
        assert_eq!(error_message(502, ""), "HTTP 502");
        assert_eq!(error_message(500, "upstream failed"), "upstream failed");
    }

    #[test]
    fn client_requires_remote_config() {
        let session: Arc<dyn SessionProvider> = Arc::new(StaticSession::new("u"));
        assert!(RestDataClient::new(&RemoteConfig::default(), Arc::clone(&session)).is_err());
        let client =
            RestDataClient::new(&RemoteConfig::new("https://demo.supabase.co", "anon"), session)
                .unwrap();
        let rendered = format!("{client:?}");
        assert!(rendered.contains("https://demo.supabase.co/rest/v1"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
