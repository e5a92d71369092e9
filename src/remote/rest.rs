//! PostgREST backend, as exposed by Supabase under `/rest/v1`.

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use tracing::{debug, warn};

use super::{RemoteBackend, RemoteError, UpsertOptions};

const USER_AGENT: &str = concat!("cantoral/", env!("CARGO_PKG_VERSION"));

pub struct RestBackend {
    http: Client,
    base_url: String,
    api_key: String,
}

impl RestBackend {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// An empty access token falls back to the project key, which PostgREST
    /// accepts as an anonymous bearer.
    fn auth_headers(&self, access_token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&self.api_key) {
            headers.insert("apikey", value);
        }
        let bearer = if access_token.is_empty() {
            &self.api_key
        } else {
            access_token
        };
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {bearer}")) {
            headers.insert(AUTHORIZATION, value);
        }
        headers
    }

    fn upsert_request(
        &self,
        table: &str,
        rows: &[Value],
        options: UpsertOptions,
        access_token: &str,
    ) -> RequestBuilder {
        let resolution = if options.ignore_duplicates {
            "resolution=ignore-duplicates,return=minimal"
        } else {
            "resolution=merge-duplicates,return=minimal"
        };
        self.http
            .post(self.table_url(table))
            .query(&[("on_conflict", options.conflict_key)])
            .headers(self.auth_headers(access_token))
            .header(CONTENT_TYPE, "application/json")
            .header("Prefer", resolution)
            .json(rows)
    }

    fn select_request(&self, table: &str, created_by: &str, access_token: &str) -> RequestBuilder {
        self.http
            .get(self.table_url(table))
            .query(&[
                ("select", "*".to_string()),
                ("created_by", format!("eq.{created_by}")),
            ])
            .headers(self.auth_headers(access_token))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!(
        target: "cantoral",
        event = "remote_status_error",
        status = status.as_u16(),
        body = %body
    );
    Err(RemoteError::Status {
        status: status.as_u16(),
        body,
    })
}

impl RemoteBackend for RestBackend {
    fn name(&self) -> &'static str {
        "rest"
    }

    fn upsert<'a>(
        &'a self,
        table: &'a str,
        rows: Vec<Value>,
        options: UpsertOptions,
        access_token: &'a str,
    ) -> BoxFuture<'a, Result<(), RemoteError>> {
        Box::pin(async move {
            if rows.is_empty() {
                return Ok(());
            }
            let request = self.upsert_request(table, &rows, options, access_token);
            debug!(target: "cantoral", event = "rest_upsert", table, rows = rows.len());
            check_status(request.send().await?).await?;
            Ok(())
        })
    }

    fn select<'a>(
        &'a self,
        table: &'a str,
        created_by: &'a str,
        access_token: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Value>, RemoteError>> {
        Box::pin(async move {
            let request = self.select_request(table, created_by, access_token);
            let response = check_status(request.send().await?).await?;
            let text = response.text().await?;
            Ok(serde_json::from_str(&text)?)
        })
    }
}
