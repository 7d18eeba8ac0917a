//! Google Sheets sink
//!
//! Rows go to `{worksheet}!A:D` through the Sheets v4 `values:append` API.
//! Requests carry a bearer token from a service account or a fixed token.

mod auth;

pub use auth::SheetsAuth;

use super::{LogRecord, LogSink, SinkError, HEADER};
use async_trait::async_trait;
use auth::TokenSource;
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

pub const SHEETS_BASE_URL: &str = "https://sheets.googleapis.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub sheet_id: String,
    pub worksheet: String,
    pub auth: SheetsAuth,
    pub base_url: String,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

pub struct SheetsSink {
    http: reqwest::Client,
    config: SheetsConfig,
    tokens: TokenSource,
}

impl SheetsSink {
    /// Connect to the spreadsheet and write the header row if it is empty
    pub async fn connect(config: SheetsConfig) -> Result<Self, SinkError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let tokens = TokenSource::new(&config.auth)?;
        let sink = Self {
            http,
            config,
            tokens,
        };

        let header_url = sink.values_url(&format!("{}!A1:D1", sink.config.worksheet))?;
        let existing: ValueRange = sink
            .send(|| sink.http.get(header_url.clone()))
            .await?
            .json()
            .await?;

        if existing.values.iter().all(Vec::is_empty) {
            sink.append_row(HEADER).await?;
            tracing::info!(worksheet = %sink.config.worksheet, "Wrote header to empty worksheet");
        }

        Ok(sink)
    }

    fn values_url(&self, range: &str) -> Result<Url, SinkError> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| SinkError::InvalidUrl(format!("{}: {e}", self.config.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| SinkError::InvalidUrl(self.config.base_url.clone()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", &self.config.sheet_id, "values", range]);
        Ok(url)
    }

    /// Send with the current token. A 401 with refreshable credentials mints
    /// a new token and sends once more.
    async fn send(
        &self,
        request: impl Fn() -> RequestBuilder,
    ) -> Result<reqwest::Response, SinkError> {
        let token = self.tokens.token(&self.http).await?;
        let response = request().bearer_auth(&token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED || !self.tokens.can_refresh() {
            return check(response).await;
        }

        tracing::info!("Sheets rejected the access token, refreshing");
        self.tokens.invalidate().await;
        let token = self.tokens.token(&self.http).await?;
        check(request().bearer_auth(&token).send().await?).await
    }

    async fn append_row(&self, row: [&str; 4]) -> Result<(), SinkError> {
        let range = format!("{}!A:D:append", self.config.worksheet);
        let mut url = self.values_url(&range)?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "RAW")
            .append_pair("insertDataOption", "INSERT_ROWS");

        let body = json!({ "values": [row] });
        self.send(|| self.http.post(url.clone()).json(&body)).await?;
        Ok(())
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, SinkError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SinkError::Api {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl LogSink for SheetsSink {
    fn name(&self) -> &str {
        "sheets"
    }

    async fn append(&self, record: &LogRecord) -> Result<(), SinkError> {
        self.append_row(record.row()).await
    }
}
