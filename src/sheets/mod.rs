//! Spreadsheet ingestion: reader client, header analyzer and the two
//! row processors (payments and employees).
//!
//! Processors publish `ProgressEvent`s on an mpsc channel; the WebSocket
//! orchestrator pumps them into the process registry and out to clients.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod analyzer;
pub mod clients;
pub mod payments;

/// Reads a named range from a spreadsheet. First row is the header row.
#[async_trait]
pub trait SheetReader: Send + Sync {
    async fn read_sheet(&self, spreadsheet_id: &str, range: &str) -> Result<Vec<Vec<String>>>;
}

/// Progress events streamed by both sheet processors. Serialized verbatim
/// into the `progress` field of outbound WebSocket frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started {
        sheet_name: String,
        total_rows: usize,
    },
    /// A new record was persisted. For employee rows the generated
    /// credentials ride along so the caller can send the welcome mail.
    Created {
        row_number: usize,
        full_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        email: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    /// The record already existed; nothing was re-inserted.
    Updated {
        row_number: usize,
        message: String,
        full_name: String,
    },
    InvalidEmail {
        row_number: usize,
        email: String,
    },
    DuplicateEmail {
        row_number: usize,
        email: String,
        first_row_number: usize,
    },
    NoEmail {
        row_number: usize,
    },
    /// Advisory only: the email's provider looks like a typo of a known one.
    ProviderWarning {
        row_number: usize,
        message: String,
    },
    Error {
        message: String,
    },
    Finished,
}

/// Thin client for the spreadsheet values API.
#[derive(Clone)]
pub struct SheetsClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl fmt::Debug for SheetsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SheetsClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct ValuesResponse {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

impl SheetsClient {
    pub fn new(base_url: &str, token: String) -> Result<Self> {
        let http = Client::builder()
            .user_agent("planilla-sync/0.1")
            .build()
            .context("failed to build http client")?;
        let base_url = Url::parse(base_url).context("invalid sheets base URL")?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }
}

#[async_trait]
impl SheetReader for SheetsClient {
    async fn read_sheet(&self, spreadsheet_id: &str, range: &str) -> Result<Vec<Vec<String>>> {
        let endpoint = self
            .base_url
            .join(&format!(
                "v4/spreadsheets/{spreadsheet_id}/values/{range}"
            ))
            .context("invalid sheet range URL")?;
        let resp = self
            .http
            .get(endpoint)
            .bearer_auth(&self.token)
            .send()
            .await
            .context("sheet read request failed")?
            .error_for_status()
            .context("sheet read returned an error status")?;
        let body: ValuesResponse = resp.json().await.context("invalid sheet response body")?;
        Ok(body.values)
    }
}
