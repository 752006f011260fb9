//! Stackby REST client

use super::{classify, GatewayError, GatewayResult, Method, RowPage, RowStore};
use crate::config::{MigrationConfig, DELETE_CHUNK, REQUEST_TIMEOUT_SECS};
use crate::metrics;
use crate::model::{FieldMap, TargetRow};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// HTTP connect timeout (seconds)
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Client for the Stackby row API.
///
/// Every call is a single request; responses are passed through
/// [`classify`] so callers only ever see parsed JSON or a [`GatewayError`].
#[derive(Debug, Clone)]
pub struct StackbyClient {
    client: Client,
    base_url: String,
    stack_id: String,
    api_key: String,
}

impl StackbyClient {
    /// Build a client with connect and request timeouts
    pub fn new(config: &MigrationConfig) -> GatewayResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                GatewayError::InvalidRequest(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self::with_client(client, config))
    }

    /// Use an existing reqwest client
    pub fn with_client(client: Client, config: &MigrationConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.clone(),
            stack_id: config.stack_id.clone(),
            api_key: config.api_key.clone(),
        }
    }

    fn url(&self, action: &str, table_id: &str) -> String {
        format!("{}/{}/{}/{}", self.base_url, action, self.stack_id, table_id)
    }

    /// Perform one request and classify the response
    pub async fn call(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> GatewayResult<Value> {
        let started = Instant::now();
        let mut request = match method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Delete => self.client.delete(url),
        }
        .header("api-key", &self.api_key)
        .header(reqwest::header::CONTENT_TYPE, "application/json");

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            metrics::record_request(method, None, started.elapsed());
            classify_transport_error(&e)
        })?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::NetworkError(format!("reading response body: {e}")))?;
        metrics::record_request(method, Some(status), started.elapsed());

        let result = classify(status, &text);
        match &result {
            Ok(_) => debug!(method = method.as_str(), url, status, "Request succeeded"),
            Err(e) => {
                if matches!(e, GatewayError::RateLimited { .. }) {
                    metrics::record_rate_limited();
                }
                warn!(
                    method = method.as_str(),
                    url,
                    status,
                    kind = e.kind(),
                    "Request failed: {}",
                    e
                );
            }
        }
        result
    }
}

fn classify_transport_error(err: &reqwest::Error) -> GatewayError {
    if err.is_builder() {
        return GatewayError::InvalidRequest(err.to_string());
    }
    if err.is_timeout() {
        return GatewayError::NetworkError(format!("timeout: {err}"));
    }
    if err.is_connect() {
        return GatewayError::NetworkError(format!("connection failed: {err}"));
    }
    GatewayError::NetworkError(err.to_string())
}

/// Extract rows from a listing or create response, keeping the raw entry
/// count.
///
/// The API answers with a bare array; some deployments wrap it in `data`
/// or `records`.
fn rows_from(value: &Value) -> GatewayResult<RowPage> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(map) => match map
            .get("data")
            .or_else(|| map.get("records"))
            .and_then(Value::as_array)
        {
            Some(items) => items,
            None => return Ok(RowPage::default()),
        },
        Value::Null => return Ok(RowPage::default()),
        other => {
            return Err(GatewayError::ParseError(format!(
                "expected a row array, got {}",
                other
            )))
        }
    };
    Ok(RowPage {
        rows: items.iter().filter_map(TargetRow::from_value).collect(),
        fetched: items.len(),
    })
}

#[async_trait]
impl RowStore for StackbyClient {
    async fn list_page(
        &self,
        table_id: &str,
        max_records: usize,
        offset: usize,
    ) -> GatewayResult<RowPage> {
        let url = format!(
            "{}?maxRecords={}&offset={}",
            self.url("rowlist", table_id),
            max_records,
            offset
        );
        let value = self.call(Method::Get, &url, None).await?;
        rows_from(&value)
    }

    async fn create(&self, table_id: &str, records: &[FieldMap]) -> GatewayResult<Vec<TargetRow>> {
        let body = json!({
            "records": records.iter().map(|fields| json!({ "field": fields })).collect::<Vec<_>>()
        });
        let value = self
            .call(Method::Post, &self.url("rowcreate", table_id), Some(&body))
            .await?;
        Ok(rows_from(&value)?.rows)
    }

    async fn delete(&self, table_id: &str, row_ids: &[String]) -> GatewayResult<()> {
        if row_ids.is_empty() {
            return Ok(());
        }
        if row_ids.len() > DELETE_CHUNK {
            return Err(GatewayError::InvalidRequest(format!(
                "{} row ids in one delete call (limit {})",
                row_ids.len(),
                DELETE_CHUNK
            )));
        }
        let query = row_ids
            .iter()
            .map(|id| format!("rowIds[]={id}"))
            .collect::<Vec<_>>()
            .join("&");
        let url = format!("{}?{}", self.url("rowdelete", table_id), query);
        self.call(Method::Delete, &url, None).await?;
        Ok(())
    }
}
