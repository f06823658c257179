//! JSON search endpoints reached over HTTP.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::catalog::SharedCatalog;
use crate::error::FetchError;
use crate::fetch::DataSource;
use crate::types::{Details, ItemFields, ListItem, QueryParams, Tag};

const USER_AGENT: &str = concat!("livelist/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonSearchConfig {
    pub base_url: String,
    pub query_param: String,
    pub scope_param: String,
    pub limit_param: Option<String>,
    pub offset_param: Option<String>,
    /// JSON pointer to the result array; empty means the body itself.
    pub items_pointer: String,
    pub key_field: String,
    pub title_field: String,
    pub subtitle_field: Option<String>,
    pub tags_field: Option<String>,
    pub body_field: Option<String>,
    pub timeout: Duration,
}

impl JsonSearchConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            query_param: "q".to_string(),
            scope_param: "tag".to_string(),
            limit_param: Some("limit".to_string()),
            offset_param: Some("offset".to_string()),
            items_pointer: String::new(),
            key_field: "id".to_string(),
            title_field: "title".to_string(),
            subtitle_field: None,
            tags_field: None,
            body_field: None,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn request_url(&self, params: &QueryParams) -> String {
        let mut url = self.base_url.clone();
        let mut separator = if url.contains('?') { '&' } else { '?' };
        let mut push = |name: &str, value: &str| {
            url.push(separator);
            url.push_str(&urlencoding::encode(name));
            url.push('=');
            url.push_str(&urlencoding::encode(value));
            separator = '&';
        };

        push(&self.query_param, params.text.trim());
        if let Some(scope) = params.scope.as_deref() {
            push(&self.scope_param, scope);
        }
        if let Some(name) = self.limit_param.as_deref()
            && params.limit > 0
        {
            push(name, &params.limit.to_string());
        }
        if let Some(name) = self.offset_param.as_deref()
            && params.offset > 0
        {
            push(name, &params.offset.to_string());
        }
        url
    }
}

/// Searches a JSON HTTP endpoint through a lazily built shared client.
#[derive(Debug, Clone)]
pub struct JsonSearchSource {
    config: JsonSearchConfig,
    client: Arc<SharedCatalog<reqwest::Client>>,
}

impl JsonSearchSource {
    pub fn new(config: JsonSearchConfig) -> Self {
        let timeout = config.timeout;
        let client = SharedCatalog::new("http-client", move || async move {
            reqwest::Client::builder()
                .timeout(timeout)
                .user_agent(USER_AGENT)
                .build()
                .map_err(|err| FetchError::transient("CLIENT_BUILD", err.to_string()))
        });
        Self::with_catalog(config, Arc::new(client))
    }

    pub fn with_client(config: JsonSearchConfig, client: reqwest::Client) -> Self {
        Self::with_catalog(config, Arc::new(SharedCatalog::ready("http-client", client)))
    }

    pub fn with_catalog(
        config: JsonSearchConfig,
        client: Arc<SharedCatalog<reqwest::Client>>,
    ) -> Self {
        Self { config, client }
    }

    pub fn config(&self) -> &JsonSearchConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<SharedCatalog<reqwest::Client>> {
        &self.client
    }

    fn extract_items(&self, body: Value) -> Result<Vec<Value>, FetchError> {
        let located = if self.config.items_pointer.is_empty() {
            body
        } else {
            let mut body = body;
            body.pointer_mut(&self.config.items_pointer)
                .map(Value::take)
                .ok_or_else(|| {
                    FetchError::malformed(
                        "ITEMS_NOT_FOUND",
                        format!("no value at pointer '{}'", self.config.items_pointer),
                    )
                })?
        };

        match located {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            other => Err(FetchError::malformed(
                "ITEMS_NOT_ARRAY",
                format!("expected an array of results, found {}", json_kind(&other)),
            )),
        }
    }
}

impl DataSource for JsonSearchSource {
    type Record = Value;

    async fn fetch(
        &self,
        params: &QueryParams,
        token: &CancellationToken,
    ) -> Result<Vec<Value>, FetchError> {
        let client = self.client.get().await?;
        let url = self.config.request_url(params);
        debug!(url = %url, "requesting search results");

        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(FetchError::Cancelled),
            response = client.get(&url).send() => response.map_err(transport_error)?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::transient(
                "HTTP_STATUS",
                format!("{url} returned {status}"),
            ));
        }

        let body = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(FetchError::Cancelled),
            body = response.json::<Value>() => body.map_err(transport_error)?,
        };

        self.extract_items(body)
    }

    fn to_entity(&self, record: Value) -> Result<Option<ListItem>, FetchError> {
        let Some(key) = record.get(&self.config.key_field).and_then(scalar_text) else {
            return Ok(None);
        };

        let title = record
            .get(&self.config.title_field)
            .and_then(scalar_text)
            .unwrap_or_else(|| key.clone());
        let subtitle = self
            .config
            .subtitle_field
            .as_deref()
            .and_then(|field| record.get(field))
            .and_then(scalar_text)
            .unwrap_or_default();
        let tags = self
            .config
            .tags_field
            .as_deref()
            .and_then(|field| record.get(field))
            .map(|value| match value {
                Value::Array(values) => {
                    values.iter().filter_map(scalar_text).map(Tag::new).collect()
                }
                other => scalar_text(other).map(Tag::new).into_iter().collect(),
            })
            .unwrap_or_default();
        let details = self
            .config
            .body_field
            .as_deref()
            .and_then(|field| record.get(field))
            .and_then(scalar_text)
            .map(|body| Details {
                title: Some(title.clone()),
                body,
            });

        Ok(Some(ListItem::new(
            key,
            ItemFields {
                title,
                subtitle,
                tags,
                details,
            },
        )))
    }

    fn name(&self) -> &str {
        "http"
    }
}

fn transport_error(err: reqwest::Error) -> FetchError {
    if err.is_decode() {
        FetchError::malformed("PAYLOAD_DECODE", err.to_string())
    } else if err.is_timeout() {
        FetchError::transient("TIMEOUT", err.to_string())
    } else {
        FetchError::transient("TRANSPORT", err.to_string())
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
