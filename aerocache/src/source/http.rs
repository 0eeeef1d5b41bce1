use crate::domain::Document;
use crate::ports::SourceFetcher;
use async_trait::async_trait;
use reqwest::Url;
use reqwest::header::ACCEPT;
use serde_json::Value;
use shared::config::Config;
use shared::{Error, FetchError, Result};
use std::time::Duration;
use tracing::debug;

/// Fetches documents with `GET <base>/<identifier>?format=<format>`.
#[derive(Clone, Debug)]
pub struct HttpSourceFetcher {
    client: reqwest::Client,
    base_url: Url,
    format: String,
}

impl HttpSourceFetcher {
    pub fn new(base_url: &str, format: impl Into<String>, timeout: Duration) -> Result<Self> {
        let parsed = Url::parse(base_url)
            .map_err(|e| Error::InvalidConfig(format!("source url '{base_url}': {e}")))?;
        if parsed.cannot_be_a_base() {
            return Err(Error::InvalidConfig(format!(
                "source url '{base_url}' cannot take a path"
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("http client: {e}")))?;

        Ok(Self {
            client,
            base_url: parsed,
            format: format.into(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.source_url, &config.source_format, config.source_timeout)
    }

    /// URL for one identifier. The identifier is a single path segment, so
    /// `/` and spaces in it are percent-encoded.
    pub fn url_for(&self, identifier: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(identifier);
        }
        url.query_pairs_mut().clear().append_pair("format", &self.format);
        url
    }
}

fn classify(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::transport(err)
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

#[async_trait]
impl SourceFetcher for HttpSourceFetcher {
    async fn fetch(&self, identifier: &str) -> std::result::Result<Document, FetchError> {
        let url = self.url_for(identifier);
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(classify)?;
        match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Object(document)) => Ok(document),
            Ok(other) => Err(FetchError::malformed(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
            Err(e) => Err(FetchError::malformed_by("body is not JSON", e)),
        }
    }
}
