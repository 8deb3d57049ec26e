//! OData client for the Omada identity view.

use std::time::Duration;

use omada_core::{api::SourceApi, source::RawRecord};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::{Error, Result};

/// Connection settings for the Omada OData view.
#[derive(Debug, Clone, Deserialize)]
pub struct OmadaConfig {
  /// Full URL of the identity view, e.g.
  /// `https://omada.example.dk/OData/DataObjects/Identity`.
  pub url:          String,
  #[serde(default)]
  pub username:     Option<String>,
  #[serde(default)]
  pub password:     Option<String>,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 { 30 }

/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct OmadaClient {
  client: Client,
  config: OmadaConfig,
}

#[derive(Deserialize)]
struct ODataPage {
  value: Vec<Value>,
}

impl OmadaClient {
  pub fn new(config: OmadaConfig) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()?;
    Ok(Self { client, config })
  }

  fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    match &self.config.username {
      Some(username) => req.basic_auth(username, self.config.password.as_ref()),
      None => req,
    }
  }
}

impl SourceApi for OmadaClient {
  type Error = Error;

  async fn fetch_all(&self, filter: Option<&str>) -> Result<Vec<RawRecord>> {
    let mut req = self.auth(self.client.get(&self.config.url));
    if let Some(filter) = filter {
      req = req.query(&[("$filter", filter)]);
    }
    let resp = req.send().await?;

    if !resp.status().is_success() {
      return Err(Error::Status {
        method: "GET",
        url:    self.config.url.clone(),
        status: resp.status(),
      });
    }
    let page: ODataPage = resp.json().await?;
    tracing::debug!(filter, records = page.value.len(), "fetched from omada");
    into_records(page.value)
  }
}

fn into_records(values: Vec<Value>) -> Result<Vec<RawRecord>> {
  values
    .into_iter()
    .map(|value| match value {
      Value::Object(record) => Ok(record),
      other => Err(Error::Decode(format!("expected an object, got {other}"))),
    })
    .collect()
}
