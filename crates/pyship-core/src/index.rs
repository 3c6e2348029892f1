use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use pyship_domain::name_candidates;

use crate::config::IndexConfig;
use crate::effects::IndexClient;

const USER_AGENT: &str = concat!("pyship/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("{url} returned an unreadable project document: {reason}")]
    Decode { url: String, reason: String },
}

#[derive(Debug, Deserialize)]
struct ProjectDocument {
    #[serde(default)]
    releases: BTreeMap<String, serde_json::Value>,
}

pub(crate) fn build_http_client(config: &IndexConfig) -> Result<Client> {
    let builder = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(config.http_timeout);
    let builder = if config.keep_proxies {
        builder
    } else {
        builder.no_proxy()
    };
    builder.build().context("failed to build HTTP client")
}

/// Index client over the `<base>/pypi/<name>/json` endpoint.
pub struct HttpIndexClient {
    client: Client,
    base: Url,
}

impl HttpIndexClient {
    /// # Errors
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(config: &IndexConfig) -> Result<Self> {
        Ok(Self {
            client: build_http_client(config)?,
            base: config.url.clone(),
        })
    }

    fn project_url(&self, name: &str) -> Result<Url, IndexError> {
        self.base
            .join(&format!("pypi/{name}/json"))
            .map_err(|err| IndexError::Decode {
                url: self.base.to_string(),
                reason: err.to_string(),
            })
    }

    fn fetch_project(&self, name: &str) -> Result<Option<BTreeSet<String>>, IndexError> {
        let url = self.project_url(name)?;
        let response = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .map_err(|source| IndexError::Transport {
                url: url.to_string(),
                source,
            })?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(IndexError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.text().map_err(|source| IndexError::Transport {
            url: url.to_string(),
            source,
        })?;
        let document: ProjectDocument =
            serde_json::from_str(&body).map_err(|err| IndexError::Decode {
                url: url.to_string(),
                reason: err.to_string(),
            })?;
        Ok(Some(document.releases.into_keys().collect()))
    }
}

impl IndexClient for HttpIndexClient {
    fn fetch_versions(&self, name: &str) -> Result<Option<BTreeSet<String>>, IndexError> {
        for candidate in name_candidates(name) {
            if let Some(versions) = self.fetch_project(&candidate)? {
                tracing::debug!(name, candidate, count = versions.len(), "index project found");
                return Ok(Some(versions));
            }
        }
        Ok(None)
    }
}
