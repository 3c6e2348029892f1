use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use url::Url;
use which::which;

use crate::pipeline::PollOptions;

pub(crate) const DEFAULT_INDEX_URL: &str = "https://pypi.org";
pub(crate) const DEFAULT_TOKEN_ENV: &str = "PYPI_API_TOKEN";
const DEFAULT_POLL_ATTEMPTS: u32 = 24;
const DEFAULT_POLL_INTERVAL_SECS: f64 = 5.0;
const DEFAULT_POLL_TIMEOUT_SECS: f64 = 120.0;
const DEFAULT_HTTP_TIMEOUT_SECS: f64 = 10.0;

/// Frozen view of the process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    #[must_use]
    pub fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    #[must_use]
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self {
            vars: pairs
                .iter()
                .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
                .collect(),
        }
    }

    #[must_use]
    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Trimmed value, treating blank as unset.
    #[must_use]
    pub fn non_empty(&self, key: &str) -> Option<&str> {
        self.var(key).map(str::trim).filter(|value| !value.is_empty())
    }

    #[must_use]
    pub fn flag_is_enabled(&self, key: &str) -> bool {
        self.non_empty(key).is_some_and(|value| {
            matches!(
                value.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
    }

    fn seconds(&self, key: &str) -> Result<Option<Duration>> {
        let Some(raw) = self.non_empty(key) else {
            return Ok(None);
        };
        let secs: f64 = raw
            .parse()
            .map_err(|_| anyhow!("{key} must be a number of seconds, got {raw:?}"))?;
        Duration::try_from_secs_f64(secs)
            .map(Some)
            .map_err(|_| anyhow!("{key} must be a non-negative number of seconds, got {raw:?}"))
    }

    fn count(&self, key: &str) -> Result<Option<u32>> {
        self.non_empty(key)
            .map(|raw| {
                raw.parse::<u32>()
                    .map_err(|_| anyhow!("{key} must be a non-negative integer, got {raw:?}"))
            })
            .transpose()
    }
}

#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub url: Url,
    pub http_timeout: Duration,
    pub keep_proxies: bool,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub repository_url: Option<String>,
    pub token_env: String,
    pub pypirc: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub python: Option<String>,
    pub keep_workspace: bool,
    pub artifact_dir: Option<PathBuf>,
}

/// Resolved settings for one invocation.
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) index: IndexConfig,
    pub(crate) upload: UploadConfig,
    pub(crate) build: BuildConfig,
    pub(crate) poll: PollOptions,
    pub(crate) summary_path: PathBuf,
}

/// Command-line values that win over the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub index_url: Option<String>,
    pub repository_url: Option<String>,
    pub token_env: Option<String>,
    pub python: Option<String>,
    pub summary_path: Option<PathBuf>,
    pub artifact_dir: Option<PathBuf>,
    pub keep_workspace: bool,
    pub poll_attempts: Option<u32>,
    pub poll_interval: Option<Duration>,
    pub poll_timeout: Option<Duration>,
}

impl Config {
    /// Builds the configuration from the current process environment.
    ///
    /// # Errors
    /// Returns an error when a `PYSHIP_*` variable holds an unusable value.
    pub fn from_env() -> Result<Self> {
        Self::from_snapshot(&EnvSnapshot::capture())
    }

    /// # Errors
    /// Returns an error when a `PYSHIP_*` variable holds an unusable value.
    pub fn from_snapshot(snapshot: &EnvSnapshot) -> Result<Self> {
        let index_url = snapshot
            .non_empty("PYSHIP_INDEX_URL")
            .unwrap_or(DEFAULT_INDEX_URL);
        let default_interval = Duration::from_secs_f64(DEFAULT_POLL_INTERVAL_SECS);
        Ok(Self {
            index: IndexConfig {
                url: parse_index_url(index_url)?,
                http_timeout: snapshot
                    .seconds("PYSHIP_HTTP_TIMEOUT")?
                    .unwrap_or_else(|| Duration::from_secs_f64(DEFAULT_HTTP_TIMEOUT_SECS)),
                keep_proxies: snapshot.flag_is_enabled("PYSHIP_KEEP_PROXIES"),
            },
            upload: UploadConfig {
                repository_url: snapshot
                    .non_empty("PYSHIP_REPOSITORY_URL")
                    .map(ToOwned::to_owned),
                token_env: snapshot
                    .non_empty("PYSHIP_TOKEN_ENV")
                    .unwrap_or(DEFAULT_TOKEN_ENV)
                    .to_string(),
                pypirc: dirs_next::home_dir().map(|home| home.join(".pypirc")),
            },
            build: BuildConfig {
                python: snapshot.non_empty("PYSHIP_PYTHON").map(ToOwned::to_owned),
                keep_workspace: snapshot.flag_is_enabled("PYSHIP_KEEP_WORKSPACE"),
                artifact_dir: snapshot.non_empty("PYSHIP_ARTIFACT_DIR").map(PathBuf::from),
            },
            poll: PollOptions {
                max_attempts: snapshot
                    .count("PYSHIP_POLL_ATTEMPTS")?
                    .unwrap_or(DEFAULT_POLL_ATTEMPTS),
                interval: snapshot
                    .seconds("PYSHIP_POLL_INTERVAL")?
                    .unwrap_or(default_interval),
                timeout: match snapshot.seconds("PYSHIP_POLL_TIMEOUT")? {
                    Some(timeout) if timeout.is_zero() => None,
                    Some(timeout) => Some(timeout),
                    None => Some(Duration::from_secs_f64(DEFAULT_POLL_TIMEOUT_SECS)),
                },
                initial_delay: Duration::ZERO,
            },
            summary_path: snapshot
                .non_empty("PYSHIP_SUMMARY_PATH")
                .map_or_else(default_summary_path, PathBuf::from),
        })
    }

    /// # Errors
    /// Returns an error when an overriding index URL cannot be parsed.
    pub fn apply(&mut self, overrides: &ConfigOverrides) -> Result<()> {
        if let Some(url) = &overrides.index_url {
            self.index.url = parse_index_url(url)?;
        }
        if let Some(url) = &overrides.repository_url {
            self.upload.repository_url = Some(url.clone());
        }
        if let Some(token_env) = &overrides.token_env {
            self.upload.token_env.clone_from(token_env);
        }
        if let Some(python) = &overrides.python {
            self.build.python = Some(python.clone());
        }
        if let Some(path) = &overrides.summary_path {
            self.summary_path.clone_from(path);
        }
        if let Some(dir) = &overrides.artifact_dir {
            self.build.artifact_dir = Some(dir.clone());
        }
        self.build.keep_workspace |= overrides.keep_workspace;
        if let Some(attempts) = overrides.poll_attempts {
            self.poll.max_attempts = attempts;
        }
        if let Some(interval) = overrides.poll_interval {
            self.poll.interval = interval;
        }
        if let Some(timeout) = overrides.poll_timeout {
            self.poll.timeout = (!timeout.is_zero()).then_some(timeout);
        }
        Ok(())
    }

    #[must_use]
    pub fn index(&self) -> &IndexConfig {
        &self.index
    }

    #[must_use]
    pub fn upload(&self) -> &UploadConfig {
        &self.upload
    }

    #[must_use]
    pub fn build(&self) -> &BuildConfig {
        &self.build
    }

    #[must_use]
    pub fn poll(&self) -> &PollOptions {
        &self.poll
    }

    #[must_use]
    pub fn summary_path(&self) -> &Path {
        &self.summary_path
    }

    /// The interpreter used to drive `build` and `twine`.
    ///
    /// # Errors
    /// Returns an error when no interpreter is configured and none is on `PATH`.
    pub fn python_interpreter(&self) -> Result<String> {
        if let Some(python) = &self.build.python {
            return Ok(python.clone());
        }
        let found = which("python3")
            .or_else(|_| which("python"))
            .context("python3 or python must be on PATH (or set PYSHIP_PYTHON)")?;
        Ok(found.display().to_string())
    }
}

fn parse_index_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw.trim()).with_context(|| format!("invalid index URL {raw:?}"))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn default_summary_path() -> PathBuf {
    dirs_next::data_dir()
        .map(|dir| dir.join("pyship"))
        .unwrap_or_else(|| PathBuf::from(".pyship"))
        .join("publish_manifest.json")
}
