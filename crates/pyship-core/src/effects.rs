use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::index::{HttpIndexClient, IndexError};
use crate::process::{run_command, RunOutput};

/// Runs external tools to completion.
pub trait ProcessRunner: Send + Sync {
    fn invoke(
        &self,
        program: &str,
        args: &[String],
        envs: &[(String, String)],
        cwd: &Path,
    ) -> Result<RunOutput>;
}

/// Read access to a package index's JSON API.
pub trait IndexClient: Send + Sync {
    /// Published versions of `name`, or `None` when the index has no such
    /// project.
    fn fetch_versions(&self, name: &str) -> Result<Option<BTreeSet<String>>, IndexError>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    /// Waits for `duration` unless `cancel` trips first. Returns `true` when
    /// the wait was cut short by cancellation.
    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> bool;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

/// Destination for progress lines emitted by the pipeline stages.
pub trait DiagnosticsSink: Send + Sync {
    fn emit(&self, level: Level, message: &str);

    fn info(&self, message: &str) {
        self.emit(Level::Info, message);
    }

    fn warn(&self, message: &str) {
        self.emit(Level::Warn, message);
    }

    fn debug(&self, message: &str) {
        self.emit(Level::Debug, message);
    }
}

pub trait Effects: Send + Sync {
    fn process(&self) -> &dyn ProcessRunner;
    fn index(&self) -> &dyn IndexClient;
    fn clock(&self) -> &dyn Clock;
    fn diagnostics(&self) -> &dyn DiagnosticsSink;
}

pub struct SystemEffects {
    process: Arc<SystemProcessRunner>,
    index: Arc<HttpIndexClient>,
    clock: Arc<SystemClock>,
    diagnostics: Arc<TracingSink>,
}

impl SystemEffects {
    /// # Errors
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            process: Arc::new(SystemProcessRunner),
            index: Arc::new(HttpIndexClient::new(config.index())?),
            clock: Arc::new(SystemClock),
            diagnostics: Arc::new(TracingSink),
        })
    }
}

impl Effects for SystemEffects {
    fn process(&self) -> &dyn ProcessRunner {
        self.process.as_ref()
    }

    fn index(&self) -> &dyn IndexClient {
        self.index.as_ref()
    }

    fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    fn diagnostics(&self) -> &dyn DiagnosticsSink {
        self.diagnostics.as_ref()
    }
}

struct SystemProcessRunner;

impl ProcessRunner for SystemProcessRunner {
    fn invoke(
        &self,
        program: &str,
        args: &[String],
        envs: &[(String, String)],
        cwd: &Path,
    ) -> Result<RunOutput> {
        tracing::debug!(program, ?args, cwd = %cwd.display(), "running tool");
        run_command(program, args, envs, cwd)
    }
}

struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> bool {
        cancel.wait_timeout(duration)
    }
}

/// Forwards diagnostics to `tracing` under the `pyship` target.
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn emit(&self, level: Level, message: &str) {
        match level {
            Level::Debug => tracing::debug!(target: "pyship", "{message}"),
            Level::Info => tracing::info!(target: "pyship", "{message}"),
            Level::Warn => tracing::warn!(target: "pyship", "{message}"),
            Level::Error => tracing::error!(target: "pyship", "{message}"),
        }
    }
}
