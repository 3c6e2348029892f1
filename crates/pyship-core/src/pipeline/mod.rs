//! The publish pipeline: guard, stage, describe, build, upload, confirm, record.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde_json::{json, Value};
use time::OffsetDateTime;

use pyship_domain::{AvailabilityStatus, ErrorRecord, ManifestRecord, PublishOutcome, PublishRequest};

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::credentials::Credential;
use crate::effects::{Effects, Level};
use crate::error::{PublishError, Stage};
use crate::outcome::{CommandStatus, ExecutionOutcome};

mod artifacts;
mod build;
mod descriptor;
mod guard;
mod manifest;
mod poll;
mod stubs;
mod typing;
mod upload;
mod workspace;


pub use artifacts::{ArtifactSet, BuiltArtifact};
pub use manifest::SummaryStore;
pub use poll::PollOptions;
pub use typing::TypingArtifactSet;
pub use workspace::BuildWorkspace;

pub use guard::ensure_unpublished;
pub(crate) use manifest::{new_run_id, utc_timestamp};

use upload::UploadStatus;
use workspace::stage_workspace;

/// Knobs for a single publish run.
#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub python: String,
    /// Stop after the build; nothing is uploaded.
    pub dry_run: bool,
    /// Poll the index until the release is visible.
    pub wait: bool,
    pub poll: PollOptions,
    pub keep_workspace: bool,
    pub artifact_dir: Option<PathBuf>,
    pub repository_url: Option<String>,
    /// Named in the error when no credential can be found.
    pub token_env: String,
    pub summary_path: PathBuf,
}

impl PublishOptions {
    /// # Errors
    /// Returns an error when no Python interpreter can be located.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            python: config.python_interpreter()?,
            dry_run: false,
            wait: true,
            poll: config.poll().clone(),
            keep_workspace: config.build().keep_workspace,
            artifact_dir: config.build().artifact_dir.clone(),
            repository_url: config.upload().repository_url.clone(),
            token_env: config.upload().token_env.clone(),
            summary_path: config.summary_path().to_path_buf(),
        })
    }

    /// Where the wheel and sdist are kept after the workspace is removed: the
    /// configured `artifact_dir`, else `artifacts/<name>-<version>/` next to
    /// the summary store.
    #[must_use]
    pub fn artifact_dir_for(&self, request: &PublishRequest) -> PathBuf {
        if let Some(dir) = &self.artifact_dir {
            return dir.clone();
        }
        self.summary_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .join("artifacts")
            .join(format!("{}-{}", request.name, request.version))
    }
}

/// Everything one run produced, finalized after the summary record is written.
#[derive(Debug)]
pub struct PublishResult {
    pub run_id: String,
    pub package: String,
    pub version: String,
    pub outcome: PublishOutcome,
    pub artifacts: Option<ArtifactSet>,
    pub availability: AvailabilityStatus,
    pub availability_wait: Option<Duration>,
    pub workspace: Option<PathBuf>,
    /// The record merged into the summary store, when that succeeded.
    pub record: Option<ManifestRecord>,
    pub error: Option<PublishError>,
}

impl PublishResult {
    #[must_use]
    pub fn status(&self) -> CommandStatus {
        self.error
            .as_ref()
            .map_or(CommandStatus::Ok, PublishError::severity)
    }

    #[must_use]
    pub fn message(&self) -> String {
        let label = format!("{} {}", self.package, self.version);
        match (&self.error, self.outcome) {
            (Some(err), PublishOutcome::Published) => format!("published {label}, but {err}"),
            (Some(err), _) => err.to_string(),
            (None, PublishOutcome::Published) => match self.availability_wait {
                Some(waited) if self.availability == AvailabilityStatus::Confirmed => format!(
                    "published {label} (visible on the index after {:.1}s)",
                    waited.as_secs_f64()
                ),
                _ => format!("published {label}"),
            },
            (None, PublishOutcome::SkippedDuplicate) => {
                format!("{label} is already on the index; nothing uploaded")
            }
            (None, PublishOutcome::DryRun) => format!("built {label} (dry run, nothing uploaded)"),
            (None, PublishOutcome::Failed) => format!("publishing {label} failed"),
        }
    }

    #[must_use]
    pub fn details(&self) -> Value {
        let artifacts = self
            .artifacts
            .as_ref()
            .map(ArtifactSet::records)
            .unwrap_or_default();
        let mut details = json!({
            "run_id": self.run_id,
            "package": self.package,
            "version": self.version,
            "outcome": self.outcome,
            "availability": self.availability,
            "availability_seconds": self.availability_wait.map(|wait| wait.as_secs_f64()),
            "artifacts": artifacts,
            "workspace": self.workspace.as_ref().map(|path| path.display().to_string()),
            "recorded": self.record.is_some(),
        });
        if let Some(err) = &self.error {
            details["error"] = json!({ "kind": err.kind(), "message": err.to_string() });
            if let Some(hint) = err.hint() {
                details["hint"] = json!(hint);
            }
            if let Some(output) = err.tool_output() {
                details["tool_output"] = json!(output);
            }
        }
        details
    }

    #[must_use]
    pub fn into_outcome(self) -> ExecutionOutcome {
        ExecutionOutcome::with_status(self.status(), self.message(), self.details())
    }
}

/// What the stages have established so far; survives a failing stage.
#[derive(Default)]
struct Progress {
    workspace: Option<BuildWorkspace>,
    artifacts: Option<ArtifactSet>,
    uploaded: bool,
    availability: AvailabilityStatus,
    waited: Option<Duration>,
}

/// Runs the whole pipeline for `request` and records the result.
///
/// The summary store is written for every outcome, failures included.
pub fn publish(
    effects: &dyn Effects,
    options: &PublishOptions,
    credential: Option<&Credential>,
    request: &PublishRequest,
    cancel: &CancelToken,
) -> PublishResult {
    let run_id = new_run_id(&request.name, &request.version);
    tracing::info!(
        package = %request.name,
        version = %request.version,
        run_id = %run_id,
        dry_run = options.dry_run,
        "starting publish"
    );

    let mut progress = Progress::default();
    let staged = run_stages(effects, options, credential, request, cancel, &mut progress);
    let (outcome, error) = match staged {
        Ok(outcome) => (outcome, None),
        Err(err) => {
            let outcome = if progress.uploaded {
                PublishOutcome::Published
            } else if matches!(err, PublishError::DuplicateVersion { .. }) {
                PublishOutcome::SkippedDuplicate
            } else {
                PublishOutcome::Failed
            };
            match &err {
                PublishError::AvailabilityTimeout { waited, .. } => {
                    progress.availability = AvailabilityStatus::TimedOut;
                    progress.waited = Some(*waited);
                }
                PublishError::Cancelled { .. } if progress.uploaded => {
                    progress.availability = AvailabilityStatus::Cancelled;
                }
                _ => {}
            }
            let level = if err.severity() == CommandStatus::Failure {
                Level::Error
            } else {
                Level::Warn
            };
            effects
                .diagnostics()
                .emit(level, &format!("{}: {err}", err.kind()));
            (outcome, Some(err))
        }
    };

    let workspace = progress.workspace.take().and_then(|ws| {
        ws.close(options.keep_workspace).unwrap_or_else(|err| {
            effects
                .diagnostics()
                .warn(&format!("could not remove build workspace: {err:#}"));
            None
        })
    });

    let mut result = PublishResult {
        run_id,
        package: request.name.clone(),
        version: request.version.clone(),
        outcome,
        artifacts: progress.artifacts,
        availability: progress.availability,
        availability_wait: progress.waited,
        workspace,
        record: None,
        error,
    };
    let record = summary_record(&result);
    match SummaryStore::new(&options.summary_path).record(record.clone()) {
        Ok(()) => result.record = Some(record),
        Err(err) => {
            effects
                .diagnostics()
                .warn(&format!("summary record was not written: {err:#}"));
            if result.error.is_none() {
                result.error = Some(PublishError::Manifest(err));
            }
        }
    }
    tracing::info!(
        package = %result.package,
        version = %result.version,
        outcome = %result.outcome,
        availability = result.availability.as_str(),
        "publish finished"
    );
    result
}

fn run_stages(
    effects: &dyn Effects,
    options: &PublishOptions,
    credential: Option<&Credential>,
    request: &PublishRequest,
    cancel: &CancelToken,
    progress: &mut Progress,
) -> Result<PublishOutcome, PublishError> {
    request.validate()?;
    let credential = if options.dry_run {
        None
    } else {
        Some(credential.ok_or_else(|| PublishError::Credential {
            token_env: options.token_env.clone(),
        })?)
    };

    checkpoint(cancel, Stage::Guard)?;
    ensure_unpublished(effects, request)?;

    checkpoint(cancel, Stage::Staging)?;
    let workspace = progress.workspace.insert(stage_workspace(request)?);
    if descriptor::ensure_package_init(workspace)? {
        effects
            .diagnostics()
            .debug("package had no __init__.py; created an empty one");
    }

    checkpoint(cancel, Stage::Typing)?;
    let typing = typing::generate_typing_artifacts(workspace, effects.diagnostics())?;
    descriptor::write_project_descriptor(workspace, request, &typing)?;

    checkpoint(cancel, Stage::Build)?;
    let artifact_dir = options.artifact_dir_for(request);
    let artifacts = progress.artifacts.insert(build::build_distributions(
        effects,
        &options.python,
        workspace,
        Some(&artifact_dir),
    )?);

    let Some(credential) = credential else {
        effects
            .diagnostics()
            .info("dry run: skipping upload and availability check");
        return Ok(PublishOutcome::DryRun);
    };

    checkpoint(cancel, Stage::Upload)?;
    let status = upload::upload_artifacts(
        effects,
        &options.python,
        artifacts,
        credential,
        options.repository_url.as_deref(),
        workspace.root(),
    )?;
    if status == UploadStatus::AlreadyPresent {
        progress.availability = AvailabilityStatus::Skipped;
        return Ok(PublishOutcome::SkippedDuplicate);
    }
    progress.uploaded = true;

    if !options.wait {
        progress.availability = AvailabilityStatus::Skipped;
        return Ok(PublishOutcome::Published);
    }
    let availability = poll::wait_for_release(effects, request, &options.poll, cancel)?;
    progress.availability = AvailabilityStatus::Confirmed;
    progress.waited = Some(availability.waited);
    effects.diagnostics().info(&format!(
        "{} is visible on the index after {} check(s)",
        request.release_label(),
        availability.attempts
    ));
    Ok(PublishOutcome::Published)
}

fn checkpoint(cancel: &CancelToken, stage: Stage) -> Result<(), PublishError> {
    if cancel.is_cancelled() {
        Err(PublishError::Cancelled { stage })
    } else {
        Ok(())
    }
}

fn summary_record(result: &PublishResult) -> ManifestRecord {
    ManifestRecord {
        run_id: result.run_id.clone(),
        package: result.package.clone(),
        version: result.version.clone(),
        outcome: result.outcome,
        availability: result.availability,
        availability_seconds: result.availability_wait.map(|wait| wait.as_secs_f64()),
        artifacts: result
            .artifacts
            .as_ref()
            .map(ArtifactSet::records)
            .unwrap_or_default(),
        workspace: result
            .workspace
            .as_ref()
            .map(|path| path.display().to_string()),
        timestamp: utc_timestamp(OffsetDateTime::now_utc()),
        error: result.error.as_ref().map(|err| ErrorRecord {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }),
    }
}
