use std::fmt;
use std::time::Duration;

use pyship_domain::RequestError;

use crate::index::IndexError;
use crate::outcome::CommandStatus;

/// Pipeline checkpoints where a run can be interrupted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Guard,
    Staging,
    Typing,
    Build,
    Upload,
    Availability,
}

impl Stage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Guard => "duplicate guard",
            Self::Staging => "workspace staging",
            Self::Typing => "typing generation",
            Self::Build => "build",
            Self::Upload => "upload",
            Self::Availability => "availability wait",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("invalid publish request: {0}")]
    InvalidRequest(#[from] RequestError),

    #[error("workspace staging failed: {0:#}")]
    Workspace(#[source] anyhow::Error),

    #[error("could not derive interface stubs for {module}: {reason}")]
    StubGeneration { module: String, reason: String },

    #[error("build failed: {message}")]
    Build { message: String, output: String },

    #[error("could not query the index for {package}: {source}")]
    MetadataQuery {
        package: String,
        #[source]
        source: IndexError,
    },

    #[error("{package} {version} is already published")]
    DuplicateVersion { package: String, version: String },

    #[error("no upload credential found (set {token_env}, TWINE_API_TOKEN, TWINE_PASSWORD or configure ~/.pypirc)")]
    Credential { token_env: String },

    #[error("upload failed: {message}")]
    Upload { message: String, output: String },

    #[error("{package} {version} did not appear on the index after {attempts} checks ({:.1}s)", .waited.as_secs_f64())]
    AvailabilityTimeout {
        package: String,
        version: String,
        attempts: u32,
        waited: Duration,
    },

    #[error("cancelled during {stage}")]
    Cancelled { stage: Stage },

    #[error("could not write the summary record: {0:#}")]
    Manifest(#[source] anyhow::Error),
}

impl PublishError {
    /// Stable machine-readable label, also written to summary records.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::Workspace(_) => "workspace_error",
            Self::StubGeneration { .. } => "stub_generation_error",
            Self::Build { .. } => "build_error",
            Self::MetadataQuery { .. } => "metadata_query_error",
            Self::DuplicateVersion { .. } => "duplicate_version_error",
            Self::Credential { .. } => "credential_error",
            Self::Upload { .. } => "upload_error",
            Self::AvailabilityTimeout { .. } => "availability_timeout_error",
            Self::Cancelled { .. } => "cancelled",
            Self::Manifest(_) => "manifest_error",
        }
    }

    /// Conditions the operator can act on map to a user error; the rest are
    /// failures of the pipeline or its tools.
    #[must_use]
    pub fn severity(&self) -> CommandStatus {
        match self {
            Self::InvalidRequest(_)
            | Self::DuplicateVersion { .. }
            | Self::Credential { .. }
            | Self::AvailabilityTimeout { .. }
            | Self::Cancelled { .. } => CommandStatus::UserError,
            _ => CommandStatus::Failure,
        }
    }

    /// Captured tool output, when the failure came from an external tool.
    #[must_use]
    pub fn tool_output(&self) -> Option<&str> {
        match self {
            Self::Build { output, .. } | Self::Upload { output, .. } if !output.is_empty() => {
                Some(output)
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::DuplicateVersion { .. } => Some("bump the version before publishing again"),
            Self::Credential { .. } => Some("export an API token for the target index"),
            Self::MetadataQuery { .. } => Some("check network access to the index or retry later"),
            Self::AvailabilityTimeout { .. } => {
                Some("the upload succeeded; the index may still be propagating the release")
            }
            Self::Build { .. } => Some("ensure the `build` package is installed for the interpreter"),
            Self::Upload { .. } => Some("ensure `twine` is installed and the credential is valid"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_conditions_are_user_errors() {
        let duplicate = PublishError::DuplicateVersion {
            package: "demo".into(),
            version: "1.0".into(),
        };
        assert_eq!(duplicate.kind(), "duplicate_version_error");
        assert_eq!(duplicate.severity(), CommandStatus::UserError);
        assert_eq!(duplicate.to_string(), "demo 1.0 is already published");

        let build = PublishError::Build {
            message: "exit code 1".into(),
            output: "Traceback".into(),
        };
        assert_eq!(build.severity(), CommandStatus::Failure);
        assert_eq!(build.tool_output(), Some("Traceback"));
    }

    #[test]
    fn timeout_message_reports_attempts_and_wait() {
        let err = PublishError::AvailabilityTimeout {
            package: "demo".into(),
            version: "1.0".into(),
            attempts: 3,
            waited: Duration::from_millis(2500),
        };
        assert_eq!(
            err.to_string(),
            "demo 1.0 did not appear on the index after 3 checks (2.5s)"
        );
    }

    #[test]
    fn workspace_errors_render_the_context_chain() {
        let err = PublishError::Workspace(
            anyhow::anyhow!("permission denied").context("copying README.md"),
        );
        assert_eq!(
            err.to_string(),
            "workspace staging failed: copying README.md: permission denied"
        );
    }
}
