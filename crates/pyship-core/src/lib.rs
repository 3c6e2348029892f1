#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate
)]

mod batch;
mod cancel;
mod config;
mod credentials;
mod effects;
mod error;
mod index;
mod outcome;
mod pipeline;
mod process;

#[cfg(test)]
mod testing;

pub use batch::{batch_status, run_batch};
pub use cancel::CancelToken;
pub use config::{BuildConfig, Config, ConfigOverrides, EnvSnapshot, IndexConfig, UploadConfig};
pub use credentials::Credential;
pub use effects::{
    Clock, DiagnosticsSink, Effects, IndexClient, Level, ProcessRunner, SystemEffects, TracingSink,
};
pub use error::{PublishError, Stage};
pub use index::{HttpIndexClient, IndexError};
pub use outcome::{format_status_message, to_json_response, CommandStatus, ExecutionOutcome};
pub use pipeline::{
    ensure_unpublished, publish, ArtifactSet, BuildWorkspace, BuiltArtifact, PollOptions,
    PublishOptions, PublishResult, SummaryStore, TypingArtifactSet,
};
pub use process::{run_command, RunOutput};

pub const PYSHIP_VERSION: &str = env!("CARGO_PKG_VERSION");
