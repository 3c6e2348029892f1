use std::path::Path;

use super::artifacts::ArtifactSet;
use super::build::relay;
use crate::credentials::Credential;
use crate::effects::Effects;
use crate::error::PublishError;
use crate::process::RunOutput;

/// Output fragments meaning the index already holds the files.
const ALREADY_PRESENT_MARKERS: [&str; 3] =
    ["file already exists", "file-name-reuse", "already exists on pypi"];
/// Printed by `--skip-existing` once per skipped file.
const SKIPPED_MARKER: &str = "appears to already exist";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UploadStatus {
    Uploaded,
    AlreadyPresent,
}

pub(crate) fn upload_artifacts(
    effects: &dyn Effects,
    python: &str,
    artifacts: &ArtifactSet,
    credential: &Credential,
    repository_url: Option<&str>,
    cwd: &Path,
) -> Result<UploadStatus, PublishError> {
    let mut args = vec![
        "-m".to_string(),
        "twine".to_string(),
        "upload".to_string(),
        "--non-interactive".to_string(),
        "--skip-existing".to_string(),
    ];
    if let Some(url) = repository_url {
        args.push("--repository-url".to_string());
        args.push(url.to_string());
    }
    args.extend(credential.upload_args());
    args.extend(artifacts.iter().map(|artifact| artifact.path.display().to_string()));

    effects.diagnostics().info(&format!(
        "uploading {} file(s) with credential from {}",
        artifacts.iter().count(),
        credential.source()
    ));
    let output = effects
        .process()
        .invoke(python, &args, &credential.upload_env(), cwd)
        .map_err(|err| PublishError::Upload {
            message: format!("{err:#}"),
            output: String::new(),
        })?;
    let output = RunOutput {
        code: output.code,
        stdout: credential.redact(&output.stdout),
        stderr: credential.redact(&output.stderr),
    };
    relay(effects, "twine", &output);

    let combined = output.combined();
    let lowered = combined.to_ascii_lowercase();
    if !output.success() {
        if ALREADY_PRESENT_MARKERS
            .iter()
            .any(|marker| lowered.contains(marker))
        {
            effects
                .diagnostics()
                .warn("index reports the files already exist; treating as skipped");
            return Ok(UploadStatus::AlreadyPresent);
        }
        return Err(PublishError::Upload {
            message: format!("`{python} -m twine upload` exited with code {}", output.code),
            output: combined,
        });
    }
    let skipped = lowered.matches(SKIPPED_MARKER).count();
    if skipped >= artifacts.iter().count() {
        effects
            .diagnostics()
            .warn("every file was skipped as already present on the index");
        return Ok(UploadStatus::AlreadyPresent);
    }
    Ok(UploadStatus::Uploaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::artifacts::BuiltArtifact;
    use crate::testing::FakeEffects;
    use pyship_domain::ArtifactKind;
    use std::path::PathBuf;

    fn artifacts() -> ArtifactSet {
        let artifact = |name: &str, kind| BuiltArtifact {
            path: PathBuf::from("/ws/dist").join(name),
            kind,
            bytes: 1,
            sha256: "00".into(),
        };
        ArtifactSet {
            wheel: artifact("demo-1.0-py3-none-any.whl", ArtifactKind::Wheel),
            sdist: artifact("demo-1.0.tar.gz", ArtifactKind::Sdist),
        }
    }

    fn token() -> Credential {
        Credential::Token {
            source: "PYPI_API_TOKEN".into(),
            token: "pypi-secret".into(),
        }
    }

    fn upload(effects: &FakeEffects, url: Option<&str>) -> Result<UploadStatus, PublishError> {
        upload_artifacts(effects, "python3", &artifacts(), &token(), url, Path::new("/ws"))
    }

    #[test]
    fn passes_flags_and_token_environment() -> anyhow::Result<()> {
        let effects = FakeEffects::new();
        assert_eq!(upload(&effects, Some("https://test.pypi.org/legacy/"))?, UploadStatus::Uploaded);
        let call = &effects.process.invocations()[0];
        assert_eq!(
            call.args,
            vec![
                "-m",
                "twine",
                "upload",
                "--non-interactive",
                "--skip-existing",
                "--repository-url",
                "https://test.pypi.org/legacy/",
                "/ws/dist/demo-1.0-py3-none-any.whl",
                "/ws/dist/demo-1.0.tar.gz",
            ]
        );
        assert!(call
            .envs
            .contains(&("TWINE_USERNAME".to_string(), "__token__".to_string())));
        assert!(call
            .envs
            .contains(&("TWINE_PASSWORD".to_string(), "pypi-secret".to_string())));
        Ok(())
    }

    #[test]
    fn already_exists_failure_is_a_skip() -> anyhow::Result<()> {
        let effects = FakeEffects::new();
        effects.process.set_upload(RunOutput {
            code: 1,
            stdout: String::new(),
            stderr: "HTTPError: 400 Bad Request File already exists. See https://pypi.org/help/#file-name-reuse".into(),
        });
        assert_eq!(upload(&effects, None)?, UploadStatus::AlreadyPresent);
        Ok(())
    }

    #[test]
    fn skip_existing_messages_for_every_file_are_a_skip() -> anyhow::Result<()> {
        let effects = FakeEffects::new();
        effects.process.set_upload(RunOutput {
            code: 0,
            stdout: "WARNING  Skipping demo-1.0-py3-none-any.whl because it appears to already exist\nWARNING  Skipping demo-1.0.tar.gz because it appears to already exist\n".into(),
            stderr: String::new(),
        });
        assert_eq!(upload(&effects, None)?, UploadStatus::AlreadyPresent);
        Ok(())
    }

    #[test]
    fn other_failures_are_upload_errors_without_secrets() {
        let effects = FakeEffects::new();
        effects.process.set_upload(RunOutput {
            code: 1,
            stdout: String::new(),
            stderr: "403 Invalid or non-existent authentication for pypi-secret".into(),
        });
        let err = upload(&effects, None).expect_err("upload should fail");
        assert_eq!(err.kind(), "upload_error");
        let output = err.tool_output().unwrap_or_default();
        assert!(output.contains("403"));
        assert!(!output.contains("pypi-secret"));
    }
}
