use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use pyship_domain::ArtifactKind;

use super::artifacts::{ArtifactSet, BuiltArtifact};
use super::workspace::BuildWorkspace;
use crate::effects::{Effects, Level};
use crate::error::PublishError;
use crate::process::RunOutput;

/// Runs `python -m build` against the workspace and collects the wheel and
/// sdist it produced.
pub(crate) fn build_distributions(
    effects: &dyn Effects,
    python: &str,
    workspace: &BuildWorkspace,
    artifact_dir: Option<&Path>,
) -> Result<ArtifactSet, PublishError> {
    let dist = workspace.dist_dir();
    let args = vec![
        "-m".to_string(),
        "build".to_string(),
        "--sdist".to_string(),
        "--wheel".to_string(),
        "--outdir".to_string(),
        dist.display().to_string(),
        workspace.root().display().to_string(),
    ];
    let output = effects
        .process()
        .invoke(python, &args, &[], workspace.root())
        .map_err(|err| PublishError::Build {
            message: format!("{err:#}"),
            output: String::new(),
        })?;
    relay(effects, "build", &output);
    if !output.success() {
        return Err(PublishError::Build {
            message: format!("`{python} -m build` exited with code {}", output.code),
            output: output.combined(),
        });
    }

    let (wheel, sdist) = discover(&dist).map_err(|err| PublishError::Build {
        message: format!("{err:#}"),
        output: output.combined(),
    })?;
    let (wheel, sdist) = match artifact_dir {
        Some(dir) => (
            copy_into(&wheel, dir).map_err(PublishError::Workspace)?,
            copy_into(&sdist, dir).map_err(PublishError::Workspace)?,
        ),
        None => (wheel, sdist),
    };

    let describe = |path: &Path, kind| {
        BuiltArtifact::inspect(path, kind).map_err(|err| PublishError::Build {
            message: format!("{err:#}"),
            output: String::new(),
        })
    };
    let set = ArtifactSet {
        wheel: describe(&wheel, ArtifactKind::Wheel)?,
        sdist: describe(&sdist, ArtifactKind::Sdist)?,
    };
    effects.diagnostics().info(&format!(
        "built {} and {}",
        set.wheel.file_name(),
        set.sdist.file_name()
    ));
    Ok(set)
}

/// Forwards each captured line of a tool run to the diagnostics sink.
pub(crate) fn relay(effects: &dyn Effects, tool: &str, output: &RunOutput) {
    let sink = effects.diagnostics();
    for line in output.stdout.lines().filter(|line| !line.trim().is_empty()) {
        sink.emit(Level::Debug, &format!("{tool}: {line}"));
    }
    let level = if output.success() {
        Level::Debug
    } else {
        Level::Warn
    };
    for line in output.stderr.lines().filter(|line| !line.trim().is_empty()) {
        sink.emit(level, &format!("{tool}: {line}"));
    }
}

fn discover(dist: &Path) -> Result<(PathBuf, PathBuf)> {
    let mut wheels = Vec::new();
    let mut sdists = Vec::new();
    let entries = fs::read_dir(dist)
        .with_context(|| format!("build produced no output directory at {}", dist.display()))?;
    for entry in entries {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        match ArtifactKind::from_filename(name) {
            Some(ArtifactKind::Wheel) => wheels.push(path),
            Some(ArtifactKind::Sdist) => sdists.push(path),
            None => {}
        }
    }
    wheels.sort();
    sdists.sort();
    match (wheels.pop(), sdists.pop()) {
        (Some(wheel), Some(sdist)) => Ok((wheel, sdist)),
        (None, _) => bail!("build produced no wheel in {}", dist.display()),
        (_, None) => bail!("build produced no sdist in {}", dist.display()),
    }
}

fn copy_into(artifact: &Path, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let file_name = artifact
        .file_name()
        .with_context(|| format!("artifact {} has no file name", artifact.display()))?;
    let dest = dir.join(file_name);
    fs::copy(artifact, &dest)
        .with_context(|| format!("copying {} to {}", artifact.display(), dest.display()))?;
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::workspace::stage_workspace;
    use crate::testing::{BuildBehavior, FakeEffects};
    use pyship_domain::PublishRequest;
    use tempfile::tempdir;

    fn workspace() -> anyhow::Result<(tempfile::TempDir, BuildWorkspace)> {
        let src = tempdir()?;
        fs::write(src.path().join("demo.py"), "")?;
        let request = PublishRequest::new("demo", "1.2.0", src.path().join("demo.py"));
        let workspace = stage_workspace(&request)?;
        fs::write(
            workspace.root().join("pyproject.toml"),
            "[project]\nname = \"demo\"\nversion = \"1.2.0\"\n",
        )?;
        Ok((src, workspace))
    }

    #[test]
    fn collects_wheel_and_sdist_with_checksums() -> anyhow::Result<()> {
        let (_src, workspace) = workspace()?;
        let effects = FakeEffects::new();
        let set = build_distributions(&effects, "python3", &workspace, None)?;
        assert_eq!(set.wheel.file_name(), "demo-1.2.0-py3-none-any.whl");
        assert_eq!(set.sdist.file_name(), "demo-1.2.0.tar.gz");
        assert_eq!(
            set.wheel.sha256,
            super::super::artifacts::compute_file_sha256(&set.wheel.path)?
        );
        let call = &effects.process.invocations()[0];
        assert_eq!(call.program, "python3");
        assert_eq!(&call.args[..4], ["-m", "build", "--sdist", "--wheel"]);
        assert!(effects.sink.contains("build: Successfully built"));
        Ok(())
    }

    #[test]
    fn non_zero_exit_carries_captured_output() -> anyhow::Result<()> {
        let (_src, workspace) = workspace()?;
        let effects = FakeEffects::new();
        effects.process.set_build(BuildBehavior::Fail(RunOutput {
            code: 1,
            stdout: String::new(),
            stderr: "ERROR Backend subprocess exited".into(),
        }));
        let err = build_distributions(&effects, "python3", &workspace, None)
            .expect_err("build should fail");
        assert_eq!(err.kind(), "build_error");
        assert_eq!(err.tool_output(), Some("ERROR Backend subprocess exited"));
        Ok(())
    }

    #[test]
    fn missing_sdist_is_a_build_error() -> anyhow::Result<()> {
        let (_src, workspace) = workspace()?;
        let effects = FakeEffects::new();
        effects.process.set_build(BuildBehavior::WheelOnly);
        let err = build_distributions(&effects, "python3", &workspace, None)
            .expect_err("no sdist");
        assert!(err.to_string().contains("no sdist"));
        Ok(())
    }

    #[test]
    fn artifacts_are_copied_to_the_artifact_dir() -> anyhow::Result<()> {
        let (_src, workspace) = workspace()?;
        let out = tempdir()?;
        let effects = FakeEffects::new();
        let set = build_distributions(&effects, "python3", &workspace, Some(out.path()))?;
        assert!(set.wheel.path.starts_with(out.path()));
        assert!(set.sdist.path.is_file());
        Ok(())
    }
}
