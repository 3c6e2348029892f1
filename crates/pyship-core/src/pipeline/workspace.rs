use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use tempfile::TempDir;

use pyship_domain::{to_posix_rel, PublishRequest};

use crate::error::PublishError;

/// Disposable directory holding one staged package and its build outputs.
///
/// Layout: `<root>/<import_name>/` for the package, `<root>/dist/` for
/// artifacts, descriptors at `<root>`.
#[derive(Debug)]
pub struct BuildWorkspace {
    dir: TempDir,
    import_name: String,
    staged: Vec<String>,
}

impl BuildWorkspace {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn import_name(&self) -> &str {
        &self.import_name
    }

    pub fn package_dir(&self) -> PathBuf {
        self.root().join(&self.import_name)
    }

    pub fn dist_dir(&self) -> PathBuf {
        self.root().join("dist")
    }

    /// Posix paths of the copied files, relative to the package directory.
    pub fn staged_files(&self) -> &[String] {
        &self.staged
    }

    /// Removes the workspace, or leaves it on disk and returns its path.
    pub(crate) fn close(self, keep: bool) -> Result<Option<PathBuf>> {
        if keep {
            let path = self.dir.into_path();
            tracing::info!(workspace = %path.display(), "keeping build workspace");
            return Ok(Some(path));
        }
        let path = self.root().to_path_buf();
        self.dir
            .close()
            .with_context(|| format!("removing workspace {}", path.display()))?;
        Ok(None)
    }
}

/// Copies the main file and ancillary files into a fresh workspace.
pub(crate) fn stage_workspace(request: &PublishRequest) -> Result<BuildWorkspace, PublishError> {
    stage(request).map_err(PublishError::Workspace)
}

fn stage(request: &PublishRequest) -> Result<BuildWorkspace> {
    if !request.main_file.is_file() {
        bail!("main file {} does not exist", request.main_file.display());
    }
    let source_root = request
        .package_dir()
        .canonicalize()
        .with_context(|| format!("resolving {}", request.package_dir().display()))?;
    let main_name = request
        .main_file
        .file_name()
        .ok_or_else(|| anyhow!("main file {} has no file name", request.main_file.display()))?;

    let import_name = request.import_name();
    let dir = tempfile::Builder::new()
        .prefix(&format!("_build_{import_name}_"))
        .tempdir()
        .context("creating build workspace")?;
    let package_dir = dir.path().join(&import_name);
    fs::create_dir_all(&package_dir)
        .with_context(|| format!("creating {}", package_dir.display()))?;

    let mut staged = vec![to_posix_rel(Path::new(main_name))];
    copy_file(&source_root.join(main_name), &package_dir.join(main_name))?;

    for rel in &request.ancillary {
        let source = resolve_inside(&source_root, rel)?;
        let rel = source
            .strip_prefix(&source_root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| rel.clone());
        let posix = to_posix_rel(&rel);
        if staged.contains(&posix) {
            continue;
        }
        copy_file(&source, &package_dir.join(&rel))?;
        staged.push(posix);
    }
    staged.sort();

    tracing::debug!(
        workspace = %dir.path().display(),
        files = staged.len(),
        "staged package"
    );
    Ok(BuildWorkspace {
        dir,
        import_name,
        staged,
    })
}

fn resolve_inside(root: &Path, rel: &Path) -> Result<PathBuf> {
    if rel.is_absolute() || rel.components().any(|c| matches!(c, Component::Prefix(_))) {
        bail!("ancillary path {} must be relative", rel.display());
    }
    let joined = root.join(rel);
    if !joined.is_file() {
        bail!("ancillary file {} does not exist", joined.display());
    }
    let resolved = joined
        .canonicalize()
        .with_context(|| format!("resolving {}", joined.display()))?;
    if !resolved.starts_with(root) {
        bail!(
            "ancillary file {} resolves outside {}",
            rel.display(),
            root.display()
        );
    }
    Ok(resolved)
}

fn copy_file(source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::copy(source, dest)
        .with_context(|| format!("copying {} to {}", source.display(), dest.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use walkdir::WalkDir;

    fn listing(root: &Path) -> Vec<String> {
        let mut files: Vec<String> = WalkDir::new(root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                entry
                    .path()
                    .strip_prefix(root)
                    .ok()
                    .map(to_posix_rel)
            })
            .collect();
        files.sort();
        files
    }

    #[test]
    fn stages_exactly_the_requested_files() -> Result<()> {
        let src = tempdir()?;
        let pkg = src.path().join("demo");
        fs::create_dir_all(pkg.join("docs"))?;
        fs::write(pkg.join("demo.py"), "def run() -> None:\n    pass\n")?;
        fs::write(pkg.join("README.md"), "# demo\n")?;
        fs::write(pkg.join("docs/guide.md"), "guide\n")?;
        fs::write(pkg.join("unrelated.txt"), "left behind\n")?;

        let mut request = PublishRequest::new("demo-pkg", "1.0.0", pkg.join("demo.py"));
        request.ancillary = vec![PathBuf::from("README.md"), Path::new("docs").join("guide.md")];
        let workspace = stage(&request)?;

        assert_eq!(workspace.import_name(), "demo_pkg");
        assert_eq!(
            listing(workspace.root()),
            vec!["demo_pkg/README.md", "demo_pkg/demo.py", "demo_pkg/docs/guide.md"]
        );
        assert_eq!(
            fs::read(workspace.package_dir().join("docs/guide.md"))?,
            fs::read(pkg.join("docs/guide.md"))?
        );
        assert_eq!(workspace.staged_files(), ["README.md", "demo.py", "docs/guide.md"]);
        assert!(workspace
            .root()
            .file_name()
            .is_some_and(|name| name.to_string_lossy().starts_with("_build_demo_pkg_")));
        Ok(())
    }

    #[test]
    fn missing_and_escaping_files_fail() -> Result<()> {
        let src = tempdir()?;
        let pkg = src.path().join("demo");
        fs::create_dir_all(&pkg)?;
        fs::write(pkg.join("demo.py"), "")?;
        fs::write(src.path().join("secret.txt"), "")?;

        let mut request = PublishRequest::new("demo", "1.0.0", pkg.join("demo.py"));
        request.ancillary = vec![PathBuf::from("missing.md")];
        let err = stage_workspace(&request).expect_err("missing ancillary");
        assert_eq!(err.kind(), "workspace_error");

        request.ancillary = vec![PathBuf::from("../secret.txt")];
        let err = stage(&request).expect_err("escaping ancillary");
        assert!(err.to_string().contains("outside"));

        let request = PublishRequest::new("demo", "1.0.0", pkg.join("absent.py"));
        assert!(stage(&request).is_err());
        Ok(())
    }

    #[test]
    fn workspaces_are_fresh_and_removed_on_close() -> Result<()> {
        let src = tempdir()?;
        fs::write(src.path().join("demo.py"), "")?;
        let request = PublishRequest::new("demo", "1.0.0", src.path().join("demo.py"));
        let first = stage(&request)?;
        let second = stage(&request)?;
        assert_ne!(first.root(), second.root());

        let first_root = first.root().to_path_buf();
        assert_eq!(first.close(false)?, None);
        assert!(!first_root.exists());

        let kept = second.close(true)?.ok_or_else(|| anyhow!("kept path"))?;
        assert!(kept.join("demo/demo.py").is_file());
        fs::remove_dir_all(kept)?;
        Ok(())
    }
}
