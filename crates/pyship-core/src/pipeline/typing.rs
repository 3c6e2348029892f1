use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use walkdir::WalkDir;

use pyship_domain::to_posix_rel;

use super::stubs::render_stub;
use super::workspace::BuildWorkspace;
use crate::effects::DiagnosticsSink;
use crate::error::PublishError;

pub(crate) const TYPED_MARKER: &str = "py.typed";
pub(crate) const MANIFEST_IN: &str = "MANIFEST.in";

/// Generated typing files, all inside the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingArtifactSet {
    pub marker: PathBuf,
    /// Every stub of a public module, generated or already present; sorted.
    pub stubs: Vec<PathBuf>,
    pub manifest_in: PathBuf,
    /// Files shipped as package data, relative to the package directory.
    pub package_data: Vec<String>,
}

pub(crate) fn generate_typing_artifacts(
    workspace: &BuildWorkspace,
    sink: &dyn DiagnosticsSink,
) -> Result<TypingArtifactSet, PublishError> {
    let package_dir = workspace.package_dir();
    let files = package_files(&package_dir).map_err(PublishError::Workspace)?;
    let existing: BTreeSet<&str> = files.iter().map(String::as_str).collect();

    let mut stubs = Vec::new();
    let mut generated = 0usize;
    let mut package_data = BTreeSet::new();
    package_data.insert(TYPED_MARKER.to_string());
    for rel in &files {
        if let Some(module) = rel.strip_suffix(".py") {
            if !is_public_module(rel) {
                continue;
            }
            let stub_rel = format!("{module}.pyi");
            package_data.insert(stub_rel.clone());
            if existing.contains(stub_rel.as_str()) {
                sink.debug(&format!("keeping existing stub {stub_rel}"));
            } else {
                write_stub(&package_dir, rel, &stub_rel)?;
                generated += 1;
            }
            stubs.push(package_dir.join(&stub_rel));
        } else if rel != TYPED_MARKER {
            package_data.insert(rel.clone());
        }
    }
    stubs.sort();

    let marker = package_dir.join(TYPED_MARKER);
    fs::write(&marker, b"")
        .with_context(|| format!("writing {}", marker.display()))
        .map_err(PublishError::Workspace)?;

    let import_name = workspace.import_name();
    let mut manifest = package_data
        .iter()
        .map(|rel| format!("include {import_name}/{rel}"))
        .collect::<Vec<_>>();
    manifest.sort();
    let manifest_in = workspace.root().join(MANIFEST_IN);
    fs::write(&manifest_in, format!("{}\n", manifest.join("\n")))
        .with_context(|| format!("writing {}", manifest_in.display()))
        .map_err(PublishError::Workspace)?;

    sink.info(&format!(
        "generated {generated} of {} stub(s) and {MANIFEST_IN} for {import_name}",
        stubs.len()
    ));
    Ok(TypingArtifactSet {
        marker,
        stubs,
        manifest_in,
        package_data: package_data.into_iter().collect(),
    })
}

fn write_stub(package_dir: &Path, rel: &str, stub_rel: &str) -> Result<(), PublishError> {
    let source_path = package_dir.join(rel);
    let raw = fs::read(&source_path)
        .with_context(|| format!("reading {}", source_path.display()))
        .map_err(PublishError::Workspace)?;
    let source = String::from_utf8(raw).map_err(|err| PublishError::StubGeneration {
        module: rel.to_string(),
        reason: format!("not valid UTF-8 ({err})"),
    })?;
    let stub = render_stub(&source).map_err(|err| PublishError::StubGeneration {
        module: rel.to_string(),
        reason: err.to_string(),
    })?;
    let stub_path = package_dir.join(stub_rel);
    fs::write(&stub_path, stub)
        .with_context(|| format!("writing {}", stub_path.display()))
        .map_err(PublishError::Workspace)
}

/// Every file under the package, as sorted posix paths.
fn package_files(package_dir: &Path) -> anyhow::Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(package_dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walking {}", package_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(package_dir) {
            files.push(to_posix_rel(rel));
        }
    }
    files.sort();
    Ok(files)
}

/// `__init__.py` is public; any other component starting with `_` hides the
/// module.
fn is_public_module(rel: &str) -> bool {
    rel.split('/').all(|part| {
        part == "__init__.py" || !part.starts_with('_')
    })
}
