//! Resolution of the ancillary files that travel with a package.
//!
//! Entries are relative to the package directory. An entry starting with `@`
//! names an allowlist file holding one path per line. Directories are never
//! expanded and anything resolving outside the package directory is dropped.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};

/// Resolves ancillary entries into sorted, de-duplicated posix paths relative
/// to `package_dir`.
pub fn resolve_ancillary(package_dir: &Path, entries: &[String]) -> Result<Vec<String>> {
    let root = package_dir
        .canonicalize()
        .with_context(|| format!("resolving package dir {}", package_dir.display()))?;
    let mut collected = BTreeSet::new();
    for entry in entries {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        if let Some(list) = entry.strip_prefix('@') {
            for line in read_allowlist(&root.join(list.trim()))? {
                if let Some(rel) = normalize_entry(&root, &line) {
                    collected.insert(rel);
                }
            }
            continue;
        }
        if let Some(rel) = normalize_entry(&root, entry) {
            collected.insert(rel);
        }
    }
    Ok(collected.into_iter().collect())
}

fn read_allowlist(path: &Path) -> Result<Vec<String>> {
    if !path.is_file() {
        tracing::info!(allowlist = %path.display(), "ancillary allowlist not found");
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading ancillary allowlist {}", path.display()))?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.trim_start_matches('@').trim().to_string())
        .collect())
}

fn normalize_entry(root: &Path, entry: &str) -> Option<String> {
    let candidate = Path::new(entry);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };
    let Ok(resolved) = joined.canonicalize() else {
        tracing::info!(entry, "ancillary path not found");
        return None;
    };
    if resolved.is_dir() {
        tracing::info!(entry, "ignoring ancillary directory (no auto-expansion)");
        return None;
    }
    let Ok(rel) = resolved.strip_prefix(root) else {
        tracing::info!(entry, "skipping ancillary outside package dir");
        return None;
    };
    Some(to_posix_rel(rel))
}

/// Renders a relative path with forward slashes regardless of platform.
pub fn to_posix_rel(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Joins a posix relative path back onto a base directory.
pub(crate) fn join_posix(base: &Path, rel: &str) -> PathBuf {
    rel.split('/')
        .filter(|part| !part.is_empty())
        .fold(base.to_path_buf(), |acc, part| acc.join(part))
}
