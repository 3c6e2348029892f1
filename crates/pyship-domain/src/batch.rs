use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::ancillary::{join_posix, resolve_ancillary};
use crate::request::PublishRequest;

/// A batch publish document: several packages living under one parent root.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchRequest {
    pub entries: Vec<BatchEntry>,
    pub repo_parent_root: PathBuf,
    #[serde(default)]
    pub token_env: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchEntry {
    pub package: String,
    pub version: String,
    #[serde(default)]
    pub ancillary: Vec<String>,
    #[serde(default)]
    pub options: EntryOptions,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntryOptions {
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub license_text: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Distribution name on the index when it differs from the directory name.
    #[serde(default)]
    pub pypi_name: Option<String>,
    #[serde(default)]
    pub ancillary_allowlist: Vec<String>,
}

impl BatchRequest {
    pub fn from_json(contents: &str) -> Result<Self> {
        let request: Self = serde_json::from_str(contents).context("parsing batch request")?;
        if request.entries.is_empty() {
            bail!("batch request must contain at least one entry");
        }
        Ok(request)
    }
}

impl BatchEntry {
    pub fn distribution(&self) -> &str {
        self.options.pypi_name.as_deref().unwrap_or(&self.package)
    }

    /// Locates the package under `repo_parent_root` and builds its request.
    pub fn to_request(&self, repo_parent_root: &Path) -> Result<PublishRequest> {
        let package_dir = repo_parent_root.join(&self.package);
        if !package_dir.is_dir() {
            bail!(
                "package directory not found for {:?} at {}",
                self.package,
                package_dir.display()
            );
        }
        let main_file = locate_main_file(&package_dir, &self.package)?;

        let mut wanted = self.ancillary.clone();
        wanted.extend(self.options.ancillary_allowlist.iter().map(|spec| {
            if spec.starts_with('@') {
                spec.clone()
            } else {
                format!("@{spec}")
            }
        }));
        let ancillary = resolve_ancillary(&package_dir, &wanted)?
            .into_iter()
            .map(|rel| join_posix(Path::new(""), &rel))
            .collect();

        Ok(PublishRequest {
            name: self.distribution().to_string(),
            version: self.version.clone(),
            author: self.options.author.clone(),
            email: self.options.email.clone(),
            description: self.options.description.clone(),
            license_text: self.options.license_text.clone(),
            dependencies: self.options.dependencies.clone(),
            main_file,
            ancillary,
        })
    }
}

/// Finds a package's main module: `<package>.py`, then `__init__.py`, then the
/// first `*.py` file in lexicographic order.
pub fn locate_main_file(package_dir: &Path, package: &str) -> Result<PathBuf> {
    for candidate in [format!("{package}.py"), "__init__.py".to_string()] {
        let path = package_dir.join(&candidate);
        if path.is_file() {
            return Ok(path);
        }
    }
    let mut modules = fs::read_dir(package_dir)
        .with_context(|| format!("listing {}", package_dir.display()))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext == "py")
        })
        .collect::<Vec<_>>();
    modules.sort();
    modules.into_iter().next().with_context(|| {
        format!(
            "could not locate a main module for package {package:?} in {}",
            package_dir.display()
        )
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Published,
    SkippedExisting,
    DryRun,
    Error,
}

impl EntryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Published => "published",
            Self::SkippedExisting => "skipped_existing",
            Self::DryRun => "dry_run",
            Self::Error => "error",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Running,
    Completed,
    Attention,
    Error,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Attention => "attention",
            Self::Error => "error",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchEntryReport {
    pub package: String,
    pub distribution: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_file: Option<String>,
    #[serde(default)]
    pub ancillary: Vec<String>,
    pub status: EntryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Set when the entry finished but something still needs a look, such as
    /// a release that never showed up on the index.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub needs_attention: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_id: String,
    pub started_at: String,
    pub completed_at: String,
    pub duration_seconds: f64,
    pub status: BatchStatus,
    pub entries: Vec<BatchEntryReport>,
}

impl BatchReport {
    /// Derives the overall status from the per-entry statuses.
    pub fn summarize(entries: &[BatchEntryReport]) -> BatchStatus {
        if entries.iter().any(|entry| entry.status == EntryStatus::Error) {
            BatchStatus::Error
        } else if entries
            .iter()
            .any(|entry| entry.status == EntryStatus::SkippedExisting || entry.needs_attention)
        {
            BatchStatus::Attention
        } else {
            BatchStatus::Completed
        }
    }
}
