use std::path::{Path, PathBuf};
use std::str::FromStr;

use pep440_rs::Version;
use pep508_rs::Requirement as PepRequirement;
use serde::{Deserialize, Serialize};

/// One release intent: a single distribution at a single version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublishRequest {
    pub name: String,
    pub version: String,
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
    pub main_file: PathBuf,
    /// Paths relative to the directory holding `main_file`.
    #[serde(default)]
    pub ancillary: Vec<PathBuf>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("`{0}` is not a valid distribution name")]
    InvalidName(String),
    #[error("`{version}` is not a valid version: {reason}")]
    InvalidVersion { version: String, reason: String },
    #[error("dependency `{spec}` is not a valid requirement: {reason}")]
    InvalidDependency { spec: String, reason: String },
    #[error("main file {0} must be a Python source file")]
    InvalidMainFile(String),
}

impl PublishRequest {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        main_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            author: None,
            email: None,
            description: None,
            license_text: None,
            dependencies: Vec::new(),
            main_file: main_file.into(),
            ancillary: Vec::new(),
        }
    }

    /// Directory the main file lives in; ancillary paths are relative to it.
    pub fn package_dir(&self) -> &Path {
        match self.main_file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    pub fn import_name(&self) -> String {
        normalize_import_name(&self.name)
    }

    pub fn release_label(&self) -> String {
        format!("{}=={}", self.name, self.version)
    }

    pub fn parsed_version(&self) -> Result<Version, RequestError> {
        Version::from_str(self.version.trim()).map_err(|err| RequestError::InvalidVersion {
            version: self.version.clone(),
            reason: err.to_string(),
        })
    }

    /// Checks the request before any filesystem or network work happens.
    pub fn validate(&self) -> Result<(), RequestError> {
        if !is_valid_distribution_name(&self.name) {
            return Err(RequestError::InvalidName(self.name.clone()));
        }
        self.parsed_version()?;
        for spec in &self.dependencies {
            PepRequirement::from_str(spec.trim()).map_err(|err| {
                RequestError::InvalidDependency {
                    spec: spec.clone(),
                    reason: err.to_string(),
                }
            })?;
        }
        let is_python = self
            .main_file
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("py"));
        if !is_python {
            return Err(RequestError::InvalidMainFile(
                self.main_file.display().to_string(),
            ));
        }
        Ok(())
    }
}

fn is_valid_distribution_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
        return false;
    };
    first.is_ascii_alphanumeric()
        && last.is_ascii_alphanumeric()
        && bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

/// Module name the staged package is importable as.
pub fn normalize_import_name(name: &str) -> String {
    name.trim().replace(['-', '.'], "_")
}

/// Spellings the index may know the distribution under, in lookup order.
pub fn name_candidates(name: &str) -> Vec<String> {
    let mut candidates = vec![name.to_string()];
    let dashed = name.replace('_', "-");
    if dashed != name {
        candidates.push(dashed);
    }
    candidates
}
