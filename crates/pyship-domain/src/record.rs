use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PublishOutcome {
    Published,
    SkippedDuplicate,
    Failed,
    DryRun,
}

impl PublishOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Published => "published",
            Self::SkippedDuplicate => "skipped-duplicate",
            Self::Failed => "failed",
            Self::DryRun => "dry-run",
        }
    }
}

impl fmt::Display for PublishOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the uploaded version was observed on the index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AvailabilityStatus {
    /// The run never reached the poller.
    #[default]
    NotChecked,
    /// Polling was disabled for this run.
    Skipped,
    Confirmed,
    TimedOut,
    Cancelled,
}

impl AvailabilityStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotChecked => "not-checked",
            Self::Skipped => "skipped",
            Self::Confirmed => "confirmed",
            Self::TimedOut => "timed-out",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Wheel,
    Sdist,
}

impl ArtifactKind {
    pub fn from_filename(filename: &str) -> Option<Self> {
        let lowered = filename.to_ascii_lowercase();
        if lowered.ends_with(".whl") {
            Some(Self::Wheel)
        } else if lowered.ends_with(".tar.gz") {
            Some(Self::Sdist)
        } else {
            None
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub path: String,
    pub kind: ArtifactKind,
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: String,
    pub message: String,
}

/// One run's entry in the summary store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ManifestRecord {
    pub run_id: String,
    pub package: String,
    pub version: String,
    pub outcome: PublishOutcome,
    #[serde(default)]
    pub availability: AvailabilityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_seconds: Option<f64>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
}

/// On-disk shape of the summary store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryDocument {
    #[serde(default)]
    pub records: Vec<ManifestRecord>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SummaryShape {
    Document(SummaryDocument),
    Bare(Vec<ManifestRecord>),
}

impl SummaryDocument {
    /// Parses either `{"records": [...]}` or a bare record array.
    pub fn from_json(contents: &str) -> serde_json::Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(match serde_json::from_str::<SummaryShape>(contents)? {
            SummaryShape::Document(doc) => doc,
            SummaryShape::Bare(records) => Self { records },
        })
    }

    /// Inserts the record, replacing any earlier record with the same run id.
    pub fn upsert(&mut self, record: ManifestRecord) {
        if let Some(existing) = self
            .records
            .iter_mut()
            .find(|entry| entry.run_id == record.run_id)
        {
            *existing = record;
        } else {
            self.records.push(record);
        }
    }

    pub fn for_package<'a>(&'a self, package: &'a str) -> impl Iterator<Item = &'a ManifestRecord> {
        self.records
            .iter()
            .filter(move |record| record.package == package)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(run_id: &str, outcome: PublishOutcome) -> ManifestRecord {
        ManifestRecord {
            run_id: run_id.to_string(),
            package: "demo".into(),
            version: "1.2.0".into(),
            outcome,
            availability: AvailabilityStatus::NotChecked,
            availability_seconds: None,
            artifacts: Vec::new(),
            workspace: None,
            timestamp: "2025-01-01T12:00:00Z".into(),
            error: None,
        }
    }

    #[test]
    fn outcome_serializes_kebab_case() -> serde_json::Result<()> {
        let value = serde_json::to_value(record("a", PublishOutcome::SkippedDuplicate))?;
        assert_eq!(value["outcome"], "skipped-duplicate");
        assert_eq!(value["availability"], "not-checked");
        assert!(value.get("error").is_none());
        Ok(())
    }

    #[test]
    fn upsert_replaces_by_run_id() {
        let mut doc = SummaryDocument::default();
        doc.upsert(record("a", PublishOutcome::Published));
        doc.upsert(record("b", PublishOutcome::Failed));
        doc.upsert(record("a", PublishOutcome::SkippedDuplicate));
        assert_eq!(doc.records.len(), 2);
        assert_eq!(doc.records[0].outcome, PublishOutcome::SkippedDuplicate);
    }

    #[test]
    fn from_json_accepts_bare_arrays_and_empty_files() -> serde_json::Result<()> {
        let bare = serde_json::to_string(&vec![record("a", PublishOutcome::Published)])?;
        assert_eq!(SummaryDocument::from_json(&bare)?.records.len(), 1);
        assert!(SummaryDocument::from_json("  \n")?.records.is_empty());
        assert!(SummaryDocument::from_json("{}")?.records.is_empty());
        Ok(())
    }

    #[test]
    fn artifact_kind_from_filename() {
        assert_eq!(
            ArtifactKind::from_filename("demo-1.2.0-py3-none-any.whl"),
            Some(ArtifactKind::Wheel)
        );
        assert_eq!(
            ArtifactKind::from_filename("demo-1.2.0.tar.gz"),
            Some(ArtifactKind::Sdist)
        );
        assert_eq!(ArtifactKind::from_filename("demo-1.2.0.zip"), None);
    }
}
