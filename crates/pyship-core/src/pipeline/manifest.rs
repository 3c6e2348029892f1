use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs4::FileExt;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use pyship_domain::{ManifestRecord, SummaryDocument};

/// The JSON document shared by every run, guarded by a sidecar lock file.
#[derive(Debug, Clone)]
pub struct SummaryStore {
    path: PathBuf,
}

impl SummaryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the store; a missing file is an empty document.
    ///
    /// # Errors
    /// Returns an error when the file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<SummaryDocument> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => SummaryDocument::from_json(&contents)
                .with_context(|| format!("parsing summary store {}", self.path.display())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(SummaryDocument::default()),
            Err(err) => {
                Err(err).with_context(|| format!("reading summary store {}", self.path.display()))
            }
        }
    }

    /// Merges `record` into the store under an exclusive lock.
    ///
    /// An unparseable store is moved aside to `<name>.corrupt-<unix-seconds>`
    /// and replaced with a fresh document.
    ///
    /// # Errors
    /// Returns an error when the lock, read or atomic replace fails.
    pub fn record(&self, record: ManifestRecord) -> Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        let lock = self.lock()?;

        let mut document = match self.load() {
            Ok(document) => document,
            Err(err) => {
                let backup = self.quarantine()?;
                tracing::warn!(
                    store = %self.path.display(),
                    backup = %backup.display(),
                    "summary store was unreadable ({err:#}); starting a new one"
                );
                SummaryDocument::default()
            }
        };
        document.upsert(record);

        let mut tmp = NamedTempFile::new_in(parent)
            .with_context(|| format!("creating temporary file in {}", parent.display()))?;
        serde_json::to_writer_pretty(&mut tmp, &document).context("encoding summary store")?;
        tmp.write_all(b"\n")?;
        if let Err(err) = tmp.as_file().sync_all() {
            tracing::warn!(store = %self.path.display(), error = %err, "could not sync summary store");
        }
        tmp.persist(&self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;

        lock.unlock()
            .with_context(|| format!("unlocking {}", self.lock_path().display()))?;
        Ok(())
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn lock(&self) -> Result<File> {
        let path = self.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("opening lock {}", path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("locking {}", path.display()))?;
        Ok(file)
    }

    fn quarantine(&self) -> Result<PathBuf> {
        let stamp = OffsetDateTime::now_utc().unix_timestamp();
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(format!(".corrupt-{stamp}"));
        let backup = self.path.with_file_name(name);
        fs::rename(&self.path, &backup)
            .with_context(|| format!("moving aside {}", self.path.display()))?;
        Ok(backup)
    }
}

/// RFC 3339 UTC timestamp for records and reports.
pub(crate) fn utc_timestamp(at: OffsetDateTime) -> String {
    at.format(&Rfc3339)
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}

/// Opaque, unique-per-run identifier.
pub(crate) fn new_run_id(package: &str, version: &str) -> String {
    let now = OffsetDateTime::now_utc();
    let mut hasher = Sha256::new();
    hasher.update(package.as_bytes());
    hasher.update(b"\0");
    hasher.update(version.as_bytes());
    hasher.update(b"\0");
    hasher.update(now.unix_timestamp_nanos().to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());
    hasher.update(NEXT_SEQUENCE.fetch_add(1, std::sync::atomic::Ordering::Relaxed).to_le_bytes());
    let mut id = hex::encode(hasher.finalize());
    id.truncate(32);
    id
}

static NEXT_SEQUENCE: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

#[cfg(test)]
mod tests {
    use super::*;
    use pyship_domain::{ArtifactKind, ArtifactRecord, AvailabilityStatus, PublishOutcome};
    use tempfile::tempdir;

    fn record(run_id: &str, outcome: PublishOutcome) -> ManifestRecord {
        ManifestRecord {
            run_id: run_id.into(),
            package: "demo".into(),
            version: "1.2.0".into(),
            outcome,
            availability: AvailabilityStatus::Confirmed,
            availability_seconds: Some(1.5),
            artifacts: vec![ArtifactRecord {
                path: "/tmp/demo-1.2.0.tar.gz".into(),
                kind: ArtifactKind::Sdist,
                bytes: 10,
                sha256: "ab".repeat(32),
            }],
            workspace: None,
            timestamp: utc_timestamp(OffsetDateTime::UNIX_EPOCH),
            error: None,
        }
    }

    #[test]
    fn records_accumulate_and_stay_parseable() -> Result<()> {
        let tmp = tempdir()?;
        let store = SummaryStore::new(tmp.path().join("nested/publish_manifest.json"));
        store.record(record("one", PublishOutcome::Published))?;
        store.record(record("two", PublishOutcome::Failed))?;

        let doc = store.load()?;
        assert_eq!(doc.records.len(), 2);
        assert_eq!(doc.records[1].outcome, PublishOutcome::Failed);
        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(store.path())?)?;
        assert_eq!(raw["records"][0]["timestamp"], "1970-01-01T00:00:00Z");
        assert!(tmp.path().join("nested/publish_manifest.json.lock").exists());
        Ok(())
    }

    #[test]
    fn bare_array_stores_are_upgraded() -> Result<()> {
        let tmp = tempdir()?;
        let path = tmp.path().join("summary.json");
        fs::write(&path, serde_json::to_string(&vec![record("old", PublishOutcome::Published)])?)?;
        let store = SummaryStore::new(&path);
        store.record(record("new", PublishOutcome::SkippedDuplicate))?;
        let doc = store.load()?;
        let ids: Vec<&str> = doc.records.iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(ids, vec!["old", "new"]);
        Ok(())
    }

    #[test]
    fn corrupt_store_is_moved_aside() -> Result<()> {
        let tmp = tempdir()?;
        let path = tmp.path().join("summary.json");
        fs::write(&path, "{not json")?;
        let store = SummaryStore::new(&path);
        assert!(store.load().is_err());
        store.record(record("fresh", PublishOutcome::Published))?;
        assert_eq!(store.load()?.records.len(), 1);
        let backups = fs::read_dir(tmp.path())?
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().contains(".corrupt-"))
            .count();
        assert_eq!(backups, 1);
        Ok(())
    }

    #[test]
    fn concurrent_writers_keep_every_record() -> Result<()> {
        let tmp = tempdir()?;
        let path = tmp.path().join("summary.json");
        let outcomes: Vec<Result<()>> = std::thread::scope(|scope| {
            let writers: Vec<_> = (0..16)
                .map(|n| {
                    let path = &path;
                    scope.spawn(move || {
                        SummaryStore::new(path)
                            .record(record(&format!("run-{n}"), PublishOutcome::Published))
                    })
                })
                .collect();
            writers
                .into_iter()
                .map(|writer| {
                    writer
                        .join()
                        .unwrap_or_else(|_| Err(anyhow::anyhow!("writer panicked")))
                })
                .collect()
        });
        for outcome in outcomes {
            outcome?;
        }
        let doc = SummaryStore::new(&path).load()?;
        let mut ids: Vec<&str> = doc.records.iter().map(|r| r.run_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 16);
        Ok(())
    }

    #[test]
    fn run_ids_are_unique() {
        let first = new_run_id("demo", "1.0");
        let second = new_run_id("demo", "1.0");
        assert_eq!(first.len(), 32);
        assert_ne!(first, second);
    }
}
