use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use pyship_domain::{ArtifactKind, ArtifactRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltArtifact {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub bytes: u64,
    pub sha256: String,
}

impl BuiltArtifact {
    /// Describes a finished artifact from its on-disk bytes.
    pub(crate) fn inspect(path: &Path, kind: ArtifactKind) -> Result<Self> {
        let bytes = fs::metadata(path)
            .with_context(|| format!("reading metadata for {}", path.display()))?
            .len();
        Ok(Self {
            path: path.to_path_buf(),
            kind,
            bytes,
            sha256: compute_file_sha256(path)?,
        })
    }

    /// Snapshot for the summary store, re-hashing the file when it still
    /// exists.
    pub(crate) fn to_record(&self) -> ArtifactRecord {
        let (bytes, sha256) = match (fs::metadata(&self.path), compute_file_sha256(&self.path)) {
            (Ok(meta), Ok(digest)) => (meta.len(), digest),
            _ => (self.bytes, self.sha256.clone()),
        };
        ArtifactRecord {
            path: self.path.display().to_string(),
            kind: self.kind,
            bytes,
            sha256,
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// The wheel and sdist produced by one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSet {
    pub wheel: BuiltArtifact,
    pub sdist: BuiltArtifact,
}

impl ArtifactSet {
    pub fn iter(&self) -> impl Iterator<Item = &BuiltArtifact> {
        [&self.wheel, &self.sdist].into_iter()
    }

    pub(crate) fn records(&self) -> Vec<ArtifactRecord> {
        self.iter().map(BuiltArtifact::to_record).collect()
    }
}

pub(crate) fn compute_file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).with_context(|| format!("hashing {}", path.display()))?;
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sha256_matches_known_digest() -> Result<()> {
        let tmp = tempdir()?;
        let path = tmp.path().join("demo-1.0.tar.gz");
        fs::write(&path, b"abc")?;
        assert_eq!(
            compute_file_sha256(&path)?,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        Ok(())
    }

    #[test]
    fn record_falls_back_to_build_time_digest() -> Result<()> {
        let tmp = tempdir()?;
        let path = tmp.path().join("demo-1.0-py3-none-any.whl");
        fs::write(&path, b"wheel bytes")?;
        let artifact = BuiltArtifact::inspect(&path, ArtifactKind::Wheel)?;
        assert_eq!(artifact.bytes, 11);

        let live = artifact.to_record();
        assert_eq!(live.sha256, artifact.sha256);

        fs::remove_file(&path)?;
        let gone = artifact.to_record();
        assert_eq!(gone.sha256, artifact.sha256);
        assert_eq!(gone.bytes, 11);
        Ok(())
    }
}
