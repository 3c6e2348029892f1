use std::collections::BTreeSet;
use std::fmt::Display;
use std::str::FromStr;

use pep440_rs::Version;

/// What the index reported for a distribution name at one point in time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexSnapshot {
    NotFound,
    Found(BTreeSet<String>),
    QueryFailed(String),
}

impl IndexSnapshot {
    pub fn from_query<E: Display>(result: Result<Option<BTreeSet<String>>, E>) -> Self {
        match result {
            Ok(Some(versions)) => Self::Found(versions),
            Ok(None) => Self::NotFound,
            Err(err) => Self::QueryFailed(err.to_string()),
        }
    }

    pub fn contains(&self, version: &str) -> bool {
        match self {
            Self::Found(versions) => versions_contain(versions, version),
            Self::NotFound | Self::QueryFailed(_) => false,
        }
    }
}

/// Membership under PEP 440 equality, so `1.2` matches a published `1.2.0`.
///
/// Keys that do not parse (legacy releases) only match byte-for-byte.
pub fn versions_contain(versions: &BTreeSet<String>, wanted: &str) -> bool {
    let wanted = wanted.trim();
    if versions.contains(wanted) {
        return true;
    }
    let Ok(target) = Version::from_str(wanted) else {
        return false;
    };
    versions
        .iter()
        .filter_map(|raw| Version::from_str(raw.trim()).ok())
        .any(|candidate| candidate == target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn membership_uses_normalized_versions() {
        let versions = set(&["1.0", "1.2.0", "2.0rc1"]);
        assert!(versions_contain(&versions, "1.2.0"));
        assert!(versions_contain(&versions, "1.2"));
        assert!(versions_contain(&versions, "2.0.0rc1"));
        assert!(!versions_contain(&versions, "1.3.0"));
    }

    #[test]
    fn unparseable_keys_match_exactly() {
        let versions = set(&["2004d"]);
        assert!(versions_contain(&versions, "2004d"));
        assert!(!versions_contain(&versions, "2004"));
    }

    #[test]
    fn snapshot_from_query_distinguishes_outcomes() {
        let found = IndexSnapshot::from_query::<String>(Ok(Some(set(&["1.2.0"]))));
        assert!(found.contains("1.2.0"));

        let missing = IndexSnapshot::from_query::<String>(Ok(None));
        assert_eq!(missing, IndexSnapshot::NotFound);
        assert!(!missing.contains("1.2.0"));

        let failed = IndexSnapshot::from_query(Err("connection reset"));
        assert_eq!(
            failed,
            IndexSnapshot::QueryFailed("connection reset".to_string())
        );
    }
}
