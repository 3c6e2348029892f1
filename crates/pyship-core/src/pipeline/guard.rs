use pyship_domain::{IndexSnapshot, PublishRequest};

use crate::effects::Effects;
use crate::error::PublishError;

/// Refuses to continue when the index already lists the requested version.
///
/// Any query failure aborts the run.
pub fn ensure_unpublished(
    effects: &dyn Effects,
    request: &PublishRequest,
) -> Result<IndexSnapshot, PublishError> {
    let snapshot = match effects.index().fetch_versions(&request.name) {
        Ok(Some(versions)) => IndexSnapshot::Found(versions),
        Ok(None) => IndexSnapshot::NotFound,
        Err(source) => {
            return Err(PublishError::MetadataQuery {
                package: request.name.clone(),
                source,
            })
        }
    };
    match &snapshot {
        IndexSnapshot::Found(_) if snapshot.contains(&request.version) => {
            Err(PublishError::DuplicateVersion {
                package: request.name.clone(),
                version: request.version.clone(),
            })
        }
        IndexSnapshot::Found(versions) => {
            effects.diagnostics().info(&format!(
                "{} has {} published release(s); {} is new",
                request.name,
                versions.len(),
                request.version
            ));
            Ok(snapshot)
        }
        IndexSnapshot::NotFound => {
            effects.diagnostics().info(&format!(
                "{} is not on the index yet; first release",
                request.name
            ));
            Ok(snapshot)
        }
        IndexSnapshot::QueryFailed(_) => Ok(snapshot),
    }
}
