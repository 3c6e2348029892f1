#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod ancillary;
pub mod batch;
pub mod index;
pub mod record;
pub mod request;

pub use ancillary::{resolve_ancillary, to_posix_rel};
pub use batch::{
    locate_main_file, BatchEntry, BatchEntryReport, BatchReport, BatchRequest, BatchStatus,
    EntryOptions, EntryStatus,
};
pub use index::{versions_contain, IndexSnapshot};
pub use record::{
    ArtifactKind, ArtifactRecord, AvailabilityStatus, ErrorRecord, ManifestRecord,
    PublishOutcome, SummaryDocument,
};
pub use request::{name_candidates, normalize_import_name, PublishRequest, RequestError};
