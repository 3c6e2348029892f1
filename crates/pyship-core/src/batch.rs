use time::OffsetDateTime;

use pyship_domain::{
    AvailabilityStatus, BatchEntry, BatchEntryReport, BatchReport, BatchRequest, BatchStatus,
    EntryStatus, ErrorRecord, ManifestRecord, PublishOutcome,
};

use crate::cancel::CancelToken;
use crate::credentials::Credential;
use crate::effects::Effects;
use crate::error::PublishError;
use crate::outcome::CommandStatus;
use crate::pipeline::{
    new_run_id, publish, utc_timestamp, PublishOptions, PublishResult, SummaryStore,
};

/// Publishes every entry in order.
///
/// Expected outcomes (duplicates, bad entries, slow indexes) are reported and
/// the batch moves on; the first infrastructure failure or a cancellation
/// stops it and leaves the remaining entries pending.
pub fn run_batch(
    effects: &dyn Effects,
    options: &PublishOptions,
    credential: Option<&Credential>,
    batch: &BatchRequest,
    cancel: &CancelToken,
) -> BatchReport {
    let started_at = OffsetDateTime::now_utc();
    let started = effects.clock().now();
    let run_id = new_run_id("batch", &utc_timestamp(started_at));
    tracing::info!(run_id = %run_id, entries = batch.entries.len(), "starting batch");

    let mut entries = Vec::with_capacity(batch.entries.len());
    let mut halted = false;
    for entry in &batch.entries {
        if halted {
            entries.push(pending(entry));
            continue;
        }
        let mut report = pending(entry);
        let request = match entry.to_request(&batch.repo_parent_root) {
            Ok(request) => request,
            Err(err) => {
                effects
                    .diagnostics()
                    .warn(&format!("skipping {}: {err:#}", entry.package));
                report.status = EntryStatus::Error;
                report.detail = Some(format!("{err:#}"));
                report.run_id = Some(record_unresolved_entry(effects, options, entry, &report));
                entries.push(report);
                continue;
            }
        };
        report.main_file = Some(request.main_file.display().to_string());
        report.ancillary = request
            .ancillary
            .iter()
            .map(|path| path.display().to_string())
            .collect();

        let result = publish(effects, options, credential, &request, cancel);
        halted = stops_batch(&result);
        apply_result(&mut report, &result);
        entries.push(report);
    }

    let status = BatchReport::summarize(&entries);
    let completed_at = OffsetDateTime::now_utc();
    let duration = effects.clock().now().saturating_duration_since(started);
    tracing::info!(run_id = %run_id, status = ?status, "batch finished");
    BatchReport {
        run_id,
        started_at: utc_timestamp(started_at),
        completed_at: utc_timestamp(completed_at),
        duration_seconds: duration.as_secs_f64(),
        status,
        entries,
    }
}

/// Exit status for a finished batch report.
#[must_use]
pub fn batch_status(report: &BatchReport) -> CommandStatus {
    match report.status {
        BatchStatus::Completed => CommandStatus::Ok,
        BatchStatus::Running | BatchStatus::Attention => CommandStatus::UserError,
        BatchStatus::Error => {
            if report
                .entries
                .iter()
                .any(|entry| entry.status == EntryStatus::Pending)
            {
                CommandStatus::Failure
            } else {
                CommandStatus::UserError
            }
        }
    }
}

fn pending(entry: &BatchEntry) -> BatchEntryReport {
    BatchEntryReport {
        package: entry.package.clone(),
        distribution: entry.distribution().to_string(),
        version: entry.version.clone(),
        main_file: None,
        ancillary: Vec::new(),
        status: EntryStatus::Pending,
        run_id: None,
        detail: None,
        needs_attention: false,
    }
}

/// Writes a `failed` summary record for an entry that never became a request.
fn record_unresolved_entry(
    effects: &dyn Effects,
    options: &PublishOptions,
    entry: &BatchEntry,
    report: &BatchEntryReport,
) -> String {
    let run_id = new_run_id(entry.distribution(), &entry.version);
    let record = ManifestRecord {
        run_id: run_id.clone(),
        package: entry.distribution().to_string(),
        version: entry.version.clone(),
        outcome: PublishOutcome::Failed,
        availability: AvailabilityStatus::NotChecked,
        availability_seconds: None,
        artifacts: Vec::new(),
        workspace: None,
        timestamp: utc_timestamp(OffsetDateTime::now_utc()),
        error: Some(ErrorRecord {
            kind: "invalid_request".to_string(),
            message: report.detail.clone().unwrap_or_default(),
        }),
    };
    if let Err(err) = SummaryStore::new(&options.summary_path).record(record) {
        effects
            .diagnostics()
            .warn(&format!("summary record was not written: {err:#}"));
    }
    run_id
}

fn stops_batch(result: &PublishResult) -> bool {
    match &result.error {
        Some(PublishError::Cancelled { .. }) => true,
        Some(err) => err.severity() == CommandStatus::Failure,
        None => false,
    }
}

fn apply_result(report: &mut BatchEntryReport, result: &PublishResult) {
    report.run_id = Some(result.run_id.clone());
    report.status = match result.outcome {
        PublishOutcome::Published => EntryStatus::Published,
        PublishOutcome::SkippedDuplicate => EntryStatus::SkippedExisting,
        PublishOutcome::DryRun => EntryStatus::DryRun,
        PublishOutcome::Failed => EntryStatus::Error,
    };
    report.needs_attention = matches!(
        result.availability,
        AvailabilityStatus::TimedOut | AvailabilityStatus::Cancelled
    );
    report.detail = result.error.as_ref().map(ToString::to_string);
}
