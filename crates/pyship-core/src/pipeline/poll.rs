use std::time::Duration;

use pyship_domain::{IndexSnapshot, PublishRequest};

use crate::cancel::CancelToken;
use crate::effects::Effects;
use crate::error::{PublishError, Stage};

/// Budget for confirming an uploaded release on the index.
#[derive(Debug, Clone, PartialEq)]
pub struct PollOptions {
    pub max_attempts: u32,
    pub interval: Duration,
    /// Wall-clock budget across all attempts; `None` means attempts only.
    pub timeout: Option<Duration>,
    pub initial_delay: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            max_attempts: 24,
            interval: Duration::from_secs(5),
            timeout: Some(Duration::from_secs(120)),
            initial_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Availability {
    pub(crate) attempts: u32,
    pub(crate) waited: Duration,
}

/// Re-queries the index until `request`'s version is listed.
pub(crate) fn wait_for_release(
    effects: &dyn Effects,
    request: &PublishRequest,
    options: &PollOptions,
    cancel: &CancelToken,
) -> Result<Availability, PublishError> {
    let clock = effects.clock();
    let sink = effects.diagnostics();
    let cancelled = || PublishError::Cancelled {
        stage: Stage::Availability,
    };
    let started = clock.now();
    if !options.initial_delay.is_zero() && clock.sleep(options.initial_delay, cancel) {
        return Err(cancelled());
    }

    let max_attempts = options.max_attempts.max(1);
    let mut attempts = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        attempts += 1;
        let snapshot =
            IndexSnapshot::from_query(effects.index().fetch_versions(&request.name));
        match &snapshot {
            IndexSnapshot::Found(_) if snapshot.contains(&request.version) => {
                let waited = clock.now().saturating_duration_since(started);
                tracing::info!(
                    package = %request.name,
                    version = %request.version,
                    attempt = attempts,
                    "release visible on index"
                );
                return Ok(Availability { attempts, waited });
            }
            IndexSnapshot::QueryFailed(reason) => {
                sink.warn(&format!(
                    "availability check {attempts}/{max_attempts} failed: {reason}"
                ));
            }
            IndexSnapshot::Found(_) | IndexSnapshot::NotFound => {
                sink.debug(&format!(
                    "{} not visible yet (check {attempts}/{max_attempts})",
                    request.release_label()
                ));
            }
        }

        if attempts >= max_attempts {
            break;
        }
        let elapsed = clock.now().saturating_duration_since(started);
        let pause = match options.timeout {
            Some(budget) if elapsed >= budget => break,
            Some(budget) => options.interval.min(budget - elapsed),
            None => options.interval,
        };
        if clock.sleep(pause, cancel) {
            return Err(cancelled());
        }
    }

    Err(PublishError::AvailabilityTimeout {
        package: request.name.clone(),
        version: request.version.clone(),
        attempts,
        waited: clock.now().saturating_duration_since(started),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeEffects, IndexReply};

    fn request() -> PublishRequest {
        PublishRequest::new("demo", "1.2.0", "/src/demo/demo.py")
    }

    fn options(max_attempts: u32) -> PollOptions {
        PollOptions {
            max_attempts,
            interval: Duration::from_secs(5),
            timeout: None,
            initial_delay: Duration::ZERO,
        }
    }

    #[test]
    fn succeeds_on_the_nth_query() -> anyhow::Result<()> {
        let effects = FakeEffects::new();
        effects.index.push(IndexReply::Missing);
        effects.index.push(IndexReply::Versions(vec!["1.1.0"]));
        effects.index.push(IndexReply::Versions(vec!["1.1.0", "1.2.0"]));

        let availability = wait_for_release(&effects, &request(), &options(5), &CancelToken::new())?;
        assert_eq!(availability.attempts, 3);
        assert_eq!(availability.waited, Duration::from_secs(10));
        assert_eq!(effects.index.calls(), 3);
        assert_eq!(effects.clock.sleeps(), vec![Duration::from_secs(5); 2]);
        Ok(())
    }

    #[test]
    fn gives_up_after_exactly_max_attempts() {
        let effects = FakeEffects::new();
        let err = wait_for_release(&effects, &request(), &options(4), &CancelToken::new())
            .expect_err("should time out");
        assert_eq!(effects.index.calls(), 4);
        assert_eq!(effects.clock.sleeps().len(), 3);
        assert!(matches!(
            err,
            PublishError::AvailabilityTimeout { attempts: 4, .. }
        ));
    }

    #[test]
    fn failed_queries_count_as_attempts() {
        let effects = FakeEffects::new();
        effects.index.push(IndexReply::Fail(503));
        effects.index.push(IndexReply::Fail(503));
        let err = wait_for_release(&effects, &request(), &options(2), &CancelToken::new())
            .expect_err("should time out");
        assert!(matches!(
            err,
            PublishError::AvailabilityTimeout { attempts: 2, .. }
        ));
        assert!(effects.sink.contains("availability check 1/2 failed"));
    }

    #[test]
    fn wall_clock_budget_bounds_the_wait() {
        let effects = FakeEffects::new();
        let opts = PollOptions {
            max_attempts: 100,
            interval: Duration::from_secs(4),
            timeout: Some(Duration::from_secs(10)),
            initial_delay: Duration::from_secs(1),
        };
        let err = wait_for_release(&effects, &request(), &opts, &CancelToken::new())
            .expect_err("should time out");
        // 1s delay, then checks at 1s, 5s, 9s and a final one at the 10s deadline
        assert_eq!(effects.index.calls(), 4);
        match err {
            PublishError::AvailabilityTimeout { waited, .. } => {
                assert_eq!(waited, Duration::from_secs(10));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn cancellation_interrupts_the_wait() {
        let effects = FakeEffects::new();
        let cancel = CancelToken::new();
        effects.clock.cancel_on_sleep(&cancel);
        let err = wait_for_release(&effects, &request(), &options(10), &cancel)
            .expect_err("should be cancelled");
        assert!(matches!(
            err,
            PublishError::Cancelled {
                stage: Stage::Availability
            }
        ));
        assert_eq!(effects.index.calls(), 1);
    }
}
