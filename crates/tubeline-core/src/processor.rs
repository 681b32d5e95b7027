//! Item processor: one external call per work item, classified and retried

use crate::checkpoint::ProcessedRecord;
use crate::error::{Fatal, ItemError};
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::work::{Fields, WorkItem};

/// Stage-specific call logic plugged into the batch runner.
pub trait ItemProcessor {
    type Payload;

    /// Stage columns written after `id,status,reason`, in order.
    fn columns(&self) -> &'static [&'static str];

    /// Key fields copied from the work item onto every row, whatever the status.
    fn key_fields(&self, _item: &WorkItem<Self::Payload>) -> Fields {
        Fields::new()
    }

    /// Perform one attempt for `item`.
    ///
    /// The lane has already been gated for the first request of the attempt.
    /// Implementations that issue follow-up requests (pagination, a second
    /// fetch) must call `lane.wait_if_needed()` before each of them.
    fn call(
        &mut self,
        item: &WorkItem<Self::Payload>,
        lane: &mut RateLimiter,
    ) -> Result<Fields, ItemError>;
}

/// Run `processor` for one item: gate → call → classify, retrying transient
/// failures with backoff.
///
/// Returns a record for every non-fatal outcome; a fatal condition is
/// returned as `Err` and nothing is recorded for the item.
pub fn process_item<P: ItemProcessor>(
    processor: &mut P,
    item: &WorkItem<P::Payload>,
    lane: &mut RateLimiter,
    retry: &RetryPolicy,
) -> Result<ProcessedRecord, Fatal> {
    let mut attempt = 1u32;
    loop {
        lane.wait_if_needed();
        let outcome = processor.call(item, lane);

        let mut fields = processor.key_fields(item);
        match outcome {
            Ok(values) => {
                fields.extend(values);
                return Ok(ProcessedRecord::ok(&item.id, fields));
            }
            Err(ItemError::Absent(reason)) => {
                log::debug!("{}: skipped: {reason}", item.id);
                return Ok(ProcessedRecord::skipped(&item.id, fields, reason));
            }
            Err(ItemError::Permanent(reason)) => {
                log::warn!("{}: rejected: {reason}", item.id);
                return Ok(ProcessedRecord::failed(&item.id, fields, reason));
            }
            Err(ItemError::Fatal(reason)) => {
                return Err(Fatal {
                    item_id: item.id.clone(),
                    reason,
                });
            }
            Err(ItemError::Transient(reason)) if attempt < retry.max_attempts => {
                let delay = retry.backoff(attempt);
                log::debug!(
                    "{}: attempt {attempt}/{} failed: {reason}, retrying in {delay:?}",
                    item.id,
                    retry.max_attempts
                );
                lane.clock().sleep(delay);
                attempt += 1;
            }
            Err(ItemError::Transient(reason)) => {
                log::warn!("{}: failed after {attempt} attempts: {reason}", item.id);
                return Ok(ProcessedRecord::failed(
                    &item.id,
                    fields,
                    format!("{reason} (after {attempt} attempts)"),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::checkpoint::Status;
    use crate::rate_limit::ManualClock;

    /// Replays scripted outcomes, one per call
    struct Scripted {
        outcomes: VecDeque<Result<Fields, ItemError>>,
        calls: usize,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<Fields, ItemError>>) -> Self {
            Self {
                outcomes: outcomes.into(),
                calls: 0,
            }
        }
    }

    impl ItemProcessor for Scripted {
        type Payload = &'static str;

        fn columns(&self) -> &'static [&'static str] {
            &["source", "value"]
        }

        fn key_fields(&self, item: &WorkItem<&'static str>) -> Fields {
            Fields::from([("source".to_string(), item.payload.to_string())])
        }

        fn call(
            &mut self,
            _: &WorkItem<&'static str>,
            _: &mut RateLimiter,
        ) -> Result<Fields, ItemError> {
            self.calls += 1;
            self.outcomes
                .pop_front()
                .unwrap_or_else(|| Err(ItemError::Fatal("script exhausted".into())))
        }
    }

    fn value(v: &str) -> Result<Fields, ItemError> {
        Ok(Fields::from([("value".to_string(), v.to_string())]))
    }

    fn lane() -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (RateLimiter::with_clock(Duration::from_secs(1), clock.clone()), clock)
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(2))
    }

    #[test]
    fn success_merges_key_fields() {
        let mut p = Scripted::new(vec![value("42")]);
        let (mut lane, _) = lane();
        let item = WorkItem::new("v1", "search");
        let rec = process_item(&mut p, &item, &mut lane, &policy()).unwrap();
        assert_eq!(rec.status, Status::Ok);
        assert_eq!(rec.fields["value"], "42");
        assert_eq!(rec.fields["source"], "search");
    }

    #[test]
    fn absent_is_skipped_without_retry() {
        let mut p = Scripted::new(vec![Err(ItemError::Absent("commentsDisabled".into()))]);
        let (mut lane, _) = lane();
        let rec = process_item(&mut p, &WorkItem::new("v1", "s"), &mut lane, &policy()).unwrap();
        assert_eq!(rec.status, Status::Skipped("commentsDisabled".into()));
        assert_eq!(rec.fields["source"], "s");
        assert_eq!(p.calls, 1);
    }

    #[test]
    fn transient_then_success() {
        let mut p = Scripted::new(vec![Err(ItemError::Transient("503".into())), value("ok")]);
        let (mut lane, clock) = lane();
        let rec = process_item(&mut p, &WorkItem::new("v1", "s"), &mut lane, &policy()).unwrap();
        assert_eq!(rec.status, Status::Ok);
        assert_eq!(p.calls, 2);
        // backoff 2s already exceeds the 1s interval, so the gate adds nothing
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(2)]);
    }

    #[test]
    fn transient_exhaustion_records_failure() {
        let mut p = Scripted::new(vec![
            Err(ItemError::Transient("timeout".into())),
            Err(ItemError::Transient("timeout".into())),
            Err(ItemError::Transient("timeout".into())),
        ]);
        let (mut lane, clock) = lane();
        let rec = process_item(&mut p, &WorkItem::new("v1", "s"), &mut lane, &policy()).unwrap();
        assert_eq!(
            rec.status,
            Status::Failed("timeout (after 3 attempts)".into())
        );
        assert_eq!(p.calls, 3);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[test]
    fn permanent_fails_immediately() {
        let mut p = Scripted::new(vec![Err(ItemError::Permanent("400 bad request".into()))]);
        let (mut lane, _) = lane();
        let rec = process_item(&mut p, &WorkItem::new("v1", "s"), &mut lane, &policy()).unwrap();
        assert!(matches!(rec.status, Status::Failed(_)));
        assert_eq!(p.calls, 1);
    }

    #[test]
    fn fatal_is_not_recorded() {
        let mut p = Scripted::new(vec![Err(ItemError::Fatal("quotaExceeded".into()))]);
        let (mut lane, _) = lane();
        let err =
            process_item(&mut p, &WorkItem::new("v9", "s"), &mut lane, &policy()).unwrap_err();
        assert_eq!(err.item_id, "v9");
        assert_eq!(err.reason, "quotaExceeded");
    }

    #[test]
    fn retries_respect_gate_with_short_backoff() {
        let mut p = Scripted::new(vec![Err(ItemError::Transient("429".into())), value("ok")]);
        let (mut lane, clock) = lane();
        let quick = RetryPolicy::new(3, Duration::from_millis(100));
        process_item(&mut p, &WorkItem::new("v1", "s"), &mut lane, &quick).unwrap();
        // 100ms backoff, then the gate tops the gap up to the 1s interval
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(100), Duration::from_millis(900)]
        );
    }
}
