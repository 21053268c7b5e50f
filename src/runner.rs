//! Batch runner: partitions the frontier and checkpoints after every batch.
//!
//! Batches run strictly in order. For each batch the runner:
//!
//! 1. Hands the batch to a [`BatchDriver`] and waits until every task is terminal
//! 2. Appends the succeeded records to the [`RecordSink`]
//! 3. Appends the failures to the [`FailureSink`]
//! 4. Writes the [`CheckpointFile`]
//!
//! Only then does the next batch start, so an interruption loses at most
//! the one batch that was in flight.

use crate::checkpoint::{CheckpointFile, CheckpointState};
use crate::error::HarvestError;
use crate::frontier::Frontier;
use crate::models::{Batch, FailureRecord, TaskOutcome, TaskResult};
use crate::outputs::{FailureSink, RecordSink};
use serde::Serialize;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// Anything that can take a batch to terminal results.
pub trait BatchDriver {
    async fn process(&self, batch: &Batch) -> Vec<TaskResult>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub id: usize,
    pub size: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Counts for one run.
///
/// For a fresh run `succeeded + failed + invalid == total`. A resumed run
/// additionally reports the items it skipped as already checkpointed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub invalid: usize,
    /// Succeeded items where at least one field degraded.
    pub degraded: usize,
    pub skipped: usize,
    pub batches: Vec<BatchReport>,
}

#[derive(Debug)]
pub struct BatchRunner<R, F> {
    batch_size: usize,
    records: R,
    failures: F,
    checkpoint: Option<CheckpointFile>,
    resume: bool,
}

impl<R: RecordSink, F: FailureSink> BatchRunner<R, F> {
    pub fn new(batch_size: usize, records: R, failures: F) -> Self {
        Self {
            batch_size: batch_size.max(1),
            records,
            failures,
            checkpoint: None,
            resume: false,
        }
    }

    /// Persist progress to `checkpoint`; with `resume`, continue from it.
    pub fn with_checkpoint(mut self, checkpoint: CheckpointFile, resume: bool) -> Self {
        self.checkpoint = Some(checkpoint);
        self.resume = resume;
        self
    }

    pub fn into_sinks(self) -> (R, F) {
        (self.records, self.failures)
    }

    #[instrument(level = "info", skip_all, fields(batch_size = self.batch_size, total = frontier.len()))]
    pub async fn run<D: BatchDriver>(
        &mut self,
        frontier: &Frontier,
        driver: &D,
    ) -> Result<RunSummary, HarvestError> {
        let t0 = Instant::now();
        let admission = frontier.admit();
        let mut state = self.initial_state()?;

        let mut summary = RunSummary {
            total: frontier.len(),
            invalid: admission.rejected.len(),
            ..Default::default()
        };

        if state.invalid_recorded == 0 && !admission.rejected.is_empty() {
            self.failures.append(&admission.rejected)?;
            state.invalid_recorded = admission.rejected.len();
            self.save(&state)?;
        }

        let skip = state.completed_items.min(admission.accepted.len());
        if skip > 0 {
            info!(skipped = skip, from_batch = state.completed_batches + 1, "Resuming from checkpoint");
        }
        summary.skipped = skip;

        let pending = &admission.accepted[skip..];
        let batch_count = pending.len().div_ceil(self.batch_size);
        info!(
            valid = admission.accepted.len(),
            invalid = summary.invalid,
            batches = batch_count,
            "Starting batches"
        );

        for chunk in pending.chunks(self.batch_size) {
            let batch = Batch {
                id: state.completed_batches + 1,
                items: chunk.to_vec(),
            };
            let results = driver.process(&batch).await;
            let report = self.checkpoint_batch(&batch, results, &mut state, &mut summary)?;
            summary.batches.push(report);
        }

        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            invalid = summary.invalid,
            degraded = summary.degraded,
            skipped = summary.skipped,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Run complete"
        );
        Ok(summary)
    }

    fn initial_state(&self) -> Result<CheckpointState, HarvestError> {
        match (&self.checkpoint, self.resume) {
            (Some(cp), true) => Ok(cp.load()?.unwrap_or_default()),
            (Some(cp), false) => {
                cp.clear()?;
                Ok(CheckpointState::default())
            }
            (None, _) => Ok(CheckpointState::default()),
        }
    }

    fn save(&self, state: &CheckpointState) -> Result<(), HarvestError> {
        match &self.checkpoint {
            Some(cp) => cp.save(state),
            None => Ok(()),
        }
    }

    /// Barrier: persist everything from `batch` before the next one starts.
    fn checkpoint_batch(
        &mut self,
        batch: &Batch,
        results: Vec<TaskResult>,
        state: &mut CheckpointState,
        summary: &mut RunSummary,
    ) -> Result<BatchReport, HarvestError> {
        if results.len() != batch.len() {
            warn!(
                batch = batch.id,
                expected = batch.len(),
                got = results.len(),
                "Driver returned an unexpected number of results"
            );
        }

        let mut records = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for r in results {
            match r.outcome {
                TaskOutcome::Succeeded {
                    record,
                    field_errors,
                } => {
                    if !field_errors.is_empty() {
                        summary.degraded += 1;
                    }
                    records.push(record);
                }
                TaskOutcome::Failed(e) => {
                    failures.push(FailureRecord::new(r.item_id, Some(batch.id), &e));
                }
            }
        }

        self.records.append(&records)?;
        self.failures.append(&failures)?;

        state.completed_batches = batch.id;
        state.completed_items += batch.len();
        self.save(state)?;

        summary.succeeded += records.len();
        summary.failed += failures.len();

        info!(
            batch = batch.id,
            size = batch.len(),
            succeeded = records.len(),
            failed = failures.len(),
            processed = state.completed_items,
            "Batch checkpointed"
        );

        Ok(BatchReport {
            id: batch.id,
            size: batch.len(),
            succeeded: records.len(),
            failed: failures.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::governor::tests::{StubExtractor, url_items};
    use crate::governor::{Governor, GovernorSettings, Pacing};
    use crate::models::{ExtractedRecord, Field};
    use crate::outputs::failures::CsvFailureSink;
    use crate::outputs::records::{Columns, CsvRecordSink};
    use std::cell::RefCell;
    use std::collections::HashSet;
    use std::rc::Rc;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Start(usize),
        End(usize),
        Checkpoint(usize),
    }

    type Log = Rc<RefCell<Vec<Event>>>;

    /// Driver that logs task start/end and returns failures for chosen items.
    struct LoggingDriver {
        log: Log,
        fail: HashSet<usize>,
    }

    impl BatchDriver for LoggingDriver {
        async fn process(&self, batch: &Batch) -> Vec<TaskResult> {
            let mut out = Vec::new();
            for item in &batch.items {
                self.log.borrow_mut().push(Event::Start(item.index));
                tokio::task::yield_now().await;
                self.log.borrow_mut().push(Event::End(item.index));
                let outcome = if self.fail.contains(&item.index) {
                    TaskOutcome::Failed(TaskError::Navigation("refused".into()))
                } else {
                    TaskOutcome::Succeeded {
                        record: ExtractedRecord {
                            name: Field::from(item.id.as_str()),
                            ..Default::default()
                        },
                        field_errors: vec![],
                    }
                };
                out.push(TaskResult {
                    index: item.index,
                    item_id: item.id.clone(),
                    batch_id: batch.id,
                    outcome,
                });
            }
            out
        }
    }

    #[derive(Default)]
    struct MemorySink {
        log: Option<Log>,
        records: Vec<ExtractedRecord>,
        failures: Vec<FailureRecord>,
        appends: usize,
    }

    impl RecordSink for MemorySink {
        fn append(&mut self, records: &[ExtractedRecord]) -> Result<(), HarvestError> {
            self.appends += 1;
            if let Some(log) = &self.log {
                log.borrow_mut().push(Event::Checkpoint(self.appends));
            }
            self.records.extend_from_slice(records);
            Ok(())
        }
    }

    impl FailureSink for MemorySink {
        fn append(&mut self, failures: &[FailureRecord]) -> Result<(), HarvestError> {
            self.failures.extend_from_slice(failures);
            Ok(())
        }
    }

    fn urls(n: usize) -> Vec<String> {
        url_items(n).into_iter().map(|w| w.id).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_47_items_make_batches_of_20_20_7() {
        let frontier = Frontier::from_urls(urls(47));
        let governor = Governor::new(
            GovernorSettings {
                concurrency: 3,
                pacing: Pacing::none(),
                task_timeout: Duration::from_secs(5),
            },
            StubExtractor {
                work: Duration::from_millis(50),
                ..Default::default()
            },
        );
        let mut runner = BatchRunner::new(20, MemorySink::default(), MemorySink::default());

        let summary = runner.run(&frontier, &governor).await.unwrap();

        let sizes: Vec<usize> = summary.batches.iter().map(|b| b.size).collect();
        assert_eq!(sizes, vec![20, 20, 7]);
        let ids: Vec<usize> = summary.batches.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(summary.succeeded, 47);

        let (records, _) = runner.into_sinks();
        assert_eq!(records.appends, 3);
        assert_eq!(records.records.len(), 47);
    }

    #[tokio::test]
    async fn test_counts_are_conserved() {
        let mut raw = urls(25);
        raw.insert(3, "not-a-url".into());
        raw.push("ftp://example.com/file".into());
        let frontier = Frontier::from_urls(raw);
        let driver = LoggingDriver {
            log: Log::default(),
            fail: HashSet::from([0, 10, 20]),
        };
        let mut runner = BatchRunner::new(10, MemorySink::default(), MemorySink::default());

        let summary = runner.run(&frontier, &driver).await.unwrap();

        assert_eq!(summary.total, 27);
        assert_eq!(summary.invalid, 2);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.succeeded + summary.failed + summary.invalid, summary.total);

        let (_, failures) = runner.into_sinks();
        assert_eq!(failures.failures.len(), 5);
        assert!(failures.failures[..2].iter().all(|f| f.reason == "invalid-input"));
        assert!(failures.failures[2..].iter().all(|f| f.batch_id.is_some()));
    }

    #[tokio::test]
    async fn test_invalid_item_never_reaches_driver() {
        let frontier = Frontier::from_urls(["not-a-url"]);
        let log = Log::default();
        let driver = LoggingDriver {
            log: log.clone(),
            fail: HashSet::new(),
        };
        let mut runner = BatchRunner::new(5, MemorySink::default(), MemorySink::default());

        let summary = runner.run(&frontier, &driver).await.unwrap();

        assert!(log.borrow().is_empty());
        assert!(summary.batches.is_empty());
        assert_eq!(summary.invalid, 1);
    }

    #[tokio::test]
    async fn test_batches_are_strictly_ordered() {
        let frontier = Frontier::from_urls(urls(12));
        let log = Log::default();
        let driver = LoggingDriver {
            log: log.clone(),
            fail: HashSet::new(),
        };
        let records = MemorySink {
            log: Some(log.clone()),
            ..Default::default()
        };
        let mut runner = BatchRunner::new(5, records, MemorySink::default());
        runner.run(&frontier, &driver).await.unwrap();

        let events = log.borrow().clone();
        let batch_of = |i: usize| i / 5 + 1;
        for (pos, event) in events.iter().enumerate() {
            if let Event::Start(i) = event {
                let k = batch_of(*i);
                if k == 1 {
                    continue;
                }
                // the previous batch has been checkpointed before this start
                assert!(events[..pos].contains(&Event::Checkpoint(k - 1)), "{events:?}");
                // and every task of earlier batches has ended
                for j in 0..(k - 1) * 5 {
                    assert!(events[..pos].contains(&Event::End(j)));
                }
            }
        }
    }

    #[tokio::test]
    async fn test_resume_skips_checkpointed_batches() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.csv");
        let failed = dir.path().join("failed.csv");
        let cp = CheckpointFile::beside(&out);

        cp.save(&CheckpointState {
            completed_batches: 2,
            completed_items: 10,
            invalid_recorded: 1,
            updated_at: None,
        })
        .unwrap();

        let mut raw = urls(13);
        raw.insert(0, "not-a-url".into());
        let frontier = Frontier::from_urls(raw);
        let log = Log::default();
        let driver = LoggingDriver {
            log: log.clone(),
            fail: HashSet::new(),
        };
        let records = CsvRecordSink::create(&out, Columns::Base, true).unwrap();
        let failures = CsvFailureSink::open(&failed).unwrap();
        let mut runner = BatchRunner::new(5, records, failures).with_checkpoint(cp.clone(), true);

        let summary = runner.run(&frontier, &driver).await.unwrap();

        assert_eq!(summary.skipped, 10);
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.batches.len(), 1);
        assert_eq!(summary.batches[0].id, 3);
        // invalid row was already recorded by the earlier run
        let (_, failures) = runner.into_sinks();
        assert_eq!(failures.written(), 0);

        let state = cp.load().unwrap().unwrap();
        assert_eq!(state.completed_batches, 3);
        assert_eq!(state.completed_items, 13);
    }

    #[tokio::test]
    async fn test_fresh_run_clears_old_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let cp = CheckpointFile::new(dir.path().join("cp.json"));
        cp.save(&CheckpointState {
            completed_batches: 9,
            completed_items: 90,
            invalid_recorded: 0,
            updated_at: None,
        })
        .unwrap();

        let frontier = Frontier::from_urls(urls(4));
        let driver = LoggingDriver {
            log: Log::default(),
            fail: HashSet::new(),
        };
        let mut runner = BatchRunner::new(3, MemorySink::default(), MemorySink::default())
            .with_checkpoint(cp.clone(), false);
        let summary = runner.run(&frontier, &driver).await.unwrap();

        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.succeeded, 4);
        assert_eq!(cp.load().unwrap().unwrap().completed_batches, 2);
    }
}
