//! Bounded worker pool that drives an [`Extractor`] over one batch.
//!
//! The governor guarantees:
//!
//! - At most `concurrency` tasks are running at any instant
//! - Each task gets a freshly drawn [`ClientIdentity`] and its own [`Session`]
//! - After a task finishes, its slot stays idle for a delay drawn from
//!   [`Pacing`] before it picks up the next item
//! - A per-task timeout cancels only that task
//!
//! Results are plain values joined once per task; nothing is appended to
//! shared state from inside a task body.

use crate::error::TaskError;
use crate::extractors::{Extraction, Extractor};
use crate::identity::{ClientIdentity, Session};
use crate::models::{Batch, TaskOutcome, TaskResult, TaskState, WorkItem};
use crate::runner::BatchDriver;
use futures::stream::{self, StreamExt};
use rand::{Rng, rng};
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};

/// Uniform per-slot delay range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    min: Duration,
    max: Duration,
}

impl Pacing {
    /// `min` and `max` are swapped if given in the wrong order.
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    #[cfg(test)]
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn sample(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        rng().random_range(self.min..=self.max)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GovernorSettings {
    pub concurrency: usize,
    pub pacing: Pacing,
    pub task_timeout: Duration,
}

/// Runs one extractor under a concurrency bound.
#[derive(Debug)]
pub struct Governor<E> {
    settings: GovernorSettings,
    extractor: E,
}

impl<E: Extractor> Governor<E> {
    pub fn new(settings: GovernorSettings, extractor: E) -> Self {
        Self {
            settings: GovernorSettings {
                concurrency: settings.concurrency.max(1),
                ..settings
            },
            extractor,
        }
    }

    /// Run every item of `batch` to a terminal state.
    ///
    /// Returns results in item order.
    #[instrument(level = "info", skip_all, fields(batch = batch.id, size = batch.len()))]
    pub async fn run(&self, batch: &Batch) -> Vec<TaskResult> {
        let t0 = Instant::now();
        let mut results: Vec<TaskResult> = stream::iter(batch.items.iter())
            .map(|item| async move {
                let result = self.run_task(batch.id, item).await;

                // Hold the slot idle before it takes the next item.
                let delay = self.settings.pacing.sample();
                debug!(item = %item.id, ?delay, "Pacing slot");
                sleep(delay).await;

                result
            })
            .buffer_unordered(self.settings.concurrency)
            .collect()
            .await;

        results.sort_by_key(|r| r.index);
        debug!(elapsed_ms = t0.elapsed().as_millis() as u64, "Batch tasks terminal");
        results
    }

    async fn run_task(&self, batch_id: usize, item: &WorkItem) -> TaskResult {
        debug!(item = %item.id, state = %TaskState::Pending, "Task queued");
        let outcome = match self.execute(item).await {
            Ok(Extraction {
                record,
                field_errors,
            }) => {
                if !field_errors.is_empty() {
                    debug!(
                        item = %item.id,
                        degraded = field_errors.len(),
                        errors = ?field_errors,
                        "Some fields unavailable"
                    );
                }
                TaskOutcome::Succeeded {
                    record,
                    field_errors,
                }
            }
            Err(e) => {
                warn!(item = %item.id, batch = batch_id, error = %e, "Task failed");
                TaskOutcome::Failed(e)
            }
        };

        let result = TaskResult {
            index: item.index,
            item_id: item.id.clone(),
            batch_id,
            outcome,
        };
        info!(item = %item.id, state = %result.state(), "Task terminal");
        result
    }

    async fn execute(&self, item: &WorkItem) -> Result<Extraction, TaskError> {
        let identity = ClientIdentity::random();
        let session = Session::open(identity, self.settings.task_timeout)?;
        debug!(
            item = %item.id,
            state = %TaskState::Running,
            user_agent = session.identity.user_agent,
            "Task running"
        );

        match timeout(self.settings.task_timeout, self.extractor.extract(item, session)).await {
            Ok(res) => res,
            Err(_) => Err(TaskError::Timeout(self.settings.task_timeout)),
        }
    }
}

impl<E: Extractor> BatchDriver for Governor<E> {
    async fn process(&self, batch: &Batch) -> Vec<TaskResult> {
        self.run(batch).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{ExtractedRecord, Field, ItemPayload};
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn url_items(n: usize) -> Vec<WorkItem> {
        (0..n)
            .map(|i| {
                let raw = format!("https://example.com/facility/{i}");
                WorkItem {
                    index: i,
                    id: raw.clone(),
                    payload: ItemPayload::Url(url::Url::parse(&raw).unwrap()),
                }
            })
            .collect()
    }

    /// Instrumented extractor: tracks peak concurrency, fails or hangs on demand.
    #[derive(Default)]
    pub(crate) struct StubExtractor {
        pub active: AtomicUsize,
        pub peak: AtomicUsize,
        pub calls: AtomicUsize,
        pub work: Duration,
        pub fail: HashSet<usize>,
        pub hang: HashSet<usize>,
        pub agents: Mutex<Vec<&'static str>>,
    }

    impl Extractor for StubExtractor {
        async fn extract(&self, item: &WorkItem, session: Session) -> Result<Extraction, TaskError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.agents.lock().unwrap().push(session.identity.user_agent);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let work = if self.hang.contains(&item.index) {
                Duration::from_secs(3600)
            } else {
                self.work
            };
            sleep(work).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.fail.contains(&item.index) {
                return Err(TaskError::Navigation("connection reset".into()));
            }
            Ok(Extraction {
                record: ExtractedRecord {
                    name: Field::from(item.id.as_str()),
                    ..Default::default()
                },
                field_errors: vec![],
            })
        }
    }

    fn settings(concurrency: usize, pacing: Pacing) -> GovernorSettings {
        GovernorSettings {
            concurrency,
            pacing,
            task_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_peak_concurrency_never_exceeds_bound() {
        let stub = StubExtractor {
            work: Duration::from_millis(200),
            ..Default::default()
        };
        let governor = Governor::new(settings(3, Pacing::none()), stub);
        let batch = Batch {
            id: 1,
            items: url_items(10),
        };

        let results = governor.run(&batch).await;

        assert_eq!(results.len(), 10);
        assert_eq!(governor.extractor.peak.load(Ordering::SeqCst), 3);
        assert_eq!(governor.extractor.calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_in_item_order() {
        let stub = StubExtractor::default();
        let governor = Governor::new(settings(4, Pacing::none()), stub);
        let batch = Batch {
            id: 2,
            items: url_items(9),
        };

        let results = governor.run(&batch).await;
        let order: Vec<usize> = results.iter().map(|r| r.index).collect();
        assert_eq!(order, (0..9).collect::<Vec<_>>());
        assert!(results.iter().all(|r| r.batch_id == 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_isolated() {
        let stub = StubExtractor {
            fail: HashSet::from([1, 4]),
            ..Default::default()
        };
        let governor = Governor::new(settings(2, Pacing::none()), stub);
        let batch = Batch {
            id: 1,
            items: url_items(6),
        };

        let results = governor.run(&batch).await;
        let failed: Vec<usize> = results
            .iter()
            .filter(|r| r.state() == TaskState::Failed)
            .map(|r| r.index)
            .collect();
        assert_eq!(failed, vec![1, 4]);
        assert_eq!(results.iter().filter(|r| r.state() == TaskState::Succeeded).count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_only_that_task() {
        let stub = StubExtractor {
            work: Duration::from_millis(10),
            hang: HashSet::from([0]),
            ..Default::default()
        };
        let governor = Governor::new(
            GovernorSettings {
                concurrency: 2,
                pacing: Pacing::none(),
                task_timeout: Duration::from_secs(2),
            },
            stub,
        );
        let batch = Batch {
            id: 1,
            items: url_items(5),
        };

        let results = governor.run(&batch).await;

        assert!(matches!(
            results[0].outcome,
            TaskOutcome::Failed(TaskError::Timeout(_))
        ));
        assert!(results[1..].iter().all(|r| r.state() == TaskState::Succeeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_holds_slot() {
        let stub = StubExtractor::default();
        let pacing = Pacing::new(Duration::from_secs(1), Duration::from_secs(1));
        let governor = Governor::new(settings(1, pacing), stub);
        let batch = Batch {
            id: 1,
            items: url_items(3),
        };

        let t0 = tokio::time::Instant::now();
        governor.run(&batch).await;
        // one slot, three items, one second idle after each
        assert!(t0.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_task_gets_an_identity() {
        let stub = StubExtractor::default();
        let governor = Governor::new(settings(3, Pacing::none()), stub);
        let batch = Batch {
            id: 1,
            items: url_items(7),
        };
        governor.run(&batch).await;
        assert_eq!(governor.extractor.agents.lock().unwrap().len(), 7);
    }

    #[test]
    fn test_pacing_sample_in_range() {
        let p = Pacing::new(Duration::from_millis(300), Duration::from_millis(100));
        for _ in 0..100 {
            let d = p.sample();
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(300));
        }
        assert_eq!(Pacing::none().sample(), Duration::ZERO);
    }
}
