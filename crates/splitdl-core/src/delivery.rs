//! Delivery loop - advances every queued job by one part per cycle
//!
//! Each cycle snapshots the registry, pulls one unit per job, hands parts to
//! the sink and then sleeps for whatever is left of the configured delay.
//! A cycle that overruns the delay is followed immediately by the next one.

use crate::error::SplitdlError;
use crate::registry::{Advance, Registry};
use async_trait::async_trait;
use futures::StreamExt;
use splitdl_types::CoreEvent;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Where parts and notices end up
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Hand `text`, and optionally a file, to `recipient`. The file may be
    /// deleted as soon as this returns.
    async fn deliver(
        &self,
        recipient: &str,
        text: &str,
        file: Option<&Path>,
    ) -> Result<(), SplitdlError>;
}

/// Tally of one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub delivered: usize,
    pub completed: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

impl CycleReport {
    /// Jobs advanced during the cycle
    pub fn advanced(&self) -> usize {
        self.delivered + self.completed + self.failed
    }
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Delivered,
    Completed,
    Failed,
}

/// Time left to sleep after a cycle that took `elapsed`
pub fn remaining_delay(delay: Duration, elapsed: Duration) -> Option<Duration> {
    delay.checked_sub(elapsed).filter(|d| !d.is_zero())
}

/// Runs delivery cycles over a shared registry
pub struct DeliveryLoop {
    registry: Arc<Registry>,
    sink: Arc<dyn DeliverySink>,
    delay: Duration,
    concurrency: usize,
    event_tx: Option<broadcast::Sender<CoreEvent>>,
}

impl DeliveryLoop {
    pub fn new(registry: Arc<Registry>, sink: Arc<dyn DeliverySink>, delay: Duration) -> Self {
        Self {
            registry,
            sink,
            delay,
            concurrency: 1,
            event_tx: None,
        }
    }

    /// Advance up to `concurrency` jobs at the same time within a cycle
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_events(mut self, event_tx: broadcast::Sender<CoreEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run cycles until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            "Delivery loop started (delay {:?}, concurrency {})",
            self.delay, self.concurrency
        );

        while !cancel.is_cancelled() {
            let report = self.run_cycle().await;

            match remaining_delay(self.delay, report.elapsed) {
                Some(wait) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                // an idle cycle may not have awaited anything
                None => tokio::task::yield_now().await,
            }
        }

        info!("Delivery loop stopped");
    }

    /// One pass over every job registered at the start of the pass
    pub async fn run_cycle(&self) -> CycleReport {
        let start = Instant::now();
        let keys = self.registry.keys();
        debug!("Processing downloads queue ({})", keys.len());

        let outcomes: Vec<Option<Outcome>> = futures::stream::iter(keys)
            .map(|key| async move { self.process(&key).await })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = CycleReport::default();
        for outcome in outcomes.into_iter().flatten() {
            match outcome {
                Outcome::Delivered => report.delivered += 1,
                Outcome::Completed => report.completed += 1,
                Outcome::Failed => report.failed += 1,
            }
        }
        report.elapsed = start.elapsed();

        self.emit(CoreEvent::CycleFinished {
            advanced: report.advanced(),
            elapsed_ms: report.elapsed.as_millis() as u64,
        });
        report
    }

    async fn process(&self, key: &str) -> Option<Outcome> {
        let advance = self.registry.advance(key).await?;

        let outcome = match advance {
            Advance::Delivered(part) => {
                self.send(key, &part.label(), Some(&part.path)).await;
                self.emit(CoreEvent::PartDelivered {
                    key: key.to_string(),
                    index: part.index,
                    total: part.total,
                    size: part.size,
                });
                Outcome::Delivered
            }
            Advance::Completed(last) => {
                self.send(key, &last.part.label(), Some(&last.part.path)).await;
                self.emit(CoreEvent::PartDelivered {
                    key: key.to_string(),
                    index: last.part.index,
                    total: last.part.total,
                    size: last.part.size,
                });
                self.emit(CoreEvent::JobCompleted {
                    key: key.to_string(),
                    parts: last.part.total,
                });
                last.close().await;
                Outcome::Completed
            }
            Advance::Failed(err) => {
                if let SplitdlError::SizeExceeded { limit, fetched } = &err {
                    warn!(
                        "Download for {} exceeded the size limit ({} > {} bytes)",
                        key, fetched, limit
                    );
                } else {
                    error!("Download for {} failed: {:?}", key, err);
                }
                self.send(key, &err.user_message(), None).await;
                self.emit(CoreEvent::JobFailed {
                    key: key.to_string(),
                    error: err.to_string(),
                });
                Outcome::Failed
            }
        };

        Some(outcome)
    }

    async fn send(&self, recipient: &str, text: &str, file: Option<&Path>) {
        if let Err(e) = self.sink.deliver(recipient, text, file).await {
            warn!("Failed to deliver \"{}\" to {}: {}", text, recipient, e);
        }
    }

    fn emit(&self, event: CoreEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryFetcher, RecordingSink};
    use splitdl_types::{Settings, MIB};

    fn setup(
        fetcher: MemoryFetcher,
        part_size: u64,
        max_size: u64,
        dir: &Path,
    ) -> (Arc<Registry>, RecordingSink, DeliveryLoop) {
        let settings = Settings {
            part_size,
            max_size,
            work_dir: dir.to_path_buf(),
            ..Settings::default()
        };
        let registry = Arc::new(Registry::new(&settings, Arc::new(fetcher)));
        let sink = RecordingSink::new();
        let delivery = DeliveryLoop::new(
            Arc::clone(&registry),
            Arc::new(sink.clone()),
            Duration::from_secs(60),
        );
        (registry, sink, delivery)
    }

    #[test]
    fn overrun_cycle_sleeps_zero() {
        let delay = Duration::from_secs(60);
        assert_eq!(
            remaining_delay(delay, Duration::from_secs(15)),
            Some(Duration::from_secs(45))
        );
        assert_eq!(remaining_delay(delay, Duration::from_secs(60)), None);
        assert_eq!(remaining_delay(delay, Duration::from_secs(90)), None);
        assert_eq!(remaining_delay(Duration::ZERO, Duration::ZERO), None);
    }

    #[tokio::test]
    async fn three_part_download_over_three_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let body: Vec<u8> = (0..45u32).map(|i| i as u8).collect();
        let (registry, sink, delivery) =
            setup(MemoryFetcher::new(body.clone()), 20, 2000, dir.path());
        registry.enqueue("bob", "https://example.com/big.bin").unwrap();

        for cycle in 1..=3 {
            let report = delivery.run_cycle().await;
            assert_eq!(report.advanced(), 1, "cycle {}", cycle);
        }

        assert_eq!(
            sink.texts_for("bob"),
            vec!["Part 1/3", "Part 2/3", "Part 3/3"]
        );
        assert!(registry.is_empty());

        let delivered = sink.delivered.lock().clone();
        let joined: Vec<u8> = delivered
            .iter()
            .flat_map(|d| d.content.clone().unwrap_or_default())
            .collect();
        assert_eq!(joined, body);

        // nothing left staged once the job is gone
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn oversized_download_fails_on_first_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MemoryFetcher::new(vec![0u8; 64]).declare_length(3000 * MIB);
        let (registry, sink, delivery) = setup(fetcher, 20 * MIB, 2000 * MIB, dir.path());
        registry.enqueue("carol", "https://example.com/huge.iso").unwrap();

        let report = delivery.run_cycle().await;

        assert_eq!(report.failed, 1);
        assert!(registry.is_empty());
        let delivered = sink.delivered.lock().clone();
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].file.is_none());
        assert!(delivered[0].text.contains("too big"));
    }

    #[tokio::test]
    async fn transfer_failure_sends_generic_message() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, sink, delivery) = setup(MemoryFetcher::routes(), 20, 2000, dir.path());
        registry.enqueue("dave", "https://example.com/404").unwrap();

        delivery.run_cycle().await;

        assert_eq!(
            sink.texts_for("dave"),
            vec!["❌ Failed to download file, is the link correct?"]
        );
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn every_job_advances_once_per_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, sink, delivery) =
            setup(MemoryFetcher::new(vec![1u8; 100]), 10, 2000, dir.path());
        for i in 0..7 {
            registry
                .enqueue(&format!("user{}", i), "https://example.com/f")
                .unwrap();
        }

        let report = delivery.run_cycle().await;

        assert_eq!(report.delivered, 7);
        for i in 0..7 {
            assert_eq!(sink.texts_for(&format!("user{}", i)), vec!["Part 1/10"]);
        }
        assert_eq!(registry.size(), 7);
    }

    #[tokio::test]
    async fn concurrent_cycle_keeps_per_job_order() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, sink, delivery) =
            setup(MemoryFetcher::new(vec![1u8; 30]), 10, 2000, dir.path());
        let delivery = delivery.with_concurrency(4);
        for i in 0..5 {
            registry
                .enqueue(&format!("user{}", i), "https://example.com/f")
                .unwrap();
        }

        for _ in 0..3 {
            let report = delivery.run_cycle().await;
            assert_eq!(report.advanced(), 5);
        }

        for i in 0..5 {
            assert_eq!(
                sink.texts_for(&format!("user{}", i)),
                vec!["Part 1/3", "Part 2/3", "Part 3/3"]
            );
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_others() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MemoryFetcher::routes().route("https://example.com/ok", vec![5u8; 8]);
        let (registry, sink, delivery) = setup(fetcher, 20, 2000, dir.path());
        registry.enqueue("bad", "https://example.com/broken").unwrap();
        registry.enqueue("good", "https://example.com/ok").unwrap();

        let report = delivery.run_cycle().await;

        assert_eq!((report.completed, report.failed), (1, 1));
        assert_eq!(sink.texts_for("good"), vec!["Part 1/1"]);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn sink_errors_are_contained() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            part_size: 10,
            max_size: 2000,
            work_dir: dir.path().to_path_buf(),
            ..Settings::default()
        };
        let registry = Arc::new(Registry::new(&settings, Arc::new(MemoryFetcher::new(vec![0u8; 15]))));
        let sink = RecordingSink::failing_for("mallory");
        let delivery = DeliveryLoop::new(Arc::clone(&registry), Arc::new(sink.clone()), Duration::ZERO);
        registry.enqueue("mallory", "https://example.com/a").unwrap();
        registry.enqueue("trent", "https://example.com/b").unwrap();

        delivery.run_cycle().await;
        delivery.run_cycle().await;

        assert_eq!(sink.texts_for("trent"), vec!["Part 1/2", "Part 2/2"]);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn jobs_enqueued_mid_run_join_later_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, sink, delivery) =
            setup(MemoryFetcher::new(vec![0u8; 20]), 10, 2000, dir.path());
        registry.enqueue("early", "https://example.com/a").unwrap();

        delivery.run_cycle().await;
        registry.enqueue("late", "https://example.com/b").unwrap();
        delivery.run_cycle().await;

        assert_eq!(sink.texts_for("early"), vec!["Part 1/2", "Part 2/2"]);
        assert_eq!(sink.texts_for("late"), vec!["Part 1/2"]);
        assert!(registry.contains("late"));
    }

    #[tokio::test]
    async fn zero_delay_loop_leaves_room_for_other_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            delay: 0,
            work_dir: dir.path().to_path_buf(),
            ..Settings::default()
        };
        assert!(settings.validate().is_ok());
        let registry = Arc::new(Registry::new(&settings, Arc::new(MemoryFetcher::new(vec![0u8; 4]))));
        let delivery = DeliveryLoop::new(
            Arc::clone(&registry),
            Arc::new(RecordingSink::new()),
            settings.delay_duration(),
        );

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(delivery.run(cancel.clone()));

        // stops a starved runtime so the assertion below can report it
        let watchdog = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_secs(3));
            watchdog.cancel();
        });

        tokio::task::yield_now().await;
        let resumed_in_time = !cancel.is_cancelled();

        cancel.cancel();
        handle.await.unwrap();
        assert!(resumed_in_time, "delivery loop never yielded");
    }

    #[tokio::test(start_paused = true)]
    async fn run_waits_out_the_delay_between_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, sink, delivery) =
            setup(MemoryFetcher::new(vec![0u8; 30]), 10, 2000, dir.path());
        registry.enqueue("erin", "https://example.com/a").unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(delivery.run(cancel.clone()));

        // first cycle runs right away
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.texts_for("erin").len(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(sink.texts_for("erin").len(), 2);

        cancel.cancel();
        handle.await.unwrap();
    }
}
