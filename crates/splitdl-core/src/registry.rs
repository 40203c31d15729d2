//! Job registry - one in-flight download per requester
//!
//! The map itself sits behind a short-lived lock; each job's cursor has its
//! own async lock so a slow transfer never blocks admission.

use crate::error::SplitdlError;
use crate::fetch::Fetcher;
use crate::splitter::{split, PartCursor};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use splitdl_types::{JobSummary, Part, Settings};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};
use uuid::Uuid;

/// What one `advance` call produced
#[derive(Debug)]
pub enum Advance {
    /// An intermediate part; the job stays queued
    Delivered(Part),
    /// The final part; the job has left the registry
    Completed(FinalPart),
    /// The job was aborted and has left the registry
    Failed(SplitdlError),
}

/// The last part of a job, still holding the job's staging area.
///
/// Call `close` once the part has been delivered. Dropping it cleans up
/// as well.
#[derive(Debug)]
pub struct FinalPart {
    pub part: Part,
    cursor: PartCursor,
}

impl FinalPart {
    pub async fn close(self) {
        self.cursor.close().await;
    }
}

/// A queued download
struct DownloadJob {
    id: Uuid,
    key: String,
    url: String,
    queued_at: DateTime<Utc>,
    parts_delivered: AtomicU32,
    bytes_fetched: AtomicU64,
    /// Taken out when the job ends
    cursor: AsyncMutex<Option<PartCursor>>,
}

impl DownloadJob {
    fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            key: self.key.clone(),
            url: self.url.clone(),
            parts_delivered: self.parts_delivered.load(Ordering::Acquire),
            bytes_fetched: self.bytes_fetched.load(Ordering::Acquire),
            queued_at: self.queued_at,
        }
    }
}

/// Bounded map from requester to its download
pub struct Registry {
    jobs: Mutex<HashMap<String, Arc<DownloadJob>>>,
    capacity: usize,
    part_size: u64,
    max_size: u64,
    work_dir: PathBuf,
    fetcher: Arc<dyn Fetcher>,
}

impl Registry {
    /// Build a registry; the size settings are captured here and apply to
    /// every job it admits
    pub fn new(settings: &Settings, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            capacity: settings.max_queue_size,
            part_size: settings.part_size,
            max_size: settings.max_size,
            work_dir: settings.work_dir.clone(),
            fetcher,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Admit a download for `key`.
    ///
    /// Fails with `AlreadyQueued` when the key has an active job, even at
    /// full capacity, and with `QueueFull` when the key is new and the
    /// registry is full. Nothing is fetched here.
    pub fn enqueue(&self, key: &str, url: &str) -> Result<(), SplitdlError> {
        let mut jobs = self.jobs.lock();

        if jobs.contains_key(key) {
            return Err(SplitdlError::AlreadyQueued(key.to_string()));
        }
        if jobs.len() >= self.capacity {
            return Err(SplitdlError::QueueFull(self.capacity));
        }

        let cursor = split(
            url,
            self.part_size,
            self.max_size,
            Arc::clone(&self.fetcher),
            &self.work_dir,
        );
        let job = DownloadJob {
            id: Uuid::new_v4(),
            key: key.to_string(),
            url: url.to_string(),
            queued_at: Utc::now(),
            parts_delivered: AtomicU32::new(0),
            bytes_fetched: AtomicU64::new(0),
            cursor: AsyncMutex::new(Some(cursor)),
        };
        info!("Queued download {} for {}: {}", job.id, key, url);
        jobs.insert(key.to_string(), Arc::new(job));

        Ok(())
    }

    /// Pull exactly one unit from the job of `key`.
    ///
    /// Returns `None` when `key` has no job. Terminal outcomes remove the
    /// job before returning.
    pub async fn advance(&self, key: &str) -> Option<Advance> {
        let job = self.jobs.lock().get(key).cloned()?;
        let mut slot = job.cursor.lock().await;
        let cursor = slot.as_mut()?;

        let result = cursor.next_part().await;
        job.bytes_fetched
            .store(cursor.bytes_fetched(), Ordering::Release);

        match result {
            Ok(Some(part)) if !part.is_last() => {
                job.parts_delivered.fetch_add(1, Ordering::AcqRel);
                Some(Advance::Delivered(part))
            }
            Ok(Some(part)) => {
                job.parts_delivered.fetch_add(1, Ordering::AcqRel);
                let cursor = slot.take()?;
                self.remove(key, &job);
                info!("Download {} for {} finished after {} parts", job.id, key, part.total);
                Some(Advance::Completed(FinalPart { part, cursor }))
            }
            Ok(None) => {
                // Cursor ran dry without flagging a last part
                if let Some(cursor) = slot.take() {
                    cursor.close().await;
                }
                self.remove(key, &job);
                Some(Advance::Failed(SplitdlError::EmptyResource))
            }
            Err(e) => {
                if let Some(cursor) = slot.take() {
                    cursor.close().await;
                }
                self.remove(key, &job);
                debug!("Download {} for {} aborted: {}", job.id, key, e);
                Some(Advance::Failed(e))
            }
        }
    }

    /// Number of active jobs
    pub fn size(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.jobs.lock().contains_key(key)
    }

    /// Keys of all active jobs at this instant
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.jobs.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Summaries of all active jobs, oldest first
    pub fn jobs(&self) -> Vec<JobSummary> {
        let mut jobs: Vec<JobSummary> = self.jobs.lock().values().map(|j| j.summary()).collect();
        jobs.sort_by_key(|j| j.queued_at);
        jobs
    }

    fn remove(&self, key: &str, job: &Arc<DownloadJob>) {
        let mut jobs = self.jobs.lock();
        if jobs.get(key).is_some_and(|current| Arc::ptr_eq(current, job)) {
            jobs.remove(key);
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("size", &self.size())
            .field("capacity", &self.capacity)
            .field("part_size", &self.part_size)
            .field("max_size", &self.max_size)
            .finish_non_exhaustive()
    }
}
