//! Persisted priority backlog for discovery jobs
//!
//! Ordering: priority tier first (high before low), then enqueue time
//! (oldest first within a tier). The backlog holds at most one job per
//! series id; a repeat request escalates the existing job's priority to
//! the max of the two instead of inserting a duplicate. All structural
//! changes happen under one mutex, so racing enqueues cannot duplicate.

use std::cmp::Reverse;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::model::{DiscoveryJob, JobPriority};
use crate::persist::KeyValueStore;

/// Snapshot key for the pending-jobs array
pub const QUEUE_KEY: &str = "discovery_queue";

/// Point-in-time queue state for consumers
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub queue_length: usize,
    pub processing: bool,
    /// Series id of the job currently being worked
    pub current_job: Option<String>,
}

pub struct JobQueue {
    backlog: Mutex<Vec<DiscoveryJob>>,
    current: Mutex<Option<String>>,
    notify: Notify,
    persist: Arc<dyn KeyValueStore>,
}

impl JobQueue {
    /// Restore the backlog snapshot; corrupt snapshots are dropped.
    pub async fn restore(persist: Arc<dyn KeyValueStore>) -> Self {
        let backlog = match persist.get(QUEUE_KEY).await {
            Ok(Some(value)) => match serde_json::from_value::<Vec<DiscoveryJob>>(value) {
                Ok(jobs) => {
                    info!(jobs = jobs.len(), "Restored discovery queue snapshot");
                    jobs
                }
                Err(e) => {
                    warn!(error = %e, "Discovery queue snapshot is corrupt, starting empty");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "Failed to load discovery queue snapshot, starting empty");
                Vec::new()
            }
        };

        Self {
            backlog: Mutex::new(backlog),
            current: Mutex::new(None),
            notify: Notify::new(),
            persist,
        }
    }

    /// Queue a discovery job, or escalate the existing one for this series.
    /// Returns true when the backlog changed.
    pub async fn enqueue(
        &self,
        series_id: &str,
        series_title: Option<&str>,
        priority: JobPriority,
    ) -> bool {
        let changed = {
            let mut backlog = self.backlog.lock();
            match backlog.iter_mut().find(|j| j.series_id == series_id) {
                Some(existing) => {
                    if priority > existing.priority {
                        debug!(
                            series_id = %series_id,
                            from = ?existing.priority,
                            to = ?priority,
                            "Escalating queued discovery job"
                        );
                        existing.priority = priority;
                        true
                    } else {
                        false
                    }
                }
                None => {
                    info!(
                        series_id = %series_id,
                        title = %series_title.unwrap_or(series_id),
                        priority = ?priority,
                        "Discovery job queued"
                    );
                    backlog.push(DiscoveryJob {
                        series_id: series_id.to_string(),
                        series_title: series_title.map(str::to_string),
                        priority,
                        enqueued_at: Utc::now(),
                    });
                    true
                }
            }
        };

        if changed {
            self.persist_snapshot().await;
        }
        self.notify.notify_one();
        changed
    }

    /// Pop the highest-priority, oldest job and mark it current
    pub async fn pop(&self) -> Option<DiscoveryJob> {
        let job = {
            let mut backlog = self.backlog.lock();
            let idx = backlog
                .iter()
                .enumerate()
                .max_by_key(|(_, j)| (j.priority, Reverse(j.enqueued_at)))
                .map(|(i, _)| i)?;
            let job = backlog.remove(idx);
            *self.current.lock() = Some(job.series_id.clone());
            Some(job)
        }?;
        self.persist_snapshot().await;
        Some(job)
    }

    /// Put a failed job back, preserving its original enqueue time so it
    /// doesn't jump the FIFO order within its tier. Does not wake the
    /// worker; the next pass or poll interval will pick it up.
    pub async fn requeue(&self, mut job: DiscoveryJob, priority: JobPriority) {
        job.priority = priority;
        {
            let mut backlog = self.backlog.lock();
            // The job was popped, but an enqueue may have raced it back in
            match backlog.iter_mut().find(|j| j.series_id == job.series_id) {
                Some(existing) => existing.priority = existing.priority.max(priority),
                None => backlog.push(job),
            }
        }
        self.persist_snapshot().await;
    }

    /// Clear the current-job marker after processing finishes
    pub async fn finish_current(&self) {
        *self.current.lock() = None;
    }

    pub fn status(&self) -> QueueStatus {
        let current = self.current.lock().clone();
        QueueStatus {
            queue_length: self.backlog.lock().len(),
            processing: current.is_some(),
            current_job: current,
        }
    }

    pub fn len(&self) -> usize {
        self.backlog.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.backlog.lock().is_empty()
    }

    pub fn is_queued(&self, series_id: &str) -> bool {
        self.backlog.lock().iter().any(|j| j.series_id == series_id)
    }

    /// Wait until a new job is enqueued
    pub async fn wait_for_work(&self) {
        self.notify.notified().await;
    }

    async fn persist_snapshot(&self) {
        let snapshot: Vec<DiscoveryJob> = self.backlog.lock().clone();
        match serde_json::to_value(&snapshot) {
            Ok(value) => {
                if let Err(e) = self.persist.set(QUEUE_KEY, value).await {
                    warn!(error = %e, "Failed to persist discovery queue snapshot");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode discovery queue snapshot"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryStore;

    async fn queue() -> JobQueue {
        JobQueue::restore(Arc::new(MemoryStore::new())).await
    }

    #[tokio::test]
    async fn priority_then_fifo_ordering() {
        let q = queue().await;
        q.enqueue("a", Some("A"), JobPriority::Low).await;
        q.enqueue("b", Some("B"), JobPriority::High).await;
        q.enqueue("c", Some("C"), JobPriority::Medium).await;
        q.enqueue("d", Some("D"), JobPriority::High).await;

        let order: Vec<String> = [
            q.pop().await.unwrap(),
            q.pop().await.unwrap(),
            q.pop().await.unwrap(),
            q.pop().await.unwrap(),
        ]
        .into_iter()
        .map(|j| j.series_id)
        .collect();

        // High tier oldest-first, then medium, then low
        assert_eq!(order, ["b", "d", "c", "a"]);
        assert!(q.pop().await.is_none());
    }

    #[tokio::test]
    async fn duplicate_enqueue_escalates_priority() {
        let q = queue().await;
        q.enqueue("s2", Some("Title"), JobPriority::Low).await;
        q.enqueue("s2", Some("Title"), JobPriority::High).await;

        assert_eq!(q.len(), 1);
        let job = q.pop().await.unwrap();
        assert_eq!(job.priority, JobPriority::High);
    }

    #[tokio::test]
    async fn lower_priority_repeat_never_demotes() {
        let q = queue().await;
        q.enqueue("s2", Some("Title"), JobPriority::High).await;
        let changed = q.enqueue("s2", Some("Title"), JobPriority::Low).await;

        assert!(!changed);
        assert_eq!(q.pop().await.unwrap().priority, JobPriority::High);
    }

    #[tokio::test]
    async fn status_tracks_current_job() {
        let q = queue().await;
        q.enqueue("s1", Some("Title"), JobPriority::Medium).await;

        let status = q.status();
        assert_eq!(status.queue_length, 1);
        assert!(!status.processing);

        let job = q.pop().await.unwrap();
        let status = q.status();
        assert_eq!(status.queue_length, 0);
        assert!(status.processing);
        assert_eq!(status.current_job.as_deref(), Some("s1"));

        q.requeue(job, JobPriority::Low).await;
        q.finish_current().await;
        let status = q.status();
        assert_eq!(status.queue_length, 1);
        assert!(!status.processing);
    }

    #[tokio::test]
    async fn snapshot_restores_across_instances() {
        let persist: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        {
            let q = JobQueue::restore(persist.clone()).await;
            q.enqueue("s1", Some("Title"), JobPriority::High).await;
        }

        let restored = JobQueue::restore(persist).await;
        assert_eq!(restored.len(), 1);
        assert_eq!(restored.pop().await.unwrap().series_id, "s1");
    }
}
