//! Shared per-task progress map.
//!
//! Pipelines write, pollers read. Each task id has a single writer (its chunk
//! job); readers take snapshots and never block a writer for long.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::classifier::FilteringStatistics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStage {
    Pending,
    Transcribing,
    Filtering,
    Translating,
    Complete,
    Error,
    /// Stopped on request; not a failure.
    Cancelled,
}

impl TaskStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Transcribing => "transcribing",
            Self::Filtering => "filtering",
            Self::Translating => "translating",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a finished task reports to pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub statistics: FilteringStatistics,
    pub translation_segment_count: usize,
    pub translation_failed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingTask {
    pub task_id: String,
    pub stage: TaskStage,
    /// Percent complete, always within `[0, 100]`.
    pub progress: f64,
    pub message: String,
    pub result: Option<TaskSummary>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ProcessingTask {
    fn new(task_id: &str) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.to_string(),
            stage: TaskStage::Pending,
            progress: 0.0,
            message: "Queued".to_string(),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    fn finish(&mut self, stage: TaskStage, message: String) {
        let now = Utc::now();
        self.stage = stage;
        self.message = message;
        self.updated_at = now;
        self.finished_at = Some(now);
    }
}

pub fn new_task_id() -> String {
    Uuid::new_v4().to_string()
}

fn clamp_progress(progress: f64) -> f64 {
    if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 100.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    tasks: Arc<RwLock<HashMap<String, ProcessingTask>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task in `pending`. An active task with the same id is left
    /// untouched; a finished one starts over.
    pub async fn init(&self, task_id: &str) {
        let mut tasks = self.tasks.write().await;
        if tasks.get(task_id).is_some_and(|task| !task.stage.is_terminal()) {
            return;
        }
        tasks.insert(task_id.to_string(), ProcessingTask::new(task_id));
        debug!("Task {} registered", task_id);
    }

    /// Move an active task to `stage`. Progress is clamped to `[0, 100]` and
    /// never decreases. Returns false for unknown or finished tasks.
    pub async fn update(&self, task_id: &str, progress: f64, stage: TaskStage, message: &str) -> bool {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(task_id) else {
            warn!("Progress update for unknown task {}", task_id);
            return false;
        };
        if task.stage.is_terminal() {
            debug!("Ignoring update for finished task {} ({})", task_id, task.stage);
            return false;
        }

        task.progress = task.progress.max(clamp_progress(progress));
        task.stage = stage;
        task.message = message.to_string();
        task.updated_at = Utc::now();
        debug!("Task {}: {} {:.0}% {}", task_id, stage, task.progress, message);
        true
    }

    pub async fn complete(&self, task_id: &str, result: TaskSummary) -> bool {
        self.finish(task_id, |task| {
            task.progress = 100.0;
            task.result = Some(result);
            task.finish(TaskStage::Complete, "Done".to_string());
        })
        .await
    }

    pub async fn fail(&self, task_id: &str, error: &str) -> bool {
        self.finish(task_id, |task| {
            task.error = Some(error.to_string());
            task.finish(TaskStage::Error, error.to_string());
        })
        .await
    }

    pub async fn cancel(&self, task_id: &str) -> bool {
        self.finish(task_id, |task| {
            task.result = None;
            task.finish(TaskStage::Cancelled, "Cancelled".to_string());
        })
        .await
    }

    async fn finish<F>(&self, task_id: &str, apply: F) -> bool
    where
        F: FnOnce(&mut ProcessingTask),
    {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(task_id) {
            Some(task) if !task.stage.is_terminal() => {
                apply(task);
                true
            }
            Some(task) => {
                debug!("Task {} already finished as {}", task_id, task.stage);
                false
            }
            None => {
                warn!("Finish requested for unknown task {}", task_id);
                false
            }
        }
    }

    pub async fn get(&self, task_id: &str) -> Option<ProcessingTask> {
        self.tasks.read().await.get(task_id).cloned()
    }

    /// All tasks, oldest first.
    pub async fn snapshot(&self) -> Vec<ProcessingTask> {
        let mut tasks: Vec<ProcessingTask> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        tasks
    }

    /// Take a task out of the map, e.g. to archive it after it finished.
    pub async fn remove(&self, task_id: &str) -> Option<ProcessingTask> {
        self.tasks.write().await.remove(task_id)
    }

    /// Drop finished tasks older than `max_age`. Returns how many were dropped.
    pub async fn prune_finished(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, task| match task.finished_at {
            Some(finished) => finished > cutoff,
            None => true,
        });
        before - tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lifecycle() {
        let tracker = ProgressTracker::new();
        tracker.init("t1").await;

        assert_eq!(tracker.get("t1").await.unwrap().stage, TaskStage::Pending);
        assert!(tracker.update("t1", 10.0, TaskStage::Transcribing, "Transcribing").await);
        assert!(tracker.update("t1", 50.0, TaskStage::Filtering, "Filtering").await);

        let summary = TaskSummary {
            statistics: FilteringStatistics::default(),
            translation_segment_count: 0,
            translation_failed: false,
        };
        assert!(tracker.complete("t1", summary.clone()).await);

        let task = tracker.get("t1").await.unwrap();
        assert_eq!(task.stage, TaskStage::Complete);
        assert_eq!(task.progress, 100.0);
        assert_eq!(task.result, Some(summary));
        assert!(task.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_progress_is_clamped_and_monotonic() {
        let tracker = ProgressTracker::new();
        tracker.init("t1").await;

        tracker.update("t1", 150.0, TaskStage::Filtering, "").await;
        assert_eq!(tracker.get("t1").await.unwrap().progress, 100.0);

        tracker.init("t2").await;
        tracker.update("t2", -5.0, TaskStage::Transcribing, "").await;
        assert_eq!(tracker.get("t2").await.unwrap().progress, 0.0);

        tracker.update("t2", 40.0, TaskStage::Filtering, "").await;
        tracker.update("t2", 20.0, TaskStage::Translating, "").await;
        let task = tracker.get("t2").await.unwrap();
        assert_eq!(task.progress, 40.0);
        assert_eq!(task.stage, TaskStage::Translating);
    }

    #[tokio::test]
    async fn test_terminal_states_are_final() {
        let tracker = ProgressTracker::new();
        tracker.init("t1").await;
        assert!(tracker.cancel("t1").await);

        assert!(!tracker.update("t1", 90.0, TaskStage::Translating, "late").await);
        assert!(!tracker.fail("t1", "late error").await);

        let task = tracker.get("t1").await.unwrap();
        assert_eq!(task.stage, TaskStage::Cancelled);
        assert!(task.error.is_none());
    }

    #[tokio::test]
    async fn test_init_keeps_active_task_and_restarts_finished_one() {
        let tracker = ProgressTracker::new();
        tracker.init("t1").await;
        tracker.update("t1", 30.0, TaskStage::Filtering, "").await;

        tracker.init("t1").await;
        assert_eq!(tracker.get("t1").await.unwrap().progress, 30.0);

        tracker.fail("t1", "boom").await;
        tracker.init("t1").await;
        let task = tracker.get("t1").await.unwrap();
        assert_eq!(task.stage, TaskStage::Pending);
        assert_eq!(task.progress, 0.0);
    }

    #[tokio::test]
    async fn test_unknown_task_is_ignored() {
        let tracker = ProgressTracker::new();
        assert!(!tracker.update("missing", 10.0, TaskStage::Filtering, "").await);
        assert!(!tracker.fail("missing", "boom").await);
        assert!(tracker.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_remove_and_prune() {
        let tracker = ProgressTracker::new();
        tracker.init("a").await;
        tracker.init("b").await;
        tracker.init("c").await;
        tracker.fail("b", "boom").await;
        tracker.complete("c", TaskSummary {
            statistics: FilteringStatistics::default(),
            translation_segment_count: 0,
            translation_failed: false,
        })
        .await;

        assert_eq!(tracker.snapshot().await.len(), 3);

        // Nothing is older than an hour yet
        assert_eq!(tracker.prune_finished(Duration::hours(1)).await, 0);
        assert_eq!(tracker.prune_finished(Duration::zero() - Duration::seconds(1)).await, 2);

        let remaining = tracker.snapshot().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].task_id, "a");

        assert!(tracker.remove("a").await.is_some());
        assert!(tracker.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_readers_and_writers() {
        let tracker = ProgressTracker::new();
        let mut handles = Vec::new();

        for i in 0..8 {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                let id = format!("task-{}", i);
                tracker.init(&id).await;
                for step in 0..=10 {
                    tracker
                        .update(&id, step as f64 * 10.0, TaskStage::Filtering, "working")
                        .await;
                    let _ = tracker.snapshot().await;
                }
                tracker.fail(&id, "done testing").await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let tasks = tracker.snapshot().await;
        assert_eq!(tasks.len(), 8);
        assert!(tasks.iter().all(|t| t.stage == TaskStage::Error && t.progress == 100.0));
    }

    #[test]
    fn test_task_ids_are_unique() {
        assert_ne!(new_task_id(), new_task_id());
    }
}
