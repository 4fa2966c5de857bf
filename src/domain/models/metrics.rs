//! Orchestrator metrics.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::{Task, TaskStatus};

/// Snapshot of orchestrator-wide counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorMetrics {
    pub total_tasks_processed: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub active_workers: usize,
    pub pool_size: usize,
    pub queued_tasks: usize,
    pub running_tasks: usize,
    pub avg_task_duration_ms: u64,
    /// Rolling success rate over the most recent terminal tasks.
    pub success_rate: f64,
    pub last_run_time: Option<DateTime<Utc>>,
}

/// Accumulates terminal task outcomes.
#[derive(Debug, Clone)]
pub struct MetricsTracker {
    window: usize,
    recent: VecDeque<(bool, Option<u64>)>,
    completed: u64,
    failed: u64,
    cancelled: u64,
    last_run_time: Option<DateTime<Utc>>,
}

impl MetricsTracker {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            recent: VecDeque::new(),
            completed: 0,
            failed: 0,
            cancelled: 0,
            last_run_time: None,
        }
    }

    /// Record a task that reached a terminal status. Non-terminal tasks are
    /// ignored; cancelled tasks are counted but stay out of the rolling window.
    pub fn record(&mut self, task: &Task) {
        let success = match task.status {
            TaskStatus::Completed => {
                self.completed += 1;
                true
            }
            TaskStatus::Failed => {
                self.failed += 1;
                false
            }
            TaskStatus::Cancelled => {
                self.cancelled += 1;
                return;
            }
            TaskStatus::Queued | TaskStatus::Running => return,
        };

        if self.recent.len() == self.window {
            self.recent.pop_front();
        }
        self.recent.push_back((success, task.duration_ms()));
        self.last_run_time = task.completed_at.or(self.last_run_time);
    }

    pub fn total_processed(&self) -> u64 {
        self.completed + self.failed + self.cancelled
    }

    /// 1.0 when nothing has been recorded yet.
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.recent.is_empty() {
            return 1.0;
        }
        let ok = self.recent.iter().filter(|(success, _)| *success).count();
        ok as f64 / self.recent.len() as f64
    }

    pub fn avg_duration_ms(&self) -> u64 {
        let durations: Vec<u64> = self.recent.iter().filter_map(|(_, d)| *d).collect();
        if durations.is_empty() {
            0
        } else {
            durations.iter().sum::<u64>() / durations.len() as u64
        }
    }

    pub fn snapshot(
        &self,
        pool_size: usize,
        active_workers: usize,
        queued_tasks: usize,
        running_tasks: usize,
    ) -> OrchestratorMetrics {
        OrchestratorMetrics {
            total_tasks_processed: self.total_processed(),
            completed: self.completed,
            failed: self.failed,
            cancelled: self.cancelled,
            active_workers,
            pool_size,
            queued_tasks,
            running_tasks,
            avg_task_duration_ms: self.avg_duration_ms(),
            success_rate: self.success_rate(),
            last_run_time: self.last_run_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::outcome::{TaskOutcome, TestOutcome};
    use crate::domain::models::task::{TaskKind, TaskPayload, TaskPriority};

    fn cancelled() -> Task {
        let mut task = Task::new(
            TaskKind::Test,
            TaskPriority::Low,
            TaskPayload::default_for(TaskKind::Test),
        )
        .unwrap();
        task.transition_to(TaskStatus::Cancelled).unwrap();
        task
    }

    fn finished(success: bool) -> Task {
        let mut task = Task::new(
            TaskKind::Test,
            TaskPriority::Low,
            TaskPayload::default_for(TaskKind::Test),
        )
        .unwrap();
        task.transition_to(TaskStatus::Running).unwrap();
        if success {
            task.complete(TaskOutcome::Test(TestOutcome::default())).unwrap();
        } else {
            task.fail("boom").unwrap();
        }
        task
    }

    #[test]
    fn test_empty_tracker() {
        let tracker = MetricsTracker::new(10);
        assert!((tracker.success_rate() - 1.0).abs() < f64::EPSILON);
        assert_eq!(tracker.avg_duration_ms(), 0);
        assert_eq!(tracker.total_processed(), 0);
    }

    #[test]
    fn test_rolling_window() {
        let mut tracker = MetricsTracker::new(4);
        tracker.record(&finished(false));
        tracker.record(&finished(false));
        for _ in 0..4 {
            tracker.record(&finished(true));
        }
        assert!((tracker.success_rate() - 1.0).abs() < f64::EPSILON);
        assert_eq!(tracker.total_processed(), 6);

        let snapshot = tracker.snapshot(3, 1, 2, 1);
        assert_eq!(snapshot.failed, 2);
        assert_eq!(snapshot.completed, 4);
        assert!(snapshot.last_run_time.is_some());
    }

    #[test]
    fn test_cancelled_tasks_do_not_lower_success_rate() {
        let mut tracker = MetricsTracker::new(10);
        tracker.record(&finished(true));
        tracker.record(&finished(false));
        for _ in 0..5 {
            tracker.record(&cancelled());
        }

        assert!((tracker.success_rate() - 0.5).abs() < f64::EPSILON);
        let snapshot = tracker.snapshot(1, 0, 0, 0);
        assert_eq!(snapshot.cancelled, 5);
        assert_eq!(snapshot.total_tasks_processed, 7);
    }
}
