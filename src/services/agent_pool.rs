//! Bounded pool of workers.
//!
//! The pool holds no lock of its own: the dispatcher owns it behind the
//! same mutex as the queue, which makes it the sole writer and turns
//! `bind` into a single atomic check-and-set.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::domain::errors::PoolError;
use crate::domain::models::{PoolConfig, WorkerId, WorkerSnapshot};

/// Size limits and idle policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolBounds {
    pub min_workers: usize,
    pub max_workers: usize,
    pub idle_timeout: Duration,
}

impl From<&PoolConfig> for PoolBounds {
    fn from(config: &PoolConfig) -> Self {
        Self {
            min_workers: config.min_workers,
            max_workers: config.max_workers,
            idle_timeout: config.idle_timeout(),
        }
    }
}

#[derive(Debug)]
struct Worker {
    bound_task: Option<Uuid>,
    idle_since: Instant,
    tasks_run: u64,
}

impl Worker {
    fn new(now: Instant) -> Self {
        Self {
            bound_task: None,
            idle_since: now,
            tasks_run: 0,
        }
    }
}

#[derive(Debug)]
pub struct AgentPool {
    bounds: PoolBounds,
    workers: BTreeMap<WorkerId, Worker>,
    next_id: u64,
}

impl AgentPool {
    /// Create a pool pre-populated with `min_workers` idle workers.
    pub fn new(bounds: PoolBounds) -> Self {
        let mut pool = Self {
            bounds,
            workers: BTreeMap::new(),
            next_id: 1,
        };
        for _ in 0..bounds.min_workers.min(bounds.max_workers) {
            pool.spawn(Instant::now());
        }
        pool
    }

    fn spawn(&mut self, now: Instant) -> WorkerId {
        let id = WorkerId(self.next_id);
        self.next_id += 1;
        self.workers.insert(id, Worker::new(now));
        id
    }

    pub fn bounds(&self) -> PoolBounds {
        self.bounds
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn busy_count(&self) -> usize {
        self.workers.values().filter(|w| w.bound_task.is_some()).count()
    }

    pub fn contains(&self, id: WorkerId) -> bool {
        self.workers.contains_key(&id)
    }

    /// Add one worker. Returns `None` when already at `max_workers`.
    pub fn scale_up(&mut self) -> Option<WorkerId> {
        if self.workers.len() >= self.bounds.max_workers {
            return None;
        }
        Some(self.spawn(Instant::now()))
    }

    /// Remove an idle worker, never going below `min_workers`.
    pub fn scale_down(&mut self, id: WorkerId) -> Result<(), PoolError> {
        let worker = self.workers.get(&id).ok_or(PoolError::UnknownWorker(id))?;
        if worker.bound_task.is_some() {
            return Err(PoolError::WorkerBusy(id));
        }
        if self.workers.len() <= self.bounds.min_workers {
            return Err(PoolError::AtMinimum(self.bounds.min_workers));
        }
        self.workers.remove(&id);
        Ok(())
    }

    /// Idle worker ids, lowest id first.
    pub fn available_workers(&self) -> Vec<WorkerId> {
        self.workers
            .iter()
            .filter(|(_, w)| w.bound_task.is_none())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Bind a task to an idle worker.
    pub fn bind(&mut self, id: WorkerId, task_id: Uuid) -> Result<(), PoolError> {
        let worker = self.workers.get_mut(&id).ok_or(PoolError::UnknownWorker(id))?;
        if worker.bound_task.is_some() {
            return Err(PoolError::WorkerBusy(id));
        }
        worker.bound_task = Some(task_id);
        Ok(())
    }

    /// Unbind a finished task, starting the worker's idle clock.
    pub fn release(&mut self, id: WorkerId, task_id: Uuid) -> Result<(), PoolError> {
        let worker = self.workers.get_mut(&id).ok_or(PoolError::UnknownWorker(id))?;
        if worker.bound_task != Some(task_id) {
            return Err(PoolError::NotBound { worker: id, task_id });
        }
        worker.bound_task = None;
        worker.idle_since = Instant::now();
        worker.tasks_run += 1;
        Ok(())
    }

    /// Retire the longest-idle worker past the timeout. At most one worker
    /// goes per call and never below `min_workers`.
    pub fn reap_idle(&mut self, now: Instant) -> Option<WorkerId> {
        let (_, id) = self
            .workers
            .iter()
            .filter(|(_, w)| {
                w.bound_task.is_none() && now.duration_since(w.idle_since) >= self.bounds.idle_timeout
            })
            .map(|(id, w)| (w.idle_since, *id))
            .min()?;
        self.scale_down(id).ok().map(|()| id)
    }

    /// Drop every worker. Used at shutdown once in-flight work is settled.
    pub fn retire_all(&mut self) -> Vec<WorkerId> {
        let ids: Vec<WorkerId> = self.workers.keys().copied().collect();
        self.workers.clear();
        ids
    }

    pub fn snapshot(&self) -> Vec<WorkerSnapshot> {
        let now = Instant::now();
        self.workers
            .iter()
            .map(|(id, w)| WorkerSnapshot {
                id: *id,
                busy: w.bound_task.is_some(),
                task_id: w.bound_task,
                tasks_run: w.tasks_run,
                idle_secs: w
                    .bound_task
                    .is_none()
                    .then(|| now.duration_since(w.idle_since).as_secs()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds(min: usize, max: usize) -> PoolBounds {
        PoolBounds {
            min_workers: min,
            max_workers: max,
            idle_timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_starts_at_min_workers() {
        let pool = AgentPool::new(bounds(2, 4));
        assert_eq!(pool.size(), 2);
        assert_eq!(pool.available_workers(), vec![WorkerId(1), WorkerId(2)]);
    }

    #[test]
    fn test_scale_up_stops_at_max() {
        let mut pool = AgentPool::new(bounds(1, 2));
        assert_eq!(pool.scale_up(), Some(WorkerId(2)));
        assert_eq!(pool.scale_up(), None);
        assert_eq!(pool.size(), 2);
    }

    #[test]
    fn test_scale_down_rules() {
        let mut pool = AgentPool::new(bounds(1, 3));
        let extra = pool.scale_up().unwrap();
        let task = Uuid::new_v4();
        pool.bind(extra, task).unwrap();

        assert_eq!(pool.scale_down(extra), Err(PoolError::WorkerBusy(extra)));
        pool.release(extra, task).unwrap();
        pool.scale_down(extra).unwrap();

        assert_eq!(pool.scale_down(WorkerId(1)), Err(PoolError::AtMinimum(1)));
        assert_eq!(
            pool.scale_down(WorkerId(99)),
            Err(PoolError::UnknownWorker(WorkerId(99)))
        );
    }

    #[test]
    fn test_bind_is_exclusive() {
        let mut pool = AgentPool::new(bounds(1, 1));
        let worker = WorkerId(1);
        pool.bind(worker, Uuid::new_v4()).unwrap();
        assert_eq!(pool.bind(worker, Uuid::new_v4()), Err(PoolError::WorkerBusy(worker)));
        assert!(pool.available_workers().is_empty());
        assert_eq!(pool.busy_count(), 1);
    }

    #[test]
    fn test_release_requires_matching_task() {
        let mut pool = AgentPool::new(bounds(1, 1));
        let task = Uuid::new_v4();
        pool.bind(WorkerId(1), task).unwrap();
        assert!(pool.release(WorkerId(1), Uuid::new_v4()).is_err());
        pool.release(WorkerId(1), task).unwrap();
        assert_eq!(pool.snapshot()[0].tasks_run, 1);
    }

    #[test]
    fn test_ids_are_never_reused() {
        let mut pool = AgentPool::new(bounds(0, 2));
        let first = pool.scale_up().unwrap();
        pool.scale_down(first).unwrap();
        let second = pool.scale_up().unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reap_idle_respects_min_and_timeout() {
        let mut pool = AgentPool::new(bounds(1, 4));
        pool.scale_up();
        pool.scale_up();
        assert_eq!(pool.size(), 3);

        assert!(pool.reap_idle(Instant::now()).is_none());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(pool.reap_idle(Instant::now()).is_some());
        assert!(pool.reap_idle(Instant::now()).is_some());
        assert!(pool.reap_idle(Instant::now()).is_none());
        assert_eq!(pool.size(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reap_idle_retires_one_worker_per_call() {
        let mut pool = AgentPool::new(bounds(0, 4));
        let oldest = pool.scale_up().unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        pool.scale_up();
        pool.scale_up();

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(pool.reap_idle(Instant::now()), Some(oldest));
        assert_eq!(pool.size(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_workers_are_not_reaped() {
        let mut pool = AgentPool::new(bounds(0, 2));
        let worker = pool.scale_up().unwrap();
        pool.bind(worker, Uuid::new_v4()).unwrap();

        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(pool.reap_idle(Instant::now()).is_none());
        assert_eq!(pool.size(), 1);
    }
}
