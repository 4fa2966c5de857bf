//! Cron scheduler.
//!
//! Fires configured schedules into the dispatcher, waits for the produced
//! task and keeps a bounded execution history per schedule. When a
//! schedule's success rate drops strictly below the configured threshold the
//! advisor is asked for a new cadence and a suggestion event is published.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::event_bus::{EventBus, EventPayload, EventSeverity};
use super::event_factory;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    parse_cron, CadenceSuggestion, ScheduleEntry, ScheduleExecution, ScheduleHistory,
    ScheduleRunStatus, ScheduleStats, SchedulerConfig, TaskSource, TaskStatus,
};
use crate::domain::ports::{Advisor, TaskRequest, TaskSink};

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub tick_interval: Duration,
    pub task_wait_timeout: Duration,
    pub history_window: usize,
    /// Suggestions fire when the success rate is strictly below this.
    pub success_threshold: f64,
    pub min_executions_for_advice: usize,
    pub auto_apply_suggestions: bool,
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            tick_interval: Duration::from_millis(config.tick_interval_ms),
            task_wait_timeout: Duration::from_secs(config.task_wait_timeout_secs),
            history_window: config.history_window,
            success_threshold: config.success_threshold,
            min_executions_for_advice: config.min_executions_for_advice,
            auto_apply_suggestions: config.auto_apply_suggestions,
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

/// Read-only view of a schedule for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleView {
    #[serde(flatten)]
    pub entry: ScheduleEntry,
    pub next_fire: Option<DateTime<Utc>>,
    pub running: bool,
    pub stats: ScheduleStats,
}

struct Slot {
    entry: ScheduleEntry,
    schedule: cron::Schedule,
    history: ScheduleHistory,
    in_flight: bool,
    /// Occurrences at or before this instant never fire.
    reference: DateTime<Utc>,
}

impl Slot {
    fn next_fire(&self) -> Option<DateTime<Utc>> {
        if !self.entry.enabled {
            return None;
        }
        self.schedule.after(&self.reference).next()
    }

    fn view(&self) -> ScheduleView {
        ScheduleView {
            entry: self.entry.clone(),
            next_fire: self.next_fire(),
            running: self.in_flight,
            stats: self.history.stats(),
        }
    }
}

#[derive(Clone)]
pub struct Scheduler {
    slots: Arc<RwLock<BTreeMap<String, Slot>>>,
    sink: Arc<dyn TaskSink>,
    advisor: Arc<dyn Advisor>,
    event_bus: Arc<EventBus>,
    settings: SchedulerSettings,
    running: Arc<AtomicBool>,
    /// Bumped by every `start` and `stop`; a loop exits once it no longer
    /// owns the current generation.
    generation: Arc<AtomicU64>,
}

impl Scheduler {
    pub fn new(
        sink: Arc<dyn TaskSink>,
        advisor: Arc<dyn Advisor>,
        event_bus: Arc<EventBus>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            slots: Arc::new(RwLock::new(BTreeMap::new())),
            sink,
            advisor,
            event_bus,
            settings,
            running: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Add a schedule. The cron expression is validated here.
    pub async fn add_schedule(&self, entry: ScheduleEntry) -> DomainResult<()> {
        entry.validate()?;
        let schedule = parse_cron(&entry.cron)?;

        let mut slots = self.slots.write().await;
        if slots.contains_key(&entry.name) {
            return Err(DomainError::DuplicateSchedule(entry.name));
        }
        tracing::info!(schedule = %entry.name, cron = %entry.cron, enabled = entry.enabled, "schedule added");
        slots.insert(
            entry.name.clone(),
            Slot {
                entry,
                schedule,
                history: ScheduleHistory::new(self.settings.history_window),
                in_flight: false,
                reference: Utc::now(),
            },
        );
        Ok(())
    }

    pub async fn remove_schedule(&self, name: &str) -> DomainResult<ScheduleEntry> {
        let slot = self
            .slots
            .write()
            .await
            .remove(name)
            .ok_or_else(|| DomainError::ScheduleNotFound(name.to_string()))?;
        tracing::info!(schedule = name, "schedule removed");
        Ok(slot.entry)
    }

    pub async fn set_enabled(&self, name: &str, enabled: bool) -> DomainResult<()> {
        let mut slots = self.slots.write().await;
        let slot = slots
            .get_mut(name)
            .ok_or_else(|| DomainError::ScheduleNotFound(name.to_string()))?;
        if enabled && !slot.entry.enabled {
            slot.reference = Utc::now();
        }
        slot.entry.enabled = enabled;
        tracing::info!(schedule = name, enabled, "schedule toggled");
        Ok(())
    }

    /// Replace a schedule's cadence. History is kept.
    pub async fn update_schedule(&self, name: &str, cron: &str) -> DomainResult<()> {
        let schedule = parse_cron(cron)?;
        let mut slots = self.slots.write().await;
        let slot = slots
            .get_mut(name)
            .ok_or_else(|| DomainError::ScheduleNotFound(name.to_string()))?;
        tracing::info!(schedule = name, from = %slot.entry.cron, to = cron, "schedule cadence updated");
        slot.entry.cron = cron.to_string();
        slot.schedule = schedule;
        slot.reference = Utc::now();
        Ok(())
    }

    pub async fn list(&self) -> Vec<ScheduleView> {
        self.slots.read().await.values().map(Slot::view).collect()
    }

    pub async fn schedule(&self, name: &str) -> DomainResult<ScheduleView> {
        self.slots
            .read()
            .await
            .get(name)
            .map(Slot::view)
            .ok_or_else(|| DomainError::ScheduleNotFound(name.to_string()))
    }

    pub async fn schedule_stats(&self, name: &str) -> DomainResult<ScheduleStats> {
        Ok(self.schedule(name).await?.stats)
    }

    /// Recent executions of a schedule, oldest first.
    pub async fn history(&self, name: &str) -> DomainResult<Vec<ScheduleExecution>> {
        self.slots
            .read()
            .await
            .get(name)
            .map(|slot| slot.history.records())
            .ok_or_else(|| DomainError::ScheduleNotFound(name.to_string()))
    }

    /// Next time the schedule will fire; `None` when disabled.
    pub async fn next_fire_time(&self, name: &str) -> DomainResult<Option<DateTime<Utc>>> {
        Ok(self.schedule(name).await?.next_fire)
    }

    /// Claim every schedule due at `now`. Claimed schedules are marked in
    /// flight; a due schedule that is still running skips this occurrence.
    pub async fn check_due(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut due = Vec::new();
        let mut slots = self.slots.write().await;
        for (name, slot) in slots.iter_mut() {
            if !slot.next_fire().is_some_and(|next| next <= now) {
                continue;
            }
            slot.reference = now;
            if slot.in_flight {
                tracing::debug!(schedule = %name, "previous run still in flight; skipping occurrence");
                continue;
            }
            slot.in_flight = true;
            due.push(name.clone());
        }
        due
    }

    /// Fire a schedule immediately and wait for the result.
    pub async fn trigger_now(&self, name: &str) -> DomainResult<ScheduleExecution> {
        {
            let mut slots = self.slots.write().await;
            let slot = slots
                .get_mut(name)
                .ok_or_else(|| DomainError::ScheduleNotFound(name.to_string()))?;
            if slot.in_flight {
                return Err(DomainError::ValidationFailed(format!(
                    "schedule '{name}' is already running"
                )));
            }
            slot.in_flight = true;
            slot.reference = Utc::now();
        }
        self.run_claimed(name).await
    }

    async fn run_claimed(&self, name: &str) -> DomainResult<ScheduleExecution> {
        let entry = match self.slots.read().await.get(name) {
            Some(slot) => slot.entry.clone(),
            None => return Err(DomainError::ScheduleNotFound(name.to_string())),
        };

        let request = TaskRequest {
            kind: entry.kind,
            priority: entry.priority,
            payload: entry.task_payload(),
            source: TaskSource::Schedule(name.to_string()),
        };

        let execution = match self.sink.submit(request).await {
            Ok(task_id) => {
                tracing::info!(schedule = name, task_id = %task_id, "schedule fired");
                self.event_bus
                    .publish(event_factory::schedule_event(
                        EventSeverity::Info,
                        Some(task_id),
                        EventPayload::ScheduleFired {
                            schedule: name.to_string(),
                            task_id: Some(task_id),
                        },
                    ))
                    .await;

                let mut execution = ScheduleExecution::started(name, Some(task_id));
                match self.sink.wait_for_terminal(task_id, self.settings.task_wait_timeout).await {
                    Ok(Some(task)) if task.status == TaskStatus::Completed => {
                        execution.finish(ScheduleRunStatus::Completed, None);
                    }
                    Ok(Some(task)) => {
                        let error = task
                            .error
                            .unwrap_or_else(|| format!("task finished as {}", task.status.as_str()));
                        execution.finish(ScheduleRunStatus::Failed, Some(error));
                    }
                    Ok(None) => execution.finish(
                        ScheduleRunStatus::TimedOut,
                        Some(format!(
                            "task did not finish within {}s",
                            self.settings.task_wait_timeout.as_secs()
                        )),
                    ),
                    Err(e) => execution.finish(ScheduleRunStatus::Failed, Some(e.to_string())),
                }
                execution
            }
            Err(e) => {
                tracing::warn!(schedule = name, error = %e, "schedule could not enqueue its task");
                let mut execution = ScheduleExecution::started(name, None);
                execution.finish(ScheduleRunStatus::Failed, Some(e.to_string()));
                execution
            }
        };

        let success_rate = self.record(name, execution.clone()).await;
        let severity = if execution.status.is_success() {
            EventSeverity::Info
        } else {
            EventSeverity::Warning
        };
        tracing::info!(
            schedule = name,
            status = execution.status.as_str(),
            success_rate = success_rate.unwrap_or(1.0),
            "schedule execution recorded"
        );
        self.event_bus
            .publish(event_factory::schedule_event(
                severity,
                execution.task_id,
                EventPayload::ScheduleExecutionRecorded {
                    schedule: name.to_string(),
                    status: execution.status.as_str().to_string(),
                    success_rate,
                },
            ))
            .await;

        self.evaluate_cadence(name).await;
        Ok(execution)
    }

    /// Append to history and release the in-flight claim.
    async fn record(&self, name: &str, execution: ScheduleExecution) -> Option<f64> {
        let mut slots = self.slots.write().await;
        let slot = slots.get_mut(name)?;
        slot.history.push(execution);
        slot.in_flight = false;
        slot.history.success_rate()
    }

    /// Ask the advisor for a new cadence when the success rate is strictly
    /// below the threshold.
    pub async fn evaluate_cadence(&self, name: &str) -> Option<CadenceSuggestion> {
        let (rate, records, current_cron) = {
            let slots = self.slots.read().await;
            let slot = slots.get(name)?;
            if slot.history.len() < self.settings.min_executions_for_advice {
                return None;
            }
            let rate = slot.history.success_rate()?;
            if rate >= self.settings.success_threshold {
                return None;
            }
            (rate, slot.history.records(), slot.entry.cron.clone())
        };

        let suggestion = match self.advisor.suggest_cadence(name, &records).await {
            Ok(suggestion) => suggestion,
            Err(e) => {
                tracing::warn!(schedule = name, error = %e, "advisor could not suggest a cadence");
                return None;
            }
        };

        tracing::info!(
            schedule = name,
            success_rate = rate,
            current = %current_cron,
            recommended = %suggestion.cron_expression,
            "schedule optimization suggested"
        );
        self.event_bus
            .publish(event_factory::schedule_event(
                EventSeverity::Warning,
                None,
                EventPayload::ScheduleOptimizationSuggested {
                    schedule: name.to_string(),
                    current_cron: current_cron.clone(),
                    recommended_cron: suggestion.cron_expression.clone(),
                    reason: suggestion.reason.clone(),
                    success_rate: rate,
                },
            ))
            .await;

        if self.settings.auto_apply_suggestions && suggestion.cron_expression != current_cron {
            if let Err(e) = self.update_schedule(name, &suggestion.cron_expression).await {
                tracing::warn!(schedule = name, error = %e, "could not apply suggested cadence");
            }
        }
        Some(suggestion)
    }

    /// Start the tick loop. Each due schedule runs on its own task. Fails
    /// when a loop is already running.
    pub fn start(&self, cancel: CancellationToken) -> DomainResult<JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(DomainError::ValidationFailed("scheduler already running".to_string()));
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let this = self.clone();

        Ok(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.settings.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if !this.owns_loop(generation) {
                    break;
                }

                for name in this.check_due(Utc::now()).await {
                    let scheduler = this.clone();
                    tokio::spawn(async move {
                        if let Err(e) = scheduler.run_claimed(&name).await {
                            tracing::warn!(schedule = %name, error = %e, "scheduled run aborted");
                        }
                    });
                }
            }

            if this.generation.load(Ordering::SeqCst) == generation {
                this.running.store(false, Ordering::SeqCst);
            }
            tracing::debug!(generation, "scheduler loop stopped");
        }))
    }

    fn owns_loop(&self, generation: u64) -> bool {
        self.running.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }

    pub fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::AdvisorError;
    use crate::domain::models::{
        ChangeAssessment, CommitInfo, Task, TaskKind, TaskOutcome, TestOutcome,
    };
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Mutex;
    use uuid::Uuid;

    /// Completes or fails each submitted task according to a script.
    #[derive(Default)]
    struct ScriptedSink {
        script: Mutex<VecDeque<bool>>,
        tasks: Mutex<HashMap<Uuid, Task>>,
    }

    impl ScriptedSink {
        async fn push(&self, successes: usize, failures: usize) {
            let mut script = self.script.lock().await;
            script.extend(std::iter::repeat_n(true, successes));
            script.extend(std::iter::repeat_n(false, failures));
        }
    }

    #[async_trait]
    impl TaskSink for ScriptedSink {
        async fn submit(&self, request: TaskRequest) -> DomainResult<Uuid> {
            let succeed = self.script.lock().await.pop_front().unwrap_or(true);
            let mut task = Task::new(request.kind, request.priority, request.payload)?.with_source(request.source);
            task.transition_to(TaskStatus::Running)?;
            if succeed {
                task.complete(TaskOutcome::Test(TestOutcome::default()))?;
            } else {
                task.fail("scripted failure")?;
            }
            let id = task.id;
            self.tasks.lock().await.insert(id, task);
            Ok(id)
        }

        async fn task(&self, task_id: Uuid) -> Option<Task> {
            self.tasks.lock().await.get(&task_id).cloned()
        }

        async fn wait_for_terminal(&self, task_id: Uuid, _timeout: Duration) -> DomainResult<Option<Task>> {
            Ok(self.task(task_id).await)
        }
    }

    #[derive(Default)]
    struct CountingAdvisor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Advisor for CountingAdvisor {
        async fn assess_change(&self, _commit: &CommitInfo) -> Result<ChangeAssessment, AdvisorError> {
            Err(AdvisorError::Unavailable("not used".into()))
        }

        async fn suggest_cadence(
            &self,
            _schedule_name: &str,
            _history: &[ScheduleExecution],
        ) -> Result<CadenceSuggestion, AdvisorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CadenceSuggestion {
                cron_expression: "0 */2 * * *".to_string(),
                reason: "flaky".to_string(),
            })
        }
    }

    fn scheduler(sink: Arc<ScriptedSink>, advisor: Arc<CountingAdvisor>, window: usize) -> Scheduler {
        let settings = SchedulerSettings {
            tick_interval: Duration::from_millis(10),
            task_wait_timeout: Duration::from_secs(1),
            history_window: window,
            success_threshold: 0.7,
            min_executions_for_advice: 3,
            auto_apply_suggestions: false,
        };
        Scheduler::new(sink, advisor, Arc::new(EventBus::default()), settings)
    }

    fn entry(name: &str) -> ScheduleEntry {
        ScheduleEntry::new(name, "0 * * * *", TaskKind::Test)
    }

    fn count_suggestions(rx: &mut tokio::sync::broadcast::Receiver<crate::services::event_bus::UnifiedEvent>) -> usize {
        let mut count = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event.payload, EventPayload::ScheduleOptimizationSuggested { .. }) {
                count += 1;
            }
        }
        count
    }

    #[tokio::test]
    async fn test_add_rejects_invalid_cron_and_duplicates() {
        let scheduler = scheduler(Arc::default(), Arc::default(), 10);
        let bad = ScheduleEntry::new("bad", "every hour", TaskKind::Test);
        assert!(matches!(
            scheduler.add_schedule(bad).await,
            Err(DomainError::InvalidCron { .. })
        ));

        scheduler.add_schedule(entry("a")).await.unwrap();
        assert!(matches!(
            scheduler.add_schedule(entry("a")).await,
            Err(DomainError::DuplicateSchedule(_))
        ));
        assert_eq!(scheduler.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_success_rate_boundary_is_strict() {
        let sink = Arc::new(ScriptedSink::default());
        let advisor = Arc::new(CountingAdvisor::default());
        let scheduler = scheduler(sink.clone(), advisor.clone(), 10);
        scheduler.add_schedule(entry("nightly")).await.unwrap();
        let mut rx = scheduler.event_bus.subscribe();

        // Successes first so the rate only ever falls towards 0.7.
        sink.push(7, 3).await;
        for _ in 0..10 {
            scheduler.trigger_now("nightly").await.unwrap();
        }
        let stats = scheduler.schedule_stats("nightly").await.unwrap();
        assert_eq!(stats.total_executions, 10);
        assert!((stats.success_rate.unwrap() - 0.7).abs() < 1e-9);
        assert_eq!(count_suggestions(&mut rx), 0, "exactly at threshold does not fire");
        assert_eq!(advisor.calls.load(Ordering::SeqCst), 0);

        // One more failure evicts a success: 6/10.
        sink.push(0, 1).await;
        scheduler.trigger_now("nightly").await.unwrap();
        assert_eq!(count_suggestions(&mut rx), 1);
    }

    #[tokio::test]
    async fn test_rate_of_069_fires_suggestion() {
        let sink = Arc::new(ScriptedSink::default());
        let advisor = Arc::new(CountingAdvisor::default());
        let scheduler = scheduler(sink.clone(), advisor.clone(), 100);
        scheduler.add_schedule(entry("hourly")).await.unwrap();
        let mut rx = scheduler.event_bus.subscribe();

        sink.push(70, 30).await;
        for _ in 0..100 {
            scheduler.trigger_now("hourly").await.unwrap();
        }
        assert_eq!(count_suggestions(&mut rx), 0);

        sink.push(0, 1).await;
        scheduler.trigger_now("hourly").await.unwrap();
        let rate = scheduler.schedule_stats("hourly").await.unwrap().success_rate.unwrap();
        assert!((rate - 0.69).abs() < 1e-9);
        assert_eq!(count_suggestions(&mut rx), 1);
    }

    #[tokio::test]
    async fn test_failures_do_not_disable_schedule() {
        let sink = Arc::new(ScriptedSink::default());
        let scheduler = scheduler(sink.clone(), Arc::default(), 10);
        scheduler.add_schedule(entry("s")).await.unwrap();

        sink.push(0, 2).await;
        let first = scheduler.trigger_now("s").await.unwrap();
        assert_eq!(first.status, ScheduleRunStatus::Failed);
        assert_eq!(first.error.as_deref(), Some("scripted failure"));

        let view = scheduler.schedule("s").await.unwrap();
        assert!(view.entry.enabled);
        assert!(!view.running);
        assert!(view.next_fire.is_some());
    }

    #[tokio::test]
    async fn test_auto_apply_updates_cadence() {
        let sink = Arc::new(ScriptedSink::default());
        let mut scheduler = scheduler(sink.clone(), Arc::default(), 10);
        scheduler.settings.auto_apply_suggestions = true;
        scheduler.add_schedule(entry("s")).await.unwrap();

        sink.push(0, 3).await;
        for _ in 0..3 {
            scheduler.trigger_now("s").await.unwrap();
        }
        assert_eq!(scheduler.schedule("s").await.unwrap().entry.cron, "0 */2 * * *");
    }

    #[tokio::test]
    async fn test_check_due_claims_and_skips_overlap() {
        let scheduler = scheduler(Arc::default(), Arc::default(), 10);
        scheduler.add_schedule(entry("hourly")).await.unwrap();
        scheduler.add_schedule(entry("off").disabled()).await.unwrap();

        let later = Utc::now() + chrono::Duration::hours(2);
        assert_eq!(scheduler.check_due(later).await, vec!["hourly".to_string()]);
        assert!(scheduler.schedule("hourly").await.unwrap().running);

        // Still in flight an hour later: the occurrence is skipped.
        let much_later = later + chrono::Duration::hours(1);
        assert!(scheduler.check_due(much_later).await.is_empty());
        assert!(scheduler.next_fire_time("off").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reenable_does_not_catch_up_missed_occurrences() {
        let scheduler = scheduler(Arc::default(), Arc::default(), 10);
        scheduler
            .add_schedule(ScheduleEntry::new("yearly", "0 0 0 1 1 *", TaskKind::Test))
            .await
            .unwrap();
        scheduler.set_enabled("yearly", false).await.unwrap();
        scheduler.slots.write().await.get_mut("yearly").unwrap().reference =
            Utc::now() - chrono::Duration::days(400);

        scheduler.set_enabled("yearly", true).await.unwrap();
        let now = Utc::now();
        assert!(scheduler.next_fire_time("yearly").await.unwrap().unwrap() > now);
        assert!(scheduler.check_due(now).await.is_empty());
    }

    #[tokio::test]
    async fn test_cadence_update_does_not_catch_up_missed_occurrences() {
        let scheduler = scheduler(Arc::default(), Arc::default(), 10);
        scheduler.add_schedule(entry("s")).await.unwrap();
        scheduler.slots.write().await.get_mut("s").unwrap().reference =
            Utc::now() - chrono::Duration::days(400);

        scheduler.update_schedule("s", "0 0 0 1 1 *").await.unwrap();
        let now = Utc::now();
        assert!(scheduler.next_fire_time("s").await.unwrap().unwrap() > now);
        assert!(scheduler.check_due(now).await.is_empty());
    }

    #[tokio::test]
    async fn test_start_refuses_second_loop() {
        let scheduler = scheduler(Arc::default(), Arc::default(), 10);
        let cancel = CancellationToken::new();
        let first = scheduler.start(cancel.clone()).unwrap();
        assert!(matches!(
            scheduler.start(cancel.clone()),
            Err(DomainError::ValidationFailed(_))
        ));

        // Restarting right after stop leaves only the new loop alive.
        scheduler.stop();
        let second = scheduler.start(cancel.clone()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), first)
            .await
            .expect("stale loop exits")
            .unwrap();
        assert!(scheduler.is_running());

        cancel.cancel();
        second.await.unwrap();
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_update_and_toggle() {
        let scheduler = scheduler(Arc::default(), Arc::default(), 10);
        scheduler.add_schedule(entry("s")).await.unwrap();

        assert!(scheduler.update_schedule("s", "nonsense").await.is_err());
        scheduler.update_schedule("s", "30 6 * * *").await.unwrap();
        let next = scheduler.next_fire_time("s").await.unwrap().unwrap();
        assert_eq!(next.format("%H:%M").to_string(), "06:30");

        scheduler.set_enabled("s", false).await.unwrap();
        assert!(scheduler.next_fire_time("s").await.unwrap().is_none());
        assert!(matches!(
            scheduler.set_enabled("missing", true).await,
            Err(DomainError::ScheduleNotFound(_))
        ));

        let removed = scheduler.remove_schedule("s").await.unwrap();
        assert_eq!(removed.name, "s");
    }
}
