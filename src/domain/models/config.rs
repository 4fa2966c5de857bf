use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::policy::PolicyRule;
use super::schedule::{default_schedules, ScheduleEntry};

/// Main configuration structure for conductor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Directory holding daemon state, snapshots and the audit log
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Agent pool and dispatcher configuration
    #[serde(default)]
    pub pool: PoolConfig,

    /// Workflow engine policy flags
    #[serde(default)]
    pub workflow: WorkflowConfig,

    /// Cron scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Change watcher configuration
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Commands run by the command executor
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".conductor")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            pool: PoolConfig::default(),
            workflow: WorkflowConfig::default(),
            scheduler: SchedulerConfig::default(),
            watcher: WatcherConfig::default(),
            executor: ExecutorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn events_path(&self) -> PathBuf {
        self.state_dir.join("events.jsonl")
    }

    pub fn daemon_state_path(&self) -> PathBuf {
        self.state_dir.join("daemon.json")
    }

    pub fn status_snapshot_path(&self) -> PathBuf {
        self.state_dir.join("status.json")
    }
}

/// Agent pool bounds and dispatch loop timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PoolConfig {
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Seconds a worker may sit idle before it is retired
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Queue depth above which enqueues raise a backpressure warning
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Grace period for running tasks at shutdown
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,

    /// Per-task executor timeout (none when unset)
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: Option<u64>,

    /// Number of terminal tasks kept for `status` and `history`
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Number of terminal tasks in the rolling success rate
    #[serde(default = "default_metrics_window")]
    pub metrics_window: usize,
}

const fn default_min_workers() -> usize {
    2
}

const fn default_max_workers() -> usize {
    5
}

const fn default_idle_timeout_secs() -> u64 {
    300
}

const fn default_max_queue_size() -> usize {
    100
}

const fn default_tick_interval_ms() -> u64 {
    1000
}

const fn default_drain_timeout_secs() -> u64 {
    60
}

#[allow(clippy::unnecessary_wraps)]
const fn default_task_timeout_secs() -> Option<u64> {
    Some(1800)
}

const fn default_history_limit() -> usize {
    1000
}

const fn default_metrics_window() -> usize {
    100
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: default_min_workers(),
            max_workers: default_max_workers(),
            idle_timeout_secs: default_idle_timeout_secs(),
            max_queue_size: default_max_queue_size(),
            tick_interval_ms: default_tick_interval_ms(),
            drain_timeout_secs: default_drain_timeout_secs(),
            task_timeout_secs: default_task_timeout_secs(),
            history_limit: default_history_limit(),
            metrics_window: default_metrics_window(),
        }
    }
}

impl PoolConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }
}

/// Workflow engine policy flags
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorkflowConfig {
    /// Run policy-selected workflows when tasks complete or fail
    #[serde(default = "default_true")]
    pub auto_trigger: bool,

    /// Enqueue a fix task when a critical task fails
    #[serde(default = "default_true")]
    pub auto_create_followup_task: bool,

    /// Always wait on critical change checks and block merges on failure
    #[serde(default = "default_true")]
    pub block_on_critical_failure: bool,

    /// Retries for steps that do not declare their own budget
    #[serde(default = "default_retry_attempts")]
    pub default_retry_attempts: u32,

    /// One backoff unit; retry `n` waits `2^n` units
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,

    /// How long task-running steps wait for their task
    #[serde(default = "default_step_task_timeout_secs")]
    pub step_task_timeout_secs: u64,

    /// Number of finished executions kept in memory
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Replaces the built-in selection table when set
    #[serde(default)]
    pub rules: Option<Vec<PolicyRule>>,
}

const fn default_true() -> bool {
    true
}

const fn default_retry_attempts() -> u32 {
    3
}

const fn default_backoff_unit_ms() -> u64 {
    1000
}

const fn default_step_task_timeout_secs() -> u64 {
    1800
}

const fn default_max_history() -> usize {
    100
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            auto_trigger: true,
            auto_create_followup_task: true,
            block_on_critical_failure: true,
            default_retry_attempts: default_retry_attempts(),
            backoff_unit_ms: default_backoff_unit_ms(),
            step_task_timeout_secs: default_step_task_timeout_secs(),
            max_history: default_max_history(),
            rules: None,
        }
    }
}

/// Cron scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// How long a fire waits for its task before recording a timeout
    #[serde(default = "default_task_wait_timeout_secs")]
    pub task_wait_timeout_secs: u64,

    /// Executions kept per schedule for the success rate
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Suggestions fire when the success rate drops strictly below this
    #[serde(default = "default_success_threshold")]
    pub success_threshold: f64,

    /// Executions required before the advisor is consulted
    #[serde(default = "default_min_executions")]
    pub min_executions_for_advice: usize,

    /// Apply advisor suggestions to the schedule automatically
    #[serde(default)]
    pub auto_apply_suggestions: bool,

    #[serde(default = "default_schedules")]
    pub schedules: Vec<ScheduleEntry>,
}

const fn default_task_wait_timeout_secs() -> u64 {
    3600
}

const fn default_history_window() -> usize {
    10
}

const fn default_success_threshold() -> f64 {
    0.7
}

const fn default_min_executions() -> usize {
    3
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_ms: default_tick_interval_ms(),
            task_wait_timeout_secs: default_task_wait_timeout_secs(),
            history_window: default_history_window(),
            success_threshold: default_success_threshold(),
            min_executions_for_advice: default_min_executions(),
            auto_apply_suggestions: false,
            schedules: default_schedules(),
        }
    }
}

/// Change watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WatcherConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_repo_path")]
    pub repo_path: PathBuf,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// How long a blocking check waits for its task
    #[serde(default = "default_block_timeout_secs")]
    pub block_timeout_secs: u64,

    #[serde(default = "default_protected_branches")]
    pub protected_branches: Vec<String>,

    /// Path prefixes the heuristic advisor treats as critical
    #[serde(default = "default_critical_paths")]
    pub critical_paths: Vec<String>,

    /// Where the merge-block marker is written (none keeps it in memory only)
    #[serde(default = "default_merge_block_file")]
    pub merge_block_file: Option<PathBuf>,

    /// Also react to working-tree file events, not only new commits
    #[serde(default = "default_watch_files")]
    pub watch_files: bool,

    /// Directories under `repo_path` watched for file events
    #[serde(default = "default_watch_paths")]
    pub watch_paths: Vec<PathBuf>,

    /// Path components whose events are dropped
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,

    /// Quiet period that collapses a burst of file events
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_repo_path() -> PathBuf {
    PathBuf::from(".")
}

const fn default_poll_interval_secs() -> u64 {
    10
}

const fn default_block_timeout_secs() -> u64 {
    600
}

fn default_protected_branches() -> Vec<String> {
    ["main", "master", "production", "release"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

fn default_critical_paths() -> Vec<String> {
    ["src/core/", "src/auth/", "src/payments/", "migrations/"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

const fn default_watch_files() -> bool {
    true
}

fn default_watch_paths() -> Vec<PathBuf> {
    vec![PathBuf::from("src")]
}

fn default_ignore_patterns() -> Vec<String> {
    [".git", "target", "node_modules", ".conductor"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

const fn default_debounce_ms() -> u64 {
    1000
}

#[allow(clippy::unnecessary_wraps)]
fn default_merge_block_file() -> Option<PathBuf> {
    Some(PathBuf::from(".conductor/MERGE_BLOCKED"))
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            repo_path: default_repo_path(),
            poll_interval_secs: default_poll_interval_secs(),
            block_timeout_secs: default_block_timeout_secs(),
            protected_branches: default_protected_branches(),
            critical_paths: default_critical_paths(),
            merge_block_file: default_merge_block_file(),
            watch_files: default_watch_files(),
            watch_paths: default_watch_paths(),
            ignore_patterns: default_ignore_patterns(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// Shell commands run per task kind. Unset kinds are simulated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExecutorConfig {
    #[serde(default)]
    pub test_command: Option<String>,

    #[serde(default)]
    pub analysis_command: Option<String>,

    #[serde(default)]
    pub fix_command: Option<String>,

    #[serde(default)]
    pub report_command: Option<String>,

    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files (stderr only when unset)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Rotation policy for file logs (daily, hourly, never)
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}
