//! Domain models.

pub mod change;
pub mod config;
pub mod metrics;
pub mod outcome;
pub mod policy;
pub mod queue;
pub mod schedule;
pub mod task;
pub mod worker;
pub mod workflow;

pub use change::{ChangeAssessment, ChangeType, CommitInfo, FileChange, MergeBlock, Severity};
pub use config::{
    Config, ExecutorConfig, LoggingConfig, PoolConfig, SchedulerConfig, WatcherConfig,
    WorkflowConfig,
};
pub use metrics::{MetricsTracker, OrchestratorMetrics};
pub use outcome::{AnalysisOutcome, FixOutcome, ReportOutcome, TaskOutcome, TestOutcome};
pub use policy::{default_policy_rules, LifecycleEvent, PolicyRule};
pub use queue::{QueueItem, TaskQueue};
pub use schedule::{
    parse_cron, CadenceSuggestion, ScheduleEntry, ScheduleExecution, ScheduleHistory,
    ScheduleRunStatus, ScheduleStats,
};
pub use task::{
    AnalysisPayload, FixPayload, ReportPayload, Task, TaskKind, TaskPayload, TaskPriority,
    TaskSource, TaskStatus, TestPayload,
};
pub use worker::{WorkerId, WorkerSnapshot};
pub use workflow::{
    ExecutionStatus, HookDefinition, StepCondition, StepDefinition, StepKind, StepRecord,
    StepStatus, WorkflowContext, WorkflowDefinition, WorkflowExecution, WorkflowTrigger,
};
