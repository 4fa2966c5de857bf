//! Conductor - test automation job orchestrator
//!
//! Conductor dispatches test, analysis, fix and report tasks to a bounded
//! pool of workers in priority order, runs multi-step workflows with retries
//! and conditions, fires cron schedules, and watches a repository for new
//! commits, optionally blocking merges when checks fail.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, errors and the ports collaborators implement
//! - **Service Layer** (`services`): dispatcher, agent pool, workflow engine,
//!   scheduler, change watcher and the orchestrator facade that wires them
//! - **Adapters** (`adapters`): command executor, heuristic advisor, git change
//!   source and merge-block markers
//! - **Infrastructure Layer** (`infrastructure`): configuration loading and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use conductor::adapters::{CommandExecutor, HeuristicAdvisor};
//! use conductor::domain::models::{Config, TaskKind, TaskPayload, TaskPriority};
//! use conductor::services::{EventBus, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let orchestrator = Orchestrator::new(
//!         config.clone(),
//!         Arc::new(CommandExecutor::new(config.executor.clone())),
//!         Arc::new(HeuristicAdvisor::default()),
//!         Arc::new(EventBus::default()),
//!     )
//!     .await?;
//!     orchestrator.start().await?;
//!     orchestrator
//!         .submit(TaskKind::Test, TaskPriority::High, TaskPayload::default_for(TaskKind::Test))
//!         .await?;
//!     orchestrator.stop().await;
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{DomainError, DomainResult, ExecutorError, PoolError};
pub use domain::models::{
    Config, Task, TaskKind, TaskOutcome, TaskPayload, TaskPriority, TaskSource, TaskStatus,
    WorkflowDefinition, WorkflowExecution,
};
pub use domain::ports::{Advisor, ChangeSource, MergeGate, TaskExecutor, TaskSink};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{Dispatcher, Orchestrator, Scheduler, WorkflowEngine};
