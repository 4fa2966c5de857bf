//! Application services: the orchestration core.

pub mod agent_pool;
pub mod builtin_workflows;
pub mod change_watcher;
pub mod dispatcher;
pub mod event_bus;
pub mod event_factory;
pub mod event_store;
pub mod orchestrator;
pub mod scheduler;
pub mod step_registry;
pub mod workflow_engine;
pub mod workflow_policy;

pub use agent_pool::{AgentPool, PoolBounds};
pub use change_watcher::{BlockOutcome, ChangeReport, ChangeWatcher, WatcherSettings};
pub use dispatcher::{Dispatcher, DispatcherConfig, ShutdownReport, TaskLifecycle, TickReport};
pub use event_bus::{
    EventBus, EventBusConfig, EventCategory, EventId, EventPayload, EventSeverity, SequenceNumber,
    UnifiedEvent,
};
pub use event_store::{EventQuery, EventStore, EventStoreError, InMemoryEventStore, JsonlEventStore};
pub use orchestrator::{Orchestrator, OrchestratorStatus};
pub use scheduler::{ScheduleView, Scheduler, SchedulerSettings};
pub use step_registry::StepRegistry;
pub use workflow_engine::{TriggerOutcome, WorkflowEngine, WorkflowEngineConfig};
pub use workflow_policy::WorkflowPolicy;
