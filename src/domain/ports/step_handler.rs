//! Step handler port - named, registered workflow step behaviour.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::StepError;
use crate::domain::models::WorkflowContext;

/// Everything a handler may look at.
#[derive(Debug, Clone, Copy)]
pub struct StepInput<'a> {
    pub workflow: &'a str,
    pub step: &'a str,
    pub params: &'a Value,
    pub context: &'a WorkflowContext,
    pub attempt: u32,
}

#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn run(&self, input: StepInput<'_>) -> Result<Value, StepError>;
}
