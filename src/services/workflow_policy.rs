//! Table-driven selection of the workflow to run after a task finishes.

use crate::domain::models::{default_policy_rules, LifecycleEvent, PolicyRule, Task};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowPolicy {
    rules: Vec<PolicyRule>,
}

impl Default for WorkflowPolicy {
    fn default() -> Self {
        Self::new(default_policy_rules())
    }
}

impl WorkflowPolicy {
    pub fn new(rules: Vec<PolicyRule>) -> Self {
        Self { rules }
    }

    /// Configured rules, or the built-in table when none are configured.
    pub fn from_config(rules: Option<&[PolicyRule]>) -> Self {
        rules.map_or_else(Self::default, |rules| Self::new(rules.to_vec()))
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    /// Workflow for `task` after `event`. The first matching rule wins.
    pub fn select(&self, event: LifecycleEvent, task: &Task) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.matches(event, task))
            .map(|rule| rule.workflow.as_str())
    }
}
