//! Engine timing and routing configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Who decides the action after an AI step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingPolicy {
    /// Steps with action rules are routed by the local rule evaluator; the
    /// service's action is only a hint.
    #[default]
    PreferLocalRules,
    /// The service's action is always used.
    TrustService,
}

/// Configuration for a pipeline run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Pause before an AI step is sent to the reasoning service.
    pub arrival_delay: Duration,
    /// How long an `LLM_ERROR` is shown before the run skips ahead.
    pub grace_delay: Duration,
    pub routing: RoutingPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            arrival_delay: Duration::from_millis(1000),
            grace_delay: Duration::from_millis(3000),
            routing: RoutingPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_routing(mut self, routing: RoutingPolicy) -> Self {
        self.routing = routing;
        self
    }
}
