//! Scenario execution engine for document-approval pipelines.
//!
//! This crate implements the docflow run loop: a pure state machine driven by
//! one event queue, the rule evaluator that routes AI-step results, the prompt
//! compiler, scenario and knowledge sources, and scenario validation.

pub mod config;
pub mod events;
pub mod knowledge;
pub mod machine;
pub mod prompt;
pub mod rules;
pub mod runner;
pub mod scenario;
pub mod validation;

pub use config::{EngineConfig, RoutingPolicy};
pub use events::{EventEmitter, RunEvent, TimedEvent};
pub use knowledge::{FsKnowledgeSource, KnowledgeSource, MemoryKnowledge};
pub use machine::{
    decide, DecisionSource, Effect, EngineEvent, PipelineMachine, RoutingDecision, RunState,
};
pub use prompt::{assemble, KnowledgeSection, PromptCompiler};
pub use rules::{evaluate_rules, matching_rule, rule_matches, MetricSnapshot};
pub use runner::{PipelineRunner, RunnerHandle};
pub use scenario::{load_scenario, BuiltinScenarios, FsScenarioSource, ScenarioSource};
pub use validation::{
    validate_or_raise, validate_rules, validate_scenario, Diagnostic, LintRule, RuleSet, Severity,
};
