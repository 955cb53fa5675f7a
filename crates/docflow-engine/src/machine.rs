//! Pipeline state machine.
//!
//! [`PipelineMachine::handle`] is the only place run state changes. It takes
//! one [`EngineEvent`] at a time and returns the [`Effect`]s the driver must
//! carry out: timers to arm, reasoning calls to start, events to publish. It
//! performs no I/O and never sleeps, so every transition can be tested
//! synchronously.
//!
//! Timers and reasoning calls are tagged with the run id, and timers also with
//! a generation number. Pausing, resetting, or loading invalidates whatever is
//! outstanding; late arrivals are dropped.

use std::sync::Arc;
use std::time::Duration;

use docflow_types::{
    ActionId, AiStep, ArtifactStore, DocflowError, Result, RunStatus, Scenario, Step,
    StructuredResult,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{EngineConfig, RoutingPolicy};
use crate::events::RunEvent;
use crate::rules::{matching_rule, MetricSnapshot};

// ---------------------------------------------------------------------------
// Routing decision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    LocalRules,
    Service,
}

/// The action the run will take when the current result is acknowledged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub action: ActionId,
    pub source: DecisionSource,
    /// What the reasoning service itself chose.
    pub service_action: ActionId,
    /// Id of the matched rule, when a rule decided.
    pub matched_rule: Option<String>,
}

/// Decide the action for a successful AI step under `policy`.
pub fn decide(step: &AiStep, result: &StructuredResult, policy: RoutingPolicy) -> RoutingDecision {
    let service_action = result.execution_command.action_id;
    if policy == RoutingPolicy::TrustService || step.action_rules.is_empty() {
        return RoutingDecision {
            action: service_action,
            source: DecisionSource::Service,
            service_action,
            matched_rule: None,
        };
    }

    let snapshot = MetricSnapshot::from_result(result);
    let rule = matching_rule(&snapshot, &step.action_rules);
    let action = rule.map_or(step.default_action, |r| r.action_id);
    if action != service_action {
        tracing::info!(
            step = %step.step_id,
            local = %action,
            service = %service_action,
            "Local rules override the service's action"
        );
    }
    RoutingDecision {
        action,
        source: DecisionSource::LocalRules,
        service_action,
        matched_rule: rule.and_then(|r| r.id.clone()),
    }
}

// ---------------------------------------------------------------------------
// Events and effects
// ---------------------------------------------------------------------------

/// Inputs to the state machine. The first six come from the user; the last
/// two are produced by the driver when a timer or reasoning call finishes.
#[derive(Debug)]
pub enum EngineEvent {
    Load(Arc<Scenario>),
    Start,
    Pause,
    Resume,
    Reset,
    Acknowledge,
    TimerFired {
        run_id: Uuid,
        generation: u64,
    },
    ReasoningResolved {
        run_id: Uuid,
        step_index: usize,
        prompt: String,
        outcome: std::result::Result<StructuredResult, DocflowError>,
    },
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::Load(_) => "load",
            EngineEvent::Start => "start",
            EngineEvent::Pause => "pause",
            EngineEvent::Resume => "resume",
            EngineEvent::Reset => "reset",
            EngineEvent::Acknowledge => "acknowledge",
            EngineEvent::TimerFired { .. } => "timer_fired",
            EngineEvent::ReasoningResolved { .. } => "reasoning_resolved",
        }
    }
}

/// Work the driver must perform on behalf of the state machine.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Deliver `TimerFired { run_id, generation }` after `delay`.
    ScheduleTimer {
        run_id: Uuid,
        generation: u64,
        delay: Duration,
    },
    /// Compile the prompt for `step` and call the reasoning service, then
    /// deliver `ReasoningResolved`.
    InvokeReasoning {
        run_id: Uuid,
        step_index: usize,
        step: AiStep,
        scenario: Arc<Scenario>,
        artifacts: ArtifactStore,
    },
    Notify(RunEvent),
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

/// Everything known about the current run.
#[derive(Debug, Clone)]
pub struct RunState {
    pub run_id: Uuid,
    pub status: RunStatus,
    /// Always within `0..=len(steps)`.
    pub index: usize,
    pub last_result: Option<StructuredResult>,
    pub last_decision: Option<RoutingDecision>,
    /// The most recent compiled prompt.
    pub last_prompt: Option<String>,
    pub last_error: Option<String>,
    pub artifacts: ArtifactStore,
    pub time_saved_minutes: f64,
    /// Number of index increments in this run.
    pub steps_advanced: usize,
    in_flight: bool,
    timer_generation: u64,
    resume_to: Option<RunStatus>,
}

impl RunState {
    fn fresh() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            status: RunStatus::Idle,
            index: 0,
            last_result: None,
            last_decision: None,
            last_prompt: None,
            last_error: None,
            artifacts: ArtifactStore::new(),
            time_saved_minutes: 0.0,
            steps_advanced: 0,
            in_flight: false,
            timer_generation: 0,
            resume_to: None,
        }
    }

    /// Whether a reasoning call for this run has not resolved yet.
    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// The state a paused run returns to on resume.
    pub fn resume_to(&self) -> Option<RunStatus> {
        self.resume_to
    }
}

// ---------------------------------------------------------------------------
// PipelineMachine
// ---------------------------------------------------------------------------

pub struct PipelineMachine {
    config: EngineConfig,
    scenario: Option<Arc<Scenario>>,
    state: RunState,
}

impl PipelineMachine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            scenario: None,
            state: RunState::fresh(),
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn scenario(&self) -> Option<&Arc<Scenario>> {
        self.scenario.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.scenario.as_ref()?.step(self.state.index)
    }

    /// Apply one event. External commands that make no sense in the current
    /// status are rejected with `InvalidTransition` and change nothing.
    /// Stale timers and responses are dropped without error.
    pub fn handle(&mut self, event: EngineEvent) -> Result<Vec<Effect>> {
        let mut fx = Vec::new();
        match event {
            EngineEvent::Load(scenario) => self.on_load(scenario, &mut fx),
            EngineEvent::Start => self.on_start(&mut fx)?,
            EngineEvent::Pause => self.on_pause(&mut fx)?,
            EngineEvent::Resume => self.on_resume(&mut fx)?,
            EngineEvent::Reset => self.on_reset(&mut fx),
            EngineEvent::Acknowledge => self.on_acknowledge(&mut fx)?,
            EngineEvent::TimerFired { run_id, generation } => {
                self.on_timer(run_id, generation, &mut fx)
            }
            EngineEvent::ReasoningResolved {
                run_id,
                step_index,
                prompt,
                outcome,
            } => self.on_resolved(run_id, step_index, prompt, outcome, &mut fx),
        }
        Ok(fx)
    }

    // ---- commands ----

    fn on_load(&mut self, scenario: Arc<Scenario>, fx: &mut Vec<Effect>) {
        fx.push(Effect::Notify(RunEvent::ScenarioLoaded {
            scenario_id: scenario.scenario_id.clone(),
            step_count: scenario.len(),
        }));
        self.scenario = Some(scenario);
        self.restart(fx);
    }

    fn on_start(&mut self, fx: &mut Vec<Effect>) -> Result<()> {
        let Some(scenario) = self.scenario.clone() else {
            return Err(DocflowError::NoScenarioLoaded);
        };
        match self.state.status {
            RunStatus::Idle => {}
            RunStatus::Completed => self.restart(fx),
            status => return Err(self.invalid(status, "start")),
        }
        tracing::info!(
            run_id = %self.state.run_id,
            scenario = %scenario.scenario_id,
            steps = scenario.len(),
            "Run started"
        );
        self.enter_step(fx);
        Ok(())
    }

    fn on_pause(&mut self, fx: &mut Vec<Effect>) -> Result<()> {
        let status = self.state.status;
        match status {
            RunStatus::Animating
            | RunStatus::WaitingLlm
            | RunStatus::ShowingResult
            | RunStatus::LlmError => {
                self.state.resume_to = Some(status);
                self.state.timer_generation += 1;
                self.set_status(RunStatus::Paused, fx);
                Ok(())
            }
            _ => Err(self.invalid(status, "pause")),
        }
    }

    fn on_resume(&mut self, fx: &mut Vec<Effect>) -> Result<()> {
        if self.state.status != RunStatus::Paused {
            return Err(self.invalid(self.state.status, "resume"));
        }
        match self.state.resume_to.take() {
            Some(RunStatus::ShowingResult) => self.set_status(RunStatus::ShowingResult, fx),
            Some(RunStatus::WaitingLlm) if self.state.in_flight => {
                self.set_status(RunStatus::WaitingLlm, fx)
            }
            Some(RunStatus::LlmError) => {
                self.set_status(RunStatus::LlmError, fx);
                let delay = self.config.grace_delay;
                fx.push(self.schedule(delay));
            }
            // Animating, or an interrupted wait with nothing left in flight:
            // restart the current step's timer from scratch.
            _ => {
                self.set_status(RunStatus::Animating, fx);
                let delay = self.step_delay();
                fx.push(self.schedule(delay));
            }
        }
        Ok(())
    }

    fn on_reset(&mut self, fx: &mut Vec<Effect>) {
        tracing::info!(run_id = %self.state.run_id, "Run reset");
        self.restart(fx);
    }

    fn on_acknowledge(&mut self, fx: &mut Vec<Effect>) -> Result<()> {
        if self.state.status != RunStatus::ShowingResult {
            return Err(self.invalid(self.state.status, "acknowledge"));
        }
        let action = self
            .state
            .last_decision
            .as_ref()
            .map_or(ActionId::ContinueProcess, |d| d.action);
        if action.is_terminal() {
            tracing::info!(run_id = %self.state.run_id, action = %action, "Run ended by routing action");
            self.complete(true, fx);
        } else {
            self.advance(fx);
        }
        Ok(())
    }

    // ---- internal events ----

    fn on_timer(&mut self, run_id: Uuid, generation: u64, fx: &mut Vec<Effect>) {
        if run_id != self.state.run_id || generation != self.state.timer_generation {
            tracing::debug!(%run_id, generation, "Stale timer dropped");
            return;
        }
        match self.state.status {
            RunStatus::Animating => match self.current_step().cloned() {
                Some(Step::Ai(step)) => self.invoke(step, fx),
                Some(Step::Standard(_)) => self.advance(fx),
                None => self.complete(false, fx),
            },
            RunStatus::LlmError => {
                tracing::info!(run_id = %run_id, index = self.state.index, "Skipping failed AI step");
                self.advance(fx);
            }
            status => tracing::debug!(%status, "Timer fired with nothing to do"),
        }
    }

    fn on_resolved(
        &mut self,
        run_id: Uuid,
        step_index: usize,
        prompt: String,
        outcome: std::result::Result<StructuredResult, DocflowError>,
        fx: &mut Vec<Effect>,
    ) {
        if run_id != self.state.run_id || !self.state.in_flight || step_index != self.state.index {
            tracing::debug!(%run_id, step_index, "Stale reasoning response dropped");
            fx.push(Effect::Notify(RunEvent::StaleResponseDiscarded {
                stale_run_id: run_id,
                current_run_id: self.state.run_id,
            }));
            return;
        }
        self.state.in_flight = false;
        self.state.last_prompt = Some(prompt);

        let Some(step) = self.current_step().and_then(Step::as_ai).cloned() else {
            return;
        };
        let paused = self.state.status == RunStatus::Paused;

        match outcome {
            Ok(result) => {
                if let (Some(key), Some(value)) = (step.output_artifact_key.as_deref(), result.artifact()) {
                    if self.state.artifacts.insert(key, value) {
                        fx.push(Effect::Notify(RunEvent::ArtifactWritten {
                            run_id,
                            key: key.to_string(),
                            value: value.to_string(),
                        }));
                    }
                }
                self.state.time_saved_minutes += result.time_saved_minutes.unwrap_or(0.0);
                let decision = decide(&step, &result, self.config.routing);
                fx.push(Effect::Notify(RunEvent::ReasoningSucceeded {
                    run_id,
                    step_id: step.step_id.clone(),
                    action: decision.action,
                    source: decision.source,
                }));
                self.state.last_result = Some(result);
                self.state.last_decision = Some(decision);
                self.state.last_error = None;
                if paused {
                    self.state.resume_to = Some(RunStatus::ShowingResult);
                } else {
                    self.set_status(RunStatus::ShowingResult, fx);
                }
            }
            Err(e) => {
                tracing::warn!(run_id = %run_id, step = %step.step_id, error = %e, "AI step failed");
                fx.push(Effect::Notify(RunEvent::ReasoningFailed {
                    run_id,
                    step_id: step.step_id.clone(),
                    error: e.to_string(),
                }));
                self.state.last_result = None;
                self.state.last_decision = None;
                self.state.last_error = Some(e.to_string());
                if paused {
                    self.state.resume_to = Some(RunStatus::LlmError);
                } else {
                    self.set_status(RunStatus::LlmError, fx);
                    let delay = self.config.grace_delay;
                    fx.push(self.schedule(delay));
                }
            }
        }
    }

    // ---- helpers ----

    fn invalid(&self, status: RunStatus, event: &str) -> DocflowError {
        DocflowError::InvalidTransition {
            status,
            event: event.to_string(),
        }
    }

    fn set_status(&mut self, to: RunStatus, fx: &mut Vec<Effect>) {
        let from = self.state.status;
        if from == to {
            return;
        }
        self.state.status = to;
        tracing::debug!(run_id = %self.state.run_id, %from, %to, index = self.state.index, "Status changed");
        fx.push(Effect::Notify(RunEvent::StatusChanged {
            run_id: self.state.run_id,
            from,
            to,
            step_index: self.state.index,
        }));
    }

    fn schedule(&mut self, delay: Duration) -> Effect {
        self.state.timer_generation += 1;
        Effect::ScheduleTimer {
            run_id: self.state.run_id,
            generation: self.state.timer_generation,
            delay,
        }
    }

    /// Wait before the current step acts: the step's own delay for a standard
    /// step, the arrival delay for an AI step.
    fn step_delay(&self) -> Duration {
        match self.current_step() {
            Some(Step::Standard(s)) => Duration::from_millis(s.animation_delay_ms),
            _ => self.config.arrival_delay,
        }
    }

    /// New run id, back to `IDLE` at index 0 with nothing carried over.
    fn restart(&mut self, fx: &mut Vec<Effect>) {
        let generation = self.state.timer_generation + 1;
        let from = self.state.status;
        self.state = RunState {
            timer_generation: generation,
            ..RunState::fresh()
        };
        if from != RunStatus::Idle {
            fx.push(Effect::Notify(RunEvent::StatusChanged {
                run_id: self.state.run_id,
                from,
                to: RunStatus::Idle,
                step_index: 0,
            }));
        }
    }

    fn enter_step(&mut self, fx: &mut Vec<Effect>) {
        let Some(step) = self.current_step() else {
            self.complete(false, fx);
            return;
        };
        let (step_id, is_ai) = (step.step_id().to_string(), step.is_ai());
        fx.push(Effect::Notify(RunEvent::StepEntered {
            run_id: self.state.run_id,
            step_index: self.state.index,
            step_id,
            is_ai,
        }));
        self.set_status(RunStatus::Animating, fx);
        let delay = self.step_delay();
        fx.push(self.schedule(delay));
    }

    fn advance(&mut self, fx: &mut Vec<Effect>) {
        let len = self.scenario.as_ref().map_or(0, |s| s.len());
        self.state.index = (self.state.index + 1).min(len);
        self.state.steps_advanced += 1;
        self.enter_step(fx);
    }

    fn complete(&mut self, returned_to_author: bool, fx: &mut Vec<Effect>) {
        self.state.timer_generation += 1;
        self.set_status(RunStatus::Completed, fx);
        tracing::info!(
            run_id = %self.state.run_id,
            returned_to_author,
            time_saved_minutes = self.state.time_saved_minutes,
            "Run completed"
        );
        fx.push(Effect::Notify(RunEvent::RunCompleted {
            run_id: self.state.run_id,
            returned_to_author,
            time_saved_minutes: self.state.time_saved_minutes,
        }));
    }

    fn invoke(&mut self, step: AiStep, fx: &mut Vec<Effect>) {
        if self.state.in_flight {
            tracing::warn!(run_id = %self.state.run_id, step = %step.step_id, "Reasoning call already in flight");
            return;
        }
        let Some(scenario) = self.scenario.clone() else {
            return;
        };
        self.state.in_flight = true;
        self.set_status(RunStatus::WaitingLlm, fx);
        fx.push(Effect::Notify(RunEvent::ReasoningRequested {
            run_id: self.state.run_id,
            step_id: step.step_id.clone(),
        }));
        fx.push(Effect::InvokeReasoning {
            run_id: self.state.run_id,
            step_index: self.state.index,
            step,
            scenario,
            artifacts: self.state.artifacts.clone(),
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
