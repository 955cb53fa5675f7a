//! Async driver for the pipeline state machine.
//!
//! The runner owns the single event queue. User commands (directly or through
//! a [`RunnerHandle`]), timer expiries, and reasoning results all arrive on it
//! and are applied to the [`PipelineMachine`] one at a time. Effects returned
//! by the machine are carried out here: timers and reasoning calls become
//! spawned tasks that post their completion back onto the queue.

use std::sync::Arc;

use docflow_llm::ReasoningClient;
use docflow_types::{DocflowError, Result, RunStatus, Scenario, Step};
use tokio::sync::{broadcast, mpsc};

use crate::config::EngineConfig;
use crate::events::{EventEmitter, TimedEvent};
use crate::knowledge::KnowledgeSource;
use crate::machine::{Effect, EngineEvent, PipelineMachine, RunState};
use crate::prompt::PromptCompiler;
use crate::scenario::{load_scenario, ScenarioSource};
use crate::validation::Diagnostic;

// ---------------------------------------------------------------------------
// RunnerHandle
// ---------------------------------------------------------------------------

/// Sends user commands onto a runner's event queue from another task.
#[derive(Clone)]
pub struct RunnerHandle {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl RunnerHandle {
    fn send(&self, event: EngineEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| DocflowError::Other("runner has shut down".into()))
    }

    pub fn start(&self) -> Result<()> {
        self.send(EngineEvent::Start)
    }

    pub fn pause(&self) -> Result<()> {
        self.send(EngineEvent::Pause)
    }

    pub fn resume(&self) -> Result<()> {
        self.send(EngineEvent::Resume)
    }

    pub fn reset(&self) -> Result<()> {
        self.send(EngineEvent::Reset)
    }

    pub fn acknowledge(&self) -> Result<()> {
        self.send(EngineEvent::Acknowledge)
    }
}

// ---------------------------------------------------------------------------
// PipelineRunner
// ---------------------------------------------------------------------------

pub struct PipelineRunner {
    machine: PipelineMachine,
    client: Arc<ReasoningClient>,
    compiler: PromptCompiler,
    scenarios: Arc<dyn ScenarioSource>,
    emitter: EventEmitter,
    tx: mpsc::UnboundedSender<EngineEvent>,
    rx: mpsc::UnboundedReceiver<EngineEvent>,
}

impl PipelineRunner {
    pub fn new(
        config: EngineConfig,
        client: Arc<ReasoningClient>,
        knowledge: Arc<dyn KnowledgeSource>,
        scenarios: Arc<dyn ScenarioSource>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            machine: PipelineMachine::new(config),
            client,
            compiler: PromptCompiler::new(knowledge),
            scenarios,
            emitter: EventEmitter::default(),
            tx,
            rx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimedEvent> {
        self.emitter.subscribe()
    }

    pub fn handle(&self) -> RunnerHandle {
        RunnerHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn state(&self) -> &RunState {
        self.machine.state()
    }

    pub fn status(&self) -> RunStatus {
        self.machine.state().status
    }

    pub fn scenario(&self) -> Option<&Arc<Scenario>> {
        self.machine.scenario()
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.machine.current_step()
    }

    // ---- commands ----

    /// Fetch, validate, and install a scenario. On any failure the current
    /// run is left exactly as it was.
    pub async fn load_scenario(&mut self, scenario_id: &str) -> Result<Vec<Diagnostic>> {
        let (scenario, diagnostics) = load_scenario(self.scenarios.as_ref(), scenario_id)
            .await
            .map_err(|e| {
                tracing::warn!(scenario = %scenario_id, error = %e, "Scenario load failed");
                e
            })?;
        tracing::info!(scenario = %scenario.scenario_id, steps = scenario.len(), "Scenario loaded");
        self.dispatch(EngineEvent::Load(Arc::new(scenario)))?;
        Ok(diagnostics)
    }

    pub fn start(&mut self) -> Result<()> {
        self.dispatch(EngineEvent::Start)
    }

    pub fn pause(&mut self) -> Result<()> {
        self.dispatch(EngineEvent::Pause)
    }

    pub fn resume(&mut self) -> Result<()> {
        self.dispatch(EngineEvent::Resume)
    }

    pub fn reset(&mut self) -> Result<()> {
        self.dispatch(EngineEvent::Reset)
    }

    pub fn acknowledge(&mut self) -> Result<()> {
        self.dispatch(EngineEvent::Acknowledge)
    }

    /// Compile the prompt an AI step would receive with the current
    /// artifacts, without running it.
    pub async fn preview_prompt(&self, step_id: &str) -> Result<String> {
        let scenario = self.machine.scenario().ok_or(DocflowError::NoScenarioLoaded)?;
        let step = scenario
            .visual_pipeline
            .iter()
            .find(|s| s.step_id() == step_id)
            .ok_or_else(|| DocflowError::Other(format!("no step '{step_id}' in scenario")))?;
        let ai = step
            .as_ai()
            .ok_or_else(|| DocflowError::Other(format!("step '{step_id}' is not an AI step")))?;
        Ok(self
            .compiler
            .compile(ai, scenario, &self.machine.state().artifacts)
            .await)
    }

    // ---- queue ----

    /// Wait for the next queued event and apply it.
    pub async fn process_next(&mut self) -> Result<()> {
        let event = self
            .rx
            .recv()
            .await
            .ok_or_else(|| DocflowError::Other("event queue closed".into()))?;
        self.dispatch(event)
    }

    /// Process events until the run needs the user: a result to acknowledge,
    /// a pause, or a finished run. Returns the status it settled in.
    pub async fn run_until_settled(&mut self) -> Result<RunStatus> {
        loop {
            match self.status() {
                RunStatus::Animating | RunStatus::WaitingLlm | RunStatus::LlmError => {
                    self.process_next().await?
                }
                status => return Ok(status),
            }
        }
    }

    /// Start (if idle) and drive the run to the end, acknowledging every
    /// result as it appears.
    pub async fn run_to_completion(&mut self) -> Result<&RunState> {
        if self.status().is_stable() {
            self.start()?;
        }
        loop {
            match self.run_until_settled().await? {
                RunStatus::ShowingResult => self.acknowledge()?,
                RunStatus::Paused => self.resume()?,
                _ => return Ok(self.machine.state()),
            }
        }
    }

    fn dispatch(&mut self, event: EngineEvent) -> Result<()> {
        let name = event.name();
        let effects = self.machine.handle(event).map_err(|e| {
            tracing::debug!(event = name, error = %e, "Event rejected");
            e
        })?;
        for effect in effects {
            self.execute(effect);
        }
        Ok(())
    }

    fn execute(&self, effect: Effect) {
        match effect {
            Effect::ScheduleTimer {
                run_id,
                generation,
                delay,
            } => {
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(EngineEvent::TimerFired { run_id, generation });
                });
            }
            Effect::InvokeReasoning {
                run_id,
                step_index,
                step,
                scenario,
                artifacts,
            } => {
                let tx = self.tx.clone();
                let client = self.client.clone();
                let compiler = self.compiler.clone();
                tokio::spawn(async move {
                    let prompt = compiler.compile(&step, &scenario, &artifacts).await;
                    tracing::debug!(step = %step.step_id, prompt_len = prompt.len(), "Prompt compiled");
                    let outcome = client.infer(&prompt).await;
                    let _ = tx.send(EngineEvent::ReasoningResolved {
                        run_id,
                        step_index,
                        prompt,
                        outcome,
                    });
                });
            }
            Effect::Notify(event) => self.emitter.emit(event),
        }
    }
}
