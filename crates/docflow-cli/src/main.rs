//! CLI binary for running and validating document-approval scenarios.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use docflow_engine::{
    BuiltinScenarios, EngineConfig, FsKnowledgeSource, FsScenarioSource, KnowledgeSource,
    MemoryKnowledge, PipelineRunner, RoutingPolicy, RunEvent, RunState, ScenarioSource,
    Severity, TimedEvent,
};
use docflow_llm::{
    GeminiAdapter, LoggingMiddleware, OfflineReviewer, ReasoningClient, ReasoningConfig,
    UsageTrackingMiddleware,
};
use docflow_types::{generate_check_key, RunStatus, Scenario};
use tokio::io::AsyncBufReadExt;
use tokio::sync::broadcast;

#[derive(Parser)]
#[command(name = "docflow", version, about = "Document-approval scenario runner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args)]
struct SourceArgs {
    /// Directory of `<scenario_id>.json` files (default: built-in scenarios)
    #[arg(long)]
    scenarios_dir: Option<PathBuf>,

    /// Directory of knowledge documents (default: built-in policy)
    #[arg(long)]
    knowledge_dir: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProviderKind {
    /// Keyword-based reviewer, no network
    Offline,
    /// Google Gemini (reads GOOGLE_API_KEY or GEMINI_API_KEY)
    Gemini,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario
    Run {
        /// Scenario id
        scenario: String,

        #[command(flatten)]
        sources: SourceArgs,

        /// Reasoning service backend
        #[arg(long, value_enum, default_value = "offline")]
        provider: ProviderKind,

        /// Model name (default: the provider's)
        #[arg(long)]
        model: Option<String>,

        /// Gemini API endpoint, e.g. a proxy
        #[arg(long)]
        gemini_base_url: Option<String>,

        /// Acknowledge every result automatically
        #[arg(long)]
        auto_ack: bool,

        /// Route on the service's action instead of the step's rules
        #[arg(long)]
        trust_service: bool,

        /// Pause before an AI step is sent, in milliseconds
        #[arg(long, default_value = "1000")]
        arrival_ms: u64,

        /// How long a failed AI step is shown before it is skipped, in milliseconds
        #[arg(long, default_value = "3000")]
        grace_ms: u64,

        /// Deadline for one reasoning call including its retry, in seconds
        #[arg(long, default_value = "30")]
        timeout_secs: u64,
    },

    /// Validate a scenario's structure and rule configuration
    Validate {
        /// Scenario id
        scenario: String,

        #[command(flatten)]
        sources: SourceArgs,
    },

    /// Print the prompt an AI step would receive
    Preview {
        /// Scenario id
        scenario: String,

        /// Step id of an AI step
        step: String,

        #[command(flatten)]
        sources: SourceArgs,
    },

    /// Print the boolean-check key derived from a label
    CheckKey {
        label: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            scenario,
            sources,
            provider,
            model,
            gemini_base_url,
            auto_ack,
            trust_service,
            arrival_ms,
            grace_ms,
            timeout_secs,
        } => {
            let routing = if trust_service {
                RoutingPolicy::TrustService
            } else {
                RoutingPolicy::PreferLocalRules
            };
            let config = EngineConfig {
                arrival_delay: Duration::from_millis(arrival_ms),
                grace_delay: Duration::from_millis(grace_ms),
                routing,
            };
            let reasoning = ReasoningConfig {
                model: model.unwrap_or_default(),
                timeout: Duration::from_secs(timeout_secs),
                ..ReasoningConfig::default()
            };
            let backend = match provider {
                ProviderKind::Offline => Backend::Offline,
                ProviderKind::Gemini => Backend::Gemini {
                    base_url: gemini_base_url,
                },
            };
            cmd_run(&scenario, &sources, backend, config, reasoning, auto_ack).await?;
        }
        Commands::Validate { scenario, sources } => {
            cmd_validate(&scenario, &sources).await?;
        }
        Commands::Preview {
            scenario,
            step,
            sources,
        } => {
            cmd_preview(&scenario, &step, &sources).await?;
        }
        Commands::CheckKey { label } => {
            println!("{}", generate_check_key(&label));
        }
    }

    Ok(())
}

fn scenario_source(args: &SourceArgs) -> Arc<dyn ScenarioSource> {
    match &args.scenarios_dir {
        Some(dir) => Arc::new(FsScenarioSource::new(dir)),
        None => Arc::new(BuiltinScenarios),
    }
}

fn knowledge_source(args: &SourceArgs) -> Arc<dyn KnowledgeSource> {
    match &args.knowledge_dir {
        Some(dir) => Arc::new(FsKnowledgeSource::new(dir)),
        None => Arc::new(MemoryKnowledge::builtin()),
    }
}

fn offline_runner(sources: &SourceArgs) -> PipelineRunner {
    let client = ReasoningClient::new(OfflineReviewer::new(), ReasoningConfig::default());
    PipelineRunner::new(
        EngineConfig::default(),
        Arc::new(client),
        knowledge_source(sources),
        scenario_source(sources),
    )
}

// ---------------------------------------------------------------------------
// validate / preview
// ---------------------------------------------------------------------------

async fn cmd_validate(scenario_id: &str, sources: &SourceArgs) -> anyhow::Result<()> {
    let raw = scenario_source(sources).fetch(scenario_id).await?;
    let scenario = Scenario::from_json(scenario_id, &raw)?;
    let diagnostics = docflow_engine::validate_scenario(&scenario);

    if diagnostics.is_empty() {
        println!("Scenario '{}' is valid ({} steps)", scenario.scenario_id, scenario.len());
        return Ok(());
    }

    let mut has_error = false;
    for diag in &diagnostics {
        if diag.severity == Severity::Error {
            has_error = true;
        }
        let location = match (&diag.step_id, diag.rule_index) {
            (Some(step), Some(index)) => format!(" ({step} rule #{})", index + 1),
            (Some(step), None) => format!(" ({step})"),
            _ => String::new(),
        };
        println!("[{}] {}{}: {}", diag.severity, diag.rule, location, diag.message);
        if let Some(fix) = &diag.fix {
            println!("    fix: {fix}");
        }
    }

    if has_error {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_preview(scenario_id: &str, step_id: &str, sources: &SourceArgs) -> anyhow::Result<()> {
    let mut runner = offline_runner(sources);
    runner.load_scenario(scenario_id).await?;
    println!("{}", runner.preview_prompt(step_id).await?);
    Ok(())
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

enum Backend {
    Offline,
    Gemini { base_url: Option<String> },
}

async fn cmd_run(
    scenario_id: &str,
    sources: &SourceArgs,
    backend: Backend,
    config: EngineConfig,
    reasoning: ReasoningConfig,
    auto_ack: bool,
) -> anyhow::Result<()> {
    let usage = UsageTrackingMiddleware::new();
    let client = match backend {
        Backend::Offline => ReasoningClient::new(OfflineReviewer::new(), reasoning),
        Backend::Gemini { base_url } => {
            let mut adapter = GeminiAdapter::from_env()?;
            if let Some(url) = base_url {
                adapter = adapter.with_base_url(url);
            }
            ReasoningClient::new(adapter, reasoning)
        }
    }
    .with_middleware(LoggingMiddleware)
    .with_middleware(usage.clone());
    println!("Provider: {}", client.provider_name());

    let mut runner = PipelineRunner::new(
        config,
        Arc::new(client),
        knowledge_source(sources),
        scenario_source(sources),
    );
    let mut events = runner.subscribe();

    let diagnostics = runner.load_scenario(scenario_id).await?;
    for diag in &diagnostics {
        println!("[{}] {}: {}", diag.severity, diag.rule, diag.message);
    }
    if let Some(scenario) = runner.scenario() {
        println!("Scenario: {} ({} steps)", scenario.scenario_name, scenario.len());
        println!("Document: {}", scenario.document_mock.file_name);
    }

    if auto_ack {
        run_auto(&mut runner, &mut events).await?;
    } else {
        run_interactive(&mut runner, &mut events).await?;
    }

    let state = runner.state();
    println!("\nRun {} finished: {}", state.run_id, state.status);
    println!("Time saved: {:.0} min", state.time_saved_minutes);
    for (key, value) in state.artifacts.iter() {
        println!("Artifact {key}: {value}");
    }
    if usage.total_input_tokens() > 0 {
        println!(
            "Tokens: {} in / {} out",
            usage.total_input_tokens(),
            usage.total_output_tokens()
        );
    }
    Ok(())
}

async fn run_auto(
    runner: &mut PipelineRunner,
    events: &mut broadcast::Receiver<TimedEvent>,
) -> anyhow::Result<()> {
    runner.start()?;
    loop {
        let status = runner.run_until_settled().await?;
        print_events(events);
        match status {
            RunStatus::ShowingResult => {
                print_result(runner.state());
                runner.acknowledge()?;
            }
            RunStatus::Paused => runner.resume()?,
            _ => break,
        }
    }
    print_events(events);
    Ok(())
}

const HELP: &str = "Commands: [enter]/a acknowledge, p pause, r resume, x reset, s start, q quit";

async fn run_interactive(
    runner: &mut PipelineRunner,
    events: &mut broadcast::Receiver<TimedEvent>,
) -> anyhow::Result<()> {
    println!("{HELP}");
    let handle = runner.handle();
    let mut input = tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let sent = match line.trim() {
                "" | "a" => handle.acknowledge(),
                "p" => handle.pause(),
                "r" => handle.resume(),
                "x" => handle.reset(),
                "s" => handle.start(),
                "q" => break,
                other => {
                    println!("Unknown command '{other}'. {HELP}");
                    Ok(())
                }
            };
            if sent.is_err() {
                break;
            }
        }
    });

    runner.start()?;
    print_events(events);
    loop {
        tokio::select! {
            processed = runner.process_next() => {
                if let Err(e) = processed {
                    println!("  ! {e}");
                }
                print_events(events);
                match runner.status() {
                    RunStatus::ShowingResult => {
                        print_result(runner.state());
                        println!("Acknowledge to continue.");
                    }
                    RunStatus::Completed => println!("Run completed. 's' restarts, 'q' quits."),
                    _ => {}
                }
            }
            _ = &mut input => break,
        }
    }
    Ok(())
}

fn print_events(events: &mut broadcast::Receiver<TimedEvent>) {
    loop {
        match events.try_recv() {
            Ok(timed) => {
                let at = timed.at.format("%H:%M:%S%.3f");
                match &timed.event {
                    RunEvent::ScenarioLoaded { .. } => {}
                    RunEvent::StatusChanged { to, step_index, .. } => {
                        println!("{at}  [{step_index}] {to}")
                    }
                    RunEvent::StepEntered {
                        step_index,
                        step_id,
                        is_ai,
                        ..
                    } => {
                        let kind = if *is_ai { "AI" } else { "standard" };
                        println!("{at}  [{step_index}] -> {step_id} ({kind})");
                    }
                    RunEvent::ReasoningRequested { step_id, .. } => {
                        println!("{at}  {step_id}: asking the reasoning service")
                    }
                    RunEvent::ReasoningSucceeded { step_id, action, source, .. } => {
                        println!("{at}  {step_id}: decided {action} ({source:?})")
                    }
                    RunEvent::ReasoningFailed { step_id, error, .. } => {
                        println!("{at}  {step_id}: failed: {error}")
                    }
                    RunEvent::ArtifactWritten { key, .. } => println!("{at}  artifact '{key}' saved"),
                    RunEvent::StaleResponseDiscarded { .. } => {
                        println!("{at}  late response from a previous run discarded")
                    }
                    RunEvent::RunCompleted {
                        returned_to_author, ..
                    } => {
                        if *returned_to_author {
                            println!("{at}  document returned to author");
                        }
                    }
                }
            }
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "Event display fell behind");
            }
            Err(_) => break,
        }
    }
}

fn print_result(state: &RunState) {
    let Some(result) = &state.last_result else {
        return;
    };
    println!("  severity: {}", result.ai_analysis.severity_score);
    for finding in &result.ai_analysis.findings {
        println!("  - {}", finding.text());
    }
    for (key, value) in &result.ai_analysis.boolean_checks {
        println!("  {key}: {value}");
    }
    println!("  comment: {}", result.execution_command.comment_to_user);
    if let Some(decision) = &state.last_decision {
        if decision.action != decision.service_action {
            println!(
                "  next: {} (service suggested {})",
                decision.action, decision.service_action
            );
        } else {
            println!("  next: {}", decision.action);
        }
    }
    if let Some(prompt) = &state.last_prompt {
        tracing::debug!(prompt_len = prompt.len(), "Prompt sent for this result");
    }
    if let Ok(raw) = serde_json::to_string(result) {
        tracing::debug!(result = %raw, "Structured result");
    }
}
