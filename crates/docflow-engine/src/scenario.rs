//! Scenario sources and loading.

use std::path::PathBuf;

use async_trait::async_trait;
use docflow_types::{DocflowError, Result, Scenario};

use crate::validation::{validate_or_raise, Diagnostic};

/// Fetches the raw JSON of a scenario by id.
#[async_trait]
pub trait ScenarioSource: Send + Sync {
    async fn fetch(&self, scenario_id: &str) -> Result<String>;
}

fn not_found(scenario_id: &str) -> DocflowError {
    DocflowError::ScenarioNotFound {
        scenario_id: scenario_id.to_string(),
    }
}

/// Fetch, parse, and validate a scenario. Returns the scenario with any
/// non-fatal diagnostics; rule configuration errors fail the load.
pub async fn load_scenario(
    source: &dyn ScenarioSource,
    scenario_id: &str,
) -> Result<(Scenario, Vec<Diagnostic>)> {
    let raw = source.fetch(scenario_id).await?;
    let scenario = Scenario::from_json(scenario_id, &raw)?;
    if scenario.scenario_id != scenario_id {
        tracing::warn!(
            requested = %scenario_id,
            declared = %scenario.scenario_id,
            "Scenario id differs from the id it was loaded by"
        );
    }
    let diagnostics = validate_or_raise(&scenario)?;
    for d in &diagnostics {
        tracing::debug!(rule = %d.rule, severity = %d.severity, "{}", d.message);
    }
    Ok((scenario, diagnostics))
}

// ---------------------------------------------------------------------------
// FsScenarioSource
// ---------------------------------------------------------------------------

/// Reads `<root>/<scenario_id>.json`.
#[derive(Debug, Clone)]
pub struct FsScenarioSource {
    root: PathBuf,
}

impl FsScenarioSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ScenarioSource for FsScenarioSource {
    async fn fetch(&self, scenario_id: &str) -> Result<String> {
        let valid_id = !scenario_id.is_empty()
            && scenario_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid_id {
            return Err(not_found(scenario_id));
        }
        let path = self.root.join(format!("{scenario_id}.json"));
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => Ok(raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(not_found(scenario_id)),
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// BuiltinScenarios
// ---------------------------------------------------------------------------

const BUILTIN: &[(&str, &str)] = &[
    ("contract_review", include_str!("../scenarios/contract_review.json")),
    ("outgoing_letter", include_str!("../scenarios/outgoing_letter.json")),
];

/// The scenarios shipped with the engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinScenarios;

impl BuiltinScenarios {
    pub fn ids() -> impl Iterator<Item = &'static str> {
        BUILTIN.iter().map(|(id, _)| *id)
    }
}

#[async_trait]
impl ScenarioSource for BuiltinScenarios {
    async fn fetch(&self, scenario_id: &str) -> Result<String> {
        BUILTIN
            .iter()
            .find(|(id, _)| *id == scenario_id)
            .map(|(_, raw)| raw.to_string())
            .ok_or_else(|| not_found(scenario_id))
    }
}
