//! Prompt compiler: builds the instruction sent to the reasoning service for
//! one AI step.
//!
//! The prompt has six sections in a fixed order: system preamble, knowledge,
//! document context, artifacts, task, and response format. Every section is
//! present even when its body is empty. Compilation reads its inputs only.

use std::fmt::Write as _;
use std::sync::Arc;

use docflow_types::{AiStep, ArtifactStore, Scenario};

use crate::knowledge::KnowledgeSource;

const PREAMBLE: &str = "You are an AI reviewer in a document-approval workflow. Check the \
document against the company rules and reply STRICTLY with a single JSON object, with no \
text before or after it.";

const RESPONSE_FORMAT: &str = r#"{
  "status": "success",
  "ai_analysis": {
    "severity_score": <number from 0 to 10>,
    "findings": ["finding 1", "finding 2"],
    "artifact": "<short summary for the next step, if needed>"
  },
  "execution_command": {
    "action_id": "<approve|return_to_author|escalate|skip_node>",
    "comment_to_user": "<clear comment for the employee>"
  },
  "time_saved_minutes": <number>
}"#;

/// What goes into the knowledge section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KnowledgeSection {
    /// The step attaches no knowledge document.
    None,
    Document(String),
    /// The attached document could not be fetched.
    Unavailable { name: String, reason: String },
}

impl KnowledgeSection {
    fn body(&self) -> String {
        match self {
            KnowledgeSection::None => String::new(),
            KnowledgeSection::Document(text) => text.clone(),
            KnowledgeSection::Unavailable { name, reason } => {
                format!("(Knowledge base unavailable: {name}: {reason})")
            }
        }
    }
}

/// Assemble the prompt from already-resolved parts.
pub fn assemble(
    step: &AiStep,
    scenario: &Scenario,
    artifacts: &ArtifactStore,
    knowledge: &KnowledgeSection,
) -> String {
    let doc = &scenario.document_mock;
    let mut out = String::new();

    let _ = writeln!(out, "[SYSTEM INSTRUCTION]\n{PREAMBLE}\n");
    let _ = writeln!(out, "[COMPANY RULES]\n{}\n", knowledge.body());
    let _ = writeln!(
        out,
        "[DOCUMENT CONTEXT]\nDocument name: {}\nDocument text:\n{}\n",
        doc.file_name, doc.extracted_text
    );

    out.push_str("[ARTIFACTS FROM PREVIOUS STEPS]\n");
    for key in &step.input_artifacts {
        if let Some(value) = artifacts.get(key) {
            let _ = writeln!(out, "{key}: {value}");
        }
    }
    out.push('\n');

    let _ = writeln!(out, "[TASK]\n{}\n", step.active_prompt);
    let _ = write!(out, "[RESPONSE FORMAT - STRICT JSON]\n{RESPONSE_FORMAT}");

    if !step.boolean_checks_config.is_empty() {
        out.push_str(
            "\n\n[BOOLEAN CHECKS]\nAlso add \"boolean_checks\" to \"ai_analysis\": an object \
             mapping each key below to true or false.\n",
        );
        for check in &step.boolean_checks_config {
            let expected = if check.expected_in_doc { "yes" } else { "no" };
            let _ = writeln!(out, "- {}: {} (expected in document: {expected})", check.key, check.label);
        }
    }

    out.trim_end().to_string()
}

// ---------------------------------------------------------------------------
// PromptCompiler
// ---------------------------------------------------------------------------

/// Compiles AI-step prompts, fetching attached knowledge documents.
#[derive(Clone)]
pub struct PromptCompiler {
    knowledge: Arc<dyn KnowledgeSource>,
}

impl PromptCompiler {
    pub fn new(knowledge: Arc<dyn KnowledgeSource>) -> Self {
        Self { knowledge }
    }

    /// Compile the prompt for `step`. A knowledge fetch failure is reported in
    /// the prompt itself, never as an error.
    pub async fn compile(&self, step: &AiStep, scenario: &Scenario, artifacts: &ArtifactStore) -> String {
        let knowledge = self.resolve_knowledge(step).await;
        assemble(step, scenario, artifacts, &knowledge)
    }

    async fn resolve_knowledge(&self, step: &AiStep) -> KnowledgeSection {
        let Some(name) = step.attached_knowledge_base.as_deref().filter(|n| !n.trim().is_empty())
        else {
            return KnowledgeSection::None;
        };
        match self.knowledge.fetch(name).await {
            Ok(text) => KnowledgeSection::Document(text),
            Err(e) => {
                tracing::warn!(step = %step.step_id, knowledge = %name, error = %e, "Knowledge document unavailable");
                KnowledgeSection::Unavailable {
                    name: name.to_string(),
                    reason: match e {
                        docflow_types::DocflowError::KnowledgeUnavailable { message, .. } => message,
                        other => other.to_string(),
                    },
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::MemoryKnowledge;
    use docflow_types::{BooleanCheck, DocumentMock, Step};

    fn scenario() -> Scenario {
        Scenario {
            scenario_id: "s1".into(),
            scenario_name: "Sample".into(),
            document_mock: DocumentMock {
                file_name: "invoice_42.pdf".into(),
                extracted_text: "Total: 100 EUR\nDue: 30 days".into(),
            },
            visual_pipeline: vec![Step::standard("a", "A", 10)],
        }
    }

    fn step() -> AiStep {
        let mut step = AiStep::new("b", "Review", "Check the total against the limit.");
        step.input_artifacts = vec!["summary".into(), "missing".into()];
        step
    }

    fn section_order(prompt: &str) -> Vec<usize> {
        [
            "[SYSTEM INSTRUCTION]",
            "[COMPANY RULES]",
            "[DOCUMENT CONTEXT]",
            "[ARTIFACTS FROM PREVIOUS STEPS]",
            "[TASK]",
            "[RESPONSE FORMAT - STRICT JSON]",
        ]
        .iter()
        .map(|h| prompt.find(h).unwrap_or_else(|| panic!("missing {h}")))
        .collect()
    }

    #[test]
    fn sections_appear_in_order() {
        let prompt = assemble(&step(), &scenario(), &ArtifactStore::new(), &KnowledgeSection::None);
        let positions = section_order(&prompt);
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{positions:?}");
        assert!(prompt.contains("Document name: invoice_42.pdf"));
        assert!(prompt.contains("Total: 100 EUR\nDue: 30 days"));
        assert!(prompt.contains("Check the total against the limit."));
    }

    #[test]
    fn only_present_input_artifacts_are_listed() {
        let mut artifacts = ArtifactStore::new();
        artifacts.insert("summary", "all fine");
        artifacts.insert("unrelated", "secret");
        let prompt = assemble(&step(), &scenario(), &artifacts, &KnowledgeSection::None);
        assert!(prompt.contains("summary: all fine"));
        assert!(!prompt.contains("missing:"));
        assert!(!prompt.contains("secret"));
    }

    #[test]
    fn compile_is_deterministic_and_leaves_inputs_alone() {
        let mut artifacts = ArtifactStore::new();
        artifacts.insert("summary", "s");
        let before = artifacts.clone();
        let knowledge = KnowledgeSection::Document("Rule 1".into());
        let a = assemble(&step(), &scenario(), &artifacts, &knowledge);
        let b = assemble(&step(), &scenario(), &artifacts, &knowledge);
        assert_eq!(a, b);
        assert_eq!(artifacts, before);
    }

    #[test]
    fn boolean_checks_follow_the_format_template() {
        let mut step = step();
        step.boolean_checks_config = vec![BooleanCheck::from_label("Signature", true)];
        let prompt = assemble(&step, &scenario(), &ArtifactStore::new(), &KnowledgeSection::None);
        let format_at = prompt.find("[RESPONSE FORMAT").unwrap();
        let checks_at = prompt.find("[BOOLEAN CHECKS]").unwrap();
        assert!(checks_at > format_at);
        assert!(prompt.contains("- has_signature: Signature (expected in document: yes)"));

        let plain = assemble(&self::step(), &scenario(), &ArtifactStore::new(), &KnowledgeSection::None);
        assert!(!plain.contains("[BOOLEAN CHECKS]"));
    }

    #[tokio::test]
    async fn compile_embeds_knowledge() {
        let compiler = PromptCompiler::new(Arc::new(
            MemoryKnowledge::new().with_document("policy.md", "Limit is 50 EUR."),
        ));
        let mut step = step();
        step.attached_knowledge_base = Some("policy.md".into());
        let prompt = compiler.compile(&step, &scenario(), &ArtifactStore::new()).await;
        assert!(prompt.contains("[COMPANY RULES]\nLimit is 50 EUR."));
    }

    #[tokio::test]
    async fn compile_marks_unavailable_knowledge() {
        let compiler = PromptCompiler::new(Arc::new(MemoryKnowledge::new()));
        let mut step = step();
        step.attached_knowledge_base = Some("gone.md".into());
        let prompt = compiler.compile(&step, &scenario(), &ArtifactStore::new()).await;
        assert!(prompt.contains("(Knowledge base unavailable: gone.md: not found)"));
        assert_eq!(section_order(&prompt).len(), 6);
    }

    #[tokio::test]
    async fn compile_without_knowledge_has_empty_rules_section() {
        let compiler = PromptCompiler::new(Arc::new(MemoryKnowledge::new()));
        let prompt = compiler.compile(&step(), &scenario(), &ArtifactStore::new()).await;
        assert!(prompt.contains("[COMPANY RULES]\n\n\n[DOCUMENT CONTEXT]"));
    }
}
