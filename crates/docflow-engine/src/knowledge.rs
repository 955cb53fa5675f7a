//! Knowledge documents embedded in AI-step prompts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use docflow_types::{DocflowError, Result};

/// Fetches a knowledge document by file name.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    async fn fetch(&self, name: &str) -> Result<String>;
}

fn unavailable(name: &str, message: impl Into<String>) -> DocflowError {
    DocflowError::KnowledgeUnavailable {
        name: name.to_string(),
        message: message.into(),
    }
}

/// Only bare file names are accepted; anything that could leave the
/// knowledge directory is refused.
fn check_name(name: &str) -> Result<()> {
    let path = Path::new(name);
    let single = path.components().count() == 1
        && path.file_name().is_some_and(|f| f == path.as_os_str());
    if name.trim().is_empty() || !single {
        return Err(unavailable(name, "not a plain file name"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// FsKnowledgeSource
// ---------------------------------------------------------------------------

/// Reads `<root>/<name>` as UTF-8 text.
#[derive(Debug, Clone)]
pub struct FsKnowledgeSource {
    root: PathBuf,
}

impl FsKnowledgeSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl KnowledgeSource for FsKnowledgeSource {
    async fn fetch(&self, name: &str) -> Result<String> {
        check_name(name)?;
        let path = self.root.join(name);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| unavailable(name, e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// MemoryKnowledge
// ---------------------------------------------------------------------------

/// Knowledge documents held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryKnowledge {
    docs: HashMap<String, String>,
}

impl MemoryKnowledge {
    pub fn new() -> Self {
        Self::default()
    }

    /// The policy document the built-in scenarios refer to.
    pub fn builtin() -> Self {
        Self::new().with_document(
            "corporate_policy.md",
            include_str!("../knowledge/corporate_policy.md"),
        )
    }

    pub fn with_document(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.docs.insert(name.into(), text.into());
        self
    }
}

#[async_trait]
impl KnowledgeSource for MemoryKnowledge {
    async fn fetch(&self, name: &str) -> Result<String> {
        self.docs
            .get(name)
            .cloned()
            .ok_or_else(|| unavailable(name, "not found"))
    }
}
