//! Built-in dialogue line generation.
//!
//! The default binary has no external model provider wired in, so generated
//! dialogue nodes are served from a small template table keyed by prompt ref.
//! A deployment with a real provider registers its own `DialogueGenPort`.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::infrastructure::ports::{DialogueGenPort, DialoguePrompt, GenError};

pub struct TemplateDialogueGen {
    templates: DashMap<String, String>,
    fallback: String,
}

impl TemplateDialogueGen {
    pub fn new() -> Self {
        Self {
            templates: DashMap::new(),
            fallback: "...".to_string(),
        }
    }

    pub fn with_template(self, prompt_ref: impl Into<String>, line: impl Into<String>) -> Self {
        self.templates.insert(prompt_ref.into(), line.into());
        self
    }
}

impl Default for TemplateDialogueGen {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DialogueGenPort for TemplateDialogueGen {
    async fn generate_line(&self, prompt: &DialoguePrompt) -> Result<String, GenError> {
        let line = prompt
            .prompt_ref
            .as_ref()
            .and_then(|key| self.templates.get(key).map(|entry| entry.value().clone()))
            .unwrap_or_else(|| self.fallback.clone());
        Ok(line)
    }
}
