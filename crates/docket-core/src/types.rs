use crate::error::GenerateError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single agenda item as read from the source sheet.
///
/// Missing cells are normalized to `None` at ingestion, so nothing downstream
/// compares against placeholder strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgendaRow {
    pub date: String,
    pub section: Option<String>,
    pub title: Option<String>,
    pub notes: Option<String>,
    pub include: bool,
    pub extra: BTreeMap<String, String>,
}

impl AgendaRow {
    /// Sort key used when ordering rows inside a date group.
    pub fn section_key(&self) -> &str {
        self.section.as_deref().unwrap_or("")
    }
}

/// Rows sharing one meeting-date key, in section order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateGroup {
    pub date: String,
    pub rows: Vec<AgendaRow>,
}

/// Chat message role understood by the model backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Sampling parameters sent with every completion request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            top_p: 0.0,
            top_k: 20,
            max_tokens: 10_000,
        }
    }
}

/// Final output of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub text: String,
    pub dates: Vec<String>,
}

/// Which pass of the per-date pipeline is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Summarize,
    Format,
}

impl Pass {
    pub fn label(self) -> &'static str {
        match self {
            Pass::Summarize => "PASS 1: SUMMARIZATION",
            Pass::Format => "PASS 2: FORMATTING",
        }
    }
}

/// Events emitted by a generation run, in order, from the worker thread.
#[derive(Debug)]
pub enum GenerationEvent {
    /// A date group is about to be processed.
    GroupStarted { index: usize, date: String },
    /// User-facing text: raw pass-1 tokens and filtered pass-2 tokens.
    Token(String),
    /// Debug view: banners, prompts, every raw token and pass statistics.
    Raw(String),
    Completed(Report),
    Failed(GenerateError),
}
