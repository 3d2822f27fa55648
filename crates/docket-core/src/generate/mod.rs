pub mod filter;
pub mod prompt;
pub mod stream;
pub mod worker;

use crate::error::GenerateError;
use crate::model::ChatModel;
use crate::types::{ChatMessage, DateGroup, GenerationEvent, Pass, Report, SamplingParams};
use filter::{ThinkFilter, clean_summary};
use prompt::{PromptSet, items_text};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use stream::{Consumed, StreamOutcome, consume};
use tracing::{debug, info};

pub use worker::{GenerationHandle, Generator, ModelSlot, ModelStatus};

const GROUP_SEPARATOR: &str = "\n\n";

/// Cooperative cancellation shared between the caller and a run.
///
/// A run only ever reads the flag; clearing it is the caller's business.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// The underlying flag, for registration with signal handlers.
    pub fn as_atomic(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub prompts: PromptSet,
    pub strip_brackets: bool,
    pub sampling: SamplingParams,
    /// Mirror banners, prompts, raw tokens and pass stats as `Raw` events.
    pub debug_raw: bool,
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed(Report),
    Cancelled,
}

/// Drives both passes for every date group over one exclusively borrowed model.
pub struct TwoPassGenerator<'a> {
    model: &'a mut dyn ChatModel,
    options: &'a GenerateOptions,
    cancel: &'a CancelFlag,
}

impl<'a> TwoPassGenerator<'a> {
    pub fn new(model: &'a mut dyn ChatModel, options: &'a GenerateOptions, cancel: &'a CancelFlag) -> Self {
        Self {
            model,
            options,
            cancel,
        }
    }

    pub fn run(
        &mut self,
        groups: &[DateGroup],
        emit: &mut dyn FnMut(GenerationEvent),
    ) -> Result<RunOutcome, GenerateError> {
        let mut report = String::new();
        for (index, group) in groups.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!(group = index, "generation cancelled");
                return Ok(RunOutcome::Cancelled);
            }
            info!(group = index, date = %group.date, rows = group.rows.len(), "generating date group");
            emit(GenerationEvent::GroupStarted {
                index,
                date: group.date.clone(),
            });

            let Some(summary) = self.summarize(group, emit)? else {
                info!(group = index, "generation cancelled during summarization");
                return Ok(RunOutcome::Cancelled);
            };
            if self.cancel.is_cancelled() {
                return Ok(RunOutcome::Cancelled);
            }
            let Some(formatted) = self.format(group, &summary, emit)? else {
                info!(group = index, "generation cancelled during formatting");
                return Ok(RunOutcome::Cancelled);
            };

            report.push_str(&formatted);
            report.push_str(GROUP_SEPARATOR);
            emit(GenerationEvent::Token(GROUP_SEPARATOR.to_string()));
        }

        if self.cancel.is_cancelled() {
            return Ok(RunOutcome::Cancelled);
        }
        Ok(RunOutcome::Completed(Report {
            text: report,
            dates: groups.iter().map(|group| group.date.clone()).collect(),
        }))
    }

    /// Pass 1: every raw token goes to the live view. Returns the cleaned summary.
    fn summarize(
        &mut self,
        group: &DateGroup,
        emit: &mut dyn FnMut(GenerationEvent),
    ) -> Result<Option<String>, GenerateError> {
        let items = items_text(&group.rows, self.options.strip_brackets);
        let prompt = self.options.prompts.summarize_prompt(&group.date, &items)?;
        self.announce(Pass::Summarize, &prompt, emit);

        let debug_raw = self.options.debug_raw;
        let cancel = self.cancel;
        let stream = self
            .model
            .stream_chat(&[ChatMessage::user(prompt)], &self.options.sampling)?;
        let outcome = consume(stream, cancel, |token| {
            emit(GenerationEvent::Token(token.to_string()));
            if debug_raw && !cancel.is_cancelled() {
                emit(GenerationEvent::Raw(token.to_string()));
            }
        })?;
        let StreamOutcome::Completed(consumed) = outcome else {
            return Ok(None);
        };
        self.report_stats(Pass::Summarize, &consumed, emit);
        Ok(Some(clean_summary(&consumed.full_text)))
    }

    /// Pass 2: raw tokens go to the debug view, filtered tokens to the live view.
    fn format(
        &mut self,
        group: &DateGroup,
        summary: &str,
        emit: &mut dyn FnMut(GenerationEvent),
    ) -> Result<Option<String>, GenerateError> {
        let prompt = self.options.prompts.format_prompt(&group.date, summary)?;
        self.announce(Pass::Format, &prompt, emit);

        let debug_raw = self.options.debug_raw;
        let cancel = self.cancel;
        let mut filter = ThinkFilter::new();
        let mut visible = String::new();
        let stream = self
            .model
            .stream_chat(&[ChatMessage::user(prompt)], &self.options.sampling)?;
        let outcome = consume(stream, cancel, |token| {
            if debug_raw {
                emit(GenerationEvent::Raw(token.to_string()));
                if cancel.is_cancelled() {
                    return;
                }
            }
            let shown = filter.filter(token);
            if !shown.is_empty() {
                visible.push_str(&shown);
                emit(GenerationEvent::Token(shown));
            }
        })?;
        let StreamOutcome::Completed(consumed) = outcome else {
            return Ok(None);
        };

        let tail = filter.finish();
        if !tail.is_empty() {
            visible.push_str(&tail);
            emit(GenerationEvent::Token(tail));
        }
        self.report_stats(Pass::Format, &consumed, emit);
        Ok(Some(visible))
    }

    fn announce(&self, pass: Pass, prompt: &str, emit: &mut dyn FnMut(GenerationEvent)) {
        debug!(pass = pass.label(), chars = prompt.len(), "prompt rendered");
        if self.options.debug_raw {
            let banner = "=".repeat(20);
            emit(GenerationEvent::Raw(format!(
                "\n{banner} {} {banner}\n--- PROMPT INPUT ---\n{prompt}\n\n--- LLM OUTPUT ---\n",
                pass.label()
            )));
        }
    }

    fn report_stats(&self, pass: Pass, consumed: &Consumed, emit: &mut dyn FnMut(GenerationEvent)) {
        debug!(
            pass = pass.label(),
            tokens = consumed.token_count,
            elapsed_ms = consumed.elapsed.as_millis() as u64,
            tok_per_sec = consumed.throughput().unwrap_or_default(),
            "pass finished"
        );
        if self.options.debug_raw {
            emit(GenerationEvent::Raw(format!("\n{}\n", consumed.stats())));
        }
    }
}
