pub mod ollama;
pub mod openai;

use crate::error::ModelError;
use crate::generate::filter::{THINK_CLOSE, THINK_OPEN};
use crate::types::{ChatMessage, SamplingParams};
use std::io::BufRead;

pub const DEFAULT_OLLAMA_MODEL: &str = "qwen3:30b-a3b";
pub const DEFAULT_OPENAI_MODEL: &str = "qwen3-30b-a3b";

/// Ordered text deltas of one completion, ended by exhaustion.
pub type TokenStream<'a> = Box<dyn Iterator<Item = Result<String, ModelError>> + 'a>;

/// A chat-completion backend that streams its answer.
pub trait ChatModel: Send {
    fn name(&self) -> &str;

    /// Cheap readiness check: server reachable and model present.
    fn probe(&self) -> Result<(), ModelError>;

    fn stream_chat(
        &mut self,
        messages: &[ChatMessage],
        sampling: &SamplingParams,
    ) -> Result<TokenStream<'_>, ModelError>;
}

/// Connection settings for a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelSpec {
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

pub fn create_chat_model(spec: &ModelSpec) -> Result<Box<dyn ChatModel>, ModelError> {
    let base_url = spec
        .base_url
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());
    match spec.provider.as_str() {
        "ollama" => Ok(Box::new(ollama::OllamaModel::new(
            spec.model.as_deref().unwrap_or(DEFAULT_OLLAMA_MODEL),
            base_url,
        ))),
        "openai" => Ok(Box::new(openai::OpenAiModel::new(
            spec.model.as_deref().unwrap_or(DEFAULT_OPENAI_MODEL),
            base_url,
            spec.api_key.as_deref(),
        ))),
        other => Err(ModelError::Failed(format!("unknown model provider: {other}"))),
    }
}

/// One parsed chunk of a streaming response.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Delta {
    pub reasoning: Option<String>,
    pub content: Option<String>,
    pub done: bool,
}

/// Re-frames a separate reasoning channel as inline `<think>` spans.
#[derive(Debug, Default)]
pub(crate) struct ReasoningFramer {
    open: bool,
}

impl ReasoningFramer {
    pub fn frame(&mut self, reasoning: Option<&str>, content: Option<&str>) -> String {
        let mut out = String::new();
        if let Some(reasoning) = reasoning.filter(|text| !text.is_empty()) {
            if !self.open {
                out.push_str(THINK_OPEN);
                self.open = true;
            }
            out.push_str(reasoning);
        }
        if let Some(content) = content.filter(|text| !text.is_empty()) {
            out.push_str(&self.finish());
            out.push_str(content);
        }
        out
    }

    pub fn finish(&mut self) -> String {
        if std::mem::take(&mut self.open) {
            THINK_CLOSE.to_string()
        } else {
            String::new()
        }
    }
}

pub(crate) type LineParser = fn(&str) -> Result<Option<Delta>, ModelError>;

/// Turns a line-oriented response body into a token stream.
pub(crate) struct DeltaStream<R> {
    lines: std::io::Lines<R>,
    parse: LineParser,
    framer: ReasoningFramer,
    finished: bool,
}

impl<R: BufRead> DeltaStream<R> {
    pub fn new(reader: R, parse: LineParser) -> Self {
        Self {
            lines: reader.lines(),
            parse,
            framer: ReasoningFramer::default(),
            finished: false,
        }
    }
}

impl<R: BufRead> Iterator for DeltaStream<R> {
    type Item = Result<String, ModelError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let line = match self.lines.next() {
                Some(Ok(line)) => line,
                Some(Err(err)) => {
                    self.finished = true;
                    return Some(Err(ModelError::Network(format!("stream read failed: {err}"))));
                }
                None => {
                    self.finished = true;
                    let tail = self.framer.finish();
                    return (!tail.is_empty()).then_some(Ok(tail));
                }
            };
            let delta = match (self.parse)(&line) {
                Ok(Some(delta)) => delta,
                Ok(None) => continue,
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err));
                }
            };
            let mut text = self
                .framer
                .frame(delta.reasoning.as_deref(), delta.content.as_deref());
            if delta.done {
                self.finished = true;
                text.push_str(&self.framer.finish());
            }
            if !text.is_empty() {
                return Some(Ok(text));
            }
        }
        None
    }
}

/// In-memory model that replays scripted token lists, one per call.
#[cfg(test)]
pub(crate) mod testing {
    use super::{ChatModel, TokenStream};
    use crate::error::ModelError;
    use crate::types::{ChatMessage, SamplingParams};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    pub struct ScriptedModel {
        scripts: Arc<Mutex<VecDeque<Vec<String>>>>,
        pub prompts: Arc<Mutex<Vec<String>>>,
        pub fail_after: Option<usize>,
    }

    impl ScriptedModel {
        pub fn new(scripts: &[&[&str]]) -> Self {
            let scripts = scripts
                .iter()
                .map(|tokens| tokens.iter().map(|token| token.to_string()).collect())
                .collect();
            Self {
                scripts: Arc::new(Mutex::new(scripts)),
                ..Self::default()
            }
        }

        pub fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    impl ChatModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        fn probe(&self) -> Result<(), ModelError> {
            Ok(())
        }

        fn stream_chat(
            &mut self,
            messages: &[ChatMessage],
            _sampling: &SamplingParams,
        ) -> Result<TokenStream<'_>, ModelError> {
            if let Some(message) = messages.last() {
                self.prompts.lock().unwrap().push(message.content.clone());
            }
            let tokens = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ModelError::Failed("script exhausted".into()))?;
            let fail_after = self.fail_after;
            let stream = tokens.into_iter().enumerate().map(move |(idx, token)| {
                match fail_after {
                    Some(limit) if idx >= limit => Err(ModelError::Network("connection reset".into())),
                    _ => Ok(token),
                }
            });
            Ok(Box::new(stream))
        }
    }
}
