use crate::error::ModelError;
use crate::http::{default_agent, send_with_retry, streaming_agent};
use crate::types::{ChatMessage, SamplingParams};
use serde::Deserialize;
use serde_json::json;
use std::io::BufReader;
use tracing::debug;

use super::{ChatModel, Delta, DeltaStream, TokenStream};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const MAX_RETRIES: usize = 2;

pub struct OllamaModel {
    model: String,
    base_url: String,
    agent: ureq::Agent,
    probe_agent: ureq::Agent,
}

impl OllamaModel {
    pub fn new(model: &str, base_url: Option<&str>) -> Self {
        let base_url = base_url
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        Self {
            model: model.to_string(),
            base_url,
            agent: streaming_agent(),
            probe_agent: default_agent(),
        }
    }

    fn build_request_body(&self, messages: &[ChatMessage], sampling: &SamplingParams) -> serde_json::Value {
        json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "options": {
                "temperature": sampling.temperature,
                "top_p": sampling.top_p,
                "top_k": sampling.top_k,
                "num_predict": sampling.max_tokens,
            },
        })
    }

    fn parse_line(line: &str) -> Result<Option<Delta>, ModelError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let chunk: OllamaChunk =
            serde_json::from_str(line).map_err(|e| ModelError::InvalidResponse(e.to_string()))?;
        if let Some(error) = chunk.error {
            return Err(ModelError::Failed(error));
        }
        let (reasoning, content) = chunk
            .message
            .map(|message| (message.thinking, message.content))
            .unwrap_or_default();
        Ok(Some(Delta {
            reasoning,
            content,
            done: chunk.done.unwrap_or(false),
        }))
    }
}

impl ChatModel for OllamaModel {
    fn name(&self) -> &str {
        "ollama"
    }

    fn probe(&self) -> Result<(), ModelError> {
        let url = format!("{}/api/show", self.base_url);
        match self
            .probe_agent
            .post(&url)
            .send_json(json!({ "model": self.model }))
        {
            Ok(_) => Ok(()),
            Err(ureq::Error::StatusCode(404)) => Err(ModelError::Unavailable(format!(
                "model {} is not installed; run `ollama pull {}`",
                self.model, self.model
            ))),
            Err(err) => Err(ModelError::Unavailable(format!(
                "ollama not reachable at {}: {err}",
                self.base_url
            ))),
        }
    }

    fn stream_chat(
        &mut self,
        messages: &[ChatMessage],
        sampling: &SamplingParams,
    ) -> Result<TokenStream<'_>, ModelError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = self.build_request_body(messages, sampling);
        debug!(model = %self.model, %url, "opening ollama stream");
        let resp = send_with_retry("ollama", MAX_RETRIES, || {
            self.agent.post(&url).send_json(&body)
        })?;
        let reader = BufReader::new(resp.into_body().into_reader());
        Ok(Box::new(DeltaStream::new(reader, Self::parse_line)))
    }
}

#[derive(Deserialize)]
struct OllamaChunk {
    message: Option<OllamaMessage>,
    done: Option<bool>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct OllamaMessage {
    content: Option<String>,
    thinking: Option<String>,
}
