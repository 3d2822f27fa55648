use crate::error::ModelError;
use crate::http::{default_agent, send_with_retry, streaming_agent};
use crate::types::{ChatMessage, SamplingParams};
use serde::Deserialize;
use serde_json::json;
use std::io::BufReader;
use tracing::debug;

use super::{ChatModel, Delta, DeltaStream, TokenStream};

/// Default for a local `llama-server`.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/v1";
const MAX_RETRIES: usize = 2;
const DONE_SENTINEL: &str = "[DONE]";

/// Any server speaking the OpenAI chat-completions protocol with SSE streaming.
pub struct OpenAiModel {
    model: String,
    base_url: String,
    api_key: Option<String>,
    agent: ureq::Agent,
    probe_agent: ureq::Agent,
}

impl OpenAiModel {
    pub fn new(model: &str, base_url: Option<&str>, api_key: Option<&str>) -> Self {
        let base_url = base_url
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        let api_key = api_key
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        Self {
            model: model.to_string(),
            base_url,
            api_key,
            agent: streaming_agent(),
            probe_agent: default_agent(),
        }
    }

    fn build_request_body(&self, messages: &[ChatMessage], sampling: &SamplingParams) -> serde_json::Value {
        json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "temperature": sampling.temperature,
            "top_p": sampling.top_p,
            "top_k": sampling.top_k,
            "max_tokens": sampling.max_tokens,
        })
    }

    fn bearer(&self) -> Option<String> {
        self.api_key.as_ref().map(|key| format!("Bearer {key}"))
    }

    fn parse_line(line: &str) -> Result<Option<Delta>, ModelError> {
        let Some(data) = line.trim().strip_prefix("data:") else {
            // blank separators, `event:` fields and `:` keep-alive comments
            return Ok(None);
        };
        let data = data.trim();
        if data == DONE_SENTINEL {
            return Ok(Some(Delta {
                done: true,
                ..Delta::default()
            }));
        }
        let chunk: SseChunk =
            serde_json::from_str(data).map_err(|e| ModelError::InvalidResponse(e.to_string()))?;
        if let Some(error) = chunk.error {
            return Err(ModelError::Failed(error.message));
        }
        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(None);
        };
        Ok(Some(Delta {
            reasoning: choice.delta.reasoning_content,
            content: choice.delta.content,
            done: false,
        }))
    }
}

impl ChatModel for OpenAiModel {
    fn name(&self) -> &str {
        "openai"
    }

    fn probe(&self) -> Result<(), ModelError> {
        let url = format!("{}/models", self.base_url);
        let mut request = self.probe_agent.get(&url);
        if let Some(bearer) = self.bearer() {
            request = request.header("Authorization", &bearer);
        }
        request.call().map(|_| ()).map_err(|err| {
            ModelError::Unavailable(format!("server not reachable at {}: {err}", self.base_url))
        })
    }

    fn stream_chat(
        &mut self,
        messages: &[ChatMessage],
        sampling: &SamplingParams,
    ) -> Result<TokenStream<'_>, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_request_body(messages, sampling);
        let bearer = self.bearer();
        debug!(model = %self.model, %url, "opening chat completion stream");
        let resp = send_with_retry("chat completion", MAX_RETRIES, || {
            let mut request = self.agent.post(&url).header("Accept", "text/event-stream");
            if let Some(bearer) = &bearer {
                request = request.header("Authorization", bearer);
            }
            request.send_json(&body)
        })?;
        let reader = BufReader::new(resp.into_body().into_reader());
        Ok(Box::new(DeltaStream::new(reader, Self::parse_line)))
    }
}

#[derive(Deserialize)]
struct SseChunk {
    #[serde(default)]
    choices: Vec<SseChoice>,
    error: Option<SseError>,
}

#[derive(Deserialize)]
struct SseChoice {
    delta: SseDelta,
}

#[derive(Deserialize)]
struct SseDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
}

#[derive(Deserialize)]
struct SseError {
    message: String,
}
