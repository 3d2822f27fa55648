use thiserror::Error;

/// Errors from reading agenda rows out of a tabular source.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("agenda file io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("agenda file parse error: {0}")]
    Csv(#[from] csv::Error),

    #[error("agenda file is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("no agenda item rows found")]
    NoRows,
}

/// Errors from filling a prompt template.
#[derive(Debug, Error)]
pub enum PromptError {
    #[error("template references unknown slot {{{0}}}")]
    MissingSlot(String),

    #[error("template has an unterminated slot starting at byte {0}")]
    Unterminated(usize),
}

/// Errors from a chat model backend.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model failed: {0}")]
    Failed(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("model not available: {0}")]
    Unavailable(String),
}

/// Errors from a two-pass generation run.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("nothing to generate: no agenda rows selected")]
    EmptyInput,

    #[error("model is still loading; try again shortly")]
    ModelNotReady,

    #[error("model failed to load: {0}")]
    ModelUnavailable(String),

    #[error("a generation run is already in progress")]
    Busy,

    #[error("prompt error: {0}")]
    Prompt(#[from] PromptError),

    #[error("stream failure: {0}")]
    Stream(#[from] ModelError),

    #[error("generation worker failed: {0}")]
    Worker(String),
}

/// Errors from writing a rendered report document.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report io error: {0}")]
    Io(#[from] std::io::Error),
}
