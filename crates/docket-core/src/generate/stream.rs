use super::CancelFlag;
use crate::error::ModelError;
use crate::model::TokenStream;
use std::time::{Duration, Instant};

/// Text and counters of one fully drained pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Consumed {
    pub full_text: String,
    pub token_count: usize,
    pub elapsed: Duration,
}

impl Consumed {
    /// Tokens per second, or `None` when no time was measured.
    pub fn throughput(&self) -> Option<f64> {
        let secs = self.elapsed.as_secs_f64();
        (secs > 0.0).then(|| self.token_count as f64 / secs)
    }

    /// Multi-line summary written to the debug view after each pass.
    pub fn stats(&self) -> String {
        let mut lines = Vec::with_capacity(3);
        if let Some(rate) = self.throughput() {
            lines.push(format!("Average speed: {rate:.2} tok/s"));
        }
        lines.push(format!("Tokens: {}", self.token_count));
        lines.push(format!("Elapsed Time: {:.2}s", self.elapsed.as_secs_f64()));
        lines.join("\n")
    }
}

#[derive(Debug)]
pub enum StreamOutcome {
    Completed(Consumed),
    Cancelled,
}

/// Drain `stream`, handing every non-empty token to `on_token`.
///
/// The cancel flag is checked before each read and again before each token is
/// delivered; once it is set the stream is dropped without being drained.
pub fn consume<F>(
    mut stream: TokenStream<'_>,
    cancel: &CancelFlag,
    mut on_token: F,
) -> Result<StreamOutcome, ModelError>
where
    F: FnMut(&str),
{
    let started = Instant::now();
    let mut full_text = String::new();
    let mut token_count = 0usize;
    loop {
        if cancel.is_cancelled() {
            return Ok(StreamOutcome::Cancelled);
        }
        let Some(token) = stream.next() else {
            break;
        };
        let token = token?;
        if token.is_empty() {
            continue;
        }
        if cancel.is_cancelled() {
            return Ok(StreamOutcome::Cancelled);
        }
        token_count += 1;
        on_token(&token);
        full_text.push_str(&token);
    }
    Ok(StreamOutcome::Completed(Consumed {
        full_text,
        token_count,
        elapsed: started.elapsed(),
    }))
}

#[cfg(test)]
mod tests {
    use super::{Consumed, StreamOutcome, consume};
    use crate::error::ModelError;
    use crate::generate::CancelFlag;
    use crate::model::TokenStream;
    use std::time::Duration;

    fn stream_of(tokens: Vec<Result<&'static str, ModelError>>) -> TokenStream<'static> {
        Box::new(tokens.into_iter().map(|token| token.map(str::to_string)))
    }

    #[test]
    fn accumulates_non_empty_tokens() {
        let mut seen = Vec::new();
        let outcome = consume(
            stream_of(vec![Ok("Sept"), Ok(""), Ok("ember"), Ok(" 10:")]),
            &CancelFlag::new(),
            |token| seen.push(token.to_string()),
        )
        .unwrap();
        let StreamOutcome::Completed(consumed) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(consumed.full_text, "September 10:");
        assert_eq!(consumed.token_count, 3);
        assert_eq!(seen, vec!["Sept", "ember", " 10:"]);
    }

    #[test]
    fn stream_error_propagates() {
        let result = consume(
            stream_of(vec![Ok("a"), Err(ModelError::Network("reset".into())), Ok("b")]),
            &CancelFlag::new(),
            |_| {},
        );
        assert!(matches!(result, Err(ModelError::Network(_))));
    }

    #[test]
    fn cancellation_stops_delivery() {
        let cancel = CancelFlag::new();
        let mut seen = Vec::new();
        let outcome = consume(
            stream_of(vec![Ok("a"), Ok("b"), Ok("c")]),
            &cancel,
            |token| {
                seen.push(token.to_string());
                cancel.cancel();
            },
        )
        .unwrap();
        assert!(matches!(outcome, StreamOutcome::Cancelled));
        assert_eq!(seen, vec!["a"]);
    }

    #[test]
    fn throughput_needs_elapsed_time() {
        let mut consumed = Consumed {
            full_text: String::new(),
            token_count: 10,
            elapsed: Duration::ZERO,
        };
        assert_eq!(consumed.throughput(), None);
        assert!(!consumed.stats().contains("Average speed"));

        consumed.elapsed = Duration::from_secs(2);
        assert_eq!(consumed.throughput(), Some(5.0));
        assert_eq!(
            consumed.stats(),
            "Average speed: 5.00 tok/s\nTokens: 10\nElapsed Time: 2.00s"
        );
    }
}
