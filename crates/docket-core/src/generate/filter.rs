pub const THINK_OPEN: &str = "<think>";
pub const THINK_CLOSE: &str = "</think>";

/// Incremental filter that drops `<think>...</think>` spans from a token stream.
///
/// Only a tail that could still complete a marker is held back between calls, so
/// the pending buffer never exceeds `marker.len() - 1` bytes. A span that is never
/// closed produces no output at all.
#[derive(Debug, Default)]
pub struct ThinkFilter {
    pending: String,
    inside: bool,
}

impl ThinkFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_inside(&self) -> bool {
        self.inside
    }

    /// Feed one token; returns the visible part that can be released now.
    pub fn filter(&mut self, token: &str) -> String {
        if token.is_empty() {
            return String::new();
        }
        self.pending.push_str(token);

        let mut out = String::new();
        while !self.pending.is_empty() {
            if self.inside {
                if let Some(end) = self.pending.find(THINK_CLOSE) {
                    self.pending.drain(..end + THINK_CLOSE.len());
                    self.inside = false;
                } else {
                    let cut = self.pending.len() - partial_marker_len(&self.pending, THINK_CLOSE);
                    self.pending.drain(..cut);
                    break;
                }
            } else if let Some(start) = self.pending.find(THINK_OPEN) {
                out.push_str(&self.pending[..start]);
                self.pending.drain(..start + THINK_OPEN.len());
                self.inside = true;
            } else {
                let cut = self.pending.len() - partial_marker_len(&self.pending, THINK_OPEN);
                out.push_str(&self.pending[..cut]);
                self.pending.drain(..cut);
                break;
            }
        }
        out
    }

    /// Release whatever was held back once the stream is exhausted.
    ///
    /// Text parked as a possible opening marker is visible; anything inside an
    /// unterminated span is dropped.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        if self.inside { String::new() } else { rest }
    }
}

/// Length of the longest suffix of `buf` that is a proper prefix of `marker`.
fn partial_marker_len(buf: &str, marker: &str) -> usize {
    let max = (marker.len() - 1).min(buf.len());
    (1..=max)
        .rev()
        .find(|&n| {
            let start = buf.len() - n;
            buf.is_char_boundary(start) && marker.starts_with(&buf[start..])
        })
        .unwrap_or(0)
}

/// One-shot cleanup of a finished summarization pass.
///
/// Keeps the text after the first closing marker (or all of it when there is none),
/// trims every line and drops blank ones.
pub fn clean_summary(raw: &str) -> String {
    let body = match raw.find(THINK_CLOSE) {
        Some(end) => &raw[end + THINK_CLOSE.len()..],
        None => raw,
    };
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::{ThinkFilter, clean_summary, partial_marker_len};

    fn run_chunks(chunks: &[&str]) -> String {
        let mut filter = ThinkFilter::new();
        let mut out = String::new();
        for chunk in chunks {
            out.push_str(&filter.filter(chunk));
        }
        out.push_str(&filter.finish());
        out
    }

    fn every_two_way_split(input: &str) -> Vec<(String, String)> {
        (0..=input.len())
            .filter(|&i| input.is_char_boundary(i))
            .map(|i| (input[..i].to_string(), input[i..].to_string()))
            .collect()
    }

    #[test]
    fn clean_text_passes_through_any_chunking() {
        let input = "September 10:\nConsent:\n- Budget < 5% (see a<b)\n";
        assert_eq!(run_chunks(&[input]), input);
        for (head, tail) in every_two_way_split(input) {
            assert_eq!(run_chunks(&[&head, &tail]), input, "split at {}", head.len());
        }
        let singles: Vec<String> = input.chars().map(String::from).collect();
        let refs: Vec<&str> = singles.iter().map(String::as_str).collect();
        assert_eq!(run_chunks(&refs), input);
    }

    #[test]
    fn think_span_is_removed_for_every_split() {
        let input = "A<think>B</think>C";
        assert_eq!(run_chunks(&[input]), "AC");
        for (head, tail) in every_two_way_split(input) {
            assert_eq!(run_chunks(&[&head, &tail]), "AC", "split at {}", head.len());
        }
        for i in 0..=input.len() {
            for j in i..=input.len() {
                let parts = [&input[..i], &input[i..j], &input[j..]];
                assert_eq!(run_chunks(&parts), "AC", "split at {i}/{j}");
            }
        }
    }

    #[test]
    fn markers_split_one_byte_at_a_time() {
        let chunks = ["A", "<", "t", "h", "i", "n", "k", ">", "B", "<", "/", "think", ">", "C"];
        assert_eq!(run_chunks(&chunks), "AC");
    }

    #[test]
    fn unterminated_span_never_flushes() {
        assert_eq!(run_chunks(&["A<think>B"]), "A");
        assert_eq!(run_chunks(&["A<thi", "nk>B", "</thi"]), "A");
    }

    #[test]
    fn multiple_spans_and_empty_tokens() {
        let mut filter = ThinkFilter::new();
        assert_eq!(filter.filter(""), "");
        assert_eq!(filter.filter("x<think>1</think>y<think>"), "xy");
        assert!(filter.is_inside());
        assert_eq!(filter.filter("2</think>z"), "z");
        assert!(!filter.is_inside());
        assert_eq!(filter.finish(), "");
    }

    #[test]
    fn pending_tail_is_bounded() {
        let mut filter = ThinkFilter::new();
        assert_eq!(filter.filter("text<thin"), "text");
        assert_eq!(filter.pending, "<thin");
        assert!(filter.pending.len() < "<think>".len());
        assert_eq!(filter.finish(), "<thin");
    }

    #[test]
    fn partial_marker_len_matches_prefixes_only() {
        assert_eq!(partial_marker_len("abc<", "<think>"), 1);
        assert_eq!(partial_marker_len("abc<th", "<think>"), 3);
        assert_eq!(partial_marker_len("abc<tx", "<think>"), 0);
        assert_eq!(partial_marker_len("é", "<think>"), 0);
    }

    #[test]
    fn clean_summary_drops_reasoning_and_blank_lines() {
        let raw = "...reasoning...</think>\nLine1\nLine2\n";
        assert_eq!(clean_summary(raw), "Line1\nLine2");
    }

    #[test]
    fn clean_summary_without_marker_keeps_text() {
        let raw = "\n  Meeting Date: September 10  \n\nConsent: Budget\n\n";
        assert_eq!(clean_summary(raw), "Meeting Date: September 10\nConsent: Budget");
    }
}
