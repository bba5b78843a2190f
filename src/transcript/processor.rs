use std::collections::VecDeque;

/// Turns a stream of interim/final speech events into display-ready text.
///
/// Finalized utterances accumulate in a FIFO capped at
/// `max_final_transcripts` (oldest evicted first); the interim preview is a
/// single slot fully replaced by each non-final event. Output is always
/// exactly `max_lines` lines of at most `max_chars_per_line` characters.
pub struct TranscriptProcessor {
    max_chars_per_line: usize,
    max_lines: usize,
    max_final_transcripts: usize,
    final_transcripts: VecDeque<String>,
    partial_text: String,
    last_transcript: String,
}

impl TranscriptProcessor {
    pub fn new(max_chars_per_line: usize, max_lines: usize, max_final_transcripts: usize) -> Self {
        Self {
            max_chars_per_line,
            max_lines,
            max_final_transcripts,
            final_transcripts: VecDeque::new(),
            partial_text: String::new(),
            last_transcript: String::new(),
        }
    }

    /// Processes one speech event and returns the re-wrapped view.
    ///
    /// Interim events replace the previous interim preview; final events
    /// discard the preview and append to the bounded FIFO.
    pub fn process(&mut self, text: Option<&str>, is_final: bool) -> String {
        let text = text.unwrap_or("").trim().to_string();

        if is_final {
            self.partial_text.clear();
            if !text.is_empty() {
                self.final_transcripts.push_back(text.clone());
                while self.final_transcripts.len() > self.max_final_transcripts {
                    self.final_transcripts.pop_front();
                }
            }
        } else {
            self.partial_text = text.clone();
        }

        self.last_transcript = text;
        self.current_view()
    }

    /// The current display view without mutating any state: wrapped final
    /// history followed by the wrapped interim preview, paginated to
    /// exactly `max_lines` lines.
    pub fn current_view(&self) -> String {
        let joined = self
            .final_transcripts
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ");

        let mut lines = Self::wrap_text(&joined, self.max_chars_per_line);
        lines.extend(Self::wrap_text(&self.partial_text, self.max_chars_per_line));
        self.paginate(lines)
    }

    /// The most recent raw utterance, interim or final.
    pub fn last_transcript(&self) -> &str {
        &self.last_transcript
    }

    pub fn clear(&mut self) {
        self.final_transcripts.clear();
        self.partial_text.clear();
    }

    /// Changes the FIFO capacity, retroactively evicting the oldest finals
    /// if it shrinks.
    pub fn set_max_final_transcripts(&mut self, max_final_transcripts: usize) {
        self.max_final_transcripts = max_final_transcripts;
        while self.final_transcripts.len() > self.max_final_transcripts {
            self.final_transcripts.pop_front();
        }
    }

    pub fn max_chars_per_line(&self) -> usize {
        self.max_chars_per_line
    }

    pub fn max_lines(&self) -> usize {
        self.max_lines
    }

    pub fn final_count(&self) -> usize {
        self.final_transcripts.len()
    }

    /// Greedy word wrap: fill up to `max_chars`, break at the last space
    /// at-or-before the limit, hard-cut tokens longer than a full line.
    fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
        let mut result = Vec::new();
        let mut chars: Vec<char> = text.trim().chars().collect();

        while !chars.is_empty() {
            if chars.len() <= max_chars {
                result.push(chars.iter().collect());
                break;
            }

            let mut split = max_chars;
            while split > 0 && chars[split] != ' ' {
                split -= 1;
            }
            if split == 0 {
                split = max_chars;
            }

            let chunk: String = chars[..split].iter().collect::<String>().trim().to_string();
            if !chunk.is_empty() {
                result.push(chunk);
            }

            let rest: String = chars[split..].iter().collect();
            chars = rest.trim().chars().collect();
        }

        result
    }

    /// Keeps the most recent `max_lines` lines and pads with empty trailing
    /// lines so the output line count is always exact.
    fn paginate(&self, mut lines: Vec<String>) -> String {
        if lines.len() > self.max_lines {
            lines.drain(..lines.len() - self.max_lines);
        }
        while lines.len() < self.max_lines {
            lines.push(String::new());
        }
        lines.join("\n")
    }
}
