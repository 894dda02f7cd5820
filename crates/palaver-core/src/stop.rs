//! Stop-sequence matching for streamed output.
//!
//! Sequences are checked in configuration order and the first hit wins,
//! even if a later sequence would match a longer suffix. Per sequence:
//! 1. the incoming fragment equals the sequence, or
//! 2. the accumulated text with the fragment appended ends with it.

use palaver_abi::split_reverse_prompt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopRule {
    Exact,
    Suffix,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopVerdict {
    Continue,
    Stop {
        sequence: String,
        rule: StopRule,
        /// Replacement text for the message when the matched suffix was cut off.
        /// `None` means the message keeps its text as it was before the fragment.
        trimmed: Option<String>,
    },
}

impl StopVerdict {
    #[inline]
    pub fn should_continue(&self) -> bool {
        matches!(self, StopVerdict::Continue)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopSequences {
    sequences: Vec<String>,
}

impl StopSequences {
    /// Empty sequences are dropped: they would match everything.
    pub fn new<I, S>(sequences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sequences: sequences
                .into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.is_empty())
                .collect(),
        }
    }

    /// Parse a comma-separated `reverse_prompt` value.
    pub fn from_config_value(raw: &str) -> Self {
        Self::new(split_reverse_prompt(raw))
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.sequences.iter().map(String::as_str)
    }

    pub fn evaluate(&self, fragment: &str, accumulated: &str) -> StopVerdict {
        if self.sequences.is_empty() {
            return StopVerdict::Continue;
        }

        let mut candidate = String::with_capacity(accumulated.len() + fragment.len());
        candidate.push_str(accumulated);
        candidate.push_str(fragment);

        for seq in &self.sequences {
            if fragment == seq {
                return StopVerdict::Stop {
                    sequence: seq.clone(),
                    rule: StopRule::Exact,
                    trimmed: None,
                };
            }
            if candidate.ends_with(seq.as_str()) {
                let trimmed = (seq.len() < candidate.len()).then(|| {
                    candidate.truncate(candidate.len() - seq.len());
                    candidate.clone()
                });
                return StopVerdict::Stop {
                    sequence: seq.clone(),
                    rule: StopRule::Suffix,
                    trimmed,
                };
            }
        }
        StopVerdict::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_match_trims_double_newline() {
        let stops = StopSequences::new(["\n\n"]);
        let verdict = stops.evaluate("\n", "Hello\n");
        assert_eq!(
            verdict,
            StopVerdict::Stop {
                sequence: "\n\n".into(),
                rule: StopRule::Suffix,
                trimmed: Some("Hello".into()),
            }
        );
    }

    #[test]
    fn exact_fragment_match_keeps_prior_text() {
        let stops = StopSequences::new(["</s>"]);
        match stops.evaluate("</s>", "Hi there") {
            StopVerdict::Stop { rule, trimmed, .. } => {
                assert_eq!(rule, StopRule::Exact);
                assert_eq!(trimmed, None);
            }
            other => panic!("expected stop, got {other:?}"),
        }
    }

    #[test]
    fn first_configured_sequence_wins() {
        // Both match as suffixes; list order decides, not length.
        let stops = StopSequences::new(["User:", "\nUser:"]);
        match stops.evaluate(":", "answer\nUser") {
            StopVerdict::Stop {
                sequence, trimmed, ..
            } => {
                assert_eq!(sequence, "User:");
                assert_eq!(trimmed.as_deref(), Some("answer\n"));
            }
            other => panic!("expected stop, got {other:?}"),
        }
    }

    #[test]
    fn whole_text_equal_to_sequence_is_not_trimmed() {
        let stops = StopSequences::new(["###"]);
        match stops.evaluate("#", "##") {
            StopVerdict::Stop { trimmed, .. } => assert_eq!(trimmed, None),
            other => panic!("expected stop, got {other:?}"),
        }
    }

    #[test]
    fn no_match_continues() {
        let stops = StopSequences::from_config_value(r"\n\n,USER:");
        assert!(stops.evaluate(" world", "Hello").should_continue());
        assert!(StopSequences::default().evaluate("x", "").should_continue());
    }

    #[test]
    fn trimming_holds_for_arbitrary_suffixes() {
        let cases = [("abc", "xyzabc"), ("ab\n", "line ab\n"), ("é!", "café!")];
        for (seq, text) in cases {
            let stops = StopSequences::new([seq]);
            // Feed the last char as the fragment so the suffix rule is the one that fires.
            let (split, _) = text.char_indices().last().unwrap();
            let (head, tail) = text.split_at(split);
            match stops.evaluate(tail, head) {
                StopVerdict::Stop { rule, trimmed, .. } => {
                    assert_eq!(rule, StopRule::Suffix);
                    assert_eq!(trimmed.as_deref(), text.strip_suffix(seq));
                }
                other => panic!("{seq:?} in {text:?}: {other:?}"),
            }
        }
    }
}
