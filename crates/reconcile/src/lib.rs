//! Decides whether a second-pass correction should replace a window of the
//! original transcript, and merges the accepted corrections back in.

use std::sync::LazyLock;

use regex::Regex;
use retrace_clustering::Word;

const HALLUCINATION_RATIO_THRESHOLD: f64 = 0.70;
const MIN_ACCEPTED_LENGTH: usize = 3;

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s]").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static PURE_PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^[.,!?;:'"()\-]+$"#).unwrap());

/// Lowercases, strips everything but word characters and whitespace,
/// collapses runs of whitespace, and trims. Aggressive by design: surface
/// differences like punctuation or casing must not contribute to edit
/// distance.
fn clean(s: &str) -> String {
    let lowered = s.to_lowercase();
    let stripped = NON_WORD.replace_all(&lowered, "");
    WHITESPACE.replace_all(&stripped, " ").trim().to_string()
}

/// Classical Wagner-Fischer edit distance (insert/delete/substitute, cost 1
/// each) over Unicode scalar values.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let mut row: Vec<usize> = (0..=b.len()).collect();

    for i in 1..=a.len() {
        let mut prev_diag = row[0];
        row[0] = i;
        for j in 1..=b.len() {
            let above = row[j];
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            row[j] = (row[j - 1] + 1).min(above + 1).min(prev_diag + cost);
            prev_diag = above;
        }
    }

    row[b.len()]
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub original_text: String,
    pub corrected_text: String,
    pub levenshtein_distance: usize,
    pub should_apply: bool,
    pub reason: Option<String>,
}

/// Judges a single candidate correction against the original words it
/// would replace.
pub fn evaluate(words: &[Word], corrected_text: &str, clip_start: f64, clip_end: f64) -> Evaluation {
    let words_in_window: Vec<&Word> =
        words.iter().filter(|w| w.start >= clip_start && w.end <= clip_end).collect();

    let original_text =
        words_in_window.iter().map(|w| w.text.as_str()).collect::<Vec<_>>().join(" ");

    let cleaned_original = clean(&original_text);
    let cleaned_correction = clean(corrected_text);

    let distance = levenshtein(&cleaned_original, &cleaned_correction);
    let longest = cleaned_original.chars().count().max(cleaned_correction.chars().count());
    let ratio = if longest == 0 { 0.0 } else { distance as f64 / longest as f64 };

    let reason = if cleaned_correction.is_empty()
        || cleaned_correction == "[unintelligible]"
        || cleaned_correction.chars().count() < MIN_ACCEPTED_LENGTH
    {
        Some("empty or unintelligible".to_string())
    } else if ratio > HALLUCINATION_RATIO_THRESHOLD {
        Some("Levenshtein ratio too high".to_string())
    } else if cleaned_original == cleaned_correction {
        Some("No changes".to_string())
    } else {
        None
    };

    Evaluation {
        original_text,
        corrected_text: corrected_text.to_string(),
        levenshtein_distance: distance,
        should_apply: reason.is_none(),
        reason,
    }
}

/// An accepted-or-rejected correction, ordered into the merge by
/// `clip_start`.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionCandidate {
    pub clip_start: f64,
    pub clip_end: f64,
    pub corrected_text: String,
    pub should_apply: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeResult {
    pub text: String,
    pub applied_corrections: usize,
    pub skipped_corrections: usize,
}

/// Rewrites the original word sequence by splicing in accepted corrections
/// at their clip windows. Clustering's output is already non-overlapping,
/// so the sort by `clip_start` here is stable and sufficient; this does
/// not re-verify non-overlap.
pub fn merge(words: &[Word], corrections: &[CorrectionCandidate]) -> MergeResult {
    let mut ordered: Vec<&CorrectionCandidate> = corrections.iter().collect();
    ordered.sort_by(|a, b| a.clip_start.partial_cmp(&b.clip_start).unwrap());

    let mut tokens: Vec<String> = Vec::new();
    let mut cursor = 0usize;
    let mut applied = 0usize;
    let mut skipped = 0usize;

    for c in ordered {
        if !c.should_apply {
            skipped += 1;
            continue;
        }

        while cursor < words.len() && words[cursor].end <= c.clip_start {
            tokens.push(words[cursor].text.clone());
            cursor += 1;
        }

        tokens.push(c.corrected_text.clone());
        applied += 1;

        // A word is replaced by this correction if it's wholly inside the
        // clip window; mirrors the end <= clipStart rule used to decide
        // which words get emitted ahead of the window.
        while cursor < words.len() && words[cursor].end <= c.clip_end {
            cursor += 1;
        }
    }

    while cursor < words.len() {
        tokens.push(words[cursor].text.clone());
        cursor += 1;
    }

    MergeResult { text: join_tokens(&tokens), applied_corrections: applied, skipped_corrections: skipped }
}

fn join_tokens(tokens: &[String]) -> String {
    let mut out = String::new();
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 && !PURE_PUNCTUATION.is_match(token) && !PURE_PUNCTUATION.is_match(&tokens[i - 1]) {
            out.push(' ');
        }
        out.push_str(token);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(text: &str, start: f64, end: f64) -> Word {
        Word { text: text.to_string(), start, end, confidence: 0.0 }
    }

    #[test]
    fn hallucination_is_rejected() {
        let words = vec![w("the", 0.0, 0.3), w("red", 0.3, 0.6), w("fox", 0.6, 0.9)];
        let eval = evaluate(&words, "Completely different sentence with no relation", 0.0, 0.9);
        assert!(!eval.should_apply);
        assert!(eval.reason.unwrap().contains("Levenshtein"));
    }

    #[test]
    fn sentinel_is_rejected() {
        let words = vec![w("the", 0.0, 0.3), w("red", 0.3, 0.6), w("fox", 0.6, 0.9)];
        let eval = evaluate(&words, "[unintelligible]", 0.0, 0.9);
        assert!(!eval.should_apply);
        assert!(eval.reason.unwrap().contains("empty or unintelligible"));
    }

    #[test]
    fn identical_cleaned_text_is_rejected_as_no_change() {
        let words = vec![w("Hello,", 0.0, 0.5), w("world!", 0.5, 1.0)];
        let eval = evaluate(&words, "hello world", 0.0, 1.0);
        assert!(!eval.should_apply);
        assert_eq!(eval.reason.as_deref(), Some("No changes"));
    }

    #[test]
    fn plausible_correction_is_accepted() {
        let words = vec![w("mumbly", 0.5, 1.0)];
        let eval = evaluate(&words, "humbly", 0.3, 1.2);
        assert!(eval.should_apply);
        assert!(eval.reason.is_none());
    }

    #[test]
    fn merge_with_one_acceptance_splices_correction_in() {
        let words = vec![w("Hello", 0.0, 0.5), w("mumbly", 0.5, 1.0), w("world", 1.0, 1.5)];
        let corrections = vec![CorrectionCandidate {
            clip_start: 0.3,
            clip_end: 1.2,
            corrected_text: "beautiful".to_string(),
            should_apply: true,
        }];

        let result = merge(&words, &corrections);

        assert_eq!(result.text, "beautiful world");
        assert_eq!(result.applied_corrections, 1);
        assert_eq!(result.skipped_corrections, 0);
    }

    #[test]
    fn zero_corrections_round_trips_original_words() {
        let words = vec![w("Hello", 0.0, 0.5), w("world", 0.5, 1.0)];
        let result = merge(&words, &[]);
        assert_eq!(result.text, "Hello world");
        assert_eq!(result.applied_corrections, 0);
        assert_eq!(result.skipped_corrections, 0);
    }

    #[test]
    fn rejected_correction_is_skipped_and_leaves_original_words() {
        let words = vec![w("Hello", 0.0, 0.5), w("world", 0.5, 1.0)];
        let corrections = vec![CorrectionCandidate {
            clip_start: 0.0,
            clip_end: 1.0,
            corrected_text: "junk".to_string(),
            should_apply: false,
        }];

        let result = merge(&words, &corrections);

        assert_eq!(result.text, "Hello world");
        assert_eq!(result.applied_corrections, 0);
        assert_eq!(result.skipped_corrections, 1);
    }

    #[test]
    fn punctuation_token_gets_no_leading_space() {
        let words = vec![w("Hello", 0.0, 0.5)];
        let corrections = vec![CorrectionCandidate {
            clip_start: 0.5,
            clip_end: 0.6,
            corrected_text: ",".to_string(),
            should_apply: true,
        }];
        let result = merge(&words, &corrections);
        assert_eq!(result.text, "Hello,");
    }
}
