//! Heuristic keyword and summary extraction.
//!
//! The deterministic fallback used when no external extractor supplies
//! keywords for a visit. Frequency-ranked tokens with a title boost, a
//! sentence-accumulated summary, and a leading content snippet. Pure:
//! identical inputs always produce identical output.

use crate::config::EngineConfig;
use std::collections::{HashMap, HashSet};

/// Common terms dropped before scoring.
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
    "do", "does", "did", "will", "would", "shall", "should", "may", "might", "must", "can",
    "could", "of", "in", "to", "for", "with", "on", "at", "from", "by", "about", "as", "into",
    "through", "during", "before", "after", "above", "below", "between", "out", "off", "over",
    "under", "again", "further", "then", "once", "here", "there", "when", "where", "why", "how",
    "all", "each", "every", "both", "few", "more", "most", "other", "some", "such", "no", "nor",
    "not", "only", "own", "same", "so", "than", "too", "very", "just", "because", "but", "and",
    "or", "if", "while", "that", "this", "these", "those", "it", "its", "they", "them", "their",
    "we", "our", "you", "your", "he", "she", "his", "her", "which", "what", "who", "whom", "up",
    "down", "any", "also", "one", "two", "new", "use", "used", "using", "get", "got", "make",
    "made", "like", "time", "page", "home", "back", "see", "way", "many", "much", "still",
    "even", "well", "first", "last", "now", "since", "until", "upon", "per", "via", "within",
    "without", "across", "around", "along", "among", "behind", "beyond", "near", "toward",
    "towards", "against", "however", "therefore", "thus", "etc", "ie", "eg", "says", "said",
    "including", "another", "although", "though", "yet", "nbsp",
];

/// Weight added to a token that also appears in the title.
const TITLE_BOOST: usize = 3;

/// Output of the heuristic extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    /// Up to `max_keywords_per_page` terms, highest score first.
    pub keywords: Vec<String>,
    /// Sentence-accumulated summary, at most `max_summary_length` chars.
    pub summary: String,
    /// Leading slice of the body, at most `max_context_snippet_length` chars.
    pub snippet: String,
}

/// Extract keywords, a summary, and a snippet from a page title and body.
pub fn extract(title: &str, text: &str, config: &EngineConfig) -> Extraction {
    Extraction {
        keywords: extract_keywords(title, text, config.max_keywords_per_page),
        summary: build_summary(text, config.max_summary_length),
        snippet: truncate_chars(text, config.max_context_snippet_length).to_string(),
    }
}

/// Frequency-ranked keywords with a title boost.
///
/// Tokens are lowercased, split on non-alphanumeric boundaries, and
/// filtered against the stop list. Score is body occurrence count plus
/// [`TITLE_BOOST`] when the token appears in the title. Ties break
/// lexicographically.
pub fn extract_keywords(title: &str, text: &str, max_keywords: usize) -> Vec<String> {
    let stop: HashSet<&str> = STOP_WORDS.iter().copied().collect();

    let title_tokens: HashSet<String> = tokenize(title)
        .filter(|t| !stop.contains(t.as_str()))
        .collect();

    let mut scores: HashMap<String, usize> = HashMap::new();
    for token in tokenize(text) {
        if !stop.contains(token.as_str()) {
            *scores.entry(token).or_insert(0) += 1;
        }
    }

    // Title-only tokens still participate via the boost.
    for token in &title_tokens {
        *scores.entry(token.clone()).or_insert(0) += TITLE_BOOST;
    }

    let mut ranked: Vec<(String, usize)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(max_keywords);
    ranked.into_iter().map(|(token, _)| token).collect()
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.len() >= 3)
        .map(|word| word.to_lowercase())
}

/// Accumulate sentences in order until the summary reaches `max * 2/3`
/// chars, never letting it exceed `max`.
fn build_summary(text: &str, max: usize) -> String {
    let target = max * 2 / 3;
    let mut summary = String::new();
    let mut len = 0usize;

    for sentence in split_sentences(text) {
        let sentence_len = sentence.chars().count();
        let separator = usize::from(!summary.is_empty());
        if len + separator + sentence_len > max {
            break;
        }
        if separator == 1 {
            summary.push(' ');
        }
        summary.push_str(sentence);
        len += separator + sentence_len;
        if len >= target {
            break;
        }
    }

    summary
}

/// Split on `.`, `!`, or `?` followed by whitespace, keeping terminators.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            let end = i + c.len_utf8();
            let followed_by_space = chars.peek().map(|(_, next)| next.is_whitespace());
            if followed_by_space == Some(true) {
                let sentence = text[start..end].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                start = end;
            }
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// First `max_chars` characters of `text`; never splits a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    #[test]
    fn keywords_ranked_by_score_then_lex() {
        let text = "rust tokio tokio async async async runtime";
        let keywords = extract_keywords("Tokio Runtime", text, 12);
        // async: 3, tokio: 2+3, runtime: 1+3, rust: 1
        assert_eq!(keywords, vec!["tokio", "runtime", "async", "rust"]);
    }

    #[test]
    fn title_only_tokens_survive() {
        let keywords = extract_keywords("Quantum Entanglement", "nothing relevant here", 12);
        assert!(keywords.contains(&"quantum".to_string()));
        assert!(keywords.contains(&"entanglement".to_string()));
    }

    #[test]
    fn stop_words_dropped() {
        let keywords = extract_keywords("The And About", "the the the and about with from", 12);
        assert!(keywords.is_empty());
    }

    #[test]
    fn caps_at_limit() {
        let text = (0..40).map(|i| format!("term{} ", i)).collect::<String>();
        let keywords = extract_keywords("", &text, 12);
        assert_eq!(keywords.len(), 12);
    }

    #[test]
    fn extraction_is_deterministic() {
        let title = "Observability in Rust services";
        let text = "Tracing spans capture latency. Metrics record counters! Logs carry context? \
                    Exporters ship everything elsewhere.";
        let a = extract(title, text, &config());
        let b = extract(title, text, &config());
        assert_eq!(a, b);
    }

    #[test]
    fn summary_accumulates_whole_sentences() {
        let text = "First sentence here. Second one follows! Third asks a question? Fourth trails off";
        let summary = build_summary(text, 1500);
        assert!(summary.starts_with("First sentence here."));
        assert!(summary.contains("Fourth trails off"));
    }

    #[test]
    fn summary_respects_hard_cap() {
        let sentence = format!("{}.", "x".repeat(700));
        let text = format!("{} {} {}", sentence, sentence, sentence);
        let summary = build_summary(&text, 1500);
        let len = summary.chars().count();
        assert!(len <= 1500, "summary length {} exceeds cap", len);
        // Two sentences fit (1402 chars); the third would overflow.
        assert_eq!(len, 1403);
    }

    #[test]
    fn summary_stops_after_target() {
        let sentence = format!("{}.", "y".repeat(1100));
        let text = format!("{} short tail.", sentence);
        let summary = build_summary(&text, 1500);
        // First sentence alone passes the 1000-char target.
        assert_eq!(summary.chars().count(), 1101);
    }

    #[test]
    fn snippet_truncates_on_char_boundary() {
        let text = "héllo wörld ".repeat(400);
        let snippet = truncate_chars(&text, 3000);
        assert_eq!(snippet.chars().count(), 3000);
        // Still valid UTF-8 by construction; make sure we didn't lose a char.
        assert!(text.starts_with(snippet));
    }

    #[test]
    fn abbreviation_without_space_does_not_split() {
        let sentences = split_sentences("Version 1.2 shipped. Done");
        assert_eq!(sentences, vec!["Version 1.2 shipped.", "Done"]);
    }
}
