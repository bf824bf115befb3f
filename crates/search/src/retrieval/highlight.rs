//! Display text for search results

use super::rerank::query_terms;

/// First `max_chars` characters of `text`, with an ellipsis when cut
pub fn snippet(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", text[..cut].trim_end()),
        None => text.to_string(),
    }
}

/// Sentences of `text` that mention a query term longer than three characters
///
/// Falls back to `fallback` when nothing matches.
pub fn highlights(text: &str, query: &str, max: usize, fallback: &str) -> Vec<String> {
    let terms: Vec<String> = query_terms(query)
        .into_iter()
        .filter(|t| t.chars().count() > 3)
        .collect();

    let found: Vec<String> = sentences(text)
        .filter(|sentence| {
            let lower = sentence.to_lowercase();
            terms.iter().any(|term| lower.contains(term.as_str()))
        })
        .take(max)
        .map(str::to_string)
        .collect();

    if found.is_empty() {
        vec![fallback.to_string()]
    } else {
        found
    }
}

fn sentences(text: &str) -> impl Iterator<Item = &str> {
    text.split_inclusive(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snippet_truncates_on_char_boundary() {
        assert_eq!(snippet("short text", 200), "short text");
        assert_eq!(snippet("héllo world", 5), "héllo...");
    }

    #[test]
    fn test_highlights_pick_matching_sentences() {
        let text = "Fees are due monthly. Either party may invoke termination with notice. \
                    Notice must be written! Governing law is Delaware.";
        let found = highlights(text, "termination notice", 3, "fallback");
        assert_eq!(
            found,
            vec![
                "Either party may invoke termination with notice.",
                "Notice must be written!",
            ]
        );
    }

    #[test]
    fn test_highlights_ignore_short_terms_and_fall_back() {
        let found = highlights("The cat sat.", "the cat", 3, "The cat sat.");
        assert_eq!(found, vec!["The cat sat."]);
    }
}
