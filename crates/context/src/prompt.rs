//! Prompt and context assembly

use folio_common::llm::{Message, Role};
use folio_common::models::SearchResult;

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

const GENERAL_PERSONA: &str = "You are a helpful, knowledgeable assistant. Answer clearly and \
accurately. If you are not sure about something, say so instead of guessing.";

const RAG_PERSONA: &str = "You are an expert document analyst. Answer the user's question using \
ONLY the document excerpts provided below.

Guidelines:
- Give a thorough, well-structured, long-form answer that covers every relevant detail in the excerpts.
- Cite the excerpts inline as [Source N] after each claim you take from them.
- Quote exact figures, dates and names as they appear in the excerpts.
- If the excerpts do not contain the answer, say so plainly. Do not use outside knowledge.";

/// Join sources into a numbered citation block
///
/// Each source is headed `[Source i, Page p]`, numbered from 1 in rank order.
pub fn build_context(sources: &[SearchResult]) -> String {
    sources
        .iter()
        .enumerate()
        .map(|(i, source)| {
            format!(
                "[Source {}, Page {}]\n{}",
                i + 1,
                source.page_number(),
                source.chunk.text.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// System prompt for the given context; empty context selects the general persona
pub fn system_prompt(context: &str) -> String {
    if context.is_empty() {
        GENERAL_PERSONA.to_string()
    } else {
        format!("{}\n\nDocument excerpts:\n\n{}", RAG_PERSONA, context)
    }
}

/// Full message list for a generation call
///
/// Only the last `history_window` user and assistant turns are kept.
pub fn build_messages(context: &str, query: &str, history: &[Message], history_window: usize) -> Vec<Message> {
    let turns: Vec<&Message> = history.iter().filter(|m| m.role != Role::System).collect();
    let skip = turns.len().saturating_sub(history_window);

    let mut messages = Vec::with_capacity(history_window + 2);
    messages.push(Message::system(system_prompt(context)));
    messages.extend(turns.into_iter().skip(skip).cloned());
    messages.push(Message::user(query));
    messages
}

/// Remove `<think>...</think>` blocks some local models emit
///
/// An unterminated block hides everything after its opening tag.
pub fn strip_reasoning(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(THINK_OPEN) {
        out.push_str(&rest[..start]);
        match rest[start..].find(THINK_CLOSE) {
            Some(end) => rest = &rest[start + end + THINK_CLOSE.len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);

    if out.len() == text.len() {
        out
    } else {
        out.trim().to_string()
    }
}
