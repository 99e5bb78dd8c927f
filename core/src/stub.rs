//! Deterministic offline answers, used when no model tier responds.

use serde_json::{json, Value};

/// First `max_sentences` sentences of `text`, whitespace collapsed.
///
/// A sentence ends at `.`, `!` or `?` followed by whitespace (or the end of
/// the text).
pub fn summarize(text: &str, max_sentences: usize) -> String {
    let mut sentences = Vec::new();
    let mut current = Vec::new();
    for word in text.split_whitespace() {
        current.push(word);
        if word.ends_with(['.', '!', '?']) {
            sentences.push(current.join(" "));
            current.clear();
        }
    }
    if !current.is_empty() {
        sentences.push(current.join(" "));
    }

    sentences
        .into_iter()
        .take(max_sentences)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Translate, proofread, rewrite and simplify hand the input back.
pub fn identity(text: &str) -> String {
    text.to_string()
}

pub fn write(prompt: &str) -> String {
    format!("Draft: {prompt}")
}

pub fn structured(prompt: &str) -> Value {
    json!({ "text": prompt })
}
