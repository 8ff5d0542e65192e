//! Splitting answers into independently selectable sections.
//!
//! Paragraphs are separated by blank lines. Numbered list items (`1.`,
//! `2.`, ...) at the start of a line open a section of their own even
//! without a blank line before them.

use crate::tree::AnswerSection;
use regex::Regex;
use std::sync::OnceLock;

fn list_item_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\s*\d+\.(\s|$)").expect("valid list item pattern"))
}

/// Parse answer text into ordered sections with fresh ids.
pub fn parse_answer_into_sections(answer: &str) -> Vec<AnswerSection> {
    let normalized = answer.replace("\r\n", "\n");

    let mut candidates: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in normalized.lines() {
        if line.trim().is_empty() {
            flush(&mut current, &mut candidates);
            continue;
        }
        if list_item_pattern().is_match(line) {
            flush(&mut current, &mut candidates);
        }
        current.push(line);
    }
    flush(&mut current, &mut candidates);

    candidates
        .into_iter()
        .enumerate()
        .map(|(index, text)| AnswerSection {
            id: uuid::Uuid::new_v4().to_string(),
            text,
            index,
        })
        .collect()
}

fn flush(current: &mut Vec<&str>, candidates: &mut Vec<String>) {
    if current.is_empty() {
        return;
    }
    let text = current.join("\n").trim().to_string();
    current.clear();
    if !text.is_empty() {
        candidates.push(text);
    }
}
