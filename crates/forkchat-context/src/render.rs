//! Context rendering to injectable strings.
//!
//! Turns an ancestor chain into labelled `Q:`/`A:` blocks that are
//! prepended to the next question sent to a provider.

use forkchat_tree::{parse_answer_into_sections, ConversationNode};
use tracing::{debug, warn};

const BLOCK_SEPARATOR: &str = "\n\n";

/// Renderer for ancestor chains.
#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    /// Character budget for the rendered context; oldest blocks go first
    max_chars: Option<usize>,
}

impl ContextBuilder {
    /// Create a builder with no size limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder that keeps the context under `max_chars`.
    pub fn with_max_chars(max_chars: usize) -> Self {
        Self {
            max_chars: Some(max_chars),
        }
    }

    pub fn with_limit(max_chars: Option<usize>) -> Self {
        Self { max_chars }
    }

    pub fn max_chars(&self) -> Option<usize> {
        self.max_chars
    }

    /// Render `chain` (root first) as context for a question asked on `target`.
    ///
    /// Nodes excluded from context are skipped. When `selected_section_index`
    /// is given and the chain ends at `target`, that node contributes only
    /// the chosen section of its answer.
    pub fn build_context(
        &self,
        target: &ConversationNode,
        chain: &[&ConversationNode],
        selected_section_index: Option<usize>,
    ) -> String {
        let Some(last) = chain.last() else {
            return String::new();
        };

        let section_applies = selected_section_index.is_some() && last.id == target.id;
        if selected_section_index.is_some() && !section_applies {
            warn!(
                target = %target.id,
                terminal = %last.id,
                "Chain does not end at target, section selection ignored"
            );
        }

        let mut blocks: Vec<String> = Vec::with_capacity(chain.len());
        for (i, node) in chain.iter().enumerate() {
            if !node.includes_in_context() {
                continue;
            }
            let section = if section_applies && i == chain.len() - 1 {
                selected_section_index
            } else {
                None
            };
            blocks.push(render_block(node, section));
        }

        if let Some(max_chars) = self.max_chars {
            let dropped = trim_to_budget(&mut blocks, max_chars);
            if dropped > 0 {
                debug!(dropped, max_chars, "Oldest context blocks dropped");
            }
        }

        blocks.join(BLOCK_SEPARATOR)
    }
}

/// Wrap `question` with `context`, or return it unchanged when there is none.
pub fn build_prompt(question: &str, context: &str) -> String {
    if context.is_empty() {
        return question.to_string();
    }
    format!(
        "Context from previous conversation:\n{}\n\nCurrent question:\n{}",
        context, question
    )
}

fn render_block(node: &ConversationNode, section_index: Option<usize>) -> String {
    let mut block = format!("Q: {}", node.question);

    if let Some(index) = section_index {
        if let Some(text) = section_text(node, index) {
            block.push_str("\nA (selected section): ");
            block.push_str(&text);
            return block;
        }
        warn!(id = %node.id, index, "Selected section out of range, using full answer");
    }

    if !node.answer.is_empty() {
        block.push_str("\nA: ");
        block.push_str(&node.answer);
    } else if let Some(image) = node.image_data.as_ref().filter(|_| node.is_image()) {
        for url in &image.urls {
            block.push_str("\nA: [generated image] ");
            block.push_str(url);
        }
    }

    block
}

fn section_text(node: &ConversationNode, index: usize) -> Option<String> {
    match &node.answer_sections {
        Some(sections) => sections
            .iter()
            .find(|s| s.index == index)
            .map(|s| s.text.clone()),
        None => parse_answer_into_sections(&node.answer)
            .into_iter()
            .nth(index)
            .map(|s| s.text),
    }
}

/// Drop leading blocks until the joined length fits. The last block stays.
fn trim_to_budget(blocks: &mut Vec<String>, max_chars: usize) -> usize {
    let joined_len = |blocks: &[String]| -> usize {
        let text: usize = blocks.iter().map(|b| b.chars().count()).sum();
        text + BLOCK_SEPARATOR.len() * blocks.len().saturating_sub(1)
    };

    let mut dropped = 0;
    while blocks.len() > 1 && joined_len(blocks) > max_chars {
        blocks.remove(0);
        dropped += 1;
    }
    dropped
}
