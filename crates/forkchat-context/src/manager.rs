//! Preparing a follow-up question from a point in the tree.

use crate::error::{ContextError, Result};
use crate::render::{build_prompt, ContextBuilder};
use forkchat_tree::{NodeId, TreeStore};
use serde::Serialize;
use tracing::{debug, warn};

/// A question ready to send to a provider, with the branch it extends.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedQuestion {
    /// Node the answer will hang under (None starts a new root)
    pub parent_id: Option<NodeId>,

    /// Section of the parent's answer the question is about
    pub selected_section_index: Option<usize>,

    pub question: String,

    /// Rendered ancestor context, empty for a new root
    pub context: String,

    /// Final text for the provider
    pub prompt: String,
}

/// Derive context and prompt for `question` asked under `parent_id`.
///
/// The chain always comes from the store. A section index outside the
/// parent's sections is dropped with a warning so that the recorded
/// answer does not claim a selection that never reached the prompt.
pub fn prepare_question(
    store: &TreeStore,
    builder: &ContextBuilder,
    parent_id: Option<&str>,
    selected_section_index: Option<usize>,
    question: &str,
) -> Result<PreparedQuestion> {
    let Some(parent_id) = parent_id else {
        if selected_section_index.is_some() {
            warn!("Section selection without a parent ignored");
        }
        return Ok(PreparedQuestion {
            parent_id: None,
            selected_section_index: None,
            question: question.to_string(),
            context: String::new(),
            prompt: question.to_string(),
        });
    };

    let parent = store
        .get_node(parent_id)
        .ok_or_else(|| ContextError::NodeNotFound(parent_id.to_string()))?;

    let selected_section_index = selected_section_index.filter(|&index| {
        let available = store.sections_for(parent_id).map(|s| s.len()).unwrap_or(0);
        if index >= available {
            warn!(parent = %parent_id, index, available, "Selected section out of range");
            return false;
        }
        true
    });

    let chain = store.node_chain_checked(parent_id)?;
    let context = builder.build_context(parent, &chain, selected_section_index);
    let prompt = build_prompt(question, &context);

    debug!(
        parent = %parent_id,
        depth = chain.len(),
        context_chars = context.len(),
        "Question prepared"
    );

    Ok(PreparedQuestion {
        parent_id: Some(parent_id.to_string()),
        selected_section_index,
        question: question.to_string(),
        context,
        prompt,
    })
}
