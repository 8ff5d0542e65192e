//! Partial updates for `TreeStore::update_node`.

use super::{AnswerSection, Attachment, ConversationNode, ImageData, NodeType, ParamValue, Position};
use std::collections::BTreeMap;

/// Shallow merge applied to a stored node.
///
/// Only content and presentation fields are present; `id`, `parent_id` and
/// `children_ids` change through add/delete alone. Doubly optional fields
/// distinguish "leave as is" (`None`) from "clear" (`Some(None)`).
#[derive(Debug, Clone, Default)]
pub struct NodePatch {
    pub name: Option<String>,
    pub node_type: Option<NodeType>,
    pub question: Option<String>,
    pub answer: Option<String>,
    pub image_data: Option<Option<ImageData>>,
    pub answer_sections: Option<Option<Vec<AnswerSection>>>,
    pub include_in_context: Option<Option<bool>>,
    pub selected_section_index_from_parent: Option<Option<usize>>,
    pub is_bookmarked: Option<bool>,
    pub is_collapsed: Option<bool>,
    pub position: Option<Position>,
    pub model: Option<Option<String>>,
    pub provider: Option<Option<String>>,
    pub tokens: Option<Option<u64>>,
    pub cost: Option<Option<f64>>,
    pub processing_time_ms: Option<Option<u64>>,
    pub parameters: Option<BTreeMap<String, ParamValue>>,
    pub attachments: Option<Vec<Attachment>>,
    pub tags: Option<Vec<String>>,
}

impl NodePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn question(mut self, question: impl Into<String>) -> Self {
        self.question = Some(question.into());
        self
    }

    pub fn answer(mut self, answer: impl Into<String>) -> Self {
        self.answer = Some(answer.into());
        self
    }

    pub fn sections(mut self, sections: Vec<AnswerSection>) -> Self {
        self.answer_sections = Some(Some(sections));
        self
    }

    pub fn include_in_context(mut self, include: Option<bool>) -> Self {
        self.include_in_context = Some(include);
        self
    }

    pub fn bookmarked(mut self, bookmarked: bool) -> Self {
        self.is_bookmarked = Some(bookmarked);
        self
    }

    pub fn collapsed(mut self, collapsed: bool) -> Self {
        self.is_collapsed = Some(collapsed);
        self
    }

    pub fn position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    pub fn usage(mut self, tokens: u64, cost: f64) -> Self {
        self.tokens = Some(Some(tokens));
        self.cost = Some(Some(cost));
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Merge into `node`. Returns true if any field was set.
    ///
    /// A new `answer` without new `answer_sections` drops the cached
    /// sections, which would otherwise describe the old text.
    pub(super) fn apply(self, node: &mut ConversationNode) -> bool {
        let NodePatch {
            name,
            node_type,
            question,
            answer,
            image_data,
            answer_sections,
            include_in_context,
            selected_section_index_from_parent,
            is_bookmarked,
            is_collapsed,
            position,
            model,
            provider,
            tokens,
            cost,
            processing_time_ms,
            parameters,
            attachments,
            tags,
        } = self;
        let mut touched = false;

        macro_rules! merge {
            ($($field:ident),* $(,)?) => {
                $(
                    if let Some(value) = $field {
                        node.$field = value;
                        touched = true;
                    }
                )*
            };
        }

        if answer.is_some() && answer_sections.is_none() {
            node.answer_sections = None;
        }

        merge!(
            name,
            node_type,
            question,
            answer,
            image_data,
            answer_sections,
            include_in_context,
            selected_section_index_from_parent,
            is_bookmarked,
            is_collapsed,
            position,
            model,
            provider,
            tokens,
            cost,
            attachments,
            tags,
        );

        if let Some(value) = processing_time_ms {
            node.metadata.processing_time_ms = value;
            touched = true;
        }
        if let Some(parameters) = parameters {
            node.metadata.parameters.extend(parameters);
            touched = true;
        }

        touched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_patch_touches_nothing() {
        let mut node = ConversationNode::new("a").with_answer("old");
        let before = node.clone();

        assert!(!NodePatch::new().apply(&mut node));
        assert_eq!(node, before);
    }

    #[test]
    fn test_new_answer_drops_cached_sections() {
        let mut node = ConversationNode::new("a").with_answer("old").with_sections(vec![AnswerSection {
            id: "s0".to_string(),
            text: "old".to_string(),
            index: 0,
        }]);

        NodePatch::new().answer("new").apply(&mut node);

        assert_eq!(node.answer, "new");
        assert!(node.answer_sections.is_none());
    }

    #[test]
    fn test_clear_optional_field() {
        let mut node = ConversationNode::new("a").with_include_in_context(false);
        NodePatch::new().include_in_context(None).apply(&mut node);
        assert_eq!(node.include_in_context, None);
    }

    #[test]
    fn test_parameters_merge() {
        let mut node = ConversationNode::new("a");
        node.metadata
            .parameters
            .insert("temperature".to_string(), ParamValue::Number(0.2));

        let mut params = BTreeMap::new();
        params.insert("maxTokens".to_string(), ParamValue::Number(512.0));
        let patch = NodePatch {
            parameters: Some(params),
            ..Default::default()
        };
        patch.apply(&mut node);

        assert_eq!(node.metadata.parameters.len(), 2);
    }
}
