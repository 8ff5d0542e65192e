//! A conversation session: one tree store with identity and lifecycle.

use crate::{AppConfig, CoreError};
use chrono::Utc;
use forkchat_context::{prepare_question, ContextBuilder, PreparedQuestion};
use forkchat_tree::storage::codec;
use forkchat_tree::tree::{ImageData, ParamValue};
use forkchat_tree::{
    apply_auto_layout, parse_answer_into_sections, ConversationNode, LayoutOptions, LayoutReport,
    NodeId, SessionDocument, SessionInfo, SessionStorage, TreeError, TreeStore,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// What a provider returned for a question.
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerPayload {
    Text(String),
    Image(ImageData),
}

impl From<&str> for AnswerPayload {
    fn from(text: &str) -> Self {
        AnswerPayload::Text(text.to_string())
    }
}

impl From<String> for AnswerPayload {
    fn from(text: String) -> Self {
        AnswerPayload::Text(text)
    }
}

impl From<ImageData> for AnswerPayload {
    fn from(image: ImageData) -> Self {
        AnswerPayload::Image(image)
    }
}

/// Who produced an answer and what it cost.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Provenance {
    pub model: Option<String>,
    pub provider: Option<String>,
    pub tokens: Option<u64>,
    pub cost: Option<f64>,
    pub processing_time_ms: Option<u64>,
    pub parameters: BTreeMap<String, ParamValue>,
}

impl Provenance {
    pub fn new(model: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            provider: Some(provider.into()),
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, tokens: u64, cost: f64) -> Self {
        self.tokens = Some(tokens);
        self.cost = Some(cost);
        self
    }
}

/// An explicitly constructed conversation session.
#[derive(Debug, Clone)]
pub struct Session {
    info: SessionInfo,
    store: TreeStore,
    layout: LayoutOptions,
    context: ContextBuilder,
}

impl Session {
    /// Start an empty session.
    pub fn create(name: impl Into<String>) -> Self {
        let info = SessionInfo::new(name);
        info!(session = %info.id, name = %info.name, "Session created");
        Self {
            info,
            store: TreeStore::new(),
            layout: LayoutOptions::default(),
            context: ContextBuilder::new(),
        }
    }

    /// Adopt a checked document as a session, keeping its identity.
    pub fn from_document(document: SessionDocument) -> Result<Self, CoreError> {
        codec::check_version(&document)?;
        let tree = codec::rebuild_tree(document.tree)?;
        let store = TreeStore::from_tree(tree)?;
        Ok(Self {
            info: document.session,
            store,
            layout: LayoutOptions::default(),
            context: ContextBuilder::new(),
        })
    }

    /// Adopt a document's tree under a fresh identity, so saving it never
    /// replaces the session it was exported from.
    pub fn import_new(document: SessionDocument) -> Result<Self, CoreError> {
        let source = document.session.id.clone();
        let name = document.session.name.clone();
        let mut session = Self::from_document(document)?;
        session.info = SessionInfo::new(name);
        info!(
            session = %session.info.id,
            source = %source,
            nodes = session.store.len(),
            "Session imported"
        );
        Ok(session)
    }

    /// Load session `id` from storage.
    pub async fn load_from_storage(storage: &SessionStorage, id: &str) -> Result<Self, CoreError> {
        let document = storage.load(id).await.map_err(|e| match e {
            TreeError::SessionNotFound(id) => CoreError::SessionNotFound(id),
            other => CoreError::Tree(other),
        })?;
        let session = Self::from_document(document)?;
        debug!(session = %id, nodes = session.store.len(), "Session loaded");
        Ok(session)
    }

    /// Apply layout and context settings from configuration.
    pub fn with_config(mut self, config: &AppConfig) -> Self {
        self.layout = config.layout.clone();
        self.context = config.context_builder();
        self
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.info.name = name.into();
        self.touch();
    }

    pub fn store(&self) -> &TreeStore {
        &self.store
    }

    /// Mutable access to the tree; marks the session as updated.
    pub fn store_mut(&mut self) -> &mut TreeStore {
        self.touch();
        &mut self.store
    }

    /// Write the session to storage.
    pub async fn save(&self, storage: &SessionStorage) -> Result<PathBuf, CoreError> {
        let path = storage.save(&self.export_document()).await?;
        Ok(path)
    }

    /// Reset to an empty tree, keeping the session identity.
    pub fn clear_all(&mut self) {
        self.store.clear_all();
        self.touch();
    }

    /// Replace the tree with the document's tree. On failure nothing changes.
    pub fn import_document(&mut self, document: SessionDocument) -> Result<(), CoreError> {
        codec::check_version(&document)?;
        let source = document.session.id.clone();
        let tree = codec::rebuild_tree(document.tree)?;
        self.store.replace_tree(tree)?;
        self.touch();
        info!(
            session = %self.info.id,
            source = %source,
            nodes = self.store.len(),
            "Document imported"
        );
        Ok(())
    }

    /// Like `import_document`, starting from raw JSON.
    pub fn import_value(&mut self, value: Value) -> Result<(), CoreError> {
        let document = codec::decode_document(value)?;
        self.import_document(document)
    }

    pub fn export_document(&self) -> SessionDocument {
        codec::serialize_session(self.store.tree(), &self.info)
    }

    /// Build context and prompt for a question under `parent_id`.
    pub fn ask(
        &self,
        parent_id: Option<&str>,
        selected_section_index: Option<usize>,
        question: &str,
    ) -> Result<PreparedQuestion, CoreError> {
        let prepared = prepare_question(
            &self.store,
            &self.context,
            parent_id,
            selected_section_index,
            question,
        )?;
        Ok(prepared)
    }

    /// Store the provider's answer to `prepared` as a new node.
    ///
    /// The parent may have been deleted while the request was in flight;
    /// that surfaces as `TreeError::UnknownParent`.
    pub fn record_answer(
        &mut self,
        prepared: &PreparedQuestion,
        answer: impl Into<AnswerPayload>,
        provenance: Provenance,
    ) -> Result<NodeId, CoreError> {
        let parent_id = prepared.parent_id.as_deref();
        let mut node = ConversationNode::generated()
            .with_name(self.store.generate_node_name(parent_id))
            .with_question(prepared.question.clone());

        if let Some(parent_id) = parent_id {
            node = node.with_parent(parent_id);
        }
        if let Some(index) = prepared.selected_section_index {
            node = node.with_selected_section(index);
        }

        node = match answer.into() {
            AnswerPayload::Text(text) => {
                let sections = parse_answer_into_sections(&text);
                node.with_answer(text).with_sections(sections)
            }
            AnswerPayload::Image(image) => node.with_image(image),
        };

        let Provenance {
            model,
            provider,
            tokens,
            cost,
            processing_time_ms,
            parameters,
        } = provenance;
        node.model = model;
        node.provider = provider;
        node.tokens = tokens;
        node.cost = cost;
        node.metadata.processing_time_ms = processing_time_ms;
        node.metadata.parameters = parameters;

        let id = node.id.clone();
        self.store.add_node(node)?;
        self.touch();

        debug!(session = %self.info.id, id = %id, parent = ?parent_id, "Answer recorded");
        Ok(id)
    }

    /// Recompute canvas positions with the configured spacing.
    pub fn auto_layout(&mut self) -> LayoutReport {
        let report = apply_auto_layout(&mut self.store, &self.layout);
        self.touch();
        report
    }

    fn touch(&mut self) {
        self.info.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forkchat_tree::NodeType;

    #[test]
    fn test_create_is_empty() {
        let session = Session::create("Scratch");
        assert_eq!(session.name(), "Scratch");
        assert!(session.store().is_empty());
        assert!(!session.id().is_empty());
    }

    #[test]
    fn test_ask_and_record_root() {
        let mut session = Session::create("s");
        let prepared = session.ask(None, None, "What is React?").unwrap();
        assert_eq!(prepared.prompt, "What is React?");

        let id = session
            .record_answer(
                &prepared,
                "React is a JavaScript library.\n\nIt renders UIs.",
                Provenance::new("gpt-4o", "openai").with_usage(42, 0.01),
            )
            .unwrap();

        let node = session.store().get_node(&id).unwrap();
        assert_eq!(node.name, "Q1");
        assert!(node.is_root());
        assert_eq!(node.model.as_deref(), Some("gpt-4o"));
        assert_eq!(node.tokens, Some(42));
        assert_eq!(node.answer_sections.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn test_follow_up_branch() {
        let mut session = Session::create("s");
        let root = session.ask(None, None, "What is React?").unwrap();
        let root_id = session
            .record_answer(&root, "Intro.\n\nHooks.", Provenance::default())
            .unwrap();

        let follow = session.ask(Some(root_id.as_str()), Some(1), "More on hooks").unwrap();
        assert!(follow.context.contains("A (selected section): Hooks."));

        let child_id = session
            .record_answer(&follow, "Hooks hold state.", Provenance::default())
            .unwrap();

        let child = session.store().get_node(&child_id).unwrap();
        assert_eq!(child.name, "Q1.1");
        assert_eq!(child.parent_id.as_deref(), Some(root_id.as_str()));
        assert_eq!(child.selected_section_index_from_parent, Some(1));
    }

    #[test]
    fn test_record_after_parent_deleted() {
        let mut session = Session::create("s");
        let root = session.ask(None, None, "Q").unwrap();
        let root_id = session
            .record_answer(&root, "A", Provenance::default())
            .unwrap();
        let pending = session.ask(Some(root_id.as_str()), None, "Follow").unwrap();

        session.store_mut().delete_node(&root_id).unwrap();

        let err = session
            .record_answer(&pending, "late", Provenance::default())
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Tree(TreeError::UnknownParent { .. })
        ));
        assert!(session.store().is_empty());
    }

    #[test]
    fn test_image_answer() {
        let mut session = Session::create("s");
        let prepared = session.ask(None, None, "Draw a fox").unwrap();
        let image = ImageData {
            urls: vec!["https://img/fox.png".to_string()],
            ..Default::default()
        };

        let id = session
            .record_answer(&prepared, image, Provenance::default())
            .unwrap();

        let node = session.store().get_node(&id).unwrap();
        assert_eq!(node.node_type, NodeType::Image);
        assert!(node.answer.is_empty());
    }

    #[test]
    fn test_import_failure_keeps_tree() {
        let mut session = Session::create("s");
        let prepared = session.ask(None, None, "Q").unwrap();
        session
            .record_answer(&prepared, "A", Provenance::default())
            .unwrap();
        let before = session.store().tree().clone();

        let mut bad = serde_json::to_value(session.export_document()).unwrap();
        bad["version"] = serde_json::json!("9.9");

        assert!(session.import_value(bad).is_err());
        assert_eq!(session.store().tree(), &before);
    }

    #[test]
    fn test_typed_document_version_checked() {
        let mut source = Session::create("source");
        let prepared = source.ask(None, None, "Q").unwrap();
        source
            .record_answer(&prepared, "A", Provenance::default())
            .unwrap();

        let mut doc = source.export_document();
        doc.version = "0.1".to_string();

        assert!(matches!(
            Session::from_document(doc.clone()),
            Err(CoreError::Tree(TreeError::Schema(_)))
        ));
        assert!(matches!(
            Session::import_new(doc.clone()),
            Err(CoreError::Tree(TreeError::Schema(_)))
        ));

        let mut target = Session::create("target");
        assert!(matches!(
            target.import_document(doc),
            Err(CoreError::Tree(TreeError::Schema(_)))
        ));
        assert!(target.store().is_empty());
    }

    #[test]
    fn test_import_new_takes_fresh_identity() {
        let mut source = Session::create("source");
        let prepared = source.ask(None, None, "Q").unwrap();
        source
            .record_answer(&prepared, "A", Provenance::default())
            .unwrap();

        let imported = Session::import_new(source.export_document()).unwrap();

        assert_ne!(imported.id(), source.id());
        assert_eq!(imported.name(), "source");
        assert_eq!(imported.store().tree(), source.store().tree());
    }

    #[test]
    fn test_clear_all_keeps_identity() {
        let mut session = Session::create("s");
        let id = session.id().to_string();
        let prepared = session.ask(None, None, "Q").unwrap();
        session
            .record_answer(&prepared, "A", Provenance::default())
            .unwrap();

        session.clear_all();

        assert!(session.store().is_empty());
        assert_eq!(session.id(), id);
    }

    #[test]
    fn test_auto_layout_uses_config() {
        let mut config = AppConfig::default();
        config.layout.node_width = 10.0;
        let mut session = Session::create("s").with_config(&config);

        for question in ["a", "b"] {
            let prepared = session.ask(None, None, question).unwrap();
            session
                .record_answer(&prepared, "x", Provenance::default())
                .unwrap();
        }

        let report = session.auto_layout();
        let mut xs: Vec<f64> = report.positions.values().map(|p| p.x).collect();
        xs.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(xs, vec![0.0, 20.0]);
    }
}
