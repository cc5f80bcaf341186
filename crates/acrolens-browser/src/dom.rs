//! `DocumentTree` over the live page.
//!
//! Processed stamps and node keys live in `WeakMap`s keyed by node, so the
//! page's own DOM never carries engine state and entries vanish with their
//! nodes.

use std::cell::Cell;
use std::ops::Range;
use std::rc::Rc;

use acrolens_core::tree::{
    CONTAINER_STYLE, CONTAINER_TAG, MARK_TAG, MARKUP_ATTR, ROLE_CONTAINER, ROLE_MARK,
};
use acrolens_core::{
    CommitOutcome, ContentStamp, DocumentTree, Fragment, NodeKind, RunKind, TreeError,
};
use js_sys::{Object, WeakMap};
use smol_str::SmolStr;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{Document, Element, Node};

use crate::js::error_message;

fn dom_error(e: JsValue) -> TreeError {
    TreeError::Platform(error_message(&e).into())
}

fn as_key(node: &Node) -> &Object {
    node.unchecked_ref::<Object>()
}

#[derive(Clone)]
pub struct DomTree {
    document: Document,
    stamps: WeakMap,
    keys: WeakMap,
    next_key: Rc<Cell<u64>>,
}

impl DomTree {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            stamps: WeakMap::new(),
            keys: WeakMap::new(),
            next_key: Rc::new(Cell::new(0)),
        }
    }

    /// Tree over the current window's document.
    pub fn from_window() -> Option<Self> {
        Some(Self::new(web_sys::window()?.document()?))
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Where scans and the mutation observer start: the body, or the root
    /// element for documents without one.
    pub fn content_root(&self) -> Node {
        match self.document.body() {
            Some(body) => body.into(),
            None => self
                .document
                .document_element()
                .map(Node::from)
                .unwrap_or_else(|| self.document.clone().into()),
        }
    }

    fn element(&self, tag: &str, attrs: &[(&str, &str)]) -> Result<Element, TreeError> {
        let element = self.document.create_element(tag).map_err(dom_error)?;
        for (name, value) in attrs {
            element.set_attribute(name, value).map_err(dom_error)?;
        }
        Ok(element)
    }

    /// Build a detached container holding `token`; returns (container, mark text).
    fn container(&self, token: &str) -> Result<(Node, Node), TreeError> {
        let container = self.element(
            CONTAINER_TAG,
            &[(MARKUP_ATTR, ROLE_CONTAINER), ("style", CONTAINER_STYLE)],
        )?;
        let mark = self.element(MARK_TAG, &[(MARKUP_ATTR, ROLE_MARK)])?;
        let text: Node = self.document.create_text_node(token).into();
        mark.append_child(&text).map_err(dom_error)?;
        container.append_child(&mark).map_err(dom_error)?;
        Ok((container.into(), text))
    }

    fn text_node(&self, text: &str) -> Node {
        self.document.create_text_node(text).into()
    }

    fn require_text(&self, node: &Node) -> Result<String, TreeError> {
        self.text(node).ok_or(TreeError::WrongKind { expected: "text" })
    }
}

impl DocumentTree for DomTree {
    type Node = Node;

    fn root(&self) -> Node {
        self.content_root()
    }

    fn kind(&self, node: &Node) -> NodeKind {
        match node.node_type() {
            Node::TEXT_NODE => NodeKind::Text,
            Node::ELEMENT_NODE => NodeKind::Element,
            _ => NodeKind::Other,
        }
    }

    fn parent(&self, node: &Node) -> Option<Node> {
        node.parent_node()
    }

    fn first_child(&self, node: &Node) -> Option<Node> {
        node.first_child()
    }

    fn next_sibling(&self, node: &Node) -> Option<Node> {
        node.next_sibling()
    }

    fn is_connected(&self, node: &Node) -> bool {
        node.is_connected()
    }

    fn node_key(&self, node: &Node) -> u64 {
        if let Some(key) = self.keys.get(as_key(node)).as_f64() {
            return key as u64;
        }
        let key = self.next_key.get();
        self.next_key.set(key + 1);
        self.keys.set(as_key(node), &JsValue::from_f64(key as f64));
        key
    }

    fn tag_name(&self, node: &Node) -> Option<SmolStr> {
        let element = node.dyn_ref::<Element>()?;
        Some(SmolStr::new(element.local_name().to_ascii_lowercase()))
    }

    fn attribute(&self, node: &Node, name: &str) -> Option<String> {
        node.dyn_ref::<Element>()?.get_attribute(name)
    }

    fn text(&self, node: &Node) -> Option<String> {
        if node.node_type() != Node::TEXT_NODE {
            return None;
        }
        Some(node.node_value().unwrap_or_default())
    }

    fn text_content(&self, node: &Node) -> String {
        node.text_content().unwrap_or_default()
    }

    fn page_url(&self) -> Option<String> {
        self.document.url().ok()
    }

    fn set_attribute(&self, node: &Node, name: &str, value: &str) -> Result<(), TreeError> {
        let element = node
            .dyn_ref::<Element>()
            .ok_or(TreeError::WrongKind { expected: "element" })?;
        element.set_attribute(name, value).map_err(dom_error)
    }

    fn remove_attribute(&self, node: &Node, name: &str) -> Result<(), TreeError> {
        let element = node
            .dyn_ref::<Element>()
            .ok_or(TreeError::WrongKind { expected: "element" })?;
        element.remove_attribute(name).map_err(dom_error)
    }

    fn replace_text_with_fragment(
        &self,
        node: &Node,
        fragment: &Fragment,
    ) -> Result<CommitOutcome<Node>, TreeError> {
        self.require_text(node)?;
        let parent = node.parent_node().ok_or(TreeError::Detached)?;

        let batch = self.document.create_document_fragment();
        let mut outcome = CommitOutcome::default();
        for run in fragment.runs() {
            match run.kind {
                RunKind::Plain => {
                    let text = self.text_node(&run.content);
                    batch.append_child(&text).map_err(dom_error)?;
                    outcome.texts.push(text);
                }
                RunKind::Annotated(_) => {
                    let (container, text) = self.container(&run.content)?;
                    batch.append_child(&container).map_err(dom_error)?;
                    outcome.containers.push(container);
                    outcome.texts.push(text);
                }
            }
        }
        parent.replace_child(&batch, node).map_err(dom_error)?;
        Ok(outcome)
    }

    fn wrap_text_range(
        &self,
        node: &Node,
        range: Range<usize>,
    ) -> Result<CommitOutcome<Node>, TreeError> {
        let text = self.require_text(node)?;
        if range.is_empty() || text.get(range.clone()).is_none() {
            return Err(TreeError::InvalidRange {
                range,
                len: text.len(),
            });
        }
        let parent = node.parent_node().ok_or(TreeError::Detached)?;

        let batch = self.document.create_document_fragment();
        let mut outcome = CommitOutcome::default();
        if range.start > 0 {
            let before = self.text_node(&text[..range.start]);
            batch.append_child(&before).map_err(dom_error)?;
            outcome.texts.push(before);
        }
        let (container, inner) = self.container(&text[range.clone()])?;
        batch.append_child(&container).map_err(dom_error)?;
        outcome.containers.push(container);
        outcome.texts.push(inner);
        if range.end < text.len() {
            let after = self.text_node(&text[range.end..]);
            batch.append_child(&after).map_err(dom_error)?;
            outcome.texts.push(after);
        }
        parent.replace_child(&batch, node).map_err(dom_error)?;
        Ok(outcome)
    }

    fn unwrap_container(&self, container: &Node) -> Result<Node, TreeError> {
        if container.node_type() != Node::ELEMENT_NODE {
            return Err(TreeError::WrongKind {
                expected: "element",
            });
        }
        let parent = container.parent_node().ok_or(TreeError::Detached)?;
        let replacement = self.text_node(&container.text_content().unwrap_or_default());
        parent
            .replace_child(&replacement, container)
            .map_err(dom_error)?;

        let is_text = |n: &Node| n.node_type() == Node::TEXT_NODE;
        let mut first = replacement.clone();
        while let Some(previous) = first.previous_sibling().filter(is_text) {
            first = previous;
        }
        let mut run = vec![first.clone()];
        let mut next = first.next_sibling();
        while let Some(node) = next.filter(is_text) {
            next = node.next_sibling();
            run.push(node);
        }
        if run.len() == 1 {
            return Ok(replacement);
        }

        let merged: String = run
            .iter()
            .map(|n| n.node_value().unwrap_or_default())
            .collect();
        for node in &run[1..] {
            parent.remove_child(node).map_err(dom_error)?;
        }
        first.set_node_value(Some(&merged));
        Ok(first)
    }

    fn processed_stamp(&self, node: &Node) -> Option<ContentStamp> {
        let value = self.stamps.get(as_key(node));
        value.as_f64().map(|raw| ContentStamp::from_raw(raw as u32))
    }

    fn set_processed_stamp(&self, node: &Node, stamp: ContentStamp) {
        self.stamps.set(as_key(node), &JsValue::from(stamp.raw()));
    }

    fn clear_processed_stamp(&self, node: &Node) {
        self.stamps.delete(as_key(node));
    }
}
