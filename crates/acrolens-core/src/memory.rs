//! In-memory document tree.
//!
//! An arena of nodes behind `Rc<RefCell<_>>` implementing `DocumentTree`, so
//! the whole engine runs natively without a browser. Structural writes and
//! text edits are recorded as `MutationRecord`s which tests drain with
//! `take_records` and hand to the watcher, the way a `MutationObserver`
//! would deliver them.

use std::cell::RefCell;
use std::fmt::{self, Write as _};
use std::ops::Range;
use std::rc::Rc;

use pulldown_cmark_escape::{escape_html, escape_html_body_text};
use smol_str::SmolStr;

use crate::error::TreeError;
use crate::fragment::{Fragment, RunKind};
use crate::tree::{
    CONTAINER_STYLE, CONTAINER_TAG, CommitOutcome, DocumentTree, MARK_TAG, MARKUP_ATTR,
    NodeKind, ROLE_CONTAINER, ROLE_MARK,
};
use crate::types::ContentStamp;
use crate::watcher::MutationRecord;

/// Handle to a node in a `MemoryTree`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
enum NodeData {
    Document,
    Element {
        tag: SmolStr,
        attrs: Vec<(SmolStr, String)>,
    },
    Text(String),
    Comment(String),
}

#[derive(Debug)]
struct Slot {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    stamp: Option<ContentStamp>,
}

#[derive(Debug, Default)]
struct Arena {
    slots: Vec<Slot>,
    records: Vec<MutationRecord<NodeId>>,
    url: Option<String>,
}

impl Arena {
    fn slot(&self, id: NodeId) -> &Slot {
        &self.slots[id.0]
    }

    fn slot_mut(&mut self, id: NodeId) -> &mut Slot {
        &mut self.slots[id.0]
    }

    fn alloc(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.slots.len());
        self.slots.push(Slot {
            data,
            parent: None,
            children: Vec::new(),
            stamp: None,
        });
        id
    }

    fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.slot(id).parent {
            self.slot_mut(parent).children.retain(|c| *c != id);
        }
        self.slot_mut(id).parent = None;
    }

    fn insert_at(&mut self, parent: NodeId, index: usize, child: NodeId) {
        self.detach(child);
        let children = &mut self.slot_mut(parent).children;
        let index = index.min(children.len());
        children.insert(index, child);
        self.slot_mut(child).parent = Some(parent);
    }

    fn index_in_parent(&self, id: NodeId) -> Option<(NodeId, usize)> {
        let parent = self.slot(id).parent?;
        let index = self.slot(parent).children.iter().position(|c| *c == id)?;
        Some((parent, index))
    }

    fn is_connected(&self, id: NodeId) -> bool {
        let mut current = id;
        loop {
            if current == NodeId(0) {
                return true;
            }
            match self.slot(current).parent {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    fn text_content(&self, id: NodeId, out: &mut String) {
        match &self.slot(id).data {
            NodeData::Text(text) => out.push_str(text),
            NodeData::Comment(_) => {}
            NodeData::Document | NodeData::Element { .. } => {
                for child in &self.slot(id).children {
                    self.text_content(*child, out);
                }
            }
        }
    }

    fn element(&mut self, tag: &str, attrs: &[(&str, &str)]) -> NodeId {
        self.alloc(NodeData::Element {
            tag: SmolStr::new(tag.to_ascii_lowercase()),
            attrs: attrs
                .iter()
                .map(|(k, v)| (SmolStr::new(k), v.to_string()))
                .collect(),
        })
    }

    /// Build a detached container holding `token`; returns (container, mark text).
    fn container(&mut self, token: &str) -> (NodeId, NodeId) {
        let container = self.element(
            CONTAINER_TAG,
            &[(MARKUP_ATTR, ROLE_CONTAINER), ("style", CONTAINER_STYLE)],
        );
        let mark = self.element(MARK_TAG, &[(MARKUP_ATTR, ROLE_MARK)]);
        let text = self.alloc(NodeData::Text(token.to_string()));
        self.insert_at(mark, 0, text);
        self.insert_at(container, 0, mark);
        (container, text)
    }

    /// Put `replacement` where `node` was and record the insertion.
    fn replace_with(&mut self, node: NodeId, replacement: &[NodeId]) -> Result<(), TreeError> {
        let (parent, index) = self.index_in_parent(node).ok_or(TreeError::Detached)?;
        self.detach(node);
        for (offset, new) in replacement.iter().enumerate() {
            self.insert_at(parent, index + offset, *new);
        }
        if !replacement.is_empty() {
            self.records.push(MutationRecord::ChildList {
                added: replacement.to_vec(),
            });
        }
        Ok(())
    }
}

/// Single-threaded in-memory document.
#[derive(Clone)]
pub struct MemoryTree {
    arena: Rc<RefCell<Arena>>,
}

impl Default for MemoryTree {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTree")
            .field("nodes", &self.arena.borrow().slots.len())
            .finish()
    }
}

impl MemoryTree {
    /// Empty document containing only the root node.
    pub fn new() -> Self {
        let mut arena = Arena::default();
        arena.alloc(NodeData::Document);
        Self {
            arena: Rc::new(RefCell::new(arena)),
        }
    }

    pub fn with_url(self, url: impl Into<String>) -> Self {
        self.arena.borrow_mut().url = Some(url.into());
        self
    }

    pub fn document(&self) -> NodeId {
        NodeId(0)
    }

    /// Create a detached element.
    pub fn create_element(&self, tag: &str) -> NodeId {
        self.arena.borrow_mut().element(tag, &[])
    }

    /// Create a detached text node.
    pub fn create_text(&self, text: &str) -> NodeId {
        self.arena
            .borrow_mut()
            .alloc(NodeData::Text(text.to_string()))
    }

    pub fn create_comment(&self, text: &str) -> NodeId {
        self.arena
            .borrow_mut()
            .alloc(NodeData::Comment(text.to_string()))
    }

    /// Append `child` to `parent`, moving it if it is already attached.
    pub fn append_child(&self, parent: NodeId, child: NodeId) {
        let mut arena = self.arena.borrow_mut();
        let index = arena.slot(parent).children.len();
        arena.insert_at(parent, index, child);
        arena.records.push(MutationRecord::ChildList { added: vec![child] });
    }

    /// Insert `child` into `parent` before `reference`, or at the end.
    pub fn insert_before(&self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
        let mut arena = self.arena.borrow_mut();
        let index = reference
            .and_then(|r| arena.slot(parent).children.iter().position(|c| *c == r))
            .unwrap_or(arena.slot(parent).children.len());
        arena.insert_at(parent, index, child);
        arena.records.push(MutationRecord::ChildList { added: vec![child] });
    }

    /// Create an element and append it to `parent`.
    pub fn append_element(&self, parent: NodeId, tag: &str) -> NodeId {
        let node = self.create_element(tag);
        self.append_child(parent, node);
        node
    }

    /// Create a text node and append it to `parent`.
    pub fn append_text(&self, parent: NodeId, text: &str) -> NodeId {
        let node = self.create_text(text);
        self.append_child(parent, node);
        node
    }

    /// Detach a node (and its subtree) from its parent.
    pub fn remove(&self, node: NodeId) {
        self.arena.borrow_mut().detach(node);
    }

    /// Overwrite a text node's data.
    pub fn set_text(&self, node: NodeId, text: &str) {
        let mut arena = self.arena.borrow_mut();
        if let NodeData::Text(data) = &mut arena.slot_mut(node).data {
            *data = text.to_string();
            arena
                .records
                .push(MutationRecord::CharacterData { target: node });
        }
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.arena.borrow().slot(node).children.clone()
    }

    /// Drain the mutation records accumulated since the last call.
    pub fn take_records(&self) -> Vec<MutationRecord<NodeId>> {
        std::mem::take(&mut self.arena.borrow_mut().records)
    }

    /// Elements under `root` whose engine role is `role`.
    pub fn find_by_role(&self, root: NodeId, role: &str) -> Vec<NodeId> {
        self.descendants(&root)
            .into_iter()
            .filter(|n| self.markup_role(n).as_deref() == Some(role))
            .collect()
    }

    /// Serialize the subtree under `node` as HTML. The document node
    /// serializes as its children.
    pub fn to_html(&self, node: NodeId) -> String {
        let arena = self.arena.borrow();
        let mut out = String::new();
        write_html(&arena, node, &mut out);
        out
    }
}

fn write_html(arena: &Arena, id: NodeId, out: &mut String) {
    let slot = arena.slot(id);
    match &slot.data {
        NodeData::Document => {
            for child in &slot.children {
                write_html(arena, *child, out);
            }
        }
        NodeData::Text(text) => {
            let _ = escape_html_body_text(&mut *out, text);
        }
        NodeData::Comment(text) => {
            let _ = write!(out, "<!--{text}-->");
        }
        NodeData::Element { tag, attrs } => {
            out.push('<');
            out.push_str(tag);
            for (name, value) in attrs {
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                let _ = escape_html(&mut *out, value);
                out.push('"');
            }
            out.push('>');
            for child in &slot.children {
                write_html(arena, *child, out);
            }
            let _ = write!(out, "</{tag}>");
        }
    }
}

impl DocumentTree for MemoryTree {
    type Node = NodeId;

    fn root(&self) -> NodeId {
        NodeId(0)
    }

    fn kind(&self, node: &NodeId) -> NodeKind {
        match self.arena.borrow().slot(*node).data {
            NodeData::Text(_) => NodeKind::Text,
            NodeData::Element { .. } => NodeKind::Element,
            NodeData::Document | NodeData::Comment(_) => NodeKind::Other,
        }
    }

    fn parent(&self, node: &NodeId) -> Option<NodeId> {
        self.arena.borrow().slot(*node).parent
    }

    fn first_child(&self, node: &NodeId) -> Option<NodeId> {
        self.arena.borrow().slot(*node).children.first().copied()
    }

    fn next_sibling(&self, node: &NodeId) -> Option<NodeId> {
        let arena = self.arena.borrow();
        let (parent, index) = arena.index_in_parent(*node)?;
        arena.slot(parent).children.get(index + 1).copied()
    }

    fn is_connected(&self, node: &NodeId) -> bool {
        self.arena.borrow().is_connected(*node)
    }

    fn node_key(&self, node: &NodeId) -> u64 {
        node.0 as u64
    }

    fn tag_name(&self, node: &NodeId) -> Option<SmolStr> {
        match &self.arena.borrow().slot(*node).data {
            NodeData::Element { tag, .. } => Some(tag.clone()),
            _ => None,
        }
    }

    fn attribute(&self, node: &NodeId, name: &str) -> Option<String> {
        match &self.arena.borrow().slot(*node).data {
            NodeData::Element { attrs, .. } => attrs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone()),
            _ => None,
        }
    }

    fn text(&self, node: &NodeId) -> Option<String> {
        match &self.arena.borrow().slot(*node).data {
            NodeData::Text(text) => Some(text.clone()),
            _ => None,
        }
    }

    fn text_content(&self, node: &NodeId) -> String {
        let mut out = String::new();
        self.arena.borrow().text_content(*node, &mut out);
        out
    }

    fn page_url(&self) -> Option<String> {
        self.arena.borrow().url.clone()
    }

    fn set_attribute(&self, node: &NodeId, name: &str, value: &str) -> Result<(), TreeError> {
        let mut arena = self.arena.borrow_mut();
        let NodeData::Element { attrs, .. } = &mut arena.slot_mut(*node).data else {
            return Err(TreeError::WrongKind {
                expected: "element",
            });
        };
        match attrs.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value.to_string(),
            None => attrs.push((SmolStr::new(name), value.to_string())),
        }
        Ok(())
    }

    fn remove_attribute(&self, node: &NodeId, name: &str) -> Result<(), TreeError> {
        let mut arena = self.arena.borrow_mut();
        let NodeData::Element { attrs, .. } = &mut arena.slot_mut(*node).data else {
            return Err(TreeError::WrongKind {
                expected: "element",
            });
        };
        attrs.retain(|(k, _)| k != name);
        Ok(())
    }

    fn replace_text_with_fragment(
        &self,
        node: &NodeId,
        fragment: &Fragment,
    ) -> Result<CommitOutcome<NodeId>, TreeError> {
        let mut arena = self.arena.borrow_mut();
        if !matches!(arena.slot(*node).data, NodeData::Text(_)) {
            return Err(TreeError::WrongKind { expected: "text" });
        }
        if !arena.is_connected(*node) {
            return Err(TreeError::Detached);
        }

        let mut outcome = CommitOutcome::default();
        let mut top_level = Vec::with_capacity(fragment.runs().len());
        for run in fragment.runs() {
            match run.kind {
                RunKind::Plain => {
                    let text = arena.alloc(NodeData::Text(run.content.to_string()));
                    outcome.texts.push(text);
                    top_level.push(text);
                }
                RunKind::Annotated(_) => {
                    let (container, text) = arena.container(&run.content);
                    outcome.containers.push(container);
                    outcome.texts.push(text);
                    top_level.push(container);
                }
            }
        }
        arena.replace_with(*node, &top_level)?;
        Ok(outcome)
    }

    fn wrap_text_range(
        &self,
        node: &NodeId,
        range: Range<usize>,
    ) -> Result<CommitOutcome<NodeId>, TreeError> {
        let mut arena = self.arena.borrow_mut();
        let NodeData::Text(text) = &arena.slot(*node).data else {
            return Err(TreeError::WrongKind { expected: "text" });
        };
        let text = text.clone();
        if range.is_empty() || text.get(range.clone()).is_none() {
            return Err(TreeError::InvalidRange {
                range,
                len: text.len(),
            });
        }

        let mut outcome = CommitOutcome::default();
        let mut top_level = Vec::with_capacity(3);
        if range.start > 0 {
            let before = arena.alloc(NodeData::Text(text[..range.start].to_string()));
            outcome.texts.push(before);
            top_level.push(before);
        }
        let (container, inner) = arena.container(&text[range.clone()]);
        outcome.containers.push(container);
        outcome.texts.push(inner);
        top_level.push(container);
        if range.end < text.len() {
            let after = arena.alloc(NodeData::Text(text[range.end..].to_string()));
            outcome.texts.push(after);
            top_level.push(after);
        }
        arena.replace_with(*node, &top_level)?;
        Ok(outcome)
    }

    fn unwrap_container(&self, container: &NodeId) -> Result<NodeId, TreeError> {
        let mut arena = self.arena.borrow_mut();
        if !matches!(arena.slot(*container).data, NodeData::Element { .. }) {
            return Err(TreeError::WrongKind {
                expected: "element",
            });
        }
        let mut content = String::new();
        arena.text_content(*container, &mut content);
        let replacement = arena.alloc(NodeData::Text(content));
        arena.replace_with(*container, &[replacement])?;

        // Merge the run of adjacent text siblings into its first node.
        let (parent, index) = arena
            .index_in_parent(replacement)
            .ok_or(TreeError::Detached)?;
        let siblings = arena.slot(parent).children.clone();
        let is_text = |id: &NodeId| matches!(arena.slot(*id).data, NodeData::Text(_));
        let mut first = index;
        while first > 0 && is_text(&siblings[first - 1]) {
            first -= 1;
        }
        let mut last = index;
        while last + 1 < siblings.len() && is_text(&siblings[last + 1]) {
            last += 1;
        }
        if first == last {
            return Ok(replacement);
        }

        let mut merged = String::new();
        for id in &siblings[first..=last] {
            if let NodeData::Text(text) = &arena.slot(*id).data {
                merged.push_str(text);
            }
        }
        let target = siblings[first];
        for id in &siblings[first + 1..=last] {
            arena.detach(*id);
        }
        if let NodeData::Text(data) = &mut arena.slot_mut(target).data {
            *data = merged;
        }
        arena
            .records
            .push(MutationRecord::CharacterData { target });
        Ok(target)
    }

    fn processed_stamp(&self, node: &NodeId) -> Option<ContentStamp> {
        self.arena.borrow().slot(*node).stamp
    }

    fn set_processed_stamp(&self, node: &NodeId, stamp: ContentStamp) {
        self.arena.borrow_mut().slot_mut(*node).stamp = Some(stamp);
    }

    fn clear_processed_stamp(&self, node: &NodeId) {
        self.arena.borrow_mut().slot_mut(*node).stamp = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::rewrite;
    use crate::matcher::match_tokens;
    use crate::tree::{Ancestry, ROLE_CONTAINER};

    fn paragraph(tree: &MemoryTree, text: &str) -> (NodeId, NodeId) {
        let body = tree.append_element(tree.document(), "body");
        let p = tree.append_element(body, "p");
        let t = tree.append_text(p, text);
        (p, t)
    }

    #[test]
    fn test_replace_text_with_fragment() {
        let tree = MemoryTree::new();
        let text = "The REST API uses JSON payloads.";
        let (p, t) = paragraph(&tree, text);
        tree.take_records();

        let fragment = rewrite(text, &match_tokens(text)).unwrap();
        let outcome = tree.replace_text_with_fragment(&t, &fragment).unwrap();

        assert_eq!(outcome.containers.len(), 3);
        assert_eq!(outcome.texts.len(), 7);
        assert!(!tree.is_connected(&t));
        assert_eq!(tree.text_content(&p), text);
        insta::assert_snapshot!(
            tree.to_html(p),
            @r#"<p>The <span data-acrolens="container" style="position: relative;"><mark data-acrolens="mark">REST</mark></span> <span data-acrolens="container" style="position: relative;"><mark data-acrolens="mark">API</mark></span> uses <span data-acrolens="container" style="position: relative;"><mark data-acrolens="mark">JSON</mark></span> payloads.</p>"#
        );

        let records = tree.take_records();
        assert_eq!(records.len(), 1);
        assert!(matches!(&records[0], MutationRecord::ChildList { added } if added.len() == 7));
    }

    #[test]
    fn test_html_escapes_text_and_attributes() {
        let tree = MemoryTree::new();
        let (p, _) = paragraph(&tree, r#"if a < b && "c" > d"#);
        tree.set_attribute(&p, "title", r#"say "hi" & <wave>"#).unwrap();
        insta::assert_snapshot!(
            tree.to_html(p),
            @r#"<p title="say &quot;hi&quot; &amp; &lt;wave&gt;">if a &lt; b &amp;&amp; "c" &gt; d</p>"#
        );
    }

    #[test]
    fn test_unwrap_container_merges_text() {
        let tree = MemoryTree::new();
        let text = "The REST API uses JSON payloads.";
        let (p, t) = paragraph(&tree, text);
        let fragment = rewrite(text, &match_tokens(text)).unwrap();
        let outcome = tree.replace_text_with_fragment(&t, &fragment).unwrap();

        let merged = tree.unwrap_container(&outcome.containers[1]).unwrap();
        assert_eq!(tree.text(&merged).as_deref(), Some(" API uses "));
        assert_eq!(tree.text_content(&p), text);
        assert_eq!(tree.find_by_role(p, ROLE_CONTAINER).len(), 2);
        assert!(!tree.is_connected(&outcome.containers[1]));

        for container in [outcome.containers[0], outcome.containers[2]] {
            tree.unwrap_container(&container).unwrap();
        }
        assert_eq!(tree.children(p).len(), 1);
        assert_eq!(tree.to_html(p), format!("<p>{text}</p>"));
    }

    #[test]
    fn test_wrap_text_range() {
        let tree = MemoryTree::new();
        let (p, t) = paragraph(&tree, "see the faq below");
        let outcome = tree.wrap_text_range(&t, 8..11).unwrap();
        assert_eq!(outcome.containers.len(), 1);
        assert_eq!(outcome.texts.len(), 3);
        assert_eq!(tree.text_content(&outcome.containers[0]), "faq");
        assert_eq!(tree.text_content(&p), "see the faq below");

        let (_, t2) = paragraph(&tree, "faq");
        let whole = tree.wrap_text_range(&t2, 0..3).unwrap();
        assert_eq!(whole.texts.len(), 1);

        let (_, t3) = paragraph(&tree, "é");
        assert!(matches!(
            tree.wrap_text_range(&t3, 0..1),
            Err(TreeError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_ancestry_and_enclosing_container() {
        let tree = MemoryTree::new();
        let text = "Use the CLI.";
        let (p, t) = paragraph(&tree, text);
        let script = tree.append_element(p, "script");
        let code = tree.append_text(script, "var API = 1;");
        let editable = tree.append_element(p, "div");
        tree.set_attribute(&editable, "contenteditable", "true")
            .unwrap();
        let typed = tree.append_text(editable, "TODO");

        assert_eq!(tree.ancestry(&t), Ancestry::Clean);
        assert_eq!(tree.ancestry(&code), Ancestry::Excluded);
        assert_eq!(tree.ancestry(&typed), Ancestry::Excluded);

        let fragment = rewrite(text, &match_tokens(text)).unwrap();
        let outcome = tree.replace_text_with_fragment(&t, &fragment).unwrap();
        let mark_text = outcome.texts[1];
        assert_eq!(tree.text(&mark_text).as_deref(), Some("CLI"));
        assert_eq!(tree.ancestry(&mark_text), Ancestry::EngineMarkup);
        assert_eq!(
            tree.enclosing_container(&mark_text),
            Some(outcome.containers[0])
        );
        assert_eq!(tree.enclosing_container(&outcome.texts[0]), None);
    }

    #[test]
    fn test_stamps_follow_text_edits() {
        let tree = MemoryTree::new();
        let (_, t) = paragraph(&tree, "some text");
        assert!(!tree.is_processed(&t));
        tree.mark_processed(&t);
        assert!(tree.is_processed(&t));
        tree.set_text(t, "some NEW text");
        assert!(!tree.is_processed(&t));
    }

    #[test]
    fn test_traversal_order_and_surrounding_text() {
        let tree = MemoryTree::new();
        let body = tree.append_element(tree.document(), "body");
        let p = tree.append_element(body, "p");
        let a = tree.append_text(p, "one ");
        let em = tree.append_element(p, "em");
        let b = tree.append_text(em, "two");
        let c = tree.append_text(body, "three");

        let order: Vec<_> = tree
            .descendants(&body)
            .into_iter()
            .filter(|n| tree.is_text(n))
            .collect();
        assert_eq!(order, [a, b, c]);
        assert_eq!(tree.next_in_order(&em, &body, true), Some(c));
        assert_eq!(tree.next_in_order(&c, &body, false), None);

        assert_eq!(tree.surrounding_text(&b, "two", 100), "one two");
        assert_eq!(tree.surrounding_text(&c, "three", 100), "one twothree");
    }
}
