//! Document tree abstraction.
//!
//! The engine never touches a concrete DOM. Everything it needs from the page
//! goes through `DocumentTree`: navigation, text access, the three structural
//! writes (commit a fragment, wrap a selection, revert a container) and the
//! processed-stamp side table. `MemoryTree` implements it for tests and the
//! browser crate implements it over `web_sys`.

use std::fmt;
use std::ops::Range;

use smol_str::SmolStr;

use crate::error::TreeError;
use crate::fragment::Fragment;
use crate::types::ContentStamp;

/// Attribute carried by every element the engine creates. Its value is the role.
pub const MARKUP_ATTR: &str = "data-acrolens";
/// Role of the relative-positioned wrapper around one highlighted token.
pub const ROLE_CONTAINER: &str = "container";
/// Role of the highlighted inline element inside a container.
pub const ROLE_MARK: &str = "mark";
/// Role of the element hosting an overlay's isolated rendering surface.
pub const ROLE_OVERLAY: &str = "overlay";

/// Set on a container while an overlay is attached to it. The value is the
/// overlay id (`ov-N`).
pub const OVERLAY_ATTR: &str = "data-acrolens-overlay";

pub const CONTAINER_TAG: &str = "span";
pub const MARK_TAG: &str = "mark";
pub const CONTAINER_STYLE: &str = "position: relative;";

/// Elements whose text is never scanned.
pub const EXCLUDED_TAGS: &[&str] = &[
    "head", "title", "meta", "link", "style", "script", "noscript", "template", "textarea",
    "input", "select", "option", "code", "pre", "svg", "math", "iframe", "object",
];

/// Coarse node classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Text,
    Element,
    /// Documents, fragments, comments and anything else.
    Other,
}

/// Where a node sits relative to content the engine must leave alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ancestry {
    /// Ordinary page content.
    Clean,
    /// The node is, or descends from, an element the engine created.
    EngineMarkup,
    /// The node is, or descends from, a non-rendering or editable element.
    Excluded,
}

/// Nodes created by one structural write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome<N> {
    /// Annotated containers, in document order.
    pub containers: Vec<N>,
    /// Every text node created, in document order, including the text inside marks.
    pub texts: Vec<N>,
}

impl<N> Default for CommitOutcome<N> {
    fn default() -> Self {
        Self {
            containers: Vec::new(),
            texts: Vec::new(),
        }
    }
}

/// Everything the engine needs from a live document.
///
/// Handles are cheap to clone and compare by node identity. Implementations
/// are single-threaded; the engine relies on cooperative scheduling rather
/// than locks, so no method may be called re-entrantly from inside another.
pub trait DocumentTree: Clone + 'static {
    /// Node handle.
    type Node: Clone + PartialEq + fmt::Debug + 'static;

    // === Required: Navigation ===

    /// The document root.
    fn root(&self) -> Self::Node;

    fn kind(&self, node: &Self::Node) -> NodeKind;

    fn parent(&self, node: &Self::Node) -> Option<Self::Node>;

    fn first_child(&self, node: &Self::Node) -> Option<Self::Node>;

    fn next_sibling(&self, node: &Self::Node) -> Option<Self::Node>;

    /// Whether the node is still attached to the document.
    fn is_connected(&self, node: &Self::Node) -> bool;

    /// Identity key, stable for the node's lifetime and distinct between
    /// live nodes.
    fn node_key(&self, node: &Self::Node) -> u64;

    // === Required: Content ===

    /// Lowercase tag name for elements.
    fn tag_name(&self, node: &Self::Node) -> Option<SmolStr>;

    fn attribute(&self, node: &Self::Node, name: &str) -> Option<String>;

    /// Character data of a text node; `None` for every other kind.
    fn text(&self, node: &Self::Node) -> Option<String>;

    /// Concatenated text of the node's subtree.
    fn text_content(&self, node: &Self::Node) -> String;

    /// Address of the page the document was loaded from.
    fn page_url(&self) -> Option<String>;

    // === Required: Mutation ===

    fn set_attribute(&self, node: &Self::Node, name: &str, value: &str) -> Result<(), TreeError>;

    fn remove_attribute(&self, node: &Self::Node, name: &str) -> Result<(), TreeError>;

    /// Replace a text node with the nodes described by `fragment`.
    ///
    /// Plain runs become text nodes; each annotated run becomes a container
    /// element holding a mark element holding the token text.
    fn replace_text_with_fragment(
        &self,
        node: &Self::Node,
        fragment: &Fragment,
    ) -> Result<CommitOutcome<Self::Node>, TreeError>;

    /// Split a text node around the byte `range` and wrap that range in a
    /// fresh container. The outcome lists the container and all new text nodes.
    fn wrap_text_range(
        &self,
        node: &Self::Node,
        range: Range<usize>,
    ) -> Result<CommitOutcome<Self::Node>, TreeError>;

    /// Replace a container with a text node holding its text, then merge that
    /// node with adjacent text siblings. Returns the merged text node.
    fn unwrap_container(&self, container: &Self::Node) -> Result<Self::Node, TreeError>;

    // === Required: Processed stamps ===

    fn processed_stamp(&self, node: &Self::Node) -> Option<ContentStamp>;

    fn set_processed_stamp(&self, node: &Self::Node, stamp: ContentStamp);

    /// Drop the stamp so the node is scanned again.
    fn clear_processed_stamp(&self, node: &Self::Node);

    // === Provided: Queries ===

    /// Whether `node` is `ancestor` or one of its descendants.
    fn contains(&self, ancestor: &Self::Node, node: &Self::Node) -> bool {
        let mut current = Some(node.clone());
        while let Some(n) = current {
            if &n == ancestor {
                return true;
            }
            current = self.parent(&n);
        }
        false
    }

    fn is_text(&self, node: &Self::Node) -> bool {
        self.kind(node) == NodeKind::Text
    }

    /// The engine role of an element, if it is engine markup.
    fn markup_role(&self, node: &Self::Node) -> Option<String> {
        if self.kind(node) != NodeKind::Element {
            return None;
        }
        self.attribute(node, MARKUP_ATTR)
    }

    /// Whether this single element (ignoring ancestors) is skipped by scans.
    fn is_excluded_element(&self, node: &Self::Node) -> bool {
        let Some(tag) = self.tag_name(node) else {
            return false;
        };
        if EXCLUDED_TAGS.contains(&tag.as_str()) {
            return true;
        }
        matches!(
            self.attribute(node, "contenteditable").as_deref(),
            Some("" | "true" | "plaintext-only")
        )
    }

    /// Classify a node by its self-inclusive ancestor chain.
    fn ancestry(&self, node: &Self::Node) -> Ancestry {
        let mut excluded = false;
        let mut current = Some(node.clone());
        while let Some(n) = current {
            if self.kind(&n) == NodeKind::Element {
                if self.markup_role(&n).is_some() {
                    return Ancestry::EngineMarkup;
                }
                excluded |= self.is_excluded_element(&n);
            }
            current = self.parent(&n);
        }
        if excluded {
            Ancestry::Excluded
        } else {
            Ancestry::Clean
        }
    }

    /// Nearest self-inclusive ancestor that is an annotated container.
    fn enclosing_container(&self, node: &Self::Node) -> Option<Self::Node> {
        let mut current = Some(node.clone());
        while let Some(n) = current {
            if self.markup_role(&n).as_deref() == Some(ROLE_CONTAINER) {
                return Some(n);
            }
            current = self.parent(&n);
        }
        None
    }

    /// Whether the text node's stamp matches its current content.
    fn is_processed(&self, node: &Self::Node) -> bool {
        match (self.processed_stamp(node), self.text(node)) {
            (Some(stamp), Some(text)) => stamp == ContentStamp::of(&text),
            _ => false,
        }
    }

    /// Stamp a text node with its current content.
    fn mark_processed(&self, node: &Self::Node) {
        if let Some(text) = self.text(node) {
            self.set_processed_stamp(node, ContentStamp::of(&text));
        }
    }

    // === Provided: Traversal ===

    /// Next node in document order after `node`, staying inside `root`.
    ///
    /// With `skip_children` the walk does not descend into `node`.
    fn next_in_order(
        &self,
        node: &Self::Node,
        root: &Self::Node,
        skip_children: bool,
    ) -> Option<Self::Node> {
        if !skip_children {
            if let Some(child) = self.first_child(node) {
                return Some(child);
            }
        }
        let mut current = node.clone();
        loop {
            if &current == root {
                return None;
            }
            if let Some(sibling) = self.next_sibling(&current) {
                return Some(sibling);
            }
            current = self.parent(&current)?;
        }
    }

    /// Collect every node under `root` (inclusive) in document order.
    fn descendants(&self, root: &Self::Node) -> Vec<Self::Node> {
        let mut out = vec![root.clone()];
        let mut current = self.next_in_order(root, root, false);
        while let Some(n) = current {
            current = self.next_in_order(&n, root, false);
            out.push(n);
        }
        out
    }

    /// Nearest ancestor whose text is longer than `token`, clipped to
    /// `max_chars` around it. Falls back to the token itself.
    fn surrounding_text(&self, node: &Self::Node, token: &str, max_chars: usize) -> String {
        let trimmed_len = token.trim().len();
        let mut current = self.parent(node);
        while let Some(n) = current {
            if self.kind(&n) == NodeKind::Element && self.markup_role(&n).is_none() {
                let text = self.text_content(&n);
                if text.trim().len() > trimmed_len {
                    return crate::types::clip_around(text.trim(), token, max_chars);
                }
            }
            current = self.parent(&n);
        }
        token.to_string()
    }
}
