//! Incremental, cooperative tree scanning.
//!
//! `TreeScanner` walks text nodes in document order, matches and rewrites
//! each unprocessed one, and defers the resulting commit to the host's frame
//! queue. It yields to the host after every text node, so a commit may land
//! while the walk is suspended; `ScanCursor` keeps the walk valid across that.

use std::cell::{Cell, RefCell};

use tracing::{debug, trace, warn};

use crate::error::TreeError;
use crate::fragment::{Fragment, rewrite};
use crate::matcher::TokenMatcher;
use crate::scheduler::{Scheduler, TaskPriority};
use crate::tree::{Ancestry, CommitOutcome, DocumentTree, NodeKind};
use crate::types::ContentStamp;

/// Consecutive non-text nodes the walk may pass before it yields anyway.
const ELEMENT_BUDGET: usize = 32;

/// Counters for one scan invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Text nodes handed to the scanner.
    pub visited: usize,
    /// Text nodes skipped because their stamp was current.
    pub skipped: usize,
    /// Text nodes whose commit was scheduled.
    pub scheduled: usize,
    /// Text nodes that failed to rewrite.
    pub failed: usize,
    /// Tokens found across all scheduled nodes.
    pub matches: usize,
}

impl ScanReport {
    fn absorb(&mut self, other: ScanReport) {
        self.visited += other.visited;
        self.skipped += other.skipped;
        self.scheduled += other.scheduled;
        self.failed += other.failed;
        self.matches += other.matches;
    }
}

enum NodeOutcome {
    Skipped,
    NoMatches,
    Scheduled(usize),
    Failed,
}

/// Position of an in-progress walk.
///
/// The look-ahead node is computed before the current node is returned, so
/// replacing the current node never loses the walk. If the look-ahead itself
/// is detached before the walk reaches it, the cursor re-walks the nearest
/// still-connected ancestor it recorded; already stamped nodes in there are
/// skipped cheaply.
pub struct ScanCursor<T: DocumentTree> {
    root: T::Node,
    next: Option<T::Node>,
    anchor: Option<T::Node>,
}

impl<T: DocumentTree> ScanCursor<T> {
    pub fn new(tree: &T, root: T::Node) -> Self {
        let anchor = tree.parent(&root);
        Self {
            next: Some(root.clone()),
            root,
            anchor,
        }
    }

    /// Return the next node of the walk, pruning engine markup and excluded
    /// elements.
    pub fn advance(&mut self, tree: &T) -> Option<T::Node> {
        let candidate = self.next.take()?;
        let node = if self.is_live(tree, &candidate) {
            candidate
        } else {
            trace!(node = ?candidate, "look-ahead detached, re-anchoring");
            self.reanchor(tree)?
        };

        let prune = match tree.kind(&node) {
            NodeKind::Element => {
                tree.markup_role(&node).is_some() || tree.is_excluded_element(&node)
            }
            NodeKind::Text => true,
            NodeKind::Other => false,
        };
        self.next = tree.next_in_order(&node, &self.root, prune);
        self.anchor = self.next.as_ref().and_then(|n| tree.parent(n));
        Some(node)
    }

    fn is_live(&self, tree: &T, node: &T::Node) -> bool {
        tree.is_connected(node) && tree.contains(&self.root, node)
    }

    fn reanchor(&mut self, tree: &T) -> Option<T::Node> {
        let mut current = self.anchor.take();
        while let Some(n) = current {
            if self.is_live(tree, &n) {
                return tree
                    .first_child(&n)
                    .or_else(|| tree.next_in_order(&n, &self.root, true));
            }
            current = tree.parent(&n);
        }
        None
    }
}

/// Scans subtrees for tokens and schedules their rewrite.
pub struct TreeScanner<T: DocumentTree, S: Scheduler> {
    tree: T,
    scheduler: S,
    matcher: RefCell<TokenMatcher>,
    epoch: Cell<u64>,
}

impl<T: DocumentTree, S: Scheduler> TreeScanner<T, S> {
    pub fn new(tree: T, scheduler: S, matcher: TokenMatcher) -> Self {
        Self {
            tree,
            scheduler,
            matcher: RefCell::new(matcher),
            epoch: Cell::new(0),
        }
    }

    /// Stop every walk in progress at its next step. Commits already
    /// scheduled still land at the next frame.
    pub fn cancel_all(&self) {
        self.epoch.set(self.epoch.get().wrapping_add(1));
    }

    /// Replace the matcher used by scans started from now on.
    pub fn set_matcher(&self, matcher: TokenMatcher) {
        *self.matcher.borrow_mut() = matcher;
    }

    /// Walk every text node under `root`, yielding to the host at `priority`
    /// between nodes. Resolves once the walk is done; commits may still be
    /// waiting for the next frame.
    pub async fn scan(&self, root: T::Node, priority: TaskPriority) -> ScanReport {
        let mut report = ScanReport::default();
        if self.tree.ancestry(&root) != Ancestry::Clean {
            trace!(node = ?root, "scan root is engine markup or excluded");
            return report;
        }

        // Fixed for the whole walk even if configuration reloads mid-scan.
        let matcher = self.matcher.borrow().clone();
        let epoch = self.epoch.get();
        let mut cursor = ScanCursor::new(&self.tree, root);
        let mut since_yield = 0;

        while let Some(node) = cursor.advance(&self.tree) {
            if self.epoch.get() != epoch {
                debug!(visited = report.visited, "scan cancelled");
                return report;
            }
            if !self.tree.is_text(&node) {
                since_yield += 1;
                if since_yield >= ELEMENT_BUDGET {
                    since_yield = 0;
                    self.scheduler.yield_now(priority).await;
                }
                continue;
            }

            report.visited += 1;
            match self.process_text(&matcher, &node) {
                NodeOutcome::Skipped => report.skipped += 1,
                NodeOutcome::NoMatches => {}
                NodeOutcome::Scheduled(count) => {
                    report.scheduled += 1;
                    report.matches += count;
                }
                NodeOutcome::Failed => report.failed += 1,
            }
            since_yield = 0;
            self.scheduler.yield_now(priority).await;
        }

        debug!(
            visited = report.visited,
            skipped = report.skipped,
            scheduled = report.scheduled,
            failed = report.failed,
            "scan finished"
        );
        report
    }

    /// Scan each root in turn and sum the reports.
    pub async fn scan_roots(&self, roots: Vec<T::Node>, priority: TaskPriority) -> ScanReport {
        let mut total = ScanReport::default();
        let epoch = self.epoch.get();
        for root in roots {
            if self.epoch.get() != epoch {
                break;
            }
            total.absorb(self.scan(root, priority).await);
        }
        total
    }

    fn process_text(&self, matcher: &TokenMatcher, node: &T::Node) -> NodeOutcome {
        let Some(text) = self.tree.text(node) else {
            return NodeOutcome::Skipped;
        };
        let stamp = ContentStamp::of(&text);
        if self.tree.processed_stamp(node) == Some(stamp) {
            return NodeOutcome::Skipped;
        }
        // Stamped even when nothing matches, so unchanged text is never matched twice.
        self.tree.set_processed_stamp(node, stamp);

        if text.trim().is_empty() {
            return NodeOutcome::NoMatches;
        }
        let matches = matcher.find(&text);
        if matches.is_empty() {
            return NodeOutcome::NoMatches;
        }

        match rewrite(&text, &matches) {
            Ok(fragment) => {
                trace!(node = ?node, matches = matches.len(), "scheduling commit");
                self.schedule_commit(node.clone(), stamp, fragment);
                NodeOutcome::Scheduled(matches.len())
            }
            Err(e) => {
                warn!(node = ?node, error = %e, "skipping text node");
                NodeOutcome::Failed
            }
        }
    }

    fn schedule_commit(&self, node: T::Node, stamp: ContentStamp, fragment: Fragment) {
        let tree = self.tree.clone();
        self.scheduler.request_frame(Box::new(move || {
            match commit_fragment(&tree, &node, stamp, &fragment) {
                Ok(Some(outcome)) => {
                    trace!(containers = outcome.containers.len(), "committed fragment")
                }
                Ok(None) => trace!(node = ?node, "dropping stale commit"),
                Err(e) => warn!(node = ?node, error = %e, "commit failed"),
            }
        }));
    }
}

/// Apply a fragment to the node it was built from.
///
/// Returns `Ok(None)` without touching the tree when the node has been
/// detached or its text no longer matches `stamp`. Every text node the commit
/// creates is stamped processed.
pub fn commit_fragment<T: DocumentTree>(
    tree: &T,
    node: &T::Node,
    stamp: ContentStamp,
    fragment: &Fragment,
) -> Result<Option<CommitOutcome<T::Node>>, TreeError> {
    if !tree.is_connected(node) {
        return Ok(None);
    }
    match tree.text(node) {
        Some(text) if ContentStamp::of(&text) == stamp => {}
        _ => return Ok(None),
    }

    let outcome = tree.replace_text_with_fragment(node, fragment)?;
    for text in &outcome.texts {
        tree.mark_processed(text);
    }
    Ok(Some(outcome))
}
