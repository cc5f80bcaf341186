//! Reacting to document mutations.
//!
//! Records are batched and flushed from a background task, never from inside
//! the observer callback. The flush drops everything the engine itself
//! produced (engine markup and text whose processed stamp is current) before
//! handing the remaining top-level changes to the scanner.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::scanner::{ScanReport, TreeScanner};
use crate::scheduler::{Scheduler, TaskPriority};
use crate::tree::{Ancestry, DocumentTree, NodeKind};

/// One observed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationRecord<N> {
    /// Nodes inserted under some parent.
    ChildList { added: Vec<N> },
    /// A text node's data changed.
    CharacterData { target: N },
}

/// Reduce a batch of records to the minimal set of nodes worth rescanning.
///
/// Drops detached nodes, engine markup and anything under it, text in
/// excluded elements, text whose stamp is current, duplicates, and nodes
/// already covered by another root. Order of first appearance is kept.
pub fn collect_scan_roots<T: DocumentTree>(
    tree: &T,
    records: impl IntoIterator<Item = MutationRecord<T::Node>>,
) -> Vec<T::Node> {
    let mut seen = HashSet::new();
    let mut candidates: Vec<(u64, T::Node)> = Vec::new();
    let mut consider = |node: T::Node| {
        let key = tree.node_key(&node);
        if !seen.insert(key) || !tree.is_connected(&node) {
            return;
        }
        let eligible = match tree.kind(&node) {
            NodeKind::Text => !tree.is_processed(&node),
            NodeKind::Element => true,
            NodeKind::Other => false,
        };
        if eligible && tree.ancestry(&node) == Ancestry::Clean {
            candidates.push((key, node));
        }
    };

    for record in records {
        match record {
            MutationRecord::ChildList { added } => added.into_iter().for_each(&mut consider),
            MutationRecord::CharacterData { target } => consider(target),
        }
    }

    let keys: HashSet<u64> = candidates.iter().map(|(key, _)| *key).collect();
    candidates
        .into_iter()
        .filter(|(_, node)| {
            let mut current = tree.parent(node);
            while let Some(ancestor) = current {
                if keys.contains(&tree.node_key(&ancestor)) {
                    return false;
                }
                current = tree.parent(&ancestor);
            }
            true
        })
        .map(|(_, node)| node)
        .collect()
}

struct WatchState<N> {
    pending: RefCell<Vec<MutationRecord<N>>>,
    flush_scheduled: Cell<bool>,
    active: Cell<bool>,
    last_report: Cell<Option<ScanReport>>,
    scans: Cell<usize>,
}

/// Batches mutation records and rescans only what changed.
pub struct MutationWatcher<T: DocumentTree, S: Scheduler> {
    tree: T,
    scheduler: S,
    scanner: Rc<TreeScanner<T, S>>,
    state: Rc<WatchState<T::Node>>,
}

impl<T: DocumentTree, S: Scheduler> Clone for MutationWatcher<T, S> {
    fn clone(&self) -> Self {
        Self {
            tree: self.tree.clone(),
            scheduler: self.scheduler.clone(),
            scanner: Rc::clone(&self.scanner),
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: DocumentTree, S: Scheduler> MutationWatcher<T, S> {
    /// New watcher; inert until activated.
    pub fn new(tree: T, scheduler: S, scanner: Rc<TreeScanner<T, S>>) -> Self {
        Self {
            tree,
            scheduler,
            scanner,
            state: Rc::new(WatchState {
                pending: RefCell::new(Vec::new()),
                flush_scheduled: Cell::new(false),
                active: Cell::new(false),
                last_report: Cell::new(None),
                scans: Cell::new(0),
            }),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.active.get()
    }

    /// Start or stop reacting. Stopping discards any pending batch.
    pub fn set_active(&self, active: bool) {
        self.state.active.set(active);
        if !active {
            self.state.pending.borrow_mut().clear();
        }
    }

    /// Report of the most recent rescan, if any ran.
    pub fn last_report(&self) -> Option<ScanReport> {
        self.state.last_report.get()
    }

    /// Number of rescans run so far.
    pub fn scan_count(&self) -> usize {
        self.state.scans.get()
    }

    /// Accept records from the observer. Never touches the document; the
    /// batch is flushed by a background task, and records arriving before it
    /// runs join the same batch.
    pub fn on_records(&self, records: Vec<MutationRecord<T::Node>>) {
        if !self.is_active() || records.is_empty() {
            return;
        }
        self.state.pending.borrow_mut().extend(records);
        if self.state.flush_scheduled.replace(true) {
            return;
        }
        let watcher = self.clone();
        self.scheduler
            .post_task(TaskPriority::Background, Box::pin(watcher.flush()));
    }

    async fn flush(self) {
        self.state.flush_scheduled.set(false);
        let records = std::mem::take(&mut *self.state.pending.borrow_mut());
        if !self.is_active() {
            return;
        }

        let record_count = records.len();
        let roots = collect_scan_roots(&self.tree, records);
        if roots.is_empty() {
            trace!(records = record_count, "mutation batch was self-inflicted or empty");
            return;
        }

        debug!(records = record_count, roots = roots.len(), "rescanning mutated regions");
        self.state.scans.set(self.state.scans.get() + 1);
        let report = self
            .scanner
            .scan_roots(roots, TaskPriority::Background)
            .await;
        self.state.last_report.set(Some(report));
    }
}
