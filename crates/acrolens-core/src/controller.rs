//! Page-level wiring of the engine.
//!
//! `ContentController` owns the scanner, the mutation watcher and the
//! overlays for one page, and translates host input (pointer, selection,
//! mutation batches, configuration changes) into engine operations.

use std::cell::{Cell, RefCell};
use std::ops::Range;
use std::rc::Rc;

use tracing::{debug, info, trace, warn};

use crate::config::{CloseMode, HostConfig};
use crate::overlay::{CONTEXT_CHARS, OverlayController, ShowOptions};
use crate::platform::{NodeOf, Platform, Services};
use crate::scanner::TreeScanner;
use crate::scheduler::{Scheduler, TaskPriority};
use crate::tree::{Ancestry, DocumentTree, ROLE_CONTAINER};
use crate::types::{IdAllocator, OverlayId, clip_around};
use crate::watcher::{MutationRecord, MutationWatcher};

/// A finished user selection inside a single text node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionRange<N> {
    pub node: N,
    /// Byte range into the node's text.
    pub range: Range<usize>,
}

struct ControllerState<P: Platform> {
    services: Services<P>,
    scanner: Rc<TreeScanner<P::Tree, P::Scheduler>>,
    watcher: MutationWatcher<P::Tree, P::Scheduler>,
    overlays: OverlayController<P>,
    config: RefCell<HostConfig>,
    started: Cell<bool>,
}

/// Runs the engine on one page.
pub struct ContentController<P: Platform> {
    state: Rc<ControllerState<P>>,
}

impl<P: Platform> Clone for ContentController<P> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<P: Platform> ContentController<P> {
    pub fn new(services: Services<P>, config: HostConfig) -> Self {
        let ids = Rc::new(IdAllocator::new());
        let scanner = Rc::new(TreeScanner::new(
            services.tree.clone(),
            services.scheduler.clone(),
            config.matcher(),
        ));
        let watcher = MutationWatcher::new(
            services.tree.clone(),
            services.scheduler.clone(),
            Rc::clone(&scanner),
        );
        let overlays = OverlayController::new(services.clone(), ids, config.model_settings());
        overlays.set_highlighting(config.highlight_enabled);
        Self {
            state: Rc::new(ControllerState {
                services,
                scanner,
                watcher,
                overlays,
                config: RefCell::new(config),
                started: Cell::new(false),
            }),
        }
    }

    pub fn config(&self) -> HostConfig {
        self.state.config.borrow().clone()
    }

    pub fn overlays(&self) -> &OverlayController<P> {
        &self.state.overlays
    }

    pub fn watcher(&self) -> &MutationWatcher<P::Tree, P::Scheduler> {
        &self.state.watcher
    }

    /// Start highlighting. The watcher is always installed; it only reacts
    /// while highlighting is enabled.
    pub fn start(&self) {
        if self.state.started.replace(true) {
            return;
        }
        let enabled = self.state.config.borrow().highlight_enabled;
        self.state.watcher.set_active(enabled);
        if enabled {
            self.post_full_scan();
        }
        info!(highlight = enabled, "content controller started");
    }

    fn post_full_scan(&self) {
        let scanner = Rc::clone(&self.state.scanner);
        let root = self.state.services.tree.root();
        self.state.services.scheduler.post_task(
            TaskPriority::UserVisible,
            Box::pin(async move {
                scanner.scan(root, TaskPriority::UserVisible).await;
            }),
        );
    }

    // === Host input ===

    /// The pointer entered `node`. Shows an expanded overlay if it lies in
    /// an annotated container.
    pub fn on_pointer_enter(&self, node: &NodeOf<P>) -> Option<OverlayId> {
        let container = self.state.services.tree.enclosing_container(node)?;
        let revert_on_close = self.state.config.borrow().close_mode == CloseMode::RevertToText;
        self.state.overlays.show(
            &container,
            ShowOptions {
                expand_immediately: true,
                revert_on_close,
                keep_processed: true,
                ..Default::default()
            },
        )
    }

    /// The user released a selection. Wraps it in a one-off container and
    /// shows a collapsed overlay that reverts when closed.
    pub fn on_selection_released(&self, selection: SelectionRange<NodeOf<P>>) -> Option<OverlayId> {
        let tree = &self.state.services.tree;
        let SelectionRange { node, range } = selection;
        let text = tree.text(&node)?;
        let selected = text.get(range.clone())?;
        let trimmed = selected.trim();
        if trimmed.is_empty() {
            return None;
        }
        if tree.ancestry(&node) != Ancestry::Clean {
            trace!(node = ?node, "ignoring selection outside page content");
            return None;
        }
        let start = range.start + (selected.len() - selected.trim_start().len());
        // The pieces inherit the source's stamp so unscanned text still gets
        // highlighted later.
        let classified = tree.is_processed(&node);

        let outcome = match tree.wrap_text_range(&node, start..start + trimmed.len()) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "could not wrap selection");
                return None;
            }
        };
        if classified {
            for created in &outcome.texts {
                tree.mark_processed(created);
            }
        }
        let container = outcome.containers.into_iter().next()?;

        let shown = self.state.overlays.show(
            &container,
            ShowOptions {
                expand_immediately: false,
                explicit_acronym: Some(trimmed.to_string()),
                explicit_context: Some(clip_around(text.trim(), trimmed, CONTEXT_CHARS)),
                revert_on_close: true,
                keep_processed: classified,
            },
        );
        if shown.is_none() {
            match tree.unwrap_container(&container) {
                Ok(merged) if classified => tree.mark_processed(&merged),
                Ok(merged) => tree.clear_processed_stamp(&merged),
                Err(e) => warn!(error = %e, "could not revert selection container"),
            }
        }
        shown
    }

    /// A pointer press anywhere on the page dismisses overlays it is not in.
    pub fn on_pointer_down(&self, node: &NodeOf<P>) {
        self.state.overlays.dismiss_outside(node);
    }

    pub fn on_mutations(&self, records: Vec<MutationRecord<NodeOf<P>>>) {
        self.state.watcher.on_records(records);
    }

    /// Apply a configuration change without reloading the page.
    pub fn apply_config(&self, config: HostConfig) {
        let previous = self.state.config.replace(config.clone());
        if previous == config {
            return;
        }
        self.state.overlays.update_settings(config.model_settings());
        let matcher_fields = |c: &HostConfig| (c.match_rule, c.min_len, c.max_len, c.stop_words.clone());
        if matcher_fields(&previous) != matcher_fields(&config) {
            self.state.scanner.set_matcher(config.matcher());
        }

        self.state.overlays.set_highlighting(config.highlight_enabled);
        let started = self.state.started.get();
        match (previous.highlight_enabled, config.highlight_enabled) {
            (true, false) => {
                self.state.watcher.set_active(false);
                self.state.scanner.cancel_all();
                if started {
                    self.revert_idle_containers();
                }
            }
            (false, true) if started => {
                self.state.watcher.set_active(true);
                self.post_full_scan();
            }
            _ => {}
        }
        debug!(
            highlight = config.highlight_enabled,
            model = config.model.as_str(),
            "configuration applied"
        );
    }

    /// At the next frame, replace every annotated container without an
    /// overlay by its text. The merged text loses its stamp so a later scan
    /// highlights it again.
    fn revert_idle_containers(&self) {
        let tree = self.state.services.tree.clone();
        let overlays = self.state.overlays.clone();
        self.state.services.scheduler.request_frame(Box::new(move || {
            let idle: Vec<_> = tree
                .descendants(&tree.root())
                .into_iter()
                .filter(|n| tree.markup_role(n).as_deref() == Some(ROLE_CONTAINER))
                .filter(|n| overlays.overlay_for(n).is_none())
                .collect();
            let mut reverted = 0;
            for container in idle {
                match tree.unwrap_container(&container) {
                    Ok(merged) => {
                        tree.clear_processed_stamp(&merged);
                        reverted += 1;
                    }
                    Err(e) => warn!(error = %e, "could not revert container"),
                }
            }
            debug!(reverted, "reverted idle containers");
        }));
    }
}
