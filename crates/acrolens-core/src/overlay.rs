//! Overlay lifecycle.
//!
//! An overlay is attached to one annotated container. It is mounted on the
//! host's isolated surface, runs its lookups while visible, and on close plays
//! its exit transition before it detaches and optionally reverts the
//! container to plain text.
//!
//! ```text
//! show ──▶ Visible ──close──▶ Closing ──exit transition──▶ Removed
//! ```
//!
//! At most one overlay exists per container; the container carries
//! `OVERLAY_ATTR` while it does.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::future::Future;
use std::rc::{Rc, Weak};

use n0_future::future;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::config::ModelSettings;
use crate::encyclopedia::{self, EncyclopediaView};
use crate::error::SurfaceError;
use crate::lookup::{self, LookupBackend, PanelState};
use crate::model::ModelBackend;
use crate::platform::{NodeOf, Platform, Services};
use crate::prompts::LookupInput;
use crate::relay::HostRelay;
use crate::scheduler::{Scheduler, TaskPriority};
use crate::tree::{DocumentTree, OVERLAY_ATTR};
use crate::types::{IdAllocator, OverlayId};

/// Characters of surrounding text handed to the lookups.
pub const CONTEXT_CHARS: usize = 600;

/// Generation value meaning the overlay has started closing.
const CLOSED: u64 = u64::MAX;

/// How the surface is positioned against its container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Placement {
    /// Host-native anchor positioning.
    Anchored,
    /// Absolutely positioned below the container, left-aligned.
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverlayPhase {
    Visible,
    Closing,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Expansion {
    Collapsed,
    Expanded,
}

/// User interaction reported by a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "backend", rename_all = "kebab-case")]
pub enum OverlayEvent {
    Close,
    Expand,
    SelectBackend(LookupBackend),
    SearchWeb,
}

/// Callback a surface invokes for user interaction.
pub type OverlayEvents = Rc<dyn Fn(OverlayEvent)>;

/// Everything a surface needs to draw one overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayView {
    pub id: OverlayId,
    pub acronym: String,
    pub phase: OverlayPhase,
    pub expansion: Expansion,
    pub selected: LookupBackend,
    pub explanation: PanelState<String>,
    /// Expanded phrase the encyclopedia lookup went looking for.
    pub expanded_phrase: Option<String>,
    pub encyclopedia: PanelState<EncyclopediaView>,
    pub searching: bool,
}

/// A mounted rendering surface.
pub trait OverlaySurface: 'static {
    fn render(&self, view: &OverlayView);

    /// Resolves once the exit transition started by rendering a closing
    /// view has finished.
    fn exit_transition(&self) -> impl Future<Output = ()>;

    /// Remove the surface from the document.
    fn detach(&self);
}

/// Creates isolated rendering surfaces anchored to containers.
pub trait OverlayHost<N>: Clone + 'static {
    type Surface: OverlaySurface;

    fn supports_anchor_positioning(&self) -> bool;

    fn mount(
        &self,
        container: &N,
        id: OverlayId,
        placement: Placement,
        events: OverlayEvents,
    ) -> Result<Self::Surface, SurfaceError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShowOptions {
    /// Start lookups right away instead of waiting for `expand`.
    pub expand_immediately: bool,
    pub explicit_acronym: Option<String>,
    pub explicit_context: Option<String>,
    /// Replace the container with its plain text once the overlay is gone.
    pub revert_on_close: bool,
    /// Stamp the reverted text as processed. Only set when the text had been
    /// classified before the container was made; otherwise it is left for
    /// the scanner.
    pub keep_processed: bool,
}

type SurfaceOf<P> = <<P as Platform>::Host as OverlayHost<NodeOf<P>>>::Surface;

struct OverlayEntry<P: Platform> {
    container: NodeOf<P>,
    surface: Rc<SurfaceOf<P>>,
    input: LookupInput,
    revert_on_close: bool,
    keep_processed: bool,
    phase: OverlayPhase,
    expansion: Expansion,
    selected: LookupBackend,
    /// Model answering the explanation panel.
    explanation_backend: LookupBackend,
    explanation: PanelState<String>,
    expanded_phrase: Option<String>,
    encyclopedia: PanelState<EncyclopediaView>,
    searching: bool,
    lookups_started: bool,
    /// Bumped whenever the explanation restarts.
    generation: u64,
    /// Broadcasts the current generation, or `CLOSED`.
    cancel: watch::Sender<u64>,
}

impl<P: Platform> OverlayEntry<P> {
    fn is_visible(&self) -> bool {
        self.phase == OverlayPhase::Visible
    }

    fn accepts(&self, generation: u64) -> bool {
        self.is_visible() && self.generation == generation
    }

    fn view(&self, id: OverlayId) -> OverlayView {
        OverlayView {
            id,
            acronym: self.input.acronym.clone(),
            phase: self.phase,
            expansion: self.expansion,
            selected: self.selected,
            explanation: self.explanation.clone(),
            expanded_phrase: self.expanded_phrase.clone(),
            encyclopedia: self.encyclopedia.clone(),
            searching: self.searching,
        }
    }
}

struct OverlayState<P: Platform> {
    services: Services<P>,
    ids: Rc<IdAllocator>,
    settings: RefCell<ModelSettings>,
    highlighting: Cell<bool>,
    entries: RefCell<BTreeMap<OverlayId, OverlayEntry<P>>>,
}

/// Owns every overlay on the page.
pub struct OverlayController<P: Platform> {
    state: Rc<OverlayState<P>>,
}

impl<P: Platform> Clone for OverlayController<P> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<P: Platform> OverlayController<P> {
    pub fn new(services: Services<P>, ids: Rc<IdAllocator>, settings: ModelSettings) -> Self {
        Self {
            state: Rc::new(OverlayState {
                services,
                ids,
                settings: RefCell::new(settings),
                highlighting: Cell::new(true),
                entries: RefCell::new(BTreeMap::new()),
            }),
        }
    }

    /// Model settings for lookups started from now on.
    pub fn update_settings(&self, settings: ModelSettings) {
        *self.state.settings.borrow_mut() = settings;
    }

    /// While highlighting is off, every container reverts when its overlay
    /// is removed and the reverted text is left unclassified.
    pub fn set_highlighting(&self, enabled: bool) {
        self.state.highlighting.set(enabled);
    }

    // === Queries ===

    /// Phase of an overlay. Unknown ids have been removed.
    pub fn phase(&self, id: OverlayId) -> OverlayPhase {
        self.state
            .entries
            .borrow()
            .get(&id)
            .map_or(OverlayPhase::Removed, |entry| entry.phase)
    }

    pub fn view(&self, id: OverlayId) -> Option<OverlayView> {
        self.state.entries.borrow().get(&id).map(|entry| entry.view(id))
    }

    /// Overlay attached to `container`, visible or closing.
    pub fn overlay_for(&self, container: &NodeOf<P>) -> Option<OverlayId> {
        self.state
            .entries
            .borrow()
            .iter()
            .find(|(_, entry)| entry.container == *container)
            .map(|(id, _)| *id)
    }

    /// Number of overlays not yet removed.
    pub fn len(&self) -> usize {
        self.state.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // === Lifecycle ===

    /// Attach an overlay to `container`.
    ///
    /// Returns the existing id if the container already has one, and `None`
    /// if the surface could not be mounted.
    pub fn show(&self, container: &NodeOf<P>, options: ShowOptions) -> Option<OverlayId> {
        let tree = &self.state.services.tree;
        if let Some(marker) = tree.attribute(container, OVERLAY_ATTR) {
            let existing = OverlayId::from_attr(&marker)
                .filter(|id| self.state.entries.borrow().contains_key(id));
            if let Some(id) = existing {
                trace!(%id, "container already has an overlay");
                return Some(id);
            }
            debug!(marker = %marker, "clearing stale overlay marker");
            clear_marker(tree, container);
        }
        if !tree.is_connected(container) {
            warn!("cannot show an overlay on a detached container");
            return None;
        }

        let id = self.state.ids.next_overlay();
        if let Err(e) = tree.set_attribute(container, OVERLAY_ATTR, &id.to_attr()) {
            warn!(%id, error = %e, "could not mark container");
            return None;
        }

        let acronym = options
            .explicit_acronym
            .unwrap_or_else(|| tree.text_content(container).trim().to_string());
        let context = options
            .explicit_context
            .unwrap_or_else(|| tree.surrounding_text(container, &acronym, CONTEXT_CHARS));
        let input = LookupInput {
            acronym,
            context,
            page_url: tree.page_url().unwrap_or_default(),
        };

        let host = &self.state.services.host;
        let placement = if host.supports_anchor_positioning() {
            Placement::Anchored
        } else {
            Placement::Fallback
        };
        let surface = match host.mount(container, id, placement, self.event_sink(id)) {
            Ok(surface) => surface,
            Err(e) => {
                warn!(%id, error = %e, "could not mount overlay");
                clear_marker(tree, container);
                return None;
            }
        };

        let backend = self.state.settings.borrow().default_backend();
        let expansion = if options.expand_immediately {
            Expansion::Expanded
        } else {
            Expansion::Collapsed
        };
        debug!(%id, acronym = %input.acronym, ?placement, "showing overlay");
        self.state.entries.borrow_mut().insert(
            id,
            OverlayEntry {
                container: container.clone(),
                surface: Rc::new(surface),
                input,
                revert_on_close: options.revert_on_close,
                keep_processed: options.keep_processed,
                phase: OverlayPhase::Visible,
                expansion,
                selected: backend,
                explanation_backend: backend,
                explanation: PanelState::Idle,
                expanded_phrase: None,
                encyclopedia: PanelState::Idle,
                searching: false,
                lookups_started: false,
                generation: 0,
                cancel: watch::channel(0).0,
            },
        );

        self.render(id);
        if expansion == Expansion::Expanded {
            self.start_lookups(id);
        }
        Some(id)
    }

    /// Begin closing a visible overlay. Returns whether anything happened.
    pub fn close(&self, id: OverlayId) -> bool {
        let surface = {
            let mut entries = self.state.entries.borrow_mut();
            let Some(entry) = entries.get_mut(&id).filter(|e| e.is_visible()) else {
                return false;
            };
            entry.phase = OverlayPhase::Closing;
            entry.cancel.send_replace(CLOSED);
            Rc::clone(&entry.surface)
        };
        debug!(%id, "closing overlay");
        self.render(id);

        let this = self.clone();
        self.state.services.scheduler.post_task(
            TaskPriority::UserVisible,
            Box::pin(async move {
                surface.exit_transition().await;
                this.finish_close(id);
            }),
        );
        true
    }

    /// Close every visible overlay whose container does not contain `node`.
    pub fn dismiss_outside(&self, node: &NodeOf<P>) {
        let tree = &self.state.services.tree;
        let outside: Vec<_> = self
            .state
            .entries
            .borrow()
            .iter()
            .filter(|(_, entry)| entry.is_visible() && !tree.contains(&entry.container, node))
            .map(|(id, _)| *id)
            .collect();
        for id in outside {
            self.close(id);
        }
    }

    pub fn close_all(&self) {
        let visible: Vec<_> = self
            .state
            .entries
            .borrow()
            .iter()
            .filter(|(_, entry)| entry.is_visible())
            .map(|(id, _)| *id)
            .collect();
        for id in visible {
            self.close(id);
        }
    }

    fn finish_close(&self, id: OverlayId) {
        let Some(entry) = self.state.entries.borrow_mut().remove(&id) else {
            return;
        };
        entry.surface.detach();

        let tree = &self.state.services.tree;
        let highlighting = self.state.highlighting.get();
        let revert = entry.revert_on_close || !highlighting;
        if tree.is_connected(&entry.container) {
            clear_marker(tree, &entry.container);
            if revert {
                match tree.unwrap_container(&entry.container) {
                    Ok(merged) if highlighting && entry.keep_processed => {
                        tree.mark_processed(&merged)
                    }
                    Ok(merged) => tree.clear_processed_stamp(&merged),
                    Err(e) => warn!(%id, error = %e, "could not revert container"),
                }
            }
        }
        debug!(%id, reverted = revert, "overlay removed");
    }

    // === Interaction ===

    pub fn handle_event(&self, id: OverlayId, event: OverlayEvent) {
        trace!(%id, ?event, "overlay event");
        match event {
            OverlayEvent::Close => {
                self.close(id);
            }
            OverlayEvent::Expand => self.expand(id),
            OverlayEvent::SelectBackend(backend) => self.select_backend(id, backend),
            OverlayEvent::SearchWeb => self.search_web(id),
        }
    }

    /// Expand a collapsed overlay and start its lookups.
    pub fn expand(&self, id: OverlayId) {
        let changed = self.apply(id, None, |entry| {
            let changed = entry.expansion == Expansion::Collapsed;
            entry.expansion = Expansion::Expanded;
            changed
        });
        if changed == Some(true) {
            self.render(id);
            self.start_lookups(id);
        }
    }

    /// Focus `backend`. Picking another model restarts the explanation with
    /// it, as does picking the same model after a failure.
    pub fn select_backend(&self, id: OverlayId, backend: LookupBackend) {
        let restart = self.apply(id, None, |entry| {
            entry.selected = backend;
            let retry = matches!(
                entry.explanation,
                PanelState::Failed(_) | PanelState::NeedsCredential
            );
            if !backend.is_model() || (backend == entry.explanation_backend && !retry) {
                return None;
            }
            entry.explanation_backend = backend;
            if !entry.lookups_started {
                return None;
            }
            entry.generation += 1;
            entry.explanation = PanelState::Idle;
            entry.cancel.send_replace(entry.generation);
            Some((entry.generation, entry.cancel.subscribe()))
        });
        let Some(restart) = restart else {
            return;
        };
        self.render(id);
        if let Some((generation, cancel)) = restart {
            debug!(%id, ?backend, "restarting explanation");
            self.state.services.scheduler.post_task(
                TaskPriority::UserVisible,
                Box::pin(self.explanation_task(id, generation, cancel)),
            );
        }
    }

    /// Ask the model for a search query and open the results in a new tab.
    pub fn search_web(&self, id: OverlayId) {
        let request = self.apply(id, None, |entry| {
            if entry.searching {
                return None;
            }
            entry.searching = true;
            Some((entry.input.clone(), entry.explanation_backend))
        });
        let Some(Some((input, choice))) = request else {
            return;
        };
        self.render(id);

        let this = self.clone();
        self.state.services.scheduler.post_task(
            TaskPriority::UserBlocking,
            Box::pin(async move {
                let backend = this.state.settings.borrow().resolve(choice);
                let services = &this.state.services;
                match backend {
                    Some(backend) => {
                        match lookup::search_url(&services.model, &services.relay, &backend, &input)
                            .await
                        {
                            Ok(url) => {
                                if let Err(e) = services.relay.open_tab(&url).await {
                                    warn!(%id, error = %e, "could not open search tab");
                                }
                            }
                            Err(e) => warn!(%id, error = %e, "search query failed"),
                        }
                    }
                    None => debug!(%id, "web search needs a model credential"),
                }
                if this.apply(id, None, |entry| entry.searching = false).is_some() {
                    this.render(id);
                }
            }),
        );
    }

    // === Lookups ===

    fn start_lookups(&self, id: OverlayId) {
        let started = self.apply(id, None, |entry| {
            if entry.lookups_started {
                return None;
            }
            entry.lookups_started = true;
            Some((entry.generation, entry.cancel.subscribe()))
        });
        let Some(Some((generation, cancel))) = started else {
            return;
        };

        let explanation = self.explanation_task(id, generation, cancel.clone());
        let encyclopedia = self.encyclopedia_task(id, cancel);
        self.state.services.scheduler.post_task(
            TaskPriority::UserVisible,
            Box::pin(async move {
                future::zip(explanation, encyclopedia).await;
            }),
        );
    }

    fn explanation_task(
        &self,
        id: OverlayId,
        generation: u64,
        mut cancel: watch::Receiver<u64>,
    ) -> impl Future<Output = ()> + use<P> {
        let this = self.clone();
        async move {
            let work = async {
                let Some((backend, input)) = this.prepare_explanation(id, generation) else {
                    return;
                };
                let services = &this.state.services;
                lookup::stream_explanation(&services.model, &services.relay, &backend, &input, |state| {
                    this.update_explanation(id, generation, state)
                })
                .await;
            };
            let superseded = async move {
                let _ = cancel.wait_for(|current| *current != generation).await;
                trace!(%id, generation, "explanation cancelled");
            };
            future::or(work, superseded).await;
        }
    }

    fn prepare_explanation(&self, id: OverlayId, generation: u64) -> Option<(ModelBackend, LookupInput)> {
        let (choice, input) = {
            let entries = self.state.entries.borrow();
            let entry = entries.get(&id).filter(|e| e.accepts(generation))?;
            (entry.explanation_backend, entry.input.clone())
        };
        let backend = self.state.settings.borrow().resolve(choice);
        if backend.is_none() {
            self.update_explanation(id, generation, PanelState::NeedsCredential);
        }
        backend.map(|backend| (backend, input))
    }

    fn update_explanation(&self, id: OverlayId, generation: u64, state: PanelState<String>) -> bool {
        let accepted = self
            .apply(id, Some(generation), |entry| entry.explanation = state)
            .is_some();
        if accepted {
            self.render(id);
        } else {
            trace!(%id, generation, "dropping stale explanation update");
        }
        accepted
    }

    fn encyclopedia_task(
        &self,
        id: OverlayId,
        mut cancel: watch::Receiver<u64>,
    ) -> impl Future<Output = ()> + use<P> {
        let this = self.clone();
        async move {
            let work = async {
                let request = this.apply(id, None, |entry| {
                    entry.encyclopedia = PanelState::Loading;
                    (entry.input.clone(), entry.explanation_backend)
                });
                let Some((input, choice)) = request else {
                    return;
                };
                this.render(id);

                let services = &this.state.services;
                let backend = this.state.settings.borrow().resolve(choice);
                let expansion = match &backend {
                    Some(backend) => lookup::find_expansion(&services.model, backend, &input).await,
                    None => None,
                };
                if let Some(phrase) = &expansion {
                    let phrase = phrase.clone();
                    if this.apply(id, None, |entry| entry.expanded_phrase = Some(phrase)).is_some() {
                        this.render(id);
                    }
                }

                let state = match encyclopedia::resolve(
                    &services.encyclopedia,
                    &input.acronym,
                    expansion.as_deref(),
                )
                .await
                {
                    Ok(view) => PanelState::Ready(view),
                    Err(e) => {
                        debug!(%id, error = %e, "encyclopedia lookup failed");
                        PanelState::Failed(e.to_string())
                    }
                };
                if this.apply(id, None, |entry| entry.encyclopedia = state).is_some() {
                    this.render(id);
                }
            };
            let closed = async move {
                let _ = cancel.wait_for(|current| *current == CLOSED).await;
            };
            future::or(work, closed).await;
        }
    }

    // === Internals ===

    /// Run `f` on a visible entry, optionally only at `generation`.
    fn apply<R>(
        &self,
        id: OverlayId,
        generation: Option<u64>,
        f: impl FnOnce(&mut OverlayEntry<P>) -> R,
    ) -> Option<R> {
        let mut entries = self.state.entries.borrow_mut();
        let entry = entries.get_mut(&id)?;
        let live = match generation {
            Some(generation) => entry.accepts(generation),
            None => entry.is_visible(),
        };
        live.then(|| f(entry))
    }

    fn render(&self, id: OverlayId) {
        let rendered = self
            .state
            .entries
            .borrow()
            .get(&id)
            .map(|entry| (Rc::clone(&entry.surface), entry.view(id)));
        if let Some((surface, view)) = rendered {
            surface.render(&view);
        }
    }

    fn event_sink(&self, id: OverlayId) -> OverlayEvents {
        let state: Weak<OverlayState<P>> = Rc::downgrade(&self.state);
        Rc::new(move |event| {
            if let Some(state) = state.upgrade() {
                OverlayController { state }.handle_event(id, event);
            }
        })
    }
}

fn clear_marker<T: DocumentTree>(tree: &T, container: &T::Node) {
    if let Err(e) = tree.remove_attribute(container, OVERLAY_ATTR) {
        debug!(error = %e, "could not clear overlay marker");
    }
}
