//! Scripted collaborators for unit tests.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::rc::Rc;

use futures::StreamExt;
use futures::stream;
use smol_str::SmolStr;
use tokio::sync::mpsc;

use crate::encyclopedia::{Encyclopedia, Page};
use crate::error::{LookupError, SurfaceError};
use crate::matcher::TokenMatcher;
use crate::memory::{MemoryTree, NodeId};
use crate::model::{LanguageModel, ModelBackend, ModelSession, SessionOptions, TextStream};
use crate::overlay::{OverlayEvent, OverlayEvents, OverlayHost, OverlaySurface, OverlayView, Placement};
use crate::platform::{Platform, Services};
use crate::relay::HostRelay;
use crate::scanner::TreeScanner;
use crate::scheduler::{LocalRuntime, LocalScheduler, TaskPriority};
use crate::tree::{DocumentTree, MARKUP_ATTR, ROLE_OVERLAY};
use crate::types::OverlayId;

pub type ChunkSender = mpsc::UnboundedSender<Result<String, LookupError>>;

#[derive(Default)]
struct ModelState {
    replies: RefCell<VecDeque<Result<String, LookupError>>>,
    streams: RefCell<VecDeque<TextStream>>,
    prompts: RefCell<Vec<String>>,
    sessions: RefCell<Vec<ModelBackend>>,
    fail_sessions: Cell<bool>,
    destroyed: Cell<usize>,
}

/// Model answering from queues of scripted replies and streams.
#[derive(Clone, Default)]
pub struct FakeModel {
    state: Rc<ModelState>,
}

impl FakeModel {
    /// Queue the answer to the next `prompt_once`.
    pub fn push_reply(&self, reply: Result<String, LookupError>) {
        self.state.replies.borrow_mut().push_back(reply);
    }

    /// Queue a finite stream for the next `prompt_streaming`.
    pub fn push_stream(&self, chunks: Vec<Result<String, LookupError>>) {
        self.state
            .streams
            .borrow_mut()
            .push_back(stream::iter(chunks).boxed_local());
    }

    /// Queue a stream fed by hand. The sender reports closed once the
    /// consumer has dropped the stream.
    pub fn push_channel(&self) -> ChunkSender {
        let (sender, receiver) = mpsc::unbounded_channel();
        let chunks = stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|chunk| (chunk, receiver))
        });
        self.state.streams.borrow_mut().push_back(chunks.boxed_local());
        sender
    }

    pub fn fail_sessions(&self) {
        self.state.fail_sessions.set(true);
    }

    pub fn prompts(&self) -> Vec<String> {
        self.state.prompts.borrow().clone()
    }

    /// Backends of every session created, in order.
    pub fn sessions(&self) -> Vec<ModelBackend> {
        self.state.sessions.borrow().clone()
    }

    pub fn destroyed(&self) -> usize {
        self.state.destroyed.get()
    }
}

pub struct FakeSession {
    state: Rc<ModelState>,
}

impl ModelSession for FakeSession {
    fn prompt_once(&self, input: &str) -> impl Future<Output = Result<String, LookupError>> {
        self.state.prompts.borrow_mut().push(input.to_string());
        let reply = self
            .state
            .replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(LookupError::Unavailable("no scripted reply".into())));
        async move { reply }
    }

    fn prompt_streaming(&self, input: &str) -> TextStream {
        self.state.prompts.borrow_mut().push(input.to_string());
        self.state
            .streams
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| stream::empty().boxed_local())
    }

    fn destroy(&self) {
        self.state.destroyed.set(self.state.destroyed.get() + 1);
    }
}

impl LanguageModel for FakeModel {
    type Session = FakeSession;

    fn create_session(
        &self,
        backend: &ModelBackend,
        _options: SessionOptions,
    ) -> impl Future<Output = Result<FakeSession, LookupError>> {
        self.state.sessions.borrow_mut().push(backend.clone());
        let session = if self.state.fail_sessions.get() {
            Err(LookupError::Unavailable("sessions disabled".into()))
        } else {
            Ok(FakeSession {
                state: Rc::clone(&self.state),
            })
        };
        async move { session }
    }
}

/// Encyclopedia over a fixed set of pages, keyed by case-insensitive query.
#[derive(Clone, Default)]
pub struct FakeEncyclopedia {
    pages: Rc<RefCell<HashMap<SmolStr, Page>>>,
    queries: Rc<RefCell<Vec<String>>>,
}

fn page_key(query: &str) -> SmolStr {
    SmolStr::new(query.trim().to_lowercase())
}

impl FakeEncyclopedia {
    pub fn with(pages: Vec<(&str, Page)>) -> Self {
        let encyclopedia = Self::default();
        for (query, page) in pages {
            encyclopedia.insert(query, page);
        }
        encyclopedia
    }

    pub fn insert(&self, query: &str, page: Page) {
        self.pages.borrow_mut().insert(page_key(query), page);
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.borrow().clone()
    }
}

impl Encyclopedia for FakeEncyclopedia {
    fn find(&self, query: &str) -> impl Future<Output = Result<Page, LookupError>> {
        self.queries.borrow_mut().push(query.to_string());
        let found = self.pages.borrow().get(&page_key(query)).cloned();
        let query = SmolStr::new(query);
        async move { found.ok_or(LookupError::NotFound(query)) }
    }
}

#[derive(Clone, Default)]
pub struct FakeRelay {
    title: Rc<RefCell<Option<String>>>,
    opened: Rc<RefCell<Vec<String>>>,
}

impl FakeRelay {
    pub fn with_title(title: &str) -> Self {
        let relay = Self::default();
        relay.set_title(title);
        relay
    }

    pub fn set_title(&self, title: &str) {
        *self.title.borrow_mut() = Some(title.to_string());
    }

    /// URLs of every tab opened so far.
    pub fn opened(&self) -> Vec<String> {
        self.opened.borrow().clone()
    }
}

impl HostRelay for FakeRelay {
    fn current_page_title(&self) -> impl Future<Output = Result<Option<String>, LookupError>> {
        let title = self.title.borrow().clone();
        async move { Ok(title) }
    }

    fn open_tab(&self, url: &str) -> impl Future<Output = Result<(), LookupError>> {
        self.opened.borrow_mut().push(url.to_string());
        async { Ok(()) }
    }
}

struct HostState {
    anchor_positioning: Cell<bool>,
    fail_mounts: Cell<bool>,
    mounts: RefCell<Vec<(OverlayId, Placement)>>,
    views: RefCell<Vec<OverlayView>>,
    events: RefCell<HashMap<OverlayId, OverlayEvents>>,
    detached: RefCell<Vec<OverlayId>>,
}

/// Overlay host that mounts a marker element inside the container and
/// records everything rendered.
#[derive(Clone)]
pub struct FakeHost {
    tree: MemoryTree,
    state: Rc<HostState>,
}

impl FakeHost {
    pub fn new(tree: MemoryTree) -> Self {
        Self {
            tree,
            state: Rc::new(HostState {
                anchor_positioning: Cell::new(true),
                fail_mounts: Cell::new(false),
                mounts: RefCell::default(),
                views: RefCell::default(),
                events: RefCell::default(),
                detached: RefCell::default(),
            }),
        }
    }

    pub fn without_anchor_positioning(&self) {
        self.state.anchor_positioning.set(false);
    }

    pub fn fail_mounts(&self) {
        self.state.fail_mounts.set(true);
    }

    pub fn mounts(&self) -> Vec<(OverlayId, Placement)> {
        self.state.mounts.borrow().clone()
    }

    /// Every view rendered for `id`, oldest first.
    pub fn views(&self, id: OverlayId) -> Vec<OverlayView> {
        self.state
            .views
            .borrow()
            .iter()
            .filter(|view| view.id == id)
            .cloned()
            .collect()
    }

    pub fn detached(&self) -> Vec<OverlayId> {
        self.state.detached.borrow().clone()
    }

    /// Deliver a user interaction as the surface would.
    pub fn fire(&self, id: OverlayId, event: OverlayEvent) {
        let sink = self.state.events.borrow().get(&id).cloned();
        if let Some(sink) = sink {
            sink(event);
        }
    }
}

pub struct FakeSurface {
    id: OverlayId,
    element: NodeId,
    tree: MemoryTree,
    state: Rc<HostState>,
}

impl OverlaySurface for FakeSurface {
    fn render(&self, view: &OverlayView) {
        self.state.views.borrow_mut().push(view.clone());
    }

    fn exit_transition(&self) -> impl Future<Output = ()> {
        n0_future::future::yield_now()
    }

    fn detach(&self) {
        self.tree.remove(self.element);
        self.state.events.borrow_mut().remove(&self.id);
        self.state.detached.borrow_mut().push(self.id);
    }
}

impl OverlayHost<NodeId> for FakeHost {
    type Surface = FakeSurface;

    fn supports_anchor_positioning(&self) -> bool {
        self.state.anchor_positioning.get()
    }

    fn mount(
        &self,
        container: &NodeId,
        id: OverlayId,
        placement: Placement,
        events: OverlayEvents,
    ) -> Result<FakeSurface, SurfaceError> {
        if self.state.fail_mounts.get() {
            return Err(SurfaceError::Platform("shadow root refused".into()));
        }
        let element = self.tree.append_element(*container, "div");
        self.tree
            .set_attribute(&element, MARKUP_ATTR, ROLE_OVERLAY)
            .map_err(|e| SurfaceError::Platform(e.to_string().into()))?;
        self.state.mounts.borrow_mut().push((id, placement));
        self.state.events.borrow_mut().insert(id, events);
        Ok(FakeSurface {
            id,
            element,
            tree: self.tree.clone(),
            state: Rc::clone(&self.state),
        })
    }
}

pub struct FakePlatform;

impl Platform for FakePlatform {
    type Tree = MemoryTree;
    type Scheduler = LocalScheduler;
    type Host = FakeHost;
    type Model = FakeModel;
    type Encyclopedia = FakeEncyclopedia;
    type Relay = FakeRelay;
}

/// A page, a runtime and a full set of fakes.
pub struct Harness {
    pub runtime: LocalRuntime,
    pub tree: MemoryTree,
    pub host: FakeHost,
    pub model: FakeModel,
    pub encyclopedia: FakeEncyclopedia,
    pub relay: FakeRelay,
}

impl Harness {
    pub fn new() -> Self {
        let tree = MemoryTree::new().with_url("https://example.com/docs");
        Self {
            runtime: LocalRuntime::new(),
            host: FakeHost::new(tree.clone()),
            tree,
            model: FakeModel::default(),
            encyclopedia: FakeEncyclopedia::default(),
            relay: FakeRelay::default(),
        }
    }

    pub fn services(&self) -> Services<FakePlatform> {
        Services {
            tree: self.tree.clone(),
            scheduler: self.runtime.scheduler(),
            host: self.host.clone(),
            model: self.model.clone(),
            encyclopedia: self.encyclopedia.clone(),
            relay: self.relay.clone(),
        }
    }

    /// Append a body holding one paragraph per entry. Returns the body.
    pub fn page(&self, paragraphs: &[&str]) -> NodeId {
        let body = self.tree.append_element(self.tree.document(), "body");
        for text in paragraphs {
            let p = self.tree.append_element(body, "p");
            self.tree.append_text(p, text);
        }
        body
    }

    /// Annotate the whole document with the default matcher, then drop the
    /// mutation records produced so far.
    pub fn scan(&mut self) {
        let scanner = TreeScanner::new(
            self.tree.clone(),
            self.runtime.scheduler(),
            TokenMatcher::default(),
        );
        self.runtime
            .block_on(scanner.scan(self.tree.root(), TaskPriority::UserVisible));
        self.tree.take_records();
    }
}
