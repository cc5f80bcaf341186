//! acrolens-core: acronym detection and explanation overlays, independent of
//! any browser binding.
//!
//! This crate provides:
//! - `TokenMatcher` and `rewrite` for finding tokens and planning fragments
//! - `DocumentTree` trait for the live document, with `MemoryTree` for tests
//! - `TreeScanner` and `MutationWatcher` for incremental, cooperative annotation
//! - `OverlayController` for explanation overlays and their lookups
//! - `ContentController` tying all of it to host input

pub mod config;
pub mod controller;
pub mod encyclopedia;
pub mod error;
pub mod fragment;
pub mod lookup;
pub mod matcher;
pub mod memory;
pub mod model;
pub mod overlay;
pub mod platform;
pub mod prompts;
pub mod relay;
pub mod scanner;
pub mod scheduler;
pub mod tree;
pub mod types;
pub mod watcher;

#[cfg(test)]
mod testing;

pub use config::{CloseMode, CredentialState, HostConfig, ModelChoice, ModelSettings};
pub use controller::{ContentController, SelectionRange};
pub use encyclopedia::{Encyclopedia, EncyclopediaView, Page, PageSection};
pub use error::{ConfigError, LookupError, RewriteError, SurfaceError, TreeError};
pub use fragment::{Fragment, Run, RunKind, rewrite};
pub use lookup::{LookupBackend, PanelState};
pub use matcher::{Match, MatchRule, TokenMatcher, match_tokens};
pub use memory::{MemoryTree, NodeId};
pub use model::{ChatMessage, LanguageModel, ModelBackend, ModelSession, Role, SessionOptions, TextStream};
pub use overlay::{
    Expansion, OverlayController, OverlayEvent, OverlayEvents, OverlayHost, OverlayPhase,
    OverlaySurface, OverlayView, Placement, ShowOptions,
};
pub use platform::{NodeOf, Platform, Services};
pub use prompts::LookupInput;
pub use relay::{HostRelay, RelayMessage};
pub use scanner::{ScanReport, TreeScanner};
pub use scheduler::{FrameCallback, LocalRuntime, LocalScheduler, Scheduler, TaskPriority};
pub use smol_str::SmolStr;
pub use tree::{Ancestry, CommitOutcome, DocumentTree, NodeKind};
pub use types::{ContentStamp, IdAllocator, OverlayId, TextSpan};
pub use watcher::{MutationRecord, MutationWatcher};
