//! Browser layer for acrolens.
//!
//! This crate binds the engine's capabilities to the live page through
//! `web-sys`. It assumes a `wasm32-unknown-unknown` target environment.
//!
//! # Architecture
//!
//! - `dom`: `DocumentTree` over DOM nodes, stamps in a `WeakMap`
//! - `scheduler`: `scheduler.postTask` / `scheduler.yield` with timer fallbacks
//! - `observer`: `MutationObserver` to engine mutation records
//! - `surface`: shadow-DOM overlay host and its markup (`markup`)
//! - `prompt_api`: on-device Prompt API, dispatched alongside hosted models
//! - `relay`: `chrome.runtime` messaging to the background side
//! - `storage`: configuration from extension or page storage
//! - `events`: document-level pointer and selection delegation
//! - `platform`: the `Platform` binding tying it together
//!
//! # Re-exports
//!
//! This crate re-exports `acrolens-core` for convenience, so consumers
//! only need to depend on `acrolens-browser`.

// Re-export core crate
pub use acrolens_core;
pub use acrolens_core::*;

pub mod dom;
pub mod events;
pub mod js;
pub mod markup;
pub mod observer;
pub mod platform;
pub mod prompt_api;
pub mod relay;
pub mod scheduler;
pub mod storage;
pub mod surface;

pub use dom::DomTree;
pub use events::InputListeners;
pub use observer::ObserverHandle;
pub use platform::{BrowserPlatform, browser_services};
pub use prompt_api::{BrowserModel, PromptApiModel};
pub use relay::RuntimeRelay;
pub use scheduler::BrowserScheduler;
pub use storage::{ConfigWatch, load_config};
pub use surface::ShadowOverlayHost;
