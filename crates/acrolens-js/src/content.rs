//! The running content script.

use std::cell::RefCell;

use acrolens_browser::storage::config_from_js;
use acrolens_browser::{
    BrowserPlatform, ConfigWatch, ContentController, DomTree, HostConfig, InputListeners,
    ObserverHandle, browser_services, load_config,
};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::spawn_local;

/// Everything that must stay alive while the page is annotated.
struct ContentScript {
    controller: ContentController<BrowserPlatform>,
    _observer: Option<ObserverHandle>,
    _listeners: InputListeners,
    _watch: Option<ConfigWatch>,
}

thread_local! {
    static SCRIPT: RefCell<Option<ContentScript>> = const { RefCell::new(None) };
}

fn with_controller<R>(f: impl FnOnce(&ContentController<BrowserPlatform>) -> R) -> Option<R> {
    SCRIPT.with(|script| script.borrow().as_ref().map(|s| f(&s.controller)))
}

async fn stored_config() -> HostConfig {
    match load_config().await {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, "could not load configuration, using defaults");
            HostConfig::default()
        }
    }
}

/// Start annotating the current document. A second call does nothing.
pub(crate) async fn start() {
    if is_running() {
        return;
    }
    let Some(document) = web_sys::window().and_then(|w| w.document()) else {
        tracing::warn!("no document, content script not started");
        return;
    };
    let config = stored_config().await;
    // Another start may have finished while the configuration loaded.
    if is_running() {
        return;
    }

    let controller = ContentController::new(browser_services(document.clone()), config);
    let root = DomTree::new(document.clone()).content_root();

    let on_records = controller.clone();
    let observer = match ObserverHandle::observe(&root, move |records| {
        on_records.on_mutations(records)
    }) {
        Ok(observer) => Some(observer),
        Err(e) => {
            tracing::warn!(error = %e, "mutation observer unavailable, dynamic content is not scanned");
            None
        }
    };
    let listeners = InputListeners::install(&document, controller.clone());
    let watch = ConfigWatch::install(|| spawn_local(reload_config()));

    controller.start();
    SCRIPT.with(|script| {
        *script.borrow_mut() = Some(ContentScript {
            controller,
            _observer: observer,
            _listeners: listeners,
            _watch: watch,
        })
    });
}

async fn reload_config() {
    let config = stored_config().await;
    with_controller(|controller| controller.apply_config(config));
}

/// Whether the content script is running on this page.
#[wasm_bindgen(js_name = isRunning)]
pub fn is_running() -> bool {
    SCRIPT.with(|script| script.borrow().is_some())
}

/// Replace the configuration with `config`, a plain JS object in the
/// stored configuration format.
#[wasm_bindgen(js_name = applyConfig)]
pub fn apply_config(config: JsValue) -> Result<(), JsError> {
    let config = config_from_js(config).map_err(|e| JsError::new(&e.to_string()))?;
    with_controller(|controller| controller.apply_config(config))
        .ok_or_else(|| JsError::new("content script is not running"))
}

/// Switch highlighting on or off, keeping the rest of the configuration.
#[wasm_bindgen(js_name = setHighlighting)]
pub fn set_highlighting(enabled: bool) {
    with_controller(|controller| {
        let mut config = controller.config();
        config.highlight_enabled = enabled;
        controller.apply_config(config);
    });
}

/// Close every overlay and detach from the page.
#[wasm_bindgen]
pub fn stop() {
    let script = SCRIPT.with(|script| script.borrow_mut().take());
    if let Some(script) = script {
        let mut config = script.controller.config();
        config.highlight_enabled = false;
        script.controller.apply_config(config);
        script.controller.overlays().close_all();
        tracing::info!("content script stopped");
    }
}
