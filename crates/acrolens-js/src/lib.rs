//! Content-script entry point for acrolens.
//!
//! Loading the module installs the panic hook and console tracing, then
//! starts the content script on the current document. The exported
//! functions let the extension push configuration or shut it down.

mod content;

use wasm_bindgen::prelude::*;

pub use content::{apply_config, is_running, set_highlighting, stop};

/// Initialize panic hook and tracing, then start annotating the page.
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
    init_tracing();
    wasm_bindgen_futures::spawn_local(content::start());
}

fn init_tracing() {
    use tracing::Level;
    use tracing::subscriber::set_global_default;
    use tracing_subscriber::Registry;
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;

    let console_level = if cfg!(debug_assertions) {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let wasm_layer = tracing_wasm::WASMLayer::new(
        tracing_wasm::WASMLayerConfigBuilder::new()
            .set_max_level(console_level)
            .build(),
    );

    // Quiet the HTTP stack
    let filter = EnvFilter::new("debug,reqwest=info");

    let reg = Registry::default().with(filter).with(wasm_layer);

    let _ = set_global_default(reg);
}
