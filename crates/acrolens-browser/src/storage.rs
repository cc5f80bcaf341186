//! Host configuration storage.
//!
//! Reads `HostConfig` from `chrome.storage.local` when running as an
//! extension, otherwise from the page's `localStorage` through
//! `gloo-storage`. Malformed fields fall back to defaults.

use acrolens_core::{ConfigError, HostConfig};
use gloo_storage::{LocalStorage, Storage};
use js_sys::{Array, Function, Promise, Reflect};
use serde_json::{Map, Value};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;

use crate::js::{error_message, global_path, method};

/// Storage key holding the configuration object.
pub const CONFIG_KEY: &str = "acrolens";

/// Key the API key was stored under before the configuration object existed.
pub const LEGACY_API_KEY: &str = "open-router-api-key";

fn storage_error(message: impl Into<String>) -> ConfigError {
    ConfigError::Storage(message.into())
}

/// Combine the stored configuration object with the legacy API key entry.
pub fn merge_stored(config: Option<Value>, legacy_api_key: Option<Value>) -> Value {
    let mut merged = match config {
        Some(Value::Object(map)) => map,
        Some(Value::Null) | None => Map::new(),
        Some(other) => return other,
    };
    if !merged.contains_key("apiKey") {
        if let Some(Value::String(key)) = legacy_api_key {
            if !key.trim().is_empty() {
                merged.insert("apiKey".into(), Value::String(key));
            }
        }
    }
    Value::Object(merged)
}

fn extension_area() -> Option<JsValue> {
    global_path("chrome.storage.local")
}

async fn load_extension(area: JsValue) -> Result<Value, ConfigError> {
    let get = method(&area, "get").ok_or_else(|| storage_error("storage area has no get()"))?;
    let keys = Array::of2(&JsValue::from_str(CONFIG_KEY), &JsValue::from_str(LEGACY_API_KEY));
    let promise = get
        .call1(&area, &keys)
        .map_err(|e| storage_error(error_message(&e)))?
        .dyn_into::<Promise>()
        .map_err(|_| storage_error("storage get() did not return a promise"))?;
    let items = JsFuture::from(promise)
        .await
        .map_err(|e| storage_error(error_message(&e)))?;
    let field = |key: &str| -> Option<Value> {
        let value = Reflect::get(&items, &JsValue::from_str(key)).ok()?;
        if value.is_undefined() {
            return None;
        }
        serde_wasm_bindgen::from_value(value).ok()
    };
    Ok(merge_stored(field(CONFIG_KEY), field(LEGACY_API_KEY)))
}

fn load_local() -> Result<Value, ConfigError> {
    let config = match LocalStorage::get::<Value>(CONFIG_KEY) {
        Ok(value) => Some(value),
        Err(gloo_storage::errors::StorageError::KeyNotFound(_)) => None,
        Err(e) => return Err(storage_error(e.to_string())),
    };
    let legacy = LocalStorage::raw()
        .get_item(LEGACY_API_KEY)
        .ok()
        .flatten()
        .map(Value::String);
    Ok(merge_stored(config, legacy))
}

/// Load the configuration from whichever store the page has.
pub async fn load_config() -> Result<HostConfig, ConfigError> {
    let stored = match extension_area() {
        Some(area) => load_extension(area).await?,
        None => load_local()?,
    };
    Ok(HostConfig::from_value_lenient(&stored))
}

/// Decode a configuration handed over as a JS object.
pub fn config_from_js(value: JsValue) -> Result<HostConfig, ConfigError> {
    let value: Value = serde_wasm_bindgen::from_value(value)
        .map_err(|e| storage_error(format!("configuration is not JSON: {e}")))?;
    Ok(HostConfig::from_value_lenient(&value))
}

/// Listener on `chrome.storage.onChanged`. Removed when dropped.
pub struct ConfigWatch {
    event: JsValue,
    callback: Closure<dyn FnMut(JsValue, JsValue)>,
}

impl ConfigWatch {
    /// Call `on_change` whenever a stored configuration key changes.
    ///
    /// `None` outside an extension, where nothing can change under us.
    pub fn install(on_change: impl Fn() + 'static) -> Option<Self> {
        let event = global_path("chrome.storage.onChanged")?;
        let add = method(&event, "addListener")?;
        let callback = Closure::<dyn FnMut(JsValue, JsValue)>::new(
            move |changes: JsValue, area: JsValue| {
                if area.as_string().as_deref() != Some("local") {
                    return;
                }
                let touched = [CONFIG_KEY, LEGACY_API_KEY].iter().any(|key| {
                    Reflect::has(&changes, &JsValue::from_str(key)).unwrap_or(false)
                });
                if touched {
                    tracing::debug!("stored configuration changed");
                    on_change();
                }
            },
        );
        if let Err(e) = add.call1(&event, callback.as_ref().unchecked_ref::<Function>()) {
            tracing::warn!(error = %error_message(&e), "could not watch configuration");
            return None;
        }
        Some(Self { event, callback })
    }
}

impl Drop for ConfigWatch {
    fn drop(&mut self) {
        if let Some(remove) = method(&self.event, "removeListener") {
            let _ = remove.call1(&self.event, self.callback.as_ref().unchecked_ref::<Function>());
        }
    }
}
