//! Small helpers for talking to loosely typed JS globals.

use js_sys::{Function, Reflect};
use wasm_bindgen::{JsCast, JsValue};

/// Readable message for a thrown JS value.
pub fn error_message(value: &JsValue) -> String {
    if let Some(error) = value.dyn_ref::<js_sys::Error>() {
        return String::from(error.message());
    }
    value.as_string().unwrap_or_else(|| format!("{value:?}"))
}

/// Walk a dotted property path from `globalThis`, e.g. `chrome.runtime`.
///
/// `None` if any step is missing, `null` or `undefined`.
pub fn global_path(path: &str) -> Option<JsValue> {
    let mut current: JsValue = js_sys::global().into();
    for key in path.split('.') {
        current = Reflect::get(&current, &JsValue::from_str(key)).ok()?;
        if current.is_undefined() || current.is_null() {
            return None;
        }
    }
    Some(current)
}

/// The method `name` of `target`, if it is callable.
pub fn method(target: &JsValue, name: &str) -> Option<Function> {
    Reflect::get(target, &JsValue::from_str(name))
        .ok()?
        .dyn_into::<Function>()
        .ok()
}
