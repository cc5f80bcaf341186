//! `HostRelay` over `chrome.runtime.sendMessage`.

use std::future::Future;

use acrolens_core::relay::decode_title;
use acrolens_core::{HostRelay, LookupError, RelayMessage};
use js_sys::Promise;
use serde::Serialize;
use serde_json::Value;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;

use crate::js::{error_message, global_path, method};

fn relay_error(message: impl Into<String>) -> LookupError {
    let message: String = message.into();
    LookupError::Relay(message.into())
}

#[derive(Clone, Default)]
pub struct RuntimeRelay;

impl RuntimeRelay {
    pub fn new() -> Self {
        Self
    }

    fn send(&self, message: &RelayMessage) -> Result<Promise, LookupError> {
        let runtime = global_path("chrome.runtime")
            .ok_or_else(|| relay_error("extension runtime is unavailable"))?;
        let send = method(&runtime, "sendMessage")
            .ok_or_else(|| relay_error("runtime has no sendMessage()"))?;
        let serializer = serde_wasm_bindgen::Serializer::json_compatible();
        let payload = message
            .serialize(&serializer)
            .map_err(|e| relay_error(e.to_string()))?;
        let returned = send
            .call1(&runtime, &payload)
            .map_err(|e| relay_error(error_message(&e)))?;
        returned
            .dyn_into::<Promise>()
            .map_err(|_| relay_error("sendMessage did not return a promise"))
    }

    /// Send `message` and decode the background's answer.
    pub async fn call(&self, message: RelayMessage) -> Result<Value, LookupError> {
        tracing::trace!(rpc = %message.rpc_id, "relaying");
        let promise = self.send(&message)?;
        let response = JsFuture::from(promise)
            .await
            .map_err(|e| relay_error(error_message(&e)))?;
        if response.is_undefined() || response.is_null() {
            return Ok(Value::Null);
        }
        serde_wasm_bindgen::from_value(response).map_err(|e| relay_error(e.to_string()))
    }
}

impl HostRelay for RuntimeRelay {
    fn current_page_title(&self) -> impl Future<Output = Result<Option<String>, LookupError>> {
        let this = self.clone();
        async move {
            let response = this.call(RelayMessage::current_tab_title()).await?;
            Ok(decode_title(&response))
        }
    }

    fn open_tab(&self, url: &str) -> impl Future<Output = Result<(), LookupError>> {
        let this = self.clone();
        let message = RelayMessage::create_tab(url);
        async move {
            this.call(message).await?;
            Ok(())
        }
    }
}

/// Whether the page runs inside an extension content script.
pub fn has_runtime() -> bool {
    global_path("chrome.runtime.id").is_some()
}

