//! On-device model through the browser's Prompt API.
//!
//! The global is `LanguageModel` in current Chrome and `ai.languageModel` in
//! older builds; both expose `create(options)` returning a session with
//! `prompt`, `promptStreaming` and `destroy`.

use std::future::Future;

use acrolens_common::{ChatCompletionsModel, ChatSession};
use acrolens_core::{
    LanguageModel, LookupError, ModelBackend, ModelSession, SessionOptions, TextStream,
};
use futures::StreamExt;
use futures::stream;
use js_sys::{Function, Promise, Reflect};
use serde::Serialize;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{ReadableStream, ReadableStreamDefaultReader};

use crate::js::{error_message, global_path, method};

const FACTORY_PATHS: [&str; 2] = ["LanguageModel", "ai.languageModel"];

fn model_error(e: JsValue) -> LookupError {
    LookupError::Model(error_message(&e).into())
}

/// Fold one streamed chunk into the running text.
///
/// Older builds stream the whole answer so far, newer ones only the delta.
/// A chunk that extends the running text is taken as cumulative.
pub fn accumulate(text: &mut String, chunk: &str) {
    if !text.is_empty() && chunk.starts_with(text.as_str()) {
        text.clear();
    }
    text.push_str(chunk);
}

/// Factory bound to the Prompt API global, if the browser has one.
#[derive(Clone)]
pub struct PromptApiModel {
    factory: Option<JsValue>,
}

impl Default for PromptApiModel {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptApiModel {
    pub fn new() -> Self {
        let factory = FACTORY_PATHS.iter().find_map(|path| global_path(path));
        tracing::debug!(available = factory.is_some(), "prompt api probed");
        Self { factory }
    }

    pub fn is_available(&self) -> bool {
        self.factory.is_some()
    }

    fn create(&self, options: &SessionOptions) -> Result<Promise, LookupError> {
        let factory = self.factory.as_ref().ok_or_else(|| {
            LookupError::Unavailable("this browser has no built-in language model".into())
        })?;
        let create = method(factory, "create")
            .ok_or_else(|| LookupError::Unavailable("Prompt API has no create()".into()))?;
        let serializer = serde_wasm_bindgen::Serializer::json_compatible();
        let options = options
            .serialize(&serializer)
            .map_err(|e| LookupError::Model(e.to_string().into()))?;
        let promise = create.call1(factory, &options).map_err(model_error)?;
        Ok(Promise::from(promise))
    }
}

impl LanguageModel for PromptApiModel {
    type Session = PromptSession;

    fn create_session(
        &self,
        backend: &ModelBackend,
        options: SessionOptions,
    ) -> impl Future<Output = Result<PromptSession, LookupError>> {
        let created = match backend {
            ModelBackend::OnDevice => self.create(&options),
            ModelBackend::Hosted { .. } => Err(LookupError::Unavailable(
                "hosted models are not served by the Prompt API".into(),
            )),
        };
        async move {
            let session = JsFuture::from(created?).await.map_err(model_error)?;
            Ok(PromptSession { session })
        }
    }
}

pub struct PromptSession {
    session: JsValue,
}

impl PromptSession {
    fn call(&self, name: &str, input: &str) -> Result<JsValue, LookupError> {
        let function: Function = method(&self.session, name)
            .ok_or_else(|| LookupError::Model(format!("session has no {name}()").into()))?;
        function
            .call1(&self.session, &JsValue::from_str(input))
            .map_err(model_error)
    }
}

impl ModelSession for PromptSession {
    fn prompt_once(&self, input: &str) -> impl Future<Output = Result<String, LookupError>> {
        let called = self.call("prompt", input);
        async move {
            let answer = JsFuture::from(Promise::from(called?))
                .await
                .map_err(model_error)?;
            Ok(answer.as_string().unwrap_or_default())
        }
    }

    fn prompt_streaming(&self, input: &str) -> TextStream {
        let reader = match self.call("promptStreaming", input) {
            Ok(value) => match value.dyn_into::<ReadableStream>() {
                Ok(readable) => ReaderGuard {
                    reader: readable.get_reader().unchecked_into(),
                    done: false,
                },
                Err(_) => {
                    let error = LookupError::Model("promptStreaming did not return a stream".into());
                    return stream::iter([Err(error)]).boxed_local();
                }
            },
            Err(e) => return stream::iter([Err(e)]).boxed_local(),
        };

        stream::unfold(
            (reader, String::new()),
            |(mut guard, mut text)| async move {
                if guard.done {
                    return None;
                }
                match guard.read().await {
                    Ok(Some(chunk)) => {
                        accumulate(&mut text, &chunk);
                        Some((Ok(text.clone()), (guard, text)))
                    }
                    Ok(None) => None,
                    Err(e) => {
                        guard.done = true;
                        Some((Err(e), (guard, text)))
                    }
                }
            },
        )
        .boxed_local()
    }

    fn destroy(&self) {
        if let Some(destroy) = method(&self.session, "destroy") {
            if let Err(e) = destroy.call0(&self.session) {
                tracing::debug!(error = %error_message(&e), "session destroy failed");
            }
        }
    }
}

/// Stream reader that cancels the underlying stream if dropped early.
struct ReaderGuard {
    reader: ReadableStreamDefaultReader,
    done: bool,
}

impl ReaderGuard {
    async fn read(&mut self) -> Result<Option<String>, LookupError> {
        let result = JsFuture::from(self.reader.read()).await.map_err(model_error)?;
        let done = Reflect::get(&result, &JsValue::from_str("done"))
            .map(|d| d.is_truthy())
            .unwrap_or(true);
        if done {
            self.done = true;
            return Ok(None);
        }
        let value = Reflect::get(&result, &JsValue::from_str("value")).map_err(model_error)?;
        Ok(Some(value.as_string().unwrap_or_default()))
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        if !self.done {
            let _ = self.reader.cancel();
        }
    }
}

/// Dispatches sessions to the on-device or hosted provider.
#[derive(Clone, Default)]
pub struct BrowserModel {
    on_device: PromptApiModel,
    hosted: ChatCompletionsModel,
}

impl BrowserModel {
    pub fn new(on_device: PromptApiModel, hosted: ChatCompletionsModel) -> Self {
        Self { on_device, hosted }
    }
}

pub enum BrowserSession {
    OnDevice(PromptSession),
    Hosted(ChatSession),
}

impl LanguageModel for BrowserModel {
    type Session = BrowserSession;

    fn create_session(
        &self,
        backend: &ModelBackend,
        options: SessionOptions,
    ) -> impl Future<Output = Result<BrowserSession, LookupError>> {
        let this = self.clone();
        let backend = backend.clone();
        async move {
            if backend.is_on_device() {
                let session = this.on_device.create_session(&backend, options).await?;
                Ok(BrowserSession::OnDevice(session))
            } else {
                let session = this.hosted.create_session(&backend, options).await?;
                Ok(BrowserSession::Hosted(session))
            }
        }
    }
}

impl ModelSession for BrowserSession {
    fn prompt_once(&self, input: &str) -> impl Future<Output = Result<String, LookupError>> {
        let input = input.to_string();
        async move {
            match self {
                BrowserSession::OnDevice(session) => session.prompt_once(&input).await,
                BrowserSession::Hosted(session) => session.prompt_once(&input).await,
            }
        }
    }

    fn prompt_streaming(&self, input: &str) -> TextStream {
        match self {
            BrowserSession::OnDevice(session) => session.prompt_streaming(input),
            BrowserSession::Hosted(session) => session.prompt_streaming(input),
        }
    }

    fn destroy(&self) {
        match self {
            BrowserSession::OnDevice(session) => session.destroy(),
            BrowserSession::Hosted(session) => session.destroy(),
        }
    }
}
