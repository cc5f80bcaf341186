//! Hosted chat-completions model.
//!
//! Speaks the OpenAI-compatible `/chat/completions` API that OpenRouter
//! serves. A session keeps its conversation, seeded with the system prompt
//! and few-shot examples, and appends every exchange to it.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::rc::Rc;

use acrolens_core::{
    ChatMessage, LanguageModel, LookupError, ModelBackend, ModelSession, SessionOptions, TextStream,
};
use bytes::Bytes;
use futures::stream::{self, LocalBoxStream};
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tracing::{debug, trace, warn};

use crate::error::{NetError, check_status};
use crate::sse::{DONE, SseDecoder};

pub const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1";

const SERVICE: &str = "openrouter";

/// Factory for hosted sessions. Refuses the on-device backend.
#[derive(Clone)]
pub struct ChatCompletionsModel {
    client: reqwest::Client,
    base_url: SmolStr,
}

impl Default for ChatCompletionsModel {
    fn default() -> Self {
        Self::new(OPENROUTER_API_URL)
    }
}

impl ChatCompletionsModel {
    pub fn new(base_url: impl Into<SmolStr>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

impl LanguageModel for ChatCompletionsModel {
    type Session = ChatSession;

    fn create_session(
        &self,
        backend: &ModelBackend,
        options: SessionOptions,
    ) -> impl Future<Output = Result<ChatSession, LookupError>> {
        let session = match backend {
            ModelBackend::Hosted { model, api_key } => Ok(ChatSession {
                client: self.client.clone(),
                endpoint: format!("{}/chat/completions", self.base_url.trim_end_matches('/')),
                model: model.clone(),
                api_key: api_key.clone(),
                temperature: options.temperature,
                top_k: options.top_k,
                history: Rc::new(RefCell::new(options.seed_messages())),
            }),
            ModelBackend::OnDevice => Err(LookupError::Unavailable(
                "the on-device model is not served over HTTP".into(),
            )),
        };
        async move { session }
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct Completion {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// One `data:` payload of a streamed completion.
#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
    message: String,
}

/// A conversation with one hosted model.
pub struct ChatSession {
    client: reqwest::Client,
    endpoint: String,
    model: SmolStr,
    api_key: String,
    temperature: Option<f32>,
    top_k: Option<u32>,
    history: Rc<RefCell<Vec<ChatMessage>>>,
}

impl ChatSession {
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Messages exchanged so far, seed included.
    pub fn history(&self) -> Vec<ChatMessage> {
        self.history.borrow().clone()
    }

    /// Append the user turn and build the request for the whole conversation.
    fn request(&self, input: &str, stream: bool) -> reqwest::RequestBuilder {
        let mut history = self.history.borrow_mut();
        history.push(ChatMessage::user(input));
        let body = CompletionRequest {
            model: &self.model,
            messages: &history,
            temperature: self.temperature,
            top_k: self.top_k,
            stream,
        };
        trace!(model = %self.model, messages = history.len(), stream, "chat completion request");
        self.client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("X-Title", "acrolens")
            .json(&body)
    }
}

impl ModelSession for ChatSession {
    fn prompt_once(&self, input: &str) -> impl Future<Output = Result<String, LookupError>> {
        let request = self.request(input, false);
        let history = Rc::clone(&self.history);
        async move {
            let answer = complete(request).await.map_err(NetError::into_model_error)?;
            history.borrow_mut().push(ChatMessage::assistant(answer.clone()));
            Ok(answer)
        }
    }

    fn prompt_streaming(&self, input: &str) -> TextStream {
        let request = self.request(input, true);
        let history = Rc::clone(&self.history);
        let opened = async move {
            let response = request.send().await?;
            let response = check_status(SERVICE, response).await?;
            debug!("completion stream opened");
            Ok::<_, NetError>(response.bytes_stream().map_err(NetError::from).boxed_local())
        };
        stream::once(opened)
            .map(move |opened| match opened {
                Ok(body) => ChunkReader::new(body, Rc::clone(&history)).into_stream(),
                Err(e) => stream::iter([Err(e.into_model_error())]).boxed_local(),
            })
            .flatten()
            .boxed_local()
    }

    fn destroy(&self) {
        self.history.borrow_mut().clear();
    }
}

async fn complete(request: reqwest::RequestBuilder) -> Result<String, NetError> {
    let response = check_status(SERVICE, request.send().await?).await?;
    let completion: Completion = serde_json::from_slice(&response.bytes().await?)?;
    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or(NetError::EmptyCompletion)?;
    Ok(choice.message.content.unwrap_or_default())
}

/// Turns a streamed completion body into cumulative text.
struct ChunkReader {
    body: LocalBoxStream<'static, Result<Bytes, NetError>>,
    decoder: SseDecoder,
    text: String,
    ready: VecDeque<Result<String, LookupError>>,
    history: Rc<RefCell<Vec<ChatMessage>>>,
    finished: bool,
}

impl ChunkReader {
    fn new(
        body: LocalBoxStream<'static, Result<Bytes, NetError>>,
        history: Rc<RefCell<Vec<ChatMessage>>>,
    ) -> Self {
        Self {
            body,
            decoder: SseDecoder::new(),
            text: String::new(),
            ready: VecDeque::new(),
            history,
            finished: false,
        }
    }

    fn into_stream(self) -> TextStream {
        stream::unfold(self, |mut reader| async move {
            loop {
                if let Some(item) = reader.ready.pop_front() {
                    return Some((item, reader));
                }
                if reader.finished {
                    return None;
                }
                match reader.body.next().await {
                    Some(Ok(bytes)) => {
                        for data in reader.decoder.push(&bytes) {
                            reader.event(&data);
                        }
                    }
                    Some(Err(e)) => reader.fail(e),
                    None => {
                        if let Some(data) = reader.decoder.finish() {
                            reader.event(&data);
                        }
                        reader.complete();
                    }
                }
            }
        })
        .boxed_local()
    }

    fn event(&mut self, data: &str) {
        if self.finished {
            return;
        }
        if data.trim() == DONE {
            self.complete();
            return;
        }
        let chunk: CompletionChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(error = %e, "skipping malformed completion chunk");
                return;
            }
        };
        if let Some(error) = chunk.error {
            self.fail(NetError::remote(SERVICE, error.message));
            return;
        }
        let delta = chunk
            .choices
            .into_iter()
            .filter_map(|choice| choice.delta.content)
            .collect::<String>();
        if !delta.is_empty() {
            self.text.push_str(&delta);
            self.ready.push_back(Ok(self.text.clone()));
        }
    }

    fn fail(&mut self, error: NetError) {
        self.finished = true;
        self.ready.push_back(Err(error.into_model_error()));
    }

    /// Record the full answer in the conversation once.
    fn complete(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if !self.text.is_empty() {
            self.history
                .borrow_mut()
                .push(ChatMessage::assistant(self.text.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acrolens_core::Role;
    use futures::executor::block_on;
    use serde_json::json;

    fn reader(chunks: &[&'static str]) -> (TextStream, Rc<RefCell<Vec<ChatMessage>>>) {
        let body = stream::iter(
            chunks
                .iter()
                .copied()
                .map(|c| Ok(Bytes::from_static(c.as_bytes())))
                .collect::<Vec<_>>(),
        )
        .boxed_local();
        let history = Rc::new(RefCell::new(vec![ChatMessage::user("REST?")]));
        (ChunkReader::new(body, Rc::clone(&history)).into_stream(), history)
    }

    #[test]
    fn test_stream_is_cumulative() {
        let (stream, history) = reader(&[
            ": OPENROUTER PROCESSING\n\n",
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"Repre\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"con",
            "tent\":\"sentational\"}}]}\n\n",
            "data: [DONE]\n\n",
        ]);
        let items: Vec<_> = block_on(stream.collect());
        assert_eq!(
            items,
            [Ok("Repre".to_string()), Ok("Representational".to_string())]
        );
        let history = history.borrow();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].content, "Representational");
    }

    #[test]
    fn test_stream_without_done_still_completes() {
        let (stream, history) = reader(&["data: {\"choices\":[{\"delta\":{\"content\":\"OK\"}}]}"]);
        let items: Vec<_> = block_on(stream.collect());
        assert_eq!(items, [Ok("OK".to_string())]);
        assert_eq!(history.borrow().len(), 2);
    }

    #[test]
    fn test_midstream_error_ends_stream() {
        let (stream, history) = reader(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Par\"}}]}\n\n",
            "data: {\"error\":{\"message\":\"upstream timeout\",\"code\":502}}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"tial\"}}]}\n\n",
        ]);
        let items: Vec<_> = block_on(stream.collect());
        assert_eq!(
            items,
            [
                Ok("Par".to_string()),
                Err(LookupError::Model("openrouter error: upstream timeout".into()))
            ]
        );
        assert_eq!(history.borrow().len(), 1);
    }

    #[test]
    fn test_malformed_chunk_skipped() {
        let (stream, _) = reader(&[
            "data: not json\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"A\"}}]}\n\n",
        ]);
        let items: Vec<_> = block_on(stream.collect());
        assert_eq!(items, [Ok("A".to_string())]);
    }

    #[test]
    fn test_request_body_shape() {
        let messages = [ChatMessage::system("be brief"), ChatMessage::user("REST?")];
        let body = CompletionRequest {
            model: "openai/gpt-4o-mini",
            messages: &messages,
            temperature: Some(0.0),
            top_k: None,
            stream: false,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "model": "openai/gpt-4o-mini",
                "messages": [
                    { "role": "system", "content": "be brief" },
                    { "role": "user", "content": "REST?" }
                ],
                "temperature": 0.0
            })
        );
    }

    #[test]
    fn test_completion_decode() {
        let completion: Completion = serde_json::from_value(json!({
            "id": "gen-1",
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": "Hi" } }]
        }))
        .unwrap();
        assert_eq!(completion.choices[0].message.content.as_deref(), Some("Hi"));
    }

    #[test]
    fn test_sessions_seed_and_refuse_on_device() {
        let model = ChatCompletionsModel::new("https://example.invalid/api/v1/");
        let options = SessionOptions {
            system_prompt: Some("be brief".into()),
            initial_prompts: vec![ChatMessage::user("Q"), ChatMessage::assistant("A")],
            ..Default::default()
        };
        let session = block_on(model.create_session(
            &ModelBackend::Hosted {
                model: "x/y".into(),
                api_key: "k".into(),
            },
            options.clone(),
        ))
        .unwrap();
        assert_eq!(session.model(), "x/y");
        assert_eq!(session.endpoint, "https://example.invalid/api/v1/chat/completions");
        assert_eq!(session.history().len(), 3);
        session.destroy();
        assert!(session.history().is_empty());

        let refused = block_on(model.create_session(&ModelBackend::OnDevice, options));
        assert!(matches!(refused, Err(LookupError::Unavailable(_))));
    }
}
