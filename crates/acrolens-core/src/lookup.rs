//! Lookup pipelines behind the overlay panels.
//!
//! Each pipeline reports progress through a callback that returns whether
//! anyone is still listening. A `false` stops the pipeline at once and drops
//! the model stream, which abandons the request.

use n0_future::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::LookupError;
use crate::model::{LanguageModel, ModelBackend, ModelSession};
use crate::prompts::{self, LookupInput};
use crate::relay::HostRelay;

/// Source an overlay is focused on.
///
/// The two model variants also decide which provider answers the
/// explanation; selecting the encyclopedia keeps the last model choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LookupBackend {
    OnDeviceModel,
    HostedModel,
    Encyclopedia,
}

impl LookupBackend {
    pub fn is_model(self) -> bool {
        !matches!(self, LookupBackend::Encyclopedia)
    }
}

/// Lifecycle of one panel's content.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "kebab-case")]
pub enum PanelState<T> {
    #[default]
    Idle,
    Loading,
    /// Partial output so far.
    Streaming(String),
    Ready(T),
    Failed(String),
    /// The chosen backend needs a credential that is not configured.
    NeedsCredential,
}

impl<T> PanelState<T> {
    pub fn is_busy(&self) -> bool {
        matches!(self, PanelState::Loading | PanelState::Streaming(_))
    }

    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            PanelState::Ready(_) | PanelState::Failed(_) | PanelState::NeedsCredential
        )
    }
}

/// Title of the current tab, or `None` when the host cannot tell.
pub async fn page_title<R: HostRelay>(relay: &R) -> Option<String> {
    match relay.current_page_title().await {
        Ok(title) => title,
        Err(e) => {
            debug!(error = %e, "page title unavailable");
            None
        }
    }
}

/// Stream an explanation of `input` into `on_update`.
///
/// Every update carries the cumulative text. The final state is `Ready` with
/// the last text, or `Failed` with the generic failure message.
pub async fn stream_explanation<M, R>(
    model: &M,
    relay: &R,
    backend: &ModelBackend,
    input: &LookupInput,
    mut on_update: impl FnMut(PanelState<String>) -> bool,
) where
    M: LanguageModel,
    R: HostRelay,
{
    if !on_update(PanelState::Loading) {
        return;
    }
    let title = page_title(relay).await;
    let prompt = prompts::explanation_prompt(input, title.as_deref());

    let session = match model.create_session(backend, prompts::explanation_options()).await {
        Ok(session) => session,
        Err(e) => {
            warn!(error = %e, "could not start explanation session");
            on_update(PanelState::Failed(prompts::LOOKUP_FAILED_MESSAGE.to_string()));
            return;
        }
    };

    let mut stream = session.prompt_streaming(&prompt);
    let mut latest = String::new();
    let mut failed = false;
    let mut abandoned = false;
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(text) => {
                if !on_update(PanelState::Streaming(text.clone())) {
                    abandoned = true;
                    break;
                }
                latest = text;
            }
            Err(e) => {
                warn!(error = %e, "explanation stream failed");
                failed = true;
                break;
            }
        }
    }
    drop(stream);
    session.destroy();

    if abandoned {
        trace!(acronym = %input.acronym, "explanation abandoned");
    } else if failed {
        on_update(PanelState::Failed(prompts::LOOKUP_FAILED_MESSAGE.to_string()));
    } else {
        on_update(PanelState::Ready(latest));
    }
}

/// Ask the model for the expanded phrase of `input.acronym`.
///
/// Any failure yields `None`; the caller falls back to the acronym itself.
pub async fn find_expansion<M: LanguageModel>(
    model: &M,
    backend: &ModelBackend,
    input: &LookupInput,
) -> Option<String> {
    let session = match model.create_session(backend, prompts::expansion_options()).await {
        Ok(session) => session,
        Err(e) => {
            debug!(error = %e, "no session for expansion");
            return None;
        }
    };
    let answer = session.prompt_once(&prompts::expansion_prompt(input)).await;
    session.destroy();
    match answer {
        Ok(answer) => prompts::first_line(&answer).filter(|e| *e != input.acronym),
        Err(e) => {
            debug!(error = %e, "expansion request failed");
            None
        }
    }
}

/// Generate a search query for `input` and return the search URL for it.
pub async fn search_url<M, R>(
    model: &M,
    relay: &R,
    backend: &ModelBackend,
    input: &LookupInput,
) -> Result<String, LookupError>
where
    M: LanguageModel,
    R: HostRelay,
{
    let title = page_title(relay).await;
    let session = model.create_session(backend, prompts::search_options()).await?;
    let answer = session
        .prompt_once(&prompts::search_prompt(input, title.as_deref()))
        .await;
    session.destroy();
    let query = answer?;
    prompts::search_url(&query).ok_or_else(|| LookupError::Model("empty search query".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeModel, FakeRelay};

    fn input() -> LookupInput {
        LookupInput {
            acronym: "CPU".into(),
            context: "The CPU runs hot.".into(),
            page_url: "https://example.com".into(),
        }
    }

    fn run(
        model: &FakeModel,
        relay: &FakeRelay,
        mut keep_going: impl FnMut(&PanelState<String>) -> bool,
    ) -> Vec<PanelState<String>> {
        let mut updates = Vec::new();
        futures::executor::block_on(stream_explanation(
            model,
            relay,
            &ModelBackend::OnDevice,
            &input(),
            |state| {
                let alive = keep_going(&state);
                updates.push(state);
                alive
            },
        ));
        updates
    }

    #[test]
    fn test_explanation_streams_cumulative_text() {
        let model = FakeModel::default();
        model.push_stream(vec![Ok("Central".into()), Ok("Central processing unit".into())]);
        let relay = FakeRelay::with_title("Hardware");

        let updates = run(&model, &relay, |_| true);
        assert_eq!(
            updates,
            [
                PanelState::Loading,
                PanelState::Streaming("Central".into()),
                PanelState::Streaming("Central processing unit".into()),
                PanelState::Ready("Central processing unit".into()),
            ]
        );
        let prompts = model.prompts();
        assert!(prompts[0].ends_with("\"Hardware\""));
        assert_eq!(model.destroyed(), 1);
    }

    #[test]
    fn test_explanation_failure_message() {
        let model = FakeModel::default();
        model.push_stream(vec![Ok("Cent".into()), Err(LookupError::Model("boom".into()))]);
        let updates = run(&model, &FakeRelay::default(), |_| true);
        assert_eq!(
            updates.last(),
            Some(&PanelState::Failed(prompts::LOOKUP_FAILED_MESSAGE.into()))
        );

        let broken = FakeModel::default();
        broken.fail_sessions();
        let updates = run(&broken, &FakeRelay::default(), |_| true);
        assert_eq!(
            updates,
            [
                PanelState::Loading,
                PanelState::Failed(prompts::LOOKUP_FAILED_MESSAGE.into())
            ]
        );
    }

    #[test]
    fn test_explanation_stops_when_listener_leaves() {
        let model = FakeModel::default();
        model.push_stream(vec![Ok("a".into()), Ok("ab".into()), Ok("abc".into())]);
        let updates = run(&model, &FakeRelay::default(), |state| {
            !matches!(state, PanelState::Streaming(text) if text == "ab")
        });
        assert_eq!(updates.last(), Some(&PanelState::Streaming("ab".into())));
        assert_eq!(model.destroyed(), 1);
    }

    #[test]
    fn test_find_expansion() {
        let model = FakeModel::default();
        model.push_reply(Ok("Central processing unit\n".into()));
        model.push_reply(Ok("CPU".into()));
        model.push_reply(Err(LookupError::Unavailable("no model".into())));

        let backend = ModelBackend::OnDevice;
        let first = futures::executor::block_on(find_expansion(&model, &backend, &input()));
        assert_eq!(first.as_deref(), Some("Central processing unit"));
        let echoed = futures::executor::block_on(find_expansion(&model, &backend, &input()));
        assert_eq!(echoed, None);
        let failed = futures::executor::block_on(find_expansion(&model, &backend, &input()));
        assert_eq!(failed, None);
    }

    #[test]
    fn test_search_url_from_model() {
        let model = FakeModel::default();
        model.push_reply(Ok("CPU meaning in hardware".into()));
        let url = futures::executor::block_on(search_url(
            &model,
            &FakeRelay::default(),
            &ModelBackend::OnDevice,
            &input(),
        ));
        assert_eq!(
            url.as_deref(),
            Ok("https://www.google.com/search?q=CPU%20meaning%20in%20hardware")
        );

        model.push_reply(Ok("   ".into()));
        let empty = futures::executor::block_on(search_url(
            &model,
            &FakeRelay::default(),
            &ModelBackend::OnDevice,
            &input(),
        ));
        assert!(matches!(empty, Err(LookupError::Model(_))));
    }

    #[test]
    fn test_panel_state_serializes() {
        let state: PanelState<String> = PanelState::Streaming("Cent".into());
        assert_eq!(
            serde_json::to_value(&state).unwrap(),
            serde_json::json!({ "state": "streaming", "value": "Cent" })
        );
        assert_eq!(
            serde_json::to_value(PanelState::<String>::NeedsCredential).unwrap(),
            serde_json::json!({ "state": "needs-credential" })
        );
    }
}
