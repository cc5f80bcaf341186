//! Overlay markup.
//!
//! The surface is redrawn from an `OverlayView` on every change; interaction
//! is read back from `data-action` attributes by the surface's single click
//! listener.

use std::fmt::Write;

use acrolens_core::{
    Expansion, LookupBackend, OverlayEvent, OverlayPhase, OverlayView, PageSection, PanelState,
};
use pulldown_cmark_escape::escape_html;

pub const ACTION_ATTR: &str = "data-action";
pub const BACKEND_ATTR: &str = "data-backend";

/// Shown while a hosted model is picked without a credential.
pub const CREDENTIAL_MESSAGE: &str =
    "Enter an OpenRouter API key in the extension options to use hosted models.";

/// Milliseconds the closing animation runs; keep in step with `STYLES`.
pub const EXIT_TRANSITION_MS: u32 = 150;

pub const STYLES: &str = r#"
:host { all: initial; }
.panel {
  box-sizing: border-box;
  min-width: 16rem;
  max-width: 28rem;
  max-height: 24rem;
  overflow: auto;
  padding: 0.5rem 0.75rem;
  border-radius: 0.5rem;
  background: Canvas;
  color: CanvasText;
  font: 14px/1.4 system-ui, sans-serif;
  box-shadow: 0 4px 16px rgb(0 0 0 / 0.2);
  animation: enter 150ms ease-out;
}
.panel[data-phase="closing"] { animation: exit 150ms ease-in forwards; }
header { display: flex; align-items: center; gap: 0.5rem; }
.acronym { font-weight: 600; flex: 1; }
button { font: inherit; cursor: pointer; }
.tabs { display: flex; gap: 0.25rem; margin: 0.5rem 0; }
.tabs button[aria-selected="true"] { font-weight: 600; }
.status, .phrase { opacity: 0.7; }
.error { color: #b00020; }
.cursor { font-size: 0.6em; margin-left: 0.25em; }
section section { margin-left: 0.75rem; }
@keyframes enter { from { opacity: 0; transform: translateY(-4px); } }
@keyframes exit { to { opacity: 0; transform: translateY(-4px); } }
"#;

fn backend_key(backend: LookupBackend) -> &'static str {
    match backend {
        LookupBackend::OnDeviceModel => "on-device-model",
        LookupBackend::HostedModel => "hosted-model",
        LookupBackend::Encyclopedia => "encyclopedia",
    }
}

fn backend_label(backend: LookupBackend) -> &'static str {
    match backend {
        LookupBackend::OnDeviceModel => "On-device",
        LookupBackend::HostedModel => "Hosted",
        LookupBackend::Encyclopedia => "Wikipedia",
    }
}

/// Map a clicked `data-action` back to the event it stands for.
pub fn parse_action(action: &str, backend: Option<&str>) -> Option<OverlayEvent> {
    match action {
        "close" => Some(OverlayEvent::Close),
        "expand" => Some(OverlayEvent::Expand),
        "search" => Some(OverlayEvent::SearchWeb),
        "select" => {
            let backend = match backend? {
                "on-device-model" => LookupBackend::OnDeviceModel,
                "hosted-model" => LookupBackend::HostedModel,
                "encyclopedia" => LookupBackend::Encyclopedia,
                _ => return None,
            };
            Some(OverlayEvent::SelectBackend(backend))
        }
        _ => None,
    }
}

/// Inner HTML of the panel for `view`.
pub fn render(view: &OverlayView) -> String {
    let mut out = String::new();
    let phase = match view.phase {
        OverlayPhase::Visible => "visible",
        OverlayPhase::Closing | OverlayPhase::Removed => "closing",
    };
    let _ = write!(out, r#"<div class="panel" data-phase="{phase}">"#);
    out.push_str(r#"<header><span class="acronym">"#);
    let _ = escape_html(&mut out, &view.acronym);
    out.push_str("</span>");
    if view.expansion == Expansion::Collapsed {
        out.push_str(r#"<button data-action="expand">Explain</button>"#);
    }
    out.push_str(r#"<button data-action="close" aria-label="Close">&times;</button></header>"#);

    if view.expansion == Expansion::Expanded {
        out.push_str(r#"<nav class="tabs">"#);
        for backend in [
            LookupBackend::OnDeviceModel,
            LookupBackend::HostedModel,
            LookupBackend::Encyclopedia,
        ] {
            let _ = write!(
                out,
                r#"<button data-action="select" data-backend="{}" aria-selected="{}">{}</button>"#,
                backend_key(backend),
                backend == view.selected,
                backend_label(backend),
            );
        }
        out.push_str("</nav>");

        out.push_str(r#"<div class="body">"#);
        if view.selected.is_model() {
            explanation(&view.explanation, &mut out);
        } else {
            encyclopedia(view, &mut out);
        }
        out.push_str("</div>");

        let disabled = if view.searching { " disabled" } else { "" };
        let _ = write!(
            out,
            r#"<footer><button data-action="search"{disabled}>Search the web</button></footer>"#
        );
    }
    out.push_str("</div>");
    out
}

fn explanation(state: &PanelState<String>, out: &mut String) {
    match state {
        PanelState::Idle => {}
        PanelState::Loading => out.push_str(r#"<p class="status">Thinking&hellip;</p>"#),
        PanelState::Streaming(text) => {
            out.push_str(r#"<p class="answer">"#);
            let _ = escape_html(&mut *out, text);
            out.push_str(r#"<span class="cursor">&#11044;</span></p>"#);
        }
        PanelState::Ready(text) => {
            out.push_str(r#"<p class="answer">"#);
            let _ = escape_html(&mut *out, text);
            out.push_str("</p>");
        }
        PanelState::Failed(message) => {
            out.push_str(r#"<p class="error">"#);
            let _ = escape_html(&mut *out, message);
            out.push_str("</p>");
        }
        PanelState::NeedsCredential => {
            let _ = write!(out, r#"<p class="error">{CREDENTIAL_MESSAGE}</p>"#);
        }
    }
}

fn encyclopedia(view: &OverlayView, out: &mut String) {
    if let Some(phrase) = &view.expanded_phrase {
        out.push_str(r#"<p class="phrase">"#);
        let _ = escape_html(&mut *out, phrase);
        out.push_str("</p>");
    }
    match &view.encyclopedia {
        PanelState::Idle => {}
        PanelState::Loading | PanelState::Streaming(_) => {
            out.push_str(r#"<p class="status">Searching Wikipedia&hellip;</p>"#)
        }
        PanelState::Ready(page) => sections(&page.sections(), out),
        PanelState::Failed(message) => {
            out.push_str(r#"<p class="error">"#);
            let _ = escape_html(&mut *out, message);
            out.push_str("</p>");
        }
        PanelState::NeedsCredential => {
            let _ = write!(out, r#"<p class="error">{CREDENTIAL_MESSAGE}</p>"#);
        }
    }
}

fn sections(list: &[PageSection], out: &mut String) {
    for section in list {
        out.push_str("<section><h4>");
        let _ = escape_html(&mut *out, &section.title);
        out.push_str("</h4>");
        if !section.content.is_empty() {
            out.push_str("<p>");
            let _ = escape_html(&mut *out, &section.content);
            out.push_str("</p>");
        }
        sections(&section.items, out);
        out.push_str("</section>");
    }
}
