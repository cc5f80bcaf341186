//! Shadow-DOM overlay surfaces.
//!
//! Each overlay lives in an open shadow root on a host element appended to
//! its container, so page styles neither leak in nor get disturbed. The host
//! is engine markup and is skipped by scans and the mutation watcher.

use std::future::Future;

use acrolens_core::tree::{MARKUP_ATTR, ROLE_OVERLAY};
use acrolens_core::{
    OverlayEvents, OverlayHost, OverlayId, OverlaySurface, OverlayView, Placement, SurfaceError,
};
use gloo_events::EventListener;
use gloo_timers::future::TimeoutFuture;
use wasm_bindgen::JsCast;
use web_sys::{Document, Element, HtmlElement, Node, ShadowRootInit, ShadowRootMode};

use crate::js::error_message;
use crate::markup::{self, ACTION_ATTR, BACKEND_ATTR, EXIT_TRANSITION_MS, STYLES};

fn platform_error(e: wasm_bindgen::JsValue) -> SurfaceError {
    SurfaceError::Platform(error_message(&e).into())
}

fn anchor_name(id: OverlayId) -> String {
    format!("--acrolens-{}", id.to_attr())
}

/// Inline style of the host element for `placement`.
pub fn host_style(id: OverlayId, placement: Placement) -> String {
    match placement {
        Placement::Anchored => format!(
            "position: fixed; position-anchor: {}; top: anchor(bottom); left: anchor(left); \
             margin-top: 4px; z-index: 2147483647;",
            anchor_name(id)
        ),
        Placement::Fallback => {
            "position: absolute; top: 100%; left: 0; margin-top: 4px; z-index: 2147483647;"
                .to_string()
        }
    }
}

#[derive(Clone)]
pub struct ShadowOverlayHost {
    document: Document,
    anchor_positioning: bool,
}

impl ShadowOverlayHost {
    pub fn new(document: Document) -> Self {
        let anchor_positioning =
            web_sys::css::supports_with_value("anchor-name", "--acrolens")
                .unwrap_or(false);
        tracing::debug!(anchor_positioning, "overlay host ready");
        Self {
            document,
            anchor_positioning,
        }
    }
}

impl OverlayHost<Node> for ShadowOverlayHost {
    type Surface = ShadowSurface;

    fn supports_anchor_positioning(&self) -> bool {
        self.anchor_positioning
    }

    fn mount(
        &self,
        container: &Node,
        id: OverlayId,
        placement: Placement,
        events: OverlayEvents,
    ) -> Result<ShadowSurface, SurfaceError> {
        if !container.is_connected() {
            return Err(SurfaceError::Detached);
        }
        let container = container
            .dyn_ref::<HtmlElement>()
            .ok_or_else(|| SurfaceError::Platform("container is not an HTML element".into()))?;

        let host = self.document.create_element("div").map_err(platform_error)?;
        host.set_attribute(MARKUP_ATTR, ROLE_OVERLAY)
            .map_err(platform_error)?;
        host.set_attribute("style", &host_style(id, placement))
            .map_err(platform_error)?;

        let shadow = host
            .attach_shadow(&ShadowRootInit::new(ShadowRootMode::Open))
            .map_err(platform_error)?;
        let style = self.document.create_element("style").map_err(platform_error)?;
        style.set_text_content(Some(STYLES));
        shadow.append_child(&style).map_err(platform_error)?;
        let panel = self.document.create_element("div").map_err(platform_error)?;
        shadow.append_child(&panel).map_err(platform_error)?;

        let listener = EventListener::new(&shadow, "click", move |event| {
            let Some(target) = event.target().and_then(|t| t.dyn_into::<Element>().ok()) else {
                return;
            };
            let Ok(Some(button)) = target.closest(&format!("[{ACTION_ATTR}]")) else {
                return;
            };
            let action = button.get_attribute(ACTION_ATTR).unwrap_or_default();
            let backend = button.get_attribute(BACKEND_ATTR);
            match markup::parse_action(&action, backend.as_deref()) {
                Some(overlay_event) => {
                    event.stop_propagation();
                    events(overlay_event);
                }
                None => tracing::trace!(action, "unknown overlay action"),
            }
        });

        if placement == Placement::Anchored {
            container
                .style()
                .set_property("anchor-name", &anchor_name(id))
                .map_err(platform_error)?;
        }
        container.append_child(&host).map_err(platform_error)?;

        Ok(ShadowSurface {
            id,
            container: container.clone(),
            host,
            panel,
            _listener: listener,
        })
    }
}

pub struct ShadowSurface {
    id: OverlayId,
    container: HtmlElement,
    host: Element,
    panel: Element,
    _listener: EventListener,
}

impl OverlaySurface for ShadowSurface {
    fn render(&self, view: &OverlayView) {
        self.panel.set_inner_html(&markup::render(view));
    }

    fn exit_transition(&self) -> impl Future<Output = ()> {
        TimeoutFuture::new(EXIT_TRANSITION_MS)
    }

    fn detach(&self) {
        self.host.remove();
        let style = self.container.style();
        let name = anchor_name(self.id);
        if style.get_property_value("anchor-name").ok().as_deref() == Some(name.as_str()) {
            let _ = style.remove_property("anchor-name");
        }
    }
}
