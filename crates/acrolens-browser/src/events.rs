//! Document-level input delegation.
//!
//! One listener per event type on the document forwards to the content
//! controller. Targets inside overlay shadow roots arrive retargeted to the
//! overlay host, which sits inside its container.

use acrolens_core::types::utf16_to_byte;
use acrolens_core::{ContentController, SelectionRange};
use gloo_events::{EventListener, EventListenerOptions};
use wasm_bindgen::JsCast;
use web_sys::{Document, Node, Selection};

use crate::platform::BrowserPlatform;

/// The current selection as a byte range, if it lies within one text node.
pub fn selection_range(selection: &Selection) -> Option<SelectionRange<Node>> {
    if selection.is_collapsed() || selection.range_count() != 1 {
        return None;
    }
    let range = selection.get_range_at(0).ok()?;
    let start = range.start_container().ok()?;
    let end = range.end_container().ok()?;
    if start != end || start.node_type() != Node::TEXT_NODE {
        return None;
    }
    let text = start.node_value().unwrap_or_default();
    let from = utf16_to_byte(&text, range.start_offset().ok()? as usize);
    let to = utf16_to_byte(&text, range.end_offset().ok()? as usize);
    (from < to).then_some(SelectionRange {
        node: start,
        range: from..to,
    })
}

fn target_node(event: &web_sys::Event) -> Option<Node> {
    event.target()?.dyn_into::<Node>().ok()
}

/// Live document listeners. Removed when dropped.
pub struct InputListeners {
    _listeners: Vec<EventListener>,
}

impl InputListeners {
    pub fn install(document: &Document, controller: ContentController<BrowserPlatform>) -> Self {
        let passive = EventListenerOptions::default();

        let hover = controller.clone();
        let mouseover = EventListener::new_with_options(
            document,
            "mouseover",
            passive,
            move |event| {
                if let Some(node) = target_node(event) {
                    hover.on_pointer_enter(&node);
                }
            },
        );

        let select = controller.clone();
        let window = document.default_view();
        let mouseup = EventListener::new_with_options(document, "mouseup", passive, move |_| {
            let Some(selection) = window.as_ref().and_then(|w| w.get_selection().ok().flatten())
            else {
                return;
            };
            if let Some(range) = selection_range(&selection) {
                tracing::trace!(range = ?range.range, "selection released");
                if select.on_selection_released(range).is_some() {
                    let _ = selection.remove_all_ranges();
                }
            }
        });

        let dismiss = controller;
        let pointerdown = EventListener::new_with_options(
            document,
            "pointerdown",
            passive,
            move |event| {
                if let Some(node) = target_node(event) {
                    dismiss.on_pointer_down(&node);
                }
            },
        );

        tracing::debug!("input listeners installed");
        Self {
            _listeners: vec![mouseover, mouseup, pointerdown],
        }
    }
}
