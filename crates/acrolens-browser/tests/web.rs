//! WASM browser tests for acrolens-browser.
//!
//! Run with: `wasm-pack test --headless --firefox` or `--chrome`

use wasm_bindgen_test::*;

wasm_bindgen_test_configure!(run_in_browser);

use acrolens_browser::events::selection_range;
use acrolens_browser::markup::{parse_action, render};
use acrolens_browser::prompt_api::accumulate;
use acrolens_browser::storage::merge_stored;
use acrolens_browser::surface::host_style;
use acrolens_browser::{
    BrowserScheduler, DocumentTree, DomTree, EncyclopediaView, Expansion, IdAllocator,
    LookupBackend, MutationRecord, ObserverHandle, OverlayEvent, OverlayPhase, OverlayView,
    PanelState, Placement, Scheduler, match_tokens, rewrite,
};
use acrolens_core::types::ContentStamp;
use serde_json::json;
use web_sys::{Document, Element, Node};

fn document() -> Document {
    web_sys::window().unwrap().document().unwrap()
}

/// A fresh `<p>` holding `text`, attached to the body.
fn paragraph(text: &str) -> (Element, Node) {
    let document = document();
    let p = document.create_element("p").unwrap();
    let node: Node = document.create_text_node(text).into();
    p.append_child(&node).unwrap();
    document.body().unwrap().append_child(&p).unwrap();
    (p, node)
}

fn view(expansion: Expansion) -> OverlayView {
    OverlayView {
        id: IdAllocator::new().next_overlay(),
        acronym: "REST".into(),
        phase: OverlayPhase::Visible,
        expansion,
        selected: LookupBackend::OnDeviceModel,
        explanation: PanelState::Idle,
        expanded_phrase: None,
        encyclopedia: PanelState::Idle,
        searching: false,
    }
}

// === DomTree ===

#[wasm_bindgen_test]
fn test_commit_fragment_wraps_tokens() {
    let (p, node) = paragraph("The REST API");
    let tree = DomTree::new(document());
    let text = tree.text(&node).unwrap();
    let fragment = rewrite(&text, &match_tokens(&text)).unwrap();

    let outcome = tree.replace_text_with_fragment(&node, &fragment).unwrap();
    assert_eq!(outcome.containers.len(), 2);
    assert_eq!(
        p.inner_html(),
        "The <span data-acrolens=\"container\" style=\"position: relative;\">\
         <mark data-acrolens=\"mark\">REST</mark></span> \
         <span data-acrolens=\"container\" style=\"position: relative;\">\
         <mark data-acrolens=\"mark\">API</mark></span>"
    );
    assert_eq!(p.text_content().unwrap(), "The REST API");
    p.remove();
}

#[wasm_bindgen_test]
fn test_unwrap_merges_text_siblings() {
    let (p, node) = paragraph("see the Lorem ipsum text");
    let tree = DomTree::new(document());

    let outcome = tree.wrap_text_range(&node, 8..19).unwrap();
    assert_eq!(outcome.texts.len(), 3);
    assert_eq!(p.child_nodes().length(), 3);

    let merged = tree.unwrap_container(&outcome.containers[0]).unwrap();
    assert_eq!(p.child_nodes().length(), 1);
    assert_eq!(tree.text(&merged).unwrap(), "see the Lorem ipsum text");
    p.remove();
}

#[wasm_bindgen_test]
fn test_wrap_rejects_bad_range() {
    let (p, node) = paragraph("short");
    let tree = DomTree::new(document());
    assert!(tree.wrap_text_range(&node, 2..40).is_err());
    assert!(tree.wrap_text_range(&node, 3..3).is_err());
    assert_eq!(p.child_nodes().length(), 1);
    p.remove();
}

#[wasm_bindgen_test]
fn test_stamps_live_beside_the_node() {
    let (p, node) = paragraph("GPU");
    let tree = DomTree::new(document());
    assert_eq!(tree.processed_stamp(&node), None);

    let stamp = ContentStamp::of("GPU");
    tree.set_processed_stamp(&node, stamp);
    assert_eq!(tree.processed_stamp(&node), Some(stamp));
    assert_eq!(p.outer_html(), "<p>GPU</p>");

    tree.clear_processed_stamp(&node);
    assert_eq!(tree.processed_stamp(&node), None);
    p.remove();
}

#[wasm_bindgen_test]
fn test_tag_names_are_lowercase() {
    let (p, node) = paragraph("x");
    let tree = DomTree::new(document());
    assert_eq!(tree.tag_name(&p.clone().into()).as_deref(), Some("p"));
    assert_eq!(tree.tag_name(&node), None);
    p.remove();
}

// === Selection ===

#[wasm_bindgen_test]
fn test_selection_offsets_become_bytes() {
    let (p, node) = paragraph("café REST");
    let range = document().create_range().unwrap();
    range.set_start(&node, 5).unwrap();
    range.set_end(&node, 9).unwrap();
    let selection = web_sys::window().unwrap().get_selection().unwrap().unwrap();
    selection.remove_all_ranges().unwrap();
    selection.add_range(&range).unwrap();

    let selected = selection_range(&selection).unwrap();
    assert_eq!(selected.node, node);
    assert_eq!(selected.range, 6..10);

    selection.remove_all_ranges().unwrap();
    p.remove();
}

#[wasm_bindgen_test]
fn test_collapsed_selection_is_ignored() {
    let (p, node) = paragraph("REST");
    let range = document().create_range().unwrap();
    range.set_start(&node, 2).unwrap();
    range.set_end(&node, 2).unwrap();
    let selection = web_sys::window().unwrap().get_selection().unwrap().unwrap();
    selection.remove_all_ranges().unwrap();
    selection.add_range(&range).unwrap();

    assert!(selection_range(&selection).is_none());

    selection.remove_all_ranges().unwrap();
    p.remove();
}

// === Mutation observer ===

#[wasm_bindgen_test]
fn test_observer_reports_inserted_nodes() {
    let (p, _) = paragraph("");
    let handle = ObserverHandle::observe(&p.clone().into(), |_| {}).unwrap();
    let added: Node = document().create_text_node("New GPU drivers").into();
    p.append_child(&added).unwrap();

    let records = handle.take_pending();
    assert_eq!(records.len(), 1);
    match &records[0] {
        MutationRecord::ChildList { added: nodes } => assert_eq!(nodes, &vec![added]),
        other => panic!("unexpected record {other:?}"),
    }
    p.remove();
}

// === Scheduler ===

#[wasm_bindgen_test]
async fn test_request_frame_runs_callback() {
    let (tx, rx) = futures::channel::oneshot::channel();
    BrowserScheduler::new().request_frame(Box::new(move || {
        let _ = tx.send(());
    }));
    rx.await.unwrap();
}

// === Overlay markup ===

#[wasm_bindgen_test]
fn test_parse_actions() {
    assert_eq!(parse_action("close", None), Some(OverlayEvent::Close));
    assert_eq!(parse_action("expand", None), Some(OverlayEvent::Expand));
    assert_eq!(
        parse_action("select", Some("encyclopedia")),
        Some(OverlayEvent::SelectBackend(LookupBackend::Encyclopedia))
    );
    assert_eq!(parse_action("select", None), None);
    assert_eq!(parse_action("bogus", None), None);
}

#[wasm_bindgen_test]
fn test_collapsed_markup_has_no_tabs() {
    let html = render(&view(Expansion::Collapsed));
    assert!(html.contains(r#"data-action="expand""#));
    assert!(!html.contains("tabs"));
}

#[wasm_bindgen_test]
fn test_expanded_markup_escapes_answer() {
    let mut view = view(Expansion::Expanded);
    view.explanation = PanelState::Streaming("<b>Rep</b>".into());
    let html = render(&view);
    assert!(html.contains("&lt;b&gt;Rep&lt;/b&gt;"));
    assert!(html.contains(r#"data-backend="on-device-model" aria-selected="true""#));
    assert!(html.contains(r#"class="cursor""#));
}

#[wasm_bindgen_test]
fn test_encyclopedia_summary_markup() {
    let mut view = view(Expansion::Expanded);
    view.selected = LookupBackend::Encyclopedia;
    view.expanded_phrase = Some("Representational state transfer".into());
    view.encyclopedia = PanelState::Ready(EncyclopediaView::Summary {
        title: "REST".into(),
        summary: "An architectural style.".into(),
    });
    let html = render(&view);
    assert!(html.contains("<h4>Summary (REST)</h4><p>An architectural style.</p>"));
    assert!(html.contains(r#"<p class="phrase">Representational state transfer</p>"#));
}

#[wasm_bindgen_test]
fn test_host_style_per_placement() {
    let id = IdAllocator::new().next_overlay();
    assert!(host_style(id, Placement::Anchored).contains("position-anchor: --acrolens-ov-0"));
    assert!(host_style(id, Placement::Fallback).starts_with("position: absolute; top: 100%;"));
}

// === Model and storage helpers ===

#[wasm_bindgen_test]
fn test_accumulate_handles_both_chunk_styles() {
    let mut text = String::new();
    accumulate(&mut text, "Repre");
    accumulate(&mut text, "Representational");
    assert_eq!(text, "Representational");
    accumulate(&mut text, " state");
    assert_eq!(text, "Representational state");
}

#[wasm_bindgen_test]
fn test_legacy_api_key_fills_gap() {
    let merged = merge_stored(Some(json!({ "model": "openai/gpt-4o" })), Some(json!("sk-1")));
    assert_eq!(merged, json!({ "model": "openai/gpt-4o", "apiKey": "sk-1" }));

    let kept = merge_stored(Some(json!({ "apiKey": "sk-2" })), Some(json!("sk-1")));
    assert_eq!(kept, json!({ "apiKey": "sk-2" }));

    assert_eq!(merge_stored(None, None), json!({}));
}
