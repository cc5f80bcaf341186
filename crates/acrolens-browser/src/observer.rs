//! `MutationObserver` glue.
//!
//! Converts observer batches into engine `MutationRecord`s and hands them
//! over untouched; filtering and batching belong to the watcher.

use acrolens_core::MutationRecord;
use js_sys::Array;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{MutationObserver, MutationObserverInit, Node};

use crate::js::error_message;

/// Convert one observer record. Attribute changes are ignored.
pub fn convert_record(record: &web_sys::MutationRecord) -> Option<MutationRecord<Node>> {
    match record.type_().as_str() {
        "childList" => {
            let list = record.added_nodes();
            let added: Vec<Node> = (0..list.length()).filter_map(|i| list.item(i)).collect();
            (!added.is_empty()).then_some(MutationRecord::ChildList { added })
        }
        "characterData" => record
            .target()
            .map(|target| MutationRecord::CharacterData { target }),
        _ => None,
    }
}

/// A live observer. Disconnects when dropped.
pub struct ObserverHandle {
    observer: MutationObserver,
    _callback: Closure<dyn FnMut(Array, MutationObserver)>,
}

impl ObserverHandle {
    /// Observe `root`'s subtree for inserted nodes and text edits.
    pub fn observe(
        root: &Node,
        on_records: impl Fn(Vec<MutationRecord<Node>>) + 'static,
    ) -> Result<Self, String> {
        let callback = Closure::<dyn FnMut(Array, MutationObserver)>::new(
            move |records: Array, _observer: MutationObserver| {
                let converted: Vec<_> = records
                    .iter()
                    .filter_map(|r| r.dyn_into::<web_sys::MutationRecord>().ok())
                    .filter_map(|r| convert_record(&r))
                    .collect();
                if !converted.is_empty() {
                    on_records(converted);
                }
            },
        );
        let observer = MutationObserver::new(callback.as_ref().unchecked_ref())
            .map_err(|e| error_message(&e))?;

        let init = MutationObserverInit::new();
        init.set_child_list(true);
        init.set_subtree(true);
        init.set_character_data(true);
        observer
            .observe_with_options(root, &init)
            .map_err(|e: JsValue| error_message(&e))?;
        tracing::debug!("mutation observer installed");
        Ok(Self {
            observer,
            _callback: callback,
        })
    }

    /// Records queued but not yet delivered.
    pub fn take_pending(&self) -> Vec<MutationRecord<Node>> {
        self.observer
            .take_records()
            .iter()
            .filter_map(|r| r.dyn_into::<web_sys::MutationRecord>().ok())
            .filter_map(|r| convert_record(&r))
            .collect()
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        self.observer.disconnect();
    }
}
