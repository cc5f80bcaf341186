//! Host scheduler over the Prioritized Task Scheduling API.
//!
//! Uses `scheduler.yield()` and `scheduler.postTask()` where the browser has
//! them, falling back to zero-delay timers and plain microtask spawning.
//! Frames go through `requestAnimationFrame`.

use std::future::Future;

use acrolens_core::{FrameCallback, Scheduler, TaskPriority};
use futures::future::LocalBoxFuture;
use gloo_timers::future::TimeoutFuture;
use js_sys::{Object, Promise, Reflect};
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen::closure::Closure;
use wasm_bindgen_futures::{JsFuture, spawn_local};

use crate::js::{error_message, global_path, method};

fn task_options(priority: TaskPriority) -> Object {
    let options = Object::new();
    let _ = Reflect::set(
        &options,
        &JsValue::from_str("priority"),
        &JsValue::from_str(priority.as_str()),
    );
    options
}

/// Scheduler for the content script's window.
#[derive(Clone)]
pub struct BrowserScheduler {
    task_scheduler: Option<JsValue>,
}

impl Default for BrowserScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl BrowserScheduler {
    pub fn new() -> Self {
        Self {
            task_scheduler: global_path("scheduler"),
        }
    }

    pub fn has_task_scheduler(&self) -> bool {
        self.task_scheduler.is_some()
    }

    /// `scheduler.yield()`, or a one-off `postTask` at `priority`.
    fn yield_promise(&self, priority: TaskPriority) -> Option<Promise> {
        let scheduler = self.task_scheduler.as_ref()?;
        if let Some(yield_fn) = method(scheduler, "yield") {
            return yield_fn.call0(scheduler).ok().map(Promise::from);
        }
        let post = method(scheduler, "postTask")?;
        let noop = js_sys::Function::new_no_args("");
        post.call2(scheduler, &noop, &task_options(priority))
            .ok()
            .map(Promise::from)
    }
}

impl Scheduler for BrowserScheduler {
    fn yield_now(&self, priority: TaskPriority) -> impl Future<Output = ()> {
        let promise = self.yield_promise(priority);
        async move {
            match promise {
                Some(promise) => {
                    if let Err(e) = JsFuture::from(promise).await {
                        tracing::trace!(error = %error_message(&e), "yield rejected");
                    }
                }
                None => TimeoutFuture::new(0).await,
            }
        }
    }

    fn post_task(&self, priority: TaskPriority, task: LocalBoxFuture<'static, ()>) {
        let post = self
            .task_scheduler
            .as_ref()
            .and_then(|scheduler| Some((scheduler, method(scheduler, "postTask")?)));
        let Some((scheduler, post)) = post else {
            spawn_local(task);
            return;
        };
        let callback = Closure::once_into_js(move || spawn_local(task));
        if let Err(e) = post.call2(scheduler, &callback, &task_options(priority)) {
            tracing::warn!(
                priority = priority.as_str(),
                error = %error_message(&e),
                "postTask failed, task dropped"
            );
        }
    }

    fn request_frame(&self, callback: FrameCallback) {
        let Some(window) = web_sys::window() else {
            callback();
            return;
        };
        let callback = Closure::once_into_js(move || callback());
        if let Err(e) = window.request_animation_frame(callback.unchecked_ref()) {
            tracing::warn!(error = %error_message(&e), "requestAnimationFrame failed");
        }
    }
}
