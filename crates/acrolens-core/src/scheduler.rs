//! Cooperative scheduling seam.
//!
//! The engine is single-threaded and never blocks: long walks yield to the
//! host between nodes, deferred work is posted as prioritised tasks and DOM
//! commits wait for the next frame. `Scheduler` abstracts the host queue;
//! the browser crate maps it onto `scheduler.postTask` / `scheduler.yield` /
//! `requestAnimationFrame`, and `LocalRuntime` provides a deterministic
//! native implementation.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::rc::Rc;

use futures::executor::{LocalPool, LocalSpawner};
use futures::future::LocalBoxFuture;
use futures::task::LocalSpawnExt;

/// Host task priority, mirroring the prioritized task scheduling levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskPriority {
    UserBlocking,
    UserVisible,
    Background,
}

impl TaskPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskPriority::UserBlocking => "user-blocking",
            TaskPriority::UserVisible => "user-visible",
            TaskPriority::Background => "background",
        }
    }
}

/// Callback run before the next frame is painted.
pub type FrameCallback = Box<dyn FnOnce()>;

/// Host scheduling capabilities.
pub trait Scheduler: Clone + 'static {
    /// Suspend the current task and let the host run other work first.
    fn yield_now(&self, priority: TaskPriority) -> impl Future<Output = ()>;

    /// Queue a task. Posting never runs the task synchronously.
    fn post_task(&self, priority: TaskPriority, task: LocalBoxFuture<'static, ()>);

    /// Run `callback` at the next frame.
    fn request_frame(&self, callback: FrameCallback);
}

struct LocalState {
    spawner: LocalSpawner,
    frames: RefCell<VecDeque<FrameCallback>>,
    posted: RefCell<Vec<TaskPriority>>,
    yields: Cell<usize>,
}

impl LocalState {
    /// Run every frame callback queued so far. Callbacks queued while
    /// running wait for the next frame.
    fn run_frames(&self) -> usize {
        let batch: Vec<_> = self.frames.borrow_mut().drain(..).collect();
        let count = batch.len();
        for callback in batch {
            callback();
        }
        count
    }
}

/// `Scheduler` handle for a `LocalRuntime`.
///
/// Frames are flushed at every cooperative yield and whenever the pool runs
/// out of ready tasks, so deferred commits land while a walk is suspended.
#[derive(Clone)]
pub struct LocalScheduler {
    state: Rc<LocalState>,
}

impl LocalScheduler {
    /// Priorities of every task posted so far, in posting order.
    pub fn posted_priorities(&self) -> Vec<TaskPriority> {
        self.state.posted.borrow().clone()
    }

    /// Number of cooperative yields taken so far.
    pub fn yield_count(&self) -> usize {
        self.state.yields.get()
    }

    pub fn pending_frames(&self) -> usize {
        self.state.frames.borrow().len()
    }
}

impl Scheduler for LocalScheduler {
    fn yield_now(&self, _priority: TaskPriority) -> impl Future<Output = ()> {
        let state = Rc::clone(&self.state);
        async move {
            state.yields.set(state.yields.get() + 1);
            state.run_frames();
            n0_future::future::yield_now().await;
        }
    }

    fn post_task(&self, priority: TaskPriority, task: LocalBoxFuture<'static, ()>) {
        self.state.posted.borrow_mut().push(priority);
        if let Err(e) = self.state.spawner.spawn_local(task) {
            tracing::warn!(priority = priority.as_str(), "dropping task: {e}");
        }
    }

    fn request_frame(&self, callback: FrameCallback) {
        self.state.frames.borrow_mut().push_back(callback);
    }
}

/// Deterministic single-threaded runtime over `futures`' `LocalPool`.
pub struct LocalRuntime {
    pool: LocalPool,
    scheduler: LocalScheduler,
}

impl Default for LocalRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRuntime {
    pub fn new() -> Self {
        let pool = LocalPool::new();
        let state = LocalState {
            spawner: pool.spawner(),
            frames: RefCell::new(VecDeque::new()),
            posted: RefCell::new(Vec::new()),
            yields: Cell::new(0),
        };
        Self {
            pool,
            scheduler: LocalScheduler {
                state: Rc::new(state),
            },
        }
    }

    pub fn scheduler(&self) -> LocalScheduler {
        self.scheduler.clone()
    }

    /// Run tasks and frames until nothing is left that can make progress.
    pub fn run_until_stalled(&mut self) {
        loop {
            self.pool.run_until_stalled();
            if self.scheduler.state.run_frames() == 0 {
                break;
            }
        }
    }

    /// Drive `future` to completion on this runtime, then drain whatever it
    /// left behind.
    pub fn block_on<F: Future>(&mut self, future: F) -> F::Output {
        let output = self.pool.run_until(future);
        self.run_until_stalled();
        output
    }
}
