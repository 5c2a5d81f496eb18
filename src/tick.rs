//! Explicit tick boundary
//!
//! The request coalescer and the connection sharder both defer work "until
//! the end of the current tick": the coalescing window closes there, and the
//! sharder's purge check runs there so a same-tick re-subscription can keep a
//! connection alive. Rather than relying on an implicit scheduler detail,
//! the boundary is a trait so the production definition is explicit and tests
//! can control it directly.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

/// Runs a closure after the current scheduling quantum.
pub trait TickBoundary: Send + Sync + 'static {
    fn defer(&self, f: Box<dyn FnOnce() + Send + 'static>);
}

/// Production boundary: a tick is one pass of the tokio scheduler. The
/// deferred closure runs on a task that yields once before executing, so
/// everything enqueued before the scheduler gets back around to that task
/// belongs to the same tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpawnTick;

impl TickBoundary for SpawnTick {
    fn defer(&self, f: Box<dyn FnOnce() + Send + 'static>) {
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            f();
        });
    }
}

/// Test boundary: queues deferred closures until the test ends the tick by
/// draining them.
#[derive(Clone, Default)]
pub struct ManualTick {
    queue: Arc<Mutex<VecDeque<Box<dyn FnOnce() + Send + 'static>>>>,
}

impl ManualTick {
    pub fn new() -> Self {
        Self::default()
    }

    /// End the current tick: run every deferred closure, including ones
    /// queued by closures that are themselves running.
    pub fn run_until_idle(&self) {
        loop {
            let next = self.queue.lock().pop_front();
            match next {
                Some(f) => f(),
                None => break,
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

impl TickBoundary for ManualTick {
    fn defer(&self, f: Box<dyn FnOnce() + Send + 'static>) {
        self.queue.lock().push_back(f);
    }
}
