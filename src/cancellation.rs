//! Cooperative cancellation tokens
//!
//! Every operation in this crate that starts background work (a strategy, a
//! coalesced request, a shared WebSocket connection) is handed a
//! [`CancelToken`] and must stop promptly when it fires. Tokens form a tree:
//! cancelling a parent cancels every derived child, while cancelling a child
//! never affects its parent or siblings.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Why a token was cancelled. Preserved and surfaced in the error raised to
/// whichever consumer unwinds because of it.
#[derive(Clone)]
pub struct CancelReason(Arc<str>);

impl CancelReason {
    pub fn new(message: impl Into<String>) -> Self {
        Self(Arc::from(message.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CancelReason({:?})", &*self.0)
    }
}

impl From<&str> for CancelReason {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for CancelReason {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

type CancelCallback = Box<dyn FnOnce(&CancelReason) + Send>;

#[derive(Default)]
struct State {
    reason: Option<CancelReason>,
    children: Vec<Weak<Inner>>,
    callbacks: Vec<CancelCallback>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    notify: Notify,
}

/// A propagatable, observable cancellation signal.
///
/// Cancellation is monotonic: once cancelled, a token stays cancelled and the
/// first reason wins. Cleanup callbacks registered with [`on_cancel`] run
/// exactly once, immediately if the token is already cancelled.
///
/// [`on_cancel`]: CancelToken::on_cancel
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a token that is cancelled whenever this one is (with this one's
    /// reason). Cancelling the child never cancels the parent.
    pub fn child(&self) -> CancelToken {
        let child = CancelToken::new();
        let mut state = self.inner.state.lock();
        match state.reason.clone() {
            Some(reason) => {
                drop(state);
                child.cancel(reason);
            }
            None => state.children.push(Arc::downgrade(&child.inner)),
        }
        child
    }

    /// Cancel this token and every derived child. Idempotent.
    pub fn cancel(&self, reason: impl Into<CancelReason>) {
        Self::cancel_inner(&self.inner, reason.into());
    }

    fn cancel_inner(inner: &Arc<Inner>, reason: CancelReason) {
        let (callbacks, children) = {
            let mut state = inner.state.lock();
            if state.reason.is_some() {
                return;
            }
            state.reason = Some(reason.clone());
            (
                std::mem::take(&mut state.callbacks),
                std::mem::take(&mut state.children),
            )
        };
        inner.notify.notify_waiters();
        for callback in callbacks {
            callback(&reason);
        }
        for child in children {
            if let Some(child) = child.upgrade() {
                Self::cancel_inner(&child, reason.clone());
            }
        }
    }

    /// Register a cleanup callback. Runs at most once; runs immediately if
    /// the token is already cancelled.
    pub fn on_cancel(&self, callback: impl FnOnce(&CancelReason) + Send + 'static) {
        let mut state = self.inner.state.lock();
        if let Some(reason) = state.reason.clone() {
            drop(state);
            callback(&reason);
        } else {
            state.callbacks.push(Box::new(callback));
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.state.lock().reason.is_some()
    }

    pub fn reason(&self) -> Option<CancelReason> {
        self.inner.state.lock().reason.clone()
    }

    /// Resolves with the cancellation reason once the token is cancelled.
    pub async fn cancelled(&self) -> CancelReason {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking state so a cancel that lands
            // in between cannot be missed.
            notified.as_mut().enable();
            if let Some(reason) = self.reason() {
                return reason;
            }
            notified.await;
        }
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
