//! Transient toasts raised after saves.
//!
//! A [`Notifier`] keeps the currently visible toasts and broadcasts each new
//! one to subscribers. Toasts expire on their own after the configured
//! duration; expiry is measured with tokio's clock so paused-time tests can
//! advance past it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;

pub const DEFAULT_TOAST_DURATION: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Toast {
    pub id: u64,
    pub kind: ToastKind,
    /// Resource the toast is about
    pub source: String,
    pub message: String,
    pub shown_at: Instant,
    pub dismiss_after: Duration,
}

impl Toast {
    pub fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.shown_at) >= self.dismiss_after
    }
}

#[derive(Debug, Clone)]
pub struct Notifier {
    inner: Arc<NotifierInner>,
}

#[derive(Debug)]
struct NotifierInner {
    next_id: AtomicU64,
    duration: Duration,
    active: Mutex<Vec<Toast>>,
    sender: broadcast::Sender<Toast>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_TOAST_DURATION)
    }
}

impl Notifier {
    pub fn new(duration: Duration) -> Self {
        let (sender, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(NotifierInner {
                next_id: AtomicU64::new(1),
                duration,
                active: Mutex::new(Vec::new()),
                sender,
            }),
        }
    }

    pub fn success(&self, source: &str, message: impl Into<String>) -> Toast {
        self.push(ToastKind::Success, source, message.into())
    }

    pub fn error(&self, source: &str, message: impl Into<String>) -> Toast {
        self.push(ToastKind::Error, source, message.into())
    }

    fn push(&self, kind: ToastKind, source: &str, message: String) -> Toast {
        let toast = Toast {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            kind,
            source: source.to_string(),
            message,
            shown_at: Instant::now(),
            dismiss_after: self.inner.duration,
        };
        match kind {
            ToastKind::Success => tracing::info!(source = %toast.source, "{}", toast.message),
            ToastKind::Error => tracing::warn!(source = %toast.source, "{}", toast.message),
        }
        {
            let mut active = self.inner.active.lock().unwrap_or_else(|e| e.into_inner());
            active.retain(|t| !t.is_expired(toast.shown_at));
            active.push(toast.clone());
        }
        // No subscribers is fine
        let _ = self.inner.sender.send(toast.clone());
        toast
    }

    /// Toasts still on screen; expired ones are dropped as a side effect.
    pub fn active(&self) -> Vec<Toast> {
        let now = Instant::now();
        let mut active = self.inner.active.lock().unwrap_or_else(|e| e.into_inner());
        active.retain(|t| !t.is_expired(now));
        active.clone()
    }

    /// Dismiss a toast before it expires.
    pub fn dismiss(&self, id: u64) {
        self.inner.active.lock().unwrap_or_else(|e| e.into_inner()).retain(|t| t.id != id);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Toast> {
        self.inner.sender.subscribe()
    }
}
