//! Advisory user-facing notices.
//!
//! Notices are fire-and-forget: they travel on a bounded channel and are
//! dropped when nobody keeps up. They never carry control flow.

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A short message for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub detail: String,
}

impl Notice {
    pub fn info(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, title, detail)
    }

    pub fn warning(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Warning, title, detail)
    }

    pub fn error(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, title, detail)
    }

    fn new(level: NoticeLevel, title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            detail: detail.into(),
        }
    }
}

/// Sending half of the notice channel. A notifier without a channel
/// discards everything.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    tx: Option<mpsc::Sender<Notice>>,
}

impl Notifier {
    #[must_use]
    pub const fn new(tx: mpsc::Sender<Notice>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Creates a notifier and the receiver it feeds.
    #[must_use]
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Notice>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(tx), rx)
    }

    #[must_use]
    pub const fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn notify(&self, notice: Notice) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(e) = tx.try_send(notice) {
            tracing::debug!(error = %e, "notice dropped");
        }
    }
}
