//! Operator notification port.
//!
//! The shipped adapter logs the composed message; a production SMTP or
//! webhook transport implements the same trait without touching callers.

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait NotificationPort: Send + Sync {
    async fn notify(&self, subject: &str, body: &str) -> Result<()>;
}

/// Log-only notifier (the notification transport of record until an SMTP
/// relay is configured).
pub struct LogNotifier {
    recipient: Option<String>,
}

impl LogNotifier {
    pub fn new(recipient: Option<String>) -> Self {
        LogNotifier { recipient }
    }
}

#[async_trait]
impl NotificationPort for LogNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<()> {
        log::info!(
            "notification to {}: {} -- {}",
            self.recipient.as_deref().unwrap_or("<unconfigured>"),
            subject,
            body
        );
        Ok(())
    }
}

/// Capturing notifier used by the test suite and dry runs.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: std::sync::Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl NotificationPort for RecordingNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((subject.to_string(), body.to_string()));
        Ok(())
    }
}
