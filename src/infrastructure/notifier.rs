use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Success,
    Danger,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub text: String,
}

/// One-shot message for the next dashboard view. Setting replaces, taking clears.
#[derive(Debug, Default)]
pub struct NotificationState {
    last: Mutex<Option<Notification>>,
}

impl NotificationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, level: NotificationLevel, text: impl Into<String>) {
        *self.last.lock() = Some(Notification {
            level,
            text: text.into(),
        });
    }

    pub fn take(&self) -> Option<Notification> {
        self.last.lock().take()
    }
}
