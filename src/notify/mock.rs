//! Recording notifier shared by unit tests across the crate.

use super::{NotificationKind, Notifier};
use crate::error::NotifyError;
use async_trait::async_trait;
use std::sync::Mutex;

/// One captured `notify` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Sent {
    pub recipient: String,
    pub message: String,
    pub kind: NotificationKind,
}

/// Notifier that records every call and optionally fails them all.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    sent: Mutex<Vec<Sent>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.sent().into_iter().map(|s| s.kind).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn notify(
        &self,
        recipient: &str,
        message: &str,
        kind: NotificationKind,
    ) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(Sent {
            recipient: recipient.to_string(),
            message: message.to_string(),
            kind,
        });
        if self.fail {
            Err(NotifyError::SendFailed("recording notifier set to fail".to_string()))
        } else {
            Ok(())
        }
    }
}
