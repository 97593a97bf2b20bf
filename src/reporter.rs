/// Status reporter
///
/// Turns lifecycle snapshots into notifications: a persistent indicator
/// while listening, a high-severity alert on failure.

use crate::listener::LifecycleState;
use crate::notification::{Notification, NotificationId, Notifier, Severity};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const LISTENING_TITLE: &str = "Voice Assistant";
pub const LISTENING_BODY: &str = "Listening for wake word...";
pub const ERROR_TITLE: &str = "Wake Word Error";

pub struct StatusReporter {
    notifier: Arc<dyn Notifier>,
}

impl StatusReporter {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Present a state the listener just entered
    pub fn report(&self, state: &LifecycleState) {
        match state {
            LifecycleState::Listening => {
                info!("Listener is listening");
                self.notifier.show(&Notification {
                    id: NotificationId::Listening,
                    title: LISTENING_TITLE.to_string(),
                    body: LISTENING_BODY.to_string(),
                    severity: Severity::Low,
                });
            }
            LifecycleState::Failed(kind) => {
                warn!("Listener failed: {} (retry: {:?})", kind, kind.retry_hint());
                self.notifier.dismiss(NotificationId::Listening);
                self.notifier.show(&Notification {
                    id: NotificationId::Error,
                    title: ERROR_TITLE.to_string(),
                    body: kind.to_string(),
                    severity: Severity::High,
                });
            }
            LifecycleState::Stopped => {
                info!("Listener stopped");
                self.notifier.dismiss(NotificationId::Listening);
            }
            LifecycleState::Starting | LifecycleState::Uninitialized => {
                debug!("Listener state: {:?}", state);
            }
        }
    }
}
