//! User-visible notifications
//!
//! The presentation side of the status reporter. A `Notifier` never fails
//! the caller; delivery problems are logged and swallowed.

use serde::Serialize;
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

#[cfg(test)]
use mockall::automock;

/// Notification slot; showing into an occupied slot replaces it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NotificationId {
    /// Persistent "listening" indicator
    Listening,
    /// Initialization failure alert
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Low,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub id: NotificationId,
    pub title: String,
    pub body: String,
    pub severity: Severity,
}

/// Presentation collaborator
#[cfg_attr(test, automock)]
pub trait Notifier: Send + Sync {
    fn show(&self, notification: &Notification);

    fn dismiss(&self, id: NotificationId);
}

/// Writes notifications to the log only
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn show(&self, notification: &Notification) {
        match notification.severity {
            Severity::Low => info!("[{}] {}", notification.title, notification.body),
            Severity::High => error!("[{}] {}", notification.title, notification.body),
        }
    }

    fn dismiss(&self, id: NotificationId) {
        debug!("Notification {:?} dismissed", id);
    }
}

/// Desktop notifications via notify-send (Linux) or osascript (macOS)
///
/// Needs a running tokio runtime; without one notifications are logged only.
/// Commands run one after another in the order they were issued.
pub struct DesktopNotifier {
    app_name: String,
    last: Mutex<Option<JoinHandle<()>>>,
}

impl DesktopNotifier {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            last: Mutex::new(None),
        }
    }

    fn run(&self, mut cmd: Command) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No async runtime, skipping desktop notification");
            return;
        };

        cmd.stdout(Stdio::null()).stderr(Stdio::null());

        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = last.take();
        *last = Some(runtime.spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            if let Err(e) = cmd.status().await {
                debug!("Failed to send notification: {}", e);
            }
        }));
    }
}

/// Shared synchronous tag: a new notification replaces the one on screen
#[cfg(target_os = "linux")]
const SYNC_HINT: &str = "--hint=string:x-canonical-private-synchronous:wakeword";

#[cfg(target_os = "linux")]
fn notify_send_args(app_name: &str, notification: &Notification) -> Vec<String> {
    let mut args = vec![format!("--app-name={}", app_name)];

    match notification.severity {
        Severity::Low => args.push("--urgency=low".to_string()),
        Severity::High => args.push("--urgency=critical".to_string()),
    }

    // The listening indicator stays up until replaced
    if notification.id == NotificationId::Listening {
        args.push("--expire-time=0".to_string());
    }

    args.push(SYNC_HINT.to_string());
    args.push(notification.title.clone());
    args.push(notification.body.clone());
    args
}

#[cfg(target_os = "linux")]
fn platform_command(app_name: &str, notification: &Notification) -> Option<Command> {
    let mut cmd = Command::new("notify-send");
    cmd.args(notify_send_args(app_name, notification));
    Some(cmd)
}

/// Replace the listening indicator with a notice that expires at once
#[cfg(target_os = "linux")]
fn dismiss_command(app_name: &str, id: NotificationId) -> Option<Command> {
    if id != NotificationId::Listening {
        return None;
    }

    let mut cmd = Command::new("notify-send");
    cmd.arg(format!("--app-name={}", app_name))
        .arg("--urgency=low")
        .arg("--expire-time=1")
        .arg(SYNC_HINT)
        .arg(app_name)
        .arg("Stopped listening");
    Some(cmd)
}

// osascript has no way to withdraw a shown notification
#[cfg(not(target_os = "linux"))]
fn dismiss_command(_app_name: &str, _id: NotificationId) -> Option<Command> {
    None
}

#[cfg(target_os = "macos")]
fn platform_command(app_name: &str, notification: &Notification) -> Option<Command> {
    let escape = |s: &str| s.replace('"', "\\\"");
    let script = format!(
        "display notification \"{}\" with title \"{}\" subtitle \"{}\"",
        escape(&notification.body),
        escape(app_name),
        escape(&notification.title),
    );

    let mut cmd = Command::new("osascript");
    cmd.arg("-e").arg(script);
    Some(cmd)
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn platform_command(_app_name: &str, _notification: &Notification) -> Option<Command> {
    None
}

impl Notifier for DesktopNotifier {
    fn show(&self, notification: &Notification) {
        LogNotifier.show(notification);

        match platform_command(&self.app_name, notification) {
            Some(cmd) => self.run(cmd),
            None => debug!("Desktop notifications not supported on this platform"),
        }
    }

    fn dismiss(&self, id: NotificationId) {
        LogNotifier.dismiss(id);

        if let Some(cmd) = dismiss_command(&self.app_name, id) {
            self.run(cmd);
        }
    }
}
