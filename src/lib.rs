/// Wake-word listener library
///
/// Keeps a wake-word engine running in the background, classifies its
/// initialization failures, forwards detections to a single consumer and
/// reports lifecycle changes as user-visible notifications.

pub mod config;
pub mod engine;
pub mod error;
pub mod listener;
pub mod notification;
pub mod reporter;
pub mod service;
pub mod sink;

// Re-export main types
pub use config::{ConfigError, ListenerConfig, OnDetectCommand, ServiceConfig};
pub use engine::{
    AudioFeed, DetectionCallback, EnergyEngine, EnergyEngineConfig, EngineHandle, KeywordIndex,
    WakeWordEngine, FRAME_LENGTH, SAMPLE_RATE,
};
pub use error::{EngineError, ErrorKind, RetryHint};
pub use listener::{LifecycleState, WakeWordListener};
pub use notification::{DesktopNotifier, LogNotifier, Notification, NotificationId, Notifier, Severity};
pub use reporter::StatusReporter;
pub use service::{ControlRequest, ListenerService, ServiceCommand, ServiceStatus};
pub use sink::{
    Cycle, DetectionConsumer, DetectionEvent, Dispatch, EventDispatcher, EventSink, Launch,
    LaunchConsumer, LogConsumer, SinkStats,
};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wakeword_listener=info,wakeword_service=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
