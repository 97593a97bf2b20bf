/// Event sink for wake-word detections
///
/// The engine calls `EventSink::on_detected` from its own thread. The sink
/// only pushes onto an unbounded channel, so the engine is never blocked by
/// the consumer. An `EventDispatcher` task drains the channel and hands each
/// event to the single registered `DetectionConsumer` without waiting for
/// its reaction to finish.
///
/// The sink carries an open/closed gate owned by the lifecycle controller.
/// Every `open` starts a new listening cycle and each queued event carries
/// the cycle it was detected in. Events arriving while the gate is closed, or
/// belonging to an earlier cycle (a `stop` raced the detection), are counted
/// and dropped.

use crate::config::OnDetectCommand;
use crate::engine::KeywordIndex;
use async_trait::async_trait;
use serde::Serialize;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// A single wake-word detection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionEvent {
    /// Index of the detected keyword
    pub keyword_index: KeywordIndex,

    /// Timestamp when the wake word was detected (microseconds since epoch)
    pub timestamp: i64,
}

impl DetectionEvent {
    pub fn new(keyword_index: KeywordIndex) -> Self {
        Self {
            keyword_index,
            timestamp: current_timestamp_micros(),
        }
    }
}

fn current_timestamp_micros() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as i64
}

/// Downstream reaction to a detection (e.g. bring the assistant UI forward)
#[async_trait]
pub trait DetectionConsumer: Send + Sync {
    async fn on_wake_word(&self, event: DetectionEvent);
}

/// Outcome of handing an event to the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Queued,
    Discarded,
}

/// Detection counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkStats {
    pub dispatched: u64,
    pub discarded: u64,
}

#[derive(Default)]
struct Counters {
    dispatched: AtomicU64,
    discarded: AtomicU64,
}

/// Listening cycle an event was detected in
pub type Cycle = u64;

/// Open/closed flag plus the current listening cycle
#[derive(Default)]
struct Gate {
    open: AtomicBool,
    cycle: AtomicU64,
}

impl Gate {
    /// True while open and still in `cycle`
    fn admits(&self, cycle: Cycle) -> bool {
        self.open.load(Ordering::Acquire) && self.cycle.load(Ordering::Acquire) == cycle
    }
}

/// Producer side, cloned into the engine's detection callback
#[derive(Clone)]
pub struct EventSink {
    gate: Arc<Gate>,
    counters: Arc<Counters>,
    tx: mpsc::UnboundedSender<(Cycle, DetectionEvent)>,
}

/// Consumer side; run it on the async runtime
pub struct EventDispatcher {
    gate: Arc<Gate>,
    counters: Arc<Counters>,
    rx: mpsc::UnboundedReceiver<(Cycle, DetectionEvent)>,
    consumer: Arc<dyn DetectionConsumer>,
}

impl EventSink {
    /// Create a closed sink and the dispatcher feeding `consumer`
    pub fn new(consumer: Arc<dyn DetectionConsumer>) -> (EventSink, EventDispatcher) {
        let (tx, rx) = mpsc::unbounded_channel();
        let gate = Arc::new(Gate::default());
        let counters = Arc::new(Counters::default());

        let sink = EventSink {
            gate: Arc::clone(&gate),
            counters: Arc::clone(&counters),
            tx,
        };

        let dispatcher = EventDispatcher {
            gate,
            counters,
            rx,
            consumer,
        };

        (sink, dispatcher)
    }

    /// Accept a detection for the current cycle
    pub fn on_detected(&self, event: DetectionEvent) -> Dispatch {
        self.on_detected_in(self.cycle(), event)
    }

    /// Accept a detection from the engine thread of listening cycle `cycle`
    pub fn on_detected_in(&self, cycle: Cycle, event: DetectionEvent) -> Dispatch {
        if !self.gate.admits(cycle) {
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
            debug!("Discarding detection while not listening: {:?}", event);
            return Dispatch::Discarded;
        }

        match self.tx.send((cycle, event)) {
            Ok(()) => Dispatch::Queued,
            Err(e) => {
                self.counters.discarded.fetch_add(1, Ordering::Relaxed);
                warn!("Event dispatcher gone, dropping detection: {:?}", (e.0).1);
                Dispatch::Discarded
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.gate.open.load(Ordering::Acquire)
    }

    pub fn cycle(&self) -> Cycle {
        self.gate.cycle.load(Ordering::Acquire)
    }

    /// Open the gate for a new listening cycle and return it
    pub(crate) fn open(&self) -> Cycle {
        let cycle = self.gate.cycle.fetch_add(1, Ordering::AcqRel) + 1;
        self.gate.open.store(true, Ordering::Release);
        cycle
    }

    /// Close the gate; the cycle number is kept
    pub(crate) fn close(&self) {
        self.gate.open.store(false, Ordering::Release);
    }

    pub fn stats(&self) -> SinkStats {
        SinkStats {
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
        }
    }
}

impl EventDispatcher {
    /// Deliver events until every `EventSink` clone is dropped
    pub async fn run(mut self) {
        debug!("Event dispatcher started");

        while let Some((cycle, event)) = self.rx.recv().await {
            // The gate may have closed, or reopened for a later cycle, while
            // the event sat in the queue
            if !self.gate.admits(cycle) {
                self.counters.discarded.fetch_add(1, Ordering::Relaxed);
                debug!("Discarding queued detection after stop: {:?}", event);
                continue;
            }

            self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
            let consumer = Arc::clone(&self.consumer);
            tokio::spawn(async move {
                consumer.on_wake_word(event).await;
            });
        }

        debug!("Event dispatcher stopped");
    }
}

/// Consumer that only logs detections
pub struct LogConsumer;

#[async_trait]
impl DetectionConsumer for LogConsumer {
    async fn on_wake_word(&self, event: DetectionEvent) {
        info!(
            "Wake word detected! keyword_index={}, timestamp={}",
            event.keyword_index, event.timestamp
        );
    }
}

/// What `LaunchConsumer` did with a detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launch {
    Started,
    AlreadyRunning,
    Failed,
}

/// Consumer that launches a program on detection
///
/// Only one instance runs at a time: while the previously launched program
/// is alive, further detections leave it in the foreground. The detection
/// is exposed to the program through `WAKEWORD_KEYWORD_INDEX`.
pub struct LaunchConsumer {
    command: OnDetectCommand,
    running: Mutex<Option<Child>>,
}

impl LaunchConsumer {
    pub fn new(command: OnDetectCommand) -> Self {
        Self {
            command,
            running: Mutex::new(None),
        }
    }

    /// Start the program unless the last launch is still running
    pub fn launch(&self, event: &DetectionEvent) -> Launch {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(child) = running.as_mut() {
            match child.try_wait() {
                Ok(None) => {
                    debug!("{} still running, not relaunching", self.command.program);
                    return Launch::AlreadyRunning;
                }
                Ok(Some(status)) if !status.success() => {
                    warn!("{} exited with {}", self.command.program, status)
                }
                Ok(Some(_)) => {}
                Err(e) => warn!("Failed to poll {}: {}", self.command.program, e),
            }
        }

        let spawned = Command::new(&self.command.program)
            .args(&self.command.args)
            .env("WAKEWORD_KEYWORD_INDEX", event.keyword_index.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        match spawned {
            Ok(child) => {
                *running = Some(child);
                Launch::Started
            }
            Err(e) => {
                *running = None;
                error!("Failed to launch {}: {}", self.command.program, e);
                Launch::Failed
            }
        }
    }
}

#[async_trait]
impl DetectionConsumer for LaunchConsumer {
    async fn on_wake_word(&self, event: DetectionEvent) {
        info!("Wake word detected, launching {}", self.command.program);
        self.launch(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    struct ChannelConsumer(mpsc::UnboundedSender<DetectionEvent>);

    #[async_trait]
    impl DetectionConsumer for ChannelConsumer {
        async fn on_wake_word(&self, event: DetectionEvent) {
            let _ = self.0.send(event);
        }
    }

    fn channel_sink() -> (EventSink, EventDispatcher, mpsc::UnboundedReceiver<DetectionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (sink, dispatcher) = EventSink::new(Arc::new(ChannelConsumer(tx)));
        (sink, dispatcher, rx)
    }

    #[tokio::test]
    async fn test_open_sink_delivers_once() {
        let (sink, dispatcher, mut rx) = channel_sink();
        tokio::spawn(dispatcher.run());
        sink.open();

        assert_eq!(sink.on_detected(DetectionEvent::new(0)), Dispatch::Queued);

        let event = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(event.keyword_index, 0);
        assert!(event.timestamp > 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(sink.stats(), SinkStats { dispatched: 1, discarded: 0 });
    }

    #[tokio::test]
    async fn test_closed_sink_discards() {
        let (sink, dispatcher, mut rx) = channel_sink();
        tokio::spawn(dispatcher.run());

        assert_eq!(sink.on_detected(DetectionEvent::new(0)), Dispatch::Discarded);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(sink.stats().discarded, 1);
    }

    #[tokio::test]
    async fn test_queued_event_dropped_when_gate_closes() {
        let (sink, dispatcher, mut rx) = channel_sink();
        sink.open();

        // Queued before the dispatcher runs, then the listener stops
        assert_eq!(sink.on_detected(DetectionEvent::new(0)), Dispatch::Queued);
        sink.close();
        let run = tokio::spawn(dispatcher.run());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(sink.stats(), SinkStats { dispatched: 0, discarded: 1 });

        // Dispatcher exits once the last sink is gone
        drop(sink);
        timeout(Duration::from_secs(1), run).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_dispatcher_gone() {
        let (sink, dispatcher, _rx) = channel_sink();
        drop(dispatcher);
        sink.open();

        assert_eq!(sink.on_detected(DetectionEvent::new(0)), Dispatch::Discarded);
    }

    #[tokio::test]
    async fn test_event_from_previous_cycle_is_dropped() {
        let (sink, dispatcher, mut rx) = channel_sink();
        let first = sink.open();

        // Queued in the first cycle, then stop and a fresh start before the
        // dispatcher gets to it
        assert_eq!(sink.on_detected_in(first, DetectionEvent::new(0)), Dispatch::Queued);
        sink.close();
        let second = sink.open();
        assert_ne!(first, second);
        tokio::spawn(dispatcher.run());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(sink.stats(), SinkStats { dispatched: 0, discarded: 1 });

        // Late callback from the first cycle's engine
        assert_eq!(sink.on_detected_in(first, DetectionEvent::new(0)), Dispatch::Discarded);
        assert_eq!(sink.on_detected_in(second, DetectionEvent::new(0)), Dispatch::Queued);
        assert!(timeout(Duration::from_secs(1), rx.recv()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_launch_consumer_missing_program_does_not_panic() {
        let consumer = LaunchConsumer::new(OnDetectCommand {
            program: "/nonexistent/assistant-ui".to_string(),
            args: vec![],
        });

        consumer.on_wake_word(DetectionEvent::new(0)).await;
        assert_eq!(consumer.launch(&DetectionEvent::new(0)), Launch::Failed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_consumer_keeps_single_instance() {
        let consumer = LaunchConsumer::new(OnDetectCommand {
            program: "sleep".to_string(),
            args: vec!["5".to_string()],
        });

        assert_eq!(consumer.launch(&DetectionEvent::new(0)), Launch::Started);
        assert_eq!(consumer.launch(&DetectionEvent::new(0)), Launch::AlreadyRunning);

        let mut child = consumer.running.lock().unwrap().take().unwrap();
        child.kill().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_consumer_relaunches_after_exit() {
        let consumer = LaunchConsumer::new(OnDetectCommand {
            program: "true".to_string(),
            args: vec![],
        });

        assert_eq!(consumer.launch(&DetectionEvent::new(0)), Launch::Started);
        consumer.running.lock().unwrap().as_mut().unwrap().wait().await.unwrap();
        assert_eq!(consumer.launch(&DetectionEvent::new(0)), Launch::Started);
    }
}
