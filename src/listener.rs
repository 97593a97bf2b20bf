/// Wake-word listener lifecycle controller
///
/// Sequences engine creation, start, stop and teardown, and classifies
/// engine failures. State transitions:
///
/// ```text
/// Uninitialized --init--> Starting --ok--> Listening --stop--> Stopped
///                            |
///                            +--error--> Failed(ErrorKind)
/// ```
///
/// `Stopped` and `Failed` are terminal for the engine handle; calling
/// `init` again starts a fresh cycle. Initialization errors are reported
/// once and never retried automatically.

use crate::config::ListenerConfig;
use crate::engine::{DetectionCallback, EngineHandle, WakeWordEngine};
use crate::error::ErrorKind;
use crate::reporter::StatusReporter;
use crate::sink::{DetectionEvent, EventSink, SinkStats};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "error")]
pub enum LifecycleState {
    Uninitialized,
    Starting,
    Listening,
    Stopped,
    Failed(ErrorKind),
}

impl LifecycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Stopped | LifecycleState::Failed(_))
    }
}

/// Owns the engine handle and the lifecycle state
///
/// All methods take `&mut self` and are meant to be driven from a single
/// control task. The engine's detection thread only ever sees a clone of
/// the `EventSink`.
pub struct WakeWordListener<E: WakeWordEngine> {
    engine: E,
    sink: EventSink,
    reporter: StatusReporter,
    state: LifecycleState,
    handle: Option<Box<dyn EngineHandle>>,
}

impl<E: WakeWordEngine> WakeWordListener<E> {
    pub fn new(engine: E, sink: EventSink, reporter: StatusReporter) -> Self {
        Self {
            engine,
            sink,
            reporter,
            state: LifecycleState::Uninitialized,
            handle: None,
        }
    }

    pub fn state(&self) -> &LifecycleState {
        &self.state
    }

    pub fn is_listening(&self) -> bool {
        self.state == LifecycleState::Listening
    }

    pub fn sink_stats(&self) -> SinkStats {
        self.sink.stats()
    }

    /// Create the engine from `config` and start listening
    ///
    /// Never returns an error: failures land in `LifecycleState::Failed` and
    /// are reported. The resulting state is returned for convenience.
    pub fn init(&mut self, config: ListenerConfig) -> LifecycleState {
        match self.state {
            LifecycleState::Starting | LifecycleState::Listening => {
                warn!("Listener already {:?}, ignoring init", self.state);
                return self.state.clone();
            }
            LifecycleState::Stopped | LifecycleState::Failed(_) => {
                debug!("Restarting listener from {:?}", self.state);
                self.state = LifecycleState::Uninitialized;
            }
            LifecycleState::Uninitialized => {}
        }

        self.transition(LifecycleState::Starting);
        info!("Initializing wake-word listener: {:?}", config);

        if let Err(e) = config.validate() {
            return self.fail(ErrorKind::InvalidConfiguration(e.to_string()));
        }

        // Open before start so an immediate detection is not lost. The
        // callback is bound to this cycle; anything it reports after a later
        // stop or restart is discarded.
        let cycle = self.sink.open();
        let sink = self.sink.clone();
        let on_detection: DetectionCallback = Arc::new(move |keyword_index| {
            sink.on_detected_in(cycle, DetectionEvent::new(keyword_index));
        });

        // Config is dropped at the end of init
        let mut handle = match self.engine.create(&config, on_detection) {
            Ok(handle) => handle,
            Err(e) => {
                self.sink.close();
                return self.fail(e.into());
            }
        };

        if let Err(e) = handle.start() {
            self.sink.close();
            release_quietly(handle);
            return self.fail(e.into());
        }

        self.handle = Some(handle);
        self.transition(LifecycleState::Listening);
        self.state.clone()
    }

    /// Fail an init attempt whose configuration could not even be assembled
    pub fn reject(&mut self, kind: ErrorKind) -> LifecycleState {
        if matches!(self.state, LifecycleState::Starting | LifecycleState::Listening) {
            warn!("Listener already {:?}, ignoring rejected init: {}", self.state, kind);
            return self.state.clone();
        }

        self.state = LifecycleState::Uninitialized;
        self.transition(LifecycleState::Starting);
        self.fail(kind)
    }

    /// Stop listening and release the engine. Idempotent.
    pub fn stop(&mut self) -> LifecycleState {
        match self.state {
            LifecycleState::Listening | LifecycleState::Starting => {
                self.shutdown_handle();
                self.transition(LifecycleState::Stopped);
            }
            LifecycleState::Stopped => debug!("Listener already stopped"),
            LifecycleState::Uninitialized | LifecycleState::Failed(_) => {
                debug!("Nothing to stop in state {:?}", self.state);
            }
        }

        self.state.clone()
    }

    /// Release everything on process shutdown
    ///
    /// Safe from any state; errors are logged, never raised.
    pub fn teardown(&mut self) {
        info!("Tearing down wake-word listener (state: {:?})", self.state);

        match self.state {
            LifecycleState::Listening | LifecycleState::Starting => {
                self.shutdown_handle();
                self.transition(LifecycleState::Stopped);
            }
            _ => {
                // Terminal states hold no handle, but never leak one
                self.shutdown_handle();
            }
        }
    }

    fn shutdown_handle(&mut self) {
        // Late detections racing this stop are dropped by the sink
        self.sink.close();

        if let Some(mut handle) = self.handle.take() {
            if let Err(e) = handle.stop() {
                warn!("Error stopping engine (ignored): {}", e);
            }
            release_quietly(handle);
        }
    }

    fn fail(&mut self, kind: ErrorKind) -> LifecycleState {
        error!("Wake-word listener failed to initialize: {}", kind);
        self.transition(LifecycleState::Failed(kind));
        self.state.clone()
    }

    fn transition(&mut self, next: LifecycleState) {
        debug!("Listener state {:?} -> {:?}", self.state, next);
        self.state = next;
        self.reporter.report(&self.state);
    }
}

impl<E: WakeWordEngine> Drop for WakeWordListener<E> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.teardown();
        }
    }
}

fn release_quietly(handle: Box<dyn EngineHandle>) {
    if let Err(e) = handle.release() {
        warn!("Error releasing engine (ignored): {}", e);
    }
}
