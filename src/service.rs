//! Service host
//!
//! Drives a `WakeWordListener` from host process events. Commands arrive on
//! a channel and are applied one at a time, so the listener is only ever
//! touched from this task.

use crate::config::ServiceConfig;
use crate::engine::WakeWordEngine;
use crate::error::ErrorKind;
use crate::listener::{LifecycleState, WakeWordListener};
use crate::sink::SinkStats;
use serde::Serialize;
use std::str::FromStr;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// Process-model triggers
#[derive(Debug)]
pub enum ServiceCommand {
    /// Start (or keep) listening
    Start,
    /// Stop listening but keep the service alive
    Stop,
    /// Snapshot of the listener state
    Status(oneshot::Sender<ServiceStatus>),
    /// Tear down and exit the command loop
    Destroy,
}

/// Control input as typed by an operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    Start,
    Stop,
    Status,
    Quit,
}

#[derive(Error, Debug, PartialEq)]
#[error("Unknown command: {0} (expected start, stop, status or quit)")]
pub struct UnknownCommand(String);

impl FromStr for ControlRequest {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(ControlRequest::Start),
            "stop" => Ok(ControlRequest::Stop),
            "status" => Ok(ControlRequest::Status),
            "quit" | "exit" | "destroy" => Ok(ControlRequest::Quit),
            other => Err(UnknownCommand(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    #[serde(flatten)]
    pub state: LifecycleState,
    pub detections: SinkStats,
}

pub struct ListenerService<E: WakeWordEngine> {
    listener: WakeWordListener<E>,
    config: ServiceConfig,
}

impl<E: WakeWordEngine> ListenerService<E> {
    pub fn new(listener: WakeWordListener<E>, config: ServiceConfig) -> Self {
        Self { listener, config }
    }

    pub fn state(&self) -> &LifecycleState {
        self.listener.state()
    }

    /// Start listening with the current settings
    ///
    /// Repeated starts while already listening are no-ops.
    pub fn start(&mut self) -> LifecycleState {
        match self.config.listener_config() {
            Ok(config) => self.listener.init(config),
            Err(e) => self.listener.reject(ErrorKind::InvalidConfiguration(e.to_string())),
        }
    }

    pub fn stop(&mut self) -> LifecycleState {
        self.listener.stop()
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            state: self.listener.state().clone(),
            detections: self.listener.sink_stats(),
        }
    }

    /// Apply commands until `Destroy` arrives or every sender is gone
    ///
    /// Always tears the listener down before returning.
    pub async fn run(mut self, mut commands: mpsc::Receiver<ServiceCommand>) -> ServiceStatus {
        info!("Wake-word service running");

        while let Some(command) = commands.recv().await {
            debug!("Service command: {:?}", command);

            match command {
                ServiceCommand::Start => {
                    self.start();
                }
                ServiceCommand::Stop => {
                    self.stop();
                }
                ServiceCommand::Status(reply) => {
                    // Requester may have given up waiting
                    let _ = reply.send(self.status());
                }
                ServiceCommand::Destroy => break,
            }
        }

        self.listener.teardown();
        info!("Wake-word service stopped");
        self.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_control_requests() {
        assert_eq!("start".parse::<ControlRequest>(), Ok(ControlRequest::Start));
        assert_eq!("  STOP \n".parse::<ControlRequest>(), Ok(ControlRequest::Stop));
        assert_eq!("status".parse::<ControlRequest>(), Ok(ControlRequest::Status));
        assert_eq!("exit".parse::<ControlRequest>(), Ok(ControlRequest::Quit));
        assert_eq!(
            "listen".parse::<ControlRequest>(),
            Err(UnknownCommand("listen".to_string()))
        );
    }

    #[test]
    fn test_status_serializes_flat() {
        let status = ServiceStatus {
            state: LifecycleState::Listening,
            detections: SinkStats { dispatched: 2, discarded: 1 },
        };

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "Listening");
        assert_eq!(json["detections"]["dispatched"], 2);
    }
}
