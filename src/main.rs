/// Wake-word listener service binary
///
/// Runs the listener in the background and takes control commands
/// (start, stop, status, quit) on stdin. Ctrl-C tears the listener down.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};
use wakeword_listener::{
    init_logging, AudioFeed, ControlRequest, DesktopNotifier, DetectionConsumer, EnergyEngine,
    EventSink, LaunchConsumer, ListenerService, LogConsumer, LogNotifier, Notifier, ServiceCommand,
    ServiceConfig, StatusReporter, WakeWordListener, FRAME_LENGTH, SAMPLE_RATE,
};

#[derive(Parser)]
#[command(name = "wakeword-service")]
#[command(about = "Background wake-word listener", long_about = None)]
struct Cli {
    /// JSON settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Feed a 16kHz mono WAV file to the engine instead of waiting for audio
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Override detection sensitivity (0.0 - 1.0)
    #[arg(long)]
    sensitivity: Option<f32>,

    /// Log notifications only
    #[arg(long)]
    no_desktop_notifications: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    let mut config = ServiceConfig::load(cli.config.as_deref())
        .context("Failed to load service configuration")?;
    if let Some(sensitivity) = cli.sensitivity {
        config.sensitivity = sensitivity;
    }
    if cli.no_desktop_notifications {
        config.desktop_notifications = false;
    }

    info!("Starting wake-word service");

    let replay = match cli.replay {
        Some(ref path) => Some(read_wav(path)?),
        None => None,
    };

    let consumer: Arc<dyn DetectionConsumer> = match config.on_detect.clone() {
        Some(command) => Arc::new(LaunchConsumer::new(command)),
        None => Arc::new(LogConsumer),
    };
    let notifier: Arc<dyn Notifier> = if config.desktop_notifications {
        Arc::new(DesktopNotifier::new("Wake Word"))
    } else {
        Arc::new(LogNotifier)
    };

    let (sink, dispatcher) = EventSink::new(consumer);
    tokio::spawn(dispatcher.run());

    let feed = AudioFeed::new();
    let engine = EnergyEngine::new(feed.clone());
    let listener = WakeWordListener::new(engine, sink, StatusReporter::new(notifier));
    let service = ListenerService::new(listener, config);

    let (commands, rx) = mpsc::channel(16);
    let service_task = tokio::spawn(service.run(rx));

    commands
        .send(ServiceCommand::Start)
        .await
        .context("Service exited before start")?;

    if let Some(samples) = replay {
        tokio::spawn(replay_samples(feed, samples));
    }

    control_loop(&commands).await;

    // Destroy may fail if the service already exited; the join below reports that
    let _ = commands.send(ServiceCommand::Destroy).await;
    let status = service_task.await.context("Service task panicked")?;

    info!(
        "Wake-word service exited (detections dispatched={}, discarded={})",
        status.detections.dispatched, status.detections.discarded
    );
    Ok(())
}

/// Forward stdin commands until quit, EOF or Ctrl-C
async fn control_loop(commands: &mpsc::Sender<ServiceCommand>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                return;
            }
            line = lines.next_line(), if stdin_open => line,
        };

        let line = match line {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => line,
            Ok(None) => {
                // Detached from a terminal; keep running until Ctrl-C
                stdin_open = false;
                continue;
            }
            Err(e) => {
                warn!("Failed to read stdin: {}", e);
                stdin_open = false;
                continue;
            }
        };

        let command = match line.parse::<ControlRequest>() {
            Ok(ControlRequest::Start) => ServiceCommand::Start,
            Ok(ControlRequest::Stop) => ServiceCommand::Stop,
            Ok(ControlRequest::Quit) => return,
            Ok(ControlRequest::Status) => {
                let (reply, response) = oneshot::channel();
                if commands.send(ServiceCommand::Status(reply)).await.is_err() {
                    return;
                }
                match response.await {
                    Ok(status) => match serde_json::to_string(&status) {
                        Ok(json) => println!("{}", json),
                        Err(e) => error!("Failed to encode status: {}", e),
                    },
                    Err(_) => return,
                }
                continue;
            }
            Err(e) => {
                warn!("{}", e);
                continue;
            }
        };

        if commands.send(command).await.is_err() {
            return;
        }
    }
}

fn read_wav(path: &Path) -> Result<Vec<i16>> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let spec = reader.spec();

    if spec.channels != 1 || spec.sample_rate as usize != SAMPLE_RATE || spec.bits_per_sample != 16 {
        bail!(
            "{} must be 16-bit mono {} Hz (got {} channel(s), {} Hz, {} bits)",
            path.display(),
            SAMPLE_RATE,
            spec.channels,
            spec.sample_rate,
            spec.bits_per_sample
        );
    }

    reader
        .samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to decode {}", path.display()))
}

/// Push samples at real-time pace
async fn replay_samples(feed: AudioFeed, samples: Vec<i16>) {
    let frame_duration = Duration::from_micros((FRAME_LENGTH * 1_000_000 / SAMPLE_RATE) as u64);
    info!("Replaying {} samples", samples.len());

    for chunk in samples.chunks(FRAME_LENGTH) {
        feed.push(chunk);
        tokio::time::sleep(frame_duration).await;
    }

    info!("Replay finished");
}
