/// Reference wake-word engine
///
/// Stands in for a proprietary keyword-spotting engine. It fires when the
/// audio pushed into its `AudioFeed` stays above an energy threshold for a
/// few consecutive frames, then ignores input for a refractory window so a
/// single utterance produces a single detection. Good enough to drive the
/// service end to end; not a keyword recognizer.

use super::audio_feed::{AudioFeed, AudioSample, FRAME_LENGTH, SAMPLE_RATE};
use super::{DetectionCallback, EngineHandle, WakeWordEngine};
use crate::config::ListenerConfig;
use crate::error::EngineError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info, trace, warn};

/// Tuning for the reference engine
#[derive(Debug, Clone)]
pub struct EnergyEngineConfig {
    /// Samples analysed per tick
    pub frame_length: usize,

    /// Consecutive loud frames needed to fire (3 frames = ~96ms)
    pub trigger_frames: usize,

    /// Frames ignored after a detection
    pub refractory_frames: usize,

    /// Sleep between polls when the feed has less than one frame
    pub poll_interval: Duration,
}

impl Default for EnergyEngineConfig {
    fn default() -> Self {
        Self {
            frame_length: FRAME_LENGTH,
            trigger_frames: 3,
            refractory_frames: SAMPLE_RATE / FRAME_LENGTH, // ~1 second
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// RMS threshold for a given sensitivity; higher sensitivity fires on quieter input
pub fn rms_threshold(sensitivity: f32) -> f32 {
    0.5 - 0.45 * sensitivity.clamp(0.0, 1.0)
}

/// Normalized RMS energy of a frame (0.0 - 1.0)
pub fn frame_rms(frame: &[AudioSample]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = frame
        .iter()
        .map(|&s| {
            let normalized = s as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    (sum_squares / frame.len() as f64).sqrt() as f32
}

/// Per-frame trigger state
#[derive(Debug)]
struct TriggerDetector {
    threshold: f32,
    trigger_frames: usize,
    refractory_frames: usize,
    loud_run: usize,
    cooldown: usize,
}

impl TriggerDetector {
    fn new(threshold: f32, settings: &EnergyEngineConfig) -> Self {
        Self {
            threshold,
            trigger_frames: settings.trigger_frames.max(1),
            refractory_frames: settings.refractory_frames,
            loud_run: 0,
            cooldown: 0,
        }
    }

    /// Returns true on the frame that completes a detection
    fn process(&mut self, frame: &[AudioSample]) -> bool {
        if self.cooldown > 0 {
            self.cooldown -= 1;
            return false;
        }

        let rms = frame_rms(frame);
        trace!("Frame rms={:.4} threshold={:.4}", rms, self.threshold);

        if rms < self.threshold {
            self.loud_run = 0;
            return false;
        }

        self.loud_run += 1;
        if self.loud_run < self.trigger_frames {
            return false;
        }

        self.loud_run = 0;
        self.cooldown = self.refractory_frames;
        true
    }
}

/// Energy-threshold engine reading from an `AudioFeed`
pub struct EnergyEngine {
    feed: AudioFeed,
    settings: EnergyEngineConfig,
}

impl EnergyEngine {
    pub fn new(feed: AudioFeed) -> Self {
        Self::with_settings(feed, EnergyEngineConfig::default())
    }

    pub fn with_settings(feed: AudioFeed, settings: EnergyEngineConfig) -> Self {
        Self { feed, settings }
    }

    /// Host side of the engine's input
    pub fn feed(&self) -> AudioFeed {
        self.feed.clone()
    }
}

impl WakeWordEngine for EnergyEngine {
    fn create(
        &mut self,
        config: &ListenerConfig,
        on_detection: DetectionCallback,
    ) -> Result<Box<dyn EngineHandle>, EngineError> {
        config
            .validate()
            .map_err(|e| EngineError::InvalidArgument(e.to_string()))?;

        if self.settings.frame_length == 0 {
            return Err(EngineError::InvalidArgument(
                "Frame length must be greater than 0".to_string(),
            ));
        }

        for (label, path) in [("Keyword", config.keyword_path()), ("Model", config.model_path())] {
            if !path.exists() {
                return Err(EngineError::InvalidArgument(format!(
                    "{} file not found: {}",
                    label,
                    path.display()
                )));
            }
        }

        let threshold = rms_threshold(config.sensitivity());
        info!(
            "Energy engine created (sensitivity={}, rms threshold={:.3})",
            config.sensitivity(),
            threshold
        );

        Ok(Box::new(EnergyHandle {
            feed: self.feed.clone(),
            settings: self.settings.clone(),
            threshold,
            on_detection,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }))
    }
}

struct EnergyHandle {
    feed: AudioFeed,
    settings: EnergyEngineConfig,
    threshold: f32,
    on_detection: DetectionCallback,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl EngineHandle for EnergyHandle {
    fn start(&mut self) -> Result<(), EngineError> {
        if self.worker.is_some() {
            warn!("Energy engine already running");
            return Ok(());
        }

        // Stale audio from before start must not trigger a detection
        self.feed.clear();
        self.running.store(true, Ordering::Release);

        let feed = self.feed.clone();
        let running = Arc::clone(&self.running);
        let callback = Arc::clone(&self.on_detection);
        let settings = self.settings.clone();
        let detector = TriggerDetector::new(self.threshold, &settings);

        let worker = thread::Builder::new()
            .name("wakeword-engine".to_string())
            .spawn(move || listen(feed, settings, detector, callback, running))
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                EngineError::Failure(format!("Failed to spawn listening thread: {}", e))
            })?;

        self.worker = Some(worker);
        debug!("Energy engine listening loop scheduled");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.running.store(false, Ordering::Release);

        match self.worker.take() {
            Some(worker) => join_worker(worker)
                .map_err(|_| EngineError::Failure("Listening thread panicked".to_string())),
            None => Ok(()),
        }
    }

    fn release(mut self: Box<Self>) -> Result<(), EngineError> {
        let stopped = self.stop();
        self.feed.clear();
        debug!("Energy engine released");
        stopped
    }
}

impl Drop for EnergyHandle {
    fn drop(&mut self) {
        // Let a leaked worker wind down on its own
        self.running.store(false, Ordering::Release);
    }
}

/// Wait for the listening loop to notice `running` is cleared
///
/// The wait is bounded by one poll interval plus one frame. On a
/// multi-threaded runtime the join runs under `block_in_place`; a
/// current-thread runtime just blocks.
fn join_worker(worker: JoinHandle<()>) -> thread::Result<()> {
    match Handle::try_current() {
        Ok(runtime) if runtime.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| worker.join())
        }
        _ => worker.join(),
    }
}

fn listen(
    feed: AudioFeed,
    settings: EnergyEngineConfig,
    mut detector: TriggerDetector,
    on_detection: DetectionCallback,
    running: Arc<AtomicBool>,
) {
    let mut frames: u64 = 0;

    while running.load(Ordering::Acquire) {
        let frame = match feed.pop_frame(settings.frame_length) {
            Ok(frame) => frame,
            Err(_) => {
                thread::sleep(settings.poll_interval);
                continue;
            }
        };

        frames += 1;
        if detector.process(&frame) {
            debug!("Wake word detected after {} frames", frames);
            on_detection(0);
        }
    }

    debug!("Listening loop exited after {} frames", frames);
}
