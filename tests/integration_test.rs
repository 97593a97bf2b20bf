/// Integration tests for the wake-word listener
///
/// Drives the listener end to end with the reference engine and synthetic
/// audio pushed through its feed.

use async_trait::async_trait;
use std::f32::consts::PI;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use wakeword_listener::{
    AudioFeed, DetectionConsumer, DetectionEvent, EnergyEngine, ErrorKind, EventSink,
    LifecycleState, ListenerConfig, ListenerService, Notification, NotificationId, Notifier,
    OnDetectCommand, ServiceCommand, ServiceConfig, Severity, StatusReporter, WakeWordListener,
    FRAME_LENGTH, SAMPLE_RATE,
};

/// Generate synthetic audio tone
fn generate_tone(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<i16> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;

    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            let sample = amplitude * (2.0 * PI * frequency * t).sin();
            (sample * i16::MAX as f32) as i16
        })
        .collect()
}

/// Loud half-second burst standing in for a spoken wake word
fn generate_wake_word() -> Vec<i16> {
    generate_tone(700.0, 0.5, 0.8)
}

#[derive(Default)]
struct RecordingNotifier {
    shown: Mutex<Vec<Notification>>,
    dismissed: Mutex<Vec<NotificationId>>,
}

impl RecordingNotifier {
    fn alerts(&self) -> Vec<Notification> {
        self.shown
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.id == NotificationId::Error)
            .cloned()
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn show(&self, notification: &Notification) {
        self.shown.lock().unwrap().push(notification.clone());
    }

    fn dismiss(&self, id: NotificationId) {
        self.dismissed.lock().unwrap().push(id);
    }
}

struct ChannelConsumer(mpsc::UnboundedSender<DetectionEvent>);

#[async_trait]
impl DetectionConsumer for ChannelConsumer {
    async fn on_wake_word(&self, event: DetectionEvent) {
        let _ = self.0.send(event);
    }
}

struct Harness {
    listener: WakeWordListener<EnergyEngine>,
    feed: AudioFeed,
    notifier: Arc<RecordingNotifier>,
    events: mpsc::UnboundedReceiver<DetectionEvent>,
}

fn harness() -> Harness {
    let (tx, events) = mpsc::unbounded_channel();
    let (sink, dispatcher) = EventSink::new(Arc::new(ChannelConsumer(tx)));
    tokio::spawn(dispatcher.run());

    let feed = AudioFeed::new();
    let notifier = Arc::new(RecordingNotifier::default());
    let listener = WakeWordListener::new(
        EnergyEngine::new(feed.clone()),
        sink,
        StatusReporter::new(notifier.clone()),
    );

    Harness {
        listener,
        feed,
        notifier,
        events,
    }
}

fn resources() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("keyword.ppn"), b"keyword").unwrap();
    std::fs::write(dir.path().join("model.pv"), b"model").unwrap();
    dir
}

fn config_in(dir: &Path, access_key: &str, sensitivity: f32) -> ListenerConfig {
    ListenerConfig::new(
        access_key,
        dir.join("keyword.ppn"),
        dir.join("model.pv"),
        sensitivity,
    )
}

async fn push_realtime(feed: &AudioFeed, audio: &[i16]) {
    for chunk in audio.chunks(FRAME_LENGTH) {
        feed.push(chunk);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

#[tokio::test]
async fn test_detection_scenario_end_to_end() {
    let dir = resources();
    let mut h = harness();

    assert_eq!(
        h.listener.init(config_in(dir.path(), "valid", 0.7)),
        LifecycleState::Listening
    );

    let mut audio = vec![0i16; SAMPLE_RATE / 2];
    audio.extend(generate_wake_word());
    audio.extend(vec![0i16; SAMPLE_RATE / 2]);
    push_realtime(&h.feed, &audio).await;

    let event = timeout(Duration::from_secs(2), h.events.recv())
        .await
        .expect("no detection")
        .unwrap();
    assert_eq!(event.keyword_index, 0);
    assert_eq!(h.listener.state(), &LifecycleState::Listening);

    assert_eq!(h.listener.stop(), LifecycleState::Stopped);
    assert!(h.events.try_recv().is_err());
    assert_eq!(h.listener.sink_stats().dispatched, 1);

    let shown = h.notifier.shown.lock().unwrap().clone();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].id, NotificationId::Listening);
    assert_eq!(*h.notifier.dismissed.lock().unwrap(), vec![NotificationId::Listening]);
}

#[tokio::test]
async fn test_empty_credential_scenario() {
    let dir = resources();
    let mut h = harness();

    let state = h.listener.init(config_in(dir.path(), "", 0.7));
    assert!(matches!(
        state,
        LifecycleState::Failed(ErrorKind::InvalidConfiguration(_))
    ));

    let alerts = h.notifier.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, Severity::High);
    assert_eq!(alerts[0].body, "Access key is required");
}

#[tokio::test]
async fn test_missing_model_file_is_invalid_configuration() {
    let dir = resources();
    std::fs::remove_file(dir.path().join("model.pv")).unwrap();
    let mut h = harness();

    match h.listener.init(config_in(dir.path(), "valid", 0.7)) {
        LifecycleState::Failed(ErrorKind::InvalidConfiguration(msg)) => {
            assert!(msg.contains("Model file not found"))
        }
        other => panic!("Expected InvalidConfiguration, got {:?}", other),
    }

    // Teardown after failure is quiet
    h.listener.teardown();
    assert_eq!(h.notifier.alerts().len(), 1);
}

#[tokio::test]
async fn test_no_detection_on_silence_or_quiet_speech() {
    let dir = resources();
    let mut h = harness();
    h.listener.init(config_in(dir.path(), "valid", 0.7));

    let mut audio = vec![0i16; SAMPLE_RATE];
    audio.extend(generate_tone(300.0, 0.5, 0.05));
    push_realtime(&h.feed, &audio).await;

    assert!(timeout(Duration::from_millis(200), h.events.recv()).await.is_err());
    h.listener.stop();
    assert_eq!(h.listener.sink_stats().dispatched, 0);
}

#[tokio::test]
async fn test_one_detection_per_utterance() {
    let dir = resources();
    let mut h = harness();
    h.listener.init(config_in(dir.path(), "valid", 0.7));

    let silence = vec![0i16; SAMPLE_RATE];
    let mut audio = Vec::new();
    for _ in 0..2 {
        audio.extend(generate_wake_word());
        audio.extend_from_slice(&silence);
    }
    push_realtime(&h.feed, &audio).await;

    for _ in 0..2 {
        timeout(Duration::from_secs(2), h.events.recv())
            .await
            .expect("missing detection")
            .unwrap();
    }
    assert!(timeout(Duration::from_millis(200), h.events.recv()).await.is_err());
}

#[tokio::test]
async fn test_audio_after_stop_is_ignored() {
    let dir = resources();
    let mut h = harness();
    h.listener.init(config_in(dir.path(), "valid", 0.7));
    h.listener.stop();

    push_realtime(&h.feed, &generate_wake_word()).await;

    assert!(timeout(Duration::from_millis(200), h.events.recv()).await.is_err());
    assert_eq!(h.listener.sink_stats().dispatched, 0);
}

#[tokio::test]
async fn test_wav_replay_detection() {
    let dir = resources();
    let wav_path = dir.path().join("wake.wav");

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE as u32,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&wav_path, spec).unwrap();
    for sample in generate_wake_word() {
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();

    let samples: Vec<i16> = hound::WavReader::open(&wav_path)
        .unwrap()
        .samples::<i16>()
        .collect::<Result<_, _>>()
        .unwrap();

    let mut h = harness();
    h.listener.init(config_in(dir.path(), "valid", 0.7));
    push_realtime(&h.feed, &samples).await;

    assert!(timeout(Duration::from_secs(2), h.events.recv()).await.unwrap().is_some());
}

#[tokio::test]
async fn test_service_command_loop() {
    let dir = resources();
    let (tx, mut events) = mpsc::unbounded_channel();
    let (sink, dispatcher) = EventSink::new(Arc::new(ChannelConsumer(tx)));
    tokio::spawn(dispatcher.run());

    let feed = AudioFeed::new();
    let notifier = Arc::new(RecordingNotifier::default());
    let listener = WakeWordListener::new(
        EnergyEngine::new(feed.clone()),
        sink,
        StatusReporter::new(notifier.clone()),
    );

    let config = ServiceConfig {
        access_key: Some("valid".to_string()),
        keyword_path: dir.path().join("keyword.ppn"),
        model_path: dir.path().join("model.pv"),
        on_detect: None::<OnDetectCommand>,
        desktop_notifications: false,
        ..Default::default()
    };

    let (commands, rx) = mpsc::channel(8);
    let service = tokio::spawn(ListenerService::new(listener, config).run(rx));

    // Repeated starts are harmless
    commands.send(ServiceCommand::Start).await.unwrap();
    commands.send(ServiceCommand::Start).await.unwrap();

    let (reply, status) = oneshot::channel();
    commands.send(ServiceCommand::Status(reply)).await.unwrap();
    assert_eq!(status.await.unwrap().state, LifecycleState::Listening);

    push_realtime(&feed, &generate_wake_word()).await;
    assert!(timeout(Duration::from_secs(2), events.recv()).await.unwrap().is_some());

    commands.send(ServiceCommand::Destroy).await.unwrap();
    let final_status = timeout(Duration::from_secs(2), service).await.unwrap().unwrap();

    assert_eq!(final_status.state, LifecycleState::Stopped);
    assert_eq!(final_status.detections.dispatched, 1);
    assert!(notifier.alerts().is_empty());
}

#[tokio::test]
async fn test_service_without_access_key_fails_once() {
    let (sink, dispatcher) = EventSink::new(Arc::new(wakeword_listener::LogConsumer));
    tokio::spawn(dispatcher.run());

    let notifier = Arc::new(RecordingNotifier::default());
    let listener = WakeWordListener::new(
        EnergyEngine::new(AudioFeed::new()),
        sink,
        StatusReporter::new(notifier.clone()),
    );
    let mut service = ListenerService::new(listener, ServiceConfig::default());

    assert_eq!(
        service.start(),
        LifecycleState::Failed(ErrorKind::InvalidConfiguration(
            "Access key not found".to_string()
        ))
    );

    let alerts = notifier.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].body, "Access key not found");
}
