//! Barge-in: the volume gate, the confidence threshold and the watcher thread.

mod common;

use common::loud_frame;
use jarvis_core::MonitorSettings;
use jarvis_voice::{
    AudioInput, BargeInDetector, BargeInWatcher, SampleQueue, SpeechClassifier, VoiceActivityMonitor, VoiceResult,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct FixedClassifier {
    probability: f32,
    calls: Arc<AtomicUsize>,
}

impl SpeechClassifier for FixedClassifier {
    fn speech_probability(&mut self, _frame: &[f32], _sample_rate: u32) -> VoiceResult<f32> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.probability)
    }
}

fn started_queue() -> Arc<SampleQueue> {
    let queue = Arc::new(SampleQueue::new(16000));
    queue.start();
    queue
}

fn monitor(queue: &Arc<SampleQueue>, probability: f32) -> (VoiceActivityMonitor<FixedClassifier>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let classifier = FixedClassifier {
        probability,
        calls: calls.clone(),
    };
    (
        VoiceActivityMonitor::new(queue.clone(), classifier, &MonitorSettings::default()),
        calls,
    )
}

#[test]
fn test_quiet_frame_never_reaches_classifier() {
    let queue = started_queue();
    let (mut monitor, calls) = monitor(&queue, 1.0);

    queue.push(&loud_frame(512, 1000));
    assert!(!monitor.poll());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(queue.available(), 0);
}

#[test]
fn test_partial_frame_is_left_alone() {
    let queue = started_queue();
    let (mut monitor, calls) = monitor(&queue, 1.0);

    queue.push(&loud_frame(300, 5000));
    assert!(!monitor.poll());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(queue.available(), 300);
}

#[test]
fn test_confidence_must_be_exceeded() {
    let queue = started_queue();

    let (mut confident, calls) = monitor(&queue, 0.95);
    queue.push(&loud_frame(512, 5000));
    assert!(confident.poll());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let (mut borderline, calls) = monitor(&queue, 0.9);
    queue.push(&loud_frame(512, 5000));
    assert!(!borderline.poll());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

fn watcher(queue: &Arc<SampleQueue>, probability: f32) -> BargeInWatcher {
    let input: Arc<dyn AudioInput> = queue.clone();
    BargeInWatcher::spawn(input, &MonitorSettings::default(), move || {
        Ok(FixedClassifier {
            probability,
            calls: Arc::new(AtomicUsize::new(0)),
        })
    })
    .unwrap()
}

#[tokio::test]
async fn test_watcher_cancels_on_speech() {
    let queue = started_queue();
    let watcher = watcher(&queue, 1.0);

    let token = CancellationToken::new();
    watcher.arm(token.clone());
    queue.push(&loud_frame(512, 5000));

    tokio::time::timeout(Duration::from_secs(2), token.cancelled())
        .await
        .expect("barge-in should fire");
    watcher.shutdown();
}

#[tokio::test]
async fn test_disarmed_watcher_stays_quiet() {
    let queue = started_queue();
    let watcher = watcher(&queue, 1.0);

    let token = CancellationToken::new();
    watcher.arm(token.clone());
    watcher.disarm();
    queue.push(&loud_frame(2048, 5000));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!token.is_cancelled());
    watcher.shutdown();
}

#[tokio::test]
async fn test_background_noise_does_not_interrupt() {
    let queue = started_queue();
    let watcher = watcher(&queue, 0.5);

    let token = CancellationToken::new();
    watcher.arm(token.clone());
    for _ in 0..4 {
        queue.push(&loud_frame(512, 5000));
    }

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!token.is_cancelled());
    watcher.shutdown();
}

#[test]
fn test_classifier_failure_aborts_spawn() {
    let queue = started_queue();
    let input: Arc<dyn AudioInput> = queue;
    let result = BargeInWatcher::spawn(input, &MonitorSettings::default(), || -> VoiceResult<FixedClassifier> {
        Err(jarvis_voice::VoiceError::VadInit("no model".into()))
    });
    assert!(result.is_err());
}
