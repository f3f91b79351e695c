//! Barge-in detection while Jarvis is speaking.
//!
//! [`VoiceActivityMonitor`] answers "is the user talking right now" for one
//! frame. [`BargeInWatcher`] runs it on a background thread while armed and
//! cancels the current turn's token the first time it says yes.

use crate::audio::AudioInput;
use crate::error::VoiceResult;
use crate::vad::SpeechClassifier;
use jarvis_core::MonitorSettings;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Volume gate followed by a speech classifier.
pub struct VoiceActivityMonitor<C> {
    input: Arc<dyn AudioInput>,
    classifier: C,
    frame_size: usize,
    volume_gate: f32,
    confidence: f32,
}

impl<C: SpeechClassifier> VoiceActivityMonitor<C> {
    pub fn new(input: Arc<dyn AudioInput>, classifier: C, settings: &MonitorSettings) -> Self {
        Self {
            input,
            classifier,
            frame_size: settings.frame_size,
            volume_gate: settings.volume_gate,
            confidence: settings.confidence,
        }
    }

    /// Consume one frame and report whether it is speech.
    ///
    /// Returns false without reading when less than a frame is buffered, and
    /// without consulting the classifier when the frame is below the volume gate.
    /// Classifier errors count as "no speech".
    pub fn poll(&mut self) -> bool {
        if self.input.available() < self.frame_size {
            return false;
        }
        let frame = self.input.read(self.frame_size);
        if frame.len() < self.frame_size {
            return false;
        }

        if mean_amplitude(&frame) < self.volume_gate {
            return false;
        }

        let normalized: Vec<f32> = frame.iter().map(|s| *s as f32 / 32768.0).collect();
        match self
            .classifier
            .speech_probability(&normalized, self.input.sample_rate())
        {
            Ok(p) => p > self.confidence,
            Err(e) => {
                debug!("Speech classifier error: {}", e);
                false
            }
        }
    }
}

/// Mean absolute amplitude. Summed in i64 so loud frames cannot overflow.
pub fn mean_amplitude(frame: &[i16]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum: i64 = frame.iter().map(|s| (*s as i64).abs()).sum();
    sum as f32 / frame.len() as f32
}

/// Something that cancels a turn when the user starts talking over Jarvis.
pub trait BargeInDetector: Send + Sync {
    /// Start watching. `token` is cancelled on detected speech.
    fn arm(&self, token: CancellationToken);
    /// Stop watching. Detection after this call never cancels the old token.
    fn disarm(&self);
}

#[derive(Default)]
struct WatchState {
    armed: Option<CancellationToken>,
    epoch: u64,
    shutdown: bool,
}

type Shared = Arc<(Mutex<WatchState>, Condvar)>;

/// Background barge-in watcher.
pub struct BargeInWatcher {
    input: Arc<dyn AudioInput>,
    shared: Shared,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl BargeInWatcher {
    /// Spawn the watcher thread. The classifier is built on that thread.
    pub fn spawn<F, C>(input: Arc<dyn AudioInput>, settings: &MonitorSettings, make_classifier: F) -> VoiceResult<Self>
    where
        F: FnOnce() -> VoiceResult<C> + Send + 'static,
        C: SpeechClassifier + 'static,
    {
        let shared: Shared = Arc::new((Mutex::new(WatchState::default()), Condvar::new()));
        let (ready_tx, ready_rx) = std_mpsc::channel::<VoiceResult<()>>();

        let thread_shared = shared.clone();
        let thread_input = input.clone();
        let settings = settings.clone();
        let thread = std::thread::Builder::new()
            .name("jarvis-barge-in".to_string())
            .spawn(move || {
                let classifier = match make_classifier() {
                    Ok(c) => {
                        let _ = ready_tx.send(Ok(()));
                        c
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let monitor = VoiceActivityMonitor::new(thread_input, classifier, &settings);
                watch_loop(monitor, thread_shared, Duration::from_millis(settings.poll_interval_ms));
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(crate::error::VoiceError::VadInit(
                    "barge-in thread exited during startup".to_string(),
                ))
            }
        }

        info!("👂 Barge-in watcher running");
        Ok(Self {
            input,
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Stop the thread and wait for it.
    pub fn shutdown(&self) {
        {
            let (lock, cvar) = &*self.shared;
            let mut state = lock.lock().unwrap_or_else(PoisonError::into_inner);
            state.shutdown = true;
            state.armed = None;
            cvar.notify_all();
        }
        if let Some(handle) = self.thread.lock().unwrap_or_else(PoisonError::into_inner).take() {
            if handle.join().is_err() {
                warn!("Barge-in thread panicked");
            }
        }
    }
}

impl BargeInDetector for BargeInWatcher {
    fn arm(&self, token: CancellationToken) {
        self.input.clear();
        let (lock, cvar) = &*self.shared;
        let mut state = lock.lock().unwrap_or_else(PoisonError::into_inner);
        state.armed = Some(token);
        state.epoch += 1;
        cvar.notify_all();
    }

    fn disarm(&self) {
        let (lock, _) = &*self.shared;
        let mut state = lock.lock().unwrap_or_else(PoisonError::into_inner);
        state.armed = None;
        state.epoch += 1;
    }
}

impl Drop for BargeInWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn watch_loop<C: SpeechClassifier>(mut monitor: VoiceActivityMonitor<C>, shared: Shared, interval: Duration) {
    let (lock, cvar) = &*shared;
    loop {
        let (token, epoch) = {
            let mut state = lock.lock().unwrap_or_else(PoisonError::into_inner);
            while state.armed.is_none() && !state.shutdown {
                state = cvar.wait(state).unwrap_or_else(PoisonError::into_inner);
            }
            if state.shutdown {
                break;
            }
            match &state.armed {
                Some(token) => (token.clone(), state.epoch),
                None => continue,
            }
        };

        if token.is_cancelled() {
            disarm_if_current(lock, epoch);
            continue;
        }

        if monitor.poll() {
            let mut state = lock.lock().unwrap_or_else(PoisonError::into_inner);
            if state.epoch == epoch {
                info!("🗣️ Barge-in detected");
                token.cancel();
                state.armed = None;
            }
            continue;
        }

        std::thread::sleep(interval);
    }
    debug!("Barge-in thread stopped");
}

fn disarm_if_current(lock: &Mutex<WatchState>, epoch: u64) {
    let mut state = lock.lock().unwrap_or_else(PoisonError::into_inner);
    if state.epoch == epoch {
        state.armed = None;
    }
}
