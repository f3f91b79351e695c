//! Utterance capture: energy-based start and end of speech.

use crate::audio::AudioInput;
use crate::error::VoiceResult;
use jarvis_core::CaptureSettings;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const PRE_ROLL_MS: u64 = 300;
const MIN_PHRASE_MS: u64 = 300;
/// Calibrated threshold is this multiple of the ambient level.
const AMBIENT_MARGIN: f32 = 1.5;

/// One recorded phrase, mono i16.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl Utterance {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

#[derive(Debug)]
pub enum CaptureOutcome {
    Utterance(Utterance),
    /// Nobody started speaking within the wait timeout.
    Timeout,
    Cancelled,
}

#[derive(Debug, PartialEq)]
pub enum DetectorEvent {
    Pending,
    Complete(Vec<i16>),
    TimedOut,
}

/// Root mean square on the i16 scale.
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|s| (*s as f64) * (*s as f64)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

fn samples_for(rate: u32, duration: Duration) -> usize {
    (rate as u128 * duration.as_millis() / 1000) as usize
}

/// Pure end-of-speech state machine fed with fixed-size chunks.
pub struct UtteranceDetector {
    threshold: f32,
    pre_roll: VecDeque<i16>,
    pre_roll_len: usize,
    phrase: Vec<i16>,
    speaking: bool,
    silence: usize,
    waited: usize,
    pause: usize,
    phrase_limit: usize,
    wait_limit: usize,
    min_phrase: usize,
}

impl UtteranceDetector {
    pub fn new(sample_rate: u32, threshold: f32, settings: &CaptureSettings) -> Self {
        let pre_roll_len = samples_for(sample_rate, Duration::from_millis(PRE_ROLL_MS));
        Self {
            threshold,
            pre_roll: VecDeque::with_capacity(pre_roll_len),
            pre_roll_len,
            phrase: Vec::new(),
            speaking: false,
            silence: 0,
            waited: 0,
            pause: samples_for(sample_rate, settings.pause()),
            phrase_limit: samples_for(sample_rate, settings.phrase_limit()),
            wait_limit: samples_for(sample_rate, settings.wait_timeout()),
            min_phrase: samples_for(sample_rate, Duration::from_millis(MIN_PHRASE_MS)),
        }
    }

    pub fn push(&mut self, chunk: &[i16]) -> DetectorEvent {
        let loud = rms(chunk) > self.threshold;

        if !self.speaking {
            if loud {
                self.speaking = true;
                self.silence = 0;
                self.phrase = self.pre_roll.drain(..).collect();
                self.phrase.extend_from_slice(chunk);
                return self.check_limit();
            }
            self.waited += chunk.len();
            self.pre_roll.extend(chunk.iter().copied());
            let overflow = self.pre_roll.len().saturating_sub(self.pre_roll_len);
            if overflow > 0 {
                self.pre_roll.drain(..overflow);
            }
            if self.waited >= self.wait_limit {
                self.waited = 0;
                self.pre_roll.clear();
                return DetectorEvent::TimedOut;
            }
            return DetectorEvent::Pending;
        }

        self.phrase.extend_from_slice(chunk);
        if loud {
            self.silence = 0;
        } else {
            self.silence += chunk.len();
        }

        if self.silence >= self.pause {
            let voiced = self.phrase.len().saturating_sub(self.silence);
            if voiced < self.min_phrase {
                debug!("Discarding {} sample blip", voiced);
                self.speaking = false;
                self.phrase.clear();
                self.silence = 0;
                return DetectorEvent::Pending;
            }
            return self.complete();
        }
        self.check_limit()
    }

    fn check_limit(&mut self) -> DetectorEvent {
        if self.phrase.len() >= self.phrase_limit {
            return self.complete();
        }
        DetectorEvent::Pending
    }

    fn complete(&mut self) -> DetectorEvent {
        self.speaking = false;
        self.silence = 0;
        self.waited = 0;
        DetectorEvent::Complete(std::mem::take(&mut self.phrase))
    }
}

/// Records one utterance at a time from the shared microphone.
pub struct UtteranceRecorder {
    input: Arc<dyn AudioInput>,
    settings: CaptureSettings,
    threshold: f32,
}

impl UtteranceRecorder {
    pub fn new(input: Arc<dyn AudioInput>, settings: CaptureSettings) -> Self {
        let threshold = settings.energy_threshold;
        Self {
            input,
            settings,
            threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Measure ambient noise and raise the energy threshold above it.
    pub async fn calibrate(&mut self) -> VoiceResult<f32> {
        let rate = self.input.sample_rate();
        let wanted = samples_for(rate, Duration::from_millis(self.settings.calibration_ms));
        let deadline = tokio::time::Instant::now() + Duration::from_millis(self.settings.calibration_ms * 2);

        self.input.start();
        while self.input.available() < wanted && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(self.settings.chunk_ms)).await;
        }
        let ambient = rms(&self.input.read(wanted));
        self.input.stop();

        self.threshold = self.settings.energy_threshold.max(ambient * AMBIENT_MARGIN);
        info!("🎚️ Ambient level {:.0}, energy threshold {:.0}", ambient, self.threshold);
        Ok(self.threshold)
    }

    /// Listen until a phrase ends, nobody speaks within the wait timeout, or `cancel` fires.
    pub async fn record(&self, cancel: &CancellationToken) -> VoiceResult<CaptureOutcome> {
        let rate = self.input.sample_rate();
        let chunk = samples_for(rate, Duration::from_millis(self.settings.chunk_ms)).max(1);
        let tick = Duration::from_millis(self.settings.chunk_ms.max(1));
        let mut detector = UtteranceDetector::new(rate, self.threshold, &self.settings);

        self.input.start();
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(CaptureOutcome::Cancelled),
                () = tokio::time::sleep(tick) => {}
            }

            while self.input.available() >= chunk {
                let samples = self.input.read(chunk);
                match detector.push(&samples) {
                    DetectorEvent::Pending => {}
                    DetectorEvent::TimedOut => return Ok(CaptureOutcome::Timeout),
                    DetectorEvent::Complete(samples) => {
                        return Ok(CaptureOutcome::Utterance(Utterance {
                            samples,
                            sample_rate: rate,
                        }))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16000;
    // 30ms chunks
    const CHUNK: usize = 480;

    fn settings() -> CaptureSettings {
        CaptureSettings::default()
    }

    fn feed(detector: &mut UtteranceDetector, level: i16, chunks: usize) -> Vec<DetectorEvent> {
        (0..chunks)
            .map(|i| {
                let sign = if i % 2 == 0 { 1 } else { -1 };
                detector.push(&[level * sign; CHUNK])
            })
            .filter(|e| *e != DetectorEvent::Pending)
            .collect()
    }

    #[test]
    fn test_rms() {
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(rms(&[300, -300]), 300.0);
    }

    #[test]
    fn test_silence_times_out() {
        let mut detector = UtteranceDetector::new(RATE, 300.0, &settings());
        // 2s wait timeout = 67 chunks of 30ms
        let events = feed(&mut detector, 0, 70);
        assert_eq!(events, vec![DetectorEvent::TimedOut]);
    }

    #[test]
    fn test_phrase_ends_after_pause() {
        let mut detector = UtteranceDetector::new(RATE, 300.0, &settings());
        assert!(feed(&mut detector, 10, 5).is_empty());
        assert!(feed(&mut detector, 2000, 20).is_empty());
        // 1s pause = 34 chunks
        let events = feed(&mut detector, 10, 40);
        assert_eq!(events.len(), 1);
        match &events[0] {
            DetectorEvent::Complete(samples) => {
                // pre-roll + speech + trailing pause
                assert!(samples.len() >= 20 * CHUNK + 16000);
                assert!(samples.len() <= 20 * CHUNK + 16000 + 5 * CHUNK + CHUNK);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_phrase_limit_cuts_long_speech() {
        let mut detector = UtteranceDetector::new(RATE, 300.0, &settings());
        let events = feed(&mut detector, 2000, 400);
        assert!(!events.is_empty());
        match &events[0] {
            DetectorEvent::Complete(samples) => assert!(samples.len() >= 160_000 && samples.len() < 160_000 + CHUNK),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_short_blip_is_ignored() {
        let mut detector = UtteranceDetector::new(RATE, 300.0, &settings());
        assert!(feed(&mut detector, 2000, 2).is_empty());
        let events = feed(&mut detector, 0, 34);
        assert!(events.iter().all(|e| !matches!(e, DetectorEvent::Complete(_))));
    }

    #[test]
    fn test_utterance_duration() {
        let u = Utterance {
            samples: vec![0; 8000],
            sample_rate: RATE,
        };
        assert_eq!(u.duration(), Duration::from_millis(500));
    }
}
