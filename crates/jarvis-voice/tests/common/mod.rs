//! Test doubles for the voice pipeline: no audio hardware, no network.

#![allow(dead_code)]

use async_trait::async_trait;
use jarvis_core::{
    BackendReply, BackendRequest, CoreError, CoreResult, LlmBackend, ToolExecutor, ToolRequest, ToolSpec,
};
use jarvis_voice::{
    AudioInput, AudioOutput, BargeInDetector, DeviceFactory, SampleQueue, SynthesisEngine, SynthesisSession,
    VoiceError, VoiceResult,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Token slot shared between the barge-in double and the output double.
pub type TokenSlot = Arc<Mutex<Option<CancellationToken>>>;

/// Records writes. Optionally "hears" the user after N writes by cancelling
/// whatever token the barge-in double was armed with.
#[derive(Default)]
pub struct RecordingOutput {
    pub writes: Mutex<Vec<Vec<u8>>>,
    pub flushes: AtomicUsize,
    pub cancel_after: Mutex<Option<usize>>,
    pub slot: TokenSlot,
}

impl RecordingOutput {
    pub fn new(slot: TokenSlot) -> Arc<Self> {
        Arc::new(Self {
            slot,
            ..Self::default()
        })
    }

    pub fn interrupt_after(&self, writes: Option<usize>) {
        *self.cancel_after.lock().unwrap() = writes;
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

impl AudioOutput for RecordingOutput {
    fn write(&self, pcm: &[u8]) -> VoiceResult<()> {
        let count = {
            let mut writes = self.writes.lock().unwrap();
            writes.push(pcm.to_vec());
            writes.len()
        };
        if *self.cancel_after.lock().unwrap() == Some(count) {
            if let Some(token) = self.slot.lock().unwrap().as_ref() {
                token.cancel();
            }
        }
        Ok(())
    }

    fn flush(&self) -> VoiceResult<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_playing(&self) -> bool {
        false
    }

    fn sample_rate(&self) -> u32 {
        24000
    }
}

/// Hands the shared [`RecordingOutput`] to the device layer.
pub struct SharedOutput(pub Arc<RecordingOutput>);

impl AudioOutput for SharedOutput {
    fn write(&self, pcm: &[u8]) -> VoiceResult<()> {
        self.0.write(pcm)
    }

    fn flush(&self) -> VoiceResult<()> {
        self.0.flush()
    }

    fn is_playing(&self) -> bool {
        self.0.is_playing()
    }

    fn sample_rate(&self) -> u32 {
        self.0.sample_rate()
    }
}

/// Stores the armed token so the output double can cancel it.
pub struct SlotBargeIn {
    pub slot: TokenSlot,
    pub arms: AtomicUsize,
}

impl SlotBargeIn {
    pub fn new(slot: TokenSlot) -> Arc<Self> {
        Arc::new(Self {
            slot,
            arms: AtomicUsize::new(0),
        })
    }
}

impl BargeInDetector for SlotBargeIn {
    fn arm(&self, token: CancellationToken) {
        self.arms.fetch_add(1, Ordering::SeqCst);
        *self.slot.lock().unwrap() = Some(token);
    }

    fn disarm(&self) {
        *self.slot.lock().unwrap() = None;
    }
}

/// Yields `frames_per_unit` frames per unit; each frame is tagged with the unit's position.
pub struct FrameEngine {
    pub frames_per_unit: usize,
    pub opened: Mutex<Vec<String>>,
}

impl FrameEngine {
    pub fn new(frames_per_unit: usize) -> Arc<Self> {
        Arc::new(Self {
            frames_per_unit,
            opened: Mutex::new(Vec::new()),
        })
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

impl SynthesisEngine for FrameEngine {
    fn open(&self, text: &str, _voice: &str) -> SynthesisSession {
        let tag = {
            let mut opened = self.opened.lock().unwrap();
            opened.push(text.to_string());
            (opened.len() - 1) as u8
        };
        let (tx, rx) = mpsc::channel(self.frames_per_unit.max(1));
        for _ in 0..self.frames_per_unit {
            tx.try_send(vec![tag, tag]).unwrap();
        }
        SynthesisSession::new(rx, CancellationToken::new())
    }
}

/// Synthesis server that is down.
pub struct DeadEngine;

impl SynthesisEngine for DeadEngine {
    fn open(&self, _text: &str, _voice: &str) -> SynthesisSession {
        SynthesisSession::empty()
    }
}

/// Counts device opens; can be told to fail.
pub struct FakeDevices {
    pub output: Arc<RecordingOutput>,
    pub inputs: AtomicUsize,
    pub outputs: AtomicUsize,
    pub fail: AtomicBool,
}

impl FakeDevices {
    pub fn new(output: Arc<RecordingOutput>) -> Arc<Self> {
        Arc::new(Self {
            output,
            inputs: AtomicUsize::new(0),
            outputs: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        })
    }
}

impl DeviceFactory for FakeDevices {
    fn open_input(&self, _index: Option<usize>) -> VoiceResult<Box<dyn AudioInput>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(VoiceError::AudioDevice("device unplugged".into()));
        }
        self.inputs.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SampleQueue::new(16000)))
    }

    fn open_output(&self) -> VoiceResult<Box<dyn AudioOutput>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(VoiceError::AudioDevice("device unplugged".into()));
        }
        self.outputs.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SharedOutput(self.output.clone())))
    }
}

/// Answers every request with the same chunks.
pub struct EchoBackend {
    pub chunks: Vec<String>,
    pub calls: AtomicUsize,
}

impl EchoBackend {
    pub fn new(chunks: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmBackend for EchoBackend {
    fn name(&self) -> &str {
        "echo"
    }

    async fn respond(&self, _request: &BackendRequest<'_>) -> CoreResult<BackendReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.chunks.is_empty() {
            return Err(CoreError::Backend("no script".into()));
        }
        let items: Vec<CoreResult<String>> = self.chunks.iter().cloned().map(Ok).collect();
        Ok(BackendReply::Answer(Box::pin(futures::stream::iter(items))))
    }
}

pub struct NoTools;

#[async_trait]
impl ToolExecutor for NoTools {
    fn specs(&self) -> Vec<ToolSpec> {
        Vec::new()
    }

    async fn execute(&self, request: &ToolRequest) -> String {
        format!("Unknown tool '{}'.", request.name)
    }
}

pub fn loud_frame(len: usize, level: i16) -> Vec<i16> {
    (0..len).map(|i| if i % 2 == 0 { level } else { -level }).collect()
}
