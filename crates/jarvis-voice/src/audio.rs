//! Audio capture and playback using CPAL and Rodio
//!
//! Both cpal streams and rodio output streams are !Send, so each one lives on
//! a dedicated thread that owns it for its whole life. The handles returned
//! here only talk to those threads through shared buffers and channels.

use crate::error::{VoiceError, VoiceResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStreamHandle, Sink};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// Keep at most this much unread microphone audio.
const MAX_BUFFERED_SECS: usize = 30;

/// Microphone handle shared by the recorder and the barge-in monitor.
pub trait AudioInput: Send + Sync {
    /// Begin collecting samples. Clears anything left from before.
    fn start(&self);
    /// Stop collecting; incoming audio is discarded until the next `start`.
    fn stop(&self);
    fn is_active(&self) -> bool;
    /// Samples waiting to be read.
    fn available(&self) -> usize;
    /// Take up to `max` samples, oldest first.
    fn read(&self, max: usize) -> Vec<i16>;
    fn clear(&self);
    /// Rate of the samples returned by `read`.
    fn sample_rate(&self) -> u32;
}

/// Speaker handle. `write` takes raw 16-bit little-endian mono PCM.
pub trait AudioOutput: Send + Sync {
    fn write(&self, pcm: &[u8]) -> VoiceResult<()>;
    /// Drop everything queued and stop sound immediately.
    fn flush(&self) -> VoiceResult<()>;
    fn is_playing(&self) -> bool;
    fn sample_rate(&self) -> u32;
}

/// Thread-safe FIFO of mono i16 samples with an active gate.
///
/// This is what the capture thread writes into; it is also usable directly
/// as an [`AudioInput`] fed by [`SampleQueue::push`].
pub struct SampleQueue {
    samples: Mutex<VecDeque<i16>>,
    active: AtomicBool,
    sample_rate: u32,
    capacity: usize,
}

impl SampleQueue {
    pub fn new(sample_rate: u32) -> Self {
        let capacity = sample_rate as usize * MAX_BUFFERED_SECS;
        Self {
            samples: Mutex::new(VecDeque::with_capacity(sample_rate as usize)),
            active: AtomicBool::new(false),
            sample_rate,
            capacity,
        }
    }

    /// Append samples if the queue is active. Oldest samples are dropped past capacity.
    pub fn push(&self, samples: &[i16]) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        let mut queue = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        queue.extend(samples.iter().copied());
        let overflow = queue.len().saturating_sub(self.capacity);
        if overflow > 0 {
            queue.drain(..overflow);
        }
    }
}

impl AudioInput for SampleQueue {
    fn start(&self) {
        self.clear();
        self.active.store(true, Ordering::Release);
    }

    fn stop(&self) {
        self.active.store(false, Ordering::Release);
        self.clear();
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn available(&self) -> usize {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn read(&self, max: usize) -> Vec<i16> {
        let mut queue = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        let n = max.min(queue.len());
        queue.drain(..n).collect()
    }

    fn clear(&self) {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Downmixes interleaved frames to mono and linearly resamples to the target rate.
struct Resampler {
    channels: usize,
    step: f64,
    pos: f64,
}

impl Resampler {
    fn new(channels: u16, input_rate: u32, output_rate: u32) -> Self {
        Self {
            channels: channels.max(1) as usize,
            step: input_rate as f64 / output_rate as f64,
            pos: 0.0,
        }
    }

    fn process(&mut self, interleaved: &[f32], out: &mut Vec<i16>) {
        let mono: Vec<f32> = interleaved
            .chunks(self.channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();
        while self.pos < mono.len() as f64 {
            let i = self.pos as usize;
            let frac = (self.pos - i as f64) as f32;
            let a = mono[i];
            let b = mono.get(i + 1).copied().unwrap_or(a);
            let v = a + (b - a) * frac;
            out.push((v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16);
            self.pos += self.step;
        }
        self.pos -= mono.len() as f64;
    }
}

/// List available input devices, in the order used for device indices.
pub fn list_input_devices() -> VoiceResult<Vec<String>> {
    let host = cpal::default_host();
    let devices = host.input_devices()?;

    let mut device_names = Vec::new();
    for (i, device) in devices.enumerate() {
        device_names.push(device.name().unwrap_or_else(|_| format!("Input device {}", i)));
    }

    Ok(device_names)
}

/// Microphone capture on a dedicated thread.
pub struct CpalInput {
    queue: Arc<SampleQueue>,
    shutdown: Mutex<Option<std_mpsc::Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    device_name: String,
}

impl CpalInput {
    /// Open the input device at `index` (or the system default) and start the stream.
    ///
    /// Samples are only kept while the input is started.
    pub fn open(index: Option<usize>, target_rate: u32) -> VoiceResult<Self> {
        let queue = Arc::new(SampleQueue::new(target_rate));
        let (ready_tx, ready_rx) = std_mpsc::channel::<VoiceResult<String>>();
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();

        let thread_queue = queue.clone();
        let thread = std::thread::Builder::new()
            .name("jarvis-capture".to_string())
            .spawn(move || {
                let stream = match build_input_stream(index, target_rate, thread_queue) {
                    Ok((stream, name)) => {
                        let _ = ready_tx.send(Ok(name));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Blocks until the sender is dropped.
                let _ = shutdown_rx.recv();
                drop(stream);
                debug!("Capture thread stopped");
            })?;

        let device_name = ready_rx
            .recv()
            .map_err(|_| VoiceError::AudioDevice("capture thread exited during startup".to_string()))??;

        info!("🎤 Microphone open: {} ({}Hz mono)", device_name, target_rate);
        Ok(Self {
            queue,
            shutdown: Mutex::new(Some(shutdown_tx)),
            thread: Mutex::new(Some(thread)),
            device_name,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Stop the stream and wait for the capture thread to release the device.
    pub fn close(&self) {
        self.queue.stop();
        drop(self.shutdown.lock().unwrap_or_else(PoisonError::into_inner).take());
        if let Some(handle) = self.thread.lock().unwrap_or_else(PoisonError::into_inner).take() {
            if handle.join().is_err() {
                warn!("Capture thread panicked during shutdown");
            }
        }
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.close();
    }
}

impl AudioInput for CpalInput {
    fn start(&self) {
        self.queue.start();
    }

    fn stop(&self) {
        self.queue.stop();
    }

    fn is_active(&self) -> bool {
        self.queue.is_active()
    }

    fn available(&self) -> usize {
        self.queue.available()
    }

    fn read(&self, max: usize) -> Vec<i16> {
        self.queue.read(max)
    }

    fn clear(&self) {
        self.queue.clear();
    }

    fn sample_rate(&self) -> u32 {
        self.queue.sample_rate()
    }
}

fn build_input_stream(index: Option<usize>, target_rate: u32, queue: Arc<SampleQueue>) -> VoiceResult<(Stream, String)> {
    let host = cpal::default_host();
    let device = match index {
        Some(i) => host
            .input_devices()?
            .nth(i)
            .ok_or_else(|| VoiceError::AudioDevice(format!("No input device at index {}", i)))?,
        None => host
            .default_input_device()
            .ok_or_else(|| VoiceError::AudioDevice("No input device available".to_string()))?,
    };
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let default_config = device.default_input_config()?;
    debug!("🔧 Default input config: {:?}", default_config);

    let format = default_config.sample_format();
    let config: StreamConfig = default_config.into();
    let mut resampler = Resampler::new(config.channels, config.sample_rate.0, target_rate);
    let mut converted = Vec::with_capacity(1024);
    let on_error = |err: cpal::StreamError| warn!("Audio stream error: {}", err);

    let stream = match format {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                converted.clear();
                resampler.process(data, &mut converted);
                queue.push(&converted);
            },
            on_error,
            None,
        )?,
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let floats: Vec<f32> = data.iter().map(|s| *s as f32 / 32768.0).collect();
                converted.clear();
                resampler.process(&floats, &mut converted);
                queue.push(&converted);
            },
            on_error,
            None,
        )?,
        SampleFormat::U16 => device.build_input_stream(
            &config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                let floats: Vec<f32> = data.iter().map(|s| (*s as f32 - 32768.0) / 32768.0).collect();
                converted.clear();
                resampler.process(&floats, &mut converted);
                queue.push(&converted);
            },
            on_error,
            None,
        )?,
        other => {
            return Err(VoiceError::AudioDevice(format!("Unsupported input sample format {:?}", other)));
        }
    };

    stream.play()?;
    Ok((stream, name))
}

/// Speaker playback through a rodio sink.
pub struct RodioOutput {
    handle: OutputStreamHandle,
    sink: Mutex<Sink>,
    /// Odd trailing byte from the previous write.
    carry: Mutex<Option<u8>>,
    sample_rate: u32,
    shutdown: Mutex<Option<std_mpsc::Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl RodioOutput {
    /// Open the default output device for mono PCM at `sample_rate`.
    pub fn open(sample_rate: u32) -> VoiceResult<Self> {
        let (ready_tx, ready_rx) = std_mpsc::channel::<VoiceResult<OutputStreamHandle>>();
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("jarvis-playback".to_string())
            .spawn(move || {
                let (stream, handle) = match rodio::OutputStream::try_default() {
                    Ok(pair) => pair,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.into()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(handle));
                let _ = shutdown_rx.recv();
                drop(stream);
                debug!("Playback thread stopped");
            })?;

        let handle = ready_rx
            .recv()
            .map_err(|_| VoiceError::Playback("playback thread exited during startup".to_string()))??;
        let sink = Sink::try_new(&handle)?;

        info!("🔊 Speaker open ({}Hz mono)", sample_rate);
        Ok(Self {
            handle,
            sink: Mutex::new(sink),
            carry: Mutex::new(None),
            sample_rate,
            shutdown: Mutex::new(Some(shutdown_tx)),
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn close(&self) {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner).stop();
        drop(self.shutdown.lock().unwrap_or_else(PoisonError::into_inner).take());
        if let Some(handle) = self.thread.lock().unwrap_or_else(PoisonError::into_inner).take() {
            if handle.join().is_err() {
                warn!("Playback thread panicked during shutdown");
            }
        }
    }
}

impl Drop for RodioOutput {
    fn drop(&mut self) {
        self.close();
    }
}

impl AudioOutput for RodioOutput {
    fn write(&self, pcm: &[u8]) -> VoiceResult<()> {
        let samples = {
            let mut carry = self.carry.lock().unwrap_or_else(PoisonError::into_inner);
            decode_pcm16le(&mut carry, pcm)
        };
        if samples.is_empty() {
            return Ok(());
        }
        let sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        sink.append(SamplesBuffer::new(1, self.sample_rate, samples));
        Ok(())
    }

    fn flush(&self) -> VoiceResult<()> {
        *self.carry.lock().unwrap_or_else(PoisonError::into_inner) = None;
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        sink.stop();
        *sink = Sink::try_new(&self.handle)?;
        info!("⏹️ Audio playback stopped");
        Ok(())
    }

    fn is_playing(&self) -> bool {
        !self.sink.lock().unwrap_or_else(PoisonError::into_inner).empty()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Decode little-endian 16-bit PCM, keeping an odd trailing byte for the next call.
pub(crate) fn decode_pcm16le(carry: &mut Option<u8>, pcm: &[u8]) -> Vec<i16> {
    let mut bytes = Vec::with_capacity(pcm.len() + 1);
    if let Some(b) = carry.take() {
        bytes.push(b);
    }
    bytes.extend_from_slice(pcm);
    if bytes.len() % 2 == 1 {
        *carry = bytes.pop();
    }
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}
