//! Audio device ownership and the reset path.
//!
//! Everything else in the pipeline holds the swappable wrappers, never the
//! real devices, so a reset can tear the devices down and reopen them without
//! anyone holding a stale handle.

use crate::audio::{AudioInput, AudioOutput, CpalInput, RodioOutput};
use crate::error::{VoiceError, VoiceResult};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{error, info, warn};

/// Opens real devices. Implemented by [`SystemAudio`] and by test doubles.
pub trait DeviceFactory: Send + Sync {
    fn open_input(&self, index: Option<usize>) -> VoiceResult<Box<dyn AudioInput>>;
    fn open_output(&self) -> VoiceResult<Box<dyn AudioOutput>>;
}

/// cpal microphone and rodio speaker.
#[derive(Debug, Clone)]
pub struct SystemAudio {
    pub input_rate: u32,
    pub output_rate: u32,
}

impl DeviceFactory for SystemAudio {
    fn open_input(&self, index: Option<usize>) -> VoiceResult<Box<dyn AudioInput>> {
        Ok(Box::new(CpalInput::open(index, self.input_rate)?))
    }

    fn open_output(&self) -> VoiceResult<Box<dyn AudioOutput>> {
        Ok(Box::new(RodioOutput::open(self.output_rate)?))
    }
}

/// Input handle that survives device resets.
pub struct SwappableInput {
    inner: RwLock<Option<Box<dyn AudioInput>>>,
    sample_rate: u32,
}

impl SwappableInput {
    fn new(inner: Box<dyn AudioInput>) -> Self {
        let sample_rate = inner.sample_rate();
        Self {
            inner: RwLock::new(Some(inner)),
            sample_rate,
        }
    }

    /// Swap the device. The previous one is dropped (and closed) before this returns.
    fn replace(&self, next: Option<Box<dyn AudioInput>>) {
        let previous = {
            let mut slot = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *slot, next)
        };
        drop(previous);
    }

    fn with<R>(&self, default: R, f: impl FnOnce(&dyn AudioInput) -> R) -> R {
        match self.inner.read().unwrap_or_else(PoisonError::into_inner).as_deref() {
            Some(input) => f(input),
            None => default,
        }
    }
}

impl AudioInput for SwappableInput {
    fn start(&self) {
        self.with((), |i| i.start())
    }

    fn stop(&self) {
        self.with((), |i| i.stop())
    }

    fn is_active(&self) -> bool {
        self.with(false, |i| i.is_active())
    }

    fn available(&self) -> usize {
        self.with(0, |i| i.available())
    }

    fn read(&self, max: usize) -> Vec<i16> {
        self.with(Vec::new(), |i| i.read(max))
    }

    fn clear(&self) {
        self.with((), |i| i.clear())
    }

    fn sample_rate(&self) -> u32 {
        self.with(self.sample_rate, |i| i.sample_rate())
    }
}

/// Output handle that survives device resets.
pub struct SwappableOutput {
    inner: RwLock<Option<Box<dyn AudioOutput>>>,
    sample_rate: u32,
}

impl SwappableOutput {
    fn new(inner: Box<dyn AudioOutput>) -> Self {
        let sample_rate = inner.sample_rate();
        Self {
            inner: RwLock::new(Some(inner)),
            sample_rate,
        }
    }

    fn replace(&self, next: Option<Box<dyn AudioOutput>>) {
        let previous = {
            let mut slot = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *slot, next)
        };
        drop(previous);
    }
}

impl AudioOutput for SwappableOutput {
    fn write(&self, pcm: &[u8]) -> VoiceResult<()> {
        match self.inner.read().unwrap_or_else(PoisonError::into_inner).as_deref() {
            Some(output) => output.write(pcm),
            None => Err(VoiceError::Playback("output device is closed".to_string())),
        }
    }

    fn flush(&self) -> VoiceResult<()> {
        match self.inner.read().unwrap_or_else(PoisonError::into_inner).as_deref() {
            Some(output) => output.flush(),
            None => Ok(()),
        }
    }

    fn is_playing(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_deref()
            .is_some_and(|o| o.is_playing())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// The microphone and speaker used by the turn loop.
pub struct AudioDevices {
    factory: Arc<dyn DeviceFactory>,
    input_index: Option<usize>,
    input: Arc<SwappableInput>,
    output: Arc<SwappableOutput>,
}

impl AudioDevices {
    pub fn open(factory: Arc<dyn DeviceFactory>, input_index: Option<usize>) -> VoiceResult<Self> {
        let input = factory.open_input(input_index)?;
        let output = factory.open_output()?;
        Ok(Self {
            factory,
            input_index,
            input: Arc::new(SwappableInput::new(input)),
            output: Arc::new(SwappableOutput::new(output)),
        })
    }

    pub fn input(&self) -> Arc<dyn AudioInput> {
        self.input.clone()
    }

    pub fn output(&self) -> Arc<dyn AudioOutput> {
        self.output.clone()
    }

    /// Close both devices, wait for them to be released, then reopen them.
    ///
    /// On failure both devices stay closed and [`VoiceError::DeviceResetFailed`]
    /// is returned; the caller is expected to restart the process.
    pub fn reset(&self) -> VoiceResult<()> {
        info!("🔄 Resetting audio devices");
        if let Err(e) = self.output.flush() {
            warn!("Flush before reset failed: {}", e);
        }
        self.output.replace(None);
        self.input.replace(None);

        let input = self
            .factory
            .open_input(self.input_index)
            .map_err(|e| VoiceError::DeviceResetFailed(format!("input: {}", e)))?;
        let output = self
            .factory
            .open_output()
            .map_err(|e| VoiceError::DeviceResetFailed(format!("output: {}", e)))?;
        self.input.replace(Some(input));
        self.output.replace(Some(output));
        info!("✅ Audio devices reopened");
        Ok(())
    }

    /// Release both devices.
    pub fn shutdown(&self) {
        if let Err(e) = self.output.flush() {
            warn!("Flush at shutdown failed: {}", e);
        }
        self.output.replace(None);
        self.input.replace(None);
        info!("🔇 Audio devices closed");
    }
}

/// Replace the running process with a fresh copy of itself.
///
/// Only returns if the restart could not be started.
pub fn restart_process() -> VoiceError {
    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => return e.into(),
    };
    let args: Vec<std::ffi::OsString> = std::env::args_os().skip(1).collect();
    error!("♻️ Restarting {}", exe.display());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        std::process::Command::new(&exe).args(&args).exec().into()
    }
    #[cfg(not(unix))]
    {
        match std::process::Command::new(&exe).args(&args).spawn() {
            Ok(_) => std::process::exit(0),
            Err(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SampleQueue;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct CountingFactory {
        inputs: AtomicUsize,
        outputs: AtomicUsize,
        fail: AtomicBool,
    }

    struct NullOutput;

    impl AudioOutput for NullOutput {
        fn write(&self, _pcm: &[u8]) -> VoiceResult<()> {
            Ok(())
        }
        fn flush(&self) -> VoiceResult<()> {
            Ok(())
        }
        fn is_playing(&self) -> bool {
            false
        }
        fn sample_rate(&self) -> u32 {
            24000
        }
    }

    impl DeviceFactory for CountingFactory {
        fn open_input(&self, _index: Option<usize>) -> VoiceResult<Box<dyn AudioInput>> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(VoiceError::AudioDevice("unplugged".into()));
            }
            self.inputs.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(SampleQueue::new(16000)))
        }

        fn open_output(&self) -> VoiceResult<Box<dyn AudioOutput>> {
            self.outputs.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(NullOutput))
        }
    }

    fn factory() -> Arc<CountingFactory> {
        Arc::new(CountingFactory {
            inputs: AtomicUsize::new(0),
            outputs: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        })
    }

    #[test]
    fn test_reset_reopens_both_devices() {
        let f = factory();
        let devices = AudioDevices::open(f.clone(), Some(1)).unwrap();
        let input = devices.input();

        devices.reset().unwrap();
        assert_eq!(f.inputs.load(Ordering::SeqCst), 2);
        assert_eq!(f.outputs.load(Ordering::SeqCst), 2);

        // Handles taken before the reset talk to the new device.
        input.start();
        assert!(input.is_active());
        assert_eq!(input.sample_rate(), 16000);
    }

    #[test]
    fn test_failed_reset_is_reported() {
        let f = factory();
        let devices = AudioDevices::open(f.clone(), None).unwrap();
        f.fail.store(true, Ordering::SeqCst);
        assert!(matches!(devices.reset(), Err(VoiceError::DeviceResetFailed(_))));
        assert!(devices.output().write(&[0, 0]).is_err());
        assert_eq!(devices.input().available(), 0);
    }

    #[test]
    fn test_shutdown_releases_devices() {
        let devices = AudioDevices::open(factory(), None).unwrap();
        devices.shutdown();
        assert!(!devices.output().is_playing());
        assert!(devices.output().write(&[0, 0]).is_err());
    }
}
