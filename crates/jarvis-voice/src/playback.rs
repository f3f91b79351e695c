//! Speaks a streamed answer unit by unit, stopping dead on barge-in.

use crate::audio::AudioOutput;
use crate::error::VoiceResult;
use crate::segmenter::{segment, SentenceSegmenter};
use crate::synthesis::SynthesisEngine;
use futures::{pin_mut, Stream, StreamExt};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DRAIN_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechOutcome {
    /// Every unit was synthesized and the speaker drained.
    Completed { units: usize },
    /// Barge-in fired; output was flushed and remaining units discarded.
    Interrupted { units: usize },
}

impl SpeechOutcome {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, SpeechOutcome::Interrupted { .. })
    }
}

/// Where a spoken answer goes.
pub struct Voice<'a> {
    pub engine: &'a dyn SynthesisEngine,
    pub output: &'a dyn AudioOutput,
    pub voice_id: &'a str,
    pub min_unit_chars: usize,
}

/// Segment `fragments` and play each unit strictly in order.
///
/// Units are synthesized one at a time: the next one starts only after the
/// previous one's last frame was written. Once `barge_in` fires no further
/// frame is written, the output is flushed and the fragment stream is dropped.
pub async fn speak_response<S>(fragments: S, voice: &Voice<'_>, barge_in: &CancellationToken) -> VoiceResult<SpeechOutcome>
where
    S: Stream<Item = String> + Send + Unpin,
{
    let units = segment(fragments, SentenceSegmenter::new(voice.min_unit_chars));
    pin_mut!(units);
    let mut spoken = 0usize;

    loop {
        let unit = tokio::select! {
            biased;
            () = barge_in.cancelled() => return interrupted(voice.output, spoken),
            unit = units.next() => unit,
        };
        let Some(unit) = unit else { break };

        info!("🔊 AI: {}", unit.text);
        let mut session = voice.engine.open(&unit.text, voice.voice_id);
        loop {
            let frame = tokio::select! {
                biased;
                () = barge_in.cancelled() => {
                    session.cancel();
                    return interrupted(voice.output, spoken);
                }
                frame = session.next_frame() => frame,
            };
            let Some(frame) = frame else { break };
            if let Err(e) = voice.output.write(&frame) {
                warn!("Playback write failed, skipping rest of unit {}: {}", unit.index, e);
                session.cancel();
                break;
            }
        }
        spoken += 1;
    }

    // Let queued audio play out, still interruptible.
    while voice.output.is_playing() {
        tokio::select! {
            biased;
            () = barge_in.cancelled() => return interrupted(voice.output, spoken),
            () = tokio::time::sleep(DRAIN_POLL) => {}
        }
    }

    Ok(SpeechOutcome::Completed { units: spoken })
}

/// Speak a fixed phrase. Only `cancel` can cut it short.
pub async fn speak_text(text: &str, voice: &Voice<'_>, cancel: &CancellationToken) -> VoiceResult<SpeechOutcome> {
    let fragments = futures::stream::iter(vec![text.to_string()]);
    speak_response(fragments, voice, cancel).await
}

fn interrupted(output: &dyn AudioOutput, spoken: usize) -> VoiceResult<SpeechOutcome> {
    info!("🛑 STOP");
    output.flush()?;
    Ok(SpeechOutcome::Interrupted { units: spoken })
}
