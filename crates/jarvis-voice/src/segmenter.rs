//! Turns streamed answer fragments into speakable units.
//!
//! Fragments pass through [`TextNormalizer`] first, so markup the model
//! emits never reaches the speaker. A unit ends at a sentence mark followed
//! by whitespace (or the end of the text so far) or at a newline, as long
//! as it is longer than the minimum and does not end with a colon.

use futures::stream::{self, Stream, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::VecDeque;

/// Non-speakable patterns, removed in this order.
static NOISE_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("reasoning", r"(?s)<think>.*?</think>"),
        ("tag", r"</?[A-Za-z][^<>]*>"),
        ("braces", r"\{[^{}]*\}"),
        ("stage direction", r"\[[^\[\]]*\]"),
        ("emphasis", r"\*+"),
        ("heading", r"(?m)^[ \t]*#+[ \t]*"),
        ("code fence", r"`+"),
    ]
    .into_iter()
    .filter_map(|(name, pattern)| Regex::new(pattern).ok().map(|re| (name, re)))
    .collect()
});

static OPEN_TAG: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"<(?:/?[A-Za-z][^<>]*)?$").ok());

/// Removes markup that should never be spoken.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextNormalizer;

impl TextNormalizer {
    /// Strip every complete noise pattern from `text`.
    pub fn clean(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (_, re) in NOISE_PATTERNS.iter() {
            // Repeat so nested blocks collapse from the inside out.
            while re.is_match(&out) {
                out = re.replace_all(&out, "").into_owned();
            }
        }
        out
    }

    /// Byte offset where an unfinished block starts, if any.
    ///
    /// Text from that offset on may still turn into noise once more fragments
    /// arrive, so it is held back.
    pub fn pending_from(&self, text: &str) -> Option<usize> {
        let mut earliest: Option<usize> = None;
        let mut consider = |pos: Option<usize>| {
            if let Some(p) = pos {
                earliest = Some(earliest.map_or(p, |e| e.min(p)));
            }
        };

        if let Some(open) = text.rfind("<think>") {
            if !text[open..].contains("</think>") {
                consider(Some(open));
            }
        }
        consider(unclosed(text, '{', '}'));
        consider(unclosed(text, '[', ']'));
        if let Some(re) = OPEN_TAG.as_ref() {
            consider(re.find(text).map(|m| m.start()));
        }
        earliest
    }

    /// Final cleanup at end of stream: unfinished reasoning is dropped, stray
    /// brackets are removed, everything else is kept.
    pub fn finish(&self, text: &str) -> String {
        let mut text = text.to_string();
        if let Some(open) = text.rfind("<think>") {
            if !text[open..].contains("</think>") {
                text.truncate(open);
            }
        }
        self.clean(&text).replace(['{', '}', '[', ']'], "")
    }
}

/// Position of the first opening bracket that has no match after it.
fn unclosed(text: &str, open: char, close: char) -> Option<usize> {
    let mut stack = Vec::new();
    for (i, c) in text.char_indices() {
        if c == open {
            stack.push(i);
        } else if c == close {
            stack.pop();
        }
    }
    stack.first().copied()
}

/// A piece of the answer ready for synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakableUnit {
    pub text: String,
    /// Position within the answer, from 0.
    pub index: usize,
    /// Set on the unit flushed at end of stream.
    pub is_final: bool,
}

/// Accumulates fragments and cuts them into [`SpeakableUnit`]s.
#[derive(Debug)]
pub struct SentenceSegmenter {
    normalizer: TextNormalizer,
    buffer: String,
    min_chars: usize,
    next_index: usize,
}

impl SentenceSegmenter {
    /// `min_chars`: a unit must be strictly longer than this (trimmed).
    pub fn new(min_chars: usize) -> Self {
        Self {
            normalizer: TextNormalizer,
            buffer: String::new(),
            min_chars,
            next_index: 0,
        }
    }

    /// Add a fragment; returns every unit completed by it, in order.
    pub fn push(&mut self, fragment: &str) -> Vec<SpeakableUnit> {
        self.buffer.push_str(fragment);

        let hold = self.normalizer.pending_from(&self.buffer).unwrap_or(self.buffer.len());
        let settled = self.normalizer.clean(&self.buffer[..hold]);
        let held = self.buffer[hold..].to_string();

        let mut units = Vec::new();
        let mut start = 0;
        let mut chars = settled.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            let end = i + c.len_utf8();
            let boundary = match c {
                '\n' => true,
                '.' | '!' | '?' => chars.peek().map_or(true, |(_, next)| next.is_whitespace()),
                _ => false,
            };
            if !boundary {
                continue;
            }
            let candidate = settled[start..end].trim();
            if self.is_speakable(candidate) {
                units.push(self.unit(candidate, false));
                start = end;
            }
        }

        self.buffer = format!("{}{}", &settled[start..], held);
        units
    }

    /// Flush whatever remains. Never drops non-empty speakable text.
    pub fn finish(&mut self) -> Option<SpeakableUnit> {
        let text = self.normalizer.finish(&self.buffer);
        self.buffer.clear();
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        Some(self.unit(text, true))
    }

    fn is_speakable(&self, candidate: &str) -> bool {
        candidate.chars().count() > self.min_chars && !candidate.ends_with(':')
    }

    fn unit(&mut self, text: &str, is_final: bool) -> SpeakableUnit {
        let unit = SpeakableUnit {
            text: text.to_string(),
            index: self.next_index,
            is_final,
        };
        self.next_index += 1;
        unit
    }
}

/// Adapt a fragment stream into a unit stream.
pub fn segment<S>(fragments: S, segmenter: SentenceSegmenter) -> impl Stream<Item = SpeakableUnit> + Send
where
    S: Stream<Item = String> + Send + Unpin,
{
    let state = (fragments, segmenter, VecDeque::<SpeakableUnit>::new(), false);
    stream::unfold(state, |(mut fragments, mut segmenter, mut ready, mut done)| async move {
        loop {
            if let Some(unit) = ready.pop_front() {
                return Some((unit, (fragments, segmenter, ready, done)));
            }
            if done {
                return None;
            }
            match fragments.next().await {
                Some(fragment) => ready.extend(segmenter.push(&fragment)),
                None => {
                    done = true;
                    ready.extend(segmenter.finish());
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(units: &[SpeakableUnit]) -> Vec<&str> {
        units.iter().map(|u| u.text.as_str()).collect()
    }

    fn run(fragments: &[&str]) -> Vec<SpeakableUnit> {
        let mut seg = SentenceSegmenter::new(5);
        let mut units: Vec<SpeakableUnit> = fragments.iter().flat_map(|f| seg.push(f)).collect();
        units.extend(seg.finish());
        units
    }

    #[test]
    fn test_one_fragment_two_sentences() {
        let units = run(&["Hello world. How are you?"]);
        assert_eq!(texts(&units), vec!["Hello world.", "How are you?"]);
        assert_eq!(units[0].index, 0);
        assert_eq!(units[1].index, 1);
    }

    #[test]
    fn test_token_stream_two_sentences() {
        let units = run(&["Hello", " world", ".", " How", " are", " you", "?"]);
        assert_eq!(texts(&units), vec!["Hello world.", "How are you?"]);
    }

    #[test]
    fn test_colon_does_not_flush() {
        let mut seg = SentenceSegmenter::new(5);
        assert!(seg.push("Time: 5").is_empty());
        let last = seg.finish().unwrap();
        assert_eq!(last.text, "Time: 5");
        assert!(last.is_final);
    }

    #[test]
    fn test_line_ending_in_colon_joins_next_line() {
        let units = run(&["Ingredienti:\n", "- uova.\n", "- farina"]);
        assert_eq!(texts(&units), vec!["Ingredienti:\n- uova.", "- farina"]);
    }

    #[test]
    fn test_short_sentence_is_merged() {
        let units = run(&["Ok. ", "Ecco il risultato."]);
        assert_eq!(texts(&units), vec!["Ok. Ecco il risultato."]);
    }

    #[test]
    fn test_decimal_point_is_not_a_boundary() {
        let units = run(&["Costa 3.50 euro oggi. Grazie mille."]);
        assert_eq!(texts(&units), vec!["Costa 3.50 euro oggi.", "Grazie mille."]);
    }

    #[test]
    fn test_markup_is_never_spoken() {
        let units = run(&["*Certo!* {\"tool\": \"x\"} [ride] Sono <b>pronto</b>."]);
        assert_eq!(texts(&units), vec!["Certo!", "Sono pronto."]);
        for unit in &units {
            for forbidden in ['*', '{', '}', '[', ']', '<', '>'] {
                assert!(!unit.text.contains(forbidden), "{:?} in {:?}", forbidden, unit.text);
            }
        }
    }

    #[test]
    fn test_nested_blocks_are_removed_whole() {
        let n = TextNormalizer;
        assert_eq!(n.clean(r#"Ecco {"a": {"b": 1}} fatto."#), "Ecco  fatto.");
        assert_eq!(n.clean("Ok [nota [interna]] chiaro."), "Ok  chiaro.");
        let units = run(&[r#"Pronto. {"tool": {"name": "calc", "args": {"x": 1}}} Il risultato è 2."#]);
        assert_eq!(texts(&units), vec!["Pronto.", "Il risultato è 2."]);
    }

    #[test]
    fn test_split_markup_is_held_until_closed() {
        let mut seg = SentenceSegmenter::new(5);
        assert!(seg.push("Ecco {\"nome\": \"calc. ").is_empty());
        let units = seg.push("\"} la risposta. ");
        assert_eq!(texts(&units), vec!["Ecco  la risposta."]);
    }

    #[test]
    fn test_unfinished_reasoning_is_dropped() {
        let units = run(&["Va bene. <think>forse dovrei"]);
        assert_eq!(texts(&units), vec!["Va bene."]);
    }

    #[test]
    fn test_remainder_is_flushed() {
        let units = run(&["Prima frase completa. ", "e poi niente punto"]);
        assert_eq!(texts(&units), vec!["Prima frase completa.", "e poi niente punto"]);
        assert!(units[1].is_final);
        assert!(!units[0].is_final);
    }

    #[test]
    fn test_empty_stream_yields_nothing() {
        assert!(run(&[]).is_empty());
        assert!(run(&["  ", "\n"]).is_empty());
    }

    #[tokio::test]
    async fn test_stream_adapter_preserves_order() {
        let fragments = futures::stream::iter(vec![
            "Uno due tre. Quattro cinque".to_string(),
            " sei. Sette".to_string(),
        ]);
        let units: Vec<SpeakableUnit> = segment(fragments, SentenceSegmenter::new(5)).collect().await;
        assert_eq!(texts(&units), vec!["Uno due tre.", "Quattro cinque sei.", "Sette"]);
        assert_eq!(units.iter().map(|u| u.index).collect::<Vec<_>>(), vec![0, 1, 2]);
    }
}
