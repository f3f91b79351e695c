//! Streaming speech synthesis over a websocket.
//!
//! One connection per speakable unit: the server receives the text and voice
//! in the query string and answers with binary PCM frames, then closes.

use futures::StreamExt;
use jarvis_core::SynthesisSettings;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

const FRAME_BUFFER: usize = 64;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Audio frames for one unit. Dropping the session cancels it.
pub struct SynthesisSession {
    frames: mpsc::Receiver<Vec<u8>>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl SynthesisSession {
    /// Wrap a frame channel. `cancel` is fired on [`cancel`](Self::cancel) or drop.
    pub fn new(frames: mpsc::Receiver<Vec<u8>>, cancel: CancellationToken) -> Self {
        let guard = cancel.clone().drop_guard();
        Self {
            frames,
            cancel,
            _guard: guard,
        }
    }

    /// A session that yields nothing.
    pub fn empty() -> Self {
        let (_, rx) = mpsc::channel(1);
        Self::new(rx, CancellationToken::new())
    }

    /// Next PCM frame, or `None` once the unit is fully synthesized or cancelled.
    pub async fn next_frame(&mut self) -> Option<Vec<u8>> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            frame = self.frames.recv() => frame,
        }
    }

    /// Stop synthesis and release the connection promptly.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Text-to-speech engine.
pub trait SynthesisEngine: Send + Sync {
    /// Start synthesizing `text`. Failures are logged and yield zero frames.
    fn open(&self, text: &str, voice: &str) -> SynthesisSession;
}

/// Websocket synthesis client.
#[derive(Debug, Clone)]
pub struct WebSocketSynthesis {
    server_url: String,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl WebSocketSynthesis {
    pub fn new(settings: &SynthesisSettings) -> Self {
        Self {
            server_url: settings.server_url.clone(),
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            read_timeout: Duration::from_millis(settings.read_timeout_ms),
        }
    }

    /// Request URL for one unit.
    pub fn request_url(&self, text: &str, voice: &str) -> String {
        let sep = if self.server_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}text={}&voice={}",
            self.server_url,
            sep,
            urlencoding::encode(text),
            urlencoding::encode(voice)
        )
    }
}

impl SynthesisEngine for WebSocketSynthesis {
    fn open(&self, text: &str, voice: &str) -> SynthesisSession {
        let url = self.request_url(text, voice);
        let connect_timeout = self.connect_timeout;
        let read_timeout = self.read_timeout;
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel::<Vec<u8>>(FRAME_BUFFER);

        let token = cancel.clone();
        tokio::spawn(async move {
            let connected = tokio::select! {
                biased;
                () = token.cancelled() => return,
                res = tokio::time::timeout(connect_timeout, connect_async(&url)) => res,
            };
            let mut ws = match connected {
                Ok(Ok((ws, _))) => ws,
                Ok(Err(e)) => {
                    warn!("❌ Synthesis server unreachable: {}", e);
                    return;
                }
                Err(_) => {
                    warn!("❌ Synthesis connection timed out after {:?}", connect_timeout);
                    return;
                }
            };

            loop {
                let msg = tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    msg = tokio::time::timeout(read_timeout, ws.next()) => msg,
                };
                let Ok(msg) = msg else {
                    warn!("❌ Synthesis server silent for {:?}, ending unit", read_timeout);
                    break;
                };
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        if tx.send(data.into()).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return;
                    }
                    Some(Ok(other)) => debug!("Ignoring synthesis message: {:?}", other),
                    Some(Err(e)) => {
                        warn!("Synthesis stream error: {}", e);
                        return;
                    }
                }
            }

            drop(tx);
            match tokio::time::timeout(CLOSE_TIMEOUT, ws.close(None)).await {
                Ok(Ok(())) => debug!("Synthesis connection closed"),
                Ok(Err(e)) => debug!("Synthesis close error: {}", e),
                Err(_) => debug!("Synthesis close timed out"),
            }
        });

        SynthesisSession::new(rx, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use futures::SinkExt;
    use tokio::net::TcpListener;

    fn engine(url: &str) -> WebSocketSynthesis {
        WebSocketSynthesis::new(&SynthesisSettings {
            server_url: url.to_string(),
            connect_timeout_ms: 200,
            read_timeout_ms: 200,
            ..SynthesisSettings::default()
        })
    }

    /// Accepts one websocket, sends `frames` binary messages, then goes silent.
    async fn stalling_server(frames: usize) -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/stream", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            for i in 0..frames {
                ws.send(Message::binary(vec![i as u8, 0])).await.unwrap();
            }
            std::future::pending::<()>().await;
        });
        (url, handle)
    }

    #[test]
    fn test_request_url_encodes_text_and_voice() {
        let url = engine("ws://127.0.0.1:8000/stream").request_url("Ciao, come stai? 100%", "it-Spk1_man");
        assert_eq!(
            url,
            "ws://127.0.0.1:8000/stream?text=Ciao%2C%20come%20stai%3F%20100%25&voice=it-Spk1_man"
        );
    }

    #[test]
    fn test_request_url_appends_to_existing_query() {
        let url = engine("ws://host/stream?fmt=pcm").request_url("hi", "v");
        assert_eq!(url, "ws://host/stream?fmt=pcm&text=hi&voice=v");
    }

    #[tokio::test]
    async fn test_unreachable_server_yields_no_frames() {
        // Port 9 (discard) is closed on any sane test host.
        let mut session = engine("ws://127.0.0.1:9/stream").open("Ciao a tutti.", "v");
        let frame = tokio::time::timeout(Duration::from_secs(5), session.next_frame())
            .await
            .expect("session should end");
        assert!(frame.is_none());
    }

    #[tokio::test]
    async fn test_silent_server_ends_unit_after_read_timeout() {
        let (url, server) = stalling_server(0).await;
        let mut session = engine(&url).open("Ciao a tutti.", "v");

        let frame = tokio::time::timeout(Duration::from_secs(2), session.next_frame())
            .await
            .expect("a silent server must not hang the unit");
        assert!(frame.is_none());
        server.abort();
    }

    #[tokio::test]
    async fn test_partial_unit_keeps_received_frames() {
        let (url, server) = stalling_server(2).await;
        let mut session = engine(&url).open("Ciao a tutti.", "v");

        let mut frames = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(frame) = session.next_frame().await {
                frames.push(frame);
            }
        })
        .await
        .expect("a stalled server must not hang the unit");

        assert_eq!(frames, vec![vec![0, 0], vec![1, 0]]);
        server.abort();
    }

    #[tokio::test]
    async fn test_cancelled_session_ends_immediately() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(vec![1, 2]).await.unwrap();
        let mut session = SynthesisSession::new(rx, CancellationToken::new());
        session.cancel();
        assert!(session.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_session_cancels_token() {
        let token = CancellationToken::new();
        let (_tx, rx) = mpsc::channel::<Vec<u8>>(1);
        let session = SynthesisSession::new(rx, token.clone());
        drop(session);
        assert!(token.is_cancelled());
    }
}
