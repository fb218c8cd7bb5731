//! Relays one provider stream to the client while accumulating the text.

use crate::stream_event::AgentStreamEvent;
use cortex_core::provider::{ChunkReceiver, Usage};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// What a relayed stream produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelayOutcome {
    /// All streamed text, including a partial answer cut short by a stop
    /// request or an error.
    pub text: String,
    /// Number of non-empty deltas received.
    pub tokens: u32,
    pub usage: Option<Usage>,
    pub stopped: bool,
    pub error: Option<String>,
}

/// Forwards chunks from a provider stream as `AgentStreamEvent::Chunk`.
///
/// The stop flag is checked before waiting for each chunk and again
/// before forwarding it, so a stop takes effect within one chunk.
pub struct StreamRelay<'a> {
    events: &'a mpsc::Sender<AgentStreamEvent>,
    stop: &'a AtomicBool,
    forward: bool,
}

impl<'a> StreamRelay<'a> {
    pub fn new(events: &'a mpsc::Sender<AgentStreamEvent>, stop: &'a AtomicBool) -> Self {
        Self {
            events,
            stop,
            forward: true,
        }
    }

    /// Accumulate without forwarding any chunks.
    pub fn silent(mut self) -> Self {
        self.forward = false;
        self
    }

    pub async fn relay(&self, mut rx: ChunkReceiver) -> RelayOutcome {
        let mut outcome = RelayOutcome::default();

        loop {
            if self.stop.load(Ordering::SeqCst) {
                outcome.stopped = true;
                break;
            }
            let Some(item) = rx.recv().await else {
                break;
            };
            match item {
                Ok(chunk) => {
                    if let Some(usage) = chunk.usage {
                        outcome.usage = Some(usage);
                    }
                    if let Some(content) = chunk.content.filter(|c| !c.is_empty()) {
                        if self.stop.load(Ordering::SeqCst) {
                            outcome.stopped = true;
                            break;
                        }
                        outcome.tokens += 1;
                        outcome.text.push_str(&content);
                        if self.forward {
                            // A closed receiver means the client went away;
                            // the turn still completes and is recorded.
                            let _ = self.events.send(AgentStreamEvent::Chunk { content }).await;
                        }
                    }
                    if chunk.done {
                        break;
                    }
                }
                Err(e) => {
                    outcome.error = Some(e.to_string());
                    break;
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::error::ProviderError;
    use cortex_core::provider::StreamChunk;

    fn feed(items: Vec<Result<StreamChunk, ProviderError>>) -> ChunkReceiver {
        let (tx, rx) = mpsc::channel(items.len().max(1));
        for item in items {
            tx.try_send(item).unwrap();
        }
        rx
    }

    fn drain(rx: &mut mpsc::Receiver<AgentStreamEvent>) -> Vec<AgentStreamEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn forwards_and_counts_non_empty_deltas() {
        let (tx, mut events) = mpsc::channel(16);
        let stop = AtomicBool::new(false);
        let usage = Usage {
            prompt_tokens: 4,
            completion_tokens: 2,
            total_tokens: 6,
        };

        let outcome = StreamRelay::new(&tx, &stop)
            .relay(feed(vec![
                Ok(StreamChunk::delta("Hel")),
                Ok(StreamChunk::delta("")),
                Ok(StreamChunk::delta("lo")),
                Ok(StreamChunk::finished(Some(usage.clone()))),
            ]))
            .await;

        assert_eq!(outcome.text, "Hello");
        assert_eq!(outcome.tokens, 2);
        assert_eq!(outcome.usage, Some(usage));
        assert!(!outcome.stopped);
        assert_eq!(
            drain(&mut events),
            vec![
                AgentStreamEvent::Chunk { content: "Hel".into() },
                AgentStreamEvent::Chunk { content: "lo".into() },
            ]
        );
    }

    #[tokio::test]
    async fn silent_relay_emits_nothing() {
        let (tx, mut events) = mpsc::channel(16);
        let stop = AtomicBool::new(false);

        let outcome = StreamRelay::new(&tx, &stop)
            .silent()
            .relay(feed(vec![Ok(StreamChunk::delta("no")), Ok(StreamChunk::finished(None))]))
            .await;

        assert_eq!(outcome.text, "no");
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn stop_flag_ends_relay_before_next_chunk() {
        let (tx, mut events) = mpsc::channel(16);
        let stop = AtomicBool::new(true);

        let outcome = StreamRelay::new(&tx, &stop)
            .relay(feed(vec![Ok(StreamChunk::delta("never"))]))
            .await;

        assert!(outcome.stopped);
        assert!(outcome.text.is_empty());
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn error_keeps_partial_text() {
        let (tx, _events) = mpsc::channel(16);
        let stop = AtomicBool::new(false);

        let outcome = StreamRelay::new(&tx, &stop)
            .relay(feed(vec![
                Ok(StreamChunk::delta("Partial")),
                Err(ProviderError::StreamInterrupted("connection reset".into())),
            ]))
            .await;

        assert_eq!(outcome.text, "Partial");
        assert!(outcome.error.unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn closed_stream_without_done_ends_cleanly() {
        let (tx, _events) = mpsc::channel(16);
        let stop = AtomicBool::new(false);

        let outcome = StreamRelay::new(&tx, &stop)
            .relay(feed(vec![Ok(StreamChunk::delta("abc"))]))
            .await;

        assert_eq!(outcome.text, "abc");
        assert!(outcome.error.is_none());
    }
}
