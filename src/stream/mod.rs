//! Streaming session over a generation backend's text output.
//!
//! A [`StreamingSession`] drains one generation stream, feeds every chunk
//! through the [`StreamParser`] and pushes the resulting [`StreamEvent`]s to
//! a channel in arrival order. Exactly one terminal event (`Done` or
//! `Failed`) ends the event sequence.

pub mod parser;

use futures::StreamExt;
use futures::stream::BoxStream;
use sandforge_common::StreamEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::GenerationError;

pub use parser::{FileUnit, StreamParser};

/// How a streaming session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    /// Stream ended normally
    Completed {
        units: Vec<FileUnit>,
        full_text: String,
    },
    /// Transport failed. Units completed before the failure stay valid.
    Failed { units: Vec<FileUnit>, reason: String },
    /// Caller cancelled; nothing from this stream should be applied
    Cancelled { units: Vec<FileUnit> },
}

impl StreamOutcome {
    pub fn units(&self) -> &[FileUnit] {
        match self {
            StreamOutcome::Completed { units, .. }
            | StreamOutcome::Failed { units, .. }
            | StreamOutcome::Cancelled { units } => units,
        }
    }

    /// Raw text seen by the parser. Only a completed stream carries it.
    pub fn full_text(&self) -> Option<&str> {
        match self {
            StreamOutcome::Completed { full_text, .. } => Some(full_text),
            _ => None,
        }
    }
}

pub struct StreamingSession {
    parser: StreamParser,
    events: mpsc::Sender<StreamEvent>,
}

impl StreamingSession {
    pub fn new(events: mpsc::Sender<StreamEvent>) -> Self {
        Self {
            parser: StreamParser::new(),
            events,
        }
    }

    /// Consume `stream` until it ends, fails or `cancel` fires.
    pub async fn run(
        mut self,
        mut stream: BoxStream<'_, Result<String, GenerationError>>,
        cancel: CancellationToken,
    ) -> StreamOutcome {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Generation stream cancelled after {} bytes", self.parser.buffer().len());
                    self.emit(StreamEvent::Failed { reason: "cancelled".into() }).await;
                    return StreamOutcome::Cancelled { units: self.parser.into_units() };
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    self.emit(StreamEvent::RawChunk {
                        text: chunk.clone(),
                    })
                    .await;
                    for event in self.parser.push(&chunk) {
                        self.emit(event).await;
                    }
                }
                Some(Err(err)) => {
                    let reason = err.to_string();
                    warn!("Generation stream failed: {}", reason);
                    self.emit(StreamEvent::Failed {
                        reason: reason.clone(),
                    })
                    .await;
                    return StreamOutcome::Failed {
                        units: self.parser.into_units(),
                        reason,
                    };
                }
                None => {
                    for event in self.parser.finish() {
                        self.emit(event).await;
                    }
                    let full_text = self.parser.buffer().to_string();
                    self.emit(StreamEvent::Done {
                        full_text: full_text.clone(),
                    })
                    .await;
                    debug!(
                        "Generation stream finished: {} files, {} bytes",
                        self.parser.units().len(),
                        full_text.len()
                    );
                    return StreamOutcome::Completed {
                        units: self.parser.into_units(),
                        full_text,
                    };
                }
            }
        }
    }

    async fn emit(&self, event: StreamEvent) {
        // A dropped receiver only stops the live display
        let _ = self.events.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn chunks(parts: &[&str]) -> BoxStream<'static, Result<String, GenerationError>> {
        let items: Vec<Result<String, GenerationError>> =
            parts.iter().map(|p| Ok(p.to_string())).collect();
        stream::iter(items).boxed()
    }

    async fn collect(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_header_footer_scenario() {
        let (tx, rx) = mpsc::channel(64);
        let session = StreamingSession::new(tx);
        let outcome = session
            .run(
                chunks(&[
                    "<file path=\"src/Header.jsx\">const x=1;</file>",
                    "<file path=\"src/Footer.jsx\">",
                ]),
                CancellationToken::new(),
            )
            .await;

        let events = collect(rx).await;
        let completed: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::FileComplete { path, .. } => Some(path.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(completed, vec!["src/Header.jsx", "src/Footer.jsx"]);
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));

        let units = outcome.units();
        assert_eq!(units[1].content, "");
        assert!(matches!(outcome, StreamOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn test_raw_chunk_precedes_parsed_events() {
        let (tx, rx) = mpsc::channel(64);
        StreamingSession::new(tx)
            .run(chunks(&["<file path=\"a.js\">1</file>"]), CancellationToken::new())
            .await;

        let events = collect(rx).await;
        assert!(matches!(events[0], StreamEvent::RawChunk { .. }));
        assert!(matches!(events[1], StreamEvent::FileComplete { .. }));
        assert!(matches!(events[2], StreamEvent::Done { .. }));
    }

    #[tokio::test]
    async fn test_transport_failure_is_single_terminal_event() {
        let items: Vec<Result<String, GenerationError>> = vec![
            Ok("<file path=\"a.js\">1</file><file path=\"b.js\">partial".into()),
            Err(GenerationError::StreamFailed("connection reset".into())),
            Ok("never seen".into()),
        ];
        let (tx, rx) = mpsc::channel(64);
        let outcome = StreamingSession::new(tx)
            .run(stream::iter(items).boxed(), CancellationToken::new())
            .await;

        let events = collect(rx).await;
        let last = events.last().unwrap();
        assert!(matches!(last, StreamEvent::Failed { reason } if reason.contains("connection reset")));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

        // Completed units survive, the unterminated one is not flushed
        match outcome {
            StreamOutcome::Failed { units, .. } => {
                assert_eq!(units.len(), 1);
                assert_eq!(units[0].path, "a.js");
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_stops_consumption() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, rx) = mpsc::channel(64);
        let outcome = StreamingSession::new(tx)
            .run(chunks(&["<file path=\"a.js\">1</file>"]), cancel)
            .await;

        assert_eq!(outcome, StreamOutcome::Cancelled { units: vec![] });
        let events = collect(rx).await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_terminal());
    }

    #[tokio::test]
    async fn test_dropped_receiver_does_not_abort() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let outcome = StreamingSession::new(tx)
            .run(chunks(&["<file path=\"a.js\">1</file>", "tail"]), CancellationToken::new())
            .await;
        assert_eq!(outcome.units().len(), 1);
        assert!(outcome.full_text().unwrap().ends_with("tail"));
    }
}
