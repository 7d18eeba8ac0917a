//! Server-Sent Events for streamed replies

use crate::session::Turn;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream, StreamExt};
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;

/// How a submission ended
#[derive(Debug)]
pub enum Outcome {
    Recorded { turn: Turn, finished: bool },
    Failed { message: String, retryable: bool },
}

#[derive(Debug)]
enum ReplyEvent {
    Preview { text: String },
    Turn { turn: Turn },
    Finished,
    Error { message: String, retryable: bool },
    Done,
}

/// Previews while the reply streams in, then the outcome events and `done`
pub fn reply_stream(
    previews: mpsc::UnboundedReceiver<String>,
    outcome: oneshot::Receiver<Outcome>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let previews = UnboundedReceiverStream::new(previews).map(|text| ReplyEvent::Preview { text });

    let tail = stream::once(outcome).flat_map(|result| {
        let events = match result {
            Ok(Outcome::Recorded { turn, finished }) => {
                let mut events = vec![ReplyEvent::Turn { turn }];
                if finished {
                    events.push(ReplyEvent::Finished);
                }
                events.push(ReplyEvent::Done);
                events
            }
            Ok(Outcome::Failed { message, retryable }) => {
                vec![ReplyEvent::Error { message, retryable }, ReplyEvent::Done]
            }
            // The submission task went away without reporting
            Err(_) => vec![
                ReplyEvent::Error {
                    message: "The reply was interrupted. Please send your message again."
                        .to_string(),
                    retryable: true,
                },
                ReplyEvent::Done,
            ],
        };
        stream::iter(events)
    });

    let combined = previews
        .chain(tail)
        .map(|event| Ok(reply_event_to_axum(event)));

    Sse::new(combined).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn reply_event_to_axum(event: ReplyEvent) -> Event {
    let (event_type, data) = match event {
        ReplyEvent::Preview { text } => (
            "preview",
            json!({
                "type": "preview",
                "text": text
            }),
        ),
        ReplyEvent::Turn { turn } => (
            "turn",
            json!({
                "type": "turn",
                "role": turn.role,
                "content": turn.content
            }),
        ),
        ReplyEvent::Finished => (
            "finished",
            json!({
                "type": "finished"
            }),
        ),
        ReplyEvent::Error { message, retryable } => (
            "error",
            json!({
                "type": "error",
                "message": message,
                "retryable": retryable
            }),
        ),
        ReplyEvent::Done => (
            "done",
            json!({
                "type": "done"
            }),
        ),
    };

    Event::default().event(event_type).data(data.to_string())
}
