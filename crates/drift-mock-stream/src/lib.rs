// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! drift-mock-stream
#![deny(unsafe_code)]
#![warn(missing_docs)]

use drift_taxonomy::ReifiedError;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::yield_now;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{Stream, StreamExt};

// ---------------------------------------------------------------------------
// Recorded shapes
// ---------------------------------------------------------------------------

/// One statement segment of a recorded query result.
#[derive(Debug, Clone, Default)]
pub struct RecordedStatement {
    /// Row objects, in recorded order.
    pub rows: Vec<Value>,
    /// Field descriptors for the segment.
    pub fields: Vec<Value>,
}

/// A complete recorded query result, possibly multi-statement.
#[derive(Debug, Clone, Default)]
pub struct RecordedResultSet {
    /// Statement segments, in execution order.
    pub statements: Vec<RecordedStatement>,
    /// Index of the statement that failed, when the query errored.
    pub err_query_index: Option<usize>,
    /// The recorded error, when the query errored.
    pub error: Option<ReifiedError>,
}

/// The aggregate a completed query resolves to.
///
/// Single-statement queries yield flat `results`/`fields` arrays;
/// multi-statement queries yield one array per statement.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutput {
    /// Row data.
    pub results: Value,
    /// Field descriptors.
    pub fields: Value,
}

impl RecordedResultSet {
    /// The aggregate shape this recording resolves to.
    #[must_use]
    pub fn aggregate(&self) -> QueryOutput {
        if self.statements.len() == 1 {
            let only = &self.statements[0];
            QueryOutput {
                results: Value::Array(only.rows.clone()),
                fields: Value::Array(only.fields.clone()),
            }
        } else {
            QueryOutput {
                results: Value::Array(
                    self.statements
                        .iter()
                        .map(|s| Value::Array(s.rows.clone()))
                        .collect(),
                ),
                fields: Value::Array(
                    self.statements
                        .iter()
                        .map(|s| Value::Array(s.fields.clone()))
                        .collect(),
                ),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Events emitted during playback, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryEvent {
    /// Field descriptors for statement `index`.
    Fields(Vec<Value>, usize),
    /// One row of statement `index`.
    Result(Value, usize),
    /// The recorded failure, reified.
    Error(ReifiedError),
    /// Terminal event.
    End,
}

/// Node-style completion callback: `Err` on failure, `Ok((results,
/// fields))` on success.
pub type CompletionCallback = Box<dyn FnOnce(Result<QueryOutput, ReifiedError>) + Send>;

// ---------------------------------------------------------------------------
// QueryPlayback
// ---------------------------------------------------------------------------

/// A query being played back.
///
/// Two explicit surfaces replace the emitter-that-is-a-promise: the event
/// stream ([`QueryPlayback::into_event_stream`] /
/// [`QueryPlayback::into_row_stream`]) and the awaitable aggregate
/// ([`QueryPlayback::wait`]).
pub struct QueryPlayback {
    events: mpsc::UnboundedReceiver<QueryEvent>,
    outcome: oneshot::Receiver<Result<QueryOutput, ReifiedError>>,
}

impl QueryPlayback {
    /// Start playback of `recorded` on the next turn of the loop.
    #[must_use]
    pub fn start(recorded: RecordedResultSet, callback: Option<CompletionCallback>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        tokio::spawn(play(recorded, events_tx, outcome_tx, callback));
        Self {
            events: events_rx,
            outcome: outcome_rx,
        }
    }

    /// Await the aggregate result, consuming the playback.
    pub async fn wait(self) -> Result<QueryOutput, ReifiedError> {
        self.outcome
            .await
            .unwrap_or_else(|_| Err(ReifiedError::capture("Error", "query playback dropped")))
    }

    /// Next playback event; `None` after [`QueryEvent::End`].
    pub async fn next_event(&mut self) -> Option<QueryEvent> {
        self.events.recv().await
    }

    /// The full event stream.
    #[must_use]
    pub fn into_event_stream(self) -> impl Stream<Item = QueryEvent> {
        UnboundedReceiverStream::new(self.events)
    }

    /// Object-mode row stream: rows only, statement markers dropped.
    #[must_use]
    pub fn into_row_stream(self) -> impl Stream<Item = Value> {
        self.into_event_stream().filter_map(|event| match event {
            QueryEvent::Result(row, _) => Some(row),
            _ => None,
        })
    }
}

async fn play(
    recorded: RecordedResultSet,
    events: mpsc::UnboundedSender<QueryEvent>,
    outcome: oneshot::Sender<Result<QueryOutput, ReifiedError>>,
    callback: Option<CompletionCallback>,
) {
    // Playback is never synchronous with query construction.
    yield_now().await;

    for (index, statement) in recorded.statements.iter().enumerate() {
        if recorded.err_query_index == Some(index) {
            break;
        }
        let _ = events.send(QueryEvent::Fields(statement.fields.clone(), index));
        for row in &statement.rows {
            let _ = events.send(QueryEvent::Result(row.clone(), index));
        }
    }

    match recorded.error.clone() {
        Some(error) => {
            let _ = events.send(QueryEvent::Error(error.clone()));
            if let Some(callback) = callback {
                callback(Err(error.clone()));
            }
            let _ = outcome.send(Err(error));
        }
        None => {
            let aggregate = recorded.aggregate();
            if let Some(callback) = callback {
                callback(Ok(aggregate.clone()));
            }
            let _ = outcome.send(Ok(aggregate));
        }
    }
    let _ = events.send(QueryEvent::End);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
