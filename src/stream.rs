//! Flow-controlled result streaming.
//!
//! Each running query gets one [`ResultStream`]: a pull-based state machine
//! that exchanges Pull/Discard requests with the server, delivers records in
//! emission order and caches the terminal summary. The server never sends
//! more records than the caller last asked for, so backpressure is entirely
//! caller-driven.
//!
//! State transitions:
//! `AwaitingPull -> Streaming -> (AwaitingPull | Discarding) -> Completed | Failed`

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::connection::StreamTransport;
use crate::error::{DriverError, DriverResult};
use crate::protocol::message::{Message, ABSENT_STATEMENT_ID, FETCH_ALL};
use crate::protocol::response::ServerResponse;
use crate::protocol::value::Value;

/// Where a result stream currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Ready for the next Pull or Discard.
    AwaitingPull,
    /// A Pull is on the wire and its responses are being consumed.
    Streaming,
    /// A Discard is on the wire; records still in flight are dropped.
    Discarding,
    /// Terminal: summary available.
    Completed,
    /// Terminal: the stream failed; the connection needs a reset.
    Failed,
}

/// One result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub values: Vec<Value>,
}

/// Terminal metadata of a completed stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub metadata: HashMap<String, Value>,
}

/// Records delivered by one `request_records` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordBatch {
    pub records: Vec<Record>,
    /// Whether the server still holds records for this result.
    pub has_more: bool,
}

/// Handle for requesting cancellation from another task.
///
/// Setting the flag is always safe, including concurrently with an in-flight
/// delivery; the stream observes it between batches and finishes by
/// discarding the remainder.
#[derive(Debug, Clone)]
pub struct StreamCanceller {
    flag: Arc<AtomicBool>,
}

impl StreamCanceller {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Pull-based handle over one in-flight query result.
///
/// Owns the connection's transport for the duration of the stream; exactly
/// one Pull or Discard may be outstanding at a time, preserving the strictly
/// sequential exchange the connection requires.
pub struct ResultStream<T: StreamTransport> {
    transport: T,
    stmt_id: i64,
    state: StreamState,
    run_metadata: HashMap<String, Value>,
    summary: Option<Summary>,
    failure: Option<(String, String)>,
    cancelled: Arc<AtomicBool>,
}

impl<T: StreamTransport> ResultStream<T> {
    /// Wraps a transport for a statement already acknowledged by the server.
    pub fn new(transport: T, stmt_id: i64) -> Self {
        Self {
            transport,
            stmt_id,
            state: StreamState::AwaitingPull,
            run_metadata: HashMap::new(),
            summary: None,
            failure: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Submits a query and waits for its acknowledgment, yielding a stream
    /// ready for its first Pull.
    ///
    /// The statement id is taken from the acknowledgment metadata; servers
    /// omit it for auto-commit results, in which case Pull/Discard address
    /// the current statement implicitly.
    pub async fn run(
        mut transport: T,
        query: impl Into<String>,
        parameters: HashMap<String, Value>,
        metadata: HashMap<String, Value>,
    ) -> DriverResult<Self> {
        let message = Message::Run {
            query: query.into(),
            parameters,
            metadata,
        };
        transport.send(&message).await?;

        match transport.recv().await? {
            ServerResponse::Success { metadata } => {
                let stmt_id = metadata
                    .get("stmt_id")
                    .and_then(Value::as_i64)
                    .unwrap_or(ABSENT_STATEMENT_ID);
                debug!(stmt_id, "run acknowledged");
                let mut stream = Self::new(transport, stmt_id);
                stream.run_metadata = metadata;
                Ok(stream)
            }
            ServerResponse::Failure { code, message } => {
                Err(DriverError::StreamFailed { code, message })
            }
            other => Err(DriverError::Protocol(format!(
                "unexpected response to RUN: {:?}",
                other
            ))),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn statement_id(&self) -> i64 {
        self.stmt_id
    }

    /// Metadata from the run acknowledgment (result field names and such).
    pub fn run_metadata(&self) -> &HashMap<String, Value> {
        &self.run_metadata
    }

    pub fn canceller(&self) -> StreamCanceller {
        StreamCanceller {
            flag: self.cancelled.clone(),
        }
    }

    /// Hands the transport back once the stream is done with it.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Requests up to `n` more records (`n <= 0` means all remaining) and
    /// delivers the resulting batch in server emission order.
    ///
    /// Fails with [`DriverError::ConcurrentPull`] if a previous Pull or
    /// Discard is still outstanding, which happens when an earlier call's
    /// future was dropped mid-exchange. On a completed stream this returns an
    /// empty batch; on a failed stream it replays the original failure.
    pub async fn request_records(&mut self, n: i64) -> DriverResult<RecordBatch> {
        match self.state {
            StreamState::Failed => return Err(self.replay_failure()),
            StreamState::Completed => return Ok(RecordBatch::default()),
            StreamState::Streaming | StreamState::Discarding => {
                return Err(DriverError::ConcurrentPull)
            }
            StreamState::AwaitingPull => {}
        }

        if self.cancelled.load(Ordering::SeqCst) {
            self.discard_remaining().await?;
            return Ok(RecordBatch::default());
        }

        let n = if n <= 0 { FETCH_ALL } else { n };
        let pull = Message::Pull {
            n,
            stmt_id: self.stmt_id,
        };
        if let Err(e) = self.transport.send(&pull).await {
            return Err(self.fail(e));
        }
        self.state = StreamState::Streaming;
        debug!(n, stmt_id = self.stmt_id, "requested records");

        let mut records = Vec::new();
        loop {
            let response = match self.transport.recv().await {
                Ok(response) => response,
                Err(e) => return Err(self.fail(e)),
            };
            match response {
                ServerResponse::Record { values } => records.push(Record { values }),
                ServerResponse::Success { metadata } => {
                    let has_more = self.apply_success(metadata);
                    if has_more && self.cancelled.load(Ordering::SeqCst) {
                        // Cancellation landed during this batch: nothing more
                        // is delivered, the remainder is discarded.
                        self.discard_remaining().await?;
                        return Ok(RecordBatch::default());
                    }
                    return Ok(RecordBatch { records, has_more });
                }
                ServerResponse::Failure { code, message } => {
                    return Err(self.fail(DriverError::StreamFailed { code, message }))
                }
                ServerResponse::Ignored => return Err(self.fail(ignored_error())),
            }
        }
    }

    /// Cancels the stream: discards every remaining record and waits for the
    /// server's acknowledgment, so the connection is never handed back with a
    /// response still pending on the wire. Idempotent; a no-op once terminal.
    pub async fn cancel(&mut self) -> DriverResult<()> {
        self.cancelled.store(true, Ordering::SeqCst);

        if matches!(
            self.state,
            StreamState::Streaming | StreamState::Discarding
        ) {
            // An earlier exchange was abandoned mid-flight; its responses are
            // still queued on the wire and must be consumed first.
            self.drain_pending_exchange().await?;
        }

        match self.state {
            StreamState::Completed | StreamState::Failed => Ok(()),
            StreamState::AwaitingPull => self.discard_remaining().await,
            StreamState::Streaming | StreamState::Discarding => {
                unreachable!("drained exchange cannot leave the stream mid-flight")
            }
        }
    }

    /// Returns the terminal summary, forcing completion with unbounded pulls
    /// if the stream is still open. Records fetched along the way are
    /// dropped; callers wanting them should pull explicitly first.
    pub async fn summary(&mut self) -> DriverResult<Summary> {
        loop {
            match self.state {
                StreamState::Completed => {
                    return Ok(self.summary.clone().unwrap_or_default());
                }
                StreamState::Failed => return Err(self.replay_failure()),
                _ => {
                    self.request_records(FETCH_ALL).await?;
                }
            }
        }
    }

    /// Discards whatever remains and returns the summary.
    pub async fn consume(&mut self) -> DriverResult<Summary> {
        self.cancel().await?;
        self.summary().await
    }

    /// Applies a Success for a Pull: back to `AwaitingPull` when the server
    /// holds more records, otherwise terminal with the summary cached.
    fn apply_success(&mut self, metadata: HashMap<String, Value>) -> bool {
        let has_more = metadata
            .get("has_more")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if has_more {
            self.state = StreamState::AwaitingPull;
        } else {
            self.summary = Some(Summary { metadata });
            self.state = StreamState::Completed;
            debug!(stmt_id = self.stmt_id, "stream completed");
        }
        has_more
    }

    /// Sends an unbounded Discard and consumes responses until the server
    /// acknowledges, dropping any records that were already in flight.
    async fn discard_remaining(&mut self) -> DriverResult<()> {
        let discard = Message::Discard {
            n: FETCH_ALL,
            stmt_id: self.stmt_id,
        };
        if let Err(e) = self.transport.send(&discard).await {
            return Err(self.fail(e));
        }
        self.state = StreamState::Discarding;
        debug!(stmt_id = self.stmt_id, "discarding remainder");

        loop {
            let response = match self.transport.recv().await {
                Ok(response) => response,
                Err(e) => return Err(self.fail(e)),
            };
            match response {
                ServerResponse::Record { .. } => continue,
                ServerResponse::Success { metadata } => {
                    self.summary = Some(Summary { metadata });
                    self.state = StreamState::Completed;
                    debug!(stmt_id = self.stmt_id, "discard acknowledged");
                    return Ok(());
                }
                ServerResponse::Failure { code, message } => {
                    // Terminal either way; cancellation itself still succeeded.
                    let _ = self.fail(DriverError::StreamFailed { code, message });
                    return Ok(());
                }
                ServerResponse::Ignored => {
                    let _ = self.fail(ignored_error());
                    return Ok(());
                }
            }
        }
    }

    /// Consumes responses left queued by an abandoned Pull/Discard future.
    async fn drain_pending_exchange(&mut self) -> DriverResult<()> {
        while matches!(
            self.state,
            StreamState::Streaming | StreamState::Discarding
        ) {
            let response = match self.transport.recv().await {
                Ok(response) => response,
                Err(e) => return Err(self.fail(e)),
            };
            match response {
                ServerResponse::Record { .. } => continue,
                ServerResponse::Success { metadata } => {
                    if self.state == StreamState::Discarding {
                        self.summary = Some(Summary { metadata });
                        self.state = StreamState::Completed;
                    } else {
                        self.apply_success(metadata);
                    }
                }
                ServerResponse::Failure { code, message } => {
                    let _ = self.fail(DriverError::StreamFailed { code, message });
                }
                ServerResponse::Ignored => {
                    let _ = self.fail(ignored_error());
                }
            }
        }
        Ok(())
    }

    /// Marks the stream failed and records the failure for replay on later
    /// calls.
    fn fail(&mut self, err: DriverError) -> DriverError {
        self.state = StreamState::Failed;
        match &err {
            DriverError::StreamFailed { code, message } => {
                warn!(code = code.as_str(), "stream failed");
                self.failure = Some((code.clone(), message.clone()));
            }
            other => {
                warn!(error = %other, "stream failed");
                self.failure = Some(("TransportError".to_string(), other.to_string()));
            }
        }
        err
    }

    fn replay_failure(&self) -> DriverError {
        let (code, message) = self
            .failure
            .clone()
            .unwrap_or_else(|| ("Unknown".to_string(), "stream already failed".to_string()));
        DriverError::StreamFailed { code, message }
    }
}

fn ignored_error() -> DriverError {
    DriverError::StreamFailed {
        code: "RequestIgnored".to_string(),
        message: "the server ignored the request because the connection is in a failed state"
            .to_string(),
    }
}
