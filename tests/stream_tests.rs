//! Result Stream Tests
//!
//! Drives the pull-based streaming state machine against scripted
//! transports: batch delivery order, demand normalization, cancellation,
//! summary forcing and terminal failure handling.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use bolt_driver::{
    DriverError, DriverResult, Message, Record, ResultStream, ServerResponse, StreamCanceller,
    StreamState, StreamTransport, Value,
};

// ============================================================================
// Scripted transport
// ============================================================================

type CancelSlot = Arc<Mutex<Option<(usize, StreamCanceller)>>>;

/// Replays a fixed list of server responses and records what was sent.
#[derive(Default)]
struct ScriptedTransport {
    sent: Arc<Mutex<Vec<Message>>>,
    responses: VecDeque<ServerResponse>,
    /// When set to `(i, canceller)`, fires the canceller right before the
    /// i-th recv (0-based), simulating cancellation racing a delivery.
    cancel_on_recv: CancelSlot,
    recv_count: usize,
}

impl ScriptedTransport {
    fn new(responses: Vec<ServerResponse>) -> Self {
        Self {
            responses: responses.into(),
            ..Default::default()
        }
    }

    fn sent_log(&self) -> Arc<Mutex<Vec<Message>>> {
        Arc::clone(&self.sent)
    }

    fn cancel_slot(&self) -> CancelSlot {
        Arc::clone(&self.cancel_on_recv)
    }
}

#[async_trait]
impl StreamTransport for ScriptedTransport {
    async fn send(&mut self, message: &Message) -> DriverResult<()> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn recv(&mut self) -> DriverResult<ServerResponse> {
        // One yield per recv so a pull can be abandoned mid-exchange.
        tokio::task::yield_now().await;
        if let Some((at, canceller)) = self.cancel_on_recv.lock().unwrap().as_ref() {
            if self.recv_count == *at {
                canceller.cancel();
            }
        }
        self.recv_count += 1;
        self.responses
            .pop_front()
            .ok_or_else(|| DriverError::Connection("scripted transport exhausted".to_string()))
    }
}

/// Accepts sends but never produces a response.
#[derive(Default)]
struct HangingTransport;

#[async_trait]
impl StreamTransport for HangingTransport {
    async fn send(&mut self, _message: &Message) -> DriverResult<()> {
        Ok(())
    }

    async fn recv(&mut self) -> DriverResult<ServerResponse> {
        std::future::pending().await
    }
}

fn record(values: Vec<Value>) -> ServerResponse {
    ServerResponse::Record { values }
}

fn success_has_more() -> ServerResponse {
    let mut metadata = HashMap::new();
    metadata.insert("has_more".to_string(), Value::Boolean(true));
    ServerResponse::Success { metadata }
}

fn success_done() -> ServerResponse {
    let mut metadata = HashMap::new();
    metadata.insert("type".to_string(), Value::from("r"));
    ServerResponse::Success { metadata }
}

// ============================================================================
// Delivery and demand
// ============================================================================

#[tokio::test]
async fn test_unbounded_pull_delivers_all_records_in_order() {
    let transport = ScriptedTransport::new(vec![
        record(vec![Value::Integer(1)]),
        record(vec![Value::Integer(2)]),
        record(vec![Value::Integer(3)]),
        success_done(),
    ]);
    let sent = transport.sent_log();
    let mut stream = ResultStream::new(transport, 7);

    let batch = stream.request_records(-1).await.unwrap();
    assert_eq!(
        batch.records,
        vec![
            Record {
                values: vec![Value::Integer(1)]
            },
            Record {
                values: vec![Value::Integer(2)]
            },
            Record {
                values: vec![Value::Integer(3)]
            },
        ]
    );
    assert!(!batch.has_more);
    assert_eq!(stream.state(), StreamState::Completed);

    let summary = stream.summary().await.unwrap();
    assert_eq!(summary.metadata["type"], Value::from("r"));

    assert_eq!(
        sent.lock().unwrap().as_slice(),
        &[Message::Pull { n: -1, stmt_id: 7 }]
    );
}

#[tokio::test]
async fn test_batched_pull_returns_to_awaiting_between_batches() {
    let transport = ScriptedTransport::new(vec![
        record(vec![Value::from("a")]),
        success_has_more(),
        record(vec![Value::from("b")]),
        success_done(),
    ]);
    let sent = transport.sent_log();
    let mut stream = ResultStream::new(transport, 42);

    let first = stream.request_records(1).await.unwrap();
    assert_eq!(first.records.len(), 1);
    assert!(first.has_more);
    assert_eq!(stream.state(), StreamState::AwaitingPull);

    let second = stream.request_records(1).await.unwrap();
    assert_eq!(second.records.len(), 1);
    assert!(!second.has_more);
    assert_eq!(stream.state(), StreamState::Completed);

    assert_eq!(
        sent.lock().unwrap().as_slice(),
        &[
            Message::Pull { n: 1, stmt_id: 42 },
            Message::Pull { n: 1, stmt_id: 42 },
        ]
    );
}

#[tokio::test]
async fn test_non_positive_demand_normalized_to_fetch_all() {
    let transport = ScriptedTransport::new(vec![success_done()]);
    let sent = transport.sent_log();
    let mut stream = ResultStream::new(transport, -1);

    stream.request_records(0).await.unwrap();
    assert_eq!(
        sent.lock().unwrap().as_slice(),
        &[Message::Pull {
            n: -1,
            stmt_id: -1
        }]
    );
}

#[tokio::test]
async fn test_pull_after_completion_returns_empty_batch() {
    let transport = ScriptedTransport::new(vec![success_done()]);
    let mut stream = ResultStream::new(transport, 1);

    stream.request_records(-1).await.unwrap();
    assert_eq!(stream.state(), StreamState::Completed);

    // Script is exhausted, so any wire activity here would error.
    let batch = stream.request_records(10).await.unwrap();
    assert!(batch.records.is_empty());
    assert!(!batch.has_more);
}

// ============================================================================
// One outstanding request
// ============================================================================

#[tokio::test]
async fn test_second_request_while_one_outstanding_fails() {
    let mut stream = ResultStream::new(HangingTransport, 1);

    {
        // Poll the pull once so it hits the wire, then abandon it.
        let mut pending = tokio_test::task::spawn(stream.request_records(10));
        tokio_test::assert_pending!(pending.poll());
    }
    assert_eq!(stream.state(), StreamState::Streaming);

    let result = stream.request_records(1).await;
    assert!(matches!(result, Err(DriverError::ConcurrentPull)));
}

#[tokio::test]
async fn test_cancel_drains_abandoned_request_before_discarding() {
    let transport = ScriptedTransport::new(vec![
        // Responses to the abandoned pull.
        record(vec![Value::Integer(1)]),
        success_has_more(),
        // Responses to the discard.
        success_done(),
    ]);
    let sent = transport.sent_log();
    let mut stream = ResultStream::new(transport, 2);

    {
        let mut pending = tokio_test::task::spawn(stream.request_records(1));
        tokio_test::assert_pending!(pending.poll());
    }
    assert_eq!(stream.state(), StreamState::Streaming);

    stream.cancel().await.unwrap();
    assert_eq!(stream.state(), StreamState::Completed);
    assert_eq!(
        sent.lock().unwrap().as_slice(),
        &[
            Message::Pull { n: 1, stmt_id: 2 },
            Message::Discard { n: -1, stmt_id: 2 },
        ]
    );
}

// ============================================================================
// Failure handling
// ============================================================================

#[tokio::test]
async fn test_server_failure_is_terminal_and_replayed() {
    let transport = ScriptedTransport::new(vec![ServerResponse::Failure {
        code: "SyntaxError".to_string(),
        message: "unexpected token".to_string(),
    }]);
    let mut stream = ResultStream::new(transport, 1);

    let err = stream.request_records(-1).await.unwrap_err();
    match err {
        DriverError::StreamFailed { ref code, .. } => assert_eq!(code, "SyntaxError"),
        other => panic!("expected StreamFailed, got {:?}", other),
    }
    assert_eq!(stream.state(), StreamState::Failed);

    // Replayed without touching the (exhausted) transport.
    let err = stream.request_records(1).await.unwrap_err();
    match err {
        DriverError::StreamFailed { code, message } => {
            assert_eq!(code, "SyntaxError");
            assert_eq!(message, "unexpected token");
        }
        other => panic!("expected StreamFailed, got {:?}", other),
    }

    let err = stream.summary().await.unwrap_err();
    assert!(matches!(err, DriverError::StreamFailed { .. }));
}

#[tokio::test]
async fn test_ignored_response_fails_stream() {
    let transport = ScriptedTransport::new(vec![ServerResponse::Ignored]);
    let mut stream = ResultStream::new(transport, 1);

    let err = stream.request_records(1).await.unwrap_err();
    match err {
        DriverError::StreamFailed { code, .. } => assert_eq!(code, "RequestIgnored"),
        other => panic!("expected StreamFailed, got {:?}", other),
    }
    assert_eq!(stream.state(), StreamState::Failed);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancel_discards_remainder_and_awaits_ack() {
    // Two records were already on the wire when the discard goes out.
    let transport = ScriptedTransport::new(vec![
        record(vec![Value::Integer(1)]),
        record(vec![Value::Integer(2)]),
        success_done(),
    ]);
    let sent = transport.sent_log();
    let mut stream = ResultStream::new(transport, 9);

    stream.cancel().await.unwrap();
    assert_eq!(stream.state(), StreamState::Completed);
    assert_eq!(
        sent.lock().unwrap().as_slice(),
        &[Message::Discard { n: -1, stmt_id: 9 }]
    );

    // Idempotent: no further wire traffic.
    stream.cancel().await.unwrap();
    assert_eq!(sent.lock().unwrap().len(), 1);

    let summary = stream.summary().await.unwrap();
    assert_eq!(summary.metadata["type"], Value::from("r"));
}

#[tokio::test]
async fn test_cancel_after_completion_is_noop() {
    let transport = ScriptedTransport::new(vec![success_done()]);
    let sent = transport.sent_log();
    let mut stream = ResultStream::new(transport, 1);

    stream.request_records(-1).await.unwrap();
    stream.cancel().await.unwrap();

    assert_eq!(stream.state(), StreamState::Completed);
    assert_eq!(sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_canceller_flag_turns_next_request_into_discard() {
    let transport = ScriptedTransport::new(vec![success_done()]);
    let sent = transport.sent_log();
    let mut stream = ResultStream::new(transport, 3);

    let canceller = stream.canceller();
    canceller.cancel();
    assert!(canceller.is_cancelled());

    let batch = stream.request_records(50).await.unwrap();
    assert!(batch.records.is_empty());
    assert_eq!(stream.state(), StreamState::Completed);
    assert_eq!(
        sent.lock().unwrap().as_slice(),
        &[Message::Discard { n: -1, stmt_id: 3 }]
    );
}

#[tokio::test]
async fn test_cancellation_during_batch_drops_received_records() {
    let transport = ScriptedTransport::new(vec![
        record(vec![Value::Integer(1)]),
        success_has_more(),
        // Responses to the discard triggered by the cancellation.
        record(vec![Value::Integer(2)]),
        success_done(),
    ]);
    let sent = transport.sent_log();
    let cancel_slot = transport.cancel_slot();
    let mut stream = ResultStream::new(transport, 5);

    // Cancellation fires while the first batch is still being read.
    *cancel_slot.lock().unwrap() = Some((0, stream.canceller()));

    let batch = stream.request_records(1).await.unwrap();
    assert!(batch.records.is_empty());
    assert!(!batch.has_more);
    assert_eq!(stream.state(), StreamState::Completed);

    assert_eq!(
        sent.lock().unwrap().as_slice(),
        &[
            Message::Pull { n: 1, stmt_id: 5 },
            Message::Discard { n: -1, stmt_id: 5 },
        ]
    );
}

// ============================================================================
// Summary forcing
// ============================================================================

#[tokio::test]
async fn test_summary_forces_completion_with_unbounded_pulls() {
    let transport = ScriptedTransport::new(vec![
        record(vec![Value::Integer(1)]),
        success_has_more(),
        record(vec![Value::Integer(2)]),
        success_done(),
    ]);
    let sent = transport.sent_log();
    let mut stream = ResultStream::new(transport, 4);

    let summary = stream.summary().await.unwrap();
    assert_eq!(summary.metadata["type"], Value::from("r"));
    assert_eq!(stream.state(), StreamState::Completed);

    assert_eq!(
        sent.lock().unwrap().as_slice(),
        &[
            Message::Pull { n: -1, stmt_id: 4 },
            Message::Pull { n: -1, stmt_id: 4 },
        ]
    );
}

#[tokio::test]
async fn test_consume_forces_completion_with_discard() {
    let transport = ScriptedTransport::new(vec![success_done()]);
    let sent = transport.sent_log();
    let mut stream = ResultStream::new(transport, 6);

    let summary = stream.consume().await.unwrap();
    assert_eq!(summary.metadata["type"], Value::from("r"));
    assert_eq!(
        sent.lock().unwrap().as_slice(),
        &[Message::Discard { n: -1, stmt_id: 6 }]
    );
}

// ============================================================================
// Run exchange
// ============================================================================

#[tokio::test]
async fn test_run_surfaces_statement_id_and_field_names() {
    let mut run_metadata = HashMap::new();
    run_metadata.insert("stmt_id".to_string(), Value::Integer(17));
    run_metadata.insert(
        "fields".to_string(),
        Value::List(vec![Value::from("name"), Value::from("age")]),
    );

    let transport = ScriptedTransport::new(vec![
        ServerResponse::Success {
            metadata: run_metadata,
        },
        success_done(),
    ]);
    let sent = transport.sent_log();

    let mut stream = ResultStream::run(
        transport,
        "MATCH (n) RETURN n.name, n.age",
        HashMap::new(),
        HashMap::new(),
    )
    .await
    .unwrap();

    assert_eq!(stream.statement_id(), 17);
    assert_eq!(stream.state(), StreamState::AwaitingPull);
    assert_eq!(
        stream.run_metadata()["fields"],
        Value::List(vec![Value::from("name"), Value::from("age")])
    );

    stream.request_records(-1).await.unwrap();
    {
        let sent = sent.lock().unwrap();
        assert!(matches!(sent[0], Message::Run { .. }));
        assert_eq!(sent[1], Message::Pull { n: -1, stmt_id: 17 });
    }
}

#[tokio::test]
async fn test_run_without_statement_id_uses_sentinel() {
    let transport = ScriptedTransport::new(vec![ServerResponse::Success {
        metadata: HashMap::new(),
    }]);

    let stream = ResultStream::run(transport, "RETURN 1", HashMap::new(), HashMap::new())
        .await
        .unwrap();
    assert_eq!(stream.statement_id(), -1);
}

#[tokio::test]
async fn test_run_failure_propagates() {
    let transport = ScriptedTransport::new(vec![ServerResponse::Failure {
        code: "Forbidden".to_string(),
        message: "no access".to_string(),
    }]);

    let result = ResultStream::run(transport, "RETURN 1", HashMap::new(), HashMap::new()).await;
    match result {
        Err(DriverError::StreamFailed { code, .. }) => assert_eq!(code, "Forbidden"),
        other => panic!("expected StreamFailed, got {:?}", other.err()),
    }
}
