//! Client-side engine for the Bolt binary graph query protocol.
//!
//! Covers the pieces every session and transaction layer builds on:
//! versioned message encoding, pull-based result streaming with explicit
//! flow control, and connection pool health metrics.
//!
//! # Protocol overview
//!
//! Requests travel as structured envelopes (field count + signature opcode +
//! packed fields) framed into 16-bit length-prefixed chunks over a persistent
//! connection. The exchange per connection is strictly sequential: one
//! request awaits its responses before the next goes out. Result rows only
//! flow when the caller grants demand through Pull, so the server can never
//! outrun the consumer.
//!
//! # Example
//!
//! ```rust,no_run
//! use bolt_driver::{BoltConnection, ProtocolVersion, ResultStream};
//! use std::collections::HashMap;
//! use tokio::net::TcpStream;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Socket setup and version negotiation happen before this layer.
//!     let socket = TcpStream::connect("localhost:7687").await?;
//!     let connection = BoltConnection::new(socket, ProtocolVersion::V4_0);
//!
//!     let mut stream = ResultStream::run(
//!         connection,
//!         "MATCH (n) RETURN n.name",
//!         HashMap::new(),
//!         HashMap::new(),
//!     )
//!     .await?;
//!
//!     let batch = stream.request_records(100).await?;
//!     for record in &batch.records {
//!         println!("{:?}", record.values);
//!     }
//!
//!     let summary = stream.summary().await?;
//!     println!("{:?}", summary.metadata);
//!     Ok(())
//! }
//! ```

pub mod connection;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod stream;

pub use connection::{BoltConnection, StreamTransport, MAX_CHUNK_SIZE, MAX_MESSAGE_SIZE};
pub use error::{DriverError, DriverResult};
pub use pool::{PoolMetrics, PoolStatus, ServerAddress};
pub use protocol::{
    count_metadata, Message, MessageWriter, ProtocolVersion, ServerResponse, Value,
    ABSENT_STATEMENT_ID, FETCH_ALL,
};
pub use stream::{Record, RecordBatch, ResultStream, StreamCanceller, StreamState, Summary};
