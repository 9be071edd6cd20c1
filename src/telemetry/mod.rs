//! Telemetry ingestion: transports, framing, decoding, and the simulator.
//!
//! Raw text from a transport is cut into records by the [`LineFramer`],
//! and each record is decoded into zero or more [`TelemetryEvent`]s.

pub mod framer;
pub mod protocol;
#[cfg(feature = "serial")]
pub mod serial;
pub mod simulator;
pub mod transport;
pub mod types;

pub use framer::LineFramer;
pub use protocol::decode;
#[cfg(feature = "serial")]
pub use serial::{available_ports, SerialTransport};
pub use simulator::Simulator;
pub use transport::{ChannelTransport, ChunkSender, FileTransport, ReaderTransport, Transport};
pub use types::{ConnectionState, SourceKind, TelemetryEvent};
