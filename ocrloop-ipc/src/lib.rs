//! Inter-process plumbing for ocrloop
//!
//! Frames travel as newline-delimited JSON envelopes. A single base
//! connection multiplexes calls to many logical services in both directions.

pub mod connection;
pub mod error;
pub mod protocol;
pub mod transport;

pub use connection::{Connection, Dispatcher};
pub use error::IpcError;
pub use protocol::{CallId, Fault, FaultKind, Frame, MessageEnvelope, ServiceId, IPC_PROTOCOL_VERSION};
pub use transport::{child_process, in_memory_pair, stdio, FrameReader, FrameWriter, MemoryReader, MemoryWriter};
