//! Core, transport-agnostic building blocks: the variable catalog, the
//! binary host-facing codec, the shared-memory snapshot store, the JSON
//! payload builder, and the inbound command queue. Nothing in this crate
//! touches a socket — that's `bridge-net`'s job.

pub mod catalog;
pub mod codec;
pub mod command_queue;
pub mod errors;
pub mod hash;
pub mod payload;
pub mod snapshot;

pub use catalog::{VariableCatalog, VariableRef};
pub use codec::{CommandWireRecord, RecordKind, TelemetryRecord, TelemetryValue};
pub use command_queue::CommandQueue;
pub use errors::{CatalogError, CodecError, CommandError, SnapshotError};
pub use payload::{PayloadArtifact, PayloadBuilder, PayloadHeader};
pub use snapshot::{ReadView, SnapshotStore, WriteGuard};
