//! Error taxonomy for the bridge core, matching §7 of the specification.
//!
//! Every enum here is a leaf: none of them wrap each other across crate
//! boundaries, since each error is meant to be handled (logged, counted, or
//! turned into a protocol-level response) at the point it is produced rather
//! than threaded further up as a generic "something went wrong".

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("unknown canonical variable: {0}")]
    Unknown(String),
    #[error("catalog index out of range: {0}")]
    OutOfRange(u32),
    #[error("variable {0} is not a scalar-storage field")]
    TypeMismatch(String),
    #[error("duplicate canonical name in catalog: {0}")]
    DuplicateName(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed inbound frame: {0}")]
    MalformedFrame(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("shared memory mapping unavailable: {0}")]
    MappingUnavailable(String),
    #[error("snapshot index out of range: {0}")]
    OutOfRange(u32),
    #[error("reader observed data_valid == 0, retry or skip this sample")]
    Updating,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown canonical variable: {0}")]
    Unknown(String),
    #[error("command value cannot be coerced: {0}")]
    TypeMismatch(String),
    #[error("malformed command JSON: {0}")]
    Malformed(String),
}
