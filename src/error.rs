//! Pipeline error taxonomy.
//!
//! Nothing here is retried automatically: decode failures drop the message,
//! broken traces skip the catalogue and path/hop events, sink failures are
//! counted and the turn moves on.

use thiserror::Error;

/// The bus message did not carry a parseable OTLP `TracesData` payload.
#[derive(Debug, Error)]
#[error("undecodable span payload: {0}")]
pub struct DecodeError(#[from] pub prost::DecodeError);

/// The spans of a bundle do not assemble into a single rooted call graph.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BrokenTrace {
    #[error("trace has no root span")]
    NoRoot,
    #[error("trace has {0} root spans")]
    MultipleRoots(usize),
    #[error("span {span_id} references missing parent {parent_span_id}")]
    MissingParent {
        span_id: String,
        parent_span_id: String,
    },
    #[error("trace contains a parent/child cycle")]
    Cycle,
}
