use thiserror::Error;

use crate::space::{PlaneId, Space};

/// Errors raised by the index-space model and the cut engine.
///
/// None of these are recovered internally: a misaligned array would silently
/// corrupt every statistic computed from it, so they always reach the caller.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CutError {
    /// A mask or array does not match the size of the space it is declared in.
    #[error("{what} has {actual} entries but {space} space has {expected}")]
    Shape {
        what: String,
        space: Space,
        expected: usize,
        actual: usize,
    },

    /// A conversion received an input of the wrong length.
    #[error("{operation} expects {expected} entries, got {actual}")]
    Length {
        operation: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("index {index} is out of range for {space} space of size {size}")]
    IndexOutOfRange {
        space: Space,
        index: usize,
        size: usize,
    },

    #[error("unknown cut '{0}'")]
    UnknownCut(String),

    #[error("unknown plane {0}")]
    UnknownPlane(PlaneId),

    /// The requested conversion has no well-defined direction.
    #[error("cannot project {from} data onto {to} space")]
    Projection { from: Space, to: Space },

    /// The stored event/track/cluster association is inconsistent.
    #[error("inconsistent run layout: {0}")]
    Layout(String),

    #[error("missing field '{field}' in group '{group}'")]
    MissingField { group: String, field: String },

    #[error("field '{group}/{field}' is not {expected}")]
    FieldType {
        group: String,
        field: String,
        expected: &'static str,
    },
}

pub type CutResult<T> = Result<T, CutError>;
