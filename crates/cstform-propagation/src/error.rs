//! Error type for propagation sessions.
//!
//! Every cascade returns `Result<_, PropagationError>`; the first error ends
//! the session and the caller rolls the surrounding transaction back.

use thiserror::Error;

use cstform_core::id::{ConstituentId, OperationId, SchemaId};
use cstform_core::CoreError;
use cstform_storage::StorageError;

/// Errors produced by schema views and the propagation engine.
#[derive(Debug, Error)]
pub enum PropagationError {
    /// Both sides of a substitution pair were already replaced downstream
    /// by constituents that cannot be merged.
    #[error(
        "substituting {original} with {substitution} contradicts the substitutions of operation {operation}"
    )]
    Contradiction {
        operation: OperationId,
        original: ConstituentId,
        substitution: ConstituentId,
    },

    /// A constituent id was passed to a schema that does not contain it.
    #[error("constituent {constituent} is not part of schema {schema}")]
    ConstituentNotInSchema {
        constituent: ConstituentId,
        schema: SchemaId,
    },

    /// The operation is not part of the loaded operation schema.
    #[error("operation {0} not found in operation schema")]
    UnknownOperation(OperationId),

    /// The operation cannot take part in the requested action.
    #[error("operation {operation}: {reason}")]
    InvalidOperation {
        operation: OperationId,
        reason: String,
    },

    /// Storage layer failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Data model failure (alias validation, cyclic ordering).
    #[error(transparent)]
    Core(#[from] CoreError),
}
