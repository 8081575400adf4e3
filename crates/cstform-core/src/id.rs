//! Stable ID newtypes for stored records.
//!
//! All IDs are distinct newtype wrappers over `i64`, aligned with SQLite's
//! `INTEGER PRIMARY KEY`, so that a `ConstituentId` cannot be accidentally
//! used where an `OperationId` is expected.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a single constituent. Stable for the constituent's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConstituentId(pub i64);

/// Identity of a conceptual schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SchemaId(pub i64);

/// Identity of an operation schema (the DAG container).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OssId(pub i64);

/// Identity of an operation node inside an operation schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OperationId(pub i64);

/// Identity of an argument edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArgumentId(pub i64);

/// Identity of a substitution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubstitutionId(pub i64);

/// Identity of an inheritance record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InheritanceId(pub i64);

// Display implementations -- just print the inner value.

macro_rules! display_inner {
    ($($ty:ty),* $(,)?) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }
        )*
    };
}

display_inner!(
    ConstituentId,
    SchemaId,
    OssId,
    OperationId,
    ArgumentId,
    SubstitutionId,
    InheritanceId,
);
