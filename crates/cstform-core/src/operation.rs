//! Operation-schema records: schemas, operations, arguments, substitutions
//! and inheritance links.
//!
//! An operation schema (OSS) is a DAG of [`Operation`]s connected by
//! [`Argument`] edges. A SYNTHESIS operation merges its operands' schemas into
//! its result schema; [`Substitution`] records identify operand constituents
//! and [`Inheritance`] records link every copied constituent to its parent.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::id::{
    ArgumentId, ConstituentId, InheritanceId, OperationId, OssId, SchemaId, SubstitutionId,
};

/// Schema header (the constituents themselves are stored separately).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub id: SchemaId,
    pub alias: String,
    pub title: String,
}

/// Operation schema header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Oss {
    pub id: OssId,
    pub alias: String,
}

/// Kind of an operation node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    /// Leaf bound to an externally edited schema.
    Input,
    /// Merge of one or more argument operations.
    Synthesis,
}

impl OperationType {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::Input => "input",
            OperationType::Synthesis => "synthesis",
        }
    }

    pub fn parse(code: &str) -> Result<OperationType, CoreError> {
        match code {
            "input" => Ok(OperationType::Input),
            "synthesis" => Ok(OperationType::Synthesis),
            _ => Err(CoreError::UnknownOperationType {
                code: code.to_string(),
            }),
        }
    }
}

/// A node of the operation DAG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub oss: OssId,
    pub operation_type: OperationType,
    pub alias: String,
    /// Bound schema: the input schema or the executed synthesis result.
    pub result: Option<SchemaId>,
}

/// Directed edge `operation -> argument` with an explicit operand order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argument {
    pub id: ArgumentId,
    pub operation: OperationId,
    pub argument: OperationId,
    pub order: u32,
}

/// Identification of `original` with `substitution` inside one synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substitution {
    pub id: SubstitutionId,
    pub operation: OperationId,
    pub original: ConstituentId,
    pub substitution: ConstituentId,
}

/// `child` is the copy of `parent` inside the result of `operation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inheritance {
    pub id: InheritanceId,
    pub operation: OperationId,
    pub parent: ConstituentId,
    pub child: ConstituentId,
}
