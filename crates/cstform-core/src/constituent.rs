//! Constituents: the typed, named atomic units of a conceptual schema.
//!
//! A [`Constituent`] carries an alias made of its [`CstType`] prefix and an
//! index (`X1`, `D4`), a formal expression, raw text with entity references
//! and the resolved form of that text. [`CstUpdate`] is the partial-update
//! record: every updatable field is an `Option`, `None` meaning "not part of
//! this change".

use std::fmt;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::id::{ConstituentId, SchemaId};
use crate::text::{extract_globals, replace_globals, AliasMapping, TextResolver};

/// Kind of a constituent. Each kind owns an alias prefix letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CstType {
    /// Basic set (`X`).
    Basic,
    /// Constant set (`C`).
    Constant,
    /// Structured type (`S`).
    Structured,
    /// Axiom (`A`).
    Axiom,
    /// Term (`D`).
    Term,
    /// Term-function (`F`).
    Function,
    /// Predicate-function (`P`).
    Predicate,
    /// Theorem (`T`).
    Theorem,
    /// Nominal (`N`).
    Nominal,
}

impl CstType {
    /// All kinds, in their canonical listing order.
    pub const ALL: [CstType; 9] = [
        CstType::Basic,
        CstType::Constant,
        CstType::Structured,
        CstType::Axiom,
        CstType::Term,
        CstType::Function,
        CstType::Predicate,
        CstType::Theorem,
        CstType::Nominal,
    ];

    /// Alias prefix letter for this kind.
    pub fn prefix(self) -> char {
        match self {
            CstType::Basic => 'X',
            CstType::Constant => 'C',
            CstType::Structured => 'S',
            CstType::Axiom => 'A',
            CstType::Term => 'D',
            CstType::Function => 'F',
            CstType::Predicate => 'P',
            CstType::Theorem => 'T',
            CstType::Nominal => 'N',
        }
    }

    /// Decodes a prefix letter.
    pub fn from_prefix(prefix: char) -> Option<CstType> {
        CstType::ALL.into_iter().find(|t| t.prefix() == prefix)
    }

    /// Kernel kinds are the ones that other kinds are defined over.
    pub fn is_kernel(self) -> bool {
        matches!(self, CstType::Basic | CstType::Constant | CstType::Structured)
    }

    /// Stable storage code.
    pub fn as_str(self) -> &'static str {
        match self {
            CstType::Basic => "basic",
            CstType::Constant => "constant",
            CstType::Structured => "structured",
            CstType::Axiom => "axiom",
            CstType::Term => "term",
            CstType::Function => "function",
            CstType::Predicate => "predicate",
            CstType::Theorem => "theorem",
            CstType::Nominal => "nominal",
        }
    }

    /// Decodes a storage code produced by [`CstType::as_str`].
    pub fn parse(code: &str) -> Result<CstType, CoreError> {
        CstType::ALL
            .into_iter()
            .find(|t| t.as_str() == code)
            .ok_or_else(|| CoreError::UnknownConstituentType {
                code: code.to_string(),
            })
    }
}

impl fmt::Display for CstType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds the alias `<prefix><index>`.
pub fn make_alias(cst_type: CstType, index: u32) -> String {
    format!("{}{}", cst_type.prefix(), index)
}

/// Splits an alias into its kind and numeric index.
pub fn parse_alias(alias: &str) -> Result<(CstType, u32), CoreError> {
    let invalid = || CoreError::InvalidAlias {
        alias: alias.to_string(),
    };
    let mut chars = alias.chars();
    let prefix = chars.next().ok_or_else(invalid)?;
    let cst_type = CstType::from_prefix(prefix).ok_or_else(invalid)?;
    let index = chars.as_str().parse::<u32>().map_err(|_| invalid())?;
    Ok((cst_type, index))
}

/// One manually entered word form of a term.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TermForm {
    /// Inflected text.
    pub text: String,
    /// Grammeme tags, comma separated (`nomn,plur`).
    pub tags: String,
}

/// A stored constituent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constituent {
    pub id: ConstituentId,
    /// Owning schema.
    pub schema: SchemaId,
    pub alias: String,
    pub cst_type: CstType,
    /// Dense 0-based position inside the schema.
    pub order: u32,
    pub convention: String,
    pub definition_formal: String,
    pub definition_raw: String,
    pub definition_resolved: String,
    pub term_raw: String,
    pub term_resolved: String,
    pub term_forms: Vec<TermForm>,
}

impl Constituent {
    /// Copies the payload fields into a draft (no id, no schema, no order).
    pub fn to_draft(&self) -> ConstituentDraft {
        ConstituentDraft {
            alias: self.alias.clone(),
            cst_type: self.cst_type,
            convention: self.convention.clone(),
            definition_formal: self.definition_formal.clone(),
            definition_raw: self.definition_raw.clone(),
            definition_resolved: self.definition_resolved.clone(),
            term_raw: self.term_raw.clone(),
            term_resolved: self.term_resolved.clone(),
            term_forms: self.term_forms.clone(),
        }
    }

    /// Aliases referenced from the formal expression and the raw texts.
    pub fn references(&self, resolver: &dyn TextResolver) -> IndexSet<String> {
        let mut result = extract_globals(&self.definition_formal);
        result.extend(resolver.extract_references(&self.term_raw));
        result.extend(resolver.extract_references(&self.definition_raw));
        result
    }

    /// Rewrites references (and optionally the own alias) through `mapping`.
    ///
    /// Returns `true` if anything changed.
    pub fn apply_mapping(
        &mut self,
        mapping: &AliasMapping,
        resolver: &dyn TextResolver,
        change_alias: bool,
    ) -> bool {
        let mut modified = false;
        if change_alias {
            if let Some(alias) = mapping.get(&self.alias) {
                if *alias != self.alias {
                    self.alias = alias.clone();
                    modified = true;
                }
            }
        }
        let formal = replace_globals(&self.definition_formal, mapping);
        if formal != self.definition_formal {
            self.definition_formal = formal;
            modified = true;
        }
        let term = resolver.replace_references(&self.term_raw, mapping);
        if term != self.term_raw {
            self.term_raw = term;
            modified = true;
        }
        let definition = resolver.replace_references(&self.definition_raw, mapping);
        if definition != self.definition_raw {
            self.definition_raw = definition;
            modified = true;
        }
        modified
    }

    /// Applies the present fields of `update`, returning the previous values
    /// of the fields that actually changed.
    pub fn apply_update(&mut self, update: &CstUpdate) -> CstUpdate {
        let mut old = CstUpdate::default();
        if let Some(value) = &update.convention {
            if *value != self.convention {
                old.convention = Some(std::mem::replace(&mut self.convention, value.clone()));
            }
        }
        if let Some(value) = &update.definition_formal {
            if *value != self.definition_formal {
                old.definition_formal = Some(std::mem::replace(
                    &mut self.definition_formal,
                    value.clone(),
                ));
            }
        }
        if let Some(value) = &update.definition_raw {
            if *value != self.definition_raw {
                old.definition_raw =
                    Some(std::mem::replace(&mut self.definition_raw, value.clone()));
            }
        }
        if let Some(value) = &update.term_raw {
            if *value != self.term_raw {
                old.term_raw = Some(std::mem::replace(&mut self.term_raw, value.clone()));
            }
        }
        if let Some(value) = &update.term_forms {
            if *value != self.term_forms {
                old.term_forms = Some(std::mem::replace(&mut self.term_forms, value.clone()));
            }
        }
        old
    }
}

/// Constituent payload without storage identity, used for inserts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstituentDraft {
    pub alias: String,
    pub cst_type: CstType,
    pub convention: String,
    pub definition_formal: String,
    pub definition_raw: String,
    pub definition_resolved: String,
    pub term_raw: String,
    pub term_resolved: String,
    pub term_forms: Vec<TermForm>,
}

impl ConstituentDraft {
    /// A draft with the given alias and kind and empty texts.
    pub fn new(alias: impl Into<String>, cst_type: CstType) -> Self {
        ConstituentDraft {
            alias: alias.into(),
            cst_type,
            convention: String::new(),
            definition_formal: String::new(),
            definition_raw: String::new(),
            definition_resolved: String::new(),
            term_raw: String::new(),
            term_resolved: String::new(),
            term_forms: Vec::new(),
        }
    }

    pub fn with_formal(mut self, formal: impl Into<String>) -> Self {
        self.definition_formal = formal.into();
        self
    }

    pub fn with_term(mut self, term: impl Into<String>) -> Self {
        self.term_raw = term.into();
        self
    }

    pub fn with_definition(mut self, definition: impl Into<String>) -> Self {
        self.definition_raw = definition.into();
        self
    }

    pub fn with_convention(mut self, convention: impl Into<String>) -> Self {
        self.convention = convention.into();
        self
    }

    /// Materializes the draft once storage has assigned identity.
    pub fn into_constituent(self, id: ConstituentId, schema: SchemaId, order: u32) -> Constituent {
        Constituent {
            id,
            schema,
            alias: self.alias,
            cst_type: self.cst_type,
            order,
            convention: self.convention,
            definition_formal: self.definition_formal,
            definition_raw: self.definition_raw,
            definition_resolved: self.definition_resolved,
            term_raw: self.term_raw,
            term_resolved: self.term_resolved,
            term_forms: self.term_forms,
        }
    }
}

/// Partial update of a constituent's editable fields.
///
/// Used both for the new values of an edit and, symmetrically, for the
/// previous values returned by it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CstUpdate {
    pub convention: Option<String>,
    pub definition_formal: Option<String>,
    pub definition_raw: Option<String>,
    pub term_raw: Option<String>,
    pub term_forms: Option<Vec<TermForm>>,
}

impl CstUpdate {
    /// True when no field is present.
    pub fn is_empty(&self) -> bool {
        self.convention.is_none()
            && self.definition_formal.is_none()
            && self.definition_raw.is_none()
            && self.term_raw.is_none()
            && self.term_forms.is_none()
    }

    /// True when the change affects the term and therefore resolved texts
    /// of dependants.
    pub fn touches_term(&self) -> bool {
        self.term_raw.is_some() || self.term_forms.is_some()
    }

    /// Drops every field that is absent from `mask`.
    pub fn retain_fields_of(&mut self, mask: &CstUpdate) {
        if mask.convention.is_none() {
            self.convention = None;
        }
        if mask.definition_formal.is_none() {
            self.definition_formal = None;
        }
        if mask.definition_raw.is_none() {
            self.definition_raw = None;
        }
        if mask.term_raw.is_none() {
            self.term_raw = None;
        }
        if mask.term_forms.is_none() {
            self.term_forms = None;
        }
    }

    /// Aliases referenced by the text-bearing fields.
    pub fn references(&self, resolver: &dyn TextResolver) -> IndexSet<String> {
        let mut result = IndexSet::new();
        if let Some(formal) = &self.definition_formal {
            result.extend(extract_globals(formal));
        }
        if let Some(term) = &self.term_raw {
            result.extend(resolver.extract_references(term));
        }
        if let Some(definition) = &self.definition_raw {
            result.extend(resolver.extract_references(definition));
        }
        result
    }
}
