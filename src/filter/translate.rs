use bson::oid::ObjectId;
use bson::{Bson, Document};

use super::types::{FilterExpr, ID_FIELD, MAX_FILTER_DEPTH, NullCheck, PatternKind};
use crate::config::ReadConfig;
use crate::errors::ScanError;

/// Why a sub-expression was left to the caller instead of pushed down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradeReason {
    /// AND/OR inside a NOT.
    CompoundUnderNegation,
    /// String pattern inside a NOT.
    PatternUnderNegation,
    /// No native form for this predicate.
    Unsupported,
    /// Nested deeper than `MAX_FILTER_DEPTH`.
    DepthLimit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Degradation {
    pub reason: DegradeReason,
    pub filter: String,
}

/// A native query plus the sub-expressions it does not cover.
///
/// Degraded sub-expressions translate to an always-true clause, so the query
/// matches a superset of the intended documents.
#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub query: Document,
    pub degradations: Vec<Degradation>,
}

impl Translation {
    #[must_use]
    pub fn is_exact(&self) -> bool {
        self.degradations.is_empty()
    }
}

/// Converts filter trees into native query documents.
///
/// Pure: the only state is the identifier coercion flag, and the negation scope
/// travels as an argument of the recursion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterTranslator {
    id_as_object_id: bool,
}

impl FilterTranslator {
    #[must_use]
    pub const fn new(id_as_object_id: bool) -> Self {
        Self { id_as_object_id }
    }

    #[must_use]
    pub const fn from_config(config: &ReadConfig) -> Self {
        Self::new(config.id_as_object_id)
    }

    /// # Errors
    /// Returns `IdentifierCoercion` if an `_id` literal cannot be converted.
    pub fn translate(&self, filters: &[FilterExpr]) -> Result<Document, ScanError> {
        Ok(self.translate_scoped(filters, false)?.query)
    }

    /// # Errors
    /// Returns `IdentifierCoercion` if an `_id` literal cannot be converted.
    pub fn translate_with_report(&self, filters: &[FilterExpr]) -> Result<Translation, ScanError> {
        self.translate_scoped(filters, false)
    }

    /// Translate with an explicit starting negation scope. Top-level filters are
    /// combined with an implicit AND.
    ///
    /// # Errors
    /// Returns `IdentifierCoercion` if an `_id` literal cannot be converted.
    pub fn translate_scoped(
        &self,
        filters: &[FilterExpr],
        negated: bool,
    ) -> Result<Translation, ScanError> {
        let mut degradations = Vec::new();
        let mut query = Document::new();
        for filter in filters {
            let clause = self.clause(filter, negated, 0, &mut degradations)?;
            merge_clause(&mut query, clause);
        }
        Ok(Translation { query, degradations })
    }

    fn clause(
        &self,
        filter: &FilterExpr,
        negated: bool,
        depth: usize,
        degradations: &mut Vec<Degradation>,
    ) -> Result<Document, ScanError> {
        if depth >= MAX_FILTER_DEPTH {
            return Ok(degrade(filter, DegradeReason::DepthLimit, degradations));
        }
        match filter {
            FilterExpr::Compare { attribute, op, value } => {
                let mut cond = Document::new();
                cond.insert(op.operator(), self.native_value(attribute, value)?);
                Ok(field_clause(attribute, cond))
            }
            FilterExpr::In { attribute, values } => {
                let values = values
                    .iter()
                    .map(|v| self.native_value(attribute, v))
                    .collect::<Result<Vec<_>, _>>()?;
                let mut cond = Document::new();
                cond.insert("$in", values);
                Ok(field_clause(attribute, cond))
            }
            FilterExpr::Null { attribute, check } => {
                let op = match check {
                    NullCheck::IsNull => "$eq",
                    NullCheck::IsNotNull => "$ne",
                };
                let mut cond = Document::new();
                cond.insert(op, Bson::Null);
                Ok(field_clause(attribute, cond))
            }
            FilterExpr::Pattern { .. } if negated => {
                Ok(degrade(filter, DegradeReason::PatternUnderNegation, degradations))
            }
            FilterExpr::Pattern { attribute, pattern, literal } => {
                let mut cond = Document::new();
                cond.insert("$regex", pattern_regex(*pattern, literal));
                Ok(field_clause(attribute, cond))
            }
            FilterExpr::And { .. } | FilterExpr::Or { .. } if negated => {
                Ok(degrade(filter, DegradeReason::CompoundUnderNegation, degradations))
            }
            FilterExpr::And { left, right } => {
                let l = self.clause(left, false, depth + 1, degradations)?;
                let r = self.clause(right, false, depth + 1, degradations)?;
                Ok(match (l.is_empty(), r.is_empty()) {
                    (true, _) => r,
                    (_, true) => l,
                    _ => logical("$and", l, r),
                })
            }
            FilterExpr::Or { left, right } => {
                let l = self.clause(left, false, depth + 1, degradations)?;
                let r = self.clause(right, false, depth + 1, degradations)?;
                // An always-true side makes the whole disjunction always true.
                if l.is_empty() || r.is_empty() {
                    return Ok(Document::new());
                }
                Ok(logical("$or", l, r))
            }
            FilterExpr::Not { operand } => {
                let inner = self.clause(operand, true, depth + 1, degradations)?;
                Ok(negate(inner))
            }
            FilterExpr::Opaque { .. } => {
                Ok(degrade(filter, DegradeReason::Unsupported, degradations))
            }
        }
    }

    fn native_value(&self, attribute: &str, value: &Bson) -> Result<Bson, ScanError> {
        if !self.id_as_object_id || attribute != ID_FIELD {
            return Ok(value.clone());
        }
        match value {
            Bson::ObjectId(_) => Ok(value.clone()),
            Bson::String(s) => ObjectId::parse_str(s).map(Bson::ObjectId).map_err(|e| {
                ScanError::IdentifierCoercion {
                    attribute: attribute.to_string(),
                    literal: format!("{s:?}"),
                    reason: e.to_string(),
                }
            }),
            other => Err(ScanError::IdentifierCoercion {
                attribute: attribute.to_string(),
                literal: other.to_string(),
                reason: "expected a 24-character hex string".into(),
            }),
        }
    }
}

fn degrade(
    filter: &FilterExpr,
    reason: DegradeReason,
    degradations: &mut Vec<Degradation>,
) -> Document {
    degradations.push(Degradation { reason, filter: format!("{filter:?}") });
    Document::new()
}

fn field_clause(attribute: &str, cond: Document) -> Document {
    let mut d = Document::new();
    d.insert(attribute, cond);
    d
}

fn logical(op: &str, left: Document, right: Document) -> Document {
    let mut d = Document::new();
    d.insert(op, vec![Bson::Document(left), Bson::Document(right)]);
    d
}

/// Wrap every field condition of `inner` in `$not`. An empty (degraded) clause
/// stays empty: negating always-true would drop documents.
fn negate(inner: Document) -> Document {
    let mut out = Document::new();
    for (field, cond) in inner {
        let mut not = Document::new();
        not.insert("$not", cond);
        out.insert(field, not);
    }
    out
}

fn pattern_regex(pattern: PatternKind, literal: &str) -> String {
    let lit = regex::escape(literal);
    match pattern {
        PatternKind::StartsWith => format!("^{lit}.*"),
        PatternKind::EndsWith => format!(".*{lit}$"),
        PatternKind::Contains => format!(".*{lit}.*"),
    }
}

fn is_operator_doc(d: &Document) -> bool {
    !d.is_empty() && d.keys().all(|k| k.starts_with('$'))
}

enum Merge {
    Insert,
    Extend,
    Conflict,
}

/// Conjoin `clause` into `query`. Operator documents on the same field merge
/// when their operators differ; anything else that collides moves into `$and`.
fn merge_clause(query: &mut Document, clause: Document) {
    for (key, value) in clause {
        let merge = match (query.get(&key), &value) {
            (None, _) => Merge::Insert,
            (Some(Bson::Array(_)), Bson::Array(_)) if key == "$and" => Merge::Extend,
            (Some(Bson::Document(ops)), Bson::Document(more))
                if is_operator_doc(ops)
                    && is_operator_doc(more)
                    && more.keys().all(|k| !ops.contains_key(k)) =>
            {
                Merge::Extend
            }
            _ => Merge::Conflict,
        };
        match merge {
            Merge::Insert => {
                query.insert(key, value);
            }
            Merge::Extend => match (query.get_mut(&key), value) {
                (Some(Bson::Array(list)), Bson::Array(more)) => list.extend(more),
                (Some(Bson::Document(ops)), Bson::Document(more)) => {
                    for (op, arg) in more {
                        ops.insert(op, arg);
                    }
                }
                _ => {}
            },
            Merge::Conflict => {
                let mut single = Document::new();
                single.insert(key, value);
                if let Some(Bson::Array(list)) = query.get_mut("$and") {
                    list.push(Bson::Document(single));
                } else {
                    query.insert("$and", vec![Bson::Document(single)]);
                }
            }
        }
    }
}
