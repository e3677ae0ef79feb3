use bson::Bson;
use serde::{Deserialize, Serialize};

// Safety limits to keep translation bounded on hostile input
pub(crate) const MAX_FILTER_DEPTH: usize = 64;

pub const ID_FIELD: &str = "_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CmpOp {
    pub(crate) const fn operator(self) -> &'static str {
        match self {
            Self::Eq => "$eq",
            Self::Gt => "$gt",
            Self::Gte => "$gte",
            Self::Lt => "$lt",
            Self::Lte => "$lte",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullCheck {
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    StartsWith,
    EndsWith,
    Contains,
}

/// A pushdown candidate produced by the scan planner.
///
/// Immutable once built. Every variant except `Opaque` has a native form, but
/// compound and pattern variants lose it underneath a `Not`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterExpr {
    Compare { attribute: String, op: CmpOp, value: Bson },
    In { attribute: String, values: Vec<Bson> },
    Null { attribute: String, check: NullCheck },
    Pattern { attribute: String, pattern: PatternKind, literal: String },
    And { left: Box<FilterExpr>, right: Box<FilterExpr> },
    Or { left: Box<FilterExpr>, right: Box<FilterExpr> },
    Not { operand: Box<FilterExpr> },
    /// A predicate the store cannot evaluate; always left to the caller.
    Opaque { description: String },
}

impl FilterExpr {
    fn compare(attribute: &str, op: CmpOp, value: impl Into<Bson>) -> Self {
        Self::Compare { attribute: attribute.to_string(), op, value: value.into() }
    }

    pub fn eq(attribute: &str, value: impl Into<Bson>) -> Self {
        Self::compare(attribute, CmpOp::Eq, value)
    }

    pub fn gt(attribute: &str, value: impl Into<Bson>) -> Self {
        Self::compare(attribute, CmpOp::Gt, value)
    }

    pub fn gte(attribute: &str, value: impl Into<Bson>) -> Self {
        Self::compare(attribute, CmpOp::Gte, value)
    }

    pub fn lt(attribute: &str, value: impl Into<Bson>) -> Self {
        Self::compare(attribute, CmpOp::Lt, value)
    }

    pub fn lte(attribute: &str, value: impl Into<Bson>) -> Self {
        Self::compare(attribute, CmpOp::Lte, value)
    }

    pub fn is_in<V: Into<Bson>>(attribute: &str, values: impl IntoIterator<Item = V>) -> Self {
        Self::In {
            attribute: attribute.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn is_null(attribute: &str) -> Self {
        Self::Null { attribute: attribute.to_string(), check: NullCheck::IsNull }
    }

    #[must_use]
    pub fn is_not_null(attribute: &str) -> Self {
        Self::Null { attribute: attribute.to_string(), check: NullCheck::IsNotNull }
    }

    fn pattern(attribute: &str, pattern: PatternKind, literal: &str) -> Self {
        Self::Pattern { attribute: attribute.to_string(), pattern, literal: literal.to_string() }
    }

    #[must_use]
    pub fn starts_with(attribute: &str, literal: &str) -> Self {
        Self::pattern(attribute, PatternKind::StartsWith, literal)
    }

    #[must_use]
    pub fn ends_with(attribute: &str, literal: &str) -> Self {
        Self::pattern(attribute, PatternKind::EndsWith, literal)
    }

    #[must_use]
    pub fn contains(attribute: &str, literal: &str) -> Self {
        Self::pattern(attribute, PatternKind::Contains, literal)
    }

    #[must_use]
    pub fn and(left: Self, right: Self) -> Self {
        Self::And { left: Box::new(left), right: Box::new(right) }
    }

    #[must_use]
    pub fn or(left: Self, right: Self) -> Self {
        Self::Or { left: Box::new(left), right: Box::new(right) }
    }

    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(operand: Self) -> Self {
        Self::Not { operand: Box::new(operand) }
    }

    #[must_use]
    pub fn opaque(description: &str) -> Self {
        Self::Opaque { description: description.to_string() }
    }
}
