//! Pushdown translation: filter trees to native query and projection documents.

mod projection;
mod translate;
mod types;

pub use projection::projection;
pub use translate::{DegradeReason, Degradation, FilterTranslator, Translation};
pub use types::{CmpOp, FilterExpr, ID_FIELD, NullCheck, PatternKind};
