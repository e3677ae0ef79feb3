//! Evaluation of native query, bound and projection documents.

use std::cmp::Ordering;

use bson::{Bson, Document};
use regex::Regex;

use crate::driver::DriverError;

// Bounds on hostile queries and documents
const MAX_PATH_DEPTH: usize = 32;
const MAX_QUERY_DEPTH: usize = 128;

/// A query document compiled once per find.
#[derive(Debug)]
pub(crate) enum Matcher {
    All(Vec<Matcher>),
    Any(Vec<Matcher>),
    Field { path: String, conds: Vec<Cond> },
}

#[derive(Debug)]
pub(crate) enum Cond {
    Eq(Bson),
    Ne(Bson),
    Range(Ordering, bool, Bson),
    In(Vec<Bson>),
    Regex(Regex),
    Not(Vec<Cond>),
}

fn query_error(msg: impl Into<String>) -> DriverError {
    DriverError::Query(msg.into())
}

/// Compile a query document. Unknown operators are rejected the way a server would.
pub(crate) fn compile(query: &Document) -> Result<Matcher, DriverError> {
    compile_doc(query, 0)
}

fn compile_doc(query: &Document, depth: usize) -> Result<Matcher, DriverError> {
    if depth > MAX_QUERY_DEPTH {
        return Err(query_error("query nested too deeply"));
    }
    let mut parts = Vec::with_capacity(query.len());
    for (key, value) in query {
        match key.as_str() {
            "$and" => parts.push(Matcher::All(compile_list(key, value, depth)?)),
            "$or" => parts.push(Matcher::Any(compile_list(key, value, depth)?)),
            k if k.starts_with('$') => {
                return Err(query_error(format!("unknown top level operator: {k}")));
            }
            path => parts.push(Matcher::Field {
                path: path.to_string(),
                conds: compile_conds(value, depth)?,
            }),
        }
    }
    Ok(Matcher::All(parts))
}

fn compile_list(op: &str, value: &Bson, depth: usize) -> Result<Vec<Matcher>, DriverError> {
    let Bson::Array(items) = value else {
        return Err(query_error(format!("{op} argument must be an array")));
    };
    if items.is_empty() {
        return Err(query_error(format!("{op} argument must be a non-empty array")));
    }
    items
        .iter()
        .map(|item| match item {
            Bson::Document(d) => compile_doc(d, depth + 1),
            _ => Err(query_error(format!("{op} entries must be documents"))),
        })
        .collect()
}

fn is_operator_doc(d: &Document) -> bool {
    d.keys().next().is_some_and(|k| k.starts_with('$'))
}

fn compile_conds(value: &Bson, depth: usize) -> Result<Vec<Cond>, DriverError> {
    match value {
        Bson::Document(ops) if is_operator_doc(ops) => {
            ops.iter().map(|(op, arg)| compile_op(op, arg, depth)).collect()
        }
        literal => Ok(vec![Cond::Eq(literal.clone())]),
    }
}

fn compile_op(op: &str, arg: &Bson, depth: usize) -> Result<Cond, DriverError> {
    Ok(match op {
        "$eq" => Cond::Eq(arg.clone()),
        "$ne" => Cond::Ne(arg.clone()),
        "$gt" => Cond::Range(Ordering::Greater, false, arg.clone()),
        "$gte" => Cond::Range(Ordering::Greater, true, arg.clone()),
        "$lt" => Cond::Range(Ordering::Less, false, arg.clone()),
        "$lte" => Cond::Range(Ordering::Less, true, arg.clone()),
        "$in" => match arg {
            Bson::Array(values) => Cond::In(values.clone()),
            _ => return Err(query_error("$in needs an array")),
        },
        "$regex" => match arg {
            Bson::String(pattern) => Cond::Regex(build_regex(pattern)?),
            _ => return Err(query_error("$regex has to be a string")),
        },
        "$not" => match arg {
            Bson::Document(inner) if is_operator_doc(inner) => {
                if depth > MAX_QUERY_DEPTH {
                    return Err(query_error("query nested too deeply"));
                }
                Cond::Not(
                    inner
                        .iter()
                        .map(|(op, arg)| compile_op(op, arg, depth + 1))
                        .collect::<Result<_, _>>()?,
                )
            }
            _ => return Err(query_error("$not needs an operator document")),
        },
        other => return Err(query_error(format!("unknown operator: {other}"))),
    })
}

fn build_regex(pattern: &str) -> Result<Regex, DriverError> {
    Regex::new(pattern).map_err(|e| query_error(format!("invalid $regex: {e}")))
}

impl Matcher {
    pub(crate) fn matches(&self, doc: &Document) -> bool {
        match self {
            Self::All(ms) => ms.iter().all(|m| m.matches(doc)),
            Self::Any(ms) => ms.iter().any(|m| m.matches(doc)),
            Self::Field { path, conds } => {
                let value = get_path(doc, path);
                conds.iter().all(|c| c.holds(value))
            }
        }
    }
}

impl Cond {
    fn holds(&self, value: Option<&Bson>) -> bool {
        match self {
            Self::Eq(target) => equals(value, target),
            Self::Ne(target) => !equals(value, target),
            Self::Range(dir, inclusive, target) => value.is_some_and(|v| {
                candidates(v).any(|c| match compare_bracketed(c, target) {
                    Some(Ordering::Equal) => *inclusive,
                    Some(ord) => ord == *dir,
                    None => false,
                })
            }),
            Self::In(targets) => targets.iter().any(|t| equals(value, t)),
            Self::Regex(re) => value.is_some_and(|v| {
                candidates(v).any(|c| matches!(c, Bson::String(s) if re.is_match(s)))
            }),
            Self::Not(conds) => !conds.iter().all(|c| c.holds(value)),
        }
    }
}

/// The value itself plus, for arrays, each element.
fn candidates(v: &Bson) -> impl Iterator<Item = &Bson> {
    let elements = match v {
        Bson::Array(items) => items.as_slice(),
        _ => &[],
    };
    std::iter::once(v).chain(elements.iter())
}

// Null equality also matches a missing field.
fn equals(value: Option<&Bson>, target: &Bson) -> bool {
    match value {
        None => matches!(target, Bson::Null),
        Some(v) => candidates(v).any(|c| compare_bracketed(c, target) == Some(Ordering::Equal)),
    }
}

/// Resolve a dotted path through embedded documents.
pub(crate) fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut cur = doc.get(parts.next()?)?;
    for (depth, part) in parts.enumerate() {
        if depth + 1 >= MAX_PATH_DEPTH {
            return None;
        }
        match cur {
            Bson::Document(d) => cur = d.get(part)?,
            _ => return None,
        }
    }
    Some(cur)
}

fn is_num(v: &Bson) -> bool {
    matches!(v, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_))
}

#[allow(clippy::cast_precision_loss)]
fn as_f64(v: &Bson) -> f64 {
    match v {
        Bson::Int32(i) => f64::from(*i),
        Bson::Int64(i) => *i as f64,
        Bson::Double(f) => *f,
        Bson::Decimal128(d) => d.to_string().parse::<f64>().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

/// Comparison within one type bracket; `None` across brackets, as query
/// operators never match a value of a different type.
fn compare_bracketed(a: &Bson, b: &Bson) -> Option<Ordering> {
    if is_num(a) && is_num(b) {
        return as_f64(a).partial_cmp(&as_f64(b));
    }
    (type_rank(a) == type_rank(b)).then(|| compare_bson(a, b))
}

/// Total order used for key bounds.
pub(crate) fn compare_bson(a: &Bson, b: &Bson) -> Ordering {
    if is_num(a) && is_num(b) {
        return as_f64(a).total_cmp(&as_f64(b));
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        (Bson::DateTime(x), Bson::DateTime(y)) => x.cmp(y),
        (Bson::Document(x), Bson::Document(y)) => compare_fields(x, y),
        (Bson::Array(x), Bson::Array(y)) => {
            for (l, r) in x.iter().zip(y) {
                let ord = compare_bson(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn compare_fields(x: &Document, y: &Document) -> Ordering {
    for ((kx, vx), (ky, vy)) in x.iter().zip(y) {
        let ord = kx.cmp(ky).then_with(|| compare_bson(vx, vy));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    x.len().cmp(&y.len())
}

// Cross-type sort order of the store; numbers share one bracket.
fn type_rank(v: &Bson) -> u8 {
    match v {
        Bson::MinKey => 0,
        Bson::Null | Bson::Undefined => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 2,
        Bson::String(_) | Bson::Symbol(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Timestamp(_) => 10,
        Bson::RegularExpression(_) => 11,
        Bson::DbPointer(_) => 12,
        Bson::JavaScriptCode(_) | Bson::JavaScriptCodeWithScope(_) => 13,
        Bson::MaxKey => u8::MAX,
    }
}

/// Whether `doc` falls in `[min, max)`. Bound documents name the key fields in order.
pub(crate) fn within_bounds(doc: &Document, min: Option<&Document>, max: Option<&Document>) -> bool {
    let above_min = min.is_none_or(|b| compare_key(doc, b) != Ordering::Less);
    let below_max = max.is_none_or(|b| compare_key(doc, b) == Ordering::Less);
    above_min && below_max
}

/// Compare the key of `doc` against a bound, field by field.
pub(crate) fn compare_key(doc: &Document, bound: &Document) -> Ordering {
    for (field, limit) in bound {
        let value = get_path(doc, field).unwrap_or(&Bson::Null);
        let ord = compare_bson(value, limit);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Order two documents by the fields a bound document names.
pub(crate) fn compare_by_key(a: &Document, b: &Document, pattern: &Document) -> Ordering {
    for field in pattern.keys() {
        let va = get_path(a, field).unwrap_or(&Bson::Null);
        let vb = get_path(b, field).unwrap_or(&Bson::Null);
        let ord = compare_bson(va, vb);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn truthy(v: &Bson) -> bool {
    match v {
        Bson::Boolean(b) => *b,
        Bson::Int32(i) => *i != 0,
        Bson::Int64(i) => *i != 0,
        Bson::Double(f) => *f != 0.0,
        _ => true,
    }
}

/// Apply a projection document. `_id` stays unless explicitly excluded.
pub(crate) fn project(doc: &Document, projection: &Document) -> Result<Document, DriverError> {
    if projection.is_empty() {
        return Ok(doc.clone());
    }
    let keep_id = projection.get("_id").is_none_or(truthy);
    let fields: Vec<(&String, bool)> =
        projection.iter().filter(|(k, _)| k.as_str() != "_id").map(|(k, v)| (k, truthy(v))).collect();
    let including = fields.iter().any(|(_, inc)| *inc);
    if including && fields.iter().any(|(_, inc)| !inc) {
        return Err(query_error("cannot mix inclusion and exclusion in a projection"));
    }
    let mut out = Document::new();
    if including || (fields.is_empty() && keep_id) {
        if keep_id && let Some(id) = doc.get("_id") {
            out.insert("_id", id.clone());
        }
        for (path, _) in &fields {
            if let Some(v) = get_path(doc, path) {
                insert_path(&mut out, path, v.clone());
            }
        }
    } else {
        out = doc.clone();
        if !keep_id {
            out.remove("_id");
        }
        for (path, _) in &fields {
            remove_path(&mut out, path);
        }
    }
    Ok(out)
}

fn insert_path(out: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            out.insert(path, value);
        }
        Some((head, rest)) => {
            if !matches!(out.get(head), Some(Bson::Document(_))) {
                out.insert(head, Document::new());
            }
            if let Ok(child) = out.get_document_mut(head) {
                insert_path(child, rest, value);
            }
        }
    }
}

fn remove_path(out: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            out.remove(path);
        }
        Some((head, rest)) => {
            if let Ok(child) = out.get_document_mut(head) {
                remove_path(child, rest);
            }
        }
    }
}
