use bson::Document;

use super::types::ID_FIELD;

/// Build the projection document for a required-field list.
///
/// Each named field is included with `1`. The store returns `_id` unless told
/// otherwise, so a non-empty list always carries an explicit `_id` marker: `1`
/// when it was requested, `0` when not. An empty list means every field and
/// yields an empty projection, which keeps the store's default `_id` inclusion.
/// A field nested under another requested field is dropped, since the store
/// rejects overlapping paths. A sub-path of `_id` widens to the whole `_id`,
/// which would otherwise collide with the `_id` marker.
pub fn projection<S: AsRef<str>>(required_fields: &[S]) -> Document {
    let mut out = Document::new();
    if required_fields.is_empty() {
        return out;
    }
    let fields: Vec<&str> = required_fields.iter().map(AsRef::as_ref).collect();
    let mut wants_id = false;
    for &field in &fields {
        if field == ID_FIELD || is_id_sub_path(field) {
            wants_id = true;
            continue;
        }
        let covered = fields
            .iter()
            .any(|p| *p != field && field.strip_prefix(p).is_some_and(|rest| rest.starts_with('.')));
        if !covered {
            out.insert(field, 1_i32);
        }
    }
    out.insert(ID_FIELD, i32::from(wants_id));
    out
}

fn is_id_sub_path(field: &str) -> bool {
    field.strip_prefix(ID_FIELD).is_some_and(|rest| rest.starts_with('.'))
}
