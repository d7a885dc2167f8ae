//! Schemaless documents as stored by the shared document store.

use serde_json::{Map, Value};

/// A stored document: a JSON object keyed by field name.
pub type Document = Map<String, Value>;

/// Merge `patch` into `target`, field by field.
///
/// Only the top level is merged: a field present in the patch replaces the
/// stored field, fields absent from the patch are left untouched. A `null`
/// in the patch stores `null` (it does not delete the field).
pub fn merge_document(target: &mut Document, patch: Document) {
    for (field, value) in patch {
        target.insert(field, value);
    }
}
