//! Row representation for materialized shape data.

use serde_json::Value as JsonValue;

/// A replicated row: column name to value, in server column order.
pub type Row = serde_json::Map<String, JsonValue>;

/// Shallow-merge `patch` into `base`: fields present in the patch replace
/// the base's values, fields absent from the patch retain prior values.
///
/// Used for `update` messages in partial replica mode, where the server
/// sends only the columns that changed.
pub fn merge_row(base: &mut Row, patch: &Row) {
    for (column, value) in patch {
        base.insert(column.clone(), value.clone());
    }
}
