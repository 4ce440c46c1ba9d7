//! Record to TSV row fields
//!
//! Quoting and delimiting happen in the chunk writer. Here each field only
//! loses its tabs and line breaks (replaced by spaces), so a written row is
//! always exactly one line with exactly [`FIELD_COUNT`] fields.

use medtsv_core::Row;

use crate::extract::Record;

/// Fields per row: id, authors, year, title, abstract
pub const FIELD_COUNT: usize = 5;

/// Separator between surnames inside the authors field
pub const AUTHOR_SEPARATOR: &str = ",";

/// Fields of one record, in output order.
pub fn serialize(record: &Record) -> Row {
    vec![
        record.id.to_string(),
        sanitize_field(&record.authors.join(AUTHOR_SEPARATOR)),
        record.year.map(|y| y.to_string()).unwrap_or_default(),
        sanitize_field(record.title.as_deref().unwrap_or("")),
        sanitize_field(record.abstract_text.as_deref().unwrap_or("")),
    ]
}

/// Replace tab, CR and LF with a space
pub fn sanitize_field(value: &str) -> String {
    value.replace(['\t', '\n', '\r'], " ")
}
