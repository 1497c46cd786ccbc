use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::error::PersistenceError;

/// Fixed width UTC text, so lexical order in SQLite equals time order.
const STORED_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z");

pub(super) fn format_timestamp(ts: OffsetDateTime) -> Result<String, PersistenceError> {
    ts.to_offset(UtcOffset::UTC)
        .format(STORED_FORMAT)
        .map_err(|e| PersistenceError::Timestamp(e.to_string()))
}

pub(super) fn parse_timestamp(value: &str) -> Result<OffsetDateTime, PersistenceError> {
    PrimitiveDateTime::parse(value, STORED_FORMAT)
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|e| PersistenceError::Timestamp(format!("{value}: {e}")))
}
