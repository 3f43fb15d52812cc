//! Column encodings shared by the SQL repositories.
//!
//! Timestamps are RFC 3339 text, dates are `%Y-%m-%d`, amounts are decimal
//! text so no precision is lost to SQLite's REAL affinity.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use super::RepositoryError;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub(crate) fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339()
}

pub(crate) fn optional_timestamp(value: Option<&DateTime<Utc>>) -> Option<String> {
    value.map(timestamp)
}

pub(crate) fn date(value: Option<NaiveDate>) -> Option<String> {
    value.map(|date| date.format(DATE_FORMAT).to_string())
}

pub(crate) fn decimal(value: Option<Decimal>) -> Option<String> {
    value.map(|amount| amount.normalize().to_string())
}

pub(crate) fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{column}: invalid timestamp `{value}`: {error}")))
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.as_deref().map(|value| parse_timestamp(column, value)).transpose()
}

pub(crate) fn parse_date(column: &str, value: Option<String>) -> Result<Option<NaiveDate>, RepositoryError> {
    value
        .as_deref()
        .map(|value| {
            NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|error| {
                RepositoryError::Decode(format!("{column}: invalid date `{value}`: {error}"))
            })
        })
        .transpose()
}

pub(crate) fn parse_decimal(column: &str, value: Option<String>) -> Result<Option<Decimal>, RepositoryError> {
    value
        .as_deref()
        .map(|value| {
            Decimal::from_str(value).map_err(|error| {
                RepositoryError::Decode(format!("{column}: invalid decimal `{value}`: {error}"))
            })
        })
        .transpose()
}

pub(crate) fn parse_level(column: &str, value: i64) -> Result<u8, RepositoryError> {
    u8::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("{column}: level {value} out of range")))
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value)
        .map_err(|_| RepositoryError::Decode(format!("{column}: value {value} out of range")))
}

pub(crate) fn parse_enum<T>(
    column: &str,
    value: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, RepositoryError> {
    parse(value).ok_or_else(|| RepositoryError::Decode(format!("{column}: unknown value `{value}`")))
}

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(database) if database.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{decimal, parse_decimal, parse_enum, parse_level, parse_timestamp};
    use crate::repositories::RepositoryError;
    use signoff_core::WorkflowStatus;

    #[test]
    fn decimals_keep_their_exact_value() {
        let stored = decimal(Some(Decimal::new(150_050, 2))).expect("encoded");
        assert_eq!(stored, "1500.5");
        assert_eq!(parse_decimal("amount", Some(stored)).expect("decode"), Some(Decimal::new(15_005, 1)));
    }

    #[test]
    fn malformed_columns_surface_as_decode_errors() {
        assert!(matches!(parse_timestamp("created_at", "yesterday"), Err(RepositoryError::Decode(_))));
        assert!(matches!(parse_level("approval_level", 300), Err(RepositoryError::Decode(_))));
        let error = parse_enum("status", "archived", WorkflowStatus::parse).expect_err("unknown status");
        assert!(error.to_string().contains("archived"));
    }
}
