//! Order- and format-tolerant comparison of SQL result sets.
//!
//! Agent-generated SQL legitimately returns rows in a different order and
//! floats at full precision, so equality is checked on normalized, sorted
//! copies: floats are rounded to two decimal places (and collapsed to
//! integers when the rounding leaves no fraction), and rows are sorted by
//! their stringified values in field-name order. Row identity and count stay
//! strict.

use client::Row;
use serde_json::Value;

/// Compare two result sets for semantic equality.
pub fn results_equal(expected: &[Row], actual: &[Row]) -> bool {
    if expected.len() != actual.len() {
        return false;
    }

    let mut normalized_expected: Vec<Row> = expected.iter().map(normalize_row).collect();
    let mut normalized_actual: Vec<Row> = actual.iter().map(normalize_row).collect();

    normalized_expected.sort_by_cached_key(|row| row_sort_key(row));
    normalized_actual.sort_by_cached_key(|row| row_sort_key(row));

    normalized_expected == normalized_actual
}

/// Keys are held sorted by the map itself, so field order within a record
/// never affects equality; only values need normalizing.
fn normalize_row(row: &Row) -> Row {
    row.iter()
        .map(|(key, value)| (key.clone(), normalize_value(value)))
        .collect()
}

fn normalize_value(value: &Value) -> Value {
    match value {
        Value::Number(number) if number.is_f64() => {
            let Some(float) = number.as_f64() else {
                return value.clone();
            };
            let rounded = (float * 100.0).round() / 100.0;
            if rounded.fract() == 0.0 && rounded.abs() < i64::MAX as f64 {
                Value::from(rounded as i64)
            } else {
                serde_json::Number::from_f64(rounded)
                    .map(Value::Number)
                    .unwrap_or_else(|| value.clone())
            }
        }
        other => other.clone(),
    }
}

/// Sort key: the stringified values of a row in field-name order.
fn row_sort_key(row: &Row) -> Vec<String> {
    row.values().map(value_repr).collect()
}

fn value_repr(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
