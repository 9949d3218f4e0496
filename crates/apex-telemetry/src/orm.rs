//! sea-orm integration through the connection's metric callback.
//!
//! sea-orm reports each statement once it has run, with its measured
//! duration, so statements go straight to [`QueryTracker::record`].

use crate::driver::TrackerBinding;
use sea_orm::metric::Info;
use sea_orm::{DatabaseConnection, Value as SqlValue};
use serde_json::{json, Value};
use tracing::debug;

/// Track every statement run on `db`. Replaces any metric callback already set.
pub fn attach(db: &mut DatabaseConnection, binding: TrackerBinding) {
    db.set_metric_callback(move |info| record_statement(&binding, info));
    debug!("Query tracking attached to sea-orm connection");
}

fn record_statement(binding: &TrackerBinding, info: &Info<'_>) {
    if info.failed {
        return;
    }
    let Some(tracker) = binding.resolve() else {
        return;
    };

    let bindings = info
        .statement
        .values
        .as_ref()
        .map(|values| values.0.iter().map(binding_value).collect())
        .unwrap_or_default();
    tracker.record(info.statement.sql.clone(), bindings, info.elapsed);
}

fn binding_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Bool(Some(v)) => json!(v),
        SqlValue::TinyInt(Some(v)) => json!(v),
        SqlValue::SmallInt(Some(v)) => json!(v),
        SqlValue::Int(Some(v)) => json!(v),
        SqlValue::BigInt(Some(v)) => json!(v),
        SqlValue::TinyUnsigned(Some(v)) => json!(v),
        SqlValue::SmallUnsigned(Some(v)) => json!(v),
        SqlValue::Unsigned(Some(v)) => json!(v),
        SqlValue::BigUnsigned(Some(v)) => json!(v),
        SqlValue::Float(Some(v)) => json!(v),
        SqlValue::Double(Some(v)) => json!(v),
        SqlValue::String(Some(v)) => json!(v.as_str()),
        SqlValue::Char(Some(v)) => json!(v.to_string()),
        SqlValue::Bool(None)
        | SqlValue::TinyInt(None)
        | SqlValue::SmallInt(None)
        | SqlValue::Int(None)
        | SqlValue::BigInt(None)
        | SqlValue::TinyUnsigned(None)
        | SqlValue::SmallUnsigned(None)
        | SqlValue::Unsigned(None)
        | SqlValue::BigUnsigned(None)
        | SqlValue::Float(None)
        | SqlValue::Double(None)
        | SqlValue::String(None)
        | SqlValue::Char(None) => Value::Null,
        other => Value::String(format!("{:?}", other)),
    }
}
