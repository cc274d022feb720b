//! Idempotent attribute writes.

use tracing::{debug, warn};

use crate::error::Result;
use crate::kind::ValueKind;
use crate::store::{same_extent, ElementType, NodeId, Store};
use crate::value::{Scalar, Value};

/// What [`merge`] did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Attribute did not exist; created and written.
    Created,
    /// Stored value already matched; nothing written.
    Unchanged,
    /// Value differed; written in place.
    Written,
    /// Shape differed; deleted, recreated and written.
    Recreated,
    /// Stored value could not be read; written without comparison.
    Recovered,
}

impl MergeOutcome {
    pub fn wrote(self) -> bool {
        self != MergeOutcome::Unchanged
    }
}

/// Write `value` as attribute `name` of `holder` unless it already holds
/// an equal value.
///
/// Values are compared through their string form, so an integer offered
/// for float storage (`3` against `3.0`) is written again. Floats bound
/// for `Float32` storage are rounded to single precision first.
pub fn merge<S: Store + ?Sized>(
    store: &mut S,
    holder: NodeId,
    name: &str,
    kind: ValueKind,
    value: &Value,
) -> Result<MergeOutcome> {
    let info = match store.attr_info(holder, name) {
        Ok(info) => info,
        Err(e) if e.is_not_found() => {
            store.create_attr(holder, name, kind.element_type(), value.shape())?;
            store.write_attr(holder, name, value)?;
            return Ok(MergeOutcome::Created);
        }
        Err(e) => return Err(e.into()),
    };

    let stored = match store.read_attr(holder, name) {
        Ok(stored) => stored.reduce(),
        Err(e) => {
            warn!(attr = name, error = %e, "attribute read failed, overwriting");
            let value = if !info.shape.is_empty() && value.is_text() {
                let text = value.to_string();
                Value::from_json(&serde_json::from_str(&text)?)?
            } else {
                value.clone()
            };
            store.write_attr(holder, name, &value)?;
            return Ok(MergeOutcome::Recovered);
        }
    };

    if same_text(&stored, info.element, value) {
        return Ok(MergeOutcome::Unchanged);
    }

    if !same_extent(&info.shape, value.shape()) {
        debug!(attr = name, from = ?info.shape, to = ?value.shape(), "recreating attribute");
        store.delete_attr(holder, name)?;
        store.create_attr(holder, name, info.element, value.shape())?;
        store.write_attr(holder, name, value)?;
        return Ok(MergeOutcome::Recreated);
    }

    store.write_attr(holder, name, value)?;
    Ok(MergeOutcome::Written)
}

fn same_text(stored: &Value, element: ElementType, value: &Value) -> bool {
    let single = |s: &Scalar| match s {
        Scalar::Float(f) => Scalar::Float(f64::from(*f as f32)),
        other => other.clone(),
    };
    let candidate = match value {
        Value::Scalar(s) if element == ElementType::Float32 => Value::Scalar(single(s)),
        Value::Array { shape, data } if element == ElementType::Float32 => Value::Array {
            shape: shape.clone(),
            data: data.iter().map(single).collect(),
        },
        other => other.clone(),
    };
    stored.to_string() == candidate.reduce().to_string()
}
