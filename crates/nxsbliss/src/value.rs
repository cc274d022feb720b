//! Runtime values carried by snapshot items, attributes and stream blocks.

use std::fmt;

use serde_json::Value as Json;

use crate::error::{Error, Result};

/// A single element.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(v) => Some(*v),
            Scalar::UInt(v) => i64::try_from(*v).ok(),
            Scalar::Bool(b) => Some(i64::from(*b)),
            Scalar::Float(f) if f.fract() == 0.0 && f.abs() < 9.2e18 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Scalar::UInt(v) => Some(*v),
            Scalar::Int(v) => u64::try_from(*v).ok(),
            Scalar::Bool(b) => Some(u64::from(*b)),
            Scalar::Float(f) if f.fract() == 0.0 && *f >= 0.0 && *f < 1.8e19 => Some(*f as u64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Float(f) => Some(*f),
            Scalar::Int(v) => Some(*v as f64),
            Scalar::UInt(v) => Some(*v as f64),
            Scalar::Bool(b) => Some(f64::from(u8::from(*b))),
            Scalar::Text(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Bool(b) => Some(*b),
            Scalar::Int(0) | Scalar::UInt(0) => Some(false),
            Scalar::Int(1) | Scalar::UInt(1) => Some(true),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn from_json(json: &Json) -> Result<Scalar> {
        match json {
            Json::Bool(b) => Ok(Scalar::Bool(*b)),
            Json::Number(n) => {
                if let Some(v) = n.as_i64() {
                    Ok(Scalar::Int(v))
                } else if let Some(v) = n.as_u64() {
                    Ok(Scalar::UInt(v))
                } else {
                    n.as_f64()
                        .map(Scalar::Float)
                        .ok_or_else(|| Error::Value(format!("unrepresentable number {n}")))
                }
            }
            Json::String(s) => Ok(Scalar::Text(s.clone())),
            Json::Null => Err(Error::Value("null element".into())),
            other => Err(Error::Value(format!("expected a scalar, got {other}"))),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::UInt(v) => write!(f, "{v}"),
            Scalar::Float(v) => write!(f, "{v:?}"),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

/// A scalar or a row-major n-dimensional array.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(Scalar),
    Array { shape: Vec<usize>, data: Vec<Scalar> },
}

impl Value {
    /// Build an array, checking that `data` fills `shape`.
    pub fn array(shape: Vec<usize>, data: Vec<Scalar>) -> Result<Value> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(Error::Value(format!(
                "shape {shape:?} needs {expected} elements, got {}",
                data.len()
            )));
        }
        Ok(Value::Array { shape, data })
    }

    /// Convert a JSON value; nested arrays must be rectangular.
    pub fn from_json(json: &Json) -> Result<Value> {
        if !json.is_array() {
            return Scalar::from_json(json).map(Value::Scalar);
        }
        let mut shape = Vec::new();
        let mut cursor = json;
        while let Json::Array(items) = cursor {
            shape.push(items.len());
            match items.first() {
                Some(first) => cursor = first,
                None => break,
            }
        }
        let mut data = Vec::with_capacity(shape.iter().product());
        flatten_json(json, &shape, &mut data)?;
        Ok(Value::Array { shape, data })
    }

    pub fn to_json(&self) -> Json {
        fn scalar(s: &Scalar) -> Json {
            match s {
                Scalar::Bool(b) => Json::Bool(*b),
                Scalar::Int(v) => Json::from(*v),
                Scalar::UInt(v) => Json::from(*v),
                Scalar::Float(v) => Json::from(*v),
                Scalar::Text(t) => Json::String(t.clone()),
            }
        }
        fn nest(shape: &[usize], data: &[Scalar]) -> Json {
            match shape {
                [] => data.first().map(scalar).unwrap_or(Json::Null),
                [_] => Json::Array(data.iter().map(scalar).collect()),
                [n, rest @ ..] => {
                    let stride: usize = rest.iter().product();
                    Json::Array(
                        (0..*n)
                            .map(|i| nest(rest, &data[i * stride..(i + 1) * stride]))
                            .collect(),
                    )
                }
            }
        }
        match self {
            Value::Scalar(s) => scalar(s),
            Value::Array { shape, data } => nest(shape, data),
        }
    }

    /// Dimensions; empty for scalars.
    pub fn shape(&self) -> &[usize] {
        match self {
            Value::Scalar(_) => &[],
            Value::Array { shape, .. } => shape,
        }
    }

    /// Flat element view.
    pub fn scalars(&self) -> &[Scalar] {
        match self {
            Value::Scalar(s) => std::slice::from_ref(s),
            Value::Array { data, .. } => data,
        }
    }

    pub fn first(&self) -> Option<&Scalar> {
        self.scalars().first()
    }

    /// Collapse a single-element array to its scalar.
    pub fn reduce(self) -> Value {
        match self {
            Value::Array { mut data, .. } if data.len() == 1 => Value::Scalar(data.remove(0)),
            other => other,
        }
    }

    /// True for a plain text scalar.
    pub fn is_text(&self) -> bool {
        matches!(self, Value::Scalar(Scalar::Text(_)))
    }

    /// Number of points along dimension 0 (1 for a scalar).
    pub fn rows(&self) -> usize {
        self.shape().first().copied().unwrap_or(1)
    }
}

fn flatten_json(json: &Json, shape: &[usize], out: &mut Vec<Scalar>) -> Result<()> {
    match (shape.split_first(), json) {
        (None, _) => {
            out.push(Scalar::from_json(json)?);
            Ok(())
        }
        (Some((n, rest)), Json::Array(items)) if items.len() == *n => {
            for item in items {
                flatten_json(item, rest, out)?;
            }
            Ok(())
        }
        _ => Err(Error::Value(format!("ragged array near {json}"))),
    }
}

fn fmt_nested(f: &mut fmt::Formatter<'_>, shape: &[usize], data: &[Scalar]) -> fmt::Result {
    f.write_str("[")?;
    match shape {
        [] | [_] => {
            for (i, s) in data.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                match s {
                    Scalar::Text(t) => write!(f, "{t:?}")?,
                    other => write!(f, "{other}")?,
                }
            }
        }
        [n, rest @ ..] => {
            let stride: usize = rest.iter().product();
            for i in 0..*n {
                if i > 0 {
                    f.write_str(", ")?;
                }
                fmt_nested(f, rest, &data[i * stride..(i + 1) * stride])?;
            }
        }
    }
    f.write_str("]")
}

/// Canonical text form, used to decide whether a stored attribute changed.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(s) => write!(f, "{s}"),
            Value::Array { shape, data } => fmt_nested(f, shape, data),
        }
    }
}

impl From<Scalar> for Value {
    fn from(s: Scalar) -> Self {
        Value::Scalar(s)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Scalar(Scalar::Bool(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Scalar(Scalar::Int(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Scalar(Scalar::Float(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Scalar(Scalar::Text(v.to_string()))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Scalar(Scalar::Text(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_scalars() {
        assert_eq!(Value::from_json(&json!(3)).unwrap(), Value::from(3i64));
        assert_eq!(Value::from_json(&json!(2.5)).unwrap(), Value::from(2.5));
        assert_eq!(Value::from_json(&json!("mm")).unwrap(), Value::from("mm"));
        assert_eq!(
            Value::from_json(&json!(u64::MAX)).unwrap(),
            Value::Scalar(Scalar::UInt(u64::MAX))
        );
        assert!(Value::from_json(&json!(null)).is_err());
    }

    #[test]
    fn json_nested_array() {
        let v = Value::from_json(&json!([[1, 2, 3], [4, 5, 6]])).unwrap();
        assert_eq!(v.shape(), &[2, 3]);
        assert_eq!(v.scalars()[4], Scalar::Int(5));
        assert_eq!(v.to_json(), json!([[1, 2, 3], [4, 5, 6]]));
    }

    #[test]
    fn ragged_array_is_rejected() {
        assert!(Value::from_json(&json!([[1, 2], [3]])).is_err());
        assert!(Value::from_json(&json!([1, [2]])).is_err());
    }

    #[test]
    fn empty_array_shape() {
        let v = Value::from_json(&json!([])).unwrap();
        assert_eq!(v.shape(), &[0]);
        assert!(v.scalars().is_empty());
    }

    #[test]
    fn canonical_strings() {
        assert_eq!(Value::from(1.0).to_string(), "1.0");
        assert_eq!(Value::from(true).to_string(), "true");
        let v = Value::from_json(&json!([[1, 2], [3, 4]])).unwrap();
        assert_eq!(v.to_string(), "[[1, 2], [3, 4]]");
        let t = Value::from_json(&json!(["a", "b"])).unwrap();
        assert_eq!(t.to_string(), r#"["a", "b"]"#);
    }

    #[test]
    fn reduce_single_element() {
        let v = Value::array(vec![1], vec![Scalar::Float(0.5)]).unwrap();
        assert_eq!(v.reduce(), Value::from(0.5));
        let w = Value::array(vec![2], vec![Scalar::Int(1), Scalar::Int(2)]).unwrap();
        assert_eq!(w.clone().reduce(), w);
    }

    #[test]
    fn array_checks_element_count() {
        assert!(Value::array(vec![2, 2], vec![Scalar::Int(0); 3]).is_err());
    }
}
