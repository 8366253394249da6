use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};

/// A record value in the supported domain
///
/// The universe of representable values is
/// `null | bool | finite number | string | object | array`. Anything a
/// caller hands in outside of this universe is lowered into it (or
/// rejected) by [`canonicalize_records`](super::canonicalize_records);
/// the codecs themselves only ever see `Value` trees.
///
/// Objects keep their entries in a [`BTreeMap`], so keys are always in
/// Unicode code-point order and two semantically equal objects compare
/// equal regardless of insertion order.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
	Null,
	Bool(bool),
	Num(f64),
	Str(String),
	Arr(Vec<Value>),
	Obj(BTreeMap<String, Value>),
}

impl Value {
	pub fn is_null(&self) -> bool {
		matches!(self, Value::Null)
	}

	/// Borrow the entries if this value is an object
	pub fn as_obj(&self) -> Option<&BTreeMap<String, Value>> {
		match self {
			Value::Obj(entries) => Some(entries),
			_ => None,
		}
	}

	/// Short name of the variant, for error messages
	pub(crate) fn kind(&self) -> &'static str {
		match self {
			Value::Null => "null",
			Value::Bool(_) => "bool",
			Value::Num(_) => "number",
			Value::Str(_) => "string",
			Value::Arr(_) => "array",
			Value::Obj(_) => "object",
		}
	}
}

impl From<bool> for Value {
	fn from(b: bool) -> Self {
		Value::Bool(b)
	}
}

impl From<f64> for Value {
	fn from(n: f64) -> Self {
		Value::Num(n)
	}
}

impl From<i64> for Value {
	fn from(n: i64) -> Self {
		Value::Num(n as f64)
	}
}

impl From<&str> for Value {
	fn from(s: &str) -> Self {
		Value::Str(s.to_owned())
	}
}

impl From<String> for Value {
	fn from(s: String) -> Self {
		Value::Str(s)
	}
}

/// Dates lower to their ISO-8601 UTC millisecond string
impl From<DateTime<Utc>> for Value {
	fn from(date: DateTime<Utc>) -> Self {
		Value::Str(date.to_rfc3339_opts(SecondsFormat::Millis, true))
	}
}

impl From<serde_json::Value> for Value {
	fn from(v: serde_json::Value) -> Self {
		match v {
			serde_json::Value::Null => Value::Null,
			serde_json::Value::Bool(b) => Value::Bool(b),
			// `as_f64` is only `None` under serde_json's arbitrary-precision
			// mode; NaN then canonicalizes to null like any non-finite number
			serde_json::Value::Number(n) => Value::Num(n.as_f64().unwrap_or(f64::NAN)),
			serde_json::Value::String(s) => Value::Str(s),
			serde_json::Value::Array(items) => {
				Value::Arr(items.into_iter().map(Into::into).collect())
			}
			serde_json::Value::Object(entries) => Value::Obj(
				entries
					.into_iter()
					.map(|(key, value)| (key, value.into()))
					.collect(),
			),
		}
	}
}

impl From<Value> for serde_json::Value {
	fn from(v: Value) -> Self {
		match v {
			Value::Null => serde_json::Value::Null,
			Value::Bool(b) => serde_json::Value::Bool(b),
			Value::Num(n) => {
				if n.fract() == 0.0 && n >= i64::MIN as f64 && n <= i64::MAX as f64 {
					serde_json::Value::Number((n as i64).into())
				} else {
					serde_json::Number::from_f64(n)
						.map(serde_json::Value::Number)
						.unwrap_or(serde_json::Value::Null)
				}
			}
			Value::Str(s) => serde_json::Value::String(s),
			Value::Arr(items) => {
				serde_json::Value::Array(items.into_iter().map(Into::into).collect())
			}
			Value::Obj(entries) => serde_json::Value::Object(
				entries
					.into_iter()
					.map(|(key, value)| (key, value.into()))
					.collect(),
			),
		}
	}
}
