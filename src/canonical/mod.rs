//! Canonical value model and deterministic normalization
//!
//! Canonicalization is the first stage of every encode: it maps an
//! arbitrary record tree onto the supported domain so that semantically
//! equal inputs become *identical* values. Everything downstream (schema
//! identity, dictionary selection, the byte stream, the IR hash) relies on
//! this being deterministic and idempotent.
//!
//! The permitted transformations are exactly:
//! - NFKC normalization of keys and string values,
//! - stripping trailing whitespace from each line of a string value,
//! - sorting object keys by Unicode code-point order,
//! - `-0 → 0` and non-finite numbers → null.
//!
//! There is no coercion between types.

mod value;

pub use value::Value;

use {std::collections::BTreeMap, unicode_normalization::UnicodeNormalization};

/// Bumped whenever a normalization rule changes, so stored IR metadata can
/// identify the canonicalization that produced it.
pub const CANONICALIZATION_VERSION: &str = "1";

/// Nesting deeper than this is rejected rather than traversed. Legitimate
/// record data never comes close; trees that do are either adversarial or
/// the unrolling of a cyclic structure.
const MAX_DEPTH: usize = 128;

/// Keys that would collide with prototype machinery in downstream
/// JavaScript consumers of the decoded records.
const FORBIDDEN_KEYS: &[&str] = &["__proto__", "constructor", "prototype"];

/// Error rejecting input outside the supported domain
#[derive(Debug, thiserror::Error)]
pub enum InputError {
	#[error("record {index} is not an object (found {found})")]
	RowNotAnObject { index: usize, found: &'static str },
	#[error("key {key:?} is not allowed in record data")]
	ForbiddenKey { key: String },
	#[error("value nesting exceeds the supported depth of {MAX_DEPTH}")]
	TooDeep,
}

/// Canonicalize a record set (an array of objects)
///
/// Idempotent: `canonicalize_records(&canonicalize_records(d)?)` returns
/// the same records.
pub fn canonicalize_records(records: &[Value]) -> Result<Vec<Value>, InputError> {
	records
		.iter()
		.enumerate()
		.map(|(index, record)| match record {
			Value::Obj(_) => canonicalize_value(record),
			other => Err(InputError::RowNotAnObject {
				index,
				found: other.kind(),
			}),
		})
		.collect()
}

/// Canonicalize a single value tree
pub fn canonicalize_value(value: &Value) -> Result<Value, InputError> {
	canonicalize_inner(value, 0)
}

fn canonicalize_inner(value: &Value, depth: usize) -> Result<Value, InputError> {
	if depth > MAX_DEPTH {
		return Err(InputError::TooDeep);
	}
	Ok(match value {
		Value::Null => Value::Null,
		Value::Bool(b) => Value::Bool(*b),
		Value::Num(n) if !n.is_finite() => Value::Null,
		// covers -0.0: `-0.0 == 0.0` but the two are distinct bit patterns
		Value::Num(n) if *n == 0.0 => Value::Num(0.0),
		Value::Num(n) => Value::Num(*n),
		Value::Str(s) => Value::Str(canonical_string(s)),
		Value::Arr(items) => Value::Arr(
			items
				.iter()
				.map(|item| canonicalize_inner(item, depth + 1))
				.collect::<Result<_, _>>()?,
		),
		Value::Obj(entries) => {
			let mut out = BTreeMap::new();
			for (key, entry) in entries {
				if FORBIDDEN_KEYS.contains(&key.as_str()) {
					return Err(InputError::ForbiddenKey { key: key.clone() });
				}
				out.insert(canonical_key(key), canonicalize_inner(entry, depth + 1)?);
			}
			Value::Obj(out)
		}
	})
}

fn canonical_key(key: &str) -> String {
	key.nfkc().collect()
}

/// NFKC-normalize, then strip trailing whitespace from every line
fn canonical_string(s: &str) -> String {
	let normalized: String = s.nfkc().collect();
	let mut out = String::with_capacity(normalized.len());
	for (i, line) in normalized.split('\n').enumerate() {
		if i > 0 {
			out.push('\n');
		}
		out.push_str(line.trim_end());
	}
	out
}

/// Flatten one canonical record to dot-notation field paths
///
/// Rows are positional against their schema, so nested objects collapse
/// into dotted keys before registration. Arrays stay opaque values and
/// empty nested objects vanish (they carry no fields). `.` in a source key
/// is reserved as the path separator.
pub(crate) fn flatten_fields(record: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
	let mut out = BTreeMap::new();
	flatten_into("", record, &mut out);
	out
}

fn flatten_into(prefix: &str, entries: &BTreeMap<String, Value>, out: &mut BTreeMap<String, Value>) {
	for (key, value) in entries {
		let path = if prefix.is_empty() {
			key.clone()
		} else {
			format!("{prefix}.{key}")
		};
		match value {
			Value::Obj(nested) if !nested.is_empty() => flatten_into(&path, nested, out),
			Value::Obj(_) => {}
			other => {
				out.insert(path, other.clone());
			}
		}
	}
}

/// Rebuild nested objects from dotted field paths (inverse of
/// [`flatten_fields`])
pub(crate) fn nest_fields(flat: BTreeMap<String, Value>) -> BTreeMap<String, Value> {
	let mut out = BTreeMap::new();
	for (key, value) in flat {
		let segments: Vec<&str> = key.split('.').collect();
		if segments.len() == 1 || segments.iter().any(|segment| segment.is_empty()) {
			out.insert(key, value);
		} else {
			insert_path(&mut out, &segments, value);
		}
	}
	out
}

fn insert_path(target: &mut BTreeMap<String, Value>, path: &[&str], value: Value) {
	if path.len() == 1 {
		target.insert(path[0].to_owned(), value);
		return;
	}
	let entry = target
		.entry(path[0].to_owned())
		.or_insert_with(|| Value::Obj(BTreeMap::new()));
	if !matches!(entry, Value::Obj(_)) {
		*entry = Value::Obj(BTreeMap::new());
	}
	match entry {
		Value::Obj(nested) => insert_path(nested, &path[1..], value),
		_ => unreachable!(),
	}
}

#[cfg(test)]
mod tests {
	use {super::*, pretty_assertions::assert_eq};

	fn obj(entries: &[(&str, Value)]) -> Value {
		Value::Obj(
			entries
				.iter()
				.map(|(key, value)| (key.to_string(), value.clone()))
				.collect(),
		)
	}

	#[test]
	fn canonicalize_is_idempotent() {
		let records = vec![obj(&[
			("name", Value::Str("  Héllo \n world  ".into())),
			("n", Value::Num(-0.0)),
			("bad", Value::Num(f64::NAN)),
		])];
		let once = canonicalize_records(&records).unwrap();
		let twice = canonicalize_records(&once).unwrap();
		assert_eq!(once, twice);
	}

	#[test]
	fn nfkc_unifies_equivalent_strings() {
		// "é" precomposed vs combining-accent spelling
		let a = canonicalize_value(&Value::Str("Caf\u{00e9}".into())).unwrap();
		let b = canonicalize_value(&Value::Str("Cafe\u{0301}".into())).unwrap();
		assert_eq!(a, b);
	}

	#[test]
	fn trailing_whitespace_is_stripped_per_line() {
		let v = canonicalize_value(&Value::Str("a  \nb\t\nc".into())).unwrap();
		assert_eq!(v, Value::Str("a\nb\nc".into()));
	}

	#[test]
	fn negative_zero_normalizes_to_zero() {
		let v = canonicalize_value(&Value::Num(-0.0)).unwrap();
		match v {
			Value::Num(n) => assert!(n == 0.0 && n.is_sign_positive()),
			other => panic!("expected number, got {other:?}"),
		}
	}

	#[test]
	fn non_finite_numbers_become_null() {
		for n in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
			assert_eq!(canonicalize_value(&Value::Num(n)).unwrap(), Value::Null);
		}
	}

	#[test]
	fn forbidden_keys_are_rejected() {
		let record = obj(&[("__proto__", Value::Num(1.0))]);
		assert!(matches!(
			canonicalize_records(&[record]),
			Err(InputError::ForbiddenKey { .. })
		));
	}

	#[test]
	fn top_level_must_be_objects() {
		assert!(matches!(
			canonicalize_records(&[Value::Num(1.0)]),
			Err(InputError::RowNotAnObject { index: 0, .. })
		));
	}

	#[test]
	fn depth_limit_rejects_runaway_nesting() {
		let mut value = Value::Num(1.0);
		for _ in 0..200 {
			value = Value::Arr(vec![value]);
		}
		assert!(matches!(
			canonicalize_value(&value),
			Err(InputError::TooDeep)
		));
	}

	#[test]
	fn flatten_and_nest_are_inverse() {
		let record = match obj(&[
			("id", Value::Num(1.0)),
			(
				"user",
				obj(&[
					("name", Value::Str("a".into())),
					("address", obj(&[("city", Value::Str("x".into()))])),
				]),
			),
			("tags", Value::Arr(vec![Value::Str("t".into())])),
		]) {
			Value::Obj(entries) => entries,
			_ => unreachable!(),
		};
		let flat = flatten_fields(&record);
		assert_eq!(
			flat.keys().collect::<Vec<_>>(),
			vec!["id", "tags", "user.address.city", "user.name"]
		);
		assert_eq!(nest_fields(flat), record);
	}
}
