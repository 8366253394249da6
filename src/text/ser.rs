//! TENS-Text encoding
//!
//! The human-readable surface. Directive order, two-space indentation and
//! the quoting rule are bit-exact requirements: the same records always
//! produce the same bytes, and re-encoding a decoded document reproduces
//! the original text.

use {
	super::scalar,
	crate::{
		canonical::{self, Value},
		schema::{self, SchemaMode, SchemaRegistry},
		ser::{SerError, ValueDictionary},
		tokenizer::TokenizerAdapter,
	},
	std::collections::BTreeMap,
	std::fmt::Write,
};

/// Default record marker when the caller does not name the schema
pub const DEFAULT_SCHEMA_NAME: &str = "rec";

pub(crate) const TEXT_VERSION: u32 = 1;

/// Inferred wire type of a field, for the `@schema` directive
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FieldBase {
	Str,
	Num,
	Bool,
}

#[derive(Clone, Copy, Debug)]
struct FieldShape {
	base: FieldBase,
	array: bool,
	optional: bool,
}

/// Canonicalize `records` and render them as a TENS-Text document
pub fn to_text(
	records: &[Value],
	adapter: &TokenizerAdapter,
	schema_name: Option<&str>,
) -> Result<String, SerError> {
	let base_name = schema_name.unwrap_or(DEFAULT_SCHEMA_NAME);
	if !is_ident(base_name) {
		return Err(SerError::InvalidSchemaName {
			name: base_name.to_owned(),
		});
	}

	let canonical = canonical::canonicalize_records(records)?;
	let rows: Vec<BTreeMap<String, Value>> = canonical
		.iter()
		.map(|record| match record {
			Value::Obj(entries) => canonical::flatten_fields(entries),
			_ => BTreeMap::new(),
		})
		.collect();

	let mut out = String::new();
	let _ = writeln!(out, "@version {TEXT_VERSION}");
	let _ = writeln!(out, "@encoding {}", adapter.encoding());
	if rows.is_empty() {
		return Ok(out);
	}

	let mut registry = SchemaRegistry::new();
	let row_schema_ids: Vec<u32> = match schema::mode_for(&rows) {
		SchemaMode::Single => {
			let id = registry.superset(&rows);
			vec![id; rows.len()]
		}
		SchemaMode::Multi => rows.iter().map(|row| registry.register(row)).collect(),
	};
	let schema_names: Vec<String> = if registry.len() == 1 {
		vec![base_name.to_owned()]
	} else {
		(0..registry.len()).map(|i| format!("{base_name}{i}")).collect()
	};

	// field shapes are inferred across the whole dataset per schema
	let shapes = infer_shapes(&registry, &rows, &row_schema_ids)?;
	for schema in registry.schemas() {
		let _ = write!(out, "@schema {}", schema_names[schema.id as usize]);
		for (field, shape) in schema.fields.iter().zip(&shapes[schema.id as usize]) {
			if !is_ident(field) {
				return Err(SerError::InvalidFieldName {
					name: field.clone(),
				});
			}
			let base = match shape.base {
				FieldBase::Str => "str",
				FieldBase::Num => "num",
				FieldBase::Bool => "bool",
			};
			let _ = write!(out, " {field}:{base}");
			if shape.array {
				out.push_str("[]");
			}
			if shape.optional {
				out.push('?');
			}
		}
		out.push('\n');
	}

	let dictionary = ValueDictionary::build(&rows, adapter);
	if !dictionary.is_empty() {
		out.push_str("@dict");
		for entry in dictionary.entries() {
			out.push(' ');
			out.push_str(&entry.rendered);
		}
		out.push('\n');
	}

	for (row, &schema_id) in rows.iter().zip(&row_schema_ids) {
		out.push_str(&schema_names[schema_id as usize]);
		out.push('\n');
		let fields = match registry.get(schema_id) {
			Some(schema) => &schema.fields,
			None => continue,
		};
		for field in fields {
			let Some(value) = row.get(field) else {
				continue;
			};
			match value {
				// nulls are omitted; the schema's `?` marker carries them
				Value::Null => {}
				Value::Arr(items) => {
					for item in items {
						write_field_line(&mut out, field, item, &dictionary)?;
					}
				}
				scalar_value => write_field_line(&mut out, field, scalar_value, &dictionary)?,
			}
		}
	}
	Ok(out)
}

fn write_field_line(
	out: &mut String,
	field: &str,
	value: &Value,
	dictionary: &ValueDictionary,
) -> Result<(), SerError> {
	out.push_str("  ");
	out.push_str(field);
	out.push(' ');
	match value {
		Value::Null => out.push_str(scalar::NULL_SENTINEL),
		Value::Bool(true) => out.push_str("true"),
		Value::Bool(false) => out.push_str("false"),
		Value::Num(n) => out.push_str(&scalar::render_number(*n)),
		Value::Str(s) => match dictionary.lookup(s) {
			Some(id) => {
				let _ = write!(out, "@{id}");
			}
			None => out.push_str(&scalar::render_string(s)),
		},
		Value::Arr(_) => {
			return Err(SerError::UnrepresentableText {
				field: field.to_owned(),
				kind: "array of arrays",
			})
		}
		Value::Obj(_) => {
			return Err(SerError::UnrepresentableText {
				field: field.to_owned(),
				kind: "object inside an array",
			})
		}
	}
	out.push('\n');
	Ok(())
}

struct Tally {
	strings: usize,
	bools: usize,
	scalars: usize,
	any_array: bool,
	any_missing: bool,
}

fn infer_shapes(
	registry: &SchemaRegistry,
	rows: &[BTreeMap<String, Value>],
	row_schema_ids: &[u32],
) -> Result<Vec<Vec<FieldShape>>, SerError> {
	let mut tallies: Vec<Vec<Tally>> = registry
		.schemas()
		.iter()
		.map(|schema| {
			schema
				.fields
				.iter()
				.map(|_| Tally {
					strings: 0,
					bools: 0,
					scalars: 0,
					any_array: false,
					any_missing: false,
				})
				.collect()
		})
		.collect();

	for (row, &schema_id) in rows.iter().zip(row_schema_ids) {
		let schema = match registry.get(schema_id) {
			Some(schema) => schema,
			None => continue,
		};
		for (index, field) in schema.fields.iter().enumerate() {
			let tally = &mut tallies[schema_id as usize][index];
			match row.get(field) {
				None | Some(Value::Null) => tally.any_missing = true,
				Some(Value::Arr(items)) => {
					tally.any_array = true;
					for item in items {
						tally_scalar(tally, item);
					}
				}
				Some(other) => tally_scalar(tally, other),
			}
		}
	}

	Ok(tallies
		.into_iter()
		.map(|fields| {
			fields
				.into_iter()
				.map(|tally| FieldShape {
					base: if tally.strings > 0 {
						FieldBase::Str
					} else if tally.scalars > 0 && tally.bools == tally.scalars {
						FieldBase::Bool
					} else {
						FieldBase::Num
					},
					array: tally.any_array,
					optional: tally.any_missing,
				})
				.collect()
		})
		.collect())
}

fn tally_scalar(tally: &mut Tally, value: &Value) {
	match value {
		Value::Str(_) => {
			tally.strings += 1;
			tally.scalars += 1;
		}
		Value::Bool(_) => {
			tally.bools += 1;
			tally.scalars += 1;
		}
		Value::Num(_) => tally.scalars += 1,
		Value::Null => {}
		Value::Arr(_) | Value::Obj(_) => {}
	}
}

/// Whether a name can stand in IDENT position (schema names, field names)
pub(crate) fn is_ident(name: &str) -> bool {
	!name.is_empty()
		&& !name.starts_with('@')
		&& !name.chars().any(|c| {
			c.is_whitespace()
				|| matches!(
					c,
					'"' | '\\' | '#' | '|' | '>' | ',' | '=' | '{' | '}' | '[' | ']' | ':'
				)
		})
}
