//! TENS-Text parsing
//!
//! Deliberately lenient where the encoder is strict: blank lines anywhere
//! are ignored, CRLF input is accepted, a missing `@version` defaults to
//! 1, a missing `@encoding` defaults to the current-generation encoding,
//! out-of-range dictionary references decode to null, and unknown
//! directives are skipped with a diagnostic.

use {
	super::scalar,
	crate::canonical::{self, Value},
	std::collections::BTreeMap,
	tracing::warn,
};

/// Encoding assumed when a document carries no `@encoding` directive
pub const DEFAULT_ENCODING: &str = "o200k_base";

/// Any error that may happen while parsing a TENS-Text document
///
/// Line numbers are 1-based positions in the input.
#[derive(Debug, thiserror::Error)]
pub enum TextError {
	#[error("line {line}: malformed {directive} directive")]
	BadDirective { line: usize, directive: String },
	#[error("line {line}: field line outside any record")]
	FieldOutsideRecord { line: usize },
	#[error("line {line}: record marker {name:?} does not match a declared schema")]
	UnknownSchema { line: usize, name: String },
	#[error("line {line}: {message}")]
	BadValue { line: usize, message: String },
}

/// Wire type declared for a field in an `@schema` directive
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
	Str,
	Num,
	Bool,
}

/// One `IDENT ":" type` entry of an `@schema` directive
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextFieldDef {
	pub name: String,
	pub kind: FieldKind,
	pub array: bool,
	pub optional: bool,
}

/// A schema declared by an `@schema` directive
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextSchema {
	pub name: String,
	pub fields: Vec<TextFieldDef>,
}

/// Document-level metadata recovered by the parser
#[derive(Clone, Debug, Default)]
pub struct TextMeta {
	pub version: u32,
	pub encoding: String,
	pub schemas: Vec<TextSchema>,
	pub dictionary: Vec<String>,
	/// Unknown directives skipped during the parse
	pub skipped_directives: usize,
}

/// A parsed document: the records plus its metadata
#[derive(Clone, Debug)]
pub struct TextDocument {
	pub records: Vec<Value>,
	pub meta: TextMeta,
}

/// Parse a TENS-Text document
pub fn from_text(input: &str) -> Result<TextDocument, TextError> {
	let mut meta = TextMeta {
		version: 1,
		encoding: DEFAULT_ENCODING.to_owned(),
		..TextMeta::default()
	};
	let mut records: Vec<Value> = Vec::new();
	// (schema index, ordered field appearances)
	let mut current: Option<(usize, Vec<(String, Value)>)> = None;

	for (index, raw_line) in input.split('\n').enumerate() {
		let line_no = index + 1;
		let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);
		if line.trim().is_empty() {
			continue;
		}

		if let Some(directive) = line.strip_prefix('@') {
			// directives live before the first record; a stray one later
			// is still recognized rather than misread as a field
			parse_directive(directive, line_no, &mut meta)?;
			continue;
		}

		if let Some(field_line) = line.strip_prefix("  ") {
			if field_line.starts_with(' ') {
				return Err(TextError::BadValue {
					line: line_no,
					message: "field lines are indented by exactly two spaces".to_owned(),
				});
			}
			let Some((_, fields)) = current.as_mut() else {
				return Err(TextError::FieldOutsideRecord { line: line_no });
			};
			let (name, value) = parse_field_line(field_line, line_no, &meta.dictionary)?;
			fields.push((name, value));
			continue;
		}

		if line.starts_with(' ') {
			return Err(TextError::BadValue {
				line: line_no,
				message: "field lines are indented by exactly two spaces".to_owned(),
			});
		}

		// column 0: a record marker
		let name = line.trim_end();
		let schema_index = meta
			.schemas
			.iter()
			.position(|schema| schema.name == name)
			.ok_or_else(|| TextError::UnknownSchema {
				line: line_no,
				name: name.to_owned(),
			})?;
		if let Some(done) = current.take() {
			records.push(finish_record(done, &meta));
		}
		current = Some((schema_index, Vec::new()));
	}
	if let Some(done) = current.take() {
		records.push(finish_record(done, &meta));
	}

	Ok(TextDocument { records, meta })
}

fn parse_directive(directive: &str, line: usize, meta: &mut TextMeta) -> Result<(), TextError> {
	let mut parts = directive.split_whitespace();
	let name = parts.next().unwrap_or("");
	match name {
		"version" => {
			let value = parts.next().and_then(|v| v.parse::<u32>().ok());
			match value {
				Some(version) => meta.version = version,
				None => {
					return Err(TextError::BadDirective {
						line,
						directive: "@version".to_owned(),
					})
				}
			}
		}
		"encoding" => match parts.next() {
			Some(encoding) => meta.encoding = encoding.to_owned(),
			None => {
				return Err(TextError::BadDirective {
					line,
					directive: "@encoding".to_owned(),
				})
			}
		},
		"schema" => {
			let schema_name = parts.next().ok_or_else(|| TextError::BadDirective {
				line,
				directive: "@schema".to_owned(),
			})?;
			let mut fields = Vec::new();
			for def in parts {
				fields.push(parse_field_def(def, line)?);
			}
			if fields.is_empty() {
				return Err(TextError::BadDirective {
					line,
					directive: "@schema".to_owned(),
				});
			}
			meta.schemas.push(TextSchema {
				name: schema_name.to_owned(),
				fields,
			});
		}
		"dict" => {
			let rest = directive.strip_prefix("dict").unwrap_or("");
			for value in split_dict_values(rest, line)? {
				meta.dictionary.push(value);
			}
		}
		other => {
			warn!(directive = other, line, "skipping unknown directive");
			meta.skipped_directives += 1;
		}
	}
	Ok(())
}

fn parse_field_def(def: &str, line: usize) -> Result<TextFieldDef, TextError> {
	let bad = || TextError::BadDirective {
		line,
		directive: "@schema".to_owned(),
	};
	let (name, spec) = def.split_once(':').ok_or_else(bad)?;
	let (spec, optional) = match spec.strip_suffix('?') {
		Some(rest) => (rest, true),
		None => (spec, false),
	};
	let (spec, array) = match spec.strip_suffix("[]") {
		Some(rest) => (rest, true),
		None => (spec, false),
	};
	let kind = match spec {
		"str" => FieldKind::Str,
		"num" => FieldKind::Num,
		"bool" => FieldKind::Bool,
		_ => return Err(bad()),
	};
	Ok(TextFieldDef {
		name: name.to_owned(),
		kind,
		array,
		optional,
	})
}

/// Split the value list of a `@dict` directive, honoring quotes
fn split_dict_values(rest: &str, line: usize) -> Result<Vec<String>, TextError> {
	let mut values = Vec::new();
	let mut chars = rest.char_indices().peekable();
	while let Some(&(start, c)) = chars.peek() {
		if c.is_whitespace() {
			chars.next();
			continue;
		}
		if c == '"' {
			// scan to the closing unescaped quote
			chars.next();
			let mut escaped = false;
			let mut end = None;
			for (i, c) in chars.by_ref() {
				if escaped {
					escaped = false;
				} else if c == '\\' {
					escaped = true;
				} else if c == '"' {
					end = Some(i);
					break;
				}
			}
			let end = end.ok_or_else(|| TextError::BadValue {
				line,
				message: "unterminated quoted dictionary value".to_owned(),
			})?;
			let quoted = &rest[start..=end];
			let value = scalar::unquote(quoted).map_err(|e| TextError::BadValue {
				line,
				message: e.to_string(),
			})?;
			values.push(value);
		} else {
			let mut end = rest.len();
			for (i, c) in chars.by_ref() {
				if c.is_whitespace() {
					end = i;
					break;
				}
			}
			values.push(rest[start..end].to_owned());
		}
	}
	Ok(values)
}

/// Parse `IDENT " " value` from a field line (the two-space indent is
/// already stripped)
fn parse_field_line(
	field_line: &str,
	line: usize,
	dictionary: &[String],
) -> Result<(String, Value), TextError> {
	let (name, rest) = match field_line.split_once(' ') {
		Some((name, rest)) => (name, rest),
		// a field with no value reads as null
		None => (field_line.trim_end(), ""),
	};
	let value = parse_value(rest.trim_end(), line, dictionary)?;
	Ok((name.to_owned(), value))
}

fn parse_value(text: &str, line: usize, dictionary: &[String]) -> Result<Value, TextError> {
	if text.is_empty() || text == scalar::NULL_SENTINEL {
		return Ok(Value::Null);
	}
	if text == "true" {
		return Ok(Value::Bool(true));
	}
	if text == "false" {
		return Ok(Value::Bool(false));
	}
	if let Some(reference) = text.strip_prefix('@') {
		if !reference.is_empty() && reference.bytes().all(|b| b.is_ascii_digit()) {
			let id: usize = reference.parse().unwrap_or(usize::MAX);
			return Ok(match dictionary.get(id) {
				Some(entry) => Value::Str(entry.clone()),
				None => {
					warn!(id, line, "out-of-range dictionary reference");
					Value::Null
				}
			});
		}
	}
	if text.starts_with('"') {
		let value = scalar::unquote(text).map_err(|e| TextError::BadValue {
			line,
			message: e.to_string(),
		})?;
		return Ok(Value::Str(value));
	}
	if let Ok(n) = text.parse::<f64>() {
		if n.is_finite() {
			return Ok(Value::Num(n));
		}
	}
	Ok(Value::Str(text.to_owned()))
}

/// Fold ordered field appearances into a record object
fn finish_record((schema_index, appearances): (usize, Vec<(String, Value)>), meta: &TextMeta) -> Value {
	let schema = &meta.schemas[schema_index];
	let mut record = BTreeMap::new();

	for def in &schema.fields {
		let mut values: Vec<Value> = appearances
			.iter()
			.filter(|(name, _)| name == &def.name)
			.map(|(_, value)| value.clone())
			.collect();
		let value = if def.array {
			// zero repetitions of an array field decode as []
			Value::Arr(values)
		} else {
			match values.len() {
				0 => Value::Null,
				1 => values.remove(0),
				// repetition of a scalar field still reads as an array
				_ => Value::Arr(values),
			}
		};
		record.insert(def.name.clone(), value);
	}

	// fields the schema does not declare are kept rather than dropped
	for (name, value) in &appearances {
		if !schema.fields.iter().any(|def| &def.name == name) {
			record.insert(name.clone(), value.clone());
		}
	}

	Value::Obj(canonical::nest_fields(record))
}
