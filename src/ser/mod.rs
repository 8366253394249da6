//! TENS binary encoding
//!
//! The encoder turns canonicalized rows into a single token stream:
//! synthetic control tokens frame the structure, real tokenizer ids carry
//! the payload text. Output token order is a pure function of the
//! canonicalized input, which is what makes double-encoding byte-identical
//! and provider-side prefix caching reliable.

mod dictionary;
mod error;

pub use error::SerError;

pub(crate) use dictionary::ValueDictionary;

use {
	crate::{
		canonical::{self, Value},
		schema::{self, Schema, SchemaMode, SchemaRegistry},
		text::scalar,
		tokenizer::{control, TokenizerAdapter},
	},
	std::collections::BTreeMap,
};

/// Configuration for one serialization run
///
/// Notably holds the tokenizer adapter; construct once and reuse across
/// encodes of the same encoding.
#[derive(Clone, Copy)]
pub struct SerializerConfig<'a> {
	adapter: &'a TokenizerAdapter,
}

impl<'a> SerializerConfig<'a> {
	pub fn new(adapter: &'a TokenizerAdapter) -> Self {
		Self { adapter }
	}
}

/// The result of encoding a record set to tokens
#[derive(Clone, Debug)]
pub struct TokenStream {
	pub tokens: Vec<u32>,
	pub schemas: Vec<Schema>,
	pub mode: SchemaMode,
}

/// Canonicalize `records` and encode them into a token stream
pub fn to_token_stream(
	records: &[Value],
	adapter: &TokenizerAdapter,
) -> Result<TokenStream, SerError> {
	let canonical = canonical::canonicalize_records(records)?;
	to_token_stream_canonical(&canonical, adapter)
}

/// Encode rows that are already canonical (the IR materialization path)
pub(crate) fn to_token_stream_canonical(
	canonical: &[Value],
	adapter: &TokenizerAdapter,
) -> Result<TokenStream, SerError> {
	let rows: Vec<BTreeMap<String, Value>> = canonical
		.iter()
		.map(|record| match record {
			Value::Obj(entries) => canonical::flatten_fields(entries),
			// canonicalize_records only lets objects through
			_ => BTreeMap::new(),
		})
		.collect();
	SerializerState::new(SerializerConfig::new(adapter)).serialize(&rows)
}

/// All state for one serialization run: the schema registry, the value
/// dictionary and the output buffer
pub struct SerializerState<'a> {
	config: SerializerConfig<'a>,
	registry: SchemaRegistry,
	dictionary: ValueDictionary,
	tokens: Vec<u32>,
}

impl<'a> SerializerState<'a> {
	pub fn new(config: SerializerConfig<'a>) -> Self {
		Self {
			config,
			registry: SchemaRegistry::new(),
			dictionary: ValueDictionary::default(),
			tokens: Vec::new(),
		}
	}

	fn serialize(mut self, rows: &[BTreeMap<String, Value>]) -> Result<TokenStream, SerError> {
		self.tokens.push(control::DOC_START);
		if rows.is_empty() {
			self.tokens.push(control::DOC_END);
			return Ok(TokenStream {
				tokens: self.tokens,
				schemas: Vec::new(),
				mode: SchemaMode::Single,
			});
		}

		let mode = schema::mode_for(rows);
		self.dictionary = ValueDictionary::build(rows, self.config.adapter);

		// schema ids are assigned before emission so that every
		// definition precedes the body
		let row_schema_ids: Vec<u32> = match mode {
			SchemaMode::Single => {
				let id = self.registry.superset(rows);
				vec![id; rows.len()]
			}
			SchemaMode::Multi => rows.iter().map(|row| self.registry.register(row)).collect(),
		};

		self.emit_dictionary_defs();
		self.emit_schema_defs();
		match mode {
			SchemaMode::Single => self.emit_single_schema_body(rows)?,
			SchemaMode::Multi => self.emit_multi_schema_body(rows, &row_schema_ids)?,
		}
		self.tokens.push(control::DOC_END);

		let SerializerState {
			registry, tokens, ..
		} = self;
		Ok(TokenStream {
			tokens,
			schemas: registry.schemas().to_vec(),
			mode,
		})
	}

	fn emit_dictionary_defs(&mut self) {
		let rendered: Vec<String> = self
			.dictionary
			.entries()
			.iter()
			.map(|entry| entry.rendered.clone())
			.collect();
		for (id, entry) in rendered.iter().enumerate() {
			self.tokens.push(control::DICT_DEF);
			self.tokens.push(control::DICT_REF_BASE + id as u32);
			self.tokens.push(control::SEPARATOR);
			self.emit_text(entry);
			self.tokens.push(control::SEPARATOR);
		}
	}

	fn emit_schema_defs(&mut self) {
		let schemas = self.registry.schemas().to_vec();
		for schema in &schemas {
			self.tokens.push(control::SCHEMA_DEF);
			for field in &schema.fields {
				self.emit_text(field);
				self.tokens.push(control::SEPARATOR);
			}
		}
	}

	fn emit_single_schema_body(
		&mut self,
		rows: &[BTreeMap<String, Value>],
	) -> Result<(), SerError> {
		let fields = match self.registry.schemas().first() {
			Some(schema) => schema.fields.clone(),
			None => Vec::new(),
		};
		for row in rows {
			self.tokens.push(control::ROW_BREAK);
			// null and absent are both "not present" here; the schema
			// identity never depends on null patterns
			let present: Vec<bool> = fields
				.iter()
				.map(|field| row.get(field).is_some_and(|v| !v.is_null()))
				.collect();
			if present.iter().all(|&p| p) {
				for (i, field) in fields.iter().enumerate() {
					if i > 0 {
						self.tokens.push(control::SEPARATOR);
					}
					if let Some(value) = row.get(field) {
						self.emit_value(value)?;
					}
				}
			} else {
				self.tokens.push(control::PRESENCE_MASK);
				for chunk in present.chunks(control::MASK_CHUNK_BITS) {
					let mut payload = 0u16;
					for (bit, &is_present) in chunk.iter().enumerate() {
						if is_present {
							payload |= 1 << bit;
						}
					}
					self.tokens.push(control::MASK_CHUNK_BASE + payload as u32);
				}
				let mut first = true;
				for (field, &is_present) in fields.iter().zip(&present) {
					if !is_present {
						continue;
					}
					if !first {
						self.tokens.push(control::SEPARATOR);
					}
					first = false;
					if let Some(value) = row.get(field) {
						self.emit_value(value)?;
					}
				}
			}
		}
		Ok(())
	}

	fn emit_multi_schema_body(
		&mut self,
		rows: &[BTreeMap<String, Value>],
		row_schema_ids: &[u32],
	) -> Result<(), SerError> {
		for (row, &schema_id) in rows.iter().zip(row_schema_ids) {
			self.tokens.push(control::SCHEMA_REF);
			self.emit_text(&schema_id.to_string());
			self.tokens.push(control::OBJ_START);
			let fields = match self.registry.get(schema_id) {
				Some(schema) => schema.fields.clone(),
				None => Vec::new(),
			};
			for (i, field) in fields.iter().enumerate() {
				if i > 0 {
					self.tokens.push(control::SEPARATOR);
				}
				match row.get(field) {
					Some(value) => self.emit_value(value)?,
					None => self.tokens.push(control::NULL_VAL),
				}
			}
			self.tokens.push(control::OBJ_END);
		}
		Ok(())
	}

	fn emit_value(&mut self, value: &Value) -> Result<(), SerError> {
		match value {
			Value::Null => self.tokens.push(control::NULL_VAL),
			Value::Bool(true) => self.tokens.push(control::BOOL_TRUE),
			Value::Bool(false) => self.tokens.push(control::BOOL_FALSE),
			Value::Num(n) => {
				let rendered = scalar::render_number(*n);
				self.emit_text(&rendered);
			}
			Value::Str(s) => match self.dictionary.lookup(s) {
				Some(id) => self.tokens.push(control::DICT_REF_BASE + id),
				None => {
					let rendered = scalar::render_string(s);
					self.emit_text(&rendered);
				}
			},
			Value::Arr(items) => {
				let max = control::RANGE_WIDTH as usize;
				if items.len() >= max {
					return Err(SerError::ArrayTooLong {
						len: items.len(),
						max,
					});
				}
				self.tokens.push(control::FIXED_ARRAY);
				self.tokens
					.push(control::ARRAY_LEN_BASE + items.len() as u32);
				for (i, item) in items.iter().enumerate() {
					if i > 0 {
						self.tokens.push(control::SEPARATOR);
					}
					self.emit_value(item)?;
				}
			}
			Value::Obj(entries) => {
				self.tokens.push(control::OBJ_START);
				for (i, (key, entry)) in entries.iter().enumerate() {
					if i > 0 {
						self.tokens.push(control::SEPARATOR);
					}
					let rendered = scalar::render_string(key);
					self.emit_text(&rendered);
					self.tokens.push(control::SEPARATOR);
					self.emit_value(entry)?;
				}
				self.tokens.push(control::OBJ_END);
			}
		}
		Ok(())
	}

	fn emit_text(&mut self, text: &str) {
		self.tokens.extend(self.config.adapter.encode(text).iter());
	}
}
