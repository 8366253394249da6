//! TENS binary decoding
//!
//! A state machine over the token stream: dictionary definitions until the
//! first `SCHEMA_DEF`, schema definitions until the body begins, then rows
//! until `DOC_END`. The decoder is tolerant where the format allows a
//! reader to keep going: unknown control tokens are skipped with a
//! diagnostic, out-of-range dictionary references decode to null, and
//! anything after `DOC_END` is ignored.

mod error;

pub use error::DeError;

use {
	crate::{
		canonical::{self, Value},
		framing,
		schema::Schema,
		text::scalar,
		tokenizer::{
			control::{self, ControlToken},
			TokenizerAdapter,
		},
	},
	std::collections::BTreeMap,
	tracing::warn,
};

/// Decode framed bytes into records
///
/// The adapter must match the encoding named in the frame header; mixing
/// vocabularies would silently detokenize payload spans into garbage.
pub fn from_bytes(bytes: &[u8], adapter: &TokenizerAdapter) -> Result<Vec<Value>, DeError> {
	let frame = framing::read_frame(bytes)?;
	if frame.encoding != adapter.encoding().as_str() {
		return Err(DeError::EncodingMismatch {
			frame: frame.encoding,
			adapter: adapter.encoding().as_str().to_owned(),
		});
	}
	from_token_stream(&frame.tokens, adapter)
}

/// Decode an unframed token stream into records
pub fn from_token_stream(
	tokens: &[u32],
	adapter: &TokenizerAdapter,
) -> Result<Vec<Value>, DeError> {
	Decoder {
		cursor: TokenCursor { tokens, pos: 0 },
		adapter,
		dictionary: Vec::new(),
		schemas: Vec::new(),
	}
	.run()
}

struct TokenCursor<'t> {
	tokens: &'t [u32],
	pos: usize,
}

impl TokenCursor<'_> {
	fn peek(&self) -> Option<u32> {
		self.tokens.get(self.pos).copied()
	}

	fn bump(&mut self) -> Option<u32> {
		let token = self.peek()?;
		self.pos += 1;
		Some(token)
	}

	/// Consume one `SEPARATOR` if it is next
	fn skip_separator(&mut self) {
		if self.peek() == Some(control::SEPARATOR) {
			self.pos += 1;
		}
	}
}

struct Decoder<'t, 'a> {
	cursor: TokenCursor<'t>,
	adapter: &'a TokenizerAdapter,
	dictionary: Vec<Value>,
	schemas: Vec<Schema>,
}

impl Decoder<'_, '_> {
	fn run(mut self) -> Result<Vec<Value>, DeError> {
		let mut records = Vec::new();
		while let Some(token) = self.cursor.peek() {
			match control::classify(token) {
				None => {
					// payload tokens outside any construct; skip
					warn!(token, pos = self.cursor.pos, "stray payload token at top level");
					self.cursor.bump();
				}
				Some(ControlToken::DocStart) => {
					self.cursor.bump();
				}
				Some(ControlToken::DocEnd) => break,
				Some(ControlToken::DictDef) => {
					self.cursor.bump();
					self.read_dictionary_def()?;
				}
				Some(ControlToken::SchemaDef) => {
					self.cursor.bump();
					self.read_schema_def()?;
				}
				Some(ControlToken::RowBreak) => {
					self.cursor.bump();
					records.push(self.read_single_schema_row()?);
				}
				Some(ControlToken::SchemaRef) => {
					self.cursor.bump();
					records.push(self.read_multi_schema_row()?);
				}
				Some(other) => {
					warn!(?other, pos = self.cursor.pos, "skipping unexpected control token");
					self.cursor.bump();
				}
			}
		}
		Ok(records)
	}

	fn read_dictionary_def(&mut self) -> Result<(), DeError> {
		let at = self.cursor.pos;
		let id = match self.cursor.bump().and_then(control::classify) {
			Some(ControlToken::DictRef(id)) => id as usize,
			_ => {
				return Err(DeError::UnexpectedToken {
					at,
					reading: "dictionary entry id",
				})
			}
		};
		self.cursor.skip_separator();
		let rendered = self.read_text_span("dictionary entry value")?;
		self.cursor.skip_separator();
		if self.dictionary.len() <= id {
			self.dictionary.resize(id + 1, Value::Null);
		}
		self.dictionary[id] = scalar::parse_binary_scalar(&rendered);
		Ok(())
	}

	fn read_schema_def(&mut self) -> Result<(), DeError> {
		let mut fields = Vec::new();
		loop {
			match self.cursor.peek().map(control::classify) {
				// a real token starts the next field name
				Some(None) => {
					let field = self.read_text_span("schema field name")?;
					self.cursor.skip_separator();
					fields.push(field);
				}
				// empty field name: separator with no payload before it
				Some(Some(ControlToken::Separator)) => {
					self.cursor.bump();
					fields.push(String::new());
				}
				_ => break,
			}
		}
		let id = self.schemas.len() as u32;
		self.schemas.push(Schema { id, fields });
		Ok(())
	}

	fn read_single_schema_row(&mut self) -> Result<Value, DeError> {
		let at = self.cursor.pos;
		let schema = self
			.schemas
			.last()
			.ok_or(DeError::MissingSchema { at })?
			.clone();
		let field_count = schema.fields.len();

		let present: Vec<bool> = if self.cursor.peek() == Some(control::PRESENCE_MASK) {
			self.cursor.bump();
			let chunk_count = field_count.div_ceil(control::MASK_CHUNK_BITS);
			let mut bits = Vec::with_capacity(field_count);
			for _ in 0..chunk_count {
				let at = self.cursor.pos;
				let payload = match self.cursor.bump().and_then(control::classify) {
					Some(ControlToken::MaskChunk(payload)) => payload,
					_ => {
						return Err(DeError::UnexpectedToken {
							at,
							reading: "presence mask chunk",
						})
					}
				};
				for bit in 0..control::MASK_CHUNK_BITS {
					bits.push(payload & (1 << bit) != 0);
				}
			}
			bits.truncate(field_count);
			bits
		} else {
			vec![true; field_count]
		};

		let mut record = BTreeMap::new();
		let mut first = true;
		for (field, is_present) in schema.fields.iter().zip(present) {
			if !is_present {
				// masked-out fields read back as explicit nulls
				record.insert(field.clone(), Value::Null);
				continue;
			}
			if !first {
				self.cursor.skip_separator();
			}
			first = false;
			let value = self.read_value()?;
			record.insert(field.clone(), value);
		}
		Ok(Value::Obj(canonical::nest_fields(record)))
	}

	fn read_multi_schema_row(&mut self) -> Result<Value, DeError> {
		let at = self.cursor.pos;
		let reference = self.read_text_span("schema reference")?;
		let schema = reference
			.trim()
			.parse::<usize>()
			.ok()
			.and_then(|id| self.schemas.get(id))
			.ok_or_else(|| DeError::BadSchemaRef {
				at,
				reference: reference.clone(),
			})?
			.clone();
		if self.cursor.peek() == Some(control::OBJ_START) {
			self.cursor.bump();
		} else {
			return Err(DeError::UnexpectedToken {
				at: self.cursor.pos,
				reading: "row object start",
			});
		}
		let mut record = BTreeMap::new();
		for (i, field) in schema.fields.iter().enumerate() {
			if i > 0 {
				self.cursor.skip_separator();
			}
			let value = self.read_value()?;
			record.insert(field.clone(), value);
		}
		if self.cursor.peek() == Some(control::OBJ_END) {
			self.cursor.bump();
		}
		Ok(Value::Obj(canonical::nest_fields(record)))
	}

	fn read_value(&mut self) -> Result<Value, DeError> {
		loop {
			let at = self.cursor.pos;
			let token = self.cursor.peek().ok_or(DeError::UnexpectedEnd {
				at,
				reading: "value",
			})?;
			return Ok(match control::classify(token) {
				None => {
					let span = self.read_text_span("scalar value")?;
					scalar::parse_binary_scalar(&span)
				}
				Some(ControlToken::NullVal) => {
					self.cursor.bump();
					Value::Null
				}
				Some(ControlToken::BoolTrue) => {
					self.cursor.bump();
					Value::Bool(true)
				}
				Some(ControlToken::BoolFalse) => {
					self.cursor.bump();
					Value::Bool(false)
				}
				Some(ControlToken::DictRef(id)) => {
					self.cursor.bump();
					match self.dictionary.get(id as usize) {
						Some(value) => value.clone(),
						None => {
							// never crash on a dangling reference
							warn!(id, pos = at, "out-of-range dictionary reference");
							Value::Null
						}
					}
				}
				Some(ControlToken::FixedArray) => {
					self.cursor.bump();
					self.read_array()?
				}
				Some(ControlToken::ObjStart) => {
					self.cursor.bump();
					self.read_object()?
				}
				Some(ControlToken::Unknown(id)) => {
					warn!(id, pos = at, "skipping unknown control token");
					self.cursor.bump();
					continue;
				}
				Some(_) => {
					// a structural token where a value belongs means an
					// absent value (e.g. an empty text span)
					Value::Str(String::new())
				}
			});
		}
	}

	fn read_array(&mut self) -> Result<Value, DeError> {
		let at = self.cursor.pos;
		let len = match self.cursor.bump().and_then(control::classify) {
			Some(ControlToken::ArrayLen(len)) => len as usize,
			_ => {
				return Err(DeError::UnexpectedToken {
					at,
					reading: "array length prefix",
				})
			}
		};
		let mut items = Vec::with_capacity(len.min(1024));
		for i in 0..len {
			if i > 0 {
				self.cursor.skip_separator();
			}
			items.push(self.read_value()?);
		}
		Ok(Value::Arr(items))
	}

	fn read_object(&mut self) -> Result<Value, DeError> {
		let mut entries = BTreeMap::new();
		let mut first = true;
		loop {
			match self.cursor.peek() {
				None => {
					return Err(DeError::UnexpectedEnd {
						at: self.cursor.pos,
						reading: "object entries",
					})
				}
				Some(token) if token == control::OBJ_END => {
					self.cursor.bump();
					return Ok(Value::Obj(entries));
				}
				Some(_) => {
					if !first {
						self.cursor.skip_separator();
						if self.cursor.peek() == Some(control::OBJ_END) {
							self.cursor.bump();
							return Ok(Value::Obj(entries));
						}
					}
					first = false;
					let before = self.cursor.pos;
					let key_span = self.read_text_span("object key")?;
					let key = match scalar::parse_binary_scalar(&key_span) {
						Value::Str(s) => s,
						// a key that parses as something else keeps its
						// spelled-out form
						_ => key_span,
					};
					self.cursor.skip_separator();
					let value = self.read_value()?;
					if self.cursor.pos == before {
						// a structural token where an entry belongs; give
						// up on this object rather than spin on it
						warn!(pos = before, "malformed object entry");
						return Ok(Value::Obj(entries));
					}
					entries.insert(key, value);
				}
			}
		}
	}

	/// Collect consecutive payload tokens and detokenize them
	fn read_text_span(&mut self, reading: &'static str) -> Result<String, DeError> {
		let start = self.cursor.pos;
		while self
			.cursor
			.peek()
			.is_some_and(|token| !control::is_control(token))
		{
			self.cursor.pos += 1;
		}
		let span = &self.cursor.tokens[start..self.cursor.pos];
		if span.is_empty() {
			return Ok(String::new());
		}
		self.adapter.decode(span).map_err(|e| {
			warn!(at = start, %e, "failed to detokenize {reading} span");
			DeError::Tokenizer(e)
		})
	}
}
