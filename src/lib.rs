//! # contex
//!
//! A token-efficient serialization engine for structured records headed
//! into LLM prompts. Record sets are canonicalized deterministically,
//! deduplicated by shape, and rendered either as a binary control-token
//! stream (TENS) or as a human-readable text surface (TENS-Text). Three
//! properties hold simultaneously:
//!
//! - fewer tokens than the equivalent JSON under real tokenizer encodings,
//! - bit-exact determinism: semantically equal inputs produce identical
//!   bytes, which is what makes provider-side prefix caching land,
//! - lossless round-trips over the supported value domain.
//!
//! ```
//! use contex::{Encoding, TokenizerAdapter, Value};
//!
//! let records: Vec<Value> = vec![
//! 	serde_json::json!({"id": 1, "name": "Alice", "role": "admin"}).into(),
//! 	serde_json::json!({"id": 2, "name": "Bob", "role": "user"}).into(),
//! ];
//!
//! let adapter = TokenizerAdapter::new(Encoding::Cl100kBase)?;
//! let bytes = contex::encode_binary(&records, &adapter)?;
//! let decoded = contex::decode_binary(&bytes, &adapter)?;
//! assert_eq!(decoded, contex::canonicalize_records(&records)?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! The same records render as text with `encode_text`:
//!
//! ```text
//! @version 1
//! @encoding cl100k_base
//! @schema rec id:num name:str role:str
//! rec
//!   id 1
//!   name Alice
//!   role admin
//! rec
//!   id 2
//!   name Bob
//!   role user
//! ```
//!
//! # Token memory
//!
//! [`TokenMemory`] wraps the binary path with a content-addressed store:
//! IR bytes live under `ir/<sha256>`, and per-model token renderings are
//! cached keyed by `(hash, model, tokenizer fingerprint)`. The fingerprint
//! binding means a silently updated tokenizer can never serve stale
//! tokens; the access is reported as `ENCODING_DRIFT` and the entry is
//! rebuilt.
//!
//! # What this crate does not do
//!
//! No general-purpose schema language, no cyclic graphs, no numeric
//! domain beyond IEEE-754 doubles, and no promises about tokenizer
//! families beyond the four supported encodings. Nothing in the crate
//! reads environment variables or process arguments; all state lives in
//! explicit instances.

pub mod canonical;
pub mod de;
pub mod framing;
pub mod memory;
pub mod schema;
pub mod ser;
pub mod text;
pub mod tokenizer;

pub use {
	canonical::{canonicalize_records, canonicalize_value, InputError, Value},
	de::DeError,
	framing::FrameError,
	memory::{
		encode_ir, set_diagnostics_sink, CacheEvent, CacheLookup, DiagnosticsSink, Ir, IrMeta,
		MaterializeOptions, MaterializedTokens, MemoryError, MissReason, StoreOutcome, TokenMemory,
	},
	schema::{Schema, SchemaMode, SchemaRegistry, SINGLE_SCHEMA_FIELD_LIMIT},
	ser::{SerError, TokenStream},
	text::{TextDocument, TextError, TextMeta},
	tokenizer::{encoding_for_model, CacheStats, Encoding, TokenizerAdapter, TokenizerError},
};

/// Canonicalize `records` and encode them as framed TENS bytes
pub fn encode_binary(records: &[Value], adapter: &TokenizerAdapter) -> Result<Vec<u8>, SerError> {
	let stream = ser::to_token_stream(records, adapter)?;
	Ok(framing::write_frame(
		adapter.encoding().as_str(),
		&stream.tokens,
	))
}

/// Decode framed TENS bytes back into records
pub fn decode_binary(bytes: &[u8], adapter: &TokenizerAdapter) -> Result<Vec<Value>, DeError> {
	de::from_bytes(bytes, adapter)
}

/// Canonicalize `records` and render them as a TENS-Text document
///
/// `schema_name` names the record marker (and, with multiple schemas, the
/// marker prefix); it defaults to
/// [`rec`](text::DEFAULT_SCHEMA_NAME).
pub fn encode_text(
	records: &[Value],
	adapter: &TokenizerAdapter,
	schema_name: Option<&str>,
) -> Result<String, SerError> {
	text::to_text(records, adapter, schema_name)
}

/// Parse a TENS-Text document into records and document metadata
pub fn decode_text(input: &str) -> Result<TextDocument, TextError> {
	text::from_text(input)
}
