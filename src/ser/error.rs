use crate::{canonical::InputError, tokenizer::TokenizerError};

/// Any error that may happen during encoding
#[derive(Debug, thiserror::Error)]
pub enum SerError {
	#[error(transparent)]
	Input(#[from] InputError),
	#[error(transparent)]
	Tokenizer(#[from] TokenizerError),
	#[error("array of {len} elements exceeds the encodable length {max}")]
	ArrayTooLong { len: usize, max: usize },
	#[error("field name {name:?} cannot be written in the text format")]
	InvalidFieldName { name: String },
	#[error("schema name {name:?} cannot be written in the text format")]
	InvalidSchemaName { name: String },
	#[error("field {field:?} holds a nested {kind}, which the text format cannot represent")]
	UnrepresentableText { field: String, kind: &'static str },
}
