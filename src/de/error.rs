use crate::{framing::FrameError, tokenizer::TokenizerError};

/// Any error that may happen during decoding
///
/// Offsets are token positions within the stream (not byte positions);
/// frame-level failures carry their own byte offsets.
#[derive(Debug, thiserror::Error)]
pub enum DeError {
	#[error(transparent)]
	Frame(#[from] FrameError),
	#[error(transparent)]
	Tokenizer(#[from] TokenizerError),
	#[error("frame was produced under encoding {frame:?} but the adapter is {adapter}")]
	EncodingMismatch { frame: String, adapter: String },
	#[error("unexpected end of token stream at position {at} while reading the {reading}")]
	UnexpectedEnd { at: usize, reading: &'static str },
	#[error("unexpected token at position {at} while reading the {reading}")]
	UnexpectedToken { at: usize, reading: &'static str },
	#[error("row body at position {at} references no defined schema")]
	MissingSchema { at: usize },
	#[error("schema reference {reference:?} at position {at} is not a known schema id")]
	BadSchemaRef { at: usize, reference: String },
}
