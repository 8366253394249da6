//! The TENS-Text surface: a human-readable format with the same
//! semantics as the binary codec
//!
//! ```text
//! @version 1
//! @encoding o200k_base
//! @schema rec id:num name:str tag:str[]
//! rec
//!   id 1
//!   name Alice
//!   tag security
//!   tag backend
//! ```

mod de;
pub(crate) mod scalar;
mod ser;

pub use {
	de::{
		from_text, FieldKind, TextDocument, TextError, TextFieldDef, TextMeta, TextSchema,
		DEFAULT_ENCODING,
	},
	ser::{to_text, DEFAULT_SCHEMA_NAME},
};
