//! Synthetic control-token namespace
//!
//! The binary stream is a sequence of u32 token ids. Everything below
//! [`CTRL_FLOOR`] is a real id from the active tokenizer vocabulary;
//! everything at or above it is synthetic and reserved. The floor sits an
//! order of magnitude above the largest known vocabulary (o200k is around
//! 200k entries), and [`TokenizerAdapter`](super::TokenizerAdapter)
//! construction re-checks the invariant for its encoding.

/// First synthetic id. No real token id may reach this value.
pub const CTRL_FLOOR: u32 = 1 << 21;

pub const NULL_VAL: u32 = CTRL_FLOOR;
pub const BOOL_TRUE: u32 = CTRL_FLOOR + 1;
pub const BOOL_FALSE: u32 = CTRL_FLOOR + 2;
pub const ARR_START: u32 = CTRL_FLOOR + 3;
pub const ARR_END: u32 = CTRL_FLOOR + 4;
pub const OBJ_START: u32 = CTRL_FLOOR + 5;
pub const OBJ_END: u32 = CTRL_FLOOR + 6;
pub const SCHEMA_DEF: u32 = CTRL_FLOOR + 7;
pub const SCHEMA_REF: u32 = CTRL_FLOOR + 8;
pub const SEPARATOR: u32 = CTRL_FLOOR + 9;
pub const DOC_START: u32 = CTRL_FLOOR + 10;
pub const DOC_END: u32 = CTRL_FLOOR + 11;
pub const ROW_BREAK: u32 = CTRL_FLOOR + 12;
pub const PRESENCE_MASK: u32 = CTRL_FLOOR + 13;
pub const FIXED_ARRAY: u32 = CTRL_FLOOR + 14;
pub const DICT_DEF: u32 = CTRL_FLOOR + 15;

/// Each of the three payload-carrying ranges spans this many ids.
pub const RANGE_WIDTH: u32 = 0x1_0000;

/// Presence-mask chunk: `MASK_CHUNK_BASE + payload`, 16 presence bits per
/// chunk.
pub const MASK_CHUNK_BASE: u32 = CTRL_FLOOR + RANGE_WIDTH;

/// Array length prefix: `ARRAY_LEN_BASE + n`.
pub const ARRAY_LEN_BASE: u32 = CTRL_FLOOR + 3 * RANGE_WIDTH;

/// Dictionary reference: `DICT_REF_BASE + id`.
pub const DICT_REF_BASE: u32 = CTRL_FLOOR + 4 * RANGE_WIDTH;

/// Bits carried by one presence-mask chunk token
pub const MASK_CHUNK_BITS: usize = 16;

/// Whether a token id is synthetic
pub fn is_control(token: u32) -> bool {
	token >= CTRL_FLOOR
}

/// Decoded meaning of a synthetic token
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ControlToken {
	NullVal,
	BoolTrue,
	BoolFalse,
	ArrStart,
	ArrEnd,
	ObjStart,
	ObjEnd,
	SchemaDef,
	SchemaRef,
	Separator,
	DocStart,
	DocEnd,
	RowBreak,
	PresenceMask,
	FixedArray,
	DictDef,
	MaskChunk(u16),
	ArrayLen(u32),
	DictRef(u32),
	/// Reserved id with no assigned meaning; decoders skip these
	Unknown(u32),
}

/// Classify a token; `None` means it is a real vocabulary id
pub(crate) fn classify(token: u32) -> Option<ControlToken> {
	if !is_control(token) {
		return None;
	}
	Some(match token {
		NULL_VAL => ControlToken::NullVal,
		BOOL_TRUE => ControlToken::BoolTrue,
		BOOL_FALSE => ControlToken::BoolFalse,
		ARR_START => ControlToken::ArrStart,
		ARR_END => ControlToken::ArrEnd,
		OBJ_START => ControlToken::ObjStart,
		OBJ_END => ControlToken::ObjEnd,
		SCHEMA_DEF => ControlToken::SchemaDef,
		SCHEMA_REF => ControlToken::SchemaRef,
		SEPARATOR => ControlToken::Separator,
		DOC_START => ControlToken::DocStart,
		DOC_END => ControlToken::DocEnd,
		ROW_BREAK => ControlToken::RowBreak,
		PRESENCE_MASK => ControlToken::PresenceMask,
		FIXED_ARRAY => ControlToken::FixedArray,
		DICT_DEF => ControlToken::DictDef,
		t if (MASK_CHUNK_BASE..MASK_CHUNK_BASE + RANGE_WIDTH).contains(&t) => {
			ControlToken::MaskChunk((t - MASK_CHUNK_BASE) as u16)
		}
		t if (ARRAY_LEN_BASE..ARRAY_LEN_BASE + RANGE_WIDTH).contains(&t) => {
			ControlToken::ArrayLen(t - ARRAY_LEN_BASE)
		}
		t if (DICT_REF_BASE..DICT_REF_BASE + RANGE_WIDTH).contains(&t) => {
			ControlToken::DictRef(t - DICT_REF_BASE)
		}
		t => ControlToken::Unknown(t),
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn real_ids_are_not_control() {
		assert_eq!(classify(0), None);
		assert_eq!(classify(CTRL_FLOOR - 1), None);
		assert!(!is_control(200_018));
	}

	#[test]
	fn markers_round_trip_through_classify() {
		assert_eq!(classify(SEPARATOR), Some(ControlToken::Separator));
		assert_eq!(classify(DICT_DEF), Some(ControlToken::DictDef));
		assert_eq!(
			classify(MASK_CHUNK_BASE + 0b101),
			Some(ControlToken::MaskChunk(0b101))
		);
		assert_eq!(
			classify(ARRAY_LEN_BASE + 3),
			Some(ControlToken::ArrayLen(3))
		);
		assert_eq!(classify(DICT_REF_BASE), Some(ControlToken::DictRef(0)));
	}

	#[test]
	fn unassigned_control_ids_classify_as_unknown() {
		assert_eq!(
			classify(DICT_DEF + 1),
			Some(ControlToken::Unknown(DICT_DEF + 1))
		);
	}
}
