//! TENS byte framing
//!
//! Layout: 4-byte magic `TENS`, 1-byte format version, 1-byte encoding
//! name length, the encoding name in UTF-8, a 4-byte little-endian token
//! count, then that many 4-byte little-endian token ids. The stream is
//! self-terminating through the token count; trailing bytes are ignored.

pub const MAGIC: [u8; 4] = *b"TENS";
pub const FORMAT_VERSION: u8 = 1;

/// Any error that may happen while reading a frame header or payload
///
/// Each variant names the check that failed, with the byte offset where
/// reading stopped.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
	#[error("input is not a TENS frame: magic mismatch at byte 0")]
	BadMagic,
	#[error("unsupported TENS frame version {found} (this reader supports {FORMAT_VERSION})")]
	UnsupportedVersion { found: u8 },
	#[error("frame truncated at byte {at} while reading the {reading}")]
	Truncated { at: usize, reading: &'static str },
	#[error("frame encoding name is not valid UTF-8")]
	BadEncodingName,
}

/// A decoded frame: the encoding the ids belong to, plus the ids
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
	pub encoding: String,
	pub tokens: Vec<u32>,
}

/// Serialize a token stream into framed bytes
pub fn write_frame(encoding: &str, tokens: &[u32]) -> Vec<u8> {
	// encoding names come from the fixed set and always fit one byte
	debug_assert!(encoding.len() <= u8::MAX as usize);
	let mut out = Vec::with_capacity(4 + 1 + 1 + encoding.len() + 4 + tokens.len() * 4);
	out.extend_from_slice(&MAGIC);
	out.push(FORMAT_VERSION);
	out.push(encoding.len() as u8);
	out.extend_from_slice(encoding.as_bytes());
	out.extend_from_slice(&(tokens.len() as u32).to_le_bytes());
	for &token in tokens {
		out.extend_from_slice(&token.to_le_bytes());
	}
	out
}

/// Parse framed bytes back into a token stream
pub fn read_frame(bytes: &[u8]) -> Result<Frame, FrameError> {
	let mut at = 0usize;
	let magic = take(bytes, &mut at, 4, "magic")?;
	if magic != MAGIC {
		return Err(FrameError::BadMagic);
	}
	let version = take(bytes, &mut at, 1, "version")?[0];
	if version != FORMAT_VERSION {
		return Err(FrameError::UnsupportedVersion { found: version });
	}
	let name_len = take(bytes, &mut at, 1, "encoding name length")?[0] as usize;
	let name = take(bytes, &mut at, name_len, "encoding name")?;
	let encoding = std::str::from_utf8(name)
		.map_err(|_| FrameError::BadEncodingName)?
		.to_owned();
	let count_bytes = take(bytes, &mut at, 4, "token count")?;
	let count = u32::from_le_bytes([
		count_bytes[0],
		count_bytes[1],
		count_bytes[2],
		count_bytes[3],
	]) as usize;
	let payload_len = count.checked_mul(4).ok_or(FrameError::Truncated {
		at,
		reading: "token payload",
	})?;
	let payload = take(bytes, &mut at, payload_len, "token payload")?;
	let tokens = payload
		.chunks_exact(4)
		.map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
		.collect();
	Ok(Frame { encoding, tokens })
}

fn take<'b>(
	bytes: &'b [u8],
	at: &mut usize,
	len: usize,
	reading: &'static str,
) -> Result<&'b [u8], FrameError> {
	let end = at
		.checked_add(len)
		.filter(|&end| end <= bytes.len())
		.ok_or(FrameError::Truncated { at: *at, reading })?;
	let slice = &bytes[*at..end];
	*at = end;
	Ok(slice)
}

#[cfg(test)]
mod tests {
	use {super::*, pretty_assertions::assert_eq};

	#[test]
	fn frame_round_trip() {
		let tokens = vec![1, 2, 0xDEAD_BEEF, u32::MAX];
		let bytes = write_frame("o200k_base", &tokens);
		let frame = read_frame(&bytes).unwrap();
		assert_eq!(frame.encoding, "o200k_base");
		assert_eq!(frame.tokens, tokens);
	}

	#[test]
	fn trailing_bytes_are_ignored() {
		let mut bytes = write_frame("cl100k_base", &[7]);
		bytes.extend_from_slice(b"junk");
		assert_eq!(read_frame(&bytes).unwrap().tokens, vec![7]);
	}

	#[test]
	fn bad_magic_is_rejected() {
		let mut bytes = write_frame("cl100k_base", &[7]);
		bytes[0] = b'X';
		assert!(matches!(read_frame(&bytes), Err(FrameError::BadMagic)));
	}

	#[test]
	fn unsupported_version_is_rejected() {
		let mut bytes = write_frame("cl100k_base", &[7]);
		bytes[4] = 99;
		assert!(matches!(
			read_frame(&bytes),
			Err(FrameError::UnsupportedVersion { found: 99 })
		));
	}

	#[test]
	fn truncation_names_the_failed_read() {
		let bytes = write_frame("cl100k_base", &[7, 8, 9]);
		let err = read_frame(&bytes[..bytes.len() - 2]).unwrap_err();
		match err {
			FrameError::Truncated { reading, .. } => assert_eq!(reading, "token payload"),
			other => panic!("expected truncation, got {other}"),
		}
	}

	#[test]
	fn empty_input_is_a_magic_truncation() {
		assert!(matches!(
			read_frame(&[]),
			Err(FrameError::Truncated {
				at: 0,
				reading: "magic"
			})
		));
	}
}
