//! Tokenizer adapters over the supported BPE encodings
//!
//! An adapter owns one loaded tokenizer plus an LRU cache of tokenized
//! strings. It is deliberately not `Sync`: one instance belongs to one
//! thread of control, exactly like the serializer state it feeds. Open an
//! adapter, use it across operations, and drop (or [`dispose`]) it.
//!
//! [`dispose`]: TokenizerAdapter::dispose

pub mod control;

use {
	lru::LruCache,
	sha2::{Digest, Sha256},
	std::{
		cell::{Cell, RefCell},
		num::NonZeroUsize,
		rc::Rc,
	},
	tiktoken_rs::CoreBPE,
};

/// Default bound for the per-adapter tokenization cache
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Identifies the adapter implementation + embedded vocabulary revision.
/// Part of every materialization cache path, so an adapter upgrade can
/// never serve token ids produced by an older one.
pub const TOKENIZER_VERSION: &str = "tiktoken-1";

/// Fixed input for [`TokenizerAdapter::fingerprint`]. Mixes ASCII, digits,
/// punctuation and multi-byte codepoints so that vocabulary or merge-rule
/// changes are overwhelmingly likely to perturb the id sequence.
const FINGERPRINT_PROBE: &str =
	"The quick brown fox jumps over the lazy dog. 0123456789 \u{00e9}\u{4e16}\u{754c} <|end|>";

/// The supported encodings
///
/// Two families cover current and previous-generation chat models, two
/// cover legacy completion models.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Encoding {
	O200kBase,
	Cl100kBase,
	P50kBase,
	R50kBase,
}

impl Encoding {
	pub const ALL: [Encoding; 4] = [
		Encoding::O200kBase,
		Encoding::Cl100kBase,
		Encoding::P50kBase,
		Encoding::R50kBase,
	];

	pub fn as_str(self) -> &'static str {
		match self {
			Encoding::O200kBase => "o200k_base",
			Encoding::Cl100kBase => "cl100k_base",
			Encoding::P50kBase => "p50k_base",
			Encoding::R50kBase => "r50k_base",
		}
	}

	/// Upper bound (exclusive) on ids this encoding can ever emit,
	/// including its special tokens. Checked against
	/// [`control::CTRL_FLOOR`] when an adapter is constructed.
	fn vocab_ceiling(self) -> u32 {
		match self {
			Encoding::O200kBase => 201_000,
			Encoding::Cl100kBase => 101_000,
			Encoding::P50kBase => 51_000,
			Encoding::R50kBase => 51_000,
		}
	}
}

impl std::fmt::Display for Encoding {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for Encoding {
	type Err = TokenizerError;
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"o200k_base" => Ok(Encoding::O200kBase),
			"cl100k_base" => Ok(Encoding::Cl100kBase),
			"p50k_base" => Ok(Encoding::P50kBase),
			"r50k_base" => Ok(Encoding::R50kBase),
			other => Err(TokenizerError::UnknownEncoding {
				name: other.to_owned(),
			}),
		}
	}
}

/// Map a model id onto the encoding it tokenizes with
///
/// Unrecognized models fall back to the current-generation encoding; the
/// adapter interface makes no promise beyond the four families above.
pub fn encoding_for_model(model_id: &str) -> Encoding {
	const O200K_PREFIXES: &[&str] = &["gpt-4o", "gpt-4.1", "gpt-5", "chatgpt-4o", "o1", "o3", "o4"];
	const CL100K_PREFIXES: &[&str] = &["gpt-4", "gpt-3.5", "text-embedding-"];
	const P50K_PREFIXES: &[&str] = &["text-davinci-002", "text-davinci-003", "code-"];
	const R50K_PREFIXES: &[&str] = &["davinci", "curie", "babbage", "ada", "text-davinci-001"];

	let matches_any = |prefixes: &[&str]| prefixes.iter().any(|p| model_id.starts_with(p));
	if matches_any(O200K_PREFIXES) {
		Encoding::O200kBase
	} else if matches_any(CL100K_PREFIXES) {
		Encoding::Cl100kBase
	} else if matches_any(P50K_PREFIXES) {
		Encoding::P50kBase
	} else if matches_any(R50K_PREFIXES) {
		Encoding::R50kBase
	} else {
		Encoding::O200kBase
	}
}

/// Any error that may happen inside a tokenizer adapter
#[derive(Debug, thiserror::Error)]
pub enum TokenizerError {
	#[error("unknown encoding {name:?}")]
	UnknownEncoding { name: String },
	#[error("failed to load tokenizer for {encoding}: {message}")]
	Init { encoding: Encoding, message: String },
	#[error("failed to decode token ids under {encoding}: {message}")]
	Decode { encoding: Encoding, message: String },
	#[error(
		"encoding {encoding} vocabulary ceiling {ceiling} reaches the control-token floor {floor}"
	)]
	ControlRangeCollision {
		encoding: Encoding,
		ceiling: u32,
		floor: u32,
	},
}

/// Observable statistics of the tokenization cache
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
	pub hits: u64,
	pub misses: u64,
	pub len: usize,
	pub capacity: usize,
}

/// An owned tokenizer handle with an LRU text cache
///
/// ```
/// use contex::{Encoding, TokenizerAdapter};
///
/// let adapter = TokenizerAdapter::new(Encoding::Cl100kBase)?;
/// let ids = adapter.encode("hello world");
/// assert_eq!(adapter.decode(&ids)?, "hello world");
/// assert_eq!(adapter.count_tokens("hello world"), ids.len());
/// # Ok::<(), contex::TokenizerError>(())
/// ```
pub struct TokenizerAdapter {
	encoding: Encoding,
	bpe: CoreBPE,
	fingerprint: String,
	cache: RefCell<LruCache<String, Rc<Vec<u32>>>>,
	hits: Cell<u64>,
	misses: Cell<u64>,
}

impl TokenizerAdapter {
	pub fn new(encoding: Encoding) -> Result<Self, TokenizerError> {
		Self::with_cache_capacity(encoding, DEFAULT_CACHE_CAPACITY)
	}

	pub fn with_cache_capacity(
		encoding: Encoding,
		capacity: usize,
	) -> Result<Self, TokenizerError> {
		if encoding.vocab_ceiling() >= control::CTRL_FLOOR {
			return Err(TokenizerError::ControlRangeCollision {
				encoding,
				ceiling: encoding.vocab_ceiling(),
				floor: control::CTRL_FLOOR,
			});
		}
		let bpe = match encoding {
			Encoding::O200kBase => tiktoken_rs::o200k_base(),
			Encoding::Cl100kBase => tiktoken_rs::cl100k_base(),
			Encoding::P50kBase => tiktoken_rs::p50k_base(),
			Encoding::R50kBase => tiktoken_rs::r50k_base(),
		}
		.map_err(|e| TokenizerError::Init {
			encoding,
			message: e.to_string(),
		})?;
		let fingerprint = compute_fingerprint(&bpe);
		let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
		Ok(Self {
			encoding,
			bpe,
			fingerprint,
			cache: RefCell::new(LruCache::new(capacity)),
			hits: Cell::new(0),
			misses: Cell::new(0),
		})
	}

	pub fn encoding(&self) -> Encoding {
		self.encoding
	}

	/// Tokenize `text` into real vocabulary ids
	///
	/// The result is shared out of the cache; it is cheap to clone.
	pub fn encode(&self, text: &str) -> Rc<Vec<u32>> {
		if let Some(ids) = self.cache.borrow_mut().get(text) {
			self.hits.set(self.hits.get() + 1);
			return Rc::clone(ids);
		}
		self.misses.set(self.misses.get() + 1);
		let ids: Vec<u32> = self
			.bpe
			.encode_ordinary(text)
			.into_iter()
			.map(|id| id as u32)
			.collect();
		let ids = Rc::new(ids);
		self.cache
			.borrow_mut()
			.put(text.to_owned(), Rc::clone(&ids));
		ids
	}

	pub fn count_tokens(&self, text: &str) -> usize {
		self.encode(text).len()
	}

	/// Detokenize real vocabulary ids back into text
	pub fn decode(&self, ids: &[u32]) -> Result<String, TokenizerError> {
		let ids: Vec<_> = ids.iter().map(|&id| id as _).collect();
		self.bpe.decode(ids).map_err(|e| TokenizerError::Decode {
			encoding: self.encoding,
			message: e.to_string(),
		})
	}

	/// Hash of this tokenizer's output on a fixed probe string
	///
	/// Changes whenever the vocabulary or merge rules change, which is how
	/// the materialization cache detects silent tokenizer drift.
	pub fn fingerprint(&self) -> &str {
		&self.fingerprint
	}

	pub fn cache_stats(&self) -> CacheStats {
		let cache = self.cache.borrow();
		CacheStats {
			hits: self.hits.get(),
			misses: self.misses.get(),
			len: cache.len(),
			capacity: cache.cap().get(),
		}
	}

	/// Release the tokenizer handle and its cache
	///
	/// Dropping the adapter is equivalent; this exists so callers can make
	/// the end of the adapter's life explicit.
	pub fn dispose(self) {}
}

fn compute_fingerprint(bpe: &CoreBPE) -> String {
	let mut hasher = Sha256::new();
	for id in bpe.encode_ordinary(FINGERPRINT_PROBE) {
		hasher.update((id as u32).to_le_bytes());
	}
	hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
	use {super::*, pretty_assertions::assert_eq};

	#[test]
	fn encode_decode_round_trip() {
		let adapter = TokenizerAdapter::new(Encoding::Cl100kBase).unwrap();
		let text = "schema registries deduplicate record shapes";
		let ids = adapter.encode(text);
		assert!(!ids.is_empty());
		assert!(ids.iter().all(|&id| !control::is_control(id)));
		assert_eq!(adapter.decode(&ids).unwrap(), text);
	}

	#[test]
	fn cache_hits_are_observable() {
		let adapter = TokenizerAdapter::new(Encoding::Cl100kBase).unwrap();
		adapter.encode("repeated");
		adapter.encode("repeated");
		adapter.encode("repeated");
		let stats = adapter.cache_stats();
		// one miss for the probe-free first call, two hits after
		assert_eq!(stats.misses, 1);
		assert_eq!(stats.hits, 2);
		assert_eq!(stats.len, 1);
	}

	#[test]
	fn cache_capacity_is_bounded() {
		let adapter = TokenizerAdapter::with_cache_capacity(Encoding::Cl100kBase, 2).unwrap();
		adapter.encode("a");
		adapter.encode("b");
		adapter.encode("c");
		assert_eq!(adapter.cache_stats().len, 2);
	}

	#[test]
	fn fingerprint_is_stable_per_encoding() {
		let a = TokenizerAdapter::new(Encoding::Cl100kBase).unwrap();
		let b = TokenizerAdapter::new(Encoding::Cl100kBase).unwrap();
		assert_eq!(a.fingerprint(), b.fingerprint());
	}

	#[test]
	fn fingerprints_differ_across_encodings() {
		let a = TokenizerAdapter::new(Encoding::Cl100kBase).unwrap();
		let b = TokenizerAdapter::new(Encoding::P50kBase).unwrap();
		assert_ne!(a.fingerprint(), b.fingerprint());
	}

	#[test]
	fn model_ids_map_onto_encodings() {
		assert_eq!(encoding_for_model("gpt-4o-mini"), Encoding::O200kBase);
		assert_eq!(encoding_for_model("gpt-4-turbo"), Encoding::Cl100kBase);
		assert_eq!(encoding_for_model("gpt-3.5-turbo"), Encoding::Cl100kBase);
		assert_eq!(encoding_for_model("text-davinci-003"), Encoding::P50kBase);
		assert_eq!(encoding_for_model("davinci"), Encoding::R50kBase);
		assert_eq!(encoding_for_model("something-new"), Encoding::O200kBase);
	}

	#[test]
	fn encoding_names_round_trip() {
		for encoding in Encoding::ALL {
			assert_eq!(encoding.as_str().parse::<Encoding>().unwrap(), encoding);
		}
	}
}
