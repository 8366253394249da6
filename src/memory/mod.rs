//! Canonical IR and the token memory
//!
//! The IR is the content-addressed anchor of the pipeline: the framed TENS
//! binary of a canonicalized record set, addressed by the SHA-256 of its
//! bytes. Semantically equal inputs always hash to the same address, so
//! the IR store deduplicates by construction.
//!
//! Around it, [`TokenMemory`] keeps per-model materializations: the token
//! ids a specific model's tokenizer produces for the IR. Each cached entry
//! is pinned to the tokenizer fingerprint that produced it; if the
//! tokenizer drifts, the entry stops being served and is rebuilt.
//!
//! Disk writes follow a write-to-tmp-then-rename discipline, so a
//! concurrent reader observes either the old file or the new file, never
//! torn bytes. A `TokenMemory` owns its root directory exclusively and is
//! not meant to be shared mutably across threads.

mod diagnostics;

pub use diagnostics::{
	set_diagnostics_sink, CacheEvent, DiagnosticsSink, MissReason,
};

use {
	crate::{
		canonical::{self, Value, CANONICALIZATION_VERSION},
		de::{self, DeError},
		framing,
		schema::Schema,
		ser::{self, SerError},
		tokenizer::{encoding_for_model, Encoding, TokenizerAdapter, TokenizerError, TOKENIZER_VERSION},
	},
	chrono::{DateTime, SecondsFormat, Utc},
	rand::Rng,
	sha2::{Digest, Sha256},
	std::{
		collections::HashMap,
		fs,
		io::Write,
		path::{Path, PathBuf},
		sync::Arc,
		time::Duration,
	},
	tracing::{debug, warn},
};

/// Default store root, relative to the caller's working directory
pub const DEFAULT_ROOT: &str = ".contex";

/// Bumped when the IR byte layout changes
pub const IR_VERSION: &str = "1";

/// A canonical intermediate representation
///
/// `data` retains the canonicalized records so that materializing for
/// another tokenizer does not require re-canonicalization.
#[derive(Clone, Debug)]
pub struct Ir {
	/// Framed TENS binary of the canonicalized records
	pub bytes: Vec<u8>,
	/// Lowercase hex SHA-256 of `bytes`
	pub hash: String,
	pub schemas: Vec<Schema>,
	pub data: Vec<Value>,
	pub ir_version: String,
	pub canonicalization_version: String,
}

/// Build the canonical IR for a record set
pub fn encode_ir(records: &[Value], adapter: &TokenizerAdapter) -> Result<Ir, SerError> {
	let data = canonical::canonicalize_records(records)?;
	let stream = ser::to_token_stream_canonical(&data, adapter)?;
	let bytes = framing::write_frame(adapter.encoding().as_str(), &stream.tokens);
	let hash = hex_sha256(&bytes);
	Ok(Ir {
		bytes,
		hash,
		schemas: stream.schemas,
		data,
		ir_version: IR_VERSION.to_owned(),
		canonicalization_version: CANONICALIZATION_VERSION.to_owned(),
	})
}

/// Stored metadata of one IR (`ir/<hash>.meta.json`)
#[derive(Clone, Debug, serde_derive::Serialize, serde_derive::Deserialize)]
pub struct IrMeta {
	pub canonicalization_version: String,
	pub hash: String,
	pub ir_version: String,
	pub row_count: usize,
	pub schemas: Vec<Schema>,
	pub stored_at: String,
}

/// Stored metadata of one materialization (`cache/.../meta.json`)
#[derive(Clone, Debug, serde_derive::Serialize, serde_derive::Deserialize)]
struct MaterializedMeta {
	encoding: String,
	fingerprint: String,
	max_tokens: Option<u32>,
	model_id: String,
	stored_at: String,
	token_count: usize,
	tokenizer_version: String,
}

/// Token ids rendered for one model, pinned to a tokenizer fingerprint
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MaterializedTokens {
	pub tokens: Vec<u32>,
	pub model_id: String,
	pub encoding: Encoding,
	pub token_count: usize,
	pub ir_hash: String,
	pub tokenizer_version: String,
	pub tokenizer_fingerprint: String,
}

/// Result of a cache lookup: tokens, or the reason there were none
#[derive(Clone, Debug)]
pub enum CacheLookup {
	Hit(MaterializedTokens),
	Miss(MissReason),
}

impl CacheLookup {
	pub fn hit(self) -> Option<MaterializedTokens> {
		match self {
			CacheLookup::Hit(tokens) => Some(tokens),
			CacheLookup::Miss(_) => None,
		}
	}

	pub fn miss_reason(&self) -> MissReason {
		match self {
			CacheLookup::Hit(_) => MissReason::Hit,
			CacheLookup::Miss(reason) => *reason,
		}
	}
}

/// Outcome of [`TokenMemory::store`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreOutcome {
	pub hash: String,
	pub is_new: bool,
	pub ir_byte_size: usize,
}

/// Knobs for [`TokenMemory::materialize_and_cache`]
#[derive(Clone, Copy, Debug, Default)]
pub struct MaterializeOptions {
	/// Truncate the materialized stream to at most this many tokens
	pub max_tokens: Option<u32>,
}

/// Any error that may happen inside the token memory
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
	#[error("IR {hash} is not stored")]
	IrNotStored { hash: String },
	#[error("stored IR {hash} failed content verification")]
	IrHashMismatch { hash: String },
	#[error("disk failure while {action}")]
	Io {
		action: &'static str,
		#[source]
		source: std::io::Error,
	},
	#[error(transparent)]
	Encode(#[from] SerError),
	#[error(transparent)]
	Decode(#[from] DeError),
	#[error(transparent)]
	Tokenizer(#[from] TokenizerError),
}

/// Content-addressed IR store plus per-model materialization cache
///
/// ```no_run
/// use contex::{TokenMemory, Value};
/// use std::collections::BTreeMap;
///
/// let mut record = BTreeMap::new();
/// record.insert("id".to_owned(), Value::Num(1.0));
///
/// let mut memory = TokenMemory::new(".contex");
/// let stored = memory.store(&[Value::Obj(record)])?;
/// let tokens = memory.materialize_and_cache(&stored.hash, "gpt-4o", Default::default())?;
/// assert_eq!(tokens.ir_hash, stored.hash);
/// # Ok::<(), contex::MemoryError>(())
/// ```
pub struct TokenMemory {
	root: PathBuf,
	ir_encoding: Encoding,
	adapters: HashMap<Encoding, TokenizerAdapter>,
	sink: Option<Arc<dyn DiagnosticsSink>>,
	ttl: Option<Duration>,
}

impl Default for TokenMemory {
	/// A memory rooted at [`DEFAULT_ROOT`]
	fn default() -> Self {
		Self::new(DEFAULT_ROOT)
	}
}

impl TokenMemory {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self {
			root: root.into(),
			ir_encoding: Encoding::O200kBase,
			adapters: HashMap::new(),
			sink: None,
			ttl: None,
		}
	}

	/// Use a different encoding for IR bytes (the default is the
	/// current-generation encoding)
	pub fn with_ir_encoding(mut self, encoding: Encoding) -> Self {
		self.ir_encoding = encoding;
		self
	}

	/// Route this instance's cache events to `sink` instead of the
	/// process-wide one
	pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
		self.sink = Some(sink);
		self
	}

	/// Treat materializations older than `ttl` as expired on lookup.
	/// Eviction itself is left to disk-quota tooling.
	pub fn with_ttl(mut self, ttl: Duration) -> Self {
		self.ttl = Some(ttl);
		self
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Canonicalize, encode and store `records`, returning the IR address
	///
	/// Storing the same semantic content twice is a no-op (`is_new` is
	/// false the second time).
	pub fn store(&mut self, records: &[Value]) -> Result<StoreOutcome, MemoryError> {
		let ir_encoding = self.ir_encoding;
		let adapter = self.adapter(ir_encoding)?;
		let ir = encode_ir(records, adapter)?;

		let bin_path = self.ir_bin_path(&ir.hash);
		if bin_path.exists() {
			debug!(hash = %ir.hash, "IR already stored");
			return Ok(StoreOutcome {
				ir_byte_size: ir.bytes.len(),
				hash: ir.hash,
				is_new: false,
			});
		}

		fs::create_dir_all(self.root.join("ir")).map_err(|source| MemoryError::Io {
			action: "creating the IR directory",
			source,
		})?;
		write_atomic(&bin_path, &ir.bytes).map_err(|source| MemoryError::Io {
			action: "writing IR bytes",
			source,
		})?;
		let meta = IrMeta {
			canonicalization_version: ir.canonicalization_version.clone(),
			hash: ir.hash.clone(),
			ir_version: ir.ir_version.clone(),
			row_count: ir.data.len(),
			schemas: ir.schemas.clone(),
			stored_at: now_rfc3339(),
		};
		let meta_bytes = serde_json::to_vec_pretty(&meta).unwrap_or_default();
		write_atomic(&self.ir_meta_path(&ir.hash), &meta_bytes).map_err(|source| {
			MemoryError::Io {
				action: "writing IR metadata",
				source,
			}
		})?;
		debug!(hash = %ir.hash, bytes = ir.bytes.len(), "stored new IR");
		Ok(StoreOutcome {
			ir_byte_size: ir.bytes.len(),
			hash: ir.hash,
			is_new: true,
		})
	}

	pub fn has(&self, hash: &str) -> bool {
		self.ir_bin_path(hash).exists()
	}

	pub fn get_meta(&self, hash: &str) -> Result<Option<IrMeta>, MemoryError> {
		match fs::read(self.ir_meta_path(hash)) {
			Ok(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(source) => Err(MemoryError::Io {
				action: "reading IR metadata",
				source,
			}),
		}
	}

	/// Metadata of every stored IR, ordered by hash
	pub fn list(&self) -> Result<Vec<IrMeta>, MemoryError> {
		let dir = self.root.join("ir");
		let entries = match fs::read_dir(&dir) {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(source) => {
				return Err(MemoryError::Io {
					action: "listing the IR directory",
					source,
				})
			}
		};
		let mut hashes: Vec<String> = entries
			.filter_map(|entry| entry.ok())
			.filter_map(|entry| {
				let name = entry.file_name().to_string_lossy().into_owned();
				name.strip_suffix(".meta.json").map(str::to_owned)
			})
			.collect();
		hashes.sort();
		let mut out = Vec::with_capacity(hashes.len());
		for hash in hashes {
			if let Some(meta) = self.get_meta(&hash)? {
				out.push(meta);
			}
		}
		Ok(out)
	}

	/// Model ids with at least one materialization of `hash`
	pub fn get_cached_models(&self, hash: &str) -> Result<Vec<String>, MemoryError> {
		let dir = self.root.join("cache").join(hash);
		let entries = match fs::read_dir(&dir) {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(source) => {
				return Err(MemoryError::Io {
					action: "listing the materialization cache",
					source,
				})
			}
		};
		let mut models: Vec<String> = entries
			.filter_map(|entry| entry.ok())
			.filter_map(|entry| {
				let name = entry.file_name().to_string_lossy().into_owned();
				// <model>.<encoding>.<tokenizer version>; model ids may
				// themselves contain dots, the two suffixes never do
				let mut parts = name.rsplitn(3, '.');
				let _version = parts.next()?;
				let _encoding = parts.next()?;
				parts.next().map(str::to_owned)
			})
			.collect();
		models.sort();
		models.dedup();
		Ok(models)
	}

	/// Render the IR for `model_id`'s tokenizer and cache the result
	///
	/// A valid cached entry is returned as-is. An entry pinned to a stale
	/// fingerprint, truncation limit or tokenizer version is rebuilt, and
	/// the reason is recorded through diagnostics.
	pub fn materialize_and_cache(
		&mut self,
		hash: &str,
		model_id: &str,
		options: MaterializeOptions,
	) -> Result<MaterializedTokens, MemoryError> {
		let bytes = match fs::read(self.ir_bin_path(hash)) {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				self.emit(hash, Some(model_id), MissReason::IrNotStored);
				return Err(MemoryError::IrNotStored {
					hash: hash.to_owned(),
				});
			}
			Err(source) => {
				self.emit(hash, Some(model_id), MissReason::DiskIoError);
				return Err(MemoryError::Io {
					action: "reading IR bytes",
					source,
				});
			}
		};
		if hex_sha256(&bytes) != hash {
			self.emit(hash, Some(model_id), MissReason::IrHashMismatch);
			return Err(MemoryError::IrHashMismatch {
				hash: hash.to_owned(),
			});
		}

		let encoding = encoding_for_model(model_id);
		let fingerprint = self.adapter(encoding)?.fingerprint().to_owned();
		let entry_dir = self.entry_dir(hash, model_id, encoding);

		// classify the access before rebuilding anything
		let mut corrupted = false;
		let reason = if !entry_dir.exists() {
			if self.has_other_version(hash, model_id, encoding) {
				MissReason::TokenizerVersionChange
			} else {
				MissReason::ModelNeverMaterialized
			}
		} else {
			match self.read_entry(hash, model_id, encoding, &fingerprint)? {
				CacheLookup::Hit(cached) => {
					// an entry rendered under a different truncation limit
					// is not reusable even if everything else matches
					if self.cached_max_tokens(&entry_dir) == Some(options.max_tokens) {
						self.emit(hash, Some(model_id), MissReason::Hit);
						return Ok(cached);
					}
					MissReason::MaxTokensChanged
				}
				CacheLookup::Miss(reason) => {
					corrupted = reason == MissReason::CorruptedCache;
					reason
				}
			}
		};
		self.emit(hash, Some(model_id), reason);
		if corrupted {
			// the offending entry is removed before the rewrite
			let _ = fs::remove_dir_all(&entry_dir);
		}

		// rebuild: decode the IR, re-render under the model's encoding
		let frame = framing::read_frame(&bytes).map_err(DeError::from)?;
		let ir_encoding: Encoding = frame
			.encoding
			.parse()
			.map_err(MemoryError::Tokenizer)?;
		let records = {
			let ir_adapter = self.adapter(ir_encoding)?;
			de::from_token_stream(&frame.tokens, ir_adapter)?
		};
		let mut tokens = if ir_encoding == encoding {
			frame.tokens
		} else {
			let target = self.adapter(encoding)?;
			ser::to_token_stream_canonical(&records, target)?.tokens
		};
		if let Some(max) = options.max_tokens {
			tokens.truncate(max as usize);
		}

		let materialized = MaterializedTokens {
			token_count: tokens.len(),
			tokens,
			model_id: model_id.to_owned(),
			encoding,
			ir_hash: hash.to_owned(),
			tokenizer_version: TOKENIZER_VERSION.to_owned(),
			tokenizer_fingerprint: fingerprint,
		};
		self.write_entry(&entry_dir, &materialized, options.max_tokens)?;
		Ok(materialized)
	}

	/// Return cached tokens for `(hash, model_id)` iff the entry exists
	/// and its tokenizer fingerprint matches the current adapter
	pub fn load_materialized(
		&mut self,
		hash: &str,
		model_id: &str,
	) -> Result<CacheLookup, MemoryError> {
		if !self.has(hash) {
			self.emit(hash, Some(model_id), MissReason::IrNotStored);
			return Ok(CacheLookup::Miss(MissReason::IrNotStored));
		}
		let encoding = encoding_for_model(model_id);
		let fingerprint = self.adapter(encoding)?.fingerprint().to_owned();
		let entry_dir = self.entry_dir(hash, model_id, encoding);
		if !entry_dir.exists() {
			let reason = if self.has_other_version(hash, model_id, encoding) {
				MissReason::TokenizerVersionChange
			} else {
				MissReason::ModelNeverMaterialized
			};
			self.emit(hash, Some(model_id), reason);
			return Ok(CacheLookup::Miss(reason));
		}
		let lookup = self.read_entry(hash, model_id, encoding, &fingerprint)?;
		self.emit(hash, Some(model_id), lookup.miss_reason());
		Ok(lookup)
	}

	fn read_entry(
		&self,
		hash: &str,
		model_id: &str,
		encoding: Encoding,
		current_fingerprint: &str,
	) -> Result<CacheLookup, MemoryError> {
		let entry_dir = self.entry_dir(hash, model_id, encoding);
		let meta: MaterializedMeta = match fs::read(entry_dir.join("meta.json")) {
			Ok(bytes) => match serde_json::from_slice(&bytes) {
				Ok(meta) => meta,
				Err(_) => {
					warn!(hash, model_id, "materialization metadata is corrupt");
					return Ok(CacheLookup::Miss(MissReason::CorruptedCache));
				}
			},
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Ok(CacheLookup::Miss(MissReason::CorruptedCache));
			}
			Err(source) => {
				self.emit(hash, Some(model_id), MissReason::DiskIoError);
				return Err(MemoryError::Io {
					action: "reading materialization metadata",
					source,
				});
			}
		};
		if meta.fingerprint != current_fingerprint {
			debug!(hash, model_id, "tokenizer fingerprint drifted");
			return Ok(CacheLookup::Miss(MissReason::EncodingDrift));
		}
		if let Some(ttl) = self.ttl {
			if is_expired(&meta.stored_at, ttl) {
				return Ok(CacheLookup::Miss(MissReason::TokenCacheExpired));
			}
		}
		let payload = match fs::read(entry_dir.join("tokens.bin")) {
			Ok(payload) => payload,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Ok(CacheLookup::Miss(MissReason::TokenCacheMissed));
			}
			Err(source) => {
				self.emit(hash, Some(model_id), MissReason::DiskIoError);
				return Err(MemoryError::Io {
					action: "reading materialized tokens",
					source,
				});
			}
		};
		if payload.len() % 4 != 0 || payload.len() / 4 != meta.token_count {
			warn!(hash, model_id, "materialized token payload is corrupt");
			return Ok(CacheLookup::Miss(MissReason::CorruptedCache));
		}
		let tokens = payload
			.chunks_exact(4)
			.map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
			.collect();
		Ok(CacheLookup::Hit(MaterializedTokens {
			tokens,
			model_id: meta.model_id,
			encoding,
			token_count: meta.token_count,
			ir_hash: hash.to_owned(),
			tokenizer_version: meta.tokenizer_version,
			tokenizer_fingerprint: meta.fingerprint,
		}))
	}

	fn write_entry(
		&self,
		entry_dir: &Path,
		materialized: &MaterializedTokens,
		max_tokens: Option<u32>,
	) -> Result<(), MemoryError> {
		fs::create_dir_all(entry_dir).map_err(|source| MemoryError::Io {
			action: "creating the materialization directory",
			source,
		})?;
		let mut payload = Vec::with_capacity(materialized.tokens.len() * 4);
		for &token in &materialized.tokens {
			payload.extend_from_slice(&token.to_le_bytes());
		}
		write_atomic(&entry_dir.join("tokens.bin"), &payload).map_err(|source| {
			MemoryError::Io {
				action: "writing materialized tokens",
				source,
			}
		})?;
		let meta = MaterializedMeta {
			encoding: materialized.encoding.as_str().to_owned(),
			fingerprint: materialized.tokenizer_fingerprint.clone(),
			max_tokens,
			model_id: materialized.model_id.clone(),
			stored_at: now_rfc3339(),
			token_count: materialized.token_count,
			tokenizer_version: materialized.tokenizer_version.clone(),
		};
		let meta_bytes = serde_json::to_vec_pretty(&meta).unwrap_or_default();
		write_atomic(&entry_dir.join("meta.json"), &meta_bytes).map_err(|source| {
			MemoryError::Io {
				action: "writing materialization metadata",
				source,
			}
		})?;
		debug!(
			hash = %materialized.ir_hash,
			model_id = %materialized.model_id,
			tokens = materialized.token_count,
			"materialized and cached"
		);
		Ok(())
	}

	fn cached_max_tokens(&self, entry_dir: &Path) -> Option<Option<u32>> {
		let bytes = fs::read(entry_dir.join("meta.json")).ok()?;
		let meta: MaterializedMeta = serde_json::from_slice(&bytes).ok()?;
		Some(meta.max_tokens)
	}

	fn has_other_version(&self, hash: &str, model_id: &str, encoding: Encoding) -> bool {
		let prefix = format!("{model_id}.{}.", encoding.as_str());
		fs::read_dir(self.root.join("cache").join(hash))
			.map(|entries| {
				entries
					.filter_map(|entry| entry.ok())
					.any(|entry| {
						entry
							.file_name()
							.to_string_lossy()
							.starts_with(prefix.as_str())
					})
			})
			.unwrap_or(false)
	}

	fn adapter(&mut self, encoding: Encoding) -> Result<&TokenizerAdapter, TokenizerError> {
		match self.adapters.entry(encoding) {
			std::collections::hash_map::Entry::Occupied(entry) => Ok(entry.into_mut()),
			std::collections::hash_map::Entry::Vacant(slot) => {
				Ok(slot.insert(TokenizerAdapter::new(encoding)?))
			}
		}
	}

	fn ir_bin_path(&self, hash: &str) -> PathBuf {
		self.root.join("ir").join(format!("{hash}.bin"))
	}

	fn ir_meta_path(&self, hash: &str) -> PathBuf {
		self.root.join("ir").join(format!("{hash}.meta.json"))
	}

	fn entry_dir(&self, hash: &str, model_id: &str, encoding: Encoding) -> PathBuf {
		self.root.join("cache").join(hash).join(format!(
			"{model_id}.{}.{TOKENIZER_VERSION}",
			encoding.as_str()
		))
	}

	fn emit(&self, hash: &str, model_id: Option<&str>, reason: MissReason) {
		debug!(hash, model_id, reason = reason.as_str(), "cache access");
		let event = CacheEvent {
			ir_hash: hash.to_owned(),
			model_id: model_id.map(str::to_owned),
			reason,
		};
		if let Some(sink) = &self.sink {
			sink.record(&event);
		} else if let Some(sink) = diagnostics::global_sink() {
			sink.record(&event);
		}
	}
}

fn hex_sha256(bytes: &[u8]) -> String {
	hex::encode(Sha256::digest(bytes))
}

fn now_rfc3339() -> String {
	Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn is_expired(stored_at: &str, ttl: Duration) -> bool {
	match DateTime::parse_from_rfc3339(stored_at) {
		Ok(stored) => {
			let age = Utc::now().signed_duration_since(stored.with_timezone(&Utc));
			age.num_milliseconds() > ttl.as_millis() as i64
		}
		// unparseable timestamps read as expired, forcing a rebuild
		Err(_) => true,
	}
}

/// Write `bytes` so that readers only ever observe a complete file:
/// open-exclusive tmp in the same directory, write, fsync, rename
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
	let file_name = path
		.file_name()
		.map(|name| name.to_string_lossy().into_owned())
		.unwrap_or_else(|| "payload".to_owned());
	let suffix: u32 = rand::thread_rng().gen();
	let tmp_path = path.with_file_name(format!(".{file_name}.tmp-{suffix:08x}"));
	let result = (|| {
		let mut file = fs::OpenOptions::new()
			.write(true)
			.create_new(true)
			.open(&tmp_path)?;
		file.write_all(bytes)?;
		file.sync_all()?;
		drop(file);
		fs::rename(&tmp_path, path)
	})();
	if result.is_err() {
		let _ = fs::remove_file(&tmp_path);
	}
	result
}
