//! Cache access telemetry
//!
//! Cache misses are never errors; every access to the token memory
//! records exactly one reason through a diagnostics sink. Tests and
//! operators inject their own sink; by default events go to a process-wide
//! one (if installed) and to `tracing` at debug level.

use std::sync::{Arc, OnceLock, RwLock};

/// Why a cache access did (or did not) produce tokens
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MissReason {
	IrNotStored,
	IrHashMismatch,
	ModelNeverMaterialized,
	EncodingDrift,
	TokenizerVersionChange,
	MaxTokensChanged,
	TokenCacheExpired,
	TokenCacheMissed,
	TextCacheMissed,
	DiskIoError,
	CorruptedCache,
	Hit,
}

impl MissReason {
	pub fn as_str(self) -> &'static str {
		match self {
			MissReason::IrNotStored => "IR_NOT_STORED",
			MissReason::IrHashMismatch => "IR_HASH_MISMATCH",
			MissReason::ModelNeverMaterialized => "MODEL_NEVER_MATERIALIZED",
			MissReason::EncodingDrift => "ENCODING_DRIFT",
			MissReason::TokenizerVersionChange => "TOKENIZER_VERSION_CHANGE",
			MissReason::MaxTokensChanged => "MAX_TOKENS_CHANGED",
			MissReason::TokenCacheExpired => "TOKEN_CACHE_EXPIRED",
			MissReason::TokenCacheMissed => "TOKEN_CACHE_MISSED",
			MissReason::TextCacheMissed => "TEXT_CACHE_MISSED",
			MissReason::DiskIoError => "DISK_IO_ERROR",
			MissReason::CorruptedCache => "CORRUPTED_CACHE",
			MissReason::Hit => "HIT",
		}
	}

	pub fn is_hit(self) -> bool {
		matches!(self, MissReason::Hit)
	}
}

impl std::fmt::Display for MissReason {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// One recorded cache access
#[derive(Clone, Debug)]
pub struct CacheEvent {
	pub ir_hash: String,
	pub model_id: Option<String>,
	pub reason: MissReason,
}

/// Receives every cache access of a [`TokenMemory`](super::TokenMemory)
pub trait DiagnosticsSink: Send + Sync {
	fn record(&self, event: &CacheEvent);
}

/// Install or clear the process-wide diagnostics sink
pub fn set_diagnostics_sink(sink: Option<Arc<dyn DiagnosticsSink>>) {
	let lock = sink_lock();
	let mut guard = lock.write().unwrap_or_else(|poisoned| poisoned.into_inner());
	*guard = sink;
}

pub(crate) fn global_sink() -> Option<Arc<dyn DiagnosticsSink>> {
	let guard = sink_lock()
		.read()
		.unwrap_or_else(|poisoned| poisoned.into_inner());
	guard.clone()
}

fn sink_lock() -> &'static RwLock<Option<Arc<dyn DiagnosticsSink>>> {
	static SINK: OnceLock<RwLock<Option<Arc<dyn DiagnosticsSink>>>> = OnceLock::new();
	SINK.get_or_init(|| RwLock::new(None))
}
