//! Token memory: content addressing, materialization caching, drift
//! detection and the miss-reason taxonomy

use {
	contex::{
		CacheEvent, CacheLookup, DiagnosticsSink, Encoding, MaterializeOptions, MemoryError,
		MissReason, TokenMemory, Value,
	},
	pretty_assertions::assert_eq,
	std::sync::{Arc, Mutex},
};

/// Collects every cache event for inspection
#[derive(Default)]
struct RecordingSink {
	events: Mutex<Vec<CacheEvent>>,
}

impl RecordingSink {
	fn reasons(&self) -> Vec<MissReason> {
		self.events
			.lock()
			.unwrap()
			.iter()
			.map(|event| event.reason)
			.collect()
	}
}

impl DiagnosticsSink for RecordingSink {
	fn record(&self, event: &CacheEvent) {
		self.events.lock().unwrap().push(event.clone());
	}
}

fn sample_records() -> Vec<Value> {
	(0..8)
		.map(|i| {
			Value::from(serde_json::json!({
				"id": i,
				"name": format!("user-{i}"),
				"labels": ["alpha", "beta"],
				"score": (i as f64) / 2.0,
			}))
		})
		.collect()
}

/// A memory rooted in a fresh temp dir, IR pinned to cl100k so the tests
/// exercise one embedded tokenizer
fn memory_at(root: &std::path::Path) -> TokenMemory {
	TokenMemory::new(root).with_ir_encoding(Encoding::Cl100kBase)
}

const MODEL: &str = "gpt-4";

#[test]
fn store_is_content_addressed_and_idempotent() {
	let dir = tempfile::tempdir().unwrap();
	let mut memory = memory_at(dir.path());

	let first = memory.store(&sample_records()).unwrap();
	assert!(first.is_new);
	assert!(first.ir_byte_size > 0);
	assert!(memory.has(&first.hash));

	let second = memory.store(&sample_records()).unwrap();
	assert!(!second.is_new);
	assert_eq!(second.hash, first.hash);

	let meta = memory.get_meta(&first.hash).unwrap().expect("meta");
	assert_eq!(meta.hash, first.hash);
	assert_eq!(meta.row_count, 8);
	assert_eq!(meta.ir_version, "1");
	assert_eq!(meta.canonicalization_version, "1");
	assert_eq!(meta.schemas.len(), 1);

	let listed = memory.list().unwrap();
	assert_eq!(listed.len(), 1);
	assert_eq!(listed[0].hash, first.hash);
}

#[test]
fn materialize_then_load_hits() {
	let dir = tempfile::tempdir().unwrap();
	let mut memory = memory_at(dir.path());
	let stored = memory.store(&sample_records()).unwrap();

	let materialized = memory
		.materialize_and_cache(&stored.hash, MODEL, MaterializeOptions::default())
		.unwrap();
	assert_eq!(materialized.ir_hash, stored.hash);
	assert_eq!(materialized.encoding, Encoding::Cl100kBase);
	assert_eq!(materialized.token_count, materialized.tokens.len());
	assert!(!materialized.tokenizer_fingerprint.is_empty());

	let loaded = memory.load_materialized(&stored.hash, MODEL).unwrap();
	match loaded {
		CacheLookup::Hit(cached) => assert_eq!(cached, materialized),
		CacheLookup::Miss(reason) => panic!("expected a hit, got {reason}"),
	}

	assert_eq!(
		memory.get_cached_models(&stored.hash).unwrap(),
		vec![MODEL.to_owned()]
	);
}

#[test]
fn load_before_materialization_reports_the_reason() {
	let dir = tempfile::tempdir().unwrap();
	let sink = Arc::new(RecordingSink::default());
	let mut memory = memory_at(dir.path()).with_diagnostics(sink.clone());

	let missing = memory.load_materialized("0000", MODEL).unwrap();
	assert_eq!(missing.miss_reason(), MissReason::IrNotStored);

	let stored = memory.store(&sample_records()).unwrap();
	let not_yet = memory.load_materialized(&stored.hash, MODEL).unwrap();
	assert_eq!(not_yet.miss_reason(), MissReason::ModelNeverMaterialized);

	assert_eq!(
		sink.reasons(),
		vec![MissReason::IrNotStored, MissReason::ModelNeverMaterialized]
	);
}

#[test]
fn scenario_e_fingerprint_drift_is_detected_and_healed() {
	let dir = tempfile::tempdir().unwrap();
	let sink = Arc::new(RecordingSink::default());
	let mut memory = memory_at(dir.path()).with_diagnostics(sink.clone());

	let stored = memory.store(&sample_records()).unwrap();
	let materialized = memory
		.materialize_and_cache(&stored.hash, MODEL, MaterializeOptions::default())
		.unwrap();

	// simulate a tokenizer swap: the cached entry claims a fingerprint the
	// current adapter no longer produces
	let entry_dir = dir
		.path()
		.join("cache")
		.join(&stored.hash)
		.join(format!("{MODEL}.cl100k_base.tiktoken-1"));
	let meta_path = entry_dir.join("meta.json");
	let tampered = std::fs::read_to_string(&meta_path)
		.unwrap()
		.replace(&materialized.tokenizer_fingerprint, "f2f2f2f2");
	std::fs::write(&meta_path, tampered).unwrap();

	let drifted = memory.load_materialized(&stored.hash, MODEL).unwrap();
	assert_eq!(drifted.miss_reason(), MissReason::EncodingDrift);
	assert!(drifted.hit().is_none(), "stale tokens must not be served");

	// re-materializing overwrites the entry under the new fingerprint
	let healed = memory
		.materialize_and_cache(&stored.hash, MODEL, MaterializeOptions::default())
		.unwrap();
	assert_eq!(healed.tokens, materialized.tokens);
	let reloaded = memory.load_materialized(&stored.hash, MODEL).unwrap();
	assert_eq!(reloaded.miss_reason(), MissReason::Hit);

	assert!(sink.reasons().contains(&MissReason::EncodingDrift));
}

#[test]
fn changed_max_tokens_rebuilds_the_entry() {
	let dir = tempfile::tempdir().unwrap();
	let sink = Arc::new(RecordingSink::default());
	let mut memory = memory_at(dir.path()).with_diagnostics(sink.clone());
	let stored = memory.store(&sample_records()).unwrap();

	let full = memory
		.materialize_and_cache(&stored.hash, MODEL, MaterializeOptions::default())
		.unwrap();
	let truncated = memory
		.materialize_and_cache(
			&stored.hash,
			MODEL,
			MaterializeOptions {
				max_tokens: Some(16),
			},
		)
		.unwrap();
	assert_eq!(truncated.token_count, 16);
	assert_eq!(&truncated.tokens[..], &full.tokens[..16]);
	assert!(sink.reasons().contains(&MissReason::MaxTokensChanged));
}

#[test]
fn corrupted_payloads_surface_and_are_replaced() {
	let dir = tempfile::tempdir().unwrap();
	let sink = Arc::new(RecordingSink::default());
	let mut memory = memory_at(dir.path()).with_diagnostics(sink.clone());
	let stored = memory.store(&sample_records()).unwrap();
	memory
		.materialize_and_cache(&stored.hash, MODEL, MaterializeOptions::default())
		.unwrap();

	let tokens_path = dir
		.path()
		.join("cache")
		.join(&stored.hash)
		.join(format!("{MODEL}.cl100k_base.tiktoken-1"))
		.join("tokens.bin");
	let mut payload = std::fs::read(&tokens_path).unwrap();
	payload.truncate(payload.len() - 3);
	std::fs::write(&tokens_path, payload).unwrap();

	let corrupted = memory.load_materialized(&stored.hash, MODEL).unwrap();
	assert_eq!(corrupted.miss_reason(), MissReason::CorruptedCache);

	// the next materialization deletes and rewrites the entry
	memory
		.materialize_and_cache(&stored.hash, MODEL, MaterializeOptions::default())
		.unwrap();
	let healed = memory.load_materialized(&stored.hash, MODEL).unwrap();
	assert_eq!(healed.miss_reason(), MissReason::Hit);
}

#[test]
fn tokenizer_version_changes_are_distinguished_from_cold_misses() {
	let dir = tempfile::tempdir().unwrap();
	let mut memory = memory_at(dir.path());
	let stored = memory.store(&sample_records()).unwrap();
	memory
		.materialize_and_cache(&stored.hash, MODEL, MaterializeOptions::default())
		.unwrap();

	// pretend the entry was written by an older adapter build
	let cache_dir = dir.path().join("cache").join(&stored.hash);
	std::fs::rename(
		cache_dir.join(format!("{MODEL}.cl100k_base.tiktoken-1")),
		cache_dir.join(format!("{MODEL}.cl100k_base.tiktoken-0")),
	)
	.unwrap();

	let lookup = memory.load_materialized(&stored.hash, MODEL).unwrap();
	assert_eq!(lookup.miss_reason(), MissReason::TokenizerVersionChange);
}

#[test]
fn expired_entries_report_token_cache_expired() {
	let dir = tempfile::tempdir().unwrap();
	let mut memory = memory_at(dir.path()).with_ttl(std::time::Duration::from_millis(0));
	let stored = memory.store(&sample_records()).unwrap();
	memory
		.materialize_and_cache(&stored.hash, MODEL, MaterializeOptions::default())
		.unwrap();

	std::thread::sleep(std::time::Duration::from_millis(5));
	let lookup = memory.load_materialized(&stored.hash, MODEL).unwrap();
	assert_eq!(lookup.miss_reason(), MissReason::TokenCacheExpired);
}

#[test]
fn materializing_an_unknown_hash_is_an_error() {
	let dir = tempfile::tempdir().unwrap();
	let sink = Arc::new(RecordingSink::default());
	let mut memory = memory_at(dir.path()).with_diagnostics(sink.clone());

	let result = memory.materialize_and_cache("feed", MODEL, MaterializeOptions::default());
	assert!(matches!(result, Err(MemoryError::IrNotStored { .. })));
	assert_eq!(sink.reasons(), vec![MissReason::IrNotStored]);
}

#[test]
fn tampered_ir_bytes_fail_verification() {
	let dir = tempfile::tempdir().unwrap();
	let mut memory = memory_at(dir.path());
	let stored = memory.store(&sample_records()).unwrap();

	let bin_path = dir.path().join("ir").join(format!("{}.bin", stored.hash));
	let mut bytes = std::fs::read(&bin_path).unwrap();
	let last = bytes.len() - 1;
	bytes[last] ^= 0xFF;
	std::fs::write(&bin_path, bytes).unwrap();

	let result = memory.materialize_and_cache(&stored.hash, MODEL, MaterializeOptions::default());
	assert!(matches!(result, Err(MemoryError::IrHashMismatch { .. })));
}

#[test]
fn semantically_equal_inputs_share_an_address() {
	let dir = tempfile::tempdir().unwrap();
	let mut memory = memory_at(dir.path());

	let a = memory
		.store(&[Value::from(serde_json::json!({"x": 1, "y": "z"}))])
		.unwrap();
	let b = memory
		.store(&[Value::from(serde_json::json!({"y": "z", "x": 1}))])
		.unwrap();
	assert_eq!(a.hash, b.hash);
	assert!(!b.is_new);
}

#[test]
fn materialization_across_encodings_rerenders_from_ir_data() {
	let dir = tempfile::tempdir().unwrap();
	let mut memory = memory_at(dir.path());
	let stored = memory.store(&sample_records()).unwrap();

	// gpt-4o tokenizes with o200k, not the IR's cl100k; the tokens must
	// come from a re-render, not a byte copy
	let materialized = memory
		.materialize_and_cache(&stored.hash, "gpt-4o", MaterializeOptions::default())
		.unwrap();
	assert_eq!(materialized.encoding, Encoding::O200kBase);

	let models = memory.get_cached_models(&stored.hash).unwrap();
	assert_eq!(models, vec!["gpt-4o".to_owned()]);

	let loaded = memory.load_materialized(&stored.hash, "gpt-4o").unwrap();
	assert_eq!(loaded.miss_reason(), MissReason::Hit);
}
