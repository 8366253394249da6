//! Record shape identity and deduplication
//!
//! A schema is nothing more than an ordered field-name list with a stable
//! id. Two records share a schema iff their sorted field-name sets are
//! equal; field *types* are deliberately not part of the identity, so
//! differing null patterns across rows never split a schema.
//!
//! Ids are assigned in registration order within a single encode and are
//! not stable across runs or datasets.

use {
	crate::canonical::Value,
	std::collections::{BTreeMap, BTreeSet, HashMap},
};

/// When the number of distinct field names across a dataset stays at or
/// below this, the encoder unifies every row under one superset schema
/// (Single-Schema Mode) and signals missing fields through the presence
/// mask. Above it, each distinct shape gets its own schema.
pub const SINGLE_SCHEMA_FIELD_LIMIT: usize = 200;

/// Unit separator between field names in a signature. It cannot appear in
/// a field name list ambiguously because no sane key contains U+0001.
const SIGNATURE_SEPARATOR: &str = "\u{0001}";

/// An ordered field-name list with a stable id
#[derive(Clone, Debug, PartialEq, Eq, serde_derive::Serialize, serde_derive::Deserialize)]
pub struct Schema {
	pub id: u32,
	/// Field names in Unicode code-point order
	pub fields: Vec<String>,
}

impl Schema {
	/// Position of `field` in this schema, if present
	pub fn field_index(&self, field: &str) -> Option<usize> {
		self.fields.iter().position(|f| f == field)
	}
}

/// Which body layout an encoded stream uses
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchemaMode {
	/// One superset schema; rows project onto it with a presence mask
	Single,
	/// One schema per distinct shape; rows reference theirs by id
	Multi,
}

/// Deduplicating registry of record shapes
///
/// ```
/// use {contex::SchemaRegistry, contex::Value, std::collections::BTreeMap};
///
/// let mut registry = SchemaRegistry::new();
/// let mut record = BTreeMap::new();
/// record.insert("id".to_owned(), Value::Num(1.0));
/// record.insert("name".to_owned(), Value::Str("x".to_owned()));
/// assert_eq!(registry.register(&record), registry.register(&record));
/// ```
#[derive(Debug, Default)]
pub struct SchemaRegistry {
	by_signature: HashMap<String, u32>,
	schemas: Vec<Schema>,
}

impl SchemaRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register a record's shape, returning the id of the (possibly
	/// pre-existing) schema for its sorted field-name set
	pub fn register(&mut self, record: &BTreeMap<String, Value>) -> u32 {
		// BTreeMap iteration is already in code-point order
		self.register_fields(record.keys().cloned().collect())
	}

	/// Register an already-sorted field-name list
	pub fn register_fields(&mut self, fields: Vec<String>) -> u32 {
		let signature = fields.join(SIGNATURE_SEPARATOR);
		if let Some(&id) = self.by_signature.get(&signature) {
			return id;
		}
		let id = self.schemas.len() as u32;
		self.by_signature.insert(signature, id);
		self.schemas.push(Schema { id, fields });
		id
	}

	/// Register the superset schema: the sorted union of every field name
	/// across `records`
	pub fn superset(&mut self, records: &[BTreeMap<String, Value>]) -> u32 {
		let union: BTreeSet<String> = records
			.iter()
			.flat_map(|record| record.keys().cloned())
			.collect();
		self.register_fields(union.into_iter().collect())
	}

	pub fn get(&self, id: u32) -> Option<&Schema> {
		self.schemas.get(id as usize)
	}

	pub fn schemas(&self) -> &[Schema] {
		&self.schemas
	}

	pub fn len(&self) -> usize {
		self.schemas.len()
	}

	pub fn is_empty(&self) -> bool {
		self.schemas.is_empty()
	}
}

/// Number of distinct field names across all records
pub fn distinct_field_count(records: &[BTreeMap<String, Value>]) -> usize {
	records
		.iter()
		.flat_map(|record| record.keys())
		.collect::<BTreeSet<_>>()
		.len()
}

/// Pick the body layout for a dataset
pub fn mode_for(records: &[BTreeMap<String, Value>]) -> SchemaMode {
	if distinct_field_count(records) <= SINGLE_SCHEMA_FIELD_LIMIT {
		SchemaMode::Single
	} else {
		SchemaMode::Multi
	}
}

#[cfg(test)]
mod tests {
	use {super::*, pretty_assertions::assert_eq};

	fn record(fields: &[&str]) -> BTreeMap<String, Value> {
		fields
			.iter()
			.map(|f| (f.to_string(), Value::Null))
			.collect()
	}

	#[test]
	fn equal_key_sets_share_an_id() {
		let mut registry = SchemaRegistry::new();
		let a = registry.register(&record(&["b", "a"]));
		let b = registry.register(&record(&["a", "b"]));
		assert_eq!(a, b);
		assert_eq!(registry.len(), 1);
	}

	#[test]
	fn distinct_key_sets_get_distinct_ids() {
		let mut registry = SchemaRegistry::new();
		let a = registry.register(&record(&["a", "b"]));
		let b = registry.register(&record(&["a", "c"]));
		assert_ne!(a, b);
	}

	#[test]
	fn signature_separator_prevents_concatenation_collisions() {
		let mut registry = SchemaRegistry::new();
		let a = registry.register(&record(&["ab", "c"]));
		let b = registry.register(&record(&["a", "bc"]));
		assert_ne!(a, b);
	}

	#[test]
	fn superset_is_the_sorted_union() {
		let mut registry = SchemaRegistry::new();
		let id = registry.superset(&[record(&["b", "a"]), record(&["c", "a"])]);
		assert_eq!(
			registry.get(id).unwrap().fields,
			vec!["a".to_owned(), "b".to_owned(), "c".to_owned()]
		);
	}

	#[test]
	fn mode_switches_at_the_field_limit() {
		let small: Vec<_> = (0..10)
			.map(|i| record(&[format!("f{i}").as_str()]))
			.collect();
		assert_eq!(mode_for(&small), SchemaMode::Single);

		let wide: Vec<_> = (0..=SINGLE_SCHEMA_FIELD_LIMIT)
			.map(|i| record(&[format!("f{i}").as_str()]))
			.collect();
		assert_eq!(mode_for(&wide), SchemaMode::Multi);
	}
}
