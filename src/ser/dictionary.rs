//! Two-pass dictionary of repeated string values
//!
//! Pass 1 tallies every string value across the rows. Selection keeps the
//! strings whose dictionary form is strictly cheaper than inlining them:
//! with `freq` occurrences of a `len`-token string, inlining costs
//! `freq * len` tokens while a dictionary entry costs `len` (the
//! definition) plus `freq` (one reference token per occurrence). Pass 2
//! happens during emission, when each selected occurrence collapses to a
//! single reference token.

use {
	crate::{canonical::Value, text::scalar, tokenizer::control, tokenizer::TokenizerAdapter},
	std::collections::{BTreeMap, HashMap},
};

/// One selected dictionary entry
#[derive(Clone, Debug)]
pub(crate) struct DictionaryEntry {
	/// The string value itself
	pub text: String,
	/// Its rendering per the scalar quoting rule (what goes on the wire)
	pub rendered: String,
	/// Occurrences across the dataset
	pub freq: usize,
	/// Inline cost of one occurrence, in tokens
	pub token_len: usize,
}

impl DictionaryEntry {
	/// Tokens saved by referencing this entry instead of inlining it
	fn tokens_saved(&self) -> usize {
		self.freq * self.token_len - self.token_len - self.freq
	}
}

/// Dictionary ids occupy a bounded control range
pub(crate) const MAX_ENTRIES: usize = control::RANGE_WIDTH as usize;

#[derive(Debug, Default)]
pub(crate) struct ValueDictionary {
	ids: HashMap<String, u32>,
	entries: Vec<DictionaryEntry>,
}

impl ValueDictionary {
	/// Pass 1 + selection over flattened rows
	pub fn build(rows: &[BTreeMap<String, Value>], adapter: &TokenizerAdapter) -> Self {
		struct Tally {
			freq: usize,
			first_seen: usize,
		}

		let mut tallies: HashMap<&str, Tally> = HashMap::new();
		let mut order = 0usize;
		for row in rows {
			for value in row.values() {
				collect_strings(value, &mut |s| {
					let tally = tallies.entry(s).or_insert(Tally {
						freq: 0,
						first_seen: order,
					});
					tally.freq += 1;
					order += 1;
				});
			}
		}

		let mut selected: Vec<(DictionaryEntry, usize)> = tallies
			.into_iter()
			.filter_map(|(text, tally)| {
				let rendered = scalar::render_string(text);
				let token_len = adapter.count_tokens(&rendered);
				(tally.freq * token_len > token_len + tally.freq).then(|| {
					(
						DictionaryEntry {
							text: text.to_owned(),
							rendered,
							freq: tally.freq,
							token_len,
						},
						tally.first_seen,
					)
				})
			})
			.collect();
		// descending frequency; first occurrence breaks ties so that the
		// id assignment is a pure function of the input
		selected.sort_by(|a, b| b.0.freq.cmp(&a.0.freq).then(a.1.cmp(&b.1)));
		selected.truncate(MAX_ENTRIES);

		let entries: Vec<DictionaryEntry> =
			selected.into_iter().map(|(entry, _)| entry).collect();
		if !entries.is_empty() {
			tracing::debug!(
				entries = entries.len(),
				tokens_saved = entries.iter().map(DictionaryEntry::tokens_saved).sum::<usize>(),
				"selected dictionary entries"
			);
		}
		let ids = entries
			.iter()
			.enumerate()
			.map(|(id, entry)| (entry.text.clone(), id as u32))
			.collect();
		Self { ids, entries }
	}

	pub fn lookup(&self, text: &str) -> Option<u32> {
		self.ids.get(text).copied()
	}

	pub fn entries(&self) -> &[DictionaryEntry] {
		&self.entries
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

/// Visit every string value reachable from `value`, including array
/// elements and the values of objects nested inside arrays
fn collect_strings<'v>(value: &'v Value, visit: &mut impl FnMut(&'v str)) {
	match value {
		Value::Str(s) => visit(s),
		Value::Arr(items) => {
			for item in items {
				collect_strings(item, visit);
			}
		}
		Value::Obj(entries) => {
			for entry in entries.values() {
				collect_strings(entry, visit);
			}
		}
		Value::Null | Value::Bool(_) | Value::Num(_) => {}
	}
}

#[cfg(test)]
mod tests {
	use {super::*, crate::tokenizer::Encoding, pretty_assertions::assert_eq};

	fn rows_with(values: &[(&str, usize)]) -> Vec<BTreeMap<String, Value>> {
		// one row per occurrence so frequencies are explicit
		let mut rows = Vec::new();
		for (text, freq) in values {
			for _ in 0..*freq {
				let mut row = BTreeMap::new();
				row.insert("v".to_owned(), Value::Str(text.to_string()));
				rows.push(row);
			}
		}
		rows
	}

	#[test]
	fn single_token_strings_are_never_selected() {
		// freq * 1 > 1 + freq is false for every freq
		let adapter = TokenizerAdapter::new(Encoding::Cl100kBase).unwrap();
		let rows = rows_with(&[("hello", 50)]);
		let dictionary = ValueDictionary::build(&rows, &adapter);
		assert!(dictionary.is_empty());
	}

	#[test]
	fn multi_token_repeats_are_selected() {
		let adapter = TokenizerAdapter::new(Encoding::Cl100kBase).unwrap();
		let phrase = "distributed consensus protocol overview";
		let rows = rows_with(&[(phrase, 3)]);
		let dictionary = ValueDictionary::build(&rows, &adapter);
		assert_eq!(dictionary.entries().len(), 1);
		assert_eq!(dictionary.lookup(phrase), Some(0));
		let entry = &dictionary.entries()[0];
		assert!(entry.freq * entry.token_len > entry.token_len + entry.freq);
	}

	#[test]
	fn ids_follow_descending_frequency() {
		let adapter = TokenizerAdapter::new(Encoding::Cl100kBase).unwrap();
		let rows = rows_with(&[
			("an uncommonly verbose annotation", 3),
			("a recurring multi token sentence", 7),
		]);
		let dictionary = ValueDictionary::build(&rows, &adapter);
		assert_eq!(dictionary.lookup("a recurring multi token sentence"), Some(0));
		assert_eq!(dictionary.lookup("an uncommonly verbose annotation"), Some(1));
	}
}
