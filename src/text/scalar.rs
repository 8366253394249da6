//! Scalar rendering shared by the binary and text surfaces
//!
//! Both codecs put scalar values on the wire as text: the text format
//! writes it directly, the binary format tokenizes it. One rendering
//! routine keeps the two in agreement and is what makes `Num(42)` and
//! `Str("42")` distinguishable after decoding: a string is quoted exactly
//! when its bare spelling would be ambiguous.

use crate::canonical::Value;

/// Unquoted null sentinel of the text format
pub(crate) const NULL_SENTINEL: &str = "_";

/// Canonical decimal rendering of a finite number
///
/// Rust's shortest round-trip formatting: `1.0` renders as `1`, and
/// parsing the output always restores the exact same f64.
pub(crate) fn render_number(n: f64) -> String {
	format!("{n}")
}

/// Whether a string value must be double-quoted
///
/// Quoting is required iff the string (i) is empty, (ii) contains
/// whitespace or a structural character, (iii) collides with a keyword,
/// (iv) parses as a number, or (v) looks like a dictionary reference.
pub(crate) fn needs_quotes(s: &str) -> bool {
	if s.is_empty() {
		return true;
	}
	if s.chars().any(|c| {
		c.is_whitespace()
			|| matches!(
				c,
				'"' | '\\' | '\n' | '\r' | '\t' | '@' | '#' | '|' | '>' | ',' | '=' | '{' | '}'
					| '[' | ']'
			)
	}) {
		return true;
	}
	if s == "true" || s == "false" || s == NULL_SENTINEL {
		return true;
	}
	// also catches "NaN", "inf" and friends, which f64 parsing accepts
	parses_as_number(s)
}

pub(crate) fn parses_as_number(s: &str) -> bool {
	s.parse::<f64>().is_ok()
}

/// Render a string value, quoting only when required
pub(crate) fn render_string(s: &str) -> String {
	if needs_quotes(s) {
		quote(s)
	} else {
		s.to_owned()
	}
}

/// Double-quote a string using exactly the `\" \\ \n \r \t` escape set
pub(crate) fn quote(s: &str) -> String {
	let mut out = String::with_capacity(s.len() + 2);
	out.push('"');
	for c in s.chars() {
		match c {
			'"' => out.push_str("\\\""),
			'\\' => out.push_str("\\\\"),
			'\n' => out.push_str("\\n"),
			'\r' => out.push_str("\\r"),
			'\t' => out.push_str("\\t"),
			other => out.push(other),
		}
	}
	out.push('"');
	out
}

/// Undo [`quote`]; `input` includes the surrounding quotes
pub(crate) fn unquote(input: &str) -> Result<String, UnquoteError> {
	let inner = input
		.strip_prefix('"')
		.and_then(|rest| rest.strip_suffix('"'))
		.ok_or(UnquoteError::Unterminated)?;
	let mut out = String::with_capacity(inner.len());
	let mut chars = inner.chars();
	while let Some(c) = chars.next() {
		if c == '"' {
			// an unescaped quote can only be the terminator, which
			// strip_suffix already consumed
			return Err(UnquoteError::Unterminated);
		}
		if c != '\\' {
			out.push(c);
			continue;
		}
		match chars.next() {
			Some('"') => out.push('"'),
			Some('\\') => out.push('\\'),
			Some('n') => out.push('\n'),
			Some('r') => out.push('\r'),
			Some('t') => out.push('\t'),
			Some(other) => return Err(UnquoteError::BadEscape(other)),
			None => return Err(UnquoteError::Unterminated),
		}
	}
	Ok(out)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum UnquoteError {
	Unterminated,
	BadEscape(char),
}

impl std::fmt::Display for UnquoteError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			UnquoteError::Unterminated => f.write_str("unterminated quoted string"),
			UnquoteError::BadEscape(c) => write!(f, "unsupported escape \\{c}"),
		}
	}
}

/// Parse a detokenized binary value span
///
/// The binary stream carries null and booleans as control tokens, so a
/// span is either a quoted string, a number, or a bare string. Lenient:
/// a malformed quoted span falls back to the raw text rather than failing
/// the whole document.
pub(crate) fn parse_binary_scalar(text: &str) -> Value {
	if text.starts_with('"') {
		return match unquote(text) {
			Ok(s) => Value::Str(s),
			Err(_) => Value::Str(text.to_owned()),
		};
	}
	match text.parse::<f64>() {
		Ok(n) if n.is_finite() => Value::Num(n),
		_ => Value::Str(text.to_owned()),
	}
}

#[cfg(test)]
mod tests {
	use {super::*, pretty_assertions::assert_eq};

	#[test]
	fn quoting_rule_table() {
		// (input, must quote)
		let cases: &[(&str, bool)] = &[
			("", true),
			("hello", false),
			("hello world", true),
			("tab\there", true),
			("true", true),
			("false", true),
			("_", true),
			("42", true),
			("-1.5e3", true),
			("NaN", true),
			("inf", true),
			("@7", true),
			("a@b", true),
			("a#b", true),
			("a,b", true),
			("a=b", true),
			("{x}", true),
			("[x]", true),
			("a|b", true),
			("a>b", true),
			("café", false),
			("snake_case", false),
			("dotted.path", false),
			("truthy", false),
			("42abc", false),
		];
		for &(input, expected) in cases {
			assert_eq!(needs_quotes(input), expected, "input: {input:?}");
		}
	}

	#[test]
	fn quote_unquote_round_trip() {
		for s in ["", "plain", "with \"quotes\"", "line\nbreak", "back\\slash", "tab\tcr\r"] {
			assert_eq!(unquote(&quote(s)).unwrap(), s);
		}
	}

	#[test]
	fn unquote_rejects_unknown_escapes() {
		assert_eq!(unquote(r#""\x""#), Err(UnquoteError::BadEscape('x')));
		assert_eq!(unquote(r#""open"#), Err(UnquoteError::Unterminated));
	}

	#[test]
	fn numbers_render_shortest() {
		assert_eq!(render_number(1.0), "1");
		assert_eq!(render_number(-2.5), "-2.5");
		assert_eq!(render_number(0.1), "0.1");
	}

	#[test]
	fn binary_scalar_distinguishes_numbers_from_numeric_strings() {
		assert_eq!(parse_binary_scalar("42"), Value::Num(42.0));
		assert_eq!(parse_binary_scalar("\"42\""), Value::Str("42".into()));
		assert_eq!(parse_binary_scalar("hello"), Value::Str("hello".into()));
	}
}
