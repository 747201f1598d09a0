//! Intent extraction: turn a validated implementation into a description of
//! what it does that does not depend on how it does it.
//!
//! The default [`StructuralExtractor`] reads declared items (operations,
//! types, capabilities, documented behaviors) and reduces them to a sorted
//! behavior set. Two implementations in different languages that declare the
//! same operations and types produce the same set, and therefore the same
//! fingerprint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Write as _;

use crate::error::{Result, TwinTrackError};
use crate::lineage::GeneratedContent;
use crate::spec_record::{SpecificationRecord, sha256_hex};
use crate::types::TrackKey;

/// Canonical, implementation-agnostic description of one track's behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentRepresentation {
    pub source: TrackKey,
    pub purpose: String,
    pub behaviors: BTreeSet<String>,
    pub evidenced_criteria: BTreeSet<String>,
    /// SHA-256 of the behavior set
    pub fingerprint: String,
    pub derived_at: DateTime<Utc>,
}

impl IntentRepresentation {
    pub fn new(
        source: TrackKey,
        purpose: impl Into<String>,
        behaviors: BTreeSet<String>,
        evidenced_criteria: BTreeSet<String>,
    ) -> Self {
        let fingerprint = fingerprint(&behaviors);
        Self {
            source,
            purpose: purpose.into(),
            behaviors,
            evidenced_criteria,
            fingerprint,
            derived_at: Utc::now(),
        }
    }

    /// Text form handed to the generation backend
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "purpose: {}", self.purpose);
        out.push_str("behaviors:\n");
        for behavior in &self.behaviors {
            let _ = writeln!(out, "  - {behavior}");
        }
        out.push_str("evidenced criteria:\n");
        for criterion in &self.evidenced_criteria {
            let _ = writeln!(out, "  - {criterion}");
        }
        out
    }

    pub fn describes_same_behavior(&self, other: &IntentRepresentation) -> bool {
        self.fingerprint == other.fingerprint
    }
}

fn fingerprint(behaviors: &BTreeSet<String>) -> String {
    let joined = behaviors.iter().map(String::as_str).collect::<Vec<_>>().join("\n");
    sha256_hex(joined.as_bytes())
}

/// Pure function contract: the same content must always yield the same
/// behavior set.
pub trait IntentExtractor: Send + Sync {
    fn extract(
        &self,
        source: TrackKey,
        spec: &SpecificationRecord,
        content: &GeneratedContent,
    ) -> Result<IntentRepresentation>;

    fn name(&self) -> &str;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StructuralExtractor;

const MODIFIERS: [&str; 11] = [
    "pub", "pub(crate)", "pub(super)", "async", "unsafe", "const", "export", "static", "public",
    "private", "extern",
];

impl StructuralExtractor {
    pub fn new() -> Self {
        Self
    }

    fn behaviors(body: &str) -> BTreeSet<String> {
        body.lines()
            .filter_map(|line| describe_line(line.trim()))
            .collect()
    }
}

impl IntentExtractor for StructuralExtractor {
    fn extract(
        &self,
        source: TrackKey,
        spec: &SpecificationRecord,
        content: &GeneratedContent,
    ) -> Result<IntentRepresentation> {
        let body = content.body.as_str();
        if body.trim().is_empty() {
            return Err(extraction_error("content is empty"));
        }
        check_delimiters(body, Syntax::for_flavor(&content.flavor))?;

        let behaviors = Self::behaviors(body);
        if behaviors.is_empty() {
            return Err(extraction_error("no declared behavior found"));
        }

        let evidenced: BTreeSet<String> = spec
            .criterion_names()
            .filter(|name| mentions(body, name))
            .map(str::to_string)
            .collect();
        let total = spec.acceptance_criteria().len();
        let required = spec.intent_completeness() * total as f64;
        if (evidenced.len() as f64) + f64::EPSILON < required {
            return Err(extraction_error(format!(
                "content evidences {} of {total} criteria, {:.0}% required",
                evidenced.len(),
                spec.intent_completeness() * 100.0
            )));
        }

        tracing::debug!(
            track = %source,
            behaviors = behaviors.len(),
            evidenced = evidenced.len(),
            "Extracted intent"
        );
        Ok(IntentRepresentation::new(
            source,
            spec.purpose(),
            behaviors,
            evidenced,
        ))
    }

    fn name(&self) -> &str {
        "structural"
    }
}

fn extraction_error(reason: impl Into<String>) -> TwinTrackError {
    TwinTrackError::Extraction {
        reason: reason.into(),
    }
}

fn describe_line(line: &str) -> Option<String> {
    if let Some(comment) = ["//", "#", "--"]
        .iter()
        .find_map(|prefix| line.strip_prefix(prefix))
    {
        let comment = comment.trim_start_matches('/').trim();
        let lower = comment.to_lowercase();
        return lower
            .strip_prefix("behavior:")
            .map(|rest| format!("documents: {}", rest.trim()))
            .filter(|text| text.len() > "documents: ".len());
    }

    let mut tokens = line
        .split_whitespace()
        .skip_while(|token| MODIFIERS.contains(token));
    let keyword = tokens.next()?;
    match keyword.split('<').next().unwrap_or(keyword) {
        "fn" | "def" | "func" | "function" => {
            identifier(tokens.next()?).map(|name| format!("operation {name}"))
        }
        "struct" | "class" | "enum" => {
            identifier(tokens.next()?).map(|name| format!("defines type {name}"))
        }
        "trait" | "interface" | "protocol" => {
            identifier(tokens.next()?).map(|name| format!("defines capability {name}"))
        }
        "impl" => describe_impl(line),
        _ => None,
    }
}

// `impl<T> Display for Token<T> {` -> `Token implements Display`
fn describe_impl(line: &str) -> Option<String> {
    let (head, target) = line.split_once(" for ")?;
    let capability = head.split_whitespace().last().and_then(identifier)?;
    let target = target.split_whitespace().next().and_then(identifier)?;
    Some(format!("{target} implements {capability}"))
}

fn identifier(token: &str) -> Option<String> {
    let name: String = token
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    (!name.is_empty()).then_some(name)
}

/// Whole-word, case-sensitive mention of a criterion name.
fn mentions(body: &str, name: &str) -> bool {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    body.match_indices(name).any(|(start, _)| {
        let before = body[..start].chars().next_back();
        let after = body[start + name.len()..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}

/// Comment and quoting rules for the delimiter check, picked from the
/// content flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Syntax {
    /// `//` comments, `'a` lifetimes and labels, `'x'` char literals
    Rust,
    /// `#` comments; `//` is an operator
    Hash,
    /// `//` comments
    CLike,
}

impl Syntax {
    fn for_flavor(flavor: &str) -> Self {
        match flavor.trim().to_ascii_lowercase().as_str() {
            "rust" | "rs" => Self::Rust,
            "python" | "py" | "ruby" | "rb" | "shell" | "sh" | "bash" | "perl" | "r" => Self::Hash,
            _ => Self::CLike,
        }
    }

    fn comment_starts(self, rest: &[char]) -> bool {
        match self {
            Self::Hash => rest.first() == Some(&'#'),
            Self::Rust | Self::CLike => rest.starts_with(&['/', '/']),
        }
    }
}

/// Reject content whose brackets do not balance outside string and char
/// literals and comments.
fn check_delimiters(body: &str, syntax: Syntax) -> Result<()> {
    let mut stack: Vec<(char, usize)> = Vec::new();

    for (index, line) in body.lines().enumerate() {
        let line_no = index + 1;
        let trimmed = line.trim_start();
        if trimmed.starts_with("//") || (trimmed.starts_with('#') && !trimmed.starts_with("#[")) {
            continue;
        }

        let chars: Vec<char> = line.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            if syntax.comment_starts(&chars[i..]) {
                break;
            }
            match c {
                // An unterminated string runs to the end of the line.
                '"' => i = closing_quote(&chars, i, '"').unwrap_or(chars.len()),
                '\'' => {
                    if let Some(end) = single_quoted_end(&chars, i, syntax) {
                        i = end;
                    }
                }
                '(' | '[' | '{' => stack.push((c, line_no)),
                ')' | ']' | '}' => {
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match stack.pop() {
                        Some((open, _)) if open == expected => {}
                        _ => {
                            return Err(extraction_error(format!(
                                "unbalanced '{c}' on line {line_no}"
                            )));
                        }
                    }
                }
                _ => {}
            }
            i += 1;
        }
    }

    match stack.pop() {
        Some((open, line_no)) => Err(extraction_error(format!(
            "'{open}' opened on line {line_no} is never closed"
        ))),
        None => Ok(()),
    }
}

/// Index of the unescaped `quote` closing the literal opened at `open`.
fn closing_quote(chars: &[char], open: usize, quote: char) -> Option<usize> {
    let mut escaped = false;
    for (offset, &c) in chars.iter().enumerate().skip(open + 1) {
        match (escaped, c) {
            (true, _) => escaped = false,
            (false, '\\') => escaped = true,
            (false, c) if c == quote => return Some(offset),
            _ => {}
        }
    }
    None
}

/// End of the single-quoted literal opened at `open`. `None` when the quote
/// starts a lifetime or label, or is a stray apostrophe.
fn single_quoted_end(chars: &[char], open: usize, syntax: Syntax) -> Option<usize> {
    let next = *chars.get(open + 1)?;
    if next.is_alphabetic() || next == '_' {
        let run = chars[open + 1..]
            .iter()
            .take_while(|c| c.is_alphanumeric() || **c == '_')
            .count();
        if chars.get(open + 1 + run) == Some(&'\'') {
            return Some(open + 1 + run);
        }
        // `&'a T`, `<'a>`, `T + 'static`
        let after_sigil = open
            .checked_sub(1)
            .and_then(|prev| chars.get(prev))
            .is_some_and(|prev| matches!(prev, '&' | '<' | '+'));
        if syntax == Syntax::Rust || after_sigil {
            return None;
        }
    }
    closing_quote(chars, open, '\'')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LineageId, TrackRole};
    use pretty_assertions::assert_eq;

    const PYTHON: &str = r#"
# behavior: splits on whitespace
class Tokenizer:
    def tokenize(self, text):
        return [t for t in text.split() if t]

# ✓ C1
# ✓ C2
"#;

    const RUST: &str = r#"
// behavior: splits on whitespace
pub struct Tokenizer;

impl Tokenizer {
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_string).collect()
    }
}
"#;

    fn spec() -> SpecificationRecord {
        SpecificationRecord::builder("tokenizer", "Split input into tokens")
            .criterion("C1", "splits on whitespace")
            .criterion("C2", "drops empty tokens")
            .build()
            .expect("spec")
    }

    fn key() -> TrackKey {
        TrackKey::new(LineageId::new(), TrackRole::RapidIteration)
    }

    fn extract(body: &str) -> Result<IntentRepresentation> {
        extract_as(body, "x")
    }

    fn extract_as(body: &str, flavor: &str) -> Result<IntentRepresentation> {
        StructuralExtractor::new().extract(
            key(),
            &spec(),
            &GeneratedContent::new(body, flavor, "t"),
        )
    }

    #[test]
    fn test_summarizes_declared_items() {
        let intent = extract(PYTHON).expect("extracts");

        let expected: BTreeSet<String> = [
            "defines type Tokenizer",
            "documents: splits on whitespace",
            "operation tokenize",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();
        assert_eq!(intent.behaviors, expected);
        assert_eq!(intent.evidenced_criteria.len(), 2);
        assert_eq!(intent.purpose, "Split input into tokens");
    }

    #[test]
    fn test_equivalent_implementations_share_a_fingerprint() {
        let python = extract(PYTHON).expect("extracts");
        let spec = SpecificationRecord::builder("tokenizer", "Split input into tokens")
            .criterion("C1", "")
            .intent_completeness(0.0)
            .build()
            .expect("spec");
        let rust = StructuralExtractor::new()
            .extract(key(), &spec, &GeneratedContent::new(RUST, "rust", "t"))
            .expect("extracts");

        assert!(python.describes_same_behavior(&rust));
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let first = extract(PYTHON).expect("extracts");
        let second = extract(PYTHON).expect("extracts");
        assert_eq!(first.behaviors, second.behaviors);
        assert_eq!(first.fingerprint, second.fingerprint);
        assert_eq!(first.render(), second.render());
    }

    #[test]
    fn test_trait_impls_are_recorded() {
        let body = "impl<T> Display for Token<T> {\n}\n// ✓ C1\n// ✓ C2\n";
        let intent = extract(body).expect("extracts");
        assert!(intent.behaviors.contains("Token implements Display"));
    }

    #[test]
    fn test_empty_content_is_rejected() {
        let err = extract("  \n ").expect_err("empty");
        assert!(matches!(err, TwinTrackError::Extraction { .. }));
    }

    #[test]
    fn test_unbalanced_delimiters_are_rejected() {
        let err = extract("fn broken( {\n// ✓ C1 C2\n").expect_err("unbalanced");
        assert!(err.to_string().contains("never closed"), "{err}");
    }

    #[test]
    fn test_brackets_inside_strings_are_ignored() {
        let body = "fn open() { let s = \"(\"; }\n// ✓ C1\n// ✓ C2\n";
        assert!(extract(body).is_ok());
    }

    #[test]
    fn test_brackets_inside_single_quotes_are_ignored() {
        let python = "def tokenize(s):\n    return s.split('(')\n# ✓ C1\n# ✓ C2\n";
        let rust = "fn open(c: char) -> bool { c == '{' || c == '\\'' }\n// ✓ C1\n// ✓ C2\n";

        for flavor in ["python", "x"] {
            let intent = extract_as(python, flavor).expect("python literal");
            assert!(intent.behaviors.contains("operation tokenize"));
        }
        for flavor in ["rust", "x"] {
            let intent = extract_as(rust, flavor).expect("rust char literal");
            assert!(intent.behaviors.contains("operation open"));
        }
    }

    #[test]
    fn test_lifetimes_do_not_open_literals() {
        let body = "fn first<'a>(items: &'a [String]) -> &'a str {\n    \
                    'outer: loop { break 'outer; }\n    &items[0]\n}\n// ✓ C1 C2\n";

        let inline = "fn first<'a>(items: &'a [u8]) -> &'a u8 { &items[0] }\n// ✓ C1 C2\n";

        assert!(extract_as(body, "rust").is_ok());
        assert!(extract_as(inline, "x").is_ok());
    }

    #[test]
    fn test_trailing_comments_are_ignored() {
        let python = "def tokenize(s):  # returns (tokens\n    return s.split()\n# ✓ C1 C2\n";
        let rust = "fn tokenize() {} // closes [later\n// ✓ C1 C2\n";

        assert!(extract_as(python, "python").is_ok());
        assert!(extract_as(rust, "rust").is_ok());
    }

    #[test]
    fn test_floor_division_is_not_a_comment() {
        let body = "def half(n):\n    return (n // 2\n# ✓ C1 C2\n";
        let err = extract_as(body, "python").expect_err("unclosed");
        assert!(err.to_string().contains("'(' opened on line 2"), "{err}");
    }

    #[test]
    fn test_unclosed_bracket_after_literal_is_rejected() {
        let body = "def tokenize(s):\n    return s.split('('\n# ✓ C1 C2\n";
        let err = extract_as(body, "python").expect_err("unclosed");
        assert!(err.to_string().contains("never closed"), "{err}");
    }

    #[test]
    fn test_content_without_declarations_is_rejected() {
        let err = extract("x = 1\n# ✓ C1\n# ✓ C2\n").expect_err("no behaviors");
        assert!(err.to_string().contains("no declared behavior"));
    }

    #[test]
    fn test_incomplete_evidence_is_rejected() {
        let err = extract("def tokenize(s):\n    return s\n# ✓ C1\n").expect_err("C2 missing");
        assert!(err.to_string().contains("1 of 2 criteria"), "{err}");
    }

    #[test]
    fn test_criterion_mentions_are_whole_words() {
        assert!(mentions("✓ C1", "C1"));
        assert!(!mentions("✓ C10", "C1"));
        assert!(!mentions("XC1", "C1"));
    }
}
