//! Structured field parser for recovered result-sheet text.
//!
//! Each labeled field is matched independently; a field that is missing or
//! does not fit in a `u64` is left absent without affecting the others.
//! Party results come from a permissive scan of `CODE : number` pairs.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::ParsedFields;

#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static REGISTERED_VOTERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Number of Voters on the Register\s*:\s*(\d+)").expect("valid regex")
});

#[allow(clippy::expect_used)]
static ACCREDITED_VOTERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Number of Accredited Voters\s*:\s*(\d+)").expect("valid regex")
});

#[allow(clippy::expect_used)]
static SPOILED_BALLOTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Spoiled Ballot Papers\s*:\s*(\d+)").expect("valid regex"));

#[allow(clippy::expect_used)]
static REJECTED_BALLOTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Rejected Ballot Papers\s*:\s*(\d+)").expect("valid regex"));

#[allow(clippy::expect_used)]
static VALID_VOTES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Total Valid Votes\s*:\s*(\d+)").expect("valid regex"));

/// Captures the officer's name up to the end of the line.
#[allow(clippy::expect_used)]
static PRESIDING_OFFICER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)Presiding Officer[ \t]*:[ \t]*([^\r\n]*)").expect("valid regex")
});

/// A single-word label followed by a count.
///
/// Matches are filtered by [`follows_word`] so that the last word of a
/// multi-word label such as "Total Valid Votes" is not taken for a code.
#[allow(clippy::expect_used)]
static PARTY_RESULT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z]+)[ \t]*:[ \t]*(\d+)\b").expect("valid regex")
});

/// Parse result-sheet text into structured fields.
///
/// Pure and idempotent. When a party code appears more than once the last
/// occurrence wins.
///
/// # Examples
/// ```
/// use election_harvester::parser::parse_polling_unit;
///
/// let fields = parse_polling_unit("Number of Voters on the Register : 500\nPVC : 10");
/// assert_eq!(fields.number_of_voters, Some(500));
/// assert_eq!(fields.party_results.get("PVC"), Some(&10));
/// assert_eq!(fields.valid_votes, None);
/// ```
#[must_use]
pub fn parse_polling_unit(text: &str) -> ParsedFields {
    let party_results = PARTY_RESULT
        .captures_iter(text)
        .filter_map(|caps| {
            let code = caps.get(1)?;
            if follows_word(&text[..code.start()]) {
                return None;
            }
            let code = code.as_str().to_string();
            let votes = caps.get(2)?.as_str().parse().ok()?;
            Some((code, votes))
        })
        .collect();

    ParsedFields {
        number_of_voters: capture_number(&REGISTERED_VOTERS, text),
        accredited_voters: capture_number(&ACCREDITED_VOTERS, text),
        spoiled_ballots: capture_number(&SPOILED_BALLOTS, text),
        rejected_ballots: capture_number(&REJECTED_BALLOTS, text),
        valid_votes: capture_number(&VALID_VOTES, text),
        party_results,
        presiding_officer: capture_officer(text),
    }
}

/// Whether the last token before a match, on the same line, is a word.
fn follows_word(before: &str) -> bool {
    let line = before.rsplit(['\n', '\r']).next().unwrap_or_default();
    line.trim_end_matches([' ', '\t'])
        .chars()
        .next_back()
        .is_some_and(|c| c.is_ascii_alphabetic())
}

fn capture_number(pattern: &Regex, text: &str) -> Option<u64> {
    let raw = pattern.captures(text)?.get(1)?.as_str();
    match raw.parse() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(value = raw, error = %e, "ignoring out-of-range count");
            None
        }
    }
}

fn capture_officer(text: &str) -> Option<String> {
    let name = PRESIDING_OFFICER.captures(text)?.get(1)?.as_str().trim();
    (!name.is_empty()).then(|| name.to_string())
}
