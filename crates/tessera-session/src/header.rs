//! Session token header codec
//!
//! The `x-ms-session-token` header carries one entry per partition key range,
//! `{pkRangeId}:{token}`, comma separated when a request spans several ranges.

use crate::error::{Result, SessionTokenError};
use crate::token::SessionToken;

const ENTRY_SEPARATOR: char = ',';
const RANGE_SEPARATOR: char = ':';

/// Format a single `{pkRangeId}:{token}` entry
pub fn format_entry(partition_key_range_id: &str, token: &SessionToken) -> String {
    format!("{}{}{}", partition_key_range_id, RANGE_SEPARATOR, token)
}

/// Format a composite header from `(pkRangeId, token)` pairs
pub fn format_header<'a, I>(entries: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a SessionToken)>,
{
    entries
        .into_iter()
        .map(|(range, token)| format_entry(range, token))
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse a composite header into `(pkRangeId, token)` pairs
///
/// Fails on the first malformed entry.
pub fn parse_header(value: &str) -> Result<Vec<(String, SessionToken)>> {
    value
        .split(ENTRY_SEPARATOR)
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(parse_entry)
        .collect()
}

/// Parse a composite header, dropping entries that do not parse
pub fn parse_header_lenient(value: &str) -> Vec<(String, SessionToken)> {
    value
        .split(ENTRY_SEPARATOR)
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match parse_entry(entry) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::debug!(error = %e, "skipping session header entry");
                None
            }
        })
        .collect()
}

fn parse_entry(entry: &str) -> Result<(String, SessionToken)> {
    let (range, token) = entry
        .split_once(RANGE_SEPARATOR)
        .ok_or_else(|| SessionTokenError::parse(entry, "missing partition key range id"))?;

    let range = range.trim();
    if range.is_empty() {
        return Err(SessionTokenError::parse(entry, "empty partition key range id"));
    }

    Ok((range.to_string(), token.parse()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_composite_header() {
        let entries = parse_header("0:1#100#1=20,3:1#7").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "0");
        assert_eq!(entries[0].1.global_lsn(), 100);
        assert_eq!(entries[1].0, "3");
        assert_eq!(entries[1].1.to_string(), "1#7");
    }

    #[test]
    fn test_parse_simple_entry() {
        let entries = parse_header("12:345").unwrap();
        assert_eq!(entries, vec![("12".to_string(), SessionToken::Simple(345))]);
    }

    #[test]
    fn test_parse_rejects_missing_range() {
        assert!(parse_header("1#100").is_err());
        assert!(parse_header(":1#100").is_err());
        assert!(parse_header("0:1#x").is_err());
    }

    #[test]
    fn test_parse_lenient_skips_bad_entries() {
        let entries = parse_header_lenient("0:1#5, bogus ,2:1#9");
        let ranges: Vec<_> = entries.iter().map(|(r, _)| r.as_str()).collect();
        assert_eq!(ranges, vec!["0", "2"]);
    }

    #[test]
    fn test_format_header() {
        let a: SessionToken = "1#100#1=20".parse().unwrap();
        let b: SessionToken = "42".parse().unwrap();
        assert_eq!(format_entry("0", &a), "0:1#100#1=20");
        assert_eq!(format_header([("0", &a), ("5", &b)]), "0:1#100#1=20,5:42");
    }
}
