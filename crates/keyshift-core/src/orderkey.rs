// ABOUTME: Parses legacy order keys and re-encodes their sequence number at a fixed 13-digit width.
// ABOUTME: Negative sequence numbers use the `H` overflow marker with a 10^13 bias.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Bias added to negative sequence numbers before they are written after the
/// overflow marker. Fixed by the legacy key format.
pub const SEQUENCE_BIAS: i64 = 10_000_000_000_000;

/// Width of the sequence field in the new key format.
pub const SEQUENCE_WIDTH: usize = 13;

/// Prefix marking a biased (negative) sequence value.
pub const OVERFLOW_MARKER: char = 'H';

static LEGACY_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<date>[0-9]{4}-[0-9]{2}-[0-9]{2})(?P<seq>H?[0-9]{10,11})_(?P<ev>[0-9]{6})$")
        .expect("legacy key pattern is valid")
});

static MIGRATED_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<date>[0-9]{4}-[0-9]{2}-[0-9]{2})(?P<seq>H?[0-9]{13})_(?P<ev>[0-9]{6})$")
        .expect("migrated key pattern is valid")
});

/// Errors produced while rebuilding an order key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("bad order key: {0}")]
    Malformed(String),

    #[error("sequence number {0} is outside the 13-digit range")]
    OutOfRange(i64),
}

/// The components of an order key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey {
    pub date: String,
    pub raw_sequence: String,
    pub sequence_number: i64,
    pub event_id: String,
}

impl ParsedKey {
    /// Assemble the key in the 13-digit format.
    pub fn to_new_key(&self) -> Result<String, KeyError> {
        Ok(format!(
            "{}{}_{}",
            self.date,
            encode(self.sequence_number)?,
            self.event_id
        ))
    }
}

/// Parse a key in the legacy 10-11 digit format. Returns None for anything
/// that does not match the whole pattern.
pub fn parse(key: &str) -> Option<ParsedKey> {
    parse_with(&LEGACY_KEY, key)
}

/// Parse a key that is already in the 13-digit format.
pub fn parse_migrated(key: &str) -> Option<ParsedKey> {
    parse_with(&MIGRATED_KEY, key)
}

fn parse_with(pattern: &Regex, key: &str) -> Option<ParsedKey> {
    let caps = pattern.captures(key)?;
    let raw = &caps["seq"];
    let sequence_number = decode(raw)?;
    Some(ParsedKey {
        date: caps["date"].to_string(),
        raw_sequence: raw.to_string(),
        sequence_number,
        event_id: caps["ev"].to_string(),
    })
}

/// Decode a raw sequence token of any width: bare digits are taken as is,
/// marker-prefixed digits have the bias subtracted.
pub fn decode(raw: &str) -> Option<i64> {
    let (biased, digits) = match raw.strip_prefix(OVERFLOW_MARKER) {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value = digits.parse::<i64>().ok()?;
    Some(if biased { value - SEQUENCE_BIAS } else { value })
}

/// Encode a sequence number at the fixed 13-digit width.
pub fn encode(sequence_number: i64) -> Result<String, KeyError> {
    if !(-SEQUENCE_BIAS..SEQUENCE_BIAS).contains(&sequence_number) {
        return Err(KeyError::OutOfRange(sequence_number));
    }
    if sequence_number >= 0 {
        Ok(format!("{:0width$}", sequence_number, width = SEQUENCE_WIDTH))
    } else {
        Ok(format!(
            "{}{:0width$}",
            OVERFLOW_MARKER,
            SEQUENCE_BIAS + sequence_number,
            width = SEQUENCE_WIDTH
        ))
    }
}

/// Rebuild a legacy key into the new format, returning the new key and the
/// decoded sequence number.
pub fn rebuild(old_key: &str) -> Result<(String, i64), KeyError> {
    let parsed = parse(old_key).ok_or_else(|| KeyError::Malformed(old_key.to_string()))?;
    let new_key = parsed.to_new_key()?;
    Ok((new_key, parsed.sequence_number))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_plain_legacy_key() {
        let parsed = parse("2024-03-0112345678901_000042").unwrap();
        assert_eq!(parsed.date, "2024-03-01");
        assert_eq!(parsed.raw_sequence, "12345678901");
        assert_eq!(parsed.sequence_number, 12_345_678_901);
        assert_eq!(parsed.event_id, "000042");
    }

    #[test]
    fn parse_overflow_marked_key() {
        let parsed = parse("2024-03-01H9999999999_000123").unwrap();
        assert_eq!(parsed.date, "2024-03-01");
        assert_eq!(parsed.raw_sequence, "H9999999999");
        assert_eq!(parsed.sequence_number, 9_999_999_999 - SEQUENCE_BIAS);
        assert_eq!(parsed.sequence_number, -9_990_000_000_001);
        assert_eq!(parsed.event_id, "000123");
    }

    #[test]
    fn rebuild_overflow_marked_key_keeps_marker() {
        let (new_key, seq) = rebuild("2024-03-01H9999999999_000123").unwrap();
        assert_eq!(new_key, "2024-03-01H0009999999999_000123");
        assert_eq!(seq, -9_990_000_000_001);

        let reparsed = parse_migrated(&new_key).unwrap();
        assert_eq!(reparsed.sequence_number, seq);
        assert_eq!(reparsed.date, "2024-03-01");
        assert_eq!(reparsed.event_id, "000123");
    }

    #[test]
    fn rebuild_pads_ten_digit_sequence() {
        let (new_key, seq) = rebuild("2023-12-310000000007_999999").unwrap();
        assert_eq!(new_key, "2023-12-310000000000007_999999");
        assert_eq!(seq, 7);
    }

    #[test]
    fn parse_rejects_non_matching_strings() {
        let bad = [
            "not-a-key",
            "",
            "2024-03-0112345678901_00042",
            "2024-03-0112345678901_0000421",
            "12345678901_000042",
            "2024-03-01123456789_000042",
            "2024-03-01123456789012_000042",
            "2024-03-0112345678901_000042x",
            "x2024-03-0112345678901_000042",
            "2024-03-01X1234567890_000042",
            "2024-03-01-1234567890_000042",
            "2024-03-0112345678901-000042",
            "2024-03-01١٢٣٤٥٦٧٨٩٠_000042",
        ];
        for key in bad {
            assert!(parse(key).is_none(), "{key:?} should not parse");
        }
    }

    #[test]
    fn rebuild_reports_malformed_key() {
        let err = rebuild("not-a-key").unwrap_err();
        assert_eq!(err, KeyError::Malformed("not-a-key".to_string()));
    }

    #[test]
    fn legacy_and_migrated_patterns_do_not_overlap() {
        let (new_key, _) = rebuild("2024-03-0112345678901_000042").unwrap();
        assert!(parse(&new_key).is_none());
        assert!(parse_migrated("2024-03-0112345678901_000042").is_none());
    }

    #[test]
    fn encode_range_edges() {
        assert_eq!(encode(0).unwrap(), "0000000000000");
        assert_eq!(encode(SEQUENCE_BIAS - 1).unwrap(), "9999999999999");
        assert_eq!(encode(-1).unwrap(), "H9999999999999");
        assert_eq!(encode(-SEQUENCE_BIAS).unwrap(), "H0000000000000");
        assert_eq!(encode(SEQUENCE_BIAS), Err(KeyError::OutOfRange(SEQUENCE_BIAS)));
        assert_eq!(
            encode(-SEQUENCE_BIAS - 1),
            Err(KeyError::OutOfRange(-SEQUENCE_BIAS - 1))
        );
    }

    #[test]
    fn decode_rejects_signs_and_empty_digits() {
        assert_eq!(decode("H"), None);
        assert_eq!(decode(""), None);
        assert_eq!(decode("+123"), None);
        assert_eq!(decode("H-12"), None);
    }

    #[test]
    fn negative_keys_sort_after_non_negative_keys() {
        // The marker outranks every digit, so order only holds within a sign.
        let minus_one = encode(-1).unwrap();
        let zero = encode(0).unwrap();
        assert_eq!(minus_one, "H9999999999999");
        assert_eq!(zero, "0000000000000");
        assert!(minus_one > zero);
        assert!(encode(-SEQUENCE_BIAS).unwrap() > encode(SEQUENCE_BIAS - 1).unwrap());
    }

    proptest! {
        #[test]
        fn non_negative_round_trip(n in 0..SEQUENCE_BIAS) {
            let encoded = encode(n).unwrap();
            prop_assert_eq!(encoded.len(), SEQUENCE_WIDTH);
            prop_assert_eq!(decode(&encoded), Some(n));
        }

        #[test]
        fn negative_round_trip(n in -SEQUENCE_BIAS..0) {
            let encoded = encode(n).unwrap();
            prop_assert!(encoded.starts_with(OVERFLOW_MARKER));
            prop_assert_eq!(encoded.len(), SEQUENCE_WIDTH + 1);
            prop_assert_eq!(decode(&encoded), Some(n));
        }

        #[test]
        fn non_negative_order_is_lexical(a in 0..SEQUENCE_BIAS, b in 0..SEQUENCE_BIAS) {
            prop_assume!(a < b);
            prop_assert!(encode(a).unwrap() < encode(b).unwrap());
        }

        #[test]
        fn negative_order_is_lexical(a in -SEQUENCE_BIAS..0, b in -SEQUENCE_BIAS..0) {
            prop_assume!(a < b);
            prop_assert!(encode(a).unwrap() < encode(b).unwrap());
        }

        #[test]
        fn rebuilt_legacy_key_reparses(
            digits in "[0-9]{10,11}",
            marked in any::<bool>(),
            event in "[0-9]{6}",
        ) {
            let marker = if marked { "H" } else { "" };
            let old = format!("2022-07-15{marker}{digits}_{event}");
            let parsed = parse(&old).unwrap();
            let (new_key, seq) = rebuild(&old).unwrap();
            prop_assert_eq!(seq, parsed.sequence_number);

            let migrated = parse_migrated(&new_key).unwrap();
            prop_assert_eq!(migrated.sequence_number, seq);
            prop_assert_eq!(migrated.date, "2022-07-15");
            prop_assert_eq!(migrated.event_id, event);
        }
    }
}
