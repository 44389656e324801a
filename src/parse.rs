//! ASCII value parsing for frame payloads.

use std::fmt::Write;

/// Token separators: space, comma, tab, CR, LF.
pub const DELIMITERS: &[u8] = b" ,\t\r\n";

/// Values parsed from one payload.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Parsed {
    pub values: Vec<f32>,
    /// More numeric tokens followed once capacity was reached.
    pub truncated: bool,
}

impl Parsed {
    pub fn count(&self) -> usize {
        self.values.len()
    }
}

/// Parse up to `capacity` floats using the default delimiter set.
pub fn parse(payload: &[u8], capacity: usize) -> Parsed {
    parse_with(payload, capacity, DELIMITERS)
}

/// Parse up to `capacity` floats, splitting on any byte in `delimiters`.
///
/// Tokens that are not valid decimal floats are skipped; they never shift
/// the values that follow.
pub fn parse_with(payload: &[u8], capacity: usize, delimiters: &[u8]) -> Parsed {
    let mut values = Vec::with_capacity(capacity.min(payload.len() / 2 + 1));
    let mut truncated = false;

    let tokens = payload
        .split(|b| delimiters.contains(b))
        .filter(|t| !t.is_empty())
        .filter_map(parse_token);

    for value in tokens {
        if values.len() == capacity {
            truncated = true;
            break;
        }
        values.push(value);
    }

    Parsed { values, truncated }
}

fn parse_token(token: &[u8]) -> Option<f32> {
    std::str::from_utf8(token).ok()?.trim().parse::<f32>().ok()
}

/// Render values one per line, the layout the host tooling sends.
pub fn format_values(values: &[f32]) -> String {
    let mut out = String::with_capacity(values.len() * 12);
    for v in values {
        // Writing into a String cannot fail.
        let _ = writeln!(out, "{v:e}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_delimiters() {
        let parsed = parse(b"1.0,2.5\n3.0", 3);
        assert_eq!(parsed.values, vec![1.0, 2.5, 3.0]);
        assert_eq!(parsed.count(), 3);
        assert!(!parsed.truncated);
    }

    #[test]
    fn test_skips_bad_tokens_in_place() {
        let parsed = parse(b"1.0\nabc\n-2e-1, x7 ,4\r\n", 10);
        assert_eq!(parsed.values, vec![1.0, -0.2, 4.0]);
    }

    #[test]
    fn test_stops_at_capacity() {
        let parsed = parse(b"1 2 3 4", 2);
        assert_eq!(parsed.values, vec![1.0, 2.0]);
        assert!(parsed.truncated);
    }

    #[test]
    fn test_trailing_garbage_is_not_truncation() {
        let parsed = parse(b"1 2 <EOF>", 2);
        assert_eq!(parsed.count(), 2);
        assert!(!parsed.truncated);
    }

    #[test]
    fn test_newline_only_delimiters() {
        let parsed = parse_with(b"1.5\n2 3\n4", 10, b"\n");
        // "2 3" is one malformed token under line splitting.
        assert_eq!(parsed.values, vec![1.5, 4.0]);
    }

    #[test]
    fn test_non_utf8_token_skipped() {
        let parsed = parse(b"1\n\xff\xfe\n2", 4);
        assert_eq!(parsed.values, vec![1.0, 2.0]);
    }

    #[test]
    fn test_format_values_parses_back_exactly() {
        let values = [0.1f32, -3.75, 1.0e-7, 12345.678];
        let text = format_values(&values);
        assert_eq!(parse(text.as_bytes(), 8).values, values);
    }
}
