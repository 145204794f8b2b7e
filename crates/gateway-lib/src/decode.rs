//! Decoding of Docker CLI output
//!
//! Two modes:
//! - line-JSON: one document per line, malformed lines are dropped
//! - whole-JSON: the entire output is one document, failure is fatal
//!
//! Plus the unit helpers used to turn `docker stats` strings into numbers.

use crate::error::DecodeError;
use serde::de::DeserializeOwned;
use tracing::warn;

const MIB_PER_GIB: f64 = 1024.0;
const KIB_PER_MIB: f64 = 1024.0;
const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Records decoded from line-JSON output
#[derive(Debug, Clone, PartialEq)]
pub struct LineJson<T> {
    /// Successfully parsed lines, in output order
    pub records: Vec<T>,
    /// Number of non-empty lines that failed to parse
    pub malformed: usize,
}

/// Parse a single line-JSON entry, `None` if it is not a valid record
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Option<T> {
    match serde_json::from_str(line) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(error = %e, line = %truncate(line, 120), "Dropping malformed JSON line");
            None
        }
    }
}

/// Decode newline-delimited JSON, skipping blank and malformed lines
pub fn decode_lines<T: DeserializeOwned>(stdout: &[u8]) -> LineJson<T> {
    let text = String::from_utf8_lossy(stdout);
    let mut records = Vec::new();
    let mut malformed = 0;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match decode_line(line) {
            Some(record) => records.push(record),
            None => malformed += 1,
        }
    }

    LineJson { records, malformed }
}

/// Decode the whole output as one JSON document
pub fn decode_document<T: DeserializeOwned>(stdout: &[u8]) -> Result<T, DecodeError> {
    let text = String::from_utf8_lossy(stdout);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(serde_json::from_str(trimmed)?)
}

/// Convert a human-readable size to MiB
///
/// `GB`/`GiB` multiply by 1024, `KB`/`KiB` divide by 1024, `MB`/`MiB` and
/// unit-less values are already MiB. Units are case-insensitive and all
/// multipliers are binary. Plain bytes (`B`) and `TB`/`TiB` are accepted
/// too; any other suffix, and any sign, yields `None`.
pub fn size_to_mib(value: &str) -> Option<f64> {
    let value = value.trim();
    let split = value
        .char_indices()
        .find(|&(_, c)| !(c.is_ascii_digit() || c == '.'))
        .map(|(i, _)| i)
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let number: f64 = number.parse().ok()?;

    let mib = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "mb" | "mib" => number,
        "gb" | "gib" => number * MIB_PER_GIB,
        "kb" | "kib" => number / KIB_PER_MIB,
        "tb" | "tib" => number * MIB_PER_GIB * MIB_PER_GIB,
        "b" => number / BYTES_PER_MIB,
        _ => return None,
    };
    Some(mib)
}

/// Parse `"12.5%"` into `12.5`
pub fn parse_percent(value: &str) -> Option<f64> {
    value.trim().trim_end_matches('%').trim().parse().ok()
}

/// Parse a `"used / limit"` memory pair into MiB values
pub fn parse_mem_usage(value: &str) -> (Option<f64>, Option<f64>) {
    let mut parts = value.splitn(2, '/');
    let used = parts.next().and_then(size_to_mib);
    let limit = parts.next().and_then(size_to_mib);
    (used, limit)
}

/// Parse an integer count such as the `PIDs` column
pub fn parse_count(value: &str) -> Option<u64> {
    value.trim().parse().ok()
}

fn truncate(line: &str, max: usize) -> &str {
    match line.char_indices().nth(max) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_size_to_mib_binary_units() {
        assert_eq!(size_to_mib("1GiB"), Some(1024.0));
        assert_eq!(size_to_mib("512MiB"), Some(512.0));
        assert_eq!(size_to_mib("204800KiB"), Some(200.0));
        assert_eq!(size_to_mib("256"), Some(256.0));
    }

    #[test]
    fn test_size_to_mib_decimal_suffixes_use_binary_multipliers() {
        assert_eq!(size_to_mib("1.5GB"), Some(1536.0));
        assert_eq!(size_to_mib("204800KB"), Some(200.0));
        assert_eq!(size_to_mib("64MB"), Some(64.0));
    }

    #[test]
    fn test_size_to_mib_case_and_whitespace() {
        assert_eq!(size_to_mib(" 2gib "), Some(2048.0));
        assert_eq!(size_to_mib("1024 kib"), Some(1.0));
        assert_eq!(size_to_mib("0B"), Some(0.0));
        assert_eq!(size_to_mib("1048576B"), Some(1.0));
    }

    #[test]
    fn test_size_to_mib_rejects_garbage() {
        assert_eq!(size_to_mib("--"), None);
        assert_eq!(size_to_mib(""), None);
        assert_eq!(size_to_mib("12parsecs"), None);
    }

    #[test]
    fn test_size_to_mib_rejects_signed_values() {
        assert_eq!(size_to_mib("-5MiB"), None);
        assert_eq!(size_to_mib("+5MiB"), None);
        assert_eq!(parse_mem_usage("-5MiB / 1GiB"), (None, Some(1024.0)));
    }

    #[test]
    fn test_parse_mem_usage_pair() {
        assert_eq!(
            parse_mem_usage("12.5MiB / 1.944GiB"),
            (Some(12.5), Some(1.944 * 1024.0))
        );
        assert_eq!(parse_mem_usage("-- / --"), (None, None));
        assert_eq!(parse_mem_usage("100MiB"), (Some(100.0), None));
    }

    #[test]
    fn test_parse_percent() {
        assert_eq!(parse_percent("0.15%"), Some(0.15));
        assert_eq!(parse_percent(" 100.00 % "), Some(100.0));
        assert_eq!(parse_percent("--"), None);
    }

    #[test]
    fn test_decode_line_rejects_malformed() {
        assert!(decode_line::<Value>(r#"{"ID": "a""#).is_none());
        assert!(decode_line::<Value>("WARNING: No swap limit support").is_none());
        assert_eq!(decode_line::<Value>(r#"{"ID":"a"}"#).unwrap()["ID"], "a");
    }

    #[test]
    fn test_decode_lines_skips_bad_lines_in_order() {
        let stdout = b"{\"n\":1}\nnot json\n\n{\"n\":2}\n{\"n\":\n{\"n\":3}\n";
        let decoded = decode_lines::<Value>(stdout);

        let ns: Vec<i64> = decoded
            .records
            .iter()
            .map(|v| v["n"].as_i64().unwrap())
            .collect();
        assert_eq!(ns, vec![1, 2, 3]);
        assert_eq!(decoded.malformed, 2);
    }

    #[test]
    fn test_decode_lines_handles_crlf_and_empty_output() {
        let decoded = decode_lines::<Value>(b"{\"n\":1}\r\n{\"n\":2}\r\n");
        assert_eq!(decoded.records.len(), 2);
        assert_eq!(decoded.malformed, 0);

        let empty = decode_lines::<Value>(b"");
        assert!(empty.records.is_empty());
        assert_eq!(empty.malformed, 0);
    }

    #[test]
    fn test_decode_document() {
        let env: Vec<String> =
            decode_document(b"[\"PATH=/usr/bin\",\"LANG=C.UTF-8\"]\n").unwrap();
        assert_eq!(env, vec!["PATH=/usr/bin", "LANG=C.UTF-8"]);

        assert!(matches!(
            decode_document::<Value>(b"Error: No such object"),
            Err(DecodeError::InvalidJson(_))
        ));
        assert!(matches!(
            decode_document::<Value>(b"  \n"),
            Err(DecodeError::Empty)
        ));
    }
}
