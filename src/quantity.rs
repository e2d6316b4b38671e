//! Kubernetes `BinarySI`/`decimalSI` storage quantity parsing and rendering.
//!
//! Mirrors `convert_storage_to_bytes`/`convert_bytes_to_storage` from the
//! original Python implementation: suffix table first, decimal-exponent
//! fallback second, plain integer last.

use tracing::debug;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum QuantityError {
    #[error("'{0}' is not a valid Kubernetes storage quantity")]
    Format(String),
}

const KI: i64 = 1024;
const MI: i64 = 1024 * 1024;
const GI: i64 = 1024 * 1024 * 1024;
const TI: i64 = 1024_i64 * 1024 * 1024 * 1024;
const PI: i64 = 1024_i64 * 1024 * 1024 * 1024 * 1024;
const EI: i64 = 1024_i64 * 1024 * 1024 * 1024 * 1024 * 1024;

const K: i64 = 1_000;
const M: i64 = 1_000_000;
const G: i64 = 1_000_000_000;
const T: i64 = 1_000_000_000_000;
const P: i64 = 1_000_000_000_000_000;
const E: i64 = 1_000_000_000_000_000_000;

/// Parse a Kubernetes quantity string (e.g. `"10Gi"`, `"500M"`, `"12"`) into bytes.
pub fn parse_quantity(raw: &str) -> Result<i64, QuantityError> {
    let s = raw.trim();

    // BinarySI suffixes, longest match first so "Ki" isn't mistaken for "K".
    for (suffix, multiplier) in [
        ("Ki", KI),
        ("Mi", MI),
        ("Gi", GI),
        ("Ti", TI),
        ("Pi", PI),
        ("Ei", EI),
    ] {
        if let Some(prefix) = s.strip_suffix(suffix) {
            return parse_int_prefix(prefix, multiplier, raw);
        }
    }

    // decimalSI suffixes.
    for (suffix, multiplier) in [
        ("k", K),
        ("K", K),
        ("m", M),
        ("M", M),
        ("G", G),
        ("T", T),
        ("P", P),
        ("E", E),
    ] {
        if let Some(prefix) = s.strip_suffix(suffix) {
            return parse_int_prefix(prefix, multiplier, raw);
        }
    }

    // decimalExponent: an 'e'/'E' flanked by digits, e.g. "1.5e3".
    if contains_decimal_exponent(s) {
        let value: f64 = s.parse().map_err(|_| QuantityError::Format(raw.to_string()))?;
        return Ok(value.trunc() as i64);
    }

    s.parse::<i64>().map_err(|_| QuantityError::Format(raw.to_string()))
}

fn parse_int_prefix(prefix: &str, multiplier: i64, raw: &str) -> Result<i64, QuantityError> {
    let value: i64 = prefix
        .parse()
        .map_err(|_| QuantityError::Format(raw.to_string()))?;
    Ok(value * multiplier)
}

fn contains_decimal_exponent(s: &str) -> bool {
    for marker in ['e', 'E'] {
        if let Some(pos) = s.find(marker) {
            let before_digit = s[..pos].chars().last().map(|c| c.is_ascii_digit()).unwrap_or(false);
            let after_digit = s[pos + 1..].chars().next().map(|c| c.is_ascii_digit() || c == '-' || c == '+').unwrap_or(false);
            if before_digit && after_digit {
                return true;
            }
        }
    }
    false
}

/// Try rendering `bytes` as `count<suffix>` if it's within 10% of the exact value.
fn try_numeric_format(bytes: i64, size_multiplier: i64, suffix: &str) -> Option<String> {
    if bytes < size_multiplier - (size_multiplier as f64 * 0.1) as i64 {
        return None;
    }
    let rounded = (bytes as f64 / size_multiplier as f64).round() as i64;
    let retest = rounded * size_multiplier;
    let difference = (retest - bytes).abs();
    if (difference as f64) < (bytes as f64 * 0.1) {
        Some(format!("{}{}", rounded, suffix))
    } else {
        None
    }
}

/// Render bytes back into a human-readable Kubernetes-ish quantity string.
///
/// Lossy: `parse_quantity(render_quantity(x)) == x` only holds within the
/// 10% tolerance baked into [`try_numeric_format`].
pub fn render_quantity(bytes: i64) -> String {
    for (multiplier, suffix) in [(T, "T"), (G, "G"), (M, "M"), (TI, "Ti"), (GI, "Gi"), (MI, "Mi")] {
        if let Some(s) = try_numeric_format(bytes, multiplier, suffix) {
            debug!(bytes, rendered = %s, "rendered quantity");
            return s;
        }
    }
    bytes.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_binary_si_suffixes() {
        assert_eq!(parse_quantity("10Ki").unwrap(), 10 * KI);
        assert_eq!(parse_quantity("5Mi").unwrap(), 5 * MI);
        assert_eq!(parse_quantity("2Gi").unwrap(), 2 * GI);
        assert_eq!(parse_quantity("1Ti").unwrap(), TI);
    }

    #[test]
    fn parses_decimal_si_suffixes() {
        assert_eq!(parse_quantity("10k").unwrap(), 10 * K);
        assert_eq!(parse_quantity("10K").unwrap(), 10 * K);
        assert_eq!(parse_quantity("3G").unwrap(), 3 * G);
        assert_eq!(parse_quantity("2T").unwrap(), 2 * T);
    }

    #[test]
    fn parses_plain_integer() {
        assert_eq!(parse_quantity("123456").unwrap(), 123456);
        assert_eq!(parse_quantity("0").unwrap(), 0);
    }

    #[test]
    fn parses_decimal_exponent() {
        assert_eq!(parse_quantity("1e3").unwrap(), 1000);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_quantity("not-a-size").is_err());
        assert!(parse_quantity("").is_err());
    }

    #[test]
    fn renders_round_values() {
        assert_eq!(render_quantity(10_000_000_000), "10G");
        assert_eq!(render_quantity(1_073_741_824), "1Gi");
        assert_eq!(render_quantity(42), "42");
    }

    #[test]
    fn render_parse_round_trip_within_tolerance() {
        let original = 12_000_000_000_i64;
        let rendered = render_quantity(original);
        let parsed = parse_quantity(&rendered).unwrap();
        let diff = (parsed - original).abs() as f64;
        assert!(diff < original as f64 * 0.1);
    }
}
