//! Minimal Kubernetes resource-quantity parsing: just enough to compare two
//! storage sizes, not a general-purpose quantity library.

/// Parses a Kubernetes resource quantity string into a byte count. Supports
/// the binary (`Ki`, `Mi`, ...) and decimal (`k`, `M`, ...) suffix families;
/// returns `None` for anything that doesn't parse as `<number><suffix>`.
pub fn parse_bytes(s: &str) -> Option<f64> {
    let idx = s.find(|c: char| !c.is_ascii_digit() && c != '.' && c != '-' && c != '+');
    let (number, suffix) = match idx {
        Some(i) => s.split_at(i),
        None => (s, ""),
    };
    let value: f64 = number.parse().ok()?;
    let multiplier = match suffix {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" | "K" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        _ => return None,
    };
    Some(value * multiplier)
}

/// True when `desired` is a strictly smaller quantity than `current` — the
/// storage-shrink condition the `DocumentDB` reconciler rejects rather than
/// ever shrinking (or deleting the PVC behind) the downstream PG cluster.
/// Unparseable inputs are never treated as a shrink: comparing apples to
/// oranges is a validation concern the Kubernetes API's own schema
/// already guards against, not something to guess at here.
pub fn is_storage_shrink(current: &str, desired: &str) -> bool {
    match (parse_bytes(current), parse_bytes(desired)) {
        (Some(cur), Some(des)) => des < cur,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_binary_and_decimal_suffixes() {
        assert_eq!(parse_bytes("10Gi"), Some(10.0 * 1024f64.powi(3)));
        assert_eq!(parse_bytes("1k"), Some(1000.0));
        assert_eq!(parse_bytes("512"), Some(512.0));
    }

    #[test]
    fn smaller_quantity_is_a_shrink() {
        assert!(is_storage_shrink("10Gi", "5Gi"));
        assert!(!is_storage_shrink("10Gi", "10Gi"));
        assert!(!is_storage_shrink("10Gi", "20Gi"));
    }

    #[test]
    fn unparseable_inputs_are_never_treated_as_a_shrink() {
        assert!(!is_storage_shrink("garbage", "5Gi"));
        assert!(!is_storage_shrink("10Gi", "garbage"));
    }
}
