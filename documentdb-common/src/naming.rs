//! Deterministic cross-cluster service-name derivation.
//!
//! Cross-cluster service names are never persisted — every member of the
//! fleet rebuilds the same name from `(source, target, resource_group)` on
//! every reconcile, so a restart can never desync from what was already
//! applied to the API server.

/// Label applied to the downstream PG-Operator Cluster so out-of-process
/// plugins (which only ever see the Cluster/Pod, never the `DocumentDB`)
/// can recover this cluster's fleet replication role without a second RPC.
pub const REPLICATION_ROLE_LABEL: &str = "documentdb.microsoft.com/replication-role";

const DNS_LABEL_MAX: usize = 63;
/// Reserved for the two hyphens joining source, target, and the
/// resource-group suffix that callers append to the result of
/// [`generate_service_name`] when building the full external-cluster host.
const SEPARATORS: usize = 2;

/// Formats `"<source>-<target>"`, truncating both inputs by equal amounts
/// when the combined length (plus the two separators and `resource_group`)
/// would exceed the 63-character DNS label limit.
///
/// When an odd number of characters must be removed, the longer of the two
/// inputs absorbs the extra character; if that input is too short to absorb
/// the whole overflow, the remainder falls back to the other input.
pub fn generate_service_name(source: &str, target: &str, resource_group: &str) -> String {
    let max_combined = DNS_LABEL_MAX
        .saturating_sub(resource_group.len())
        .saturating_sub(SEPARATORS);
    let combined = source.len() + target.len();

    if combined <= max_combined {
        return format!("{source}-{target}");
    }

    let overflow = combined - max_combined;
    let trim_each = overflow.div_ceil(2);

    let (src_trim, tgt_trim) = if source.len() < trim_each {
        (source.len(), trim_each + (trim_each - source.len()))
    } else if target.len() < trim_each {
        (trim_each + (trim_each - target.len()), target.len())
    } else {
        (trim_each, trim_each)
    };

    let src_keep = source.len().saturating_sub(src_trim);
    let tgt_keep = target.len().saturating_sub(tgt_trim);
    format!("{}-{}", &source[..src_keep], &target[..tgt_keep])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untruncated_when_within_budget() {
        // len(source) + len(target) + len(rg) + 2 == 63 exactly.
        let rg = "rg"; // 2 chars
        // budget = 63 - 2 - 2 = 59, so source(30) + target(29) == 59
        let source = "a".repeat(30);
        let target = "b".repeat(29);
        let result = generate_service_name(&source, &target, rg);
        assert_eq!(result, format!("{source}-{target}"));
    }

    #[test]
    fn truncated_by_two_when_one_char_over_budget() {
        let rg = "rg"; // budget = 59
        let source = "a".repeat(30);
        let target = "b".repeat(30); // combined = 60, one over budget
        let result = generate_service_name(&source, &target, rg);
        let (src_part, tgt_part) = result.split_once('-').unwrap();
        // one character trimmed off of each side: total shortening of 2
        assert_eq!(src_part.len(), 29);
        assert_eq!(tgt_part.len(), 29);
    }

    #[test]
    fn result_always_fits_dns_label_budget() {
        let rg = "us-east-resource-group";
        let source = "a".repeat(60);
        let target = "b".repeat(60);
        let result = generate_service_name(&source, &target, rg);
        let budget = DNS_LABEL_MAX - rg.len() - SEPARATORS;
        assert!(result.len() <= budget);
    }

    #[test]
    fn distinct_pairs_of_equal_length_yield_distinct_names() {
        let rg = "rg";
        let a = generate_service_name("clusterA", "clusterB", rg);
        let b = generate_service_name("clusterC", "clusterD", rg);
        assert_ne!(a, b);
    }

    #[test]
    fn reversed_pair_yields_a_different_name_unless_equal() {
        let rg = "rg";
        let forward = generate_service_name("alpha", "beta", rg);
        let reverse = generate_service_name("beta", "alpha", rg);
        assert_ne!(forward, reverse);
        let same = generate_service_name("alpha", "alpha", rg);
        assert_eq!(same, "alpha-alpha");
    }
}
