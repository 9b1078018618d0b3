//! Semantic version ordering over dotted numeric components with an optional leading `v`, used to
//! decide whether an agent predates the new upgrade mechanism (§4.7).

/// Parses a version string like `v3.13.1` or `4.0.0` into its numeric components.
fn components(version: &str) -> Vec<u64> {
    version
        .trim_start_matches('v')
        .trim_start_matches('V')
        .split('.')
        .map(|part| part.parse::<u64>().unwrap_or(0))
        .collect()
}

/// Returns true if `version` is strictly less than `threshold` under dotted-numeric ordering.
/// Missing trailing components compare as zero, so `3.13` < `3.13.1`.
pub fn is_legacy(version: &str, threshold: &str) -> bool {
    let a = components(version);
    let b = components(threshold);
    let len = a.len().max(b.len());

    for i in 0..len {
        let av = a.get(i).copied().unwrap_or(0);
        let bv = b.get(i).copied().unwrap_or(0);
        if av != bv {
            return av < bv;
        }
    }
    false
}
