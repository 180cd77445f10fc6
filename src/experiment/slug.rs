//! Slug derivation

/// Normalize a human-readable name into a filesystem-safe slug.
///
/// Lowercases ASCII alphanumerics; every run of other characters becomes a
/// single hyphen; leading and trailing hyphens are dropped.
///
/// ```
/// use ox_lab::experiment::slugify;
///
/// assert_eq!(slugify("Sparse Attention"), "sparse-attention");
/// assert_eq!(slugify("  LR_sweep (v2) "), "lr-sweep-v2");
/// ```
#[must_use]
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

/// The `attempt`-th candidate for `base`: `base`, `base-2`, `base-3`, ...
pub(crate) fn candidate(base: &str, attempt: usize) -> String {
    if attempt <= 1 {
        base.to_string()
    } else {
        format!("{base}-{attempt}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_collapses_separators() {
        assert_eq!(slugify("run-a"), "run-a");
        assert_eq!(slugify("Run   A"), "run-a");
        assert_eq!(slugify("--x__y--"), "x-y");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_candidate_suffixes() {
        assert_eq!(candidate("run-a", 1), "run-a");
        assert_eq!(candidate("run-a", 2), "run-a-2");
    }
}
