// ============================================================
// Layer 3 — Angle Definitions
// ============================================================
// Each dataset featurisation scheme fixes how many channels a
// residue has and which of them are angles (radians, compared
// modulo 2π). Older bundles only record the scheme name, so the
// per-channel flags are rebuilt from this table on restore.

use crate::domain::error::DiffusionError;

/// Featurisation schemes recorded as `angles_definitions`.
const ANGLE_DEFINITIONS: &[(&str, &[bool])] = &[
    (
        "canonical",
        &[false, false, false, true, true, true, true, true, true],
    ),
    ("canonical-full-angles", &[true, true, true, true, true, true]),
    ("canonical-minimal-angles", &[true, true, true, true]),
    ("cart-coords", &[false, false, false]),
];

/// Look up the per-channel angular flags for a named scheme.
pub fn ft_is_angular_for(definition: &str) -> Result<Vec<bool>, DiffusionError> {
    ANGLE_DEFINITIONS
        .iter()
        .find(|(name, _)| *name == definition)
        .map(|(_, flags)| flags.to_vec())
        .ok_or_else(|| {
            DiffusionError::Config(format!("unknown angles definition: {definition}"))
        })
}

/// All known scheme names, for CLI help and error messages.
pub fn known_definitions() -> Vec<&'static str> {
    ANGLE_DEFINITIONS.iter().map(|(name, _)| *name).collect()
}

/// Default channel names when none are supplied: ft0, ft1, ...
pub fn default_feature_names(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("ft{i}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_table() {
        let canonical = ft_is_angular_for("canonical").unwrap();
        assert_eq!(canonical.len(), 9);
        assert_eq!(canonical.iter().filter(|a| **a).count(), 6);
        assert_eq!(ft_is_angular_for("canonical-full-angles").unwrap(), vec![true; 6]);
        assert_eq!(ft_is_angular_for("canonical-minimal-angles").unwrap(), vec![true; 4]);
        assert_eq!(ft_is_angular_for("cart-coords").unwrap(), vec![false; 3]);
    }

    #[test]
    fn test_unknown_definition() {
        let err = ft_is_angular_for("torsions-only").unwrap_err();
        assert!(matches!(err, DiffusionError::Config(_)));
    }

    #[test]
    fn test_default_names() {
        assert_eq!(default_feature_names(3), vec!["ft0", "ft1", "ft2"]);
        assert!(known_definitions().contains(&"cart-coords"));
    }
}
