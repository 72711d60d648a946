//! Product version gate
//!
//! Some steps ship two handler variants; which one runs depends on the
//! configured product version compared against a fixed cutover.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// First product version that uses the new step variants
pub const CUTOVER_VERSION: &str = "6.2.1";

/// Dotted numeric version, compared component by component
#[derive(Debug, Clone)]
pub struct ProductVersion {
    components: Vec<u32>,
}

impl ProductVersion {
    pub fn components(&self) -> &[u32] {
        &self.components
    }

    fn component(&self, idx: usize) -> u32 {
        self.components.get(idx).copied().unwrap_or(0)
    }
}

/// Error for a version string with no leading digits at all
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not a product version: {0:?}")]
pub struct InvalidVersion(pub String);

impl FromStr for ProductVersion {
    type Err = InvalidVersion;

    /// Accepts `6.2`, `v6.2.1`, `6.2.1-rc1` (patch 1). Each component
    /// contributes its leading digits; the first component must have some.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let body = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);

        let mut components = Vec::new();
        for part in body.split('.') {
            let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
            if digits.is_empty() {
                break;
            }
            match digits.parse::<u32>() {
                Ok(n) => components.push(n),
                Err(_) => return Err(InvalidVersion(s.to_string())),
            }
            // Anything after a suffix like "-rc1" is not part of the number.
            if digits.len() != part.len() {
                break;
            }
        }

        if components.is_empty() {
            return Err(InvalidVersion(s.to_string()));
        }
        Ok(Self { components })
    }
}

impl PartialEq for ProductVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ProductVersion {}

impl PartialOrd for ProductVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ProductVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        for idx in 0..len {
            match self.component(idx).cmp(&other.component(idx)) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl fmt::Display for ProductVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.components.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

/// Whether `configured` is at or past the cutover.
///
/// An unparsable version keeps the legacy behavior.
pub fn uses_new_variant(configured: &str) -> bool {
    let cutover: ProductVersion = CUTOVER_VERSION.parse().expect("cutover constant parses");
    match configured.parse::<ProductVersion>() {
        Ok(version) => version >= cutover,
        Err(e) => {
            warn!("{}; using legacy step variants", e);
            false
        }
    }
}

/// Pick `new` for versions `>= CUTOVER_VERSION`, else `legacy`
pub fn select_variant<T>(configured: &str, legacy: T, new: T) -> T {
    if uses_new_variant(configured) {
        new
    } else {
        legacy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_variant_boundaries() {
        assert_eq!(select_variant("6.2.0", "L", "N"), "L");
        assert_eq!(select_variant("6.2.1", "L", "N"), "N");
        assert_eq!(select_variant("6.10.0", "L", "N"), "N");
        assert_eq!(select_variant("7", "L", "N"), "N");
        assert_eq!(select_variant("5.99.99", "L", "N"), "L");
    }

    #[test]
    fn test_component_wise_not_lexical() {
        let a: ProductVersion = "6.10.0".parse().unwrap();
        let b: ProductVersion = "6.2.1".parse().unwrap();
        assert!(a > b);
        // The lexical order is the opposite.
        assert!("6.10.0" < "6.2.1");
    }

    #[test]
    fn test_parse_forms() {
        let v: ProductVersion = "v6.2.1-rc1".parse().unwrap();
        assert_eq!(v.components(), &[6, 2, 1]);
        let v: ProductVersion = " 6.2 ".parse().unwrap();
        assert_eq!(v, "6.2.0".parse().unwrap());
        assert!("latest".parse::<ProductVersion>().is_err());
        assert!("".parse::<ProductVersion>().is_err());
    }

    #[test]
    fn test_unparsable_falls_back_to_legacy() {
        assert_eq!(select_variant("garbage", 1, 2), 1);
    }
}
