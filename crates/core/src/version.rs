use once_cell::sync::Lazy;
use regex::Regex;

/// Versions this operator knows how to install.
pub const SUPPORTED_VERSION_PATTERN: &str = "^2.*";

static SUPPORTED: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(SUPPORTED_VERSION_PATTERN).ok());

/// Anchored match against the supported-major pattern. `"v2"` is rejected.
pub fn is_supported(version: &str) -> bool {
    SUPPORTED.as_ref().map(|re| re.is_match(version)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_dot_x_is_supported() {
        for v in ["2.8.1", "2", "2.0.0-rc1", "2.11"] {
            assert!(is_supported(v), "{v} should be supported");
        }
    }

    #[test]
    fn others_are_rejected() {
        for v in ["1.9.0", "", "v2", "1.0.0", " 2.8.1", "stable-2.8.1"] {
            assert!(!is_supported(v), "{v:?} should be rejected");
        }
    }
}
