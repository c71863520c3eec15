//! Naming rules for trait and resource class symbols.
//!
//! Both namespaces share the same shape: uppercase ASCII, digits, and
//! underscores. Standard symbols are defined by the service; user-defined
//! symbols must carry the `CUSTOM_` prefix so they can never collide with
//! a standard symbol added later.

/// Prefix reserved for user-defined traits and resource classes.
pub const CUSTOM_PREFIX: &str = "CUSTOM_";

/// Maximum length for a trait or resource class symbol.
pub const MAX_SYMBOL_LEN: usize = 255;

/// Returns true if `name` is a well-formed symbol: nonempty, at most
/// [`MAX_SYMBOL_LEN`] bytes, `[A-Z0-9_]` only.
pub fn is_valid_symbol(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_SYMBOL_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
}

/// Returns true if `name` is in the user-defined namespace.
pub fn is_custom(name: &str) -> bool {
    name.starts_with(CUSTOM_PREFIX)
}

/// Validate a trait name for provider trait sets.
///
/// Standard traits are accepted as-is (callers own the catalog); customs
/// must be well-formed and carry the `CUSTOM_` prefix with a nonempty rest.
pub fn validate_trait(name: &str) -> Result<(), String> {
    if !is_valid_symbol(name) {
        return Err(format!("malformed trait name: {name:?}"));
    }
    if is_custom(name) && name.len() == CUSTOM_PREFIX.len() {
        return Err(format!("custom trait has empty suffix: {name:?}"));
    }
    Ok(())
}

/// Validate a resource class symbol.
pub fn validate_resource_class(name: &str) -> Result<(), String> {
    if !is_valid_symbol(name) {
        return Err(format!("malformed resource class: {name:?}"));
    }
    if is_custom(name) && name.len() == CUSTOM_PREFIX.len() {
        return Err(format!("custom resource class has empty suffix: {name:?}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_symbols_are_valid() {
        assert!(is_valid_symbol("VCPU"));
        assert!(is_valid_symbol("MEMORY_MB"));
        assert!(is_valid_symbol("SRIOV_NET_VF"));
    }

    #[test]
    fn rejects_lowercase_and_punctuation() {
        assert!(!is_valid_symbol("vcpu"));
        assert!(!is_valid_symbol("MEMORY-MB"));
        assert!(!is_valid_symbol(""));
        assert!(!is_valid_symbol("DISK GB"));
    }

    #[test]
    fn custom_prefix_detection() {
        assert!(is_custom("CUSTOM_FPGA"));
        assert!(!is_custom("VCPU"));
    }

    #[test]
    fn custom_needs_nonempty_suffix() {
        assert!(validate_trait("CUSTOM_FPGA").is_ok());
        assert!(validate_trait("CUSTOM_").is_err());
        assert!(validate_resource_class("CUSTOM_").is_err());
    }

    #[test]
    fn overlong_symbol_rejected() {
        let long = "A".repeat(MAX_SYMBOL_LEN + 1);
        assert!(!is_valid_symbol(&long));
    }
}
