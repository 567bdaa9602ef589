//! Name validation utilities.
//!
//! Pool and node names come from cluster resource names, so they follow the
//! DNS-1123 subdomain rules.

use regex::Regex;
use std::sync::OnceLock;

/// Maximum length of a DNS-1123 subdomain
const DNS1123_SUBDOMAIN_MAX_LEN: usize = 253;

fn dns1123_subdomain_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
            .expect("static regex is valid")
    })
}

/// Validate a resource name (pool or node) as a DNS-1123 subdomain
///
/// # Examples
/// ```
/// use ipam_node::utils::validation::validate_resource_name;
///
/// assert!(validate_resource_name("pool-a").is_ok());
/// assert!(validate_resource_name("Pool_A").is_err());
/// ```
pub fn validate_resource_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name cannot be empty".to_string());
    }
    if name.len() > DNS1123_SUBDOMAIN_MAX_LEN {
        return Err(format!(
            "name '{}' is longer than {} characters",
            name, DNS1123_SUBDOMAIN_MAX_LEN
        ));
    }
    if !dns1123_subdomain_regex().is_match(name) {
        return Err(format!(
            "name '{}' must consist of lower case alphanumeric characters, '-' or '.', \
             and must start and end with an alphanumeric character",
            name
        ));
    }
    Ok(())
}
