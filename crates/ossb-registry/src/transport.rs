//! Transport selection (`spec.md` §4.F): `localhost`/`127.0.0.1` talk
//! plain HTTP, everything else HTTPS, unless the caller's insecure list
//! overrides it. Strict mode forbids that override outright.

use ossb_error::{BuildError, ErrorCategory, Severity};

/// Build-config-level validation: in strict mode a non-empty insecure
/// list is itself a configuration error, checked once up front rather
/// than at each request.
pub fn validate_insecure_list(insecure_registries: &[String], strict_mode: bool) -> Result<(), BuildError> {
    if strict_mode && !insecure_registries.is_empty() {
        return Err(BuildError::builder(
            "insecure-registry list is forbidden in strict mode",
        )
        .category(ErrorCategory::Configuration)
        .severity(Severity::Critical)
        .retryable(false)
        .build());
    }
    Ok(())
}

fn is_loopback(host: &str) -> bool {
    let bare = host.split(':').next().unwrap_or(host);
    bare == "localhost" || bare == "127.0.0.1"
}

/// Chooses `http` or `https` for `host` (the display/registry host, not
/// yet wire-rewritten). `insecure_registries` is an explicit caller
/// override checked in addition to the loopback default.
pub fn scheme_for_host(host: &str, insecure_registries: &[String]) -> &'static str {
    if is_loopback(host) || insecure_registries.iter().any(|h| h == host) {
        "http"
    } else {
        "https"
    }
}

/// Full base URL (`scheme://wire_host`) a request should be built from.
pub fn base_url(wire_host: &str, display_host: &str, insecure_registries: &[String]) -> String {
    let scheme = scheme_for_host(display_host, insecure_registries);
    format!("{scheme}://{wire_host}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_hosts_use_http() {
        assert_eq!(scheme_for_host("localhost", &[]), "http");
        assert_eq!(scheme_for_host("127.0.0.1", &[]), "http");
        assert_eq!(scheme_for_host("localhost:5000", &[]), "http");
    }

    #[test]
    fn other_hosts_use_https_unless_listed_insecure() {
        assert_eq!(scheme_for_host("registry.example.com", &[]), "https");
        assert_eq!(
            scheme_for_host("registry.example.com", &["registry.example.com".to_string()]),
            "http"
        );
    }

    #[test]
    fn strict_mode_rejects_nonempty_insecure_list() {
        assert!(validate_insecure_list(&[], true).is_ok());
        assert!(validate_insecure_list(&["x".to_string()], true).is_err());
        assert!(validate_insecure_list(&["x".to_string()], false).is_ok());
    }
}
