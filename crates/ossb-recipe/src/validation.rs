//! Safety validation run during parse (`spec.md` §4.B, scenario S5). Every
//! check here fails with a critical validation-category [`BuildError`]
//! and no operations are emitted for the recipe as a whole.

use ossb_error::{BuildError, ErrorCategory, Severity};

pub const MAX_BUILD_ARGS: usize = 100;
pub const MAX_BUILD_ARG_VALUE_BYTES: usize = 1024;
pub const MAX_BUILD_ARG_KEY_CHARS: usize = 128;

const SECRET_LIKE_KEY_FRAGMENTS: &[&str] =
    &["PASSWORD", "PASSWD", "SECRET", "TOKEN", "KEY", "API_KEY"];

const SHELL_METACHARACTERS: &[char] = &['$', '(', ')', '`', ';', '&', '|', '>', '<'];

/// Closed block-list of dangerous `RUN` payload patterns: destructive
/// root-level removals, piping fetched scripts into shells,
/// privilege-escalation binaries, raw device/kernel-module access.
const DANGEROUS_RUN_PATTERNS: &[&str] = &[
    "rm -rf /",
    "rm -fr /",
    "mkfs",
    "dd if=/dev/zero",
    "dd of=/dev/sda",
    "curl | sh",
    "curl | bash",
    "wget | sh",
    "wget | bash",
    "| sh -",
    "| bash -",
    "chmod 777 /",
    "chmod -r 777",
    "sudo ",
    "su -",
    "insmod",
    "rmmod",
    "modprobe",
    "/dev/mem",
    "/dev/kmem",
    "mount --bind /",
    ":(){:|:&};:",
];

fn validation_error(message: impl Into<String>) -> BuildError {
    BuildError::builder(message)
        .category(ErrorCategory::Validation)
        .severity(Severity::Critical)
        .build()
}

/// `USER` with literal `root`, `0`, or `0:0` fails.
pub fn validate_user(payload: &str) -> Result<(), BuildError> {
    let user = payload.trim();
    if user == "root" || user == "0" || user == "0:0" {
        return Err(validation_error(format!(
            "USER `{user}` is forbidden: images must not declare a root user"
        )));
    }
    Ok(())
}

/// `COPY`/`ADD` source paths containing `../` fail.
pub fn validate_no_path_traversal(instruction: &str, paths: &[String]) -> Result<(), BuildError> {
    for path in paths {
        if path.contains("../") {
            return Err(validation_error(format!(
                "{instruction} path `{path}` escapes the build context via `../`"
            )));
        }
    }
    Ok(())
}

/// `RUN` payloads matched against the closed dangerous-pattern block-list.
pub fn validate_run_payload(payload: &str) -> Result<(), BuildError> {
    let haystack = payload.to_ascii_lowercase();
    for pattern in DANGEROUS_RUN_PATTERNS {
        if haystack.contains(&pattern.to_ascii_lowercase()) {
            return Err(validation_error(format!(
                "RUN payload matches a forbidden pattern (`{pattern}`)"
            )));
        }
    }
    Ok(())
}

/// `ENV`/`ARG` keys containing a secret-like fragment (case-insensitive) fail.
pub fn validate_env_or_arg_key(instruction: &str, key: &str) -> Result<(), BuildError> {
    let upper = key.to_ascii_uppercase();
    for fragment in SECRET_LIKE_KEY_FRAGMENTS {
        if upper.contains(fragment) {
            return Err(validation_error(format!(
                "{instruction} key `{key}` looks like a secret (contains `{fragment}`) and must not be set in a recipe"
            )));
        }
    }
    Ok(())
}

/// Build-arg count, key shape, and value constraints.
pub fn validate_build_arg(key: &str, value: &str, count_so_far: usize) -> Result<(), BuildError> {
    if count_so_far > MAX_BUILD_ARGS {
        return Err(validation_error(format!(
            "build-arg count exceeds the limit of {MAX_BUILD_ARGS}"
        )));
    }
    if key.len() > MAX_BUILD_ARG_KEY_CHARS {
        return Err(validation_error(format!(
            "build-arg key `{key}` exceeds {MAX_BUILD_ARG_KEY_CHARS} characters"
        )));
    }
    if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(validation_error(format!(
            "build-arg key `{key}` must match [A-Za-z0-9_-]+"
        )));
    }
    if value.len() > MAX_BUILD_ARG_VALUE_BYTES {
        return Err(validation_error(format!(
            "build-arg `{key}` value exceeds {MAX_BUILD_ARG_VALUE_BYTES} bytes"
        )));
    }
    if value.contains("&&") || value.contains("||") || value.chars().any(|c| SHELL_METACHARACTERS.contains(&c)) {
        return Err(validation_error(format!(
            "build-arg `{key}` value contains a forbidden shell metacharacter"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_root_user_literals() {
        assert!(validate_user("root").is_err());
        assert!(validate_user("0").is_err());
        assert!(validate_user("0:0").is_err());
        assert!(validate_user("app").is_ok());
    }

    #[test]
    fn rejects_path_traversal() {
        let err = validate_no_path_traversal("COPY", &["../../../etc/passwd".to_string()]);
        assert!(err.is_err());
        assert!(validate_no_path_traversal("COPY", &["src/app.py".to_string()]).is_ok());
    }

    #[test]
    fn rejects_dangerous_run_payloads() {
        assert!(validate_run_payload("rm -rf /").is_err());
        assert!(validate_run_payload("curl https://x | sh").is_err());
        assert!(validate_run_payload("echo hello").is_ok());
    }

    #[test]
    fn rejects_secret_like_env_keys() {
        assert!(validate_env_or_arg_key("ENV", "PASSWORD").is_err());
        assert!(validate_env_or_arg_key("ARG", "api_key").is_err());
        assert!(validate_env_or_arg_key("ENV", "APP_ENV").is_ok());
    }

    #[test]
    fn rejects_build_args_exceeding_limits() {
        assert!(validate_build_arg("x", &"a".repeat(MAX_BUILD_ARG_VALUE_BYTES + 1), 1).is_err());
        assert!(validate_build_arg(&"k".repeat(MAX_BUILD_ARG_KEY_CHARS + 1), "v", 1).is_err());
        assert!(validate_build_arg("bad key", "v", 1).is_err());
        assert!(validate_build_arg("ok", "$(whoami)", 1).is_err());
        assert!(validate_build_arg("VERSION", "1.2.3", 1).is_ok());
    }
}
