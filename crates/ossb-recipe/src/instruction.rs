//! Parsing of individual instruction payloads into typed shapes, once the
//! lexer has already split a logical line into instruction + payload.

use ossb_error::{BuildError, ErrorCategory, Severity};

fn parse_error(message: impl Into<String>) -> BuildError {
    BuildError::builder(message)
        .category(ErrorCategory::Validation)
        .severity(Severity::Critical)
        .build()
}

/// The closed instruction set recognized by `spec.md` §4.B.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionKind {
    From,
    Run,
    Cmd,
    Label,
    Expose,
    Env,
    Add,
    Copy,
    Entrypoint,
    Volume,
    User,
    Workdir,
    Arg,
    OnBuild,
    StopSignal,
    Healthcheck,
    Shell,
}

impl InstructionKind {
    pub fn parse(word: &str) -> Option<Self> {
        Some(match word {
            "FROM" => Self::From,
            "RUN" => Self::Run,
            "CMD" => Self::Cmd,
            "LABEL" => Self::Label,
            "EXPOSE" => Self::Expose,
            "ENV" => Self::Env,
            "ADD" => Self::Add,
            "COPY" => Self::Copy,
            "ENTRYPOINT" => Self::Entrypoint,
            "VOLUME" => Self::Volume,
            "USER" => Self::User,
            "WORKDIR" => Self::Workdir,
            "ARG" => Self::Arg,
            "ONBUILD" => Self::OnBuild,
            "STOPSIGNAL" => Self::StopSignal,
            "HEALTHCHECK" => Self::Healthcheck,
            "SHELL" => Self::Shell,
            _ => return None,
        })
    }
}

/// Parsed `FROM <image> [AS <name>]` payload.
pub struct FromClause {
    pub image: String,
    pub stage_name: Option<String>,
}

pub fn parse_from(payload: &str) -> Result<FromClause, BuildError> {
    let mut parts = payload.split_whitespace();
    let Some(image) = parts.next() else {
        return Err(parse_error("FROM requires an image reference"));
    };
    let stage_name = match parts.next() {
        Some(as_kw) if as_kw.eq_ignore_ascii_case("AS") => {
            let name = parts
                .next()
                .ok_or_else(|| parse_error("FROM ... AS requires a stage name"))?;
            Some(name.to_string())
        }
        Some(other) => return Err(parse_error(format!("unexpected token after FROM image: `{other}`"))),
        None => None,
    };
    Ok(FromClause {
        image: image.to_string(),
        stage_name,
    })
}

/// Parsed `COPY`/`ADD` payload: optional `--from=`, `--chown=`, `--chmod=`
/// flags, one or more sources, and a destination.
pub struct FileClause {
    pub from_stage: Option<String>,
    pub chown: Option<(u32, u32)>,
    pub chmod: Option<u32>,
    pub srcs: Vec<String>,
    pub dst: String,
}

pub fn parse_file_clause(instruction: &str, payload: &str) -> Result<FileClause, BuildError> {
    let mut from_stage = None;
    let mut chown = None;
    let mut chmod = None;
    let mut rest: Vec<&str> = Vec::new();

    for token in payload.split_whitespace() {
        if let Some(value) = token.strip_prefix("--from=") {
            from_stage = Some(value.to_string());
        } else if let Some(value) = token.strip_prefix("--chown=") {
            chown = Some(parse_chown(value)?);
        } else if let Some(value) = token.strip_prefix("--chmod=") {
            chmod = Some(parse_chmod(value)?);
        } else if token.starts_with("--") {
            return Err(parse_error(format!("{instruction}: unrecognized flag `{token}`")));
        } else {
            rest.push(token);
        }
    }

    if rest.len() < 2 {
        return Err(parse_error(format!(
            "{instruction} requires at least one source and a destination"
        )));
    }
    let dst = rest.pop().unwrap().to_string();
    let srcs = rest.into_iter().map(str::to_string).collect();

    Ok(FileClause {
        from_stage,
        chown,
        chmod,
        srcs,
        dst,
    })
}

fn parse_chown(value: &str) -> Result<(u32, u32), BuildError> {
    let (uid_s, gid_s) = value
        .split_once(':')
        .ok_or_else(|| parse_error(format!("--chown must be uid:gid, got `{value}`")))?;
    let uid = uid_s
        .parse::<u32>()
        .map_err(|_| parse_error(format!("--chown uid `{uid_s}` is not numeric")))?;
    let gid = gid_s
        .parse::<u32>()
        .map_err(|_| parse_error(format!("--chown gid `{gid_s}` is not numeric")))?;
    Ok((uid, gid))
}

fn parse_chmod(value: &str) -> Result<u32, BuildError> {
    u32::from_str_radix(value, 8).map_err(|_| parse_error(format!("--chmod `{value}` is not a valid octal mode")))
}

/// Parsed `ENV`/`LABEL`/`ARG` key-value payload: `KEY=VALUE` or (for ENV
/// and LABEL only) the legacy `KEY VALUE` form, one pair per line.
pub fn parse_key_value(payload: &str) -> Result<(String, String), BuildError> {
    if let Some((key, value)) = payload.split_once('=') {
        return Ok((key.trim().to_string(), unquote(value.trim())));
    }
    let mut parts = payload.splitn(2, char::is_whitespace);
    let key = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| parse_error("expected KEY=VALUE or KEY VALUE"))?;
    let value = parts.next().unwrap_or("").trim();
    Ok((key.to_string(), unquote(value)))
}

/// `ARG NAME[=default]`.
pub fn parse_arg_decl(payload: &str) -> (String, Option<String>) {
    match payload.split_once('=') {
        Some((name, default)) => (name.trim().to_string(), Some(unquote(default.trim()))),
        None => (payload.trim().to_string(), None),
    }
}

fn unquote(s: &str) -> String {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 && ((bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"') || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\'')) {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

/// Parses a CMD/ENTRYPOINT/SHELL payload: JSON-array exec form
/// (`["a", "b"]`) or shell form (split on whitespace, wrapped as
/// `/bin/sh -c <payload>` by the caller if desired).
pub fn parse_argv(payload: &str) -> Vec<String> {
    let trimmed = payload.trim();
    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        let inner = &trimmed[1..trimmed.len() - 1];
        return inner
            .split(',')
            .map(|item| unquote(item.trim()))
            .filter(|item| !item.is_empty())
            .collect();
    }
    trimmed.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_from_with_stage_name() {
        let clause = parse_from("golang:1.22 AS builder").unwrap();
        assert_eq!(clause.image, "golang:1.22");
        assert_eq!(clause.stage_name.as_deref(), Some("builder"));
    }

    #[test]
    fn parses_from_without_stage_name() {
        let clause = parse_from("scratch").unwrap();
        assert_eq!(clause.image, "scratch");
        assert!(clause.stage_name.is_none());
    }

    #[test]
    fn parses_copy_with_flags() {
        let clause = parse_file_clause("COPY", "--from=builder --chown=1000:1000 /app/bin /usr/local/bin").unwrap();
        assert_eq!(clause.from_stage.as_deref(), Some("builder"));
        assert_eq!(clause.chown, Some((1000, 1000)));
        assert_eq!(clause.srcs, vec!["/app/bin".to_string()]);
        assert_eq!(clause.dst, "/usr/local/bin");
    }

    #[test]
    fn parses_key_value_forms() {
        assert_eq!(parse_key_value("FOO=bar").unwrap(), ("FOO".into(), "bar".into()));
        assert_eq!(parse_key_value("FOO bar baz").unwrap(), ("FOO".into(), "bar baz".into()));
    }

    #[test]
    fn parses_exec_and_shell_argv() {
        assert_eq!(parse_argv(r#"["/bin/sh", "-c", "echo hi"]"#), vec!["/bin/sh", "-c", "echo hi"]);
        assert_eq!(parse_argv("echo hi"), vec!["echo", "hi"]);
    }
}
