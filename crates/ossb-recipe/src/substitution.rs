//! Build-arg substitution (`spec.md` §4.B): `${NAME}` and `$NAME` expand
//! against the merged scope of recipe `ARG` defaults overridden by
//! caller-supplied build args. Undefined names expand to empty and emit
//! a warning rather than failing. Substitution does not recurse inside
//! single-quoted strings.

use std::collections::BTreeMap;

/// Expands build-arg references in `payload`. Returns the expanded text
/// and any "undefined build arg" warnings produced.
pub fn substitute(payload: &str, scope: &BTreeMap<String, String>) -> (String, Vec<String>) {
    let mut out = String::with_capacity(payload.len());
    let mut warnings = Vec::new();
    let mut in_single_quote = false;
    let chars: Vec<char> = payload.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '\'' {
            in_single_quote = !in_single_quote;
            out.push(c);
            i += 1;
            continue;
        }

        if in_single_quote || c != '$' {
            out.push(c);
            i += 1;
            continue;
        }

        // c == '$' and not inside single quotes.
        if i + 1 < chars.len() && chars[i + 1] == '{' {
            if let Some(close) = chars[i + 2..].iter().position(|&ch| ch == '}') {
                let name: String = chars[i + 2..i + 2 + close].iter().collect();
                append_value(&name, scope, &mut out, &mut warnings);
                i = i + 2 + close + 1;
                continue;
            }
            out.push(c);
            i += 1;
            continue;
        }

        let name_start = i + 1;
        let mut name_end = name_start;
        while name_end < chars.len() && is_name_char(chars[name_end]) {
            name_end += 1;
        }
        if name_end == name_start {
            out.push(c);
            i += 1;
            continue;
        }
        let name: String = chars[name_start..name_end].iter().collect();
        append_value(&name, scope, &mut out, &mut warnings);
        i = name_end;
    }

    (out, warnings)
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn append_value(name: &str, scope: &BTreeMap<String, String>, out: &mut String, warnings: &mut Vec<String>) {
    match scope.get(name) {
        Some(value) => out.push_str(value),
        None => warnings.push(format!("undefined build arg `{name}` expands to empty")),
    }
}
