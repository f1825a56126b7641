//! Line-oriented tokenizer (`spec.md` §4.B): joins backslash-continued
//! lines, drops comments and blank lines, and splits each logical line
//! into an instruction keyword and its raw payload.

use thiserror::Error;

pub const MAX_RECIPE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LexError {
    #[error("recipe exceeds the 10 MiB size limit ({0} bytes)")]
    TooLarge(usize),
    #[error("line {0}: empty instruction")]
    EmptyInstruction(usize),
}

/// One logical (continuation-joined) line of recipe text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    /// 1-based line number of the first physical line this logical line
    /// started on, for error reporting.
    pub line_no: usize,
    pub instruction: String,
    pub payload: String,
}

/// Splits `text` into logical lines, joining backslash continuations and
/// skipping comments (`#…`) and blank lines.
pub fn lex(text: &str) -> Result<Vec<RawLine>, LexError> {
    if text.len() > MAX_RECIPE_BYTES {
        return Err(LexError::TooLarge(text.len()));
    }

    let mut lines = Vec::new();
    let mut pending = String::new();
    let mut pending_start: Option<usize> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed_end = raw.trim_end_matches(['\r']);

        if pending.is_empty() {
            let trimmed = trimmed_end.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            pending_start = Some(line_no);
        }

        if let Some(stripped) = trimmed_end.strip_suffix('\\') {
            pending.push_str(stripped);
            pending.push(' ');
            continue;
        }

        pending.push_str(trimmed_end);
        let joined = std::mem::take(&mut pending);
        let start = pending_start.take().unwrap_or(line_no);
        lines.push(split_instruction(&joined, start)?);
    }

    if !pending.is_empty() {
        let start = pending_start.unwrap_or(lines.len() + 1);
        lines.push(split_instruction(&pending, start)?);
    }

    Ok(lines)
}

fn split_instruction(joined: &str, line_no: usize) -> Result<RawLine, LexError> {
    let trimmed = joined.trim();
    let (instruction, payload) = match trimmed.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim_start()),
        None => (trimmed, ""),
    };
    if instruction.is_empty() {
        return Err(LexError::EmptyInstruction(line_no));
    }
    Ok(RawLine {
        line_no,
        instruction: instruction.to_ascii_uppercase(),
        payload: payload.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_comments_and_blank_lines() {
        let text = "# a comment\n\nFROM scratch\n";
        let lines = lex(text).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].instruction, "FROM");
        assert_eq!(lines[0].payload, "scratch");
    }

    #[test]
    fn joins_backslash_continuation() {
        let text = "RUN echo a \\\n    && echo b\n";
        let lines = lex(text).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].instruction, "RUN");
        assert!(lines[0].payload.contains("echo a") && lines[0].payload.contains("echo b"));
    }

    #[test]
    fn rejects_oversized_recipe() {
        let text = "a".repeat(MAX_RECIPE_BYTES + 1);
        assert_eq!(lex(&text), Err(LexError::TooLarge(text.len())));
    }

    #[test]
    fn uppercases_instruction_keyword() {
        let lines = lex("from scratch\n").unwrap();
        assert_eq!(lines[0].instruction, "FROM");
    }
}
