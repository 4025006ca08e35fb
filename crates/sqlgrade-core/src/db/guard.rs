//! Read-only statement guard.
//!
//! Generated SQL comes from a model and is executed against a live database,
//! so it is classified before it ever reaches a driver. The lexer below only
//! understands enough SQL to skip string literals, quoted identifiers and
//! comments; anything it cannot prove to be a single read statement is
//! rejected.

use crate::errors::QueryExecutionError;

const READ_LEADERS: &[&str] = &[
    "SELECT", "WITH", "VALUES", "EXPLAIN", "SHOW", "DESCRIBE", "DESC", "TABLE",
];

// REPLACE doubles as a string function; REPLACE INTO is caught by INTO.
const WRITE_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "MERGE", "UPSERT", "DROP", "CREATE", "ALTER", "TRUNCATE",
    "GRANT", "REVOKE", "ATTACH", "DETACH", "PRAGMA", "VACUUM", "REINDEX", "INTO", "LOCK",
    "UNLOCK", "CALL", "RENAME", "COMMIT", "ROLLBACK", "BEGIN", "SAVEPOINT", "RELEASE", "SET",
    "LOAD", "HANDLER", "OUTFILE", "DUMPFILE",
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Semicolon,
}

/// Returns `Ok(())` if `sql` is exactly one read-only statement.
pub fn check_read_only(sql: &str) -> Result<(), String> {
    let tokens = tokenize(sql)?;

    let mut statements: Vec<Vec<String>> = vec![Vec::new()];
    for t in tokens {
        match t {
            Token::Semicolon => statements.push(Vec::new()),
            Token::Word(w) => {
                if let Some(last) = statements.last_mut() {
                    last.push(w)
                }
            }
        }
    }
    statements.retain(|s| !s.is_empty());

    match statements.len() {
        0 => return Err("empty statement".into()),
        1 => {}
        n => return Err(format!("{} statements found, only one is allowed", n)),
    }

    let words = &statements[0];
    let leader = words[0].as_str();
    if !READ_LEADERS.contains(&leader) {
        return Err(format!("'{}' is not a read-only statement", leader));
    }
    if let Some(w) = words.iter().find(|w| WRITE_KEYWORDS.contains(&w.as_str())) {
        return Err(format!("statement contains write keyword '{}'", w));
    }
    Ok(())
}

pub fn ensure_read_only(sql: &str) -> Result<(), QueryExecutionError> {
    check_read_only(sql).map_err(QueryExecutionError::Rejected)
}

/// Uppercased bare words and statement separators. Literals, quoted
/// identifiers and comments are dropped.
fn tokenize(sql: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    let mut open_code_comments = 0usize;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' | '`' => {
                i = skip_quoted(&chars, i, c)?;
            }
            '[' => {
                i = skip_quoted(&chars, i, ']')?;
            }
            // MySQL only starts a `--` comment when whitespace or a control
            // character follows; `1--1` is arithmetic there.
            '-' if chars.get(i + 1) == Some(&'-')
                && chars.get(i + 2).map_or(true, |c| c.is_whitespace() || c.is_control()) =>
            {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            // `/*! ... */` and `/*+ ... */` bodies are executed or parsed by
            // MySQL, so they are lexed as code.
            '/' if chars.get(i + 1) == Some(&'*')
                && matches!(chars.get(i + 2), Some('!') | Some('+')) =>
            {
                i += 3;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                open_code_comments += 1;
            }
            '*' if open_code_comments > 0 && chars.get(i + 1) == Some(&'/') => {
                open_code_comments -= 1;
                i += 2;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                loop {
                    if i + 1 >= chars.len() {
                        return Err("unterminated block comment".into());
                    }
                    if chars[i] == '*' && chars[i + 1] == '/' {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
            }
            ';' => {
                out.push(Token::Semicolon);
                i += 1;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                out.push(Token::Word(word.to_ascii_uppercase()));
            }
            _ => i += 1,
        }
    }
    if open_code_comments > 0 {
        return Err("unterminated block comment".into());
    }
    Ok(out)
}

/// Skips a quoted run starting at `start` (the opening quote) and returns the
/// index just past the closing quote. Doubled quotes and backslash escapes
/// stay inside the literal.
fn skip_quoted(chars: &[char], start: usize, close: char) -> Result<usize, String> {
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && close != ']' {
            i += 2;
            continue;
        }
        if c == close {
            if chars.get(i + 1) == Some(&close) && close != ']' {
                i += 2;
                continue;
            }
            return Ok(i + 1);
        }
        i += 1;
    }
    Err("unterminated quoted literal".into())
}
