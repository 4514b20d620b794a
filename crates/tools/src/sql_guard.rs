//! Guard rail for ad-hoc SQL.
//!
//! Not a SQL parser. A small quote-aware scanner strips comments, splits the
//! text into tokens with their parenthesis depth, and then enforces:
//!
//! - the first keyword is `SELECT`
//! - exactly one statement (a single trailing `;` is tolerated)
//! - no write, DDL or session keywords anywhere outside literals
//! - a top-level `LIMIT` that is an integer literal no larger than the cap;
//!   when absent, the default limit is appended
//!
//! Execution still happens on a read-only handle; this layer only decides
//! which text is allowed to get that far.

use stockchat_core::error::ToolError;

/// Keywords that never belong in a read query.
const FORBIDDEN: &[&str] = &[
    "INSERT",
    "UPDATE",
    "DELETE",
    "DROP",
    "CREATE",
    "ALTER",
    "TRUNCATE",
    "ATTACH",
    "DETACH",
    "PRAGMA",
    "VACUUM",
    "REINDEX",
    "ANALYZE",
    "BEGIN",
    "COMMIT",
    "ROLLBACK",
    "SAVEPOINT",
    "RELEASE",
    "GRANT",
    "REVOKE",
    "INTO",
    "LOAD_EXTENSION",
];

/// A query that passed the guard, ready to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuery {
    /// Comment-free SQL, with a `LIMIT` clause guaranteed
    pub sql: String,
    /// The effective row cap
    pub limit: u32,
    /// Whether the `LIMIT` was appended by the guard
    pub limit_injected: bool,
}

/// Validates caller-supplied SQL against the read-only allow-list.
#[derive(Debug, Clone, Copy)]
pub struct SqlGuard {
    default_limit: u32,
    max_limit: u32,
}

impl SqlGuard {
    pub fn new(default_limit: u32, max_limit: u32) -> Self {
        Self {
            default_limit,
            max_limit: max_limit.max(default_limit),
        }
    }

    pub fn max_limit(&self) -> u32 {
        self.max_limit
    }

    pub fn validate(&self, raw: &str) -> Result<ValidatedQuery, ToolError> {
        let cleaned = strip_comments(raw)?;
        let mut sql = cleaned.trim();
        if let Some(rest) = sql.strip_suffix(';') {
            sql = rest.trim_end();
        }
        if sql.is_empty() {
            return Err(reject("empty query"));
        }

        let tokens = tokenize(sql)?;

        match tokens.first() {
            Some((Token::Word(w), _)) if w.eq_ignore_ascii_case("SELECT") => {}
            _ => return Err(reject("only SELECT statements are allowed")),
        }

        for (i, (token, _)) in tokens.iter().enumerate() {
            match token {
                Token::Punct(';') => {
                    return Err(reject("multiple statements are not allowed"));
                }
                Token::Word(w) => {
                    let upper = w.to_ascii_uppercase();
                    // replace() the string function is fine; REPLACE INTO is not
                    let is_call = matches!(tokens.get(i + 1), Some((Token::Open, _)));
                    if FORBIDDEN.contains(&upper.as_str()) || (upper == "REPLACE" && !is_call) {
                        return Err(reject(format!("keyword {upper} is not allowed")));
                    }
                }
                _ => {}
            }
        }

        let limit_pos = tokens.iter().rposition(|(token, depth)| {
            *depth == 0 && matches!(token, Token::Word(w) if w.eq_ignore_ascii_case("LIMIT"))
        });

        match limit_pos {
            None => Ok(ValidatedQuery {
                sql: format!("{sql} LIMIT {}", self.default_limit),
                limit: self.default_limit,
                limit_injected: true,
            }),
            Some(pos) => {
                let limit = parse_limit(&tokens[pos + 1..])?;
                if limit > self.max_limit {
                    return Err(reject(format!(
                        "LIMIT {limit} exceeds the maximum of {}",
                        self.max_limit
                    )));
                }
                Ok(ValidatedQuery {
                    sql: sql.to_string(),
                    limit,
                    limit_injected: false,
                })
            }
        }
    }
}

fn reject(reason: impl Into<String>) -> ToolError {
    ToolError::Rejected(reason.into())
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Number(String),
    /// A string literal or quoted identifier
    Quoted,
    Open,
    Close,
    Punct(char),
}

/// Closing delimiter for a quote opener.
fn closing_quote(c: char) -> Option<char> {
    match c {
        '\'' | '"' | '`' => Some(c),
        '[' => Some(']'),
        _ => None,
    }
}

/// Index just past the quoted run starting at `start`, or an error if it
/// never closes. A doubled quote inside the run is an escaped quote.
fn skip_quoted(chars: &[char], start: usize) -> Result<usize, ToolError> {
    let open = chars[start];
    let close = closing_quote(open).unwrap_or(open);
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == close {
            if close != ']' && chars.get(i + 1) == Some(&close) {
                i += 2;
                continue;
            }
            return Ok(i + 1);
        }
        i += 1;
    }
    Err(reject("unterminated quoted literal"))
}

/// Remove `--` and `/* */` comments, leaving quoted text untouched.
fn strip_comments(sql: &str) -> Result<String, ToolError> {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '-' if chars.get(i + 1) == Some(&'-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                out.push(' ');
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                // An unterminated block comment runs to the end, as in SQLite
                i = (i + 2).min(chars.len());
                out.push(' ');
            }
            c if closing_quote(c).is_some() => {
                let end = skip_quoted(&chars, i)?;
                out.extend(&chars[i..end]);
                i = end;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    Ok(out)
}

/// Split comment-free SQL into tokens tagged with parenthesis depth.
fn tokenize(sql: &str) -> Result<Vec<(Token, usize)>, ToolError> {
    let chars: Vec<char> = sql.chars().collect();
    let mut tokens = Vec::new();
    let mut depth = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            c if closing_quote(c).is_some() => {
                i = skip_quoted(&chars, i)?;
                tokens.push((Token::Quoted, depth));
            }
            '(' => {
                tokens.push((Token::Open, depth));
                depth += 1;
                i += 1;
            }
            ')' => {
                depth = depth.saturating_sub(1);
                tokens.push((Token::Close, depth));
                i += 1;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '.' || chars[i] == '_') {
                    i += 1;
                }
                tokens.push((Token::Number(chars[start..i].iter().collect()), depth));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                    i += 1;
                }
                tokens.push((Token::Word(chars[start..i].iter().collect()), depth));
            }
            c => {
                tokens.push((Token::Punct(c), depth));
                i += 1;
            }
        }
    }

    Ok(tokens)
}

/// Read the row count from the tokens after a top-level `LIMIT`.
///
/// Accepts `LIMIT n`, `LIMIT n OFFSET <expr>` and `LIMIT offset, n`.
fn parse_limit(rest: &[(Token, usize)]) -> Result<u32, ToolError> {
    let literal = |token: Option<&(Token, usize)>| -> Result<u32, ToolError> {
        match token {
            Some((Token::Number(n), _)) => n
                .parse::<u32>()
                .map_err(|_| reject(format!("LIMIT must be a non-negative integer literal, got {n}"))),
            _ => Err(reject("LIMIT must be a non-negative integer literal")),
        }
    };

    let first = literal(rest.first())?;
    match rest.get(1) {
        None => Ok(first),
        Some((Token::Word(w), _)) if w.eq_ignore_ascii_case("OFFSET") => Ok(first),
        Some((Token::Punct(','), _)) => {
            let count = literal(rest.get(2))?;
            if rest.len() > 3 {
                return Err(reject("unexpected tokens after LIMIT"));
            }
            Ok(count)
        }
        Some(_) => Err(reject("LIMIT must be a non-negative integer literal")),
    }
}
