//! Dialect repair for generated SQL
//!
//! Generators write a loose, engine-agnostic SQL. Each stage below fixes one
//! habit that breaks on the target engine; every stage is idempotent and
//! leaves single-quoted string literals alone.
//!
//! Stages, in order:
//! 1. `fix_now_literal`   `= 'now'` becomes the engine's current-date expression
//! 2. `space_operators`   `a<b` becomes `a < b`
//! 3. `top_to_limit`      `SELECT TOP n` becomes a trailing `LIMIT n`
//! 4. `unquote_identifiers` (optional) `SELECT "name"` becomes `SELECT name`

use crate::domain::schema_entities::SqlDialect;
use once_cell::sync::Lazy;
use regex::Regex;

static NOW_LITERAL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)(<>|!=|>=|<=|=|>|<)(\s*)["']now["']"#).unwrap());

static QUOTED_IDENT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)(\b(?:SELECT|FROM|JOIN|INTO|UPDATE|TABLE|BY|WHERE|AND|OR|ON|DISTINCT)\s+|,\s*)(?:"([A-Za-z_][A-Za-z0-9_]*)"|`([A-Za-z_][A-Za-z0-9_]*)`)"#,
    )
    .unwrap()
});

static VALUE_LIST_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:IN|VALUES)\s*\(").unwrap());

static TOP_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(SELECT(?:\s+DISTINCT)?)\s+TOP\s*\(?\s*(\d+)\s*\)?\s+").unwrap()
});

static LIMIT_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bLIMIT\s+\d+").unwrap());

static WHERE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bWHERE\b").unwrap());

static WHERE_END_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:GROUP\s+BY|ORDER\s+BY|HAVING|LIMIT)\b|;").unwrap());

static COMPARISON_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(<>|!=|<=|>=|=|<|>)(\s*)([^\s'"`(),;<>=!]+)"#).unwrap());

/// Multi-character operators that are never split or padded.
const PROTECTED_OPERATORS: [&str; 6] = ["<=>", "->>", "->", "=>", "<<", ">>"];

/// Longest first so `<=` is never read as `<` followed by `=`.
const COMPARISON_OPERATORS: [&str; 7] = ["<>", "<=", ">=", "!=", "<", ">", "="];

/// Bare words after a comparison that are not values.
const NON_VALUE_WORDS: [&str; 13] = [
    "null", "true", "false", "not", "any", "all", "some", "exists", "select", "interval", "date",
    "time", "timestamp",
];

#[derive(Debug, Clone, Copy)]
pub struct DialectAdapter {
    dialect: SqlDialect,
    unquote_identifiers: bool,
}

impl DialectAdapter {
    pub fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            unquote_identifiers: true,
        }
    }

    pub fn with_unquote_identifiers(mut self, enabled: bool) -> Self {
        self.unquote_identifiers = enabled;
        self
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    pub fn adapt(&self, sql: &str) -> String {
        let sql = fix_now_literal(sql, self.dialect);
        let sql = space_operators(&sql);
        // TOP has to go first: `TOP n "col"` hides the identifier from unquoting.
        let sql = top_to_limit(&sql, self.dialect);
        if self.unquote_identifiers {
            unquote_identifiers(&sql, self.dialect)
        } else {
            sql
        }
    }

    /// Stronger rewrite for a second attempt after the engine reported a syntax error.
    pub fn adapt_after_syntax_error(&self, sql: &str) -> String {
        let sql = self.adapt(sql);
        let sql = pad_operators(&sql, true);
        quote_where_values(&sql)
    }
}

/// A syntax error that mentions a comparison character is worth one repaired retry.
pub fn should_retry(error: &str) -> bool {
    error.to_lowercase().contains("syntax") && (error.contains('<') || error.contains('>'))
}

pub fn fix_now_literal(sql: &str, dialect: SqlDialect) -> String {
    NOW_LITERAL_PATTERN
        .replace_all(sql, |caps: &regex::Captures| {
            format!("{}{}{}", &caps[1], &caps[2], dialect.current_date())
        })
        .into_owned()
}

/// Pad comparison operators that touch both neighbours.
pub fn space_operators(sql: &str) -> String {
    pad_operators(sql, false)
}

pub fn unquote_identifiers(sql: &str, dialect: SqlDialect) -> String {
    let literals = literal_spans(sql);
    let value_lists = value_list_spans(sql, &literals);
    let mut out = String::with_capacity(sql.len());
    let mut last = 0;

    for caps in QUOTED_IDENT_PATTERN.captures_iter(sql) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        if in_literal(&literals, whole.start()) {
            continue;
        }
        // `IN ("a", "b")`: after a comma these are values, not identifiers.
        if whole.as_str().starts_with(',') && in_literal(&value_lists, whole.start()) {
            continue;
        }
        let (ident, double_quoted) = match (caps.get(2), caps.get(3)) {
            (Some(m), _) => (m.as_str(), true),
            (None, Some(m)) => (m.as_str(), false),
            _ => continue,
        };
        if double_quoted
            && dialect.quoted_identifiers_are_case_sensitive()
            && ident.chars().any(|c| c.is_ascii_uppercase())
        {
            continue;
        }
        out.push_str(&sql[last..whole.start()]);
        out.push_str(&caps[1]);
        out.push_str(ident);
        last = whole.end();
    }

    out.push_str(&sql[last..]);
    out
}

pub fn top_to_limit(sql: &str, dialect: SqlDialect) -> String {
    if dialect.supports_top() {
        return sql.to_string();
    }
    let Some(caps) = TOP_PATTERN.captures(sql) else {
        return sql.to_string();
    };
    let (Some(whole), Some(keyword), Some(count)) = (caps.get(0), caps.get(1), caps.get(2)) else {
        return sql.to_string();
    };

    let rewritten = format!(
        "{}{} {}",
        &sql[..whole.start()],
        keyword.as_str(),
        &sql[whole.end()..]
    );
    if LIMIT_PATTERN.is_match(&rewritten) {
        return rewritten;
    }

    let trimmed = rewritten.trim_end();
    match trimmed.strip_suffix(';') {
        Some(body) => format!("{} LIMIT {};", body.trim_end(), count.as_str()),
        None => format!("{} LIMIT {}", trimmed, count.as_str()),
    }
}

fn pad_operators(sql: &str, aggressive: bool) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len() + 8);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '\'' || c == '"' || c == '`' {
            let end = closing_quote(&chars, i);
            out.extend(&chars[i..end]);
            i = end;
            continue;
        }
        if let Some(len) = operator_at(&chars, i, &PROTECTED_OPERATORS) {
            out.extend(&chars[i..i + len]);
            i += len;
            continue;
        }
        if let Some(len) = operator_at(&chars, i, &COMPARISON_OPERATORS) {
            let tight_before = i > 0 && !chars[i - 1].is_whitespace();
            let tight_after = chars.get(i + len).is_some_and(|ch| !ch.is_whitespace());
            let (pad_before, pad_after) = if aggressive {
                (tight_before, tight_after)
            } else {
                let both = tight_before && tight_after;
                (both, both)
            };
            if pad_before {
                out.push(' ');
            }
            out.extend(&chars[i..i + len]);
            if pad_after {
                out.push(' ');
            }
            i += len;
            continue;
        }
        out.push(c);
        i += 1;
    }

    out
}

fn operator_at(chars: &[char], i: usize, operators: &[&str]) -> Option<usize> {
    operators.iter().find_map(|op| {
        let len = op.chars().count();
        let matches = chars.len() >= i + len && op.chars().zip(&chars[i..i + len]).all(|(a, b)| a == *b);
        matches.then_some(len)
    })
}

/// Index one past the quote closing the span opened at `open`. Doubled quotes are escapes.
fn closing_quote(chars: &[char], open: usize) -> usize {
    let quote = chars[open];
    let mut j = open + 1;
    while j < chars.len() {
        if chars[j] == quote {
            if chars.get(j + 1) == Some(&quote) {
                j += 2;
                continue;
            }
            return j + 1;
        }
        j += 1;
    }
    chars.len()
}

/// Byte ranges of single-quoted literals, quotes included.
fn literal_spans(sql: &str) -> Vec<(usize, usize)> {
    let bytes = sql.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'\'' {
            i += 1;
            continue;
        }
        let start = i;
        i += 1;
        while i < bytes.len() {
            if bytes[i] == b'\'' {
                if bytes.get(i + 1) == Some(&b'\'') {
                    i += 2;
                    continue;
                }
                break;
            }
            i += 1;
        }
        let end = (i + 1).min(bytes.len());
        spans.push((start, end));
        i = end;
    }

    spans
}

/// Spans of `IN (...)` and `VALUES (...)` lists outside string literals.
/// Subqueries (`IN (SELECT ...)`) are not value lists.
fn value_list_spans(sql: &str, literals: &[(usize, usize)]) -> Vec<(usize, usize)> {
    let bytes = sql.as_bytes();
    let mut spans = Vec::new();

    for found in VALUE_LIST_PATTERN.find_iter(sql) {
        if in_literal(literals, found.start()) {
            continue;
        }
        let open = found.end() - 1;
        let is_subquery = sql[found.end()..]
            .trim_start()
            .get(..6)
            .is_some_and(|head| head.eq_ignore_ascii_case("select"));
        if is_subquery {
            continue;
        }

        let mut depth = 0usize;
        let mut close = sql.len();
        for (i, byte) in bytes.iter().enumerate().skip(open) {
            if in_literal(literals, i) {
                continue;
            }
            match byte {
                b'(' => depth += 1,
                b')' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        close = i + 1;
                        break;
                    }
                }
                _ => {}
            }
        }
        spans.push((open, close));
    }
    spans
}

fn in_literal(spans: &[(usize, usize)], pos: usize) -> bool {
    spans.iter().any(|(start, end)| pos >= *start && pos < *end)
}

fn quote_where_values(sql: &str) -> String {
    let literals = literal_spans(sql);
    let Some(where_kw) = WHERE_PATTERN
        .find_iter(sql)
        .find(|m| !in_literal(&literals, m.start()))
    else {
        return sql.to_string();
    };

    let start = where_kw.end();
    let end = WHERE_END_PATTERN
        .find_iter(&sql[start..])
        .find(|m| !in_literal(&literals, start + m.start()))
        .map(|m| start + m.start())
        .unwrap_or(sql.len());
    let clause = &sql[start..end];

    let mut out = String::with_capacity(sql.len() + 8);
    out.push_str(&sql[..start]);
    let mut last = 0;

    for caps in COMPARISON_PATTERN.captures_iter(clause) {
        let (Some(whole), Some(token)) = (caps.get(0), caps.get(3)) else {
            continue;
        };
        if in_literal(&literals, start + whole.start()) {
            continue;
        }
        let is_call = clause[token.end()..].trim_start().starts_with('(');
        if is_call || !is_bare_value(token.as_str()) {
            continue;
        }
        out.push_str(&clause[last..token.start()]);
        out.push('\'');
        out.push_str(token.as_str());
        out.push('\'');
        last = token.end();
    }

    out.push_str(&clause[last..]);
    out.push_str(&sql[end..]);
    out
}

fn is_bare_value(token: &str) -> bool {
    let lower = token.to_lowercase();
    let unsigned = token.trim_start_matches(['-', '+']);
    let numeric = !unsigned.is_empty()
        && unsigned.chars().all(|c| c.is_ascii_digit() || c == '.')
        && unsigned.parse::<f64>().is_ok();

    !(numeric
        || token.contains('.')
        || token.starts_with(['?', '$', ':', '@'])
        || lower.starts_with("current_")
        || NON_VALUE_WORDS.contains(&lower.as_str()))
}
