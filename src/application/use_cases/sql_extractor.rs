//! Pull a single SQL statement out of free-form generator output
//!
//! Steps, first hit wins:
//! 1. drop `<think>...</think>` spans
//! 2. text already starting with SELECT is returned as-is
//! 3. body of a ```sql fence
//! 4. body of any other fence
//! 5. from the first SELECT keyword up to the end of the statement, trimming
//!    trailing prose
//! 6. whatever text is left

use once_cell::sync::Lazy;
use regex::Regex;

static THINK_TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<think>.*?</think>|<think\s*/>").unwrap());

static REASONING_TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<reasoning>.*?</reasoning>").unwrap());

static INTERNAL_TAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<internal>.*?</internal>").unwrap());

static SQL_FENCE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)```[ \t]*sql\b[ \t]*\n?(.*?)```").unwrap());

static ANY_FENCE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:[A-Za-z0-9_+-]*[ \t]*\n)?(.*?)```").unwrap());

static SELECT_KEYWORD_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bselect\b").unwrap());

static MULTIPLE_NEWLINES_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Phrases that start an explanation tacked on after the statement.
const EXPLANATION_LEADS: [&str; 5] = [
    "This query",
    "This will",
    "This should",
    "This gives",
    "This returns",
];

/// Best-effort single statement from generator output.
///
/// Never fails; unrecognisable input comes back trimmed.
pub fn extract_sql(raw: &str) -> String {
    let text = THINK_TAG_PATTERN.replace_all(raw, "");
    let text = text.trim();

    if starts_with_select(text) {
        return text.to_string();
    }

    if let Some(body) = SQL_FENCE_PATTERN.captures(text).and_then(|c| c.get(1)) {
        return body.as_str().trim().to_string();
    }

    if let Some(body) = ANY_FENCE_PATTERN.captures(text).and_then(|c| c.get(1)) {
        return body.as_str().trim().to_string();
    }

    if let Some(found) = SELECT_KEYWORD_PATTERN.find(text) {
        return truncate_statement(&text[found.start()..]);
    }

    text.to_string()
}

/// Remove reasoning spans a model emits before its answer.
pub fn strip_thinking(raw: &str) -> String {
    let cleaned = THINK_TAG_PATTERN.replace_all(raw, "");
    let cleaned = REASONING_TAG_PATTERN.replace_all(&cleaned, "");
    let cleaned = INTERNAL_TAG_PATTERN.replace_all(&cleaned, "");
    MULTIPLE_NEWLINES_PATTERN
        .replace_all(cleaned.trim(), "\n\n")
        .to_string()
}

fn starts_with_select(text: &str) -> bool {
    text.get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("select"))
}

fn truncate_statement(candidate: &str) -> String {
    let mut end = candidate.len();
    if let Some(pos) = candidate.find(". ") {
        end = end.min(pos);
    }
    if let Some(pos) = candidate.find("\n\n") {
        end = end.min(pos);
    }
    if let Some(pos) = candidate.find(';') {
        // The terminator stays with the statement.
        end = end.min(pos + 1);
    }
    let mut statement = &candidate[..end];

    for lead in EXPLANATION_LEADS {
        if let Some(pos) = statement.find(lead) {
            statement = &statement[..pos];
        }
    }

    statement.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_select_is_unchanged() {
        let sql = "SELECT * FROM customers LIMIT 10";
        assert_eq!(extract_sql(sql), sql);
        assert_eq!(extract_sql(&extract_sql(sql)), sql);
    }

    #[test]
    fn test_lowercase_select_prefix() {
        assert_eq!(extract_sql("  select id from t  "), "select id from t");
    }

    #[test]
    fn test_think_span_then_fence() {
        let raw = "<think>reasoning about SELECT</think>\n```sql\nSELECT id FROM t;\n```";
        assert_eq!(extract_sql(raw), "SELECT id FROM t;");
    }

    #[test]
    fn test_think_span_is_case_insensitive_and_multiline() {
        let raw = "<THINK>\nline one\nline two\n</THINK>SELECT 1";
        assert_eq!(extract_sql(raw), "SELECT 1");
    }

    #[test]
    fn test_sql_fence_preferred_over_other_fence() {
        let raw = "Output:\n```text\nnot this\n```\nand\n```SQL\nSELECT name FROM users\n```";
        assert_eq!(extract_sql(raw), "SELECT name FROM users");
    }

    #[test]
    fn test_untagged_fence() {
        let raw = "Here you go:\n```\nSELECT count(*) FROM orders\n```\nDone.";
        assert_eq!(extract_sql(raw), "SELECT count(*) FROM orders");
    }

    #[test]
    fn test_inline_select_truncated_at_semicolon() {
        let raw = "The answer is SELECT * FROM t WHERE a = 1; which returns rows";
        assert_eq!(extract_sql(raw), "SELECT * FROM t WHERE a = 1;");
    }

    #[test]
    fn test_inline_select_truncated_at_sentence_break() {
        let raw = "Try select name from users. It lists every user";
        assert_eq!(extract_sql(raw), "select name from users");
    }

    #[test]
    fn test_inline_select_truncated_at_blank_line() {
        let raw = "Query: SELECT a FROM b\n\nExplanation follows";
        assert_eq!(extract_sql(raw), "SELECT a FROM b");
    }

    #[test]
    fn test_inline_select_drops_explanation() {
        let raw = "Use SELECT id FROM t This query returns ids";
        assert_eq!(extract_sql(raw), "SELECT id FROM t");
    }

    #[test]
    fn test_select_inside_word_is_ignored() {
        assert_eq!(extract_sql("preselected values only"), "preselected values only");
    }

    #[test]
    fn test_no_sql_returns_trimmed_text() {
        assert_eq!(extract_sql("  <think>hmm</think>  I cannot help  "), "I cannot help");
    }

    #[test]
    fn test_strip_thinking_removes_all_reasoning_tags() {
        let raw = "<think>a</think><reasoning>b</reasoning>Total is 5.<internal>c</internal>\n\n\n\nDone";
        assert_eq!(strip_thinking(raw), "Total is 5.\n\nDone");
    }
}
