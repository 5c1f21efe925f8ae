//! Deterministic SQL builder used when no text generator is reachable
//!
//! Recognises a handful of phrasings and nothing more:
//! - "how many" / "count" → `SELECT COUNT(*)`
//! - column names mentioned in the question become the projection
//! - `<column> is|=|equals <value>` becomes a single `WHERE` equality
//! - `limit|top|first|show <n>` sets the row limit

use once_cell::sync::Lazy;
use regex::Regex;

pub const DEFAULT_ROW_LIMIT: u32 = 10;

static LIMIT_HINT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:limit|top|first|show)\s+(\d+)\b").unwrap());

static FILTER_VALUE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^\s*(?:=|is|equals)\s+(?:'([^']*)'|"([^"]*)"|([A-Za-z0-9_@.\-]+))"#).unwrap()
});

pub struct FallbackQueryBuilder {
    default_limit: u32,
}

impl Default for FallbackQueryBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_ROW_LIMIT)
    }
}

impl FallbackQueryBuilder {
    pub fn new(default_limit: u32) -> Self {
        Self { default_limit }
    }

    pub fn build(&self, query: &str, table: &str, columns: &[String]) -> String {
        let query_lower = query.to_lowercase();

        if query_lower.contains("how many") || query_lower.contains("count") {
            return format!("SELECT COUNT(*) FROM {}", table);
        }

        let mentioned: Vec<&String> = columns
            .iter()
            .filter(|c| contains_word(&query_lower, &c.to_lowercase()))
            .collect();

        let projection = if mentioned.is_empty() {
            "*".to_string()
        } else {
            mentioned
                .iter()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut sql = format!("SELECT {} FROM {}", projection, table);
        if let Some((column, value)) = Self::equality_filter(query, columns) {
            sql.push_str(&format!(
                " WHERE {} = '{}'",
                column,
                value.replace('\'', "''")
            ));
        }
        sql.push_str(&format!(" LIMIT {}", self.row_limit(query)));
        sql
    }

    fn row_limit(&self, query: &str) -> u32 {
        LIMIT_HINT_PATTERN
            .captures(query)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(self.default_limit)
    }

    /// First `<known column> (=|is|equals) <value>` phrase in the question.
    ///
    /// Columns are matched case-insensitively on the question itself, so
    /// offsets always index the text the value is read from.
    fn equality_filter(query: &str, columns: &[String]) -> Option<(String, String)> {
        let mut best: Option<(usize, String, String)> = None;

        for column in columns {
            if column.is_empty() {
                continue;
            }
            let Ok(pattern) = Regex::new(&format!("(?i){}", regex::escape(column))) else {
                continue;
            };
            for found in pattern.find_iter(query) {
                if !is_word_boundary(query, found.start(), found.end()) {
                    continue;
                }
                let Some(caps) = FILTER_VALUE_PATTERN.captures(&query[found.end()..]) else {
                    continue;
                };
                let value = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .or_else(|| caps.get(3))
                    .map(|m| m.as_str().to_string());
                if let Some(value) = value {
                    if best.as_ref().map_or(true, |(pos, _, _)| found.start() < *pos) {
                        best = Some((found.start(), column.clone(), value));
                    }
                    break;
                }
            }
        }

        best.map(|(_, column, value)| (column, value))
    }
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let mut from = 0;
    while let Some(offset) = haystack[from..].find(needle) {
        let start = from + offset;
        let end = start + needle.len();
        if is_word_boundary(haystack, start, end) {
            return true;
        }
        from = end;
    }
    false
}

fn is_word_boundary(text: &str, start: usize, end: usize) -> bool {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(is_word) && !after.is_some_and(is_word)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<String> {
        vec![
            "customer_id".to_string(),
            "first_name".to_string(),
            "email".to_string(),
            "city".to_string(),
        ]
    }

    #[test]
    fn test_count_questions() {
        let builder = FallbackQueryBuilder::default();
        assert_eq!(
            builder.build("How many customers do we have?", "customers", &columns()),
            "SELECT COUNT(*) FROM customers"
        );
        assert_eq!(
            builder.build("count the customers", "customers", &columns()),
            "SELECT COUNT(*) FROM customers"
        );
    }

    #[test]
    fn test_default_select() {
        let builder = FallbackQueryBuilder::default();
        assert_eq!(
            builder.build("list customers", "customers", &columns()),
            "SELECT * FROM customers LIMIT 10"
        );
    }

    #[test]
    fn test_mentioned_columns_and_limit() {
        let builder = FallbackQueryBuilder::default();
        assert_eq!(
            builder.build("show 5 email and first_name of customers", "customers", &columns()),
            "SELECT first_name, email FROM customers LIMIT 5"
        );
    }

    #[test]
    fn test_equality_filter() {
        let builder = FallbackQueryBuilder::default();
        assert_eq!(
            builder.build("customers where city is Paris", "customers", &columns()),
            "SELECT city FROM customers WHERE city = 'Paris' LIMIT 10"
        );
        assert_eq!(
            builder.build("customers with email = 'a@b.com'", "customers", &columns()),
            "SELECT email FROM customers WHERE email = 'a@b.com' LIMIT 10"
        );
    }

    #[test]
    fn test_partial_column_names_are_not_mentions() {
        let builder = FallbackQueryBuilder::new(20);
        assert_eq!(
            builder.build("list all emails", "customers", &columns()),
            "SELECT * FROM customers LIMIT 20"
        );
    }

    #[test]
    fn test_filter_value_quotes_are_escaped() {
        let builder = FallbackQueryBuilder::default();
        assert_eq!(
            builder.build("first_name equals \"O'Neil\"", "customers", &columns()),
            "SELECT first_name FROM customers WHERE first_name = 'O''Neil' LIMIT 10"
        );
    }

    #[test]
    fn test_filter_survives_case_folding_that_changes_length() {
        let builder = FallbackQueryBuilder::default();
        assert_eq!(
            builder.build("İstanbul customers where CITY is Paris", "customers", &columns()),
            "SELECT city FROM customers WHERE city = 'Paris' LIMIT 10"
        );
    }
}
