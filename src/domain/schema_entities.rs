use serde::{Deserialize, Serialize};

/// Whether a record or match describes a whole table or a single column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Table,
    Column,
}

/// Templated natural-language description of a table or column plus its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRecord {
    #[serde(rename = "db_name")]
    pub database_name: String,
    pub table_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_name: Option<String>,
    pub description: String,
    pub embedding: Vec<f32>,
}

impl TextRecord {
    pub fn table_description(database: &str, table: &str, columns: &[String]) -> String {
        format!(
            "Table {} in database {} containing columns: {}",
            table,
            database,
            columns.join(", ")
        )
    }

    pub fn column_description(database: &str, table: &str, column: &str) -> String {
        format!(
            "Column named '{}' within table '{}' in database '{}'",
            column, table, database
        )
    }

    pub fn kind(&self) -> RecordKind {
        if self.column_name.is_some() {
            RecordKind::Column
        } else {
            RecordKind::Table
        }
    }
}

/// One ranked hit from the semantic index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub database_name: String,
    pub table_name: String,
    pub column_name: Option<String>,
    pub kind: RecordKind,
    pub score: f32,
}

/// Which signal produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionMethod {
    Semantic,
    Lexical,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub database: Option<String>,
    pub table: Option<String>,
    pub method: ResolutionMethod,
}

impl Resolution {
    pub fn none() -> Self {
        Self {
            database: None,
            table: None,
            method: ResolutionMethod::None,
        }
    }
}

/// SQL flavour of a registered database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    Sqlite,
    Postgres,
}

impl SqlDialect {
    /// Expression yielding today's date.
    pub fn current_date(&self) -> &'static str {
        match self {
            SqlDialect::Sqlite => "date('now')",
            SqlDialect::Postgres => "CURRENT_DATE",
        }
    }

    pub fn supports_top(&self) -> bool {
        false
    }

    /// Double-quoted identifiers keep their case.
    pub fn quoted_identifiers_are_case_sensitive(&self) -> bool {
        matches!(self, SqlDialect::Postgres)
    }
}

/// Result of running one statement against a registered database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<serde_json::Value>>,
    },
    Affected {
        rows_affected: u64,
    },
}

impl ExecutionOutcome {
    pub fn row_count(&self) -> usize {
        match self {
            ExecutionOutcome::Rows { rows, .. } => rows.len(),
            ExecutionOutcome::Affected { .. } => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptions_follow_template() {
        let columns = vec!["customer_id".to_string(), "email".to_string()];
        assert_eq!(
            TextRecord::table_description("crm_db", "customers", &columns),
            "Table customers in database crm_db containing columns: customer_id, email"
        );
        assert_eq!(
            TextRecord::column_description("crm_db", "customers", "email"),
            "Column named 'email' within table 'customers' in database 'crm_db'"
        );
    }

    #[test]
    fn test_record_kind_from_column_presence() {
        let record = TextRecord {
            database_name: "d".to_string(),
            table_name: "t".to_string(),
            column_name: None,
            description: String::new(),
            embedding: vec![0.0],
        };
        assert_eq!(record.kind(), RecordKind::Table);
    }
}
