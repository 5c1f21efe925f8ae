use crate::domain::catalog::TableColumns;
use crate::domain::llm_config::GenerationRequest;
use crate::domain::schema_entities::ExecutionOutcome;
use serde_json::Value;

const SQL_SYSTEM_PROMPT: &str = "You are a SQL expert. Your task is to convert natural language queries into valid SQL.
Only return the SQL query without any explanation. Do not include markdown formatting or backticks.
Make sure your SQL is compatible with SQLite, MySQL, or PostgreSQL.";

const SUMMARY_SYSTEM_PROMPT: &str = "You are a data analyst. Your task is to provide a clear, concise summary of query results.
Focus on the most important insights and patterns in the data.
Keep your response under 5 sentences unless more detail is absolutely necessary.";

const SUMMARY_SAMPLE_ROWS: usize = 5;

pub struct PromptEngine;

impl PromptEngine {
    pub fn sql_request(
        question: &str,
        database: &str,
        tables: &TableColumns,
        temperature: f32,
    ) -> GenerationRequest {
        let prompt = format!(
            "Database: {}\n\nTables and columns:\n{}\nConvert this query to SQL: {}",
            database,
            Self::format_schema(tables),
            question.trim()
        );
        GenerationRequest {
            prompt,
            system: SQL_SYSTEM_PROMPT.to_string(),
            temperature,
        }
    }

    pub fn summary_request(
        question: &str,
        sql: &str,
        outcome: &ExecutionOutcome,
        temperature: f32,
    ) -> GenerationRequest {
        let prompt = format!(
            "Original user query: {}\n\nSQL Query executed: {}\n\nQuery results:\n{}\n\nPlease provide a concise summary of these results.",
            question.trim(),
            sql,
            Self::describe_results(outcome)
        );
        GenerationRequest {
            prompt,
            system: SUMMARY_SYSTEM_PROMPT.to_string(),
            temperature,
        }
    }

    /// One `table (col1, col2)` line per table.
    pub fn format_schema(tables: &TableColumns) -> String {
        let mut text = String::new();
        for (table, columns) in tables {
            text.push_str(&format!("{} ({})\n", table, columns.join(", ")));
        }
        text
    }

    fn describe_results(outcome: &ExecutionOutcome) -> String {
        let (columns, rows) = match outcome {
            ExecutionOutcome::Rows { columns, rows } if !rows.is_empty() => (columns, rows),
            ExecutionOutcome::Rows { .. } => return "The query returned no results.".to_string(),
            ExecutionOutcome::Affected { rows_affected } => {
                return format!("The statement affected {} rows.", rows_affected)
            }
        };

        let mut stats = String::new();
        for (idx, column) in columns.iter().enumerate() {
            if let Some(col_stats) = NumericStats::collect(rows.iter().filter_map(|r| r.get(idx))) {
                stats.push_str(&format!(
                    "Column {} stats: min={}, max={}, avg={:.2}, sum={}\n",
                    column, col_stats.min, col_stats.max, col_stats.avg(), col_stats.sum
                ));
            }
        }

        let sample = rows.len().min(SUMMARY_SAMPLE_ROWS);
        let mut table = columns.join(" | ");
        for row in rows.iter().take(sample) {
            table.push('\n');
            table.push_str(
                &row.iter()
                    .map(render_value)
                    .collect::<Vec<_>>()
                    .join(" | "),
            );
        }

        format!(
            "Number of rows: {}\nNumber of columns: {}\nColumn names: {}\n\nStatistics:\n{}\nFirst {} rows:\n{}",
            rows.len(),
            columns.len(),
            columns.join(", "),
            stats,
            sample,
            table
        )
    }
}

struct NumericStats {
    min: f64,
    max: f64,
    sum: f64,
    count: usize,
}

impl NumericStats {
    /// `None` unless every non-null value is a number and there is at least one.
    fn collect<'a>(values: impl Iterator<Item = &'a Value>) -> Option<Self> {
        let mut stats: Option<Self> = None;
        for value in values {
            if value.is_null() {
                continue;
            }
            let n = value.as_f64()?;
            let s = stats.get_or_insert(Self {
                min: n,
                max: n,
                sum: 0.0,
                count: 0,
            });
            s.min = s.min.min(n);
            s.max = s.max.max(n);
            s.sum += n;
            s.count += 1;
        }
        stats
    }

    fn avg(&self) -> f64 {
        self.sum / self.count as f64
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
