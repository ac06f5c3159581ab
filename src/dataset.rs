// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Already-parsed tabular datasets handed over by the upload layer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum rows included when a dataset is described to an LLM backend.
pub const SAMPLE_ROWS: usize = 20;

/// A named table of rows. Cells are JSON scalars as produced by the upload layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
}

impl Dataset {
    pub fn new(name: impl Into<String>, columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// A copy limited to the first `n` rows.
    pub fn head(&self, n: usize) -> Self {
        Self {
            name: self.name.clone(),
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }

    /// Render as an HTML table. Cell text is escaped.
    pub fn to_html(&self) -> String {
        let mut out = String::from("<table class=\"dataframe\">\n<thead>\n<tr>");
        for column in &self.columns {
            out.push_str(&format!("<th>{}</th>", escape_html(column)));
        }
        out.push_str("</tr>\n</thead>\n<tbody>\n");
        for row in &self.rows {
            out.push_str("<tr>");
            for cell in row {
                out.push_str(&format!("<td>{}</td>", escape_html(&cell_text(cell))));
            }
            out.push_str("</tr>\n");
        }
        out.push_str("</tbody>\n</table>");
        out
    }

    /// Schema line plus up to `SAMPLE_ROWS` comma-separated rows.
    pub fn describe(&self) -> String {
        let mut out = format!(
            "Dataset \"{}\" with {} rows and {} columns: {}\n",
            if self.name.is_empty() { "data" } else { &self.name },
            self.row_count(),
            self.column_count(),
            self.columns.join(", ")
        );
        for row in self.rows.iter().take(SAMPLE_ROWS) {
            out.push_str(&row.iter().map(cell_text).collect::<Vec<_>>().join(","));
            out.push('\n');
        }
        if self.row_count() > SAMPLE_ROWS {
            out.push_str(&format!("... {} more rows\n", self.row_count() - SAMPLE_ROWS));
        }
        out
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Minimal HTML escaping for table cells and attributes.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Dataset {
        Dataset::new(
            "sales",
            vec!["country".into(), "sales".into()],
            vec![
                vec![json!("France"), json!(2900)],
                vec![json!("Japan"), json!(4500)],
                vec![json!("China"), json!(7000)],
            ],
        )
    }

    #[test]
    fn test_head_truncates_without_touching_original() {
        let data = sample();
        let head = data.head(2);
        assert_eq!(head.row_count(), 2);
        assert_eq!(data.row_count(), 3);
        assert_eq!(head.columns, data.columns);
        assert_eq!(data.head(10).row_count(), 3);
    }

    #[test]
    fn test_to_html_escapes_cells() {
        let data = Dataset::new("t", vec!["a<b".into()], vec![vec![json!("<script>")]]);
        let html = data.to_html();
        assert!(html.contains("<th>a&lt;b</th>"));
        assert!(html.contains("<td>&lt;script&gt;</td>"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn test_describe_mentions_shape() {
        let text = sample().describe();
        assert!(text.contains("3 rows and 2 columns"));
        assert!(text.contains("France,2900"));
    }

    #[test]
    fn test_deserialize_without_name() {
        let data: Dataset =
            serde_json::from_value(json!({"columns": ["x"], "rows": [[1], [2]]})).unwrap();
        assert_eq!(data.name, "");
        assert_eq!(data.row_count(), 2);
    }
}
