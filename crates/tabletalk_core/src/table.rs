use crate::error::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::Path;

/// A single cell. Cells are typed per column at load time; an empty cell is
/// `Null` regardless of the column's type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date(NaiveDate),
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y"];

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    None
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Date view of a cell. String cells are parsed on the fly so that
    /// date-like text columns behave as dates in filters.
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            Value::Str(s) => parse_date(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Date(_) => "date",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, ""),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Date(d) => write!(f, "{d}"),
        }
    }
}

/// Ordering used by comparisons and `sort`. Numeric kinds compare across
/// Int/Float; a string compared against a date (either side) compares as
/// dates when the string parses. Nulls and mixed kinds yield None.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    use Value::*;
    match (a, b) {
        (Null, _) | (_, Null) => None,
        (Bool(x), Bool(y)) => Some(x.cmp(y)),
        (Int(x), Int(y)) => Some(x.cmp(y)),
        (Str(x), Str(y)) => Some(x.cmp(y)),
        (Date(x), Date(y)) => Some(x.cmp(y)),
        (Date(_), Str(_)) | (Str(_), Date(_)) => match (a.as_date(), b.as_date()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => None,
        },
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => None,
        },
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<Value>,
}

/// The user's dataset, loaded once and immutable for the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self { name: name.into(), columns }
    }

    /// Load a delimited file with a header row. Cell types are inferred per
    /// column: int, then float, then date, then string.
    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("table")
            .to_string();
        let mut reader = csv::Reader::from_path(path)?;
        let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
        if headers.is_empty() {
            return Err(Error::Table(format!("{}: no header row", path.display())));
        }
        let mut raw: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
        for record in reader.records() {
            let record = record?;
            for (i, cell) in record.iter().enumerate() {
                if i < raw.len() {
                    raw[i].push(cell.to_string());
                }
            }
            // Short rows pad with empty cells so columns stay rectangular.
            for col in raw.iter_mut().skip(record.len()) {
                col.push(String::new());
            }
        }
        let columns = headers
            .into_iter()
            .zip(raw)
            .map(|(name, cells)| Column { name, values: infer_column(&cells) })
            .collect();
        Ok(Self::new(name, columns))
    }

    pub fn n_rows(&self) -> usize {
        self.columns.first().map(|c| c.values.len()).unwrap_or(0)
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// New table with only the rows whose index is in `keep`, same columns.
    pub fn take_rows(&self, keep: &[usize]) -> Table {
        let columns = self
            .columns
            .iter()
            .map(|c| Column {
                name: c.name.clone(),
                values: keep.iter().map(|&i| c.values[i].clone()).collect(),
            })
            .collect();
        Table::new(self.name.clone(), columns)
    }

    /// First `n` rows rendered as aligned text, header included. This is what
    /// gets substituted into prompts as the sample.
    pub fn sample_text(&self, n: usize) -> String {
        let rows = self.n_rows().min(n);
        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.name.len()).collect();
        let mut cells: Vec<Vec<String>> = Vec::with_capacity(rows);
        for r in 0..rows {
            let row: Vec<String> = self.columns.iter().map(|c| c.values[r].to_string()).collect();
            for (w, cell) in widths.iter_mut().zip(&row) {
                *w = (*w).max(cell.len());
            }
            cells.push(row);
        }
        let mut out = String::new();
        let header: Vec<String> = self
            .columns
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<width$}", c.name, width = *w))
            .collect();
        out.push_str(header.join("  ").trim_end());
        out.push('\n');
        for row in cells {
            let line: Vec<String> = row
                .iter()
                .zip(&widths)
                .map(|(cell, w)| format!("{:<width$}", cell, width = *w))
                .collect();
            out.push_str(line.join("  ").trim_end());
            out.push('\n');
        }
        out
    }
}

fn infer_column(cells: &[String]) -> Vec<Value> {
    let non_empty: Vec<&str> = cells.iter().map(|s| s.trim()).filter(|s| !s.is_empty()).collect();
    let all = |f: &dyn Fn(&str) -> bool| !non_empty.is_empty() && non_empty.iter().all(|s| f(s));

    let kind = if all(&|s| s.parse::<i64>().is_ok()) {
        "int"
    } else if all(&|s| s.parse::<f64>().is_ok()) {
        "float"
    } else if all(&|s| parse_date(s).is_some()) {
        "date"
    } else {
        "string"
    };

    cells
        .iter()
        .map(|raw| {
            let s = raw.trim();
            if s.is_empty() {
                return Value::Null;
            }
            match kind {
                "int" => Value::Int(s.parse().unwrap_or_default()),
                "float" => Value::Float(s.parse().unwrap_or_default()),
                "date" => parse_date(s).map(Value::Date).unwrap_or(Value::Null),
                _ => Value::Str(s.to_string()),
            }
        })
        .collect()
}

pub const NO_RESULT: &str = "no result";

/// What a snippet computes: a scalar, a list of values, or a sub-table.
/// `Answer::None` is the sentinel for a snippet that never bound the result
/// name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Answer {
    None,
    Scalar(Value),
    List(Vec<Value>),
    Table(Table),
}

impl Answer {
    pub fn none() -> Self {
        Answer::None
    }

    /// Text form fed to the Explainer and shown in the history.
    pub fn render(&self) -> String {
        match self {
            Answer::None => NO_RESULT.to_string(),
            Answer::Scalar(v) => v.to_string(),
            Answer::List(vs) => {
                let items: Vec<String> = vs.iter().map(|v| v.to_string()).collect();
                format!("[{}]", items.join(", "))
            }
            Answer::Table(t) => {
                let shown = t.n_rows().min(20);
                let mut s = t.sample_text(shown);
                if t.n_rows() > shown {
                    s.push_str(&format!("... ({} rows total)\n", t.n_rows()));
                }
                s
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn infers_column_types() {
        let f = write_csv("date,amount,qty,city\n2025-01-03,10.5,2,Oslo\n2025-02-10,3.25,7,Bergen\n");
        let t = Table::from_csv_path(f.path()).unwrap();
        assert_eq!(t.n_rows(), 2);
        assert_eq!(t.column("date").unwrap().values[0].type_name(), "date");
        assert_eq!(t.column("amount").unwrap().values[0].type_name(), "float");
        assert_eq!(t.column("qty").unwrap().values[1], Value::Int(7));
        assert_eq!(t.column("city").unwrap().values[0], Value::Str("Oslo".into()));
    }

    #[test]
    fn empty_cells_become_null() {
        let f = write_csv("a,b\n1,\n2,x\n");
        let t = Table::from_csv_path(f.path()).unwrap();
        assert!(t.column("b").unwrap().values[0].is_null());
        assert_eq!(t.column("a").unwrap().values[1], Value::Int(2));
    }

    #[test]
    fn mixed_numeric_column_falls_back_to_float() {
        let f = write_csv("v\n1\n2.5\n");
        let t = Table::from_csv_path(f.path()).unwrap();
        assert_eq!(t.column("v").unwrap().values[0], Value::Float(1.0));
    }

    #[test]
    fn compare_coerces_string_dates() {
        let a = Value::Str("2025-01-03".into());
        let b = Value::Date(NaiveDate::from_ymd_opt(2025, 2, 1).unwrap());
        assert_eq!(compare(&a, &b), Some(Ordering::Less));
        assert_eq!(compare(&Value::Int(3), &Value::Float(2.5)), Some(Ordering::Greater));
        assert_eq!(compare(&Value::Null, &Value::Int(1)), None);
    }

    #[test]
    fn sample_text_has_header_and_rows() {
        let f = write_csv("a,b\n1,x\n2,y\n3,z\n");
        let t = Table::from_csv_path(f.path()).unwrap();
        let s = t.sample_text(2);
        let lines: Vec<&str> = s.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("a"));
        assert!(lines[1].contains('1'));
    }

    #[test]
    fn answer_sentinel_renders_no_result() {
        assert_eq!(Answer::none().render(), NO_RESULT);
        assert_eq!(Answer::Scalar(Value::Int(42)).render(), "42");
        assert_eq!(
            Answer::List(vec![Value::Str("a".into()), Value::Str("b".into())]).render(),
            "[a, b]"
        );
    }
}
