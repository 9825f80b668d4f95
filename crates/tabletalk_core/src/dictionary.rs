use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One row of schema metadata used to ground prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryEntry {
    pub column_name: String,
    pub data_type: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dictionary {
    pub entries: Vec<DictionaryEntry>,
}

impl Dictionary {
    /// Parse a model reply made of `column_name,data_type,description` lines.
    /// Each line is split on the first two commas only, so descriptions may
    /// themselves contain commas. Lines that do not produce exactly three
    /// fields are dropped silently; well-formed lines keep their order.
    pub fn parse_model_reply(reply: &str) -> Self {
        let mut entries = Vec::new();
        for line in reply.lines() {
            let line = line.trim();
            if !line.contains(',') {
                continue;
            }
            let parts: Vec<&str> = line.splitn(3, ',').collect();
            if parts.len() != 3 {
                continue;
            }
            entries.push(DictionaryEntry {
                column_name: parts[0].trim().to_string(),
                data_type: parts[1].trim().to_string(),
                description: parts[2].trim().to_string(),
            });
        }
        Self { entries }
    }

    /// Load a user-supplied dictionary file: three columns, header row
    /// assumed, used verbatim in place of a generated dictionary.
    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut entries = Vec::new();
        for record in reader.records() {
            let record = record?;
            if record.len() < 3 {
                continue;
            }
            entries.push(DictionaryEntry {
                column_name: record[0].trim().to_string(),
                data_type: record[1].trim().to_string(),
                description: record[2].trim().to_string(),
            });
        }
        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Bulleted form substituted into the query prompt.
    pub fn to_prompt_text(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("- {}: {}. {}", e.column_name, e.data_type, e.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn to_csv_text(&self) -> String {
        let mut out = String::from("column_name,data_type,description\n");
        for e in &self.entries {
            out.push_str(&format!("{},{},{}\n", e.column_name, e.data_type, e.description));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_well_formed_lines_in_order() {
        let reply = "date,string,the transaction date\namount,float,sale amount in USD\n";
        let d = Dictionary::parse_model_reply(reply);
        assert_eq!(d.len(), 2);
        assert_eq!(d.entries[0].column_name, "date");
        assert_eq!(d.entries[1].data_type, "float");
    }

    #[test]
    fn description_keeps_extra_commas() {
        let d = Dictionary::parse_model_reply("city,string,city name, free text, may repeat\n");
        assert_eq!(d.len(), 1);
        assert_eq!(d.entries[0].description, "city name, free text, may repeat");
    }

    #[test]
    fn malformed_lines_drop_without_disturbing_neighbours() {
        let reply = "\
date,string,when it happened
garbage line with no commas
only,one-comma
amount,float,how much
";
        let d = Dictionary::parse_model_reply(reply);
        assert_eq!(d.len(), 2);
        assert_eq!(d.entries[0].column_name, "date");
        assert_eq!(d.entries[1].column_name, "amount");
    }

    #[test]
    fn empty_reply_yields_empty_dictionary() {
        assert!(Dictionary::parse_model_reply("").is_empty());
        assert!(Dictionary::parse_model_reply("no structure here at all").is_empty());
    }

    #[test]
    fn prompt_text_is_bulleted() {
        let d = Dictionary::parse_model_reply("amount,float,sale amount");
        assert_eq!(d.to_prompt_text(), "- amount: float. sale amount");
    }

    #[test]
    fn loads_uploaded_dictionary_csv() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"column_name,data_type,description\ndate,string,the date\n").unwrap();
        f.flush().unwrap();
        let d = Dictionary::from_csv_path(f.path()).unwrap();
        assert_eq!(d.len(), 1);
        assert_eq!(d.entries[0].description, "the date");
    }
}
