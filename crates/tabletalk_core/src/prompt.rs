use crate::error::{Error, Result};
use crate::snippet::RESULT_NAME;

/// Placeholders every query template must carry. Substitution is verbatim.
pub const PLACEHOLDERS: [&str; 4] = ["{question}", "{table_name}", "{dictionary_text}", "{sample_rows}"];

#[derive(Debug, Clone)]
pub struct PromptTemplate {
    text: String,
}

impl PromptTemplate {
    pub fn default_query() -> Self {
        Self { text: default_query_template() }
    }

    /// A user-overridden template. All four placeholders must be present or
    /// formatting would silently drop context, so we reject up front.
    pub fn custom(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        for ph in PLACEHOLDERS {
            if !text.contains(ph) {
                return Err(Error::Config(format!("prompt template is missing the {ph} placeholder")));
            }
        }
        Ok(Self { text })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn render(&self, question: &str, table_name: &str, dictionary: &str, sample_rows: &str) -> String {
        self.text
            .replace("{question}", question)
            .replace("{table_name}", table_name)
            .replace("{dictionary_text}", dictionary)
            .replace("{sample_rows}", sample_rows)
    }
}

fn default_query_template() -> String {
    format!(
        r#"You are a query writer for an in-memory table.
Answer the user's question by writing a short snippet in the expression
language described below. Return ONLY the snippet, no prose.

**User Question:**
{{question}}

**Table Name:**
{{table_name}}

**Table Details:**
{{dictionary_text}}

**Sample Data (first rows):**
{{sample_rows}}

**Expression language:**
- One assignment per line: `name = expr`. `#` starts a comment.
- The loaded table is bound to `table`. Do not reload or re-read it.
- Table methods: filter(predicate), select(col, ...), group(col),
  sort(col) or sort(col, desc), head(n), unique(col).
- Aggregates on a table or after group(col): sum(col), mean(col),
  min(col), max(col), count().
- Predicates: comparisons == != > >= < <= over columns and literals,
  combined with `and`, `or`, `not`, parenthesised as needed.
- Date helpers inside predicates: year(col), month(col), day(col),
  contains(col, "text"). Date-like string columns are coerced to dates
  by these helpers and by date-literal comparisons; write date
  literals as "YYYY-MM-DD" strings.

**Instructions:**
1. Use only the operations listed above; nothing else will run.
2. Store the final value in a variable named `{result}`. It may be a
   single value, a list, or a filtered table.
3. Keep the snippet concise and focused on answering the question.

**Example:**
If the question is "total amount in January 2025" and the table has
`date` and `amount` columns:

{result} = table.filter(year(date) == 2025 and month(date) == 1).sum(amount)
"#,
        result = RESULT_NAME
    )
}

/// Stage-one prompt: ask the model for `column_name,data_type,description`
/// lines describing the sampled table.
pub fn dictionary_prompt(sample_rows: &str) -> String {
    format!(
        r#"Given the following table sample, generate a data dictionary with columns:
1. column_name - the name of each column
2. data_type - the data type of the column
3. description - a brief description of what the column represents

Sample data:
{sample_rows}

Return the result as CSV lines without a header, each line following this
pattern exactly:
column_name,data_type,description
"#
    )
}

/// Stage-three prompt: narrate the computed answer.
pub fn explain_prompt(question: &str, answer: &str) -> String {
    format!(
        r#"The user asked: {question}
Here is the computed result:
{answer}

Answer the question and summarize the result in plain language. Include any
relevant insights.
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_template_carries_all_placeholders() {
        let t = PromptTemplate::default_query();
        for ph in PLACEHOLDERS {
            assert!(t.text().contains(ph), "missing {ph}");
        }
    }

    #[test]
    fn custom_template_requires_every_placeholder() {
        let err = PromptTemplate::custom("only {question} and {table_name}").unwrap_err();
        assert!(err.to_string().contains("{dictionary_text}"));
        assert!(PromptTemplate::custom("{question}{table_name}{dictionary_text}{sample_rows}").is_ok());
    }

    #[test]
    fn render_substitutes_values_verbatim() {
        let t = PromptTemplate::custom(
            "Q: {question}\nT: {table_name}\nD: {dictionary_text}\nS: {sample_rows}\n",
        )
        .unwrap();
        let got = t.render("total in jan?", "sales", "- amount: float. money", "a  b\n1  2");
        assert_eq!(got, "Q: total in jan?\nT: sales\nD: - amount: float. money\nS: a  b\n1  2\n");
    }

    #[test]
    fn stage_prompts_embed_inputs() {
        assert!(dictionary_prompt("x y z").contains("x y z"));
        let e = explain_prompt("how many?", "42");
        assert!(e.contains("how many?") && e.contains("42"));
    }
}
