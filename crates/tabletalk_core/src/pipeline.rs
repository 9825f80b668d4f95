use crate::dictionary::Dictionary;
use crate::error::{Error, Result};
use crate::llm::{LlmClient, TextGenerator};
use crate::prompt::{dictionary_prompt, explain_prompt, PromptTemplate};
use crate::session::{Session, Turn};
use crate::snippet::{run_snippet, strip_code_fences};
use crate::table::Table;

/// Rows shown to the model in the query prompt, matching the "top 2 rows"
/// sample the template advertises.
const QUERY_SAMPLE_ROWS: usize = 2;
/// Rows shown when asking for a data dictionary.
const DICTIONARY_SAMPLE_ROWS: usize = 5;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub api_key: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

/// Owns everything one interactive session needs: the immutable table, the
/// dictionary, the active prompt template, the model client, and the turn
/// history. Strictly sequential; each stage blocks on one remote call.
pub struct Pipeline {
    llm: Box<dyn TextGenerator>,
    table: Table,
    dictionary: Option<Dictionary>,
    template: PromptTemplate,
    session: Session,
}

impl Pipeline {
    pub fn new(
        cfg: PipelineConfig,
        table: Table,
        dictionary: Option<Dictionary>,
        template: Option<PromptTemplate>,
        session: Session,
    ) -> Self {
        Self::with_generator(
            Box::new(LlmClient::new(cfg.api_key, cfg.model, cfg.base_url)),
            table,
            dictionary,
            template,
            session,
        )
    }

    /// Build against any [`TextGenerator`], not just the HTTP client.
    pub fn with_generator(
        llm: Box<dyn TextGenerator>,
        table: Table,
        dictionary: Option<Dictionary>,
        template: Option<PromptTemplate>,
        session: Session,
    ) -> Self {
        Self {
            llm,
            table,
            dictionary,
            template: template.unwrap_or_else(PromptTemplate::default_query),
            session,
        }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn dictionary(&self) -> Option<&Dictionary> {
        self.dictionary.as_ref()
    }

    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    /// Replace the active query template. Takes effect from the next turn.
    pub fn set_template(&mut self, template: PromptTemplate) {
        self.template = template;
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn clear_history(&mut self) {
        self.session.clear();
    }

    /// Stage one, one-shot per session unless a dictionary was uploaded.
    /// Remote errors surface; garbled reply lines degrade silently to fewer
    /// entries.
    #[tracing::instrument(skip(self), fields(table = %self.table.name))]
    pub async fn build_dictionary(&mut self) -> Result<&Dictionary> {
        let prompt = dictionary_prompt(&self.table.sample_text(DICTIONARY_SAMPLE_ROWS));
        let reply = self.llm.complete(&prompt).await?;
        let dict = Dictionary::parse_model_reply(&reply);
        tracing::info!(entries = dict.len(), "dictionary generated");
        Ok(self.dictionary.insert(dict))
    }

    /// Stages two and three for one question. Appends a Turn: a fully
    /// answered one, or one whose `error` records where the turn aborted. A
    /// failed snippet skips the explanation stage; its error text is the
    /// turn's message. A dictionary build that fails before the turn starts
    /// propagates as Err instead, leaving no Turn behind.
    #[tracing::instrument(skip(self), fields(table = %self.table.name))]
    pub async fn run_turn(&mut self, question: &str) -> Result<&Turn> {
        if self.dictionary.is_none() {
            self.build_dictionary().await?;
        }
        let dictionary_text = self.dictionary.as_ref().map(|d| d.to_prompt_text()).unwrap_or_default();
        let prompt = self.template.render(
            question,
            &self.table.name,
            &dictionary_text,
            &self.table.sample_text(QUERY_SAMPLE_ROWS),
        );

        let mut turn = Turn::new(question);

        let reply = match self.llm.complete(&prompt).await {
            Ok(r) => r,
            Err(e) => {
                turn.error = Some(format!("query generation failed: {e}"));
                return self.finish(turn);
            }
        };
        let snippet = strip_code_fences(&reply).trim().to_string();
        turn.snippet = Some(snippet.clone());

        let answer = match run_snippet(&self.table, &snippet) {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(error = %e, "snippet execution failed");
                turn.error = Some(e.to_string());
                return self.finish(turn);
            }
        };
        let answer_text = answer.render();
        turn.answer_text = Some(answer_text.clone());

        match self.llm.complete(&explain_prompt(question, &answer_text)).await {
            Ok(explanation) => turn.explanation = Some(explanation.trim().to_string()),
            Err(e) => turn.error = Some(format!("explanation failed: {e}")),
        }
        self.finish(turn)
    }

    fn finish(&mut self, turn: Turn) -> Result<&Turn> {
        self.session.append(turn)?;
        // Just appended, so last() is present.
        self.session.last().ok_or_else(|| Error::Config("empty session after append".into()))
    }
}
